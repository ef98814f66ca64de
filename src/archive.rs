// MIT License
//
// Copyright (c) 2026 Raja Lehtihet & Wael El Oraiby
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
//
//! The on-disk archive shared by every sketch's `save`/`load`.
//!
//! One file per sketch: a versioned, tagged `bincode` encoding of a variant
//! discriminator, a parameter vector, a raw little-endian counter/register
//! payload, and (for CMS/HH) the `n_added` pair. The framing lives here;
//! interpreting `params`/`payload` back into a live sketch is each module's
//! own job.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SketchError};

const ARCHIVE_VERSION: u32 = 1;

/// A decoded archive, before a sketch module reinterprets `payload`.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Archive {
    pub version: u32,
    pub variant: String,
    pub params: Vec<u64>,
    pub payload: Vec<u8>,
    pub n_added: Option<[u64; 2]>,
}

pub(crate) fn save(
    path: &Path,
    variant: &str,
    params: Vec<u64>,
    payload: Vec<u8>,
    n_added: Option<[u64; 2]>,
) -> Result<()> {
    let archive = Archive {
        version: ARCHIVE_VERSION,
        variant: variant.to_owned(),
        params,
        payload,
        n_added,
    };

    let file = File::create(path).map_err(|source| SketchError::ArchiveIo {
        path: path.to_owned(),
        source,
    })?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, &archive).map_err(|source| SketchError::ArchiveDecode {
        path: path.to_owned(),
        source,
    })?;
    tracing::debug!(path = %path.display(), variant, "archive saved");
    Ok(())
}

pub(crate) fn load(path: &Path, expected_variant: &str) -> Result<Archive> {
    let file = File::open(path).map_err(|source| SketchError::ArchiveIo {
        path: path.to_owned(),
        source,
    })?;
    let reader = BufReader::new(file);
    let archive: Archive =
        bincode::deserialize_from(reader).map_err(|source| SketchError::ArchiveDecode {
            path: path.to_owned(),
            source,
        })?;

    if archive.variant != expected_variant {
        return Err(SketchError::IncompatibleSketches(
            "archive variant does not match the sketch type being loaded",
        ));
    }
    tracing::debug!(path = %path.display(), variant = %archive.variant, "archive loaded");
    Ok(archive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn round_trips_through_disk() {
        let file = NamedTempFile::new().unwrap();
        save(
            file.path(),
            "linear",
            vec![1024, 8],
            vec![1, 2, 3, 4],
            Some([42, 7]),
        )
        .unwrap();

        let archive = load(file.path(), "linear").unwrap();
        assert_eq!(archive.version, ARCHIVE_VERSION);
        assert_eq!(archive.params, vec![1024, 8]);
        assert_eq!(archive.payload, vec![1, 2, 3, 4]);
        assert_eq!(archive.n_added, Some([42, 7]));
    }

    #[test]
    fn mismatched_variant_on_load_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        save(file.path(), "linear", vec![], vec![], None).unwrap();
        assert!(load(file.path(), "hll").is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let missing = Path::new("/nonexistent/path/to/archive.bin");
        assert!(matches!(load(missing, "linear"), Err(SketchError::ArchiveIo { .. })));
    }
}
