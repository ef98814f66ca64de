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
//! Error taxonomy shared by every sketch and by the parallel driver.

use std::path::PathBuf;

/// Errors returned by sketch constructors, merges, archive I/O, the shared-memory
/// slab, and the parallel driver.
#[derive(Debug, thiserror::Error)]
pub enum SketchError {
    /// A constructor or `merge` received a structurally invalid argument.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// Two sketches (or a sketch and a loaded archive) are not shape-compatible.
    #[error("incompatible sketches: {0}")]
    IncompatibleSketches(&'static str),

    /// Allocating, attaching to, or releasing a shared-memory slab failed.
    #[error("shared-memory slab error: {0}")]
    Slab(String),

    /// A slab was unlinked while attacher handles over its views were still live.
    #[error("resource leak: {0} live attacher(s) over slab {1:?} at release time")]
    ResourceLeak(usize, String),

    /// Reading or writing the on-disk archive failed.
    #[error("archive I/O error for {path}: {source}")]
    ArchiveIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive payload could not be decoded, or decoded into the wrong shape.
    #[error("archive decode error for {path}: {source}")]
    ArchiveDecode {
        path: PathBuf,
        #[source]
        source: Box<bincode::ErrorKind>,
    },

    /// A worker in the parallel driver reported a non-success status.
    #[error("worker {worker_id} failed: {detail}")]
    WorkerFailed { worker_id: usize, detail: String },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SketchError>;
