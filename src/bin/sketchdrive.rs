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
//! Reads newline-delimited keys from a file (or stdin) and builds CMS/HH/HLL
//! sketches over them using the parallel-ingest driver, then reports the
//! requested top-k heavy hitters and cardinality estimate.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use clap::Parser;
use sketchdrive::cms::CmsParams;
use sketchdrive::hh::HhParams;
use sketchdrive::hll::HllParams;
use sketchdrive::parallel::{parallel_add, ParallelAddConfig};

/// Ingests a stream of keys in parallel and reports approximate statistics.
#[derive(Parser)]
#[command(name = "sketchdrive")]
#[command(about = "Build mergeable sketches over a stream of keys", long_about = None)]
#[command(version)]
struct Cli {
    /// Input file of newline-delimited keys; reads stdin if omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Number of worker threads; defaults to the detected CPU count.
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Count-min sketch width (hash buckets per row).
    #[arg(long, default_value_t = 4096)]
    cms_width: usize,

    /// Count-min sketch depth (independent hash rows).
    #[arg(long, default_value_t = 5)]
    cms_depth: usize,

    /// HyperLogLog precision (register count is 2^p).
    #[arg(long, default_value_t = 14)]
    hll_precision: u8,

    /// Number of heavy hitters to report.
    #[arg(short = 'k', long, default_value_t = 10)]
    top_k: usize,

    /// Minimum estimated count for a heavy hitter to be reported.
    #[arg(long, default_value_t = 0)]
    threshold: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let lines = read_lines(cli.input.as_deref())?;

    let config = ParallelAddConfig::new()
        .with_cms(CmsParams::linear(cli.cms_width, cli.cms_depth, false))
        .with_hh(HhParams::new(cli.cms_width, cli.cms_depth, 64, cli.threshold, false))
        .with_hll(HllParams::new(cli.hll_precision, 0, false));
    let config = match cli.workers {
        Some(n) => config.with_n_workers(n),
        None => config,
    };

    let bundle = parallel_add(lines, config, |line: String| {
        vec![vec![line.into_bytes()]]
    })?;

    if let Some(hll) = &bundle.hll {
        println!("distinct keys (estimate): {}", hll.query());
    }
    if let Some(mut hh) = bundle.hh {
        println!("top {} heavy hitters:", cli.top_k);
        for hitter in hh.top_hitters(cli.top_k) {
            println!("  {:>10}  {}", hitter.estimate, String::from_utf8_lossy(&hitter.key));
        }
    }
    if let Some(cms) = &bundle.cms {
        println!("total keys ingested: {}", cms.n_added());
    }

    Ok(())
}

fn read_lines(path: Option<&std::path::Path>) -> io::Result<Vec<String>> {
    let reader: Box<dyn BufRead> = match path {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };
    reader.lines().collect()
}
