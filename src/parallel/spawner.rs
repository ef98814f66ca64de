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
//! The two collaborators `parallel_add` treats as external and replaceable:
//! how workers actually run, and how "available parallelism" is measured.
//!
//! Both are out of this crate's scope per its own design — the production
//! answer (fork/exec a worker process, read `/proc` or cgroup quotas) is a
//! caller concern. What this crate owns is the contract each collaborator
//! must satisfy, plus a thread-based default that satisfies it.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Runs a fixed number of worker bodies to completion.
///
/// A caller targeting real OS processes implements this by forking/execing
/// a worker binary that attaches to the same [`crate::slab::Slab`] names and
/// exits with a status this trait's caller (the driver) is not shown —
/// `run` only needs to block until every worker has finished or failed;
/// failure is reported by workers themselves over the status channel set up
/// in [`super::parallel_add`], not through this trait's return type.
pub trait WorkerSpawner: Send + Sync {
    fn run(&self, bodies: Vec<Box<dyn FnOnce() + Send + 'static>>);
}

/// Runs every worker as an OS thread. See `SPEC_FULL.md` §5 for why this is
/// observationally equivalent to a process-per-worker model for every
/// invariant this crate checks.
#[derive(Debug, Default)]
pub struct ThreadSpawner;

impl WorkerSpawner for ThreadSpawner {
    fn run(&self, bodies: Vec<Box<dyn FnOnce() + Send + 'static>>) {
        let handles: Vec<_> = bodies.into_iter().map(std::thread::spawn).collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("a worker thread panicked without reporting its own status");
            }
        }
    }
}

/// Probes how many workers to run when the caller does not pin `n_workers`.
pub trait ParallelismProbe: Send + Sync {
    fn available_parallelism(&self) -> usize;
}

/// Default probe, backed by `num_cpus`.
#[derive(Debug, Default)]
pub struct DefaultParallelismProbe;

impl ParallelismProbe for DefaultParallelismProbe {
    fn available_parallelism(&self) -> usize {
        num_cpus::get().max(1)
    }
}

/// A fake probe for tests: returns a fixed count regardless of the host.
#[derive(Debug)]
pub struct FixedParallelismProbe(AtomicUsize);

impl FixedParallelismProbe {
    pub fn new(count: usize) -> Self {
        FixedParallelismProbe(AtomicUsize::new(count.max(1)))
    }
}

impl ParallelismProbe for FixedParallelismProbe {
    fn available_parallelism(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_probe_reports_configured_count() {
        let probe = FixedParallelismProbe::new(6);
        assert_eq!(probe.available_parallelism(), 6);
    }

    #[test]
    fn fixed_probe_clamps_zero_to_one() {
        let probe = FixedParallelismProbe::new(0);
        assert_eq!(probe.available_parallelism(), 1);
    }

    #[test]
    fn thread_spawner_runs_every_body() {
        use std::sync::atomic::AtomicU32;
        use std::sync::Arc;

        let counter = Arc::new(AtomicU32::new(0));
        let bodies: Vec<Box<dyn FnOnce() + Send>> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                Box::new(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                }) as Box<dyn FnOnce() + Send>
            })
            .collect();

        ThreadSpawner.run(bodies);
        assert_eq!(counter.load(Ordering::Relaxed), 8);
    }
}
