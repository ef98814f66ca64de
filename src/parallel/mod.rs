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
//! Parallel-ingest driver: fan a stream of items out across `n_workers`
//! threads, each updating its own shared-memory replica of the requested
//! sketches, then tree-merge the replicas back into one [`SketchBundle`].

mod bundle;
mod feeder;
mod spawner;
mod worker;

pub use bundle::{ParallelAddConfig, SketchBundle};
pub use spawner::{DefaultParallelismProbe, FixedParallelismProbe, ParallelismProbe, ThreadSpawner, WorkerSpawner};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::cms::Cms;
use crate::error::{Result, SketchError};
use crate::hh::HeavyHitters;
use crate::hll::HyperLogLog;
use crate::slab::SlabName;
use worker::{WorkerContext, WorkerStatus};

/// Runs `parallel_add` with the default thread-based spawner and CPU-count probe.
pub fn parallel_add<Item, F, Recs, Rec>(
    items: impl IntoIterator<Item = Item> + Send + 'static,
    config: ParallelAddConfig,
    process: F,
) -> Result<SketchBundle>
where
    Item: Send + 'static,
    F: Fn(Item) -> Recs + Send + Sync + 'static,
    Recs: IntoIterator<Item = Rec>,
    Rec: IntoIterator<Item = Vec<u8>>,
{
    parallel_add_with(items, config, process, &ThreadSpawner, &DefaultParallelismProbe)
}

/// Runs `parallel_add` with caller-supplied collaborators for worker
/// execution and parallelism detection.
///
/// # Errors
/// Returns [`SketchError::WorkerFailed`] if any worker's `process` callback
/// panicked or if a sketch replica could not be allocated or merged.
pub fn parallel_add_with<Item, F, Recs, Rec>(
    items: impl IntoIterator<Item = Item> + Send + 'static,
    config: ParallelAddConfig,
    process: F,
    spawner: &dyn WorkerSpawner,
    probe: &dyn ParallelismProbe,
) -> Result<SketchBundle>
where
    Item: Send + 'static,
    F: Fn(Item) -> Recs + Send + Sync + 'static,
    Recs: IntoIterator<Item = Rec>,
    Rec: IntoIterator<Item = Vec<u8>>,
{
    let n_workers = config.n_workers.unwrap_or_else(|| probe.available_parallelism()).max(1);
    tracing::info!(n_workers, "starting parallel_add");

    let cms_params = config.cms_args.map(|p| crate::cms::CmsParams { shared_memory: true, ..p });
    let hh_params = config.hh_args.map(|p| crate::hh::HhParams { shared_memory: true, ..p });
    let hll_params = config.hll_args.map(|p| crate::hll::HllParams { shared_memory: true, ..p });

    let mut cms_replicas = Vec::new();
    let mut cms_names = Vec::new();
    if let Some(params) = cms_params {
        for _ in 0..n_workers {
            let cms = Cms::new(params)?;
            cms_names.push(cms.slab_name().cloned());
            cms_replicas.push(cms);
        }
    }

    let mut hh_replicas = Vec::new();
    let mut hh_names = Vec::new();
    if let Some(params) = hh_params {
        for _ in 0..n_workers {
            let hh = HeavyHitters::new(params)?;
            hh_names.push(hh.slab_name().cloned());
            hh_replicas.push(hh);
        }
    }

    let mut hll_replicas = Vec::new();
    let mut hll_names = Vec::new();
    if let Some(params) = hll_params {
        for _ in 0..n_workers {
            let hll = HyperLogLog::new(params)?;
            hll_names.push(hll.slab_name().cloned());
            hll_replicas.push(hll);
        }
    }

    let (work_tx, work_rx) = crossbeam_channel::bounded::<Option<Item>>(3 * n_workers);
    let (status_tx, status_rx) = crossbeam_channel::unbounded::<WorkerStatus>();
    let cancel = Arc::new(AtomicBool::new(false));

    let process = Arc::new(process);
    let mut bodies: Vec<Box<dyn FnOnce() + Send + 'static>> = Vec::with_capacity(n_workers);
    for worker_id in 0..n_workers {
        let ctx = WorkerContext {
            worker_id,
            work_rx: work_rx.clone(),
            status_tx: status_tx.clone(),
            cancel: cancel.clone(),
            process: process.clone(),
            cms_params,
            cms_name: cms_names.get(worker_id).cloned().flatten(),
            hh_params,
            hh_name: hh_names.get(worker_id).cloned().flatten(),
            hll_params,
            hll_name: hll_names.get(worker_id).cloned().flatten(),
            ngram: config.ngram,
        };
        bodies.push(Box::new(move || worker::run(ctx)));
    }
    drop(work_rx);
    drop(status_tx);

    let feeder_tx = work_tx.clone();
    let feeder = std::thread::spawn(move || feeder::fill_queue(items, feeder_tx, n_workers));
    drop(work_tx);

    spawner.run(bodies);
    let _ = feeder.join();

    let mut failure = None;
    for _ in 0..n_workers {
        match status_rx.recv() {
            Ok(WorkerStatus::Ok) => {}
            Ok(WorkerStatus::Failed { worker_id, detail }) => {
                cancel.store(true, Ordering::Relaxed);
                failure.get_or_insert(SketchError::WorkerFailed { worker_id, detail });
            }
            Err(_) => break,
        }
    }

    if let Some(err) = failure {
        release_all(cms_replicas);
        release_all(hh_replicas);
        release_all(hll_replicas);
        return Err(err);
    }

    let cms = tree_merge(cms_replicas, |a, b| a.merge(b))?;
    let hh = tree_merge(hh_replicas, |a, b| a.merge(b))?;
    let hll = tree_merge(hll_replicas, |a, b| a.merge(b))?;

    Ok(SketchBundle { cms, hh, hll })
}

fn release_all<T>(replicas: Vec<T>)
where
    T: ReleaseShared,
{
    for replica in replicas {
        if let Err(e) = replica.release_shared() {
            tracing::error!(error = %e, "failed to release a replica's shared memory after worker failure");
        }
    }
}

trait ReleaseShared {
    fn release_shared(self) -> Result<()>;
}

impl ReleaseShared for Cms {
    fn release_shared(self) -> Result<()> {
        self.release_shared_memory()
    }
}

impl ReleaseShared for HeavyHitters {
    fn release_shared(self) -> Result<()> {
        self.release_shared_memory()
    }
}

impl ReleaseShared for HyperLogLog {
    fn release_shared(self) -> Result<()> {
        self.release_shared_memory()
    }
}

/// Merges `replicas` down to one survivor via concurrent pairwise rounds.
///
/// Each round spawns one real thread per pair (via `std::thread::scope`), so
/// a merge with 8 replicas does three rounds of genuinely concurrent work
/// (4 pairs, then 2, then 1) rather than one thread folding sequentially.
fn tree_merge<T, M>(mut replicas: Vec<T>, merge: M) -> Result<Option<T>>
where
    T: Send + ReleaseShared,
    M: Fn(&mut T, &T) -> Result<()> + Sync,
{
    if replicas.is_empty() {
        return Ok(None);
    }

    while replicas.len() > 1 {
        let error: Mutex<Option<SketchError>> = Mutex::new(None);
        std::thread::scope(|scope| {
            for pair in replicas.chunks_mut(2) {
                if pair.len() == 2 {
                    let (left, right) = pair.split_at_mut(1);
                    let merge = &merge;
                    let error = &error;
                    scope.spawn(move || {
                        if let Err(e) = merge(&mut left[0], &right[0]) {
                            *error.lock().expect("merge error mutex poisoned") = Some(e);
                        }
                    });
                }
            }
        });
        if let Some(e) = error.into_inner().expect("merge error mutex poisoned") {
            release_all(replicas);
            return Err(e);
        }

        let mut survivors = Vec::with_capacity(replicas.len().div_ceil(2));
        let mut losers = Vec::new();
        for (i, replica) in replicas.into_iter().enumerate() {
            if i % 2 == 0 {
                survivors.push(replica);
            } else {
                losers.push(replica);
            }
        }
        release_all(losers);
        replicas = survivors;
    }

    Ok(replicas.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::CmsParams;
    use crate::hh::HhParams;
    use crate::hll::HllParams;
    use spawner::FixedParallelismProbe;

    #[test]
    fn parallel_add_ingests_every_item_across_workers() {
        let items: Vec<u32> = (0..10_000).collect();
        let config = ParallelAddConfig::new()
            .with_n_workers(4)
            .with_cms(CmsParams::linear(2048, 6, false))
            .with_hh(HhParams::new(256, 6, 8, 0, false))
            .with_hll(HllParams::new(12, 0, false));

        let bundle = parallel_add_with(
            items,
            config,
            |n: u32| vec![vec![n.to_le_bytes().to_vec()]],
            &ThreadSpawner,
            &FixedParallelismProbe::new(4),
        )
        .unwrap();

        let cms = bundle.cms.unwrap();
        assert_eq!(cms.n_added(), 10_000);
        let hll = bundle.hll.unwrap();
        let estimate = hll.query() as f64;
        assert!((estimate - 10_000.0).abs() / 10_000.0 < 0.1, "estimate={estimate}");
        assert!(bundle.hh.is_some());
    }

    #[test]
    fn worker_panic_surfaces_as_worker_failed() {
        let items: Vec<u32> = (0..100).collect();
        let config = ParallelAddConfig::new()
            .with_n_workers(2)
            .with_cms(CmsParams::linear(64, 4, false));

        let result = parallel_add_with(
            items,
            config,
            |n: u32| -> Vec<Vec<Vec<u8>>> {
                if n == 50 {
                    panic!("synthetic failure");
                }
                vec![vec![n.to_le_bytes().to_vec()]]
            },
            &ThreadSpawner,
            &FixedParallelismProbe::new(2),
        );

        assert!(matches!(result, Err(SketchError::WorkerFailed { .. })));
    }

    #[test]
    fn zero_ngram_surfaces_as_worker_failed_not_a_panic() {
        let items: Vec<u32> = (0..10).collect();
        let mut config = ParallelAddConfig::new()
            .with_n_workers(2)
            .with_cms(CmsParams::linear(64, 4, false));
        config.ngram = Some(0);

        let result = parallel_add_with(
            items,
            config,
            |n: u32| vec![vec![n.to_le_bytes().to_vec()]],
            &ThreadSpawner,
            &FixedParallelismProbe::new(2),
        );

        assert!(matches!(result, Err(SketchError::WorkerFailed { .. })));
    }

    #[test]
    fn empty_config_yields_empty_bundle() {
        let items: Vec<u32> = vec![];
        let bundle = parallel_add_with(
            items,
            ParallelAddConfig::new().with_n_workers(2),
            |_: u32| Vec::<Vec<Vec<u8>>>::new(),
            &ThreadSpawner,
            &FixedParallelismProbe::new(2),
        )
        .unwrap();
        assert!(bundle.cms.is_none());
        assert!(bundle.hh.is_none());
        assert!(bundle.hll.is_none());
    }
}
