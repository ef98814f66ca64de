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
//! One worker's view of the pipeline: attach to this worker's replicas,
//! drain the queue, apply every record's keys, then stamp a record count
//! and report status.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::cms::{Cms, CmsParams};
use crate::hh::{HeavyHitters, HhParams};
use crate::hll::{HllParams, HyperLogLog};
use crate::slab::SlabName;

pub(crate) enum WorkerStatus {
    Ok,
    Failed { worker_id: usize, detail: String },
}

pub(crate) struct WorkerContext<Item, F, Recs, Rec>
where
    F: Fn(Item) -> Recs + Send + Sync + 'static,
    Recs: IntoIterator<Item = Rec>,
    Rec: IntoIterator<Item = Vec<u8>>,
{
    pub worker_id: usize,
    pub work_rx: Receiver<Option<Item>>,
    pub status_tx: Sender<WorkerStatus>,
    pub cancel: Arc<AtomicBool>,
    pub process: Arc<F>,
    pub cms_params: Option<CmsParams>,
    pub cms_name: Option<SlabName>,
    pub hh_params: Option<HhParams>,
    pub hh_name: Option<SlabName>,
    pub hll_params: Option<HllParams>,
    pub hll_name: Option<SlabName>,
    pub ngram: Option<usize>,
}

pub(crate) fn run<Item, F, Recs, Rec>(ctx: WorkerContext<Item, F, Recs, Rec>)
where
    F: Fn(Item) -> Recs + Send + Sync + 'static,
    Recs: IntoIterator<Item = Rec>,
    Rec: IntoIterator<Item = Vec<u8>>,
{
    let mut cms = match (ctx.cms_params, &ctx.cms_name) {
        (Some(params), Some(name)) => match Cms::attach(params, name) {
            Ok(cms) => Some(cms),
            Err(e) => return fail(&ctx.status_tx, ctx.worker_id, e.to_string()),
        },
        _ => None,
    };
    let mut hh = match (ctx.hh_params, &ctx.hh_name) {
        (Some(params), Some(name)) => match HeavyHitters::attach(params, name) {
            Ok(hh) => Some(hh),
            Err(e) => return fail(&ctx.status_tx, ctx.worker_id, e.to_string()),
        },
        _ => None,
    };
    let mut hll = match (ctx.hll_params, &ctx.hll_name) {
        (Some(params), Some(name)) => match HyperLogLog::attach(params, name) {
            Ok(hll) => Some(hll),
            Err(e) => return fail(&ctx.status_tx, ctx.worker_id, e.to_string()),
        },
        _ => None,
    };

    let mut record_count = 0_u64;

    loop {
        if ctx.cancel.load(Ordering::Relaxed) {
            tracing::debug!(worker_id = ctx.worker_id, "worker observed cancellation");
            return;
        }
        let item = match ctx.work_rx.recv() {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(_) => break,
        };

        let process = ctx.process.clone();
        let ngram = ctx.ngram;
        let outcome: std::thread::Result<crate::error::Result<u64>> =
            panic::catch_unwind(AssertUnwindSafe(|| {
                let records = process(item);
                let mut applied = 0_u64;
                for record in records {
                    for key in record {
                        if let Some(n) = ngram {
                            if let Some(cms) = &mut cms {
                                cms.add_ngram(&key, n)?;
                            }
                            if let Some(hh) = &mut hh {
                                hh.add_ngram(&key, n)?;
                            }
                        } else {
                            if let Some(cms) = &mut cms {
                                cms.add(&key);
                            }
                            if let Some(hh) = &mut hh {
                                hh.add(&key);
                            }
                        }
                        if let Some(hll) = &mut hll {
                            hll.add(&key);
                        }
                    }
                    applied += 1;
                }
                Ok(applied)
            }));

        match outcome {
            Ok(Ok(applied)) => record_count += applied,
            Ok(Err(e)) => return fail(&ctx.status_tx, ctx.worker_id, e.to_string()),
            Err(panic) => {
                let detail = panic_message(&panic);
                return fail(&ctx.status_tx, ctx.worker_id, detail);
            }
        }
    }

    if let Some(cms) = &mut cms {
        cms.set_n_records(record_count);
    }
    if let Some(hh) = &mut hh {
        hh.set_n_records(record_count);
    }

    let _ = ctx.status_tx.send(WorkerStatus::Ok);
}

fn fail(status_tx: &Sender<WorkerStatus>, worker_id: usize, detail: String) {
    tracing::error!(worker_id, detail = %detail, "worker failed");
    let _ = status_tx.send(WorkerStatus::Failed { worker_id, detail });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked with a non-string payload".to_owned()
    }
}
