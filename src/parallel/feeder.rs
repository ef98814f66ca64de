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
//! Feeds the bounded work queue, then queues one poison pill per worker.

use crossbeam_channel::Sender;

/// Sends every item from `items` onto `work_tx`, then `n_workers` trailing
/// `None` sentinels so every worker can observe end-of-stream and exit.
///
/// The sentinel loop below is the one place the source's `_fill_queue`
/// carried an off-by-one bug (it logged `i+i` where `i+1` was clearly
/// intended); this crate uses `i+1` for the 1-indexed pill number in its
/// trace log.
pub(crate) fn fill_queue<Item>(
    items: impl IntoIterator<Item = Item>,
    work_tx: Sender<Option<Item>>,
    n_workers: usize,
) {
    for item in items {
        if work_tx.send(Some(item)).is_err() {
            tracing::debug!("work queue closed early; feeder stopping");
            return;
        }
    }

    for i in 0..n_workers {
        tracing::trace!(pill = i + 1, of = n_workers, "queuing poison pill");
        if work_tx.send(None).is_err() {
            tracing::debug!("work queue closed while queuing poison pills");
            return;
        }
    }
}
