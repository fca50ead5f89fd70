use super::record::JobRecord;
use super::{JobQueueHandle, WorkOutcome, Worker};
use crate::store::Store;
use chrono::Utc;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

/// One named sub-queue (`default`, `cancel_queue`, ...). Generalizes
/// `libscheduler::scheduler::SchedulingQueue`'s active/backoff heaps into a
/// single heap ordered by `scheduled_at`, since a job's "not yet due" state and
/// a pod's "in backoff" state are the same wait-until-a-time concept.
pub(super) struct SubQueue<S: Store> {
    heap: Mutex<BinaryHeap<JobRecord>>,
    wake_tx: watch::Sender<usize>,
    wake_rx: Mutex<watch::Receiver<usize>>,
    max_parallelism: usize,
    stopped: AtomicBool,
    worker: Arc<dyn Worker<S>>,
}

impl<S: Store + 'static> SubQueue<S> {
    pub fn new(max_parallelism: usize, worker: Arc<dyn Worker<S>>) -> Self {
        let (wake_tx, wake_rx) = watch::channel(0);
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            wake_tx,
            wake_rx: Mutex::new(wake_rx),
            max_parallelism,
            stopped: AtomicBool::new(false),
            worker,
        }
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake_tx.send_modify(|v| *v += 1);
    }

    pub async fn push(&self, record: JobRecord) {
        self.heap.lock().await.push(record);
        self.wake_tx.send_modify(|v| *v += 1);
    }

    /// Pops the next due job, waiting for either the clock or a `push` to make
    /// one available. Returns `None` once [`stop`](Self::stop) has been called
    /// and nothing remains due.
    async fn next_due(&self) -> Option<JobRecord> {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                let mut heap = self.heap.lock().await;
                if heap.peek().is_none() {
                    return None;
                }
                let now = Utc::now();
                if heap.peek().unwrap().scheduled_at <= now {
                    return heap.pop();
                }
                return None;
            }

            let wait_until = {
                let mut heap = self.heap.lock().await;
                match heap.peek() {
                    None => None,
                    Some(top) => {
                        let now = Utc::now();
                        if top.scheduled_at <= now {
                            return heap.pop();
                        }
                        let delta = (top.scheduled_at - now)
                            .to_std()
                            .unwrap_or(std::time::Duration::ZERO);
                        Some(Instant::now() + delta)
                    }
                }
            };

            let mut wake_rx = self.wake_rx.lock().await;
            match wait_until {
                None => {
                    let _ = wake_rx.changed().await;
                }
                Some(deadline) => {
                    let _ = tokio::time::timeout_at(deadline, wake_rx.changed()).await;
                }
            }
        }
    }

    /// Runs one worker slot: pop, dispatch, react to the outcome, repeat. A
    /// sub-queue with `max_parallelism = N` spawns this N times, each with its
    /// own independent parallelism limit.
    pub async fn run_one(self: Arc<Self>, kind: &'static str, handle: JobQueueHandle<S>) {
        while let Some(mut record) = self.next_due().await {
            let outcome = self.worker.handle(&handle, &mut record).await;
            match outcome {
                WorkOutcome::Completed => {
                    handle.forget(kind, record.id).await;
                    handle.emit_completed(record);
                }
                WorkOutcome::Cancelled => {
                    handle.forget(kind, record.id).await;
                    handle.emit_cancelled(record);
                }
                WorkOutcome::Retry => {
                    if record.attempts_remaining <= 1 {
                        log::error!(
                            "job {} (kind {}) exhausted retries, dropping",
                            record.id,
                            record.kind()
                        );
                        handle.forget(kind, record.id).await;
                        continue;
                    }
                    record.attempts_remaining -= 1;
                    let backoff_attempt = super::MAX_ATTEMPTS - record.attempts_remaining;
                    let backoff = std::time::Duration::from_secs(
                        2_u64.saturating_pow(backoff_attempt.min(32)),
                    );
                    record.scheduled_at = Utc::now()
                        + chrono::Duration::from_std(backoff).unwrap_or(chrono::Duration::zero());
                    handle.persist_reschedule(kind, &record).await;
                    self.push(record).await;
                }
                WorkOutcome::Snooze(delay) => {
                    record.scheduled_at = Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                    handle.persist_reschedule(kind, &record).await;
                    self.push(record).await;
                }
            }
        }
    }
}
