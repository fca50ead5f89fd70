//! Job Queue. Generalizes `libscheduler::scheduler::SchedulingQueue`'s
//! active/backoff heaps plus `watch`-driven wake signal from "one queue of pods
//! ordered by priority" to "N named sub-queues of jobs ordered by `scheduled_at`,
//! each with its own parallelism limit and exponential backoff."
//!
//! Every insertion, reschedule, and terminal outcome is mirrored to the
//! [`Store`](crate::store::Store) this queue is built with, so a process
//! restart reloads exactly the jobs that were still outstanding rather than
//! silently dropping them; this module is the in-process dispatch layer on
//! top of that persisted state.

mod record;
mod subqueue;

pub use record::{JobPayload, JobRecord, MAX_ATTEMPTS};

use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use subqueue::SubQueue;
use tokio::sync::broadcast;

/// What a [`Worker`] reports after handling a job.
pub enum WorkOutcome {
    /// Terminal success. Fires a `completed` event.
    Completed,
    /// Transient failure; redelivered after backoff, consuming one attempt.
    Retry,
    /// Redelivered after `delay` without consuming an attempt.
    Snooze(std::time::Duration),
    /// Terminal, non-error withdrawal. Fires a `cancelled` event.
    Cancelled,
}

/// A sub-queue's job handler. Receives a [`JobQueueHandle`] so it can insert a
/// follow-up job (e.g. a cleanup) without a static back-reference to the queue
/// that dispatched it — a client-from-context pattern instead of a cycle.
#[async_trait]
pub trait Worker<S: Store>: Send + Sync {
    async fn handle(&self, queue: &JobQueueHandle<S>, record: &mut JobRecord) -> WorkOutcome;
}

struct Inner<S: Store> {
    subqueues: HashMap<&'static str, Arc<SubQueue<S>>>,
    next_id: AtomicU64,
    completed_tx: broadcast::Sender<JobRecord>,
    cancelled_tx: broadcast::Sender<JobRecord>,
    store: Arc<S>,
}

/// Cheaply-cloneable reference to a running [`JobQueue`], handed to workers.
pub struct JobQueueHandle<S: Store> {
    inner: Arc<Inner<S>>,
}

impl<S: Store> Clone for JobQueueHandle<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Store + 'static> JobQueueHandle<S> {
    pub(crate) fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn subqueue(&self, kind: &str) -> anyhow::Result<Arc<SubQueue<S>>> {
        self.inner
            .subqueues
            .get(kind)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no sub-queue registered for kind {kind}"))
    }

    /// Inserts one job into sub-queue `queue_name`, scheduled immediately.
    pub async fn insert(&self, queue_name: &'static str, payload: JobPayload) -> anyhow::Result<u64> {
        self.insert_scheduled(queue_name, payload, Utc::now(), Vec::new())
            .await
    }

    /// Scheduled insertion. `queue_name` selects the sub-queue (`default`,
    /// `cancel_queue`, ...); the job's `kind` tag is derived from the payload
    /// itself, since each payload variant has exactly one kind. Persists the
    /// row to the store before it becomes visible to the sub-queue's heap, so
    /// a crash right after this call still leaves a durable row to recover.
    pub async fn insert_scheduled(
        &self,
        queue_name: &'static str,
        payload: JobPayload,
        scheduled_at: DateTime<Utc>,
        tags: Vec<String>,
    ) -> anyhow::Result<u64> {
        let subqueue = self.subqueue(queue_name)?;
        let id = self.next_id();
        let record = JobRecord {
            id,
            payload,
            scheduled_at,
            attempts_remaining: MAX_ATTEMPTS,
            tags,
        };
        self.inner.store.put_job(queue_name, &record).await?;
        subqueue.push(record).await;
        Ok(id)
    }

    /// Batch insertion — all rows become visible to their sub-queues in one
    /// pass; no other caller can observe a partial batch because each
    /// sub-queue's heap is behind its own lock, acquired here one at a time but
    /// never yielded to another task mid-batch.
    pub async fn insert_many(
        &self,
        items: Vec<(&'static str, JobPayload, DateTime<Utc>, Vec<String>)>,
    ) -> anyhow::Result<Vec<u64>> {
        let mut ids = Vec::with_capacity(items.len());
        for (queue_name, payload, scheduled_at, tags) in items {
            ids.push(
                self.insert_scheduled(queue_name, payload, scheduled_at, tags)
                    .await?,
            );
        }
        Ok(ids)
    }

    /// Pushes a job record onto `queue_name`'s in-memory heap without
    /// persisting it — for a caller that already persisted the row as part of
    /// a larger transaction (e.g. [`crate::group::GroupAssembler::promote_and_enqueue`])
    /// and only needs this process's dispatch loop to pick it up.
    pub(crate) async fn enqueue_local(
        &self,
        queue_name: &'static str,
        record: JobRecord,
    ) -> anyhow::Result<()> {
        self.subqueue(queue_name)?.push(record).await;
        Ok(())
    }

    pub fn subscribe_completed(&self) -> broadcast::Receiver<JobRecord> {
        self.inner.completed_tx.subscribe()
    }

    pub fn subscribe_cancelled(&self) -> broadcast::Receiver<JobRecord> {
        self.inner.cancelled_tx.subscribe()
    }
}

/// Owns the sub-queues and their worker pools. Construct with [`JobQueue::new`],
/// register workers with [`JobQueue::register`], then [`JobQueue::start`] to
/// reload persisted jobs and spawn the dispatch loops. Dropping the returned
/// [`JobQueueHandle`]s does not stop dispatch; call [`JobQueue::shutdown`] for
/// a clean stop that waits for in-flight workers.
pub struct JobQueue<S: Store> {
    handle: JobQueueHandle<S>,
    worker_tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl<S: Store + 'static> JobQueue<S> {
    pub fn new(store: Arc<S>) -> Self {
        let (completed_tx, _) = broadcast::channel(1024);
        let (cancelled_tx, _) = broadcast::channel(1024);
        Self {
            handle: JobQueueHandle {
                inner: Arc::new(Inner {
                    subqueues: HashMap::new(),
                    next_id: AtomicU64::new(1),
                    completed_tx,
                    cancelled_tx,
                    store,
                }),
            },
            worker_tasks: Vec::new(),
        }
    }

    pub fn handle(&self) -> JobQueueHandle<S> {
        self.handle.clone()
    }

    /// Registers `kind` with `max_parallelism` concurrent workers. Must be
    /// called before [`start`](Self::start); sub-queues cannot be added to a
    /// running queue.
    pub fn register(
        &mut self,
        kind: &'static str,
        max_parallelism: usize,
        worker: Arc<dyn Worker<S>>,
    ) {
        let subqueue = Arc::new(SubQueue::new(max_parallelism, worker));
        Arc::get_mut(&mut self.handle.inner)
            .expect("register() must run before start()")
            .subqueues
            .insert(kind, subqueue);
    }

    /// Reloads every persisted job row for each registered sub-queue, then
    /// spawns `max_parallelism` dispatch tasks per sub-queue. A restart picks
    /// up exactly where the store left off instead of losing outstanding
    /// work.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        for (&kind, subqueue) in &self.handle.inner.subqueues {
            let rows = self.handle.inner.store.list_jobs(kind).await?;
            let restored = rows.len();
            for record in rows {
                subqueue.push(record).await;
            }
            if restored > 0 {
                log::info!("restored {restored} persisted job(s) into sub-queue {kind}");
            }
        }
        for (&kind, subqueue) in &self.handle.inner.subqueues {
            for _ in 0..subqueue.max_parallelism() {
                let subqueue = subqueue.clone();
                let handle = self.handle.clone();
                self.worker_tasks.push(tokio::spawn(async move {
                    subqueue.run_one(kind, handle).await;
                }));
            }
        }
        Ok(())
    }

    pub async fn shutdown(self) {
        for (_, subqueue) in &self.handle.inner.subqueues {
            subqueue.stop();
        }
        for task in self.worker_tasks {
            let _ = task.await;
        }
    }
}

impl<S: Store + 'static> JobQueueHandle<S> {
    pub(crate) fn emit_completed(&self, record: JobRecord) {
        let _ = self.inner.completed_tx.send(record);
    }

    pub(crate) fn emit_cancelled(&self, record: JobRecord) {
        let _ = self.inner.cancelled_tx.send(record);
    }

    /// Persists an updated `scheduled_at`/`attempts_remaining` after a retry
    /// or snooze. Best-effort: a failure is logged, not propagated, since the
    /// in-memory heap remains the source of truth for an already-dispatched
    /// job and the row will be corrected the next time this job reschedules
    /// or completes.
    pub(crate) async fn persist_reschedule(&self, queue_name: &str, record: &JobRecord) {
        if let Err(err) = self.inner.store.put_job(queue_name, record).await {
            log::error!(
                "failed to persist rescheduled job {} on {queue_name}: {err:#}",
                record.id
            );
        }
    }

    /// Removes a job's persisted row once it reaches a terminal outcome.
    pub(crate) async fn forget(&self, queue_name: &str, id: u64) {
        if let Err(err) = self.inner.store.delete_job(queue_name, id).await {
            log::error!("failed to delete persisted job {id} on {queue_name}: {err:#}");
        }
    }
}
