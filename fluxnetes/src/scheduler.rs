//! Process-wide engine: one long-lived value owning the store, the job
//! queue, and the plugin façade, with an explicit `try_new`/`run` split
//! mirroring `Scheduler::try_new`/`run` elsewhere in this codebase.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fluxnetes_types::{EnqueueStatus, PodSubmission};
use log::{debug, error, info};
use scheduler::facade::PluginFacade;
use scheduler::group::GroupAssembler;
use scheduler::matcher::MatcherClient;
use scheduler::queue::{JobQueue, JobQueueHandle};
use scheduler::store::EtcdStore;
use scheduler::strategy::{Strategy, StrategyKind};
use scheduler::workers::cleanup::NullOrchestratorClient;
use scheduler::workers::{AllocationWorker, CleanupWorker};

use crate::config::Config;

/// A scheduling pass runs this often; the cadence itself is an engine detail,
/// not something the strategy dictates.
const SCHEDULE_INTERVAL: Duration = Duration::from_millis(500);

const DEFAULT_QUEUE_PARALLELISM: usize = 10;

pub struct Engine {
    strategy: Arc<Strategy<EtcdStore>>,
    queue_handle: JobQueueHandle<EtcdStore>,
    facade: Arc<PluginFacade>,
    job_queue: Option<JobQueue<EtcdStore>>,
}

impl Engine {
    pub async fn try_new(config: &Config) -> Result<Self> {
        let endpoints: Vec<&str> = config.store_endpoints.iter().map(String::as_str).collect();
        let store = Arc::new(
            EtcdStore::connect(&endpoints)
                .await
                .context("failed to connect to the store")?,
        );

        let matcher_config = config.matcher.to_matcher_config();
        let matcher = MatcherClient::connect(&matcher_config)
            .await
            .context("failed to connect to the matcher")?;

        let assembler = Arc::new(GroupAssembler::new(store.clone()));
        let strategy = Arc::new(
            Strategy::new(StrategyKind::EasyBackfill, config.reservation_depth, assembler)
                .context("invalid reservation depth")?,
        );

        let mut job_queue = JobQueue::new(store.clone());
        job_queue.register(
            "default",
            DEFAULT_QUEUE_PARALLELISM,
            Arc::new(AllocationWorker::new(
                store.clone(),
                matcher.clone(),
                strategy.allow_reservation(),
            )),
        );
        job_queue.register(
            "cancel_queue",
            DEFAULT_QUEUE_PARALLELISM,
            Arc::new(CleanupWorker::new(
                store.clone(),
                matcher,
                Arc::new(NullOrchestratorClient),
            )),
        );

        let queue_handle = job_queue.handle();
        let facade = Arc::new(PluginFacade::new());

        Ok(Self {
            strategy,
            queue_handle,
            facade,
            job_queue: Some(job_queue),
        })
    }

    pub fn facade(&self) -> Arc<PluginFacade> {
        self.facade.clone()
    }

    pub fn queue_handle(&self) -> JobQueueHandle<EtcdStore> {
        self.queue_handle.clone()
    }

    /// Admits a pod submission via the strategy's enqueue path.
    pub async fn enqueue(&self, pod: &PodSubmission) -> Result<EnqueueStatus> {
        self.strategy.enqueue(pod).await
    }

    /// In-place pod updates carry no group-membership change; logged and
    /// otherwise ignored, matching the original informer's logging-only
    /// handling of update events for pods already admitted or still pending.
    pub fn on_pod_update(&self, namespace: &str, name: &str) {
        debug!("pod update observed for {namespace}/{name}; no-op");
    }

    /// A pod deleted before its group completes allocation isn't reconciled
    /// against provisional/pending state here; logged and otherwise ignored.
    /// Cleanup for an allocated group's pods still runs through the Cleanup
    /// Worker on its own schedule.
    pub fn on_pod_delete(&self, namespace: &str, name: &str) {
        debug!("pod delete observed for {namespace}/{name}; no-op");
    }

    /// Starts the job queue's workers and the periodic scheduling pass.
    /// Returns immediately after spawning background tasks, once the
    /// queue has reloaded any jobs a previous run left persisted.
    pub async fn run(&mut self) -> Result<()> {
        self.job_queue
            .as_mut()
            .expect("run() called twice")
            .start()
            .await
            .context("failed to start the job queue")?;

        self.facade.spawn_reconciler(&self.queue_handle);

        let strategy = self.strategy.clone();
        let queue_handle = self.queue_handle.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SCHEDULE_INTERVAL);
            loop {
                ticker.tick().await;
                match strategy.schedule_and_enqueue(&queue_handle).await {
                    Ok(ids) if !ids.is_empty() => {
                        debug!("scheduled {} group(s) for allocation", ids.len());
                    }
                    Ok(_) => {}
                    Err(err) => error!("scheduling pass failed: {err:#}"),
                }
                if let Err(err) = strategy.post_submit().await {
                    error!("post-submit hook failed: {err:#}");
                }
            }
        });

        info!("fluxnetes engine running");
        Ok(())
    }

    /// Stops the job queue, waiting for in-flight workers to finish.
    pub async fn shutdown(&mut self) {
        if let Some(job_queue) = self.job_queue.take() {
            job_queue.shutdown().await;
        }
    }
}
