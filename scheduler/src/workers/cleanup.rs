//! Cleanup Worker, `kind = "cleanup"`. Grounded on
//! `fluxnetes/strategy/workers/cleanup.go`'s delete-then-cancel-then-unpend
//! sequence.

use crate::matcher::{cancel_is_success, MatcherClient};
use crate::queue::{JobPayload, JobQueueHandle, JobRecord, WorkOutcome, Worker};
use crate::store::Store;
use async_trait::async_trait;
use fluxnetes_types::{CleanupArgs, OwnerKind, PodOwner};
use std::sync::Arc;

/// Orchestrator-side deletion, the external collaborator cleanup depends on
/// beyond the core's own state. A production binary backs this with a real
/// cluster client; tests use [`NullOrchestratorClient`].
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    /// Deletes the pod itself, foreground propagation. Must treat "already
    /// gone" as success.
    async fn delete_pod(&self, namespace: &str, pod_name: &str) -> anyhow::Result<()>;

    /// Deletes the recognized owning workload, background propagation. Must
    /// treat "already gone" as success.
    async fn delete_owner(&self, namespace: &str, owner: &PodOwner) -> anyhow::Result<()>;
}

/// Logs and succeeds; used where no real orchestrator is wired up (unit tests,
/// or a deployment that only wants matcher-side cancellation).
pub struct NullOrchestratorClient;

#[async_trait]
impl OrchestratorClient for NullOrchestratorClient {
    async fn delete_pod(&self, namespace: &str, pod_name: &str) -> anyhow::Result<()> {
        log::info!("would delete pod {namespace}/{pod_name} (foreground)");
        Ok(())
    }

    async fn delete_owner(&self, namespace: &str, owner: &PodOwner) -> anyhow::Result<()> {
        log::info!(
            "would delete {:?} {namespace}/{} (background)",
            owner.kind,
            owner.name
        );
        Ok(())
    }
}

pub struct CleanupWorker<S: Store> {
    store: Arc<S>,
    matcher: MatcherClient,
    orchestrator: Arc<dyn OrchestratorClient>,
}

impl<S: Store> CleanupWorker<S> {
    pub fn new(
        store: Arc<S>,
        matcher: MatcherClient,
        orchestrator: Arc<dyn OrchestratorClient>,
    ) -> Self {
        Self {
            store,
            matcher,
            orchestrator,
        }
    }
}

#[async_trait]
impl<S: Store + 'static> Worker<S> for CleanupWorker<S> {
    async fn handle(&self, _queue: &JobQueueHandle<S>, record: &mut JobRecord) -> WorkOutcome {
        let args = match &record.payload {
            JobPayload::Cleanup(args) => args.clone(),
            JobPayload::Job(_) => {
                log::error!("cleanup worker received a job-kind record ({})", record.id);
                return WorkOutcome::Cancelled;
            }
        };

        match self.run(&args).await {
            Ok(()) => WorkOutcome::Completed,
            Err(err) => {
                log::warn!("cleanup attempt failed for group {}: {err:#}", args.group_name);
                WorkOutcome::Retry
            }
        }
    }
}

impl<S: Store> CleanupWorker<S> {
    async fn run(&self, args: &CleanupArgs) -> anyhow::Result<()> {
        // Step 1: orchestrator-side deletion.
        if args.delete_orchestrator_object {
            match &args.owner {
                None => {
                    for pod_name in &args.pod_names {
                        self.orchestrator.delete_pod(&args.namespace, pod_name).await?;
                    }
                }
                Some(owner) if owner.kind == OwnerKind::Job => {
                    self.orchestrator
                        .delete_owner(&args.namespace, owner)
                        .await?;
                }
                Some(owner) => {
                    log::warn!(
                        "cleanup for {} has unrecognized owner kind {:?}; deleting pods directly",
                        args.group_name,
                        owner.kind
                    );
                    for pod_name in &args.pod_names {
                        self.orchestrator.delete_pod(&args.namespace, pod_name).await?;
                    }
                }
            }
        }

        // Step 2: matcher-side cancellation. Not-found is success (idempotent).
        if let Some(flux_id) = args.flux_id {
            let response = self.matcher.cancel(flux_id).await?;
            if !cancel_is_success(&response) {
                anyhow::bail!(
                    "cancel({flux_id}) for group {} returned error {}",
                    args.group_name,
                    response.error
                );
            }
            self.store.delete_reservations(&args.group_name).await?;
        }

        // Step 3: only this unblocks a later resubmission of the same group name.
        self.store
            .delete_pending(&args.group_name, &args.namespace)
            .await?;

        Ok(())
    }
}
