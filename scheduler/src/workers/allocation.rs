//! Allocation Worker, `kind = "job"`. Grounded on
//! `fluxnetes/strategy/workers/workers.go`'s allocate-then-schedule-cleanup flow,
//! the matcher call itself on `sig-scheduler-plugins/pkg/fluence/fluence.go`.

use crate::matcher::proto::MatchRequest;
use crate::matcher::MatcherClient;
use crate::queue::{JobPayload, JobQueueHandle, JobRecord, Worker, WorkOutcome};
use crate::store::Store;
use async_trait::async_trait;
use fluxnetes_types::{CleanupArgs, JobArgs, Reservation};
use std::sync::Arc;

pub struct AllocationWorker<S: Store> {
    store: Arc<S>,
    matcher: MatcherClient,
    /// Whether the matcher is allowed to return a reservation instead of
    /// failing outright. Derived once from
    /// `Strategy::reservation_depth() != -1` at wiring time.
    allow_reservation: bool,
}

impl<S: Store> AllocationWorker<S> {
    pub fn new(store: Arc<S>, matcher: MatcherClient, allow_reservation: bool) -> Self {
        Self {
            store,
            matcher,
            allow_reservation,
        }
    }
}

#[async_trait]
impl<S: Store + 'static> Worker<S> for AllocationWorker<S> {
    async fn handle(&self, queue: &JobQueueHandle<S>, record: &mut JobRecord) -> WorkOutcome {
        let args = match &mut record.payload {
            JobPayload::Job(args) => args,
            JobPayload::Cleanup(_) => {
                log::error!("allocation worker received a cleanup job ({})", record.id);
                return WorkOutcome::Cancelled;
            }
        };

        match self.run(queue, args).await {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!(
                    "allocation attempt failed for group {}: {err:#}",
                    args.group_name
                );
                WorkOutcome::Retry
            }
        }
    }
}

impl<S: Store + 'static> AllocationWorker<S> {
    async fn run(&self, queue: &JobQueueHandle<S>, args: &mut JobArgs) -> anyhow::Result<WorkOutcome> {
        let request = MatchRequest {
            podspec: args.podspec.clone(),
            reserve: self.allow_reservation,
            count: args.group_size as i32,
            job_name: args.group_name.clone(),
        };

        let response = self.matcher.match_group(request).await?;

        if response.allocated {
            if response.nodelist.len() != args.pod_names.len() {
                anyhow::bail!(
                    "matcher returned {} nodes for {} pods",
                    response.nodelist.len(),
                    args.pod_names.len()
                );
            }
            let node_ids: Vec<&str> = response.nodelist.iter().map(|n| n.node_id.as_str()).collect();
            args.nodes = Some(node_ids.join(","));

            // A prior attempt may have recorded a reservation for this group; a
            // successful allocation supersedes it. Reservations are GC'd via
            // supersession, not their own timer.
            self.store.delete_reservations(&args.group_name).await?;

            let cleanup = CleanupArgs {
                group_name: args.group_name.clone(),
                namespace: args.namespace.clone(),
                flux_id: Some(response.reservation_id),
                podspec: Some(args.podspec.clone()),
                pod_names: args.pod_names.clone(),
                owner: args.owner.clone(),
                delete_orchestrator_object: true,
            };
            let deferred_at =
                chrono::Utc::now() + chrono::Duration::seconds(args.duration_seconds as i64);
            queue
                .insert_scheduled(
                    "cancel_queue",
                    JobPayload::Cleanup(cleanup),
                    deferred_at,
                    vec![args.group_name.clone()],
                )
                .await?;

            return Ok(WorkOutcome::Completed);
        }

        if response.reservation_id > 0 {
            self.store
                .insert_reservation(&Reservation {
                    group_name: args.group_name.clone(),
                    flux_id: response.reservation_id,
                })
                .await?;
        }

        // Neither allocated nor (successfully) reserved: retry. A reservation
        // does not change the retry outcome.
        Ok(WorkOutcome::Retry)
    }
}
