//! Scheduling strategy: the capability set `{Enqueue, Schedule, PostSubmit,
//! ReservationDepth}` a strategy exposes to the rest of the engine. Modeled as
//! a plain enum rather than a trait object, since the only variant shipped
//! today is `EasyBackfill` and a future `FCFS` only needs a new match arm.

use crate::error::InvariantError;
use crate::group::{job_args_for, GroupAssembler};
use crate::queue::{JobPayload, JobQueueHandle, JobRecord, MAX_ATTEMPTS};
use crate::store::Store;
use fluxnetes_types::{PodSubmission, ReadyGroup};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// First-come-first-served by group creation time, earliest first; smaller
    /// groups fill gaps implicitly because the matcher — not this layer —
    /// decides placement.
    EasyBackfill,
}

/// `-1` disables reservations, `0` is unlimited depth, `n > 0` caps retained
/// future reservations. `< -1` is invalid.
#[derive(Debug, Clone, Copy)]
pub struct ReservationDepth(i32);

impl ReservationDepth {
    pub fn new(depth: i32) -> Result<Self, InvariantError> {
        if depth < -1 {
            return Err(InvariantError::InvalidReservationDepth(depth));
        }
        Ok(Self(depth))
    }

    pub fn get(&self) -> i32 {
        self.0
    }

    pub fn allows_reservation(&self) -> bool {
        self.0 != -1
    }
}

pub struct Strategy<S: Store> {
    kind: StrategyKind,
    reservation_depth: ReservationDepth,
    assembler: Arc<GroupAssembler<S>>,
}

impl<S: Store> Strategy<S> {
    pub fn new(
        kind: StrategyKind,
        reservation_depth: i32,
        assembler: Arc<GroupAssembler<S>>,
    ) -> Result<Self, InvariantError> {
        Ok(Self {
            kind,
            reservation_depth: ReservationDepth::new(reservation_depth)?,
            assembler,
        })
    }

    pub fn reservation_depth(&self) -> i32 {
        self.reservation_depth.get()
    }

    pub fn allow_reservation(&self) -> bool {
        self.reservation_depth.allows_reservation()
    }

    /// Delegates to the Group Assembler. `EasyBackfill` applies no further
    /// transform today; the seam exists for a future priority-aware strategy.
    pub async fn enqueue(
        &self,
        pod: &PodSubmission,
    ) -> anyhow::Result<fluxnetes_types::EnqueueStatus> {
        self.assembler.enqueue(pod).await
    }

    /// Reads ready groups and orders them per strategy. Read-only; promotion
    /// happens in [`schedule_and_enqueue`](Self::schedule_and_enqueue), which
    /// needs a [`JobQueueHandle`] to mint job ids.
    pub async fn schedule(&self) -> anyhow::Result<Vec<ReadyGroup>> {
        let mut ready = self.assembler.ready_groups().await?;
        match self.kind {
            StrategyKind::EasyBackfill => ready.sort_by_key(|g| g.created_at),
        }
        Ok(ready)
    }

    /// Runs `schedule`, then promotes and enqueues each ready group in turn.
    /// A group's promotion and the persistence of its first queued job share
    /// one store transaction, so a crash mid-batch never leaves a group
    /// pending with no corresponding job, or vice versa; only groups before
    /// the crash point are promoted, and the rest stay provisional for the
    /// next scheduling pass.
    pub async fn schedule_and_enqueue(&self, queue: &JobQueueHandle<S>) -> anyhow::Result<Vec<u64>> {
        let ready = self.schedule().await?;
        let now = chrono::Utc::now();
        let mut ids = Vec::with_capacity(ready.len());
        for group in &ready {
            let id = queue.next_id();
            let record = JobRecord {
                id,
                payload: JobPayload::Job(job_args_for(group)),
                scheduled_at: now,
                attempts_remaining: MAX_ATTEMPTS,
                tags: vec![group.group_name.clone()],
            };
            self.assembler
                .promote_and_enqueue(group, "default", &record)
                .await?;
            queue.enqueue_local("default", record).await?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// A no-op for `EasyBackfill` today: nothing here is on a timer. A
    /// group's reservations are pruned only at the point a later allocation
    /// supersedes them, in `AllocationWorker::run`, not by this hook.
    pub async fn post_submit(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use fluxnetes_types::{PendingGroup, PodOwner, ProvisionalGroup, ProvisionalPod};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn reservation_depth_rejects_less_than_minus_one() {
        assert!(ReservationDepth::new(-1).is_ok());
        assert!(ReservationDepth::new(0).is_ok());
        assert!(ReservationDepth::new(5).is_ok());
        assert!(matches!(
            ReservationDepth::new(-2),
            Err(InvariantError::InvalidReservationDepth(-2))
        ));
    }

    #[test]
    fn reservation_depth_minus_one_disables_reservation() {
        assert!(!ReservationDepth::new(-1).unwrap().allows_reservation());
        assert!(ReservationDepth::new(0).unwrap().allows_reservation());
    }

    #[derive(Default)]
    struct MemStore {
        pods: Mutex<Vec<ProvisionalPod>>,
        groups: Mutex<HashMap<(String, String), ProvisionalGroup>>,
        pending: Mutex<HashMap<(String, String), PendingGroup>>,
        jobs: Mutex<HashMap<(String, u64), JobRecord>>,
    }

    #[async_trait]
    impl Store for MemStore {
        async fn enqueue_provisional(
            &self,
            pod: &ProvisionalPod,
            group_size: u32,
            owner: Option<&PodOwner>,
        ) -> anyhow::Result<crate::store::ProvisionalEnqueueOutcome> {
            use crate::store::ProvisionalEnqueueOutcome;
            let key = (pod.group_name.clone(), pod.namespace.clone());
            if self.pending.lock().unwrap().contains_key(&key) {
                return Ok(ProvisionalEnqueueOutcome::GroupAlreadyPending);
            }
            {
                let mut pods = self.pods.lock().unwrap();
                if pods.iter().any(|p| {
                    p.group_name == pod.group_name
                        && p.namespace == pod.namespace
                        && p.name == pod.name
                }) {
                    return Ok(ProvisionalEnqueueOutcome::AlreadyPresent);
                }
                pods.push(pod.clone());
            }
            let mut groups = self.groups.lock().unwrap();
            let entry = groups.entry(key).or_insert_with(|| ProvisionalGroup {
                group_name: pod.group_name.clone(),
                namespace: pod.namespace.clone(),
                group_size,
                current_size: 0,
                duration_seconds: pod.duration_seconds,
                podspec: pod.podspec.clone(),
                owner: owner.cloned(),
                created_at: chrono::Utc::now(),
            });
            entry.current_size += 1;
            Ok(ProvisionalEnqueueOutcome::Inserted(entry.clone()))
        }

        async fn ready_provisional_groups(&self) -> anyhow::Result<Vec<ProvisionalGroup>> {
            Ok(self
                .groups
                .lock()
                .unwrap()
                .values()
                .filter(|g| g.current_size >= g.group_size)
                .cloned()
                .collect())
        }

        async fn provisional_pod_names(
            &self,
            group_name: &str,
            namespace: &str,
        ) -> anyhow::Result<Vec<String>> {
            Ok(self
                .pods
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.group_name == group_name && p.namespace == namespace)
                .map(|p| p.name.clone())
                .collect())
        }

        async fn promote_and_enqueue(
            &self,
            group_name: &str,
            namespace: &str,
            group_size: u32,
            queue_name: &str,
            job: &JobRecord,
        ) -> anyhow::Result<()> {
            let key = (group_name.to_string(), namespace.to_string());
            if self.pending.lock().unwrap().contains_key(&key) {
                anyhow::bail!("group {group_name}/{namespace} was already pending");
            }
            self.groups.lock().unwrap().remove(&key);
            self.pods
                .lock()
                .unwrap()
                .retain(|p| !(p.group_name == group_name && p.namespace == namespace));
            self.pending.lock().unwrap().insert(
                key,
                PendingGroup {
                    group_name: group_name.to_string(),
                    namespace: namespace.to_string(),
                    group_size,
                },
            );
            self.jobs
                .lock()
                .unwrap()
                .insert((queue_name.to_string(), job.id), job.clone());
            Ok(())
        }

        async fn delete_pending(&self, group_name: &str, namespace: &str) -> anyhow::Result<()> {
            self.pending
                .lock()
                .unwrap()
                .remove(&(group_name.to_string(), namespace.to_string()));
            Ok(())
        }

        async fn insert_reservation(
            &self,
            _reservation: &fluxnetes_types::Reservation,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn list_reservations(&self) -> anyhow::Result<Vec<fluxnetes_types::Reservation>> {
            Ok(Vec::new())
        }

        async fn delete_reservations(&self, _group_name: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn put_job(&self, queue_name: &str, record: &JobRecord) -> anyhow::Result<()> {
            self.jobs
                .lock()
                .unwrap()
                .insert((queue_name.to_string(), record.id), record.clone());
            Ok(())
        }

        async fn delete_job(&self, queue_name: &str, id: u64) -> anyhow::Result<()> {
            self.jobs
                .lock()
                .unwrap()
                .remove(&(queue_name.to_string(), id));
            Ok(())
        }

        async fn list_jobs(&self, queue_name: &str) -> anyhow::Result<Vec<JobRecord>> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .filter(|((q, _), _)| q == queue_name)
                .map(|(_, r)| r.clone())
                .collect())
        }
    }

    fn pod(ns: &str, name: &str, group: &str, size: u32, created_at: chrono::DateTime<Utc>) -> PodSubmission {
        let mut labels = HashMap::new();
        labels.insert(fluxnetes_types::labels::POD_GROUP_LABEL.to_string(), group.to_string());
        labels.insert(
            fluxnetes_types::labels::POD_GROUP_SIZE_LABEL.to_string(),
            size.to_string(),
        );
        PodSubmission {
            namespace: ns.to_string(),
            name: name.to_string(),
            labels,
            priority: 0,
            created_at,
            podspec: "spec".to_string(),
            owner: None,
        }
    }

    #[tokio::test]
    async fn schedule_orders_ready_groups_oldest_first() {
        let assembler = Arc::new(GroupAssembler::new(Arc::new(MemStore::default())));
        let strategy = Strategy::new(StrategyKind::EasyBackfill, 0, assembler).unwrap();

        let now = chrono::Utc::now();
        strategy
            .enqueue(&pod("x", "newer", "NEW", 1, now))
            .await
            .unwrap();
        strategy
            .enqueue(&pod("x", "older", "OLD", 1, now - chrono::Duration::seconds(60)))
            .await
            .unwrap();

        let ready = strategy.schedule().await.unwrap();
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].group_name, "OLD");
        assert_eq!(ready[1].group_name, "NEW");
    }
}
