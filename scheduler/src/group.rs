//! Group Assembler. Grounded on `fluxnetes/group/group.go`'s
//! `Enqueue`/`ReadyGroups`/`Promote` trio, adapted to the [`Store`] trait
//! instead of a raw SQL pool.

use crate::queue::JobRecord;
use crate::store::{ProvisionalEnqueueOutcome, Store};
use fluxnetes_types::{
    labels, EnqueueStatus, JobArgs, PodSubmission, ProvisionalPod, ReadyGroup,
};
use std::sync::Arc;

/// Stateless; all state lives in the [`Store`]. One instance is shared across
/// every ingress callback, since multiple orchestrator informer callbacks may
/// invoke `enqueue` concurrently.
pub struct GroupAssembler<S: Store> {
    store: Arc<S>,
}

impl<S: Store> GroupAssembler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Label parsing happens before any store access so a malformed
    /// submission never touches provisional state.
    pub async fn enqueue(&self, pod: &PodSubmission) -> anyhow::Result<EnqueueStatus> {
        let group_name = pod.group_name();
        let size = match pod.group_size() {
            Ok(s) => s,
            Err(_) => return Ok(EnqueueStatus::PodInvalid),
        };
        let duration = match pod.duration_seconds() {
            Ok(d) => d,
            Err(_) => return Ok(EnqueueStatus::PodInvalid),
        };

        let row = ProvisionalPod {
            group_name: group_name.clone(),
            namespace: pod.namespace.clone(),
            name: pod.name.clone(),
            podspec: pod.podspec.clone(),
            duration_seconds: duration,
            created_at: pod.created_at,
        };

        // Checking pending, inserting the pod, and upserting the group all
        // happen in one store-level transaction, so a concurrent promotion
        // of the same group can never interleave with this call.
        match self
            .store
            .enqueue_provisional(&row, size, pod.owner.as_ref())
            .await?
        {
            ProvisionalEnqueueOutcome::GroupAlreadyPending => {
                Ok(EnqueueStatus::GroupAlreadyInPending)
            }
            ProvisionalEnqueueOutcome::AlreadyPresent | ProvisionalEnqueueOutcome::Inserted(_) => {
                Ok(EnqueueStatus::PodEnqueueSuccess)
            }
        }
    }

    /// Every group whose members have reached `group_size`. Read-only.
    pub async fn ready_groups(&self) -> anyhow::Result<Vec<ReadyGroup>> {
        let groups = self.store.ready_provisional_groups().await?;
        let mut ready = Vec::with_capacity(groups.len());
        for group in groups {
            let pod_names = self
                .store
                .provisional_pod_names(&group.group_name, &group.namespace)
                .await?;
            ready.push(ReadyGroup {
                group_name: group.group_name,
                namespace: group.namespace,
                group_size: group.group_size,
                duration_seconds: group.duration_seconds,
                podspec: group.podspec,
                owner: group.owner,
                pod_names,
                created_at: group.created_at,
            });
        }
        Ok(ready)
    }

    /// Moves a ready group from provisional to pending and persists `job` as
    /// its first queued row, in one store-level transaction. The caller
    /// (the strategy) builds `job` via [`job_args_for`] and a
    /// [`JobQueueHandle`](crate::queue::JobQueueHandle), since only it knows
    /// the next job id and the sub-queue the group's job belongs on.
    pub async fn promote_and_enqueue(
        &self,
        ready: &ReadyGroup,
        queue_name: &str,
        job: &JobRecord,
    ) -> anyhow::Result<()> {
        self.store
            .promote_and_enqueue(
                &ready.group_name,
                &ready.namespace,
                ready.group_size,
                queue_name,
                job,
            )
            .await
    }
}

/// Builds the [`JobArgs`] a ready group's promotion job should carry.
pub fn job_args_for(ready: &ReadyGroup) -> JobArgs {
    JobArgs {
        group_name: ready.group_name.clone(),
        namespace: ready.namespace.clone(),
        group_size: ready.group_size,
        duration_seconds: ready.duration_seconds,
        podspec: ready.podspec.clone(),
        pod_names: ready.pod_names.clone(),
        nodes: None,
        owner: ready.owner.clone(),
    }
}

/// Re-exported so callers constructing a [`PodSubmission`] don't need a
/// separate import just to read the label defaults.
pub use labels::{DEFAULT_DURATION_SECONDS, DEFAULT_GROUP_SIZE};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobPayload, MAX_ATTEMPTS};
    use crate::store::Store;
    use async_trait::async_trait;
    use fluxnetes_types::{PendingGroup, PodOwner, ProvisionalGroup, Reservation};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemStore {
        pods: Mutex<Vec<ProvisionalPod>>,
        groups: Mutex<HashMap<(String, String), ProvisionalGroup>>,
        pending: Mutex<HashMap<(String, String), PendingGroup>>,
        reservations: Mutex<Vec<Reservation>>,
        jobs: Mutex<HashMap<(String, u64), JobRecord>>,
    }

    #[async_trait]
    impl Store for MemStore {
        async fn enqueue_provisional(
            &self,
            pod: &ProvisionalPod,
            group_size: u32,
            owner: Option<&PodOwner>,
        ) -> anyhow::Result<ProvisionalEnqueueOutcome> {
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

        async fn insert_reservation(&self, reservation: &Reservation) -> anyhow::Result<()> {
            self.reservations.lock().unwrap().push(reservation.clone());
            Ok(())
        }

        async fn list_reservations(&self) -> anyhow::Result<Vec<Reservation>> {
            Ok(self.reservations.lock().unwrap().clone())
        }

        async fn delete_reservations(&self, group_name: &str) -> anyhow::Result<()> {
            self.reservations
                .lock()
                .unwrap()
                .retain(|r| r.group_name != group_name);
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

    fn pod(ns: &str, name: &str, group: &str, size: u32) -> PodSubmission {
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
            created_at: chrono::Utc::now(),
            podspec: "spec".to_string(),
            owner: None,
        }
    }

    #[tokio::test]
    async fn single_pod_group_becomes_ready_immediately() {
        let assembler = GroupAssembler::new(Arc::new(MemStore::default()));
        let status = assembler.enqueue(&pod("x", "p1", "A", 1)).await.unwrap();
        assert_eq!(status, EnqueueStatus::PodEnqueueSuccess);
        let ready = assembler.ready_groups().await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].pod_names, vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn three_pod_group_ready_only_after_third() {
        let assembler = GroupAssembler::new(Arc::new(MemStore::default()));
        assembler.enqueue(&pod("x", "p1", "B", 3)).await.unwrap();
        assembler.enqueue(&pod("x", "p2", "B", 3)).await.unwrap();
        assert!(assembler.ready_groups().await.unwrap().is_empty());
        assembler.enqueue(&pod("x", "p3", "B", 3)).await.unwrap();
        let ready = assembler.ready_groups().await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].pod_names.len(), 3);
    }

    #[tokio::test]
    async fn pending_group_rejects_new_pod() {
        let assembler = GroupAssembler::new(Arc::new(MemStore::default()));
        assembler.enqueue(&pod("x", "p1", "C", 1)).await.unwrap();
        let ready = assembler.ready_groups().await.unwrap();
        let job = JobRecord {
            id: 1,
            payload: JobPayload::Job(job_args_for(&ready[0])),
            scheduled_at: chrono::Utc::now(),
            attempts_remaining: MAX_ATTEMPTS,
            tags: Vec::new(),
        };
        assembler
            .promote_and_enqueue(&ready[0], "default", &job)
            .await
            .unwrap();

        let status = assembler.enqueue(&pod("x", "p2", "C", 1)).await.unwrap();
        assert_eq!(status, EnqueueStatus::GroupAlreadyInPending);
    }

    #[tokio::test]
    async fn reingest_of_same_pod_is_idempotent() {
        let assembler = GroupAssembler::new(Arc::new(MemStore::default()));
        let p = pod("x", "p1", "D", 2);
        assembler.enqueue(&p).await.unwrap();
        assembler.enqueue(&p).await.unwrap();
        let groups = assembler.store.ready_provisional_groups().await.unwrap();
        assert!(groups.is_empty());
        let names = assembler
            .store
            .provisional_pod_names("D", "x")
            .await
            .unwrap();
        assert_eq!(names.len(), 1);
    }
}
