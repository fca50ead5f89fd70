//! etcd-backed [`super::Store`]. Grounded on `libscheduler::with_xline`'s
//! `/registry/{pods,nodes}/` key layout, generalized to the group-admission
//! tables this module adds for group-admission state.

use super::ProvisionalEnqueueOutcome;
use crate::queue::JobRecord;
use async_trait::async_trait;
use chrono::Utc;
use etcd_client::{Client, Compare, CompareOp, DeleteOptions, GetOptions, PutOptions, Txn, TxnOp};
use fluxnetes_types::{PodOwner, ProvisionalGroup, ProvisionalPod, Reservation};
use std::sync::Arc;
use tokio::sync::RwLock;

const MAX_CAS_ATTEMPTS: usize = 10;

fn pod_key(group_name: &str, namespace: &str, name: &str) -> String {
    format!("/fluxnetes/pods_provisional/{group_name}/{namespace}/{name}")
}

fn pod_prefix(group_name: &str, namespace: &str) -> String {
    format!("/fluxnetes/pods_provisional/{group_name}/{namespace}/")
}

fn group_key(group_name: &str, namespace: &str) -> String {
    format!("/fluxnetes/groups_provisional/{group_name}/{namespace}")
}

const GROUP_PREFIX: &str = "/fluxnetes/groups_provisional/";

fn pending_key(group_name: &str, namespace: &str) -> String {
    format!("/fluxnetes/pending/{group_name}/{namespace}")
}

fn reservation_key(group_name: &str, flux_id: u64) -> String {
    format!("/fluxnetes/reservations/{group_name}/{flux_id}")
}

fn reservation_prefix(group_name: &str) -> String {
    format!("/fluxnetes/reservations/{group_name}/")
}

const RESERVATIONS_PREFIX: &str = "/fluxnetes/reservations/";

fn job_key(queue_name: &str, id: u64) -> String {
    format!("/fluxnetes/jobs/{queue_name}/{id}")
}

fn job_prefix(queue_name: &str) -> String {
    format!("/fluxnetes/jobs/{queue_name}/")
}

/// etcd key-value store, like `libscheduler::with_xline::XlineStore`: a single
/// connection guarded by an `RwLock` since `etcd_client::Client` requires `&mut
/// self` for requests.
#[derive(Clone)]
pub struct EtcdStore {
    client: Arc<RwLock<Client>>,
}

impl EtcdStore {
    pub async fn connect(endpoints: &[&str]) -> anyhow::Result<Self> {
        let client = Client::connect(endpoints, None).await?;
        Ok(Self {
            client: Arc::new(RwLock::new(client)),
        })
    }
}

#[async_trait]
impl super::Store for EtcdStore {
    async fn enqueue_provisional(
        &self,
        pod: &ProvisionalPod,
        group_size: u32,
        owner: Option<&PodOwner>,
    ) -> anyhow::Result<ProvisionalEnqueueOutcome> {
        let pending_k = pending_key(&pod.group_name, &pod.namespace);
        let pod_k = pod_key(&pod.group_name, &pod.namespace, &pod.name);
        let group_k = group_key(&pod.group_name, &pod.namespace);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut client = self.client.write().await;

            let pending_resp = client.get(pending_k.clone(), None).await?;
            if !pending_resp.kvs().is_empty() {
                return Ok(ProvisionalEnqueueOutcome::GroupAlreadyPending);
            }

            let pod_resp = client.get(pod_k.clone(), None).await?;
            if !pod_resp.kvs().is_empty() {
                return Ok(ProvisionalEnqueueOutcome::AlreadyPresent);
            }

            let group_resp = client.get(group_k.clone(), None).await?;
            let (group_version, next_group) = match group_resp.kvs().first() {
                None => (
                    0,
                    ProvisionalGroup {
                        group_name: pod.group_name.clone(),
                        namespace: pod.namespace.clone(),
                        group_size,
                        current_size: 1,
                        duration_seconds: pod.duration_seconds,
                        podspec: pod.podspec.clone(),
                        owner: owner.cloned(),
                        created_at: Utc::now(),
                    },
                ),
                Some(kv) => {
                    let mut group: ProvisionalGroup = serde_yaml::from_slice(kv.value())?;
                    group.current_size += 1;
                    (kv.version(), group)
                }
            };

            let pod_value = serde_yaml::to_string(pod)?;
            let group_value = serde_yaml::to_string(&next_group)?;

            let txn = Txn::new()
                .when([
                    Compare::version(pending_k.clone(), CompareOp::Equal, 0),
                    Compare::version(pod_k.clone(), CompareOp::Equal, 0),
                    Compare::version(group_k.clone(), CompareOp::Equal, group_version),
                ])
                .and_then([
                    TxnOp::put(pod_k.clone(), pod_value, None::<PutOptions>),
                    TxnOp::put(group_k.clone(), group_value, None::<PutOptions>),
                ]);
            let txn_resp = client.txn(txn).await?;
            if txn_resp.succeeded() {
                return Ok(ProvisionalEnqueueOutcome::Inserted(next_group));
            }
            // Lost the race against a concurrent enqueue or promote for the
            // same group; retry and let the re-read pick the right branch.
        }
        anyhow::bail!(
            "exhausted retries enqueuing pod {}/{}/{}",
            pod.group_name,
            pod.namespace,
            pod.name
        )
    }

    async fn ready_provisional_groups(&self) -> anyhow::Result<Vec<ProvisionalGroup>> {
        let mut client = self.client.write().await;
        let resp = client
            .get(GROUP_PREFIX, Some(GetOptions::new().with_prefix()))
            .await?;
        let mut ready = Vec::new();
        for kv in resp.kvs() {
            let group: ProvisionalGroup = serde_yaml::from_slice(kv.value())?;
            if group.current_size >= group.group_size {
                ready.push(group);
            }
        }
        Ok(ready)
    }

    async fn provisional_pod_names(
        &self,
        group_name: &str,
        namespace: &str,
    ) -> anyhow::Result<Vec<String>> {
        let mut client = self.client.write().await;
        let resp = client
            .get(
                pod_prefix(group_name, namespace),
                Some(GetOptions::new().with_prefix()),
            )
            .await?;
        let mut pods: Vec<ProvisionalPod> = resp
            .kvs()
            .iter()
            .map(|kv| serde_yaml::from_slice(kv.value()))
            .collect::<Result<_, _>>()?;
        pods.sort_by_key(|p| p.created_at);
        Ok(pods.into_iter().map(|p| p.name).collect())
    }

    async fn promote_and_enqueue(
        &self,
        group_name: &str,
        namespace: &str,
        group_size: u32,
        queue_name: &str,
        job: &JobRecord,
    ) -> anyhow::Result<()> {
        let pending = fluxnetes_types::PendingGroup {
            group_name: group_name.to_string(),
            namespace: namespace.to_string(),
            group_size,
        };
        let pending_value = serde_yaml::to_string(&pending)?;
        let pending_k = pending_key(group_name, namespace);
        let group_k = group_key(group_name, namespace);
        let pod_pfx = pod_prefix(group_name, namespace);
        let job_k = job_key(queue_name, job.id);
        let job_value = serde_yaml::to_string(job)?;

        // The pending and job Puts are listed before the provisional Deletes
        // so a reader observing this revision never sees the group absent
        // from pending with no queued job to explain why. All ops land in the
        // same etcd revision regardless of list order, but keeping the Puts
        // first documents the intended "pending and queued appear together,
        // then provisional disappears" story.
        let txn = Txn::new()
            .when([Compare::version(pending_k.clone(), CompareOp::Equal, 0)])
            .and_then([
                TxnOp::put(pending_k, pending_value, None::<PutOptions>),
                TxnOp::put(job_k, job_value, None::<PutOptions>),
                TxnOp::delete(group_k, None::<DeleteOptions>),
                TxnOp::delete(pod_pfx, Some(DeleteOptions::new().with_prefix())),
            ]);
        let mut client = self.client.write().await;
        let resp = client.txn(txn).await?;
        if !resp.succeeded() {
            anyhow::bail!("group {group_name}/{namespace} was already pending");
        }
        Ok(())
    }

    async fn delete_pending(&self, group_name: &str, namespace: &str) -> anyhow::Result<()> {
        let mut client = self.client.write().await;
        client.delete(pending_key(group_name, namespace), None).await?;
        Ok(())
    }

    async fn insert_reservation(&self, reservation: &Reservation) -> anyhow::Result<()> {
        let key = reservation_key(&reservation.group_name, reservation.flux_id);
        let value = serde_yaml::to_string(reservation)?;
        let mut client = self.client.write().await;
        client.put(key, value, None).await?;
        Ok(())
    }

    async fn list_reservations(&self) -> anyhow::Result<Vec<Reservation>> {
        let mut client = self.client.write().await;
        let resp = client
            .get(RESERVATIONS_PREFIX, Some(GetOptions::new().with_prefix()))
            .await?;
        resp.kvs()
            .iter()
            .map(|kv| serde_yaml::from_slice(kv.value()).map_err(anyhow::Error::from))
            .collect()
    }

    async fn delete_reservations(&self, group_name: &str) -> anyhow::Result<()> {
        let mut client = self.client.write().await;
        client
            .delete(
                reservation_prefix(group_name),
                Some(DeleteOptions::new().with_prefix()),
            )
            .await?;
        Ok(())
    }

    async fn put_job(&self, queue_name: &str, record: &JobRecord) -> anyhow::Result<()> {
        let key = job_key(queue_name, record.id);
        let value = serde_yaml::to_string(record)?;
        let mut client = self.client.write().await;
        client.put(key, value, None).await?;
        Ok(())
    }

    async fn delete_job(&self, queue_name: &str, id: u64) -> anyhow::Result<()> {
        let mut client = self.client.write().await;
        client.delete(job_key(queue_name, id), None).await?;
        Ok(())
    }

    async fn list_jobs(&self, queue_name: &str) -> anyhow::Result<Vec<JobRecord>> {
        let mut client = self.client.write().await;
        let resp = client
            .get(
                job_prefix(queue_name),
                Some(GetOptions::new().with_prefix()),
            )
            .await?;
        resp.kvs()
            .iter()
            .map(|kv| serde_yaml::from_slice(kv.value()).map_err(anyhow::Error::from))
            .collect()
    }
}
