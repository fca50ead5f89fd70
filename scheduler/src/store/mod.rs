//! Persistent Store. Backs the provisional pods/groups, the pending-group
//! marker, reservations, and the Job Queue's own job rows — all in the same
//! backing client, so state transitions that must be atomic (ingest, and
//! promotion into the queue) can be expressed as a single etcd transaction
//! instead of several independent round-trips.

mod etcd;

pub use etcd::EtcdStore;

use crate::queue::JobRecord;
use async_trait::async_trait;
use fluxnetes_types::{PodOwner, ProvisionalGroup, ProvisionalPod, Reservation};

/// Outcome of [`Store::enqueue_provisional`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionalEnqueueOutcome {
    /// `(group_name, namespace)` is already pending; the pod was not staged.
    GroupAlreadyPending,
    /// `(group_name, namespace, name)` was already staged; re-ingest is a
    /// no-op.
    AlreadyPresent,
    /// The pod was newly staged and the group row now reflects it.
    Inserted(ProvisionalGroup),
}

/// Abstracts the backing KV store so tests can substitute an in-memory
/// implementation without pulling in a live etcd endpoint.
#[async_trait]
pub trait Store: Send + Sync {
    /// Checks pending status, inserts the pod if absent, and upserts the
    /// group row, all in one transaction keyed on the pending marker, the
    /// pod row, and the group row together. A concurrent `promote_and_enqueue`
    /// for the same group can never interleave with this and leave a
    /// provisional row next to a pending one: both contend on the same
    /// pending-key compare, so exactly one of them observes the other's
    /// effect and loses the race.
    async fn enqueue_provisional(
        &self,
        pod: &ProvisionalPod,
        group_size: u32,
        owner: Option<&PodOwner>,
    ) -> anyhow::Result<ProvisionalEnqueueOutcome>;

    /// All provisional groups with `current_size >= group_size`. Does not
    /// mutate state.
    async fn ready_provisional_groups(&self) -> anyhow::Result<Vec<ProvisionalGroup>>;

    /// Names of every pod staged for `(group_name, namespace)`, in insertion
    /// order, used to build a ready group's `pod_names` list.
    async fn provisional_pod_names(
        &self,
        group_name: &str,
        namespace: &str,
    ) -> anyhow::Result<Vec<String>>;

    /// Moves a group from provisional to pending and persists `job` as a
    /// queued row for `queue_name`, all in one transaction: a crash between
    /// the two can never leave a group pending with no corresponding job, or
    /// a job queued for a group still provisional.
    async fn promote_and_enqueue(
        &self,
        group_name: &str,
        namespace: &str,
        group_size: u32,
        queue_name: &str,
        job: &JobRecord,
    ) -> anyhow::Result<()>;

    /// Removes `(group_name, namespace)` from pending — the only way back in
    /// for a subsequent submission of the same group name.
    async fn delete_pending(&self, group_name: &str, namespace: &str) -> anyhow::Result<()>;

    async fn insert_reservation(&self, reservation: &Reservation) -> anyhow::Result<()>;

    async fn list_reservations(&self) -> anyhow::Result<Vec<Reservation>>;

    /// Prunes a group's reservation rows after a successful allocation
    /// supersedes them. Reservations are GC'd only via successful
    /// supersession, never on their own timer.
    async fn delete_reservations(&self, group_name: &str) -> anyhow::Result<()>;

    /// Inserts or overwrites a job row for `queue_name`, used both for a
    /// fresh insertion and to persist an updated `scheduled_at`/
    /// `attempts_remaining` after a retry or snooze.
    async fn put_job(&self, queue_name: &str, record: &JobRecord) -> anyhow::Result<()>;

    /// Removes a job row once it reaches a terminal outcome.
    async fn delete_job(&self, queue_name: &str, id: u64) -> anyhow::Result<()>;

    /// Every job row persisted for `queue_name`, used to repopulate a
    /// sub-queue's in-memory heap after a process restart.
    async fn list_jobs(&self, queue_name: &str) -> anyhow::Result<Vec<JobRecord>>;
}
