use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::labels::{self, LabelParseError};

/// A single pod submission as handed to the Group Assembler. Transient input; never
/// persisted in this shape (see [`ProvisionalPod`]/[`ProvisionalGroup`] for the
/// persisted projections).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSubmission {
    pub namespace: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub priority: u64,
    pub created_at: DateTime<Utc>,
    /// Opaque to the core; carried through to the matcher request and back out to
    /// the cleanup worker.
    pub podspec: String,
    /// Set when the pod's owner is a higher-level workload fluxnetes recognizes
    /// (currently only a batch Job), used by the Cleanup Worker to decide what to
    /// delete on expiry.
    pub owner: Option<PodOwner>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodOwner {
    pub kind: OwnerKind,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerKind {
    Job,
}

impl PodSubmission {
    pub fn group_name(&self) -> String {
        labels::group_name(&self.namespace, &self.name, &self.labels)
    }

    pub fn group_size(&self) -> Result<u32, LabelParseError> {
        labels::group_size(&self.labels)
    }

    pub fn duration_seconds(&self) -> Result<u64, LabelParseError> {
        labels::duration_seconds(&self.labels)
    }
}

/// Persisted row: one pod staged in a group awaiting gang admission.
/// Uniqueness: `(group_name, namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionalPod {
    pub group_name: String,
    pub namespace: String,
    pub name: String,
    pub podspec: String,
    pub duration_seconds: u64,
    pub created_at: DateTime<Utc>,
}

/// Persisted row: aggregate state of a group still being assembled.
/// Uniqueness: `(group_name, namespace)`. Invariant: `1 <= current_size <= group_size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionalGroup {
    pub group_name: String,
    pub namespace: String,
    pub group_size: u32,
    pub current_size: u32,
    pub duration_seconds: u64,
    /// One representative member's podspec — members of the same group are
    /// assumed to share a spec closely enough that this is a safe stand-in.
    pub podspec: String,
    /// The same member's owner reference, carried through to the Cleanup Worker.
    pub owner: Option<PodOwner>,
    pub created_at: DateTime<Utc>,
}

/// Persisted row: a group handed to the Job Queue. While present, further pods
/// claiming the same `(group_name, namespace)` are rejected from ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingGroup {
    pub group_name: String,
    pub namespace: String,
    pub group_size: u32,
}

/// Persisted row correlating a group with a matcher-assigned reservation id, so a
/// later cleanup or `PostSubmit` pass can find it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub group_name: String,
    pub flux_id: u64,
}

/// Arguments for the `job` (Allocation Worker) kind. `nodes` starts `None` and is
/// populated in place by the worker on a successful allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobArgs {
    pub group_name: String,
    pub namespace: String,
    pub group_size: u32,
    pub duration_seconds: u64,
    pub podspec: String,
    pub pod_names: Vec<String>,
    pub nodes: Option<String>,
    pub owner: Option<PodOwner>,
}

impl JobArgs {
    pub fn kind() -> &'static str {
        "job"
    }
}

/// Arguments for the `cleanup` kind. `flux_id = None` means "no matcher
/// allocation known", modeled as `Option` rather than the `-1` sentinel a
/// dynamically typed caller might use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupArgs {
    pub group_name: String,
    pub namespace: String,
    pub flux_id: Option<u64>,
    pub podspec: Option<String>,
    /// Member pods to delete directly when there's no recognized owner to
    /// delete instead. Carried over from the originating `JobArgs`.
    pub pod_names: Vec<String>,
    pub owner: Option<PodOwner>,
    pub delete_orchestrator_object: bool,
}

impl CleanupArgs {
    pub fn kind() -> &'static str {
        "cleanup"
    }
}

/// Outcome of [`crate::labels`]-validated ingest, returned by the Group
/// Assembler's `enqueue` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueStatus {
    PodEnqueueSuccess,
    PodInvalid,
    GroupAlreadyInPending,
    Unknown,
}

/// A fully-assembled group ready to leave the provisional stage, as returned by
/// `ReadyGroups` and consumed by `Promote`/the Scheduling Strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyGroup {
    pub group_name: String,
    pub namespace: String,
    pub group_size: u32,
    pub duration_seconds: u64,
    pub podspec: String,
    pub pod_names: Vec<String>,
    pub owner: Option<PodOwner>,
    /// Earliest member's creation time; `EasyBackfill` orders ready groups on
    /// this, oldest first.
    pub created_at: DateTime<Utc>,
}

/// The node list handed back to the host orchestrator once a group's allocation
/// completes. Member pods are paired with nodes positionally: the Allocation
/// Worker zips `pod_names` (insertion order) against the matcher's `Nodelist`, so
/// `nodes_by_pod[pod_names[i]] == nodelist[i]`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Allocation {
    pub nodes_by_pod: HashMap<String, String>,
}
