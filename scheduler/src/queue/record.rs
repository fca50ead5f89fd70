use chrono::{DateTime, Utc};
use fluxnetes_types::{CleanupArgs, JobArgs};
use serde::{Deserialize, Serialize};

/// Mirrors the persisted `int16` attempts column of the queue library this
/// engine's job-retry model is adapted from.
pub const MAX_ATTEMPTS: u32 = (1 << 15) - 1;

/// The two job kinds the core registers. Kept as an enum rather than a trait
/// object: the set is closed and both variants are known at compile time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobPayload {
    Job(JobArgs),
    Cleanup(CleanupArgs),
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::Job(_) => JobArgs::kind(),
            JobPayload::Cleanup(_) => CleanupArgs::kind(),
        }
    }
}

/// A job record, persisted in the [`crate::store::Store`] under its
/// sub-queue's name and tracked in-process between being popped off the
/// sub-queue's heap and reaching a terminal outcome. `kind` is derived from
/// `payload` rather than stored, since it's always recoverable and a
/// `&'static str` can't round-trip through `serde` on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: u64,
    pub payload: JobPayload,
    pub scheduled_at: DateTime<Utc>,
    pub attempts_remaining: u32,
    pub tags: Vec<String>,
}

impl JobRecord {
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

impl PartialEq for JobRecord {
    fn eq(&self, other: &Self) -> bool {
        self.scheduled_at == other.scheduled_at && self.id == other.id
    }
}
impl Eq for JobRecord {}

impl PartialOrd for JobRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JobRecord {
    /// Reversed so a `BinaryHeap<JobRecord>` pops the *earliest* `scheduled_at`
    /// first, same trick `libscheduler`'s `BackOffPod` ordering relies on.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .scheduled_at
            .cmp(&self.scheduled_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}
