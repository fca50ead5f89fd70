//! Plugin Façade: exposes the orchestrator's sort and pre-filter contract, and
//! answers "has this pod been allocated a node?" from cached state. `Status`/
//! `Code` vocabulary and the `Less`/`Filter` shape are grounded on
//! `libscheduler::plugins`' `Status`, `Code`, `PrioritySort::less`, and
//! `NodeName::filter`; `PreFilter`'s cached lookup is grounded on
//! `libscheduler::cache::Cache`.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::queue::{JobPayload, JobQueueHandle};
use crate::store::Store;

#[derive(Clone, Debug)]
pub struct Status {
    pub code: Code,
    pub reasons: Vec<String>,
}

impl Status {
    pub fn success() -> Self {
        Self {
            code: Code::Success,
            reasons: vec![],
        }
    }

    pub fn unschedulable(reason: impl Into<String>) -> Self {
        Self {
            code: Code::Unschedulable,
            reasons: vec![reason.into()],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Code {
    Success,
    Unschedulable,
}

/// What `PreFilter` returns on success: the single node a completed allocation
/// already bound this pod to.
pub struct PreFilterResult {
    pub node_names: Vec<String>,
}

/// A pod as the façade sees it — just enough to total-order and to look up in
/// the allocation cache.
pub struct FacadePod {
    pub namespace: String,
    pub name: String,
    pub priority: u64,
    pub group_created_at: DateTime<Utc>,
}

/// Advisory, store-reconciled cache of `(namespace, pod) -> assigned node`.
/// Populated by subscribing to the Job Queue's `completed` events rather than
/// reading the store directly, so a lagging cache never blocks an
/// orchestrator callback. Keyed on the full namespaced name since pod names
/// are only unique within a namespace.
pub struct PluginFacade {
    assigned: RwLock<HashMap<(String, String), String>>,
}

impl PluginFacade {
    pub fn new() -> Self {
        Self {
            assigned: RwLock::new(HashMap::new()),
        }
    }

    /// Spawns a background task that folds `completed` events into the cache.
    /// Call once, after the Job Queue is started.
    pub fn spawn_reconciler<S: Store + 'static>(self: &Arc<Self>, queue: &JobQueueHandle<S>) {
        let facade = self.clone();
        let mut completed = queue.subscribe_completed();
        tokio::spawn(async move {
            loop {
                match completed.recv().await {
                    Ok(record) => facade.absorb(&record).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn absorb(&self, record: &crate::queue::JobRecord) {
        let JobPayload::Job(args) = &record.payload else {
            return;
        };
        let Some(nodes) = &args.nodes else {
            return;
        };
        let node_ids: Vec<&str> = nodes.split(',').collect();
        if node_ids.len() != args.pod_names.len() {
            log::warn!(
                "completed job for group {} has {} nodes for {} pods; skipping cache update",
                args.group_name,
                node_ids.len(),
                args.pod_names.len()
            );
            return;
        }
        let mut assigned = self.assigned.write().await;
        for (pod_name, node) in args.pod_names.iter().zip(node_ids) {
            assigned.insert((args.namespace.clone(), pod_name.clone()), node.to_string());
        }
    }

    /// Higher priority first, then earlier group creation time, then
    /// lexicographic namespaced name.
    pub fn less(&self, a: &FacadePod, b: &FacadePod) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.group_created_at.cmp(&b.group_created_at))
            .then_with(|| {
                (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name))
            })
    }

    /// If the pod already has a node recorded from a completed allocation,
    /// returns that single node; otherwise reports unschedulable so the
    /// orchestrator retries later.
    pub async fn pre_filter(&self, namespace: &str, pod_name: &str) -> (PreFilterResult, Status) {
        let key = (namespace.to_string(), pod_name.to_string());
        match self.assigned.read().await.get(&key) {
            Some(node) => (
                PreFilterResult {
                    node_names: vec![node.clone()],
                },
                Status::success(),
            ),
            None => (
                PreFilterResult { node_names: vec![] },
                Status::unschedulable("group not yet allocated"),
            ),
        }
    }

    /// Rejects any node that doesn't match a recorded assignment. A pod with
    /// no recorded assignment passes — `pre_filter` already gated scheduling
    /// on that.
    pub async fn filter(&self, namespace: &str, pod_name: &str, node_name: &str) -> Status {
        let key = (namespace.to_string(), pod_name.to_string());
        match self.assigned.read().await.get(&key) {
            Some(assigned) if assigned != node_name => {
                Status::unschedulable("node(s) didn't match the pod's recorded allocation")
            }
            _ => Status::success(),
        }
    }
}

impl Default for PluginFacade {
    fn default() -> Self {
        Self::new()
    }
}
