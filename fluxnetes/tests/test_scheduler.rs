//! Exercises `Engine` end-to-end against a live etcd and matcher, the same way
//! the original RKS integration suite exercised a live xline. Every test bails
//! out early if either dependency isn't reachable, rather than failing the
//! whole run on a missing test fixture.

use std::collections::HashMap;
use std::time::Duration;

use fluxnetes::config::{Config, MatcherSettings};
use fluxnetes::scheduler::Engine;
use fluxnetes_types::{labels, EnqueueStatus, PodSubmission};
use scheduler::facade::Code;
use serial_test::serial;

fn get_store_endpoints() -> Vec<String> {
    std::env::var("DATABASE_URL")
        .map(|url| url.split(',').map(str::to_string).collect())
        .unwrap_or_else(|_| vec!["127.0.0.1:2379".to_string()])
}

fn test_config() -> Config {
    Config {
        store_endpoints: get_store_endpoints(),
        matcher: MatcherSettings {
            endpoint: std::env::var("FLUXNETES_MATCHER_ENDPOINT")
                .unwrap_or_else(|_| "http://127.0.0.1:4242".to_string()),
            timeout_secs: 5,
        },
        reservation_depth: 0,
    }
}

/// Builds a live `Engine`, skipping the test (returning `None`) if etcd or the
/// matcher aren't reachable — mirrors the prior suite's `get_store`.
async fn get_engine() -> Option<Engine> {
    match Engine::try_new(&test_config()).await {
        Ok(engine) => Some(engine),
        Err(err) => {
            println!("skipping test - engine dependencies unavailable: {err:#}");
            None
        }
    }
}

fn pod(namespace: &str, name: &str, group: &str, size: u32) -> PodSubmission {
    let mut pod_labels = HashMap::new();
    pod_labels.insert(labels::POD_GROUP_LABEL.to_string(), group.to_string());
    pod_labels.insert(labels::POD_GROUP_SIZE_LABEL.to_string(), size.to_string());
    PodSubmission {
        namespace: namespace.to_string(),
        name: name.to_string(),
        labels: pod_labels,
        priority: 0,
        created_at: chrono::Utc::now(),
        podspec: "containers: []".to_string(),
        owner: None,
    }
}

#[tokio::test]
#[serial]
async fn single_pod_group_is_admitted_and_assigned_a_node() {
    let Some(mut engine) = get_engine().await else {
        return;
    };
    engine.run().await.unwrap();

    let status = engine
        .enqueue(&pod("default", "p1", "single-pod-group", 1))
        .await
        .unwrap();
    assert_eq!(status, EnqueueStatus::PodEnqueueSuccess);

    let facade = engine.facade();
    let mut node = None;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let (result, status) = facade.pre_filter("default", "p1").await;
        if status.code == Code::Success {
            node = result.node_names.into_iter().next();
            break;
        }
    }

    engine.shutdown().await;
    assert!(node.is_some(), "pod was never assigned a node");
}

#[tokio::test]
#[serial]
async fn reingest_of_same_pod_does_not_duplicate_group_membership() {
    let Some(mut engine) = get_engine().await else {
        return;
    };
    engine.run().await.unwrap();

    let p = pod("default", "p-idempotent", "idempotent-group", 2);
    let first = engine.enqueue(&p).await.unwrap();
    let second = engine.enqueue(&p).await.unwrap();

    engine.shutdown().await;
    assert_eq!(first, EnqueueStatus::PodEnqueueSuccess);
    assert_eq!(second, EnqueueStatus::PodEnqueueSuccess);
}

#[tokio::test]
#[serial]
async fn pending_group_rejects_a_late_arrival() {
    let Some(mut engine) = get_engine().await else {
        return;
    };
    engine.run().await.unwrap();

    engine
        .enqueue(&pod("default", "p-late-1", "late-arrival-group", 1))
        .await
        .unwrap();

    // Give the scheduling pass time to promote the now-ready single-pod group
    // to pending before the late arrival shows up.
    tokio::time::sleep(Duration::from_millis(700)).await;

    let status = engine
        .enqueue(&pod("default", "p-late-2", "late-arrival-group", 1))
        .await
        .unwrap();

    engine.shutdown().await;
    assert_eq!(status, EnqueueStatus::GroupAlreadyInPending);
}
