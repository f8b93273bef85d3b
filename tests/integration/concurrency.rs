//! Concurrency tests
//!
//! These tests verify that concurrent callers sharing one monitor actor see a
//! consistent state:
//! - Samples from many tasks are all recorded
//! - Concurrent breaches produce a single active alert
//! - Subscribers on other tasks see every event when they keep up

use std::sync::Arc;

use pulse_monitor::actors::{MonitorHandle, MonitorOptions};
use pulse_monitor::alerts::AlertQuery;
use pulse_monitor::events::AlertEvent;
use pulse_monitor::storage::MemoryBackend;
use pulse_monitor::stats::AggregationType;
use pulse_monitor::TimeRange;

use crate::helpers::*;

async fn spawn_monitor() -> MonitorHandle {
    let handle = MonitorHandle::spawn(
        "emails",
        MonitorOptions::new(1_024).with_store(Arc::new(MemoryBackend::new())),
    );
    handle.add_metric(create_test_metric()).await.unwrap();
    handle.add_rule(create_test_rule()).await.unwrap();
    handle
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_samples_are_all_recorded() {
    let handle = spawn_monitor().await;

    let mut tasks = vec![];
    for worker in 0..8 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..25 {
                handle.sample(METRIC, point(worker * 25 + i, 1.0)).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(
        handle
            .get_aggregate(METRIC, TimeRange::all(), AggregationType::Count)
            .await
            .unwrap(),
        Some(200.0)
    );
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_breaches_keep_one_active_alert() {
    let handle = spawn_monitor().await;

    let mut tasks = vec![];
    for worker in 0..4 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..10 {
                handle.sample(METRIC, point(worker * 10 + i, 500.0)).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let alerts = handle.get_alerts(AlertQuery::for_rule(RULE)).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].is_active());
    assert_eq!(alerts[0].violations, 40);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_subscriber_on_other_task() {
    let handle = spawn_monitor().await;
    let mut subscription = handle.subscribe_to_alerts(None).await.unwrap();

    let listener = tokio::spawn(async move {
        let mut raised = 0;
        while let Some(event) = subscription.recv().await {
            if matches!(event, AlertEvent::Raised { .. }) {
                raised += 1;
            }
            if raised == 3 {
                break;
            }
        }
        raised
    });

    for episode in 0..3 {
        handle.sample(METRIC, point(episode * 10, 150.0)).await.unwrap();
        handle.sample(METRIC, point(episode * 10 + 5, 1.0)).await.unwrap();
    }

    assert_eq!(listener.await.unwrap(), 3);
    handle.shutdown().await.unwrap();
}
