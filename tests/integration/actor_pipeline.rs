//! End-to-end tests through the monitor actor
//!
//! Samples go in through a `MonitorHandle`, closed buckets land in the store
//! and alert events come out of subscriptions.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use pulse_monitor::TimeRange;
use pulse_monitor::actors::{MonitorHandle, MonitorOptions};
use pulse_monitor::alerts::AlertQuery;
use pulse_monitor::config::read_config_file;
use pulse_monitor::events::AlertEvent;
use pulse_monitor::meter::DecayWindow;
use pulse_monitor::rules::RuleState;
use pulse_monitor::stats::{AggregationType, OutlierMethod, OutlierOptions};
use pulse_monitor::storage::{MemoryBackend, StorageBackend};

use crate::helpers::*;

async fn spawn_monitor(store: Arc<MemoryBackend>) -> MonitorHandle {
    let handle = MonitorHandle::spawn("emails", MonitorOptions::new(64).with_store(store));
    handle.add_metric(create_test_metric()).await.unwrap();
    handle.add_rule(create_test_rule().with_alert_on_reset(true)).await.unwrap();
    handle
}

#[tokio::test]
async fn test_samples_raise_and_reset_alerts() {
    let store = Arc::new(MemoryBackend::new());
    let handle = spawn_monitor(store.clone()).await;
    let mut subscription = handle.subscribe_to_alerts(None).await.unwrap();

    handle.sample(METRIC, point(100, 150.0)).await.unwrap();
    handle.sample(METRIC, point(1_100, 20.0)).await.unwrap();

    assert_matches!(
        subscription.recv().await,
        Some(AlertEvent::Raised { alert }) if alert.value == 150.0
    );
    assert_matches!(
        subscription.recv().await,
        Some(AlertEvent::RuleStateChanged { state: RuleState::Triggered, .. })
    );
    assert_matches!(
        subscription.recv().await,
        Some(AlertEvent::Reset { alert }) if alert.end == Some(1_100)
    );

    let stored = store.load_alerts(RULE, TimeRange::all()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].end, Some(1_100));

    let rows = store.load_aggregate(METRIC, TimeRange::all()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].last, 150.0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_queries_through_handle() {
    let handle = spawn_monitor(Arc::new(MemoryBackend::new())).await;

    for i in 0..14 {
        handle.sample(METRIC, point(i * 100, 10.0)).await.unwrap();
    }
    handle.sample(METRIC, point(1_450, 5.0)).await.unwrap();

    assert_eq!(
        handle
            .get_aggregate(METRIC, TimeRange::all(), AggregationType::Min)
            .await
            .unwrap(),
        Some(5.0)
    );
    let outliers = handle
        .get_outliers(METRIC, OutlierMethod::Sigma, TimeRange::all(), OutlierOptions::default())
        .await
        .unwrap();
    assert_eq!(outliers, vec![point(1_450, 5.0)]);

    handle.tick(5_000).await.unwrap();
    let rate = handle
        .rate(METRIC, DecayWindow::Short, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(rate > 0.0);

    let status = handle.status().await.unwrap();
    assert_eq!(status.metrics[0].count, 15);
    assert_eq!(status.rules[0].state, RuleState::Untriggered);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_alert_management_through_handle() {
    let handle = spawn_monitor(Arc::new(MemoryBackend::new())).await;
    handle.sample(METRIC, point(100, 150.0)).await.unwrap();

    let alerts = handle.get_alerts(AlertQuery::for_rule(RULE)).await.unwrap();
    assert_eq!(alerts.len(), 1);

    handle.mark_alert_as_read(RULE, alerts[0].id, true).await.unwrap();
    assert!(handle.get_alerts(AlertQuery::default()).await.unwrap()[0].is_read);

    assert_eq!(handle.clear_alerts(RULE).await.unwrap(), 1);
    assert!(handle.get_alerts(AlertQuery::default()).await.unwrap().is_empty());

    handle.delete_rule(RULE).await.unwrap();
    assert!(handle.status().await.unwrap().rules.is_empty());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_entity_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "entities": [{{
                "id": "emails",
                "metrics": [{{
                    "id": "waiting",
                    "aggregation": "max",
                    "duration_ms": 10000,
                    "period_ms": 1000
                }}],
                "rules": [{{
                    "id": "backlog",
                    "metric_id": "waiting",
                    "confirm_count": 2,
                    "condition": {{ "type": "threshold", "operator": "gte", "threshold": 100 }}
                }}]
            }}]
        }}"#
    )
    .unwrap();
    let config = read_config_file(file.path().to_str().unwrap()).unwrap();

    let handle = MonitorHandle::spawn_entity(&config.entities[0], MonitorOptions::new(16), 0)
        .await
        .unwrap();

    assert!(handle.sample(METRIC, point(100, 100.0)).await.unwrap().events.is_empty());
    let report = handle.sample(METRIC, point(200, 1.0)).await.unwrap();
    // max over the window is still 100
    assert_matches!(report.events.first(), Some(AlertEvent::Raised { .. }));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_entity_restores_active_alert() {
    let store = Arc::new(MemoryBackend::new());
    let handle = spawn_monitor(store.clone()).await;
    handle.sample(METRIC, point(100, 150.0)).await.unwrap();
    handle.shutdown().await.unwrap();

    let config: pulse_monitor::config::EntityConfig = serde_json::from_value(serde_json::json!({
        "id": "emails",
        "metrics": [{
            "id": METRIC,
            "aggregation": "latest",
            "duration_ms": 10000,
            "period_ms": 1000
        }],
        "rules": [{
            "id": RULE,
            "metric_id": METRIC,
            "condition": { "type": "threshold", "operator": "gt", "threshold": 100 }
        }]
    }))
    .unwrap();
    let restored =
        MonitorHandle::spawn_entity(&config, MonitorOptions::new(16).with_store(store), 0)
            .await
            .unwrap();

    let report = restored.sample(METRIC, point(200, 160.0)).await.unwrap();
    assert_matches!(report.events.first(), Some(AlertEvent::Updated { .. }));
    assert_eq!(restored.get_alerts(AlertQuery::default()).await.unwrap().len(), 1);

    restored.shutdown().await.unwrap();
}
