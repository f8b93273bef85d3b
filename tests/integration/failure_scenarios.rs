//! Failure tests
//!
//! These tests verify that failures stay contained:
//! - A failing store does not lose in-memory state
//! - An erroring rule does not stop the others
//! - A change rule without a baseline is marked errored until reset
//! - A stopped actor reports itself unavailable

use std::sync::Arc;

use assert_matches::assert_matches;
use pulse_monitor::actors::{MonitorHandle, MonitorOptions};
use pulse_monitor::alerts::AlertQuery;
use pulse_monitor::error::MonitorError;
use pulse_monitor::events::AlertEvent;
use pulse_monitor::rules::{
    ChangeKind, CompareOp, RuleCondition, RuleManager, RuleSpec, RuleState,
};
use pulse_monitor::storage::StorageBackend;

use crate::helpers::*;

#[tokio::test]
async fn test_failing_store_keeps_memory_state() {
    let store = Arc::new(FailingBackend::new(true));
    let mut manager = RuleManager::new(16).with_store(store.clone());
    manager.add_rule(create_test_rule()).unwrap();

    let report = manager.evaluate_value(METRIC, 150.0, 1).await;
    assert_matches!(&report.failures[..], [MonitorError::Persistence(_)]);
    assert_matches!(report.events.first(), Some(AlertEvent::Raised { .. }));

    assert_eq!(manager.rule(RULE).unwrap().state(), RuleState::Triggered);
    assert_eq!(manager.get_alerts(&AlertQuery::default()).len(), 1);

    // clearing fails at the store but memory is already cleared
    assert_matches!(manager.clear_alerts(RULE).await, Err(MonitorError::Persistence(_)));
    assert!(manager.get_alerts(&AlertQuery::default()).is_empty());

    store.set_failing(false);
    assert_eq!(manager.clear_alerts(RULE).await.unwrap(), 0);
    assert!(store.health_check().await.unwrap().healthy);
}

#[tokio::test]
async fn test_failing_store_through_actor() {
    let store = Arc::new(FailingBackend::new(true));
    let handle =
        MonitorHandle::spawn("emails", MonitorOptions::new(16).with_store(store.clone()));
    handle.add_metric(create_test_metric()).await.unwrap();
    handle.add_rule(create_test_rule()).await.unwrap();

    handle.sample(METRIC, point(100, 1.0)).await.unwrap();
    let report = handle.sample(METRIC, point(1_100, 150.0)).await.unwrap();

    // closed bucket and new alert both failed to persist
    assert_eq!(report.failures.len(), 2);
    assert!(!report.is_clean());
    assert_eq!(handle.get_alerts(AlertQuery::default()).await.unwrap().len(), 1);
    assert!(!store.health_check().await.unwrap().healthy);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_erroring_rule_does_not_block_others() {
    let mut manager = RuleManager::new(16);
    manager
        .add_rule(RuleSpec::new(
            "jump",
            METRIC,
            RuleCondition::Change {
                operator: CompareOp::GreaterThan,
                threshold: 50.0,
                kind: ChangeKind::Percent,
                window_ms: 10,
            },
        ))
        .unwrap();
    manager.add_rule(create_test_rule()).unwrap();

    manager.evaluate_value(METRIC, 0.0, 0).await;
    let report = manager.evaluate_value(METRIC, 150.0, 10).await;

    assert_matches!(
        &report.failures[..],
        [MonitorError::Evaluation { rule_id, .. }] if rule_id == "jump"
    );
    assert!(
        report
            .events
            .iter()
            .any(|event| matches!(event, AlertEvent::Raised { alert } if alert.rule_id == RULE))
    );
    assert!(manager.rule("jump").unwrap().error().is_some());

    // errored rule stays quiet until reset
    let report = manager.evaluate_value(METRIC, 300.0, 20).await;
    assert!(report.failures.is_empty());
    assert!(report.events.iter().all(|event| event.rule_id() == RULE));

    assert!(manager.reset_rule_error("jump").unwrap());
    assert!(!manager.reset_rule_error("jump").unwrap());
}

#[tokio::test]
async fn test_missing_change_baseline_marks_rule_errored() {
    let mut manager = RuleManager::new(16);
    manager
        .add_rule(RuleSpec::new(
            "growth",
            METRIC,
            RuleCondition::Change {
                operator: CompareOp::GreaterThan,
                threshold: 5.0,
                kind: ChangeKind::Absolute,
                window_ms: 1_000,
            },
        ))
        .unwrap();

    // first window is warm-up, no baseline is expected yet
    let report = manager.evaluate_value(METRIC, 10.0, 0).await;
    assert!(report.is_clean());
    assert!(report.events.is_empty());

    manager.evaluate_value(METRIC, 10.0, 1_000).await;
    manager.evaluate_value(METRIC, 10.0, 2_000).await;

    // nothing is remembered at or before 500 any more
    let report = manager.evaluate_value(METRIC, 10.0, 1_500).await;
    assert_matches!(
        &report.failures[..],
        [MonitorError::Evaluation { rule_id, .. }] if rule_id == "growth"
    );
    assert_matches!(
        report.events.first(),
        Some(AlertEvent::RuleStateChanged { error: Some(_), .. })
    );
    assert!(manager.rule("growth").unwrap().error().is_some());

    // skipped while errored
    assert!(manager.evaluate_value(METRIC, 99.0, 2_500).await.events.is_empty());

    assert!(manager.reset_rule_error("growth").unwrap());
    let report = manager.evaluate_value(METRIC, 20.0, 3_000).await;
    assert!(report.is_clean());
    assert_matches!(
        report.events.first(),
        Some(AlertEvent::Raised { alert }) if alert.rule_id == "growth"
    );
}

#[tokio::test]
async fn test_unknown_ids() {
    let mut manager = RuleManager::new(16);
    assert_matches!(manager.delete_rule("nope").await, Err(MonitorError::NotFound(_)));
    assert_matches!(manager.set_rule_status("nope", false), Err(MonitorError::NotFound(_)));
    assert_matches!(manager.reset_rule_error("nope"), Err(MonitorError::NotFound(_)));
}

#[tokio::test]
async fn test_stopped_actor_is_unavailable() {
    let handle = MonitorHandle::spawn("emails", MonitorOptions::new(16));
    handle.shutdown().await.unwrap();
    tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;

    assert_matches!(
        handle.sample(METRIC, point(0, 1.0)).await,
        Err(MonitorError::ActorUnavailable)
    );
}
