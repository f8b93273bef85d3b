//! Alert lifecycle of a single rule, driven through the rule manager

use std::sync::Arc;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use pulse_monitor::alerts::AlertQuery;
use pulse_monitor::events::AlertEvent;
use pulse_monitor::rules::{RuleManager, RuleState};
use pulse_monitor::storage::MemoryBackend;

use crate::helpers::*;

#[tokio::test]
async fn test_breach_update_and_clear() {
    let mut metric = create_test_metric();
    let mut manager = RuleManager::new(16);
    manager.add_rule(create_test_rule()).unwrap();

    metric.update(point(100, 150.0)).unwrap();
    manager.evaluate(&metric, 100).await;

    let alerts = manager.get_alerts(&AlertQuery::for_rule(RULE));
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].is_active());

    // further breaches update the same alert
    for (ts, value) in [(200, 180.0), (300, 210.0)] {
        metric.update(point(ts, value)).unwrap();
        manager.evaluate(&metric, ts).await;
    }
    let alerts = manager.get_alerts(&AlertQuery::for_rule(RULE));
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].value, 210.0);
    assert_eq!(alerts[0].violations, 3);

    metric.update(point(400, 20.0)).unwrap();
    manager.evaluate(&metric, 400).await;

    let alerts = manager.get_alerts(&AlertQuery::for_rule(RULE));
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].end, Some(400));
    assert_eq!(alerts[0].reset_value, Some(20.0));
    assert_eq!(manager.rule(RULE).unwrap().state(), RuleState::Untriggered);
}

#[tokio::test]
async fn test_confirm_count_debounces() {
    let mut manager = RuleManager::new(16);
    manager.add_rule(create_test_rule().with_confirm_count(3)).unwrap();

    manager.evaluate_value(METRIC, 150.0, 1).await;
    manager.evaluate_value(METRIC, 150.0, 2).await;
    assert!(manager.get_alerts(&AlertQuery::default()).is_empty());

    // a dip restarts the count
    manager.evaluate_value(METRIC, 50.0, 3).await;
    manager.evaluate_value(METRIC, 150.0, 4).await;
    manager.evaluate_value(METRIC, 150.0, 5).await;
    assert!(manager.get_alerts(&AlertQuery::default()).is_empty());

    let report = manager.evaluate_value(METRIC, 150.0, 6).await;
    assert_matches!(report.events.first(), Some(AlertEvent::Raised { alert }) if alert.start == 6);
}

#[tokio::test]
async fn test_clear_alerts_counts() {
    let mut manager = RuleManager::new(16);
    manager.add_rule(create_test_rule()).unwrap();

    assert_eq!(manager.clear_alerts(RULE).await.unwrap(), 0);

    for episode in 0..3 {
        manager.evaluate_value(METRIC, 150.0, episode * 10).await;
        manager.evaluate_value(METRIC, 10.0, episode * 10 + 5).await;
    }
    assert_eq!(manager.clear_alerts(RULE).await.unwrap(), 3);
    assert_eq!(manager.clear_alerts(RULE).await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_then_re_add_starts_clean() {
    let store = Arc::new(MemoryBackend::new());
    let mut manager = RuleManager::new(16).with_store(store.clone());
    manager.add_rule(create_test_rule().with_confirm_count(2)).unwrap();

    manager.evaluate_value(METRIC, 150.0, 1).await;
    manager.evaluate_value(METRIC, 150.0, 2).await;
    manager.evaluate_value(METRIC, 150.0, 3).await;
    assert_eq!(store.alert_count().await, 1);

    manager.delete_rule(RULE).await.unwrap();
    assert!(manager.rule(RULE).is_none());
    assert!(manager.get_alerts(&AlertQuery::default()).is_empty());
    assert_eq!(store.alert_count().await, 0);

    manager.add_rule(create_test_rule().with_confirm_count(2)).unwrap();
    let rule = manager.rule(RULE).unwrap();
    assert_eq!(rule.violation_count(), 0);
    assert_eq!(rule.state(), RuleState::Untriggered);

    // needs two fresh confirmations again
    manager.evaluate_value(METRIC, 150.0, 4).await;
    assert!(manager.get_alerts(&AlertQuery::default()).is_empty());
}

#[tokio::test]
async fn test_inactive_rule_does_not_alert() {
    let mut manager = RuleManager::new(16);
    manager.add_rule(create_test_rule()).unwrap();
    manager.set_rule_status(RULE, false).unwrap();

    assert!(manager.evaluate_value(METRIC, 500.0, 1).await.events.is_empty());

    manager.set_rule_status(RULE, true).unwrap();
    assert!(!manager.evaluate_value(METRIC, 500.0, 2).await.events.is_empty());
}

#[tokio::test]
async fn test_rules_evaluate_in_registration_order() {
    let mut manager = RuleManager::new(16);
    manager.add_rule(create_test_rule()).unwrap();
    manager
        .add_rule(pulse_monitor::rules::RuleSpec::threshold(
            "also-backlog",
            METRIC,
            pulse_monitor::rules::CompareOp::GreaterEqual,
            100.0,
        ))
        .unwrap();

    let report = manager.evaluate_value(METRIC, 100.0, 1).await;
    let raised: Vec<&str> = report
        .events
        .iter()
        .filter(|event| matches!(event, AlertEvent::Raised { .. }))
        .map(|event| event.rule_id())
        .collect();
    assert_eq!(raised, vec!["also-backlog"]);

    let report = manager.evaluate_value(METRIC, 101.0, 2).await;
    let order: Vec<&str> = report.events.iter().map(|event| event.rule_id()).collect();
    assert_eq!(order, vec![RULE, RULE, "also-backlog"]);
}

#[tokio::test]
async fn test_alert_query_ordering_and_limit() {
    let mut manager = RuleManager::new(16);
    manager.add_rule(create_test_rule()).unwrap();
    for episode in 0..4 {
        manager.evaluate_value(METRIC, 150.0, episode * 10).await;
        manager.evaluate_value(METRIC, 10.0, episode * 10 + 5).await;
    }

    let newest = manager.get_alerts(&AlertQuery {
        limit: Some(2),
        ..AlertQuery::default()
    });
    assert_eq!(newest.iter().map(|a| a.start).collect::<Vec<_>>(), vec![30, 20]);

    let oldest = manager.get_alerts(&AlertQuery {
        ascending: true,
        limit: Some(1),
        ..AlertQuery::default()
    });
    assert_eq!(oldest[0].start, 0);
}
