//! Live alert subscriptions: filtering, unsubscribe and drop-oldest backpressure

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use futures::StreamExt;
use pulse_monitor::events::{ALERT_RAISED_CHANNEL, AlertEvent, EventSink, RULE_STATE_CHANNEL};
use pulse_monitor::rules::{CompareOp, RuleManager, RuleSpec};

use crate::helpers::*;

#[derive(Default)]
struct RecordingSink {
    published: Mutex<Vec<(String, serde_json::Value)>>,
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, channel: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        self.published.lock().unwrap().push((channel.to_string(), payload));
        Ok(())
    }
}

struct BrokenSink;

#[async_trait]
impl EventSink for BrokenSink {
    async fn publish(&self, _channel: &str, _payload: serde_json::Value) -> anyhow::Result<()> {
        anyhow::bail!("notification service down")
    }
}

fn manager() -> RuleManager {
    let mut manager = RuleManager::new(4);
    manager.add_rule(create_test_rule()).unwrap();
    manager
        .add_rule(RuleSpec::threshold("empty", METRIC, CompareOp::LessThan, 1.0))
        .unwrap();
    manager
}

#[tokio::test]
async fn test_filtered_subscription() {
    let mut manager = manager();
    let mut backlog = manager.subscribe_to_alerts(Some(HashSet::from([RULE.to_string()])));

    manager.evaluate_value(METRIC, 0.0, 1).await;
    manager.evaluate_value(METRIC, 150.0, 2).await;

    assert_matches!(
        backlog.recv().await,
        Some(AlertEvent::Raised { alert }) if alert.rule_id == RULE
    );
    assert_matches!(
        backlog.recv().await,
        Some(AlertEvent::RuleStateChanged { rule_id, .. }) if rule_id == RULE
    );
    assert!(backlog.try_recv().is_none());
}

#[tokio::test]
async fn test_unsubscribed_handle_receives_nothing() {
    let mut manager = manager();
    let subscription = manager.subscribe_to_alerts(None);
    assert_eq!(manager.bus().subscriber_count(), 1);

    manager.unsubscribe(subscription);
    assert_eq!(manager.bus().subscriber_count(), 0);

    // publishing without subscribers is fine
    let report = manager.evaluate_value(METRIC, 150.0, 1).await;
    assert!(!report.events.is_empty());
}

#[tokio::test]
async fn test_slow_subscriber_loses_oldest_events() {
    let mut manager = manager();
    let mut slow = manager.subscribe_to_alerts(Some(HashSet::from([RULE.to_string()])));

    // raise + state change, then four updates: six events into a buffer of four
    for ts in 0..5 {
        manager.evaluate_value(METRIC, 150.0 + ts as f64, ts).await;
    }

    let mut received = vec![];
    while let Some(event) = slow.try_recv() {
        received.push(event);
    }

    assert!(slow.dropped() > 0);
    assert!(received.len() <= 4);
    // the newest event always survives
    assert_matches!(received.last(), Some(AlertEvent::Updated { alert }) if alert.value == 154.0);
}

#[tokio::test]
async fn test_subscription_as_stream() {
    let mut manager = manager();
    let stream = manager.subscribe_to_alerts(None).into_stream();

    manager.evaluate_value(METRIC, 150.0, 1).await;
    let events: Vec<AlertEvent> = stream.take(2).collect().await;
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn test_sinks_receive_channel_and_payload() {
    let sink = Arc::new(RecordingSink::default());
    let mut manager = RuleManager::new(16)
        .with_sink(Arc::new(BrokenSink))
        .with_sink(sink.clone());
    manager.add_rule(create_test_rule()).unwrap();

    let report = manager.evaluate_value(METRIC, 150.0, 1).await;
    // a failing sink is not an evaluation failure
    assert!(report.is_clean());

    let published = sink.published.lock().unwrap();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].0, ALERT_RAISED_CHANNEL);
    assert_eq!(published[0].1["alert"]["rule_id"], RULE);
    assert_eq!(published[1].0, RULE_STATE_CHANNEL);
    assert_eq!(published[1].1["state"], "triggered");
}
