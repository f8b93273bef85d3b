//! Alert notifications
//!
//! Rule managers publish [`AlertEvent`]s in two directions:
//!
//! - in process, on an [`AlertBus`] that any number of [`AlertSubscription`]s
//!   read from. Every subscription has a bounded buffer; a subscriber that
//!   falls behind loses the oldest events and can see how many via
//!   [`AlertSubscription::dropped`].
//! - out of process, to [`EventSink`]s that take a channel name and a JSON
//!   payload. Delivery and retries are up to the sink.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, info, warn};

use crate::RuleId;
use crate::alerts::Alert;
use crate::rules::RuleState;

pub const ALERT_RAISED_CHANNEL: &str = "alert.raised";
pub const ALERT_UPDATED_CHANNEL: &str = "alert.updated";
pub const ALERT_RESET_CHANNEL: &str = "alert.reset";
pub const RULE_STATE_CHANNEL: &str = "rule.state-changed";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlertEvent {
    Raised {
        alert: Alert,
    },
    Updated {
        alert: Alert,
    },
    Reset {
        alert: Alert,
    },
    RuleStateChanged {
        rule_id: RuleId,
        state: RuleState,
        error: Option<String>,
    },
}

impl AlertEvent {
    pub fn rule_id(&self) -> &str {
        match self {
            AlertEvent::Raised { alert }
            | AlertEvent::Updated { alert }
            | AlertEvent::Reset { alert } => &alert.rule_id,
            AlertEvent::RuleStateChanged { rule_id, .. } => rule_id,
        }
    }

    pub fn channel(&self) -> &'static str {
        match self {
            AlertEvent::Raised { .. } => ALERT_RAISED_CHANNEL,
            AlertEvent::Updated { .. } => ALERT_UPDATED_CHANNEL,
            AlertEvent::Reset { .. } => ALERT_RESET_CHANNEL,
            AlertEvent::RuleStateChanged { .. } => RULE_STATE_CHANNEL,
        }
    }
}

/// Outbound notification collaborator
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, channel: &str, payload: serde_json::Value) -> anyhow::Result<()>;
}

/// Sink that writes every notification to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn publish(&self, channel: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        info!(channel, "{payload}");
        Ok(())
    }
}

pub type SubscriptionId = u64;

/// In-process fan-out of alert events
#[derive(Debug, Clone)]
pub struct AlertBus {
    sender: broadcast::Sender<AlertEvent>,
    next_subscription: Arc<AtomicU64>,
}

impl AlertBus {
    /// `capacity` is the number of events a subscriber may fall behind
    /// before the oldest are dropped. Must be greater than zero.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            next_subscription: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Deliver `event` to every subscription. Returns the number of
    /// subscriptions it was handed to.
    pub fn publish(&self, event: AlertEvent) -> usize {
        // no subscribers is fine
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events of the rules in `filter`, or to all events.
    pub fn subscribe(&self, filter: Option<HashSet<RuleId>>) -> AlertSubscription {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        debug!(subscription_id = id, "new alert subscription");
        AlertSubscription {
            id,
            receiver: self.sender.subscribe(),
            filter,
            dropped: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiving end of an [`AlertBus`]; dropping it unsubscribes
#[derive(Debug)]
pub struct AlertSubscription {
    id: SubscriptionId,
    receiver: broadcast::Receiver<AlertEvent>,
    filter: Option<HashSet<RuleId>>,
    dropped: u64,
}

impl AlertSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Events this subscription lost because it fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn wants(&self, event: &AlertEvent) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|rules| rules.contains(event.rule_id()))
    }

    /// Next matching event, `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<AlertEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(subscription_id = self.id, "subscriber lagged, dropped {skipped} events");
                    self.dropped += skipped;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is buffered.
    pub fn try_recv(&mut self) -> Option<AlertEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(subscription_id = self.id, "subscriber lagged, dropped {skipped} events");
                    self.dropped += skipped;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = AlertEvent> {
        futures::stream::unfold(self, |mut subscription| async move {
            let event = subscription.recv().await?;
            Some((event, subscription))
        })
    }
}
