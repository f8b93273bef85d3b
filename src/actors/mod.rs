//! Actor-based monitoring
//!
//! Each monitored entity runs as an independent async task that owns its
//! metrics and rules and communicates via Tokio channels.
//!
//! ```text
//!   samples / queries          ┌──────────────────────┐
//!   ─────────────────────────▶ │ MonitorActor         │
//!   (mpsc + oneshot replies)   │  metrics: windows,   │ ──▶ StorageBackend
//!                              │           meters     │     (aggregates, alerts)
//!                              │  RuleManager         │
//!                              └──────────┬───────────┘
//!                                         │ AlertEvent
//!                          ┌──────────────┼──────────────┐
//!                          ▼              ▼              ▼
//!                   AlertSubscription  AlertSubscription  EventSink
//!                   (broadcast, drops oldest on lag)
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: `MonitorHandle` sends commands over an mpsc channel
//! 2. **Request/Response**: oneshot channels carry the result back
//! 3. **Events**: alert events fan out on a broadcast channel

pub mod messages;
pub mod monitor;

pub use messages::{EntityStatus, MetricStatus, MonitorCommand, RuleStatus};
pub use monitor::{MonitorActor, MonitorHandle, MonitorOptions};
