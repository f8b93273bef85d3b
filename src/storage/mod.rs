//! Persistence of metric aggregates and alerts
//!
//! [`StorageBackend`] is the seam to whatever keeps data across restarts.
//! [`memory::MemoryBackend`] keeps everything in process and doubles as a
//! [`SampleSource`](crate::source::SampleSource) for backfills and tests.

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;

pub use backend::{HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::AggregateRow;
