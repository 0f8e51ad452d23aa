// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod analytics;
pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod forecast;
pub mod ingest;
pub mod jobs;
pub mod market;
pub mod metrics;
pub mod oracle;
pub mod publish;
pub mod runtime;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::market::{CachedValue, Provenance, ValueCache};
pub use crate::store::{MemoryStore, SqliteStore, Store};
