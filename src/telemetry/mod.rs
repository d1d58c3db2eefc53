//! Telemetry for the limiter.
//!
//! Decisions and sweeper runs are emitted as [`LimiterEvent`]s. Sinks are
//! `tower::Service<LimiterEvent>` implementations, so they compose like any
//! other tower service.
//!
//! # Event Types
//!
//! - **Engine**: `Admitted`, `Denied`, `FailedOpen`, `WriteThroughFailed`
//! - **Cache sweep**: `CacheSwept`
//! - **Retention**: `RetentionPurged`, `RetentionFailed`

pub mod events;
pub mod sinks;

pub use events::{AdmissionPath, LimiterEvent};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NonBlockingSink, NullSink, TelemetrySink};
