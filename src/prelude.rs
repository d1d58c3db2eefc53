//! Convenient re-exports for common Tollgate types.
pub use crate::{
    config::LimiterConfig,
    engine::{AdmissionEngine, AdmissionPath, Decision, RateLimiter},
    error::{AdmissionError, ConfigError},
    middleware::AdmissionLayer,
    policy::{PolicyTable, RoutePolicy},
    retention::RetentionSweeper,
    store::{CounterStore, InMemoryCounterStore, WindowRecord},
    subject::{Subject, SubjectResolver},
    telemetry::{LimiterEvent, TelemetrySink},
};
