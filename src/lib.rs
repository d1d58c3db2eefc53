#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Tollgate
//!
//! Multi-tenant, per-route, two-tier fixed-window rate limiting for expensive
//! endpoints.
//!
//! ## Features
//!
//! - **Per-route quotas** (`{window, max}`) with a default for unknown routes
//! - **Local window cache** that answers most checks without a store round trip
//! - **Persistent counter store** trait with conditional, atomic operations
//! - **Fail open**: store faults and timeouts admit the request and log
//! - **Kill switch** for incident response
//! - **Retention sweeper** that bounds persisted state
//! - **tower middleware** for wiring a route behind the limiter
//!
//! ## Quick Start
//!
//! ```rust
//! use tollgate::{AdmissionEngine, InMemoryCounterStore, LimiterConfig, RoutePolicy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tollgate::ConfigError> {
//!     let config = LimiterConfig::default().with_route("analyze", RoutePolicy::new(60, 2));
//!     let engine = AdmissionEngine::builder(InMemoryCounterStore::new()).config(config).build()?;
//!
//!     assert!(engine.check("user-42", "analyze").await.is_allowed());
//!     assert!(engine.check("user-42", "analyze").await.is_allowed());
//!     let denied = engine.check("user-42", "analyze").await;
//!     assert!(!denied.is_allowed());
//!     assert!(denied.retry_after_secs().unwrap() <= 60);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod policy;
pub mod prelude;
pub mod presets;
pub mod retention;
pub mod store;
pub mod subject;
pub mod task;
pub mod telemetry;

// Re-exports
pub use cache::{CacheEntry, LocalWindowCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LimiterConfig, DISABLED_ENV};
pub use engine::{AdmissionEngine, AdmissionEngineBuilder, AdmissionPath, Decision, RateLimiter};
pub use error::{AdmissionError, ConfigError};
pub use middleware::{AdmissionLayer, AdmissionService};
pub use policy::{PolicyTable, RoutePolicy};
pub use retention::RetentionSweeper;
pub use store::{CounterStore, InMemoryCounterStore, ResetOutcome, WindowRecord};
pub use subject::{composite_key, Subject, SubjectResolver, ANONYMOUS};
pub use task::PeriodicTask;
pub use telemetry::{LimiterEvent, TelemetrySink};
