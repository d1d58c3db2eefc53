//! Ready-made policies for the expensive AI-backed routes.
//!
//! ## Quick Start
//!
//! ```rust
//! use tollgate::presets;
//! use tollgate::{AdmissionEngine, InMemoryCounterStore};
//!
//! # fn main() -> Result<(), tollgate::ConfigError> {
//! let engine = AdmissionEngine::builder(InMemoryCounterStore::new())
//!     .config(presets::ai_routes())
//!     .build()?;
//! assert_eq!(engine.policies().policy_for(presets::GENERATE).max, 5);
//! # Ok(())
//! # }
//! ```
//!
//! ## Available Presets
//!
//! - [`ai_routes`]: analysis, generation and job-posting import, each on its
//!   own budget, with the stock default for everything else.
//! - [`ai_routes_table`]: the same routes as a bare [`PolicyTable`].

use crate::config::LimiterConfig;
use crate::policy::{PolicyTable, RoutePolicy};

/// AI analysis of a submitted document.
pub const ANALYZE: &str = "analyze";
/// AI content generation.
pub const GENERATE: &str = "generate";
/// Import of an external job posting (scrape + parse).
pub const IMPORT_JOB: &str = "import-job";

const ANALYZE_POLICY: RoutePolicy = RoutePolicy::new(60, 10);
const GENERATE_POLICY: RoutePolicy = RoutePolicy::new(60, 5);
const IMPORT_JOB_POLICY: RoutePolicy = RoutePolicy::new(60 * 60, 20);

/// Full configuration covering the AI routes, other fields at their defaults.
pub fn ai_routes() -> LimiterConfig {
    LimiterConfig::default()
        .with_route(ANALYZE, ANALYZE_POLICY)
        .with_route(GENERATE, GENERATE_POLICY)
        .with_route(IMPORT_JOB, IMPORT_JOB_POLICY)
}

pub fn ai_routes_table() -> PolicyTable {
    ai_routes().policy_table()
}
