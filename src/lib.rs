//! Live aggregation engine for a farm owner's flock records.
//!
//! [`FlockEngine`] keeps a merged farms/groups/events view fresh from a [`Store`] and
//! derives per-group performance metrics ranked against external benchmark sets.

pub mod benchmark;
pub mod engine;
pub mod insights;
pub mod metrics;
pub mod telemetry;

pub use benchmark::{BenchmarkStore, BenchmarkStream, InMemoryBenchmarkStore};
pub use engine::{EngineDeps, FlockEngine};
pub use insights::{GroupInsight, GroupPerformance, InsightsSnapshot};
pub use metrics::{global_registry, register_metrics, render_metrics};
pub use telemetry::init_logging;

pub use flockview_core_types as core_types;
pub use flockview_performance as performance;
pub use flockview_policy_center as policy;
pub use flockview_registry as registry;
pub use flockview_scheduler as scheduler;
pub use flockview_registry::Store;
