pub mod aggregate;
pub mod benchmark;
pub mod calculator;
pub mod errors;
pub mod model;

pub use aggregate::{aggregate, aggregate_events, partition_by_group, GroupEvents};
pub use benchmark::{tier_for_rank, BenchmarkComparator};
pub use calculator::{calculate, calculate_checked, metric_value};
pub use errors::PerformanceError;
pub use model::{
    AggregateTotals, BenchmarkComparison, BenchmarkKey, BenchmarkSet, DerivedMetric, MetricKey,
    MetricUnit, MetricValue, RankScale, StatisticalDistribution, Tier,
};
