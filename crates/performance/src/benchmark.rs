//! Threshold-based percentile estimate against a summary distribution.
//!
//! Distributions only expose a handful of summary points, so the rank is a bucket
//! estimate, not an exact percentile.

use tracing::warn;

use crate::calculator::calculate;
use crate::errors::PerformanceError;
use crate::model::{
    AggregateTotals, BenchmarkComparison, BenchmarkSet, DerivedMetric, MetricValue, RankScale,
    StatisticalDistribution, Tier,
};

const UNRANKED: BenchmarkComparison = BenchmarkComparison {
    percentile_rank: 0,
    tier: Tier::NeedsWork,
};

pub fn tier_for_rank(rank: u8) -> Tier {
    match rank {
        90..=u8::MAX => Tier::Excellent,
        50..=89 => Tier::Good,
        30..=49 => Tier::Average,
        _ => Tier::NeedsWork,
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BenchmarkComparator {
    scale: RankScale,
}

impl BenchmarkComparator {
    pub fn new(scale: RankScale) -> Self {
        Self { scale }
    }

    pub fn scale(&self) -> RankScale {
        self.scale
    }

    pub fn compare(
        &self,
        value: f64,
        distribution: &StatisticalDistribution,
        lower_is_better: bool,
    ) -> BenchmarkComparison {
        match self.try_compare(value, distribution, lower_is_better) {
            Ok(comparison) => comparison,
            Err(err) => {
                warn!(?err, value, "benchmark comparison degraded");
                UNRANKED
            }
        }
    }

    pub fn try_compare(
        &self,
        value: f64,
        distribution: &StatisticalDistribution,
        lower_is_better: bool,
    ) -> Result<BenchmarkComparison, PerformanceError> {
        if !value.is_finite() {
            return Err(PerformanceError::MalformedDistribution(format!(
                "non-finite value {value}"
            )));
        }
        if !distribution.is_well_formed() {
            return Err(PerformanceError::MalformedDistribution(format!(
                "non-finite summary point in {distribution:?}"
            )));
        }

        let thresholds = [distribution.p90, distribution.median, distribution.mean];
        let ranks = self.scale.ranks();
        let passes = |threshold: f64| {
            if lower_is_better {
                value <= threshold
            } else {
                value >= threshold
            }
        };

        let rank = thresholds
            .iter()
            .position(|threshold| passes(*threshold))
            .map(|idx| ranks[idx])
            .unwrap_or(ranks[3]);

        Ok(BenchmarkComparison {
            percentile_rank: rank,
            tier: tier_for_rank(rank),
        })
    }

    /// Computes all ten metrics for a group and ranks each one against `benchmark`
    /// when a distribution for that metric is available.
    pub fn derive(
        &self,
        totals: &AggregateTotals,
        benchmark: Option<&BenchmarkSet>,
    ) -> Vec<DerivedMetric> {
        self.rank_values(&calculate(totals), benchmark)
    }

    /// Ranks already computed metric values. Metrics without a distribution keep their
    /// value and carry no benchmark fields.
    pub fn rank_values(
        &self,
        values: &[MetricValue],
        benchmark: Option<&BenchmarkSet>,
    ) -> Vec<DerivedMetric> {
        values
            .iter()
            .map(|metric| {
                let lower_is_better = metric.key.lower_is_better();
                let distribution = benchmark.and_then(|set| set.distribution(metric.key));
                let comparison =
                    distribution.map(|dist| self.compare(metric.value, dist, lower_is_better));
                DerivedMetric {
                    key: metric.key,
                    value: metric.value,
                    benchmark_mean: distribution.map(|dist| dist.mean),
                    benchmark_median: distribution.map(|dist| dist.median),
                    benchmark_p90: distribution.map(|dist| dist.p90),
                    percentile_rank: comparison.map(|c| c.percentile_rank),
                    tier: comparison.map(|c| c.tier),
                    lower_is_better,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricKey;

    fn distribution(mean: f64, median: f64, p90: f64) -> StatisticalDistribution {
        StatisticalDistribution {
            mean,
            median,
            p90,
            min: 0.0,
            max: 200.0,
            count: 42,
        }
    }

    #[test]
    fn higher_is_better_buckets() {
        let comparator = BenchmarkComparator::default();
        let dist = distribution(120.0, 130.0, 160.0);

        let cases = [
            (170.0, 90, Tier::Excellent),
            (160.0, 90, Tier::Excellent),
            (140.0, 70, Tier::Good),
            (125.0, 40, Tier::Average),
            (100.0, 20, Tier::NeedsWork),
        ];
        for (value, rank, tier) in cases {
            let cmp = comparator.compare(value, &dist, false);
            assert_eq!(cmp.percentile_rank, rank, "value {value}");
            assert_eq!(cmp.tier, tier, "value {value}");
        }
    }

    #[test]
    fn conservative_scale_shifts_middle_tiers() {
        let comparator = BenchmarkComparator::new(RankScale::Conservative);
        let dist = distribution(120.0, 130.0, 160.0);

        assert_eq!(comparator.compare(165.0, &dist, false).percentile_rank, 90);
        let median = comparator.compare(140.0, &dist, false);
        assert_eq!((median.percentile_rank, median.tier), (50, Tier::Good));
        let mean = comparator.compare(125.0, &dist, false);
        assert_eq!((mean.percentile_rank, mean.tier), (30, Tier::Average));
        let below = comparator.compare(10.0, &dist, false);
        assert_eq!((below.percentile_rank, below.tier), (10, Tier::NeedsWork));
    }

    #[test]
    fn lower_is_better_inverts_comparisons() {
        let comparator = BenchmarkComparator::default();
        let dist = distribution(6.0, 5.0, 3.0);

        assert_eq!(comparator.compare(2.0, &dist, true).percentile_rank, 90);
        assert_eq!(comparator.compare(4.0, &dist, true).percentile_rank, 70);
        assert_eq!(comparator.compare(5.5, &dist, true).percentile_rank, 40);
        assert_eq!(comparator.compare(9.0, &dist, true).percentile_rank, 20);
    }

    #[test]
    fn rank_is_monotonic_in_value() {
        let dists = [
            distribution(120.0, 130.0, 160.0),
            distribution(6.0, 5.0, 3.0),
            // violates the usual ordering between summary points
            distribution(50.0, 10.0, 30.0),
        ];
        for scale in [RankScale::Standard, RankScale::Conservative] {
            let comparator = BenchmarkComparator::new(scale);
            for dist in &dists {
                let mut prev_up = 0u8;
                let mut prev_down = u8::MAX;
                for step in 0..=400 {
                    let value = step as f64 * 0.5;
                    let up = comparator.compare(value, dist, false).percentile_rank;
                    let down = comparator.compare(value, dist, true).percentile_rank;
                    assert!(up >= prev_up, "higher-is-better regressed at {value}");
                    assert!(down <= prev_down, "lower-is-better improved at {value}");
                    prev_up = up;
                    prev_down = down;
                }
            }
        }
    }

    #[test]
    fn malformed_distribution_degrades_to_needs_work() {
        let comparator = BenchmarkComparator::default();
        let nan = distribution(f64::NAN, 5.0, 9.0);
        let inf = distribution(4.0, f64::INFINITY, 9.0);

        for dist in [nan, inf] {
            let cmp = comparator.compare(10.0, &dist, false);
            assert_eq!(cmp.percentile_rank, 0);
            assert_eq!(cmp.tier, Tier::NeedsWork);
            assert!(matches!(
                comparator.try_compare(10.0, &dist, false),
                Err(PerformanceError::MalformedDistribution(_))
            ));
        }
        assert_eq!(
            comparator.compare(f64::NAN, &distribution(1.0, 2.0, 3.0), true),
            UNRANKED
        );
    }

    #[test]
    fn unbounded_distribution_does_not_panic() {
        let comparator = BenchmarkComparator::default();
        let dist = StatisticalDistribution {
            mean: 500.0,
            median: -3.0,
            p90: 12.0,
            min: 100.0,
            max: 0.0,
            count: 0,
        };
        assert!(!dist.is_bounded());
        let cmp = comparator.compare(50.0, &dist, false);
        assert_eq!(cmp.percentile_rank, 90);
    }

    #[test]
    fn tier_boundaries() {
        assert_eq!(tier_for_rank(100), Tier::Excellent);
        assert_eq!(tier_for_rank(90), Tier::Excellent);
        assert_eq!(tier_for_rank(89), Tier::Good);
        assert_eq!(tier_for_rank(50), Tier::Good);
        assert_eq!(tier_for_rank(49), Tier::Average);
        assert_eq!(tier_for_rank(30), Tier::Average);
        assert_eq!(tier_for_rank(29), Tier::NeedsWork);
        assert_eq!(tier_for_rank(0), Tier::NeedsWork);
    }

    #[test]
    fn derive_attaches_benchmarks_where_available() {
        let totals = AggregateTotals {
            ewes_mated: 100,
            ewes_scanned: 98,
            ewes_pregnant: 90,
            ..AggregateTotals::default()
        };
        let mut set = BenchmarkSet::default();
        set.metrics
            .insert(MetricKey::ScanningRate, distribution(90.0, 95.0, 99.0));

        let derived = BenchmarkComparator::default().derive(&totals, Some(&set));
        assert_eq!(derived.len(), 10);

        let scanning = derived
            .iter()
            .find(|metric| metric.key == MetricKey::ScanningRate)
            .unwrap();
        assert_eq!(scanning.percentile_rank, Some(70));
        assert_eq!(scanning.tier, Some(Tier::Good));
        assert_eq!(scanning.benchmark_p90, Some(99.0));

        let mortality = derived
            .iter()
            .find(|metric| metric.key == MetricKey::MortalityPercentage)
            .unwrap();
        assert!(mortality.lower_is_better);
        assert_eq!(mortality.tier, None);
        assert_eq!(mortality.benchmark_mean, None);
    }
}
