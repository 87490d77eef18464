use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw integer sums for one group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateTotals {
    pub ewes_mated: u64,
    pub ewes_scanned: u64,
    pub ewes_pregnant: u64,
    pub ewes_with_singles: u64,
    pub ewes_with_twins: u64,
    pub ewes_with_triplets: u64,
    pub scanned_fetuses: u64,
    pub ewes_lambed: u64,
    pub lambs_born: u64,
    pub mortality: u64,
    pub lambs_alive: u64,
}

impl AggregateTotals {
    /// Metrics are only meaningful once at least one ewe has been mated.
    pub fn has_breeding_data(&self) -> bool {
        self.ewes_mated > 0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKey {
    ConceptionRate,
    ScanningRate,
    ExpectedLambsPerEwePregnant,
    ExpectedLambsPerEweMated,
    LambingPercentageMated,
    LambingPercentageLambed,
    BornAlivePercentage,
    MortalityPercentage,
    DryEwesPercentage,
    MortalityPercentageEwesLambed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    Percent,
    Ratio,
}

impl MetricKey {
    pub const ALL: [MetricKey; 10] = [
        MetricKey::ConceptionRate,
        MetricKey::ScanningRate,
        MetricKey::ExpectedLambsPerEwePregnant,
        MetricKey::ExpectedLambsPerEweMated,
        MetricKey::LambingPercentageMated,
        MetricKey::LambingPercentageLambed,
        MetricKey::BornAlivePercentage,
        MetricKey::MortalityPercentage,
        MetricKey::DryEwesPercentage,
        MetricKey::MortalityPercentageEwesLambed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKey::ConceptionRate => "conceptionRate",
            MetricKey::ScanningRate => "scanningRate",
            MetricKey::ExpectedLambsPerEwePregnant => "expectedLambsPerEwePregnant",
            MetricKey::ExpectedLambsPerEweMated => "expectedLambsPerEweMated",
            MetricKey::LambingPercentageMated => "lambingPercentageMated",
            MetricKey::LambingPercentageLambed => "lambingPercentageLambed",
            MetricKey::BornAlivePercentage => "bornAlivePercentage",
            MetricKey::MortalityPercentage => "mortalityPercentage",
            MetricKey::DryEwesPercentage => "dryEwesPercentage",
            MetricKey::MortalityPercentageEwesLambed => "mortalityPercentageEwesLambed",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MetricKey::ConceptionRate => "Conception rate",
            MetricKey::ScanningRate => "Scanning rate",
            MetricKey::ExpectedLambsPerEwePregnant => "Expected lambs per ewe pregnant",
            MetricKey::ExpectedLambsPerEweMated => "Expected lambs per ewe mated",
            MetricKey::LambingPercentageMated => "Lambing % (mated)",
            MetricKey::LambingPercentageLambed => "Lambing % (lambed)",
            MetricKey::BornAlivePercentage => "Born alive %",
            MetricKey::MortalityPercentage => "Mortality %",
            MetricKey::DryEwesPercentage => "Dry ewes %",
            MetricKey::MortalityPercentageEwesLambed => "Mortality % (ewes lambed)",
        }
    }

    pub fn unit(self) -> MetricUnit {
        match self {
            MetricKey::ExpectedLambsPerEwePregnant | MetricKey::ExpectedLambsPerEweMated => {
                MetricUnit::Ratio
            }
            _ => MetricUnit::Percent,
        }
    }

    pub fn lower_is_better(self) -> bool {
        matches!(
            self,
            MetricKey::MortalityPercentage
                | MetricKey::DryEwesPercentage
                | MetricKey::MortalityPercentageEwesLambed
        )
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub key: MetricKey,
    pub value: f64,
}

/// Summary statistics produced by the external benchmark job. Treated as read-only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticalDistribution {
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
}

impl StatisticalDistribution {
    pub fn is_well_formed(&self) -> bool {
        [self.mean, self.median, self.p90]
            .iter()
            .all(|value| value.is_finite())
    }

    /// `min <= mean, median, p90 <= max`; assumed by producers, never enforced here.
    pub fn is_bounded(&self) -> bool {
        [self.mean, self.median, self.p90]
            .iter()
            .all(|value| *value >= self.min && *value <= self.max)
    }
}

/// Identifies a benchmark population: breed, region and season year.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BenchmarkKey {
    pub breed: String,
    pub region: String,
    pub year: i32,
}

impl BenchmarkKey {
    pub fn new(breed: impl Into<String>, region: impl Into<String>, year: i32) -> Self {
        Self {
            breed: breed.into(),
            region: region.into(),
            year,
        }
    }

    /// Document id used by the benchmark store, e.g. `texel_north-west_2024`.
    pub fn document_id(&self) -> String {
        format!(
            "{}_{}_{}",
            normalise_segment(&self.breed),
            normalise_segment(&self.region),
            self.year
        )
    }
}

impl fmt::Display for BenchmarkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.breed, self.region, self.year)
    }
}

fn normalise_segment(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Per-metric distributions for one benchmark population.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSet {
    pub metrics: HashMap<MetricKey, StatisticalDistribution>,
}

impl BenchmarkSet {
    pub fn distribution(&self, key: MetricKey) -> Option<&StatisticalDistribution> {
        self.metrics.get(&key)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Excellent,
    Good,
    Average,
    NeedsWork,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Excellent => "excellent",
            Tier::Good => "good",
            Tier::Average => "average",
            Tier::NeedsWork => "needs_work",
        }
    }
}

/// Percentile ranks assigned at the p90, median and mean thresholds, then below all three.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankScale {
    /// 90 / 70 / 40 / 20
    #[default]
    Standard,
    /// 90 / 50 / 30 / 10
    Conservative,
}

impl RankScale {
    pub fn ranks(self) -> [u8; 4] {
        match self {
            RankScale::Standard => [90, 70, 40, 20],
            RankScale::Conservative => [90, 50, 30, 10],
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkComparison {
    pub percentile_rank: u8,
    pub tier: Tier,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetric {
    pub key: MetricKey,
    pub value: f64,
    pub benchmark_mean: Option<f64>,
    pub benchmark_median: Option<f64>,
    pub benchmark_p90: Option<f64>,
    pub percentile_rank: Option<u8>,
    pub tier: Option<Tier>,
    pub lower_is_better: bool,
}
