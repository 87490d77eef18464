//! Ratio metrics derived from [`AggregateTotals`].
//!
//! The formulas mirror the batch benchmark job exactly, including the order of
//! operations, so live and batch figures never disagree. Every denominator is guarded:
//! a zero denominator yields `0.0`, never NaN or infinity.

use crate::errors::PerformanceError;
use crate::model::{AggregateTotals, MetricKey, MetricValue};

pub fn calculate(totals: &AggregateTotals) -> Vec<MetricValue> {
    MetricKey::ALL
        .iter()
        .map(|key| MetricValue {
            key: *key,
            value: metric_value(*key, totals),
        })
        .collect()
}

/// Like [`calculate`], but refuses groups with nothing mated so callers never publish
/// a misleading 0%.
pub fn calculate_checked(totals: &AggregateTotals) -> Result<Vec<MetricValue>, PerformanceError> {
    if !totals.has_breeding_data() {
        return Err(PerformanceError::InsufficientData);
    }
    Ok(calculate(totals))
}

pub fn metric_value(key: MetricKey, totals: &AggregateTotals) -> f64 {
    let t = totals;
    match key {
        MetricKey::ConceptionRate => percentage(t.ewes_pregnant as f64, t.ewes_scanned),
        MetricKey::ScanningRate => percentage(t.ewes_scanned as f64, t.ewes_mated),
        MetricKey::ExpectedLambsPerEwePregnant => ratio(t.scanned_fetuses as f64, t.ewes_pregnant),
        MetricKey::ExpectedLambsPerEweMated => ratio(t.scanned_fetuses as f64, t.ewes_mated),
        MetricKey::LambingPercentageMated => percentage(t.ewes_lambed as f64, t.ewes_mated),
        MetricKey::LambingPercentageLambed => percentage(t.lambs_born as f64, t.ewes_lambed),
        MetricKey::BornAlivePercentage => percentage(t.lambs_alive as f64, t.lambs_born),
        MetricKey::MortalityPercentage => percentage(t.mortality as f64, t.lambs_born),
        MetricKey::DryEwesPercentage => {
            percentage(t.ewes_mated as f64 - t.ewes_lambed as f64, t.ewes_mated)
        }
        MetricKey::MortalityPercentageEwesLambed => percentage(t.mortality as f64, t.ewes_lambed),
    }
}

fn ratio(numerator: f64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator / denominator as f64
}

fn percentage(numerator: f64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator / denominator as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn golden_totals() -> AggregateTotals {
        AggregateTotals {
            ewes_mated: 810,
            ewes_scanned: 790,
            ewes_pregnant: 685,
            scanned_fetuses: 895,
            ewes_lambed: 680,
            lambs_born: 890,
            mortality: 50,
            lambs_alive: 840,
            ..AggregateTotals::default()
        }
    }

    fn value_of(values: &[MetricValue], key: MetricKey) -> f64 {
        values
            .iter()
            .find(|metric| metric.key == key)
            .map(|metric| metric.value)
            .expect("metric present")
    }

    #[test]
    fn golden_totals_match_reference_figures() {
        let values = calculate(&golden_totals());
        assert_eq!(values.len(), 10);

        let expected = [
            (MetricKey::ConceptionRate, 86.7),
            (MetricKey::ScanningRate, 97.5),
            (MetricKey::ExpectedLambsPerEwePregnant, 1.31),
            (MetricKey::ExpectedLambsPerEweMated, 1.10),
            (MetricKey::LambingPercentageMated, 84.0),
            (MetricKey::LambingPercentageLambed, 130.9),
            (MetricKey::BornAlivePercentage, 94.4),
            (MetricKey::MortalityPercentage, 5.6),
            (MetricKey::DryEwesPercentage, 16.0),
            (MetricKey::MortalityPercentageEwesLambed, 7.4),
        ];
        for (key, want) in expected {
            let got = value_of(&values, key);
            assert!((got - want).abs() < 0.1, "{key}: got {got}, want {want}");
        }
    }

    #[test]
    fn all_zero_totals_yield_exact_zeros() {
        let values = calculate(&AggregateTotals::default());
        for metric in values {
            assert_eq!(metric.value, 0.0, "{} should be zero", metric.key);
            assert!(metric.value.is_finite());
        }
    }

    #[test]
    fn checked_calculation_refuses_unmated_groups() {
        let totals = AggregateTotals {
            ewes_scanned: 20,
            ewes_pregnant: 18,
            ..AggregateTotals::default()
        };
        assert_eq!(
            calculate_checked(&totals),
            Err(PerformanceError::InsufficientData)
        );
        assert!(calculate_checked(&golden_totals()).is_ok());
    }

    #[test]
    fn partial_denominators_only_zero_affected_metrics() {
        let totals = AggregateTotals {
            ewes_mated: 100,
            ewes_scanned: 95,
            ..AggregateTotals::default()
        };
        assert_eq!(metric_value(MetricKey::ScanningRate, &totals), 95.0);
        assert_eq!(metric_value(MetricKey::ConceptionRate, &totals), 0.0);
        assert_eq!(metric_value(MetricKey::BornAlivePercentage, &totals), 0.0);
        assert_eq!(metric_value(MetricKey::DryEwesPercentage, &totals), 100.0);
    }
}
