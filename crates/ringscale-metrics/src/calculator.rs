//! Weighted totals and ideal instance ranges.
//!
//! A rule `L<=m<=U` says each instance should carry between `L` and `U`
//! units of metric `m`. Given the endpoint's total load for `m`, the ideal
//! instance count lies between `ceil(load / U)` and `ceil(load / L)`.
//! With a strict bound (`L<m<U`) a load that divides exactly moves one
//! instance further: up past `U`, down past `L`.

use std::collections::BTreeMap;

use tracing::warn;

use ringscale_core::Sample;

use crate::criteria::Criteria;

/// Outcome of intersecting every rule's ideal range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdealRange {
    /// No rule produced an opinion (no rules, or no data for any rule).
    Unconstrained,
    /// Rules disagree: `max < min`. Callers freeze the instance count.
    Conflict { min: u64, max: u64 },
    Range { min: u64, max: u64 },
}

impl IdealRange {
    pub fn bounds(&self) -> Option<(u64, u64)> {
        match *self {
            IdealRange::Unconstrained => None,
            IdealRange::Conflict { min, max } | IdealRange::Range { min, max } => Some((min, max)),
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, IdealRange::Range { .. })
    }
}

/// Weighted mean of every metric across the samples that define it.
///
/// A metric absent from a sample is skipped for that sample, not counted as
/// zero. Non-finite values and non-positive weights are dropped with a
/// warning.
pub fn calculate_totals(samples: &[Sample]) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
    for sample in samples {
        for (metric, &(weight, value)) in sample {
            if !weight.is_finite() || !value.is_finite() || weight <= 0.0 {
                warn!(%metric, weight, value, "skipping malformed metric sample");
                continue;
            }
            let entry = sums.entry(metric.as_str()).or_insert((0.0, 0.0));
            entry.0 += weight * value;
            entry.1 += weight;
        }
    }
    sums.into_iter()
        .map(|(metric, (weighted, weight))| (metric.to_string(), weighted / weight))
        .collect()
}

/// Instances needed so that none carries more than `bound`.
pub fn ideal_count(total: f64, bound: f64) -> u64 {
    if total <= 0.0 || bound <= 0.0 || !total.is_finite() {
        return 0;
    }
    let count = (total / bound).ceil();
    if count >= u64::MAX as f64 {
        u64::MAX
    } else {
        count as u64
    }
}

/// Ideal `(min, max)` for one metric. `None` when neither bound is given.
///
/// The returned pair may be inverted; callers treat that as a conflict.
pub fn ideal_range(total: f64, lower: Option<f64>, upper: Option<f64>) -> Option<(u64, u64)> {
    match (lower, upper) {
        (None, None) => None,
        (Some(bound), None) | (None, Some(bound)) => {
            let count = ideal_count(total, bound);
            Some((count, count))
        }
        (Some(lower), Some(upper)) => Some((ideal_count(total, upper), ideal_count(total, lower))),
    }
}

/// Count for one bound of a rule. `ceiling` marks the upper bound.
fn bound_count(total: f64, bound: f64, strict: bool, ceiling: bool) -> u64 {
    let count = ideal_count(total, bound);
    if !strict || count == 0 || (total / bound).fract() != 0.0 {
        return count;
    }
    if ceiling { count.saturating_add(1) } else { count - 1 }
}

/// `ideal_range` honouring the rule's strict comparisons.
pub fn rule_range(total: f64, rule: &Criteria) -> Option<(u64, u64)> {
    let upper = rule.upper.map(|u| bound_count(total, u, rule.upper_strict, true));
    let lower = rule.lower.map(|l| bound_count(total, l, rule.lower_strict, false));
    match (lower, upper) {
        (None, None) => None,
        (Some(count), None) | (None, Some(count)) => Some((count, count)),
        (Some(lower), Some(upper)) => Some((upper, lower)),
    }
}

/// Literal instance bounds of an `instances` rule.
fn instances_range(rule: &Criteria) -> (u64, u64) {
    let min = rule
        .lower
        .map(|l| {
            let l = l.max(0.0);
            if rule.lower_strict { l.floor() + 1.0 } else { l.ceil() }
        })
        .unwrap_or(0.0);
    let max = match rule.upper {
        Some(u) if rule.upper_strict => (u.ceil() - 1.0).max(0.0) as u64,
        Some(u) => u.max(0.0).floor() as u64,
        None => u64::MAX,
    };
    (min as u64, max)
}

/// Intersect every rule's range against precomputed totals.
///
/// `instance_count` is the number of backends whose samples went into
/// `totals`; per-instance averages are scaled back up to endpoint load by
/// it, treating zero as one.
pub fn ideal_uniform(
    rules: &[Criteria],
    totals: &BTreeMap<String, f64>,
    instance_count: usize,
) -> IdealRange {
    let scale = instance_count.max(1) as f64;
    let mut merged: Option<(u64, u64)> = None;

    for rule in rules {
        let (min, max) = if rule.is_instances() {
            instances_range(rule)
        } else {
            let Some(average) = totals.get(&rule.metric) else {
                continue;
            };
            match rule_range(average * scale, rule) {
                Some(range) => range,
                None => continue,
            }
        };
        if min > max {
            return IdealRange::Conflict { min, max };
        }
        merged = Some(match merged {
            Some((lo, hi)) => (lo.max(min), hi.min(max)),
            None => (min, max),
        });
    }

    match merged {
        None => IdealRange::Unconstrained,
        Some((min, max)) if min > max => IdealRange::Conflict { min, max },
        Some((min, max)) => IdealRange::Range { min, max },
    }
}

/// Totals plus intersection in one step, parsing the rule strings.
/// Unparseable rules and rules with a non-positive bound are skipped with
/// a warning.
pub fn calculate_ideal_uniform(
    rules: &[String],
    samples: &[Sample],
    instance_count: usize,
) -> IdealRange {
    let parsed: Vec<Criteria> = rules
        .iter()
        .filter_map(|raw| match Criteria::parse(raw).and_then(|c| c.validate().map(|_| c)) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(rule = %raw, error = %e, "skipping invalid scaling rule");
                None
            }
        })
        .collect();
    let totals = calculate_totals(samples);
    ideal_uniform(&parsed, &totals, instance_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(entries: &[(&str, f64, f64)]) -> Sample {
        entries
            .iter()
            .map(|(m, w, v)| (m.to_string(), (*w, *v)))
            .collect()
    }

    #[test]
    fn test_totals_are_weighted_means() {
        let samples = vec![
            sample(&[("rate", 1.0, 10.0), ("cpu", 1.0, 0.5)]),
            sample(&[("rate", 3.0, 30.0)]),
        ];
        let totals = calculate_totals(&samples);
        assert!((totals["rate"] - 25.0).abs() < 1e-9);
        // Absent from the second sample: not averaged in as zero.
        assert!((totals["cpu"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_totals_skip_malformed() {
        let samples = vec![
            sample(&[("rate", 0.0, 100.0)]),
            sample(&[("rate", 1.0, f64::NAN)]),
            sample(&[("rate", 1.0, 4.0)]),
        ];
        assert_eq!(calculate_totals(&samples)["rate"], 4.0);
        assert!(calculate_totals(&[]).is_empty());
    }

    #[test]
    fn test_ideal_count() {
        assert_eq!(ideal_count(300.0, 50.0), 6);
        assert_eq!(ideal_count(301.0, 50.0), 7);
        assert_eq!(ideal_count(0.0, 50.0), 0);
    }

    #[test]
    fn test_ideal_range_bounds() {
        assert_eq!(ideal_range(300.0, Some(20.0), Some(50.0)), Some((6, 15)));
        assert_eq!(ideal_range(300.0, None, Some(50.0)), Some((6, 6)));
        assert_eq!(ideal_range(300.0, Some(20.0), None), Some((15, 15)));
        assert_eq!(ideal_range(300.0, None, None), None);
        // Inverted bounds surface as an inverted pair.
        assert_eq!(ideal_range(300.0, Some(50.0), Some(20.0)), Some((15, 6)));
    }

    #[test]
    fn test_strict_upper_bound_on_exact_load() {
        let samples = vec![sample(&[("rate", 1.0, 300.0)])];
        // 6 instances would each carry exactly 50, which `<50` excludes.
        assert_eq!(
            calculate_ideal_uniform(&["rate<50".to_string()], &samples, 1),
            IdealRange::Range { min: 7, max: 7 }
        );
        assert_eq!(
            calculate_ideal_uniform(&["rate<=50".to_string()], &samples, 1),
            IdealRange::Range { min: 6, max: 6 }
        );
        // Off the multiple the comparison makes no difference.
        let samples = vec![sample(&[("rate", 1.0, 310.0)])];
        assert_eq!(
            calculate_ideal_uniform(&["rate<50".to_string()], &samples, 1),
            IdealRange::Range { min: 7, max: 7 }
        );
    }

    #[test]
    fn test_strict_lower_bound_on_exact_load() {
        let samples = vec![sample(&[("rate", 1.0, 300.0)])];
        assert_eq!(
            calculate_ideal_uniform(&["20<rate<50".to_string()], &samples, 1),
            IdealRange::Range { min: 7, max: 14 }
        );
        assert_eq!(
            calculate_ideal_uniform(&["20<=rate<=50".to_string()], &samples, 1),
            IdealRange::Range { min: 6, max: 15 }
        );
    }

    #[test]
    fn test_strict_instances_bounds() {
        assert_eq!(
            calculate_ideal_uniform(&["2<instances<6".to_string()], &[], 0),
            IdealRange::Range { min: 3, max: 5 }
        );
        assert_eq!(
            calculate_ideal_uniform(&["1.5<instances<5.5".to_string()], &[], 0),
            IdealRange::Range { min: 2, max: 5 }
        );
    }

    #[test]
    fn test_single_rule_single_sample() {
        let rules = vec!["20<=rate<=50".to_string()];
        let samples = vec![sample(&[("rate", 1.0, 300.0)])];
        assert_eq!(
            calculate_ideal_uniform(&rules, &samples, 1),
            IdealRange::Range { min: 6, max: 15 }
        );
    }

    #[test]
    fn test_average_is_scaled_by_instance_count() {
        let rules = vec!["20<=rate<=50".to_string()];
        let samples = vec![sample(&[("rate", 1.0, 100.0)]), sample(&[("rate", 1.0, 200.0)])];
        // avg 150 * 2 instances = 300 units of load.
        assert_eq!(
            calculate_ideal_uniform(&rules, &samples, 2),
            IdealRange::Range { min: 6, max: 15 }
        );
    }

    #[test]
    fn test_no_rules_or_no_data_is_unconstrained() {
        assert_eq!(calculate_ideal_uniform(&[], &[], 3), IdealRange::Unconstrained);
        let rules = vec!["20<=rate<=50".to_string()];
        assert_eq!(calculate_ideal_uniform(&rules, &[], 3), IdealRange::Unconstrained);
    }

    #[test]
    fn test_conflicting_rules() {
        let rules = vec!["rate<=50".to_string(), "cpu<=0.25".to_string()];
        let samples = vec![sample(&[("rate", 1.0, 100.0), ("cpu", 1.0, 1.0)])];
        // rate wants exactly 2, cpu wants exactly 4.
        assert_eq!(
            calculate_ideal_uniform(&rules, &samples, 1),
            IdealRange::Conflict { min: 4, max: 2 }
        );
    }

    #[test]
    fn test_instances_rule_uses_literal_bounds() {
        let rules = vec!["2<=instances<=6".to_string()];
        assert_eq!(
            calculate_ideal_uniform(&rules, &[], 0),
            IdealRange::Range { min: 2, max: 6 }
        );
        let rules = vec!["2<=instances".to_string(), "20<=rate<=50".to_string()];
        let samples = vec![sample(&[("rate", 1.0, 30.0)])];
        assert_eq!(
            calculate_ideal_uniform(&rules, &samples, 1),
            IdealRange::Range { min: 2, max: 2 }
        );
    }

    #[test]
    fn test_invalid_rules_are_skipped() {
        let rules = vec!["garbage".to_string(), "rate<=0".to_string(), "rate<=50".to_string()];
        let samples = vec![sample(&[("rate", 1.0, 100.0)])];
        assert_eq!(
            calculate_ideal_uniform(&rules, &samples, 1),
            IdealRange::Range { min: 2, max: 2 }
        );
    }

    proptest! {
        #[test]
        fn prop_totals_ignore_order(
            values in prop::collection::vec((0.1f64..10.0, 0.0f64..1000.0), 1..20),
            rotate in 0usize..20,
        ) {
            let samples: Vec<Sample> = values
                .iter()
                .map(|(w, v)| sample(&[("rate", *w, *v)]))
                .collect();
            let mut shuffled = samples.clone();
            let len = shuffled.len();
            shuffled.rotate_left(rotate % len);
            shuffled.reverse();

            let expected = values.iter().map(|(w, v)| w * v).sum::<f64>()
                / values.iter().map(|(w, _)| w).sum::<f64>();
            let a = calculate_totals(&samples)["rate"];
            let b = calculate_totals(&shuffled)["rate"];
            prop_assert!((a - expected).abs() <= 1e-6 * expected.abs().max(1.0));
            prop_assert!((a - b).abs() <= 1e-6 * expected.abs().max(1.0));
        }

        #[test]
        fn prop_ideal_range_is_monotonic(
            total in 0.0f64..10_000.0,
            delta in 0.0f64..10_000.0,
            lower in prop::option::of(0.1f64..500.0),
            upper in prop::option::of(0.1f64..500.0),
        ) {
            let before = ideal_range(total, lower, upper);
            let after = ideal_range(total + delta, lower, upper);
            if let (Some((min_a, max_a)), Some((min_b, max_b))) = (before, after) {
                prop_assert!(min_b >= min_a);
                prop_assert!(max_b >= max_a);
            }
        }
    }
}
