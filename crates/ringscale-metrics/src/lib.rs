//! ringscale-metrics — the scaling decision math.
//!
//! Pure functions only: parse scaling criteria, fold raw per-backend
//! samples into weighted totals, and turn totals into an ideal instance
//! range. No state, no I/O.

pub mod calculator;
pub mod criteria;

pub use calculator::{
    IdealRange, calculate_ideal_uniform, calculate_totals, ideal_count, ideal_range, ideal_uniform,
    rule_range,
};
pub use criteria::{Criteria, CriteriaError, INSTANCES_METRIC, validate_config, validate_rules};
