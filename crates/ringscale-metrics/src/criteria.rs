//! Scaling criteria: `[LOWER<=]METRIC[<=UPPER]`.
//!
//! Either comparison may be strict (`<`): a load that lands exactly on a
//! strict bound counts as past it.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use ringscale_core::{ConfigError, EndpointConfig};

/// Pseudo-metric that bounds the instance count directly.
pub const INSTANCES_METRIC: &str = "instances";

static CRITERIA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?P<lower>[0-9]*\.?[0-9]+)\s*(?P<lower_op><=?)\s*)?(?P<metric>[A-Za-z_][A-Za-z0-9_.:\-]*)\s*(?:(?P<upper_op><=?)\s*(?P<upper>[0-9]*\.?[0-9]+))?\s*$",
    )
    .expect("criteria regex")
});

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CriteriaError {
    #[error("malformed criteria {0:?}")]
    Malformed(String),

    #[error("criteria {0:?} has no bound")]
    Unbounded(String),

    #[error("criteria {criteria:?} bound {bound} must be positive")]
    NonPositiveBound { criteria: String, bound: f64 },
}

/// One parsed scaling rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Criteria {
    pub metric: String,
    /// Per-instance floor: fewer instances when load drops below it.
    pub lower: Option<f64>,
    /// Per-instance ceiling: more instances when load rises above it.
    pub upper: Option<f64>,
    pub lower_strict: bool,
    pub upper_strict: bool,
}

impl Criteria {
    pub fn parse(raw: &str) -> Result<Self, CriteriaError> {
        let caps = CRITERIA_RE
            .captures(raw)
            .ok_or_else(|| CriteriaError::Malformed(raw.to_string()))?;
        let bound = |name: &str| -> Result<Option<f64>, CriteriaError> {
            caps.name(name)
                .map(|m| {
                    m.as_str()
                        .parse::<f64>()
                        .map_err(|_| CriteriaError::Malformed(raw.to_string()))
                })
                .transpose()
        };
        let criteria = Criteria {
            metric: caps["metric"].to_string(),
            lower: bound("lower")?,
            upper: bound("upper")?,
            lower_strict: caps.name("lower_op").is_some_and(|op| op.as_str() == "<"),
            upper_strict: caps.name("upper_op").is_some_and(|op| op.as_str() == "<"),
        };
        if criteria.lower.is_none() && criteria.upper.is_none() {
            return Err(CriteriaError::Unbounded(raw.to_string()));
        }
        Ok(criteria)
    }

    /// Bounds on a real metric divide load, so they must be positive.
    pub fn validate(&self) -> Result<(), CriteriaError> {
        if self.is_instances() {
            return Ok(());
        }
        for bound in [self.lower, self.upper].into_iter().flatten() {
            if bound <= 0.0 {
                return Err(CriteriaError::NonPositiveBound {
                    criteria: self.to_string(),
                    bound,
                });
            }
        }
        Ok(())
    }

    pub fn is_instances(&self) -> bool {
        self.metric == INSTANCES_METRIC
    }
}

impl FromStr for Criteria {
    type Err = CriteriaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Criteria::parse(s)
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(lower) = self.lower {
            let op = if self.lower_strict { "<" } else { "<=" };
            write!(f, "{lower}{op}")?;
        }
        f.write_str(&self.metric)?;
        if let Some(upper) = self.upper {
            let op = if self.upper_strict { "<" } else { "<=" };
            write!(f, "{op}{upper}")?;
        }
        Ok(())
    }
}

/// Check every rule of an endpoint's scaling configuration.
pub fn validate_rules(rules: &[String]) -> Result<Vec<Criteria>, ConfigError> {
    rules
        .iter()
        .map(|rule| {
            Criteria::parse(rule)
                .and_then(|c| c.validate().map(|_| c))
                .map_err(|e| ConfigError::Rule {
                    rule: rule.clone(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

/// Full validation of an endpoint configuration, scaling rules included.
pub fn validate_config(config: &EndpointConfig) -> Result<(), ConfigError> {
    config.validate()?;
    validate_rules(&config.scaling.rules)?;
    Ok(())
}
