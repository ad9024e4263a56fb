//! Provenance miners and threshold reducers.
//!
//! A miner turns a search trace into numeric evidence; a [`Reducer`] collapses
//! that evidence into one guard threshold.

use crate::provenance::ProvenanceStep;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Extracts `prev_key=<number>` from steps whose description reads
/// `rule_name(...prev_key=<number>)`.
///
/// With `require_improvement`, only steps whose `delta_cost` is strictly
/// positive contribute. Unparseable numbers are skipped.
pub fn mine_prev_value(steps: &[ProvenanceStep], rule_name: &str, prev_key: &str, require_improvement: bool) -> Vec<f64> {
    let pattern = format!(
        r"^{}\([^)]*{}=([0-9eE.\-]+)\)",
        regex::escape(rule_name),
        regex::escape(prev_key)
    );
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    let prefix = format!("{}(", rule_name);

    steps
        .iter()
        .filter(|step| step.rule.starts_with(&prefix))
        .filter(|step| !require_improvement || step.delta_cost > 0.0)
        .filter_map(|step| re.captures(&step.rule))
        .filter_map(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .collect()
}

/// Builds a miner closure for [`crate::synth::GuardSynthesizer::propose`].
pub fn prev_value_miner(
    rule_name: impl Into<String>,
    prev_key: impl Into<String>,
    require_improvement: bool,
) -> impl Fn(&[ProvenanceStep]) -> Vec<f64> {
    let rule_name = rule_name.into();
    let prev_key = prev_key.into();
    move |steps: &[ProvenanceStep]| mine_prev_value(steps, &rule_name, &prev_key, require_improvement)
}

/// How samples collapse into a threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    /// Middle sample; even counts average the two middle samples.
    #[default]
    Median,
    /// Arithmetic mean.
    Mean,
}

impl Reducer {
    /// Reduces `samples`, returning `None` when there are none.
    pub fn reduce(&self, samples: &[f64]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        Some(match self {
            Reducer::Mean => samples.iter().sum::<f64>() / samples.len() as f64,
            Reducer::Median => {
                let mut sorted = samples.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
        })
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reducer::Median => "median",
            Reducer::Mean => "mean",
        })
    }
}

/// Error returned when parsing an unknown reducer name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown reducer `{0}`")]
pub struct UnknownReducer(pub String);

impl FromStr for Reducer {
    type Err = UnknownReducer;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "median" => Ok(Reducer::Median),
            "mean" => Ok(Reducer::Mean),
            other => Err(UnknownReducer(other.to_string())),
        }
    }
}

/// Reduces `samples` and adds `margin`. `None` when there are no samples.
pub fn reduce_threshold(samples: &[f64], margin: f64, reducer: Reducer) -> Option<f64> {
    reducer.reduce(samples).map(|t| t + margin)
}
