//! Search provenance: the ordered trace of applied rewrites.
//!
//! One [`Provenance`] is produced per search call. The first step is always
//! `init`, followed by the top beam candidate of every iteration. Steps are
//! append-only and read-only once the search returns.
//!
//! # Citations
//! - Transformation traces: Jouault & Kurtev, "Transforming models with ATL" (2005)

use crate::search::Metrics;
use serde::{Deserialize, Serialize};

/// One logged step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceStep {
    /// Description of the rewrite that produced this state (`"init"` for the seed).
    pub rule: String,
    /// Metrics of the resulting state.
    pub metrics: Metrics,
    /// Previous step's cost minus this step's cost; positive means improvement.
    /// Zero for the first step.
    pub delta_cost: f64,
}

impl ProvenanceStep {
    /// Rule name: the description up to its first `(`.
    pub fn rule_name(&self) -> &str {
        self.rule.split('(').next().unwrap_or(&self.rule)
    }
}

/// Append-only log of search steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    steps: Vec<ProvenanceStep>,
}

impl Provenance {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step, deriving its `delta_cost` from the previous one.
    pub fn log(&mut self, desc: impl Into<String>, metrics: &Metrics) {
        let delta_cost = self
            .steps
            .last()
            .map_or(0.0, |prev| prev.metrics.cost - metrics.cost);
        self.steps.push(ProvenanceStep {
            rule: desc.into(),
            metrics: metrics.clone(),
            delta_cost,
        });
    }

    /// All steps in order.
    pub fn steps(&self) -> &[ProvenanceStep] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Human-readable export: `Step i: <rule>` followed by the metrics as
    /// pretty JSON, one blank line between steps.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("Step {}: {}\n", i + 1, step.rule));
            let metrics = serde_json::to_string_pretty(&step.metrics).unwrap_or_else(|_| "{}".to_string());
            out.push_str(&metrics);
            out.push_str("\n\n");
        }
        out
    }

    /// Serializes the steps as a JSON array.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.steps)
    }
}
