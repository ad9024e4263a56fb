//! Guard synthesis: mine a search trace, propose a guard threshold, and A/B
//! test the edited rule set on a fixed task suite.
//!
//! # Procedure
//! 1. Compile the rule graph.
//! 2. Search the first task and keep its provenance.
//! 3. Mine the provenance and reduce the samples to a threshold (plus margin).
//!    No samples means no proposal.
//! 4. Run the whole suite with the unmodified rules ("before").
//! 5. Upsert the guard onto the target rule.
//! 6. Recompile and run the suite again ("after").
//! 7. Ask the acceptance policy.
//!
//! The rule graph is edited in place before the decision is known. With
//! [`SynthesisConfig::rollback_on_reject`] set, a rejected edit is undone from a
//! snapshot taken just before step 5; otherwise it stays and the caller decides.
//!
//! # Citations
//! - A/B testing of program changes: Kohavi et al., "Controlled experiments on the web" (2009)

use crate::compiler::{compile_rules, CompileError, CompiledRule, HandlerRegistry};
use crate::core::Graph;
use crate::miner::{reduce_threshold, Reducer};
use crate::provenance::{Provenance, ProvenanceStep};
use crate::schema::{upsert_guard, GuardOp};
use crate::search::{search, EvalParams, Evaluator, Metrics, SearchConfig, SearchHooks};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One task of a validation suite: a seed graph and its evaluator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Seed artifact graph.
    pub graph: Graph,
    /// Evaluator parameters.
    pub params: EvalParams,
}

impl Task {
    /// Creates a task.
    pub fn new(graph: Graph, params: EvalParams) -> Self {
        Self { graph, params }
    }
}

/// Which guard to upsert, and how far past the mined threshold to put it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardEditSpec {
    /// Display name of the target rule.
    pub rule_name: String,
    /// Pattern variable the guard inspects.
    pub var: String,
    /// Property key on the bound node.
    pub key: String,
    /// Comparison operator.
    #[serde(default)]
    pub op: GuardOp,
    /// Added to the reduced threshold.
    #[serde(default)]
    pub margin: f64,
}

impl GuardEditSpec {
    /// A `<` guard with zero margin.
    pub fn new(rule_name: impl Into<String>, var: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.into(),
            var: var.into(),
            key: key.into(),
            op: GuardOp::Lt,
            margin: 0.0,
        }
    }

    /// Sets the operator.
    pub fn with_op(mut self, op: GuardOp) -> Self {
        self.op = op;
        self
    }

    /// Sets the margin.
    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }
}

/// Aggregate of one suite run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuiteAggregate {
    /// Tasks whose best result was feasible.
    pub feasible_count: usize,
    /// Mean best cost; `+inf` for an empty run.
    pub avg_cost: f64,
    /// Number of tasks.
    pub n: usize,
}

/// Aggregates per-task best metrics.
pub fn aggregate_metrics(results: &[Metrics]) -> SuiteAggregate {
    if results.is_empty() {
        return SuiteAggregate {
            feasible_count: 0,
            avg_cost: f64::INFINITY,
            n: 0,
        };
    }
    SuiteAggregate {
        feasible_count: results.iter().filter(|m| m.feasible).count(),
        avg_cost: results.iter().map(|m| m.cost).sum::<f64>() / results.len() as f64,
        n: results.len(),
    }
}

/// Searches every task and returns each task's best metrics, in suite order.
pub fn run_task_suite<E>(
    rules: &[CompiledRule],
    evaluator: &E,
    suite: &[Task],
    config: &SearchConfig,
    hooks: &SearchHooks,
) -> Vec<Metrics>
where
    E: Evaluator + ?Sized,
{
    suite
        .iter()
        .map(|task| search(&task.graph, rules, evaluator, &task.params, config, hooks).best_metrics)
        .collect()
}

/// Decides whether an edit is kept, from the before/after aggregates.
pub trait AcceptPolicy {
    /// Returns `true` to accept.
    fn accept(&self, before: &SuiteAggregate, after: &SuiteAggregate) -> bool;
}

impl<F> AcceptPolicy for F
where
    F: Fn(&SuiteAggregate, &SuiteAggregate) -> bool,
{
    fn accept(&self, before: &SuiteAggregate, after: &SuiteAggregate) -> bool {
        self(before, after)
    }
}

/// Accepts when more tasks become feasible, or the average cost drops by at
/// least `min_cost_drop`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarginAcceptPolicy {
    /// Minimum absolute drop in average cost.
    pub min_cost_drop: f64,
}

impl Default for MarginAcceptPolicy {
    fn default() -> Self {
        Self { min_cost_drop: 1.0 }
    }
}

impl AcceptPolicy for MarginAcceptPolicy {
    fn accept(&self, before: &SuiteAggregate, after: &SuiteAggregate) -> bool {
        after.feasible_count > before.feasible_count || after.avg_cost <= before.avg_cost - self.min_cost_drop
    }
}

/// [`MarginAcceptPolicy`] with a margin of 1.0.
pub fn default_accept_policy(before: &SuiteAggregate, after: &SuiteAggregate) -> bool {
    MarginAcceptPolicy::default().accept(before, after)
}

/// Synthesizer settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Threshold reducer.
    pub reducer: Reducer,
    /// Restore the rule graph when the policy rejects the edit.
    pub rollback_on_reject: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            reducer: Reducer::Median,
            rollback_on_reject: true,
        }
    }
}

/// Fatal synthesis failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    /// The task suite was empty.
    #[error("task suite is empty")]
    EmptySuite,
    /// The rule graph failed to compile.
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// No rule carries the target display name, so the guard could not be placed.
    #[error("no rule named `{0}`")]
    RuleNotFound(String),
}

/// A proposal that went through A/B evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardProposal {
    /// Threshold written into the guard.
    pub threshold: f64,
    /// Policy decision.
    pub accepted: bool,
    /// Whether the edit is still in the rule graph.
    pub kept: bool,
    /// Suite aggregate with the original rules.
    pub before: SuiteAggregate,
    /// Suite aggregate with the edited rules.
    pub after: SuiteAggregate,
    /// Trace the threshold was mined from.
    pub provenance: Provenance,
}

/// Result of [`GuardSynthesizer::propose`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProposalOutcome {
    /// The miner found no samples; nothing was edited.
    NoEvidence {
        /// Trace that was mined.
        provenance: Provenance,
    },
    /// A threshold was proposed and evaluated.
    Evaluated(GuardProposal),
}

impl ProposalOutcome {
    /// The evaluated proposal, if any.
    pub fn proposal(&self) -> Option<&GuardProposal> {
        match self {
            ProposalOutcome::Evaluated(p) => Some(p),
            ProposalOutcome::NoEvidence { .. } => None,
        }
    }

    /// Returns `true` if an edit was proposed and accepted.
    pub fn accepted(&self) -> bool {
        self.proposal().map_or(false, |p| p.accepted)
    }

    /// Trace used for mining.
    pub fn provenance(&self) -> &Provenance {
        match self {
            ProposalOutcome::Evaluated(p) => &p.provenance,
            ProposalOutcome::NoEvidence { provenance } => provenance,
        }
    }
}

/// Everything a proposal needs besides the rule graph, suite, miner and edit.
pub struct GuardSynthesizer<'a, E: ?Sized> {
    registry: &'a HandlerRegistry,
    evaluator: &'a E,
    search: &'a SearchConfig,
    hooks: &'a SearchHooks,
    config: SynthesisConfig,
}

impl<'a, E> GuardSynthesizer<'a, E>
where
    E: Evaluator + ?Sized,
{
    /// Creates a synthesizer with the default [`SynthesisConfig`].
    pub fn new(registry: &'a HandlerRegistry, evaluator: &'a E, search: &'a SearchConfig, hooks: &'a SearchHooks) -> Self {
        Self {
            registry,
            evaluator,
            search,
            hooks,
            config: SynthesisConfig::default(),
        }
    }

    /// Overrides the synthesis settings.
    pub fn with_config(mut self, config: SynthesisConfig) -> Self {
        self.config = config;
        self
    }

    /// Like [`GuardSynthesizer::propose`], but takes the task-suite provider
    /// and calls it once, before any search runs.
    ///
    /// # Errors
    /// Same as [`GuardSynthesizer::propose`].
    pub fn propose_with<M, P>(
        &self,
        rule_graph: &mut Graph,
        suite: impl FnOnce() -> Vec<Task>,
        miner: M,
        edit: &GuardEditSpec,
        policy: &P,
    ) -> Result<ProposalOutcome, SynthesisError>
    where
        M: Fn(&[ProvenanceStep]) -> Vec<f64>,
        P: AcceptPolicy + ?Sized,
    {
        let suite = suite();
        self.propose(rule_graph, &suite, miner, edit, policy)
    }

    /// Proposes and A/B tests one guard edit on `rule_graph`.
    ///
    /// `suite` is an already materialized task suite; use
    /// [`GuardSynthesizer::propose_with`] to pass a provider instead.
    ///
    /// # Errors
    /// - [`SynthesisError::Compile`] if the rule graph does not compile.
    /// - [`SynthesisError::EmptySuite`] if `suite` is empty.
    /// - [`SynthesisError::RuleNotFound`] if no rule is named `edit.rule_name`;
    ///   the rule graph is left unchanged.
    pub fn propose<M, P>(
        &self,
        rule_graph: &mut Graph,
        suite: &[Task],
        miner: M,
        edit: &GuardEditSpec,
        policy: &P,
    ) -> Result<ProposalOutcome, SynthesisError>
    where
        M: Fn(&[ProvenanceStep]) -> Vec<f64>,
        P: AcceptPolicy + ?Sized,
    {
        let rules_before = compile_rules(rule_graph, self.registry)?;
        let first = suite.first().ok_or(SynthesisError::EmptySuite)?;

        let provenance = search(
            &first.graph,
            &rules_before,
            self.evaluator,
            &first.params,
            self.search,
            self.hooks,
        )
        .provenance;

        let samples = miner(provenance.steps());
        let Some(threshold) = reduce_threshold(&samples, edit.margin, self.config.reducer) else {
            tracing::info!(rule = %edit.rule_name, "no evidence mined; no guard proposed");
            return Ok(ProposalOutcome::NoEvidence { provenance });
        };

        let before = aggregate_metrics(&run_task_suite(&rules_before, self.evaluator, suite, self.search, self.hooks));

        let snapshot = self.config.rollback_on_reject.then(|| rule_graph.clone());
        if !upsert_guard(rule_graph, &edit.rule_name, &edit.var, &edit.key, edit.op, threshold) {
            return Err(SynthesisError::RuleNotFound(edit.rule_name.clone()));
        }

        let rules_after = match compile_rules(rule_graph, self.registry) {
            Ok(rules) => rules,
            Err(err) => {
                if let Some(snapshot) = snapshot {
                    *rule_graph = snapshot;
                }
                return Err(err.into());
            }
        };
        let after = aggregate_metrics(&run_task_suite(&rules_after, self.evaluator, suite, self.search, self.hooks));

        let accepted = policy.accept(&before, &after);
        let kept = match snapshot {
            Some(snapshot) if !accepted => {
                *rule_graph = snapshot;
                false
            }
            _ => true,
        };

        tracing::info!(
            rule = %edit.rule_name,
            key = %edit.key,
            op = %edit.op,
            threshold,
            accepted,
            kept,
            before_feasible = before.feasible_count,
            after_feasible = after.feasible_count,
            before_avg_cost = before.avg_cost,
            after_avg_cost = after.avg_cost,
            "guard proposal evaluated"
        );

        Ok(ProposalOutcome::Evaluated(GuardProposal {
            threshold,
            accepted,
            kept,
            before,
            after,
            provenance,
        }))
    }
}
