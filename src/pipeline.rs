//! End-to-end run: install rules, search a baseline, propose a guard, and
//! re-search when the proposal is accepted.
//!
//! The result is an in-memory [`RunReport`]; writing it anywhere is the
//! caller's job.

use crate::compiler::{compile_rules, HandlerRegistry};
use crate::core::Graph;
use crate::provenance::ProvenanceStep;
use crate::schema::GuardOp;
use crate::search::{search, Evaluator, Metrics, SearchConfig, SearchHooks, SearchOutcome};
use crate::synth::{AcceptPolicy, GuardEditSpec, GuardSynthesizer, ProposalOutcome, SynthesisConfig, SynthesisError, Task};
use serde::{Deserialize, Serialize};

/// Shared collaborators of a pipeline run.
pub struct PipelineContext<'a, E: ?Sized> {
    /// Handler registry used for every compilation.
    pub registry: &'a HandlerRegistry,
    /// Domain evaluator.
    pub evaluator: &'a E,
    /// Search parameters for baseline, suite and re-validation runs.
    pub search: &'a SearchConfig,
    /// Search hooks.
    pub hooks: &'a SearchHooks,
    /// Synthesizer settings.
    pub synthesis: SynthesisConfig,
}

/// Summary of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Rule graph as installed.
    pub rules_before: Graph,
    /// Rule graph after the proposal (identical when rolled back).
    pub rules_after: Graph,
    /// Best artifact of the baseline search.
    pub artifact_before: Graph,
    /// Best metrics of the baseline search.
    pub best_before: Metrics,
    /// Best artifact after an accepted edit, or the baseline again.
    pub artifact_after: Graph,
    /// Best metrics after an accepted edit, or the baseline again.
    pub best_after: Metrics,
    /// Guard proposal result.
    pub proposal: ProposalOutcome,
}

impl RunReport {
    /// Threshold written by an evaluated proposal.
    pub fn derived_threshold(&self) -> Option<f64> {
        self.proposal.proposal().map(|p| p.threshold)
    }

    /// Whether the proposal was accepted.
    pub fn accepted(&self) -> bool {
        self.proposal.accepted()
    }

    /// Pretty JSON rendering.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Runs the full loop.
///
/// 1. `install_rules` seeds the rule graph, which is compiled once to check it.
/// 2. A baseline search runs on `initial`.
/// 3. A guard is proposed and A/B tested on `suite()`.
/// 4. If accepted, the edited rules are recompiled and `initial` is searched again.
///
/// # Errors
/// Propagates [`SynthesisError`], including compilation failures.
pub fn run_pipeline<E, M, P>(
    ctx: &PipelineContext<'_, E>,
    install_rules: impl FnOnce() -> Graph,
    initial: &Task,
    suite: impl FnOnce() -> Vec<Task>,
    miner: M,
    edit: &GuardEditSpec,
    policy: &P,
) -> Result<RunReport, SynthesisError>
where
    E: Evaluator + ?Sized,
    M: Fn(&[ProvenanceStep]) -> Vec<f64>,
    P: AcceptPolicy + ?Sized,
{
    let mut rule_graph = install_rules();
    let rules_before = rule_graph.clone();
    let rules = compile_rules(&rule_graph, ctx.registry)?;
    tracing::info!(rules = rules.len(), "rules installed");

    let baseline = run_search(ctx, &rules, initial);

    let proposal = GuardSynthesizer::new(ctx.registry, ctx.evaluator, ctx.search, ctx.hooks)
        .with_config(ctx.synthesis)
        .propose_with(&mut rule_graph, suite, miner, edit, policy)?;

    let after = if proposal.accepted() {
        let rules = compile_rules(&rule_graph, ctx.registry)?;
        run_search(ctx, &rules, initial)
    } else {
        baseline.clone()
    };

    Ok(RunReport {
        rules_before,
        rules_after: rule_graph,
        artifact_before: baseline.best_graph,
        best_before: baseline.best_metrics,
        artifact_after: after.best_graph,
        best_after: after.best_metrics,
        proposal,
    })
}

fn run_search<E>(ctx: &PipelineContext<'_, E>, rules: &[crate::compiler::CompiledRule], task: &Task) -> SearchOutcome
where
    E: Evaluator + ?Sized,
{
    search(&task.graph, rules, ctx.evaluator, &task.params, ctx.search, ctx.hooks)
}

/// A `<` guard edit with the given margin, the common case for length-style caps.
pub fn upper_bound_edit(rule_name: &str, var: &str, key: &str, margin: f64) -> GuardEditSpec {
    GuardEditSpec::new(rule_name, var, key).with_op(GuardOp::Lt).with_margin(margin)
}
