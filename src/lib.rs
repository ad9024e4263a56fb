//! pgrewrite: property-graph rewriting search with rules-as-data and
//! self-tuning guards.
//!
//! This crate provides:
//! - Typed property graphs with canonical, identifier-sensitive signatures.
//! - A schema for storing rule sets as property graphs, and a compiler that
//!   turns them into executable rewrite functions via a handler registry.
//! - A scored beam search with memoized evaluation, novelty scoring and a
//!   provenance trace.
//! - A guard synthesizer that mines the trace for thresholds and A/B tests the
//!   edited rule set on a task suite before keeping it.
//!
//! # Data flow
//!
//! ```text
//! rule graph --compile--> rewrite fns --search--> best graph + provenance
//!      ^                                                   |
//!      +------ upsert guard <-- reduce <-- mine -----------+
//! ```
//!
//! # References
//!
//! - Ehrig et al. "Fundamentals of Algebraic Graph Transformation" (2006)
//! - Habel, Heckel, Taentzer. "Graph grammars with negative application conditions" (1996)
//! - Lowerre. "The HARPY Speech Recognition System" (1976) – beam search
//!
//! # Example
//!
//! ```
//! use pgrewrite::prelude::*;
//! use pgrewrite::props;
//!
//! let mut rules = Graph::new();
//! add_ruleset(&mut rules, DEFAULT_RULE_SET_ID, "demo");
//! add_rule(&mut rules, "R1", "AddSegment", "AddNode", props! {});
//! add_param(&mut rules, "R1", "type", "Segment");
//! add_param(&mut rules, "R1", "props", Value::Map(props! { "length" => 0.9 }));
//!
//! let compiled = compile_rules(&rules, &standard_registry()).unwrap();
//! let mut root = Graph::new();
//! root.add_node("root", "Assembly", props! {});
//! let out = compiled[0].apply(&root);
//! assert_eq!(out.len(), 1);
//! assert_eq!(out[0].graph.find("Segment").len(), 1);
//! ```

pub mod cache;
pub mod compiler;
pub mod core;
pub mod fingerprint;
pub mod handlers;
pub mod miner;
pub mod pipeline;
pub mod provenance;
pub mod schema;
pub mod search;
pub mod synth;

pub use crate::compiler::{compile_rules, CompileError, CompiledRule, HandlerRegistry, RuleResult};
pub use crate::core::{Edge, Graph, GraphFormatError, Node, Props, Value};
pub use crate::fingerprint::HashValue;
pub use crate::search::{search, EvalParams, Evaluator, Metrics, SearchConfig, SearchHooks, SearchOutcome};
pub use crate::synth::{GuardEditSpec, GuardSynthesizer, ProposalOutcome, SynthesisConfig, SynthesisError, Task};

/// Prelude for convenient usage.
pub mod prelude {
    pub use crate::cache::{CacheStats, EvalCache};
    pub use crate::compiler::{
        compile_rules, eval_guard_op, match_var_bindings, Binding, CompileError, CompiledRule, GuardPredicate,
        HandlerRegistry, RewriteFn, RuleContext, RuleResult,
    };
    pub use crate::core::{Edge, Graph, GraphFormatError, Node, Props, Value};
    pub use crate::fingerprint::{graph_signature, HashValue};
    pub use crate::handlers::standard_registry;
    pub use crate::miner::{mine_prev_value, prev_value_miner, reduce_threshold, Reducer};
    pub use crate::pipeline::{run_pipeline, PipelineContext, RunReport};
    pub use crate::provenance::{Provenance, ProvenanceStep};
    pub use crate::schema::{
        add_guard, add_param, add_rule, add_ruleset, add_var, find_rule_by_name, guards, params, pattern_vars,
        rule_names, rules, upsert_guard, GuardOp, GuardSpec, PatternVar, DEFAULT_RULE_SET_ID,
    };
    pub use crate::search::{
        search, DeterministicRng, EvalParams, Evaluator, Metrics, NullEvaluator, SearchConfig, SearchHooks,
        SearchOutcome, SearchStats, Termination,
    };
    pub use crate::synth::{
        aggregate_metrics, default_accept_policy, run_task_suite, AcceptPolicy, GuardEditSpec, GuardProposal,
        GuardSynthesizer, MarginAcceptPolicy, ProposalOutcome, SuiteAggregate, SynthesisConfig, SynthesisError, Task,
    };
}
