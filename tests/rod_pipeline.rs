//! End-to-end run on a toy rod domain: segments with length, thickness and
//! material, a load to carry, and a target total length.

use approx::assert_relative_eq;
use pgrewrite::compiler::{match_var_bindings, RewriteFn, RuleContext};
use pgrewrite::prelude::*;
use pgrewrite::props;

const TARGET_LENGTH: f64 = 4.0;
const STRESS_LIMIT: f64 = 1.0;
const PENALTY: f64 = 30.0;

fn material(name: &str) -> (f64, f64) {
    match name {
        "steel" => (2.6, 2.2),
        _ => (1.0, 1.0),
    }
}

struct RodEvaluator;

impl Evaluator for RodEvaluator {
    fn evaluate(&self, graph: &Graph, params: &EvalParams) -> Metrics {
        let load = params.f64_or("load", 10.0);
        let segments = graph.find("Segment");
        let (mut length, mut weight, mut strength) = (0.0, 0.0, 0.0);
        for nid in &segments {
            let num = |key: &str| graph.prop(nid, key).and_then(Value::as_f64).unwrap_or(0.0);
            let (l, t) = (num("length"), num("thickness"));
            let (density, unit_strength) = material(graph.prop(nid, "material").and_then(Value::as_str).unwrap_or("aluminum"));
            length += l;
            weight += l * t * density;
            strength += t * unit_strength;
        }
        let stress = load / strength.max(1e-6);
        let feasible = length >= TARGET_LENGTH && stress <= STRESS_LIMIT;
        let penalty = PENALTY * (TARGET_LENGTH - length).max(0.0) + PENALTY * (stress - STRESS_LIMIT).max(0.0);
        let cost = weight + 0.5 * stress + 0.05 * segments.len() as f64 + penalty;
        Metrics::new(cost, feasible)
            .with_extra("length", length)
            .with_extra("stress", stress)
            .with_extra("weight", weight)
    }
}

/// Domain handler: lengthens the bound segment and records `prevL` for mining.
fn increase_length(ctx: RuleContext<'_>) -> RewriteFn {
    let delta = ctx.f64_param("delta", 0.5);
    let vars = ctx.vars;
    let guard = ctx.guard;
    Box::new(move |g: &Graph| {
        let mut out = Vec::new();
        for env in match_var_bindings(g, &vars) {
            let Some(x) = env.get("x") else {
                continue;
            };
            if !guard.check(g, &env) {
                continue;
            }
            let Some(prev) = g.prop(x, "length").and_then(Value::as_f64) else {
                continue;
            };
            let mut ng = g.clone();
            ng.set_prop(x, "length", prev + delta);
            out.push(RuleResult::new(ng, format!("IncreaseLength({},+{},prevL={:.3})", x, delta, prev)));
        }
        out
    })
}

fn rod_registry() -> HandlerRegistry {
    let mut registry = standard_registry();
    registry.register("IncreaseLength", increase_length);
    registry
}

fn install_rules_rod() -> Graph {
    let mut rg = Graph::new();
    add_ruleset(&mut rg, DEFAULT_RULE_SET_ID, "rod-default");

    add_rule(&mut rg, "R1", "AddSegment", "AddNode", props! {});
    add_param(&mut rg, "R1", "type", "Segment");
    add_param(&mut rg, "R1", "parent", "rod");
    add_param(
        &mut rg,
        "R1",
        "props",
        Value::Map(props! { "length" => 0.9, "thickness" => 0.8, "material" => "aluminum" }),
    );

    add_rule(&mut rg, "R2", "IncreaseLength", "IncreaseLength", props! {});
    add_param(&mut rg, "R2", "delta", 0.7);
    add_var(&mut rg, "R2", "x", "Segment");

    add_rule(&mut rg, "R3", "IncreaseThickness", "IncProp", props! {});
    add_param(&mut rg, "R3", "var", "x");
    add_param(&mut rg, "R3", "key", "thickness");
    add_param(&mut rg, "R3", "delta", 0.35);
    add_var(&mut rg, "R3", "x", "Segment");

    add_rule(&mut rg, "R4", "MakeSteel", "SetProp", props! {});
    add_param(&mut rg, "R4", "var", "x");
    add_param(&mut rg, "R4", "key", "material");
    add_param(&mut rg, "R4", "value", "steel");
    add_var(&mut rg, "R4", "x", "Segment");
    add_guard(&mut rg, "R4", &GuardSpec::new("x", "material", GuardOp::Ne, "steel"));

    add_rule(&mut rg, "R5", "RemoveShortest", "DeleteArgMin", props! {});
    add_param(&mut rg, "R5", "type", "Segment");
    add_param(&mut rg, "R5", "key", "length");
    add_param(&mut rg, "R5", "min_keep", 1);

    rg
}

fn make_rod(length: f64, thickness: f64, material: &str) -> Graph {
    let mut g = Graph::new();
    g.add_node("rod", "Assembly", props! { "name" => "rod-1" });
    g.add_node(
        "seg1",
        "Segment",
        props! { "length" => length, "thickness" => thickness, "material" => material },
    );
    g.add_edge("rod", "has", "seg1");
    g
}

fn load(value: f64) -> EvalParams {
    EvalParams::new().with("load", value)
}

fn golden_suite() -> Vec<Task> {
    vec![
        Task::new(make_rod(1.0, 0.8, "aluminum"), load(10.0)),
        Task::new(make_rod(1.2, 0.7, "aluminum"), load(9.0)),
        Task::new(make_rod(0.8, 0.9, "steel"), load(11.0)),
        Task::new(make_rod(1.5, 0.6, "aluminum"), load(10.0)),
    ]
}

fn search_config() -> SearchConfig {
    SearchConfig {
        iters: 40,
        beam_width: 8,
        ..SearchConfig::default()
    }
    .with_seed(7)
}

/// Total rod length at every step that lowered the cost.
///
/// The rod search mostly grows by adding segments and switching material, so
/// `IncreaseLength` rarely tops the beam; the length metric is always there.
fn improving_total_lengths(steps: &[ProvenanceStep]) -> Vec<f64> {
    steps
        .iter()
        .filter(|step| step.delta_cost > 0.0)
        .filter_map(|step| step.metrics.extras.get("length").and_then(Value::as_f64))
        .collect()
}

fn run(registry: &HandlerRegistry, config: &SearchConfig, hooks: &SearchHooks) -> RunReport {
    let ctx = PipelineContext {
        registry,
        evaluator: &RodEvaluator,
        search: config,
        hooks,
        synthesis: SynthesisConfig::default(),
    };
    let edit = GuardEditSpec::new("IncreaseLength", "x", "length")
        .with_op(GuardOp::Lt)
        .with_margin(0.05);
    run_pipeline(
        &ctx,
        install_rules_rod,
        &Task::new(make_rod(1.0, 0.8, "aluminum"), load(10.0)),
        golden_suite,
        improving_total_lengths,
        &edit,
        &default_accept_policy,
    )
    .expect("rod pipeline")
}

#[test]
fn test_rod_evaluator_initial_cost() {
    let m = RodEvaluator.evaluate(&make_rod(1.0, 0.8, "aluminum"), &load(10.0));
    // weight 0.8, stress 12.5, one segment, length gap 3.0, stress excess 11.5
    assert_relative_eq!(m.cost, 0.8 + 6.25 + 0.05 + 90.0 + 345.0, epsilon = 1e-9);
    assert!(!m.feasible);
    assert_relative_eq!(m.extras["stress"].as_f64().unwrap(), 12.5, epsilon = 1e-12);
}

#[test]
fn test_rod_rules_compile_with_domain_handler() {
    let registry = rod_registry();
    let rules = compile_rules(&install_rules_rod(), &registry).expect("compile");
    assert_eq!(rules.len(), 5);

    let err = compile_rules(&install_rules_rod(), &standard_registry()).unwrap_err();
    assert!(matches!(err, CompileError::UnknownKind { ref kind, .. } if kind == "IncreaseLength"));

    let rod = make_rod(1.0, 0.8, "aluminum");
    let lengthen = rules.iter().find(|r| r.name == "IncreaseLength").unwrap();
    let out = lengthen.apply(&rod);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].desc, "IncreaseLength(seg1,+0.7,prevL=1.000)");

    let add = rules.iter().find(|r| r.name == "AddSegment").unwrap();
    let grown = &add.apply(&rod)[0].graph;
    assert_eq!(grown.neighbors("rod", Some("has")), vec!["seg1", "segment2"]);

    // A single segment is never removed, and steel is never re-steeled.
    let remove = rules.iter().find(|r| r.name == "RemoveShortest").unwrap();
    assert!(remove.apply(&rod).is_empty());
    let steel = rules.iter().find(|r| r.name == "MakeSteel").unwrap();
    assert!(steel.apply(&make_rod(1.0, 0.8, "steel")).is_empty());
}

#[test]
fn test_rod_search_improves_on_seed() {
    let registry = rod_registry();
    let rules = compile_rules(&install_rules_rod(), &registry).expect("compile");
    let task = &golden_suite()[0];
    let initial = RodEvaluator.evaluate(&task.graph, &task.params);

    let out = search(
        &task.graph,
        &rules,
        &RodEvaluator,
        &task.params,
        &search_config(),
        &SearchHooks::default(),
    );
    assert!(out.best_metrics.cost < initial.cost);
    assert_eq!(out.provenance.steps()[0].rule, "init");
    assert!(out.stats.cache.entries >= out.stats.iterations);
    assert_eq!(task.graph, make_rod(1.0, 0.8, "aluminum"));
}

#[test]
fn test_rod_pipeline_report() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let registry = rod_registry();
    let config = search_config();
    let hooks = SearchHooks::default();
    let report = run(&registry, &config, &hooks);

    assert_eq!(report.rules_before, install_rules_rod());
    assert_eq!(report.proposal.provenance().steps()[0].rule, "init");

    // The first search step always lowers the cost, so there is evidence to mine.
    let samples = improving_total_lengths(report.proposal.provenance().steps());
    assert!(!samples.is_empty());
    let p = report.proposal.proposal().expect("guard proposal evaluated");
    assert_relative_eq!(p.threshold, Reducer::Median.reduce(&samples).unwrap() + 0.05, epsilon = 1e-12);
    assert_eq!(p.before.n, 4);
    assert_eq!(p.after.n, 4);

    if p.accepted {
        assert!(p.kept);
        let guards = guards(&report.rules_after, "R2");
        assert_eq!(guards.len(), 1);
        assert_eq!(guards[0].op, "<");
        assert_eq!(guards[0].value.as_f64(), Some(p.threshold));
        assert!(p.after.feasible_count > p.before.feasible_count || p.after.avg_cost <= p.before.avg_cost - 1.0);
    } else {
        assert!(!p.kept);
        assert_eq!(report.rules_after, report.rules_before);
        assert_eq!(report.best_after, report.best_before);
    }

    // Fixed seed, fixed rule order: the whole run is reproducible.
    let again = run(&registry, &config, &hooks);
    assert_eq!(again.proposal, report.proposal);
    assert_eq!(again.artifact_after, report.artifact_after);

    let text = report.to_json_pretty().expect("json");
    let parsed: RunReport = serde_json::from_str(&text).expect("parse");
    assert_eq!(parsed.rules_after, report.rules_after);
}

#[test]
fn test_tight_length_guard_blocks_lengthening() {
    let mut rg = install_rules_rod();
    assert!(upsert_guard(&mut rg, "IncreaseLength", "x", "length", GuardOp::Lt, 1.0));
    let rules = compile_rules(&rg, &rod_registry()).expect("compile");
    let lengthen = rules.iter().find(|r| r.name == "IncreaseLength").unwrap();
    assert!(lengthen.apply(&make_rod(1.0, 0.8, "aluminum")).is_empty());
    assert_eq!(lengthen.apply(&make_rod(0.9, 0.8, "aluminum")).len(), 1);
}
