//! Compilation of rule graphs into executable rewrite functions.
//!
//! Each `Rule` node is resolved once, at compile time, against a
//! [`HandlerRegistry`] keyed by the rule's `kind` tag. The handler receives the
//! rule's parameters, pattern-variable declarations and compiled guard
//! predicate, and returns a closure the search loop calls directly; no string
//! dispatch happens inside the search.
//!
//! # Guard semantics
//! Guards of one rule are combined with logical AND. A guard fails closed: an
//! unbound variable, a missing node, an ill-typed comparison or an unsupported
//! operator all make the whole predicate false. Guards never panic and never
//! return errors.
//!
//! # Citations
//! - Application conditions: Habel, Heckel & Taentzer, "Graph grammars with negative application conditions" (1996)
//! - Rule-based rewriting: Baader & Nipkow, "Term Rewriting and All That" (1998)

use crate::core::{Graph, Value};
use crate::schema::{self, GuardOp, GuardSpec, PatternVar};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Assignment of pattern-variable names to node ids.
pub type Binding = BTreeMap<String, String>;

/// One candidate produced by a rewrite: the new graph and a provenance string.
#[derive(Debug, Clone)]
pub struct RuleResult {
    /// Rewritten clone of the input graph.
    pub graph: Graph,
    /// Human-readable description of the rewrite, e.g. `SetProp(seg1,material=steel,prev=aluminum)`.
    pub desc: String,
}

impl RuleResult {
    /// Creates a new result.
    pub fn new(graph: Graph, desc: impl Into<String>) -> Self {
        Self {
            graph,
            desc: desc.into(),
        }
    }
}

/// An executable rewrite. Must not mutate its input; it works on clones.
pub type RewriteFn = Box<dyn Fn(&Graph) -> Vec<RuleResult> + Send + Sync>;

/// A rule compiled from the rule graph.
pub struct CompiledRule {
    /// Id of the `Rule` node it came from.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Kind tag it was dispatched on.
    pub kind: String,
    rewrite: RewriteFn,
}

impl CompiledRule {
    /// Wraps a rewrite function.
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>, rewrite: RewriteFn) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            rewrite,
        }
    }

    /// Applies the rule to `graph`, returning zero or more candidates.
    #[inline]
    pub fn apply(&self, graph: &Graph) -> Vec<RuleResult> {
        (self.rewrite)(graph)
    }
}

impl fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        _ => lhs.as_f64()?.partial_cmp(&rhs.as_f64()?),
    }
}

fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => lhs == rhs,
    }
}

fn contains(lhs: &Value, rhs: &Value) -> Option<bool> {
    match rhs {
        Value::List(items) => Some(items.iter().any(|item| loose_eq(lhs, item))),
        Value::Map(map) => lhs.as_str().map(|key| map.contains_key(key)),
        Value::Str(haystack) => lhs.as_str().map(|needle| haystack.contains(needle)),
        _ => None,
    }
}

/// Evaluates `lhs <op> rhs`. `None` signals an ill-typed comparison.
pub fn eval_guard_op(lhs: &Value, op: GuardOp, rhs: &Value) -> Option<bool> {
    Some(match op {
        GuardOp::Lt => compare(lhs, rhs)? == Ordering::Less,
        GuardOp::Le => compare(lhs, rhs)? != Ordering::Greater,
        GuardOp::Gt => compare(lhs, rhs)? == Ordering::Greater,
        GuardOp::Ge => compare(lhs, rhs)? != Ordering::Less,
        GuardOp::Eq => loose_eq(lhs, rhs),
        GuardOp::Ne => !loose_eq(lhs, rhs),
        GuardOp::In => contains(lhs, rhs)?,
        GuardOp::NotIn => !contains(lhs, rhs)?,
        GuardOp::Exists => lhs.is_truthy(),
    })
}

#[derive(Debug, Clone)]
struct CompiledGuard {
    var: Option<String>,
    key: String,
    /// `None` when the stored operator is unsupported; such a guard always fails.
    op: Option<GuardOp>,
    value: Value,
}

impl CompiledGuard {
    fn check(&self, graph: &Graph, env: &Binding) -> bool {
        let Some(op) = self.op else {
            return false;
        };
        let null = Value::Null;
        let lhs = match &self.var {
            None => &null,
            Some(var) => {
                let Some(nid) = env.get(var) else {
                    return false;
                };
                let Some(props) = graph.props(nid) else {
                    return false;
                };
                props.get(&self.key).unwrap_or(&null)
            }
        };
        eval_guard_op(lhs, op, &self.value).unwrap_or(false)
    }
}

/// Conjunction of a rule's guards.
#[derive(Debug, Clone, Default)]
pub struct GuardPredicate {
    guards: Vec<CompiledGuard>,
}

impl GuardPredicate {
    /// A predicate that always passes.
    pub fn always() -> Self {
        Self::default()
    }

    /// Compiles guard specs read from the rule graph.
    pub fn compile(specs: &[GuardSpec]) -> Self {
        let guards = specs
            .iter()
            .map(|spec| {
                let op = match spec.op.parse::<GuardOp>() {
                    Ok(op) => Some(op),
                    Err(err) => {
                        tracing::warn!(key = %spec.key, error = %err, "guard compiled to fail-closed");
                        None
                    }
                };
                CompiledGuard {
                    var: spec.var.clone(),
                    key: spec.key.clone(),
                    op,
                    value: spec.value.clone(),
                }
            })
            .collect();
        Self { guards }
    }

    /// Returns `true` when there are no guards.
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Number of atomic guards.
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Evaluates every guard against `graph` under `env`.
    pub fn check(&self, graph: &Graph, env: &Binding) -> bool {
        self.guards.iter().all(|guard| guard.check(graph, env))
    }
}

// ---------------------------------------------------------------------------
// Pattern-variable binding
// ---------------------------------------------------------------------------

/// Enumerates bindings for `vars` over `graph`.
///
/// Each variable ranges over the nodes of its required type (in id order); the
/// product is constrained so no node is bound to two variables. Returns a
/// single empty binding when `vars` is empty, and no bindings when any
/// declaration is incomplete or has no candidates.
pub fn match_var_bindings(graph: &Graph, vars: &[PatternVar]) -> Vec<Binding> {
    let mut pools: Vec<(&str, Vec<&str>)> = Vec::with_capacity(vars.len());
    for decl in vars {
        if decl.var.is_empty() || decl.node_type.is_empty() {
            return Vec::new();
        }
        let candidates = graph.find(&decl.node_type);
        if candidates.is_empty() {
            return Vec::new();
        }
        pools.push((decl.var.as_str(), candidates));
    }

    let mut envs: Vec<Binding> = vec![Binding::new()];
    for (var, candidates) in pools {
        let mut next = Vec::with_capacity(envs.len() * candidates.len());
        for env in &envs {
            for nid in &candidates {
                if env.values().any(|bound| bound == nid) {
                    continue;
                }
                let mut extended = env.clone();
                extended.insert(var.to_string(), nid.to_string());
                next.push(extended);
            }
        }
        envs = next;
        if envs.is_empty() {
            break;
        }
    }
    envs
}

// ---------------------------------------------------------------------------
// Handler registry
// ---------------------------------------------------------------------------

/// Everything a handler needs to build one rule's rewrite function.
#[derive(Debug, Clone)]
pub struct RuleContext<'a> {
    /// The full rule graph.
    pub rule_graph: &'a Graph,
    /// Id of the rule being compiled.
    pub rule_id: &'a str,
    /// Resolved parameters.
    pub params: BTreeMap<String, Value>,
    /// Pattern-variable declarations.
    pub vars: Vec<PatternVar>,
    /// Compiled guard predicate.
    pub guard: GuardPredicate,
}

impl RuleContext<'_> {
    /// Reads a string parameter.
    pub fn str_param(&self, key: &str) -> Option<String> {
        match self.params.get(key)? {
            Value::Str(s) => Some(s.clone()),
            other => {
                tracing::warn!(rule = self.rule_id, key, value = %other, "expected string parameter");
                None
            }
        }
    }

    /// Reads a numeric parameter, falling back to `default` when absent or ill-typed.
    pub fn f64_param(&self, key: &str, default: f64) -> f64 {
        match self.params.get(key) {
            None => default,
            Some(value) => value.as_f64().unwrap_or_else(|| {
                tracing::warn!(rule = self.rule_id, key, value = %value, "expected numeric parameter");
                default
            }),
        }
    }

    /// Reads a non-negative integer parameter, falling back to `default`.
    pub fn usize_param(&self, key: &str, default: usize) -> usize {
        match self.params.get(key) {
            None => default,
            Some(value) => match value.as_i64() {
                Some(n) if n >= 0 => n as usize,
                _ => {
                    tracing::warn!(rule = self.rule_id, key, value = %value, "expected non-negative integer parameter");
                    default
                }
            },
        }
    }

    /// Returns `true` if a pattern variable named `var` is declared.
    pub fn declares(&self, var: &str) -> bool {
        self.vars.iter().any(|decl| decl.var == var)
    }
}

/// Builds a rule's rewrite function from its [`RuleContext`].
pub type Handler = Box<dyn Fn(RuleContext<'_>) -> RewriteFn + Send + Sync>;

/// Mapping from rule `kind` to handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the handler for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(RuleContext<'_>) -> RewriteFn + Send + Sync + 'static,
    {
        self.handlers.insert(kind.into(), Box::new(handler));
        self
    }

    /// Looks up the handler for `kind`.
    pub fn get(&self, kind: &str) -> Option<&Handler> {
        self.handlers.get(kind)
    }

    /// Returns `true` if `kind` has a handler.
    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry").field("kinds", &self.kinds()).finish()
    }
}

/// Configuration errors raised while compiling a rule graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A rule's kind has no registered handler.
    #[error("no handler registered for kind `{kind}` (rule `{rule}`)")]
    UnknownKind {
        /// The unrecognized kind tag.
        kind: String,
        /// Rule node id.
        rule: String,
    },
    /// A rule node carries no `kind` property.
    #[error("rule `{rule}` has no kind")]
    MissingKind {
        /// Rule node id.
        rule: String,
    },
}

/// Compiles every `Rule` node of `rule_graph`, in rule-id order.
///
/// # Errors
/// Fails fast with [`CompileError`] on the first rule whose kind is missing or
/// unregistered.
pub fn compile_rules(rule_graph: &Graph, registry: &HandlerRegistry) -> Result<Vec<CompiledRule>, CompileError> {
    let mut compiled = Vec::new();
    for info in schema::rules(rule_graph) {
        let kind = info.kind.ok_or_else(|| CompileError::MissingKind {
            rule: info.id.to_string(),
        })?;
        let handler = registry.get(kind).ok_or_else(|| CompileError::UnknownKind {
            kind: kind.to_string(),
            rule: info.id.to_string(),
        })?;

        let ctx = RuleContext {
            rule_graph,
            rule_id: info.id,
            params: schema::params(rule_graph, info.id),
            vars: schema::pattern_vars(rule_graph, info.id),
            guard: GuardPredicate::compile(&schema::guards(rule_graph, info.id)),
        };
        let rewrite = handler(ctx);
        compiled.push(CompiledRule::new(info.id, info.name.unwrap_or(info.id), kind, rewrite));
    }
    tracing::debug!(rules = compiled.len(), "compiled rule graph");
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props;
    use crate::schema::{add_guard, add_rule, add_ruleset, add_var, DEFAULT_RULE_SET_ID};

    fn segments(n: usize) -> Graph {
        let mut g = Graph::new();
        for i in 1..=n {
            g.add_node(format!("seg{}", i), "Segment", props! { "length" => i as f64 });
        }
        g
    }

    fn env(pairs: &[(&str, &str)]) -> Binding {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_guard_ops() {
        let one = Value::Float(1.0);
        assert_eq!(eval_guard_op(&one, GuardOp::Lt, &Value::Int(2)), Some(true));
        assert_eq!(eval_guard_op(&one, GuardOp::Le, &Value::Float(1.0)), Some(true));
        assert_eq!(eval_guard_op(&one, GuardOp::Gt, &Value::Float(1.0)), Some(false));
        assert_eq!(eval_guard_op(&one, GuardOp::Ge, &Value::Float(0.5)), Some(true));
        assert_eq!(eval_guard_op(&one, GuardOp::Eq, &Value::Int(1)), Some(true));
        assert_eq!(eval_guard_op(&one, GuardOp::Ne, &Value::from("1")), Some(true));
        let mats = Value::List(vec!["steel".into(), "aluminum".into()]);
        assert_eq!(eval_guard_op(&"steel".into(), GuardOp::In, &mats), Some(true));
        assert_eq!(eval_guard_op(&"wood".into(), GuardOp::NotIn, &mats), Some(true));
        assert_eq!(eval_guard_op(&Value::Null, GuardOp::Exists, &Value::Null), Some(false));
        assert_eq!(eval_guard_op(&Value::Int(3), GuardOp::Exists, &Value::Null), Some(true));
    }

    #[test]
    fn test_guard_ops_ill_typed() {
        assert_eq!(eval_guard_op(&Value::Null, GuardOp::Lt, &Value::Float(1.0)), None);
        assert_eq!(eval_guard_op(&Value::from("a"), GuardOp::Gt, &Value::Int(1)), None);
        assert_eq!(eval_guard_op(&Value::Int(1), GuardOp::In, &Value::Int(1)), None);
    }

    #[test]
    fn test_empty_predicate_passes() {
        let g = Graph::new();
        assert!(GuardPredicate::always().check(&g, &Binding::new()));
    }

    #[test]
    fn test_guard_fail_closed_unbound_variable() {
        let g = segments(1);
        let pred = GuardPredicate::compile(&[GuardSpec::new("x", "length", GuardOp::Lt, 5.0)]);
        assert!(!pred.check(&g, &Binding::new()));
        assert!(pred.check(&g, &env(&[("x", "seg1")])));
    }

    #[test]
    fn test_guard_fail_closed_missing_node() {
        let g = segments(1);
        let pred = GuardPredicate::compile(&[GuardSpec::new("x", "length", GuardOp::Lt, 5.0)]);
        assert!(!pred.check(&g, &env(&[("x", "ghost")])));
    }

    #[test]
    fn test_guard_fail_closed_type_error_and_bad_op() {
        let g = segments(1);
        let wrong_type = GuardPredicate::compile(&[GuardSpec::new("x", "length", GuardOp::Lt, "long")]);
        assert!(!wrong_type.check(&g, &env(&[("x", "seg1")])));

        let mut bad = GuardSpec::new("x", "length", GuardOp::Lt, 5.0);
        bad.op = "~".to_string();
        let bad_op = GuardPredicate::compile(&[bad]);
        assert!(!bad_op.check(&g, &env(&[("x", "seg1")])));
    }

    #[test]
    fn test_guards_are_conjunctive() {
        let g = segments(2);
        let pred = GuardPredicate::compile(&[
            GuardSpec::new("x", "length", GuardOp::Gt, 0.5),
            GuardSpec::new("x", "length", GuardOp::Lt, 1.5),
        ]);
        assert!(pred.check(&g, &env(&[("x", "seg1")])));
        assert!(!pred.check(&g, &env(&[("x", "seg2")])));
    }

    #[test]
    fn test_bindings_no_reuse() {
        let g = segments(3);
        let vars = vec![
            PatternVar { var: "a".into(), node_type: "Segment".into() },
            PatternVar { var: "b".into(), node_type: "Segment".into() },
        ];
        let envs = match_var_bindings(&g, &vars);
        assert_eq!(envs.len(), 6);
        for e in &envs {
            assert_ne!(e["a"], e["b"]);
        }
    }

    #[test]
    fn test_bindings_empty_candidates() {
        let g = segments(2);
        let vars = vec![
            PatternVar { var: "a".into(), node_type: "Segment".into() },
            PatternVar { var: "j".into(), node_type: "Joint".into() },
        ];
        assert!(match_var_bindings(&g, &vars).is_empty());
        assert_eq!(match_var_bindings(&g, &[]), vec![Binding::new()]);
    }

    #[test]
    fn test_bindings_exhausted_by_distinctness() {
        let g = segments(1);
        let vars = vec![
            PatternVar { var: "a".into(), node_type: "Segment".into() },
            PatternVar { var: "b".into(), node_type: "Segment".into() },
        ];
        assert!(match_var_bindings(&g, &vars).is_empty());
    }

    fn noop_registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register("Noop", |ctx: RuleContext<'_>| -> RewriteFn {
            let guard = ctx.guard;
            let vars = ctx.vars;
            Box::new(move |g: &Graph| {
                match_var_bindings(g, &vars)
                    .into_iter()
                    .filter(|env| guard.check(g, env))
                    .map(|env| RuleResult::new(g.clone(), format!("Noop({:?})", env)))
                    .collect()
            })
        });
        registry
    }

    #[test]
    fn test_compile_unknown_kind_fails_fast() {
        let mut rg = Graph::new();
        add_ruleset(&mut rg, DEFAULT_RULE_SET_ID, "t");
        add_rule(&mut rg, "R1", "Mystery", "Mystery", props! {});
        let err = compile_rules(&rg, &noop_registry()).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownKind {
                kind: "Mystery".into(),
                rule: "R1".into()
            }
        );
    }

    #[test]
    fn test_compile_missing_kind() {
        let mut rg = Graph::new();
        rg.add_node("R1", schema::RULE, props! { "name" => "Bare" });
        let err = compile_rules(&rg, &noop_registry()).unwrap_err();
        assert_eq!(err, CompileError::MissingKind { rule: "R1".into() });
    }

    #[test]
    fn test_compile_wires_guards_and_vars() {
        let mut rg = Graph::new();
        add_ruleset(&mut rg, DEFAULT_RULE_SET_ID, "t");
        add_rule(&mut rg, "R1", "ShortOnly", "Noop", props! {});
        add_var(&mut rg, "R1", "x", "Segment");
        add_guard(&mut rg, "R1", &GuardSpec::new("x", "length", GuardOp::Lt, 2.5));

        let rules = compile_rules(&rg, &noop_registry()).expect("compile");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "ShortOnly");
        let out = rules[0].apply(&segments(3));
        assert_eq!(out.len(), 2);
    }
}
