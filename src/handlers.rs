//! Domain-agnostic rewrite handlers.
//!
//! | kind           | parameters                                                        |
//! |----------------|-------------------------------------------------------------------|
//! | `AddNode`      | `type`, `props` (map), `parent`, `edge_type` (default `has`)      |
//! | `AddEdge`      | `src_var` or `src_id`, `dst_var` or `dst_id`, `etype` (default `link`) |
//! | `SetProp`      | `var`, `key`, `value`                                             |
//! | `IncProp`      | `var`, `key`, `delta`                                             |
//! | `DeleteArgMin` | `type`, `key`, `min_keep` (default 0)                             |
//!
//! Every handler clones before it edits and checks the rule's guard predicate
//! for each binding it considers. Descriptions are stable strings such as
//! `IncProp(seg1,length,+0.5,prev=1.000)` so provenance miners can parse them.

use crate::compiler::{match_var_bindings, Binding, HandlerRegistry, RewriteFn, RuleContext, RuleResult};
use crate::core::{Graph, Props, Value};

fn nothing() -> RewriteFn {
    Box::new(|_: &Graph| Vec::new())
}

/// First free id of the form `<type lowercased><n>`, starting at count + 1.
fn fresh_id(graph: &Graph, node_type: &str) -> String {
    let stem = node_type.to_lowercase();
    let mut n = graph.find(node_type).len() + 1;
    loop {
        let candidate = format!("{}{}", stem, n);
        if !graph.has_node(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Adds a node of type `type` with properties `props`, optionally linked from
/// `parent` by `edge_type`. The guard is checked with an empty binding.
pub fn add_node(ctx: RuleContext<'_>) -> RewriteFn {
    let Some(node_type) = ctx.str_param("type") else {
        return nothing();
    };
    let props: Props = match ctx.params.get("props") {
        None | Some(Value::Null) => Props::new(),
        Some(Value::Map(map)) => map.clone(),
        Some(other) => {
            tracing::warn!(rule = ctx.rule_id, value = %other, "AddNode props must be a map");
            Props::new()
        }
    };
    let parent = ctx.str_param("parent");
    let edge_type = ctx.str_param("edge_type").unwrap_or_else(|| "has".to_string());
    let desc = format!("AddNode({},{})", node_type, Value::Map(props.clone()));
    let guard = ctx.guard;

    Box::new(move |g: &Graph| {
        if !guard.check(g, &Binding::new()) {
            return Vec::new();
        }
        let mut ng = g.clone();
        let nid = fresh_id(&ng, &node_type);
        ng.add_node(nid.as_str(), node_type.as_str(), props.clone());
        if let Some(parent) = &parent {
            ng.add_edge(parent.as_str(), edge_type.as_str(), nid.as_str());
        }
        vec![RuleResult::new(ng, desc.clone())]
    })
}

/// Adds an edge `src --etype--> dst`; endpoints come from bound variables or literal ids.
pub fn add_edge(ctx: RuleContext<'_>) -> RewriteFn {
    let src_var = ctx.str_param("src_var");
    let dst_var = ctx.str_param("dst_var");
    let src_id = ctx.str_param("src_id");
    let dst_id = ctx.str_param("dst_id");
    let etype = ctx.str_param("etype").unwrap_or_else(|| "link".to_string());
    let vars = ctx.vars;
    let guard = ctx.guard;

    Box::new(move |g: &Graph| {
        let envs = if src_var.is_some() || dst_var.is_some() {
            match_var_bindings(g, &vars)
        } else {
            vec![Binding::new()]
        };
        let resolve = |env: &Binding, var: &Option<String>, id: &Option<String>| -> Option<String> {
            match var {
                Some(var) => env.get(var).cloned(),
                None => id.clone(),
            }
        };
        let mut out = Vec::new();
        for env in envs {
            let (Some(src), Some(dst)) = (resolve(&env, &src_var, &src_id), resolve(&env, &dst_var, &dst_id)) else {
                continue;
            };
            if src.is_empty() || dst.is_empty() || !guard.check(g, &env) {
                continue;
            }
            let mut ng = g.clone();
            ng.add_edge(src.as_str(), etype.as_str(), dst.as_str());
            out.push(RuleResult::new(ng, format!("AddEdge({},{},{})", src, etype, dst)));
        }
        out
    })
}

/// Sets `key` on the node bound to `var` to the literal `value`.
pub fn set_prop(ctx: RuleContext<'_>) -> RewriteFn {
    let (Some(var), Some(key)) = (ctx.str_param("var"), ctx.str_param("key")) else {
        return nothing();
    };
    let value = ctx.params.get("value").cloned().unwrap_or_default();
    let vars = ctx.vars;
    let guard = ctx.guard;

    Box::new(move |g: &Graph| {
        let mut out = Vec::new();
        for env in match_var_bindings(g, &vars) {
            let Some(x) = env.get(&var) else {
                continue;
            };
            if !guard.check(g, &env) {
                continue;
            }
            let prev = g.prop(x, &key).cloned().unwrap_or_default();
            let mut ng = g.clone();
            ng.set_prop(x, key.as_str(), value.clone());
            out.push(RuleResult::new(ng, format!("SetProp({},{}={},prev={})", x, key, value, prev)));
        }
        out
    })
}

/// Adds `delta` to the numeric property `key` of the node bound to `var`.
/// A missing property counts as `0.0`; a non-numeric one skips the binding.
pub fn inc_prop(ctx: RuleContext<'_>) -> RewriteFn {
    let (Some(var), Some(key)) = (ctx.str_param("var"), ctx.str_param("key")) else {
        return nothing();
    };
    let delta = ctx.f64_param("delta", 0.0);
    let vars = ctx.vars;
    let guard = ctx.guard;

    Box::new(move |g: &Graph| {
        let mut out = Vec::new();
        for env in match_var_bindings(g, &vars) {
            let Some(x) = env.get(&var) else {
                continue;
            };
            if !guard.check(g, &env) {
                continue;
            }
            let prev = match g.prop(x, &key) {
                None => 0.0,
                Some(value) => match value.as_f64() {
                    Some(v) => v,
                    None => continue,
                },
            };
            let mut ng = g.clone();
            ng.set_prop(x, key.as_str(), prev + delta);
            out.push(RuleResult::new(
                ng,
                format!("IncProp({},{},+{},prev={:.3})", x, key, Value::Float(delta), prev),
            ));
        }
        out
    })
}

/// Deletes the node of type `type` with the smallest numeric `key` (missing
/// counts as `0.0`, ties go to the lowest id) together with its incident
/// edges, provided more than `min_keep` such nodes exist. The argmin is
/// offered to the guard as variable `x`.
pub fn delete_arg_min(ctx: RuleContext<'_>) -> RewriteFn {
    let (Some(node_type), Some(key)) = (ctx.str_param("type"), ctx.str_param("key")) else {
        return nothing();
    };
    let min_keep = ctx.usize_param("min_keep", 0);
    let guard = ctx.guard;

    Box::new(move |g: &Graph| {
        let nodes = g.find(&node_type);
        if nodes.len() <= min_keep {
            return Vec::new();
        }
        let weight = |nid: &str| g.prop(nid, &key).and_then(Value::as_f64).unwrap_or(0.0);
        let mut shortest: Option<(&str, f64)> = None;
        for nid in nodes {
            let w = weight(nid);
            if shortest.map_or(true, |(_, best)| w < best) {
                shortest = Some((nid, w));
            }
        }
        let Some((victim, _)) = shortest else {
            return Vec::new();
        };
        let env = Binding::from([("x".to_string(), victim.to_string())]);
        if !guard.check(g, &env) {
            return Vec::new();
        }
        let mut ng = g.clone();
        ng.remove_node(victim);
        vec![RuleResult::new(ng, format!("DeleteArgMin({},{} -> {})", node_type, key, victim))]
    })
}

/// Registry holding the five standard handlers. Domains extend it with
/// [`HandlerRegistry::register`].
pub fn standard_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register("AddNode", add_node)
        .register("AddEdge", add_edge)
        .register("SetProp", set_prop)
        .register("IncProp", inc_prop)
        .register("DeleteArgMin", delete_arg_min);
    registry
}

impl HandlerRegistry {
    /// Shorthand for [`standard_registry`].
    pub fn standard() -> Self {
        standard_registry()
    }
}
