//! Encoding of rule sets as property graphs.
//!
//! Rules are data: a rule set is an ordinary [`Graph`] whose node type tags act
//! as the discriminator.
//!
//! ```text
//! RuleSet --has_rule--> Rule --has_param--> Param       {key, value}
//!                            --has_var----> PatternVar  {var, type}
//!                            --has_guard--> Guard       {var, key, op, value}
//! ```
//!
//! Rules are installed once by a domain installer. Guards are added or updated
//! in place later by [`upsert_guard`]. Nothing in a rule graph is deleted during
//! normal operation.

use crate::core::{Graph, Props, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Node type of the rule-set container.
pub const RULE_SET: &str = "RuleSet";
/// Node type of a rule.
pub const RULE: &str = "Rule";
/// Node type of a rule parameter.
pub const PARAM: &str = "Param";
/// Node type of a pattern-variable declaration.
pub const PATTERN_VAR: &str = "PatternVar";
/// Node type of a guard.
pub const GUARD: &str = "Guard";

/// Rule set → rule.
pub const HAS_RULE: &str = "has_rule";
/// Rule → parameter.
pub const HAS_PARAM: &str = "has_param";
/// Rule → pattern variable.
pub const HAS_VAR: &str = "has_var";
/// Rule → guard.
pub const HAS_GUARD: &str = "has_guard";
/// Reserved for composite rules / macro bodies.
pub const HAS_BODY: &str = "has_body";
/// Reserved generic reference label.
pub const REF: &str = "ref";

/// Default id of the rule-set node.
pub const DEFAULT_RULE_SET_ID: &str = "ruleset";

/// Comparison operator of an atomic guard. Serialized by its wire spelling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuardOp {
    /// `<`
    #[default]
    #[serde(rename = "<")]
    Lt,
    /// `<=`
    #[serde(rename = "<=")]
    Le,
    /// `>`
    #[serde(rename = ">")]
    Gt,
    /// `>=`
    #[serde(rename = ">=")]
    Ge,
    /// `==`
    #[serde(rename = "==")]
    Eq,
    /// `!=`
    #[serde(rename = "!=")]
    Ne,
    /// `in`
    #[serde(rename = "in")]
    In,
    /// `notin`
    #[serde(rename = "notin")]
    NotIn,
    /// `exists`: the referenced value is truthy.
    #[serde(rename = "exists")]
    Exists,
}

impl GuardOp {
    /// Wire spelling stored in guard nodes.
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardOp::Lt => "<",
            GuardOp::Le => "<=",
            GuardOp::Gt => ">",
            GuardOp::Ge => ">=",
            GuardOp::Eq => "==",
            GuardOp::Ne => "!=",
            GuardOp::In => "in",
            GuardOp::NotIn => "notin",
            GuardOp::Exists => "exists",
        }
    }
}

impl fmt::Display for GuardOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown guard operator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported guard operator `{0}`")]
pub struct UnknownGuardOp(pub String);

impl FromStr for GuardOp {
    type Err = UnknownGuardOp;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "<" => GuardOp::Lt,
            "<=" => GuardOp::Le,
            ">" => GuardOp::Gt,
            ">=" => GuardOp::Ge,
            "==" => GuardOp::Eq,
            "!=" => GuardOp::Ne,
            "in" => GuardOp::In,
            "notin" => GuardOp::NotIn,
            "exists" => GuardOp::Exists,
            other => return Err(UnknownGuardOp(other.to_string())),
        })
    }
}

/// A pattern-variable declaration: `var` binds to a node of type `node_type`.
///
/// Missing properties read back as empty strings; an empty declaration never
/// produces bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternVar {
    /// Variable name.
    pub var: String,
    /// Required node type.
    pub node_type: String,
}

/// An atomic guard `(bound node).key <op> value`, as stored in the rule graph.
///
/// `op` is kept as written so a malformed operator survives a read/write cycle;
/// the compiler turns it into a fail-closed test.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardSpec {
    /// Variable whose bound node is inspected. `None` compares against null.
    pub var: Option<String>,
    /// Property key on the bound node.
    pub key: String,
    /// Operator spelling, see [`GuardOp`].
    pub op: String,
    /// Right-hand constant.
    pub value: Value,
}

impl GuardSpec {
    /// Convenience constructor.
    pub fn new(var: impl Into<String>, key: impl Into<String>, op: GuardOp, value: impl Into<Value>) -> Self {
        Self {
            var: Some(var.into()),
            key: key.into(),
            op: op.as_str().to_string(),
            value: value.into(),
        }
    }

    fn to_props(&self) -> Props {
        let mut props = Props::new();
        if let Some(var) = &self.var {
            props.insert("var".to_string(), Value::from(var.as_str()));
        }
        props.insert("key".to_string(), Value::from(self.key.as_str()));
        props.insert("op".to_string(), Value::from(self.op.as_str()));
        props.insert("value".to_string(), self.value.clone());
        props
    }

    fn from_props(props: &Props) -> Self {
        let text = |k: &str| props.get(k).and_then(Value::as_str).map(str::to_string);
        Self {
            var: text("var"),
            key: text("key").unwrap_or_default(),
            op: text("op").unwrap_or_default(),
            value: props.get("value").cloned().unwrap_or_default(),
        }
    }
}

/// Read-only view of a `Rule` node.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleInfo<'a> {
    /// Node id.
    pub id: &'a str,
    /// Display name.
    pub name: Option<&'a str>,
    /// Handler kind tag.
    pub kind: Option<&'a str>,
    /// All properties, including free-form extras.
    pub props: &'a Props,
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Installs the rule-set container node and returns its id.
pub fn add_ruleset(rg: &mut Graph, id: &str, name: &str) -> String {
    rg.add_node(id, RULE_SET, crate::props! { "name" => name });
    id.to_string()
}

fn ruleset_id(rg: &Graph) -> String {
    rg.find(RULE_SET)
        .first()
        .map(|id| id.to_string())
        .unwrap_or_else(|| DEFAULT_RULE_SET_ID.to_string())
}

/// Adds a rule under the rule set.
///
/// `extra` carries free-form properties; `name` and `kind` always win over
/// same-named extras.
pub fn add_rule(rg: &mut Graph, rule_id: &str, name: &str, kind: &str, extra: Props) -> String {
    let mut props = extra;
    props.insert("name".to_string(), Value::from(name));
    props.insert("kind".to_string(), Value::from(kind));
    rg.add_node(rule_id, RULE, props);
    let owner = ruleset_id(rg);
    rg.add_edge(owner, HAS_RULE, rule_id);
    rule_id.to_string()
}

/// Attaches a parameter to a rule. Node id: `<rule>.param.<key>`.
pub fn add_param(rg: &mut Graph, rule_id: &str, key: &str, value: impl Into<Value>) -> String {
    let nid = format!("{}.param.{}", rule_id, key);
    let value: Value = value.into();
    rg.add_node(nid.as_str(), PARAM, crate::props! { "key" => key, "value" => value });
    rg.add_edge(rule_id, HAS_PARAM, nid.as_str());
    nid
}

/// Declares a pattern variable. Node id: `<rule>.var.<var>`.
pub fn add_var(rg: &mut Graph, rule_id: &str, var: &str, node_type: &str) -> String {
    let nid = format!("{}.var.{}", rule_id, var);
    rg.add_node(nid.as_str(), PATTERN_VAR, crate::props! { "var" => var, "type" => node_type });
    rg.add_edge(rule_id, HAS_VAR, nid.as_str());
    nid
}

/// Attaches a guard. Node id: `<rule>.guard.<var>.<key>.<op>`.
pub fn add_guard(rg: &mut Graph, rule_id: &str, guard: &GuardSpec) -> String {
    let nid = format!(
        "{}.guard.{}.{}.{}",
        rule_id,
        guard.var.as_deref().unwrap_or("_"),
        guard.key,
        guard.op
    );
    rg.add_node(nid.as_str(), GUARD, guard.to_props());
    rg.add_edge(rule_id, HAS_GUARD, nid.as_str());
    nid
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

fn children<'a>(rg: &'a Graph, rule_id: &str, label: &str) -> impl Iterator<Item = &'a Props> {
    rg.neighbors(rule_id, Some(label))
        .into_iter()
        .filter_map(move |nid| rg.props(nid))
}

/// All parameters of a rule as `key → value`. Later duplicates win.
pub fn params(rg: &Graph, rule_id: &str) -> BTreeMap<String, Value> {
    children(rg, rule_id, HAS_PARAM)
        .filter_map(|p| {
            let key = p.get("key")?.as_str()?.to_string();
            Some((key, p.get("value").cloned().unwrap_or_default()))
        })
        .collect()
}

/// All pattern-variable declarations of a rule, in edge order.
pub fn pattern_vars(rg: &Graph, rule_id: &str) -> Vec<PatternVar> {
    children(rg, rule_id, HAS_VAR)
        .map(|p| PatternVar {
            var: p.get("var").and_then(Value::as_str).unwrap_or_default().to_string(),
            node_type: p.get("type").and_then(Value::as_str).unwrap_or_default().to_string(),
        })
        .collect()
}

/// All guards of a rule, in edge order.
pub fn guards(rg: &Graph, rule_id: &str) -> Vec<GuardSpec> {
    children(rg, rule_id, HAS_GUARD).map(GuardSpec::from_props).collect()
}

/// All `Rule` nodes, in id order.
pub fn rules(rg: &Graph) -> Vec<RuleInfo<'_>> {
    rg.nodes()
        .filter(|(_, node)| node.node_type == RULE)
        .map(|(id, node)| RuleInfo {
            id,
            name: node.props.get("name").and_then(Value::as_str),
            kind: node.props.get("kind").and_then(Value::as_str),
            props: &node.props,
        })
        .collect()
}

/// Display names of all rules, in rule-id order. Unnamed rules are skipped.
pub fn rule_names(rg: &Graph) -> Vec<&str> {
    rules(rg).into_iter().filter_map(|r| r.name).collect()
}

/// Finds a rule id by display name.
pub fn find_rule_by_name<'a>(rg: &'a Graph, name: &str) -> Option<&'a str> {
    rules(rg).into_iter().find(|r| r.name == Some(name)).map(|r| r.id)
}

/// Updates the value of the guard matching `(var, key, op)` on the rule named
/// `rule_name`, or appends a new guard if none matches.
///
/// Returns `false` (and changes nothing) when no rule has that name.
pub fn upsert_guard(rg: &mut Graph, rule_name: &str, var: &str, key: &str, op: GuardOp, value: impl Into<Value>) -> bool {
    let Some(rule_id) = find_rule_by_name(rg, rule_name).map(str::to_string) else {
        return false;
    };
    let value = value.into();
    let existing = rg
        .neighbors(&rule_id, Some(HAS_GUARD))
        .into_iter()
        .find(|gid| {
            rg.props(gid).map_or(false, |p| {
                let spec = GuardSpec::from_props(p);
                spec.var.as_deref() == Some(var) && spec.key == key && spec.op == op.as_str()
            })
        })
        .map(str::to_string);

    match existing {
        Some(gid) => {
            rg.set_prop(&gid, "value", value);
        }
        None => {
            add_guard(rg, &rule_id, &GuardSpec::new(var, key, op, value));
        }
    }
    true
}
