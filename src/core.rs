//! Core data structures for typed property graphs.
//!
//! A [`Graph`] is a set of typed nodes carrying key/value properties plus a list
//! of labeled directed edges. The same container represents both the artifact
//! being designed and the rule set that rewrites it (see [`crate::schema`]).
//!
//! # Ownership contract
//! Every mutator works in place on the receiver. Callers that need isolation
//! clone first; [`Graph::clone`] is a full deep copy, so independent search
//! branches never alias node property maps or edge lists.
//!
//! # Citations
//! - Property graph model: Angles, "The Property Graph Database Model" (2018)
//! - Graph transformation: Ehrig et al., "Fundamentals of Algebraic Graph Transformation" (2006)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Property map of a node. Keys are kept sorted so iteration order never
/// depends on insertion order.
pub type Props = BTreeMap<String, Value>;

/// A scalar or compound property value.
///
/// Serialized untagged, so the portable JSON form is plain JSON:
/// `null`, booleans, integers, floats, strings, arrays and objects.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent / null value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Ordered sequence.
    List(Vec<Value>),
    /// Nested mapping with sorted keys.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the numeric value of an integer or float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the integer value, accepting floats with no fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Returns the string slice of a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the nested map of a map value.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Truthiness: null, `false`, zero, and empty strings/lists/maps are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    /// Returns `true` for integers and floats.
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            // Integral floats keep a trailing `.0` so they never read back as integers.
            Value::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{:.1}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(_) | Value::Map(_) => match serde_json::to_string(self) {
                Ok(text) => write!(f, "{}", text),
                Err(_) => write!(f, "<unprintable>"),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

/// Builds a [`Props`] map from `key => value` pairs.
///
/// ```
/// use pgrewrite::props;
/// let p = props! { "length" => 0.9, "material" => "steel" };
/// assert_eq!(p.len(), 2);
/// ```
#[macro_export]
macro_rules! props {
    () => { $crate::core::Props::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::core::Props::new();
        $( map.insert(($key).to_string(), $crate::core::Value::from($value)); )+
        map
    }};
}

/// A typed node. The node identifier is the key it is stored under in its
/// [`Graph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Type tag, e.g. `"Segment"` or `"Rule"`.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Property map.
    #[serde(default)]
    pub props: Props,
}

impl Node {
    /// Creates a node with the given type and properties.
    pub fn new(node_type: impl Into<String>, props: Props) -> Self {
        Self {
            node_type: node_type.into(),
            props,
        }
    }
}

/// A labeled directed edge `(src, label, dst)`.
///
/// Serialized as a three-element array. Ordering is lexicographic over the
/// triple, which is what signature canonicalization sorts by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(String, String, String)", into = "(String, String, String)")]
pub struct Edge {
    /// Source node id.
    pub src: String,
    /// Edge label.
    pub label: String,
    /// Destination node id.
    pub dst: String,
}

impl Edge {
    /// Creates a new edge.
    pub fn new(src: impl Into<String>, label: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            label: label.into(),
            dst: dst.into(),
        }
    }

    /// Returns `true` if either endpoint is `id`.
    pub fn touches(&self, id: &str) -> bool {
        self.src == id || self.dst == id
    }
}

impl From<(String, String, String)> for Edge {
    fn from((src, label, dst): (String, String, String)) -> Self {
        Self { src, label, dst }
    }
}

impl From<Edge> for (String, String, String) {
    fn from(edge: Edge) -> Self {
        (edge.src, edge.label, edge.dst)
    }
}

/// Error type for graph (de)serialization.
#[derive(Debug, Error)]
pub enum GraphFormatError {
    /// JSON encode/decode failure.
    #[error("graph JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// CBOR encode/decode failure.
    #[error("graph CBOR error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    /// JSON has no spelling for NaN or infinities; the value would read back as null.
    #[error("non-finite float in property `{key}` of node `{node}` cannot be written as JSON")]
    NonFiniteFloat {
        /// Node holding the value.
        node: String,
        /// Top-level property key (the value may be nested below it).
        key: String,
    },
}

/// A typed property graph.
///
/// # Invariants
/// - Node ids are unique; adding an existing id overwrites it (last write wins).
/// - Edges are a multiset; duplicates are kept and endpoints are not checked.
/// - There are no implicit inverse edges; lookups are outbound from a source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Graph {
    /// Mapping from node id to node data.
    nodes: BTreeMap<String, Node>,
    /// Edge list in insertion order.
    edges: Vec<Edge>,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or overwrites) a node.
    pub fn add_node(&mut self, id: impl Into<String>, node_type: impl Into<String>, props: Props) {
        self.nodes.insert(id.into(), Node::new(node_type, props));
    }

    /// Appends an edge. Endpoints are not required to exist.
    pub fn add_edge(&mut self, src: impl Into<String>, label: impl Into<String>, dst: impl Into<String>) {
        self.edges.push(Edge::new(src, label, dst));
    }

    /// Removes a node together with every edge incident to it.
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let removed = self.nodes.remove(id)?;
        self.edges.retain(|edge| !edge.touches(id));
        Some(removed)
    }

    /// Checks whether a node with the given id exists.
    #[inline]
    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Looks up a node by id.
    #[inline]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Returns the ids of all nodes with the given type, in id order.
    pub fn find(&self, node_type: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.node_type == node_type)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Returns a node's property map.
    #[inline]
    pub fn props(&self, id: &str) -> Option<&Props> {
        self.nodes.get(id).map(|node| &node.props)
    }

    /// Returns a node's property map for in-place mutation.
    #[inline]
    pub fn props_mut(&mut self, id: &str) -> Option<&mut Props> {
        self.nodes.get_mut(id).map(|node| &mut node.props)
    }

    /// Reads a single property.
    pub fn prop(&self, id: &str, key: &str) -> Option<&Value> {
        self.props(id).and_then(|props| props.get(key))
    }

    /// Sets a single property. Returns `false` if the node does not exist.
    pub fn set_prop(&mut self, id: &str, key: impl Into<String>, value: impl Into<Value>) -> bool {
        match self.props_mut(id) {
            Some(props) => {
                props.insert(key.into(), value.into());
                true
            }
            None => false,
        }
    }

    /// Merges `updates` into a node's properties. Returns `false` if the node
    /// does not exist.
    pub fn set_props(&mut self, id: &str, updates: Props) -> bool {
        match self.props_mut(id) {
            Some(props) => {
                props.extend(updates);
                true
            }
            None => false,
        }
    }

    /// Outbound neighbors of `id`, optionally restricted to one edge label.
    pub fn neighbors(&self, id: &str, label: Option<&str>) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|edge| edge.src == id && label.map_or(true, |l| edge.label == l))
            .map(|edge| edge.dst.as_str())
            .collect()
    }

    /// Iterates over `(id, node)` pairs in id order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    /// Returns the edge list in insertion order.
    #[inline]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Returns the number of nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of edges (duplicates included).
    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

fn has_non_finite(value: &Value) -> bool {
    match value {
        Value::Float(f) => !f.is_finite(),
        Value::List(items) => items.iter().any(has_non_finite),
        Value::Map(map) => map.values().any(has_non_finite),
        _ => false,
    }
}

impl Graph {
    fn check_json_floats(&self) -> Result<(), GraphFormatError> {
        for (id, node) in &self.nodes {
            if let Some((key, _)) = node.props.iter().find(|(_, v)| has_non_finite(v)) {
                return Err(GraphFormatError::NonFiniteFloat {
                    node: id.clone(),
                    key: key.clone(),
                });
            }
        }
        Ok(())
    }

    /// Serializes to the portable JSON document
    /// `{"nodes": {id: {"type", "props"}}, "edges": [[src, label, dst], ...]}`.
    ///
    /// # Errors
    /// [`GraphFormatError::NonFiniteFloat`] if any property, at any depth,
    /// holds NaN or an infinity. Use [`Graph::to_cbor`] for such graphs.
    pub fn to_json(&self) -> Result<String, GraphFormatError> {
        self.check_json_floats()?;
        Ok(serde_json::to_string(self)?)
    }

    /// Pretty-printed variant of [`Graph::to_json`].
    pub fn to_json_pretty(&self) -> Result<String, GraphFormatError> {
        self.check_json_floats()?;
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses the portable JSON document.
    pub fn from_json(text: &str) -> Result<Self, GraphFormatError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serializes to CBOR bytes.
    pub fn to_cbor(&self) -> Result<Vec<u8>, GraphFormatError> {
        Ok(serde_cbor::to_vec(self)?)
    }

    /// Deserializes from CBOR bytes.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, GraphFormatError> {
        Ok(serde_cbor::from_slice(bytes)?)
    }
}
