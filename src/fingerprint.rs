//! Canonical content signatures for property graphs.
//!
//! A signature is a SHA-256 digest over a canonical byte encoding of a graph:
//! nodes sorted by id, properties sorted by key with nested containers
//! normalized recursively, then the sorted edge triples. Domain separation and
//! length prefixing keep the digest stable across fresh builds.
//!
//! # Policy note
//! Signatures are **representation-sensitive**, not isomorphism-invariant:
//! renaming a node changes the signature even when the two graphs have the
//! same shape. Search memoization and novelty scoring rely on exactly this,
//! since one run always uses one fixed naming scheme.
//!
//! # Citations
//! - SHA-256: NIST FIPS 180-4 (2015)
//! - Domain separation & length prefixing: Bernstein et al., "How to hash into elliptic curves" (2009)

use crate::core::{Graph, Value};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Domain for whole-graph signatures (v0).
pub const DOMAIN_GRAPH_SIGNATURE_V0: &[u8] = b"GRAPH_SIGNATURE_V0";

/// A 256‑bit hash value.
///
/// # Citations
/// - Cryptographic hash outputs: Rogaway & Shrimpton, "Cryptographic hash‑function basics" (2004)
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashValue(pub [u8; 32]);

impl HashValue {
    /// Creates a zero hash (all zeros).
    #[inline]
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Returns the raw byte array.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes SHA‑256 of the given data with domain separation.
    ///
    /// Domain separation prefix is applied as `b"PGR:<domain>:v1" || length_prefix(data) || data`.
    /// Length prefix is a 64‑bit little‑endian count of bytes.
    pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"PGR:");
        hasher.update(domain);
        hasher.update(b":v1");
        let len = data.len() as u64;
        hasher.update(len.to_le_bytes());
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Full lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl std::fmt::Display for HashValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 4 bytes in hex for readability
        write!(
            f,
            "HashValue({:02x}{:02x}{:02x}{:02x}…)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

fn push_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Appends the canonical encoding of a property value.
///
/// Each value is a one-byte tag followed by its payload. Maps are emitted in
/// key order (guaranteed by `BTreeMap`), lists in their stored order. Floats
/// are encoded by bit pattern after folding `-0.0` into `0.0` and every NaN into
/// a single quiet NaN, so numerically equal floats encode identically.
pub fn canonical_value_bytes(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(0x00),
        Value::Bool(b) => {
            out.push(0x01);
            out.push(u8::from(*b));
        }
        Value::Int(i) => {
            out.push(0x02);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float(f) => {
            out.push(0x03);
            let normalized = if f.is_nan() {
                f64::NAN
            } else if *f == 0.0 {
                0.0
            } else {
                *f
            };
            out.extend_from_slice(&normalized.to_bits().to_le_bytes());
        }
        Value::Str(s) => {
            out.push(0x04);
            push_str(out, s);
        }
        Value::List(items) => {
            out.push(0x05);
            out.extend_from_slice(&(items.len() as u64).to_le_bytes());
            for item in items {
                canonical_value_bytes(item, out);
            }
        }
        Value::Map(map) => {
            out.push(0x06);
            out.extend_from_slice(&(map.len() as u64).to_le_bytes());
            for (key, item) in map {
                push_str(out, key);
                canonical_value_bytes(item, out);
            }
        }
    }
}

/// Returns the canonical byte encoding of a whole graph.
///
/// Layout: node count, then per node (id order) `id, type, prop count,
/// (key, value)*`; then edge count and the sorted `(src, label, dst)` triples.
pub fn canonical_graph_bytes(graph: &Graph) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 * (graph.node_count() + graph.edge_count()) + 16);

    out.extend_from_slice(&(graph.node_count() as u64).to_le_bytes());
    for (id, node) in graph.nodes() {
        push_str(&mut out, id);
        push_str(&mut out, &node.node_type);
        out.extend_from_slice(&(node.props.len() as u64).to_le_bytes());
        for (key, value) in &node.props {
            push_str(&mut out, key);
            canonical_value_bytes(value, &mut out);
        }
    }

    let mut edges: Vec<_> = graph.edges().iter().collect();
    edges.sort();
    out.extend_from_slice(&(edges.len() as u64).to_le_bytes());
    for edge in edges {
        push_str(&mut out, &edge.src);
        push_str(&mut out, &edge.label);
        push_str(&mut out, &edge.dst);
    }
    out
}

/// Computes the canonical signature of a graph.
///
/// Invariant to node insertion order, edge insertion order and property key
/// order; sensitive to every node id, type, property value and edge triple.
pub fn graph_signature(graph: &Graph) -> HashValue {
    HashValue::hash_with_domain(DOMAIN_GRAPH_SIGNATURE_V0, &canonical_graph_bytes(graph))
}

impl Graph {
    /// Canonical signature, see [`graph_signature`].
    pub fn signature(&self) -> HashValue {
        graph_signature(self)
    }
}
