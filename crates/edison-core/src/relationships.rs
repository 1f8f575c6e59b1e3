//! Canonical relationship edges between task ids.
//!
//! The `relationships:` list in task frontmatter is the single source of
//! truth. Derived projections (parent id, child ids, ...) are read-only views
//! computed from these edges.

use serde::{Deserialize, Serialize};

/// Typed relationship between two tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Parent,
    Child,
    DependsOn,
    Blocks,
    Related,
    BundleRoot,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Child => "child",
            Self::DependsOn => "depends_on",
            Self::Blocks => "blocks",
            Self::Related => "related",
            Self::BundleRoot => "bundle_root",
        }
    }

    /// The inverse edge maintained on the other task.
    ///
    /// `bundle_root` is directed-only and has no inverse.
    pub fn inverse(&self) -> Option<EdgeType> {
        match self {
            Self::Parent => Some(Self::Child),
            Self::Child => Some(Self::Parent),
            Self::DependsOn => Some(Self::Blocks),
            Self::Blocks => Some(Self::DependsOn),
            Self::Related => Some(Self::Related),
            Self::BundleRoot => None,
        }
    }

    /// Edge types of which a task may carry at most one.
    pub fn is_singleton(&self) -> bool {
        matches!(self, Self::Parent | Self::BundleRoot)
    }

    pub fn parse(raw: &str) -> Option<EdgeType> {
        match raw.trim() {
            "parent" => Some(Self::Parent),
            "child" => Some(Self::Child),
            "depends_on" => Some(Self::DependsOn),
            "blocks" => Some(Self::Blocks),
            "related" => Some(Self::Related),
            "bundle_root" => Some(Self::BundleRoot),
            _ => None,
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single `{type, target}` edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub target: String,
}

impl RelationshipEdge {
    pub fn new(edge_type: EdgeType, target: impl Into<String>) -> Self {
        Self {
            edge_type,
            target: target.into(),
        }
    }
}

/// Normalize an edge list deterministically.
///
/// Invariants enforced:
/// - no self edges (`self_id` filtered out as a target)
/// - no duplicates
/// - stable ordering by `(type, target)`
/// - at most one `parent` edge, at most one `bundle_root` edge
///   (first occurrence wins)
pub fn normalize_edges(edges: Vec<RelationshipEdge>, self_id: Option<&str>) -> Vec<RelationshipEdge> {
    let mut seen: Vec<(EdgeType, String)> = Vec::new();
    let mut singleton_taken: Vec<EdgeType> = Vec::new();
    let mut out: Vec<RelationshipEdge> = Vec::new();

    for edge in edges {
        let target = edge.target.trim().to_string();
        if target.is_empty() {
            continue;
        }
        if self_id.is_some_and(|id| id == target) {
            continue;
        }
        let key = (edge.edge_type, target.clone());
        if seen.contains(&key) {
            continue;
        }
        if edge.edge_type.is_singleton() {
            if singleton_taken.contains(&edge.edge_type) {
                continue;
            }
            singleton_taken.push(edge.edge_type);
        }
        seen.push(key);
        out.push(RelationshipEdge::new(edge.edge_type, target));
    }

    out.sort_by(|a, b| {
        a.edge_type
            .as_str()
            .cmp(b.edge_type.as_str())
            .then_with(|| a.target.cmp(&b.target))
    });
    out
}
