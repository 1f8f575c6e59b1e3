//! Task entity: a unit of work whose state is its directory.

use serde_yaml::Mapping;

use edison_core::{
    normalize_edges, EdgeType, EntityMetadata, RelationshipEdge, StateHistoryEntry,
};

/// A task. `state` mirrors the containing directory and is never serialized
/// into frontmatter.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub state: String,
    pub title: String,
    pub description: String,
    pub session_id: Option<String>,
    pub metadata: EntityMetadata,
    pub state_history: Vec<StateHistoryEntry>,
    pub tags: Vec<String>,
    /// Canonical edges; the single source of truth for relationships.
    pub relationships: Vec<RelationshipEdge>,
    pub claimed_at: Option<String>,
    pub last_active: Option<String>,
    pub continuation_id: Option<String>,
    pub result: Option<String>,
    pub delegated_to: Option<String>,
    pub delegated_in_session: Option<String>,
    /// Opaque map reserved for external systems.
    pub integration: Mapping,
}

impl Task {
    pub fn create(
        task_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        state: impl Into<String>,
        session_id: Option<String>,
        owner: Option<String>,
    ) -> Self {
        Self {
            id: task_id.into(),
            state: state.into(),
            title: title.into(),
            description: description.into(),
            session_id: session_id.clone(),
            metadata: EntityMetadata::create(owner, session_id),
            state_history: Vec::new(),
            tags: Vec::new(),
            relationships: Vec::new(),
            claimed_at: None,
            last_active: None,
            continuation_id: None,
            result: None,
            delegated_to: None,
            delegated_in_session: None,
            integration: Mapping::new(),
        }
    }

    /// Re-canonicalize the edge list (dedupe, sort, singleton enforcement).
    pub fn normalize_relationships(&mut self) {
        let edges = std::mem::take(&mut self.relationships);
        self.relationships = normalize_edges(edges, Some(&self.id));
    }

    pub fn record_transition(
        &mut self,
        from: &str,
        to: &str,
        reason: Option<String>,
        violations: Vec<String>,
    ) {
        self.state_history
            .push(StateHistoryEntry::create(from, to, reason, violations));
        self.metadata.touch();
    }

    // Derived projections; read-only views over the canonical edges.

    pub fn parent_id(&self) -> Option<&str> {
        self.relationships
            .iter()
            .find(|e| e.edge_type == EdgeType::Parent)
            .map(|e| e.target.as_str())
    }

    pub fn child_ids(&self) -> Vec<&str> {
        self.edges_of(EdgeType::Child)
    }

    pub fn depends_on(&self) -> Vec<&str> {
        self.edges_of(EdgeType::DependsOn)
    }

    pub fn blocks_tasks(&self) -> Vec<&str> {
        self.edges_of(EdgeType::Blocks)
    }

    pub fn related(&self) -> Vec<&str> {
        self.edges_of(EdgeType::Related)
    }

    pub fn bundle_root(&self) -> Option<&str> {
        self.relationships
            .iter()
            .find(|e| e.edge_type == EdgeType::BundleRoot)
            .map(|e| e.target.as_str())
    }

    fn edges_of(&self, edge_type: EdgeType) -> Vec<&str> {
        self.relationships
            .iter()
            .filter(|e| e.edge_type == edge_type)
            .map(|e| e.target.as_str())
            .collect()
    }
}
