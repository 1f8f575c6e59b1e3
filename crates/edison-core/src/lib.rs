//! Shared types for the Edison core: error taxonomy, entity metadata,
//! canonical relationship edges, id helpers, and atomic filesystem IO.

pub mod error;
pub mod fsio;
pub mod id;
pub mod metadata;
pub mod relationships;

pub use error::EdisonError;
pub use fsio::{ensure_dir, read_json, read_yaml, safe_move, write_atomic};
pub use id::{new_session_id, qa_id_for, task_id_for_qa, validate_session_id};
pub use metadata::{utc_timestamp, EntityMetadata, StateHistoryEntry};
pub use relationships::{normalize_edges, EdgeType, RelationshipEdge};
