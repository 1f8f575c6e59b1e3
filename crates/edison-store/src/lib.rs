//! Entity persistence for Edison: Markdown+frontmatter repositories whose
//! state is the containing directory, a config-driven state machine, the
//! relationship service, and task–QA workflow orchestration.

pub mod frontmatter;
pub mod qa;
pub mod qa_repo;
pub mod relationship_service;
pub mod session;
pub mod session_repo;
pub mod statemachine;
pub mod task;
pub mod task_repo;
pub mod workflow;

pub use frontmatter::{
    format_frontmatter, has_frontmatter, parse_frontmatter, parse_title, strip_frontmatter_block,
    ParsedDocument,
};
pub use qa::{QaRecord, RoundHistoryEntry};
pub use qa_repo::QaRepository;
pub use relationship_service::TaskRelationshipService;
pub use session::{ActivityEntry, Session, SessionGit};
pub use session_repo::SessionRepository;
pub use statemachine::{ActionFn, GuardContext, GuardFn, StateMachine};
pub use task::Task;
pub use task_repo::TaskRepository;
pub use workflow::{CreateTaskOptions, TaskQaWorkflow};
