//! The validation executor: wave scheduling over heterogeneous validator
//! engines, evidence capture, report persistence, and bundle approval.

pub mod bundle;
pub mod cli_engine;
pub mod delegated;
pub mod engine;
pub mod evidence;
pub mod executor;
pub mod parsers;
pub mod registry;

pub use bundle::{build_validation_bundle, gather_cluster, BundleOutcome, BundleValidator};
pub use cli_engine::CliEngine;
pub use delegated::DelegatedEngine;
pub use engine::{zen_role_for, Engine, FollowUpTask, RunRequest, ValidationResult, Verdict};
pub use evidence::EvidenceService;
pub use executor::{ExecuteOptions, ExecutionResult, ValidationExecutor, WaveExecution};
pub use parsers::{ParseResult, ParserFn, ParserRegistry};
pub use registry::{triggered_validators, ValidatorRegistry};
