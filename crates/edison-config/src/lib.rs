//! Path resolution and layered YAML configuration for Edison.

pub mod domains;
pub mod loader;
pub mod merge;
pub mod paths;
mod value;

pub use domains::{
    CommitGuardSpec, EngineSpec, MachineSpec, QaConfig, SessionConfig, SharedPathSpec,
    SharedStateMode, SharedStateSpec, TaskConfig, ValidatorSpec, WaveSpec, WorkflowConfig,
    WorktreeConfig, WorktreeTimeouts,
};
pub use loader::ConfigManager;
pub use merge::{deep_merge, get_path, set_path};
pub use paths::{
    config_dir_name, invalidate_root_cache, management_dir_name, resolve_project_root,
    resolve_project_root_from, user_config_dir, EvidencePaths, ManagementPaths,
    DEFAULT_CONFIG_DIR, DEFAULT_MANAGEMENT_DIR, ENV_MANAGEMENT_DIR, ENV_OWNER,
    ENV_PROJECT_CONFIG_DIR, ENV_PROJECT_ROOT, ENV_SESSION, ENV_USER_CONFIG_DIR,
};
