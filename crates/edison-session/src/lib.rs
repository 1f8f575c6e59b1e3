//! Session and git-worktree lifecycle: isolated session checkouts, the
//! shared-state meta worktree, and the primary-HEAD invariant.

pub mod deps;
pub mod excludes;
pub mod git;
pub mod health;
pub mod manager;
pub mod meta;
pub mod refs;
pub mod session_id;
pub mod shared;
pub mod worktree;

pub use deps::{maybe_install_deps_and_post_install, resolve_fallback_install_cmd, resolve_install_cmd};
pub use excludes::{
    cleanup_repo_info_exclude, commit_guard_allow_prefixes, ensure_meta_commit_guard,
    ensure_worktree_excludes, exclude_patterns_for_scope, render_commit_guard_script,
};
pub use git::{changed_files, list_worktrees, primary_head_marker, worktree_parent};
pub use health::validate_worktree_checkout;
pub use manager::SessionManager;
pub use meta::{ensure_meta_worktree_checkout, ensure_meta_worktree_setup, resolve_shared_root};
pub use refs::{resolve_base_ref, resolve_start_ref};
pub use session_id::{ensure_worktree_session_id_file, infer_session_id, worktree_pinning_status};
pub use shared::ensure_shared_paths_in_checkout;
pub use worktree::{WorktreeManager, ENV_CREATE_PROGRESS};
