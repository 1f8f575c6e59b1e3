//! The meta worktree: a dedicated checkout of an orphan branch hosting state
//! shared across all session worktrees.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use edison_config::{SharedStateMode, WorktreeConfig};

use crate::excludes::{
    cleanup_repo_info_exclude, ensure_meta_commit_guard, ensure_worktree_excludes,
    exclude_patterns_for_scope, legacy_exclude_patterns,
};
use crate::git;

/// The well-known empty tree object present in every git repository.
const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Create an orphan branch with a single empty root commit, without checking
/// it out anywhere.
fn create_orphan_branch(repo_dir: &Path, branch: &str, timeout_secs: u64) -> Result<String> {
    let sha = git::git_stdout(
        repo_dir,
        &["commit-tree", EMPTY_TREE, "-m", "Initialize Edison meta branch"],
        timeout_secs,
    )?;
    if sha.is_empty() {
        anyhow::bail!("Failed to create orphan commit for branch {branch}");
    }
    let full_ref = format!("refs/heads/{branch}");
    git::git_checked(repo_dir, &["update-ref", &full_ref, &sha], timeout_secs)?;
    Ok(sha)
}

/// Ensure the meta worktree exists; returns `(path, branch, created)`.
///
/// The primary checkout's HEAD is never switched: the orphan branch is
/// manufactured via `commit-tree` + `update-ref` and attached with
/// `git worktree add`.
pub fn ensure_meta_worktree_checkout(
    repo_dir: &Path,
    config: &WorktreeConfig,
) -> Result<(PathBuf, String, bool)> {
    let branch = config.shared_state.meta_branch.clone();
    let timeouts = &config.timeouts;

    let primary = git::worktree_parent(repo_dir, timeouts.health_check)?;
    let meta_path = config.meta_worktree_path(&primary);

    // Already inside the meta worktree.
    if meta_path
        .canonicalize()
        .ok()
        .zip(repo_dir.canonicalize().ok())
        .is_some_and(|(a, b)| a == b)
    {
        return Ok((meta_path, branch, false));
    }

    if meta_path.exists() {
        if git::is_worktree_registered(&primary, &meta_path, timeouts.health_check)? {
            return Ok((meta_path, branch, false));
        }
        anyhow::bail!(
            "Meta worktree path exists but is not registered for this repository. Path: {}. \
             Set worktrees.sharedState.metaPathTemplate to a repo-unique location.",
            meta_path.display()
        );
    }

    let branch_ref = format!("refs/heads/{branch}");
    let mut created = false;
    if !git::ref_exists(&primary, &branch_ref, timeouts.branch_check)? {
        create_orphan_branch(&primary, &branch, timeouts.branch_check)?;
        created = true;
    }
    if let Some(parent) = meta_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    git::git_checked(
        &primary,
        &["worktree", "add", meta_path.to_str().context("non-utf8 meta path")?, &branch],
        timeouts.worktree_add,
    )?;
    info!(path = %meta_path.display(), branch = %branch, "meta worktree attached");

    Ok((meta_path, branch, created))
}

/// Apply the meta-only setup: scope excludes plus the commit guard.
pub fn ensure_meta_worktree_setup(meta_path: &Path, config: &WorktreeConfig) -> Result<()> {
    let patterns = exclude_patterns_for_scope(config, "meta");
    ensure_worktree_excludes(meta_path, &patterns, config.timeouts.health_check)?;
    cleanup_repo_info_exclude(
        meta_path,
        &legacy_exclude_patterns(config),
        config.timeouts.health_check,
    )?;
    ensure_meta_commit_guard(meta_path, config, config.timeouts.health_check)
}

/// Resolve the root directory that hosts shared state for this repository.
pub fn resolve_shared_root(repo_dir: &Path, config: &WorktreeConfig) -> Result<PathBuf> {
    match config.shared_state.mode {
        SharedStateMode::Primary => git::worktree_parent(repo_dir, config.timeouts.health_check),
        SharedStateMode::External => {
            let raw = config
                .shared_state
                .external_path
                .as_deref()
                .context("worktrees.sharedState.mode=external requires externalPath")?;
            let path = PathBuf::from(raw);
            if path.is_absolute() {
                Ok(path)
            } else {
                let primary = git::worktree_parent(repo_dir, config.timeouts.health_check)?;
                Ok(primary.join(path))
            }
        }
        SharedStateMode::Meta => {
            let (meta_path, _branch, _created) = ensure_meta_worktree_checkout(repo_dir, config)?;
            ensure_meta_worktree_setup(&meta_path, config)?;
            Ok(meta_path)
        }
    }
}
