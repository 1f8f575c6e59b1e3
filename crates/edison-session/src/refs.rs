//! Base-ref resolution for session worktrees.

use std::path::Path;

use anyhow::Result;

use edison_config::WorktreeConfig;

use crate::git;

/// Resolve the logical base ref for a new worktree.
///
/// `fixed` uses the configured branch name; `current` snapshots the primary
/// worktree's HEAD without mutating it. An explicit override wins.
pub fn resolve_base_ref(
    repo_dir: &Path,
    config: &WorktreeConfig,
    override_ref: Option<&str>,
) -> String {
    if let Some(explicit) = override_ref {
        if !explicit.trim().is_empty() {
            return explicit.trim().to_string();
        }
    }

    let mode = if config.base_branch_mode.is_empty() {
        if config.base_branch.is_empty() {
            "current"
        } else {
            "fixed"
        }
    } else {
        config.base_branch_mode.as_str()
    };

    if mode == "fixed" {
        if config.base_branch.is_empty() {
            return "main".to_string();
        }
        return config.base_branch.clone();
    }

    // current: the primary HEAD marker, reduced to something rev-parsable.
    let marker = git::primary_head_marker(repo_dir, config.timeouts.branch_check);
    if let Some(sha) = marker.strip_prefix("DETACHED@") {
        return sha.to_string();
    }
    if marker == "UNKNOWN" || marker == "DETACHED" {
        return "HEAD".to_string();
    }
    marker
}

/// Resolve a ref that `git worktree add` can start from. Falls back to
/// `origin/<ref>` for plain branch names before failing.
pub fn resolve_start_ref(repo_dir: &Path, base_ref: &str, timeout_secs: u64) -> Result<String> {
    if git::rev_parse_ok(repo_dir, base_ref, timeout_secs)? {
        return Ok(base_ref.to_string());
    }
    if base_ref != "HEAD" && !base_ref.starts_with("origin/") && !base_ref.starts_with("refs/") {
        let candidate = format!("origin/{base_ref}");
        if git::rev_parse_ok(repo_dir, &candidate, timeout_secs)? {
            return Ok(candidate);
        }
    }
    anyhow::bail!("Base ref not found: {base_ref}")
}
