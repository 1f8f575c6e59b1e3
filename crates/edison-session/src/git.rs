//! Git subprocess helpers for worktree management.
//!
//! Every invocation is timeout-bounded. Failures carry the command's stderr
//! so callers can surface actionable messages.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use edison_process::CommandOutput;

/// Run git in `repo_dir`; non-zero exit codes are returned, not errors.
pub fn run_git(repo_dir: &Path, args: &[&str], timeout_secs: u64) -> Result<CommandOutput> {
    edison_process::run_with_timeout(
        "git",
        args,
        Some(repo_dir),
        Duration::from_secs(timeout_secs),
    )
    .with_context(|| format!("git {} failed to run", args.join(" ")))
}

/// Run git and fail on non-zero exit, quoting stderr.
pub fn git_checked(repo_dir: &Path, args: &[&str], timeout_secs: u64) -> Result<CommandOutput> {
    let out = run_git(repo_dir, args, timeout_secs)?;
    if !out.success() {
        anyhow::bail!(
            "git {} failed (exit {}): {}",
            args.join(" "),
            out.exit_code,
            out.stderr.trim()
        );
    }
    Ok(out)
}

/// Trimmed stdout of a checked git call.
pub fn git_stdout(repo_dir: &Path, args: &[&str], timeout_secs: u64) -> Result<String> {
    Ok(git_checked(repo_dir, args, timeout_secs)?.stdout.trim().to_string())
}

pub fn ref_exists(repo_dir: &Path, full_ref: &str, timeout_secs: u64) -> Result<bool> {
    let out = run_git(repo_dir, &["show-ref", "--verify", full_ref], timeout_secs)?;
    Ok(out.exit_code == 0)
}

pub fn rev_parse_ok(repo_dir: &Path, rev: &str, timeout_secs: u64) -> Result<bool> {
    let spec = format!("{rev}^{{commit}}");
    let out = run_git(repo_dir, &["rev-parse", "--verify", &spec], timeout_secs)?;
    Ok(out.exit_code == 0)
}

/// Stable marker for the primary worktree HEAD: the branch name, or
/// `DETACHED@<sha>` when detached. Worktree operations must never change it.
pub fn primary_head_marker(repo_dir: &Path, timeout_secs: u64) -> String {
    if let Ok(out) = run_git(repo_dir, &["rev-parse", "--abbrev-ref", "HEAD"], timeout_secs) {
        let name = out.stdout.trim();
        if out.exit_code == 0 && !name.is_empty() && name != "HEAD" {
            return name.to_string();
        }
    }
    match run_git(repo_dir, &["rev-parse", "HEAD"], timeout_secs) {
        Ok(out) if out.exit_code == 0 && !out.stdout.trim().is_empty() => {
            format!("DETACHED@{}", out.stdout.trim())
        }
        _ => "UNKNOWN".to_string(),
    }
}

/// True when `repo_dir` has at least one commit.
pub fn has_commits(repo_dir: &Path, timeout_secs: u64) -> Result<bool> {
    let out = run_git(repo_dir, &["rev-parse", "--verify", "HEAD"], timeout_secs)?;
    Ok(out.exit_code == 0)
}

/// Registered worktrees from `git worktree list --porcelain`, primary first.
pub fn list_worktrees(repo_dir: &Path, timeout_secs: u64) -> Result<Vec<PathBuf>> {
    let out = git_checked(repo_dir, &["worktree", "list", "--porcelain"], timeout_secs)?;
    let mut paths = Vec::new();
    for line in out.stdout.lines() {
        if let Some(rest) = line.strip_prefix("worktree ") {
            paths.push(PathBuf::from(rest.trim()));
        }
    }
    Ok(paths)
}

/// The primary checkout root. For a path inside a linked worktree this is
/// the first entry of the worktree list; for the primary it is itself.
pub fn worktree_parent(repo_dir: &Path, timeout_secs: u64) -> Result<PathBuf> {
    let worktrees = list_worktrees(repo_dir, timeout_secs)?;
    worktrees
        .into_iter()
        .next()
        .context("git reported no worktrees")
}

pub fn is_worktree_registered(
    repo_dir: &Path,
    candidate: &Path,
    timeout_secs: u64,
) -> Result<bool> {
    let canonical = candidate.canonicalize().unwrap_or_else(|_| candidate.to_path_buf());
    Ok(list_worktrees(repo_dir, timeout_secs)?
        .iter()
        .any(|p| p.canonicalize().unwrap_or_else(|_| p.clone()) == canonical))
}

/// Files changed relative to `base_ref` plus untracked files; used to build
/// the validator trigger context.
pub fn changed_files(repo_dir: &Path, base_ref: &str, timeout_secs: u64) -> Result<Vec<String>> {
    let mut files: Vec<String> = Vec::new();
    let diff = run_git(
        repo_dir,
        &["diff", "--name-only", base_ref, "--"],
        timeout_secs,
    )?;
    if diff.exit_code == 0 {
        files.extend(diff.stdout.lines().map(str::to_string));
    }
    let untracked = run_git(
        repo_dir,
        &["ls-files", "--others", "--exclude-standard"],
        timeout_secs,
    )?;
    if untracked.exit_code == 0 {
        files.extend(untracked.stdout.lines().map(str::to_string));
    }
    files.retain(|f| !f.trim().is_empty());
    files.sort();
    files.dedup();
    Ok(files)
}
