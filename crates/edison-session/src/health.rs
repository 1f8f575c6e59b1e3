//! Post-creation worktree health checks.

use std::path::Path;

use anyhow::Result;

use crate::git;

/// Validate a freshly created worktree checkout:
/// - `git rev-parse --is-inside-work-tree` reports true
/// - the current branch matches
/// - `.git` is a file (not a directory) holding a valid `gitdir:` pointer
pub fn validate_worktree_checkout(
    worktree_path: &Path,
    branch_name: &str,
    timeout_secs: u64,
) -> Result<()> {
    let inside = git::git_stdout(worktree_path, &["rev-parse", "--is-inside-work-tree"], timeout_secs)?;
    let branch = git::git_stdout(worktree_path, &["branch", "--show-current"], timeout_secs)?;
    if inside != "true" || branch != branch_name {
        anyhow::bail!(
            "Worktree health check failed (inside={inside}, branch={branch}, expected {branch_name})"
        );
    }

    let git_file = worktree_path.join(".git");
    if !git_file.exists() {
        anyhow::bail!("Worktree missing .git metadata");
    }
    if !git_file.is_file() {
        anyhow::bail!("Expected a git worktree (.git must be a file), but got a non-worktree checkout");
    }

    let content = std::fs::read_to_string(&git_file)?;
    let Some(target_raw) = content.strip_prefix("gitdir:").map(str::trim) else {
        anyhow::bail!("Worktree .git file is missing gitdir pointer");
    };
    let mut target = std::path::PathBuf::from(target_raw);
    if !target.is_absolute() {
        target = worktree_path.join(target);
    }
    if !target.exists() {
        anyhow::bail!("Worktree .git pointer is invalid: {target_raw}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testutil::init_repo;
    use tempfile::tempdir;

    #[test]
    fn test_valid_worktree_passes() {
        let dir = tempdir().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        init_repo(&repo);
        let wt = dir.path().join("wt");
        git::git_checked(
            &repo,
            &["worktree", "add", "-b", "session/x", wt.to_str().unwrap(), "main"],
            30,
        )
        .unwrap();

        validate_worktree_checkout(&wt, "session/x", 10).unwrap();
    }

    #[test]
    fn test_primary_checkout_fails_git_file_check() {
        // The primary checkout has a .git directory, not a file.
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let err = validate_worktree_checkout(dir.path(), "main", 10).unwrap_err();
        assert!(err.to_string().contains(".git must be a file"));
    }

    #[test]
    fn test_wrong_branch_fails() {
        let dir = tempdir().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        init_repo(&repo);
        let wt = dir.path().join("wt");
        git::git_checked(
            &repo,
            &["worktree", "add", "-b", "session/y", wt.to_str().unwrap(), "main"],
            30,
        )
        .unwrap();

        let err = validate_worktree_checkout(&wt, "session/other", 10).unwrap_err();
        assert!(err.to_string().contains("health check failed"));
    }
}
