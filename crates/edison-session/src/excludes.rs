//! Per-worktree `info/exclude` management and the meta commit-guard hook.
//!
//! Exclude rewrites are idempotent: patterns are appended only when missing
//! and the file is rewritten only when it actually changed. The commit guard
//! is generated content; its template is compiled into the binary.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use edison_config::{SharedStateSpec, WorktreeConfig};

use crate::git;

/// The worktree-local exclude file (`.git/info/exclude`, resolved through
/// git so linked worktrees get their private copy).
fn worktree_exclude_path(checkout_path: &Path, timeout_secs: u64) -> Result<PathBuf> {
    let raw = git::git_stdout(
        checkout_path,
        &["rev-parse", "--path-format=absolute", "--git-path", "info/exclude"],
        timeout_secs,
    )?;
    Ok(PathBuf::from(raw))
}

/// The repository-wide exclude file shared by every worktree.
fn common_exclude_path(checkout_path: &Path, timeout_secs: u64) -> Result<PathBuf> {
    let raw = git::git_stdout(
        checkout_path,
        &["rev-parse", "--path-format=absolute", "--git-common-dir"],
        timeout_secs,
    )?;
    Ok(PathBuf::from(raw).join("info").join("exclude"))
}

/// Append missing patterns to the worktree-local exclude list.
pub fn ensure_worktree_excludes(
    checkout_path: &Path,
    patterns: &[String],
    timeout_secs: u64,
) -> Result<bool> {
    if patterns.is_empty() {
        return Ok(false);
    }
    let path = worktree_exclude_path(checkout_path, timeout_secs)?;
    let existing = std::fs::read_to_string(&path).unwrap_or_default();
    let existing_lines: Vec<&str> = existing.lines().collect();

    let mut additions: Vec<&str> = Vec::new();
    for pattern in patterns {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            continue;
        }
        if !existing_lines.contains(&pattern) && !additions.contains(&pattern) {
            additions.push(pattern);
        }
    }
    if additions.is_empty() {
        return Ok(false);
    }

    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for pattern in additions {
        content.push_str(pattern);
        content.push('\n');
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, content)?;
    debug!(path = %path.display(), "worktree excludes updated");
    Ok(true)
}

/// Remove legacy patterns from the repo-wide exclude list. They would apply
/// to ALL worktrees and can stop the meta branch from tracking shared paths.
pub fn cleanup_repo_info_exclude(
    checkout_path: &Path,
    legacy_patterns: &[String],
    timeout_secs: u64,
) -> Result<bool> {
    let path = common_exclude_path(checkout_path, timeout_secs)?;
    let Ok(existing) = std::fs::read_to_string(&path) else {
        return Ok(false);
    };
    let kept: Vec<&str> = existing
        .lines()
        .filter(|line| !legacy_patterns.iter().any(|p| p == line.trim()))
        .collect();
    if kept.len() == existing.lines().count() {
        return Ok(false);
    }
    let mut content = kept.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    std::fs::write(&path, content)?;
    Ok(true)
}

/// Exclude patterns for a scope: configured `gitExcludes` plus the shared
/// paths themselves (symlinks must not show up as untracked noise).
pub fn exclude_patterns_for_scope(config: &WorktreeConfig, scope: &str) -> Vec<String> {
    let shared = &config.shared_state;
    let mut patterns: Vec<String> = Vec::new();

    if let Some(configured) = shared.git_excludes.get(scope) {
        for raw in configured {
            let pattern = raw.trim();
            if pattern.is_empty() {
                continue;
            }
            patterns.push(pattern.to_string());
            // Directory-style excludes also ignore the path itself so a
            // symlink at that path stays quiet.
            if pattern.ends_with('/') && !pattern.contains(['*', '?', '[']) {
                patterns.push(pattern.trim_end_matches('/').to_string());
            }
        }
    }

    if scope == "primary" || scope == "session" {
        for item in shared.effective_shared_paths() {
            if !item.in_scope(scope) {
                continue;
            }
            if item.is_dir() {
                let base = item.path.trim_end_matches('/');
                patterns.push(base.to_string());
                patterns.push(format!("{base}/"));
            } else {
                patterns.push(item.path.trim().to_string());
            }
        }
    }

    let mut deduped: Vec<String> = Vec::new();
    for pattern in patterns {
        if !deduped.contains(&pattern) {
            deduped.push(pattern);
        }
    }
    deduped
}

/// Legacy repo-wide patterns pruned once per-worktree excludes exist.
pub fn legacy_exclude_patterns(config: &WorktreeConfig) -> Vec<String> {
    let mut patterns = vec![".project".to_string(), ".project/".to_string()];
    for item in config.shared_state.effective_shared_paths() {
        if item.is_dir() {
            let base = item.path.trim_end_matches('/');
            patterns.push(base.to_string());
            patterns.push(format!("{base}/"));
        } else {
            patterns.push(item.path.clone());
        }
    }
    patterns
}

fn bash_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Render the pre-commit hook that keeps the meta branch clean: deny by
/// default, allow only configured prefixes.
pub fn render_commit_guard_script(
    meta_toplevel: &Path,
    meta_branch: &str,
    allow_prefixes: &[String],
) -> String {
    let allow_block = allow_prefixes
        .iter()
        .map(|p| format!("  \"{}\"", bash_escape(p)))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        concat!(
            "#!/usr/bin/env bash\n",
            "# Generated by Edison (worktrees.sharedState.commitGuard)\n",
            "set -euo pipefail\n",
            "\n",
            "META_TOPLEVEL=\"{toplevel}\"\n",
            "META_BRANCH=\"{branch}\"\n",
            "ALLOW_PREFIXES=(\n{allow}\n)\n",
            "\n",
            "toplevel=$(git rev-parse --show-toplevel 2>/dev/null || true)\n",
            "if [[ -z \"$toplevel\" || \"$toplevel\" != \"$META_TOPLEVEL\" ]]; then\n",
            "  exit 0\n",
            "fi\n",
            "\n",
            "branch=$(git rev-parse --abbrev-ref HEAD 2>/dev/null || true)\n",
            "if [[ \"$branch\" != \"$META_BRANCH\" ]]; then\n",
            "  exit 0\n",
            "fi\n",
            "\n",
            "bad=0\n",
            "while IFS= read -r path; do\n",
            "  [[ -z \"$path\" ]] && continue\n",
            "  ok=0\n",
            "  for prefix in \"${{ALLOW_PREFIXES[@]}}\"; do\n",
            "    if [[ \"$path\" == \"$prefix\"* ]]; then\n",
            "      ok=1\n",
            "      break\n",
            "    fi\n",
            "  done\n",
            "  if [[ $ok -eq 0 ]]; then\n",
            "    echo \"Edison meta commit guard: refusing to commit '$path' outside allowed prefixes.\" >&2\n",
            "    bad=1\n",
            "  fi\n",
            "done < <(git diff --cached --name-only)\n",
            "\n",
            "if [[ $bad -ne 0 ]]; then\n",
            "  echo \"Allowed prefixes:\" >&2\n",
            "  for prefix in \"${{ALLOW_PREFIXES[@]}}\"; do\n",
            "    echo \"  - $prefix\" >&2\n",
            "  done\n",
            "  exit 1\n",
            "fi\n",
        ),
        toplevel = bash_escape(&meta_toplevel.display().to_string()),
        branch = bash_escape(meta_branch),
        allow = allow_block,
    )
}

/// Allowed commit prefixes for the meta branch, derived from shared paths
/// plus configured extras.
pub fn commit_guard_allow_prefixes(shared: &SharedStateSpec) -> Vec<String> {
    let mut allow: Vec<String> = shared
        .commit_guard
        .allow_prefixes
        .iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    for item in shared.effective_shared_paths() {
        if item.target_root != "shared" {
            continue;
        }
        if item.commit_allowed {
            if item.is_dir() {
                allow.push(format!("{}/", item.path.trim_end_matches('/')));
            } else {
                allow.push(item.path.trim().to_string());
            }
        }
        for sub in &item.commit_allow_prefixes {
            let sub = sub.trim();
            if !sub.is_empty() {
                allow.push(sub.to_string());
            }
        }
    }

    let mut deduped: Vec<String> = Vec::new();
    for prefix in allow {
        if !deduped.contains(&prefix) {
            deduped.push(prefix);
        }
    }
    deduped
}

/// Install (or refresh) the pre-commit guard in the meta worktree.
pub fn ensure_meta_commit_guard(
    meta_path: &Path,
    config: &WorktreeConfig,
    timeout_secs: u64,
) -> Result<()> {
    let shared = &config.shared_state;
    if !shared.commit_guard.enabled {
        return Ok(());
    }
    let allow = commit_guard_allow_prefixes(shared);
    if allow.is_empty() {
        return Ok(());
    }

    let meta_toplevel = meta_path.canonicalize().unwrap_or_else(|_| meta_path.to_path_buf());
    let script = render_commit_guard_script(&meta_toplevel, &shared.meta_branch, &allow);

    let hook_raw = git::git_stdout(
        meta_path,
        &["rev-parse", "--path-format=absolute", "--git-path", "hooks/pre-commit"],
        timeout_secs,
    )?;
    let hook_path = PathBuf::from(hook_raw);

    if let Ok(existing) = std::fs::read_to_string(&hook_path) {
        if existing == script {
            return Ok(());
        }
    }
    if let Some(parent) = hook_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&hook_path, &script)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&hook_path, std::fs::Permissions::from_mode(0o755))?;
    }
    debug!(hook = %hook_path.display(), "meta commit guard installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testutil::init_repo;
    use edison_config::ConfigManager;
    use serial_test::serial;
    use tempfile::tempdir;

    fn worktree_config(root: &Path) -> WorktreeConfig {
        WorktreeConfig::from_config(&ConfigManager::load(root).unwrap()).unwrap()
    }

    #[test]
    #[serial]
    fn test_ensure_excludes_idempotent() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let patterns = vec![".project".to_string(), ".project/".to_string()];

        assert!(ensure_worktree_excludes(dir.path(), &patterns, 10).unwrap());
        // Second run changes nothing.
        assert!(!ensure_worktree_excludes(dir.path(), &patterns, 10).unwrap());

        let exclude = dir.path().join(".git/info/exclude");
        let content = std::fs::read_to_string(exclude).unwrap();
        assert_eq!(content.matches(".project").count(), 2);
    }

    #[test]
    #[serial]
    fn test_cleanup_repo_info_exclude_removes_lines() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let exclude = dir.path().join(".git/info/exclude");
        std::fs::create_dir_all(exclude.parent().unwrap()).unwrap();
        std::fs::write(&exclude, "keepme\n.project\n.zen/\n").unwrap();

        let removed = cleanup_repo_info_exclude(
            dir.path(),
            &[".project".to_string(), ".zen/".to_string()],
            10,
        )
        .unwrap();
        assert!(removed);
        let content = std::fs::read_to_string(&exclude).unwrap();
        assert_eq!(content, "keepme\n");
    }

    #[test]
    #[serial]
    fn test_scope_patterns_include_shared_paths() {
        let dir = tempdir().unwrap();
        let config = worktree_config(dir.path());
        let patterns = exclude_patterns_for_scope(&config, "session");
        assert!(patterns.contains(&".project".to_string()));
        assert!(patterns.contains(&".project/".to_string()));
        // Meta scope does not ignore shared paths; they are tracked there.
        let meta = exclude_patterns_for_scope(&config, "meta");
        assert!(!meta.contains(&".project".to_string()));
    }

    #[test]
    #[serial]
    fn test_guard_script_denies_by_default() {
        let script = render_commit_guard_script(
            Path::new("/work/_meta"),
            "edison-meta",
            &[".project/".to_string()],
        );
        assert!(script.starts_with("#!/usr/bin/env bash"));
        assert!(script.contains("refusing to commit"));
        assert!(script.contains("\".project/\""));
        assert!(script.contains("exit 1"));
    }

    #[test]
    #[serial]
    fn test_allow_prefixes_derived_from_shared_paths() {
        let dir = tempdir().unwrap();
        let config = worktree_config(dir.path());
        let allow = commit_guard_allow_prefixes(&config.shared_state);
        assert_eq!(allow, vec![".project/".to_string()]);
    }

    #[test]
    #[serial]
    fn test_commit_guard_ignores_non_meta_branch() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let config = worktree_config(dir.path());
        ensure_meta_commit_guard(dir.path(), &config, 10).unwrap();

        // The guard only fires on the meta branch in the meta toplevel; the
        // primary checkout path differs, so this commit passes through.
        std::fs::write(dir.path().join("stray.txt"), "x").unwrap();
        git::git_checked(dir.path(), &["add", "stray.txt"], 10).unwrap();
        let out = git::run_git(dir.path(), &["commit", "-m", "stray"], 10).unwrap();
        assert_eq!(out.exit_code, 0);
    }
}
