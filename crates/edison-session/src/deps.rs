//! Dependency installation inside fresh worktrees.
//!
//! The install command is inferred from lockfile presence and preserves the
//! lockfile; if it fails, the non-immutable fallback runs exactly once.
//! Configured post-install commands run through the shell with tail capture
//! on failure.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use edison_process::{run_shell_with_timeout, run_with_timeout, tail, CommandOutput};

const TAIL_LINES: usize = 25;

/// Lockfile-preserving install command for the checkout, if any.
pub fn resolve_install_cmd(cwd: &Path) -> Vec<String> {
    if cwd.join("pnpm-lock.yaml").exists() {
        return strs(&["pnpm", "install", "--frozen-lockfile"]);
    }
    if cwd.join("package-lock.json").exists() {
        return strs(&["npm", "ci"]);
    }
    if cwd.join("yarn.lock").exists() {
        return strs(&["yarn", "install", "--immutable"]);
    }
    if cwd.join("bun.lockb").exists() || cwd.join("bun.lock").exists() {
        return strs(&["bun", "install", "--frozen-lockfile"]);
    }
    strs(&["pnpm", "install"])
}

/// Non-immutable fallback, attempted once when the strict install fails.
pub fn resolve_fallback_install_cmd(cwd: &Path) -> Option<Vec<String>> {
    if cwd.join("pnpm-lock.yaml").exists() {
        return Some(strs(&["pnpm", "install"]));
    }
    if cwd.join("package-lock.json").exists() {
        return Some(strs(&["npm", "install"]));
    }
    if cwd.join("yarn.lock").exists() {
        return Some(strs(&["yarn", "install"]));
    }
    if cwd.join("bun.lockb").exists() || cwd.join("bun.lock").exists() {
        return Some(strs(&["bun", "install"]));
    }
    None
}

fn strs(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn run_install(worktree_path: &Path, cmd: &[String], timeout_secs: u64) -> Result<CommandOutput> {
    let args: Vec<&str> = cmd.iter().skip(1).map(String::as_str).collect();
    run_with_timeout(
        &cmd[0],
        &args,
        Some(worktree_path),
        Duration::from_secs(timeout_secs),
    )
    .map_err(|e| {
        anyhow::anyhow!(
            "Dependency install failed in worktree (runner error).\n  cwd: {}\n  cmd: {}\n  error: {e}",
            worktree_path.display(),
            cmd.join(" ")
        )
    })
}

fn ensure_install_ok(result: &CommandOutput, worktree_path: &Path, cmd: &[String]) -> Result<()> {
    if result.exit_code == 0 {
        return Ok(());
    }
    anyhow::bail!(
        "Dependency install failed in worktree.\n  cwd: {}\n  cmd: {}\n  exit: {}\n  stdout (tail):\n{}\n  stderr (tail):\n{}",
        worktree_path.display(),
        cmd.join(" "),
        result.exit_code,
        tail(&result.stdout, TAIL_LINES),
        tail(&result.stderr, TAIL_LINES)
    )
}

fn run_post_install_commands(
    worktree_path: &Path,
    commands: &[String],
    timeout_secs: u64,
) -> Result<()> {
    for line in commands {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        debug!(command = line, "running post-install command");
        let out = run_shell_with_timeout(line, Some(worktree_path), Duration::from_secs(timeout_secs))?;
        if out.exit_code != 0 {
            anyhow::bail!(
                "Post-install command failed.\n  cwd: {}\n  cmd: {line}\n  exit: {}\n  stderr (tail):\n{}",
                worktree_path.display(),
                out.exit_code,
                tail(&out.stderr, TAIL_LINES)
            );
        }
    }
    Ok(())
}

/// Run the configured install + post-install steps for a new worktree.
pub fn maybe_install_deps_and_post_install(
    worktree_path: &Path,
    install_deps: bool,
    post_install_commands: &[String],
    timeout_secs: u64,
) -> Result<()> {
    let fallback_cmd = resolve_fallback_install_cmd(worktree_path);
    let mut used_fallback = false;

    if install_deps {
        let install_cmd = resolve_install_cmd(worktree_path);
        let result = run_install(worktree_path, &install_cmd, timeout_secs)?;
        if result.exit_code != 0 {
            if let Some(fallback) = &fallback_cmd {
                warn!(cmd = %install_cmd.join(" "), "strict install failed; trying fallback once");
                used_fallback = true;
                let fallback_result = run_install(worktree_path, fallback, timeout_secs)?;
                ensure_install_ok(&fallback_result, worktree_path, fallback)?;
            } else {
                ensure_install_ok(&result, worktree_path, &install_cmd)?;
            }
        }
    }

    if !post_install_commands.is_empty() {
        match run_post_install_commands(worktree_path, post_install_commands, timeout_secs) {
            Ok(()) => {}
            Err(e) => {
                // One fallback install may repair a broken node_modules; retry
                // the post-install chain after it, once.
                if let (Some(fallback), false) = (&fallback_cmd, used_fallback) {
                    warn!(error = %e, "post-install failed; running fallback install and retrying");
                    let fallback_result = run_install(worktree_path, fallback, timeout_secs)?;
                    ensure_install_ok(&fallback_result, worktree_path, fallback)?;
                    run_post_install_commands(worktree_path, post_install_commands, timeout_secs)?;
                } else {
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_install_cmd_per_lockfile() {
        let dir = tempdir().unwrap();
        assert_eq!(resolve_install_cmd(dir.path()), strs(&["pnpm", "install"]));
        assert!(resolve_fallback_install_cmd(dir.path()).is_none());

        std::fs::write(dir.path().join("package-lock.json"), "{}").unwrap();
        assert_eq!(resolve_install_cmd(dir.path()), strs(&["npm", "ci"]));
        assert_eq!(
            resolve_fallback_install_cmd(dir.path()),
            Some(strs(&["npm", "install"]))
        );

        std::fs::write(dir.path().join("pnpm-lock.yaml"), "").unwrap();
        assert_eq!(
            resolve_install_cmd(dir.path()),
            strs(&["pnpm", "install", "--frozen-lockfile"])
        );
    }

    #[test]
    fn test_post_install_failure_carries_tail() {
        let dir = tempdir().unwrap();
        let err = maybe_install_deps_and_post_install(
            dir.path(),
            false,
            &["echo diagnostics >&2; exit 7".to_string()],
            30,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exit: 7"));
        assert!(msg.contains("diagnostics"));
    }

    #[test]
    fn test_post_install_success_runs_all() {
        let dir = tempdir().unwrap();
        maybe_install_deps_and_post_install(
            dir.path(),
            false,
            &["touch a.txt".to_string(), "touch b.txt".to_string()],
            30,
        )
        .unwrap();
        assert!(dir.path().join("a.txt").exists());
        assert!(dir.path().join("b.txt").exists());
    }
}
