//! Session worktree lifecycle: create, restore, archive, cleanup, prune.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use edison_config::{ConfigManager, SharedStateMode, WorktreeConfig};

use crate::deps::maybe_install_deps_and_post_install;
use crate::excludes::{ensure_worktree_excludes, exclude_patterns_for_scope};
use crate::git;
use crate::health::validate_worktree_checkout;
use crate::meta::resolve_shared_root;
use crate::refs::{resolve_base_ref, resolve_start_ref};
use crate::session_id::ensure_worktree_session_id_file;
use crate::shared::ensure_shared_paths_in_checkout;

/// Set to `1` to stream creation progress to stderr.
pub const ENV_CREATE_PROGRESS: &str = "EDISON_SESSION_CREATE_PROGRESS";

pub struct WorktreeManager {
    project_root: PathBuf,
    management_dir_name: String,
    config: WorktreeConfig,
}

fn progress(message: &str) {
    if std::env::var(ENV_CREATE_PROGRESS).as_deref() == Ok("1") {
        eprintln!("[edison] {message}");
    }
}

impl WorktreeManager {
    pub fn new(config: &ConfigManager) -> Result<Self> {
        let worktree_config = WorktreeConfig::from_config(config)?;
        let management_dir_name = config
            .management_paths()
            .management_root()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(".project")
            .to_string();
        Ok(Self {
            project_root: config.project_root().to_path_buf(),
            management_dir_name,
            config: worktree_config,
        })
    }

    pub fn config(&self) -> &WorktreeConfig {
        &self.config
    }

    /// Predicted `(path, branch)` for a session under current config.
    pub fn resolve_target(&self, session_id: &str) -> (PathBuf, String) {
        (
            self.config.worktree_path(&self.project_root, session_id),
            self.config.branch_name(session_id),
        )
    }

    /// Worktree currently checked out on `branch`, if any.
    fn existing_worktree_for_branch(&self, branch: &str) -> Result<Option<PathBuf>> {
        let out = git::git_checked(
            &self.project_root,
            &["worktree", "list", "--porcelain"],
            self.config.timeouts.health_check,
        )?;
        let wanted = format!("branch refs/heads/{branch}");
        let mut current: Option<PathBuf> = None;
        for line in out.stdout.lines() {
            if let Some(rest) = line.strip_prefix("worktree ") {
                current = Some(PathBuf::from(rest.trim()));
            } else if line.trim() == wanted {
                return Ok(current);
            }
        }
        Ok(None)
    }

    fn fetch(&self) {
        progress("Fetching remotes (git fetch --all --prune)...");
        let _ = git::run_git(
            &self.project_root,
            &["fetch", "--all", "--prune"],
            self.config.timeouts.fetch,
        );
    }

    fn link_shared_state(&self, checkout_path: &Path, session_id: Option<&str>) -> Result<()> {
        let primary = git::worktree_parent(&self.project_root, self.config.timeouts.health_check)?;
        let shared_root = resolve_shared_root(&self.project_root, &self.config)?;

        ensure_shared_paths_in_checkout(checkout_path, &shared_root, &primary, &self.config, "session")?;
        if let Some(sid) = session_id {
            ensure_worktree_session_id_file(checkout_path, &self.management_dir_name, sid)?;
        }
        ensure_worktree_excludes(
            checkout_path,
            &exclude_patterns_for_scope(&self.config, "session"),
            self.config.timeouts.health_check,
        )?;

        // In meta mode the primary checkout shares the same state tree.
        if self.config.shared_state.mode == SharedStateMode::Meta {
            ensure_shared_paths_in_checkout(&primary, &shared_root, &primary, &self.config, "primary")?;
            ensure_worktree_excludes(
                &primary,
                &exclude_patterns_for_scope(&self.config, "primary"),
                self.config.timeouts.health_check,
            )?;
        }
        Ok(())
    }

    /// Create (or reuse) the session worktree. Returns `None` when worktrees
    /// are disabled.
    ///
    /// Invariant: the primary worktree's HEAD ref must not change; before and
    /// after markers are compared and a mismatch is a hard failure.
    pub fn create_worktree(
        &self,
        session_id: &str,
        base_branch_override: Option<&str>,
        install_deps_override: Option<bool>,
        dry_run: bool,
    ) -> Result<Option<(PathBuf, String)>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let (mut worktree_path, branch_name) = self.resolve_target(session_id);
        let base_ref = resolve_base_ref(&self.project_root, &self.config, base_branch_override);

        if let Some(existing) = self.existing_worktree_for_branch(&branch_name)? {
            if !dry_run {
                progress(&format!(
                    "Worktree exists for {branch_name}; reusing {}",
                    existing.display()
                ));
                self.link_shared_state(&existing, Some(session_id))?;
            }
            return Ok(Some((existing, branch_name)));
        }

        if !git::has_commits(&self.project_root, self.config.timeouts.health_check)? {
            anyhow::bail!("Repository has no commits; cannot create worktree");
        }

        if dry_run {
            return Ok(Some((worktree_path, branch_name)));
        }

        // Occupied target path: append a short random suffix.
        if worktree_path.exists() && worktree_path.read_dir().map(|mut d| d.next().is_some()).unwrap_or(false) {
            let base_name = worktree_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(session_id)
                .to_string();
            let parent = worktree_path.parent().map(Path::to_path_buf).unwrap_or_default();
            for _ in 0..5 {
                let suffix = ulid::Ulid::new().to_string().to_lowercase();
                let suffix = &suffix[suffix.len() - self.config.uuid_suffix_length.min(suffix.len())..];
                let candidate = parent.join(format!("{base_name}-{suffix}"));
                if !candidate.exists() {
                    worktree_path = candidate;
                    break;
                }
            }
        }
        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let primary_before =
            git::primary_head_marker(&self.project_root, self.config.timeouts.branch_check);
        let start_ref =
            resolve_start_ref(&self.project_root, &base_ref, self.config.timeouts.branch_check)?;
        let fetch_mode = self.config.normalized_fetch_mode();

        if fetch_mode == "always" {
            self.fetch();
        }

        let branch_ref = format!("refs/heads/{branch_name}");
        let worktree_str = worktree_path.to_str().context("non-utf8 worktree path")?;
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..2 {
            let result = if git::ref_exists(
                &self.project_root,
                &branch_ref,
                self.config.timeouts.branch_check,
            )? {
                progress(&format!(
                    "Adding worktree checkout at {} for existing branch {branch_name}...",
                    worktree_path.display()
                ));
                git::git_checked(
                    &self.project_root,
                    &["worktree", "add", "--", worktree_str, &branch_name],
                    self.config.timeouts.worktree_add,
                )
            } else {
                progress(&format!(
                    "Adding worktree checkout at {} ({branch_name} from {start_ref})...",
                    worktree_path.display()
                ));
                git::git_checked(
                    &self.project_root,
                    &["worktree", "add", "-b", &branch_name, "--", worktree_str, &start_ref],
                    self.config.timeouts.worktree_add,
                )
            };

            match result {
                Ok(_) => {
                    last_err = None;
                    break;
                }
                Err(e) => {
                    progress(&format!(
                        "Worktree add failed; pruning and retrying (attempt {}/2)...",
                        attempt + 1
                    ));
                    last_err = Some(e);
                    let _ = git::run_git(
                        &self.project_root,
                        &["worktree", "prune"],
                        self.config.timeouts.prune,
                    );
                    if fetch_mode != "never" {
                        self.fetch();
                    }
                }
            }
        }
        if let Some(e) = last_err {
            return Err(e.context("Failed to create worktree after retries"));
        }

        maybe_install_deps_and_post_install(
            &worktree_path,
            install_deps_override.unwrap_or(self.config.install_deps),
            &self.config.post_install_commands,
            self.config.timeouts.install,
        )?;

        validate_worktree_checkout(
            &worktree_path,
            &branch_name,
            self.config.timeouts.health_check,
        )
        .context("Worktree health checks failed")?;

        progress("Linking shared paths + git excludes...");
        self.link_shared_state(&worktree_path, Some(session_id))?;

        let primary_after =
            git::primary_head_marker(&self.project_root, self.config.timeouts.branch_check);
        if primary_before != primary_after {
            anyhow::bail!(
                "Primary worktree HEAD changed during worktree creation: {primary_before} -> {primary_after}"
            );
        }

        info!(session = session_id, path = %worktree_path.display(), "worktree ready");
        Ok(Some((worktree_path, branch_name)))
    }

    /// Move a worktree into the archive directory and unregister it.
    pub fn archive_worktree(&self, session_id: &str, worktree_path: &Path) -> Result<PathBuf> {
        let archive_root = self.config.archive_path(&self.project_root);
        std::fs::create_dir_all(&archive_root)?;
        let archived = archive_root.join(session_id);

        if worktree_path.exists() {
            std::fs::rename(worktree_path, &archived).with_context(|| {
                format!("Failed to archive worktree {}", worktree_path.display())
            })?;
        }
        // Unregister both locations; failures are tolerated.
        let _ = git::run_git(
            &self.project_root,
            &["worktree", "remove", "--force", "--", archived.to_str().unwrap_or_default()],
            self.config.timeouts.prune,
        );
        let _ = git::run_git(
            &self.project_root,
            &["worktree", "prune"],
            self.config.timeouts.prune,
        );
        Ok(archived)
    }

    /// Restore an archived worktree: delete the archive copy, recreate via
    /// the standard path (re-registers with git), and assert the predicted
    /// location.
    pub fn restore_worktree(
        &self,
        session_id: &str,
        source: Option<&Path>,
        base_branch: Option<&str>,
    ) -> Result<PathBuf> {
        let (expected_path, _branch) = self.resolve_target(session_id);

        let archive_root = self.config.archive_path(&self.project_root);
        let src = match source {
            Some(explicit) => {
                if explicit.file_name().and_then(|n| n.to_str()) == Some(session_id) {
                    explicit.to_path_buf()
                } else {
                    explicit.join(session_id)
                }
            }
            None => archive_root.join(session_id),
        };
        if !src.exists() {
            anyhow::bail!("Archived worktree not found: {}", src.display());
        }
        std::fs::remove_dir_all(&src)?;

        let (created_path, _branch) = self
            .create_worktree(session_id, base_branch, Some(false), false)?
            .context("worktrees disabled; cannot restore")?;

        if created_path != expected_path {
            anyhow::bail!(
                "Restored worktree path mismatch: expected {}, got {}",
                expected_path.display(),
                created_path.display()
            );
        }
        Ok(created_path)
    }

    /// Remove a worktree and optionally delete its local branch. Failures
    /// are tolerated; a stray directory is swept away.
    pub fn cleanup_worktree(&self, worktree_path: &Path, branch_name: Option<&str>, delete_branch: bool) {
        let removed = git::run_git(
            &self.project_root,
            &["worktree", "remove", "--force", "--", worktree_path.to_str().unwrap_or_default()],
            self.config.timeouts.prune,
        );
        if removed.map(|o| o.exit_code != 0).unwrap_or(true) && worktree_path.exists() {
            warn!(path = %worktree_path.display(), "git worktree remove failed; deleting directory");
            let _ = std::fs::remove_dir_all(worktree_path);
        }
        if delete_branch {
            if let Some(branch) = branch_name {
                let _ = git::run_git(
                    &self.project_root,
                    &["branch", "-D", "--", branch],
                    self.config.timeouts.prune,
                );
            }
        }
    }

    /// Drop stale worktree registrations.
    pub fn prune_worktrees(&self) {
        let _ = git::run_git(
            &self.project_root,
            &["worktree", "prune"],
            self.config.timeouts.prune,
        );
    }
}
