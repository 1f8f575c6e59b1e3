//! Session lifecycle: creation with lazy worktree materialization, archive
//! into a terminal state, and restore.

use anyhow::{Context, Result};
use tracing::info;

use edison_config::ConfigManager;
use edison_core::new_session_id;
use edison_store::{Session, SessionGit, SessionRepository};

use crate::git;
use crate::refs::resolve_base_ref;
use crate::worktree::WorktreeManager;

pub struct SessionManager {
    repo: SessionRepository,
    worktrees: WorktreeManager,
    project_root: std::path::PathBuf,
    health_timeout: u64,
}

impl SessionManager {
    pub fn new(config: &ConfigManager) -> Result<Self> {
        Ok(Self {
            repo: SessionRepository::new(config)?,
            worktrees: WorktreeManager::new(config)?,
            project_root: config.project_root().to_path_buf(),
            health_timeout: config.subprocess_timeout("git_operations"),
        })
    }

    pub fn sessions(&self) -> &SessionRepository {
        &self.repo
    }

    pub fn worktrees(&self) -> &WorktreeManager {
        &self.worktrees
    }

    /// Allocate a session id, persist `session.json` in the initial state,
    /// and (inside a git repository) materialize an isolated worktree.
    ///
    /// An absent owner falls back to the ambient `AGENTS_OWNER` variable.
    pub fn create_session(&self, owner: Option<String>) -> Result<Session> {
        let owner = owner.or_else(|| {
            std::env::var(edison_config::ENV_OWNER)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        });
        let session_id = new_session_id();
        let mut session = Session::create(
            &session_id,
            self.repo.initial_state().to_string(),
            owner,
        );
        self.repo.create(&session)?;
        info!(session = %session_id, "session created");

        let in_git_repo = git::has_commits(&self.project_root, self.health_timeout).unwrap_or(false);
        if in_git_repo {
            if let Some((worktree_path, branch_name)) =
                self.worktrees.create_worktree(&session_id, None, None, false)?
            {
                let base_branch =
                    resolve_base_ref(&self.project_root, self.worktrees.config(), None);
                session.git = Some(SessionGit {
                    worktree_path: worktree_path.display().to_string(),
                    branch_name,
                    base_branch: Some(base_branch),
                });
                session.add_activity("Worktree materialized");
                self.repo.save(&session)?;
            }
        }

        Ok(session)
    }

    /// Archive a session: worktree moves into the archive tree, the session
    /// record moves to the `done` state directory.
    pub fn archive_session(&self, session_id: &str) -> Result<Session> {
        let mut session = self.repo.get(session_id)?;
        if let Some(git_info) = &session.git {
            let worktree_path = std::path::PathBuf::from(&git_info.worktree_path);
            self.worktrees.archive_worktree(session_id, &worktree_path)?;
        }
        session.state = "done".to_string();
        session.add_activity("Session archived");
        self.repo.save(&session)?;
        Ok(session)
    }

    /// Restore an archived session's worktree via the standard creation path.
    pub fn restore_session(&self, session_id: &str) -> Result<Session> {
        let mut session = self.repo.get(session_id)?;
        let restored = self
            .worktrees
            .restore_worktree(session_id, None, None)
            .context("failed to restore session worktree")?;

        let branch_name = self.worktrees.config().branch_name(session_id);
        session.git = Some(SessionGit {
            worktree_path: restored.display().to_string(),
            branch_name,
            base_branch: session.git.as_ref().and_then(|g| g.base_branch.clone()),
        });
        session.state = "wip".to_string();
        session.add_activity("Session restored from archive");
        self.repo.save(&session)?;
        Ok(session)
    }
}
