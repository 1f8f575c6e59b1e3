//! File-backed repository for sessions.
//!
//! Nested layout: `<sessions-root>/<state>/<session_id>/session.json`. The
//! session directory also holds the session-scoped `tasks/` and `qa/` trees,
//! so a state change moves the whole directory.

use std::path::{Path, PathBuf};

use tracing::debug;

use edison_core::{write_atomic, EdisonError};
use edison_config::{ConfigManager, ManagementPaths, SessionConfig, WorkflowConfig};

use crate::session::Session;

pub struct SessionRepository {
    mgmt: ManagementPaths,
    lookup_order: Vec<String>,
    initial_state: String,
    expiry_hours: u64,
}

impl SessionRepository {
    pub fn new(config: &ConfigManager) -> Result<Self, EdisonError> {
        let workflow = WorkflowConfig::from_config(config)?;
        let session_cfg = SessionConfig::from_config(config);
        Ok(Self {
            mgmt: config.management_paths(),
            lookup_order: session_cfg.lookup_order().to_vec(),
            initial_state: workflow.initial_state("session")?.to_string(),
            expiry_hours: session_cfg.expiry_hours(),
        })
    }

    pub fn initial_state(&self) -> &str {
        &self.initial_state
    }

    pub fn session_dir(&self, state: &str, session_id: &str) -> PathBuf {
        self.mgmt.session_state_dir(state).join(session_id)
    }

    fn json_path(&self, state: &str, session_id: &str) -> PathBuf {
        self.session_dir(state, session_id).join("session.json")
    }

    fn find_json_path(&self, session_id: &str) -> Option<PathBuf> {
        for state in &self.lookup_order {
            let path = self.json_path(state, session_id);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    /// The directory holding a session's scoped record trees (`tasks/`,
    /// `qa/`), regardless of lifecycle state.
    pub fn session_base(&self, session_id: &str) -> Option<PathBuf> {
        self.find_json_path(session_id)
            .and_then(|p| p.parent().map(Path::to_path_buf))
    }

    /// All existing session base directories across lifecycle states.
    pub fn session_bases(&self) -> Vec<PathBuf> {
        let mut bases = Vec::new();
        for state in &self.lookup_order {
            let state_dir = self.mgmt.session_state_dir(state);
            let Ok(entries) = std::fs::read_dir(&state_dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() && path.join("session.json").exists() {
                    bases.push(path);
                }
            }
        }
        bases
    }

    fn state_from_path(path: &Path) -> String {
        path.parent()
            .and_then(Path::parent)
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string()
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.find_json_path(session_id).is_some()
    }

    pub fn create(&self, session: &Session) -> Result<(), EdisonError> {
        let path = self.json_path(&session.state, &session.id);
        if self.exists(&session.id) {
            return Err(EdisonError::Persistence(format!(
                "Session {} already exists",
                session.id
            )));
        }
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| EdisonError::Persistence(format!("Failed to serialize session: {e}")))?;
        write_atomic(&path, &json)?;
        debug!(session_id = %session.id, state = %session.state, "session created");
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> Result<Session, EdisonError> {
        let path = self
            .find_json_path(session_id)
            .ok_or_else(|| EdisonError::not_found("session", session_id))?;
        let mut session: Session = edison_core::read_json(&path)?;
        // Directory is the state.
        session.state = Self::state_from_path(&path);
        Ok(session)
    }

    pub fn save(&self, session: &Session) -> Result<(), EdisonError> {
        let current = self.find_json_path(&session.id);
        let target = self.json_path(&session.state, &session.id);

        let Some(current_path) = current else {
            let json = serde_json::to_string_pretty(session).map_err(|e| {
                EdisonError::Persistence(format!("Failed to serialize session: {e}"))
            })?;
            return write_atomic(&target, &json);
        };

        if current_path != target {
            // Move the whole session directory so scoped records travel too.
            let current_dir = current_path.parent().expect("session.json has a parent");
            let target_dir = target.parent().expect("session.json has a parent");
            if let Some(parent) = target_dir.parent() {
                edison_core::ensure_dir(parent)?;
            }
            std::fs::rename(current_dir, target_dir).map_err(|e| {
                EdisonError::Persistence(format!(
                    "Failed to move session {} to state {}: {e}",
                    session.id, session.state
                ))
            })?;
        }

        let json = serde_json::to_string_pretty(session)
            .map_err(|e| EdisonError::Persistence(format!("Failed to serialize session: {e}")))?;
        write_atomic(&target, &json)
    }

    pub fn delete(&self, session_id: &str) -> Result<bool, EdisonError> {
        match self.find_json_path(session_id) {
            Some(path) => {
                let dir = path.parent().expect("session.json has a parent");
                std::fs::remove_dir_all(dir).map_err(|e| {
                    EdisonError::Persistence(format!("Failed to delete session dir: {e}"))
                })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Tolerant listing: unparseable session files are skipped.
    pub fn list_by_state(&self, state: &str) -> Vec<Session> {
        let mut sessions = Vec::new();
        let state_dir = self.mgmt.session_state_dir(state);
        let Ok(entries) = std::fs::read_dir(&state_dir) else {
            return sessions;
        };
        for entry in entries.flatten() {
            let json_path = entry.path().join("session.json");
            if !json_path.exists() {
                continue;
            }
            match edison_core::read_json::<Session>(&json_path) {
                Ok(mut session) => {
                    session.state = state.to_string();
                    sessions.push(session);
                }
                Err(_) => continue,
            }
        }
        sessions
    }

    pub fn list_all(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = Vec::new();
        for state in &self.lookup_order {
            for session in self.list_by_state(state) {
                if !sessions.iter().any(|s| s.id == session.id) {
                    sessions.push(session);
                }
            }
        }
        sessions
    }

    pub fn find_by_owner(&self, owner: &str) -> Vec<Session> {
        self.list_all()
            .into_iter()
            .filter(|s| s.owner.as_deref() == Some(owner))
            .collect()
    }

    pub fn is_expired(&self, session_id: &str) -> Result<bool, EdisonError> {
        Ok(self.get(session_id)?.is_expired(self.expiry_hours))
    }
}
