//! Session entity: an agent work context persisted as JSON.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use edison_core::utc_timestamp;

/// Git sub-record written once a worktree is materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGit {
    pub worktree_path: String,
    pub branch_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: String,
    pub message: String,
}

/// A session. `state` is derived from the directory holding `session.json`
/// and is never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,

    #[serde(skip)]
    pub state: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default)]
    pub created_at: String,

    #[serde(default)]
    pub last_accessed: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activity_log: Vec<ActivityEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<SessionGit>,
}

impl Session {
    pub fn create(id: impl Into<String>, state: impl Into<String>, owner: Option<String>) -> Self {
        let now = utc_timestamp();
        Self {
            id: id.into(),
            state: state.into(),
            owner,
            created_at: now.clone(),
            last_accessed: now,
            activity_log: Vec::new(),
            git: None,
        }
    }

    pub fn add_activity(&mut self, message: impl Into<String>) {
        self.activity_log.push(ActivityEntry {
            timestamp: utc_timestamp(),
            message: message.into(),
        });
        self.last_accessed = utc_timestamp();
    }

    pub fn touch(&mut self) {
        self.last_accessed = utc_timestamp();
    }

    /// A session is expired when it has not been touched within the TTL.
    pub fn is_expired(&self, expiry_hours: u64) -> bool {
        let Ok(last) = DateTime::parse_from_rfc3339(&self.last_accessed) else {
            return false;
        };
        let last_utc = last.with_timezone(&Utc);
        Utc::now() - last_utc > Duration::hours(expiry_hours as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_not_serialized() {
        let session = Session::create("sess-a", "wip", None);
        let json = serde_json::to_string(&session).unwrap();
        assert!(!json.contains("\"state\""));
        assert!(json.contains("\"createdAt\""));
    }

    #[test]
    fn test_activity_log_touches_last_accessed() {
        let mut session = Session::create("sess-a", "wip", None);
        let before = session.last_accessed.clone();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        session.add_activity("Task 150 registered");
        assert!(session.last_accessed >= before);
        assert_eq!(session.activity_log.len(), 1);
    }

    #[test]
    fn test_expiry() {
        let mut session = Session::create("sess-a", "wip", None);
        assert!(!session.is_expired(1));
        session.last_accessed = "2000-01-01T00:00:00Z".into();
        assert!(session.is_expired(24));
    }

    #[test]
    fn test_git_subrecord_roundtrip() {
        let mut session = Session::create("sess-b", "wip", None);
        session.git = Some(SessionGit {
            worktree_path: "/repo/.worktrees/sess-b".into(),
            branch_name: "session/sess-b".into(),
            base_branch: Some("main".into()),
        });
        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"worktreePath\""));
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back.git, session.git);
    }
}
