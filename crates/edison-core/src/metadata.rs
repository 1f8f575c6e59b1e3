//! Entity metadata and state-history entries shared by tasks, QA records,
//! and sessions.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Current UTC time as an RFC3339 string (second precision).
///
/// Frontmatter and session JSON carry timestamps as strings so files stay
/// diffable and hand-editable.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Creation/update bookkeeping stored in entity frontmatter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    #[serde(default)]
    pub created_at: String,

    #[serde(default)]
    pub updated_at: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl EntityMetadata {
    pub fn create(created_by: Option<String>, session_id: Option<String>) -> Self {
        let now = utc_timestamp();
        Self {
            created_at: now.clone(),
            updated_at: now,
            created_by,
            session_id,
        }
    }

    /// Bump `updated_at` to now.
    pub fn touch(&mut self) {
        self.updated_at = utc_timestamp();
    }
}

/// One append-only entry in an entity's transition log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    pub from: String,
    pub to: String,
    pub timestamp: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

impl StateHistoryEntry {
    pub fn create(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: Option<String>,
        violations: Vec<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            timestamp: utc_timestamp(),
            reason,
            violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_sets_both_timestamps() {
        let meta = EntityMetadata::create(Some("alice".into()), None);
        assert_eq!(meta.created_at, meta.updated_at);
        assert!(!meta.created_at.is_empty());
        assert_eq!(meta.created_by.as_deref(), Some("alice"));
    }

    #[test]
    fn test_touch_only_moves_updated_at() {
        let mut meta = EntityMetadata::create(None, None);
        let created = meta.created_at.clone();
        meta.touch();
        assert_eq!(meta.created_at, created);
    }

    #[test]
    fn test_history_entry_skips_empty_violations() {
        let entry = StateHistoryEntry::create("todo", "wip", Some("claimed".into()), vec![]);
        let yaml = serde_yaml::to_string(&entry).unwrap();
        assert!(!yaml.contains("violations"));
        assert!(yaml.contains("reason: claimed"));
    }

    #[test]
    fn test_history_entry_roundtrip() {
        let entry = StateHistoryEntry::create("wip", "done", None, vec!["missing report".into()]);
        let yaml = serde_yaml::to_string(&entry).unwrap();
        let back: StateHistoryEntry = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, entry);
    }
}
