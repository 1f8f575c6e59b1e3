//! QA record entity: the validation brief for a task.

use serde::{Deserialize, Serialize};

use edison_core::{EntityMetadata, StateHistoryEntry};

/// One completed validation round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundHistoryEntry {
    pub round: u32,
    pub status: String,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A QA record, conventionally `<task_id>-qa`. State mirrors the containing
/// directory.
#[derive(Debug, Clone, PartialEq)]
pub struct QaRecord {
    pub id: String,
    pub task_id: String,
    pub state: String,
    pub title: String,
    pub session_id: Option<String>,
    pub validator_owner: Option<String>,
    pub metadata: EntityMetadata,
    pub state_history: Vec<StateHistoryEntry>,
    /// 1-indexed current round.
    pub round: u32,
    pub round_history: Vec<RoundHistoryEntry>,
    pub validators: Vec<String>,
    pub evidence: Vec<String>,
}

impl QaRecord {
    pub fn create(
        qa_id: impl Into<String>,
        task_id: impl Into<String>,
        title: impl Into<String>,
        state: impl Into<String>,
        session_id: Option<String>,
    ) -> Self {
        Self {
            id: qa_id.into(),
            task_id: task_id.into(),
            state: state.into(),
            title: title.into(),
            session_id: session_id.clone(),
            validator_owner: None,
            metadata: EntityMetadata::create(None, session_id),
            state_history: Vec::new(),
            round: 1,
            round_history: Vec::new(),
            validators: Vec::new(),
            evidence: Vec::new(),
        }
    }

    pub fn record_transition(
        &mut self,
        from: &str,
        to: &str,
        reason: Option<String>,
        violations: Vec<String>,
    ) {
        self.state_history
            .push(StateHistoryEntry::create(from, to, reason, violations));
        self.metadata.touch();
    }

    /// Close the current round with a status and start the next one.
    pub fn advance_round(&mut self, status: impl Into<String>, notes: Option<String>) {
        self.round_history.push(RoundHistoryEntry {
            round: self.round,
            status: status.into(),
            date: edison_core::utc_timestamp(),
            notes,
        });
        self.round += 1;
        self.metadata.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_starts_at_round_one() {
        let qa = QaRecord::create("150-auth-qa", "150-auth", "QA: Auth", "waiting", None);
        assert_eq!(qa.round, 1);
        assert!(qa.round_history.is_empty());
        assert_eq!(qa.task_id, "150-auth");
    }

    #[test]
    fn test_advance_round_records_history() {
        let mut qa = QaRecord::create("x-qa", "x", "QA", "wip", None);
        qa.advance_round("rejected", Some("two blocking findings".into()));
        assert_eq!(qa.round, 2);
        assert_eq!(qa.round_history.len(), 1);
        assert_eq!(qa.round_history[0].round, 1);
        assert_eq!(qa.round_history[0].status, "rejected");
    }
}
