//! Engine abstractions: validation results, verdicts, and the engine trait.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use edison_config::ValidatorSpec;

use crate::evidence::EvidenceService;

/// Outcome of one validator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approve,
    Reject,
    Blocked,
    Pending,
    Error,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Blocked => "blocked",
            Self::Pending => "pending",
            Self::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Verdict> {
        match raw.trim() {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            "blocked" => Some(Self::Blocked),
            "pending" => Some(Self::Pending),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Follow-up work a validator hands back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpTask {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zen_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions_path: Option<String>,
}

impl FollowUpTask {
    pub fn is_delegation(&self) -> bool {
        self.task_type == "delegation"
    }
}

/// Normalized result from any engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub validator_id: String,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_up_tasks: Vec<FollowUpTask>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_output: String,
    #[serde(default)]
    pub duration_secs: f64,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub scores: serde_json::Map<String, serde_json::Value>,
}

impl ValidationResult {
    pub fn new(validator_id: impl Into<String>, verdict: Verdict) -> Self {
        Self {
            validator_id: validator_id.into(),
            verdict,
            findings: Vec::new(),
            strengths: Vec::new(),
            summary: String::new(),
            follow_up_tasks: Vec::new(),
            raw_output: String::new(),
            duration_secs: 0.0,
            exit_code: 0,
            error: None,
            scores: serde_json::Map::new(),
        }
    }

    pub fn error_result(validator_id: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut result = Self::new(validator_id, Verdict::Error);
        result.summary = format!("Execution failed: {message}");
        result.error = Some(message);
        result
    }

    pub fn has_delegation(&self) -> bool {
        self.follow_up_tasks.iter().any(FollowUpTask::is_delegation)
    }

    /// Report payload persisted as `validator-<id>-report.md` frontmatter.
    pub fn to_report(
        &self,
        task_id: &str,
        round: u32,
        model: &str,
        zen_role: &str,
        started_at: &str,
        completed_at: &str,
    ) -> serde_json::Value {
        serde_json::json!({
            "taskId": task_id,
            "round": round,
            "validatorId": self.validator_id,
            "model": model,
            "zenRole": zen_role,
            "verdict": self.verdict.as_str(),
            "findings": self.findings,
            "strengths": self.strengths,
            "summary": self.summary,
            "followUpTasks": self.follow_up_tasks,
            "tracking": {
                "processId": format!("{}-{round}", self.validator_id),
                "startedAt": started_at,
                "completedAt": completed_at,
                "duration": self.duration_secs,
            },
            "scores": self.scores,
        })
    }
}

/// A single validator execution request.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub task_id: String,
    pub session_id: String,
    pub worktree_path: PathBuf,
    pub round: u32,
}

impl RunRequest {
    pub fn new(task_id: &str, session_id: &str, worktree_path: &Path, round: u32) -> Self {
        Self {
            task_id: task_id.to_string(),
            session_id: session_id.to_string(),
            worktree_path: worktree_path.to_path_buf(),
            round,
        }
    }
}

/// Execution backend. Two kinds exist: CLI (runs a tool) and delegated
/// (generates orchestrator instructions, never executes).
pub trait Engine: Send + Sync {
    fn can_execute(&self) -> bool;

    fn run(
        &self,
        validator: &ValidatorSpec,
        request: &RunRequest,
        evidence: &EvidenceService,
    ) -> ValidationResult;
}

/// Conventional zen role for a validator.
pub fn zen_role_for(validator_id: &str) -> String {
    format!("validator-{validator_id}")
}
