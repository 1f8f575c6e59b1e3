//! Delegated engine: never executes anything. Generates Markdown
//! instructions for an orchestrator (human or AI) and returns a pending
//! verdict with a single `delegation` follow-up.

use tracing::info;

use edison_config::ValidatorSpec;

use crate::engine::{zen_role_for, Engine, FollowUpTask, RunRequest, ValidationResult, Verdict};
use crate::evidence::EvidenceService;

pub struct DelegatedEngine;

impl DelegatedEngine {
    pub fn new() -> Self {
        Self
    }

    fn build_instructions(validator: &ValidatorSpec, request: &RunRequest) -> String {
        let mut lines = vec![
            format!("# Validator Delegation: {}", validator.name),
            String::new(),
            "## Context".to_string(),
            format!("- **Validator ID**: {}", validator.id),
            format!("- **Task ID**: {}", request.task_id),
            format!("- **Session ID**: {}", request.session_id),
            format!("- **Round**: {}", request.round),
            format!("- **Worktree**: {}", request.worktree_path.display()),
            String::new(),
            "## Zen Role".to_string(),
            format!("Execute as: `{}`", zen_role_for(&validator.id)),
            String::new(),
        ];

        if !validator.prompt.is_empty() {
            lines.push("## Prompt File".to_string());
            lines.push(format!("Use validation prompt from: `{}`", validator.prompt));
            lines.push(String::new());
        }
        if !validator.focus.is_empty() {
            lines.push("## Focus Areas".to_string());
            for focus in &validator.focus {
                lines.push(format!("- {focus}"));
            }
            lines.push(String::new());
        }
        if validator.context7_required {
            lines.push("## Context7 Requirements".to_string());
            lines.push(format!(
                "Required packages: {}",
                validator.context7_packages.join(", ")
            ));
            lines.push(String::new());
        }

        lines.extend([
            "## Instructions".to_string(),
            String::new(),
            "1. Read the validator prompt file specified above".to_string(),
            "2. Review the code changes in the worktree".to_string(),
            "3. Apply the validation criteria to the changes".to_string(),
            "4. Produce a validation report with:".to_string(),
            "   - Verdict: approve / reject / blocked".to_string(),
            "   - Findings: List of issues found".to_string(),
            "   - Strengths: Positive aspects of the implementation".to_string(),
            "   - Summary: Overall assessment".to_string(),
            String::new(),
            "## Expected Output".to_string(),
            String::new(),
            "Save the validation report to:".to_string(),
            format!("`validator-{}-report.md`", validator.id),
            String::new(),
        ]);

        lines.join("\n")
    }
}

impl Default for DelegatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for DelegatedEngine {
    /// Delegation instructions can always be generated.
    fn can_execute(&self) -> bool {
        true
    }

    fn run(
        &self,
        validator: &ValidatorSpec,
        request: &RunRequest,
        evidence: &EvidenceService,
    ) -> ValidationResult {
        info!(validator = %validator.id, "generating delegation instructions");
        let instructions = Self::build_instructions(validator, request);

        let instructions_path = evidence
            .write_delegation_instructions(request.round, &validator.id, &instructions)
            .ok()
            .map(|p| p.display().to_string());

        let mut result = ValidationResult::new(&validator.id, Verdict::Pending);
        result.summary = format!("Delegation required for {}", validator.name);
        result.raw_output = instructions;
        result.follow_up_tasks.push(FollowUpTask {
            task_type: "delegation".into(),
            validator: Some(validator.id.clone()),
            zen_role: Some(zen_role_for(&validator.id)),
            instructions_path,
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn validator() -> ValidatorSpec {
        let value: serde_yaml::Value = serde_yaml::from_str(concat!(
            "name: Global Codex Review\n",
            "engine: codex-cli\n",
            "prompt: prompts/global.md\n",
            "focus: [correctness, security]\n",
        ))
        .unwrap();
        ValidatorSpec::from_value("global-codex", &value).unwrap()
    }

    #[test]
    fn test_run_returns_pending_with_delegation() {
        let dir = tempdir().unwrap();
        let evidence = EvidenceService::new("T1", dir.path().join("ev/T1"));
        evidence.create_next_round().unwrap();
        let request = RunRequest::new("T1", "sess-A", dir.path(), 1);

        let result = DelegatedEngine::new().run(&validator(), &request, &evidence);

        assert_eq!(result.verdict, Verdict::Pending);
        assert!(result.has_delegation());
        let follow_up = &result.follow_up_tasks[0];
        assert_eq!(follow_up.zen_role.as_deref(), Some("validator-global-codex"));

        // Instructions landed in the round directory.
        let instructions_path = dir.path().join("ev/T1/round-1/delegation-global-codex.md");
        assert!(instructions_path.exists());
        let content = std::fs::read_to_string(instructions_path).unwrap();
        assert!(content.contains("# Validator Delegation: Global Codex Review"));
        assert!(content.contains("- **Round**: 1"));
        assert!(content.contains("`validator-global-codex-report.md`"));
        assert!(content.contains("- correctness"));
    }

    #[test]
    fn test_always_executable() {
        assert!(DelegatedEngine::new().can_execute());
    }
}
