//! Config-driven CLI engine: one implementation for every CLI-based
//! validator tool.
//!
//! Builds the command from [`EngineSpec`], runs it with the validator's
//! timeout, parses stdout via the configured parser, derives a verdict, and
//! captures raw output as evidence.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use edison_config::{EngineSpec, ValidatorSpec};

use crate::engine::{Engine, RunRequest, ValidationResult, Verdict};
use crate::evidence::EvidenceService;
use crate::parsers::ParserRegistry;

pub struct CliEngine {
    engine_id: String,
    spec: EngineSpec,
    project_root: PathBuf,
    config_dir_name: String,
    parsers: ParserRegistry,
}

impl CliEngine {
    pub fn new(
        engine_id: &str,
        spec: EngineSpec,
        project_root: PathBuf,
        config_dir_name: String,
        parsers: ParserRegistry,
    ) -> Self {
        Self {
            engine_id: engine_id.to_string(),
            spec,
            project_root,
            config_dir_name,
            parsers,
        }
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    /// Resolve a validator prompt path: absolute, under the project config
    /// dir, or project-relative.
    fn resolve_prompt_path(&self, prompt: &str) -> Option<PathBuf> {
        if prompt.is_empty() {
            return None;
        }
        let raw = PathBuf::from(prompt);
        if raw.is_absolute() {
            return raw.exists().then_some(raw);
        }
        let in_config = self.project_root.join(&self.config_dir_name).join(prompt);
        if in_config.exists() {
            return Some(in_config);
        }
        let direct = self.project_root.join(prompt);
        direct.exists().then_some(direct)
    }

    fn build_command(&self, validator: &ValidatorSpec) -> Vec<String> {
        let mut cmd = vec![self.spec.command.clone()];
        if !self.spec.subcommand.is_empty() {
            cmd.push(self.spec.subcommand.clone());
        }
        cmd.extend(self.spec.output_flags.iter().cloned());
        cmd.extend(self.spec.read_only_flags.iter().cloned());
        if let Some(prompt_path) = self.resolve_prompt_path(&validator.prompt) {
            cmd.push(prompt_path.display().to_string());
        }
        cmd
    }

    /// Derive a verdict from an unambiguous response; `None` means pending.
    fn extract_verdict(response: &str) -> Option<Verdict> {
        let lower = response.to_lowercase();
        if lower.contains("approve") {
            if lower.contains("not approved") || lower.contains("cannot approve") {
                return Some(Verdict::Reject);
            }
            return Some(Verdict::Approve);
        }
        if lower.contains("reject") {
            return Some(Verdict::Reject);
        }
        if lower.contains("blocked") || lower.contains("blocking") {
            return Some(Verdict::Blocked);
        }
        None
    }
}

impl Engine for CliEngine {
    fn can_execute(&self) -> bool {
        if self.spec.command.is_empty() {
            return false;
        }
        which::which(&self.spec.command).is_ok()
    }

    fn run(
        &self,
        validator: &ValidatorSpec,
        request: &RunRequest,
        evidence: &EvidenceService,
    ) -> ValidationResult {
        let started = Instant::now();
        let cmd = self.build_command(validator);

        info!(
            validator = %validator.id,
            command = %cmd[0],
            "running CLI validator"
        );
        debug!(full_command = ?cmd, "CLI validator command");

        let args: Vec<&str> = cmd.iter().skip(1).map(String::as_str).collect();
        let output = match edison_process::run_with_timeout(
            &cmd[0],
            &args,
            Some(&request.worktree_path),
            Duration::from_secs(validator.timeout),
        ) {
            Ok(output) => output,
            Err(e) => {
                warn!(validator = %validator.id, error = %e, "CLI validator failed to run");
                let mut result = ValidationResult::error_result(&validator.id, e.to_string());
                result.duration_secs = started.elapsed().as_secs_f64();
                result.exit_code = -1;
                return result;
            }
        };

        let parser = self.parsers.get(&self.spec.response_parser);
        let parsed = parser(&output.stdout);

        let _ = evidence.save_command_capture(
            request.round,
            &validator.id,
            &self.engine_id,
            &cmd.join(" "),
            output.exit_code,
            &output.stdout,
            &output.stderr,
        );

        // Exit code 0 plus an unambiguous response drives the verdict;
        // everything else is pending (manual review) or error.
        let verdict = if output.exit_code != 0 {
            Verdict::Error
        } else if parsed.error.is_some() {
            Verdict::Pending
        } else {
            Self::extract_verdict(&parsed.response).unwrap_or(Verdict::Pending)
        };

        let mut result = ValidationResult::new(&validator.id, verdict);
        result.summary = if parsed.response.is_empty() {
            format!("Exit code: {}", output.exit_code)
        } else {
            parsed.response.chars().take(500).collect()
        };
        result.raw_output = output.stdout;
        result.duration_secs = started.elapsed().as_secs_f64();
        result.exit_code = output.exit_code;
        result.error = parsed.error.or_else(|| {
            (output.exit_code != 0).then(|| output.stderr.trim().to_string())
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn spec(command: &str, parser: &str) -> EngineSpec {
        EngineSpec {
            engine_type: "cli".into(),
            command: command.into(),
            subcommand: String::new(),
            output_flags: vec![],
            read_only_flags: vec![],
            response_parser: parser.into(),
            description: String::new(),
        }
    }

    fn validator(id: &str, timeout: u64) -> ValidatorSpec {
        let value: serde_yaml::Value =
            serde_yaml::from_str(&format!("engine: test\ntimeout: {timeout}")).unwrap();
        ValidatorSpec::from_value(id, &value).unwrap()
    }

    fn engine_for(command: &str, root: &std::path::Path) -> CliEngine {
        CliEngine::new(
            "test-cli",
            spec(command, "plain_text"),
            root.to_path_buf(),
            ".edison".into(),
            ParserRegistry::with_builtins(),
        )
    }

    #[test]
    fn test_can_execute_checks_path() {
        let dir = tempdir().unwrap();
        assert!(engine_for("sh", dir.path()).can_execute());
        assert!(!engine_for("no-such-binary-zz", dir.path()).can_execute());
        assert!(!engine_for("", dir.path()).can_execute());
    }

    #[test]
    fn test_run_approved_output() {
        let dir = tempdir().unwrap();
        // `echo` prints its args; simulate an approving validator.
        let mut engine_spec = spec("echo", "plain_text");
        engine_spec.output_flags = vec!["APPROVED: clean".into()];
        let engine = CliEngine::new(
            "echo-cli",
            engine_spec,
            dir.path().to_path_buf(),
            ".edison".into(),
            ParserRegistry::with_builtins(),
        );

        let evidence = EvidenceService::new("T1", dir.path().join("evidence/T1"));
        evidence.create_next_round().unwrap();
        let request = RunRequest::new("T1", "sess", dir.path(), 1);
        let result = engine.run(&validator("v-echo", 30), &request, &evidence);

        assert_eq!(result.verdict, Verdict::Approve);
        assert_eq!(result.exit_code, 0);
        assert!(evidence.round_dir(1).join("command-v-echo.txt").exists());
    }

    #[test]
    fn test_run_nonzero_exit_is_error_verdict() {
        let dir = tempdir().unwrap();
        let mut engine_spec = spec("sh", "plain_text");
        engine_spec.output_flags = vec!["-c".into(), "echo broken >&2; exit 2".into()];
        let engine = CliEngine::new(
            "sh-cli",
            engine_spec,
            dir.path().to_path_buf(),
            ".edison".into(),
            ParserRegistry::with_builtins(),
        );

        let evidence = EvidenceService::new("T1", dir.path().join("evidence/T1"));
        evidence.create_next_round().unwrap();
        let request = RunRequest::new("T1", "sess", dir.path(), 1);
        let result = engine.run(&validator("v-sh", 30), &request, &evidence);

        assert_eq!(result.verdict, Verdict::Error);
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.error.as_deref(), Some("broken"));
    }

    #[test]
    fn test_ambiguous_output_is_pending() {
        let dir = tempdir().unwrap();
        let mut engine_spec = spec("echo", "plain_text");
        engine_spec.output_flags = vec!["inconclusive analysis".into()];
        let engine = CliEngine::new(
            "echo-cli",
            engine_spec,
            dir.path().to_path_buf(),
            ".edison".into(),
            ParserRegistry::with_builtins(),
        );
        let evidence = EvidenceService::new("T1", dir.path().join("evidence/T1"));
        evidence.create_next_round().unwrap();
        let request = RunRequest::new("T1", "sess", dir.path(), 1);
        let result = engine.run(&validator("v", 30), &request, &evidence);
        assert_eq!(result.verdict, Verdict::Pending);
    }

    #[test]
    fn test_verdict_extraction_negations() {
        assert_eq!(CliEngine::extract_verdict("APPROVED"), Some(Verdict::Approve));
        assert_eq!(
            CliEngine::extract_verdict("cannot approve this"),
            Some(Verdict::Reject)
        );
        assert_eq!(CliEngine::extract_verdict("REJECTED"), Some(Verdict::Reject));
        assert_eq!(CliEngine::extract_verdict("blocking issue"), Some(Verdict::Blocked));
        assert_eq!(CliEngine::extract_verdict("nothing conclusive"), None);
    }

    #[test]
    fn test_prompt_path_resolution() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".edison/prompts")).unwrap();
        std::fs::write(dir.path().join(".edison/prompts/v.md"), "prompt").unwrap();
        let engine = engine_for("echo", dir.path());
        let resolved = engine.resolve_prompt_path("prompts/v.md").unwrap();
        assert!(resolved.ends_with(".edison/prompts/v.md"));
        assert!(engine.resolve_prompt_path("missing.md").is_none());
    }
}
