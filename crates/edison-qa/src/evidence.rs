//! Evidence capture: dense, monotonic rounds under
//! `<qa-root>/<evidence-subdir>/<task_id>/round-N/`, command captures, and
//! validator reports as Markdown with YAML frontmatter.

use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;

use edison_core::{ensure_dir, write_atomic, EdisonError};
use edison_store::{format_frontmatter, has_frontmatter, parse_frontmatter};

const VALIDATOR_PREFIX: &str = "validator-";
const REPORT_SUFFIX: &str = "-report.md";

/// Owns the round directory layout for one task's evidence.
#[derive(Debug, Clone)]
pub struct EvidenceService {
    task_id: String,
    base: PathBuf,
}

impl EvidenceService {
    pub fn new(task_id: &str, evidence_base: PathBuf) -> Self {
        Self {
            task_id: task_id.to_string(),
            base: evidence_base,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn evidence_root(&self) -> &Path {
        &self.base
    }

    pub fn round_dir(&self, round: u32) -> PathBuf {
        self.base.join(format!("round-{round}"))
    }

    /// Existing round numbers, ascending.
    pub fn list_rounds(&self) -> Vec<u32> {
        let Ok(entries) = std::fs::read_dir(&self.base) else {
            return Vec::new();
        };
        let mut rounds: Vec<u32> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if !path.is_dir() {
                    return None;
                }
                path.file_name()?
                    .to_str()?
                    .strip_prefix("round-")?
                    .parse::<u32>()
                    .ok()
            })
            .collect();
        rounds.sort_unstable();
        rounds
    }

    pub fn current_round(&self) -> Option<u32> {
        self.list_rounds().into_iter().next_back()
    }

    /// Create the next round. Rounds are dense: round N requires 1..N-1.
    pub fn create_next_round(&self) -> Result<u32, EdisonError> {
        let rounds = self.list_rounds();
        for (index, round) in rounds.iter().enumerate() {
            let expected = index as u32 + 1;
            if *round != expected {
                return Err(EdisonError::Persistence(format!(
                    "Evidence rounds for {} are not dense: expected round-{expected}, found round-{round}",
                    self.task_id
                )));
            }
        }
        let next = rounds.len() as u32 + 1;
        ensure_dir(&self.round_dir(next))?;
        Ok(next)
    }

    /// Resolve the round to operate on: a specific existing round, or the
    /// latest, creating round 1 when none exist.
    pub fn ensure_round(&self, round: Option<u32>) -> Result<u32, EdisonError> {
        match round {
            Some(n) => {
                let rounds = self.list_rounds();
                if rounds.contains(&n) {
                    return Ok(n);
                }
                // Only the next dense round may be created on demand.
                if n == rounds.len() as u32 + 1 {
                    return self.create_next_round();
                }
                Err(EdisonError::Persistence(format!(
                    "Evidence round-{n} for {} requires rounds 1..{} to exist first",
                    self.task_id,
                    n.saturating_sub(1)
                )))
            }
            None => match self.current_round() {
                Some(current) => Ok(current),
                None => self.create_next_round(),
            },
        }
    }

    // ---------- Command captures ----------

    /// Write `command-<name>.txt` with the standard capture framing.
    pub fn save_command_capture(
        &self,
        round: u32,
        name: &str,
        engine_id: &str,
        command: &str,
        exit_code: i32,
        stdout: &str,
        stderr: &str,
    ) -> Result<PathBuf, EdisonError> {
        let dir = self.round_dir(round);
        ensure_dir(&dir)?;
        let path = dir.join(format!("command-{name}.txt"));
        let content = format!(
            "=== CLI Validator: {name} ===\nEngine: {engine_id}\nCommand: {command}\nExit Code: {exit_code}\n\n=== STDOUT ===\n{stdout}\n\n=== STDERR ===\n{stderr}\n"
        );
        write_atomic(&path, &content)?;
        Ok(path)
    }

    // ---------- Validator reports ----------

    fn normalize_validator_name(name: &str) -> &str {
        name.trim().strip_prefix(VALIDATOR_PREFIX).unwrap_or(name.trim())
    }

    pub fn validator_report_path(&self, round: u32, validator: &str) -> PathBuf {
        let normalized = Self::normalize_validator_name(validator);
        self.round_dir(round)
            .join(format!("{VALIDATOR_PREFIX}{normalized}{REPORT_SUFFIX}"))
    }

    /// Write a validator report (frontmatter payload, body preserved when
    /// the file already exists).
    pub fn write_validator_report(
        &self,
        round: u32,
        validator: &str,
        payload: &JsonValue,
    ) -> Result<PathBuf, EdisonError> {
        let path = self.validator_report_path(round, validator);
        ensure_dir(path.parent().expect("report path has a parent"))?;

        let existing_body = std::fs::read_to_string(&path)
            .ok()
            .filter(|content| has_frontmatter(content))
            .and_then(|content| parse_frontmatter(&content).ok())
            .map(|doc| doc.body)
            .unwrap_or_default();

        let yaml_value: serde_yaml::Value = serde_yaml::to_value(payload)
            .map_err(|e| EdisonError::Persistence(format!("report serialization failed: {e}")))?;
        let mapping = match yaml_value {
            serde_yaml::Value::Mapping(map) => map,
            _ => {
                return Err(EdisonError::Persistence(
                    "validator report payload must be a mapping".into(),
                ))
            }
        };
        let header = format_frontmatter(&mapping)?;
        write_atomic(&path, &format!("{header}{existing_body}"))?;
        Ok(path)
    }

    /// Read a validator report's frontmatter; empty object when missing or
    /// malformed.
    pub fn read_validator_report(&self, round: u32, validator: &str) -> JsonValue {
        let path = self.validator_report_path(round, validator);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return JsonValue::Object(Default::default());
        };
        if !has_frontmatter(&content) {
            return JsonValue::Object(Default::default());
        }
        match parse_frontmatter(&content) {
            Ok(doc) => serde_json::to_value(&doc.frontmatter)
                .unwrap_or_else(|_| JsonValue::Object(Default::default())),
            Err(_) => JsonValue::Object(Default::default()),
        }
    }

    pub fn list_validator_reports(&self, round: u32) -> Vec<PathBuf> {
        let dir = self.round_dir(round);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut reports: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(VALIDATOR_PREFIX) && n.ends_with(REPORT_SUFFIX))
                    .unwrap_or(false)
            })
            .collect();
        reports.sort();
        reports
    }

    // ---------- Other round artifacts ----------

    pub fn implementation_report_path(&self, round: u32) -> PathBuf {
        self.round_dir(round).join("implementation-report.md")
    }

    pub fn implementation_report_exists(&self, round: u32) -> bool {
        self.implementation_report_path(round).exists()
    }

    /// Write delegation instructions for an orchestrator-run validator.
    pub fn write_delegation_instructions(
        &self,
        round: u32,
        validator: &str,
        instructions: &str,
    ) -> Result<PathBuf, EdisonError> {
        let dir = self.round_dir(round);
        ensure_dir(&dir)?;
        let path = dir.join(format!("delegation-{validator}.md"));
        write_atomic(&path, instructions)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn service(root: &Path) -> EvidenceService {
        EvidenceService::new("T1", root.join("validation-evidence/T1"))
    }

    #[test]
    fn test_rounds_are_dense_and_monotonic() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        assert_eq!(svc.create_next_round().unwrap(), 1);
        assert_eq!(svc.create_next_round().unwrap(), 2);
        assert_eq!(svc.list_rounds(), vec![1, 2]);
        assert_eq!(svc.current_round(), Some(2));
    }

    #[test]
    fn test_sparse_rounds_rejected() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        std::fs::create_dir_all(svc.round_dir(2)).unwrap();
        let err = svc.create_next_round().unwrap_err();
        assert!(err.to_string().contains("not dense"));
    }

    #[test]
    fn test_ensure_round_semantics() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        // No rounds yet: latest-or-create makes round 1.
        assert_eq!(svc.ensure_round(None).unwrap(), 1);
        // Existing round resolves as-is.
        assert_eq!(svc.ensure_round(Some(1)).unwrap(), 1);
        // The next dense round may be created on demand.
        assert_eq!(svc.ensure_round(Some(2)).unwrap(), 2);
        // Skipping ahead is rejected.
        let err = svc.ensure_round(Some(5)).unwrap_err();
        assert!(err.to_string().contains("requires rounds"));
    }

    #[test]
    fn test_command_capture_format() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        svc.create_next_round().unwrap();
        let path = svc
            .save_command_capture(1, "global-codex", "codex-cli", "codex exec", 0, "out", "err")
            .unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with("=== CLI Validator: global-codex ==="));
        assert!(content.contains("Exit Code: 0"));
        assert!(content.contains("=== STDOUT ===\nout"));
        assert!(content.contains("=== STDERR ===\nerr"));
    }

    #[test]
    fn test_validator_report_roundtrip() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        svc.create_next_round().unwrap();
        let payload = serde_json::json!({
            "taskId": "T1",
            "round": 1,
            "validatorId": "global-codex",
            "verdict": "approve",
            "summary": "fine",
        });
        svc.write_validator_report(1, "global-codex", &payload).unwrap();

        let report = svc.read_validator_report(1, "global-codex");
        assert_eq!(report["taskId"], "T1");
        assert_eq!(report["verdict"], "approve");
        // Prefixed names normalize to the same file.
        let report2 = svc.read_validator_report(1, "validator-global-codex");
        assert_eq!(report2["verdict"], "approve");
    }

    #[test]
    fn test_missing_report_is_empty_object() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        let report = svc.read_validator_report(1, "ghost");
        assert!(report.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_list_validator_reports_sorted() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        svc.create_next_round().unwrap();
        let payload = serde_json::json!({"verdict": "approve"});
        svc.write_validator_report(1, "b-val", &payload).unwrap();
        svc.write_validator_report(1, "a-val", &payload).unwrap();
        let reports = svc.list_validator_reports(1);
        assert_eq!(reports.len(), 2);
        assert!(reports[0].file_name().unwrap().to_str().unwrap().contains("a-val"));
    }

    #[test]
    fn test_delegation_instructions_written() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        svc.create_next_round().unwrap();
        let path = svc
            .write_delegation_instructions(1, "global-codex", "# Validator Delegation\n")
            .unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("delegation-"));
        assert!(path.exists());
    }
}
