//! File-backed repository for QA records.
//!
//! Global layout: `<mgmt-root>/qa/<state>/<id>.md` with ids conventionally
//! `<task_id>-qa`. Session-scoped layout mirrors tasks:
//! `<sessions-root>/<session-state>/<sid>/qa/<state>/<id>.md`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use edison_core::{safe_move, write_atomic, EdisonError, EntityMetadata, StateHistoryEntry};
use edison_config::{ConfigManager, ManagementPaths, SessionConfig, WorkflowConfig};

use crate::frontmatter::{format_frontmatter, has_frontmatter, parse_frontmatter};
use crate::qa::{QaRecord, RoundHistoryEntry};
use crate::statemachine::{GuardContext, StateMachine};

const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
struct QaFrontmatter {
    id: String,
    task_id: String,
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    validator_owner: Option<String>,
    #[serde(default = "default_round")]
    round: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    round_history: Vec<RoundHistoryEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    validators: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    evidence: Vec<String>,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    updated_at: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    state_history: Vec<StateHistoryEntry>,
}

fn default_round() -> u32 {
    1
}

pub struct QaRepository {
    project_root: PathBuf,
    mgmt: ManagementPaths,
    qa_states: Vec<String>,
    session_lookup: Vec<String>,
    session_expiry_hours: u64,
}

impl QaRepository {
    pub fn new(config: &ConfigManager) -> Result<Self, EdisonError> {
        let workflow = WorkflowConfig::from_config(config)?;
        let session_cfg = SessionConfig::from_config(config);
        Ok(Self {
            project_root: config.project_root().to_path_buf(),
            mgmt: config.management_paths(),
            qa_states: workflow.states("qa")?.to_vec(),
            session_lookup: session_cfg.lookup_order().to_vec(),
            session_expiry_hours: session_cfg.expiry_hours(),
        })
    }

    fn filename(qa_id: &str) -> String {
        format!("{qa_id}.md")
    }

    fn global_path(&self, qa_id: &str, state: &str) -> PathBuf {
        self.mgmt.qa_state_dir(state).join(Self::filename(qa_id))
    }

    fn session_bases(&self) -> Vec<PathBuf> {
        let mut bases = Vec::new();
        for state in &self.session_lookup {
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

    fn session_base(&self, session_id: &str) -> Result<PathBuf, EdisonError> {
        for state in &self.session_lookup {
            let base = self.mgmt.session_state_dir(state).join(session_id);
            if base.join("session.json").exists() {
                return Ok(base);
            }
        }
        Err(EdisonError::not_found("session", session_id))
    }

    fn target_path(&self, record: &QaRecord) -> Result<PathBuf, EdisonError> {
        match &record.session_id {
            Some(sid) => Ok(self
                .session_base(sid)?
                .join("qa")
                .join(&record.state)
                .join(Self::filename(&record.id))),
            None => Ok(self.global_path(&record.id, &record.state)),
        }
    }

    pub fn find_path(&self, qa_id: &str) -> Option<PathBuf> {
        let filename = Self::filename(qa_id);
        for state in &self.qa_states {
            let path = self.mgmt.qa_state_dir(state).join(&filename);
            if path.exists() {
                return Some(path);
            }
        }
        for base in self.session_bases() {
            for state in &self.qa_states {
                let path = base.join("qa").join(state).join(&filename);
                if path.exists() {
                    return Some(path);
                }
            }
        }
        None
    }

    fn lock_path(&self, qa_id: &str) -> PathBuf {
        self.mgmt
            .management_root()
            .join(".locks")
            .join(format!("qa-{qa_id}.lock"))
    }

    pub fn exists(&self, qa_id: &str) -> bool {
        self.find_path(qa_id).is_some()
    }

    pub fn create(&self, record: &QaRecord) -> Result<(), EdisonError> {
        let path = self.target_path(record)?;
        let content = self.to_markdown(record, None)?;
        write_atomic(&path, &content)
    }

    pub fn get(&self, qa_id: &str) -> Result<QaRecord, EdisonError> {
        let path = self
            .find_path(qa_id)
            .ok_or_else(|| EdisonError::not_found("qa", qa_id))?;
        let content = std::fs::read_to_string(&path)
            .map_err(|e| EdisonError::Persistence(format!("Failed to read {}: {e}", path.display())))?;
        if !has_frontmatter(&content) {
            return Err(EdisonError::Persistence(format!(
                "QA file at {} is missing YAML frontmatter; recreate it alongside its task.",
                path.display()
            )));
        }
        self.parse_markdown(qa_id, &content, &path)
    }

    pub fn try_get(&self, qa_id: &str) -> Result<Option<QaRecord>, EdisonError> {
        match self.get(qa_id) {
            Ok(record) => Ok(Some(record)),
            Err(EdisonError::EntityNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, record: &mut QaRecord) -> Result<(), EdisonError> {
        let current = self.find_path(&record.id);
        let target = self.target_path(record)?;

        let Some(current_path) = current else {
            return self.create(record);
        };

        let existing = std::fs::read_to_string(&current_path).map_err(|e| {
            EdisonError::Persistence(format!("Failed to read {}: {e}", current_path.display()))
        })?;
        let body = parse_frontmatter(&existing)?.body;

        if current_path != target {
            safe_move(&current_path, &target)?;
        }
        record.metadata.touch();
        let content = self.to_markdown(record, Some(&body))?;
        write_atomic(&target, &content)
    }

    pub fn delete(&self, qa_id: &str) -> Result<bool, EdisonError> {
        match self.find_path(qa_id) {
            Some(path) => {
                std::fs::remove_file(&path).map_err(|e| {
                    EdisonError::Persistence(format!("Failed to delete {}: {e}", path.display()))
                })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn list_by_state(&self, state: &str) -> Vec<QaRecord> {
        let mut records = Vec::new();
        self.collect_dir(&self.mgmt.qa_state_dir(state), &mut records);
        for base in self.session_bases() {
            self.collect_dir(&base.join("qa").join(state), &mut records);
        }
        records
    }

    pub fn find_by_task(&self, task_id: &str) -> Option<QaRecord> {
        let qa_id = edison_core::qa_id_for(task_id);
        self.try_get(&qa_id).ok().flatten()
    }

    fn collect_dir(&self, dir: &Path, records: &mut Vec<QaRecord>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            if !has_frontmatter(&content) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(record) = self.parse_markdown(stem, &content, &path) {
                records.push(record);
            }
        }
    }

    /// Guarded transition mirroring the task repository's.
    pub fn transition(
        &self,
        machine: &StateMachine,
        qa_id: &str,
        to_state: &str,
        session_id: Option<&str>,
        reason: Option<String>,
        mutate: impl FnOnce(&mut QaRecord),
    ) -> Result<QaRecord, EdisonError> {
        let lock_path = self.lock_path(qa_id);
        let _lock = edison_lock::acquire_with_timeout(
            &lock_path,
            session_id.unwrap_or("edison"),
            "state transition",
            LOCK_TIMEOUT,
        )
        .map_err(|e| EdisonError::Persistence(e.to_string()))?;

        let mut record = self.get(qa_id)?;
        let from = record.state.clone();

        let ctx = GuardContext {
            project_root: self.project_root.clone(),
            mgmt: self.mgmt.clone(),
            entity_kind: "qa".into(),
            entity_id: qa_id.to_string(),
            session_id: session_id.map(str::to_string),
            current_owner_session: record.session_id.clone(),
            session_lookup: self.session_lookup.clone(),
            session_expiry_hours: self.session_expiry_hours,
            evidence_base: None,
        };

        machine.authorize("qa", &from, to_state, &ctx)?;
        machine.execute_actions("qa", &from, to_state, &ctx)?;

        mutate(&mut record);
        record.record_transition(&from, to_state, reason, vec![]);
        record.state = to_state.to_string();
        self.save(&mut record)?;
        Ok(record)
    }

    fn to_markdown(&self, record: &QaRecord, body: Option<&str>) -> Result<String, EdisonError> {
        let front = QaFrontmatter {
            id: record.id.clone(),
            task_id: record.task_id.clone(),
            title: record.title.clone(),
            session_id: record.session_id.clone(),
            validator_owner: record.validator_owner.clone(),
            round: record.round,
            round_history: record.round_history.clone(),
            validators: record.validators.clone(),
            evidence: record.evidence.clone(),
            created_at: record.metadata.created_at.clone(),
            updated_at: record.metadata.updated_at.clone(),
            state_history: record.state_history.clone(),
        };
        let value = serde_yaml::to_value(&front)
            .map_err(|e| EdisonError::Persistence(format!("Failed to serialize QA record: {e}")))?;
        let mapping = match value {
            serde_yaml::Value::Mapping(map) => map,
            _ => unreachable!("struct serializes to a mapping"),
        };
        let header = format_frontmatter(&mapping)?;
        let rendered_body = body
            .map(str::to_string)
            .unwrap_or_else(|| format!("# QA: {}\n\nValidation brief for `{}`.\n", record.title, record.task_id));
        Ok(format!("{header}{rendered_body}"))
    }

    fn parse_markdown(
        &self,
        qa_id: &str,
        content: &str,
        path: &Path,
    ) -> Result<QaRecord, EdisonError> {
        let state = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let doc = parse_frontmatter(content)?;
        let front: QaFrontmatter =
            serde_yaml::from_value(serde_yaml::Value::Mapping(doc.frontmatter)).map_err(|e| {
                EdisonError::Persistence(format!("Failed to parse QA file at {}: {e}", path.display()))
            })?;

        Ok(QaRecord {
            id: if front.id.is_empty() {
                qa_id.to_string()
            } else {
                front.id
            },
            task_id: front.task_id,
            state,
            title: front.title,
            session_id: front.session_id.clone(),
            validator_owner: front.validator_owner,
            metadata: EntityMetadata {
                created_at: front.created_at,
                updated_at: front.updated_at,
                created_by: None,
                session_id: front.session_id,
            },
            state_history: front.state_history,
            round: front.round,
            round_history: front.round_history,
            validators: front.validators,
            evidence: front.evidence,
        })
    }
}
