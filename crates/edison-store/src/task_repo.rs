//! File-backed repository for tasks.
//!
//! Global layout: `<mgmt-root>/tasks/<state>/<id>.md`. Session-scoped
//! layout: `<sessions-root>/<session-state>/<sid>/tasks/<state>/<id>.md`.
//! State is always derived from the containing directory. Bulk listings are
//! tolerant (unparseable files skipped); direct gets are strict and carry a
//! remediation hint.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use tracing::debug;

use edison_core::{
    normalize_edges, safe_move, write_atomic, EdisonError, EntityMetadata, RelationshipEdge,
    StateHistoryEntry,
};
use edison_config::{ConfigManager, ManagementPaths, SessionConfig, TaskConfig, WorkflowConfig};

use crate::frontmatter::{
    format_frontmatter, has_frontmatter, parse_frontmatter, parse_title, strip_frontmatter_block,
};
use crate::statemachine::{GuardContext, StateMachine};
use crate::task::Task;

const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Frontmatter schema for task files. `state` is deliberately absent.
#[derive(Debug, Serialize, Deserialize)]
struct TaskFrontmatter {
    id: String,
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relationships: Option<Vec<RelationshipEdge>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    claimed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_active: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    continuation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delegated_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delegated_in_session: Option<String>,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    integration: Option<Mapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    state_history: Vec<StateHistoryEntry>,
}

const LEGACY_RELATIONSHIP_KEYS: &[&str] = &[
    "parent_id",
    "child_ids",
    "depends_on",
    "blocks_tasks",
    "related",
    "related_tasks",
    "bundle_root",
];

pub struct TaskRepository {
    project_root: PathBuf,
    mgmt: ManagementPaths,
    task_states: Vec<String>,
    session_lookup: Vec<String>,
    session_expiry_hours: u64,
    evidence_subdir: String,
    template_path: PathBuf,
}

impl TaskRepository {
    pub fn new(config: &ConfigManager) -> Result<Self, EdisonError> {
        let workflow = WorkflowConfig::from_config(config)?;
        let task_cfg = TaskConfig::from_config(config);
        let session_cfg = SessionConfig::from_config(config);
        let task_states = workflow.states("task")?.to_vec();
        if task_states.is_empty() {
            return Err(EdisonError::Config(
                "Configuration must define task states (statemachine.task.states)".into(),
            ));
        }
        Ok(Self {
            project_root: config.project_root().to_path_buf(),
            mgmt: config.management_paths(),
            task_states,
            session_lookup: session_cfg.lookup_order().to_vec(),
            session_expiry_hours: session_cfg.expiry_hours(),
            evidence_subdir: task_cfg.evidence_subdir().to_string(),
            template_path: task_cfg.template_path().clone(),
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn states(&self) -> &[String] {
        &self.task_states
    }

    // ---------- Path resolution ----------

    fn filename(task_id: &str) -> String {
        format!("{task_id}.md")
    }

    fn global_path(&self, task_id: &str, state: &str) -> PathBuf {
        self.mgmt.task_state_dir(state).join(Self::filename(task_id))
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

    fn session_record_path(
        &self,
        task_id: &str,
        session_id: &str,
        state: &str,
    ) -> Result<PathBuf, EdisonError> {
        Ok(self
            .session_base(session_id)?
            .join("tasks")
            .join(state)
            .join(Self::filename(task_id)))
    }

    fn target_path(&self, task: &Task) -> Result<PathBuf, EdisonError> {
        match &task.session_id {
            Some(sid) => self.session_record_path(&task.id, sid, &task.state),
            None => Ok(self.global_path(&task.id, &task.state)),
        }
    }

    /// Find a task file across global state dirs and all session trees.
    pub fn find_path(&self, task_id: &str) -> Option<PathBuf> {
        let filename = Self::filename(task_id);
        for state in &self.task_states {
            let path = self.mgmt.task_state_dir(state).join(&filename);
            if path.exists() {
                return Some(path);
            }
        }
        for base in self.session_bases() {
            for state in &self.task_states {
                let path = base.join("tasks").join(state).join(&filename);
                if path.exists() {
                    return Some(path);
                }
            }
        }
        None
    }

    fn lock_path(&self, task_id: &str) -> PathBuf {
        self.mgmt
            .management_root()
            .join(".locks")
            .join(format!("task-{task_id}.lock"))
    }

    pub fn evidence_base(&self, task_id: &str) -> PathBuf {
        self.mgmt.qa_root().join(&self.evidence_subdir).join(task_id)
    }

    // ---------- CRUD ----------

    pub fn exists(&self, task_id: &str) -> bool {
        self.find_path(task_id).is_some()
    }

    pub fn create(&self, task: &mut Task) -> Result<(), EdisonError> {
        task.normalize_relationships();
        let path = self.target_path(task)?;
        let content = self.to_markdown(task, None)?;
        write_atomic(&path, &content)?;
        debug!(task_id = %task.id, state = %task.state, "task created");
        Ok(())
    }

    /// Strict load: missing file is `EntityNotFound`; a file without
    /// frontmatter fails with a remediation hint.
    pub fn get(&self, task_id: &str) -> Result<Task, EdisonError> {
        let path = self
            .find_path(task_id)
            .ok_or_else(|| EdisonError::not_found("task", task_id))?;
        let content = std::fs::read_to_string(&path)
            .map_err(|e| EdisonError::Persistence(format!("Failed to read {}: {e}", path.display())))?;
        if !has_frontmatter(&content) {
            return Err(EdisonError::Persistence(format!(
                "Task file at {} is missing YAML frontmatter. Restore the file from the composed \
                 template ({}) or recreate the task.",
                path.display(),
                self.template_path.display()
            )));
        }
        self.parse_markdown(task_id, &content, &path)
    }

    pub fn try_get(&self, task_id: &str) -> Result<Option<Task>, EdisonError> {
        match self.get(task_id) {
            Ok(task) => Ok(Some(task)),
            Err(EdisonError::EntityNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Save the task, moving its file when state or session changed. The
    /// existing body is preserved; only frontmatter is rewritten.
    pub fn save(&self, task: &mut Task) -> Result<(), EdisonError> {
        task.normalize_relationships();
        let current = self.find_path(&task.id);
        let target = self.target_path(task)?;

        let Some(current_path) = current else {
            return self.create(task);
        };

        let existing = std::fs::read_to_string(&current_path).map_err(|e| {
            EdisonError::Persistence(format!("Failed to read {}: {e}", current_path.display()))
        })?;
        if !has_frontmatter(&existing) {
            return Err(EdisonError::Persistence(format!(
                "Task file at {} is missing YAML frontmatter. Restore the file from the composed \
                 template ({}) or recreate the task.",
                current_path.display(),
                self.template_path.display()
            )));
        }
        let body = parse_frontmatter(&existing)?.body;

        if current_path != target {
            safe_move(&current_path, &target)?;
        }
        task.metadata.touch();
        let content = self.to_markdown(task, Some(&body))?;
        write_atomic(&target, &content)
    }

    pub fn delete(&self, task_id: &str) -> Result<bool, EdisonError> {
        match self.find_path(task_id) {
            Some(path) => {
                std::fs::remove_file(&path).map_err(|e| {
                    EdisonError::Persistence(format!("Failed to delete {}: {e}", path.display()))
                })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ---------- Queries ----------

    /// Tolerant listing over global and session trees.
    pub fn list_by_state(&self, state: &str) -> Vec<Task> {
        let mut tasks = Vec::new();
        self.collect_dir(&self.mgmt.task_state_dir(state), &mut tasks);
        for base in self.session_bases() {
            self.collect_dir(&base.join("tasks").join(state), &mut tasks);
        }
        tasks
    }

    pub fn list_all(&self) -> Vec<Task> {
        let mut tasks = Vec::new();
        for state in &self.task_states {
            tasks.extend(self.list_by_state(state));
        }
        tasks
    }

    pub fn find_by_session(&self, session_id: &str) -> Vec<Task> {
        self.list_all()
            .into_iter()
            .filter(|t| t.session_id.as_deref() == Some(session_id))
            .collect()
    }

    fn collect_dir(&self, dir: &Path, tasks: &mut Vec<Task>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if let Some(task) = self.load_tolerant(&path) {
                tasks.push(task);
            }
        }
    }

    fn load_tolerant(&self, path: &Path) -> Option<Task> {
        let content = std::fs::read_to_string(path).ok()?;
        if !has_frontmatter(&content) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        self.parse_markdown(stem, &content, path).ok()
    }

    // ---------- Id allocation ----------

    /// Highest numeric id prefix across all tasks, plus one.
    pub fn next_top_level_id(&self) -> u32 {
        let mut max_id = 0;
        for task in self.list_all() {
            if let Some(prefix) = task.id.split('-').next() {
                if let Ok(n) = prefix.parse::<u32>() {
                    max_id = max_id.max(n);
                }
            }
        }
        max_id + 1
    }

    /// Next `<parent>.<n>` child id, scanning loaded tasks and raw filenames.
    pub fn next_child_id(&self, parent_id: &str) -> String {
        let prefix = format!("{parent_id}.");
        let mut existing: Vec<u32> = Vec::new();

        for task in self.list_all() {
            if let Some(suffix) = task.id.strip_prefix(&prefix) {
                let number_part = suffix.split('-').next().unwrap_or("");
                if let Ok(n) = number_part.parse::<u32>() {
                    existing.push(n);
                }
            }
        }
        for state in &self.task_states {
            let dir = self.mgmt.task_state_dir(state);
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".md")) else {
                    continue;
                };
                if let Some(suffix) = stem.strip_prefix(&prefix) {
                    let number_part = suffix.split('-').next().unwrap_or("");
                    if let Ok(n) = number_part.parse::<u32>() {
                        if !existing.contains(&n) {
                            existing.push(n);
                        }
                    }
                }
            }
        }

        let next = existing.into_iter().max().unwrap_or(0) + 1;
        format!("{parent_id}.{next}")
    }

    // ---------- Transitions ----------

    /// Guarded transition: serialize on the task's lock sidecar, authorize,
    /// run actions, apply the caller's mutator, record history, move the
    /// file.
    pub fn transition(
        &self,
        machine: &StateMachine,
        task_id: &str,
        to_state: &str,
        session_id: Option<&str>,
        reason: Option<String>,
        mutate: impl FnOnce(&mut Task),
    ) -> Result<Task, EdisonError> {
        let lock_path = self.lock_path(task_id);
        let _lock = edison_lock::acquire_with_timeout(
            &lock_path,
            session_id.unwrap_or("edison"),
            "state transition",
            LOCK_TIMEOUT,
        )
        .map_err(|e| EdisonError::Persistence(e.to_string()))?;

        let mut task = self.get(task_id)?;
        let from = task.state.clone();

        let ctx = GuardContext {
            project_root: self.project_root.clone(),
            mgmt: self.mgmt.clone(),
            entity_kind: "task".into(),
            entity_id: task_id.to_string(),
            session_id: session_id.map(str::to_string),
            current_owner_session: task.session_id.clone(),
            session_lookup: self.session_lookup.clone(),
            session_expiry_hours: self.session_expiry_hours,
            evidence_base: Some(self.evidence_base(task_id)),
        };

        machine.authorize("task", &from, to_state, &ctx)?;
        machine.execute_actions("task", &from, to_state, &ctx)?;

        mutate(&mut task);
        task.record_transition(&from, to_state, reason, vec![]);
        task.state = to_state.to_string();
        self.save(&mut task)?;
        Ok(task)
    }

    // ---------- Codec ----------

    fn to_markdown(&self, task: &Task, body: Option<&str>) -> Result<String, EdisonError> {
        let front = TaskFrontmatter {
            id: task.id.clone(),
            title: task.title.clone(),
            owner: task.metadata.created_by.clone(),
            session_id: task.session_id.clone(),
            relationships: if task.relationships.is_empty() {
                None
            } else {
                Some(task.relationships.clone())
            },
            claimed_at: task.claimed_at.clone(),
            last_active: task.last_active.clone(),
            continuation_id: task.continuation_id.clone(),
            result: task.result.clone(),
            delegated_to: task.delegated_to.clone(),
            delegated_in_session: task.delegated_in_session.clone(),
            created_at: task.metadata.created_at.clone(),
            updated_at: task.metadata.updated_at.clone(),
            tags: if task.tags.is_empty() {
                None
            } else {
                Some(task.tags.clone())
            },
            integration: if task.integration.is_empty() {
                None
            } else {
                Some(task.integration.clone())
            },
            state_history: task.state_history.clone(),
        };

        let value = serde_yaml::to_value(&front)
            .map_err(|e| EdisonError::Persistence(format!("Failed to serialize task: {e}")))?;
        let mapping = match value {
            serde_yaml::Value::Mapping(map) => map,
            _ => unreachable!("struct serializes to a mapping"),
        };
        let header = format_frontmatter(&mapping)?;
        let rendered_body = match body {
            Some(existing) => existing.to_string(),
            None => self.render_body(task),
        };
        Ok(format!("{header}{rendered_body}"))
    }

    fn render_body(&self, task: &Task) -> String {
        let template = std::fs::read_to_string(&self.template_path)
            .map(|raw| strip_frontmatter_block(&raw))
            .unwrap_or_else(|_| "# {{title}}\n\n{{description}}\n".to_string());
        edison_compose::render_template_text(
            &template,
            &[
                ("id", task.id.as_str()),
                ("title", task.title.as_str()),
                ("description", task.description.as_str()),
            ],
        )
    }

    fn parse_markdown(&self, task_id: &str, content: &str, path: &Path) -> Result<Task, EdisonError> {
        // State is ALWAYS derived from the containing directory.
        let state = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let doc = parse_frontmatter(content)?;

        // Legacy parallel encodings are rejected: canonical `relationships:`
        // is the only source of truth.
        let has_relationships = doc
            .frontmatter
            .get(serde_yaml::Value::String("relationships".into()))
            .and_then(|v| v.as_sequence())
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if !has_relationships {
            for key in LEGACY_RELATIONSHIP_KEYS {
                if doc
                    .frontmatter
                    .contains_key(serde_yaml::Value::String((*key).to_string()))
                {
                    return Err(EdisonError::Persistence(format!(
                        "Legacy relationship key '{key}' detected in task frontmatter at {}. \
                         Migrate to the canonical `relationships:` edge list first.",
                        path.display()
                    )));
                }
            }
        }

        let front: TaskFrontmatter =
            serde_yaml::from_value(serde_yaml::Value::Mapping(doc.frontmatter)).map_err(|e| {
                EdisonError::Persistence(format!(
                    "Failed to parse task file at {}: {e}",
                    path.display()
                ))
            })?;

        // Title from frontmatter, else the first markdown heading.
        let mut title = front.title.clone();
        if title.is_empty() {
            for line in doc.body.lines() {
                if let Some(parsed) = parse_title(line) {
                    title = parsed;
                    break;
                }
            }
        }

        // Description: body content after the title heading.
        let mut description_lines: Vec<&str> = Vec::new();
        let mut found_title = false;
        for line in doc.body.lines() {
            if !found_title && parse_title(line).is_some() {
                found_title = true;
                continue;
            }
            if found_title {
                description_lines.push(line);
            }
        }
        let description = description_lines.join("\n").trim().to_string();

        let relationships = normalize_edges(front.relationships.unwrap_or_default(), Some(task_id));

        Ok(Task {
            id: if front.id.is_empty() {
                task_id.to_string()
            } else {
                front.id
            },
            state,
            title,
            description,
            session_id: front.session_id.clone(),
            metadata: EntityMetadata {
                created_at: front.created_at,
                updated_at: front.updated_at,
                created_by: front.owner,
                session_id: front.session_id,
            },
            state_history: front.state_history,
            tags: front.tags.unwrap_or_default(),
            relationships,
            claimed_at: front.claimed_at,
            last_active: front.last_active,
            continuation_id: front.continuation_id,
            result: front.result,
            delegated_to: front.delegated_to,
            delegated_in_session: front.delegated_in_session,
            integration: front.integration.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edison_core::EdgeType;
    use serial_test::serial;
    use tempfile::tempdir;

    fn repo(root: &Path) -> TaskRepository {
        let config = ConfigManager::load(root).unwrap();
        TaskRepository::new(&config).unwrap()
    }

    fn new_task(id: &str, title: &str) -> Task {
        Task::create(id, title, "Some description", "todo", None, Some("alice".into()))
    }

    #[test]
    #[serial]
    fn test_create_and_get_roundtrip() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let mut task = new_task("150-auth", "Implement auth");
        repo.create(&mut task).unwrap();

        assert!(dir.path().join(".project/tasks/todo/150-auth.md").exists());

        let loaded = repo.get("150-auth").unwrap();
        assert_eq!(loaded.id, "150-auth");
        assert_eq!(loaded.state, "todo");
        assert_eq!(loaded.title, "Implement auth");
        assert_eq!(loaded.metadata.created_by.as_deref(), Some("alice"));
    }

    #[test]
    #[serial]
    fn test_state_derived_from_directory_not_frontmatter() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let mut task = new_task("1-x", "X");
        repo.create(&mut task).unwrap();

        // Move the file by hand; the repository must believe the directory.
        let src = dir.path().join(".project/tasks/todo/1-x.md");
        let dst_dir = dir.path().join(".project/tasks/wip");
        std::fs::create_dir_all(&dst_dir).unwrap();
        std::fs::rename(&src, dst_dir.join("1-x.md")).unwrap();

        assert_eq!(repo.get("1-x").unwrap().state, "wip");
    }

    #[test]
    #[serial]
    fn test_save_preserves_body_edits() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let mut task = new_task("2-body", "Body");
        repo.create(&mut task).unwrap();

        // A human edits the body.
        let path = dir.path().join(".project/tasks/todo/2-body.md");
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, format!("{content}\n## Notes\nhand-written\n")).unwrap();

        task.result = Some("done well".into());
        repo.save(&mut task).unwrap();

        let after = std::fs::read_to_string(&path).unwrap();
        assert!(after.contains("hand-written"));
        assert!(after.contains("result: done well"));
    }

    #[test]
    #[serial]
    fn test_no_relationships_key_when_empty() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let mut task = new_task("3-rel", "Rel");
        repo.create(&mut task).unwrap();
        let content = std::fs::read_to_string(dir.path().join(".project/tasks/todo/3-rel.md")).unwrap();
        assert!(!content.contains("relationships:"));
    }

    #[test]
    #[serial]
    fn test_relationships_roundtrip_canonicalized() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let mut task = new_task("4-rel", "Rel");
        task.relationships = vec![
            RelationshipEdge::new(EdgeType::Related, "9-z"),
            RelationshipEdge::new(EdgeType::Parent, "1-root"),
            RelationshipEdge::new(EdgeType::Related, "9-z"),
        ];
        repo.create(&mut task).unwrap();
        let loaded = repo.get("4-rel").unwrap();
        assert_eq!(loaded.relationships.len(), 2);
        assert_eq!(loaded.parent_id(), Some("1-root"));
    }

    #[test]
    #[serial]
    fn test_get_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        assert_eq!(repo.get("nope").unwrap_err().kind(), "entity_not_found");
    }

    #[test]
    #[serial]
    fn test_legacy_file_fails_direct_get_with_hint() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let legacy = dir.path().join(".project/tasks/todo/old.md");
        std::fs::create_dir_all(legacy.parent().unwrap()).unwrap();
        std::fs::write(&legacy, "# Old task, no frontmatter\n").unwrap();

        let err = repo.get("old").unwrap_err();
        assert!(err.to_string().contains("missing YAML frontmatter"));
        assert!(err.to_string().contains("composed template"));
    }

    #[test]
    #[serial]
    fn test_legacy_relationship_keys_rejected() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let path = dir.path().join(".project/tasks/todo/leg.md");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "---\nid: leg\ntitle: L\nparent_id: root\n---\nbody\n").unwrap();

        let err = repo.get("leg").unwrap_err();
        assert!(err.to_string().contains("Legacy relationship key"));
    }

    #[test]
    #[serial]
    fn test_bulk_listing_skips_legacy_files() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let mut good = new_task("5-good", "Good");
        repo.create(&mut good).unwrap();
        std::fs::write(
            dir.path().join(".project/tasks/todo/legacy.md"),
            "no frontmatter here\n",
        )
        .unwrap();

        let tasks = repo.list_by_state("todo");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "5-good");
    }

    #[test]
    #[serial]
    fn test_session_scoped_storage_and_lookup() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());

        // Materialize a session shell.
        let sess_dir = dir.path().join(".project/sessions/wip/sess-a");
        std::fs::create_dir_all(&sess_dir).unwrap();
        std::fs::write(
            sess_dir.join("session.json"),
            r#"{"id": "sess-a", "createdAt": "", "lastAccessed": ""}"#,
        )
        .unwrap();

        let mut task = new_task("6-scoped", "Scoped");
        task.session_id = Some("sess-a".into());
        task.state = "wip".into();
        repo.create(&mut task).unwrap();

        assert!(sess_dir.join("tasks/wip/6-scoped.md").exists());
        let loaded = repo.get("6-scoped").unwrap();
        assert_eq!(loaded.state, "wip");
        assert_eq!(loaded.session_id.as_deref(), Some("sess-a"));
        assert_eq!(repo.find_by_session("sess-a").len(), 1);
    }

    #[test]
    #[serial]
    fn test_save_moves_file_between_states() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let mut task = new_task("7-move", "Move");
        repo.create(&mut task).unwrap();

        task.state = "wip".into();
        repo.save(&mut task).unwrap();

        assert!(!dir.path().join(".project/tasks/todo/7-move.md").exists());
        assert!(dir.path().join(".project/tasks/wip/7-move.md").exists());
    }

    #[test]
    #[serial]
    fn test_id_allocation() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let mut a = new_task("150-auth", "A");
        let mut b = new_task("201-api", "B");
        let mut child = new_task("201.1-schema", "C");
        repo.create(&mut a).unwrap();
        repo.create(&mut b).unwrap();
        repo.create(&mut child).unwrap();

        assert_eq!(repo.next_top_level_id(), 202);
        assert_eq!(repo.next_child_id("201"), "201.2");
        assert_eq!(repo.next_child_id("150-auth"), "150-auth.1");
    }

    #[test]
    #[serial]
    fn test_state_history_survives_roundtrip() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let mut task = new_task("8-hist", "Hist");
        task.record_transition("", "todo", Some("created".into()), vec![]);
        repo.create(&mut task).unwrap();

        let loaded = repo.get("8-hist").unwrap();
        assert_eq!(loaded.state_history.len(), 1);
        assert_eq!(loaded.state_history[0].to, "todo");
    }
}
