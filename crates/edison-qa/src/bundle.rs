//! Bundle validation: a task cluster (root + descendants) validated as a
//! group, with approval at the root mirrored to every member.

use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

use edison_core::EdisonError;
use edison_store::TaskRepository;

use crate::engine::Verdict;
use crate::evidence::EvidenceService;
use crate::registry::ValidatorRegistry;

/// Gather the connected cluster rooted at `root_task` by walking child
/// edges breadth-first.
pub fn gather_cluster(tasks: &TaskRepository, root_task: &str) -> Vec<String> {
    let mut cluster: Vec<String> = Vec::new();
    let mut queue: Vec<String> = vec![root_task.to_string()];
    while let Some(task_id) = queue.pop() {
        if cluster.contains(&task_id) {
            continue;
        }
        cluster.push(task_id.clone());
        if let Ok(Some(task)) = tasks.try_get(&task_id) {
            for child in task.child_ids() {
                if !cluster.contains(&child.to_string()) {
                    queue.push(child.to_string());
                }
            }
        }
    }
    cluster
}

/// Bundle manifest: one entry per member with its paths and evidence dir.
pub fn build_validation_bundle(
    tasks: &TaskRepository,
    root_task: &str,
    session_id: &str,
) -> JsonValue {
    let cluster = gather_cluster(tasks, root_task);
    let members: Vec<JsonValue> = cluster
        .iter()
        .map(|task_id| {
            let (state, path) = tasks
                .try_get(task_id)
                .ok()
                .flatten()
                .map(|t| {
                    (
                        t.state.clone(),
                        tasks
                            .find_path(task_id)
                            .map(|p| p.display().to_string())
                            .unwrap_or_default(),
                    )
                })
                .unwrap_or_default();
            serde_json::json!({
                "taskId": task_id,
                "taskStatus": state,
                "taskPath": path,
                "qaId": edison_core::qa_id_for(task_id),
                "evidenceDir": tasks.evidence_base(task_id).display().to_string(),
            })
        })
        .collect();

    serde_json::json!({
        "sessionId": session_id,
        "rootTask": root_task,
        "tasks": members,
    })
}

#[derive(Debug, Clone)]
pub struct MemberApproval {
    pub task_id: String,
    pub approved: bool,
    /// Blocking validators without an approving report.
    pub missing: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BundleOutcome {
    pub root_task: String,
    pub round: u32,
    pub approved: bool,
    pub members: Vec<MemberApproval>,
    /// Paths the summary was written to (root first).
    pub summaries: Vec<PathBuf>,
}

pub struct BundleValidator<'a> {
    tasks: &'a TaskRepository,
    registry: &'a ValidatorRegistry,
}

impl<'a> BundleValidator<'a> {
    pub fn new(tasks: &'a TaskRepository, registry: &'a ValidatorRegistry) -> Self {
        Self { tasks, registry }
    }

    fn evidence_for(&self, task_id: &str) -> EvidenceService {
        EvidenceService::new(task_id, self.tasks.evidence_base(task_id))
    }

    /// Check one member's round: every blocking validator must have an
    /// approving report. With no blocking validators configured, all present
    /// reports must approve (and at least one must exist).
    fn member_approval(&self, task_id: &str, round: u32) -> MemberApproval {
        let evidence = self.evidence_for(task_id);
        if !evidence.round_dir(round).exists() {
            return MemberApproval {
                task_id: task_id.to_string(),
                approved: false,
                missing: vec![format!("round-{round} evidence missing")],
            };
        }

        let blocking_ids: Vec<String> = self
            .registry
            .qa_config()
            .validators()
            .iter()
            .filter(|(_, v)| v.blocking)
            .map(|(id, _)| id.clone())
            .collect();

        let mut missing = Vec::new();
        if blocking_ids.is_empty() {
            let reports = evidence.list_validator_reports(round);
            if reports.is_empty() {
                missing.push("no validator reports".to_string());
            }
            for path in reports {
                let id = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix("validator-"))
                    .and_then(|n| n.strip_suffix("-report.md"))
                    .unwrap_or_default()
                    .to_string();
                let report = evidence.read_validator_report(round, &id);
                if report["verdict"].as_str().and_then(Verdict::parse) != Some(Verdict::Approve) {
                    missing.push(id);
                }
            }
        } else {
            for id in blocking_ids {
                let report = evidence.read_validator_report(round, &id);
                if report["verdict"].as_str().and_then(Verdict::parse) != Some(Verdict::Approve) {
                    missing.push(id);
                }
            }
        }

        MemberApproval {
            task_id: task_id.to_string(),
            approved: missing.is_empty(),
            missing,
        }
    }

    /// Validate the cluster rooted at `root_task` and write the
    /// `bundle-approved` summary to the root's round directory, mirrored to
    /// every member.
    pub fn validate(&self, root_task: &str, round: Option<u32>) -> Result<BundleOutcome, EdisonError> {
        let cluster = gather_cluster(self.tasks, root_task);
        let root_evidence = self.evidence_for(root_task);
        let round = match round {
            Some(n) => n,
            None => root_evidence.current_round().ok_or_else(|| {
                EdisonError::Persistence(format!("No evidence rounds exist for {root_task}"))
            })?,
        };

        let members: Vec<MemberApproval> = cluster
            .iter()
            .map(|task_id| self.member_approval(task_id, round))
            .collect();
        let approved = members.iter().all(|m| m.approved);

        let summary = serde_json::json!({
            "rootTask": root_task,
            "round": round,
            "approved": approved,
            "generatedAt": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            "members": members.iter().map(|m| {
                serde_json::json!({
                    "taskId": m.task_id,
                    "approved": m.approved,
                    "missing": m.missing,
                })
            }).collect::<Vec<_>>(),
        });

        let body = format!(
            "# Bundle Validation\n\nCluster rooted at `{root_task}`, round {round}: {}.\n",
            if approved { "approved" } else { "not approved" }
        );

        let mut summaries = Vec::new();
        for task_id in &cluster {
            let evidence = self.evidence_for(task_id);
            let dir = evidence.round_dir(round);
            if !dir.exists() {
                continue;
            }
            let path = dir.join("bundle-approved.md");
            let yaml_value: serde_yaml::Value = serde_yaml::to_value(&summary)
                .map_err(|e| EdisonError::Persistence(format!("bundle summary: {e}")))?;
            let mapping = match yaml_value {
                serde_yaml::Value::Mapping(map) => map,
                _ => unreachable!("summary is an object"),
            };
            let header = edison_store::format_frontmatter(&mapping)?;
            edison_core::write_atomic(&path, &format!("{header}{body}"))?;
            summaries.push(path);
        }

        info!(root = root_task, round, approved, "bundle validation recorded");
        Ok(BundleOutcome {
            root_task: root_task.to_string(),
            round,
            approved,
            members,
            summaries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edison_config::ConfigManager;
    use edison_core::{EdgeType, RelationshipEdge};
    use edison_store::Task;
    use serial_test::serial;
    use std::path::Path;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn setup(root: &Path) -> (TaskRepository, ValidatorRegistry) {
        write(
            &root.join(".edison/config/qa.yml"),
            concat!(
                "qa:\n",
                "  validators:\n",
                "    gate:\n",
                "      engine: zen-mcp\n",
                "      wave: critical\n",
                "      blocking: true\n",
            ),
        );
        let config = ConfigManager::load(root).unwrap();
        let tasks = TaskRepository::new(&config).unwrap();
        let registry = ValidatorRegistry::new(&config).unwrap();
        (tasks, registry)
    }

    fn create_cluster(tasks: &TaskRepository) {
        let mut parent = Task::create("P", "Parent", "", "todo", None, None);
        parent.relationships = vec![
            RelationshipEdge::new(EdgeType::Child, "C1"),
            RelationshipEdge::new(EdgeType::Child, "C2"),
        ];
        tasks.create(&mut parent).unwrap();
        for child_id in ["C1", "C2"] {
            let mut child = Task::create(child_id, child_id, "", "todo", None, None);
            child.relationships = vec![RelationshipEdge::new(EdgeType::Parent, "P")];
            tasks.create(&mut child).unwrap();
        }
    }

    fn approve(tasks: &TaskRepository, task_id: &str, round: u32) {
        let evidence = EvidenceService::new(task_id, tasks.evidence_base(task_id));
        evidence.create_next_round().unwrap();
        evidence
            .write_validator_report(
                round,
                "gate",
                &serde_json::json!({
                    "taskId": task_id,
                    "round": round,
                    "validatorId": "gate",
                    "verdict": "approve",
                }),
            )
            .unwrap();
    }

    #[test]
    #[serial]
    fn test_gather_cluster_walks_children() {
        let dir = tempdir().unwrap();
        let (tasks, _) = setup(dir.path());
        create_cluster(&tasks);
        let mut cluster = gather_cluster(&tasks, "P");
        cluster.sort();
        assert_eq!(cluster, vec!["C1", "C2", "P"]);
    }

    #[test]
    #[serial]
    fn test_bundle_approval_mirrors_to_members() {
        let dir = tempdir().unwrap();
        let (tasks, registry) = setup(dir.path());
        create_cluster(&tasks);
        for id in ["P", "C1", "C2"] {
            approve(&tasks, id, 1);
        }

        let outcome = BundleValidator::new(&tasks, &registry)
            .validate("P", None)
            .unwrap();

        assert!(outcome.approved);
        assert_eq!(outcome.round, 1);
        assert_eq!(outcome.summaries.len(), 3);

        for id in ["P", "C1", "C2"] {
            let path = tasks.evidence_base(id).join("round-1/bundle-approved.md");
            assert!(path.exists(), "missing summary for {id}");
            let content = std::fs::read_to_string(path).unwrap();
            assert!(content.contains("approved: true"));
            assert!(content.contains("rootTask: P"));
        }
    }

    #[test]
    #[serial]
    fn test_bundle_not_approved_when_member_missing_report() {
        let dir = tempdir().unwrap();
        let (tasks, registry) = setup(dir.path());
        create_cluster(&tasks);
        approve(&tasks, "P", 1);
        approve(&tasks, "C1", 1);
        // C2 has an evidence round but no approving report.
        EvidenceService::new("C2", tasks.evidence_base("C2"))
            .create_next_round()
            .unwrap();

        let outcome = BundleValidator::new(&tasks, &registry)
            .validate("P", Some(1))
            .unwrap();

        assert!(!outcome.approved);
        let c2 = outcome.members.iter().find(|m| m.task_id == "C2").unwrap();
        assert!(!c2.approved);
        assert_eq!(c2.missing, vec!["gate"]);

        let content =
            std::fs::read_to_string(tasks.evidence_base("P").join("round-1/bundle-approved.md"))
                .unwrap();
        assert!(content.contains("approved: false"));
    }

    #[test]
    #[serial]
    fn test_bundle_requires_some_round() {
        let dir = tempdir().unwrap();
        let (tasks, registry) = setup(dir.path());
        create_cluster(&tasks);
        let err = BundleValidator::new(&tasks, &registry)
            .validate("P", None)
            .unwrap_err();
        assert!(err.to_string().contains("No evidence rounds"));
    }

    #[test]
    #[serial]
    fn test_manifest_shape() {
        let dir = tempdir().unwrap();
        let (tasks, _) = setup(dir.path());
        create_cluster(&tasks);
        let manifest = build_validation_bundle(&tasks, "P", "sess-A");
        assert_eq!(manifest["rootTask"], "P");
        assert_eq!(manifest["sessionId"], "sess-A");
        assert_eq!(manifest["tasks"].as_array().unwrap().len(), 3);
        assert_eq!(manifest["tasks"][0]["qaId"], "P-qa");
    }
}
