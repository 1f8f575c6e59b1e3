//! Task–QA workflow orchestration: create, claim (with reclaim), complete.
//!
//! High-level operations that coordinate the task and QA repositories and
//! the state machine. Each repository stays focused on persistence; the
//! cross-entity sequencing lives here.

use tracing::{debug, warn};

use edison_core::{qa_id_for, utc_timestamp, EdgeType, EdisonError, RelationshipEdge};
use edison_config::{ConfigManager, WorkflowConfig};

use crate::qa::QaRecord;
use crate::qa_repo::QaRepository;
use crate::session_repo::SessionRepository;
use crate::statemachine::StateMachine;
use crate::task::Task;
use crate::task_repo::TaskRepository;

/// Options for [`TaskQaWorkflow::create_task`].
#[derive(Debug, Default)]
pub struct CreateTaskOptions {
    pub description: String,
    pub session_id: Option<String>,
    pub owner: Option<String>,
    pub parent_id: Option<String>,
    pub continuation_id: Option<String>,
    /// Create the companion QA record (default true).
    pub create_qa: Option<bool>,
}

pub struct TaskQaWorkflow {
    tasks: TaskRepository,
    qa: QaRepository,
    sessions: SessionRepository,
    machine: StateMachine,
}

impl TaskQaWorkflow {
    pub fn new(config: &ConfigManager) -> Result<Self, EdisonError> {
        let workflow = WorkflowConfig::from_config(config)?;
        Ok(Self {
            tasks: TaskRepository::new(config)?,
            qa: QaRepository::new(config)?,
            sessions: SessionRepository::new(config)?,
            machine: StateMachine::new(workflow),
        })
    }

    pub fn tasks(&self) -> &TaskRepository {
        &self.tasks
    }

    pub fn qa(&self) -> &QaRepository {
        &self.qa
    }

    pub fn sessions(&self) -> &SessionRepository {
        &self.sessions
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    fn semantic(&self, kind: &str, alias: &str) -> Result<String, EdisonError> {
        Ok(self
            .machine
            .workflow()
            .semantic_state(kind, alias)?
            .to_string())
    }

    /// Resolve a parent shorthand (`"123"`) to a unique full task id.
    ///
    /// A missing parent is kept verbatim for forward-linking; ambiguity is an
    /// error.
    fn resolve_parent_id(&self, raw: &str) -> Result<Option<String>, EdisonError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        if self.tasks.try_get(raw)?.is_some() {
            return Ok(Some(raw.to_string()));
        }
        let prefix = format!("{raw}-");
        let matches: Vec<String> = self
            .tasks
            .list_all()
            .into_iter()
            .map(|t| t.id)
            .filter(|id| id.starts_with(&prefix))
            .collect();
        match matches.len() {
            0 => Ok(Some(raw.to_string())),
            1 => Ok(Some(matches.into_iter().next().expect("one match"))),
            n => Err(EdisonError::Persistence(format!(
                "Ambiguous parent id '{raw}' (matches {n} tasks); use the full parent task id"
            ))),
        }
    }

    /// Create a task in the initial state, with an optional QA record.
    pub fn create_task(
        &self,
        task_id: &str,
        title: &str,
        options: CreateTaskOptions,
    ) -> Result<Task, EdisonError> {
        if self.tasks.exists(task_id) {
            return Err(EdisonError::Persistence(format!(
                "Task {task_id} already exists"
            )));
        }

        let todo_state = self.semantic("task", "todo")?;
        let parent_id = match &options.parent_id {
            Some(raw) => self.resolve_parent_id(raw)?,
            None => None,
        };
        if parent_id.as_deref() == Some(task_id) {
            return Err(EdisonError::Persistence(
                "Cannot set a task as its own parent".into(),
            ));
        }

        let mut task = Task::create(
            task_id,
            title,
            options.description.clone(),
            todo_state.clone(),
            options.session_id.clone(),
            options.owner.clone(),
        );
        task.continuation_id = options.continuation_id.clone();
        if let Some(parent) = &parent_id {
            task.relationships
                .push(RelationshipEdge::new(EdgeType::Parent, parent.clone()));
        }
        task.record_transition("new", &todo_state, Some("created".into()), vec![]);
        self.tasks.create(&mut task)?;

        // Link the parent's child edge when the parent already exists; a
        // forward link keeps only the child's parent edge.
        if let Some(parent) = &parent_id {
            if let Some(mut parent_task) = self.tasks.try_get(parent)? {
                if !parent_task.child_ids().contains(&task_id) {
                    parent_task
                        .relationships
                        .push(RelationshipEdge::new(EdgeType::Child, task_id));
                    self.tasks.save(&mut parent_task)?;
                }
            } else {
                debug!(parent = %parent, task = %task_id, "parent missing; forward-linking");
            }
        }

        if let Some(sid) = &options.session_id {
            self.log_session_activity(sid, format!("Task {task_id} registered with status {todo_state}"));
        }

        if options.create_qa.unwrap_or(true) {
            let waiting = self.semantic("qa", "waiting")?;
            let qa = QaRecord::create(
                qa_id_for(task_id),
                task_id,
                format!("QA: {title}"),
                waiting,
                None,
            );
            self.qa.create(&qa)?;
        }

        Ok(task)
    }

    /// Claim a task into a session (`todo -> wip`).
    ///
    /// Fails closed when another session owns the task, unless `reclaim` is
    /// set with a reason.
    pub fn claim_task(
        &self,
        task_id: &str,
        session_id: &str,
        owner: Option<String>,
        reclaim: bool,
        reclaim_reason: Option<String>,
    ) -> Result<Task, EdisonError> {
        if !self.sessions.exists(session_id) {
            return Err(EdisonError::not_found("session", session_id));
        }
        if self.sessions.is_expired(session_id)? {
            return Err(EdisonError::Persistence(format!(
                "Session {session_id} is expired; create a new session or clean up expired ones"
            )));
        }

        let task = self.tasks.get(task_id)?;
        let mut takeover_from: Option<String> = None;
        if let Some(current_owner) = &task.session_id {
            if current_owner != session_id {
                if !reclaim {
                    return Err(EdisonError::Persistence(format!(
                        "Task {task_id} is already claimed by '{current_owner}' \
                         (cannot claim from '{session_id}'). Pass reclaim=true to take it over."
                    )));
                }
                takeover_from = Some(current_owner.clone());
            }
        }

        let wip_state = self.semantic("task", "wip")?;
        let reason = match &takeover_from {
            Some(old) => format!(
                "claimed: takeover from {old} ({})",
                reclaim_reason.as_deref().unwrap_or("reclaimed").trim()
            ),
            None => "claimed".to_string(),
        };

        let sid = session_id.to_string();
        let owner_clone = owner.clone();
        let task = self.tasks.transition(
            &self.machine,
            task_id,
            &wip_state,
            Some(session_id),
            Some(reason),
            move |t| {
                let now = utc_timestamp();
                t.session_id = Some(sid);
                if t.claimed_at.is_none() {
                    t.claimed_at = Some(now.clone());
                }
                t.last_active = Some(now);
                if let Some(owner) = owner_clone {
                    t.metadata.created_by = Some(owner);
                }
            },
        )?;

        // Move the QA record into the session tree alongside the task.
        if let Some(mut qa) = self.qa.find_by_task(task_id) {
            qa.session_id = Some(session_id.to_string());
            self.qa.save(&mut qa)?;
        }

        if let Some(old_session) = takeover_from {
            if let Ok(mut old) = self.sessions.get(&old_session) {
                old.add_activity(format!(
                    "Task {task_id} taken over by {session_id}: {}",
                    reclaim_reason.as_deref().unwrap_or("reclaimed")
                ));
                if let Err(e) = self.sessions.save(&old) {
                    warn!(session = %old_session, error = %e, "failed to record takeover");
                }
            }
        }

        Ok(task)
    }

    /// Complete a task (`wip -> done`) and advance its QA (`waiting -> todo`).
    pub fn complete_task(&self, task_id: &str, session_id: &str) -> Result<Task, EdisonError> {
        let task = self.tasks.get(task_id)?;
        if let Some(current_owner) = &task.session_id {
            if current_owner != session_id {
                return Err(EdisonError::Persistence(format!(
                    "Task {task_id} is claimed by '{current_owner}' (cannot complete from '{session_id}')"
                )));
            }
        }

        let done_state = self.semantic("task", "done")?;
        let task = self.tasks.transition(
            &self.machine,
            task_id,
            &done_state,
            Some(session_id),
            Some("completed".into()),
            |t| {
                t.last_active = Some(utc_timestamp());
            },
        )?;

        // QA advances waiting -> todo so validation can pick it up.
        let qa_todo = self.semantic("qa", "todo")?;
        let qa_waiting = self.semantic("qa", "waiting")?;
        if let Some(qa) = self.qa.find_by_task(task_id) {
            if qa.state == qa_waiting {
                self.qa.transition(
                    &self.machine,
                    &qa.id,
                    &qa_todo,
                    Some(session_id),
                    Some("task completed".into()),
                    |_| {},
                )?;
            }
        }

        Ok(task)
    }

    fn log_session_activity(&self, session_id: &str, message: String) {
        match self.sessions.get(session_id) {
            Ok(mut session) => {
                session.add_activity(message);
                if let Err(e) = self.sessions.save(&session) {
                    warn!(session = session_id, error = %e, "failed to log session activity");
                }
            }
            Err(_) => debug!(session = session_id, "activity not logged; session missing"),
        }
    }
}
