//! Wave-based validation execution.
//!
//! Waves run strictly in configured order; validators inside a wave run in
//! parallel (bounded pool) when CLI-executable and sequentially when
//! delegated. Existing per-round reports are reused instead of re-running,
//! which is what lets delegated validators deliver their reports
//! out-of-band.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use threadpool::ThreadPool;
use tracing::{debug, info, warn};

use edison_config::{ConfigManager, TaskConfig, ValidatorSpec};
use edison_core::EdisonError;

use crate::engine::{zen_role_for, RunRequest, ValidationResult, Verdict};
use crate::evidence::EvidenceService;
use crate::registry::{triggered_validators, ValidatorRegistry};

/// Caller-facing knobs for one execution.
#[derive(Debug, Default, Clone)]
pub struct ExecuteOptions {
    /// Run a single wave instead of all configured waves.
    pub wave: Option<String>,
    /// Explicit validator ids; overrides trigger narrowing.
    pub validators_filter: Option<Vec<String>>,
    pub blocking_only: bool,
    /// Parallel CLI execution within a wave (default true).
    pub sequential: bool,
    pub round: Option<u32>,
    /// Orchestrator-supplied `(wave, validator_id)` extras.
    pub extra_validators: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct WaveExecution {
    pub wave: String,
    pub validators: Vec<ValidationResult>,
    pub blocking_passed: bool,
    pub blocking_failed: Vec<String>,
    pub delegated: Vec<String>,
    pub delegated_blocking: Vec<String>,
}

impl WaveExecution {
    fn new(wave: &str) -> Self {
        Self {
            wave: wave.to_string(),
            validators: Vec::new(),
            blocking_passed: true,
            blocking_failed: Vec::new(),
            delegated: Vec::new(),
            delegated_blocking: Vec::new(),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.validators.iter().all(|v| v.verdict == Verdict::Approve)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub task_id: String,
    pub session_id: String,
    pub round: u32,
    pub waves: Vec<WaveExecution>,
    pub all_blocking_passed: bool,
    pub blocking_failed: Vec<String>,
    pub delegated_validators: Vec<String>,
}

impl ExecutionResult {
    pub fn total_validators(&self) -> usize {
        self.waves.iter().map(|w| w.validators.len()).sum()
    }

    pub fn passed_count(&self) -> usize {
        self.count_where(|v| v.verdict == Verdict::Approve)
    }

    pub fn failed_count(&self) -> usize {
        self.count_where(|v| {
            matches!(v.verdict, Verdict::Reject | Verdict::Blocked | Verdict::Error)
        })
    }

    pub fn pending_count(&self) -> usize {
        self.total_validators() - self.passed_count() - self.failed_count()
    }

    fn count_where(&self, predicate: impl Fn(&ValidationResult) -> bool) -> usize {
        self.waves
            .iter()
            .flat_map(|w| w.validators.iter())
            .filter(|v| predicate(v))
            .count()
    }

    /// `completed` when no delegation remains outstanding.
    pub fn status(&self) -> &'static str {
        if self.delegated_validators.is_empty() {
            "completed"
        } else {
            "awaiting_delegation"
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let delegation_instructions: Vec<serde_json::Value> = self
            .waves
            .iter()
            .flat_map(|w| w.validators.iter())
            .filter(|v| v.verdict == Verdict::Pending)
            .flat_map(|v| {
                v.follow_up_tasks
                    .iter()
                    .filter(|t| t.is_delegation())
                    .map(move |t| {
                        serde_json::json!({
                            "validator_id": v.validator_id,
                            "zen_role": t.zen_role,
                            "instructionsPath": t.instructions_path,
                        })
                    })
            })
            .collect();

        serde_json::json!({
            "task_id": self.task_id,
            "session_id": self.session_id,
            "round": self.round,
            "waves": self.waves.iter().map(|w| {
                serde_json::json!({
                    "wave": w.wave,
                    "blocking_passed": w.blocking_passed,
                    "blocking_failed": w.blocking_failed,
                    "delegated": w.delegated,
                    "results": w.validators.iter().map(|v| {
                        serde_json::json!({
                            "validator_id": v.validator_id,
                            "verdict": v.verdict.as_str(),
                            "duration": v.duration_secs,
                            "exit_code": v.exit_code,
                            "error": v.error,
                        })
                    }).collect::<Vec<_>>(),
                })
            }).collect::<Vec<_>>(),
            "summary": {
                "total": self.total_validators(),
                "passed": self.passed_count(),
                "failed": self.failed_count(),
                "pending": self.pending_count(),
            },
            "all_blocking_passed": self.all_blocking_passed,
            "blocking_failed": self.blocking_failed,
            "delegated_validators": self.delegated_validators,
            "delegation_instructions": delegation_instructions,
            "status": self.status(),
        })
    }
}

pub struct ValidationExecutor {
    registry: Arc<ValidatorRegistry>,
    project_root: PathBuf,
    evidence_root: PathBuf,
    max_workers: usize,
}

impl ValidationExecutor {
    pub fn new(config: &ConfigManager) -> Result<Self, EdisonError> {
        let registry = Arc::new(ValidatorRegistry::new(config)?);
        let task_cfg = TaskConfig::from_config(config);
        let evidence_root = config
            .management_paths()
            .qa_root()
            .join(task_cfg.evidence_subdir());
        let max_workers = registry
            .qa_config()
            .parallelism()
            .min(num_cpus::get().max(1));
        Ok(Self {
            registry,
            project_root: config.project_root().to_path_buf(),
            evidence_root,
            max_workers,
        })
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    pub fn evidence_service(&self, task_id: &str) -> EvidenceService {
        EvidenceService::new(task_id, self.evidence_root.join(task_id))
    }

    /// Execute validators for a task, wave by wave.
    pub fn execute(
        &self,
        task_id: &str,
        session_id: &str,
        worktree_path: Option<&Path>,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, EdisonError> {
        let worktree = worktree_path.unwrap_or(&self.project_root);
        let evidence = self.evidence_service(task_id);
        let round = evidence.ensure_round(options.round)?;

        let waves_to_run = match &options.wave {
            Some(wave) => vec![wave.clone()],
            None => self.registry.qa_config().wave_names(),
        };

        // Trigger context: uncommitted + untracked files in the worktree.
        let changed_files =
            edison_session::changed_files(worktree, "HEAD", 30).unwrap_or_default();
        debug!(task = task_id, files = changed_files.len(), "trigger file context");

        let mut result = ExecutionResult {
            task_id: task_id.to_string(),
            session_id: session_id.to_string(),
            round,
            waves: Vec::new(),
            all_blocking_passed: true,
            blocking_failed: Vec::new(),
            delegated_validators: Vec::new(),
        };

        for wave_name in waves_to_run {
            let wave_result = self.execute_wave(
                &wave_name,
                task_id,
                session_id,
                worktree,
                round,
                &evidence,
                &changed_files,
                options,
            );

            if !wave_result.blocking_passed {
                result.all_blocking_passed = false;
                result.blocking_failed.extend(wave_result.blocking_failed.clone());
            }
            result
                .delegated_validators
                .extend(wave_result.delegated_blocking.clone());

            let stop = !wave_result.blocking_passed;
            if stop {
                warn!(
                    wave = %wave_result.wave,
                    failed = ?wave_result.blocking_failed,
                    "wave has blocking failures; stopping execution"
                );
            }
            result.waves.push(wave_result);
            if stop {
                break;
            }
        }

        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_wave(
        &self,
        wave: &str,
        task_id: &str,
        session_id: &str,
        worktree: &Path,
        round: u32,
        evidence: &EvidenceService,
        changed_files: &[String],
        options: &ExecuteOptions,
    ) -> WaveExecution {
        info!(wave, task = task_id, "executing wave");
        let mut wave_result = WaveExecution::new(wave);

        // Membership: wave assignment from config; relevance: explicit filter
        // overrides trigger narrowing (always_run + patterns + extras).
        let all_in_wave = self.registry.validators_in_wave(wave);
        let mut validators: Vec<ValidatorSpec> = match &options.validators_filter {
            Some(filter) => all_in_wave
                .into_iter()
                .filter(|v| filter.contains(&v.id))
                .collect(),
            None => {
                let extras: Vec<String> = options
                    .extra_validators
                    .iter()
                    .filter(|(w, _)| w == wave)
                    .map(|(_, id)| id.clone())
                    .collect();
                triggered_validators(&all_in_wave, changed_files, &extras)
            }
        };
        if options.blocking_only {
            validators.retain(|v| v.blocking);
        }
        if validators.is_empty() {
            debug!(wave, "no validators to run");
            return wave_result;
        }
        let validators_in_wave = validators.clone();

        // Reuse existing reports rather than re-running (and overwriting)
        // them. Required for delegation: the orchestrator writes the real
        // report out-of-band and a re-run must pick it up verbatim.
        let mut to_run: Vec<ValidatorSpec> = Vec::new();
        for validator in validators {
            let report = evidence.read_validator_report(round, &validator.id);
            let report_matches = report["taskId"] == task_id
                && report["round"].as_u64() == Some(round as u64)
                && (report["validatorId"] == validator.id.as_str()
                    || report["validatorId"].is_null())
                && report["verdict"].as_str().is_some_and(|v| !v.is_empty());
            if report_matches {
                let verdict = report["verdict"]
                    .as_str()
                    .and_then(Verdict::parse)
                    .unwrap_or(Verdict::Pending);
                let mut existing = ValidationResult::new(&validator.id, verdict);
                existing.summary = report["summary"].as_str().unwrap_or_default().to_string();
                debug!(validator = %validator.id, "reusing existing report");
                wave_result.validators.push(existing);
            } else {
                to_run.push(validator);
            }
        }

        // Partition by execution capability.
        let (executable, delegated): (Vec<_>, Vec<_>) = to_run
            .into_iter()
            .partition(|v| self.registry.is_cli_executable(v));
        info!(
            wave,
            executable = executable.len(),
            delegated = delegated.len(),
            "wave partitioned"
        );
        wave_result.delegated = delegated.iter().map(|v| v.id.clone()).collect();
        wave_result.delegated_blocking = delegated
            .iter()
            .filter(|v| v.blocking)
            .map(|v| v.id.clone())
            .collect();

        let request = RunRequest::new(task_id, session_id, worktree, round);

        // Parallel CLI execution through a bounded worker pool.
        if !options.sequential && executable.len() > 1 {
            let pool = ThreadPool::new(self.max_workers);
            let (tx, rx) = mpsc::channel::<ValidationResult>();
            for validator in &executable {
                let registry = Arc::clone(&self.registry);
                let validator = validator.clone();
                let request = request.clone();
                let evidence = evidence.clone();
                let tx = tx.clone();
                pool.execute(move || {
                    let result = run_one(&registry, &validator, &request, &evidence);
                    // Receiver only disconnects if the executor panicked.
                    let _ = tx.send(result);
                });
            }
            drop(tx);
            for result in rx {
                self.persist_report(&result, task_id, round, evidence);
                wave_result.validators.push(result);
            }
            pool.join();
        } else {
            for validator in &executable {
                let result = run_one(&self.registry, validator, &request, evidence);
                self.persist_report(&result, task_id, round, evidence);
                wave_result.validators.push(result);
            }
        }

        // Delegated validators always run sequentially; they only generate
        // instructions.
        for validator in &delegated {
            let result = run_one(&self.registry, validator, &request, evidence);
            self.persist_report(&result, task_id, round, evidence);
            wave_result.validators.push(result);
        }

        // Blocking check over the full narrowed set: blocking validators
        // only pass on an explicit approve. Pending (delegated) results are
        // not failures, but the bar is not met yet.
        for validator in &validators_in_wave {
            if !validator.blocking {
                continue;
            }
            let found = wave_result
                .validators
                .iter()
                .find(|r| r.validator_id == validator.id);
            match found {
                Some(result) if result.verdict == Verdict::Approve => {}
                Some(result) => {
                    wave_result.blocking_passed = false;
                    if result.verdict != Verdict::Pending {
                        wave_result.blocking_failed.push(validator.id.clone());
                    }
                }
                None => {
                    wave_result.blocking_passed = false;
                }
            }
        }

        wave_result
    }

    /// Write `validator-<id>-report.md` for executed validators.
    ///
    /// Delegation results never produce a report stub; the orchestrator owns
    /// that file. CLI results are persisted even when pending or blocked so
    /// guards can reason over actual outcomes.
    fn persist_report(
        &self,
        result: &ValidationResult,
        task_id: &str,
        round: u32,
        evidence: &EvidenceService,
    ) {
        if result.has_delegation() {
            return;
        }
        let model = self
            .registry
            .validator(&result.validator_id)
            .map(|v| infer_model_from_engine(&v.engine))
            .unwrap_or("unknown");
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let report = result.to_report(
            task_id,
            round,
            model,
            &zen_role_for(&result.validator_id),
            &now,
            &now,
        );
        if let Err(e) = evidence.write_validator_report(round, &result.validator_id, &report) {
            warn!(validator = %result.validator_id, error = %e, "failed to persist report");
        }
    }
}

fn run_one(
    registry: &ValidatorRegistry,
    validator: &ValidatorSpec,
    request: &RunRequest,
    evidence: &EvidenceService,
) -> ValidationResult {
    match registry.resolve_engine(validator) {
        Some(engine) => engine.run(validator, request, evidence),
        None => {
            let mut result = ValidationResult::new(&validator.id, Verdict::Blocked);
            result.summary = format!(
                "No engine available for validator '{}' (primary '{}' unavailable, no usable fallback)",
                validator.id, validator.engine
            );
            result
        }
    }
}

/// Report `model` field from the engine id; an identifier, kept low-entropy.
fn infer_model_from_engine(engine_id: &str) -> &'static str {
    let lower = engine_id.to_lowercase();
    if lower.contains("claude") {
        "claude"
    } else if lower.contains("codex") {
        "codex"
    } else if lower.contains("gemini") {
        "gemini"
    } else if lower.contains("auggie") {
        "auggie"
    } else if lower.contains("coderabbit") {
        "coderabbit"
    } else {
        "unknown"
    }
}
