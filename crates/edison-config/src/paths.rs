//! Project root resolution and management-tree path computation.
//!
//! Resolution precedence for the project root:
//! 1. `AGENTS_PROJECT_ROOT` environment override (must exist, must not be the
//!    config directory itself)
//! 2. the current directory, when it contains the management dir marker
//! 3. `git rev-parse --show-toplevel`
//!
//! The result is cached per process; the cache is discarded once the current
//! directory leaves the cached root.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use edison_core::EdisonError;

/// Env override for project root detection.
pub const ENV_PROJECT_ROOT: &str = "AGENTS_PROJECT_ROOT";
/// Env override for the project config dir name (default `.edison`).
pub const ENV_PROJECT_CONFIG_DIR: &str = "EDISON_paths__project_config_dir";
/// Env override for the user config dir.
pub const ENV_USER_CONFIG_DIR: &str = "EDISON_paths__user_config_dir";
/// Env override for the management dir name (default `.project`).
pub const ENV_MANAGEMENT_DIR: &str = "EDISON_project_management_dir";
/// Ambient session id.
pub const ENV_SESSION: &str = "AGENTS_SESSION";
/// Ambient owner override.
pub const ENV_OWNER: &str = "AGENTS_OWNER";

pub const DEFAULT_CONFIG_DIR: &str = ".edison";
pub const DEFAULT_MANAGEMENT_DIR: &str = ".project";

static ROOT_CACHE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Effective config dir name (env override wins; config layers may refine it
/// later, but bootstrap detection cannot depend on loaded config).
pub fn config_dir_name() -> String {
    std::env::var(ENV_PROJECT_CONFIG_DIR)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_DIR.to_string())
}

/// Effective management dir name.
pub fn management_dir_name() -> String {
    std::env::var(ENV_MANAGEMENT_DIR)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_MANAGEMENT_DIR.to_string())
}

/// User-level config directory (XDG on Linux), overridable via env.
pub fn user_config_dir() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var(ENV_USER_CONFIG_DIR) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    directories::ProjectDirs::from("", "", "edison").map(|dirs| dirs.config_dir().to_path_buf())
}

fn is_forbidden_root(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name == DEFAULT_CONFIG_DIR || name == config_dir_name()
}

fn git_toplevel(cwd: &Path) -> Result<PathBuf, EdisonError> {
    let out = edison_process::run_with_timeout(
        "git",
        &["rev-parse", "--show-toplevel"],
        Some(cwd),
        Duration::from_secs(5),
    )
    .map_err(|e| {
        EdisonError::PathResolution(format!(
            "git executable unavailable ({e}); set {ENV_PROJECT_ROOT} to your project root"
        ))
    })?;

    if out.exit_code != 0 {
        return Err(EdisonError::PathResolution(format!(
            "not inside a git repository; set {ENV_PROJECT_ROOT} or run from the project"
        )));
    }
    let raw = out.stdout.trim();
    if raw.is_empty() {
        return Err(EdisonError::PathResolution(
            "git rev-parse --show-toplevel returned empty output".into(),
        ));
    }
    Ok(PathBuf::from(raw))
}

/// Resolve the project root from an explicit working directory.
///
/// Exposed for tests; [`resolve_project_root`] wires in the process CWD and
/// the cache.
pub fn resolve_project_root_from(cwd: &Path) -> Result<PathBuf, EdisonError> {
    // Priority 1: environment override, honoured even over the cache.
    if let Ok(raw) = std::env::var(ENV_PROJECT_ROOT) {
        if !raw.trim().is_empty() {
            let path = PathBuf::from(raw.trim());
            if !path.exists() {
                return Err(EdisonError::PathResolution(format!(
                    "{ENV_PROJECT_ROOT} points at missing path: {}",
                    path.display()
                )));
            }
            if is_forbidden_root(&path) {
                return Err(EdisonError::PathResolution(format!(
                    "{ENV_PROJECT_ROOT} points at the config directory itself: {}",
                    path.display()
                )));
            }
            return Ok(path);
        }
    }

    // Priority 2: CWD carrying the management marker.
    if cwd.join(management_dir_name()).exists() {
        if is_forbidden_root(cwd) {
            return Err(EdisonError::PathResolution(format!(
                "refusing to use config directory {} as project root",
                cwd.display()
            )));
        }
        return Ok(cwd.to_path_buf());
    }

    // Priority 3: git toplevel.
    let top = git_toplevel(cwd)?;
    if is_forbidden_root(&top) {
        return Err(EdisonError::PathResolution(format!(
            "resolved project root is the config directory ({}); run from the project repository",
            top.display()
        )));
    }
    Ok(top)
}

/// Resolve and cache the project root for the current process.
pub fn resolve_project_root() -> Result<PathBuf, EdisonError> {
    let cwd = std::env::current_dir()
        .map_err(|e| EdisonError::PathResolution(format!("cannot read CWD: {e}")))?;

    // Env override bypasses the cache entirely.
    let has_env = std::env::var(ENV_PROJECT_ROOT)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false);

    if !has_env {
        let mut cache = ROOT_CACHE.lock().expect("root cache poisoned");
        if let Some(cached) = cache.clone() {
            let inside = cwd == cached || cwd.starts_with(&cached);
            let marker_present = cached.join(management_dir_name()).exists()
                || cached.join(config_dir_name()).exists();
            if inside && marker_present {
                return Ok(cached);
            }
            // CWD left the cached root (or markers vanished): invalidate.
            *cache = None;
        }
    }

    let resolved = resolve_project_root_from(&cwd)?;
    if !has_env {
        *ROOT_CACHE.lock().expect("root cache poisoned") = Some(resolved.clone());
    }
    Ok(resolved)
}

/// Drop the cached project root (tests, long-lived processes that chdir).
pub fn invalidate_root_cache() {
    *ROOT_CACHE.lock().expect("root cache poisoned") = None;
}

/// Computed locations under the management root (default `.project`).
#[derive(Debug, Clone)]
pub struct ManagementPaths {
    project_root: PathBuf,
    management_dir: String,
}

impl ManagementPaths {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            management_dir: management_dir_name(),
        }
    }

    pub fn with_management_dir(project_root: impl Into<PathBuf>, management_dir: &str) -> Self {
        Self {
            project_root: project_root.into(),
            management_dir: management_dir.to_string(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn management_root(&self) -> PathBuf {
        self.project_root.join(&self.management_dir)
    }

    pub fn tasks_root(&self) -> PathBuf {
        self.management_root().join("tasks")
    }

    pub fn task_state_dir(&self, state: &str) -> PathBuf {
        self.tasks_root().join(state)
    }

    pub fn qa_root(&self) -> PathBuf {
        self.management_root().join("qa")
    }

    pub fn qa_state_dir(&self, state: &str) -> PathBuf {
        self.qa_root().join(state)
    }

    pub fn sessions_root(&self) -> PathBuf {
        self.management_root().join("sessions")
    }

    pub fn session_state_dir(&self, state: &str) -> PathBuf {
        self.sessions_root().join(state)
    }

    pub fn logs_root(&self) -> PathBuf {
        self.management_root().join("logs")
    }

    pub fn archive_root(&self) -> PathBuf {
        self.management_root().join("archive")
    }

    /// Per-worktree session pin file.
    pub fn session_id_file(&self) -> PathBuf {
        self.management_root().join(".session-id")
    }
}

/// Evidence tree under `<qa-root>/<evidence-subdir>/<task_id>`.
#[derive(Debug, Clone)]
pub struct EvidencePaths {
    base: PathBuf,
}

impl EvidencePaths {
    pub fn new(qa_root: &Path, evidence_subdir: &str, task_id: &str) -> Self {
        Self {
            base: qa_root.join(evidence_subdir).join(task_id),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn round_dir(&self, round: u32) -> PathBuf {
        self.base.join(format!("round-{round}"))
    }

    /// Existing round numbers, sorted ascending.
    pub fn list_rounds(&self) -> Vec<u32> {
        let mut rounds: Vec<u32> = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.base) else {
            return rounds;
        };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(n) = name.strip_prefix("round-").and_then(|s| s.parse::<u32>().ok()) {
                rounds.push(n);
            }
        }
        rounds.sort_unstable();
        rounds
    }

    pub fn latest_round(&self) -> Option<u32> {
        self.list_rounds().into_iter().next_back()
    }
}
