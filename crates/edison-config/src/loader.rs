//! Layered configuration assembly.
//!
//! Layers, lowest to highest precedence:
//! 1. bundled defaults (compiled into the binary)
//! 2. user config dir (`<user-config>/config/*.yml`)
//! 3. active packs (bundled, then user, then project pack dirs, in the
//!    declared activation order)
//! 4. project overrides (`<root>/<config-dir>/config/*.yml`)
//! 5. `EDISON_*` environment overrides

use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::debug;

use edison_core::EdisonError;

use crate::merge::{deep_merge, get_path, set_path};
use crate::paths::{self, ManagementPaths};

const BUNDLED_DEFAULTS: &[(&str, &str)] = &[
    ("paths", include_str!("defaults/paths.yml")),
    ("workflow", include_str!("defaults/workflow.yml")),
    ("tasks", include_str!("defaults/tasks.yml")),
    ("session", include_str!("defaults/session.yml")),
    ("worktrees", include_str!("defaults/worktrees.yml")),
    ("qa", include_str!("defaults/qa.yml")),
    ("timeouts", include_str!("defaults/timeouts.yml")),
];

/// Merged configuration plus the paths it was resolved against.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    project_root: PathBuf,
    merged: Value,
    active_packs: Vec<String>,
}

fn empty_map() -> Value {
    Value::Mapping(serde_yaml::Mapping::new())
}

fn yaml_files_sorted(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yml") | Some("yaml")
                )
        })
        .collect();
    files.sort();
    files
}

fn merge_dir(mut acc: Value, dir: &Path) -> Value {
    for file in yaml_files_sorted(dir) {
        match edison_core::read_yaml::<Value>(&file) {
            Ok(layer) => {
                debug!(file = %file.display(), "merging config layer");
                acc = deep_merge(acc, layer);
            }
            Err(e) => {
                // Bulk layer scans tolerate individual parse failures.
                debug!(file = %file.display(), error = %e, "skipping unreadable config file");
            }
        }
    }
    acc
}

fn bundled_defaults() -> Result<Value, EdisonError> {
    let mut acc = empty_map();
    for (name, content) in BUNDLED_DEFAULTS {
        let layer: Value = serde_yaml::from_str(content)
            .map_err(|e| EdisonError::Config(format!("bundled defaults '{name}' invalid: {e}")))?;
        acc = deep_merge(acc, layer);
    }
    Ok(acc)
}

fn env_overrides(mut acc: Value) -> Value {
    for (key, value) in std::env::vars() {
        let Some(rest) = key.strip_prefix("EDISON_") else {
            continue;
        };
        // Flags like EDISON_SESSION_CREATE_PROGRESS are not config values.
        if rest.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
            continue;
        }
        let path = rest.split("__").collect::<Vec<_>>().join(".");
        set_path(&mut acc, &path, Value::String(value));
    }
    acc
}

fn read_active_packs(config: &Value) -> Vec<String> {
    get_path(config, "packs.active")
        .and_then(|v| v.as_sequence())
        .map(|seq| {
            seq.iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl ConfigManager {
    /// Load the layered configuration for a project root.
    pub fn load(project_root: impl Into<PathBuf>) -> Result<Self, EdisonError> {
        let project_root: PathBuf = project_root.into();
        let config_dir = project_root.join(paths::config_dir_name());
        let project_overrides_dir = config_dir.join("config");
        let user_dir = paths::user_config_dir();

        // Preliminary merge (no packs) to discover the active pack list.
        let mut prelim = bundled_defaults()?;
        if let Some(user) = &user_dir {
            prelim = merge_dir(prelim, &user.join("config"));
        }
        prelim = merge_dir(prelim, &project_overrides_dir);
        prelim = env_overrides(prelim);
        let active_packs = read_active_packs(&prelim);

        // Final merge with pack layers in declared order.
        let mut merged = bundled_defaults()?;
        if let Some(user) = &user_dir {
            merged = merge_dir(merged, &user.join("config"));
        }
        for pack in &active_packs {
            if let Some(user) = &user_dir {
                merged = merge_dir(merged, &user.join("packs").join(pack).join("config"));
            }
            merged = merge_dir(merged, &config_dir.join("packs").join(pack).join("config"));
        }
        merged = merge_dir(merged, &project_overrides_dir);
        merged = env_overrides(merged);

        Ok(Self {
            project_root,
            merged,
            active_packs,
        })
    }

    /// Load against the auto-resolved project root.
    pub fn load_default() -> Result<Self, EdisonError> {
        let root = paths::resolve_project_root()?;
        Self::load(root)
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn merged(&self) -> &Value {
        &self.merged
    }

    pub fn active_packs(&self) -> &[String] {
        &self.active_packs
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.merged, path)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(|v| v.as_u64())
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(|v| v.as_bool())
    }

    /// Required string key; `ConfigError` with the key name when absent.
    pub fn require_str(&self, path: &str) -> Result<&str, EdisonError> {
        self.get_str(path)
            .ok_or_else(|| EdisonError::Config(format!("missing required config key: {path}")))
    }

    /// Project config dir, honouring the merged `paths.project_config_dir`.
    pub fn config_dir(&self) -> PathBuf {
        let name = self
            .get_str("paths.project_config_dir")
            .map(str::to_string)
            .unwrap_or_else(paths::config_dir_name);
        self.project_root.join(name)
    }

    /// Generated artifacts directory (`<config-dir>/_generated`).
    pub fn generated_dir(&self) -> PathBuf {
        self.config_dir().join("_generated")
    }

    /// Management paths honouring the merged `project_management_dir`.
    pub fn management_paths(&self) -> ManagementPaths {
        let dir = self
            .get_str("project_management_dir")
            .or_else(|| self.get_str("paths.management_dir"))
            .unwrap_or(paths::DEFAULT_MANAGEMENT_DIR);
        ManagementPaths::with_management_dir(&self.project_root, dir)
    }

    /// Subprocess timeout (seconds) for a named bucket, with the bundled
    /// `default` bucket as fallback.
    pub fn subprocess_timeout(&self, bucket: &str) -> u64 {
        self.get_u64(&format!("subprocess_timeouts.{bucket}"))
            .or_else(|| self.get_u64("subprocess_timeouts.default"))
            .unwrap_or(60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    #[serial]
    fn test_bundled_defaults_present() {
        let dir = tempdir().unwrap();
        let cfg = ConfigManager::load(dir.path()).unwrap();
        assert_eq!(cfg.get_str("paths.project_config_dir"), Some(".edison"));
        assert_eq!(cfg.subprocess_timeout("git_operations"), 30);
        assert_eq!(cfg.subprocess_timeout("unknown_bucket"), 60);
    }

    #[test]
    #[serial]
    fn test_project_overrides_win_over_bundled() {
        let dir = tempdir().unwrap();
        write(
            &dir.path().join(".edison/config/tasks.yml"),
            "tasks:\n  paths:\n    evidenceSubdir: proof\n",
        );
        let cfg = ConfigManager::load(dir.path()).unwrap();
        assert_eq!(cfg.get_str("tasks.paths.evidenceSubdir"), Some("proof"));
    }

    #[test]
    #[serial]
    fn test_pack_layer_between_user_and_project() {
        let dir = tempdir().unwrap();
        write(
            &dir.path().join(".edison/config/packs.yml"),
            "packs:\n  active: [nextjs]\n",
        );
        write(
            &dir.path().join(".edison/packs/nextjs/config/qa.yml"),
            "qa:\n  parallelism: 8\n",
        );
        let cfg = ConfigManager::load(dir.path()).unwrap();
        assert_eq!(cfg.active_packs(), &["nextjs".to_string()]);
        assert_eq!(cfg.get_u64("qa.parallelism"), Some(8));
    }

    #[test]
    #[serial]
    fn test_env_override_has_highest_precedence() {
        let dir = tempdir().unwrap();
        write(
            &dir.path().join(".edison/config/paths.yml"),
            "project_management_dir: .mgmt\n",
        );
        std::env::set_var("EDISON_project_management_dir", ".state");
        let cfg = ConfigManager::load(dir.path()).unwrap();
        assert_eq!(cfg.get_str("project_management_dir"), Some(".state"));
        assert_eq!(
            cfg.management_paths().management_root(),
            dir.path().join(".state")
        );
        std::env::remove_var("EDISON_project_management_dir");
    }

    #[test]
    #[serial]
    fn test_require_str_reports_key() {
        let dir = tempdir().unwrap();
        let cfg = ConfigManager::load(dir.path()).unwrap();
        let err = cfg.require_str("no.such.key").unwrap_err();
        assert!(err.to_string().contains("no.such.key"));
    }

    #[test]
    #[serial]
    fn test_malformed_project_layer_is_skipped() {
        let dir = tempdir().unwrap();
        write(&dir.path().join(".edison/config/bad.yml"), ": [ not yaml");
        let cfg = ConfigManager::load(dir.path()).unwrap();
        // Bundled defaults still available.
        assert_eq!(cfg.get_str("paths.project_config_dir"), Some(".edison"));
    }
}
