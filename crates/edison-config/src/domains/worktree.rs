//! Worktree and shared-state configuration view.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use edison_core::EdisonError;

use crate::loader::ConfigManager;
use crate::value::{bool_or, field, string_list, string_or, u64_or};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedStateMode {
    Primary,
    External,
    Meta,
}

impl SharedStateMode {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "primary" => Self::Primary,
            "external" => Self::External,
            _ => Self::Meta,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorktreeTimeouts {
    pub fetch: u64,
    pub worktree_add: u64,
    pub install: u64,
    pub health_check: u64,
    pub branch_check: u64,
    pub prune: u64,
}

impl Default for WorktreeTimeouts {
    fn default() -> Self {
        Self {
            fetch: 60,
            worktree_add: 30,
            install: 300,
            health_check: 10,
            branch_check: 10,
            prune: 10,
        }
    }
}

impl WorktreeTimeouts {
    fn from_value(value: Option<&Value>) -> Self {
        let defaults = Self::default();
        let Some(map) = value.and_then(Value::as_mapping) else {
            return defaults;
        };
        Self {
            fetch: u64_or(map, &["fetch"], defaults.fetch),
            worktree_add: u64_or(map, &["worktreeAdd"], defaults.worktree_add),
            install: u64_or(map, &["install"], defaults.install),
            health_check: u64_or(map, &["healthCheck"], defaults.health_check),
            branch_check: u64_or(map, &["branchCheck"], defaults.branch_check),
            prune: u64_or(map, &["prune"], defaults.prune),
        }
    }
}

/// One entry of `worktrees.sharedState.sharedPaths`.
///
/// A bare string in YAML is shorthand for a session-scoped shared directory.
#[derive(Debug, Clone)]
pub struct SharedPathSpec {
    pub path: String,
    pub scopes: Vec<String>,
    pub merge_existing: bool,
    pub target_root: String,
    pub path_type: String,
    pub enabled: bool,
    pub commit_allowed: bool,
    pub commit_allow_prefixes: Vec<String>,
    pub only_if_target_exists: bool,
}

impl SharedPathSpec {
    fn for_path(path: String) -> Self {
        Self {
            path,
            scopes: vec!["session".into()],
            merge_existing: true,
            target_root: "shared".into(),
            path_type: "dir".into(),
            enabled: true,
            commit_allowed: true,
            commit_allow_prefixes: Vec::new(),
            only_if_target_exists: false,
        }
    }

    /// Parse one entry; entries without a path are dropped.
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(bare) = value.as_str() {
            let path = bare.trim();
            if path.is_empty() {
                return None;
            }
            return Some(Self::for_path(path.to_string()));
        }

        let map = value.as_mapping()?;
        let path = field(map, "path")?.as_str()?.trim().to_string();
        if path.is_empty() {
            return None;
        }

        let mut spec = Self::for_path(path);
        let scopes = string_list(field(map, "scopes"));
        if !scopes.is_empty() {
            spec.scopes = scopes.iter().map(|s| s.trim().to_lowercase()).collect();
        }
        spec.merge_existing = bool_or(map, &["mergeExisting"], true);
        spec.target_root = match string_or(map, &["targetRoot"], "shared").to_lowercase().as_str() {
            "primary" => "primary".to_string(),
            _ => "shared".to_string(),
        };
        spec.path_type = match string_or(map, &["type"], "dir").to_lowercase().as_str() {
            "file" => "file".to_string(),
            _ => "dir".to_string(),
        };
        spec.enabled = bool_or(map, &["enabled"], true);
        spec.commit_allowed = bool_or(map, &["commitAllowed"], true);
        spec.commit_allow_prefixes = string_list(field(map, "commitAllowPrefixes"))
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        spec.only_if_target_exists =
            bool_or(map, &["onlyIfTargetExists", "only_if_target_exists"], false);
        Some(spec)
    }

    pub fn is_dir(&self) -> bool {
        self.path_type == "dir"
    }

    pub fn in_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

#[derive(Debug, Clone)]
pub struct CommitGuardSpec {
    pub enabled: bool,
    pub allow_prefixes: Vec<String>,
}

impl Default for CommitGuardSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_prefixes: Vec::new(),
        }
    }
}

impl CommitGuardSpec {
    fn from_value(value: Option<&Value>) -> Self {
        let Some(map) = value.and_then(Value::as_mapping) else {
            return Self::default();
        };
        Self {
            enabled: bool_or(map, &["enabled"], true),
            allow_prefixes: string_list(field(map, "allowPrefixes")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SharedStateSpec {
    pub mode: SharedStateMode,
    pub meta_branch: String,
    pub meta_path_template: String,
    pub external_path: Option<String>,
    pub shared_paths: Vec<SharedPathSpec>,
    /// Per-scope `info/exclude` patterns (`primary`/`session`/`meta`).
    pub git_excludes: BTreeMap<String, Vec<String>>,
    pub commit_guard: CommitGuardSpec,
}

impl Default for SharedStateSpec {
    fn default() -> Self {
        Self {
            mode: SharedStateMode::Meta,
            meta_branch: "edison-meta".into(),
            meta_path_template: ".worktrees/_meta".into(),
            external_path: None,
            shared_paths: Vec::new(),
            git_excludes: BTreeMap::new(),
            commit_guard: CommitGuardSpec::default(),
        }
    }
}

impl SharedStateSpec {
    fn from_value(value: Option<&Value>) -> Self {
        let mut spec = Self::default();
        let Some(map) = value.and_then(Value::as_mapping) else {
            return spec;
        };
        spec.mode = SharedStateMode::parse(&string_or(map, &["mode"], "meta"));
        spec.meta_branch = string_or(map, &["metaBranch"], "edison-meta");
        spec.meta_path_template = string_or(map, &["metaPathTemplate"], ".worktrees/_meta");
        spec.external_path = field(map, "externalPath")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(Value::Sequence(entries)) = field(map, "sharedPaths") {
            spec.shared_paths = entries.iter().filter_map(SharedPathSpec::from_value).collect();
        }
        if let Some(Value::Mapping(excludes)) = field(map, "gitExcludes") {
            for (key, val) in excludes {
                if let Some(scope) = key.as_str() {
                    spec.git_excludes
                        .insert(scope.to_string(), string_list(Some(val)));
                }
            }
        }
        spec.commit_guard = CommitGuardSpec::from_value(field(map, "commitGuard"));
        spec
    }

    /// Enabled shared paths, last duplicate per path winning.
    pub fn effective_shared_paths(&self) -> Vec<&SharedPathSpec> {
        let mut by_path: Vec<(&str, &SharedPathSpec)> = Vec::new();
        for item in &self.shared_paths {
            by_path.retain(|(p, _)| *p != item.path.as_str());
            by_path.push((item.path.as_str(), item));
        }
        by_path
            .into_iter()
            .filter(|(_, item)| item.enabled)
            .map(|(_, item)| item)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct WorktreeConfig {
    pub enabled: bool,
    pub worktrees_base: String,
    pub branch_prefix: String,
    /// `fixed` or `current`; empty string defers to presence of `baseBranch`.
    pub base_branch_mode: String,
    pub base_branch: String,
    pub fetch_mode: String,
    pub install_deps: bool,
    pub post_install_commands: Vec<String>,
    pub uuid_suffix_length: usize,
    pub archive_directory: String,
    pub timeouts: WorktreeTimeouts,
    pub shared_state: SharedStateSpec,
}

impl WorktreeConfig {
    pub fn from_config(config: &ConfigManager) -> Result<Self, EdisonError> {
        let empty = Mapping::new();
        let map = match config.get("worktrees") {
            Some(Value::Mapping(map)) => map,
            Some(_) => {
                return Err(EdisonError::Config(
                    "worktrees section must be a mapping".into(),
                ))
            }
            None => &empty,
        };

        Ok(Self {
            enabled: bool_or(map, &["enabled"], true),
            worktrees_base: string_or(map, &["worktreesBase"], ".worktrees"),
            branch_prefix: string_or(map, &["branchPrefix"], "session/"),
            base_branch_mode: string_or(map, &["baseBranchMode"], ""),
            base_branch: string_or(map, &["baseBranch"], ""),
            fetch_mode: string_or(map, &["fetchMode"], "on_failure"),
            install_deps: bool_or(map, &["installDeps"], false),
            post_install_commands: string_list(field(map, "postInstallCommands")),
            uuid_suffix_length: u64_or(map, &["uuidSuffixLength"], 8) as usize,
            archive_directory: string_or(map, &["archiveDirectory"], ".worktrees/archive"),
            timeouts: WorktreeTimeouts::from_value(field(map, "timeouts")),
            shared_state: SharedStateSpec::from_value(field(map, "sharedState")),
        })
    }

    /// Worktree target for a session: `<worktrees-base>/<session-id>`.
    pub fn worktree_path(&self, project_root: &Path, session_id: &str) -> PathBuf {
        let base = PathBuf::from(&self.worktrees_base);
        if base.is_absolute() {
            base.join(session_id)
        } else {
            project_root.join(base).join(session_id)
        }
    }

    pub fn branch_name(&self, session_id: &str) -> String {
        format!("{}{}", self.branch_prefix, session_id)
    }

    pub fn archive_path(&self, project_root: &Path) -> PathBuf {
        let raw = PathBuf::from(&self.archive_directory);
        if raw.is_absolute() {
            raw
        } else {
            project_root.join(raw)
        }
    }

    /// `never | always | on_failure`, defaulting unknown values to on_failure.
    pub fn normalized_fetch_mode(&self) -> &str {
        match self.fetch_mode.as_str() {
            "never" | "always" | "on_failure" => self.fetch_mode.as_str(),
            _ => "on_failure",
        }
    }

    pub fn meta_worktree_path(&self, project_root: &Path) -> PathBuf {
        let raw = PathBuf::from(&self.shared_state.meta_path_template);
        if raw.is_absolute() {
            raw
        } else {
            project_root.join(raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn test_bundled_defaults_parse() {
        let dir = tempdir().unwrap();
        let cfg = ConfigManager::load(dir.path()).unwrap();
        let wt = WorktreeConfig::from_config(&cfg).unwrap();
        assert!(wt.enabled);
        assert_eq!(wt.branch_name("sess-a"), "session/sess-a");
        assert_eq!(wt.normalized_fetch_mode(), "on_failure");
        assert_eq!(wt.shared_state.mode, SharedStateMode::Meta);
        assert_eq!(wt.shared_state.meta_branch, "edison-meta");
        assert_eq!(wt.timeouts.worktree_add, 30);
        let shared = wt.shared_state.effective_shared_paths();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].path, ".project");
        assert!(shared[0].in_scope("primary"));
    }

    #[test]
    #[serial]
    fn test_bare_string_shared_path() {
        let value: Value = serde_yaml::from_str("\".zen\"").unwrap();
        let spec = SharedPathSpec::from_value(&value).unwrap();
        assert_eq!(spec.path, ".zen");
        assert_eq!(spec.scopes, vec!["session"]);
        assert!(spec.is_dir());
        assert!(spec.merge_existing);
    }

    #[test]
    #[serial]
    fn test_pathless_entry_dropped() {
        let value: Value = serde_yaml::from_str("scopes: [session]").unwrap();
        assert!(SharedPathSpec::from_value(&value).is_none());
    }

    #[test]
    #[serial]
    fn test_paths_resolve_relative_to_root() {
        let dir = tempdir().unwrap();
        let cfg = ConfigManager::load(dir.path()).unwrap();
        let wt = WorktreeConfig::from_config(&cfg).unwrap();
        assert_eq!(
            wt.worktree_path(dir.path(), "sid"),
            dir.path().join(".worktrees/sid")
        );
        assert_eq!(
            wt.meta_worktree_path(dir.path()),
            dir.path().join(".worktrees/_meta")
        );
    }

    #[test]
    #[serial]
    fn test_duplicate_shared_paths_last_wins() {
        let value: Value = serde_yaml::from_str(concat!(
            "sharedPaths:\n",
            "  - path: .project\n",
            "    scopes: [session]\n",
            "  - path: .project\n",
            "    scopes: [primary]\n",
        ))
        .unwrap();
        let spec = SharedStateSpec::from_value(Some(&value));
        let effective = spec.effective_shared_paths();
        assert_eq!(effective.len(), 1);
        assert!(effective[0].in_scope("primary"));
        assert!(!effective[0].in_scope("session"));
    }
}
