//! Task-domain configuration view.

use std::path::PathBuf;

use crate::loader::ConfigManager;

#[derive(Debug, Clone)]
pub struct TaskConfig {
    evidence_subdir: String,
    template_path: PathBuf,
}

impl TaskConfig {
    pub fn from_config(config: &ConfigManager) -> Self {
        let evidence_subdir = config
            .get_str("tasks.paths.evidenceSubdir")
            .unwrap_or("validation-evidence")
            .to_string();
        let template_rel = config
            .get_str("tasks.templatePath")
            .unwrap_or("_generated/templates/TASK.md");
        Self {
            evidence_subdir,
            template_path: config.config_dir().join(template_rel),
        }
    }

    pub fn evidence_subdir(&self) -> &str {
        &self.evidence_subdir
    }

    /// Composed template used to render a task body on first creation.
    pub fn template_path(&self) -> &PathBuf {
        &self.template_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn test_defaults() {
        let dir = tempdir().unwrap();
        let cfg = ConfigManager::load(dir.path()).unwrap();
        let tasks = TaskConfig::from_config(&cfg);
        assert_eq!(tasks.evidence_subdir(), "validation-evidence");
        assert!(tasks
            .template_path()
            .ends_with(".edison/_generated/templates/TASK.md"));
    }
}
