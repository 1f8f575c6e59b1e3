//! Validator and engine registries built from configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use edison_config::{ConfigManager, QaConfig, ValidatorSpec};
use edison_core::EdisonError;

use crate::cli_engine::CliEngine;
use crate::delegated::DelegatedEngine;
use crate::engine::Engine;
use crate::parsers::ParserRegistry;

/// Resolves validators to engines, honouring fallbacks.
pub struct ValidatorRegistry {
    qa: QaConfig,
    engines: BTreeMap<String, Arc<dyn Engine>>,
}

impl ValidatorRegistry {
    pub fn new(config: &ConfigManager) -> Result<Self, EdisonError> {
        Self::with_parsers(config, ParserRegistry::with_builtins())
    }

    /// Custom parser registrations compose on top of the built-ins.
    pub fn with_parsers(
        config: &ConfigManager,
        parsers: ParserRegistry,
    ) -> Result<Self, EdisonError> {
        let qa = QaConfig::from_config(config)?;
        let project_root: PathBuf = config.project_root().to_path_buf();
        let config_dir_name = config
            .config_dir()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(".edison")
            .to_string();

        let mut engines: BTreeMap<String, Arc<dyn Engine>> = BTreeMap::new();
        for (engine_id, spec) in qa.engines() {
            let engine: Arc<dyn Engine> = if spec.is_cli() {
                Arc::new(CliEngine::new(
                    engine_id,
                    spec.clone(),
                    project_root.clone(),
                    config_dir_name.clone(),
                    parsers.clone(),
                ))
            } else {
                Arc::new(DelegatedEngine::new())
            };
            engines.insert(engine_id.clone(), engine);
        }

        Ok(Self { qa, engines })
    }

    pub fn qa_config(&self) -> &QaConfig {
        &self.qa
    }

    pub fn validator(&self, id: &str) -> Option<&ValidatorSpec> {
        self.qa.validator(id)
    }

    pub fn engine(&self, id: &str) -> Option<Arc<dyn Engine>> {
        self.engines.get(id).cloned()
    }

    /// Validators configured for a wave, in stable id order.
    pub fn validators_in_wave(&self, wave: &str) -> Vec<ValidatorSpec> {
        self.qa
            .validators_in_wave(wave)
            .into_iter()
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// The engine that would actually run a validator: its primary when
    /// available, its fallback otherwise. `None` means blocked.
    pub fn resolve_engine(&self, validator: &ValidatorSpec) -> Option<Arc<dyn Engine>> {
        if let Some(primary) = self.engine(&validator.engine) {
            if primary.can_execute() {
                return Some(primary);
            }
        }
        if let Some(fallback_id) = &validator.fallback_engine {
            if let Some(fallback) = self.engine(fallback_id) {
                if fallback.can_execute() {
                    return Some(fallback);
                }
            }
        }
        None
    }

    /// Whether the validator would run through a CLI engine (as opposed to
    /// delegation or being blocked).
    pub fn is_cli_executable(&self, validator: &ValidatorSpec) -> bool {
        let check = |engine_id: &str| {
            self.qa
                .engine(engine_id)
                .map(|spec| spec.is_cli())
                .unwrap_or(false)
                && self
                    .engine(engine_id)
                    .map(|engine| engine.can_execute())
                    .unwrap_or(false)
        };
        if check(&validator.engine) {
            return true;
        }
        validator
            .fallback_engine
            .as_deref()
            .is_some_and(check)
    }
}

/// Narrow a wave's validators to those that should run for the changed
/// files: `always_run` plus trigger matches, plus explicit extras.
pub fn triggered_validators(
    validators: &[ValidatorSpec],
    changed_files: &[String],
    extra_ids: &[String],
) -> Vec<ValidatorSpec> {
    validators
        .iter()
        .filter(|v| {
            if v.always_run || extra_ids.contains(&v.id) {
                return true;
            }
            v.triggers.iter().any(|pattern| {
                glob::Pattern::new(pattern)
                    .map(|p| {
                        changed_files.iter().any(|file| {
                            p.matches_with(
                                file,
                                glob::MatchOptions {
                                    require_literal_separator: false,
                                    ..Default::default()
                                },
                            )
                        })
                    })
                    .unwrap_or(false)
            })
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::path::Path;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn registry_with(root: &Path, qa_yaml: &str) -> ValidatorRegistry {
        write(&root.join(".edison/config/qa.yml"), qa_yaml);
        let config = ConfigManager::load(root).unwrap();
        ValidatorRegistry::new(&config).unwrap()
    }

    const MISSING_CLI_WITH_FALLBACK: &str = concat!(
        "qa:\n",
        "  engines:\n",
        "    ghost-cli:\n",
        "      type: cli\n",
        "      command: definitely-not-installed-xyz\n",
        "  validators:\n",
        "    global-codex:\n",
        "      engine: ghost-cli\n",
        "      wave: critical\n",
        "      fallback_engine: zen-mcp\n",
        "      always_run: true\n",
    );

    #[test]
    #[serial]
    fn test_fallback_to_delegated_when_cli_missing() {
        let dir = tempdir().unwrap();
        let registry = registry_with(dir.path(), MISSING_CLI_WITH_FALLBACK);
        let validator = registry.validator("global-codex").unwrap().clone();

        assert!(!registry.is_cli_executable(&validator));
        let engine = registry.resolve_engine(&validator).expect("fallback engine");
        assert!(engine.can_execute());
    }

    #[test]
    #[serial]
    fn test_no_engine_available_means_blocked() {
        let dir = tempdir().unwrap();
        let registry = registry_with(
            dir.path(),
            concat!(
                "qa:\n",
                "  engines:\n",
                "    ghost-cli:\n",
                "      type: cli\n",
                "      command: definitely-not-installed-xyz\n",
                "  validators:\n",
                "    lonely:\n",
                "      engine: ghost-cli\n",
                "      wave: critical\n",
            ),
        );
        let validator = registry.validator("lonely").unwrap().clone();
        assert!(registry.resolve_engine(&validator).is_none());
    }

    #[test]
    #[serial]
    fn test_validators_in_wave_ordering() {
        let dir = tempdir().unwrap();
        let registry = registry_with(
            dir.path(),
            concat!(
                "qa:\n",
                "  validators:\n",
                "    b-val: {engine: zen-mcp, wave: critical}\n",
                "    a-val: {engine: zen-mcp, wave: critical}\n",
                "    other: {engine: zen-mcp, wave: standard}\n",
            ),
        );
        let ids: Vec<String> = registry
            .validators_in_wave("critical")
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, vec!["a-val", "b-val"]);
    }

    #[test]
    #[serial]
    fn test_trigger_narrowing() {
        let dir = tempdir().unwrap();
        let registry = registry_with(
            dir.path(),
            concat!(
                "qa:\n",
                "  validators:\n",
                "    rust-val:\n",
                "      engine: zen-mcp\n",
                "      wave: critical\n",
                "      triggers: [\"**/*.rs\"]\n",
                "    docs-val:\n",
                "      engine: zen-mcp\n",
                "      wave: critical\n",
                "      triggers: [\"docs/**\"]\n",
                "    always-val:\n",
                "      engine: zen-mcp\n",
                "      wave: critical\n",
                "      always_run: true\n",
            ),
        );
        let wave = registry.validators_in_wave("critical");
        let changed = vec!["src/main.rs".to_string()];

        let triggered = triggered_validators(&wave, &changed, &[]);
        let ids: Vec<&str> = triggered.iter().map(|v| v.id.as_str()).collect();
        assert!(ids.contains(&"rust-val"));
        assert!(ids.contains(&"always-val"));
        assert!(!ids.contains(&"docs-val"));

        // Orchestrator extras force inclusion.
        let with_extra = triggered_validators(&wave, &changed, &["docs-val".to_string()]);
        assert_eq!(with_extra.len(), 3);
    }
}
