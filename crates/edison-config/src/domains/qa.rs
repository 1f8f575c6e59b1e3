//! QA-domain configuration: waves, validator roster, and engine specs.

use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};

use edison_core::EdisonError;

use crate::loader::ConfigManager;
use crate::value::{bool_or, field, field_aliased, opt_string, string_list, string_or, u64_or};

/// One validator group; waves execute in configured order.
#[derive(Debug, Clone)]
pub struct WaveSpec {
    pub name: String,
}

/// Execution backend description.
#[derive(Debug, Clone, Default)]
pub struct EngineSpec {
    pub engine_type: String,
    pub command: String,
    pub subcommand: String,
    pub output_flags: Vec<String>,
    pub read_only_flags: Vec<String>,
    pub response_parser: String,
    pub description: String,
}

impl EngineSpec {
    fn from_value(value: &Value) -> Self {
        let empty = Mapping::new();
        let map = value.as_mapping().unwrap_or(&empty);
        Self {
            engine_type: string_or(map, &["type"], "cli"),
            command: string_or(map, &["command"], ""),
            subcommand: string_or(map, &["subcommand"], ""),
            output_flags: string_list(field(map, "output_flags")),
            read_only_flags: string_list(field(map, "read_only_flags")),
            response_parser: string_or(map, &["response_parser"], "plain_text"),
            description: string_or(map, &["description"], ""),
        }
    }

    pub fn is_cli(&self) -> bool {
        self.engine_type == "cli"
    }
}

/// A configured analysis step producing a verdict.
///
/// `id` is the map key in `qa.validators`. Keys accept both snake_case and
/// the camelCase spellings older configs used.
#[derive(Debug, Clone)]
pub struct ValidatorSpec {
    pub id: String,
    pub name: String,
    pub engine: String,
    pub prompt: String,
    pub wave: String,
    pub fallback_engine: Option<String>,
    pub always_run: bool,
    pub blocking: bool,
    pub timeout: u64,
    /// File patterns; the validator runs when any matches the changed files.
    pub triggers: Vec<String>,
    pub focus: Vec<String>,
    pub context7_required: bool,
    pub context7_packages: Vec<String>,
}

impl ValidatorSpec {
    pub fn from_value(validator_id: &str, value: &Value) -> Result<Self, EdisonError> {
        let map = value.as_mapping().ok_or_else(|| {
            EdisonError::Config(format!("qa.validators.{validator_id} must be a mapping"))
        })?;
        let engine = opt_string(map, &["engine"]).ok_or_else(|| {
            EdisonError::Config(format!("qa.validators.{validator_id}.engine is required"))
        })?;

        Ok(Self {
            id: validator_id.to_string(),
            name: string_or(map, &["name"], validator_id),
            engine,
            prompt: string_or(map, &["prompt", "specFile"], ""),
            wave: string_or(map, &["wave"], ""),
            fallback_engine: opt_string(map, &["fallback_engine", "fallbackEngine"]),
            always_run: bool_or(map, &["always_run", "alwaysRun"], false),
            blocking: bool_or(map, &["blocking", "blocksOnFail"], true),
            timeout: u64_or(map, &["timeout"], 300),
            triggers: string_list(field(map, "triggers")),
            focus: string_list(field(map, "focus")),
            context7_required: bool_or(map, &["context7_required", "context7Required"], false),
            context7_packages: string_list(field_aliased(
                map,
                &["context7_packages", "context7Packages"],
            )),
        })
    }
}

#[derive(Debug, Clone)]
pub struct QaConfig {
    parallelism: usize,
    waves: Vec<WaveSpec>,
    validators: BTreeMap<String, ValidatorSpec>,
    engines: BTreeMap<String, EngineSpec>,
}

impl QaConfig {
    pub fn from_config(config: &ConfigManager) -> Result<Self, EdisonError> {
        let parallelism = config.get_u64("qa.parallelism").unwrap_or(4) as usize;

        let mut waves = Vec::new();
        if let Some(Value::Sequence(entries)) = config.get("qa.waves") {
            for entry in entries {
                let name = entry
                    .as_mapping()
                    .and_then(|m| field(m, "name"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        EdisonError::Config("qa.waves entries must carry a name".into())
                    })?;
                waves.push(WaveSpec {
                    name: name.to_string(),
                });
            }
        }

        let mut validators = BTreeMap::new();
        if let Some(Value::Mapping(section)) = config.get("qa.validators") {
            for (key, value) in section {
                let Some(id) = key.as_str() else { continue };
                validators.insert(id.to_string(), ValidatorSpec::from_value(id, value)?);
            }
        }

        let mut engines = BTreeMap::new();
        if let Some(Value::Mapping(section)) = config.get("qa.engines") {
            for (key, value) in section {
                let Some(id) = key.as_str() else { continue };
                engines.insert(id.to_string(), EngineSpec::from_value(value));
            }
        }

        Ok(Self {
            parallelism: parallelism.max(1),
            waves,
            validators,
            engines,
        })
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Wave names in execution order.
    pub fn wave_names(&self) -> Vec<String> {
        self.waves.iter().map(|w| w.name.clone()).collect()
    }

    pub fn validator(&self, id: &str) -> Option<&ValidatorSpec> {
        self.validators.get(id)
    }

    pub fn validators(&self) -> &BTreeMap<String, ValidatorSpec> {
        &self.validators
    }

    /// Validators assigned to a wave, in stable id order.
    pub fn validators_in_wave(&self, wave: &str) -> Vec<(&String, &ValidatorSpec)> {
        self.validators
            .iter()
            .filter(|(_, v)| v.wave == wave)
            .collect()
    }

    pub fn engine(&self, id: &str) -> Option<&EngineSpec> {
        self.engines.get(id)
    }

    pub fn engines(&self) -> &BTreeMap<String, EngineSpec> {
        &self.engines
    }
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

    #[test]
    #[serial]
    fn test_bundled_engines_and_waves() {
        let dir = tempdir().unwrap();
        let cfg = ConfigManager::load(dir.path()).unwrap();
        let qa = QaConfig::from_config(&cfg).unwrap();
        assert_eq!(qa.wave_names(), vec!["critical", "standard"]);
        assert_eq!(qa.parallelism(), 4);
        let codex = qa.engine("codex-cli").unwrap();
        assert!(codex.is_cli());
        assert_eq!(codex.response_parser, "codex");
        assert!(!qa.engine("zen-mcp").unwrap().is_cli());
    }

    #[test]
    #[serial]
    fn test_validator_spec_defaults_and_aliases() {
        let dir = tempdir().unwrap();
        write(
            &dir.path().join(".edison/config/qa.yml"),
            concat!(
                "qa:\n",
                "  validators:\n",
                "    global-codex:\n",
                "      engine: codex-cli\n",
                "      wave: critical\n",
                "      fallbackEngine: zen-mcp\n",
                "      alwaysRun: true\n",
                "      triggers: [\"**/*.rs\"]\n",
            ),
        );
        let cfg = ConfigManager::load(dir.path()).unwrap();
        let qa = QaConfig::from_config(&cfg).unwrap();
        let v = qa.validator("global-codex").unwrap();
        assert_eq!(v.id, "global-codex");
        assert_eq!(v.name, "global-codex");
        assert_eq!(v.engine, "codex-cli");
        assert_eq!(v.fallback_engine.as_deref(), Some("zen-mcp"));
        assert!(v.always_run);
        assert!(v.blocking);
        assert_eq!(v.timeout, 300);
        assert_eq!(qa.validators_in_wave("critical").len(), 1);
        assert!(qa.validators_in_wave("standard").is_empty());
    }

    #[test]
    #[serial]
    fn test_validator_without_engine_is_config_error() {
        let value: Value = serde_yaml::from_str("wave: critical").unwrap();
        let err = ValidatorSpec::from_value("broken", &value).unwrap_err();
        assert!(err.to_string().contains("engine is required"));
    }
}
