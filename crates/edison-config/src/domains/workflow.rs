//! State-machine configuration: states, transitions, guards, and actions per
//! entity kind. Entirely data-driven; no transition graph is hard-coded.

use std::collections::BTreeMap;

use serde_yaml::Value;

use edison_core::EdisonError;

use crate::loader::ConfigManager;
use crate::value::{field, string_list, string_list_map, string_map};

#[derive(Debug, Clone)]
pub struct MachineSpec {
    pub states: Vec<String>,
    pub initial: String,
    pub semantics: BTreeMap<String, String>,
    pub transitions: BTreeMap<String, Vec<String>>,
    /// Guard names per `from->to` key.
    pub guards: BTreeMap<String, Vec<String>>,
    /// Action names per `from->to` key.
    pub actions: BTreeMap<String, Vec<String>>,
}

impl MachineSpec {
    fn from_value(entity_kind: &str, value: &Value) -> Result<Self, EdisonError> {
        let map = value.as_mapping().ok_or_else(|| {
            EdisonError::Config(format!("statemachine.{entity_kind} must be a mapping"))
        })?;

        let states = string_list(field(map, "states"));
        if states.is_empty() {
            return Err(EdisonError::Config(format!(
                "statemachine.{entity_kind}.states must be a non-empty list"
            )));
        }
        let initial = field(map, "initial")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                EdisonError::Config(format!("statemachine.{entity_kind}.initial is required"))
            })?;

        Ok(Self {
            states,
            initial,
            semantics: string_map(field(map, "semantics")),
            transitions: string_list_map(field(map, "transitions")),
            guards: string_list_map(field(map, "guards")),
            actions: string_list_map(field(map, "actions")),
        })
    }

    pub fn is_state(&self, state: &str) -> bool {
        self.states.iter().any(|s| s == state)
    }

    pub fn can_transition(&self, from: &str, to: &str) -> bool {
        self.transitions
            .get(from)
            .is_some_and(|targets| targets.iter().any(|t| t == to))
    }

    fn edge_key(from: &str, to: &str) -> String {
        format!("{from}->{to}")
    }

    pub fn guards_for(&self, from: &str, to: &str) -> &[String] {
        self.guards
            .get(&Self::edge_key(from, to))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn actions_for(&self, from: &str, to: &str) -> &[String] {
        self.actions
            .get(&Self::edge_key(from, to))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Resolve a semantic alias (`todo`, `wip`, ...) to the configured state
    /// name, falling back to the alias itself.
    pub fn semantic_state<'a>(&'a self, alias: &'a str) -> &'a str {
        self.semantics
            .get(alias)
            .map(String::as_str)
            .unwrap_or(alias)
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    machines: BTreeMap<String, MachineSpec>,
}

impl WorkflowConfig {
    pub fn from_config(config: &ConfigManager) -> Result<Self, EdisonError> {
        let mut machines = BTreeMap::new();
        if let Some(Value::Mapping(section)) = config.get("statemachine") {
            for (key, value) in section {
                let Some(entity_kind) = key.as_str() else {
                    continue;
                };
                machines.insert(
                    entity_kind.to_string(),
                    MachineSpec::from_value(entity_kind, value)?,
                );
            }
        }
        Ok(Self { machines })
    }

    pub fn machine(&self, entity_kind: &str) -> Result<&MachineSpec, EdisonError> {
        self.machines.get(entity_kind).ok_or_else(|| {
            EdisonError::Config(format!(
                "statemachine.{entity_kind} is not defined in configuration"
            ))
        })
    }

    pub fn states(&self, entity_kind: &str) -> Result<&[String], EdisonError> {
        Ok(&self.machine(entity_kind)?.states)
    }

    pub fn initial_state(&self, entity_kind: &str) -> Result<&str, EdisonError> {
        Ok(&self.machine(entity_kind)?.initial)
    }

    pub fn semantic_state<'a>(
        &'a self,
        entity_kind: &str,
        alias: &'a str,
    ) -> Result<&'a str, EdisonError> {
        Ok(self.machine(entity_kind)?.semantic_state(alias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    fn load() -> WorkflowConfig {
        let dir = tempdir().unwrap();
        let cfg = ConfigManager::load(dir.path()).unwrap();
        WorkflowConfig::from_config(&cfg).unwrap()
    }

    #[test]
    #[serial]
    fn test_bundled_task_machine() {
        let wf = load();
        let machine = wf.machine("task").unwrap();
        assert!(machine.is_state("todo"));
        assert!(machine.can_transition("todo", "wip"));
        assert!(!machine.can_transition("todo", "validated"));
        assert_eq!(wf.initial_state("task").unwrap(), "todo");
    }

    #[test]
    #[serial]
    fn test_qa_rejection_cycle_is_expressible() {
        let wf = load();
        let machine = wf.machine("qa").unwrap();
        assert!(machine.can_transition("wip", "todo"));
        assert!(machine.can_transition("todo", "wip"));
    }

    #[test]
    #[serial]
    fn test_guard_and_action_lookup() {
        let wf = load();
        let machine = wf.machine("task").unwrap();
        assert_eq!(
            machine.guards_for("todo", "wip"),
            &["session_exists".to_string(), "session_not_expired".to_string()]
        );
        assert!(machine.guards_for("done", "validated").is_empty());
        assert_eq!(
            machine.actions_for("wip", "done"),
            &["log_session_activity".to_string()]
        );
    }

    #[test]
    #[serial]
    fn test_unknown_kind_is_config_error() {
        let wf = load();
        let err = wf.machine("widget").unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    #[serial]
    fn test_machine_missing_initial_is_config_error() {
        let value: Value = serde_yaml::from_str("states: [a, b]").unwrap();
        let err = MachineSpec::from_value("custom", &value).unwrap_err();
        assert!(err.to_string().contains("initial is required"));
    }
}
