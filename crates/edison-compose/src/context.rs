//! Transform context shared by all pipeline steps.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;

/// Mutable state threaded through the transformation pipeline: configuration,
/// active packs, paths, runtime variables, and resolution tracking.
#[derive(Debug, Default)]
pub struct TransformContext {
    pub config: YamlValue,
    pub active_packs: Vec<String>,
    pub project_root: Option<PathBuf>,
    /// Directory includes are resolved from first (composed files).
    pub source_dir: Option<PathBuf>,
    /// Name of the project config dir (default `.edison`), for path variables.
    pub config_dir_name: String,
    /// Runtime variables: strings for substitution, arrays for loops.
    pub context_vars: serde_json::Map<String, JsonValue>,

    // Tracking for reports.
    pub includes_resolved: BTreeSet<String>,
    pub sections_extracted: BTreeSet<String>,
    pub variables_substituted: BTreeSet<String>,
    pub variables_missing: BTreeSet<String>,
    pub conditionals_evaluated: u32,
}

impl TransformContext {
    pub fn new(config: YamlValue, active_packs: Vec<String>) -> Self {
        Self {
            config,
            active_packs,
            config_dir_name: ".edison".to_string(),
            ..Default::default()
        }
    }

    /// Config value by dotted path (`features.auth.enabled`).
    pub fn get_config(&self, path: &str) -> Option<&YamlValue> {
        let mut current = &self.config;
        for part in path.split('.') {
            match current {
                YamlValue::Mapping(map) => {
                    current = map.get(YamlValue::String(part.to_string()))?;
                }
                _ => return None,
            }
        }
        Some(current)
    }

    /// Context var by dotted path into `context_vars`.
    pub fn get_context_var(&self, path: &str) -> Option<&JsonValue> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.context_vars.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    pub fn set_context_var(&mut self, name: &str, value: JsonValue) {
        self.context_vars.insert(name.to_string(), value);
    }

    pub fn record_include(&mut self, path: &str) {
        self.includes_resolved.insert(path.to_string());
    }

    pub fn record_section_extract(&mut self, path: &str, section: &str) {
        self.sections_extracted.insert(format!("{path}#{section}"));
    }

    pub fn record_variable(&mut self, name: &str, resolved: bool) {
        if resolved {
            self.variables_substituted.insert(name.to_string());
        } else {
            self.variables_missing.insert(name.to_string());
        }
    }

    /// Resolve a relative path against source_dir, then project_root.
    pub fn resolve_path(&self, rel: &str) -> Option<PathBuf> {
        if let Some(dir) = &self.source_dir {
            let candidate = dir.join(rel);
            if candidate.exists() {
                return Some(candidate);
            }
        }
        if let Some(root) = &self.project_root {
            let candidate = root.join(rel);
            if candidate.exists() {
                return Some(candidate);
            }
        }
        None
    }

    pub fn project_config_dir(&self) -> Option<PathBuf> {
        self.project_root
            .as_ref()
            .map(|root| root.join(&self.config_dir_name))
    }
}

/// Stringify a YAML scalar the way templates expect (`true`, `42`, `text`).
pub fn yaml_value_to_string(value: &YamlValue) -> String {
    match value {
        YamlValue::String(s) => s.clone(),
        YamlValue::Bool(b) => b.to_string(),
        YamlValue::Number(n) => n.to_string(),
        YamlValue::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Stringify a JSON value for loop/context substitution.
pub fn json_value_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// A stateless pipeline step: reads the previous step's output, returns its
/// own. Errors surface as inline markers, never as hard failures.
pub trait Transformer {
    fn transform(&self, content: &str, ctx: &mut TransformContext) -> String;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_config(yaml: &str) -> TransformContext {
        TransformContext::new(serde_yaml::from_str(yaml).unwrap(), vec![])
    }

    #[test]
    fn test_get_config_dotted() {
        let ctx = ctx_with_config("features:\n  auth:\n    enabled: true");
        assert_eq!(
            ctx.get_config("features.auth.enabled"),
            Some(&serde_yaml::Value::Bool(true))
        );
        assert!(ctx.get_config("features.missing").is_none());
    }

    #[test]
    fn test_get_context_var_dotted() {
        let mut ctx = TransformContext::default();
        ctx.set_context_var("task", serde_json::json!({"meta": {"id": "T1"}}));
        assert_eq!(
            ctx.get_context_var("task.meta.id"),
            Some(&serde_json::json!("T1"))
        );
        assert!(ctx.get_context_var("task.meta.none").is_none());
    }

    #[test]
    fn test_value_stringification() {
        assert_eq!(yaml_value_to_string(&serde_yaml::from_str("true").unwrap()), "true");
        assert_eq!(yaml_value_to_string(&serde_yaml::from_str("42").unwrap()), "42");
        assert_eq!(json_value_to_string(&serde_json::json!("x")), "x");
        assert_eq!(json_value_to_string(&serde_json::json!(null)), "");
    }

    #[test]
    fn test_record_variable_buckets() {
        let mut ctx = TransformContext::default();
        ctx.record_variable("config.a", true);
        ctx.record_variable("config.b", false);
        assert!(ctx.variables_substituted.contains("config.a"));
        assert!(ctx.variables_missing.contains("config.b"));
    }
}
