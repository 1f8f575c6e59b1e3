//! Structured reports for composition runs.

use std::collections::BTreeSet;

use serde::Serialize;

/// What a pipeline run resolved, extracted, substituted, and missed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompositionReport {
    pub entity_name: String,
    pub entity_type: String,
    pub source_layers: Vec<String>,
    pub includes_resolved: BTreeSet<String>,
    pub sections_extracted: BTreeSet<String>,
    pub variables_substituted: BTreeSet<String>,
    pub variables_missing: BTreeSet<String>,
    pub conditionals_evaluated: u32,
    pub warnings: Vec<String>,
}

impl CompositionReport {
    /// `core + pack1 + pack2` style layer string.
    pub fn source_layer_string(&self) -> String {
        if self.source_layers.is_empty() {
            "core".to_string()
        } else {
            self.source_layers.join(" + ")
        }
    }

    pub fn has_issues(&self) -> bool {
        !self.warnings.is_empty() || !self.variables_missing.is_empty()
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Composition Report: {}/{}", self.entity_type, self.entity_name),
            format!("  Layers: {}", self.source_layer_string()),
            format!("  Includes: {}", self.includes_resolved.len()),
            format!("  Sections: {}", self.sections_extracted.len()),
            format!(
                "  Variables: {} resolved, {} missing",
                self.variables_substituted.len(),
                self.variables_missing.len()
            ),
            format!("  Conditionals: {}", self.conditionals_evaluated),
        ];
        if !self.warnings.is_empty() {
            lines.push(format!("  Warnings: {}", self.warnings.len()));
            for warning in self.warnings.iter().take(3) {
                lines.push(format!("    - {warning}"));
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_string_defaults_to_core() {
        let report = CompositionReport::default();
        assert_eq!(report.source_layer_string(), "core");
    }

    #[test]
    fn test_summary_lists_warnings() {
        let mut report = CompositionReport {
            entity_name: "api-builder".into(),
            entity_type: "agent".into(),
            source_layers: vec!["core".into(), "nextjs".into()],
            ..Default::default()
        };
        report.add_warning("Unresolved variable: config.x");
        let summary = report.summary();
        assert!(summary.contains("agent/api-builder"));
        assert!(summary.contains("core + nextjs"));
        assert!(summary.contains("Unresolved variable: config.x"));
        assert!(report.has_issues());
    }
}
