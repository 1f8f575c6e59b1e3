//! The nine-step template engine.
//!
//! Steps, in order: includes, section extracts, conditionals, loops, config
//! variables, context variables, path variables, references, custom
//! functions, validation. Each step is a stateless [`Transformer`] reading
//! the previous step's output.

use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde_yaml::Value as YamlValue;
use tracing::debug;

use crate::conditionals::ConditionalTransformer;
use crate::context::{TransformContext, Transformer};
use crate::functions::{FunctionRegistry, FunctionTransformer};
use crate::includes::{IncludeTransformer, DEFAULT_MAX_INCLUDE_DEPTH};
use crate::loops::LoopExpander;
use crate::references::ReferenceRenderer;
use crate::report::CompositionReport;
use crate::validation::ValidationTransformer;
use crate::variables::VariableTransformer;

pub struct TemplateEngine {
    config: YamlValue,
    packs: Vec<String>,
    project_root: Option<PathBuf>,
    source_dir: Option<PathBuf>,
    config_dir_name: String,
    max_include_depth: u32,
    functions: FunctionRegistry,
}

impl TemplateEngine {
    pub fn new(config: YamlValue, packs: Vec<String>) -> Self {
        Self {
            config,
            packs,
            project_root: None,
            source_dir: None,
            config_dir_name: ".edison".to_string(),
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
            functions: FunctionRegistry::with_builtins(),
        }
    }

    pub fn with_project_root(mut self, project_root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(project_root.into());
        self
    }

    pub fn with_source_dir(mut self, source_dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(source_dir.into());
        self
    }

    pub fn with_config_dir_name(mut self, name: impl Into<String>) -> Self {
        self.config_dir_name = name.into();
        self
    }

    pub fn with_max_include_depth(mut self, depth: u32) -> Self {
        self.max_include_depth = depth;
        self
    }

    /// Replace the function registry (layered registries are merged by the
    /// caller; later layers override).
    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    fn build_context(&self, source_layers: &[String], entity_name: &str) -> TransformContext {
        let mut ctx = TransformContext::new(self.config.clone(), self.packs.clone());
        ctx.project_root = self.project_root.clone();
        ctx.source_dir = self.source_dir.clone();
        ctx.config_dir_name = self.config_dir_name.clone();
        ctx.set_context_var(
            "source_layers",
            serde_json::json!(if source_layers.is_empty() {
                "core".to_string()
            } else {
                source_layers.join(" + ")
            }),
        );
        ctx.set_context_var(
            "timestamp",
            serde_json::json!(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        ctx.set_context_var("version", serde_json::json!(env!("CARGO_PKG_VERSION")));
        ctx.set_context_var("template", serde_json::json!(entity_name));
        ctx
    }

    /// Process content through the full pipeline, with extra context
    /// variables (loop collections, entity fields) supplied by the caller.
    pub fn process_with_vars(
        &self,
        content: &str,
        entity_name: &str,
        entity_type: &str,
        source_layers: &[String],
        extra_vars: serde_json::Map<String, serde_json::Value>,
    ) -> (String, CompositionReport) {
        let mut ctx = self.build_context(source_layers, entity_name);
        for (key, value) in extra_vars {
            ctx.set_context_var(&key, value);
        }

        let steps: Vec<Box<dyn Transformer>> = vec![
            Box::new(IncludeTransformer::new(self.max_include_depth)),
            Box::new(ConditionalTransformer::new()),
            Box::new(LoopExpander::new()),
            Box::new(VariableTransformer::new()),
            Box::new(ReferenceRenderer::new()),
            Box::new(FunctionTransformer::new(self.functions.clone())),
            Box::new(ValidationTransformer::new()),
        ];

        let mut result = content.to_string();
        for step in &steps {
            result = step.transform(&result, &mut ctx);
        }
        debug!(
            entity = entity_name,
            includes = ctx.includes_resolved.len(),
            missing = ctx.variables_missing.len(),
            "composition pipeline finished"
        );

        let mut report = CompositionReport {
            entity_name: entity_name.to_string(),
            entity_type: entity_type.to_string(),
            source_layers: if source_layers.is_empty() {
                vec!["core".to_string()]
            } else {
                source_layers.to_vec()
            },
            includes_resolved: ctx.includes_resolved,
            sections_extracted: ctx.sections_extracted,
            variables_substituted: ctx.variables_substituted,
            variables_missing: ctx.variables_missing.clone(),
            conditionals_evaluated: ctx.conditionals_evaluated,
            warnings: Vec::new(),
        };
        for missing in &ctx.variables_missing {
            report.add_warning(format!("Unresolved variable: {missing}"));
        }

        (result, report)
    }

    pub fn process(
        &self,
        content: &str,
        entity_name: &str,
        entity_type: &str,
        source_layers: &[String],
    ) -> (String, CompositionReport) {
        self.process_with_vars(
            content,
            entity_name,
            entity_type,
            source_layers,
            serde_json::Map::new(),
        )
    }
}
