//! Steps 5-7: config variables, context variables, and path variables.

use regex::{Captures, Regex};

use crate::context::{json_value_to_string, yaml_value_to_string, TransformContext, Transformer};

/// `{{config.dotted.path}}` against the merged configuration. Misses keep the
/// marker and are recorded as missing.
pub struct ConfigVariableTransformer {
    config_re: Regex,
}

impl ConfigVariableTransformer {
    pub fn new() -> Self {
        Self {
            config_re: Regex::new(r"\{\{config\.([a-zA-Z_][\w.]*)\}\}").expect("static regex"),
        }
    }
}

impl Default for ConfigVariableTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for ConfigVariableTransformer {
    fn transform(&self, content: &str, ctx: &mut TransformContext) -> String {
        // Two passes: resolve immutably, then record into ctx.
        let mut resolved: Vec<(String, Option<String>)> = Vec::new();
        for caps in self.config_re.captures_iter(content) {
            let path = caps[1].to_string();
            let value = ctx.get_config(&path).map(yaml_value_to_string);
            resolved.push((path, value));
        }
        for (path, value) in &resolved {
            ctx.record_variable(&format!("config.{path}"), value.is_some());
        }

        self.config_re
            .replace_all(content, |caps: &Captures| {
                let path = &caps[1];
                resolved
                    .iter()
                    .find(|(p, _)| p == path)
                    .and_then(|(_, v)| v.clone())
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// The closed context-variable set: `source_layers`, `timestamp`, `version`,
/// `template`.
pub struct ContextVariableTransformer {
    context_re: Regex,
}

impl ContextVariableTransformer {
    pub fn new() -> Self {
        Self {
            context_re: Regex::new(r"\{\{(source_layers|timestamp|version|template)\}\}")
                .expect("static regex"),
        }
    }
}

impl Default for ContextVariableTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for ContextVariableTransformer {
    fn transform(&self, content: &str, ctx: &mut TransformContext) -> String {
        let mut resolved: Vec<(String, Option<String>)> = Vec::new();
        for caps in self.context_re.captures_iter(content) {
            let name = caps[1].to_string();
            let value = ctx.context_vars.get(&name).map(json_value_to_string);
            resolved.push((name, value));
        }
        for (name, value) in &resolved {
            ctx.record_variable(name, value.is_some());
        }

        self.context_re
            .replace_all(content, |caps: &Captures| {
                let name = &caps[1];
                resolved
                    .iter()
                    .find(|(n, _)| n == name)
                    .and_then(|(_, v)| v.clone())
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// `{{PROJECT_EDISON_DIR}}` -> `<project_root>/<config-dir-name>`.
pub struct PathVariableTransformer {
    path_re: Regex,
}

impl PathVariableTransformer {
    pub fn new() -> Self {
        Self {
            path_re: Regex::new(r"\{\{PROJECT_EDISON_DIR\}\}").expect("static regex"),
        }
    }
}

impl Default for PathVariableTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for PathVariableTransformer {
    fn transform(&self, content: &str, ctx: &mut TransformContext) -> String {
        let Some(edison_dir) = ctx.project_config_dir() else {
            return content.to_string();
        };
        let replacement = edison_dir.to_string_lossy().into_owned();
        if self.path_re.is_match(content) {
            ctx.record_variable("PROJECT_EDISON_DIR", true);
        }
        // NoExpand: the path is literal, not a capture-group template.
        self.path_re
            .replace_all(content, regex::NoExpand(&replacement))
            .into_owned()
    }
}

/// Combined step: config, then context, then path variables.
pub struct VariableTransformer {
    config: ConfigVariableTransformer,
    context: ContextVariableTransformer,
    path: PathVariableTransformer,
}

impl VariableTransformer {
    pub fn new() -> Self {
        Self {
            config: ConfigVariableTransformer::new(),
            context: ContextVariableTransformer::new(),
            path: PathVariableTransformer::new(),
        }
    }
}

impl Default for VariableTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for VariableTransformer {
    fn transform(&self, content: &str, ctx: &mut TransformContext) -> String {
        let content = self.config.transform(content, ctx);
        let content = self.context.transform(&content, ctx);
        self.path.transform(&content, ctx)
    }
}
