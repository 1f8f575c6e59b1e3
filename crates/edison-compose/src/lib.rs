//! Layered template composition: a nine-step pipeline turning composed
//! templates into final artifacts.

pub mod artifacts;
pub mod conditionals;
pub mod context;
pub mod engine;
pub mod functions;
pub mod includes;
pub mod loops;
pub mod references;
pub mod report;
pub mod sections;
pub mod validation;
pub mod variables;

pub use artifacts::ArtifactComposer;
pub use conditionals::{ConditionEvaluator, ConditionalTransformer};
pub use context::{Transformer, TransformContext};
pub use engine::TemplateEngine;
pub use functions::{FunctionArg, FunctionRegistry, FunctionTransformer, TemplateFunction};
pub use includes::{IncludeTransformer, DEFAULT_MAX_INCLUDE_DEPTH};
pub use loops::LoopExpander;
pub use references::ReferenceRenderer;
pub use report::CompositionReport;
pub use validation::ValidationTransformer;
pub use variables::VariableTransformer;

/// Minimal `{{name}}` substitution used when rendering entity bodies from
/// templates outside the full pipeline (task creation).
pub fn render_template_text(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}
