//! Step 9: record any remaining `{{...}}` markers as unresolved, then strip
//! section markers. Running this step twice yields identical output.

use regex::Regex;

use crate::context::{TransformContext, Transformer};
use crate::sections;

pub struct ValidationTransformer {
    unresolved_re: Regex,
}

impl ValidationTransformer {
    pub fn new() -> Self {
        Self {
            unresolved_re: Regex::new(r"\{\{[^}]+\}\}").expect("static regex"),
        }
    }
}

impl Default for ValidationTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for ValidationTransformer {
    fn transform(&self, content: &str, ctx: &mut TransformContext) -> String {
        let markers: Vec<String> = self
            .unresolved_re
            .find_iter(content)
            .map(|m| m.as_str().to_string())
            .collect();
        for marker in markers {
            ctx.record_variable(&marker, false);
        }
        sections::strip_markers(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_unresolved_markers() {
        let mut ctx = TransformContext::default();
        let out = ValidationTransformer::new().transform("a {{config.gone}} b", &mut ctx);
        assert_eq!(out, "a {{config.gone}} b");
        assert!(ctx.variables_missing.contains("{{config.gone}}"));
    }

    #[test]
    fn test_strips_section_markers() {
        let mut ctx = TransformContext::default();
        let input = "<!-- SECTION: s -->\nbody\n<!-- /SECTION: s -->\n";
        let out = ValidationTransformer::new().transform(input, &mut ctx);
        assert_eq!(out, "body\n");
    }

    #[test]
    fn test_idempotent() {
        let mut ctx = TransformContext::default();
        let input = "<!-- SECTION: s -->\nbody {{left.over}}\n<!-- /SECTION: s -->\n";
        let t = ValidationTransformer::new();
        let once = t.transform(input, &mut ctx);
        let twice = t.transform(&once, &mut ctx);
        assert_eq!(once, twice);
    }
}
