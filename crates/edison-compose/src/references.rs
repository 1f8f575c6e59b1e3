//! Step 8: `{{reference-section:path#name|purpose}}` pointer rendering.
//!
//! Unlike include-section, references output a pointer line without embedding
//! the section's content.

use regex::{Captures, Regex};

use crate::context::{TransformContext, Transformer};

pub struct ReferenceRenderer {
    reference_re: Regex,
}

impl ReferenceRenderer {
    pub fn new() -> Self {
        Self {
            reference_re: Regex::new(r"\{\{reference-section:([^#}]+)#([^|}]+)\|([^}]+)\}\}")
                .expect("static regex"),
        }
    }
}

impl Default for ReferenceRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for ReferenceRenderer {
    fn transform(&self, content: &str, _ctx: &mut TransformContext) -> String {
        self.reference_re
            .replace_all(content, |caps: &Captures| {
                format!(
                    "- {}#{}: {}",
                    caps[1].trim(),
                    caps[2].trim(),
                    caps[3].trim()
                )
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renders_pointer_line() {
        let mut ctx = TransformContext::default();
        let out = ReferenceRenderer::new().transform(
            "{{reference-section:guidelines/VALIDATION.md#tdd|TDD requirements}}",
            &mut ctx,
        );
        assert_eq!(out, "- guidelines/VALIDATION.md#tdd: TDD requirements");
    }

    #[test]
    fn test_does_not_read_the_file() {
        // The referenced path does not exist; rendering must still succeed.
        let mut ctx = TransformContext::default();
        let out = ReferenceRenderer::new()
            .transform("{{reference-section:missing.md#x|see docs}}", &mut ctx);
        assert_eq!(out, "- missing.md#x: see docs");
    }
}
