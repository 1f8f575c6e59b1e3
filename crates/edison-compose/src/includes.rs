//! Step 1-2: `{{include:path}}`, `{{include-optional:path}}`, and
//! `{{include-section:path#name}}`.
//!
//! Required includes emit an error marker on miss; optional includes resolve
//! to the empty string. Recursion is depth-capped and cycles along a single
//! include chain are replaced with an error marker.

use std::collections::HashSet;

use regex::{Captures, Regex};

use crate::context::{TransformContext, Transformer};
use crate::sections;

pub const DEFAULT_MAX_INCLUDE_DEPTH: u32 = 10;

pub struct IncludeResolver {
    max_depth: u32,
    include_re: Regex,
    optional_re: Regex,
}

impl IncludeResolver {
    pub fn new(max_depth: u32) -> Self {
        Self {
            max_depth,
            include_re: Regex::new(r"\{\{include:([^}]+)\}\}").expect("static regex"),
            optional_re: Regex::new(r"\{\{include-optional:([^}]+)\}\}").expect("static regex"),
        }
    }

    fn resolve_includes(
        &self,
        content: &str,
        ctx: &mut TransformContext,
        depth: u32,
        seen: &HashSet<String>,
    ) -> String {
        if depth > self.max_depth {
            return content.to_string();
        }

        let after_required = self.include_re.replace_all(content, |caps: &Captures| {
            let path = caps[1].trim().to_string();
            self.resolve_single(&path, ctx, depth, seen, true)
        });

        self.optional_re
            .replace_all(&after_required, |caps: &Captures| {
                let path = caps[1].trim().to_string();
                self.resolve_single(&path, ctx, depth, seen, false)
            })
            .into_owned()
    }

    fn resolve_single(
        &self,
        path: &str,
        ctx: &mut TransformContext,
        depth: u32,
        seen: &HashSet<String>,
        required: bool,
    ) -> String {
        if seen.contains(path) {
            return format!("<!-- ERROR: Circular include detected: {path} -->");
        }

        let Some(full_path) = ctx.resolve_path(path) else {
            if required {
                return format!("<!-- ERROR: Include not found: {path} -->");
            }
            return String::new();
        };

        match std::fs::read_to_string(&full_path) {
            Ok(included) => {
                ctx.record_include(path);
                let mut next_seen = seen.clone();
                next_seen.insert(path.to_string());
                self.resolve_includes(&included, ctx, depth + 1, &next_seen)
            }
            Err(e) => {
                if required {
                    format!("<!-- ERROR: Failed to include {path}: {e} -->")
                } else {
                    String::new()
                }
            }
        }
    }
}

impl Transformer for IncludeResolver {
    fn transform(&self, content: &str, ctx: &mut TransformContext) -> String {
        self.resolve_includes(content, ctx, 0, &HashSet::new())
    }
}

pub struct SectionExtractor {
    section_re: Regex,
}

impl SectionExtractor {
    pub fn new() -> Self {
        Self {
            section_re: Regex::new(r"\{\{include-section:([^#}]+)#([^}]+)\}\}")
                .expect("static regex"),
        }
    }
}

impl Default for SectionExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for SectionExtractor {
    fn transform(&self, content: &str, ctx: &mut TransformContext) -> String {
        self.section_re
            .replace_all(content, |caps: &Captures| {
                let file_path = caps[1].trim().to_string();
                let section_name = caps[2].trim().to_string();

                let Some(full_path) = ctx.resolve_path(&file_path) else {
                    return format!(
                        "<!-- ERROR: File not found for section extract: {file_path} -->"
                    );
                };
                let file_content = match std::fs::read_to_string(&full_path) {
                    Ok(c) => c,
                    Err(e) => {
                        return format!(
                            "<!-- ERROR: Failed to extract section {section_name} from {file_path}: {e} -->"
                        )
                    }
                };
                match sections::extract_section(&file_content, &section_name) {
                    Some(body) => {
                        ctx.record_section_extract(&file_path, &section_name);
                        body
                    }
                    None => format!(
                        "<!-- ERROR: Section '{section_name}' not found in {file_path} -->"
                    ),
                }
            })
            .into_owned()
    }
}

/// Combined step: file includes first (they may carry section references),
/// then section extracts.
pub struct IncludeTransformer {
    resolver: IncludeResolver,
    extractor: SectionExtractor,
}

impl IncludeTransformer {
    pub fn new(max_include_depth: u32) -> Self {
        Self {
            resolver: IncludeResolver::new(max_include_depth),
            extractor: SectionExtractor::new(),
        }
    }
}

impl Transformer for IncludeTransformer {
    fn transform(&self, content: &str, ctx: &mut TransformContext) -> String {
        let content = self.resolver.transform(content, ctx);
        self.extractor.transform(&content, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn ctx_in(dir: &Path) -> TransformContext {
        let mut ctx = TransformContext::default();
        ctx.source_dir = Some(dir.to_path_buf());
        ctx
    }

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_required_include_resolves() {
        let dir = tempdir().unwrap();
        write(dir.path(), "part.md", "included body");
        let mut ctx = ctx_in(dir.path());
        let out = IncludeTransformer::new(10).transform("pre {{include:part.md}} post", &mut ctx);
        assert_eq!(out, "pre included body post");
        assert!(ctx.includes_resolved.contains("part.md"));
    }

    #[test]
    fn test_missing_required_include_leaves_marker() {
        let dir = tempdir().unwrap();
        let mut ctx = ctx_in(dir.path());
        let out = IncludeTransformer::new(10).transform("{{include:gone.md}}", &mut ctx);
        assert_eq!(out, "<!-- ERROR: Include not found: gone.md -->");
    }

    #[test]
    fn test_missing_optional_include_is_empty() {
        let dir = tempdir().unwrap();
        let mut ctx = ctx_in(dir.path());
        let out = IncludeTransformer::new(10).transform("a{{include-optional:gone.md}}b", &mut ctx);
        assert_eq!(out, "ab");
    }

    #[test]
    fn test_nested_includes_resolve() {
        let dir = tempdir().unwrap();
        write(dir.path(), "outer.md", "o[{{include:inner.md}}]");
        write(dir.path(), "inner.md", "i");
        let mut ctx = ctx_in(dir.path());
        let out = IncludeTransformer::new(10).transform("{{include:outer.md}}", &mut ctx);
        assert_eq!(out, "o[i]");
    }

    #[test]
    fn test_cycle_emits_single_error_marker() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.md", "A->{{include:b.md}}");
        write(dir.path(), "b.md", "B->{{include:a.md}}");
        let mut ctx = ctx_in(dir.path());
        let out = IncludeTransformer::new(10).transform("{{include:a.md}}", &mut ctx);
        assert_eq!(
            out.matches("Circular include detected").count(),
            1,
            "got: {out}"
        );
    }

    #[test]
    fn test_project_root_fallback() {
        let source = tempdir().unwrap();
        let root = tempdir().unwrap();
        write(root.path(), "docs/guide.md", "from root");
        let mut ctx = ctx_in(source.path());
        ctx.project_root = Some(root.path().to_path_buf());
        let out = IncludeTransformer::new(10).transform("{{include:docs/guide.md}}", &mut ctx);
        assert_eq!(out, "from root");
    }

    #[test]
    fn test_section_extract() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "guide.md",
            "x\n<!-- SECTION: rules -->\nrule body\n<!-- /SECTION: rules -->\ny",
        );
        let mut ctx = ctx_in(dir.path());
        let out =
            IncludeTransformer::new(10).transform("{{include-section:guide.md#rules}}", &mut ctx);
        assert_eq!(out, "rule body");
        assert!(ctx.sections_extracted.contains("guide.md#rules"));
    }

    #[test]
    fn test_section_extract_missing_section() {
        let dir = tempdir().unwrap();
        write(dir.path(), "guide.md", "no sections here");
        let mut ctx = ctx_in(dir.path());
        let out =
            IncludeTransformer::new(10).transform("{{include-section:guide.md#nope}}", &mut ctx);
        assert!(out.contains("ERROR: Section 'nope' not found"));
    }
}
