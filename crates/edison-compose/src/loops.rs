//! Step 4: `{{#each collection}}...{{/each}}` loop expansion.

use regex::{Captures, Regex};
use serde_json::Value as JsonValue;

use crate::context::{json_value_to_string, TransformContext, Transformer};

pub struct LoopExpander {
    each_re: Regex,
    this_re: Regex,
    index_re: Regex,
}

impl LoopExpander {
    pub fn new() -> Self {
        Self {
            each_re: Regex::new(r"(?s)\{\{#each\s+([\w.]+)\s*\}\}(.*?)\{\{/each\}\}")
                .expect("static regex"),
            this_re: Regex::new(r"\{\{this(?:\.(\w+))?\}\}").expect("static regex"),
            index_re: Regex::new(r"\{\{@index\}\}").expect("static regex"),
        }
    }

    fn expand_item(&self, template: &str, item: &JsonValue, index: usize) -> String {
        let with_index = self.index_re.replace_all(template, index.to_string());
        self.this_re
            .replace_all(&with_index, |caps: &Captures| match caps.get(1) {
                None => json_value_to_string(item),
                Some(prop) => item
                    .as_object()
                    .and_then(|map| map.get(prop.as_str()))
                    .map(json_value_to_string)
                    .unwrap_or_default(),
            })
            .into_owned()
    }

    fn expand_loop(&self, collection_path: &str, template: &str, ctx: &TransformContext) -> String {
        let Some(value) = ctx.get_context_var(collection_path) else {
            return String::new();
        };
        let Some(items) = value.as_array() else {
            return format!("<!-- ERROR: {collection_path} is not a list -->");
        };
        items
            .iter()
            .enumerate()
            .map(|(index, item)| self.expand_item(template, item, index))
            .collect()
    }
}

impl Default for LoopExpander {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for LoopExpander {
    fn transform(&self, content: &str, ctx: &mut TransformContext) -> String {
        self.each_re
            .replace_all(content, |caps: &Captures| {
                self.expand_loop(caps[1].trim(), &caps[2], ctx)
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_with(name: &str, value: JsonValue) -> TransformContext {
        let mut ctx = TransformContext::default();
        ctx.set_context_var(name, value);
        ctx
    }

    #[test]
    fn test_expands_string_items_with_index() {
        let mut ctx = ctx_with("items", json!(["x", "y"]));
        let out = LoopExpander::new().transform("{{#each items}}[{{this}}:{{@index}}]{{/each}}", &mut ctx);
        assert_eq!(out, "[x:0][y:1]");
    }

    #[test]
    fn test_expands_object_properties() {
        let mut ctx = ctx_with("files", json!([{"name": "a.rs"}, {"name": "b.rs"}]));
        let out =
            LoopExpander::new().transform("{{#each files}}- {{this.name}}\n{{/each}}", &mut ctx);
        assert_eq!(out, "- a.rs\n- b.rs\n");
    }

    #[test]
    fn test_missing_collection_expands_to_empty() {
        let mut ctx = TransformContext::default();
        let out = LoopExpander::new().transform("a{{#each gone}}x{{/each}}b", &mut ctx);
        assert_eq!(out, "ab");
    }

    #[test]
    fn test_non_list_collection_errors() {
        let mut ctx = ctx_with("scalar", json!("nope"));
        let out = LoopExpander::new().transform("{{#each scalar}}x{{/each}}", &mut ctx);
        assert!(out.contains("ERROR: scalar is not a list"));
    }

    #[test]
    fn test_dotted_collection_path() {
        let mut ctx = ctx_with("task", json!({"reads": ["README.md"]}));
        let out = LoopExpander::new().transform("{{#each task.reads}}{{this}}{{/each}}", &mut ctx);
        assert_eq!(out, "README.md");
    }

    #[test]
    fn test_missing_property_is_empty() {
        let mut ctx = ctx_with("rows", json!([{"a": 1}]));
        let out = LoopExpander::new().transform("{{#each rows}}<{{this.b}}>{{/each}}", &mut ctx);
        assert_eq!(out, "<>");
    }
}
