//! Pluggable validator-output parsers.
//!
//! Keyed by the engine's `response_parser` config field. Built-ins cover the
//! common CLI tools; unknown names fall back to `plain_text`.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

/// Normalized parse outcome: the extracted response text, an optional parse
/// error, and tool-specific metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseResult {
    pub response: String,
    pub error: Option<String>,
    pub metadata: Option<JsonValue>,
}

pub type ParserFn = fn(&str) -> ParseResult;

/// Registry of named parsers. Later registrations override earlier ones.
#[derive(Debug, Clone)]
pub struct ParserRegistry {
    parsers: BTreeMap<String, ParserFn>,
}

impl ParserRegistry {
    pub fn with_builtins() -> Self {
        let mut parsers: BTreeMap<String, ParserFn> = BTreeMap::new();
        parsers.insert("plain_text".into(), parse_plain_text);
        parsers.insert("codex".into(), parse_codex);
        parsers.insert("claude".into(), parse_claude);
        parsers.insert("gemini".into(), parse_gemini);
        parsers.insert("auggie".into(), parse_auggie);
        parsers.insert("coderabbit".into(), parse_coderabbit);
        Self { parsers }
    }

    pub fn register(&mut self, name: &str, parser: ParserFn) {
        self.parsers.insert(name.to_string(), parser);
    }

    /// Parser by name, defaulting to `plain_text`.
    pub fn get(&self, name: &str) -> ParserFn {
        self.parsers
            .get(name)
            .copied()
            .unwrap_or(parse_plain_text)
    }

    pub fn names(&self) -> Vec<&str> {
        self.parsers.keys().map(String::as_str).collect()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Fallback: strip whitespace, return as-is.
pub fn parse_plain_text(output: &str) -> ParseResult {
    ParseResult {
        response: output.trim().to_string(),
        error: None,
        metadata: None,
    }
}

/// Codex streams JSONL events; the final response is the last
/// `item.completed` event carrying an `agent_message`.
pub fn parse_codex(output: &str) -> ParseResult {
    if output.trim().is_empty() {
        return ParseResult {
            response: String::new(),
            error: Some("Empty output from Codex CLI".into()),
            metadata: None,
        };
    }

    for line in output.trim().lines().rev() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<JsonValue>(line) else {
            // Non-JSON progress lines are skipped.
            continue;
        };
        if event["type"] == "item.completed" && event["item"]["type"] == "agent_message" {
            return ParseResult {
                response: event["item"]["text"].as_str().unwrap_or_default().to_string(),
                error: None,
                metadata: Some(serde_json::json!({
                    "event_type": "item.completed",
                    "item_type": "agent_message",
                })),
            };
        }
        if event["type"] == "message" {
            if let Some(content) = event["content"].as_str() {
                if !content.is_empty() {
                    return ParseResult {
                        response: content.to_string(),
                        error: None,
                        metadata: Some(serde_json::json!({"event_type": "message"})),
                    };
                }
            }
        }
    }

    ParseResult {
        response: output.trim().to_string(),
        error: Some("No agent_message found in Codex output, returning raw output".into()),
        metadata: Some(serde_json::json!({"fallback": true})),
    }
}

fn parse_json_tool(output: &str, tool: &str, response_keys: &[&str], meta_keys: &[&str]) -> ParseResult {
    if output.trim().is_empty() {
        return ParseResult {
            response: String::new(),
            error: Some(format!("Empty output from {tool} CLI")),
            metadata: None,
        };
    }

    match serde_json::from_str::<JsonValue>(output) {
        Ok(data) => {
            let response = response_keys
                .iter()
                .find_map(|key| data[key].as_str().filter(|s| !s.is_empty()))
                .unwrap_or_default()
                .to_string();
            let error = data["error"].as_str().map(str::to_string);

            let mut metadata = serde_json::Map::new();
            for key in meta_keys {
                if !data[*key].is_null() {
                    metadata.insert((*key).to_string(), data[*key].clone());
                }
            }

            ParseResult {
                response,
                error,
                metadata: if metadata.is_empty() {
                    None
                } else {
                    Some(JsonValue::Object(metadata))
                },
            }
        }
        Err(e) => ParseResult {
            response: output.trim().to_string(),
            error: Some(format!("Failed to parse JSON: {e}")),
            metadata: Some(serde_json::json!({"fallback": true})),
        },
    }
}

/// Claude Code with `--output-format json`.
pub fn parse_claude(output: &str) -> ParseResult {
    parse_json_tool(
        output,
        "Claude",
        &["result", "response", "content", "text"],
        &["model", "usage", "stop_reason", "id"],
    )
}

/// Gemini CLI: `{response, stats, error}`.
pub fn parse_gemini(output: &str) -> ParseResult {
    parse_json_tool(output, "Gemini", &["response", "text", "content"], &["stats"])
}

/// Auggie (Augment Code CLI) structured JSON.
pub fn parse_auggie(output: &str) -> ParseResult {
    parse_json_tool(
        output,
        "Auggie",
        &["response", "result", "output", "content"],
        &["model", "cost", "tokens", "duration", "status", "findings", "issues"],
    )
}

/// CodeRabbit with `--prompt-only` emits plain text with markdown sections.
pub fn parse_coderabbit(output: &str) -> ParseResult {
    if output.trim().is_empty() {
        return ParseResult {
            response: String::new(),
            error: Some("Empty output from CodeRabbit CLI".into()),
            metadata: None,
        };
    }
    let text = output.trim().to_string();
    let section_count = text
        .lines()
        .filter(|line| line.trim_start().starts_with('#'))
        .count();
    let metadata = if section_count > 0 {
        Some(serde_json::json!({"section_count": section_count}))
    } else {
        None
    };
    ParseResult {
        response: text,
        error: None,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codex_extracts_last_agent_message() {
        let output = concat!(
            "{\"type\": \"item.started\"}\n",
            "not json progress line\n",
            "{\"type\": \"item.completed\", \"item\": {\"type\": \"agent_message\", \"text\": \"APPROVED: all good\"}}\n",
        );
        let parsed = parse_codex(output);
        assert_eq!(parsed.response, "APPROVED: all good");
        assert!(parsed.error.is_none());
    }

    #[test]
    fn test_codex_falls_back_to_raw() {
        let parsed = parse_codex("plain progress only\n");
        assert_eq!(parsed.response, "plain progress only");
        assert!(parsed.error.as_deref().unwrap().contains("No agent_message"));
    }

    #[test]
    fn test_claude_reads_result_field() {
        let parsed = parse_claude(r#"{"result": "REJECTED: see findings", "model": "x"}"#);
        assert_eq!(parsed.response, "REJECTED: see findings");
        assert_eq!(parsed.metadata.unwrap()["model"], "x");
    }

    #[test]
    fn test_claude_invalid_json_falls_back() {
        let parsed = parse_claude("not json at all");
        assert_eq!(parsed.response, "not json at all");
        assert!(parsed.error.as_deref().unwrap().contains("Failed to parse JSON"));
    }

    #[test]
    fn test_gemini_response_field() {
        let parsed = parse_gemini(r#"{"response": "ok", "stats": {"tokens": 5}}"#);
        assert_eq!(parsed.response, "ok");
        assert_eq!(parsed.metadata.unwrap()["stats"]["tokens"], 5);
    }

    #[test]
    fn test_coderabbit_counts_sections() {
        let parsed = parse_coderabbit("## Summary\nfine\n## Files\n- a.rs\n");
        assert_eq!(parsed.metadata.unwrap()["section_count"], 2);
    }

    #[test]
    fn test_registry_falls_back_to_plain_text() {
        let registry = ParserRegistry::with_builtins();
        let parser = registry.get("nonexistent");
        assert_eq!(parser("  hi  ").response, "hi");
        assert!(registry.names().contains(&"codex"));
    }

    #[test]
    fn test_empty_outputs_flag_errors() {
        assert!(parse_codex("").error.is_some());
        assert!(parse_claude("").error.is_some());
        assert!(parse_gemini("").error.is_some());
        assert!(parse_coderabbit("").error.is_some());
    }
}
