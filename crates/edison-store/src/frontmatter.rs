//! Markdown-with-YAML-frontmatter codec.
//!
//! Frontmatter is a YAML mapping between `---` fences at the very start of
//! the file. The body is free-form Markdown preserved across saves. State is
//! never part of frontmatter; it is derived from the containing directory.

use serde_yaml::{Mapping, Value};

use edison_core::EdisonError;

/// A parsed entity document: frontmatter mapping plus the raw body.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub frontmatter: Mapping,
    pub body: String,
}

/// Fast check: frontmatter always starts with `---` at byte zero.
pub fn has_frontmatter(content: &str) -> bool {
    content.starts_with("---\n") || content.starts_with("---\r\n")
}

/// Split content into frontmatter and body.
///
/// Fails when the opening fence is missing, the closing fence is missing, or
/// the fenced block is not a YAML mapping.
pub fn parse_frontmatter(content: &str) -> Result<ParsedDocument, EdisonError> {
    if !has_frontmatter(content) {
        return Err(EdisonError::Persistence(
            "Document is missing YAML frontmatter".into(),
        ));
    }

    let after_open = &content[4..];
    // An immediately-closed block (`---\n---`) carries no yaml at all.
    let (yaml_part, rest) = if let Some(rest) = after_open.strip_prefix("---") {
        ("", rest)
    } else {
        let close = after_open.find("\n---").ok_or_else(|| {
            EdisonError::Persistence("Unterminated YAML frontmatter block".into())
        })?;
        (&after_open[..close], &after_open[close + 4..])
    };
    let body = rest.strip_prefix('\n').unwrap_or(rest).to_string();

    let frontmatter: Value = serde_yaml::from_str(yaml_part)
        .map_err(|e| EdisonError::Persistence(format!("Invalid frontmatter YAML: {e}")))?;
    let mapping = match frontmatter {
        Value::Mapping(map) => map,
        Value::Null => Mapping::new(),
        _ => {
            return Err(EdisonError::Persistence(
                "Frontmatter must be a YAML mapping".into(),
            ))
        }
    };

    Ok(ParsedDocument {
        frontmatter: mapping,
        body,
    })
}

/// Render a frontmatter mapping back to a fenced YAML header.
///
/// Null-valued keys are dropped so optional fields vanish instead of
/// serializing as `key: null`.
pub fn format_frontmatter(frontmatter: &Mapping) -> Result<String, EdisonError> {
    let mut cleaned = Mapping::new();
    for (key, value) in frontmatter {
        if value.is_null() {
            continue;
        }
        cleaned.insert(key.clone(), value.clone());
    }
    let yaml = serde_yaml::to_string(&cleaned)
        .map_err(|e| EdisonError::Persistence(format!("Failed to serialize frontmatter: {e}")))?;
    Ok(format!("---\n{yaml}---\n"))
}

/// Drop a leading frontmatter block, returning the body only.
pub fn strip_frontmatter_block(content: &str) -> String {
    match parse_frontmatter(content) {
        Ok(doc) => doc.body,
        Err(_) => content.to_string(),
    }
}

/// Parse a Markdown `# Title` heading line.
pub fn parse_title(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let title = trimmed.strip_prefix("# ")?;
    let title = title.trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}
