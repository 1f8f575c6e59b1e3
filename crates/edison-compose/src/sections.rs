//! Section markers: `<!-- SECTION: name -->` ... `<!-- /SECTION: name -->`.

use regex::Regex;

/// Extract the content between a section's open and close markers.
///
/// Returns `None` when either marker is absent.
pub fn extract_section(content: &str, name: &str) -> Option<String> {
    let open = format!("<!-- SECTION: {name} -->");
    let close = format!("<!-- /SECTION: {name} -->");
    let start = content.find(&open)? + open.len();
    let end = content[start..].find(&close)? + start;
    Some(content[start..end].trim_matches('\n').to_string())
}

/// Remove all section markers, leaving section bodies in place.
pub fn strip_markers(content: &str) -> String {
    // Markers sit on their own lines in composed output; consume the trailing
    // newline so stripping doesn't leave blank lines behind.
    let re = Regex::new(r"(?m)^[ \t]*<!-- /?SECTION: [^>]*-->[ \t]*\r?\n?").expect("static regex");
    re.replace_all(content, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "intro\n<!-- SECTION: tdd -->\nRed, green, refactor.\n<!-- /SECTION: tdd -->\noutro\n";

    #[test]
    fn test_extract_section_body() {
        assert_eq!(
            extract_section(DOC, "tdd").as_deref(),
            Some("Red, green, refactor.")
        );
    }

    #[test]
    fn test_extract_missing_section() {
        assert!(extract_section(DOC, "none").is_none());
    }

    #[test]
    fn test_strip_markers_keeps_body() {
        let stripped = strip_markers(DOC);
        assert!(!stripped.contains("SECTION"));
        assert!(stripped.contains("Red, green, refactor."));
        assert!(stripped.contains("intro"));
        assert!(stripped.contains("outro"));
    }

    #[test]
    fn test_strip_markers_idempotent() {
        let once = strip_markers(DOC);
        assert_eq!(strip_markers(&once), once);
    }
}
