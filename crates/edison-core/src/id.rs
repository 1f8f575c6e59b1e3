//! Identifier helpers: session ids (ULID) and the task/QA id convention.

use crate::error::EdisonError;

/// Generate a new session id (26-char Crockford Base32 ULID, lowercased).
pub fn new_session_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}

/// Validate a session id: ULID format or a `sess-`/`session-` prefixed slug.
///
/// Session ids end up in branch names and directory names, so the character
/// set is restricted to `[A-Za-z0-9._-]`.
pub fn validate_session_id(session_id: &str) -> Result<(), EdisonError> {
    let id = session_id.trim();
    if id.is_empty() {
        return Err(EdisonError::Persistence("Empty session id".into()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(EdisonError::Persistence(format!(
            "Invalid session id '{id}': only [A-Za-z0-9._-] allowed"
        )));
    }
    Ok(())
}

/// Conventional QA record id for a task: `<task_id>-qa`.
pub fn qa_id_for(task_id: &str) -> String {
    let id = task_id.trim();
    if id.ends_with("-qa") {
        id.to_string()
    } else {
        format!("{id}-qa")
    }
}

/// Task id backing a QA record id (strips the `-qa` suffix).
pub fn task_id_for_qa(qa_id: &str) -> String {
    qa_id
        .trim()
        .strip_suffix("-qa")
        .unwrap_or(qa_id.trim())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_id_is_26_chars() {
        let id = new_session_id();
        assert_eq!(id.len(), 26);
        assert_eq!(id, id.to_lowercase());
        validate_session_id(&id).unwrap();
    }

    #[test]
    fn test_validate_rejects_path_characters() {
        assert!(validate_session_id("sess/../../etc").is_err());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("sess-A").is_ok());
    }

    #[test]
    fn test_qa_id_roundtrip() {
        assert_eq!(qa_id_for("150-auth"), "150-auth-qa");
        assert_eq!(qa_id_for("150-auth-qa"), "150-auth-qa");
        assert_eq!(task_id_for_qa("150-auth-qa"), "150-auth");
        assert_eq!(task_id_for_qa("150-auth"), "150-auth");
    }
}
