#[derive(thiserror::Error, Debug)]
pub enum EdisonError {
    #[error("Project root could not be resolved: {0}")]
    PathResolution(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("{entity_kind} not found: {entity_id}")]
    EntityNotFound {
        entity_kind: &'static str,
        entity_id: String,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Transition {from} -> {to} blocked: {}", .violations.join("; "))]
    TransitionBlocked {
        from: String,
        to: String,
        violations: Vec<String>,
    },

    #[error("Git error: {0}")]
    Git(String),

    #[error("Validator '{validator_id}' failed: {message}")]
    Validator {
        validator_id: String,
        message: String,
    },
}

impl EdisonError {
    pub fn not_found(entity_kind: &'static str, entity_id: impl Into<String>) -> Self {
        Self::EntityNotFound {
            entity_kind,
            entity_id: entity_id.into(),
        }
    }

    /// Stable kind label used by external callers to map exit codes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PathResolution(_) => "path_resolution",
            Self::Config(_) => "config",
            Self::Template(_) => "template",
            Self::EntityNotFound { .. } => "entity_not_found",
            Self::Persistence(_) => "persistence",
            Self::TransitionBlocked { .. } => "transition_blocked",
            Self::Git(_) => "git",
            Self::Validator { .. } => "validator",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_entity_not_found() {
        let err = EdisonError::not_found("task", "150-auth");
        assert_eq!(err.to_string(), "task not found: 150-auth");
    }

    #[test]
    fn test_display_transition_blocked_joins_violations() {
        let err = EdisonError::TransitionBlocked {
            from: "todo".into(),
            to: "wip".into(),
            violations: vec!["no session".into(), "expired".into()],
        };
        assert_eq!(
            err.to_string(),
            "Transition todo -> wip blocked: no session; expired"
        );
    }

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(EdisonError::Config("x".into()).kind(), "config");
        assert_eq!(EdisonError::Git("x".into()).kind(), "git");
        assert_eq!(
            EdisonError::Validator {
                validator_id: "codex".into(),
                message: "timeout".into()
            }
            .kind(),
            "validator"
        );
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EdisonError>();
    }
}
