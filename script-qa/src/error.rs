//! Error types for the QA engine.
//!
//! Oracle failures never show up here: they are absorbed where the call is
//! made. What remains are usage errors, which stop a run before any phase
//! executes, and phase errors, which the orchestrator records as a failed
//! phase.

use std::time::Duration;
use thiserror::Error;

/// Usage errors surfaced before any phase runs.
#[derive(Debug, Error)]
pub enum QaError {
    #[error("No scenes supplied")]
    NoScenes,

    #[error("World configuration declares no entities")]
    EmptyWorld,

    #[error("Invalid tag '{tag}': {reason}")]
    InvalidTag { tag: String, reason: String },

    #[error("Tag {0} is declared more than once")]
    DuplicateTag(String),

    #[error("Tag {tag} is listed under {list} but does not use the {expected} prefix")]
    CategoryMismatch {
        tag: String,
        list: &'static str,
        expected: &'static str,
    },

    #[error("Scene numbers must run 1..={count} without gaps (found {found:?})")]
    SceneNumbering { count: usize, found: Vec<u32> },

    #[error("Entity in {list} is missing its {field}")]
    MissingField {
        list: &'static str,
        field: &'static str,
    },
}

/// Failures that abort a single phase but not the run.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Phase timed out after {0:?}")]
    Timeout(Duration),

    #[error("Worker task failed: {0}")]
    TaskFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from parsing a tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("tag is empty")]
    Empty,

    #[error("tag '{0}' has no recognised prefix")]
    UnknownPrefix(String),

    #[error("tag '{0}' has nothing after its prefix")]
    MissingName(String),

    #[error("tag '{found}' is not canonical; expected '{canonical}'")]
    NotCanonical { found: String, canonical: String },

    #[error("tag '{0}' contains characters outside A-Z, 0-9 and '_'")]
    InvalidCharacters(String),
}

impl From<TagError> for QaError {
    fn from(err: TagError) -> Self {
        let tag = match &err {
            TagError::Empty => String::new(),
            TagError::UnknownPrefix(t)
            | TagError::MissingName(t)
            | TagError::InvalidCharacters(t) => t.clone(),
            TagError::NotCanonical { found, .. } => found.clone(),
        };
        QaError::InvalidTag {
            tag,
            reason: err.to_string(),
        }
    }
}

/// Result type for engine entry points.
pub type QaResult<T> = Result<T, QaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QaError::SceneNumbering {
            count: 3,
            found: vec![1, 2, 4],
        };
        assert_eq!(
            err.to_string(),
            "Scene numbers must run 1..=3 without gaps (found [1, 2, 4])"
        );
    }

    #[test]
    fn test_tag_error_conversion() {
        let err: QaError = TagError::NotCanonical {
            found: "CHAR_mei".to_string(),
            canonical: "CHAR_MEI".to_string(),
        }
        .into();

        match err {
            QaError::InvalidTag { tag, reason } => {
                assert_eq!(tag, "CHAR_mei");
                assert!(reason.contains("CHAR_MEI"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
