use thiserror::Error;

use crate::application::repos::RepoError;

use super::backend::BackendError;

/// Failures surfaced by the cache-aware query surface.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Absent record, reported to a caller that expects a structured body.
    #[error("{}", not_found_message(.record, .ident.as_deref()))]
    NotFound {
        record: &'static str,
        ident: Option<String>,
    },
    /// Absent record, reported as a bare not-found signal.
    #[error("resource not found")]
    Missing,
    #[error("batch lookups require a single-column primary key; `{record}` has a composite key")]
    UnsupportedKeyShape { record: &'static str },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Store(#[from] RepoError),
    #[error("cached value under `{key}` could not be decoded")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl QueryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Missing)
    }
}

fn not_found_message(record: &str, ident: Option<&str>) -> String {
    match ident {
        Some(ident) => format!("{record} \"{ident}\" not found"),
        None => format!("{record} not found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_includes_identifier() {
        let err = QueryError::NotFound {
            record: "User",
            ident: Some("alice".to_string()),
        };
        assert_eq!(err.to_string(), "User \"alice\" not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn not_found_message_without_identifier() {
        let err = QueryError::NotFound {
            record: "Cafe",
            ident: None,
        };
        assert_eq!(err.to_string(), "Cafe not found");
    }

    #[test]
    fn backend_errors_are_not_not_found() {
        let err = QueryError::from(BackendError::unavailable("connection refused"));
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "cache backend unavailable: connection refused"
        );
    }
}
