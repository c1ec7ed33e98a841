//! Reconciliation error types.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::index::NormalizeError;

/// Remote call that produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Paginated index listing.
    List,
    /// Index creation.
    Create,
    /// Index deletion.
    Delete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::List => "list indexes",
            Self::Create => "create index",
            Self::Delete => "delete index",
        })
    }
}

/// Errors that abort a reconciliation run.
///
/// Conflicts on creation and already-gone deletions are outcomes, not
/// errors, and never appear here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReconcileError {
    /// The request could not be sent or its response read.
    #[error("transport error: {message}")]
    Transport {
        /// Description from the HTTP client.
        message: String,
    },

    /// The configured API base URL cannot address index resources.
    #[error("invalid API endpoint '{url}': {message}")]
    Endpoint {
        /// Offending URL.
        url: String,
        /// Reason.
        message: String,
    },

    /// The remote API answered with a non-success, non-benign status.
    #[error("{phase} failed (HTTP {status}): {message}")]
    Api {
        /// Call that failed.
        phase: Phase,
        /// HTTP status code.
        status: u16,
        /// Target and response detail.
        message: String,
    },

    /// The desired index artifact cannot be read or is malformed.
    #[error("failed to load desired indexes from {path}: {message}")]
    Desired {
        /// Artifact path.
        path: PathBuf,
        /// Reason.
        message: String,
    },

    /// A desired or listed record cannot be normalised.
    #[error("invalid {origin} index record: {source}")]
    Normalize {
        /// `desired` or `existing`.
        origin: &'static str,
        /// Underlying problem.
        source: NormalizeError,
    },

    /// The listing cursor did not terminate within the page limit.
    #[error("index listing exceeded {max_pages} pages")]
    PageLimit {
        /// Configured limit.
        max_pages: u32,
    },

    /// No bearer token could be obtained.
    #[error("failed to obtain access token: {message}")]
    Token {
        /// Reason.
        message: String,
    },
}

impl From<reqwest::Error> for ReconcileError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport {
            message: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display() {
        let err = ReconcileError::Api {
            phase: Phase::Create,
            status: 400,
            message: "users: bad field".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "create index failed (HTTP 400): users: bad field"
        );
    }

    #[test]
    fn normalize_error_is_source() {
        let err = ReconcileError::Normalize {
            origin: "desired",
            source: NormalizeError::MissingCollectionGroup,
        };
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(
            err.to_string(),
            "invalid desired index record: index record missing non-empty collectionGroup"
        );
    }
}
