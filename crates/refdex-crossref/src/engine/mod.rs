//! Indexing engine capability and its implementations

mod elastic;
mod memory;
pub mod settings;

pub use elastic::{ElasticConfig, ElasticEngine};
pub use memory::MemoryEngine;
pub use settings::IndexSettings;

use std::fmt;

/// One serialized document ready for a bulk request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkDoc {
    /// Document ID; the engine assigns one when `None`
    pub id: Option<String>,
    /// JSON body
    pub body: Vec<u8>,
}

impl BulkDoc {
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Outcome of one document of a bulk request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResult {
    pub id: Option<String>,
    pub status: u16,
    /// Rejection reason, when the engine gave one
    pub error: Option<String>,
}

impl ItemResult {
    pub fn ok(id: Option<String>) -> Self {
        Self {
            id,
            status: 201,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Error from an engine request as a whole
#[derive(Debug)]
pub enum EngineError {
    /// Connection failure (`status: None`) or non-success HTTP status
    Transport {
        status: Option<u16>,
        message: String,
    },
    /// Response body could not be understood
    Response(String),
    /// Client could not be built (bad host, unreadable CA certificate)
    Setup(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Transport {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Response(msg) => write!(f, "unexpected response: {msg}"),
            Self::Setup(msg) => write!(f, "engine setup: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Connection failures and the listed statuses are worth another attempt
    pub fn is_retryable(&self, retry_on_status: &[u16]) -> bool {
        match self {
            Self::Transport { status: None, .. } => true,
            Self::Transport {
                status: Some(s), ..
            } => retry_on_status.contains(s),
            Self::Response(_) | Self::Setup(_) => false,
        }
    }
}

/// Bulk-capable document index.
///
/// Implementations are shared across flush workers.
pub trait IndexEngine: Send + Sync {
    /// Index `docs` into `index`; one result per document, in order
    fn bulk_write(&self, index: &str, docs: &[BulkDoc]) -> Result<Vec<ItemResult>, EngineError>;

    fn create_index(
        &self,
        name: &str,
        settings: &IndexSettings,
    ) -> Result<CreateOutcome, EngineError>;

    fn delete_index(&self, name: &str) -> Result<DeleteOutcome, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const RETRY_ON: &[u16] = &[429, 502, 503, 504];

    fn http(status: u16) -> EngineError {
        EngineError::Transport {
            status: Some(status),
            message: "test".into(),
        }
    }

    #[test]
    fn connection_error_is_retryable() {
        let err = EngineError::Transport {
            status: None,
            message: "connection refused".into(),
        };
        assert!(err.is_retryable(RETRY_ON));
    }

    #[test]
    fn listed_statuses_are_retryable() {
        for s in [429, 502, 503, 504] {
            assert!(http(s).is_retryable(RETRY_ON), "{s}");
        }
    }

    #[test]
    fn other_statuses_are_not() {
        for s in [400, 401, 403, 404, 500] {
            assert!(!http(s).is_retryable(RETRY_ON), "{s}");
        }
        assert!(!http(503).is_retryable(&[]));
    }

    #[test]
    fn response_errors_are_not_retryable() {
        assert!(!EngineError::Response("garbage".into()).is_retryable(RETRY_ON));
    }

    #[test]
    fn item_success() {
        assert!(ItemResult::ok(None).is_success());
        let rejected = ItemResult {
            id: Some("x".into()),
            status: 400,
            error: Some("mapper_parsing_exception".into()),
        };
        assert!(!rejected.is_success());
    }

    #[test]
    fn display_status() {
        assert_eq!(http(503).to_string(), "HTTP 503: test");
    }
}
