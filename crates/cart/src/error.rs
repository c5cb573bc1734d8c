//! Cart error taxonomy.
//!
//! [`CartError`] is what manager operations return and what ends up in the
//! state's error flag. Its `Display` output is the user-facing message: the
//! backend's own `error` text when it sent one, otherwise a fixed fallback
//! per operation.

use thiserror::Error;

use crate::api::ApiError;
use crate::storage::StorageError;

/// Errors surfaced by cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// The request never completed.
    #[error("{message}")]
    Network {
        message: String,
        #[source]
        source: ApiError,
    },

    /// The backend rejected the request or answered with something unusable.
    #[error("{message}")]
    Server {
        status: Option<u16>,
        message: String,
    },

    /// The request was refused before reaching the backend.
    #[error("{0}")]
    Validation(String),

    /// The guest cart could not be read or written.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A login or logout happened while the operation was in flight.
    #[error("Session changed, please retry")]
    SessionChanged,
}

impl CartError {
    /// Classify a backend failure, using `fallback` when the backend sent no
    /// message of its own.
    #[must_use]
    pub fn from_api(err: ApiError, fallback: &str) -> Self {
        match &err {
            ApiError::Http(_) => Self::Network {
                message: fallback.to_string(),
                source: err,
            },
            ApiError::Parse(_) => Self::Server {
                status: None,
                message: fallback.to_string(),
            },
            ApiError::Api { .. } | ApiError::Unauthorized(_) | ApiError::NotFound(_) => {
                Self::Server {
                    status: err.status(),
                    message: err.server_message().unwrap_or(fallback).to_string(),
                }
            }
        }
    }

    /// The operation needs an authenticated session.
    #[must_use]
    pub fn login_required(action: &str) -> Self {
        Self::Validation(format!("Login required to {action}"))
    }

    /// Whether retrying the same call later could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Storage(_) | Self::SessionChanged => true,
            Self::Server { status, .. } => match status {
                Some(code) => *code >= 500 || *code == 429,
                None => true,
            },
            Self::Validation(_) => false,
        }
    }
}

/// Result type alias for `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;
