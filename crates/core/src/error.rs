//! Error taxonomy for store calls and translation.

use serde::{Deserialize, Serialize};

/// Errors surfaced by object stores and syncers.
///
/// Only the retry policy decides between retry and requeue; everything below it
/// just reports which class of failure happened.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("already_exists: {0}")]
    AlreadyExists(String),
    #[error("conflict: {0}")]
    Conflict(String),
    /// Input that cannot be synced until the user changes it.
    #[error("validation: {0}")]
    Validation(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("serialization: {0}")]
    Serialization(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Coarse classes used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    NotFound,
    Conflict,
    Validation,
    Transport,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::NotFound => "not_found",
            ErrorClass::Conflict => "conflict",
            ErrorClass::Validation => "validation",
            ErrorClass::Transport => "transport",
        }
    }
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::NotFound(_) => ErrorClass::NotFound,
            SyncError::AlreadyExists(_) | SyncError::Conflict(_) => ErrorClass::Conflict,
            SyncError::Validation(_) | SyncError::Serialization(_) => ErrorClass::Validation,
            SyncError::Transport(_) | SyncError::Timeout(_) => ErrorClass::Transport,
        }
    }

    /// Validation failures wait for user input; everything else heals on retry.
    pub fn is_retriable(&self) -> bool {
        self.class() != ErrorClass::Validation
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, SyncError::AlreadyExists(_))
    }
}

impl From<kube::Error> for SyncError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => {
                let msg = format!("{} ({})", resp.message, resp.reason);
                match resp.code {
                    404 => SyncError::NotFound(msg),
                    409 if resp.reason == "AlreadyExists" => SyncError::AlreadyExists(msg),
                    409 => SyncError::Conflict(msg),
                    400 | 422 => SyncError::Validation(msg),
                    _ => SyncError::Transport(msg),
                }
            }
            kube::Error::SerdeError(e) => SyncError::Serialization(e.to_string()),
            other => SyncError::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}
