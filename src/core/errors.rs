// src/core/errors.rs

//! Defines the primary error type for the control plane.

use thiserror::Error;

/// The tagged error type used across the control plane, matching the error
/// taxonomy of the request/job/ingest layers one-to-one. Every fallible
/// operation in `core::*` returns `Result<T, ControlPlaneError>`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlPlaneError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown worker '{0}'")]
    UnknownWorker(String),

    #[error("unknown database '{0}'")]
    UnknownDatabase(String),

    #[error("unknown family '{0}'")]
    UnknownFamily(String),

    #[error("unknown table '{0}' in database '{1}'")]
    UnknownTable(String, String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("worker '{0}' is disabled")]
    WorkerDisabled(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("resource in use: {0}")]
    InUse(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlPlaneError {
    /// The short, stable string returned in the HTTP `error_code` field (§7).
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::UnknownWorker(_) => "UnknownWorker",
            Self::UnknownDatabase(_) => "UnknownDatabase",
            Self::UnknownFamily(_) => "UnknownFamily",
            Self::UnknownTable(..) => "UnknownTable",
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::PreconditionFailed(_) => "PreconditionFailed",
            Self::WorkerDisabled(_) => "WorkerDisabled",
            Self::Timeout(_) => "Timeout",
            Self::Cancelled => "Cancelled",
            Self::InUse(_) => "InUse",
            Self::Internal(_) => "Internal",
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<std::io::Error> for ControlPlaneError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(format!("io error: {e}"))
    }
}

impl From<serde_json::Error> for ControlPlaneError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidArgument(format!("malformed json: {e}"))
    }
}

impl From<toml::de::Error> for ControlPlaneError {
    fn from(e: toml::de::Error) -> Self {
        Self::InvalidArgument(format!("malformed toml: {e}"))
    }
}

impl From<sqlx::Error> for ControlPlaneError {
    fn from(e: sqlx::Error) -> Self {
        Self::Internal(format!("database backend error: {e}"))
    }
}
