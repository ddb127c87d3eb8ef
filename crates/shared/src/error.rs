use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a `NavError`, stable enough to hand to front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ApplicationClosed,
    Flow,
    KeyArityMismatch,
    QueryNotFound,
    Configuration,
    NotFound,
    Module,
    Persistence,
    Internal,
}

#[derive(Debug, Error)]
pub enum NavError {
    /// Normal termination: `EXIT` was emitted and nothing handles it.
    #[error("application closed")]
    ApplicationClosed,
    #[error("unknown outmessage: {message}")]
    Flow { context: String, message: String },
    #[error("table {table} has {expected} primary-key column(s) but {supplied} value(s) were supplied")]
    KeyArityMismatch {
        table: String,
        expected: usize,
        supplied: usize,
    },
    #[error("query not found: {0}")]
    QueryNotFound(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("malformed routing line {line}: {content:?}")]
    MalformedFlow { line: usize, content: String },
    #[error("unknown view type: {0}")]
    UnknownViewType(String),
    #[error("no {table} found for key {key}")]
    NotFound { table: String, key: String },
    #[error("could not load module {module} because requirement {requirement} failed to load")]
    ModuleDependency { module: String, requirement: String },
    #[error("unknown module: {0}")]
    UnknownModule(String),
    #[error("no persistence backend attached")]
    NoPersistence,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl NavError {
    pub fn flow(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Flow {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            NavError::ApplicationClosed => ErrorCode::ApplicationClosed,
            NavError::Flow { .. } => ErrorCode::Flow,
            NavError::KeyArityMismatch { .. } => ErrorCode::KeyArityMismatch,
            NavError::QueryNotFound(_) => ErrorCode::QueryNotFound,
            NavError::Configuration(_)
            | NavError::MalformedFlow { .. }
            | NavError::UnknownViewType(_)
            | NavError::NoPersistence => ErrorCode::Configuration,
            NavError::NotFound { .. } => ErrorCode::NotFound,
            NavError::ModuleDependency { .. } | NavError::UnknownModule(_) => ErrorCode::Module,
            NavError::Persistence(_) => ErrorCode::Persistence,
            NavError::Io(_) => ErrorCode::Internal,
        }
    }

    pub fn is_application_closed(&self) -> bool {
        matches!(self, NavError::ApplicationClosed)
    }
}
