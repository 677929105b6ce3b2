//! Error types for the sync engine.

use thiserror::Error;

use crate::db::DbError;

/// Errors raised while talking to the server or persisting what it sent.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transport-level failure (DNS, TLS, connection reset, timeout).
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// A download channel was closed with a failure by its producer.
    #[error("Download channel failed: {0}")]
    ChannelFailed(String),

    /// The server response did not have the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A background task panicked or was cancelled.
    #[error("Task error: {0}")]
    Task(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("A user is already logged in")]
    AlreadyLoggedIn,

    #[error("No user is logged in")]
    NotLoggedIn,
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Short name of the failure kind, shown to users next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Http(e) if e.is_timeout() => "TimeoutException",
            SyncError::Http(e) if e.is_connect() => "ConnectException",
            SyncError::Http(_) => "HttpException",
            SyncError::Io(_) => "IOException",
            SyncError::Json(_) => "JsonParseException",
            SyncError::Database(_) => "DatabaseException",
            SyncError::ChannelFailed(_) => "SyncException",
            SyncError::Protocol(_) => "ProtocolException",
            SyncError::Task(_) => "TaskException",
            SyncError::Config(_) => "ConfigException",
            SyncError::AlreadyLoggedIn | SyncError::NotLoggedIn => "LoginException",
        }
    }

    /// Returns true for failures that happened before any response arrived.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Http(_) | SyncError::Io(_))
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Task(e.to_string())
    }
}
