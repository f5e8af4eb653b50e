//! Error types for routing and conversation handling.

use std::fmt;

use parley_core::error::ParleyError;

/// Errors from the chat engine.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("classification failed: {0}")]
    Classification(String),
    #[error("handler failed: {0}")]
    Handler(String),
    #[error("history store error: {0}")]
    HistoryStore(String),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse category of a [`ChatError`], used for logging and HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    Classification,
    Handler,
    HistoryStore,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Classification => "classification",
            ErrorKind::Handler => "handler",
            ErrorKind::HistoryStore => "history_store",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::EmptyMessage | ChatError::MessageTooLong(_) => ErrorKind::InvalidInput,
            ChatError::Classification(_) => ErrorKind::Classification,
            ChatError::Handler(_) => ErrorKind::Handler,
            ChatError::HistoryStore(_) => ErrorKind::HistoryStore,
            ChatError::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<ParleyError> for ChatError {
    fn from(err: ParleyError) -> Self {
        match err {
            ParleyError::Config(msg) => ChatError::Config(msg),
            ParleyError::Embedding(msg) => ChatError::Classification(msg),
            ParleyError::Storage(msg) => ChatError::HistoryStore(msg),
            other => ChatError::Handler(other.to_string()),
        }
    }
}
