//! Crate-wide error type.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the core services.
///
/// Lock and remote-fetch failures are deliberately absent: the engines absorb
/// those into cycle results instead of propagating them.
#[derive(Debug, Error)]
pub enum Error {
    /// OAuth flow failure (invalid state, rejected exchange, dead refresh token)
    #[error(transparent)]
    Auth(#[from] crate::auth::AuthError),

    /// Persistence failure reported by the storage layer
    #[error("storage error: {0}")]
    Storage(String),

    /// Bad or missing configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// A sync trigger or stats query named an engine that is not registered
    #[error("unknown sync engine '{0}'")]
    UnknownEngine(String),

    /// A token operation named a provider that is not registered
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
}

impl Error {
    /// Create a storage error from any displayable source.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
