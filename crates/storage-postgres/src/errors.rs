//! Storage-layer error type.

use thiserror::Error;

/// Errors raised inside the Postgres layer.
///
/// Repositories convert these into [`fleetmon_core::Error::Storage`] at the
/// trait boundary, so the engines only ever see a displayable message.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Query or connection failure from the driver
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value does not fit the domain model
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

impl StorageError {
    /// Create an invalid-value error from any displayable source.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue(message.into())
    }
}

impl From<StorageError> for fleetmon_core::Error {
    fn from(err: StorageError) -> Self {
        fleetmon_core::Error::Storage(err.to_string())
    }
}
