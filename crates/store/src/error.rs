//! Error types for the store crate.

use thiserror::Error;

/// Content store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying backend I/O failure.
    #[error("store i/o: {0}")]
    Io(String),

    /// The backend returned data it should not have been able to contain.
    #[error("store corruption: {0}")]
    Corruption(String),

    /// A configured limit was exceeded (key length, value size).
    #[error("store policy violation: {0}")]
    Policy(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Corruption { .. } => StoreError::Corruption(err.to_string()),
            other => StoreError::Io(other.to_string()),
        }
    }
}
