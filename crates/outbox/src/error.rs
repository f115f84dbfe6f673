//! Outbox repository / producer errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("payload encoding error: {0}")]
    Encoding(String),

    #[error("row not found: {0}")]
    NotFound(i64),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for OutboxError {
    fn from(err: sqlx::Error) -> Self {
        OutboxError::Storage(err.to_string())
    }
}
