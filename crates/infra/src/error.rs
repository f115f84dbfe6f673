//! Stream-server driver errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedisDriverError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command error: {0}")]
    Command(String),

    #[error("malformed server reply: {0}")]
    Protocol(String),
}

impl From<redis::RedisError> for RedisDriverError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() {
            RedisDriverError::Connection(err.to_string())
        } else {
            RedisDriverError::Command(err.to_string())
        }
    }
}
