//! Admin-view errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("stream server error: {0}")]
    Server(#[from] telstar_infra::RedisDriverError),

    /// `AdminMessage::read()` found no entry at the expected position, or
    /// the entry it found was missing `message_id`/`data` (§4.7).
    #[error("no readable entry for pending message {message_id} on stream {stream}")]
    NotFound { stream: String, message_id: String },
}
