//! The consumer error taxonomy (§7), expressed as a discriminated union
//! instead of an exception class hierarchy (REDESIGN FLAGS).

use thiserror::Error;

/// The error a user callback can fail with. Closed to two kinds so error
/// handlers register against an explicit variant rather than walking a
/// class hierarchy (§4.4.g, §9 REDESIGN FLAGS).
#[derive(Debug, Error)]
pub enum CallbackError {
    /// A payload-schema validation failure (C9's `strict`/`ack_invalid`
    /// matrix feeds this variant).
    #[error("validation error: {0}")]
    Validation(String),

    /// Any other application-level failure.
    #[error("application error: {0}")]
    Application(#[from] anyhow::Error),
}

/// The discriminant error handlers are registered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackErrorKind {
    Validation,
    Application,
}

impl CallbackError {
    pub fn kind(&self) -> CallbackErrorKind {
        match self {
            CallbackError::Validation(_) => CallbackErrorKind::Validation,
            CallbackError::Application(_) => CallbackErrorKind::Application,
        }
    }
}

/// Top-level error from a consumer's dispatch loop (§7 items 2 and 4).
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// A wire record was missing `message_id` or `data` (§7 item 2).
    #[error("message-format error on stream {stream}, server id {server_id}")]
    MessageFormat { stream: String, server_id: String },

    /// A user callback raised and no registered handler matched its kind
    /// (§4.4.d, §4.4.g): propagates out of the dispatch loop.
    #[error("unhandled callback error: {0}")]
    Callback(#[from] CallbackError),

    /// The stream-server driver failed.
    #[error("stream server error: {0}")]
    Server(#[from] telstar_infra::RedisDriverError),

    /// Construction failed: the builder was given no streams, or group
    /// creation failed for a reason other than "already exists".
    #[error("consumer configuration error: {0}")]
    Configuration(String),
}
