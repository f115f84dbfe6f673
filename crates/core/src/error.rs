//! Workspace-wide error umbrella.
//!
//! Component crates (`telstar-infra`, `telstar-outbox`, `telstar-consumer`)
//! define their own focused error enums; this type exists for callers that
//! want to handle "anything telstar can fail with" as one type, the same
//! role `DomainError` plays in a layered event-sourcing stack.

use thiserror::Error;

/// Top-level error a `telstar` caller can match on.
#[derive(Debug, Error)]
pub enum TelstarError {
    /// A stream ID string was malformed (missing `-`, or a non-numeric part).
    #[error("malformed stream id: {0}")]
    MalformedStreamId(String),

    /// A wire record was missing `message_id` or `data` (§7 item 2).
    #[error("message-format error on stream {stream}, server id {server_id}")]
    MessageFormat { stream: String, server_id: String },

    /// Payload failed JSON-scalar or encoding constraints (§4.2).
    #[error("payload encoding error: {0}")]
    Encoding(String),

    /// Any other infrastructure failure (Redis, Postgres) wrapped with context.
    #[error("{context}: {source}")]
    Infra {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

impl TelstarError {
    pub fn infra(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Infra {
            context: context.into(),
            source: source.into(),
        }
    }
}
