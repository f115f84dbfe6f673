//! The staged outbox (C3) and producer loop (C4).
//!
//! Application code stages messages in the same local transaction that
//! produces them (`OutboxRepository::create`); the producer loop later
//! delivers staged rows to the stream server with at-least-once semantics
//! (`ProducerLoop`). See spec §4.2-§4.3.

mod encoding;
mod error;
mod postgres_repository;
mod producer;
mod repository;

pub use encoding::{encode_payload, StagedValue};
pub use error::OutboxError;
pub use postgres_repository::PostgresOutboxRepository;
pub use producer::{ProducerConfig, ProducerHandle, ProducerLoop};
pub use repository::{InMemoryOutboxRepository, OutboxRepository, OutboxRow, OutboxTransaction};
