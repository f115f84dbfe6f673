//! The stream-server driver: wire commands (§6), key-space helpers, and the
//! configuration layer every other crate in the workspace builds on.

mod config;
mod error;
mod fake;
mod redis_impl;
mod server;
mod types;

pub use config::TelstarConfig;
pub use error::RedisDriverError;
pub use fake::FakeStreamServer;
pub use redis_impl::RedisStreamServer;
pub use server::{parse_checkpoint, require_fields, StreamServer};
pub use types::{ConsumerInfo, GroupInfo, PendingEntry, PendingSummary, StreamRecord};
