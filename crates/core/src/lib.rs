//! Shared domain types: stream IDs, the message value, and the error model.
//!
//! Nothing in this crate talks to a network or a database. `telstar-infra`,
//! `telstar-outbox` and `telstar-consumer` build on these types.

mod error;
mod message;
mod stream_id;

pub use error::TelstarError;
pub use message::Message;
pub use stream_id::StreamId;

/// Prefix every logical stream name carries on the wire.
pub const STREAM_KEY_PREFIX: &str = "telstar:stream:";

/// Build the server-side stream key for a logical stream name.
pub fn stream_key(logical_stream: &str) -> String {
    format!("{STREAM_KEY_PREFIX}{logical_stream}")
}

/// Strip the `telstar:stream:` prefix from a wire stream key, if present.
///
/// Any caller constructing a `Message` from server data must route the key
/// through this so the logical name never leaks the wire prefix (§3).
pub fn strip_stream_prefix(wire_name: &str) -> &str {
    wire_name
        .strip_prefix(STREAM_KEY_PREFIX)
        .unwrap_or(wire_name)
}

/// Seen (dedup) key for a message in a group.
pub fn seen_key(logical_stream: &str, group: &str, msg_uid: uuid::Uuid) -> String {
    format!("telstar:seen:{logical_stream}:{group}:{msg_uid}")
}

/// Checkpoint key for a consumer in a group on a stream.
pub fn checkpoint_key(logical_stream: &str, group: &str, consumer_name: &str) -> String {
    format!(
        "telstar:checkpoint:{}:cg:{group}:{consumer_name}",
        stream_key(logical_stream)
    )
}

/// One-shot applied marker key for a group.
pub fn once_key(group: &str) -> String {
    format!("telstar:once:{group}")
}

/// The wire name of a consumer inside a group, `cg:<group>:<name>`.
pub fn consumer_wire_name(group: &str, consumer_name: &str) -> String {
    format!("cg:{group}:{consumer_name}")
}

/// TTL applied to seen keys on successful ack: 14 days.
pub const SEEN_KEY_TTL_SECONDS: u64 = 14 * 24 * 3600;
