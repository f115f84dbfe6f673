//! The stream-server abstraction used by C3–C8.
//!
//! A small trait with no storage assumptions: a real implementation backed
//! by a driver (here, Redis Streams), and an in-memory fake the other
//! crates' test suites run against without a live server.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value as JsonValue;
use telstar_core::StreamId;
use uuid::Uuid;

use crate::error::RedisDriverError;
use crate::types::{ConsumerInfo, GroupInfo, PendingEntry, PendingSummary, StreamRecord};

/// The blocking, thread-safe contract every component in this workspace
/// uses to talk to the stream server. Bit-exact command naming matters
/// (§6); implementations should not paper over the wire contract.
pub trait StreamServer: Send + Sync {
    /// `XGROUP CREATE <stream> <group> <start_id> MKSTREAM`. "Group already
    /// exists" is swallowed and treated as success (§4.4.a, §7 item 1).
    fn xgroup_create(&self, stream: &str, group: &str, start_id: &str) -> Result<(), RedisDriverError>;

    /// Append `(msg_uid, data)` pairs to their respective streams as one
    /// pipeline, sleeping `inter_send_sleep` between queuing each command
    /// before the final flush (§4.3 step 3–4). Returns the server-assigned
    /// ID for each row, in the order given.
    fn xadd_pipeline(
        &self,
        rows: &[(String, Uuid, JsonValue)],
        inter_send_sleep: Duration,
    ) -> Result<Vec<StreamId>, RedisDriverError>;

    /// `XREADGROUP GROUP <group> <consumer> BLOCK <block_ms> STREAMS ... >`
    /// across all given logical streams. An empty result on block expiry is
    /// `Ok(vec![])`, not an error.
    fn xreadgroup_new(
        &self,
        streams: &[String],
        group: &str,
        consumer: &str,
        block_ms: u64,
    ) -> Result<Vec<StreamRecord>, RedisDriverError>;

    /// Non-blocking group-read at explicit start IDs (history replay, §4.4.c
    /// step 5, and the one-shot consumer's "0" pass, §4.5).
    fn xreadgroup_explicit(
        &self,
        streams: &[(String, StreamId)],
        group: &str,
        consumer: &str,
    ) -> Result<Vec<StreamRecord>, RedisDriverError>;

    /// `XPENDING <stream> <group>` summary form.
    fn xpending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary, RedisDriverError>;

    /// `XPENDING <stream> <group> <start> <end> <count> [consumer]` range form.
    fn xpending_range(
        &self,
        stream: &str,
        group: &str,
        start: StreamId,
        end: StreamId,
        count: u64,
        consumer: Option<&str>,
    ) -> Result<Vec<PendingEntry>, RedisDriverError>;

    /// `XCLAIM ... <min-idle-time> <ids...> JUSTID`.
    fn xclaim_justid(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[StreamId],
    ) -> Result<Vec<StreamId>, RedisDriverError>;

    /// `XACK <stream> <group> <ids...>`.
    fn xack(&self, stream: &str, group: &str, ids: &[StreamId]) -> Result<u64, RedisDriverError>;

    /// `XDEL <stream> <ids...>`.
    fn xdel(&self, stream: &str, ids: &[StreamId]) -> Result<u64, RedisDriverError>;

    /// `XINFO GROUPS <stream>`.
    fn xinfo_groups(&self, stream: &str) -> Result<Vec<GroupInfo>, RedisDriverError>;

    /// `XINFO CONSUMERS <stream> <group>`.
    fn xinfo_consumers(&self, stream: &str, group: &str) -> Result<Vec<ConsumerInfo>, RedisDriverError>;

    /// `XLEN <stream>`.
    fn xlen(&self, stream: &str) -> Result<u64, RedisDriverError>;

    /// `KEYS <pattern>`. Intentionally not `SCAN` — see §4.7.
    fn keys(&self, pattern: &str) -> Result<Vec<String>, RedisDriverError>;

    /// Count of keys matching `telstar:seen:<stream>:<group>:*`.
    fn count_seen(&self, stream: &str, group: &str) -> Result<u64, RedisDriverError> {
        Ok(self
            .keys(&format!("telstar:seen:{stream}:{group}:*"))?
            .len() as u64)
    }

    /// Plain `GET`.
    fn get(&self, key: &str) -> Result<Option<String>, RedisDriverError>;

    /// Plain `SET key value`.
    fn set(&self, key: &str, value: &str) -> Result<(), RedisDriverError>;

    /// `SET key value EX ttl_secs`.
    fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), RedisDriverError>;

    /// Delete a consumer group (admin).
    fn xgroup_destroy(&self, stream: &str, group: &str) -> Result<(), RedisDriverError>;

    /// Delete a consumer from a group (admin).
    fn xgroup_delconsumer(&self, stream: &str, group: &str, consumer: &str) -> Result<(), RedisDriverError>;

    /// The ack transaction of §4.4.f:
    /// `WATCH seen_key; MULTI; SET seen_key 1 EX ttl; SET checkpoint_key id;
    /// XACK stream group id; EXEC`.
    ///
    /// Returns `true` if the transaction committed, `false` if another
    /// consumer raced and set `seen_key` first (optimistic abort, §7 item 5).
    #[allow(clippy::too_many_arguments)]
    fn ack_transaction(
        &self,
        seen_key: &str,
        checkpoint_key: &str,
        stream: &str,
        group: &str,
        id: StreamId,
        seen_ttl_secs: u64,
    ) -> Result<bool, RedisDriverError>;

    /// The bare-ack of §4.4.g: `SET checkpoint_key id; XACK stream group id`.
    /// No watch, no seen key.
    fn bare_ack(
        &self,
        checkpoint_key: &str,
        stream: &str,
        group: &str,
        id: StreamId,
    ) -> Result<(), RedisDriverError>;

    /// `AdminMessage.remove()` of §4.7: `XACK` then `XDEL` in a single
    /// server pipeline. The default sequential implementation is enough
    /// for the in-memory fake; a driver talking to a real server should
    /// override it with an actual pipeline.
    fn xack_and_xdel(&self, stream: &str, group: &str, id: StreamId) -> Result<(), RedisDriverError> {
        self.xack(stream, group, &[id])?;
        self.xdel(stream, &[id])?;
        Ok(())
    }
}

/// Parse a checkpoint value previously stored with [`StreamServer::get`].
pub fn parse_checkpoint(raw: Option<String>) -> StreamId {
    raw.and_then(|s| s.parse().ok())
        .unwrap_or(StreamId::new(0, 0))
}

/// Helper used by both the real and fake driver to turn wire fields into a
/// `(message_id, data)` pair, or a message-format error when either field is
/// absent (§7 item 2). Returned as raw strings; callers parse further.
pub fn require_fields<'a>(
    fields: &'a HashMap<String, String>,
) -> Option<(&'a str, &'a str)> {
    let message_id = fields.get("message_id")?;
    let data = fields.get("data")?;
    Some((message_id.as_str(), data.as_str()))
}
