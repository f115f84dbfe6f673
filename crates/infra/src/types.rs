//! Wire-level value types returned by the stream-server driver.

use std::collections::HashMap;

use telstar_core::StreamId;

/// A single entry read from a stream: its server-assigned ID and its raw
/// field map (expected to carry `message_id` and `data`, §6).
#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub stream: String,
    pub id: StreamId,
    pub fields: HashMap<String, String>,
}

/// Summary form of `XPENDING` (no range).
#[derive(Debug, Clone, Default)]
pub struct PendingSummary {
    pub count: u64,
    pub min: Option<StreamId>,
    pub max: Option<StreamId>,
    pub consumers: Vec<(String, u64)>,
}

/// One row of the range form of `XPENDING`.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub id: StreamId,
    pub consumer: String,
    pub idle_ms: u64,
    pub times_delivered: u64,
}

/// One row of `XINFO GROUPS`.
#[derive(Debug, Clone)]
pub struct GroupInfo {
    pub name: String,
    pub pending: u64,
    pub consumers: u64,
    pub last_delivered_id: StreamId,
}

/// One row of `XINFO CONSUMERS`.
#[derive(Debug, Clone)]
pub struct ConsumerInfo {
    pub name: String,
    pub pending: u64,
    pub idle_ms: u64,
}
