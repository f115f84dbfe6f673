//! In-memory `StreamServer` used by the test suites of the outbox, consumer,
//! and admin crates. Mirrors the semantics of the real Redis driver closely
//! enough to exercise §8's scenarios without a live server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value as JsonValue;
use telstar_core::StreamId;
use uuid::Uuid;

use crate::error::RedisDriverError;
use crate::server::StreamServer;
use crate::types::{ConsumerInfo, GroupInfo, PendingEntry, PendingSummary, StreamRecord};

#[derive(Debug, Clone)]
struct Entry {
    id: StreamId,
    fields: HashMap<String, String>,
}

#[derive(Debug, Clone)]
struct PendingClaim {
    consumer: String,
    delivered_at_ms: u64,
    times_delivered: u64,
}

#[derive(Default)]
struct Group {
    last_delivered: StreamId,
    pending: HashMap<StreamId, PendingClaim>,
    consumers: std::collections::HashSet<String>,
}

#[derive(Default)]
struct Stream {
    entries: Vec<Entry>,
    groups: HashMap<String, Group>,
}

struct Inner {
    streams: HashMap<String, Stream>,
    kv: HashMap<String, String>,
    clock_ms: u64,
}

/// A fully in-process stand-in for a Redis Streams server.
///
/// Time does not actually pass between calls; [`FakeStreamServer::advance`]
/// lets tests simulate idle time for claim-eligibility checks deterministically.
#[derive(Clone)]
pub struct FakeStreamServer {
    inner: Arc<Mutex<Inner>>,
}

impl Default for FakeStreamServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeStreamServer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                streams: HashMap::new(),
                kv: HashMap::new(),
                clock_ms: 0,
            })),
        }
    }

    /// Advance the fake clock, making previously-delivered pending entries
    /// eligible for claiming once their idle time exceeds a threshold.
    pub fn advance(&self, by_ms: u64) {
        self.inner.lock().unwrap().clock_ms += by_ms;
    }
}

impl StreamServer for FakeStreamServer {
    fn xgroup_create(&self, stream: &str, group: &str, start_id: &str) -> Result<(), RedisDriverError> {
        let mut inner = self.inner.lock().unwrap();
        let s = inner.streams.entry(stream.to_string()).or_default();
        if s.groups.contains_key(group) {
            return Ok(());
        }
        let last_delivered = if start_id == "0" {
            StreamId::new(0, 0)
        } else if start_id == "$" {
            s.entries.last().map(|e| e.id).unwrap_or(StreamId::new(0, 0))
        } else {
            start_id.parse().unwrap_or(StreamId::new(0, 0))
        };
        s.groups.insert(
            group.to_string(),
            Group {
                last_delivered,
                pending: HashMap::new(),
                consumers: Default::default(),
            },
        );
        Ok(())
    }

    fn xadd_pipeline(
        &self,
        rows: &[(String, Uuid, JsonValue)],
        _inter_send_sleep: Duration,
    ) -> Result<Vec<StreamId>, RedisDriverError> {
        let mut inner = self.inner.lock().unwrap();
        let mut out = Vec::with_capacity(rows.len());
        for (topic, msg_uid, data) in rows {
            inner.clock_ms += 1;
            let ms = inner.clock_ms;
            let s = inner.streams.entry(topic.clone()).or_default();
            let seq = s
                .entries
                .last()
                .filter(|e| e.id.ms() == ms)
                .map(|e| e.seq_hint() + 1)
                .unwrap_or(0);
            let id = StreamId::new(ms, seq);
            let encoded = serde_json::to_string(data)
                .map_err(|e| RedisDriverError::Protocol(format!("encoding payload: {e}")))?;
            let mut fields = HashMap::new();
            fields.insert("message_id".to_string(), msg_uid.to_string());
            fields.insert("data".to_string(), encoded);
            s.entries.push(Entry { id, fields });
            out.push(id);
        }
        Ok(out)
    }

    fn xreadgroup_new(
        &self,
        streams: &[String],
        group: &str,
        consumer: &str,
        _block_ms: u64,
    ) -> Result<Vec<StreamRecord>, RedisDriverError> {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.clock_ms;
        let mut out = Vec::new();
        for name in streams {
            let Some(s) = inner.streams.get_mut(name) else {
                continue;
            };
            let Some(g) = s.groups.get_mut(group) else {
                continue;
            };
            g.consumers.insert(consumer.to_string());
            let new_entries: Vec<Entry> = s
                .entries
                .iter()
                .filter(|e| e.id > g.last_delivered)
                .cloned()
                .collect();
            for e in new_entries {
                g.last_delivered = e.id;
                g.pending.insert(
                    e.id,
                    PendingClaim {
                        consumer: consumer.to_string(),
                        delivered_at_ms: now,
                        times_delivered: 1,
                    },
                );
                out.push(StreamRecord {
                    stream: name.clone(),
                    id: e.id,
                    fields: e.fields,
                });
            }
        }
        Ok(out)
    }

    fn xreadgroup_explicit(
        &self,
        streams: &[(String, StreamId)],
        group: &str,
        consumer: &str,
    ) -> Result<Vec<StreamRecord>, RedisDriverError> {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.clock_ms;
        let mut out = Vec::new();
        for (name, after) in streams {
            let Some(s) = inner.streams.get_mut(name) else {
                continue;
            };
            let Some(g) = s.groups.get_mut(group) else {
                continue;
            };
            g.consumers.insert(consumer.to_string());
            for e in s.entries.iter().filter(|e| e.id > *after) {
                if let Some(claim) = g.pending.get(&e.id) {
                    if claim.consumer == *consumer {
                        out.push(StreamRecord {
                            stream: name.clone(),
                            id: e.id,
                            fields: e.fields.clone(),
                        });
                    }
                }
            }
            let _ = now;
        }
        Ok(out)
    }

    fn xpending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary, RedisDriverError> {
        let inner = self.inner.lock().unwrap();
        let Some(g) = inner.streams.get(stream).and_then(|s| s.groups.get(group)) else {
            return Ok(PendingSummary::default());
        };
        if g.pending.is_empty() {
            return Ok(PendingSummary::default());
        }
        let min = g.pending.keys().min().copied();
        let max = g.pending.keys().max().copied();
        let mut tally: HashMap<String, u64> = HashMap::new();
        for claim in g.pending.values() {
            *tally.entry(claim.consumer.clone()).or_insert(0) += 1;
        }
        Ok(PendingSummary {
            count: g.pending.len() as u64,
            min,
            max,
            consumers: tally.into_iter().collect(),
        })
    }

    fn xpending_range(
        &self,
        stream: &str,
        group: &str,
        start: StreamId,
        end: StreamId,
        count: u64,
        consumer: Option<&str>,
    ) -> Result<Vec<PendingEntry>, RedisDriverError> {
        let inner = self.inner.lock().unwrap();
        let Some(g) = inner.streams.get(stream).and_then(|s| s.groups.get(group)) else {
            return Ok(vec![]);
        };
        let now = inner.clock_ms;
        let mut rows: Vec<PendingEntry> = g
            .pending
            .iter()
            .filter(|(id, _)| **id >= start && **id <= end)
            .filter(|(_, c)| consumer.is_none_or(|want| c.consumer == want))
            .map(|(id, c)| PendingEntry {
                id: *id,
                consumer: c.consumer.clone(),
                idle_ms: now.saturating_sub(c.delivered_at_ms),
                times_delivered: c.times_delivered,
            })
            .collect();
        rows.sort_by_key(|e| e.id);
        rows.truncate(count as usize);
        Ok(rows)
    }

    fn xclaim_justid(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[StreamId],
    ) -> Result<Vec<StreamId>, RedisDriverError> {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.clock_ms;
        let Some(g) = inner
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        else {
            return Ok(vec![]);
        };
        g.consumers.insert(consumer.to_string());
        let mut claimed = Vec::new();
        for id in ids {
            if let Some(claim) = g.pending.get_mut(id) {
                if now.saturating_sub(claim.delivered_at_ms) >= min_idle_ms {
                    claim.consumer = consumer.to_string();
                    claim.delivered_at_ms = now;
                    claim.times_delivered += 1;
                    claimed.push(*id);
                }
            }
        }
        Ok(claimed)
    }

    fn xack(&self, stream: &str, group: &str, ids: &[StreamId]) -> Result<u64, RedisDriverError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(g) = inner
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        else {
            return Ok(0);
        };
        let mut n = 0;
        for id in ids {
            if g.pending.remove(id).is_some() {
                n += 1;
            }
        }
        Ok(n)
    }

    fn xdel(&self, stream: &str, ids: &[StreamId]) -> Result<u64, RedisDriverError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(s) = inner.streams.get_mut(stream) else {
            return Ok(0);
        };
        let before = s.entries.len();
        let id_set: std::collections::HashSet<_> = ids.iter().copied().collect();
        s.entries.retain(|e| !id_set.contains(&e.id));
        Ok((before - s.entries.len()) as u64)
    }

    fn xinfo_groups(&self, stream: &str) -> Result<Vec<GroupInfo>, RedisDriverError> {
        let inner = self.inner.lock().unwrap();
        let Some(s) = inner.streams.get(stream) else {
            return Ok(vec![]);
        };
        Ok(s.groups
            .iter()
            .map(|(name, g)| GroupInfo {
                name: name.clone(),
                pending: g.pending.len() as u64,
                consumers: g.consumers.len() as u64,
                last_delivered_id: g.last_delivered,
            })
            .collect())
    }

    fn xinfo_consumers(&self, stream: &str, group: &str) -> Result<Vec<ConsumerInfo>, RedisDriverError> {
        let inner = self.inner.lock().unwrap();
        let Some(g) = inner.streams.get(stream).and_then(|s| s.groups.get(group)) else {
            return Ok(vec![]);
        };
        let now = inner.clock_ms;
        Ok(g.consumers
            .iter()
            .map(|name| {
                let pending: Vec<_> = g.pending.values().filter(|c| &c.consumer == name).collect();
                let idle_ms = pending
                    .iter()
                    .map(|c| now.saturating_sub(c.delivered_at_ms))
                    .min()
                    .unwrap_or(0);
                ConsumerInfo {
                    name: name.clone(),
                    pending: pending.len() as u64,
                    idle_ms,
                }
            })
            .collect())
    }

    fn xlen(&self, stream: &str) -> Result<u64, RedisDriverError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.streams.get(stream).map(|s| s.entries.len()).unwrap_or(0) as u64)
    }

    fn keys(&self, pattern: &str) -> Result<Vec<String>, RedisDriverError> {
        let inner = self.inner.lock().unwrap();
        let prefix = pattern.trim_end_matches('*');
        Ok(inner
            .kv
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn get(&self, key: &str) -> Result<Option<String>, RedisDriverError> {
        Ok(self.inner.lock().unwrap().kv.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), RedisDriverError> {
        self.inner.lock().unwrap().kv.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> Result<(), RedisDriverError> {
        // The fake never expires keys; tests that care about TTL expiry
        // assert against `count_seen`/`keys` directly rather than waiting.
        self.set(key, value)
    }

    fn xgroup_destroy(&self, stream: &str, group: &str) -> Result<(), RedisDriverError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(s) = inner.streams.get_mut(stream) {
            s.groups.remove(group);
        }
        Ok(())
    }

    fn xgroup_delconsumer(&self, stream: &str, group: &str, consumer: &str) -> Result<(), RedisDriverError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(g) = inner.streams.get_mut(stream).and_then(|s| s.groups.get_mut(group)) {
            g.consumers.remove(consumer);
            g.pending.retain(|_, c| c.consumer != consumer);
        }
        Ok(())
    }

    fn ack_transaction(
        &self,
        seen_key: &str,
        checkpoint_key: &str,
        stream: &str,
        group: &str,
        id: StreamId,
        _seen_ttl_secs: u64,
    ) -> Result<bool, RedisDriverError> {
        let mut inner = self.inner.lock().unwrap();
        // A pre-existing seen key (duplicate delivery, §4.4.d) is not a lost
        // race: the entry still needs its own XACK. Only "this exact id is no
        // longer pending" means there is nothing left for this call to do —
        // the single-writer-under-lock analogue of a WATCH abort (§7 item 5).
        let still_pending = inner
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.contains_key(&id))
            .unwrap_or(false);
        if !still_pending {
            return Ok(false);
        }
        inner.kv.insert(seen_key.to_string(), "1".to_string());
        inner.kv.insert(checkpoint_key.to_string(), id.to_string());
        if let Some(g) = inner.streams.get_mut(stream).and_then(|s| s.groups.get_mut(group)) {
            g.pending.remove(&id);
        }
        Ok(true)
    }

    fn bare_ack(
        &self,
        checkpoint_key: &str,
        stream: &str,
        group: &str,
        id: StreamId,
    ) -> Result<(), RedisDriverError> {
        let mut inner = self.inner.lock().unwrap();
        inner.kv.insert(checkpoint_key.to_string(), id.to_string());
        if let Some(g) = inner.streams.get_mut(stream).and_then(|s| s.groups.get_mut(group)) {
            g.pending.remove(&id);
        }
        Ok(())
    }
}

impl Entry {
    fn seq_hint(&self) -> u64 {
        self.id.seq()
    }
}
