//! Real stream-server driver, backed by the blocking `redis` client.
//!
//! One `redis::Client`, a fresh blocking connection per call, raw
//! `redis::cmd` invocations rather than a higher-level streams wrapper
//! (the `redis` crate's typed streams API changes across versions more
//! than the raw command surface does, and §6 requires bit-exact command
//! naming anyway).

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use redis::{Commands, Connection, ErrorKind, Value};
use serde_json::Value as JsonValue;
use telstar_core::{stream_key, StreamId};
use uuid::Uuid;

use crate::error::RedisDriverError;
use crate::server::StreamServer;
use crate::types::{ConsumerInfo, GroupInfo, PendingEntry, PendingSummary, StreamRecord};

#[derive(Clone)]
pub struct RedisStreamServer {
    client: Arc<redis::Client>,
}

impl RedisStreamServer {
    pub fn connect(redis_url: &str) -> Result<Self, RedisDriverError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    fn conn(&self) -> Result<Connection, RedisDriverError> {
        Ok(self.client.get_connection()?)
    }
}

impl StreamServer for RedisStreamServer {
    fn xgroup_create(&self, stream: &str, group: &str, start_id: &str) -> Result<(), RedisDriverError> {
        let mut conn = self.conn()?;
        let key = stream_key(stream);
        let result: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&key)
            .arg(group)
            .arg(start_id)
            .arg("MKSTREAM")
            .query(&mut conn);

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().to_lowercase().contains("busygroup") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn xadd_pipeline(
        &self,
        rows: &[(String, Uuid, JsonValue)],
        inter_send_sleep: Duration,
    ) -> Result<Vec<StreamId>, RedisDriverError> {
        let mut conn = self.conn()?;

        // A pipelined flush assigns every id in one server round-trip, which
        // collapses them onto the same millisecond. Each XADD is sent on its
        // own here, with the sleep between round-trips, so the sleep can
        // actually land between two server-assigned ids (§4.3 step 3).
        let mut ids = Vec::with_capacity(rows.len());
        for (i, (topic, msg_uid, data)) in rows.iter().enumerate() {
            if i > 0 {
                thread::sleep(inter_send_sleep);
            }
            let encoded = serde_json::to_string(data)
                .map_err(|e| RedisDriverError::Protocol(format!("encoding payload: {e}")))?;
            let id: String = redis::cmd("XADD")
                .arg(stream_key(topic))
                .arg("*")
                .arg("message_id")
                .arg(msg_uid.to_string())
                .arg("data")
                .arg(encoded)
                .query(&mut conn)?;
            ids.push(
                id.parse::<StreamId>()
                    .map_err(|_| RedisDriverError::Protocol(format!("bad XADD id: {id}")))?,
            );
        }

        Ok(ids)
    }

    fn xreadgroup_new(
        &self,
        streams: &[String],
        group: &str,
        consumer: &str,
        block_ms: u64,
    ) -> Result<Vec<StreamRecord>, RedisDriverError> {
        if streams.is_empty() {
            return Ok(vec![]);
        }
        let mut conn = self.conn()?;
        let keys: Vec<String> = streams.iter().map(|s| stream_key(s)).collect();
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer);
        // `block_ms == 0` means "don't block at all" in this driver's contract
        // (used by the one-shot consumer's non-blocking passes, §4.5), not
        // "block forever" as raw `XREADGROUP BLOCK 0` would: omit the clause
        // entirely rather than issue a wire command that means the opposite.
        if block_ms > 0 {
            cmd.arg("BLOCK").arg(block_ms);
        }
        cmd.arg("STREAMS");
        for k in &keys {
            cmd.arg(k);
        }
        for _ in &keys {
            cmd.arg(">");
        }

        let result: redis::RedisResult<Value> = cmd.query(&mut conn);
        match result {
            Ok(Value::Nil) => Ok(vec![]),
            Ok(v) => parse_xread_reply(v),
            Err(e) if e.kind() == ErrorKind::ResponseError && e.to_string().contains("NOGROUP") => {
                Err(e.into())
            }
            Err(e) => {
                // A blocking timeout surfaces as a nil reply above in modern
                // redis-rs; older servers may instead error. Treat any
                // non-protocol error here as "no new entries" per §4.4.b.
                if e.is_timeout() {
                    Ok(vec![])
                } else {
                    Err(e.into())
                }
            }
        }
    }

    fn xreadgroup_explicit(
        &self,
        streams: &[(String, StreamId)],
        group: &str,
        consumer: &str,
    ) -> Result<Vec<StreamRecord>, RedisDriverError> {
        if streams.is_empty() {
            return Ok(vec![]);
        }
        let mut conn = self.conn()?;
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer);
        cmd.arg("STREAMS");
        for (s, _) in streams {
            cmd.arg(stream_key(s));
        }
        for (_, id) in streams {
            cmd.arg(id.to_string());
        }

        let result: redis::RedisResult<Value> = cmd.query(&mut conn);
        match result {
            Ok(Value::Nil) => Ok(vec![]),
            Ok(v) => parse_xread_reply(v),
            Err(e) => Err(e.into()),
        }
    }

    fn xpending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary, RedisDriverError> {
        let mut conn = self.conn()?;
        let reply: Value = redis::cmd("XPENDING")
            .arg(stream_key(stream))
            .arg(group)
            .query(&mut conn)?;

        parse_pending_summary(reply)
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
        let mut conn = self.conn()?;
        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(stream_key(stream))
            .arg(group)
            .arg(start.to_string())
            .arg(end.to_string())
            .arg(count);
        if let Some(c) = consumer {
            cmd.arg(c);
        }
        let reply: Value = cmd.query(&mut conn)?;
        parse_pending_range(reply)
    }

    fn xclaim_justid(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[StreamId],
    ) -> Result<Vec<StreamId>, RedisDriverError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let mut conn = self.conn()?;
        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(stream_key(stream))
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms);
        for id in ids {
            cmd.arg(id.to_string());
        }
        cmd.arg("JUSTID");

        let ids: Vec<String> = cmd.query(&mut conn)?;
        ids.iter()
            .map(|s| {
                s.parse::<StreamId>()
                    .map_err(|_| RedisDriverError::Protocol(format!("bad XCLAIM id: {s}")))
            })
            .collect()
    }

    fn xack(&self, stream: &str, group: &str, ids: &[StreamId]) -> Result<u64, RedisDriverError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let ids: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
        let n: u64 = conn.xack(stream_key(stream), group, &ids)?;
        Ok(n)
    }

    fn xdel(&self, stream: &str, ids: &[StreamId]) -> Result<u64, RedisDriverError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let ids: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
        let n: u64 = conn.xdel(stream_key(stream), &ids)?;
        Ok(n)
    }

    fn xinfo_groups(&self, stream: &str) -> Result<Vec<GroupInfo>, RedisDriverError> {
        let mut conn = self.conn()?;
        let reply: Vec<HashMap<String, Value>> = redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(stream_key(stream))
            .query(&mut conn)?;

        reply
            .into_iter()
            .map(|m| {
                let name = value_string(m.get("name"))?;
                let pending = value_u64(m.get("pending"))?;
                let consumers = value_u64(m.get("consumers"))?;
                let last_delivered_id = value_string(m.get("last-delivered-id"))?
                    .parse::<StreamId>()
                    .map_err(|_| RedisDriverError::Protocol("bad last-delivered-id".into()))?;
                Ok(GroupInfo {
                    name,
                    pending,
                    consumers,
                    last_delivered_id,
                })
            })
            .collect()
    }

    fn xinfo_consumers(&self, stream: &str, group: &str) -> Result<Vec<ConsumerInfo>, RedisDriverError> {
        let mut conn = self.conn()?;
        let reply: Vec<HashMap<String, Value>> = redis::cmd("XINFO")
            .arg("CONSUMERS")
            .arg(stream_key(stream))
            .arg(group)
            .query(&mut conn)?;

        reply
            .into_iter()
            .map(|m| {
                Ok(ConsumerInfo {
                    name: value_string(m.get("name"))?,
                    pending: value_u64(m.get("pending"))?,
                    idle_ms: value_u64(m.get("idle"))?,
                })
            })
            .collect()
    }

    fn xlen(&self, stream: &str) -> Result<u64, RedisDriverError> {
        let mut conn = self.conn()?;
        let n: u64 = conn.xlen(stream_key(stream))?;
        Ok(n)
    }

    fn keys(&self, pattern: &str) -> Result<Vec<String>, RedisDriverError> {
        let mut conn = self.conn()?;
        // KEYS, not SCAN: a prior incremental-scan attempt here took an
        // anomalous number of iterations to converge against this server
        // (§4.7); full enumeration is the known-good path.
        let keys: Vec<String> = conn.keys(pattern)?;
        Ok(keys)
    }

    fn get(&self, key: &str) -> Result<Option<String>, RedisDriverError> {
        let mut conn = self.conn()?;
        let v: Option<String> = conn.get(key)?;
        Ok(v)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), RedisDriverError> {
        let mut conn = self.conn()?;
        let _: () = conn.set(key, value)?;
        Ok(())
    }

    fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), RedisDriverError> {
        let mut conn = self.conn()?;
        let _: () = conn.set_ex(key, value, ttl_secs)?;
        Ok(())
    }

    fn xgroup_destroy(&self, stream: &str, group: &str) -> Result<(), RedisDriverError> {
        let mut conn = self.conn()?;
        let _: i64 = redis::cmd("XGROUP")
            .arg("DESTROY")
            .arg(stream_key(stream))
            .arg(group)
            .query(&mut conn)?;
        Ok(())
    }

    fn xgroup_delconsumer(&self, stream: &str, group: &str, consumer: &str) -> Result<(), RedisDriverError> {
        let mut conn = self.conn()?;
        let _: i64 = redis::cmd("XGROUP")
            .arg("DELCONSUMER")
            .arg(stream_key(stream))
            .arg(group)
            .arg(consumer)
            .query(&mut conn)?;
        Ok(())
    }

    fn ack_transaction(
        &self,
        seen_key: &str,
        checkpoint_key: &str,
        stream: &str,
        group: &str,
        id: StreamId,
        seen_ttl_secs: u64,
    ) -> Result<bool, RedisDriverError> {
        let mut conn = self.conn()?;
        let stream_key_full = stream_key(stream);
        let id_str = id.to_string();

        // A single WATCH/MULTI/EXEC attempt, not `redis::transaction`'s
        // retry-until-success helper: if another consumer wins the race on
        // `seen_key` we want to report that back as `false` (§7 item 5), not
        // silently retry our own write on top of theirs. A *pre-existing*
        // seen key (a duplicate delivery, §4.4.d) is not a lost race — WATCH
        // only aborts EXEC on a write that happens after it, so this entry's
        // own XACK still lands even when `seen_key` was already set before
        // this call started.
        redis::cmd("WATCH").arg(seen_key).query::<()>(&mut conn)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(seen_key)
            .arg(1)
            .arg("EX")
            .arg(seen_ttl_secs)
            .ignore()
            .cmd("SET")
            .arg(checkpoint_key)
            .arg(&id_str)
            .ignore()
            .cmd("XACK")
            .arg(&stream_key_full)
            .arg(group)
            .arg(&id_str)
            .ignore();

        let result: Option<()> = pipe.query(&mut conn)?;
        Ok(result.is_some())
    }

    fn bare_ack(
        &self,
        checkpoint_key: &str,
        stream: &str,
        group: &str,
        id: StreamId,
    ) -> Result<(), RedisDriverError> {
        let mut conn = self.conn()?;
        let id_str = id.to_string();
        let _: () = conn.set(checkpoint_key, &id_str)?;
        let _: u64 = conn.xack(stream_key(stream), group, &[id_str])?;
        Ok(())
    }

    fn xack_and_xdel(&self, stream: &str, group: &str, id: StreamId) -> Result<(), RedisDriverError> {
        let mut conn = self.conn()?;
        let key = stream_key(stream);
        let id_str = id.to_string();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("XACK")
            .arg(&key)
            .arg(group)
            .arg(&id_str)
            .ignore()
            .cmd("XDEL")
            .arg(&key)
            .arg(&id_str)
            .ignore();
        let _: () = pipe.query(&mut conn)?;
        Ok(())
    }
}

fn value_string(v: Option<&Value>) -> Result<String, RedisDriverError> {
    match v {
        Some(Value::Data(d)) => Ok(String::from_utf8_lossy(d).to_string()),
        Some(Value::Status(s)) => Ok(s.clone()),
        Some(Value::Int(n)) => Ok(n.to_string()),
        _ => Err(RedisDriverError::Protocol("expected scalar field".into())),
    }
}

fn value_u64(v: Option<&Value>) -> Result<u64, RedisDriverError> {
    match v {
        Some(Value::Int(n)) => Ok((*n).max(0) as u64),
        Some(Value::Data(d)) => String::from_utf8_lossy(d)
            .parse()
            .map_err(|_| RedisDriverError::Protocol("expected integer field".into())),
        _ => Err(RedisDriverError::Protocol("expected integer field".into())),
    }
}

/// Flatten the `XREADGROUP` reply (`[[stream, [[id, [f,v,...]], ...]], ...]`)
/// into a flat list of records. Entries whose ID fails to parse or whose
/// fields are malformed at the wire level are still surfaced (callers
/// detect missing `message_id`/`data` as a message-format error, §7).
fn parse_xread_reply(value: Value) -> Result<Vec<StreamRecord>, RedisDriverError> {
    let top = match value {
        Value::Bulk(v) => v,
        Value::Nil => return Ok(vec![]),
        _ => return Err(RedisDriverError::Protocol("unexpected XREADGROUP shape".into())),
    };

    let mut out = Vec::new();
    for stream_entry in top {
        let pair = match stream_entry {
            Value::Bulk(v) => v,
            _ => continue,
        };
        if pair.len() != 2 {
            continue;
        }
        let stream_name = match &pair[0] {
            Value::Data(d) => String::from_utf8_lossy(d).to_string(),
            _ => continue,
        };
        let logical = telstar_core::strip_stream_prefix(&stream_name).to_string();

        let entries = match &pair[1] {
            Value::Bulk(v) => v,
            _ => continue,
        };

        for entry in entries {
            let entry_vec = match entry {
                Value::Bulk(v) => v,
                _ => continue,
            };
            if entry_vec.len() != 2 {
                continue;
            }
            let id_str = match &entry_vec[0] {
                Value::Data(d) => String::from_utf8_lossy(d).to_string(),
                _ => continue,
            };
            let Ok(id) = id_str.parse::<StreamId>() else {
                continue;
            };

            let fields_vec = match &entry_vec[1] {
                Value::Bulk(v) => v.clone(),
                _ => vec![],
            };

            let mut fields = HashMap::new();
            for chunk in fields_vec.chunks(2) {
                if let [Value::Data(k), Value::Data(v)] = chunk {
                    fields.insert(
                        String::from_utf8_lossy(k).to_string(),
                        String::from_utf8_lossy(v).to_string(),
                    );
                }
            }

            out.push(StreamRecord {
                stream: logical.clone(),
                id,
                fields,
            });
        }
    }

    Ok(out)
}

fn parse_pending_summary(value: Value) -> Result<PendingSummary, RedisDriverError> {
    let top = match value {
        Value::Bulk(v) => v,
        _ => return Err(RedisDriverError::Protocol("unexpected XPENDING summary shape".into())),
    };
    if top.len() != 4 {
        return Err(RedisDriverError::Protocol("unexpected XPENDING summary arity".into()));
    }

    let count = value_u64(Some(&top[0]))?;
    if count == 0 {
        return Ok(PendingSummary::default());
    }

    let min = opt_id(&top[1])?;
    let max = opt_id(&top[2])?;

    let mut consumers = Vec::new();
    if let Value::Bulk(rows) = &top[3] {
        for row in rows {
            if let Value::Bulk(pair) = row {
                if pair.len() == 2 {
                    let name = value_string(Some(&pair[0]))?;
                    let cnt = value_string(Some(&pair[1]))?
                        .parse::<u64>()
                        .unwrap_or(0);
                    consumers.push((name, cnt));
                }
            }
        }
    }

    Ok(PendingSummary {
        count,
        min,
        max,
        consumers,
    })
}

fn opt_id(value: &Value) -> Result<Option<StreamId>, RedisDriverError> {
    match value {
        Value::Nil => Ok(None),
        Value::Data(d) => Ok(Some(
            String::from_utf8_lossy(d)
                .parse()
                .map_err(|_| RedisDriverError::Protocol("bad pending id".into()))?,
        )),
        _ => Ok(None),
    }
}

fn parse_pending_range(value: Value) -> Result<Vec<PendingEntry>, RedisDriverError> {
    let rows = match value {
        Value::Bulk(v) => v,
        _ => return Err(RedisDriverError::Protocol("unexpected XPENDING range shape".into())),
    };

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let row = match row {
            Value::Bulk(v) => v,
            _ => continue,
        };
        if row.len() != 4 {
            continue;
        }
        let id = value_string(Some(&row[0]))?
            .parse::<StreamId>()
            .map_err(|_| RedisDriverError::Protocol("bad pending entry id".into()))?;
        let consumer = value_string(Some(&row[1]))?;
        let idle_ms = value_u64(Some(&row[2]))?;
        let times_delivered = value_u64(Some(&row[3]))?;
        out.push(PendingEntry {
            id,
            consumer,
            idle_ms,
            times_delivered,
        });
    }
    Ok(out)
}
