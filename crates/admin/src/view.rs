//! Read-only enumeration of streams, groups, consumers, and pending
//! entries (C8, §4.7), plus the handful of destructive admin operations
//! exposed alongside the read path (group/consumer deletion, re-reading
//! and removing a single pending entry).
//!
//! A thin typed wrapper over the same driver the rest of the workspace
//! uses, rather than a second connection or a separate admin protocol.

use telstar_core::{Message, StreamId};
use telstar_infra::{require_fields, GroupInfo, StreamServer};
use uuid::Uuid;

use crate::error::AdminError;

/// Entry point for the admin read path. Cheap to construct and clone: it
/// only holds the stream-server handle.
#[derive(Clone)]
pub struct AdminView<S> {
    server: S,
}

impl<S: StreamServer + Clone> AdminView<S> {
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// `get_streams(match)` of §4.7: enumerate keys matching
    /// `telstar:stream:<match>*` via `KEYS`, not `SCAN` (incremental scans
    /// have been observed taking an anomalous number of iterations to
    /// converge against this key space).
    pub fn get_streams(&self, pattern: &str) -> Result<Vec<AdminStream<S>>, AdminError> {
        let keys = self
            .server
            .keys(&format!("telstar:stream:{pattern}*"))?;

        Ok(keys
            .into_iter()
            .map(|k| AdminStream {
                server: self.server.clone(),
                name: telstar_core::strip_stream_prefix(&k).to_string(),
            })
            .collect())
    }

    /// Look up one stream by its logical name without enumerating all of
    /// them, for callers that already know which stream they want.
    pub fn stream(&self, logical_stream: impl Into<String>) -> AdminStream<S> {
        AdminStream {
            server: self.server.clone(),
            name: logical_stream.into(),
        }
    }
}

/// One logical stream, as seen by the admin view.
pub struct AdminStream<S> {
    server: S,
    name: String,
}

impl<S: StreamServer + Clone> AdminStream<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `XLEN` — total entries ever appended (including acked/deleted ones
    /// only insofar as the server still carries them).
    pub fn len(&self) -> Result<u64, AdminError> {
        Ok(self.server.xlen(&self.name)?)
    }

    pub fn is_empty(&self) -> Result<bool, AdminError> {
        Ok(self.len()? == 0)
    }

    /// `Stream.get_groups()` of §4.7: `XINFO GROUPS`.
    pub fn get_groups(&self) -> Result<Vec<AdminGroup<S>>, AdminError> {
        let infos = self.server.xinfo_groups(&self.name)?;
        Ok(infos
            .into_iter()
            .map(|info| AdminGroup {
                server: self.server.clone(),
                stream: self.name.clone(),
                info,
            })
            .collect())
    }

    /// Look up one group by name without enumerating all of them.
    pub fn group(&self, name: impl Into<String>) -> Result<Option<AdminGroup<S>>, AdminError> {
        let name = name.into();
        Ok(self
            .get_groups()?
            .into_iter()
            .find(|g| g.info.name == name))
    }
}

/// One consumer group on one stream, as seen by the admin view. Carries
/// the `XINFO GROUPS` snapshot it was built from (`pending`, `min`, `max`,
/// `consumers` per §4.7) alongside the handle needed for further queries.
pub struct AdminGroup<S> {
    server: S,
    stream: String,
    info: GroupInfo,
}

impl<S: StreamServer + Clone> AdminGroup<S> {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn pending_count(&self) -> u64 {
        self.info.pending
    }

    pub fn consumer_count(&self) -> u64 {
        self.info.consumers
    }

    pub fn last_delivered_id(&self) -> StreamId {
        self.info.last_delivered_id
    }

    /// `Group.get_pending_messages()` of §4.7: empty if `pending == 0`;
    /// otherwise a range-scan of the full pending list, each wrapped with
    /// `{message_id, consumer, time_since_delivered_ms, times_delivered}`.
    pub fn get_pending_messages(&self) -> Result<Vec<AdminPendingMessage<S>>, AdminError> {
        if self.info.pending == 0 {
            return Ok(vec![]);
        }

        let rows = self.server.xpending_range(
            &self.stream,
            &self.info.name,
            StreamId::MIN,
            StreamId::MAX,
            self.info.pending,
            None,
        )?;

        Ok(rows
            .into_iter()
            .map(|row| AdminPendingMessage {
                server: self.server.clone(),
                stream: self.stream.clone(),
                group: self.info.name.clone(),
                message_id: row.id,
                consumer: row.consumer,
                time_since_delivered_ms: row.idle_ms,
                times_delivered: row.times_delivered,
            })
            .collect())
    }

    /// `Group.get_consumers()` of §4.7: `{name, pending_count, idle_ms}`.
    pub fn get_consumers(&self) -> Result<Vec<AdminConsumer<S>>, AdminError> {
        let infos = self.server.xinfo_consumers(&self.stream, &self.info.name)?;
        Ok(infos
            .into_iter()
            .map(|c| AdminConsumer {
                server: self.server.clone(),
                stream: self.stream.clone(),
                group: self.info.name.clone(),
                name: c.name,
                pending_count: c.pending,
                idle_ms: c.idle_ms,
            })
            .collect())
    }

    /// `Group.get_seen_messages()` of §4.7: count of
    /// `telstar:seen:<stream>:<group>:*`.
    pub fn get_seen_messages(&self) -> Result<u64, AdminError> {
        Ok(self.server.count_seen(&self.stream, &self.info.name)?)
    }

    /// `Group.delete()` of §4.7: remove the group server-side.
    pub fn delete(&self) -> Result<(), AdminError> {
        self.server.xgroup_destroy(&self.stream, &self.info.name)?;
        Ok(())
    }
}

/// One consumer within a group, as seen by the admin view.
pub struct AdminConsumer<S> {
    server: S,
    stream: String,
    group: String,
    name: String,
    pending_count: u64,
    idle_ms: u64,
}

impl<S: StreamServer> AdminConsumer<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pending_count(&self) -> u64 {
        self.pending_count
    }

    pub fn idle_ms(&self) -> u64 {
        self.idle_ms
    }

    /// `Consumer.delete()` of §4.7: remove the consumer from its group.
    /// Its pending entries become re-claimable by the rest of the group.
    pub fn delete(&self) -> Result<(), AdminError> {
        self.server
            .xgroup_delconsumer(&self.stream, &self.group, &self.name)?;
        Ok(())
    }
}

/// A pending entry as seen through the admin view: who holds it and how
/// long it has sat undelivered (§4.7).
pub struct AdminPendingMessage<S> {
    server: S,
    stream: String,
    group: String,
    message_id: StreamId,
    consumer: String,
    time_since_delivered_ms: u64,
    times_delivered: u64,
}

impl<S: StreamServer> AdminPendingMessage<S> {
    pub fn message_id(&self) -> StreamId {
        self.message_id
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn time_since_delivered_ms(&self) -> u64 {
        self.time_since_delivered_ms
    }

    pub fn times_delivered(&self) -> u64 {
        self.times_delivered
    }

    /// `AdminMessage.read()` of §4.7: re-read the entry at
    /// `decrement(message_id)` (an exclusive lower bound) for one record,
    /// reconstructing it as a [`Message`].
    pub fn read(&self) -> Result<Message, AdminError> {
        let starts = [(self.stream.clone(), self.message_id.decrement())];
        // `XREADGROUP` at an explicit (non-`>`) ID only returns entries from
        // the *calling consumer's own* pending list, not the whole group's —
        // so this must impersonate the entry's current owner (already a full
        // wire consumer name, e.g. `cg:G:N`), not some unrelated reader name.
        let records = self
            .server
            .xreadgroup_explicit(&starts, &self.group, &self.consumer)?;

        let record = records
            .into_iter()
            .find(|r| r.id == self.message_id)
            .ok_or_else(|| AdminError::NotFound {
                stream: self.stream.clone(),
                message_id: self.message_id.to_string(),
            })?;

        let (message_id, data) = require_fields(&record.fields).ok_or_else(|| AdminError::NotFound {
            stream: self.stream.clone(),
            message_id: self.message_id.to_string(),
        })?;
        let msg_uid: Uuid = message_id.parse().map_err(|_| AdminError::NotFound {
            stream: self.stream.clone(),
            message_id: self.message_id.to_string(),
        })?;
        let data_value: serde_json::Value =
            serde_json::from_str(data).map_err(|_| AdminError::NotFound {
                stream: self.stream.clone(),
                message_id: self.message_id.to_string(),
            })?;
        let data_map = data_value
            .as_object()
            .cloned()
            .ok_or_else(|| AdminError::NotFound {
                stream: self.stream.clone(),
                message_id: self.message_id.to_string(),
            })?;

        Ok(Message::new(record.stream, msg_uid, data_map))
    }

    /// `AdminMessage.remove()` of §4.7: `XACK` then `XDEL` in a single
    /// server pipeline.
    pub fn remove(&self) -> Result<(), AdminError> {
        self.server
            .xack_and_xdel(&self.stream, &self.group, self.message_id)?;
        Ok(())
    }
}
