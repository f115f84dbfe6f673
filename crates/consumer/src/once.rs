//! The one-shot group consumer (C6): drains every historical entry of a
//! group exactly once, across restarts, and records an applied marker
//! when done (§4.5).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use telstar_core::{consumer_wire_name, once_key};
use telstar_infra::StreamServer;

use crate::callback::Callback;
use crate::error::{CallbackErrorKind, ConsumeError};
use crate::multi_stream::{MultiStreamConsumer, MultiStreamConsumerBuilder};

/// Fixed consumer name the one-shot runtime always uses (§4.5).
pub const ONCE_CONSUMER_NAME: &str = "once-consumer";

/// Wraps a [`MultiStreamConsumer`] pinned to [`ONCE_CONSUMER_NAME`] and
/// drives it through the once-only algorithm of §4.5.
pub struct OnceConsumer<S> {
    inner: MultiStreamConsumer<S>,
    group_name: String,
}

impl<S: StreamServer + Clone> OnceConsumer<S> {
    pub fn new(
        server: S,
        streams: HashMap<String, Callback>,
        handlers: HashMap<CallbackErrorKind, crate::callback::ErrorHandler>,
        group_name: impl Into<String>,
    ) -> Result<Self, ConsumeError> {
        let group_name = group_name.into();
        let mut builder = MultiStreamConsumerBuilder::new(server);
        for (stream, callback) in streams {
            builder = builder.on_stream(stream, callback);
        }
        for (kind, handler) in handlers {
            builder = builder.on_error(kind, handler);
        }
        let inner = builder.build(group_name.clone(), ONCE_CONSUMER_NAME)?;
        Ok(Self { inner, group_name })
    }
}

impl<S: StreamServer> OnceConsumer<S> {
    /// §4.5 algorithm. Returns the number of records dispatched on this
    /// call; `0` both when the marker was already set and when the group
    /// genuinely had nothing new.
    pub fn run(&self) -> Result<usize, ConsumeError> {
        let marker = once_key(&self.group_name);
        if self.server().get(&marker)?.is_some() {
            return Ok(0);
        }

        let streams: Vec<String> = self.inner_streams();
        let total_pending = self.total_pending(&streams)?;

        let wire_consumer = consumer_wire_name(&self.group_name, ONCE_CONSUMER_NAME);

        let dispatched = if total_pending == 0 {
            // First pass: deliver every entry not yet assigned to the group.
            let records =
                self.server()
                    .xreadgroup_new(&streams, &self.group_name, &wire_consumer, 0)?;
            self.dispatch(records)?
        } else {
            // Second (or later) attempt: replay what is already pending to
            // this group instead of asking for new entries.
            let starts: Vec<(String, telstar_core::StreamId)> = streams
                .iter()
                .map(|s| (s.clone(), telstar_core::StreamId::MIN))
                .collect();
            let records =
                self.server()
                    .xreadgroup_explicit(&starts, &self.group_name, &wire_consumer)?;
            self.dispatch(records)?
        };

        if self.total_pending(&streams)? == 0 {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            self.server().set(&marker, &now.to_string())?;
        }

        Ok(dispatched)
    }

    fn server(&self) -> &S {
        self.inner.server_ref()
    }

    fn inner_streams(&self) -> Vec<String> {
        self.inner.stream_names()
    }

    fn total_pending(&self, streams: &[String]) -> Result<u64, ConsumeError> {
        let mut total = 0;
        for stream in streams {
            total += self
                .server()
                .xpending_summary(stream, &self.group_name)?
                .count;
        }
        Ok(total)
    }

    fn dispatch(&self, records: Vec<telstar_infra::StreamRecord>) -> Result<usize, ConsumeError> {
        self.inner.dispatch_batch_pub(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use telstar_infra::FakeStreamServer;
    use uuid::Uuid;

    #[test]
    fn drains_all_streams_then_sets_the_marker() {
        let server = FakeStreamServer::new();
        server
            .xadd_pipeline(
                &[
                    ("a".to_string(), Uuid::new_v4(), serde_json::json!({"i": 1})),
                    ("b".to_string(), Uuid::new_v4(), serde_json::json!({"i": 2})),
                ],
                Duration::ZERO,
            )
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let mut streams = HashMap::new();
        streams.insert(
            "a".to_string(),
            Callback::on_message({
                let calls = calls_clone.clone();
                move |_c, _m, ack| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    ack.done().unwrap();
                    Ok(())
                }
            }),
        );
        streams.insert(
            "b".to_string(),
            Callback::on_message(move |_c, _m, ack| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                ack.done().unwrap();
                Ok(())
            }),
        );

        let once = OnceConsumer::new(server.clone(), streams, HashMap::new(), "import").unwrap();
        let n = once.run().unwrap();
        assert_eq!(n, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // A second run is a no-op: the marker is set.
        let n2 = once.run().unwrap();
        assert_eq!(n2, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn callback_declining_to_ack_postpones_completion() {
        let server = FakeStreamServer::new();
        server
            .xadd_pipeline(
                &[("a".to_string(), Uuid::new_v4(), serde_json::json!({}))],
                Duration::ZERO,
            )
            .unwrap();

        let mut streams = HashMap::new();
        streams.insert(
            "a".to_string(),
            Callback::on_message(|_c, _m, _ack| Ok(())), // never calls done()
        );

        let once = OnceConsumer::new(server.clone(), streams, HashMap::new(), "import").unwrap();
        let n = once.run().unwrap();
        assert_eq!(n, 1);

        // Marker must not be set: the entry is still pending.
        assert!(server.get(&once_key("import")).unwrap().is_none());
    }
}
