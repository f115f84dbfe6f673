//! The application facade (C9): binds user callbacks and error handlers
//! to `(group, stream)` pairs and produces an immutable configuration the
//! group supervisor (C7) consumes, via an explicit builder rather than
//! decorator-style registration (§4.8, §9 REDESIGN FLAGS).

use std::collections::HashMap;
use std::sync::Arc;

use telstar_consumer::{
    Callback, CallbackErrorKind, ConsumeError, ErrorHandler, MultiStreamConsumer,
    MultiStreamConsumerBuilder,
};
use telstar_infra::StreamServer;

use crate::schema::PayloadSchema;
use crate::validated::validated;

type GroupKey = (String, String);

/// Accumulates `(group, consumer_name)` → [`MultiStreamConsumerBuilder`]
/// registrations, in the order they were first registered, so
/// [`AppBuilder::build`] produces consumers in a deterministic order.
pub struct AppBuilder<S> {
    server: S,
    groups: HashMap<GroupKey, MultiStreamConsumerBuilder<S>>,
    order: Vec<GroupKey>,
}

impl<S: StreamServer + Clone> AppBuilder<S> {
    pub fn new(server: S) -> Self {
        Self {
            server,
            groups: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn take_or_insert_builder(&mut self, key: &GroupKey) -> MultiStreamConsumerBuilder<S> {
        if let Some(builder) = self.groups.remove(key) {
            builder
        } else {
            self.order.push(key.clone());
            MultiStreamConsumerBuilder::new(self.server.clone())
        }
    }

    /// `@consumer(group, streams, schema, strict=true, ack_invalid=false)`
    /// of §4.8: register `callback` against every stream in `streams`
    /// under `(group_name, consumer_name)`, wrapping it in the schema
    /// validation gate when `schema` is given.
    #[allow(clippy::too_many_arguments)]
    pub fn consumer(
        mut self,
        group_name: impl Into<String>,
        consumer_name: impl Into<String>,
        streams: &[&str],
        callback: Callback,
        schema: Option<Arc<dyn PayloadSchema>>,
        strict: bool,
        ack_invalid: bool,
    ) -> Self {
        let key = (group_name.into(), consumer_name.into());
        let callback = match schema {
            Some(schema) => validated(callback, schema, strict, ack_invalid),
            None => callback,
        };

        let mut builder = self.take_or_insert_builder(&key);
        for stream in streams {
            builder = builder.on_stream(*stream, callback.clone());
        }
        self.groups.insert(key, builder);
        self
    }

    /// `@errorhandler(ExcClass)` of §4.8, scoped to one `(group, consumer)`.
    pub fn error_handler(
        mut self,
        group_name: impl Into<String>,
        consumer_name: impl Into<String>,
        kind: CallbackErrorKind,
        handler: ErrorHandler,
    ) -> Self {
        let key = (group_name.into(), consumer_name.into());
        let builder = self.take_or_insert_builder(&key).on_error(kind, handler);
        self.groups.insert(key, builder);
        self
    }

    /// Override `block_ms` for one `(group, consumer)` (§4.4.a default 2000).
    pub fn block_ms(mut self, group_name: impl Into<String>, consumer_name: impl Into<String>, ms: u64) -> Self {
        let key = (group_name.into(), consumer_name.into());
        let builder = self.take_or_insert_builder(&key).block_ms(ms);
        self.groups.insert(key, builder);
        self
    }

    /// Override `claim_after_ms` for one `(group, consumer)` (§4.4.a default 20000).
    pub fn claim_after_ms(
        mut self,
        group_name: impl Into<String>,
        consumer_name: impl Into<String>,
        ms: u64,
    ) -> Self {
        let key = (group_name.into(), consumer_name.into());
        let builder = self.take_or_insert_builder(&key).claim_after_ms(ms);
        self.groups.insert(key, builder);
        self
    }

    /// Validate every registration and build one [`MultiStreamConsumer`]
    /// per configured `(group, consumer)`, ready for
    /// [`telstar_consumer::GroupSupervisor`].
    pub fn build(self) -> Result<Vec<MultiStreamConsumer<S>>, ConsumeError> {
        let mut groups = self.groups;
        let mut consumers = Vec::with_capacity(self.order.len());
        for (group_name, consumer_name) in self.order {
            let key = (group_name.clone(), consumer_name.clone());
            let builder = groups
                .remove(&key)
                .expect("every key in `order` has a builder entry");
            consumers.push(builder.build(group_name, consumer_name)?);
        }
        Ok(consumers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use telstar_consumer::GroupSupervisor;
    use telstar_infra::FakeStreamServer;
    use uuid::Uuid;

    #[test]
    fn one_callback_fans_out_to_every_listed_stream() {
        let server = FakeStreamServer::new();
        server
            .xadd_pipeline(
                &[
                    ("orders".to_string(), Uuid::new_v4(), serde_json::json!({})),
                    ("invoices".to_string(), Uuid::new_v4(), serde_json::json!({})),
                ],
                Duration::ZERO,
            )
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let callback = Callback::on_message(move |_c, _m, ack| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            ack.done().unwrap();
            Ok(())
        });

        let consumers = AppBuilder::new(server)
            .consumer("billing", "c1", &["orders", "invoices"], callback, None, true, false)
            .build()
            .unwrap();

        assert_eq!(consumers.len(), 1);
        let n = consumers[0].run_once().unwrap();
        assert_eq!(n, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn distinct_groups_build_into_distinct_consumers() {
        let server = FakeStreamServer::new();
        server
            .xadd_pipeline(
                &[
                    ("orders".to_string(), Uuid::new_v4(), serde_json::json!({})),
                    ("invoices".to_string(), Uuid::new_v4(), serde_json::json!({})),
                ],
                Duration::ZERO,
            )
            .unwrap();

        let noop = Callback::on_message(|_c, _m, ack| {
            ack.done().unwrap();
            Ok(())
        });

        let consumers = AppBuilder::new(server)
            .consumer("billing", "c1", &["orders"], noop.clone(), None, true, false)
            .consumer("invoicing", "c1", &["invoices"], noop, None, true, false)
            .build()
            .unwrap();

        assert_eq!(consumers.len(), 2);
        let supervisor = GroupSupervisor::new(consumers);
        assert_eq!(supervisor.run_once().unwrap(), 2);
    }
}
