//! The group supervisor (C7): one [`MultiStreamConsumer`] per configured
//! group, each on its own OS thread; any uncaught child failure is
//! re-raised from the join point (§4.6).
//!
//! A named `std::thread::Builder` per unit of concurrency, joined at
//! shutdown.

use std::thread;

use telstar_infra::StreamServer;

use crate::multi_stream::MultiStreamConsumer;

/// Runs one [`MultiStreamConsumer`] per configured `(group, stream-set)`
/// on its own thread. Groups are independent: no shared mutable state
/// beyond the child thread handles (§4.6, §5).
pub struct GroupSupervisor<S> {
    consumers: Vec<MultiStreamConsumer<S>>,
}

impl<S: StreamServer + Send + 'static> GroupSupervisor<S> {
    pub fn new(consumers: Vec<MultiStreamConsumer<S>>) -> Self {
        Self { consumers }
    }

    /// Start every configured consumer on its own thread and join all of
    /// them. The first child panic (an unhandled callback error or
    /// message-format error, propagated via `MultiStreamConsumer::run`'s
    /// panic) is re-raised here by resuming its unwind (§4.6).
    pub fn run(self) -> ! {
        let mut handles = Vec::with_capacity(self.consumers.len());
        for (i, consumer) in self.consumers.into_iter().enumerate() {
            let name = format!("telstar-group-{}-{}", consumer.group_name(), i);
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || consumer.run())
                .expect("failed to spawn group consumer thread");
            handles.push(handle);
        }

        for handle in handles {
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }

        unreachable!("all group consumer threads run forever; a join can only return via panic")
    }

    /// Fan out `run_once()` across every configured consumer instead of
    /// `run()`'s forever-loop, for callers (tests, a cron-style driver)
    /// that want one pass per group. Propagates the first error, the
    /// non-panicking analogue of `run()`'s join re-raise.
    pub fn run_once(&self) -> Result<usize, crate::error::ConsumeError> {
        let mut total = 0;
        for consumer in &self.consumers {
            total += consumer.run_once()?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::Callback;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use telstar_infra::FakeStreamServer;
    use uuid::Uuid;

    #[test]
    fn run_once_fans_out_across_all_groups() {
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

        let billing = {
            let calls = calls.clone();
            MultiStreamConsumer::builder(server.clone())
                .on_stream(
                    "orders",
                    Callback::on_message(move |_c, _m, ack| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        ack.done().unwrap();
                        Ok(())
                    }),
                )
                .build("billing", "c1")
                .unwrap()
        };
        let invoicing = {
            let calls = calls.clone();
            MultiStreamConsumer::builder(server.clone())
                .on_stream(
                    "invoices",
                    Callback::on_message(move |_c, _m, ack| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        ack.done().unwrap();
                        Ok(())
                    }),
                )
                .build("invoicing", "c1")
                .unwrap()
        };

        let supervisor = GroupSupervisor::new(vec![billing, invoicing]);
        let n = supervisor.run_once().unwrap();
        assert_eq!(n, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
