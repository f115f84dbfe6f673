//! The producer loop (C4): pulls a due-unsent batch, appends it to the
//! stream server in one pipeline, and marks it sent, all inside one local
//! outbox transaction (§4.3).

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use telstar_infra::StreamServer;

use crate::error::OutboxError;
use crate::repository::OutboxRepository;

/// Tunables for the producer loop (§4.3, §3 [ADD config]).
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Rows pulled from `unsent()` per iteration. Default 5.
    pub batch_size: usize,
    /// Sleep between iterations. Default 500ms.
    pub wait: Duration,
    /// Sleep between queuing successive `XADD`s in the pipeline. Default 1ms;
    /// intentionally spreads server-assigned IDs across milliseconds to
    /// improve cross-stream reorder quality on the consumer side (§4.3).
    pub inter_send_sleep: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            wait: Duration::from_millis(500),
            inter_send_sleep: Duration::from_millis(1),
        }
    }
}

/// Drives staged rows from an [`OutboxRepository`] onto a [`StreamServer`].
pub struct ProducerLoop<R, S> {
    outbox: R,
    server: S,
    config: ProducerConfig,
}

impl<R, S> ProducerLoop<R, S>
where
    R: OutboxRepository,
    S: StreamServer,
{
    pub fn new(outbox: R, server: S, config: ProducerConfig) -> Self {
        Self {
            outbox,
            server,
            config,
        }
    }

    /// One iteration of §4.3 steps 1-5 (the sleep in step 6 is the caller's
    /// concern in `run()`; `run_once` is the unit under test).
    ///
    /// Returns the number of rows appended and marked sent. If the append
    /// fails, the transaction is dropped (and therefore rolled back) and
    /// the rows remain unsent; a prior append that partially succeeded
    /// before a transaction failure produces duplicates the consumer's
    /// dedup absorbs (§7 item 6).
    pub fn run_once(&self) -> Result<usize, OutboxError> {
        let mut tx = self.outbox.begin_transaction()?;
        let rows = tx.unsent()?;
        let batch: Vec<_> = rows.into_iter().take(self.config.batch_size).collect();
        if batch.is_empty() {
            tx.commit()?;
            return Ok(0);
        }

        let to_append: Vec<(String, uuid::Uuid, serde_json::Value)> = batch
            .iter()
            .map(|r| (r.topic.clone(), r.msg_uid, r.data.clone()))
            .collect();

        let appended = self
            .server
            .xadd_pipeline(&to_append, self.config.inter_send_sleep)
            .map_err(|e| OutboxError::Storage(format!("append to stream server: {e}")))?;
        debug!(count = appended.len(), "appended staged batch to stream server");

        let ids: Vec<i64> = batch.iter().map(|r| r.id).collect();
        tx.mark_as_sent(&ids)?;
        tx.commit()?;

        Ok(batch.len())
    }

    /// Run forever: `run_once`, then sleep `config.wait`.
    pub fn run(&self) -> ! {
        loop {
            match self.run_once() {
                Ok(0) => {}
                Ok(n) => info!(sent = n, "producer batch sent"),
                Err(err) => error!(error = %err, "producer iteration failed"),
            }
            thread::sleep(self.config.wait);
        }
    }
}

impl<R, S> ProducerLoop<R, S>
where
    R: OutboxRepository + Send + Sync + 'static,
    S: StreamServer + Clone + 'static,
{
    /// Spawn the loop on a named background thread with an `mpsc`
    /// shutdown channel, returning a handle that joins on shutdown.
    pub fn spawn(self) -> ProducerHandle
    where
        Self: Send,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let producer = Arc::new(self);

        let join = thread::Builder::new()
            .name("telstar-producer".into())
            .spawn(move || {
                info!("producer loop started");
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }
                    match producer.run_once() {
                        Ok(0) => {}
                        Ok(n) => info!(sent = n, "producer batch sent"),
                        Err(err) => {
                            warn!(error = %err, "producer iteration failed");
                        }
                    }
                    thread::sleep(producer.config.wait);
                }
                info!("producer loop stopped");
            })
            .expect("failed to spawn producer thread");

        ProducerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

/// Handle to stop a backgrounded [`ProducerLoop`].
pub struct ProducerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl ProducerHandle {
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryOutboxRepository;
    use telstar_infra::FakeStreamServer;

    fn loop_with_defaults() -> ProducerLoop<InMemoryOutboxRepository, FakeStreamServer> {
        ProducerLoop::new(
            InMemoryOutboxRepository::new(),
            FakeStreamServer::new(),
            ProducerConfig {
                inter_send_sleep: Duration::ZERO,
                ..ProducerConfig::default()
            },
        )
    }

    #[test]
    fn run_once_appends_and_marks_sent() {
        let producer = loop_with_defaults();
        producer
            .outbox
            .create("mytopic", serde_json::json!({"a": 1}), Duration::ZERO)
            .unwrap();

        let sent = producer.run_once().unwrap();
        assert_eq!(sent, 1);
        assert!(producer.outbox.unsent().unwrap().is_empty());
        assert_eq!(producer.server.xlen("mytopic").unwrap(), 1);
    }

    #[test]
    fn run_once_respects_batch_size() {
        let producer = ProducerLoop::new(
            InMemoryOutboxRepository::new(),
            FakeStreamServer::new(),
            ProducerConfig {
                batch_size: 2,
                inter_send_sleep: Duration::ZERO,
                ..ProducerConfig::default()
            },
        );
        for i in 0..5 {
            producer
                .outbox
                .create("mytopic", serde_json::json!({"i": i}), Duration::ZERO)
                .unwrap();
        }

        let sent = producer.run_once().unwrap();
        assert_eq!(sent, 2);
        assert_eq!(producer.outbox.unsent().unwrap().len(), 3);
    }

    #[test]
    fn run_once_on_empty_outbox_is_a_noop() {
        let producer = loop_with_defaults();
        assert_eq!(producer.run_once().unwrap(), 0);
    }
}
