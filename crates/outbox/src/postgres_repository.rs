//! `sqlx`-backed outbox repository.
//!
//! A `PgPool` wrapped in an `Arc`, `sqlx::query` with bound parameters, and
//! `thiserror`-wrapped error mapping. The repository trait (§4.2 [ADD]) is
//! synchronous to match the producer loop's thread-per-worker model, so
//! every method bridges its `async fn sqlx` call with `Handle::block_on`.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use crate::error::OutboxError;
use crate::repository::{OutboxRepository, OutboxRow, OutboxTransaction};

/// `setup(handle)` of §4.2: bind the repository to a database handle.
#[derive(Clone)]
pub struct PostgresOutboxRepository {
    pool: Arc<PgPool>,
    rt: Arc<tokio::runtime::Runtime>,
}

impl PostgresOutboxRepository {
    /// Bind to an already-connected pool and the tokio runtime its async
    /// driver calls are bridged through.
    pub fn setup(pool: PgPool, rt: Arc<tokio::runtime::Runtime>) -> Self {
        Self {
            pool: Arc::new(pool),
            rt,
        }
    }

    fn row_from(row: &sqlx::postgres::PgRow) -> Result<OutboxRow, OutboxError> {
        Ok(OutboxRow {
            id: row.try_get("id")?,
            msg_uid: row.try_get("msg_uid")?,
            topic: row.try_get("topic")?,
            data: row.try_get("data")?,
            sent: row.try_get("sent")?,
            send_at: row.try_get("send_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

const UNSENT_QUERY: &str = r#"
    SELECT id, msg_uid, topic, data, sent, send_at, created_at
    FROM telstar_staged_message
    WHERE sent = FALSE AND send_at <= now()
    ORDER BY id ASC
"#;

impl OutboxRepository for PostgresOutboxRepository {
    #[instrument(skip(self, data), fields(topic = %topic))]
    fn create(
        &self,
        topic: &str,
        data: JsonValue,
        delay: std::time::Duration,
    ) -> Result<OutboxRow, OutboxError> {
        let msg_uid = Uuid::new_v4();
        let send_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        let pool = self.pool.clone();

        self.rt.block_on(async move {
            let row = sqlx::query(
                r#"
                INSERT INTO telstar_staged_message (msg_uid, topic, data, sent, send_at, created_at)
                VALUES ($1, $2, $3, FALSE, $4, now())
                RETURNING id, msg_uid, topic, data, sent, send_at, created_at
                "#,
            )
            .bind(msg_uid)
            .bind(topic)
            .bind(&data)
            .bind(send_at)
            .fetch_one(&*pool)
            .await?;

            Self::row_from(&row)
        })
    }

    #[instrument(skip(self))]
    fn unsent(&self) -> Result<Vec<OutboxRow>, OutboxError> {
        let pool = self.pool.clone();
        self.rt.block_on(async move {
            let rows = sqlx::query(UNSENT_QUERY).fetch_all(&*pool).await?;
            rows.iter().map(Self::row_from).collect()
        })
    }

    #[instrument(skip(self))]
    fn mark_as_sent(&self, ids: &[i64]) -> Result<(), OutboxError> {
        if ids.is_empty() {
            return Ok(());
        }
        let pool = self.pool.clone();
        let ids = ids.to_vec();
        self.rt.block_on(async move {
            sqlx::query("UPDATE telstar_staged_message SET sent = TRUE WHERE id = ANY($1)")
                .bind(&ids)
                .execute(&*pool)
                .await?;
            Ok(())
        })
    }

    fn begin_transaction(&self) -> Result<Box<dyn OutboxTransaction + '_>, OutboxError> {
        let pool = self.pool.clone();
        let tx: Transaction<'static, Postgres> =
            self.rt.block_on(async move { pool.begin().await })?;
        Ok(Box::new(PostgresTransaction {
            rt: self.rt.clone(),
            tx: Some(tx),
        }))
    }
}

struct PostgresTransaction {
    rt: Arc<tokio::runtime::Runtime>,
    tx: Option<Transaction<'static, Postgres>>,
}

impl OutboxTransaction for PostgresTransaction {
    fn unsent(&mut self) -> Result<Vec<OutboxRow>, OutboxError> {
        let tx = self.tx.as_mut().expect("transaction already consumed");
        self.rt.block_on(async {
            let rows = sqlx::query(UNSENT_QUERY).fetch_all(&mut **tx).await?;
            rows.iter().map(PostgresOutboxRepository::row_from).collect()
        })
    }

    fn mark_as_sent(&mut self, ids: &[i64]) -> Result<(), OutboxError> {
        if ids.is_empty() {
            return Ok(());
        }
        let tx = self.tx.as_mut().expect("transaction already consumed");
        self.rt.block_on(async {
            sqlx::query("UPDATE telstar_staged_message SET sent = TRUE WHERE id = ANY($1)")
                .bind(ids)
                .execute(&mut **tx)
                .await?;
            Ok(())
        })
    }

    fn commit(mut self: Box<Self>) -> Result<(), OutboxError> {
        let tx = self.tx.take().expect("transaction already consumed");
        self.rt.block_on(async move { tx.commit().await })?;
        Ok(())
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        // Guaranteed rollback on every exit path that isn't an explicit
        // `commit()`, including a panic unwind (§4.2 [ADD]). `sqlx::Transaction`
        // itself rolls back on drop; this just makes that fact visible in
        // logs instead of leaving it silent.
        if let Some(tx) = self.tx.take() {
            tracing::debug!("outbox transaction dropped without commit; rolling back");
            let rt = self.rt.clone();
            rt.spawn(async move {
                let _ = tx.rollback().await;
            });
        }
    }
}
