//! SQLite-backed [`KvStore`] implementation.
//!
//! Every key is one row of the `kv` table, holding its JSON value as text.
//! Writes from this process are serialized through an async mutex and run
//! inside a transaction, so the read of the old value (needed for change
//! notification and compare-and-swap) and the write agree. Change events
//! are broadcast only after the transaction commits.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::{broadcast, Mutex};

use order_sync_core::store::{KvStore, StoreChange, CHANGE_CHANNEL_CAPACITY};

use crate::config::Config;
use crate::{db, migrate};

/// SQLite implementation of the [`KvStore`] trait.
pub struct SqliteKv {
    pool: SqlitePool,
    write_lock: Mutex<()>,
    changes: broadcast::Sender<StoreChange>,
}

impl SqliteKv {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            pool,
            write_lock: Mutex::new(()),
            changes,
        }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::create_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn notify(&self, key: &str, old_value: Option<Value>, new_value: Option<Value>) {
        if old_value == new_value {
            return;
        }
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            old_value,
            new_value,
        });
    }
}

fn decode(key: &str, text: Option<String>) -> Result<Option<Value>> {
    text.map(|t| {
        serde_json::from_str(&t).with_context(|| format!("Corrupt JSON stored under '{}'", key))
    })
    .transpose()
}

async fn load_in(tx: &mut Transaction<'_, Sqlite>, key: &str) -> Result<Option<Value>> {
    let text: Option<String> = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut **tx)
        .await?;
    decode(key, text)
}

async fn upsert_in(tx: &mut Transaction<'_, Sqlite>, key: &str, value: &Value) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let text: Option<String> = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        decode(key, text)
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let old = load_in(&mut tx, key).await?;
        if old.as_ref() != Some(&value) {
            upsert_in(&mut tx, key, &value).await?;
        }
        tx.commit().await?;
        self.notify(key, old, Some(value));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let old = load_in(&mut tx, key).await?;
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.notify(key, old, None);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: Value,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let old = load_in(&mut tx, key).await?;
        if old.as_ref() != expected {
            tx.rollback().await?;
            return Ok(false);
        }
        upsert_in(&mut tx, key, &new).await?;
        tx.commit().await?;
        self.notify(key, old, Some(new));
        Ok(true)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
