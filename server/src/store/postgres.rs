//! PostgreSQL backend.

use std::collections::BTreeSet;

use kvsync_engine::{Key, Snapshot, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use super::{Entry, Result};

const UPSERT: &str = r#"
    INSERT INTO kv (key, value, updated_at)
    VALUES ($1, $2, NOW())
    ON CONFLICT (key) DO UPDATE SET
        value = EXCLUDED.value,
        updated_at = NOW()
"#;

#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    /// Create a new database connection pool.
    pub async fn connect(database_url: &str) -> std::result::Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub(super) async fn get_all(&self) -> Result<Snapshot> {
        let rows = sqlx::query("SELECT key, value FROM kv")
            .fetch_all(&self.pool)
            .await?;

        let mut snapshot = Snapshot::new();
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: Value = row.try_get("value")?;
            snapshot.insert(key, value);
        }
        Ok(snapshot)
    }

    pub(super) async fn get_many(&self, keys: &BTreeSet<Key>) -> Result<Snapshot> {
        let keys: Vec<String> = keys.iter().cloned().collect();
        let rows = sqlx::query("SELECT key, value FROM kv WHERE key = ANY($1)")
            .bind(keys)
            .fetch_all(&self.pool)
            .await?;

        let mut snapshot = Snapshot::new();
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: Value = row.try_get("value")?;
            snapshot.insert(key, value);
        }
        Ok(snapshot)
    }

    pub(super) async fn get(&self, key: &str) -> Result<Option<Entry>> {
        let row = sqlx::query("SELECT key, value, updated_at FROM kv WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Entry {
                key: row.try_get("key")?,
                value: row.try_get("value")?,
                updated_at: row.try_get("updated_at")?,
            })),
            None => Ok(None),
        }
    }

    pub(super) async fn upsert(&self, key: &str, value: &Value) -> Result<()> {
        sqlx::query(UPSERT)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Upsert all entries in one transaction; on any failure nothing lands.
    pub(super) async fn upsert_many(&self, data: &Snapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in data {
            sqlx::query(UPSERT)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub(super) async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(super) async fn delete_all(&self) -> Result<Vec<Key>> {
        let keys = sqlx::query_scalar::<_, String>("DELETE FROM kv RETURNING key")
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }
}
