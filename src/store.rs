// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persisted tunnel state
//!
//! The tunnel daemon's state blob is kept in a single append-only table. Rows are
//! never updated or deleted; the row with the highest id is the current state.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, TailwikiError};

const TABLE_QUERY: &str = r#"
CREATE TABLE IF NOT EXISTS "tailscale_data" (
    "id"    serial primary key,
    "state" text not null
);
"#;

const LATEST_QUERY: &str = "SELECT state FROM tailscale_data ORDER BY id DESC LIMIT 1";

const INSERT_QUERY: &str = "INSERT INTO tailscale_data(state) VALUES($1)";

const HISTORY_QUERY: &str = "SELECT id::int8, state FROM tailscale_data ORDER BY id ASC";

/// One stored snapshot of the tunnel state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedState {
    /// Monotonically increasing row id
    pub id: i64,
    /// Opaque state blob
    pub state: String,
}

/// Storage for tunnel state snapshots
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Create the state table if it does not exist
    async fn ensure_schema(&self) -> Result<()>;

    /// Blob of the newest row, `None` when the table is empty
    async fn read_latest(&self) -> Result<Option<String>>;

    /// Insert a new snapshot
    async fn append(&self, state: &str) -> Result<()>;

    /// Every snapshot in id order
    async fn history(&self) -> Result<Vec<PersistedState>>;

    /// Release the underlying connection
    async fn close(&self) {}
}

/// PostgreSQL-backed state store
pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    /// Prepare a store for `database_url` without connecting yet.
    ///
    /// The first query opens the connection, so an unreachable database
    /// surfaces from [`StateStore::ensure_schema`].
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(database_url)
            .map_err(|e| TailwikiError::ConfigError {
                message: format!("invalid DATABASE_URL: {}", e),
            })?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl StateStore for PostgresStateStore {
    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(TABLE_QUERY)
            .execute(&self.pool)
            .await
            .map_err(|e| TailwikiError::SchemaError {
                message: e.to_string(),
            })?;
        debug!("State table ready");
        Ok(())
    }

    async fn read_latest(&self) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>(LATEST_QUERY)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TailwikiError::ReadError {
                message: e.to_string(),
            })
    }

    async fn append(&self, state: &str) -> Result<()> {
        sqlx::query(INSERT_QUERY)
            .bind(state)
            .execute(&self.pool)
            .await
            .map_err(|e| TailwikiError::WriteError {
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn history(&self) -> Result<Vec<PersistedState>> {
        let rows = sqlx::query_as::<_, (i64, String)>(HISTORY_QUERY)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TailwikiError::ReadError {
                message: e.to_string(),
            })?;

        Ok(rows
            .into_iter()
            .map(|(id, state)| PersistedState { id, state })
            .collect())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Which operation a [`MemoryStateStore`] should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    /// `ensure_schema`
    Schema,
    /// `read_latest` and `history`
    Read,
    /// `append`
    Write,
}

/// In-process state store with the same semantics as the database table.
///
/// Used where no database is available, notably in tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    rows: Mutex<Vec<PersistedState>>,
    fail_on: Option<FailOn>,
}

impl MemoryStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `states`, oldest first
    pub fn with_history<I, S>(states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rows = states
            .into_iter()
            .enumerate()
            .map(|(index, state)| PersistedState {
                id: index as i64 + 1,
                state: state.into(),
            })
            .collect();

        Self {
            rows: Mutex::new(rows),
            fail_on: None,
        }
    }

    /// Make one operation fail with its database error
    pub fn failing_on(mut self, fail_on: FailOn) -> Self {
        self.fail_on = Some(fail_on);
        self
    }

    fn check(&self, operation: FailOn) -> Result<()> {
        if self.fail_on != Some(operation) {
            return Ok(());
        }
        let message = "injected failure".to_string();
        Err(match operation {
            FailOn::Schema => TailwikiError::SchemaError { message },
            FailOn::Read => TailwikiError::ReadError { message },
            FailOn::Write => TailwikiError::WriteError { message },
        })
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn ensure_schema(&self) -> Result<()> {
        self.check(FailOn::Schema)
    }

    async fn read_latest(&self) -> Result<Option<String>> {
        self.check(FailOn::Read)?;
        let rows = self.rows.lock().await;
        Ok(rows.iter().max_by_key(|row| row.id).map(|row| row.state.clone()))
    }

    async fn append(&self, state: &str) -> Result<()> {
        self.check(FailOn::Write)?;
        let mut rows = self.rows.lock().await;
        let id = rows.iter().map(|row| row.id).max().unwrap_or(0) + 1;
        rows.push(PersistedState {
            id,
            state: state.to_string(),
        });
        Ok(())
    }

    async fn history(&self) -> Result<Vec<PersistedState>> {
        self.check(FailOn::Read)?;
        let mut rows = self.rows.lock().await.clone();
        rows.sort_by_key(|row| row.id);
        Ok(rows)
    }
}
