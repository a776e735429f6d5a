//! Unit-of-work seam between the executor and the database.
//!
//! [`ProjectStore::begin`] opens one transaction per request. Every delete
//! goes through the returned [`StoreTransaction`]; dropping it without
//! [`StoreTransaction::commit`] rolls everything back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Store;
use common::model::{ProjectKey, SessionKey};

mod postgres;
mod sqlite;

pub use postgres::PgStoreTransaction;
pub use sqlite::SqliteStoreTransaction;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("statement would bind {requested} ids, limit is {limit}")]
    ChunkTooLarge { requested: usize, limit: usize },

    #[error("transaction already finished")]
    TransactionClosed,
}

impl StoreError {
    /// Whether retrying the whole operation may succeed.
    ///
    /// Connectivity loss, pool exhaustion, serialization failures and lock
    /// contention are transient; everything else is fatal.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Database(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db)
                    if db.try_downcast_ref::<sqlx::sqlite::SqliteError>().is_some() =>
                {
                    db.code().is_some_and(|code| sqlite_contention(&code))
                }
                sqlx::Error::Database(db) => matches!(
                    db.code().as_deref(),
                    // serialization_failure, deadlock_detected
                    Some("40001") | Some("40P01")
                ),
                _ => false,
            },
            StoreError::ChunkTooLarge { .. } | StoreError::TransactionClosed => false,
        }
    }
}

/// Opens transactions against the project hierarchy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// Deletes issued inside one open transaction.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoreTransaction: Send {
    /// Load only the name of a project; `None` when the row is missing.
    async fn load_project_name(&mut self, project: ProjectKey)
    -> Result<Option<String>, StoreError>;

    /// Delete the project row, returning the number of rows removed.
    async fn delete_project(&mut self, project: ProjectKey) -> Result<u64, StoreError>;

    /// Delete the project's traces, restricted to `start_time < end_time`
    /// when a bound is given.
    ///
    /// Returns the distinct, non-null session keys of the deleted traces in
    /// the order they were first seen.
    async fn delete_traces(
        &mut self,
        project: ProjectKey,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<SessionKey>, StoreError>;

    /// Delete the listed sessions that no trace references any more.
    ///
    /// One statement per call. Fails without touching the database when
    /// `sessions` is longer than the configured bind limit.
    async fn delete_orphaned_sessions(&mut self, sessions: &[SessionKey])
    -> Result<u64, StoreError>;

    /// Delete spans below the traces `delete_traces` would remove.
    async fn delete_spans(
        &mut self,
        project: ProjectKey,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<u64, StoreError>;

    /// Delete every session still owned by the project.
    async fn delete_project_sessions(&mut self, project: ProjectKey) -> Result<u64, StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// [`ProjectStore`] over the SQL [`Store`].
#[derive(Debug, Clone)]
pub struct SqlProjectStore {
    store: Store,
    max_ids_per_statement: usize,
}

impl SqlProjectStore {
    pub fn new(store: Store, max_ids_per_statement: usize) -> Self {
        Self {
            store,
            max_ids_per_statement,
        }
    }
}

#[async_trait]
impl ProjectStore for SqlProjectStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx: Box<dyn StoreTransaction> = match &self.store {
            Store::Sqlite(pool) => Box::new(SqliteStoreTransaction::new(
                pool.begin().await?,
                self.max_ids_per_statement,
            )),
            Store::Postgres(pool) => Box::new(PgStoreTransaction::new(
                pool.begin().await?,
                self.max_ids_per_statement,
            )),
        };
        Ok(tx)
    }
}

/// Keep the first occurrence of every non-null session key.
fn distinct_sessions(rows: Vec<Option<i64>>) -> Vec<SessionKey> {
    let mut seen = std::collections::HashSet::new();
    rows.into_iter()
        .flatten()
        .filter(|id| seen.insert(*id))
        .map(SessionKey)
        .collect()
}

/// SQLITE_BUSY or SQLITE_LOCKED, including their extended variants whose
/// primary code sits in the low byte.
fn sqlite_contention(code: &str) -> bool {
    matches!(code.parse::<i32>().map(|code| code & 0xff), Ok(5 | 6))
}

fn check_bind_limit(requested: usize, limit: usize) -> Result<(), StoreError> {
    if requested > limit {
        return Err(StoreError::ChunkTooLarge { requested, limit });
    }
    Ok(())
}
