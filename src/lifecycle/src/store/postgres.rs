use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::model::{ProjectKey, SessionKey};
use sqlx::{Postgres, QueryBuilder, Transaction, query, query_scalar};

use super::{StoreError, StoreTransaction, check_bind_limit, distinct_sessions};

/// `TIMESTAMPTZ` holds microseconds and sqlx truncates finer binds, so a
/// sub-microsecond bound is rounded up to keep `start_time < end_time` exact.
fn exclusive_micros_bound(end_time: DateTime<Utc>) -> DateTime<Utc> {
    match end_time.timestamp_subsec_nanos() % 1_000 {
        0 => end_time,
        rest => end_time + chrono::Duration::nanoseconds(i64::from(1_000 - rest)),
    }
}

/// Open PostgreSQL transaction.
pub struct PgStoreTransaction {
    tx: Option<Transaction<'static, Postgres>>,
    max_ids_per_statement: usize,
}

impl PgStoreTransaction {
    pub fn new(tx: Transaction<'static, Postgres>, max_ids_per_statement: usize) -> Self {
        Self {
            tx: Some(tx),
            max_ids_per_statement,
        }
    }

    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        self.tx.as_mut().ok_or(StoreError::TransactionClosed)
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn load_project_name(
        &mut self,
        project: ProjectKey,
    ) -> Result<Option<String>, StoreError> {
        // Row lock serializes concurrent deletes of the same project
        let name = query_scalar("SELECT name FROM projects WHERE id = $1 FOR UPDATE")
            .bind(project.0)
            .fetch_optional(&mut **self.tx()?)
            .await?;
        Ok(name)
    }

    async fn delete_project(&mut self, project: ProjectKey) -> Result<u64, StoreError> {
        let result = query("DELETE FROM projects WHERE id = $1")
            .bind(project.0)
            .execute(&mut **self.tx()?)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_traces(
        &mut self,
        project: ProjectKey,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<SessionKey>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM traces WHERE project_rowid = ");
        qb.push_bind(project.0);
        if let Some(end_time) = end_time {
            qb.push(" AND start_time < ");
            qb.push_bind(exclusive_micros_bound(end_time));
        }
        qb.push(" RETURNING project_session_rowid");

        let rows: Vec<Option<i64>> = qb
            .build_query_scalar()
            .fetch_all(&mut **self.tx()?)
            .await?;
        tracing::debug!(project = %project, traces = rows.len(), "Deleted traces");

        Ok(distinct_sessions(rows))
    }

    async fn delete_orphaned_sessions(
        &mut self,
        sessions: &[SessionKey],
    ) -> Result<u64, StoreError> {
        if sessions.is_empty() {
            return Ok(0);
        }
        check_bind_limit(sessions.len(), self.max_ids_per_statement)?;

        let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM project_sessions WHERE id IN (");
        let mut ids = qb.separated(", ");
        for session in sessions {
            ids.push_bind(session.0);
        }
        ids.push_unseparated(
            ") AND NOT EXISTS (SELECT 1 FROM traces \
             WHERE traces.project_session_rowid = project_sessions.id)",
        );

        let result = qb.build().execute(&mut **self.tx()?).await?;
        Ok(result.rows_affected())
    }

    async fn delete_spans(
        &mut self,
        project: ProjectKey,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<u64, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "DELETE FROM spans WHERE trace_rowid IN (SELECT id FROM traces WHERE project_rowid = ",
        );
        qb.push_bind(project.0);
        if let Some(end_time) = end_time {
            qb.push(" AND start_time < ");
            qb.push_bind(exclusive_micros_bound(end_time));
        }
        qb.push(")");

        let result = qb.build().execute(&mut **self.tx()?).await?;
        Ok(result.rows_affected())
    }

    async fn delete_project_sessions(&mut self, project: ProjectKey) -> Result<u64, StoreError> {
        let result = query("DELETE FROM project_sessions WHERE project_id = $1")
            .bind(project.0)
            .execute(&mut **self.tx()?)
            .await?;
        Ok(result.rows_affected())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.rollback().await?;
        Ok(())
    }
}
