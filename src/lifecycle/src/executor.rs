//! Transactional project deletion and clearing.
//!
//! Each request runs in one transaction opened through [`ProjectStore`].
//! Pre-checks and deletes share that transaction; any failure rolls it back
//! before the error is returned. Only after commit is the invalidation event
//! published, on a spawned task so that dropping the caller's future cannot
//! lose it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::Store;
use common::config::{CascadeMode, Configuration};
use common::model::{ProjectKey, SessionKey};

use crate::error::{LifecycleError, Result};
use crate::events::{InvalidationEvent, InvalidationPublisher, PublishFault, RetryPolicy};
use crate::global_id::resolve_project;
use crate::guard::GuardRules;
use crate::planner::{BatchPlanner, PlanError};
use crate::query::Query;
use crate::store::{ProjectStore, SqlProjectStore, StoreTransaction};

/// Knobs the executor reads at call time.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub guard: GuardRules,
    pub session_delete_chunk_size: usize,
    pub cascade: CascadeMode,
    pub retry: RetryPolicy,
}

impl From<&Configuration> for LifecycleSettings {
    fn from(config: &Configuration) -> Self {
        Self {
            guard: GuardRules::from(&config.projects),
            session_delete_chunk_size: config.projects.session_delete_chunk_size,
            cascade: config.projects.cascade,
            retry: RetryPolicy::from(&config.events),
        }
    }
}

/// Remove a project's traces, optionally only those that started before
/// `end_time`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearRequest {
    pub project_ref: String,
    pub end_time: Option<DateTime<Utc>>,
}

impl ClearRequest {
    pub fn all(project_ref: impl Into<String>) -> Self {
        Self {
            project_ref: project_ref.into(),
            end_time: None,
        }
    }

    /// Exclusive upper bound on trace start time.
    pub fn before(project_ref: impl Into<String>, end_time: DateTime<Utc>) -> Self {
        Self {
            project_ref: project_ref.into(),
            end_time: Some(end_time),
        }
    }
}

/// Outcome of a committed mutation.
///
/// `publish_fault` is set when the invalidation event could not be
/// enqueued. The mutation itself still succeeded.
#[derive(Debug)]
pub struct MutationReceipt {
    pub query: Query,
    pub event: InvalidationEvent,
    pub publish_fault: Option<PublishFault>,
}

impl MutationReceipt {
    pub fn published(&self) -> bool {
        self.publish_fault.is_none()
    }
}

/// Entry point for project deletion and clearing.
pub struct ProjectLifecycle<S, P> {
    store: S,
    query: Query,
    publisher: Arc<P>,
    guard: GuardRules,
    planner: BatchPlanner,
    cascade: CascadeMode,
    retry: RetryPolicy,
}

impl<P: InvalidationPublisher> ProjectLifecycle<SqlProjectStore, P> {
    /// Wire the executor to a SQL store.
    pub fn from_store(
        store: Store,
        publisher: Arc<P>,
        config: &Configuration,
    ) -> std::result::Result<Self, PlanError> {
        let settings = LifecycleSettings::from(config);
        let project_store = SqlProjectStore::new(store.clone(), settings.session_delete_chunk_size);
        Self::new(project_store, Query::new(store), publisher, settings)
    }
}

impl<S, P> ProjectLifecycle<S, P>
where
    S: ProjectStore,
    P: InvalidationPublisher,
{
    pub fn new(
        store: S,
        query: Query,
        publisher: Arc<P>,
        settings: LifecycleSettings,
    ) -> std::result::Result<Self, PlanError> {
        Ok(Self {
            store,
            query,
            publisher,
            guard: settings.guard,
            planner: BatchPlanner::new(settings.session_delete_chunk_size)?,
            cascade: settings.cascade,
            retry: settings.retry,
        })
    }

    /// Delete a project and everything under it.
    ///
    /// Fails with `NotFound` when the project does not exist and with
    /// `ProtectedEntity` for the default project. Neither touches the store.
    #[tracing::instrument(skip(self), fields(project = tracing::field::Empty))]
    pub async fn delete_project(&self, project_ref: &str) -> Result<MutationReceipt> {
        let project = resolve_project(project_ref)?;
        tracing::Span::current().record("project", tracing::field::display(project));

        let mut tx = self.store.begin().await?;
        let outcome = self.delete_within(tx.as_mut(), project, project_ref).await;
        finish(tx.as_mut(), outcome).await?;

        tracing::info!(project = %project, "Deleted project");

        let event = InvalidationEvent::ProjectDeleted {
            project_key: project,
        };
        Ok(self.publish(event).await)
    }

    /// Remove a project's traces, and the sessions this leaves empty.
    ///
    /// Clearing a project that has no matching traces, or does not exist,
    /// succeeds and still publishes an event.
    #[tracing::instrument(skip(self), fields(project = tracing::field::Empty))]
    pub async fn clear_project(&self, request: &ClearRequest) -> Result<MutationReceipt> {
        let project = resolve_project(&request.project_ref)?;
        tracing::Span::current().record("project", tracing::field::display(project));

        let mut tx = self.store.begin().await?;
        let outcome = self
            .clear_within(tx.as_mut(), project, request.end_time)
            .await;
        let sessions = finish(tx.as_mut(), outcome).await?;

        tracing::info!(
            project = %project,
            sessions = sessions.len(),
            "Cleared project"
        );

        let event = InvalidationEvent::ProjectCleared {
            project_key: project,
            affected_session_keys: sessions,
        };
        Ok(self.publish(event).await)
    }

    async fn delete_within(
        &self,
        tx: &mut dyn StoreTransaction,
        project: ProjectKey,
        project_ref: &str,
    ) -> Result<()> {
        let name = tx
            .load_project_name(project)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(project_ref.to_string()))?;
        self.guard.check_deletable(&name)?;

        if self.cascade == CascadeMode::Explicit {
            let spans = tx.delete_spans(project, None).await?;
            let sessions = tx.delete_traces(project, None).await?;
            self.delete_sessions(tx, &sessions).await?;
            let remaining = tx.delete_project_sessions(project).await?;
            tracing::debug!(
                project = %project,
                spans,
                sessions = sessions.len(),
                remaining,
                "Removed project contents"
            );
        }

        let deleted = tx.delete_project(project).await?;
        if deleted == 0 {
            return Err(LifecycleError::NotFound(project_ref.to_string()));
        }
        Ok(())
    }

    async fn clear_within(
        &self,
        tx: &mut dyn StoreTransaction,
        project: ProjectKey,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<SessionKey>> {
        if self.cascade == CascadeMode::Explicit {
            let spans = tx.delete_spans(project, end_time).await?;
            tracing::debug!(project = %project, spans, "Removed spans");
        }

        let sessions = tx.delete_traces(project, end_time).await?;
        self.delete_sessions(tx, &sessions).await?;
        Ok(sessions)
    }

    /// Delete the now-unreferenced subset of `sessions`, one statement per
    /// planned chunk.
    async fn delete_sessions(
        &self,
        tx: &mut dyn StoreTransaction,
        sessions: &[SessionKey],
    ) -> Result<u64> {
        let chunks = self.planner.plan(sessions.iter().copied());
        let total = chunks.len();
        let mut removed = 0;

        for (index, chunk) in chunks.iter().enumerate() {
            let deleted = tx.delete_orphaned_sessions(chunk).await?;
            tracing::debug!(
                chunk = index + 1,
                chunks = total,
                size = chunk.len(),
                deleted,
                "Deleted orphaned sessions"
            );
            removed += deleted;
        }

        Ok(removed)
    }

    async fn publish(&self, event: InvalidationEvent) -> MutationReceipt {
        let publisher = Arc::clone(&self.publisher);
        let retry = self.retry;
        let task_event = event.clone();

        // The fault is reported from inside the task so it is logged even
        // when the caller stops waiting after commit.
        let handle = tokio::spawn(async move {
            let outcome =
                crate::events::publish_with_retry(publisher.as_ref(), task_event, retry).await;
            if let Err(fault) = &outcome {
                report_lost(fault);
            }
            outcome
        });

        let publish_fault = match handle.await {
            Ok(Ok(())) => None,
            Ok(Err(fault)) => Some(fault),
            Err(join_error) => {
                let fault = PublishFault::Aborted {
                    event: event.clone(),
                    reason: join_error.to_string(),
                };
                report_lost(&fault);
                Some(fault)
            }
        };

        MutationReceipt {
            query: self.query.clone(),
            event,
            publish_fault,
        }
    }
}

fn report_lost(fault: &PublishFault) {
    let event = fault.event();
    tracing::error!(
        subtype = event.subtype(),
        project = %event.project_key(),
        error = %fault,
        "Invalidation event lost, downstream caches may be stale"
    );
}

/// Commit on success, roll back on failure.
async fn finish<T>(tx: &mut dyn StoreTransaction, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}
