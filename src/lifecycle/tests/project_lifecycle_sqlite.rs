use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Store;
use common::config::Configuration;
use common::model::{ProjectKey, SessionKey};
use common::queue::{InMemoryQueue, Message, MessageType, Queue, QueueConfig};
use common::testing::{ProjectFixture, TestConfigBuilder, at_second};
use lifecycle::{
    ClearRequest, GlobalId, InvalidationEvent, LifecycleError, ProjectLifecycle, ProjectStore,
    QueuePublisher, SqlProjectStore, StoreError, StoreTransaction,
};
use tokio::time::timeout;

type SqlLifecycle = ProjectLifecycle<SqlProjectStore, QueuePublisher<InMemoryQueue>>;

struct Harness {
    store: Store,
    consumer: InMemoryQueue,
    lifecycle: SqlLifecycle,
}

async fn harness(config: Configuration) -> Harness {
    let store = Store::new(&config.database.dsn)
        .await
        .expect("Failed to open store");
    let consumer = invalidation_consumer().await;
    let publisher = Arc::new(QueuePublisher::new(consumer.clone()));
    let lifecycle = ProjectLifecycle::from_store(store.clone(), publisher, &config)
        .expect("Failed to build lifecycle");
    Harness {
        store,
        consumer,
        lifecycle,
    }
}

async fn invalidation_consumer() -> InMemoryQueue {
    let mut queue = InMemoryQueue::connected(QueueConfig::default())
        .await
        .expect("Failed to connect queue");
    queue
        .subscribe(MessageType::Invalidation, None)
        .await
        .expect("Failed to subscribe");
    queue
}

async fn next_event(queue: &InMemoryQueue) -> Option<InvalidationEvent> {
    let received = timeout(Duration::from_millis(200), queue.receive()).await;
    match received {
        Ok(result) => {
            let message: Option<Message<InvalidationEvent>> = result.expect("receive failed");
            message.map(|message| message.payload)
        }
        Err(_) => None,
    }
}

fn reference(project: ProjectKey) -> String {
    GlobalId::project(project).encode()
}

#[tokio::test]
async fn test_delete_project_removes_everything_below_it() {
    let h = harness(TestConfigBuilder::new().in_memory().build()).await;
    let alpha = ProjectFixture::new("alpha")
        .trace_in("s1", 1)
        .trace_in("s1", 2)
        .trace(3)
        .seed(&h.store)
        .await
        .unwrap();

    let receipt = h
        .lifecycle
        .delete_project(&reference(alpha.project))
        .await
        .unwrap();

    assert!(receipt.published());
    assert!(receipt.query.project(alpha.project).await.unwrap().is_none());
    assert_eq!(receipt.query.trace_count(alpha.project).await.unwrap(), 0);
    assert_eq!(receipt.query.span_count(alpha.project).await.unwrap(), 0);
    assert!(!h.store.session_exists(alpha.session("s1")).await.unwrap());
    assert_eq!(h.store.count_orphaned_sessions().await.unwrap(), 0);

    assert_eq!(
        next_event(&h.consumer).await,
        Some(InvalidationEvent::ProjectDeleted {
            project_key: alpha.project
        })
    );

    let again = h.lifecycle.delete_project(&reference(alpha.project)).await;
    assert!(matches!(again, Err(LifecycleError::NotFound(_))));
}

#[tokio::test]
async fn test_default_project_is_protected() {
    let h = harness(TestConfigBuilder::new().in_memory().build()).await;
    let default = ProjectFixture::new("default")
        .trace_in("s1", 1)
        .trace(2)
        .seed(&h.store)
        .await
        .unwrap();

    let err = h
        .lifecycle
        .delete_project(&reference(default.project))
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::ProtectedEntity(_)));
    assert!(h.store.get_project(default.project).await.unwrap().is_some());
    assert_eq!(h.store.count_traces(default.project).await.unwrap(), 2);
    assert_eq!(h.store.count_sessions(default.project).await.unwrap(), 1);
    assert_eq!(next_event(&h.consumer).await, None);
}

#[tokio::test]
async fn test_default_project_name_comes_from_configuration() {
    let config = TestConfigBuilder::new()
        .in_memory()
        .with_default_project("playground")
        .build();
    let h = harness(config).await;
    let playground = ProjectFixture::new("playground").seed(&h.store).await.unwrap();
    let default = ProjectFixture::new("default").seed(&h.store).await.unwrap();

    assert!(matches!(
        h.lifecycle
            .delete_project(&reference(playground.project))
            .await,
        Err(LifecycleError::ProtectedEntity(_))
    ));
    assert!(
        h.lifecycle
            .delete_project(&reference(default.project))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_clear_with_end_time_keeps_later_traces_and_their_session() {
    let h = harness(TestConfigBuilder::new().in_memory().build()).await;
    let beta = ProjectFixture::new("beta")
        .trace_in("s2", 1)
        .trace_in("s2", 5)
        .trace_in("s2", 10)
        .seed(&h.store)
        .await
        .unwrap();

    let receipt = h
        .lifecycle
        .clear_project(&ClearRequest::before(reference(beta.project), at_second(6)))
        .await
        .unwrap();

    let remaining = receipt.query.traces(beta.project).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].start_time, at_second(10));
    assert!(h.store.session_exists(beta.session("s2")).await.unwrap());
    assert_eq!(receipt.query.span_count(beta.project).await.unwrap(), 1);

    assert_eq!(
        next_event(&h.consumer).await,
        Some(InvalidationEvent::ProjectCleared {
            project_key: beta.project,
            affected_session_keys: vec![beta.session("s2")],
        })
    );
}

#[tokio::test]
async fn test_clear_without_end_time_removes_orphaned_session() {
    let h = harness(TestConfigBuilder::new().in_memory().build()).await;
    let beta = ProjectFixture::new("beta")
        .trace_in("s2", 1)
        .trace_in("s2", 5)
        .trace_in("s2", 10)
        .seed(&h.store)
        .await
        .unwrap();

    let receipt = h
        .lifecycle
        .clear_project(&ClearRequest::all(reference(beta.project)))
        .await
        .unwrap();

    assert_eq!(receipt.query.trace_count(beta.project).await.unwrap(), 0);
    assert!(!h.store.session_exists(beta.session("s2")).await.unwrap());
    assert!(receipt.query.project(beta.project).await.unwrap().is_some());
    assert_eq!(h.store.count_orphaned_sessions().await.unwrap(), 0);
}

#[tokio::test]
async fn test_end_time_is_exclusive() {
    let h = harness(TestConfigBuilder::new().in_memory().build()).await;
    let gamma = ProjectFixture::new("gamma")
        .trace(5)
        .trace(6)
        .seed(&h.store)
        .await
        .unwrap();

    h.lifecycle
        .clear_project(&ClearRequest::before(reference(gamma.project), at_second(6)))
        .await
        .unwrap();

    let remaining = h.store.list_traces(gamma.project).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].start_time, at_second(6));
}

#[tokio::test]
async fn test_sub_second_end_time_is_respected() {
    let h = harness(TestConfigBuilder::new().in_memory().build()).await;
    let gamma = ProjectFixture::new("gamma")
        .trace(5)
        .seed(&h.store)
        .await
        .unwrap();

    let just_after = at_second(5) + chrono::Duration::microseconds(1);
    h.lifecycle
        .clear_project(&ClearRequest::before(reference(gamma.project), just_after))
        .await
        .unwrap();

    assert_eq!(h.store.count_traces(gamma.project).await.unwrap(), 0);
}

#[tokio::test]
async fn test_nanosecond_end_time_is_respected() {
    let h = harness(TestConfigBuilder::new().in_memory().build()).await;
    let gamma = ProjectFixture::new("gamma")
        .trace(5)
        .trace(6)
        .seed(&h.store)
        .await
        .unwrap();

    let just_after = at_second(5) + chrono::Duration::nanoseconds(500);
    h.lifecycle
        .clear_project(&ClearRequest::before(reference(gamma.project), just_after))
        .await
        .unwrap();

    let remaining = h.store.list_traces(gamma.project).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].start_time, at_second(6));
}

#[tokio::test]
async fn test_clear_leaves_other_projects_alone() {
    let h = harness(TestConfigBuilder::new().in_memory().build()).await;
    let alpha = ProjectFixture::new("alpha")
        .trace_in("s1", 1)
        .seed(&h.store)
        .await
        .unwrap();
    let beta = ProjectFixture::new("beta")
        .trace_in("s1", 1)
        .trace(2)
        .seed(&h.store)
        .await
        .unwrap();

    h.lifecycle
        .clear_project(&ClearRequest::all(reference(alpha.project)))
        .await
        .unwrap();

    assert_eq!(h.store.count_traces(beta.project).await.unwrap(), 2);
    assert!(h.store.session_exists(beta.session("s1")).await.unwrap());
}

#[tokio::test]
async fn test_clearing_empty_or_missing_project_succeeds() {
    let h = harness(TestConfigBuilder::new().in_memory().build()).await;
    let empty = ProjectFixture::new("empty").seed(&h.store).await.unwrap();

    let receipt = h
        .lifecycle
        .clear_project(&ClearRequest::all(reference(empty.project)))
        .await
        .unwrap();
    assert_eq!(
        receipt.event,
        InvalidationEvent::ProjectCleared {
            project_key: empty.project,
            affected_session_keys: Vec::new(),
        }
    );

    assert!(
        h.lifecycle
            .clear_project(&ClearRequest::all(reference(ProjectKey(999))))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_small_chunks_still_remove_every_orphan() {
    let config = TestConfigBuilder::new()
        .in_memory()
        .with_chunk_size(2)
        .build();
    let h = harness(config).await;

    let mut fixture = ProjectFixture::new("delta");
    for (second, label) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
        fixture = fixture.trace_in(label, second as i64);
    }
    let delta = fixture.trace_in("f", 100).seed(&h.store).await.unwrap();

    let receipt = h
        .lifecycle
        .clear_project(&ClearRequest::before(reference(delta.project), at_second(50)))
        .await
        .unwrap();

    assert_eq!(h.store.count_orphaned_sessions().await.unwrap(), 0);
    assert_eq!(h.store.count_sessions(delta.project).await.unwrap(), 1);
    assert!(h.store.session_exists(delta.session("f")).await.unwrap());
    match receipt.event {
        InvalidationEvent::ProjectCleared {
            affected_session_keys,
            ..
        } => assert_eq!(affected_session_keys.len(), 5),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_explicit_cascade_matches_native_outcome() {
    let config = TestConfigBuilder::new()
        .in_memory()
        .with_explicit_cascade()
        .with_chunk_size(1)
        .build();
    let h = harness(config).await;
    let alpha = ProjectFixture::new("alpha")
        .session("idle")
        .trace_in("s1", 1)
        .trace_in("s2", 2)
        .trace(3)
        .spans_per_trace(3)
        .seed(&h.store)
        .await
        .unwrap();
    let beta = ProjectFixture::new("beta")
        .trace_in("s1", 1)
        .trace_in("s1", 9)
        .spans_per_trace(2)
        .seed(&h.store)
        .await
        .unwrap();

    h.lifecycle
        .delete_project(&reference(alpha.project))
        .await
        .unwrap();
    assert!(h.store.get_project(alpha.project).await.unwrap().is_none());
    assert_eq!(h.store.count_sessions(alpha.project).await.unwrap(), 0);
    assert_eq!(h.store.count_spans(alpha.project).await.unwrap(), 0);

    h.lifecycle
        .clear_project(&ClearRequest::before(reference(beta.project), at_second(5)))
        .await
        .unwrap();
    assert_eq!(h.store.count_traces(beta.project).await.unwrap(), 1);
    assert_eq!(h.store.count_spans(beta.project).await.unwrap(), 2);
    assert!(h.store.session_exists(beta.session("s1")).await.unwrap());
    assert_eq!(h.store.count_orphaned_sessions().await.unwrap(), 0);
}

#[tokio::test]
async fn test_wrong_kind_reference_is_rejected() {
    let h = harness(TestConfigBuilder::new().in_memory().build()).await;
    let alpha = ProjectFixture::new("alpha").trace(1).seed(&h.store).await.unwrap();

    let trace_ref = GlobalId::new(lifecycle::NodeKind::Trace, alpha.traces[0].0).encode();
    let err = h.lifecycle.delete_project(&trace_ref).await.unwrap_err();

    assert!(matches!(err, LifecycleError::InvalidReference(_)));
    assert!(h.store.get_project(alpha.project).await.unwrap().is_some());
}

#[tokio::test]
async fn test_committed_delete_is_durable_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = TestConfigBuilder::new()
        .with_sqlite_file_in(dir.path())
        .build();
    let h = harness(config.clone()).await;
    let alpha = ProjectFixture::new("alpha")
        .trace_in("s1", 1)
        .seed(&h.store)
        .await
        .unwrap();
    let beta = ProjectFixture::new("beta")
        .trace_in("s1", 1)
        .seed(&h.store)
        .await
        .unwrap();

    h.lifecycle
        .delete_project(&reference(alpha.project))
        .await
        .unwrap();
    h.store.close().await;

    let reopened = Store::new(&config.database.dsn).await.unwrap();
    assert!(reopened.get_project(alpha.project).await.unwrap().is_none());
    assert!(!reopened.session_exists(alpha.session("s1")).await.unwrap());
    assert_eq!(reopened.count_traces(beta.project).await.unwrap(), 1);
    reopened.close().await;
}

/// How the session-chunk step of an [`InterruptedStore`] goes wrong.
#[derive(Clone, Copy)]
enum Interruption {
    /// Never finishes the first chunk.
    Stall,
    /// Deletes the first chunk, then fails on the next one.
    FailSecondChunk,
}

/// Delegates to a real transaction but breaks off while deleting sessions.
struct InterruptedStore {
    inner: SqlProjectStore,
    interruption: Interruption,
}

struct InterruptedTransaction {
    inner: Box<dyn StoreTransaction>,
    interruption: Interruption,
    chunks: usize,
}

#[async_trait]
impl ProjectStore for InterruptedStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(InterruptedTransaction {
            inner: self.inner.begin().await?,
            interruption: self.interruption,
            chunks: 0,
        }))
    }
}

#[async_trait]
impl StoreTransaction for InterruptedTransaction {
    async fn load_project_name(
        &mut self,
        project: ProjectKey,
    ) -> Result<Option<String>, StoreError> {
        self.inner.load_project_name(project).await
    }

    async fn delete_project(&mut self, project: ProjectKey) -> Result<u64, StoreError> {
        self.inner.delete_project(project).await
    }

    async fn delete_traces(
        &mut self,
        project: ProjectKey,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<SessionKey>, StoreError> {
        self.inner.delete_traces(project, end_time).await
    }

    async fn delete_orphaned_sessions(
        &mut self,
        sessions: &[SessionKey],
    ) -> Result<u64, StoreError> {
        self.chunks += 1;
        match (self.interruption, self.chunks) {
            (Interruption::Stall, _) => std::future::pending().await,
            (Interruption::FailSecondChunk, 1) => {
                self.inner.delete_orphaned_sessions(sessions).await
            }
            (Interruption::FailSecondChunk, _) => {
                Err(StoreError::Database(sqlx::Error::WorkerCrashed))
            }
        }
    }

    async fn delete_spans(
        &mut self,
        project: ProjectKey,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<u64, StoreError> {
        self.inner.delete_spans(project, end_time).await
    }

    async fn delete_project_sessions(&mut self, project: ProjectKey) -> Result<u64, StoreError> {
        self.inner.delete_project_sessions(project).await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn test_cancelled_clear_rolls_back_and_publishes_nothing() {
    let config = TestConfigBuilder::new().in_memory().build();
    let store = Store::new(&config.database.dsn).await.unwrap();
    let consumer = invalidation_consumer().await;
    let lifecycle = ProjectLifecycle::new(
        InterruptedStore {
            inner: SqlProjectStore::new(store.clone(), 10_000),
            interruption: Interruption::Stall,
        },
        lifecycle::Query::new(store.clone()),
        Arc::new(QueuePublisher::new(consumer.clone())),
        (&config).into(),
    )
    .unwrap();

    let beta = ProjectFixture::new("beta")
        .trace_in("s2", 1)
        .trace_in("s2", 5)
        .seed(&store)
        .await
        .unwrap();

    let request = ClearRequest::all(reference(beta.project));
    let cancelled = timeout(Duration::from_millis(200), lifecycle.clear_project(&request)).await;
    assert!(cancelled.is_err(), "clear should still be pending");

    assert_eq!(store.count_traces(beta.project).await.unwrap(), 2);
    assert!(store.session_exists(beta.session("s2")).await.unwrap());
    assert_eq!(next_event(&consumer).await, None);
}

#[tokio::test]
async fn test_failure_between_session_chunks_leaves_data_untouched() {
    let config = TestConfigBuilder::new()
        .in_memory()
        .with_chunk_size(1)
        .build();
    let store = Store::new(&config.database.dsn).await.unwrap();
    let consumer = invalidation_consumer().await;
    let lifecycle = ProjectLifecycle::new(
        InterruptedStore {
            inner: SqlProjectStore::new(store.clone(), 1),
            interruption: Interruption::FailSecondChunk,
        },
        lifecycle::Query::new(store.clone()),
        Arc::new(QueuePublisher::new(consumer.clone())),
        (&config).into(),
    )
    .unwrap();

    let beta = ProjectFixture::new("beta")
        .trace_in("s2", 1)
        .trace_in("s3", 2)
        .seed(&store)
        .await
        .unwrap();

    let err = lifecycle
        .clear_project(&ClearRequest::all(reference(beta.project)))
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::StorageFault(_)));
    assert_eq!(store.count_traces(beta.project).await.unwrap(), 2);
    assert!(store.session_exists(beta.session("s2")).await.unwrap());
    assert!(store.session_exists(beta.session("s3")).await.unwrap());
    assert_eq!(next_event(&consumer).await, None);
}
