//! SQLite-backed store tests.
//!
//! These mirror the PostgreSQL tests in store_integration.rs but run against
//! in-memory SQLite without Docker.

use chrono::{TimeZone, Utc};
use common::Store;
use common::model::SessionKey;

#[tokio::test]
async fn test_project_delete_cascades_to_dependents() {
    let store = Store::new_in_memory()
        .await
        .expect("Failed to create in-memory store");

    let project = store.insert_project("alpha").await.unwrap();
    let session = store.insert_session(project, "alpha-s1").await.unwrap();
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let trace = store
        .insert_trace(project, Some(session), "alpha-t1", ts)
        .await
        .unwrap();
    store.insert_span(trace, "span-1", "llm", ts).await.unwrap();

    let Store::Sqlite(pool) = &store else {
        panic!("expected a SQLite store");
    };
    sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(project.0)
        .execute(pool)
        .await
        .unwrap();

    assert_eq!(store.count_traces(project).await.unwrap(), 0);
    assert_eq!(store.count_spans(project).await.unwrap(), 0);
    assert!(!store.session_exists(session).await.unwrap());
}

#[tokio::test]
async fn test_trace_requires_existing_project() {
    let store = Store::new_in_memory().await.unwrap();
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let result = store
        .insert_trace(common::model::ProjectKey(42), None, "orphan", ts)
        .await;
    assert!(result.is_err(), "foreign keys must be enforced");
}

#[tokio::test]
async fn test_orphaned_sessions_are_counted() {
    let store = Store::new_in_memory().await.unwrap();
    let project = store.insert_project("alpha").await.unwrap();
    let used = store.insert_session(project, "alpha-used").await.unwrap();
    store.insert_session(project, "alpha-idle").await.unwrap();
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    store
        .insert_trace(project, Some(used), "alpha-t1", ts)
        .await
        .unwrap();

    assert_eq!(store.count_sessions(project).await.unwrap(), 2);
    assert_eq!(store.count_orphaned_sessions().await.unwrap(), 1);
    assert!(!store.session_exists(SessionKey(999)).await.unwrap());
}

#[tokio::test]
async fn test_find_project_by_name() {
    let store = Store::new_in_memory().await.unwrap();
    let key = store.insert_project("beta").await.unwrap();

    let found = store.find_project_by_name("beta").await.unwrap().unwrap();
    assert_eq!(found.id, key);
    assert!(store.find_project_by_name("gamma").await.unwrap().is_none());
}

#[tokio::test]
async fn test_file_backed_store_persists() {
    let dir = tempfile::tempdir().unwrap();
    let dsn = format!("sqlite://{}", dir.path().join("store.db").display());

    let store = Store::new(&dsn).await.unwrap();
    let key = store.insert_project("alpha").await.unwrap();
    store.close().await;

    let reopened = Store::new(&dsn).await.unwrap();
    assert_eq!(
        reopened.get_project(key).await.unwrap().map(|p| p.name),
        Some("alpha".to_string())
    );
    reopened.close().await;
}
