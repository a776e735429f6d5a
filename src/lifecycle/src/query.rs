use common::Store;
use common::model::{Project, ProjectKey, Trace};

use crate::store::StoreError;

/// Read handle returned after a mutation so callers can re-query.
#[derive(Debug, Clone)]
pub struct Query {
    store: Store,
}

impl Query {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn project(&self, key: ProjectKey) -> Result<Option<Project>, StoreError> {
        Ok(self.store.get_project(key).await?)
    }

    pub async fn project_by_name(&self, name: &str) -> Result<Option<Project>, StoreError> {
        Ok(self.store.find_project_by_name(name).await?)
    }

    /// Remaining traces, oldest first.
    pub async fn traces(&self, key: ProjectKey) -> Result<Vec<Trace>, StoreError> {
        Ok(self.store.list_traces(key).await?)
    }

    pub async fn trace_count(&self, key: ProjectKey) -> Result<i64, StoreError> {
        Ok(self.store.count_traces(key).await?)
    }

    pub async fn session_count(&self, key: ProjectKey) -> Result<i64, StoreError> {
        Ok(self.store.count_sessions(key).await?)
    }

    pub async fn span_count(&self, key: ProjectKey) -> Result<i64, StoreError> {
        Ok(self.store.count_spans(key).await?)
    }
}
