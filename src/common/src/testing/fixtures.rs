//! Seed project hierarchies into a [`Store`].

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};

use crate::model::{ProjectKey, SessionKey, TraceKey};
use crate::store::Store;

/// Fixed reference instant plus `seconds`.
pub fn at_second(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .map(|base| base + chrono::Duration::seconds(seconds))
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
struct TraceSeed {
    session: Option<String>,
    start_second: i64,
    spans: usize,
}

/// Declarative description of one project and its contents.
///
/// Session labels and trace ids are prefixed with the project name, so
/// several fixtures can share a store.
#[derive(Debug, Clone)]
pub struct ProjectFixture {
    name: String,
    sessions: Vec<String>,
    traces: Vec<TraceSeed>,
}

/// Keys produced by [`ProjectFixture::seed`].
#[derive(Debug, Clone)]
pub struct SeededProject {
    pub project: ProjectKey,
    pub sessions: HashMap<String, SessionKey>,
    pub traces: Vec<TraceKey>,
}

impl SeededProject {
    /// Key of the session seeded under `label`.
    ///
    /// # Panics
    ///
    /// Panics when no session was declared under `label`.
    pub fn session(&self, label: &str) -> SessionKey {
        self.sessions[label]
    }
}

impl ProjectFixture {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sessions: Vec::new(),
            traces: Vec::new(),
        }
    }

    /// Declare a session; traces refer to it by `label`.
    pub fn session(mut self, label: &str) -> Self {
        self.sessions.push(label.to_string());
        self
    }

    /// Add a sessionless trace starting at `start_second`.
    pub fn trace(mut self, start_second: i64) -> Self {
        self.traces.push(TraceSeed {
            session: None,
            start_second,
            spans: 1,
        });
        self
    }

    /// Add a trace grouped into the session declared under `label`.
    pub fn trace_in(mut self, label: &str, start_second: i64) -> Self {
        if !self.sessions.iter().any(|s| s == label) {
            self.sessions.push(label.to_string());
        }
        self.traces.push(TraceSeed {
            session: Some(label.to_string()),
            start_second,
            spans: 1,
        });
        self
    }

    /// Number of spans written under every trace added so far.
    pub fn spans_per_trace(mut self, spans: usize) -> Self {
        for trace in &mut self.traces {
            trace.spans = spans;
        }
        self
    }

    /// Insert the project, its sessions, traces and spans.
    pub async fn seed(self, store: &Store) -> Result<SeededProject, sqlx::Error> {
        let project = store.insert_project(&self.name).await?;

        let mut sessions = HashMap::with_capacity(self.sessions.len());
        for label in &self.sessions {
            let key = store
                .insert_session(project, &format!("{}-{label}", self.name))
                .await?;
            sessions.insert(label.clone(), key);
        }

        let mut traces = Vec::with_capacity(self.traces.len());
        for (index, seed) in self.traces.iter().enumerate() {
            let session = seed.session.as_ref().map(|label| sessions[label]);
            let start_time = at_second(seed.start_second);
            let trace = store
                .insert_trace(
                    project,
                    session,
                    &format!("{}-trace-{index}", self.name),
                    start_time,
                )
                .await?;
            for span in 0..seed.spans {
                store
                    .insert_span(trace, &format!("{index}-{span}"), "llm", start_time)
                    .await?;
            }
            traces.push(trace);
        }

        Ok(SeededProject {
            project,
            sessions,
            traces,
        })
    }
}
