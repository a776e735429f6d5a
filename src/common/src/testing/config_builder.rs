//! Test configuration builder for creating test setups quickly.

use std::time::Duration;

use crate::config::{CascadeMode, Configuration, DatabaseConfig};

/// Builder for creating test configurations.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let config = TestConfigBuilder::new()
///     .in_memory()
///     .with_default_project("playground")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    /// Create a new test configuration builder.
    ///
    /// Publishing retries immediately so fault tests stay fast.
    pub fn new() -> Self {
        let mut config = Configuration::default();
        config.events.publish_backoff = Duration::ZERO;
        Self { config }
    }

    /// Use a private in-memory SQLite database.
    pub fn in_memory(mut self) -> Self {
        self.config.database = DatabaseConfig::in_memory();
        self
    }

    /// Set the database DSN.
    pub fn with_database_dsn(mut self, dsn: &str) -> Self {
        self.config.database.dsn = dsn.to_string();
        self
    }

    /// Use a file-backed SQLite database inside `dir`.
    ///
    /// Needed when more than one pooled connection must see the same data.
    pub fn with_sqlite_file_in(mut self, dir: &std::path::Path) -> Self {
        self.config.database.dsn = format!("sqlite://{}", dir.join("spanstore.db").display());
        self
    }

    /// Set the reserved default project name.
    pub fn with_default_project(mut self, name: &str) -> Self {
        self.config.projects.default_project_name = name.to_string();
        self
    }

    /// Set the session delete chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.config.projects.session_delete_chunk_size = size;
        self
    }

    /// Walk the hierarchy explicitly instead of relying on schema cascades.
    pub fn with_explicit_cascade(mut self) -> Self {
        self.config.projects.cascade = CascadeMode::Explicit;
        self
    }

    /// Set the number of enqueue attempts.
    pub fn with_publish_attempts(mut self, attempts: u32) -> Self {
        self.config.events.publish_attempts = attempts;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Configuration {
        self.config
    }
}
