use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::queue::QueueConfig;

/// Largest number of session ids bound into a single delete statement.
pub const DEFAULT_SESSION_DELETE_CHUNK_SIZE: usize = 10_000;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub dsn: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("sqlite://.data/spanstore.db"),
        }
    }
}

impl DatabaseConfig {
    /// Create an in-memory database configuration
    pub fn in_memory() -> Self {
        Self {
            dsn: String::from("sqlite::memory:"),
        }
    }
}

/// How dependent rows disappear when a project is deleted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeMode {
    /// Rely on `ON DELETE CASCADE` declared by the schema.
    #[default]
    Native,
    /// Walk spans, traces and sessions explicitly before removing the project.
    Explicit,
}

/// Project lifecycle policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectsConfig {
    /// Name of the reserved project that can never be deleted.
    ///
    /// Env: SPANSTORE__PROJECTS__DEFAULT_PROJECT_NAME
    #[serde(default = "default_project_name")]
    pub default_project_name: String,

    /// Maximum number of session ids bound per delete statement.
    ///
    /// Env: SPANSTORE__PROJECTS__SESSION_DELETE_CHUNK_SIZE
    #[serde(default = "default_session_delete_chunk_size")]
    pub session_delete_chunk_size: usize,

    /// Env: SPANSTORE__PROJECTS__CASCADE
    #[serde(default)]
    pub cascade: CascadeMode,
}

fn default_project_name() -> String {
    "default".to_string()
}

fn default_session_delete_chunk_size() -> usize {
    DEFAULT_SESSION_DELETE_CHUNK_SIZE
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            default_project_name: default_project_name(),
            session_delete_chunk_size: default_session_delete_chunk_size(),
            cascade: CascadeMode::default(),
        }
    }
}

/// Outbound invalidation event channel
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default)]
    pub queue: QueueConfig,

    /// Enqueue attempts before a publish fault is reported.
    ///
    /// Env: SPANSTORE__EVENTS__PUBLISH_ATTEMPTS
    #[serde(default = "default_publish_attempts")]
    pub publish_attempts: u32,

    /// Delay before the first retry; doubles after each further failure.
    ///
    /// Env: SPANSTORE__EVENTS__PUBLISH_BACKOFF
    #[serde(with = "humantime_serde", default = "default_publish_backoff")]
    pub publish_backoff: Duration,
}

fn default_publish_attempts() -> u32 {
    3
}

fn default_publish_backoff() -> Duration {
    Duration::from_millis(100)
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            publish_attempts: default_publish_attempts(),
            publish_backoff: default_publish_backoff(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Database holding projects, sessions, traces and spans
    pub database: DatabaseConfig,
    /// Project deletion and clearing policy
    #[serde(default)]
    pub projects: ProjectsConfig,
    /// Invalidation event publishing
    #[serde(default)]
    pub events: EventsConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file("spanstore.toml"))
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path))
    }

    fn figment(file: figment::providers::Data<Toml>) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed("SPANSTORE__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Checks:
    /// - Database DSN is set
    /// - Default project name is set
    /// - Session delete chunk size is positive
    /// - At least one publish attempt is made
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.dsn.is_empty() {
            anyhow::bail!("Database DSN cannot be empty");
        }

        if self.projects.default_project_name.trim().is_empty() {
            anyhow::bail!("default_project_name cannot be empty");
        }

        if self.projects.session_delete_chunk_size == 0 {
            anyhow::bail!(
                "session_delete_chunk_size must be positive, got {}",
                self.projects.session_delete_chunk_size
            );
        }

        if self.events.publish_attempts == 0 {
            anyhow::bail!(
                "publish_attempts must be positive, got {}",
                self.events.publish_attempts
            );
        }

        Ok(())
    }
}
