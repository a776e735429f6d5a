use common::config::ProjectsConfig;

/// A deletion refused by policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Denied {
    #[error("Cannot delete the {0} project")]
    DefaultProject(String),
}

/// Policy checks run before any mutation is issued.
#[derive(Debug, Clone)]
pub struct GuardRules {
    default_project_name: String,
}

impl GuardRules {
    pub fn new(default_project_name: impl Into<String>) -> Self {
        Self {
            default_project_name: default_project_name.into(),
        }
    }

    pub fn default_project_name(&self) -> &str {
        &self.default_project_name
    }

    /// Decide whether the project named `name` may be deleted.
    ///
    /// Only the name is needed, so callers load nothing else.
    pub fn check_deletable(&self, name: &str) -> Result<(), Denied> {
        if name == self.default_project_name {
            return Err(Denied::DefaultProject(name.to_string()));
        }
        Ok(())
    }
}

impl From<&ProjectsConfig> for GuardRules {
    fn from(config: &ProjectsConfig) -> Self {
        Self::new(config.default_project_name.clone())
    }
}
