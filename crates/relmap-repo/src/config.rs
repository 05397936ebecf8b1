//! Repository configuration.

/// Configuration for [`Repository`](crate::Repository) behavior.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Re-fetch a record after insert or update so generated and
    /// database-computed columns are populated.
    pub reload_after_save: bool,
    /// Preload `autoload` associations after `find` / `find_all`.
    pub autoload: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            reload_after_save: true,
            autoload: true,
        }
    }
}

impl RepositoryConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `reload_after_save` (builder pattern).
    #[must_use]
    pub fn reload_after_save(mut self, value: bool) -> Self {
        self.reload_after_save = value;
        self
    }

    /// Set `autoload` (builder pattern).
    #[must_use]
    pub fn autoload(mut self, value: bool) -> Self {
        self.autoload = value;
        self
    }
}
