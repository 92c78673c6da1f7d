//! Session manager configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::error::{PreviewError, Result};

/// Tunables for [`PreviewSessions`](crate::session::PreviewSessions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Quiet period after the last edit before a document is recompiled.
    pub debounce: Duration,
    /// Maximum number of live sandbox instances across all documents.
    pub max_live_instances: usize,
    /// Number of compiled artifacts kept for reuse.
    pub compile_cache_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(200),
            max_live_instances: 8,
            compile_cache_capacity: 64,
        }
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_live_instances == 0 {
            return Err(PreviewError::Config("live instance cap must be at least 1".into()));
        }
        if self.compile_cache_capacity == 0 {
            return Err(PreviewError::Config("compile cache must hold at least 1 artifact".into()));
        }
        Ok(())
    }

    pub(crate) fn cache_capacity(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.compile_cache_capacity)
            .ok_or_else(|| PreviewError::Config("compile cache must hold at least 1 artifact".into()))
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    debounce: Option<Duration>,
    max_live_instances: Option<usize>,
    compile_cache_capacity: Option<usize>,
}

impl SessionConfigBuilder {
    /// Set the debounce quiet period. Zero flushes on the next turn of the loop.
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = Some(debounce);
        self
    }

    pub fn max_live_instances(mut self, cap: usize) -> Self {
        self.max_live_instances = Some(cap);
        self
    }

    pub fn compile_cache_capacity(mut self, capacity: usize) -> Self {
        self.compile_cache_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> SessionConfig {
        let default = SessionConfig::default();
        SessionConfig {
            debounce: self.debounce.unwrap_or(default.debounce),
            max_live_instances: self.max_live_instances.unwrap_or(default.max_live_instances),
            compile_cache_capacity: self
                .compile_cache_capacity
                .unwrap_or(default.compile_cache_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(200));
        assert_eq!(config.max_live_instances, 8);
        assert_eq!(config.compile_cache_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_overrides_and_validation() {
        let config = SessionConfig::builder()
            .debounce(Duration::from_millis(20))
            .max_live_instances(0)
            .build();
        assert_eq!(config.debounce, Duration::from_millis(20));
        assert!(matches!(config.validate(), Err(PreviewError::Config(_))));
    }
}
