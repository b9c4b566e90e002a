//! Configuration types for the orchestrator and the job scheduler.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{Result, StagelockError};
use crate::utils::duration_to_millis_ceil;

/// Configuration for stage identity and orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Seed mixed into every content-addressed id.
    ///
    /// Changing it invalidates every cached artifact.
    #[serde(default = "default_seed")]
    pub seed: String,
    /// Number of hex characters kept from the digest.
    #[serde(default = "default_id_length")]
    pub id_length: usize,
}

fn default_seed() -> String {
    "stagelock".to_string()
}

fn default_id_length() -> usize {
    16
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            id_length: default_id_length(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a new orchestrator config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the identity seed.
    #[must_use]
    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = seed.into();
        self
    }

    /// Sets the identifier length in hex characters (clamped to 1..=64).
    #[must_use]
    pub fn with_id_length(mut self, length: usize) -> Self {
        self.id_length = length.clamp(1, 64);
        self
    }
}

/// Configuration for the job scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of jobs running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Retry budget for jobs that do not set their own.
    #[serde(default)]
    pub default_max_retries: u32,
    /// Deadline for jobs that do not set their own, in milliseconds.
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
    /// Whether admission starts paused.
    #[serde(default)]
    pub start_paused: bool,
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            default_max_retries: 0,
            default_timeout_ms: None,
            start_paused: false,
        }
    }
}

impl SchedulerConfig {
    /// Creates a new scheduler config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the concurrency cap (at least 1).
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Sets the default retry budget.
    #[must_use]
    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    /// Sets the default deadline.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = Some(duration_to_millis_ceil(timeout));
        self
    }

    /// Starts the scheduler with admission paused.
    #[must_use]
    pub fn paused(mut self) -> Self {
        self.start_paused = true;
        self
    }

    /// Returns the default deadline as a duration.
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

/// Top-level configuration for an engine instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Orchestrator settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| StagelockError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent == 0 {
            return Err(StagelockError::Config(
                "scheduler.max_concurrent must be at least 1".to_string(),
            ));
        }
        if !(1..=64).contains(&self.orchestrator.id_length) {
            return Err(StagelockError::Config(format!(
                "orchestrator.id_length must be within 1..=64, got {}",
                self.orchestrator.id_length
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.orchestrator.seed, "stagelock");
        assert_eq!(config.orchestrator.id_length, 16);
        assert_eq!(config.scheduler.max_concurrent, 4);
        assert_eq!(config.scheduler.default_max_retries, 0);
        assert!(config.scheduler.default_timeout().is_none());
        assert!(!config.scheduler.start_paused);
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json_str(
            r#"{"scheduler": {"max_concurrent": 2, "default_timeout_ms": 1500}}"#,
        )
        .unwrap();

        assert_eq!(config.scheduler.max_concurrent, 2);
        assert_eq!(
            config.scheduler.default_timeout(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(config.orchestrator, OrchestratorConfig::default());
    }

    #[test]
    fn test_from_json_rejects_zero_concurrency() {
        let err = EngineConfig::from_json_str(r#"{"scheduler": {"max_concurrent": 0}}"#)
            .unwrap_err();
        assert!(matches!(err, StagelockError::Config(_)));
    }

    #[test]
    fn test_builders_clamp() {
        assert_eq!(SchedulerConfig::new().with_max_concurrent(0).max_concurrent, 1);
        assert_eq!(OrchestratorConfig::new().with_id_length(500).id_length, 64);
    }
}
