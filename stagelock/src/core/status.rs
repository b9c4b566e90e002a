//! Stage lock state and the per-(run, stage) status record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::now_utc;

/// Whether a stage currently has an artifact bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// No artifact is bound.
    #[default]
    Unlocked,
    /// An artifact is bound and downstream stages may build on it.
    Locked,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlocked => write!(f, "unlocked"),
            Self::Locked => write!(f, "locked"),
        }
    }
}

/// Status of one stage within one run.
///
/// `identifier` is `Some` exactly when `state` is [`StageState::Locked`];
/// the constructors and transition methods keep that invariant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageStatus {
    /// Current lock state.
    pub state: StageState,
    /// Content-addressed id of the bound artifact.
    #[serde(default)]
    pub identifier: Option<String>,
    /// When the stage was last locked.
    #[serde(default)]
    pub locked_at: Option<DateTime<Utc>>,
    /// When the stage was last unlocked.
    #[serde(default)]
    pub unlocked_at: Option<DateTime<Utc>>,
    /// Whether the bound execution ran to completion.
    #[serde(default)]
    pub completed: bool,
    /// Message of the last execution fault, if any.
    #[serde(default)]
    pub error: Option<String>,
}

impl StageStatus {
    /// Creates an unlocked status.
    #[must_use]
    pub fn unlocked() -> Self {
        Self::default()
    }

    /// Creates a locked status bound to `identifier`.
    #[must_use]
    pub fn locked(identifier: impl Into<String>, completed: bool) -> Self {
        Self {
            state: StageState::Locked,
            identifier: Some(identifier.into()),
            locked_at: Some(now_utc()),
            unlocked_at: None,
            completed,
            error: None,
        }
    }

    /// Returns true if the stage is locked.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state == StageState::Locked
    }

    /// Returns true if the stage is locked under `identifier`.
    #[must_use]
    pub fn is_bound_to(&self, identifier: &str) -> bool {
        self.is_locked() && self.identifier.as_deref() == Some(identifier)
    }

    /// Transitions to unlocked, clearing the bound identifier.
    ///
    /// `locked_at` is kept as history.
    pub fn unlock(&mut self) {
        self.state = StageState::Unlocked;
        self.identifier = None;
        self.completed = false;
        self.unlocked_at = Some(now_utc());
    }

    /// Records an execution fault without touching the lock state.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Returns true if the identifier/state invariant holds.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.is_locked() == self.identifier.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unlocked() {
        let status = StageStatus::default();
        assert_eq!(status.state, StageState::Unlocked);
        assert!(status.identifier.is_none());
        assert!(status.is_consistent());
    }

    #[test]
    fn test_locked_then_unlock() {
        let mut status = StageStatus::locked("disc-abc", true);
        assert!(status.is_bound_to("disc-abc"));
        assert!(status.locked_at.is_some());

        status.unlock();
        assert!(!status.is_locked());
        assert!(status.identifier.is_none());
        assert!(status.unlocked_at.is_some());
        assert!(status.locked_at.is_some());
        assert!(status.is_consistent());
    }

    #[test]
    fn test_with_error_keeps_state() {
        let status = StageStatus::locked("prs-1", true).with_error("boom");
        assert!(status.is_locked());
        assert_eq!(status.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_status_serialization_roundtrip() {
        let status = StageStatus::locked("exp-42", false);
        let json = serde_json::to_string(&status).unwrap();
        let back: StageStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, back);
        assert!(json.contains(r#""state":"locked""#));
    }
}
