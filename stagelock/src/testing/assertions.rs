//! Assertions over stage statuses.

use crate::core::StageStatus;

/// Asserts that a stage is locked.
///
/// # Panics
///
/// Panics if the stage is unlocked.
pub fn assert_locked(status: &StageStatus) {
    assert!(status.is_locked(), "expected stage to be locked, got {status:?}");
    assert!(status.is_consistent(), "inconsistent status {status:?}");
}

/// Asserts that a stage is locked under `identifier`.
///
/// # Panics
///
/// Panics if the stage is unlocked or bound to another identifier.
pub fn assert_locked_as(status: &StageStatus, identifier: &str) {
    assert!(
        status.is_bound_to(identifier),
        "expected stage to be locked as {identifier}, got {status:?}"
    );
}

/// Asserts that a stage is unlocked and carries no identifier.
///
/// # Panics
///
/// Panics if the stage is locked.
pub fn assert_unlocked(status: &StageStatus) {
    assert!(!status.is_locked(), "expected stage to be unlocked, got {status:?}");
    assert!(status.identifier.is_none(), "unlocked stage kept {:?}", status.identifier);
}

/// Asserts that a stage is locked and its execution completed.
///
/// # Panics
///
/// Panics if the stage is unlocked or incomplete.
pub fn assert_completed(status: &StageStatus) {
    assert_locked(status);
    assert!(status.completed, "expected completed execution, got {status:?}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assertions_pass() {
        let locked = StageStatus::locked("prs-1", true);
        assert_completed(&locked);
        assert_locked_as(&locked, "prs-1");
        assert_unlocked(&StageStatus::unlocked());
    }

    #[test]
    #[should_panic(expected = "expected stage to be locked")]
    fn test_assert_locked_fails() {
        assert_locked(&StageStatus::unlocked());
    }
}
