//! Runtime configuration for a merge-queue cycle.
//!
//! Built once at startup from CLI arguments / environment and passed by
//! reference; never re-read mid-cycle.

use tracing::warn;

/// Default approval timeout in minutes.
const DEFAULT_APPROVAL_TIMEOUT_MINUTES: u64 = 60;

/// Default approval reminder cadence in minutes.
const DEFAULT_REMINDER_INTERVAL_MINUTES: u64 = 15;

/// Configuration for one orchestrator run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Repository in `owner/repo` form.
    pub repository: String,
    /// The integration branch all candidates must target.
    pub default_branch: String,
    /// Team whose members may approve or reject a run.
    pub approver_team: String,
    /// Workflow name the CI listener is expected to start.
    pub required_ci_check: String,
    /// Workflow file of the orchestrator itself, for the competing-run check.
    pub workflow_file: String,
    /// Maximum seconds to wait for CI completion.
    pub max_wait_seconds: u64,
    /// Seconds between CI completion polls.
    pub check_interval: u64,
    /// Maximum seconds to wait for the CI-start signal.
    pub max_startup_wait: u64,
    /// Minutes before the approval request times out.
    pub approval_timeout_minutes: u64,
    /// Minutes between approval reminders.
    pub approval_reminder_interval_minutes: u64,
    /// Seconds to let the platform converge after each merge.
    pub post_merge_settle: u64,
}

impl Config {
    /// Organization part of the repository.
    #[must_use]
    pub fn org(&self) -> &str {
        self.repository.split('/').next().unwrap_or("")
    }

    /// Replace non-positive approval timings with their defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.approval_timeout_minutes == 0 {
            warn!(
                "invalid approval timeout 0, using default {}",
                DEFAULT_APPROVAL_TIMEOUT_MINUTES
            );
            self.approval_timeout_minutes = DEFAULT_APPROVAL_TIMEOUT_MINUTES;
        }
        if self.approval_reminder_interval_minutes == 0 {
            warn!(
                "invalid reminder interval 0, using default {}",
                DEFAULT_REMINDER_INTERVAL_MINUTES
            );
            self.approval_reminder_interval_minutes = DEFAULT_REMINDER_INTERVAL_MINUTES;
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repository: String::new(),
            default_branch: "main".to_string(),
            approver_team: "merge-approvals".to_string(),
            required_ci_check: "run-tests".to_string(),
            workflow_file: "merge_queue.yaml".to_string(),
            max_wait_seconds: 2700,
            check_interval: 30,
            max_startup_wait: 300,
            approval_timeout_minutes: DEFAULT_APPROVAL_TIMEOUT_MINUTES,
            approval_reminder_interval_minutes: DEFAULT_REMINDER_INTERVAL_MINUTES,
            post_merge_settle: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_org_from_repository() {
        let config = Config {
            repository: "5dlabs/demo".to_string(),
            ..Config::default()
        };
        assert_eq!(config.org(), "5dlabs");
    }

    #[test]
    fn test_normalized_restores_defaults_for_zero_timings() {
        let config = Config {
            approval_timeout_minutes: 0,
            approval_reminder_interval_minutes: 0,
            ..Config::default()
        }
        .normalized();
        assert_eq!(config.approval_timeout_minutes, 60);
        assert_eq!(config.approval_reminder_interval_minutes, 15);
    }

    #[test]
    fn test_normalized_keeps_explicit_values() {
        let config = Config {
            approval_timeout_minutes: 90,
            approval_reminder_interval_minutes: 5,
            ..Config::default()
        }
        .normalized();
        assert_eq!(config.approval_timeout_minutes, 90);
        assert_eq!(config.approval_reminder_interval_minutes, 5);
    }
}
