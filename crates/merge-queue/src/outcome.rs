//! Per-candidate outcomes of a merge cycle.

use serde::{Deserialize, Serialize};

/// Terminal bucket for a candidate within one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeBucket {
    /// Merged successfully.
    Merged,
    /// Rejected by validation before the pipeline ran.
    Unmergeable,
    /// Branch update or CI trigger failed.
    FailedUpdate,
    /// CI completed with a non-success conclusion.
    FailedCi,
    /// CI did not complete within the execution timeout.
    CiTimeout,
    /// The CI-start signal never arrived.
    CiStartupTimeout,
    /// The final merge step failed.
    FailedMerge,
}

impl OutcomeBucket {
    #[must_use]
    pub fn is_failure(self) -> bool {
        self != Self::Merged
    }
}

/// The outcome of one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub number: u64,
    pub bucket: OutcomeBucket,
    /// Human-readable reasons, present for validation failures.
    pub reasons: Vec<String>,
}

/// All outcomes of a cycle. Each candidate lands in exactly one bucket.
#[derive(Debug, Default, Clone)]
pub struct OutcomeSet {
    outcomes: Vec<Outcome>,
}

impl OutcomeSet {
    /// Record a candidate's terminal bucket. A candidate already recorded
    /// keeps its first outcome.
    pub fn record(&mut self, number: u64, bucket: OutcomeBucket, reasons: Vec<String>) {
        if self.outcomes.iter().any(|o| o.number == number) {
            debug_assert!(false, "candidate #{number} recorded twice");
            return;
        }
        self.outcomes.push(Outcome {
            number,
            bucket,
            reasons,
        });
    }

    /// Candidate numbers in the given bucket, in recording order.
    #[must_use]
    pub fn in_bucket(&self, bucket: OutcomeBucket) -> Vec<u64> {
        self.outcomes
            .iter()
            .filter(|o| o.bucket == bucket)
            .map(|o| o.number)
            .collect()
    }

    /// All failed outcomes, in recording order.
    #[must_use]
    pub fn failures(&self) -> Vec<&Outcome> {
        self.outcomes.iter().filter(|o| o.bucket.is_failure()).collect()
    }

    #[must_use]
    pub fn merged_count(&self) -> usize {
        self.in_bucket(OutcomeBucket::Merged).len()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failures().len()
    }

    /// Total candidates that reached any outcome.
    #[must_use]
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_candidate_lands_in_one_bucket() {
        let mut set = OutcomeSet::default();
        set.record(10, OutcomeBucket::Unmergeable, vec!["conflicts".to_string()]);
        set.record(20, OutcomeBucket::Merged, vec![]);
        set.record(30, OutcomeBucket::FailedCi, vec![]);

        assert_eq!(set.total(), 3);
        assert_eq!(set.merged_count(), 1);
        assert_eq!(set.failed_count(), 2);
        assert_eq!(set.in_bucket(OutcomeBucket::Unmergeable), vec![10]);
        assert_eq!(set.in_bucket(OutcomeBucket::Merged), vec![20]);
        assert_eq!(set.in_bucket(OutcomeBucket::FailedCi), vec![30]);
        assert_eq!(set.in_bucket(OutcomeBucket::CiTimeout), Vec::<u64>::new());
    }

    #[test]
    fn test_failures_excludes_merged() {
        let mut set = OutcomeSet::default();
        set.record(20, OutcomeBucket::Merged, vec![]);
        set.record(30, OutcomeBucket::FailedMerge, vec![]);
        let failures: Vec<u64> = set.failures().iter().map(|o| o.number).collect();
        assert_eq!(failures, vec![30]);
    }
}
