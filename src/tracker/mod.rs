//! Failure Tracker: per-check consecutive-failure state machine
//!
//! ```text
//! Healthy ──fail──▶ Degrading (1..threshold-1) ──fail──▶ Failing
//!    ▲                   │                               │  ▲
//!    └──────success──────┘                 recovery ran  ▼  │ fail
//!    ▲                                             Recovering
//!    └────────────────────success──────────────────────┘
//! ```
//!
//! Each check's state lives in its own `DashMap` entry, so transitions for
//! one check are applied under that entry's lock and strictly ordered,
//! while different checks never contend. Nothing here awaits.

use dashmap::DashMap;
use std::collections::BTreeMap;
use tracing::warn;

use crate::config::defaults;
use crate::types::{CheckResult, CheckState, FailureState};

/// What a recorded result did to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Success while already healthy
    Unchanged,
    /// Failure below the threshold
    Degrading { failures: u32 },
    /// The threshold was just reached: open one alert, run one recovery
    ThresholdCrossed { failures: u32, episode: u64 },
    /// Failure while Failing or Recovering; the alert stays open
    StillFailing { failures: u32 },
    /// Success after any non-healthy state
    Recovered { from: CheckState, episode: u64 },
}

#[derive(Default)]
pub struct FailureTracker {
    states: DashMap<String, FailureState>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a check. Re-registering keeps existing state.
    pub fn register(&self, check: &str, failure_threshold: u32) {
        self.states
            .entry(check.to_string())
            .or_insert_with(|| FailureState::new(failure_threshold));
    }

    /// Apply one probe result
    pub fn record(&self, result: &CheckResult) -> Transition {
        let mut entry = self.states.entry(result.check.clone()).or_insert_with(|| {
            warn!(check = %result.check, "Result for untracked check, using default threshold");
            FailureState::new(defaults::FAILURE_THRESHOLD)
        });
        let fs = entry.value_mut();

        fs.total_probes += 1;
        fs.push_outcome(result.healthy);
        fs.last_result = Some(result.clone());

        if result.healthy {
            fs.consecutive_failures = 0;
            fs.last_success_at = Some(result.timestamp);
            let previous = fs.state;
            fs.state = CheckState::Healthy;
            return match previous {
                CheckState::Healthy => Transition::Unchanged,
                from => Transition::Recovered {
                    from,
                    episode: fs.episode,
                },
            };
        }

        fs.consecutive_failures = fs.consecutive_failures.saturating_add(1);
        fs.total_failures += 1;
        fs.last_failure_at = Some(result.timestamp);
        let failures = fs.consecutive_failures;

        match fs.state {
            CheckState::Healthy | CheckState::Degrading => {
                if failures >= fs.failure_threshold {
                    fs.state = CheckState::Failing;
                    fs.episode += 1;
                    Transition::ThresholdCrossed {
                        failures,
                        episode: fs.episode,
                    }
                } else {
                    fs.state = CheckState::Degrading;
                    Transition::Degrading { failures }
                }
            }
            CheckState::Failing | CheckState::Recovering => {
                fs.state = CheckState::Failing;
                Transition::StillFailing { failures }
            }
        }
    }

    /// Failing → Recovering after a recovery action succeeded.
    ///
    /// Returns false when the check has moved on (a success already landed).
    pub fn mark_recovering(&self, check: &str) -> bool {
        match self.states.get_mut(check) {
            Some(mut fs) if fs.state == CheckState::Failing => {
                fs.state = CheckState::Recovering;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, check: &str) -> Option<FailureState> {
        self.states.get(check).map(|fs| fs.clone())
    }

    pub fn state(&self, check: &str) -> Option<CheckState> {
        self.states.get(check).map(|fs| fs.state)
    }

    /// Copy of every check's state, ordered by name
    pub fn snapshot(&self) -> BTreeMap<String, FailureState> {
        self.states
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ok(check: &str) -> CheckResult {
        CheckResult::healthy(check, Duration::from_millis(3), "ok")
    }

    fn fail(check: &str) -> CheckResult {
        CheckResult::failed(check, Duration::from_millis(3), "connection refused")
    }

    #[test]
    fn test_threshold_crossed_exactly_once() {
        let tracker = FailureTracker::new();
        tracker.register("db-ping", 3);

        assert_eq!(tracker.record(&fail("db-ping")), Transition::Degrading { failures: 1 });
        assert_eq!(tracker.record(&fail("db-ping")), Transition::Degrading { failures: 2 });
        assert_eq!(
            tracker.record(&fail("db-ping")),
            Transition::ThresholdCrossed { failures: 3, episode: 1 }
        );
        assert_eq!(tracker.record(&fail("db-ping")), Transition::StillFailing { failures: 4 });
        assert_eq!(tracker.state("db-ping"), Some(CheckState::Failing));
    }

    #[test]
    fn test_below_threshold_recovers_without_episode() {
        let tracker = FailureTracker::new();
        tracker.register("api", 3);

        tracker.record(&fail("api"));
        tracker.record(&fail("api"));
        assert_eq!(
            tracker.record(&ok("api")),
            Transition::Recovered { from: CheckState::Degrading, episode: 0 }
        );
        let fs = tracker.get("api").unwrap();
        assert_eq!(fs.consecutive_failures, 0);
        assert_eq!(fs.episode, 0);
    }

    #[test]
    fn test_recovering_then_failure_returns_to_failing() {
        let tracker = FailureTracker::new();
        tracker.register("cache", 1);

        assert!(matches!(tracker.record(&fail("cache")), Transition::ThresholdCrossed { .. }));
        assert!(tracker.mark_recovering("cache"));
        assert_eq!(tracker.state("cache"), Some(CheckState::Recovering));

        assert_eq!(tracker.record(&fail("cache")), Transition::StillFailing { failures: 2 });
        assert_eq!(tracker.state("cache"), Some(CheckState::Failing));

        assert!(tracker.mark_recovering("cache"));
        assert_eq!(
            tracker.record(&ok("cache")),
            Transition::Recovered { from: CheckState::Recovering, episode: 1 }
        );
        assert_eq!(tracker.record(&ok("cache")), Transition::Unchanged);
    }

    #[test]
    fn test_mark_recovering_requires_failing() {
        let tracker = FailureTracker::new();
        tracker.register("api", 3);
        assert!(!tracker.mark_recovering("api"));
        assert!(!tracker.mark_recovering("unknown"));
    }

    #[test]
    fn test_second_episode_increments() {
        let tracker = FailureTracker::new();
        tracker.register("api", 2);
        tracker.record(&fail("api"));
        tracker.record(&fail("api"));
        tracker.record(&ok("api"));
        tracker.record(&fail("api"));
        assert_eq!(
            tracker.record(&fail("api")),
            Transition::ThresholdCrossed { failures: 2, episode: 2 }
        );
    }

    #[test]
    fn test_probe_statistics() {
        let tracker = FailureTracker::new();
        tracker.register("api", 5);
        tracker.record(&ok("api"));
        tracker.record(&fail("api"));
        tracker.record(&fail("api"));
        tracker.record(&ok("api"));

        let fs = tracker.get("api").unwrap();
        assert_eq!(fs.total_probes, 4);
        assert_eq!(fs.total_failures, 2);
        assert!(fs.last_success_at.is_some());
        assert!(fs.last_failure_at.is_some());
        assert!((fs.error_rate() - 0.5).abs() < f64::EPSILON);
    }
}
