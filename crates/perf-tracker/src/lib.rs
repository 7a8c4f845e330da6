pub mod monitor;
pub mod phase;
pub mod tracker;

pub use monitor::{DurationStats, PerformanceMetrics, PerformanceMonitor};
pub use phase::Phase;
pub use tracker::{DeploymentTracker, PhaseRecord};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_tracking_accumulates_durations() {
        let mut tracker = DeploymentTracker::new("task-1".into(), Some("user-1".into()), Some("webos".into()));
        tracker.start_phase(Phase::Validation.as_str());
        std::thread::sleep(std::time::Duration::from_millis(5));
        let elapsed = tracker.end_phase();
        assert!(elapsed > 0.0);
        assert!(tracker.phases.contains_key(Phase::Validation.as_str()));
    }

    #[test]
    fn starting_a_new_phase_implicitly_closes_the_previous_one() {
        let mut tracker = DeploymentTracker::new("task-2".into(), None, None);
        tracker.start_phase(Phase::Validation.as_str());
        tracker.start_phase(Phase::Preparation.as_str());
        assert!(tracker.phases.contains_key(Phase::Validation.as_str()));
        tracker.complete();
        assert!(tracker.phases.contains_key(Phase::Preparation.as_str()));
        assert!(tracker.end_time.is_some());
    }
}
