pub mod heartbeat;
pub mod registry;
pub mod state_machine;
pub mod worker;

pub use heartbeat::{HeartbeatMonitor, WorkerHealth};
pub use registry::WorkerRegistry;
pub use state_machine::{StateTransitionRecord, WorkerStateMachine};
pub use worker::{Worker, WorkerStatus};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialized_worker_starts_in_initialized_state() {
        let worker = Worker::new("w1".into(), "deployment".into(), "host".into(), 1234);
        assert_eq!(worker.status, WorkerStatus::Initialized);
        assert!(!worker.is_stale(60));
    }

    #[test]
    fn stale_detection_uses_start_time_before_first_heartbeat() {
        let mut worker = Worker::new("w1".into(), "deployment".into(), "host".into(), 1234);
        worker.start_time = chrono::Utc::now() - chrono::Duration::seconds(120);
        assert!(worker.is_stale(60));
    }
}
