pub mod queue;
pub mod task;

pub use queue::{DequeueOutcome, PriorityCounts, PriorityQueue, QueueStats};
pub use task::{DeploymentPayload, Priority, Task, TaskKind, TaskMetadata, TaskPayload, TaskStatus, TerminationPayload};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_is_ascending_by_urgency() {
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
    }

    #[test]
    fn task_kind_labels_match_redis_key_prefixes() {
        assert_eq!(TaskKind::Deployment.as_str(), "deployment");
        assert_eq!(TaskKind::Termination.as_str(), "termination");
    }
}
