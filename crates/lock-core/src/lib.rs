pub mod lock;
pub mod manager;

pub use lock::DistributedLock;
pub use manager::{ChallengeOperation, LockManager, with_challenge_lock, with_operation_lock, with_queue_lock, with_resource_lock};
