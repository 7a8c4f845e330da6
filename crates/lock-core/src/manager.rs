use std::future::Future;

use shared::config::{Config, LockCategoryConfig};
use shared::RedisClient;
use tokio::time::Duration;

use crate::lock::DistributedLock;

/// Acquires and releases the distributed locks for each critical-section
/// category the orchestrator needs: per-challenge, per-queue, per-resource,
/// and per-operation.
#[derive(Clone)]
pub struct LockManager {
    redis: RedisClient,
    challenge_expire_secs: u64,
    deployment_expire_secs: u64,
    termination_expire_secs: u64,
    queue_lock: LockCategoryConfig,
    resource_lock: LockCategoryConfig,
    operation_lock: LockCategoryConfig,
    challenge_lock: LockCategoryConfig,
}

/// Distinguishes which challenge-lock timeout applies; `Other` uses the
/// default challenge-lock expiry.
pub enum ChallengeOperation {
    Deployment,
    Termination,
    Other,
}

impl LockManager {
    pub fn new(redis: RedisClient, config: &Config) -> Self {
        Self {
            redis,
            challenge_expire_secs: config.critical_section_timeout_secs,
            deployment_expire_secs: config.deployment_lock_timeout_secs,
            termination_expire_secs: config.termination_lock_timeout_secs,
            queue_lock: config.queue_lock.clone(),
            resource_lock: config.resource_lock.clone(),
            operation_lock: config.operation_lock.clone(),
            challenge_lock: config.challenge_lock.clone(),
        }
    }

    pub async fn lock_challenge(
        &self,
        challenge_id: &str,
        operation: ChallengeOperation,
        blocking: bool,
    ) -> Option<DistributedLock> {
        let expire_seconds = match operation {
            ChallengeOperation::Deployment => self.deployment_expire_secs,
            ChallengeOperation::Termination => self.termination_expire_secs,
            ChallengeOperation::Other => self.challenge_expire_secs,
        };

        let mut lock = DistributedLock::new(self.redis.clone(), "challenge_lock", challenge_id, expire_seconds);
        let retry_interval = Duration::from_millis(self.challenge_lock.retry_interval_ms);
        if lock.acquire(blocking, retry_interval, self.challenge_lock.retry_times).await {
            Some(lock)
        } else {
            None
        }
    }

    pub async fn lock_queue(&self, queue_name: &str, blocking: bool) -> Option<DistributedLock> {
        self.acquire_categorized("queue_lock", queue_name, &self.queue_lock, blocking).await
    }

    pub async fn lock_resource(&self, resource_name: &str, blocking: bool) -> Option<DistributedLock> {
        self.acquire_categorized("resource_lock", resource_name, &self.resource_lock, blocking)
            .await
    }

    pub async fn lock_operation(&self, operation_name: &str, blocking: bool) -> Option<DistributedLock> {
        let name = format!("operation:{operation_name}");
        self.acquire_categorized("operation_lock", &name, &self.operation_lock, blocking)
            .await
    }

    async fn acquire_categorized(
        &self,
        category_prefix: &str,
        resource_name: &str,
        category: &LockCategoryConfig,
        blocking: bool,
    ) -> Option<DistributedLock> {
        let mut lock = DistributedLock::new(
            self.redis.clone(),
            category_prefix,
            resource_name,
            category.expire_seconds,
        );
        let retry_interval = Duration::from_millis(category.retry_interval_ms);
        if lock.acquire(blocking, retry_interval, category.retry_times).await {
            Some(lock)
        } else {
            None
        }
    }
}

/// Runs `body` while holding the challenge lock for `challenge_id`, releasing
/// it unconditionally afterward. Returns `None` if the lock could not be
/// acquired.
pub async fn with_challenge_lock<F, Fut, T>(
    manager: &LockManager,
    challenge_id: &str,
    operation: ChallengeOperation,
    body: F,
) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let mut lock = manager.lock_challenge(challenge_id, operation, true).await?;
    let result = body().await;
    lock.release().await;
    Some(result)
}

pub async fn with_queue_lock<F, Fut, T>(manager: &LockManager, queue_name: &str, body: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let mut lock = manager.lock_queue(queue_name, true).await?;
    let result = body().await;
    lock.release().await;
    Some(result)
}

pub async fn with_resource_lock<F, Fut, T>(manager: &LockManager, resource_name: &str, body: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let mut lock = manager.lock_resource(resource_name, true).await?;
    let result = body().await;
    lock.release().await;
    Some(result)
}

pub async fn with_operation_lock<F, Fut, T>(manager: &LockManager, operation_name: &str, body: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let mut lock = manager.lock_operation(operation_name, true).await?;
    let result = body().await;
    lock.release().await;
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_category() -> LockCategoryConfig {
        LockCategoryConfig {
            expire_seconds: 30,
            retry_interval_ms: 10,
            retry_times: 3,
        }
    }

    #[test]
    fn category_config_clones_independently() {
        let a = sample_category();
        let b = a.clone();
        assert_eq!(a.expire_seconds, b.expire_seconds);
    }
}
