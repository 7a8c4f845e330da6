use std::collections::HashMap;

use chrono::Utc;
use lock_core::{ChallengeOperation, LockManager};
use serde::Serialize;
use serde_json::Value;
use shared::{AppError, RedisClient};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::task::{Priority, Task, TaskKind, TaskPayload, TaskStatus};

const MAX_AGE_SECONDS_DEFAULT: i64 = 300;

pub enum DequeueOutcome {
    Task(Task),
    /// The task_id was popped from pending but its blob was already gone,
    /// likely raced with an administrative clear.
    DataMissing(String),
    Empty,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PriorityCounts {
    pub high: i64,
    pub normal: i64,
    pub low: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueueStats {
    pub connected: bool,
    pub queued: i64,
    pub processing: i64,
    pub priority_counts: PriorityCounts,
    pub metrics: HashMap<String, i64>,
    /// Whether `connected` came from a fresh liveness check or a cached one.
    pub cache_fresh: bool,
    pub time_since_check: f64,
}

/// One of the two logical queues (deployment or termination), each backed by
/// its own sorted sets and metrics hash in Redis.
#[derive(Clone)]
pub struct PriorityQueue {
    redis: RedisClient,
    locks: LockManager,
    kind: TaskKind,
    queue_key: String,
    processing_key: String,
    metrics_key: String,
}

impl PriorityQueue {
    pub fn new(redis: RedisClient, locks: LockManager, kind: TaskKind) -> Self {
        let prefix = format!("challenge_{}", kind.as_str());
        Self {
            redis,
            locks,
            kind,
            queue_key: format!("{prefix}_queue"),
            processing_key: format!("{prefix}_processing"),
            metrics_key: format!("{prefix}_metrics"),
        }
    }

    fn blob_key(task_id: &str) -> String {
        format!("challenge_task:{task_id}")
    }

    fn composite_score(priority: Priority, enqueue_time: i64) -> f64 {
        (priority.as_u64() as f64) * 1_000_000_000.0 + enqueue_time as f64
    }

    pub async fn enqueue(
        &self,
        payload: TaskPayload,
        priority: Priority,
        task_id: Option<String>,
        challenge_id: Option<String>,
    ) -> Result<Option<String>, AppError> {
        if !self.redis.is_connected() {
            error!("cannot enqueue: redis connection not available");
            return Ok(None);
        }

        let operation = match self.kind {
            TaskKind::Deployment => ChallengeOperation::Deployment,
            TaskKind::Termination => ChallengeOperation::Termination,
        };

        let mut lock = match &challenge_id {
            Some(id) => self.locks.lock_challenge(id, operation, true).await,
            None => self.locks.lock_queue(self.kind.as_str(), true).await,
        };

        let Some(lock) = lock.as_mut() else {
            error!("failed to acquire lock during enqueue");
            return Ok(None);
        };

        let task_id = task_id.unwrap_or_else(|| {
            format!(
                "task_{}_{}",
                Utc::now().timestamp(),
                &Uuid::new_v4().simple().to_string()[..8]
            )
        });

        let task = Task::new(self.kind, payload, task_id.clone(), priority, challenge_id);
        let result = self.enqueue_locked(task).await;

        lock.release().await;
        result
    }

    async fn enqueue_locked(&self, task: Task) -> Result<Option<String>, AppError> {
        let task_id = task.metadata.task_id.clone();
        let score = Self::composite_score(task.metadata.priority, task.metadata.enqueued_at.timestamp());
        let blob = serde_json::to_string(&task)?;

        let blob_key = Self::blob_key(&task_id);
        let queue_key = self.queue_key.clone();
        let metrics_key = self.metrics_key.clone();
        let priority = task.metadata.priority;

        self.redis
            .execute(move |mut conn| {
                let blob_key = blob_key.clone();
                let queue_key = queue_key.clone();
                let metrics_key = metrics_key.clone();
                let blob = blob.clone();
                let task_id = task_id.clone();
                async move {
                    redis::pipe()
                        .atomic()
                        .cmd("SET")
                        .arg(&blob_key)
                        .arg(&blob)
                        .cmd("ZADD")
                        .arg(&queue_key)
                        .arg(score)
                        .arg(&task_id)
                        .cmd("HINCRBY")
                        .arg(&metrics_key)
                        .arg("total_enqueued")
                        .arg(1)
                        .cmd("HINCRBY")
                        .arg(&metrics_key)
                        .arg(format!("priority_{}_enqueued", priority.as_u64()))
                        .arg(1)
                        .query_async::<()>(&mut conn)
                        .await
                }
            })
            .await?;

        info!(task_id = %task.metadata.task_id, priority = priority.as_u64(), "enqueued task");
        Ok(Some(task.metadata.task_id))
    }

    pub async fn dequeue(&self) -> Result<DequeueOutcome, AppError> {
        if !self.redis.is_connected() {
            error!("cannot dequeue: redis connection not available");
            return Ok(DequeueOutcome::Empty);
        }

        let lock_name = format!("{}_dequeue", self.kind.as_str());
        let Some(mut lock) = self.locks.lock_queue(&lock_name, true).await else {
            error!("failed to acquire dequeue lock");
            return Ok(DequeueOutcome::Empty);
        };

        let result = self.dequeue_locked().await;
        lock.release().await;
        result
    }

    async fn dequeue_locked(&self) -> Result<DequeueOutcome, AppError> {
        let queue_key = self.queue_key.clone();

        let popped: Vec<String> = self
            .redis
            .execute(move |mut conn| {
                let queue_key = queue_key.clone();
                async move {
                    let ids: Vec<String> = redis::cmd("ZRANGE")
                        .arg(&queue_key)
                        .arg(0)
                        .arg(0)
                        .query_async(&mut conn)
                        .await?;
                    if !ids.is_empty() {
                        redis::cmd("ZREMRANGEBYRANK")
                            .arg(&queue_key)
                            .arg(0)
                            .arg(0)
                            .query_async::<()>(&mut conn)
                            .await?;
                    }
                    Ok(ids)
                }
            })
            .await?;

        let Some(task_id) = popped.into_iter().next() else {
            return Ok(DequeueOutcome::Empty);
        };

        let blob_key = Self::blob_key(&task_id);
        let blob: Option<String> = self
            .redis
            .execute(move |mut conn| {
                let blob_key = blob_key.clone();
                async move { redis::cmd("GET").arg(&blob_key).query_async(&mut conn).await }
            })
            .await?;

        let Some(blob) = blob else {
            warn!(task_id = %task_id, "task found in queue but blob is missing");
            return Ok(DequeueOutcome::DataMissing(task_id));
        };

        let mut task: Task = serde_json::from_str(&blob)?;
        task.metadata.status = TaskStatus::Processing;
        task.metadata.dequeued_at = Some(Utc::now());

        let blob_key = Self::blob_key(&task_id);
        let new_blob = serde_json::to_string(&task)?;
        let processing_key = self.processing_key.clone();
        let metrics_key = self.metrics_key.clone();
        let now_secs = Utc::now().timestamp();
        let priority = task.metadata.priority;
        let task_id_for_zadd = task_id.clone();

        self.redis
            .execute(move |mut conn| {
                let blob_key = blob_key.clone();
                let new_blob = new_blob.clone();
                let processing_key = processing_key.clone();
                let metrics_key = metrics_key.clone();
                let task_id = task_id_for_zadd.clone();
                async move {
                    redis::pipe()
                        .atomic()
                        .cmd("SET")
                        .arg(&blob_key)
                        .arg(&new_blob)
                        .cmd("ZADD")
                        .arg(&processing_key)
                        .arg(now_secs)
                        .arg(&task_id)
                        .cmd("HINCRBY")
                        .arg(&metrics_key)
                        .arg("total_dequeued")
                        .arg(1)
                        .cmd("HINCRBY")
                        .arg(&metrics_key)
                        .arg(format!("priority_{}_dequeued", priority.as_u64()))
                        .arg(1)
                        .query_async::<()>(&mut conn)
                        .await
                }
            })
            .await?;

        info!(task_id = %task_id, priority = priority.as_u64(), "dequeued task");
        Ok(DequeueOutcome::Task(task))
    }

    pub async fn complete_task(&self, task_id: &str, success: bool, result: Option<Value>) -> Result<bool, AppError> {
        if !self.redis.is_connected() {
            error!("cannot complete task: redis connection not available");
            return Ok(false);
        }

        let blob_key = Self::blob_key(task_id);
        let blob: Option<String> = self
            .redis
            .execute(move |mut conn| {
                let blob_key = blob_key.clone();
                async move { redis::cmd("GET").arg(&blob_key).query_async(&mut conn).await }
            })
            .await?;

        let Some(blob) = blob else {
            error!(task_id, "task not found");
            return Ok(false);
        };

        let mut task: Task = serde_json::from_str(&blob)?;

        let mut lock = match task.challenge_id() {
            Some(id) => self.locks.lock_challenge(id, ChallengeOperation::Other, true).await,
            None => self.locks.lock_resource(&format!("task:{task_id}"), true).await,
        };

        let Some(lock) = lock.as_mut() else {
            error!(task_id, "failed to acquire lock during complete_task");
            return Ok(false);
        };

        task.metadata.status = if success { TaskStatus::Completed } else { TaskStatus::Failed };
        task.metadata.completed_at = Some(Utc::now());
        if let Some(result) = result {
            task.result = Some(result);
        }

        let blob_key = Self::blob_key(task_id);
        let new_blob = serde_json::to_string(&task)?;
        let processing_key = self.processing_key.clone();
        let metrics_key = self.metrics_key.clone();
        let task_id_owned = task_id.to_string();

        let outcome = self
            .redis
            .execute(move |mut conn| {
                let blob_key = blob_key.clone();
                let new_blob = new_blob.clone();
                let processing_key = processing_key.clone();
                let metrics_key = metrics_key.clone();
                let task_id = task_id_owned.clone();
                async move {
                    redis::pipe()
                        .atomic()
                        .cmd("SET")
                        .arg(&blob_key)
                        .arg(&new_blob)
                        .cmd("ZREM")
                        .arg(&processing_key)
                        .arg(&task_id)
                        .cmd("HINCRBY")
                        .arg(&metrics_key)
                        .arg("total_completed")
                        .arg(1)
                        .cmd("HINCRBY")
                        .arg(&metrics_key)
                        .arg(if success { "successful_completions" } else { "failed_completions" })
                        .arg(1)
                        .query_async::<()>(&mut conn)
                        .await
                }
            })
            .await;

        lock.release().await;
        outcome?;

        info!(task_id, success, "completed task");
        Ok(true)
    }

    /// Re-enqueues tasks that have sat in the processing set longer than
    /// `max_age_seconds`, stamping them recovered and boosting their
    /// priority to HIGH.
    pub async fn recover_stalled_tasks(&self, max_age_seconds: Option<i64>) -> Result<u32, AppError> {
        let max_age = max_age_seconds.unwrap_or(MAX_AGE_SECONDS_DEFAULT);

        if !self.redis.is_connected() {
            error!("cannot recover stalled tasks: redis connection not available");
            return Ok(0);
        }

        let lock_name = format!("{}_recovery", self.kind.as_str());
        let Some(mut lock) = self.locks.lock_queue(&lock_name, true).await else {
            error!("failed to acquire lock for task recovery");
            return Ok(0);
        };

        let recovered = self.recover_stalled_locked(max_age).await;
        lock.release().await;
        recovered
    }

    async fn recover_stalled_locked(&self, max_age_seconds: i64) -> Result<u32, AppError> {
        let processing_key = self.processing_key.clone();
        let entries: Vec<(String, f64)> = self
            .redis
            .execute(move |mut conn| {
                let processing_key = processing_key.clone();
                async move {
                    redis::cmd("ZRANGE")
                        .arg(&processing_key)
                        .arg(0)
                        .arg(-1)
                        .arg("WITHSCORES")
                        .query_async(&mut conn)
                        .await
                }
            })
            .await?;

        let now = Utc::now().timestamp();
        let mut recovered_count = 0u32;

        for (task_id, start_time) in entries {
            let start_time = start_time as i64;
            if now - start_time <= max_age_seconds {
                continue;
            }

            let blob_key = Self::blob_key(&task_id);
            let blob: Option<String> = self
                .redis
                .execute(move |mut conn| {
                    let blob_key = blob_key.clone();
                    async move { redis::cmd("GET").arg(&blob_key).query_async(&mut conn).await }
                })
                .await?;

            let Some(blob) = blob else {
                self.remove_from_processing(&task_id).await?;
                continue;
            };

            let task_lock_name = format!("task_recovery:{task_id}");
            let Some(mut task_lock) = self.locks.lock_resource(&task_lock_name, true).await else {
                warn!(task_id, "skipping recovery: could not acquire task lock");
                continue;
            };

            let still_processing = self.is_still_processing(&task_id).await?;
            if !still_processing {
                task_lock.release().await;
                continue;
            }

            let mut task: Task = serde_json::from_str(&blob)?;
            task.metadata.status = TaskStatus::Recovered;
            task.metadata.recovered_at = Some(Utc::now());
            task.metadata.original_start_time = Some(start_time);
            task.metadata.priority = Priority::High;

            let new_blob = serde_json::to_string(&task)?;
            let score = Self::composite_score(Priority::High, Utc::now().timestamp());
            self.requeue_recovered(&task_id, &new_blob, score).await?;

            task_lock.release().await;
            recovered_count += 1;
            info!(task_id, stalled_for = now - start_time, "recovered stalled task");
        }

        Ok(recovered_count)
    }

    async fn remove_from_processing(&self, task_id: &str) -> Result<(), AppError> {
        let processing_key = self.processing_key.clone();
        let task_id = task_id.to_string();
        self.redis
            .execute(move |mut conn| {
                let processing_key = processing_key.clone();
                let task_id = task_id.clone();
                async move { redis::cmd("ZREM").arg(&processing_key).arg(&task_id).query_async::<()>(&mut conn).await }
            })
            .await
    }

    async fn is_still_processing(&self, task_id: &str) -> Result<bool, AppError> {
        let processing_key = self.processing_key.clone();
        let task_id = task_id.to_string();
        let score: Option<f64> = self
            .redis
            .execute(move |mut conn| {
                let processing_key = processing_key.clone();
                let task_id = task_id.clone();
                async move { redis::cmd("ZSCORE").arg(&processing_key).arg(&task_id).query_async(&mut conn).await }
            })
            .await?;
        Ok(score.is_some())
    }

    async fn requeue_recovered(&self, task_id: &str, blob: &str, score: f64) -> Result<(), AppError> {
        let blob_key = Self::blob_key(task_id);
        let queue_key = self.queue_key.clone();
        let processing_key = self.processing_key.clone();
        let metrics_key = self.metrics_key.clone();
        let task_id = task_id.to_string();
        let blob = blob.to_string();

        self.redis
            .execute(move |mut conn| {
                let blob_key = blob_key.clone();
                let queue_key = queue_key.clone();
                let processing_key = processing_key.clone();
                let metrics_key = metrics_key.clone();
                let task_id = task_id.clone();
                let blob = blob.clone();
                async move {
                    redis::pipe()
                        .atomic()
                        .cmd("SET")
                        .arg(&blob_key)
                        .arg(&blob)
                        .cmd("ZADD")
                        .arg(&queue_key)
                        .arg(score)
                        .arg(&task_id)
                        .cmd("ZREM")
                        .arg(&processing_key)
                        .arg(&task_id)
                        .cmd("HINCRBY")
                        .arg(&metrics_key)
                        .arg("total_recovered")
                        .arg(1)
                        .query_async::<()>(&mut conn)
                        .await
                }
            })
            .await
    }

    pub async fn clear_queue(&self) -> Result<bool, AppError> {
        if !self.redis.is_connected() {
            error!("cannot clear queue: redis connection not available");
            return Ok(false);
        }

        let lock_name = format!("{}_clear", self.kind.as_str());
        let Some(mut lock) = self.locks.lock_queue(&lock_name, true).await else {
            error!("failed to acquire lock for queue clear");
            return Ok(false);
        };

        let result = self.clear_queue_locked().await;
        lock.release().await;
        result?;
        warn!(kind = self.kind.as_str(), "challenge queue cleared");
        Ok(true)
    }

    async fn clear_queue_locked(&self) -> Result<(), AppError> {
        let queue_key = self.queue_key.clone();
        let processing_key = self.processing_key.clone();
        let metrics_key = self.metrics_key.clone();

        let (queued, processing): (Vec<String>, Vec<String>) = self
            .redis
            .execute(move |mut conn| {
                let queue_key = queue_key.clone();
                let processing_key = processing_key.clone();
                async move {
                    let queued: Vec<String> = redis::cmd("ZRANGE").arg(&queue_key).arg(0).arg(-1).query_async(&mut conn).await?;
                    let processing: Vec<String> =
                        redis::cmd("ZRANGE").arg(&processing_key).arg(0).arg(-1).query_async(&mut conn).await?;
                    Ok((queued, processing))
                }
            })
            .await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for task_id in queued.iter().chain(processing.iter()) {
            pipe.cmd("DEL").arg(Self::blob_key(task_id));
        }
        pipe.cmd("DEL").arg(&self.queue_key);
        pipe.cmd("DEL").arg(&self.processing_key);
        pipe.cmd("DEL").arg(&self.metrics_key);

        self.redis
            .execute(move |mut conn| {
                let pipe = pipe.clone();
                async move { pipe.query_async::<()>(&mut conn).await }
            })
            .await
    }

    pub async fn get_task_status(&self, task_id: &str) -> Result<Option<Task>, AppError> {
        let blob_key = Self::blob_key(task_id);
        let blob: Option<String> = self
            .redis
            .execute(move |mut conn| {
                let blob_key = blob_key.clone();
                async move { redis::cmd("GET").arg(&blob_key).query_async(&mut conn).await }
            })
            .await?;

        match blob {
            Some(blob) => Ok(Some(serde_json::from_str(&blob)?)),
            None => Ok(None),
        }
    }

    pub async fn get_queue_stats(&self) -> Result<QueueStats, AppError> {
        let (cache_fresh, time_since_check) = self.redis.cache_status();

        if !self.redis.is_connected() {
            return Ok(QueueStats {
                connected: false,
                queued: 0,
                processing: 0,
                priority_counts: PriorityCounts::default(),
                metrics: HashMap::new(),
                cache_fresh,
                time_since_check,
            });
        }

        let queue_key = self.queue_key.clone();
        let processing_key = self.processing_key.clone();
        let metrics_key = self.metrics_key.clone();

        let (queued, processing, high, normal, low, raw_metrics): (i64, i64, i64, i64, i64, HashMap<String, i64>) = self
            .redis
            .execute(move |mut conn| {
                let queue_key = queue_key.clone();
                let processing_key = processing_key.clone();
                let metrics_key = metrics_key.clone();
                async move {
                    let queued: i64 = redis::cmd("ZCARD").arg(&queue_key).query_async(&mut conn).await?;
                    let processing: i64 = redis::cmd("ZCARD").arg(&processing_key).query_async(&mut conn).await?;
                    let high: i64 = redis::cmd("ZCOUNT")
                        .arg(&queue_key)
                        .arg(1_000_000_000i64)
                        .arg(1_999_999_999i64)
                        .query_async(&mut conn)
                        .await?;
                    let normal: i64 = redis::cmd("ZCOUNT")
                        .arg(&queue_key)
                        .arg(2_000_000_000i64)
                        .arg(2_999_999_999i64)
                        .query_async(&mut conn)
                        .await?;
                    let low: i64 = redis::cmd("ZCOUNT")
                        .arg(&queue_key)
                        .arg(3_000_000_000i64)
                        .arg(3_999_999_999i64)
                        .query_async(&mut conn)
                        .await?;
                    let raw_metrics: HashMap<String, i64> = redis::cmd("HGETALL").arg(&metrics_key).query_async(&mut conn).await?;
                    Ok((queued, processing, high, normal, low, raw_metrics))
                }
            })
            .await?;

        Ok(QueueStats {
            connected: true,
            queued,
            processing,
            priority_counts: PriorityCounts { high, normal, low },
            metrics: raw_metrics,
            cache_fresh,
            time_since_check,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_sorts_before_lower_priority_regardless_of_enqueue_time() {
        let urgent_but_late = PriorityQueue::composite_score(Priority::High, 2_000_000_000);
        let normal_but_early = PriorityQueue::composite_score(Priority::Normal, 1);
        assert!(urgent_but_late < normal_but_early, "a High task enqueued later must still sort ahead of a Normal task enqueued earlier");
    }

    #[test]
    fn equal_priority_breaks_ties_by_enqueue_order() {
        let first = PriorityQueue::composite_score(Priority::Normal, 1_000);
        let second = PriorityQueue::composite_score(Priority::Normal, 2_000);
        assert!(first < second, "within the same priority, earlier enqueue_time must sort first");
    }

    #[test]
    fn blob_key_is_namespaced_per_task() {
        assert_eq!(PriorityQueue::blob_key("abc-123"), "challenge_task:abc-123");
    }
}
