use lock_core::LockManager;
use shared::{AppError, RedisClient};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::worker::{Worker, WorkerStatus};

const WORKER_KEY_PREFIX: &str = "worker:registry:";
const WORKER_ID_SET: &str = "worker:ids";
const WORKER_LOCK_RESOURCE_PREFIX: &str = "worker";

/// Tracks every worker process across the fleet: identity, status, and
/// processing counters, all persisted in Redis so any process can query
/// or administer any worker.
#[derive(Clone)]
pub struct WorkerRegistry {
    redis: RedisClient,
    locks: LockManager,
    worker_expiry_secs: u64,
    heartbeat_timeout_secs: i64,
}

impl WorkerRegistry {
    pub fn new(redis: RedisClient, locks: LockManager, worker_expiry_secs: u64, heartbeat_timeout_secs: u64) -> Self {
        Self {
            redis,
            locks,
            worker_expiry_secs,
            heartbeat_timeout_secs: heartbeat_timeout_secs as i64,
        }
    }

    pub fn generate_worker_id(&self, queue_type: &str, hostname: &str, pid: u32) -> String {
        let random = Uuid::new_v4().simple().to_string()[..8].to_string();
        let timestamp = chrono::Utc::now().timestamp();
        format!("{queue_type}-{hostname}-{pid}-{random}-{timestamp}")
    }

    pub async fn register_worker(&self, queue_type: &str, hostname: &str, pid: u32) -> Result<Worker, AppError> {
        let worker_id = self.generate_worker_id(queue_type, hostname, pid);
        let worker = Worker::new(worker_id.clone(), queue_type.to_string(), hostname.to_string(), pid);

        let Some(mut lock) = self.locks.lock_resource(&format!("{WORKER_LOCK_RESOURCE_PREFIX}:{worker_id}"), true).await else {
            return Err(AppError::LockUnavailable(worker_id));
        };

        let result = self.put_worker(&worker).await;
        lock.release().await;
        result?;

        info!(worker_id = %worker_id, queue_type, "worker registered");
        Ok(worker)
    }

    async fn put_worker(&self, worker: &Worker) -> Result<(), AppError> {
        let key = format!("{WORKER_KEY_PREFIX}{}", worker.worker_id);
        let blob = serde_json::to_string(worker)?;
        let expiry = self.worker_expiry_secs;
        let worker_id = worker.worker_id.clone();

        self.redis
            .execute(move |mut conn| {
                let key = key.clone();
                let blob = blob.clone();
                let worker_id = worker_id.clone();
                async move {
                    redis::pipe()
                        .atomic()
                        .cmd("SET")
                        .arg(&key)
                        .arg(&blob)
                        .arg("EX")
                        .arg(expiry)
                        .cmd("SADD")
                        .arg(WORKER_ID_SET)
                        .arg(&worker_id)
                        .query_async::<()>(&mut conn)
                        .await
                }
            })
            .await
    }

    pub async fn update_worker(&self, worker: &Worker) -> Result<bool, AppError> {
        let Some(mut lock) = self
            .locks
            .lock_resource(&format!("{WORKER_LOCK_RESOURCE_PREFIX}:{}", worker.worker_id), true)
            .await
        else {
            return Err(AppError::LockUnavailable(worker.worker_id.clone()));
        };

        let key = format!("{WORKER_KEY_PREFIX}{}", worker.worker_id);
        let exists_key = key.clone();
        let exists: bool = self
            .redis
            .execute(move |mut conn| {
                let exists_key = exists_key.clone();
                async move { redis::cmd("EXISTS").arg(&exists_key).query_async(&mut conn).await }
            })
            .await?;

        if !exists {
            lock.release().await;
            warn!(worker_id = %worker.worker_id, "worker not found during update");
            return Ok(false);
        }

        let blob = serde_json::to_string(worker)?;
        let expiry = self.worker_expiry_secs;

        let result: Result<(), AppError> = self
            .redis
            .execute(move |mut conn| {
                let key = key.clone();
                let blob = blob.clone();
                async move { redis::cmd("SET").arg(&key).arg(&blob).arg("EX").arg(expiry).query_async(&mut conn).await }
            })
            .await;

        lock.release().await;
        result?;
        Ok(true)
    }

    pub async fn get_worker(&self, worker_id: &str) -> Result<Option<Worker>, AppError> {
        let key = format!("{WORKER_KEY_PREFIX}{worker_id}");
        let blob: Option<String> = self
            .redis
            .execute(move |mut conn| {
                let key = key.clone();
                async move { redis::cmd("GET").arg(&key).query_async(&mut conn).await }
            })
            .await?;

        match blob {
            Some(blob) => Ok(Some(serde_json::from_str(&blob)?)),
            None => Ok(None),
        }
    }

    pub async fn list_workers(&self, queue_type: Option<&str>) -> Result<Vec<Worker>, AppError> {
        let ids: Vec<String> = self
            .redis
            .execute(|mut conn| async move { redis::cmd("SMEMBERS").arg(WORKER_ID_SET).query_async(&mut conn).await })
            .await?;

        let mut workers = Vec::new();
        for id in ids {
            if let Some(worker) = self.get_worker(&id).await? {
                if queue_type.is_none_or(|qt| worker.queue_type == qt) {
                    workers.push(worker);
                }
            }
        }
        Ok(workers)
    }

    pub async fn count_active_workers(&self, queue_type: Option<&str>) -> Result<usize, AppError> {
        let workers = self.list_workers(queue_type).await?;
        Ok(workers.iter().filter(|w| w.status == WorkerStatus::Active).count())
    }

    pub async fn update_worker_status(&self, worker_id: &str, status: WorkerStatus) -> Result<bool, AppError> {
        let Some(mut worker) = self.get_worker(worker_id).await? else {
            warn!(worker_id, "worker not found for status update");
            return Ok(false);
        };
        worker.status = status;
        self.update_worker(&worker).await
    }

    pub async fn update_worker_heartbeat(&self, worker_id: &str, task_id: Option<String>) -> Result<bool, AppError> {
        let Some(mut worker) = self.get_worker(worker_id).await? else {
            warn!(worker_id, "worker not found for heartbeat");
            return Ok(false);
        };
        worker.last_heartbeat = Some(chrono::Utc::now());
        if task_id.is_some() {
            worker.current_task_id = task_id;
        }
        self.update_worker(&worker).await
    }

    pub async fn deregister_worker(&self, worker_id: &str) -> Result<bool, AppError> {
        let Some(mut lock) = self.locks.lock_resource(&format!("{WORKER_LOCK_RESOURCE_PREFIX}:{worker_id}"), true).await else {
            error!(worker_id, "failed to acquire lock for worker deregistration");
            return Ok(false);
        };

        let key = format!("{WORKER_KEY_PREFIX}{worker_id}");
        let worker_id_owned = worker_id.to_string();
        let result: Result<(), AppError> = self
            .redis
            .execute(move |mut conn| {
                let key = key.clone();
                let worker_id = worker_id_owned.clone();
                async move {
                    redis::pipe()
                        .atomic()
                        .cmd("DEL")
                        .arg(&key)
                        .cmd("SREM")
                        .arg(WORKER_ID_SET)
                        .arg(&worker_id)
                        .query_async::<()>(&mut conn)
                        .await
                }
            })
            .await;

        lock.release().await;
        result?;
        info!(worker_id, "worker deregistered");
        Ok(true)
    }

    pub async fn detect_stale_workers(&self) -> Result<Vec<Worker>, AppError> {
        let workers = self.list_workers(None).await?;
        Ok(workers.into_iter().filter(|w| w.is_stale(self.heartbeat_timeout_secs)).collect())
    }
}
