use serde::Serialize;
use serde_json::Value;
use shared::{AppError, RedisClient};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::registry::WorkerRegistry;
use crate::state_machine::WorkerStateMachine;

#[derive(Clone, Debug, Serialize)]
pub struct WorkerHealth {
    pub status: String,
    pub last_heartbeat: Option<chrono::DateTime<chrono::Utc>>,
    pub uptime_seconds: Option<i64>,
    pub seconds_since_heartbeat: Option<i64>,
    pub stale: Option<bool>,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub current_task: Option<String>,
}

/// Records liveness pings and periodically sweeps the registry for workers
/// that have gone quiet.
#[derive(Clone)]
pub struct HeartbeatMonitor {
    redis: RedisClient,
    registry: WorkerRegistry,
    state_machine: Arc<WorkerStateMachine>,
    heartbeat_timeout_secs: i64,
    check_interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(redis: RedisClient, registry: WorkerRegistry, state_machine: Arc<WorkerStateMachine>, heartbeat_timeout_secs: u64, check_interval_secs: u64) -> Self {
        Self {
            redis,
            registry,
            state_machine,
            heartbeat_timeout_secs: heartbeat_timeout_secs as i64,
            check_interval: Duration::from_secs(check_interval_secs),
        }
    }

    pub async fn send_heartbeat(&self, worker_id: &str, task_id: Option<String>, stats: HashMap<String, Value>) -> Result<(), AppError> {
        let heartbeat_key = format!("worker:heartbeat:{worker_id}");
        let payload = serde_json::json!({
            "timestamp": chrono::Utc::now().timestamp(),
            "task_id": task_id,
            "stats": stats,
        });
        let blob = serde_json::to_string(&payload)?;
        let ttl = (self.heartbeat_timeout_secs * 2).max(1) as u64;

        let _: () = self
            .redis
            .execute(move |mut conn| {
                let heartbeat_key = heartbeat_key.clone();
                let blob = blob.clone();
                async move { redis::cmd("SET").arg(&heartbeat_key).arg(&blob).arg("EX").arg(ttl).query_async(&mut conn).await }
            })
            .await?;

        self.registry.update_worker_heartbeat(worker_id, task_id).await?;
        Ok(())
    }

    pub async fn get_worker_health(&self, worker_id: &str) -> Result<Option<WorkerHealth>, AppError> {
        let Some(worker) = self.registry.get_worker(worker_id).await? else {
            return Ok(None);
        };

        let now = chrono::Utc::now();
        let uptime_seconds = Some((now - worker.start_time).num_seconds());
        let (seconds_since_heartbeat, stale) = match worker.last_heartbeat {
            Some(last) => {
                let elapsed = (now - last).num_seconds();
                (Some(elapsed), Some(elapsed > self.heartbeat_timeout_secs))
            }
            None => (None, None),
        };

        Ok(Some(WorkerHealth {
            status: worker.status.as_str().to_string(),
            last_heartbeat: worker.last_heartbeat,
            uptime_seconds,
            seconds_since_heartbeat,
            stale,
            tasks_processed: worker.tasks_processed,
            tasks_failed: worker.tasks_failed,
            current_task: worker.current_task_id,
        }))
    }

    /// Runs forever, sweeping stale workers at `check_interval`. Spawn with
    /// `tokio::spawn`.
    pub async fn run_health_checker(&self) {
        info!("started worker health checker");
        let mut ticker = tokio::time::interval(self.check_interval);
        loop {
            ticker.tick().await;

            match self.registry.detect_stale_workers().await {
                Ok(stale) if !stale.is_empty() => {
                    let ids: Vec<&str> = stale.iter().map(|w| w.worker_id.as_str()).collect();
                    warn!(count = stale.len(), workers = ?ids, "detected stale workers");

                    match self.state_machine.cleanup_stale_workers().await {
                        Ok(cleaned) => info!(cleaned, "cleaned up stale workers"),
                        Err(e) => error!(error = %e, "error cleaning up stale workers"),
                    }
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "error detecting stale workers"),
            }
        }
    }
}
