use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Transient state between `register_worker` returning and the first
    /// status update; not present as a distinct value in the upstream enum.
    Initialized,
    Idle,
    Active,
    Deployment,
    Termination,
    Paused,
    Failed,
    Stopped,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Initialized => "initialized",
            WorkerStatus::Idle => "idle",
            WorkerStatus::Active => "active",
            WorkerStatus::Deployment => "deployment",
            WorkerStatus::Termination => "termination",
            WorkerStatus::Paused => "paused",
            WorkerStatus::Failed => "failed",
            WorkerStatus::Stopped => "stopped",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: String,
    pub queue_type: String,
    pub hostname: String,
    pub pid: u32,
    pub status: WorkerStatus,
    pub start_time: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub current_task_id: Option<String>,
    pub cpu_usage: f64,
    pub memory_usage: u64,
    pub resource_allocation: HashMap<String, Value>,
    pub metadata: HashMap<String, Value>,
}

impl Worker {
    pub fn new(worker_id: String, queue_type: String, hostname: String, pid: u32) -> Self {
        Self {
            worker_id,
            queue_type,
            hostname,
            pid,
            status: WorkerStatus::Initialized,
            start_time: Utc::now(),
            last_heartbeat: None,
            tasks_processed: 0,
            tasks_failed: 0,
            current_task_id: None,
            cpu_usage: 0.0,
            memory_usage: 0,
            resource_allocation: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn is_stale(&self, heartbeat_timeout_secs: i64) -> bool {
        let reference = self.last_heartbeat.unwrap_or(self.start_time);
        (Utc::now() - reference).num_seconds() > heartbeat_timeout_secs
    }
}
