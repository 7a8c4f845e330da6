use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Deployment,
    Termination,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Deployment => "deployment",
            TaskKind::Termination => "termination",
        }
    }
}

/// Lower numeric value dispatches earlier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Priority {
    pub fn as_u64(&self) -> u64 {
        *self as u64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Recovered,
    Timeout,
    /// Reported when a dequeued task_id's blob is missing (see queue recovery docs).
    DataMissing,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeploymentPayload {
    pub user_id: String,
    pub competition_id: String,
    pub deployment_name: String,
    pub challenge_type: String,
    pub cdf_content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_role: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TerminationPayload {
    pub pod_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TaskPayload {
    Deployment(DeploymentPayload),
    Termination(TerminationPayload),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub task_id: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dequeued_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_task_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub kind: TaskKind,
    pub payload: TaskPayload,
    pub metadata: TaskMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Task {
    pub fn new(kind: TaskKind, payload: TaskPayload, task_id: String, priority: Priority, challenge_id: Option<String>) -> Self {
        Self {
            kind,
            payload,
            metadata: TaskMetadata {
                task_id,
                priority,
                status: TaskStatus::Queued,
                enqueued_at: Utc::now(),
                dequeued_at: None,
                completed_at: None,
                recovered_at: None,
                original_start_time: None,
                challenge_id,
                performance_task_id: None,
            },
            result: None,
        }
    }

    pub fn challenge_id(&self) -> Option<&str> {
        self.metadata.challenge_id.as_deref()
    }
}
