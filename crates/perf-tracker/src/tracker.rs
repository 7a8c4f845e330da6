use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

/// Times the phases of one deployment or termination, from enqueue to
/// completion. `start_phase` implicitly ends whatever phase is currently
/// open, mirroring how the orchestrator moves linearly through phases.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeploymentTracker {
    pub task_id: String,
    pub user_id: Option<String>,
    pub challenge_type: Option<String>,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub phases: HashMap<String, PhaseRecord>,
    pub metadata: HashMap<String, Value>,

    #[serde(skip)]
    current_phase: Option<String>,
    #[serde(skip)]
    current_phase_start: Option<f64>,
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs_f64()
}

impl DeploymentTracker {
    pub fn new(task_id: String, user_id: Option<String>, challenge_type: Option<String>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("created_at".to_string(), Value::String(Utc::now().to_rfc3339()));
        if let Some(user_id) = &user_id {
            metadata.insert("user_id".to_string(), Value::String(user_id.clone()));
        }
        if let Some(challenge_type) = &challenge_type {
            metadata.insert("challenge_type".to_string(), Value::String(challenge_type.clone()));
        }

        Self {
            task_id,
            user_id,
            challenge_type,
            start_time: now_secs(),
            end_time: None,
            phases: HashMap::new(),
            metadata,
            current_phase: None,
            current_phase_start: None,
        }
    }

    pub fn start_phase(&mut self, phase_name: &str) {
        if self.current_phase.is_some() {
            self.end_phase();
        }
        self.current_phase = Some(phase_name.to_string());
        self.current_phase_start = Some(now_secs());
    }

    pub fn end_phase(&mut self) -> f64 {
        let (Some(phase), Some(start)) = (self.current_phase.take(), self.current_phase_start.take()) else {
            return 0.0;
        };

        let end = now_secs();
        let duration = end - start;
        self.phases.insert(phase, PhaseRecord { start, end, duration });
        duration
    }

    pub fn add_tag(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    pub fn complete(&mut self) -> f64 {
        if self.current_phase.is_some() {
            self.end_phase();
        }
        let end_time = now_secs();
        self.end_time = Some(end_time);
        end_time - self.start_time
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.metadata.get("created_at").and_then(|v| v.as_str()).and_then(|s| s.parse().ok())
    }
}
