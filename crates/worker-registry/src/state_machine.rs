use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::AppError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::registry::WorkerRegistry;
use crate::worker::{Worker, WorkerStatus};

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type TransitionHandler = Arc<dyn Fn(Worker) -> HandlerFuture + Send + Sync>;

const MAX_STATE_HISTORY: isize = 50;

fn allowed_transitions(from: WorkerStatus) -> &'static [WorkerStatus] {
    use WorkerStatus::*;
    match from {
        Initialized => &[Idle, Active, Paused, Stopped, Failed, Deployment, Termination],
        Idle => &[Active, Paused, Stopped, Failed, Deployment, Termination],
        Active => &[Idle, Paused, Stopped, Failed],
        Paused => &[Idle, Active, Stopped, Failed],
        Stopped => &[Failed],
        Failed => &[],
        Deployment => &[Idle, Active, Failed, Stopped],
        Termination => &[Idle, Active, Failed, Stopped],
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateTransitionRecord {
    pub worker_id: String,
    pub from_state: String,
    pub to_state: String,
    pub timestamp: chrono::DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Governs valid worker status transitions, recording each one to a
/// bounded, TTL'd history alongside updating the registry's own status
/// field.
#[derive(Clone)]
pub struct WorkerStateMachine {
    registry: WorkerRegistry,
    redis: shared::RedisClient,
    handlers: Arc<RwLock<HashMap<(WorkerStatus, WorkerStatus), TransitionHandler>>>,
}

impl WorkerStateMachine {
    pub fn new(registry: WorkerRegistry, redis: shared::RedisClient) -> Self {
        Self { registry, redis, handlers: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Registers a callback to run after a `from -> to` transition commits.
    /// Only one handler per transition pair is kept; registering again
    /// replaces it.
    pub async fn register_transition_handler<F, Fut>(&self, from: WorkerStatus, to: WorkerStatus, handler: F)
    where
        F: Fn(Worker) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: TransitionHandler = Arc::new(move |worker| Box::pin(handler(worker)));
        self.handlers.write().await.insert((from, to), boxed);
    }

    pub async fn transition(
        &self,
        worker_id: &str,
        new_state: WorkerStatus,
        metadata: HashMap<String, Value>,
    ) -> Result<bool, AppError> {
        let Some(worker) = self.registry.get_worker(worker_id).await? else {
            return Ok(false);
        };

        let current_state = worker.status;
        if !allowed_transitions(current_state).contains(&new_state) {
            return Err(AppError::StateTransitionError {
                from: current_state.as_str().to_string(),
                to: new_state.as_str().to_string(),
            });
        }

        let record = StateTransitionRecord {
            worker_id: worker_id.to_string(),
            from_state: current_state.as_str().to_string(),
            to_state: new_state.as_str().to_string(),
            timestamp: Utc::now(),
            metadata,
        };
        self.record_transition(worker_id, &record).await?;

        let updated = self.registry.update_worker_status(worker_id, new_state).await?;
        if updated {
            info!(worker_id, from = current_state.as_str(), to = new_state.as_str(), "worker transitioned");
            self.run_transition_handler(worker_id, &worker, current_state, new_state).await;
        }
        Ok(updated)
    }

    /// Invokes the registered handler, if any, for this transition pair.
    /// Runs on a detached task so a panicking handler can't poison the
    /// caller; failures are logged, never rolled back.
    async fn run_transition_handler(&self, worker_id: &str, worker: &Worker, from: WorkerStatus, to: WorkerStatus) {
        let handler = { self.handlers.read().await.get(&(from, to)).cloned() };
        let Some(handler) = handler else { return };

        let mut transitioned = worker.clone();
        transitioned.status = to;

        if let Err(e) = tokio::spawn(async move { handler(transitioned).await }).await {
            error!(worker_id, from = from.as_str(), to = to.as_str(), error = %e, "transition handler panicked");
        }
    }

    async fn record_transition(&self, worker_id: &str, record: &StateTransitionRecord) -> Result<(), AppError> {
        let blob = serde_json::to_string(record)?;
        let transition_key = format!("worker:state_transition:{worker_id}:{}", Utc::now().timestamp());
        let history_key = format!("worker:state_history:{worker_id}");

        self.redis
            .execute(move |mut conn| {
                let blob = blob.clone();
                let transition_key = transition_key.clone();
                let history_key = history_key.clone();
                async move {
                    redis::pipe()
                        .atomic()
                        .cmd("SET")
                        .arg(&transition_key)
                        .arg(&blob)
                        .arg("EX")
                        .arg(86400)
                        .cmd("LPUSH")
                        .arg(&history_key)
                        .arg(&blob)
                        .cmd("LTRIM")
                        .arg(&history_key)
                        .arg(0)
                        .arg(MAX_STATE_HISTORY - 1)
                        .cmd("EXPIRE")
                        .arg(&history_key)
                        .arg(86400)
                        .query_async::<()>(&mut conn)
                        .await
                }
            })
            .await
    }

    pub async fn get_state_history(&self, worker_id: &str, limit: isize) -> Result<Vec<StateTransitionRecord>, AppError> {
        let history_key = format!("worker:state_history:{worker_id}");
        let raw: Vec<String> = self
            .redis
            .execute(move |mut conn| {
                let history_key = history_key.clone();
                async move { redis::cmd("LRANGE").arg(&history_key).arg(0).arg(limit - 1).query_async(&mut conn).await }
            })
            .await?;

        Ok(raw.into_iter().filter_map(|item| serde_json::from_str(&item).ok()).collect())
    }

    /// Pauses a worker, falling back through `Idle` when the worker is
    /// `Active` and a direct `Active -> Paused` transition isn't permitted.
    pub async fn pause_worker(&self, worker_id: &str, reason: Option<String>) -> Result<bool, AppError> {
        let metadata = reason_metadata(reason);
        match self.transition(worker_id, WorkerStatus::Paused, metadata.clone()).await {
            Ok(result) => Ok(result),
            Err(AppError::StateTransitionError { .. }) => {
                let Some(worker) = self.registry.get_worker(worker_id).await? else {
                    return Ok(false);
                };
                if worker.status != WorkerStatus::Active {
                    return Ok(false);
                }
                let mut transitioning = HashMap::new();
                transitioning.insert("reason".to_string(), Value::String("transitioning to paused".to_string()));
                if self.transition(worker_id, WorkerStatus::Idle, transitioning).await? {
                    self.transition(worker_id, WorkerStatus::Paused, metadata).await
                } else {
                    Ok(false)
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn resume_worker(&self, worker_id: &str) -> Result<bool, AppError> {
        let Some(worker) = self.registry.get_worker(worker_id).await? else {
            return Ok(false);
        };
        if worker.status != WorkerStatus::Paused {
            return Ok(false);
        }
        let mut metadata = HashMap::new();
        metadata.insert("reason".to_string(), Value::String("resumed".to_string()));
        self.transition(worker_id, WorkerStatus::Idle, metadata).await
    }

    pub async fn stop_worker(&self, worker_id: &str, reason: Option<String>) -> Result<bool, AppError> {
        match self.transition(worker_id, WorkerStatus::Stopped, reason_metadata(reason)).await {
            Ok(result) => Ok(result),
            Err(AppError::StateTransitionError { from, to }) => {
                error!(worker_id, from, to, "cannot stop worker from this state");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn mark_worker_failed(&self, worker_id: &str, error: Option<String>) -> Result<bool, AppError> {
        let metadata = error.map(|e| {
            let mut m = HashMap::new();
            m.insert("error".to_string(), Value::String(e));
            m
        }).unwrap_or_default();

        match self.transition(worker_id, WorkerStatus::Failed, metadata).await {
            Ok(result) => Ok(result),
            Err(AppError::StateTransitionError { from, to }) => {
                error!(worker_id, from, to, "cannot mark worker failed from this state");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Sweeps workers whose heartbeat has gone quiet, transitioning each to
    /// `Failed` through the normal validated path (so the failure lands in
    /// state history) before deregistering it.
    pub async fn cleanup_stale_workers(&self) -> Result<usize, AppError> {
        let stale = self.registry.detect_stale_workers().await?;
        let mut count = 0;

        for worker in stale {
            let mut metadata = HashMap::new();
            metadata.insert("reason".to_string(), Value::String("heartbeat stale".to_string()));

            match self.transition(&worker.worker_id, WorkerStatus::Failed, metadata).await {
                Ok(_) => {}
                Err(AppError::StateTransitionError { from, to }) => {
                    warn!(worker_id = %worker.worker_id, from, to, "stale worker already terminal, skipping failed transition");
                }
                Err(e) => return Err(e),
            }

            if self.registry.deregister_worker(&worker.worker_id).await? {
                count += 1;
            }
        }

        if count > 0 {
            info!(count, "cleaned up stale workers");
        }
        Ok(count)
    }
}

fn reason_metadata(reason: Option<String>) -> HashMap<String, Value> {
    let mut metadata = HashMap::new();
    if let Some(reason) = reason {
        metadata.insert("reason".to_string(), Value::String(reason));
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_is_terminal() {
        assert!(allowed_transitions(WorkerStatus::Failed).is_empty());
    }

    #[test]
    fn stopped_can_only_move_to_failed() {
        assert_eq!(allowed_transitions(WorkerStatus::Stopped), &[WorkerStatus::Failed]);
    }

    #[tokio::test]
    async fn registering_a_handler_twice_for_the_same_pair_replaces_it() {
        let handlers: Arc<RwLock<HashMap<(WorkerStatus, WorkerStatus), TransitionHandler>>> = Arc::new(RwLock::new(HashMap::new()));

        let first: TransitionHandler = Arc::new(|_worker| Box::pin(async {}));
        let second: TransitionHandler = Arc::new(|_worker| Box::pin(async {}));

        handlers.write().await.insert((WorkerStatus::Idle, WorkerStatus::Active), first);
        handlers.write().await.insert((WorkerStatus::Idle, WorkerStatus::Active), second);

        assert_eq!(handlers.read().await.len(), 1);
    }
}
