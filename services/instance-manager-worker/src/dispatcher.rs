use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use queue_core::{DequeueOutcome, PriorityQueue, TaskKind, TaskPayload};
use shared::AppError;
use tokio::time::sleep;
use tracing::{error, info, warn};
use worker_registry::WorkerStatus;

use crate::context::WorkerContext;
use crate::{deploy, terminate};

const MAX_BACKOFF: Duration = Duration::from_millis(500);
const MIN_BACKOFF: Duration = Duration::from_millis(50);
const PAUSE_POLL: Duration = Duration::from_secs(1);

/// Runs one worker's dispatch loop for a single queue kind: registers,
/// recovers stalled tasks once, then polls forever until the registry
/// marks it stopped or failed.
pub async fn run(ctx: Arc<WorkerContext>, kind: TaskKind, hostname: String) -> Result<(), AppError> {
    let worker = ctx.registry.register_worker(kind.as_str(), &hostname, std::process::id()).await?;
    let worker_id = worker.worker_id.clone();
    info!(worker_id, kind = kind.as_str(), "dispatcher starting");

    ctx.state_machine.transition(&worker_id, WorkerStatus::Idle, HashMap::new()).await?;

    let queue = queue_for(&ctx, kind);
    if let Ok(recovered) = queue.recover_stalled_tasks(None).await {
        if recovered > 0 {
            info!(worker_id, recovered, "recovered stalled tasks at startup");
        }
    }

    let mut backoff = MIN_BACKOFF;

    loop {
        let Some(current) = ctx.registry.get_worker(&worker_id).await? else {
            warn!(worker_id, "worker no longer present in registry, stopping");
            break;
        };

        match current.status {
            WorkerStatus::Stopped | WorkerStatus::Failed => break,
            WorkerStatus::Paused => {
                sleep(PAUSE_POLL).await;
                continue;
            }
            _ => {}
        }

        match queue.dequeue().await {
            Ok(DequeueOutcome::Task(task)) => {
                backoff = MIN_BACKOFF;
                process_task(&ctx, queue, kind, &worker_id, task).await;
            }
            Ok(DequeueOutcome::DataMissing(task_id)) => {
                warn!(worker_id, task_id, "dequeued task_id has no blob, skipping");
            }
            Ok(DequeueOutcome::Empty) => {
                sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            Err(e) => {
                error!(worker_id, error = %e, "error dequeuing task");
                sleep(Duration::from_secs(5)).await;
            }
        }
    }

    ctx.registry.deregister_worker(&worker_id).await?;
    info!(worker_id, "dispatcher stopped");
    Ok(())
}

fn queue_for(ctx: &WorkerContext, kind: TaskKind) -> &PriorityQueue {
    match kind {
        TaskKind::Deployment => &ctx.deployment_queue,
        TaskKind::Termination => &ctx.termination_queue,
    }
}

async fn process_task(ctx: &Arc<WorkerContext>, queue: &PriorityQueue, kind: TaskKind, worker_id: &str, task: queue_core::Task) {
    let task_id = task.metadata.task_id.clone();
    let status = match kind {
        TaskKind::Deployment => WorkerStatus::Deployment,
        TaskKind::Termination => WorkerStatus::Termination,
    };

    if let Err(e) = ctx.state_machine.transition(worker_id, status, HashMap::new()).await {
        warn!(worker_id, task_id, error = %e, "failed to transition worker to processing state");
    }
    if let Err(e) = ctx.heartbeat.send_heartbeat(worker_id, Some(task_id.clone()), HashMap::new()).await {
        warn!(worker_id, task_id, error = %e, "failed to record heartbeat before processing task");
    }

    let timeout = Duration::from_secs(ctx.config.task_timeout_seconds);
    let ctx_for_task = ctx.clone();
    let task_for_call = task.clone();

    let outcome = tokio::time::timeout(timeout, async move { run_callback(&ctx_for_task, &task_for_call).await }).await;

    let (success, result) = match outcome {
        Ok(result) => {
            let success = result.get("success").and_then(serde_json::Value::as_bool).unwrap_or(false);
            (success, result)
        }
        Err(_) => {
            error!(worker_id, task_id, timeout_secs = ctx.config.task_timeout_seconds, "task callback timed out");
            (false, serde_json::json!({"success": false, "error": "task timed out", "status": "timeout"}))
        }
    };

    if let Err(e) = queue.complete_task(&task_id, success, Some(result)).await {
        error!(worker_id, task_id, error = %e, "failed to record task completion");
    }

    if let Err(e) = ctx.registry.update_worker_heartbeat(worker_id, None).await {
        warn!(worker_id, error = %e, "failed to clear current task after completion");
    }
    if let Err(e) = ctx.state_machine.transition(worker_id, WorkerStatus::Idle, HashMap::new()).await {
        warn!(worker_id, error = %e, "failed to transition worker back to idle");
    }
}

async fn run_callback(ctx: &WorkerContext, task: &queue_core::Task) -> serde_json::Value {
    match &task.payload {
        TaskPayload::Deployment(payload) => deploy::run_deploy(ctx, &task.metadata.task_id, payload).await,
        TaskPayload::Termination(payload) => terminate::run_terminate(ctx, &task.metadata.task_id, payload).await,
    }
}
