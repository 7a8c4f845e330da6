use lock_core::{with_challenge_lock, ChallengeOperation};
use perf_tracker::Phase;
use queue_core::TerminationPayload;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::context::WorkerContext;

/// Deletes every Kubernetes object labeled `instance=<pod_name>`. Runs
/// under the challenge lock keyed by `pod_name` so a deploy for the same
/// instance can't race the teardown.
pub async fn run_terminate(ctx: &WorkerContext, task_id: &str, payload: &TerminationPayload) -> Value {
    let challenge_id = payload.pod_name.clone();

    let outcome = with_challenge_lock(&ctx.locks, &challenge_id, ChallengeOperation::Termination, || async {
        terminate_locked(ctx, task_id, payload).await
    })
    .await;

    match outcome {
        Some(result) => result,
        None => {
            error!(challenge_id, "failed to acquire challenge lock for termination");
            json!({"success": false, "error": "failed to acquire challenge lock"})
        }
    }
}

async fn terminate_locked(ctx: &WorkerContext, task_id: &str, payload: &TerminationPayload) -> Value {
    let _ = ctx.perf.end_phase(task_id).await;
    let _ = ctx.perf.start_phase(task_id, Phase::K8sResourcesCreation).await;

    let namespace = payload.namespace.as_deref().unwrap_or_else(|| ctx.namespace());

    let deleted = if is_redblue_defender(&payload.pod_name) {
        warn!(pod_name = %payload.pod_name, "refusing to terminate shared defender directly");
        return json!({"success": false, "error": "shared defender is competition-scoped and cannot be terminated directly"});
    } else {
        ctx.redblue.cleanup_attacker(namespace, &payload.pod_name).await
    };

    let deleted = match deleted {
        Ok(kinds) => kinds,
        Err(e) => {
            warn!(pod_name = %payload.pod_name, error = %e, "termination failed");
            ctx.perf.add_tag(task_id, "failure_reason", json!(format!("termination_error: {e}"))).await.ok();
            let _ = ctx.perf.complete_tracking(task_id, false).await;
            return json!({"success": false, "error": e.to_string()});
        }
    };

    let _ = ctx.perf.end_phase(task_id).await;
    ctx.perf.add_tag(task_id, "result_status", json!("terminated")).await.ok();
    ctx.perf.add_tag(task_id, "result_pod_name", json!(payload.pod_name)).await.ok();
    let _ = ctx.perf.complete_tracking(task_id, true).await;

    json!({
        "success": true,
        "message": format!("Termination of {} completed", payload.pod_name),
        "status": "terminated",
        "deleted_resources": deleted,
    })
}

fn is_redblue_defender(pod_name: &str) -> bool {
    pod_name.starts_with("defense-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_defender_name_pattern() {
        assert!(is_redblue_defender("defense-comp-1"));
        assert!(!is_redblue_defender("chal-1-alice"));
    }
}
