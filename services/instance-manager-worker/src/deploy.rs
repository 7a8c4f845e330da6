use ctd_resolver::{build_instance_context, Cdf};
use lock_core::{with_challenge_lock, ChallengeOperation};
use perf_tracker::Phase;
use queue_core::DeploymentPayload;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::context::WorkerContext;

const REDBLUE_CHALLENGE_TYPE: &str = "redblue";

/// Runs the full deploy pipeline for one dequeued task: resolves the CTD
/// against the CDF, creates the flag secret and every Kubernetes object,
/// deploying the shared defender first for `redblue` challenges. Runs
/// under the challenge lock so no other deploy/terminate can interleave.
pub async fn run_deploy(ctx: &WorkerContext, task_id: &str, payload: &DeploymentPayload) -> Value {
    let challenge_id = payload.cdf_content.get("metadata").and_then(|m| m.get("id")).and_then(Value::as_str).map(String::from).unwrap_or_else(|| payload.deployment_name.clone());

    let outcome = with_challenge_lock(&ctx.locks, &challenge_id, ChallengeOperation::Deployment, || async {
        deploy_locked(ctx, task_id, payload).await
    })
    .await;

    match outcome {
        Some(result) => result,
        None => {
            error!(challenge_id, "failed to acquire challenge lock for deployment");
            json!({"success": false, "error": "failed to acquire challenge lock"})
        }
    }
}

async fn deploy_locked(ctx: &WorkerContext, task_id: &str, payload: &DeploymentPayload) -> Value {
    let cdf: Cdf = match serde_json::from_value(payload.cdf_content.clone()) {
        Ok(cdf) => cdf,
        Err(e) => return fail(ctx, task_id, &format!("invalid cdf: {e}")).await,
    };

    let ctd = match ctx.ctd_loader.get(&payload.challenge_type).await {
        Ok(ctd) => ctd,
        Err(e) => return fail(ctx, task_id, &format!("failed to load challenge type: {e}")).await,
    };

    let (context, flag, db_credentials) = build_instance_context(&cdf, &payload.deployment_name, &payload.competition_id, &payload.user_id, &ctx.config.domain);

    let namespace = ctx.namespace();
    let objects = match ctd_resolver::resolve(&cdf, &ctd, &context, namespace) {
        Ok(objects) => objects,
        Err(e) => return fail(ctx, task_id, &format!("failed to resolve challenge objects: {e}")).await,
    };

    let _ = ctx.perf.end_phase(task_id).await;
    let _ = ctx.perf.start_phase(task_id, Phase::K8sResourcesCreation).await;

    if payload.challenge_type == REDBLUE_CHALLENGE_TYPE {
        let mut defender_context = context.clone();
        let defender_name = format!("defense-{}", payload.competition_id);
        defender_context.insert("INSTANCE_NAME", defender_name.clone());
        let defender_objects = match ctd_resolver::resolve(&cdf, &ctd, &defender_context, namespace) {
            Ok(objects) => objects,
            Err(e) => return fail(ctx, task_id, &format!("failed to resolve defender objects: {e}")).await,
        };

        if let Err(e) = ctx.redblue.ensure_defender(namespace, &payload.competition_id, &defender_objects).await {
            return fail(ctx, task_id, &format!("failed to deploy shared defender: {e}")).await;
        }
    }

    let secret_name = context.get("FLAG_SECRET_NAME").unwrap_or_default().to_string();
    let flag_labels: std::collections::BTreeMap<String, String> =
        objects.first().map(|o| o.labels.clone().into_iter().collect()).unwrap_or_default();
    if let Err(e) = ctx.k8s.create_flag_secret(namespace, &secret_name, &flag, &flag_labels).await {
        return fail(ctx, task_id, &format!("failed to create flag secret: {e}")).await;
    }

    if let Some(db_credentials) = &db_credentials {
        let string_data = std::collections::BTreeMap::from([
            ("password".to_string(), db_credentials.password.clone()),
            ("root_password".to_string(), db_credentials.root_password.clone()),
        ]);
        if let Err(e) = ctx.k8s.create_secret(namespace, &db_credentials.secret_name, string_data, &flag_labels).await {
            return fail(ctx, task_id, &format!("failed to create database secret: {e}")).await;
        }
    }

    for object in &objects {
        if let Err(e) = ctx.k8s.create_object(object).await {
            warn!(deployment_name = %payload.deployment_name, "rolling back partially created objects after failure");
            if let Err(cleanup_err) = ctx.k8s.delete_by_instance_label(namespace, &payload.deployment_name).await {
                warn!(deployment_name = %payload.deployment_name, error = %cleanup_err, "rollback cleanup also failed");
            }
            return fail(ctx, task_id, &format!("failed to create {} {}: {e}", object.kind, object.name)).await;
        }
    }

    let _ = ctx.perf.end_phase(task_id).await;
    let _ = ctx.perf.start_phase(task_id, Phase::WaitForRunning).await;
    let _ = ctx.perf.end_phase(task_id).await;

    ctx.perf.add_tag(task_id, "result_deployment_name", json!(payload.deployment_name)).await.ok();
    let duration = ctx.perf.complete_tracking(task_id, true).await.unwrap_or(0.0);

    info!(deployment_name = %payload.deployment_name, challenge_type = %payload.challenge_type, duration, "deployment completed");

    json!({
        "success": true,
        "deployment_name": payload.deployment_name,
        "flag_secret_name": secret_name,
        "objects_created": objects.len(),
    })
}

async fn fail(ctx: &WorkerContext, task_id: &str, message: &str) -> Value {
    warn!(task_id, message, "deployment failed");
    ctx.perf.add_tag(task_id, "failure_reason", json!(message)).await.ok();
    let _ = ctx.perf.complete_tracking(task_id, false).await;
    json!({"success": false, "error": message})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redblue_challenge_type_constant_matches_registry_tag() {
        assert_eq!(REDBLUE_CHALLENGE_TYPE, "redblue");
    }
}
