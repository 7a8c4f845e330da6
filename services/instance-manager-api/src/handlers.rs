use std::io::Read as _;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use ctd_resolver::{flag_secret_name, Cdf, CdfComponent};
use k8s_adapter::standardize_pod_status;
use perf_tracker::Phase;
use queue_core::{DeploymentPayload, Priority, TaskPayload, TerminationPayload};
use serde_json::{json, Value};
use shared::AppError;
use worker_registry::WorkerStatus;

use crate::app_state::AppState;
use crate::dto::*;
use crate::validators::{validate_command, validate_dns_label, validate_dns_label_or_uuid, validate_flag, validate_template_variable};

fn priority_from_role(user_role: Option<&str>) -> Priority {
    match user_role {
        Some("instructor") | Some("admin") => Priority::High,
        _ => Priority::Normal,
    }
}

fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "high",
        Priority::Normal => "normal",
        Priority::Low => "low",
    }
}

/// Validates a submitted CDF's template variables and any raw container
/// `command` overrides before the deployment task is ever enqueued.
fn validate_cdf_content(cdf: &Cdf) -> Result<(), AppError> {
    for (key, value) in &cdf.variables {
        let value_str = value.as_str().map(String::from).unwrap_or_else(|| value.to_string());
        validate_template_variable(key, &value_str)?;
    }

    for component in &cdf.components {
        if let CdfComponent::Container(map) = component {
            match map.get("command") {
                Some(Value::String(command)) => validate_command(command)?,
                Some(Value::Array(items)) => {
                    for item in items {
                        if let Some(command) = item.as_str() {
                            validate_command(command)?;
                        }
                    }
                }
                _ => {}
            }
        }
    }

    Ok(())
}

pub async fn start_challenge(
    State(state): State<AppState>,
    Json(request): Json<StartChallengeRequest>,
) -> Result<(StatusCode, Json<StartChallengeResponse>), AppError> {
    validate_dns_label_or_uuid(&request.deployment_name)?;
    state.rate_limiter.consume(&request.user_id).await?;

    let cdf: Cdf = serde_json::from_value(request.cdf_content.clone())
        .map_err(|e| AppError::ValidationError(format!("invalid cdf_content: {e}")))?;
    validate_cdf_content(&cdf)?;

    if !state.ctd_loader.is_valid_type(&cdf.metadata.challenge_type) {
        return Err(AppError::UnknownChallengeType(cdf.metadata.challenge_type.clone()));
    }

    let challenge_id = cdf.challenge_id(&request.deployment_name);
    let priority = priority_from_role(request.user_role.as_deref());

    let payload = TaskPayload::Deployment(DeploymentPayload {
        user_id: request.user_id.clone(),
        competition_id: request.competition_id.clone(),
        deployment_name: request.deployment_name.clone(),
        challenge_type: cdf.metadata.challenge_type.clone(),
        cdf_content: request.cdf_content,
        user_role: request.user_role,
    });

    // Tracking starts here, before the task is visible to any dispatcher,
    // so the "queue_wait" phase actually covers time spent queued.
    let task_id = format!("perf_{}", uuid::Uuid::new_v4().simple());
    state.perf.start_tracking(&task_id, Some(request.user_id.clone()), Some(cdf.metadata.challenge_type.clone())).await;
    state.perf.start_phase(&task_id, Phase::QueueWait).await?;

    let task_id = state
        .deployment_queue
        .enqueue(payload, priority, Some(task_id), Some(challenge_id))
        .await?
        .ok_or_else(|| AppError::InternalError("failed to enqueue deployment task".to_string()))?;

    let stats = state.deployment_queue.get_queue_stats().await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartChallengeResponse {
            success: true,
            queued: true,
            task_id,
            queue_position: stats.queued,
            priority: priority_label(priority),
            status: "queued",
        }),
    ))
}

pub async fn end_challenge(
    State(state): State<AppState>,
    Json(request): Json<EndChallengeRequest>,
) -> Result<(StatusCode, Json<EndChallengeResponse>), AppError> {
    validate_dns_label_or_uuid(&request.deployment_name)?;
    if let Some(namespace) = &request.namespace {
        validate_dns_label(namespace)?;
    }

    let payload = TaskPayload::Termination(TerminationPayload {
        pod_name: request.deployment_name.clone(),
        namespace: request.namespace,
        user_id: request.user_id.clone(),
    });

    let task_id = format!("perf_{}", uuid::Uuid::new_v4().simple());
    state.perf.start_tracking(&task_id, request.user_id, None).await;
    state.perf.start_phase(&task_id, Phase::QueueWait).await?;

    let task_id = state
        .termination_queue
        .enqueue(payload, Priority::High, Some(task_id), Some(request.deployment_name.clone()))
        .await?
        .ok_or_else(|| AppError::InternalError("failed to enqueue termination task".to_string()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EndChallengeResponse {
            success: true,
            message: format!("termination queued for {}", request.deployment_name),
            task_id,
            status: "queued",
        }),
    ))
}

pub async fn task_status(State(state): State<AppState>, Path(task_id): Path<String>) -> Result<Json<queue_core::Task>, AppError> {
    match state.deployment_queue.get_task_status(&task_id).await? {
        Some(task) => Ok(Json(task)),
        None => match state.termination_queue.get_task_status(&task_id).await? {
            Some(task) => Ok(Json(task)),
            None => Err(AppError::NotFoundError(format!("no task found with id '{task_id}'"))),
        },
    }
}

pub async fn queue_status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let deployment_stats = state.deployment_queue.get_queue_stats().await?;
    let termination_stats = state.termination_queue.get_queue_stats().await?;
    let worker_active = state.registry.count_active_workers(None).await? > 0;

    Ok(Json(json!({
        "queued": deployment_stats.queued + termination_stats.queued,
        "processing": deployment_stats.processing + termination_stats.processing,
        "priority_counts": {
            "deployment": deployment_stats.priority_counts,
            "termination": termination_stats.priority_counts,
        },
        "metrics": {
            "deployment": deployment_stats.metrics,
            "termination": termination_stats.metrics,
        },
        "worker_active": worker_active,
    })))
}

pub async fn list_challenge_pods(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let namespace = state.namespace();
    let pods = state.k8s.list_challenge_pods(namespace).await?;

    let challenge_pods: Vec<ChallengePodSummary> = pods
        .into_iter()
        .map(|pod| {
            let labels = pod.metadata.labels.clone().unwrap_or_default();
            let name = pod.metadata.name.clone().unwrap_or_default();
            let status = standardize_pod_status(&pod).as_str();
            let challenge_url = state.config.ingress_url.as_ref().map(|_| format!("https://{name}.{}", state.config.domain));

            ChallengePodSummary {
                flag_secret_name: flag_secret_name(&name),
                urls: ChallengePodUrls { terminal: None, challenge: challenge_url },
                user_id: labels.get("user").cloned(),
                competition_id: labels.get("competition_id").cloned(),
                challenge_type: labels.get("challenge_type").cloned(),
                challenge_name: labels.get("challenge_name").cloned(),
                name,
                status,
            }
        })
        .collect();

    Ok(Json(json!({ "challenge_pods": challenge_pods })))
}

pub async fn get_pod_status(State(state): State<AppState>, Query(query): Query<GetPodStatusQuery>) -> Result<Json<serde_json::Value>, AppError> {
    validate_dns_label_or_uuid(&query.pod_name)?;
    let namespace = query.namespace.unwrap_or_else(|| state.namespace().to_string());
    validate_dns_label(&namespace)?;

    let pod = state
        .k8s
        .get_pod(&namespace, &query.pod_name)
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("pod '{}' not found", query.pod_name)))?;

    let status = standardize_pod_status(&pod);
    let pod_status = pod.status.as_ref();
    let containers: Vec<serde_json::Value> = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.iter().map(|c| json!({ "name": c.name, "image": c.image })).collect())
        .unwrap_or_default();

    Ok(Json(json!({
        "name": pod.metadata.name,
        "status": status.as_str(),
        "uptime": pod.metadata.creation_timestamp.as_ref().map(|t| (chrono::Utc::now() - t.0).num_seconds()),
        "labels": pod.metadata.labels,
        "containers": containers,
        "node": pod_status.and_then(|s| s.host_ip.clone()),
        "podIP": pod_status.and_then(|s| s.pod_ip.clone()),
        "creationTimestamp": pod.metadata.creation_timestamp.map(|t| t.0),
    })))
}

pub async fn get_secret(State(state): State<AppState>, Json(request): Json<GetSecretRequest>) -> Result<Json<GetSecretResponse>, AppError> {
    validate_dns_label_or_uuid(&request.secret_name)?;
    let namespace = request.namespace.unwrap_or_else(|| state.namespace().to_string());

    let value = state
        .k8s
        .get_secret_value(&namespace, &request.secret_name, "flag")
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("secret '{}' not found", request.secret_name)))?;
    validate_flag(&value)?;

    Ok(Json(GetSecretResponse { secret_value: value }))
}

pub async fn get_schema(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let path = state.config.ctd_directory.join("_cdf.schema.json");
    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|_| AppError::NotFoundError("no CDF schema installed".to_string()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    Ok(Json(value))
}

pub async fn challenge_types(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "challenge_types": state.ctd_loader.list_types() }))
}

pub async fn list_workers(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let workers = state.registry.list_workers(None).await?;
    let active = workers.iter().filter(|w| w.status == WorkerStatus::Active).count();
    Ok(Json(json!({ "workers": workers, "total": workers.len(), "active": active })))
}

pub async fn pause_worker(State(state): State<AppState>, Path(worker_id): Path<String>, Json(request): Json<WorkerActionRequest>) -> Result<Json<serde_json::Value>, AppError> {
    let ok = state.state_machine.pause_worker(&worker_id, request.reason).await?;
    Ok(Json(json!({ "success": ok })))
}

pub async fn resume_worker(State(state): State<AppState>, Path(worker_id): Path<String>) -> Result<Json<serde_json::Value>, AppError> {
    let ok = state.state_machine.resume_worker(&worker_id).await?;
    Ok(Json(json!({ "success": ok })))
}

pub async fn stop_worker(State(state): State<AppState>, Path(worker_id): Path<String>, Json(request): Json<WorkerActionRequest>) -> Result<Json<serde_json::Value>, AppError> {
    let ok = state.state_machine.stop_worker(&worker_id, request.reason).await?;
    Ok(Json(json!({ "success": ok })))
}

pub async fn performance_metrics(State(state): State<AppState>) -> Result<Json<perf_tracker::PerformanceMetrics>, AppError> {
    let challenge_types = state.ctd_loader.list_types();
    let metrics = state.perf.get_metrics(&challenge_types).await?;
    Ok(Json(metrics))
}

pub async fn recent_deployments(State(state): State<AppState>, Query(query): Query<RecentDeploymentsQuery>) -> Result<Json<serde_json::Value>, AppError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    let deployments = state.perf.get_recent_deployments(limit).await?;
    Ok(Json(json!({ "deployments": deployments })))
}

/// Extracts `<type_id>.ctd.json` (and any sibling files) from an uploaded
/// zip, installs the CTD, and reports whether it replaced an existing one.
pub async fn upload_ctd(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<UploadCtdResponse>, AppError> {
    let mut archive_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::ValidationError(e.to_string()))? {
        if field.name() == Some("file") {
            let bytes = field.bytes().await.map_err(|e| AppError::ValidationError(e.to_string()))?;
            archive_bytes = Some(bytes.to_vec());
        }
    }

    let archive_bytes = archive_bytes.ok_or_else(|| AppError::ValidationError("missing 'file' field".to_string()))?;
    let cursor = std::io::Cursor::new(archive_bytes);
    let mut archive = zip::ZipArchive::new(cursor).map_err(|e| AppError::ValidationError(format!("invalid zip archive: {e}")))?;

    let mut ctd_type_id = None;
    let mut ctd_contents = None;
    let mut supporting_files = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| AppError::ValidationError(format!("corrupt zip entry: {e}")))?;
        let entry_name = entry.name().to_string();

        if let Some(type_id) = entry_name.strip_suffix(".ctd.json") {
            let mut contents = String::new();
            entry.read_to_string(&mut contents).map_err(AppError::IoError)?;
            ctd_type_id = Some(type_id.to_string());
            ctd_contents = Some(contents);
        } else if !entry.is_dir() {
            supporting_files.push(entry_name);
        }
    }

    let type_id = ctd_type_id.ok_or_else(|| AppError::ValidationError("archive does not contain a <type_id>.ctd.json file".to_string()))?;
    let contents = ctd_contents.expect("ctd_contents set alongside ctd_type_id");
    let is_update = state.ctd_loader.is_valid_type(&type_id);

    state.ctd_loader.install(&type_id, &contents).await?;
    let installed = state.ctd_loader.get(&type_id).await?;

    Ok(Json(UploadCtdResponse {
        type_name: installed.type_id.clone(),
        version: installed.version.clone(),
        supporting_files,
        is_update,
    }))
}
