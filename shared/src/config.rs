use std::{net::SocketAddr, path::PathBuf, str::FromStr};

use tokio::fs;

use crate::errors::AppError;

/// Distributed lock expiry/retry knobs for one lock category (spec.md §4.2).
#[derive(Clone, Debug)]
pub struct LockCategoryConfig {
    pub expire_seconds: u64,
    pub retry_interval_ms: u64,
    pub retry_times: u32,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub server_address: SocketAddr,
    pub worker_health_address: SocketAddr,

    pub domain: String,
    pub ingress_url: Option<String>,

    pub k8s_in_cluster: bool,
    pub k8s_config_path: Option<String>,
    pub ingress_class_name: Option<String>,

    pub challenge_pod_label_key: String,
    pub challenge_pod_label_value: String,

    pub redis_url: String,
    pub redis_max_connections: u32,
    pub redis_health_check_interval_secs: u64,
    pub redis_cache_ttl_secs: f64,

    pub enable_parallel_workers: bool,

    pub worker_heartbeat_interval_secs: u64,
    pub worker_check_interval_secs: u64,
    pub worker_heartbeat_timeout_secs: u64,
    pub worker_expiry_seconds: u64,

    pub critical_section_timeout_secs: u64,
    pub deployment_lock_timeout_secs: u64,
    pub termination_lock_timeout_secs: u64,

    pub queue_lock: LockCategoryConfig,
    pub resource_lock: LockCategoryConfig,
    pub operation_lock: LockCategoryConfig,
    pub challenge_lock: LockCategoryConfig,

    pub task_timeout_seconds: u64,

    pub ctd_directory: PathBuf,

    pub rate_limit_points: u32,
    pub rate_limit_duration_secs: u64,
    pub rate_limit_block_duration_secs: u64,
}

impl Config {
    pub async fn init() -> Result<Self, AppError> {
        let server_address: SocketAddr = get_config_value(
            "SERVER_ADDRESS",
            Some("SERVER_ADDRESS"),
            Some("0.0.0.0:8000".parse().unwrap()),
        )
        .await?;

        let worker_health_address: SocketAddr = get_config_value(
            "WORKER_HEALTH_ADDRESS",
            Some("WORKER_HEALTH_ADDRESS"),
            Some("0.0.0.0:8081".parse().unwrap()),
        )
        .await?;

        let domain = get_config_value("DOMAIN", Some("DOMAIN"), Some("edurange.test".to_string()))
            .await?;
        let ingress_url = get_optional_config_value("INGRESS_URL").await;

        let k8s_in_cluster =
            get_config_value("K8S_IN_CLUSTER", Some("K8S_IN_CLUSTER"), Some(false)).await?;
        let k8s_config_path = get_optional_config_value("K8S_KUBECONFIG").await;
        let ingress_class_name = get_optional_config_value("INGRESS_CLASS_NAME").await;

        let challenge_pod_label_key = get_config_value(
            "CHALLENGE_POD_LABEL_KEY",
            Some("CHALLENGE_POD_LABEL_KEY"),
            Some("app".to_string()),
        )
        .await?;
        let challenge_pod_label_value = get_config_value(
            "CHALLENGE_POD_LABEL_VALUE",
            Some("CHALLENGE_POD_LABEL_VALUE"),
            Some("ctfchal".to_string()),
        )
        .await?;

        let redis_url = get_config_value(
            "REDIS_URL",
            Some("REDIS_URL"),
            Some("redis://redis:6379/0".to_string()),
        )
        .await?;
        let redis_max_connections = get_config_value(
            "REDIS_MAX_CONNECTIONS",
            Some("REDIS_MAX_CONNECTIONS"),
            Some(10u32),
        )
        .await?;
        let redis_health_check_interval_secs = get_config_value(
            "REDIS_HEALTH_CHECK_INTERVAL",
            Some("REDIS_HEALTH_CHECK_INTERVAL"),
            Some(30u64),
        )
        .await?;
        let redis_cache_ttl_secs = get_config_value(
            "REDIS_CACHE_TTL",
            Some("REDIS_CACHE_TTL"),
            Some(1.0f64),
        )
        .await?;

        let enable_parallel_workers = get_config_value(
            "ENABLE_PARALLEL_WORKERS",
            Some("ENABLE_PARALLEL_WORKERS"),
            Some(false),
        )
        .await?;

        let worker_heartbeat_interval_secs = get_config_value(
            "WORKER_HEARTBEAT_INTERVAL",
            Some("WORKER_HEARTBEAT_INTERVAL"),
            Some(15u64),
        )
        .await?;
        let worker_check_interval_secs = get_config_value(
            "WORKER_CHECK_INTERVAL",
            Some("WORKER_CHECK_INTERVAL"),
            Some(60u64),
        )
        .await?;
        let worker_heartbeat_timeout_secs = get_config_value(
            "WORKER_HEARTBEAT_TIMEOUT",
            Some("WORKER_HEARTBEAT_TIMEOUT"),
            Some(60u64),
        )
        .await?;
        let worker_expiry_seconds = get_config_value(
            "WORKER_EXPIRY_SECONDS",
            Some("WORKER_EXPIRY_SECONDS"),
            Some(3600u64),
        )
        .await?;

        let critical_section_timeout_secs = get_config_value(
            "CRITICAL_SECTION_TIMEOUT",
            Some("CRITICAL_SECTION_TIMEOUT"),
            Some(30u64),
        )
        .await?;
        let deployment_lock_timeout_secs = get_config_value(
            "DEPLOYMENT_LOCK_TIMEOUT",
            Some("DEPLOYMENT_LOCK_TIMEOUT"),
            Some(120u64),
        )
        .await?;
        let termination_lock_timeout_secs = get_config_value(
            "TERMINATION_LOCK_TIMEOUT",
            Some("TERMINATION_LOCK_TIMEOUT"),
            Some(60u64),
        )
        .await?;

        let queue_lock = LockCategoryConfig {
            expire_seconds: get_config_value(
                "QUEUE_LOCK_EXPIRE_SECONDS",
                Some("QUEUE_LOCK_EXPIRE_SECONDS"),
                Some(30u64),
            )
            .await?,
            retry_interval_ms: get_config_value(
                "QUEUE_LOCK_RETRY_INTERVAL_MS",
                Some("QUEUE_LOCK_RETRY_INTERVAL_MS"),
                Some(100u64),
            )
            .await?,
            retry_times: get_config_value(
                "QUEUE_LOCK_RETRY_TIMES",
                Some("QUEUE_LOCK_RETRY_TIMES"),
                Some(50u32),
            )
            .await?,
        };
        let resource_lock = LockCategoryConfig {
            expire_seconds: get_config_value(
                "RESOURCE_LOCK_EXPIRE_SECONDS",
                Some("RESOURCE_LOCK_EXPIRE_SECONDS"),
                Some(30u64),
            )
            .await?,
            retry_interval_ms: get_config_value(
                "RESOURCE_LOCK_RETRY_INTERVAL_MS",
                Some("RESOURCE_LOCK_RETRY_INTERVAL_MS"),
                Some(100u64),
            )
            .await?,
            retry_times: get_config_value(
                "RESOURCE_LOCK_RETRY_TIMES",
                Some("RESOURCE_LOCK_RETRY_TIMES"),
                Some(50u32),
            )
            .await?,
        };
        let operation_lock = LockCategoryConfig {
            expire_seconds: get_config_value(
                "OPERATION_LOCK_EXPIRE_SECONDS",
                Some("OPERATION_LOCK_EXPIRE_SECONDS"),
                Some(30u64),
            )
            .await?,
            retry_interval_ms: get_config_value(
                "OPERATION_LOCK_RETRY_INTERVAL_MS",
                Some("OPERATION_LOCK_RETRY_INTERVAL_MS"),
                Some(100u64),
            )
            .await?,
            retry_times: get_config_value(
                "OPERATION_LOCK_RETRY_TIMES",
                Some("OPERATION_LOCK_RETRY_TIMES"),
                Some(50u32),
            )
            .await?,
        };

        let challenge_lock = LockCategoryConfig {
            expire_seconds: get_config_value(
                "CHALLENGE_LOCK_EXPIRE_SECONDS",
                Some("CHALLENGE_LOCK_EXPIRE_SECONDS"),
                Some(30u64),
            )
            .await?,
            retry_interval_ms: get_config_value(
                "CHALLENGE_LOCK_RETRY_INTERVAL_MS",
                Some("CHALLENGE_LOCK_RETRY_INTERVAL_MS"),
                Some(100u64),
            )
            .await?,
            retry_times: get_config_value(
                "CHALLENGE_LOCK_RETRY_TIMES",
                Some("CHALLENGE_LOCK_RETRY_TIMES"),
                Some(50u32),
            )
            .await?,
        };

        let task_timeout_seconds = get_config_value(
            "TASK_TIMEOUT_SECONDS",
            Some("TASK_TIMEOUT_SECONDS"),
            Some(600u64),
        )
        .await?;

        let ctd_directory = get_config_value(
            "CTD_DIRECTORY",
            Some("CTD_DIRECTORY"),
            Some("./ctds".to_string()),
        )
        .await
        .map(PathBuf::from)?;

        let rate_limit_points = get_config_value(
            "RATE_LIMIT_POINTS",
            Some("RATE_LIMIT_POINTS"),
            Some(10u32),
        )
        .await?;
        let rate_limit_duration_secs = get_config_value(
            "RATE_LIMIT_DURATION_SECONDS",
            Some("RATE_LIMIT_DURATION_SECONDS"),
            Some(60u64),
        )
        .await?;
        let rate_limit_block_duration_secs = get_config_value(
            "RATE_LIMIT_BLOCK_DURATION_SECONDS",
            Some("RATE_LIMIT_BLOCK_DURATION_SECONDS"),
            Some(300u64),
        )
        .await?;

        Ok(Config {
            server_address,
            worker_health_address,
            domain,
            ingress_url,
            k8s_in_cluster,
            k8s_config_path,
            ingress_class_name,
            challenge_pod_label_key,
            challenge_pod_label_value,
            redis_url,
            redis_max_connections,
            redis_health_check_interval_secs,
            redis_cache_ttl_secs,
            enable_parallel_workers,
            worker_heartbeat_interval_secs,
            worker_check_interval_secs,
            worker_heartbeat_timeout_secs,
            worker_expiry_seconds,
            critical_section_timeout_secs,
            deployment_lock_timeout_secs,
            termination_lock_timeout_secs,
            queue_lock,
            resource_lock,
            operation_lock,
            challenge_lock,
            task_timeout_seconds,
            ctd_directory,
            rate_limit_points,
            rate_limit_duration_secs,
            rate_limit_block_duration_secs,
        })
    }
}

/// Reads a config value from an env var, falling back to a side-file (Docker-secret style)
/// and finally to a provided default. Mirrors the teacher's `get_config_value` helper.
async fn get_config_value<T>(
    label: &str,
    env_name: Option<&str>,
    fallback: Option<T>,
) -> Result<T, AppError>
where
    T: FromStr,
{
    if let Some(value) = get_optional_config_value::<T>(env_name.unwrap_or(label)).await {
        return Ok(value);
    }

    fallback.ok_or_else(|| AppError::EnvironmentVariableNotSetError(label.to_string()))
}

async fn get_optional_config_value<T>(env_name: &str) -> Option<T>
where
    T: FromStr,
{
    if let Ok(raw) = std::env::var(env_name) {
        return raw.trim().parse::<T>().ok();
    }

    let secret_path = PathBuf::from("/run/secrets").join(env_name.to_lowercase());
    match fs::read_to_string(&secret_path).await {
        Ok(contents) => contents.trim().parse::<T>().ok(),
        Err(_) => None,
    }
}

