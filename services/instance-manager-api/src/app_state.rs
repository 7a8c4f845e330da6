use std::sync::Arc;

use ctd_resolver::CtdLoader;
use k8s_adapter::{build_client, KubernetesAdapter, RedBlueHandler};
use lock_core::LockManager;
use perf_tracker::PerformanceMonitor;
use queue_core::{PriorityQueue, TaskKind};
use rate_limiter::RateLimiter;
use shared::{AppError, Config, RedisClient};
use worker_registry::{HeartbeatMonitor, WorkerRegistry, WorkerStateMachine};

/// Everything a handler might need, wired once at startup. Handlers pull
/// the whole struct via `State<AppState>` rather than per-field `FromRef`
/// impls, since `deployment_queue` and `termination_queue` share a type
/// and `FromRef` can't disambiguate between them.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub redis: RedisClient,
    pub deployment_queue: PriorityQueue,
    pub termination_queue: PriorityQueue,
    pub locks: LockManager,
    pub registry: WorkerRegistry,
    pub state_machine: Arc<WorkerStateMachine>,
    pub heartbeat: HeartbeatMonitor,
    pub perf: PerformanceMonitor,
    pub rate_limiter: Arc<RateLimiter>,
    pub ctd_loader: Arc<CtdLoader>,
    pub k8s: KubernetesAdapter,
    pub redblue: RedBlueHandler,
}

impl AppState {
    pub async fn init(config: &Config, ctd_schema: Option<serde_json::Value>) -> Result<Self, AppError> {
        let redis = RedisClient::connect(config).await?;
        redis.spawn_health_check(std::time::Duration::from_secs(config.redis_health_check_interval_secs));

        let locks = LockManager::new(redis.clone(), config);

        let deployment_queue = PriorityQueue::new(redis.clone(), locks.clone(), TaskKind::Deployment);
        let termination_queue = PriorityQueue::new(redis.clone(), locks.clone(), TaskKind::Termination);

        let registry = WorkerRegistry::new(redis.clone(), locks.clone(), config.worker_expiry_seconds, config.worker_heartbeat_timeout_secs);
        let state_machine = Arc::new(WorkerStateMachine::new(registry.clone(), redis.clone()));
        let heartbeat = HeartbeatMonitor::new(redis.clone(), registry.clone(), state_machine.clone(), config.worker_heartbeat_timeout_secs, config.worker_check_interval_secs);

        let perf = PerformanceMonitor::new(redis.clone());

        let rate_limiter = Arc::new(RateLimiter::new(
            Some(redis.clone()),
            "rate_limit",
            config.rate_limit_points,
            config.rate_limit_duration_secs,
            config.rate_limit_block_duration_secs,
        ));

        let ctd_loader = Arc::new(CtdLoader::new(config.ctd_directory.clone(), ctd_schema)?);

        let k8s_client = build_client(config).await?;
        let k8s = KubernetesAdapter::new(k8s_client.clone(), config.ingress_class_name.clone());
        let redblue = RedBlueHandler::new(k8s.clone(), k8s_client);

        Ok(Self {
            config: config.clone(),
            redis,
            deployment_queue,
            termination_queue,
            locks,
            registry,
            state_machine,
            heartbeat,
            perf,
            rate_limiter,
            ctd_loader,
            k8s,
            redblue,
        })
    }

    pub fn namespace(&self) -> &str {
        "default"
    }
}
