use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use sqlx::mysql::MySqlPoolOptions;
use tracing::{error, info, warn};

use tsbx::api::{serve, AppState};
use tsbx::callback::CallbackHandler;
use tsbx::cleanup::CleanupService;
use tsbx::config::TsbxConfig;
use tsbx::executor_client::ExecutorClient;
use tsbx::objstore::LocalFsObjectStore;
use tsbx::scheduler::{ClusterScheduler, ContainerScheduler, DockerScheduler};
use tsbx::scheduling_service::{ensure_local_node, refresh_node_health, SchedulingService};
use tsbx::session_service::SessionService;
use tsbx::state_sync::StateSyncService;
use tsbx::task_manager::{TaskManager, TaskSpec};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = TsbxConfig::load()?;
    tsbx::logging::init_service_logging(&cfg.log_dir, "tsbx-controller")?;

    info!("connecting to MySQL...");
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.database_url)
        .await?;

    if std::env::var("SKIP_MIGRATIONS").is_err() {
        match sqlx::migrate!("./migrations").run(&pool).await {
            Ok(()) => info!("database migrations applied"),
            Err(e) if e.to_string().contains("already applied") => {
                info!("migrations already applied, continuing");
            }
            Err(e) => {
                error!("migration error: {e}");
                return Err(e.into());
            }
        }
    }

    let scheduler: Arc<dyn ContainerScheduler> = match cfg.runtime_kind.as_str() {
        "cluster" => Arc::new(ClusterScheduler::new(cfg.cluster_endpoint.clone())),
        _ => {
            let docker = bollard::Docker::connect_with_local_defaults()?;
            Arc::new(DockerScheduler::new(docker, cfg.executor_port))
        }
    };

    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "tsbx-local".to_string());
    let node = ensure_local_node(
        &pool,
        &hostname,
        &cfg.runtime_kind,
        &cfg.bind_addr,
        8.0,
        16384,
        50,
    )
    .await?;
    info!(node_id = %node.id, hostname = %node.hostname, "runtime node registered");

    let control_plane_url = format!("http://{}", cfg.bind_addr);
    let scheduling = Arc::new(SchedulingService::new(pool.clone(), scheduler.clone(), control_plane_url));

    let executor = Arc::new(ExecutorClient::new(
        std::time::Duration::from_secs(cfg.executor_connect_timeout_secs),
        std::time::Duration::from_secs(cfg.executor_call_timeout_secs),
        cfg.max_retry_attempts,
        cfg.retry_backoff_base_secs,
    ));

    let objstore = Arc::new(LocalFsObjectStore::new(cfg.objstore_root.clone(), cfg.objstore_bucket.clone()));

    let sessions = Arc::new(SessionService::new(
        pool.clone(),
        scheduler.clone(),
        scheduling.clone(),
        executor.clone(),
        objstore.clone(),
        cfg.objstore_bucket.clone(),
        cfg.executor_port,
        cfg.default_timeout_secs,
        cfg.max_timeout_secs,
        cfg.default_cpu.clone(),
        cfg.default_memory.clone(),
        cfg.default_disk.clone(),
    ));

    let callbacks = Arc::new(CallbackHandler::new(pool.clone(), scheduling.clone()));

    let state_sync = Arc::new(StateSyncService::new(pool.clone(), scheduler.clone(), scheduling.clone()));
    if let Err(e) = state_sync.sync_on_startup().await {
        warn!("startup state-sync reconciliation failed: {e}");
    }

    let cleanup = Arc::new(CleanupService::new(
        pool.clone(),
        sessions.clone(),
        scheduler.clone(),
        scheduling.clone(),
        cfg.idle_timeout_minutes,
        cfg.max_lifetime_hours,
        cfg.creating_timeout_secs,
    ));

    let mut tasks = TaskManager::new();
    let cleanup_interval = std::time::Duration::from_secs(cfg.cleanup_interval_secs);
    let health_interval = std::time::Duration::from_secs(cfg.health_check_interval_secs);

    {
        let s = state_sync.clone();
        tasks.register(TaskSpec::new("state-sync-health", health_interval, health_interval, move || {
            let s = s.clone();
            async move { s.periodic_health_check().await }
        }));
    }
    {
        let pool = pool.clone();
        let scheduler = scheduler.clone();
        let hostname = hostname.clone();
        tasks.register(TaskSpec::new("scheduler-health-refresh", health_interval, health_interval, move || {
            let pool = pool.clone();
            let scheduler = scheduler.clone();
            let hostname = hostname.clone();
            async move { refresh_node_health(&pool, &scheduler, &hostname).await }
        }));
    }
    {
        let c = cleanup.clone();
        tasks.register(TaskSpec::new("cleanup-idle", cleanup_interval, cleanup_interval, move || {
            let c = c.clone();
            async move { c.cleanup_idle_sessions().await }
        }));
    }
    {
        let c = cleanup.clone();
        tasks.register(TaskSpec::new("cleanup-stuck-creating", cleanup_interval, cleanup_interval, move || {
            let c = c.clone();
            async move { c.cleanup_stuck_creating().await }
        }));
    }
    {
        let c = cleanup.clone();
        tasks.register(TaskSpec::new("cleanup-orphans", cleanup_interval, cleanup_interval, move || {
            let c = c.clone();
            async move { c.cleanup_orphans().await }
        }));
    }
    tasks.start_all();

    let state = Arc::new(AppState {
        sessions,
        callbacks,
        scheduler,
        objstore,
        pool,
        objstore_bucket: cfg.objstore_bucket.clone(),
        callback_shared_token: cfg.callback_shared_token.clone(),
        started_at: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
    });

    let bind_addr = cfg.bind_addr.clone();
    let result = serve(state, &bind_addr).await;
    tasks.stop_all().await;
    result
}
