use crate::application::ports::{
    ConnectivityObserver, LocalStore, OperationQueue, RemoteService, SyncCheckpoint,
};
use crate::application::services::{
    RecordService, RetryPolicy, SyncComponents, SyncOrchestrator, SyncScheduler, SyncSettings,
};
use crate::domain::value_objects::TenantId;
use crate::infrastructure::connectivity::ConnectivityMonitor;
use crate::infrastructure::database::{ConnectionPool, SqliteLocalStore, SqliteOperationQueue};
use crate::infrastructure::remote::HttpRemoteService;
use crate::infrastructure::storage::FileSyncCheckpoint;
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Everything the process holds: config, pool, orchestrator and the background tasks.
///
/// Created once at start-up (or after a tenant switch) with [`AppState::new`]
/// and torn down with [`AppState::shutdown`].
pub struct AppState {
    pub config: AppConfig,
    pub tenant_id: TenantId,
    pub pool: ConnectionPool,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub orchestrator: SyncOrchestrator,
    pub records: RecordService,
    remote: HttpRemoteService,
    scheduler: Mutex<Option<SyncScheduler>>,
    probe: Mutex<Option<JoinHandle<()>>>,
}

impl AppState {
    pub async fn new(config: AppConfig, tenant_id: TenantId) -> Result<Self, AppError> {
        config.validate().map_err(AppError::ConfigurationError)?;

        let data_dir = config.data_dir();
        tokio::fs::create_dir_all(&data_dir).await.map_err(|e| {
            AppError::LocalDataUnavailable(format!("{}: {e}", data_dir.display()))
        })?;

        let pool = ConnectionPool::new(
            &config.database_url(),
            config.database.max_connections,
            Duration::from_secs(config.database.connection_timeout),
        )
        .await
        .map_err(|e| AppError::LocalDataUnavailable(e.to_string()))?;
        if let Err(err) = pool.migrate().await {
            tracing::error!(target: "store", error = %err, "local database migration failed");
            pool.close().await;
            return Err(AppError::LocalDataUnavailable(err.to_string()));
        }

        let store: Arc<dyn LocalStore> = Arc::new(
            SqliteLocalStore::new(pool.clone()).with_squash_updates(config.sync.squash_updates),
        );
        let queue: Arc<dyn OperationQueue> = Arc::new(SqliteOperationQueue::new(
            pool.clone(),
            RetryPolicy::from_config(&config.sync),
        ));
        let remote = HttpRemoteService::new(&config.remote, config.sync.request_timeout())?;
        let connectivity = Arc::new(ConnectivityMonitor::new(true));
        let checkpoint: Arc<dyn SyncCheckpoint> =
            Arc::new(FileSyncCheckpoint::new(config.checkpoint_path()));

        let orchestrator = SyncOrchestrator::new(
            tenant_id.clone(),
            SyncComponents {
                store: Arc::clone(&store),
                queue,
                remote: Arc::new(remote.clone()) as Arc<dyn RemoteService>,
                connectivity: Arc::clone(&connectivity) as Arc<dyn ConnectivityObserver>,
                checkpoint,
            },
            SyncSettings::from_config(&config),
        );
        orchestrator.recover().await?;
        let records = RecordService::new(store, orchestrator.clone());

        tracing::info!(
            target: "store",
            tenant = %tenant_id,
            data_dir = %data_dir.display(),
            "fieldsync state initialised"
        );

        Ok(Self {
            config,
            tenant_id,
            pool,
            connectivity,
            orchestrator,
            records,
            remote,
            scheduler: Mutex::new(None),
            probe: Mutex::new(None),
        })
    }

    /// Starts the reachability probe and the periodic scheduler. Calling it
    /// twice keeps the first scheduler.
    pub async fn start_scheduler(&self) {
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.is_some() {
            return;
        }

        let mut probe = self.probe.lock().await;
        if probe.is_none() {
            *probe = Some(self.connectivity.spawn_probe(
                self.remote.client().clone(),
                self.remote.base_url().to_string(),
                self.config.sync.interval().min(Duration::from_secs(30)),
            ));
        }

        *scheduler = Some(SyncScheduler::start(
            self.orchestrator.clone(),
            Arc::clone(&self.connectivity) as Arc<dyn ConnectivityObserver>,
            self.config.sync.interval(),
        ));
    }

    /// Stops triggering new cycles, waits for a running one and closes the
    /// database.
    pub async fn shutdown(&self) {
        if let Some(mut scheduler) = self.scheduler.lock().await.take() {
            scheduler.stop().await;
        }
        if let Some(probe) = self.probe.lock().await.take() {
            probe.abort();
        }
        self.pool.close().await;
        tracing::info!(target: "store", "fieldsync state shut down");
    }
}
