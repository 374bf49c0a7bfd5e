//! # 调度中心应用装配
//!
//! 显式的应用上下文：锁、仓储、路由、触发池、扫描循环与openapi
//! 在这里按依赖顺序组装并注入，不依赖进程级全局状态，
//! 方便在测试中以内存实现独立驱动调度核心。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use jobhive_core::{AdminConfig, JobHiveError, Result};

use crate::api::{create_router, OpenApiState};
use crate::complete::JobCompleteService;
use crate::executor_client::{ExecutorRpc, HttpExecutorRpc};
use crate::registry::RegistryService;
use crate::route::Router;
use crate::scheduler::Scheduler;
use crate::storage::{
    JobGroupStore, JobInfoStore, JobLogStore, MemoryJobGroupStore, MemoryJobInfoStore,
    MemoryJobLogStore, MemoryScheduleLock, ScheduleLock,
};
use crate::trigger::JobTrigger;
use crate::trigger_pool::TriggerPool;

/// 调度核心依赖的外部存储与锁服务
pub struct AdminStores {
    pub job_store: Arc<dyn JobInfoStore>,
    pub group_store: Arc<dyn JobGroupStore>,
    pub log_store: Arc<dyn JobLogStore>,
    pub lock: Arc<dyn ScheduleLock>,
}

impl AdminStores {
    /// 内嵌部署与测试使用的内存实现
    pub fn in_memory() -> Self {
        Self {
            job_store: Arc::new(MemoryJobInfoStore::new()),
            group_store: Arc::new(MemoryJobGroupStore::new()),
            log_store: Arc::new(MemoryJobLogStore::new()),
            lock: Arc::new(MemoryScheduleLock::new()),
        }
    }
}

/// 运行中的调度中心实例
pub struct AdminApp {
    pub stores: AdminStores,
    pub registry: Arc<RegistryService>,
    pub pool: Arc<TriggerPool>,
    pub scheduler: Arc<Scheduler>,
    pub complete: Arc<JobCompleteService>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl AdminApp {
    /// 装配并启动调度中心的全部后台服务与openapi
    pub async fn start(config: AdminConfig, stores: AdminStores) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let registry = RegistryService::new();
        let rpc: Arc<dyn ExecutorRpc> = Arc::new(HttpExecutorRpc::new(config.access_token.clone())?);
        let router = Arc::new(Router::new(Arc::clone(&rpc)));

        let trigger = Arc::new(JobTrigger::new(
            Arc::clone(&stores.job_store),
            Arc::clone(&stores.group_store),
            Arc::clone(&stores.log_store),
            Arc::clone(&registry),
            router,
            rpc,
        ));
        let pool = TriggerPool::start(
            config.trigger_pool_fast_max,
            config.trigger_pool_slow_max,
            trigger,
        );

        let pre_read_count = (config.trigger_pool_fast_max + config.trigger_pool_slow_max) * 10;
        let scheduler = Scheduler::new(
            Arc::clone(&stores.job_store),
            Arc::clone(&stores.lock),
            Arc::clone(&pool),
            pre_read_count,
        );

        let complete = JobCompleteService::new(
            Arc::clone(&stores.job_store),
            Arc::clone(&stores.log_store),
            Arc::clone(&registry),
            Arc::clone(&pool),
        );

        let mut handles = Vec::new();
        handles.push(registry.start_sweep_task(shutdown_rx.clone()));
        handles.extend(scheduler.start(shutdown_rx.clone()));
        handles.extend(complete.start_monitor_tasks(
            Duration::from_secs(config.fail_retry_scan_interval_secs),
            shutdown_rx.clone(),
        ));

        // openapi服务
        let api_state = OpenApiState {
            complete: Arc::clone(&complete),
            registry: Arc::clone(&registry),
            access_token: config.access_token.clone(),
        };
        let api_router = create_router(api_state);
        let listener = tokio::net::TcpListener::bind(&config.bind_address)
            .await
            .map_err(|e| {
                JobHiveError::Configuration(format!(
                    "openapi监听地址绑定失败 {}: {e}",
                    config.bind_address
                ))
            })?;
        info!(address = %config.bind_address, "调度中心openapi已启动");

        let mut server_shutdown = shutdown_rx;
        handles.push(tokio::spawn(async move {
            let shutdown = async move {
                let _ = server_shutdown.changed().await;
            };
            if let Err(e) = axum::serve(listener, api_router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "openapi服务异常退出");
            }
        }));

        Ok(Self {
            stores,
            registry,
            pool,
            scheduler,
            complete,
            shutdown_tx,
            handles,
        })
    }

    /// 优雅停止：先停扫描与守护任务，再停触发池
    pub async fn stop(self) {
        info!("调度中心停止中");
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        self.pool.stop().await;
        info!("调度中心已停止");
    }
}
