//! # 执行器应用装配
//!
//! 组装日志目录、回调派发器、执行器服务、注册心跳与内嵌RPC服务。
//! 处理器注册在启动后、首个触发到达前由调用方显式完成。

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use jobhive_core::{ExecutorConfig, JobHiveError, Result};

use crate::admin_client::{AdminRpc, HttpAdminRpc};
use crate::callback::CallbackDispatcher;
use crate::executor::ExecutorService;
use crate::handler::JobHandler;
use crate::log::JobLogAppender;
use crate::registry::start_registry_task;
use crate::server::{create_router, EmbedServerState};

pub struct ExecutorApp {
    pub service: Arc<ExecutorService>,
    callback: Arc<CallbackDispatcher>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl ExecutorApp {
    /// 启动执行器：日志目录、回调派发、内嵌服务与注册心跳
    pub async fn start(config: ExecutorConfig, register_address: String) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let appender = Arc::new(JobLogAppender::new(&config.log_base_path)?);
        let admin: Arc<dyn AdminRpc> = Arc::new(HttpAdminRpc::new(
            config.admin_addresses.clone(),
            config.access_token.clone(),
        )?);
        let callback = CallbackDispatcher::start(
            Arc::clone(&admin),
            appender.callback_dir(),
            shutdown_rx.clone(),
        )?;
        let service = ExecutorService::new(
            Arc::clone(&callback),
            Arc::clone(&appender),
            config.job_queue_capacity,
        );

        let mut handles = Vec::new();
        handles.push(appender.start_clean_task(config.log_retention_days, shutdown_rx.clone()));

        // 内嵌RPC服务
        let server_state = EmbedServerState {
            service: Arc::clone(&service),
            access_token: config.access_token.clone(),
        };
        let router = create_router(server_state);
        let listener = tokio::net::TcpListener::bind(&config.bind_address)
            .await
            .map_err(|e| {
                JobHiveError::Configuration(format!(
                    "内嵌服务监听地址绑定失败 {}: {e}",
                    config.bind_address
                ))
            })?;
        info!(address = %config.bind_address, "执行器内嵌服务已启动");

        let mut server_shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            let shutdown = async move {
                let _ = server_shutdown.changed().await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "内嵌服务异常退出");
            }
        }));

        // 注册心跳在服务可达后启动
        handles.push(start_registry_task(
            admin,
            config.app_name.clone(),
            register_address,
            shutdown_rx,
        ));

        Ok(Self {
            service,
            callback,
            shutdown_tx,
            handles,
        })
    }

    pub fn register_handler(&self, name: &str, handler: Arc<dyn JobHandler>) {
        self.service.register_handler(name, handler);
    }

    /// 优雅停止：终止工作者、摘除注册、清空回调缓冲
    pub async fn stop(self) {
        info!("执行器停止中");
        self.service.stop_all_workers().await;
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        self.callback.stop().await;
        info!("执行器已停止");
    }
}
