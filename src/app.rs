//! 应用装配：按运行模式启动调度中心与执行器

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use jobhive_admin::{AdminApp, AdminStores};
use jobhive_core::AppConfig;
use jobhive_executor::{ExecutorApp, FnJobHandler};

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅调度中心
    Admin,
    /// 仅执行器
    Executor,
    /// 单进程同时运行两者（内嵌部署）
    All,
}

impl AppMode {
    pub fn parse(mode: &str) -> Result<Self> {
        match mode {
            "admin" => Ok(Self::Admin),
            "executor" => Ok(Self::Executor),
            "all" => Ok(Self::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {mode}")),
        }
    }
}

pub struct Application {
    admin: Option<AdminApp>,
    executor: Option<ExecutorApp>,
}

impl Application {
    pub async fn start(config: AppConfig, mode: AppMode) -> Result<Self> {
        let admin = if matches!(mode, AppMode::Admin | AppMode::All) {
            info!("启动调度中心");
            Some(AdminApp::start(config.admin.clone(), AdminStores::in_memory()).await?)
        } else {
            None
        };

        let executor = if matches!(mode, AppMode::Executor | AppMode::All) {
            info!("启动执行器");
            let register_address = config.executor_register_address();
            let executor =
                ExecutorApp::start(config.executor.clone(), register_address).await?;
            register_sample_handlers(&executor);
            Some(executor)
        } else {
            None
        };

        Ok(Self { admin, executor })
    }

    pub async fn stop(self) {
        if let Some(executor) = self.executor {
            executor.stop().await;
        }
        if let Some(admin) = self.admin {
            admin.stop().await;
        }
    }
}

/// 示例处理器，演示显式注册方式
fn register_sample_handlers(executor: &ExecutorApp) {
    executor.register_handler(
        "demoHandler",
        Arc::new(FnJobHandler::new(|ctx| async move {
            ctx.log(&format!("demoHandler执行, 参数: {}", ctx.params));
            for step in 0..5 {
                if ctx.is_cancelled() {
                    ctx.log("收到终止信号，提前退出");
                    break;
                }
                ctx.log(&format!("处理进度 {}/5", step + 1));
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
            Ok("执行成功".to_string())
        })),
    );

    executor.register_handler(
        "shardingDemoHandler",
        Arc::new(FnJobHandler::new(|ctx| async move {
            ctx.log(&format!(
                "分片任务执行, 当前分片 {}/{}",
                ctx.shard_index, ctx.shard_total
            ));
            Ok(format!("分片{}处理完成", ctx.shard_index))
        })),
    );
}
