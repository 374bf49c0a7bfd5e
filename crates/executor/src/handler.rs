//! # 任务处理器
//!
//! 处理器在进程启动时显式注册到`HandlerRegistry`，按名称解析；
//! 不做任何运行时扫描，注册集合静态可查。执行上下文提供参数、
//! 分片信息、执行日志与协作式取消检查。

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use jobhive_core::Result;

use crate::log::JobLogAppender;

/// 一次执行的上下文
#[derive(Clone)]
pub struct JobContext {
    pub job_id: i64,
    pub log_id: i64,
    pub params: String,
    pub shard_index: i32,
    pub shard_total: i32,
    cancel_rx: watch::Receiver<bool>,
    appender: Arc<JobLogAppender>,
    log_file: std::path::PathBuf,
}

impl JobContext {
    pub fn new(
        job_id: i64,
        log_id: i64,
        params: String,
        shard_index: i32,
        shard_total: i32,
        cancel_rx: watch::Receiver<bool>,
        appender: Arc<JobLogAppender>,
        log_file: std::path::PathBuf,
    ) -> Self {
        Self {
            job_id,
            log_id,
            params,
            shard_index,
            shard_total,
            cancel_rx,
            appender,
            log_file,
        }
    }

    /// 协作式取消检查点。长任务应周期性调用，
    /// 返回true时尽快收尾退出。
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// 追加一行执行日志，供调度中心`log`接口轮询
    pub fn log(&self, line: &str) {
        self.appender.append(&self.log_file, line);
    }
}

/// 任务处理器接口。init在首个任务前执行一次，destroy在工作者
/// 销毁时执行一次。execute返回成功消息或以错误表示失败。
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: JobContext) -> Result<String>;

    async fn destroy(&self) -> Result<()> {
        Ok(())
    }
}

type ExecFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;
type ExecFn = dyn Fn(JobContext) -> ExecFuture + Send + Sync;

/// 以闭包形式注册的处理器
pub struct FnJobHandler {
    exec: Box<ExecFn>,
}

impl FnJobHandler {
    pub fn new<F, Fut>(exec: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Self {
            exec: Box::new(move |ctx| Box::pin(exec(ctx))),
        }
    }
}

#[async_trait]
impl JobHandler for FnJobHandler {
    async fn execute(&self, ctx: JobContext) -> Result<String> {
        (self.exec)(ctx).await
    }
}

/// 处理器注册表
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, handler: Arc<dyn JobHandler>) {
        info!(handler = name, "注册任务处理器");
        self.handlers
            .write()
            .expect("处理器注册表锁中毒")
            .insert(name.to_string(), handler);
    }

    pub fn load(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .expect("处理器注册表锁中毒")
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers
            .read()
            .expect("处理器注册表锁中毒")
            .keys()
            .cloned()
            .collect()
    }
}
