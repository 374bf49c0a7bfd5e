//! # 执行器服务
//!
//! `run`/`kill`/`idleBeat`/`log`四个入站操作的业务实现。
//! 工作者按任务id懒创建；处理器解析、工作者替换判定与阻塞策略
//! 准入在同一把工作者表锁内完成，对并发触发保持原子。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use jobhive_core::{
    BlockStrategy, GlueType, IdleBeatRequest, KillRequest, LogRequest, LogResult, Response,
    TriggerRequest,
};

use crate::callback::CallbackDispatcher;
use crate::handler::{HandlerRegistry, JobHandler};
use crate::job_worker::JobWorker;
use crate::log::JobLogAppender;
use crate::script::ScriptJobHandler;

pub struct ExecutorService {
    handlers: HandlerRegistry,
    workers: Mutex<HashMap<i64, Arc<JobWorker>>>,
    callback: Arc<CallbackDispatcher>,
    appender: Arc<JobLogAppender>,
    queue_capacity: usize,
}

impl ExecutorService {
    pub fn new(
        callback: Arc<CallbackDispatcher>,
        appender: Arc<JobLogAppender>,
        queue_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            handlers: HandlerRegistry::new(),
            workers: Mutex::new(HashMap::new()),
            callback,
            appender,
            queue_capacity,
        })
    }

    /// 进程启动阶段显式注册处理器
    pub fn register_handler(&self, name: &str, handler: Arc<dyn JobHandler>) {
        self.handlers.register(name, handler);
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.names()
    }

    /// 受理一次触发。按阻塞策略决定入队、拒绝或换人执行。
    pub async fn run(&self, req: TriggerRequest) -> Response<String> {
        let mut workers = self.workers.lock().await;
        // 顺带清理已自行销毁的工作者
        workers.retain(|_, worker| !worker.is_stopped());

        let mut worker = workers.get(&req.job_id).cloned();

        // 解析处理器；处理器或脚本源变更时替换旧工作者
        let (handler, handler_name): (Arc<dyn JobHandler>, String) = match req.glue_type {
            GlueType::Bean => match self.handlers.load(&req.executor_handler) {
                Some(handler) => (handler, req.executor_handler.clone()),
                None => {
                    return Response::of_fail(format!(
                        "任务处理器未找到: {}",
                        req.executor_handler
                    ));
                }
            },
            _ => {
                let script = match ScriptJobHandler::new(
                    req.job_id,
                    req.glue_type,
                    req.glue_source.clone(),
                    req.glue_updatetime,
                    self.appender.glue_dir(),
                ) {
                    Ok(script) => script,
                    Err(e) => return Response::of_fail(e.to_string()),
                };
                (Arc::new(script), String::new())
            }
        };

        if let Some(existing) = &worker {
            let changed = match req.glue_type {
                GlueType::Bean => existing.handler_name != handler_name,
                _ => existing.glue_updatetime != req.glue_updatetime,
            };
            if changed {
                info!(job_id = req.job_id, "处理器或脚本源变更，终止旧工作者");
                existing.stop("处理器变更，更换任务工作者");
                workers.remove(&req.job_id);
                worker = None;
            }
        }

        // 阻塞策略准入
        if let Some(existing) = &worker {
            if existing.is_running_or_has_queue() {
                let block_strategy = BlockStrategy::resolve(
                    &req.executor_block_strategy,
                    BlockStrategy::SerialExecution,
                );
                match block_strategy {
                    BlockStrategy::DiscardLater => {
                        warn!(job_id = req.job_id, "阻塞策略DISCARD_LATER生效，触发被丢弃");
                        return Response::of_fail("任务执行中，阻塞策略DISCARD_LATER拒绝触发");
                    }
                    BlockStrategy::CoverEarly => {
                        info!(job_id = req.job_id, "阻塞策略COVER_EARLY生效，终止进行中的执行");
                        existing.stop("阻塞策略COVER_EARLY，后到触发优先");
                        workers.remove(&req.job_id);
                        worker = None;
                    }
                    BlockStrategy::SerialExecution => {}
                }
            }
        }

        let worker = match worker {
            Some(worker) => worker,
            None => {
                let worker = JobWorker::spawn(
                    req.job_id,
                    handler,
                    handler_name,
                    req.glue_updatetime,
                    self.queue_capacity,
                    Arc::clone(&self.callback),
                    Arc::clone(&self.appender),
                );
                workers.insert(req.job_id, Arc::clone(&worker));
                worker
            }
        };

        worker.push_trigger(req)
    }

    /// 终止任务。无论任务是否在执行都返回成功（幂等）。
    pub async fn kill(&self, req: KillRequest) -> Response<String> {
        let mut workers = self.workers.lock().await;
        if let Some(worker) = workers.remove(&req.job_id) {
            worker.stop("人工终止任务");
            info!(job_id = req.job_id, "任务已发出终止信号");
        }
        Response::of_success()
    }

    /// 空闲探测：无工作者、或工作者空闲且队列为空才算空闲
    pub async fn idle_beat(&self, req: IdleBeatRequest) -> Response<String> {
        let workers = self.workers.lock().await;
        match workers.get(&req.job_id) {
            Some(worker) if !worker.is_stopped() && worker.is_running_or_has_queue() => {
                Response::of_fail("任务执行中或触发队列非空")
            }
            _ => Response::of_success(),
        }
    }

    /// 读取执行日志分片
    pub async fn read_log(&self, req: LogRequest) -> Response<LogResult> {
        let log_file = self.appender.log_file_path(req.log_date_time, req.log_id);
        let result = self.appender.read(&log_file, req.from_line_num);
        Response::of_success_with(result)
    }

    /// 停机：终止全部工作者
    pub async fn stop_all_workers(&self) {
        let mut workers = self.workers.lock().await;
        for (job_id, worker) in workers.drain() {
            worker.stop("执行器停机");
            info!(job_id, "停机终止工作者");
        }
    }
}
