//! # 任务工作者
//!
//! 每个活跃任务id一个工作者任务：持有有界触发队列与按log_id去重
//! 的待执行集合，串行消费队列并执行处理器。终止信号是协作式的
//! （取消令牌 + 执行任务中止），终止与正常完成竞争时只产生一个
//! 终态回调。连续空闲轮询超过阈值后工作者自行销毁。

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use jobhive_core::constants::{JOB_IDLE_TIMES, JOB_POLL_TIMEOUT_SECS};
use jobhive_core::{CallbackRequest, HandleCode, JobHiveError, Response, TriggerRequest};

use crate::callback::CallbackDispatcher;
use crate::handler::{JobContext, JobHandler};
use crate::log::JobLogAppender;

/// 工作者运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    ToBeKilled,
    Stopped,
}

struct WorkerShared {
    running: AtomicBool,
    to_stop: AtomicBool,
    stopped: AtomicBool,
    stop_reason: StdMutex<String>,
    /// 已入队尚未开始执行的log_id，兼作队列长度与去重依据
    pending_log_ids: StdMutex<HashSet<i64>>,
}

impl WorkerShared {
    fn is_stopping(&self) -> bool {
        self.to_stop.load(Ordering::SeqCst) || self.stopped.load(Ordering::SeqCst)
    }

    fn pending_len(&self) -> usize {
        self.pending_log_ids.lock().expect("待执行集合锁中毒").len()
    }
}

pub struct JobWorker {
    pub job_id: i64,
    /// BEAN处理器名称；脚本glue为空
    pub handler_name: String,
    /// 脚本源版本，变更后工作者整体替换
    pub glue_updatetime: i64,
    tx: mpsc::Sender<TriggerRequest>,
    cancel_tx: watch::Sender<bool>,
    shared: Arc<WorkerShared>,
}

impl JobWorker {
    /// 创建工作者并启动消费循环
    pub fn spawn(
        job_id: i64,
        handler: Arc<dyn JobHandler>,
        handler_name: String,
        glue_updatetime: i64,
        queue_capacity: usize,
        callback: Arc<CallbackDispatcher>,
        appender: Arc<JobLogAppender>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let shared = Arc::new(WorkerShared {
            running: AtomicBool::new(false),
            to_stop: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_reason: StdMutex::new(String::new()),
            pending_log_ids: StdMutex::new(HashSet::new()),
        });

        let worker = Arc::new(Self {
            job_id,
            handler_name,
            glue_updatetime,
            tx,
            cancel_tx,
            shared: Arc::clone(&shared),
        });

        tokio::spawn(run_loop(
            job_id, rx, handler, shared, cancel_rx, callback, appender,
        ));
        info!(job_id, "任务工作者已创建");
        worker
    }

    /// 入队一次触发。去重、停止检查与容量检查在此原子完成。
    pub fn push_trigger(&self, req: TriggerRequest) -> Response<String> {
        if self.shared.is_stopping() {
            return Response::of_fail("任务工作者已停止，稍后重试");
        }

        {
            let mut pending = self
                .shared
                .pending_log_ids
                .lock()
                .expect("待执行集合锁中毒");
            if !pending.insert(req.log_id) {
                info!(log_id = req.log_id, "重复触发请求已忽略");
                return Response::of_fail(format!("重复的触发请求, logId: {}", req.log_id));
            }
        }

        let log_id = req.log_id;
        match self.tx.try_send(req) {
            Ok(()) => Response::of_success(),
            Err(err) => {
                self.shared
                    .pending_log_ids
                    .lock()
                    .expect("待执行集合锁中毒")
                    .remove(&log_id);
                match err {
                    mpsc::error::TrySendError::Full(_) => {
                        Response::of_fail("触发队列已满，阻塞策略拒绝")
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        Response::of_fail("任务工作者已停止，稍后重试")
                    }
                }
            }
        }
    }

    /// 请求终止：标记ToBeKilled并向执行中的任务发送取消信号。
    /// 终止是尽力而为的协作式抢占，处理器在检查点响应；
    /// 不保证立即生效。幂等。
    pub fn stop(&self, reason: &str) {
        *self.shared.stop_reason.lock().expect("终止原因锁中毒") = reason.to_string();
        self.shared.to_stop.store(true, Ordering::SeqCst);
        let _ = self.cancel_tx.send(true);
    }

    pub fn run_state(&self) -> RunState {
        if self.shared.stopped.load(Ordering::SeqCst) {
            RunState::Stopped
        } else if self.shared.to_stop.load(Ordering::SeqCst) {
            RunState::ToBeKilled
        } else if self.shared.running.load(Ordering::SeqCst) {
            RunState::Running
        } else {
            RunState::Idle
        }
    }

    /// 执行中或仍有排队触发（idleBeat与阻塞策略判定使用）
    pub fn is_running_or_has_queue(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst) || self.shared.pending_len() > 0
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }
}

async fn run_loop(
    job_id: i64,
    mut rx: mpsc::Receiver<TriggerRequest>,
    handler: Arc<dyn JobHandler>,
    shared: Arc<WorkerShared>,
    cancel_rx: watch::Receiver<bool>,
    callback: Arc<CallbackDispatcher>,
    appender: Arc<JobLogAppender>,
) {
    if let Err(e) = handler.init().await {
        warn!(job_id, error = %e, "处理器init失败");
    }

    let mut idle_times = 0u32;
    loop {
        if shared.to_stop.load(Ordering::SeqCst) {
            break;
        }

        let polled = tokio::select! {
            _ = wait_for_cancel(cancel_rx.clone()) => break,
            polled = tokio::time::timeout(
                Duration::from_secs(JOB_POLL_TIMEOUT_SECS),
                rx.recv(),
            ) => polled,
        };

        match polled {
            Ok(Some(req)) => {
                idle_times = 0;
                shared
                    .pending_log_ids
                    .lock()
                    .expect("待执行集合锁中毒")
                    .remove(&req.log_id);
                shared.running.store(true, Ordering::SeqCst);
                execute_one(&req, &handler, cancel_rx.clone(), &callback, &appender).await;
                shared.running.store(false, Ordering::SeqCst);
            }
            Ok(None) => break,
            Err(_) => {
                idle_times += 1;
                if idle_times > JOB_IDLE_TIMES
                    && shared.pending_len() == 0
                    && !shared.running.load(Ordering::SeqCst)
                {
                    info!(job_id, "空闲超时，任务工作者自行销毁");
                    shared.to_stop.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    // 队列中未执行的触发统一回调失败，不允许无声丢失
    let stop_reason = shared
        .stop_reason
        .lock()
        .expect("终止原因锁中毒")
        .clone();
    while let Ok(req) = rx.try_recv() {
        shared
            .pending_log_ids
            .lock()
            .expect("待执行集合锁中毒")
            .remove(&req.log_id);
        callback.push(CallbackRequest {
            log_id: req.log_id,
            handle_code: HandleCode::FAIL,
            handle_msg: Some(format!("任务未执行，工作者终止: {stop_reason}")),
            finish_time: Utc::now(),
        });
    }

    if let Err(e) = handler.destroy().await {
        warn!(job_id, error = %e, "处理器destroy失败");
    }
    shared.stopped.store(true, Ordering::SeqCst);
    info!(job_id, "任务工作者已停止");
}

enum ExecEnd {
    Done(Result<jobhive_core::Result<String>, tokio::task::JoinError>),
    TimedOut,
    Killed,
}

async fn execute_one(
    req: &TriggerRequest,
    handler: &Arc<dyn JobHandler>,
    cancel_rx: watch::Receiver<bool>,
    callback: &Arc<CallbackDispatcher>,
    appender: &Arc<JobLogAppender>,
) {
    let log_file = appender.log_file_path(req.log_date_time, req.log_id);
    let ctx = JobContext::new(
        req.job_id,
        req.log_id,
        req.executor_params.clone(),
        req.shard_index,
        req.shard_total,
        cancel_rx.clone(),
        Arc::clone(appender),
        log_file.clone(),
    );
    ctx.log(&format!(
        "----------- 任务执行开始 -----------\n参数: {} 分片: {}/{}",
        req.executor_params, req.shard_index, req.shard_total
    ));

    // 执行任务独立spawn：既能捕获panic，也能在终止/超时后中止
    let handler_clone = Arc::clone(handler);
    let exec_ctx = ctx.clone();
    let mut exec = tokio::spawn(async move { handler_clone.execute(exec_ctx).await });

    let timeout_secs = req.executor_timeout;
    let end = {
        let exec_fut = async {
            if timeout_secs > 0 {
                match tokio::time::timeout(Duration::from_secs(timeout_secs as u64), &mut exec)
                    .await
                {
                    Ok(join) => ExecEnd::Done(join),
                    Err(_) => ExecEnd::TimedOut,
                }
            } else {
                ExecEnd::Done((&mut exec).await)
            }
        };
        tokio::select! {
            _ = wait_for_cancel(cancel_rx) => ExecEnd::Killed,
            end = exec_fut => end,
        }
    };

    let (handle_code, handle_msg) = match end {
        ExecEnd::Killed => {
            exec.abort();
            (HandleCode::KILLED, "任务被终止".to_string())
        }
        ExecEnd::TimedOut => {
            exec.abort();
            (HandleCode::TIMEOUT, "任务执行超时".to_string())
        }
        ExecEnd::Done(Ok(Ok(msg))) => (HandleCode::SUCCESS, msg),
        ExecEnd::Done(Ok(Err(e))) => (HandleCode::FAIL, e.to_string()),
        ExecEnd::Done(Err(join_err)) => {
            let msg = if join_err.is_panic() {
                "任务执行发生panic".to_string()
            } else {
                JobHiveError::Execution("执行任务被中止".to_string()).to_string()
            };
            (HandleCode::FAIL, msg)
        }
    };

    ctx.log(&format!(
        "----------- 任务执行结束 -----------\n结果: code={handle_code}, msg={handle_msg}"
    ));

    callback.push(CallbackRequest {
        log_id: req.log_id,
        handle_code,
        handle_msg: Some(handle_msg),
        finish_time: Utc::now(),
    });
}

/// 等待取消信号。信号源关闭视同取消，避免孤儿执行。
async fn wait_for_cancel(mut cancel_rx: watch::Receiver<bool>) {
    loop {
        if *cancel_rx.borrow() {
            return;
        }
        if cancel_rx.changed().await.is_err() {
            return;
        }
    }
}
