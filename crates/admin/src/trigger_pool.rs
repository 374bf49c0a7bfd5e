//! # 触发派发池
//!
//! 快慢两个有界工作池。默认走快池；最近一分钟内慢触发
//! （单次派发超过500ms）累计达到阈值的任务改走慢池，防止慢任务
//! 在池级别阻塞快任务。队列满时快速失败并记录触发失败，
//! 绝不反向阻塞扫描循环。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use jobhive_core::constants::{
    FAST_POOL_QUEUE_SIZE, SLOW_POOL_QUEUE_SIZE, SLOW_ROUTE_THRESHOLD, TRIGGER_SLOW_MS,
};

use crate::model::TriggerTask;

/// 触发任务的实际执行方。生产实现为`JobTrigger`；
/// 测试可注入记录型实现。
#[async_trait]
pub trait TriggerRunner: Send + Sync + 'static {
    async fn run_trigger(&self, task: TriggerTask);

    /// 池饱和被拒绝的任务在此落触发失败记录
    async fn on_rejected(&self, task: TriggerTask, reason: String);
}

/// 每分钟一轮的慢触发计数窗口
struct SlowWindow {
    minute: i64,
    counts: HashMap<i64, u32>,
}

pub struct TriggerPool {
    fast_tx: mpsc::Sender<TriggerTask>,
    slow_tx: mpsc::Sender<TriggerTask>,
    slow_window: StdMutex<SlowWindow>,
    runner: Arc<dyn TriggerRunner>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl TriggerPool {
    /// 启动快慢两池的消费工作者
    pub fn start(
        fast_max: usize,
        slow_max: usize,
        runner: Arc<dyn TriggerRunner>,
    ) -> Arc<Self> {
        let (fast_tx, fast_rx) = mpsc::channel(FAST_POOL_QUEUE_SIZE);
        let (slow_tx, slow_rx) = mpsc::channel(SLOW_POOL_QUEUE_SIZE);
        let (shutdown_tx, _) = watch::channel(false);

        let pool = Arc::new(Self {
            fast_tx,
            slow_tx,
            slow_window: StdMutex::new(SlowWindow {
                minute: now_minute(),
                counts: HashMap::new(),
            }),
            runner,
            workers: StdMutex::new(Vec::new()),
            shutdown_tx,
        });

        pool.spawn_workers(fast_max, fast_rx, "fast");
        pool.spawn_workers(slow_max, slow_rx, "slow");
        info!(fast_max, slow_max, "触发派发池已启动");
        pool
    }

    fn spawn_workers(
        self: &Arc<Self>,
        count: usize,
        rx: mpsc::Receiver<TriggerTask>,
        pool_name: &'static str,
    ) {
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = self.workers.lock().expect("工作者句柄锁中毒");
        for _ in 0..count {
            let pool = Arc::clone(self);
            let rx = Arc::clone(&rx);
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            workers.push(tokio::spawn(async move {
                loop {
                    let task = tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        task = async {
                            let mut guard = rx.lock().await;
                            guard.recv().await
                        } => task,
                    };
                    match task {
                        Some(task) => pool.execute(task).await,
                        None => break,
                    }
                }
                tracing::debug!(pool = pool_name, "派发工作者退出");
            }));
        }
    }

    /// 提交一次触发。按慢触发历史选择快/慢池；队列满立即失败。
    pub fn trigger(&self, task: TriggerTask) {
        let (tx, pool_name) = if self.use_slow_pool(task.job_id) {
            (&self.slow_tx, "slow")
        } else {
            (&self.fast_tx, "fast")
        };

        if let Err(err) = tx.try_send(task) {
            let task = match err {
                mpsc::error::TrySendError::Full(task) => task,
                mpsc::error::TrySendError::Closed(task) => task,
            };
            error!(
                job_id = task.job_id,
                pool = pool_name,
                "触发池队列已满，任务被拒绝"
            );
            let runner = Arc::clone(&self.runner);
            let reason = format!("{pool_name}触发池饱和，任务被拒绝");
            tokio::spawn(async move {
                runner.on_rejected(task, reason).await;
            });
        }
    }

    async fn execute(&self, task: TriggerTask) {
        let job_id = task.job_id;
        let start = Instant::now();
        self.runner.run_trigger(task).await;

        let cost = start.elapsed().as_millis();
        if cost > TRIGGER_SLOW_MS {
            warn!(job_id, cost_ms = cost as u64, "触发耗时超过慢阈值");
            self.record_slow(job_id);
        }
    }

    fn record_slow(&self, job_id: i64) {
        let mut window = self.slow_window.lock().expect("慢触发窗口锁中毒");
        let minute = now_minute();
        if window.minute != minute {
            window.minute = minute;
            window.counts.clear();
        }
        *window.counts.entry(job_id).or_insert(0) += 1;
    }

    fn use_slow_pool(&self, job_id: i64) -> bool {
        let window = self.slow_window.lock().expect("慢触发窗口锁中毒");
        if window.minute != now_minute() {
            return false;
        }
        window
            .counts
            .get(&job_id)
            .map(|count| *count >= SLOW_ROUTE_THRESHOLD)
            .unwrap_or(false)
    }

    /// 通知工作者退出并等待收尾。队列中未消费的任务随池丢弃。
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().expect("工作者句柄锁中毒");
            workers.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        info!("触发派发池已停止");
    }
}

fn now_minute() -> i64 {
    chrono::Utc::now().timestamp() / 60
}
