//! # 结果回调派发器
//!
//! 缓冲工作者产出的执行结果，攒批上报调度中心。投递失败按次数
//! 上限退避重试，仍失败则以JSON行格式溢写到本地文件，由重投
//! 任务周期性重发，成功后删除——至少一次投递，绝不无声丢失。

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use jobhive_core::constants::{CALLBACK_RETRY_INTERVAL_SECS, CALLBACK_RETRY_TIMES};
use jobhive_core::{CallbackRequest, Result};

use crate::admin_client::AdminRpc;

pub struct CallbackDispatcher {
    tx: mpsc::UnboundedSender<CallbackRequest>,
    spill_dir: PathBuf,
    admin: Arc<dyn AdminRpc>,
    spill_seq: AtomicU64,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl CallbackDispatcher {
    /// 创建派发器并启动攒批上报与溢写重投两个任务
    pub fn start(
        admin: Arc<dyn AdminRpc>,
        spill_dir: PathBuf,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Arc<Self>> {
        fs::create_dir_all(&spill_dir)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Self {
            tx,
            spill_dir,
            admin,
            spill_seq: AtomicU64::new(0),
            handles: StdMutex::new(Vec::new()),
        });

        let flush_handle = tokio::spawn(flush_loop(
            Arc::clone(&dispatcher),
            rx,
            shutdown_rx.clone(),
        ));
        let retry_handle = tokio::spawn(spill_retry_loop(Arc::clone(&dispatcher), shutdown_rx));
        dispatcher
            .handles
            .lock()
            .expect("回调任务句柄锁中毒")
            .extend([flush_handle, retry_handle]);

        Ok(dispatcher)
    }

    /// 工作者提交一条执行结果
    pub fn push(&self, callback: CallbackRequest) {
        debug!(log_id = callback.log_id, "回调入队");
        if self.tx.send(callback).is_err() {
            error!("回调队列已关闭，结果无法入队");
        }
    }

    /// 投递一批：失败退避重试，重试耗尽后溢写本地
    pub async fn deliver_with_retry(&self, batch: Vec<CallbackRequest>) {
        for attempt in 1..=CALLBACK_RETRY_TIMES {
            match self.admin.callback(&batch).await {
                Ok(resp) if resp.is_success() => {
                    debug!(count = batch.len(), "回调批次上报成功");
                    return;
                }
                Ok(resp) => {
                    warn!(
                        attempt,
                        msg = resp.msg.as_deref().unwrap_or(""),
                        "回调批次被调度中心拒绝"
                    );
                }
                Err(e) => {
                    warn!(attempt, error = %e, "回调批次上报失败");
                }
            }
            if attempt < CALLBACK_RETRY_TIMES {
                tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
            }
        }
        self.spill(&batch);
    }

    /// 溢写未投递批次，进程重启后仍可重投
    fn spill(&self, batch: &[CallbackRequest]) {
        let seq = self.spill_seq.fetch_add(1, Ordering::SeqCst);
        let file = self.spill_dir.join(format!(
            "callback-{}-{seq}.log",
            Utc::now().timestamp_millis()
        ));
        let mut lines = String::new();
        for callback in batch {
            match serde_json::to_string(callback) {
                Ok(line) => {
                    lines.push_str(&line);
                    lines.push('\n');
                }
                Err(e) => error!(log_id = callback.log_id, error = %e, "回调序列化失败"),
            }
        }
        match fs::write(&file, lines) {
            Ok(()) => warn!(file = %file.display(), count = batch.len(), "回调批次已溢写本地"),
            Err(e) => error!(error = %e, "回调溢写失败"),
        }
    }

    /// 重投所有溢写文件，成功的批次删除文件
    pub async fn retry_spilled(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.spill_dir) else {
            return 0;
        };
        let mut resent = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with("callback-") || !name.ends_with(".log") {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            let batch: Vec<CallbackRequest> = content
                .lines()
                .filter_map(|line| serde_json::from_str(line).ok())
                .collect();
            if batch.is_empty() {
                let _ = fs::remove_file(&path);
                continue;
            }
            match self.admin.callback(&batch).await {
                Ok(resp) if resp.is_success() => {
                    info!(file = %path.display(), count = batch.len(), "溢写回调重投成功");
                    let _ = fs::remove_file(&path);
                    resent += batch.len();
                }
                Ok(resp) => {
                    warn!(
                        file = %path.display(),
                        msg = resp.msg.as_deref().unwrap_or(""),
                        "溢写回调重投被拒绝"
                    );
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "溢写回调重投失败");
                }
            }
        }
        resent
    }

    pub async fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().expect("回调任务句柄锁中毒");
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// 攒批上报循环：有结果即成批，批内一次RPC
async fn flush_loop(
    dispatcher: Arc<CallbackDispatcher>,
    mut rx: mpsc::UnboundedReceiver<CallbackRequest>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let first = tokio::select! {
            _ = shutdown_rx.changed() => break,
            first = rx.recv() => first,
        };
        let Some(first) = first else { break };

        let mut batch = vec![first];
        while let Ok(more) = rx.try_recv() {
            batch.push(more);
        }
        dispatcher.deliver_with_retry(batch).await;
    }

    // 停机前清空残留，失败直接溢写
    let mut remaining = Vec::new();
    while let Ok(callback) = rx.try_recv() {
        remaining.push(callback);
    }
    if !remaining.is_empty() {
        match dispatcher.admin.callback(&remaining).await {
            Ok(resp) if resp.is_success() => {}
            _ => dispatcher.spill(&remaining),
        }
    }
    info!("回调派发循环退出");
}

async fn spill_retry_loop(
    dispatcher: Arc<CallbackDispatcher>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(CALLBACK_RETRY_INTERVAL_SECS));
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = interval.tick() => {
                dispatcher.retry_spilled().await;
            }
        }
    }
}
