//! # 调度扫描循环
//!
//! 每秒对齐整秒运行一轮：在调度锁内预读5秒窗口内到期的任务，
//! 按错过时长分为misfire补偿、立即触发与时间环预放三类处理，
//! 并统一推进下次触发时间。时间环任务每秒弹出当前及前两秒的
//! 槽位补发触发，避免秒级漂移造成漏调度。
//!
//! 调度锁只串行化扫描决策本身；拿不到锁说明其他实例正在调度，
//! 本周期整体跳过，不会出现部分双发。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use jobhive_core::constants::PRE_READ_MS;
use jobhive_core::Result;

use crate::misfire;
use crate::model::{JobInfo, TriggerTask};
use crate::schedule;
use crate::storage::{JobInfoStore, ScheduleLock};
use crate::trigger_pool::TriggerPool;

/// 时间环槽位内的一条待触发记录
#[derive(Debug, Clone)]
pub struct RingItem {
    pub job_id: i64,
    pub schedule_time: DateTime<Utc>,
}

pub struct Scheduler {
    job_store: Arc<dyn JobInfoStore>,
    lock: Arc<dyn ScheduleLock>,
    pool: Arc<TriggerPool>,
    /// 单轮预读上限，(快池+慢池工作者)×10
    pre_read_count: usize,
    ring: StdMutex<HashMap<u32, Vec<RingItem>>>,
}

impl Scheduler {
    pub fn new(
        job_store: Arc<dyn JobInfoStore>,
        lock: Arc<dyn ScheduleLock>,
        pool: Arc<TriggerPool>,
        pre_read_count: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            job_store,
            lock,
            pool,
            pre_read_count,
            ring: StdMutex::new(HashMap::new()),
        })
    }

    /// 启动扫描任务与时间环任务
    pub fn start(self: &Arc<Self>, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!("调度扫描循环启动");
        vec![
            self.spawn_scan_task(shutdown_rx.clone()),
            self.spawn_ring_task(shutdown_rx),
        ]
    }

    fn spawn_scan_task(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let cycle_start = std::time::Instant::now();
                let pre_read_hit = match scheduler.scan_once(Utc::now()).await {
                    Ok(hit) => hit,
                    Err(e) => {
                        error!(error = %e, "调度扫描周期异常");
                        false
                    }
                };

                // 本轮耗时不足1秒时对齐到下一个整秒；
                // 预读落空则直接睡到下一个窗口边界
                let cost = cycle_start.elapsed();
                if cost < Duration::from_secs(1) {
                    let base_ms: i64 = if pre_read_hit { 1000 } else { PRE_READ_MS };
                    let sleep_ms = base_ms - (Utc::now().timestamp_millis() % 1000);
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        _ = tokio::time::sleep(Duration::from_millis(sleep_ms.max(1) as u64)) => {}
                    }
                } else if *shutdown_rx.borrow() {
                    break;
                }
            }
            info!("调度扫描任务退出");
        })
    }

    fn spawn_ring_task(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let sleep_ms = 1000 - (Utc::now().timestamp_millis() % 1000);
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(Duration::from_millis(sleep_ms.max(1) as u64)) => {}
                }
                let second = Utc::now().second();
                scheduler.ring_fire(second);
            }
            info!("时间环任务退出");
        })
    }

    /// 执行一轮扫描。返回是否预读到了任务（决定下一轮的等待时长）。
    pub async fn scan_once(&self, now: DateTime<Utc>) -> Result<bool> {
        if !self.lock.try_lock().await? {
            debug!("未获得调度锁，本周期跳过");
            return Ok(false);
        }

        let result = self.scan_locked(now).await;
        self.lock.unlock().await?;
        result
    }

    async fn scan_locked(&self, now: DateTime<Utc>) -> Result<bool> {
        let max_next_time = now + chrono::Duration::milliseconds(PRE_READ_MS);
        let jobs = self
            .job_store
            .schedule_query(max_next_time, self.pre_read_count)
            .await?;
        if jobs.is_empty() {
            return Ok(false);
        }

        for mut job in jobs {
            // 单个任务的处理异常不得影响同周期的其他任务
            if let Err(e) = self.process_job(&mut job, now) {
                error!(job_id = job.id, error = %e, "任务调度处理失败");
                continue;
            }
            if let Err(e) = self.job_store.schedule_update(&job).await {
                error!(job_id = job.id, error = %e, "回写调度字段失败");
            }
        }
        Ok(true)
    }

    fn process_job(&self, job: &mut JobInfo, now: DateTime<Utc>) -> Result<()> {
        let Some(next) = job.trigger_next_time else {
            return Ok(());
        };
        let misfire_deadline = next + chrono::Duration::milliseconds(PRE_READ_MS);

        if now > misfire_deadline {
            // 错过超过阈值：按misfire策略补偿，随后从当前时刻推进
            if let Some(task) = misfire::recover(job) {
                self.pool.trigger(task);
            }
            self.refresh_next_time(job, now);
        } else if now > next {
            // 错过未超阈值：直接触发，理论调度时间为原定时刻
            self.pool.trigger(TriggerTask::of_schedule(job.id, next));
            debug!(job_id = job.id, "到期直接触发");
            self.refresh_next_time(job, now);

            // 新的下次触发仍落在预读窗口内时提前压入时间环
            if job.trigger_status == jobhive_core::TriggerStatus::Running {
                if let Some(new_next) = job.trigger_next_time {
                    if new_next <= now + chrono::Duration::milliseconds(PRE_READ_MS) {
                        self.push_ring(new_next.second(), job.id, new_next);
                        self.refresh_next_time(job, new_next);
                    }
                }
            }
        } else {
            // 未到期的预读任务压入时间环等待整秒弹出
            self.push_ring(next.second(), job.id, next);
            debug!(job_id = job.id, "预读压入时间环");
            self.refresh_next_time(job, next);
        }
        Ok(())
    }

    /// 推进下次触发时间；生成失败时停止任务调度
    fn refresh_next_time(&self, job: &mut JobInfo, from: DateTime<Utc>) {
        match schedule::next_trigger_time(job, from) {
            Ok(Some(next)) => job.advance_trigger_time(next),
            Ok(None) => {
                job.stop_schedule();
            }
            Err(e) => {
                job.stop_schedule();
                error!(
                    job_id = job.id,
                    schedule_conf = %job.schedule_conf,
                    error = %e,
                    "下次触发时间生成失败，任务已停止调度"
                );
            }
        }
    }

    fn push_ring(&self, second: u32, job_id: i64, schedule_time: DateTime<Utc>) {
        let mut ring = self.ring.lock().expect("时间环锁中毒");
        ring.entry(second % 60).or_default().push(RingItem {
            job_id,
            schedule_time,
        });
    }

    /// 弹出当前秒及前两秒的槽位并触发，按任务id去重
    pub fn ring_fire(&self, second: u32) -> usize {
        let mut items: Vec<RingItem> = Vec::new();
        {
            let mut ring = self.ring.lock().expect("时间环锁中毒");
            for offset in 0..=2u32 {
                let slot = (second + 60 - offset) % 60;
                if let Some(slot_items) = ring.remove(&slot) {
                    for item in slot_items {
                        if items.iter().any(|existing| existing.job_id == item.job_id) {
                            debug!(job_id = item.job_id, slot, "时间环发现重复任务，跳过");
                            continue;
                        }
                        items.push(item);
                    }
                }
            }
        }

        let fired = items.len();
        for item in items {
            self.pool
                .trigger(TriggerTask::of_schedule(item.job_id, item.schedule_time));
        }
        fired
    }

    /// 时间环中尚未弹出的记录数
    pub fn ring_pending(&self) -> usize {
        let ring = self.ring.lock().expect("时间环锁中毒");
        ring.values().map(|items| items.len()).sum()
    }
}
