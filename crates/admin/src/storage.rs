//! # 仓储与调度锁接口
//!
//! 持久化引擎是外部协作方，调度核心只依赖这里的trait。
//! 自带的内存实现用于内嵌部署与测试。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use jobhive_core::Result;

use crate::model::{JobGroup, JobInfo, JobLog};

/// 任务仓储
#[async_trait]
pub trait JobInfoStore: Send + Sync {
    async fn load(&self, id: i64) -> Result<Option<JobInfo>>;

    /// 查询下次触发时间不晚于max_next_time的运行中任务，按触发时间升序
    async fn schedule_query(
        &self,
        max_next_time: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobInfo>>;

    /// 回写调度字段（触发时间与状态）
    async fn schedule_update(&self, job: &JobInfo) -> Result<()>;

    async fn save(&self, job: JobInfo) -> Result<i64>;
}

/// 执行器组仓储
#[async_trait]
pub trait JobGroupStore: Send + Sync {
    async fn load(&self, id: i64) -> Result<Option<JobGroup>>;

    async fn save(&self, group: JobGroup) -> Result<i64>;
}

/// 调度日志仓储
#[async_trait]
pub trait JobLogStore: Send + Sync {
    /// 保存并分配日志id
    async fn save(&self, log: JobLog) -> Result<i64>;

    async fn load(&self, id: i64) -> Result<Option<JobLog>>;

    async fn update(&self, log: &JobLog) -> Result<()>;

    /// 触发成功但在before之前仍未回报结果的日志
    async fn find_unfinished_before(&self, before: DateTime<Utc>) -> Result<Vec<JobLog>>;

    /// 取出需要失败重试的日志并原子标记，避免重复派发
    async fn take_fail_retry_logs(&self, limit: usize) -> Result<Vec<JobLog>>;
}

/// 调度周期互斥锁。多实例部署时由外部锁服务实现，
/// 同一周期窗口内只有一个实例执行扫描。
#[async_trait]
pub trait ScheduleLock: Send + Sync {
    /// 非阻塞尝试加锁；拿不到锁说明其他实例正在调度，本周期整体跳过
    async fn try_lock(&self) -> Result<bool>;

    async fn unlock(&self) -> Result<()>;
}

// ---------------------- 内存实现 ----------------------

#[derive(Default)]
pub struct MemoryJobInfoStore {
    jobs: RwLock<HashMap<i64, JobInfo>>,
    id_seq: AtomicI64,
}

impl MemoryJobInfoStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobInfoStore for MemoryJobInfoStore {
    async fn load(&self, id: i64) -> Result<Option<JobInfo>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn schedule_query(
        &self,
        max_next_time: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobInfo>> {
        let jobs = self.jobs.read().await;
        let mut due: Vec<JobInfo> = jobs
            .values()
            .filter(|job| {
                job.trigger_status == jobhive_core::TriggerStatus::Running
                    && job
                        .trigger_next_time
                        .map(|next| next <= max_next_time)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|job| job.trigger_next_time);
        due.truncate(limit);
        Ok(due)
    }

    async fn schedule_update(&self, job: &JobInfo) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if let Some(stored) = jobs.get_mut(&job.id) {
            stored.trigger_status = job.trigger_status;
            stored.trigger_last_time = job.trigger_last_time;
            stored.trigger_next_time = job.trigger_next_time;
        }
        Ok(())
    }

    async fn save(&self, mut job: JobInfo) -> Result<i64> {
        if job.id == 0 {
            job.id = self.id_seq.fetch_add(1, Ordering::SeqCst) + 1;
        }
        let id = job.id;
        self.jobs.write().await.insert(id, job);
        Ok(id)
    }
}

#[derive(Default)]
pub struct MemoryJobGroupStore {
    groups: RwLock<HashMap<i64, JobGroup>>,
    id_seq: AtomicI64,
}

impl MemoryJobGroupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobGroupStore for MemoryJobGroupStore {
    async fn load(&self, id: i64) -> Result<Option<JobGroup>> {
        Ok(self.groups.read().await.get(&id).cloned())
    }

    async fn save(&self, mut group: JobGroup) -> Result<i64> {
        if group.id == 0 {
            group.id = self.id_seq.fetch_add(1, Ordering::SeqCst) + 1;
        }
        let id = group.id;
        self.groups.write().await.insert(id, group);
        Ok(id)
    }
}

#[derive(Default)]
pub struct MemoryJobLogStore {
    logs: RwLock<HashMap<i64, JobLog>>,
    id_seq: AtomicI64,
}

impl MemoryJobLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobLogStore for MemoryJobLogStore {
    async fn save(&self, mut log: JobLog) -> Result<i64> {
        if log.id == 0 {
            log.id = self.id_seq.fetch_add(1, Ordering::SeqCst) + 1;
        }
        let id = log.id;
        self.logs.write().await.insert(id, log);
        Ok(id)
    }

    async fn load(&self, id: i64) -> Result<Option<JobLog>> {
        Ok(self.logs.read().await.get(&id).cloned())
    }

    async fn update(&self, log: &JobLog) -> Result<()> {
        self.logs.write().await.insert(log.id, log.clone());
        Ok(())
    }

    async fn find_unfinished_before(&self, before: DateTime<Utc>) -> Result<Vec<JobLog>> {
        let logs = self.logs.read().await;
        Ok(logs
            .values()
            .filter(|log| log.is_pending_handle() && log.trigger_time < before)
            .cloned()
            .collect())
    }

    async fn take_fail_retry_logs(&self, limit: usize) -> Result<Vec<JobLog>> {
        let fail_code = jobhive_core::Response::<String>::FAIL_CODE;
        let mut logs = self.logs.write().await;
        let mut picked = Vec::new();
        for log in logs.values_mut() {
            if picked.len() >= limit {
                break;
            }
            let failed = log.trigger_code == fail_code || log.handle_code == fail_code;
            if failed && log.executor_fail_retry_count > 0 && !log.fail_retry_dispatched {
                log.fail_retry_dispatched = true;
                picked.push(log.clone());
            }
        }
        Ok(picked)
    }
}

/// 单实例内存锁。多实例部署应替换为数据库/Redis等外部锁服务实现。
#[derive(Default)]
pub struct MemoryScheduleLock {
    locked: AtomicBool,
}

impl MemoryScheduleLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleLock for MemoryScheduleLock {
    async fn try_lock(&self) -> Result<bool> {
        Ok(self
            .locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }

    async fn unlock(&self) -> Result<()> {
        self.locked.store(false, Ordering::SeqCst);
        Ok(())
    }
}
