//! # 执行结果完成服务
//!
//! 消化执行器回调批次：回写执行结果、成功后级联触发子任务。
//! 另带两个守护扫描：失败重试补偿与结果丢失判定。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use jobhive_core::constants::{LOST_JOB_TIMEOUT_MINS, MAX_HANDLE_MSG_LEN};
use jobhive_core::{CallbackRequest, HandleCode, Response, Result, TriggerType};

use crate::model::TriggerTask;
use crate::registry::RegistryService;
use crate::storage::{JobInfoStore, JobLogStore};
use crate::trigger_pool::TriggerPool;

pub struct JobCompleteService {
    job_store: Arc<dyn JobInfoStore>,
    log_store: Arc<dyn JobLogStore>,
    registry: Arc<RegistryService>,
    pool: Arc<TriggerPool>,
}

impl JobCompleteService {
    pub fn new(
        job_store: Arc<dyn JobInfoStore>,
        log_store: Arc<dyn JobLogStore>,
        registry: Arc<RegistryService>,
        pool: Arc<TriggerPool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            job_store,
            log_store,
            registry,
            pool,
        })
    }

    /// 处理一批回调。单条失败不影响批内其他回调。
    pub async fn handle_callbacks(&self, batch: Vec<CallbackRequest>) -> Response<String> {
        let mut failed = 0usize;
        for callback in batch {
            if let Err(e) = self.handle_one(callback).await {
                warn!(error = %e, "回调处理失败");
                failed += 1;
            }
        }
        if failed > 0 {
            Response::of_fail(format!("{failed}条回调处理失败"))
        } else {
            Response::of_success()
        }
    }

    async fn handle_one(&self, callback: CallbackRequest) -> Result<()> {
        let Some(mut log) = self.log_store.load(callback.log_id).await? else {
            return Err(jobhive_core::JobHiveError::Internal(format!(
                "回调对应的调度日志不存在: {}",
                callback.log_id
            )));
        };
        // 终态只允许写入一次：kill与正常完成竞争时先到者生效
        if log.handle_code > 0 {
            debug!(log_id = log.id, "日志已是终态，忽略重复回调");
            return Ok(());
        }

        log.handle_time = Some(callback.finish_time);
        log.handle_code = callback.handle_code;
        log.handle_msg = callback.handle_msg.map(truncate_handle_msg);
        self.log_store.update(&log).await?;

        if callback.handle_code == HandleCode::SUCCESS {
            self.cascade_children(log.job_id).await?;
        }
        Ok(())
    }

    /// 父任务执行成功后级联触发子任务
    async fn cascade_children(&self, job_id: i64) -> Result<()> {
        let Some(job) = self.job_store.load(job_id).await? else {
            return Ok(());
        };
        for child_id in &job.child_job_ids {
            info!(parent = job_id, child = child_id, "级联触发子任务");
            self.pool.trigger(TriggerTask {
                job_id: *child_id,
                trigger_type: TriggerType::Parent,
                fail_retry_count: -1,
                executor_param: None,
                address_list: None,
                sharding_param: None,
                schedule_time: None,
            });
        }
        Ok(())
    }

    /// 失败重试补偿：取出待重试日志并按剩余预算重新触发
    pub async fn scan_fail_retry(&self) -> Result<usize> {
        let logs = self.log_store.take_fail_retry_logs(100).await?;
        let count = logs.len();
        for log in logs {
            info!(
                log_id = log.id,
                job_id = log.job_id,
                remaining = log.executor_fail_retry_count - 1,
                "失败重试触发"
            );
            self.pool.trigger(TriggerTask {
                job_id: log.job_id,
                trigger_type: TriggerType::Retry,
                fail_retry_count: log.executor_fail_retry_count - 1,
                executor_param: Some(log.executor_params.clone()),
                address_list: None,
                sharding_param: parse_sharding_param(log.executor_sharding_param.as_deref()),
                schedule_time: None,
            });
        }
        Ok(count)
    }

    /// 结果丢失判定：触发成功却迟迟无回报、且执行器已从注册表
    /// 消失的日志，直接按失败完成
    pub async fn scan_lost_jobs(&self, now: DateTime<Utc>) -> Result<usize> {
        let threshold = now - chrono::Duration::minutes(LOST_JOB_TIMEOUT_MINS);
        let logs = self.log_store.find_unfinished_before(threshold).await?;
        let mut lost = 0usize;
        for mut log in logs {
            let Some(address) = log.executor_address.clone() else {
                continue;
            };
            if self.registry.is_address_alive(&address).await {
                continue;
            }
            log.handle_time = Some(now);
            log.handle_code = HandleCode::FAIL;
            log.handle_msg = Some("执行器失联，任务结果丢失，标记失败".to_string());
            self.log_store.update(&log).await?;
            warn!(log_id = log.id, address = %address, "任务结果丢失");
            lost += 1;
        }
        Ok(lost)
    }

    /// 启动失败重试与结果丢失两个守护扫描
    pub fn start_monitor_tasks(
        self: &Arc<Self>,
        fail_retry_interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let service = Arc::clone(self);
        let mut retry_shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(fail_retry_interval);
            loop {
                tokio::select! {
                    _ = retry_shutdown.changed() => break,
                    _ = interval.tick() => {
                        if let Err(e) = service.scan_fail_retry().await {
                            error!(error = %e, "失败重试扫描异常");
                        }
                    }
                }
            }
        }));

        let service = Arc::clone(self);
        let mut lost_shutdown = shutdown_rx;
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = lost_shutdown.changed() => break,
                    _ = interval.tick() => {
                        if let Err(e) = service.scan_lost_jobs(Utc::now()).await {
                            error!(error = %e, "结果丢失扫描异常");
                        }
                    }
                }
            }
        }));

        handles
    }
}

fn truncate_handle_msg(msg: String) -> String {
    if msg.chars().count() <= MAX_HANDLE_MSG_LEN {
        msg
    } else {
        msg.chars().take(MAX_HANDLE_MSG_LEN).collect()
    }
}

fn parse_sharding_param(param: Option<&str>) -> Option<(i32, i32)> {
    let param = param?;
    let mut parts = param.splitn(2, '/');
    let index = parts.next()?.parse().ok()?;
    let total = parts.next()?.parse().ok()?;
    Some((index, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sharding_param() {
        assert_eq!(parse_sharding_param(Some("2/5")), Some((2, 5)));
        assert_eq!(parse_sharding_param(Some("bad")), None);
        assert_eq!(parse_sharding_param(None), None);
    }

    #[test]
    fn test_truncate_handle_msg() {
        let long_msg = "异".repeat(MAX_HANDLE_MSG_LEN + 10);
        let truncated = truncate_handle_msg(long_msg);
        assert_eq!(truncated.chars().count(), MAX_HANDLE_MSG_LEN);
        assert_eq!(truncate_handle_msg("ok".into()), "ok");
    }
}
