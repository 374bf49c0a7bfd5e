//! # 触发协调器
//!
//! 触发池工作者的实际执行逻辑：加载任务与执行器组、解析地址、
//! 路由（或分片广播展开）、远程调用执行器`run`接口，并把触发
//! 结果与诊断信息写入调度日志。任何失败都以日志与触发失败记录
//! 的形式留痕，不向扫描循环传播。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use jobhive_core::{Response, Result, RouteStrategy, TriggerRequest, TriggerType};

use crate::executor_client::ExecutorRpc;
use crate::model::{AddressType, JobGroup, JobInfo, JobLog, TriggerTask};
use crate::registry::RegistryService;
use crate::route::Router;
use crate::storage::{JobGroupStore, JobInfoStore, JobLogStore};
use crate::trigger_pool::TriggerRunner;

pub struct JobTrigger {
    job_store: Arc<dyn JobInfoStore>,
    group_store: Arc<dyn JobGroupStore>,
    log_store: Arc<dyn JobLogStore>,
    registry: Arc<RegistryService>,
    router: Arc<Router>,
    rpc: Arc<dyn ExecutorRpc>,
}

impl JobTrigger {
    pub fn new(
        job_store: Arc<dyn JobInfoStore>,
        group_store: Arc<dyn JobGroupStore>,
        log_store: Arc<dyn JobLogStore>,
        registry: Arc<RegistryService>,
        router: Arc<Router>,
        rpc: Arc<dyn ExecutorRpc>,
    ) -> Self {
        Self {
            job_store,
            group_store,
            log_store,
            registry,
            router,
            rpc,
        }
    }

    /// 执行一次触发。内部兜底所有错误并落日志。
    pub async fn trigger(&self, task: TriggerTask) {
        if let Err(e) = self.do_trigger(&task).await {
            error!(job_id = task.job_id, error = %e, "触发处理失败");
        }
    }

    async fn do_trigger(&self, task: &TriggerTask) -> Result<()> {
        let Some(mut job) = self.job_store.load(task.job_id).await? else {
            warn!(job_id = task.job_id, "触发失败：任务不存在");
            return Ok(());
        };

        // 运行时参数覆盖
        if let Some(param) = &task.executor_param {
            job.executor_params = param.clone();
        }

        let fail_retry_count = if task.fail_retry_count >= 0 {
            task.fail_retry_count
        } else {
            job.executor_fail_retry_count
        };

        let group = self.group_store.load(job.job_group).await?;
        let addresses = self.resolve_addresses(task, group.as_ref()).await;

        let broadcast = job.executor_route_strategy == RouteStrategy::ShardingBroadcast
            && task.sharding_param.is_none()
            && !addresses.is_empty();

        if broadcast {
            let total = addresses.len() as i32;
            for index in 0..total {
                self.process_trigger(
                    &job,
                    &addresses,
                    fail_retry_count,
                    task.trigger_type,
                    index,
                    total,
                    task.schedule_time,
                )
                .await?;
            }
        } else {
            let (shard_index, shard_total) = task.sharding_param.unwrap_or((0, 1));
            self.process_trigger(
                &job,
                &addresses,
                fail_retry_count,
                task.trigger_type,
                shard_index,
                shard_total,
                task.schedule_time,
            )
            .await?;
        }
        Ok(())
    }

    /// 有效地址解析：触发级覆盖 > 组手动录入 > 注册表存活快照
    async fn resolve_addresses(
        &self,
        task: &TriggerTask,
        group: Option<&JobGroup>,
    ) -> Vec<String> {
        if let Some(address_list) = &task.address_list {
            if !address_list.is_empty() {
                return address_list.clone();
            }
        }
        match group {
            Some(group) if group.address_type == AddressType::Manual => {
                group.address_list.clone()
            }
            Some(group) => self.registry.live_addresses(&group.app_name).await,
            None => Vec::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_trigger(
        &self,
        job: &JobInfo,
        addresses: &[String],
        fail_retry_count: i32,
        trigger_type: TriggerType,
        shard_index: i32,
        shard_total: i32,
        schedule_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let sharding_param = if job.executor_route_strategy == RouteStrategy::ShardingBroadcast {
            Some(format!("{shard_index}/{shard_total}"))
        } else {
            None
        };

        // 1. 落调度日志
        let mut log = JobLog::new(job.job_group, job.id, schedule_time);
        log.executor_handler = job.executor_handler.clone();
        log.executor_params = job.executor_params.clone();
        log.executor_sharding_param = sharding_param.clone();
        log.executor_fail_retry_count = fail_retry_count;
        log.id = self.log_store.save(log.clone()).await?;
        debug!(log_id = log.id, job_id = job.id, "触发开始");

        // 2. 构造触发请求
        let trigger_request = TriggerRequest {
            job_id: job.id,
            executor_handler: job.executor_handler.clone(),
            executor_params: job.executor_params.clone(),
            executor_block_strategy: job.executor_block_strategy.as_str().to_string(),
            executor_timeout: job.executor_timeout,
            log_id: log.id,
            log_date_time: log.trigger_time,
            glue_type: job.glue_type,
            glue_source: job.glue_source.clone(),
            glue_updatetime: job.glue_updatetime,
            shard_index,
            shard_total,
            schedule_time,
        };

        // 3. 路由并远程触发
        let mut route_note = None;
        let trigger_result: Response<String> = if addresses.is_empty() {
            Response::of_fail("无可用执行器")
        } else {
            match self
                .router
                .route(job.executor_route_strategy, &trigger_request, addresses)
                .await
            {
                Ok(route) => {
                    log.executor_address = Some(route.address.clone());
                    route_note = route.note;
                    match self.rpc.run(&route.address, &trigger_request).await {
                        Ok(resp) => resp,
                        Err(e) => {
                            warn!(
                                log_id = log.id,
                                address = %route.address,
                                error = %e,
                                "触发RPC失败，请确认执行器在线"
                            );
                            Response::of_fail(format!("触发RPC失败: {e}"))
                        }
                    }
                }
                Err(e) => Response::of_fail(format!("路由失败: {e}")),
            }
        };

        // 4. 回写触发结果与诊断信息
        log.trigger_code = trigger_result.code;
        log.trigger_msg = Some(build_trigger_msg(
            trigger_type,
            job,
            fail_retry_count,
            sharding_param.as_deref(),
            log.executor_address.as_deref(),
            route_note.as_deref(),
            &trigger_result,
        ));
        self.log_store.update(&log).await?;
        debug!(log_id = log.id, code = log.trigger_code, "触发结束");
        Ok(())
    }
}

fn build_trigger_msg(
    trigger_type: TriggerType,
    job: &JobInfo,
    fail_retry_count: i32,
    sharding_param: Option<&str>,
    address: Option<&str>,
    route_note: Option<&str>,
    result: &Response<String>,
) -> String {
    let mut lines = vec![
        format!("触发类型: {}", trigger_type.as_str()),
        format!("路由策略: {}", job.executor_route_strategy.as_str()),
        format!("阻塞策略: {}", job.executor_block_strategy.as_str()),
        format!("超时时间: {}s", job.executor_timeout),
        format!("失败重试次数: {fail_retry_count}"),
    ];
    if let Some(sharding) = sharding_param {
        lines.push(format!("分片参数: {sharding}"));
    }
    lines.push(format!("执行器地址: {}", address.unwrap_or("无")));
    if let Some(note) = route_note {
        lines.push(format!("路由备注: {note}"));
    }
    lines.push(format!(
        "触发结果: code={}, msg={}",
        result.code,
        result.msg.as_deref().unwrap_or("")
    ));
    lines.join("\n")
}

#[async_trait]
impl TriggerRunner for JobTrigger {
    async fn run_trigger(&self, task: TriggerTask) {
        self.trigger(task).await;
    }

    async fn on_rejected(&self, task: TriggerTask, reason: String) {
        // 池饱和的任务也要留下触发失败记录，不允许无痕丢弃
        let job_group = match self.job_store.load(task.job_id).await {
            Ok(Some(job)) => job.job_group,
            _ => 0,
        };
        let mut log = JobLog::new(job_group, task.job_id, task.schedule_time);
        log.trigger_code = Response::<String>::FAIL_CODE;
        log.trigger_msg = Some(reason.clone());
        if let Err(e) = self.log_store.save(log).await {
            error!(job_id = task.job_id, error = %e, "记录触发拒绝失败");
        }
        warn!(job_id = task.job_id, reason = %reason, "触发任务被派发池拒绝");
    }
}
