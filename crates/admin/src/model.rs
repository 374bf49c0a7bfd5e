//! # 调度中心领域模型
//!
//! 任务、执行器组、调度日志与注册表项。持久化通过`storage`中的
//! 仓储接口完成，本模块只定义数据形状与少量不变式辅助方法。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobhive_core::{
    BlockStrategy, GlueType, MisfireStrategy, RegistryType, RouteStrategy, ScheduleType,
    TriggerStatus, TriggerType,
};

/// 任务定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: i64,
    pub job_group: i64,
    pub job_desc: String,
    pub author: String,

    pub schedule_type: ScheduleType,
    /// CRON表达式或固定频率秒数，语义由schedule_type决定
    pub schedule_conf: String,
    pub misfire_strategy: MisfireStrategy,

    pub executor_route_strategy: RouteStrategy,
    pub executor_block_strategy: BlockStrategy,
    pub executor_handler: String,
    pub executor_params: String,
    /// 执行超时（秒），0表示不限制
    pub executor_timeout: i64,
    pub executor_fail_retry_count: i32,

    pub glue_type: GlueType,
    pub glue_source: String,
    pub glue_updatetime: i64,

    /// 本任务成功后级联触发的子任务
    pub child_job_ids: Vec<i64>,

    pub trigger_status: TriggerStatus,
    pub trigger_last_time: Option<DateTime<Utc>>,
    /// None表示仅手动触发或已停止
    pub trigger_next_time: Option<DateTime<Utc>>,
}

impl JobInfo {
    /// 推进触发时间：上次时间记为旧的下次时间，下次时间更新为next
    pub fn advance_trigger_time(&mut self, next: DateTime<Utc>) {
        self.trigger_last_time = self.trigger_next_time;
        self.trigger_next_time = Some(next);
    }

    /// 下次触发时间无法生成时停止调度
    pub fn stop_schedule(&mut self) {
        self.trigger_status = TriggerStatus::Stopped;
        self.trigger_last_time = None;
        self.trigger_next_time = None;
    }
}

/// 执行器组地址的维护方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressType {
    /// 通过心跳注册自动维护
    #[serde(rename = "AUTO")]
    Auto,
    /// 手动录入固定地址列表
    #[serde(rename = "MANUAL")]
    Manual,
}

/// 执行器组
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobGroup {
    pub id: i64,
    /// 注册key，执行器按该名称上报心跳
    pub app_name: String,
    pub title: String,
    pub address_type: AddressType,
    /// 仅MANUAL方式使用
    pub address_list: Vec<String>,
}

/// 调度日志，一次触发一条
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLog {
    pub id: i64,
    pub job_group: i64,
    pub job_id: i64,

    pub executor_address: Option<String>,
    pub executor_handler: String,
    pub executor_params: String,
    /// 分片参数，格式"序号/总数"
    pub executor_sharding_param: Option<String>,
    /// 剩余失败重试次数
    pub executor_fail_retry_count: i32,

    pub trigger_time: DateTime<Utc>,
    /// 0表示尚未完成触发
    pub trigger_code: i32,
    pub trigger_msg: Option<String>,
    /// 理论调度时间，misfire补偿与手动触发为None
    pub schedule_time: Option<DateTime<Utc>>,

    pub handle_time: Option<DateTime<Utc>>,
    /// 0表示尚未回报结果
    pub handle_code: i32,
    pub handle_msg: Option<String>,

    /// 失败重试是否已派发，避免重复补偿
    pub fail_retry_dispatched: bool,
}

impl JobLog {
    pub fn new(job_group: i64, job_id: i64, schedule_time: Option<DateTime<Utc>>) -> Self {
        Self {
            id: 0,
            job_group,
            job_id,
            executor_address: None,
            executor_handler: String::new(),
            executor_params: String::new(),
            executor_sharding_param: None,
            executor_fail_retry_count: 0,
            trigger_time: Utc::now(),
            trigger_code: 0,
            trigger_msg: None,
            schedule_time,
            handle_time: None,
            handle_code: 0,
            handle_msg: None,
            fail_retry_dispatched: false,
        }
    }

    /// 触发成功且尚未收到执行结果
    pub fn is_pending_handle(&self) -> bool {
        self.trigger_code == jobhive_core::Response::<String>::SUCCESS_CODE && self.handle_code == 0
    }
}

/// 注册表项，每次心跳刷新
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub registry_type: RegistryType,
    pub app_name: String,
    pub address: String,
    pub update_time: DateTime<Utc>,
}

/// 一次触发请求，由扫描循环、openapi或补偿逻辑创建，触发池消费一次
#[derive(Debug, Clone)]
pub struct TriggerTask {
    pub job_id: i64,
    pub trigger_type: TriggerType,
    /// 负数表示使用任务配置的重试次数
    pub fail_retry_count: i32,
    /// 运行时参数覆盖
    pub executor_param: Option<String>,
    /// 指定执行器地址覆盖，跳过注册表
    pub address_list: Option<Vec<String>>,
    /// 显式分片参数(序号, 总数)，仅重试分片场景使用
    pub sharding_param: Option<(i32, i32)>,
    /// 理论调度时间；misfire补偿与手动触发为None
    pub schedule_time: Option<DateTime<Utc>>,
}

impl TriggerTask {
    pub fn of_schedule(job_id: i64, schedule_time: DateTime<Utc>) -> Self {
        Self {
            job_id,
            trigger_type: TriggerType::Cron,
            fail_retry_count: -1,
            executor_param: None,
            address_list: None,
            sharding_param: None,
            schedule_time: Some(schedule_time),
        }
    }

    pub fn of_misfire(job_id: i64) -> Self {
        Self {
            job_id,
            trigger_type: TriggerType::Misfire,
            fail_retry_count: -1,
            executor_param: None,
            address_list: None,
            sharding_param: None,
            schedule_time: None,
        }
    }
}
