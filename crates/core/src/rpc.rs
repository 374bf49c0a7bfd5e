//! # RPC契约模型
//!
//! 调度中心与执行器之间请求/响应报文的统一定义。
//! 所有接口共用`Response`响应壳，code=200表示成功。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{GlueType, RegistryType};

/// 统一响应壳
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response<T> {
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<T>,
}

impl<T> Response<T> {
    pub const SUCCESS_CODE: i32 = 200;
    pub const FAIL_CODE: i32 = 500;

    pub fn of_success() -> Self {
        Self {
            code: Self::SUCCESS_CODE,
            msg: None,
            content: None,
        }
    }

    pub fn of_success_with(content: T) -> Self {
        Self {
            code: Self::SUCCESS_CODE,
            msg: None,
            content: Some(content),
        }
    }

    pub fn of_fail<S: Into<String>>(msg: S) -> Self {
        Self {
            code: Self::FAIL_CODE,
            msg: Some(msg.into()),
            content: None,
        }
    }

    pub fn of<S: Into<String>>(code: i32, msg: S) -> Self {
        Self {
            code,
            msg: Some(msg.into()),
            content: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Self::SUCCESS_CODE
    }
}

/// 触发请求（调度中心 → 执行器 `run`）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub job_id: i64,
    /// BEAN处理器名称
    pub executor_handler: String,
    #[serde(default)]
    pub executor_params: String,
    /// 阻塞策略名称，执行器侧按名称解析
    pub executor_block_strategy: String,
    /// 执行超时（秒），0表示不限制
    pub executor_timeout: i64,
    pub log_id: i64,
    /// 调度日志创建时间，执行日志文件按该日期归档
    pub log_date_time: DateTime<Utc>,
    pub glue_type: GlueType,
    #[serde(default)]
    pub glue_source: String,
    /// 脚本源更新时间戳（毫秒），变更后执行器替换旧工作者
    #[serde(default)]
    pub glue_updatetime: i64,
    /// 分片序号（0起）
    #[serde(default)]
    pub shard_index: i32,
    /// 分片总数
    #[serde(default = "default_shard_total")]
    pub shard_total: i32,
    /// 理论调度时间；misfire补偿与手动触发为None
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<DateTime<Utc>>,
}

fn default_shard_total() -> i32 {
    1
}

/// 执行结果回调（执行器 → 调度中心 `callback`，按批上报）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRequest {
    pub log_id: i64,
    pub handle_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle_msg: Option<String>,
    pub finish_time: DateTime<Utc>,
}

/// 注册/摘除请求（执行器 → 调度中心 `registry`/`registryRemove`）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRequest {
    pub registry_type: RegistryType,
    /// 执行器组标识（app name）
    pub app_name: String,
    /// 执行器RPC地址，如 http://10.0.0.2:9999
    pub address: String,
}

impl RegistryRequest {
    /// 注册报文合法性校验，非法报文拒绝且不落注册表
    pub fn validate(&self) -> Result<(), String> {
        if self.app_name.trim().is_empty() {
            return Err("app_name不能为空".into());
        }
        if self.address.trim().is_empty() {
            return Err("address不能为空".into());
        }
        Ok(())
    }
}

/// 空闲探测请求（调度中心 → 执行器 `idleBeat`）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleBeatRequest {
    pub job_id: i64,
}

/// 终止请求（调度中心 → 执行器 `kill`）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillRequest {
    pub job_id: i64,
}

/// 执行日志查询请求（调度中心 → 执行器 `log`）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRequest {
    pub log_id: i64,
    /// 日志产生日期，用于定位日志目录
    pub log_date_time: DateTime<Utc>,
    /// 读取起始行号（1起）
    pub from_line_num: i32,
}

/// 执行日志查询结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogResult {
    pub from_line_num: i32,
    pub to_line_num: i32,
    pub log_content: String,
    /// 执行已结束且日志读到末尾时为true，轮询方据此停止
    pub is_end: bool,
}
