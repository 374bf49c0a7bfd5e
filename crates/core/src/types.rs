//! # 共享类型定义
//!
//! 调度策略、路由策略、阻塞策略等枚举。策略名与变体之间通过显式
//! 匹配表解析，配置阶段即可发现未知策略名。

use serde::{Deserialize, Serialize};

/// 调度方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleType {
    /// 手动触发，不参与周期调度
    #[serde(rename = "NONE")]
    None,
    /// CRON表达式调度（秒级精度）
    #[serde(rename = "CRON")]
    Cron,
    /// 固定频率调度，配置为间隔秒数
    #[serde(rename = "FIX_RATE")]
    FixRate,
}

impl ScheduleType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "NONE" => Some(Self::None),
            "CRON" => Some(Self::Cron),
            "FIX_RATE" => Some(Self::FixRate),
            _ => None,
        }
    }

    /// 按名称解析，未知名称回退到默认值
    pub fn resolve(name: &str, default: Self) -> Self {
        Self::from_name(name).unwrap_or(default)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Cron => "CRON",
            Self::FixRate => "FIX_RATE",
        }
    }
}

/// 调度过期（misfire）处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MisfireStrategy {
    /// 忽略本次过期，仅推进下次触发时间
    #[serde(rename = "DO_NOTHING")]
    DoNothing,
    /// 立即补偿触发一次
    #[serde(rename = "FIRE_ONCE_NOW")]
    FireOnceNow,
}

impl MisfireStrategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "DO_NOTHING" => Some(Self::DoNothing),
            "FIRE_ONCE_NOW" => Some(Self::FireOnceNow),
            _ => None,
        }
    }

    pub fn resolve(name: &str, default: Self) -> Self {
        Self::from_name(name).unwrap_or(default)
    }
}

/// 执行器路由策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteStrategy {
    #[serde(rename = "FIRST")]
    First,
    #[serde(rename = "LAST")]
    Last,
    #[serde(rename = "ROUND")]
    Round,
    #[serde(rename = "RANDOM")]
    Random,
    #[serde(rename = "CONSISTENT_HASH")]
    ConsistentHash,
    #[serde(rename = "LEAST_FREQUENTLY_USED")]
    LeastFrequentlyUsed,
    #[serde(rename = "LEAST_RECENTLY_USED")]
    LeastRecentlyUsed,
    #[serde(rename = "FAILOVER")]
    Failover,
    #[serde(rename = "BUSYOVER")]
    Busyover,
    /// 分片广播：触发时对地址列表逐一派发，携带分片序号
    #[serde(rename = "SHARDING_BROADCAST")]
    ShardingBroadcast,
}

impl RouteStrategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "FIRST" => Some(Self::First),
            "LAST" => Some(Self::Last),
            "ROUND" => Some(Self::Round),
            "RANDOM" => Some(Self::Random),
            "CONSISTENT_HASH" => Some(Self::ConsistentHash),
            "LEAST_FREQUENTLY_USED" => Some(Self::LeastFrequentlyUsed),
            "LEAST_RECENTLY_USED" => Some(Self::LeastRecentlyUsed),
            "FAILOVER" => Some(Self::Failover),
            "BUSYOVER" => Some(Self::Busyover),
            "SHARDING_BROADCAST" => Some(Self::ShardingBroadcast),
            _ => None,
        }
    }

    pub fn resolve(name: &str, default: Self) -> Self {
        Self::from_name(name).unwrap_or(default)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "FIRST",
            Self::Last => "LAST",
            Self::Round => "ROUND",
            Self::Random => "RANDOM",
            Self::ConsistentHash => "CONSISTENT_HASH",
            Self::LeastFrequentlyUsed => "LEAST_FREQUENTLY_USED",
            Self::LeastRecentlyUsed => "LEAST_RECENTLY_USED",
            Self::Failover => "FAILOVER",
            Self::Busyover => "BUSYOVER",
            Self::ShardingBroadcast => "SHARDING_BROADCAST",
        }
    }
}

/// 同一任务触发并发到达时的阻塞处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockStrategy {
    /// 串行排队执行
    #[serde(rename = "SERIAL_EXECUTION")]
    SerialExecution,
    /// 运行中则丢弃后续触发
    #[serde(rename = "DISCARD_LATER")]
    DiscardLater,
    /// 终止运行中的执行，后到者优先
    #[serde(rename = "COVER_EARLY")]
    CoverEarly,
}

impl BlockStrategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SERIAL_EXECUTION" => Some(Self::SerialExecution),
            "DISCARD_LATER" => Some(Self::DiscardLater),
            "COVER_EARLY" => Some(Self::CoverEarly),
            _ => None,
        }
    }

    pub fn resolve(name: &str, default: Self) -> Self {
        Self::from_name(name).unwrap_or(default)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SerialExecution => "SERIAL_EXECUTION",
            Self::DiscardLater => "DISCARD_LATER",
            Self::CoverEarly => "COVER_EARLY",
        }
    }
}

/// 触发来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerType {
    #[serde(rename = "CRON")]
    Cron,
    #[serde(rename = "MANUAL")]
    Manual,
    #[serde(rename = "API")]
    Api,
    #[serde(rename = "RETRY")]
    Retry,
    /// 父任务成功后的子任务级联触发
    #[serde(rename = "PARENT")]
    Parent,
    /// misfire补偿触发
    #[serde(rename = "MISFIRE")]
    Misfire,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cron => "CRON",
            Self::Manual => "MANUAL",
            Self::Api => "API",
            Self::Retry => "RETRY",
            Self::Parent => "PARENT",
            Self::Misfire => "MISFIRE",
        }
    }
}

/// 注册类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryType {
    #[serde(rename = "EXECUTOR")]
    Executor,
    #[serde(rename = "ADMIN")]
    Admin,
}

impl RegistryType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "EXECUTOR" => Some(Self::Executor),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// 任务调度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerStatus {
    #[serde(rename = "STOPPED")]
    Stopped,
    #[serde(rename = "RUNNING")]
    Running,
}

/// 任务处理器来源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlueType {
    /// 进程内注册的处理器，按名称查找
    #[serde(rename = "BEAN")]
    Bean,
    #[serde(rename = "GLUE_SHELL")]
    Shell,
    #[serde(rename = "GLUE_PYTHON")]
    Python,
}

impl GlueType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "BEAN" => Some(Self::Bean),
            "GLUE_SHELL" => Some(Self::Shell),
            "GLUE_PYTHON" => Some(Self::Python),
            _ => None,
        }
    }

    pub fn is_script(&self) -> bool {
        !matches!(self, Self::Bean)
    }

    /// 脚本解释器命令
    pub fn interpreter(&self) -> Option<&'static str> {
        match self {
            Self::Bean => None,
            Self::Shell => Some("bash"),
            Self::Python => Some("python3"),
        }
    }

    /// 脚本文件后缀
    pub fn suffix(&self) -> Option<&'static str> {
        match self {
            Self::Bean => None,
            Self::Shell => Some(".sh"),
            Self::Python => Some(".py"),
        }
    }
}

/// 执行结果码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleCode;

impl HandleCode {
    pub const SUCCESS: i32 = 200;
    pub const FAIL: i32 = 500;
    pub const TIMEOUT: i32 = 502;
    /// 被终止的执行上报独立结果码，与成功/失败区分
    pub const KILLED: i32 = 503;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_resolve_with_default() {
        assert_eq!(
            RouteStrategy::resolve("ROUND", RouteStrategy::First),
            RouteStrategy::Round
        );
        assert_eq!(
            RouteStrategy::resolve("NO_SUCH", RouteStrategy::First),
            RouteStrategy::First
        );
        assert_eq!(
            BlockStrategy::resolve("COVER_EARLY", BlockStrategy::SerialExecution),
            BlockStrategy::CoverEarly
        );
        assert_eq!(
            MisfireStrategy::resolve("", MisfireStrategy::DoNothing),
            MisfireStrategy::DoNothing
        );
    }

    #[test]
    fn test_wire_names_round_trip() {
        let json = serde_json::to_string(&RouteStrategy::ShardingBroadcast).unwrap();
        assert_eq!(json, "\"SHARDING_BROADCAST\"");
        let back: RouteStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RouteStrategy::ShardingBroadcast);
    }

    #[test]
    fn test_glue_type_script_attrs() {
        assert!(!GlueType::Bean.is_script());
        assert!(GlueType::Shell.is_script());
        assert_eq!(GlueType::Python.interpreter(), Some("python3"));
        assert_eq!(GlueType::Shell.suffix(), Some(".sh"));
    }
}
