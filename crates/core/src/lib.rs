//! # JobHive Core
//!
//! 调度中心与执行器共享的基础模块：类型定义、RPC契约模型、
//! 错误类型、常量与配置。

pub mod config;
pub mod constants;
pub mod error;
pub mod rpc;
pub mod types;

pub use config::{AdminConfig, AppConfig, ExecutorConfig, LogConfig};
pub use error::{JobHiveError, Result};
pub use rpc::{
    CallbackRequest, IdleBeatRequest, KillRequest, LogRequest, LogResult, RegistryRequest,
    Response, TriggerRequest,
};
pub use types::{
    BlockStrategy, GlueType, HandleCode, MisfireStrategy, RegistryType, RouteStrategy,
    ScheduleType, TriggerStatus, TriggerType,
};
