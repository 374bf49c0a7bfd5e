//! # 配置模型与加载
//!
//! 支持TOML配置文件与`JOBHIVE_`前缀环境变量覆盖，
//! 加载完成后统一做校验，非法配置在进程启动阶段直接失败。

use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{JobHiveError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// 调度中心配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// openapi监听地址
    pub bind_address: String,
    /// RPC访问令牌，双向校验
    pub access_token: String,
    /// 快触发池最大工作者数
    pub trigger_pool_fast_max: usize,
    /// 慢触发池最大工作者数
    pub trigger_pool_slow_max: usize,
    /// 失败日志扫描间隔（秒）
    pub fail_retry_scan_interval_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            access_token: "default_token".to_string(),
            trigger_pool_fast_max: constants::TRIGGER_POOL_FAST_MAX,
            trigger_pool_slow_max: constants::TRIGGER_POOL_SLOW_MAX,
            fail_retry_scan_interval_secs: 10,
        }
    }
}

/// 执行器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// 执行器组标识，注册到调度中心的key
    pub app_name: String,
    /// 内嵌RPC服务监听地址
    pub bind_address: String,
    /// 对外注册地址；为空时根据主机名与端口推导
    pub register_address: String,
    /// 调度中心地址列表
    pub admin_addresses: Vec<String>,
    /// RPC访问令牌
    pub access_token: String,
    /// 执行日志根目录
    pub log_base_path: String,
    /// 执行日志保留天数，-1表示不清理
    pub log_retention_days: i64,
    /// 单任务触发队列容量
    pub job_queue_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            app_name: "jobhive-executor-demo".to_string(),
            bind_address: "0.0.0.0:9999".to_string(),
            register_address: String::new(),
            admin_addresses: vec!["http://127.0.0.1:8080".to_string()],
            access_token: "default_token".to_string(),
            log_base_path: "data/joblog".to_string(),
            log_retention_days: constants::LOG_RETENTION_DAYS,
            job_queue_capacity: constants::JOB_QUEUE_CAPACITY,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    /// pretty或json
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            admin: AdminConfig::default(),
            executor: ExecutorConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从配置文件与环境变量加载，文件不存在时使用默认值
    pub fn load(config_path: &str) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if Path::new(config_path).exists() {
            builder = builder.add_source(File::new(config_path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("JOBHIVE")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| JobHiveError::Configuration(format!("构建配置失败: {e}")))?
            .try_deserialize()
            .map_err(|e| JobHiveError::Configuration(format!("反序列化配置失败: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.admin.trigger_pool_fast_max == 0 || self.admin.trigger_pool_slow_max == 0 {
            return Err(JobHiveError::config_error("触发池工作者数必须大于0"));
        }
        if self.executor.app_name.trim().is_empty() {
            return Err(JobHiveError::config_error("executor.app_name不能为空"));
        }
        if self.executor.job_queue_capacity == 0 {
            return Err(JobHiveError::config_error("job_queue_capacity必须大于0"));
        }
        if !matches!(self.log.format.as_str(), "pretty" | "json") {
            return Err(JobHiveError::config_error(format!(
                "不支持的日志格式: {}",
                self.log.format
            )));
        }
        Ok(())
    }

    /// 推导执行器对外注册地址
    pub fn executor_register_address(&self) -> String {
        if !self.executor.register_address.trim().is_empty() {
            return self.executor.register_address.trim().to_string();
        }
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = self
            .executor
            .bind_address
            .rsplit(':')
            .next()
            .unwrap_or("9999");
        format!("http://{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.admin.trigger_pool_fast_max, 200);
        assert_eq!(config.executor.job_queue_capacity, 500);
    }

    #[test]
    fn test_invalid_log_format_rejected() {
        let mut config = AppConfig::default();
        config.log.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = AppConfig::load("no/such/file.toml").unwrap();
        assert_eq!(config.admin.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn test_register_address_override() {
        let mut config = AppConfig::default();
        config.executor.register_address = "http://10.0.0.5:9999".to_string();
        assert_eq!(
            config.executor_register_address(),
            "http://10.0.0.5:9999"
        );
    }
}
