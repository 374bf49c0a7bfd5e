use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobHiveError {
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("无效的调度配置: {0}")]
    InvalidSchedule(String),
    #[error("触发派发失败: {0}")]
    Dispatch(String),
    #[error("无可用执行器")]
    NoAvailableExecutor,
    #[error("任务执行失败: {0}")]
    Execution(String),
    #[error("注册信息无效: {0}")]
    Registration(String),
    #[error("网络错误: {0}")]
    Network(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, JobHiveError>;

impl JobHiveError {
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn dispatch_error<S: Into<String>>(msg: S) -> Self {
        Self::Dispatch(msg.into())
    }

    pub fn registration_error<S: Into<String>>(msg: S) -> Self {
        Self::Registration(msg.into())
    }

    /// 是否属于可重试的瞬时失败
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobHiveError::Network(_) | JobHiveError::Timeout(_) | JobHiveError::Dispatch(_)
        )
    }
}

impl From<serde_json::Error> for JobHiveError {
    fn from(err: serde_json::Error) -> Self {
        JobHiveError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for JobHiveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            JobHiveError::Timeout(err.to_string())
        } else {
            JobHiveError::Network(err.to_string())
        }
    }
}

impl From<anyhow::Error> for JobHiveError {
    fn from(err: anyhow::Error) -> Self {
        JobHiveError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(JobHiveError::Network("连接被拒绝".into()).is_retryable());
        assert!(JobHiveError::Timeout("3s".into()).is_retryable());
        assert!(!JobHiveError::Configuration("缺少app_name".into()).is_retryable());
        assert!(!JobHiveError::NoAvailableExecutor.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = JobHiveError::InvalidCron {
            expr: "bad expr".into(),
            message: "解析失败".into(),
        };
        assert!(err.to_string().contains("bad expr"));
    }
}
