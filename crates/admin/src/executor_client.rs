//! # 执行器RPC客户端
//!
//! 调度中心访问执行器内嵌服务的出站接口。所有调用携带访问令牌
//! 与客户端超时；超时与网络错误按派发失败处理，绝不无限挂起。

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use jobhive_core::constants::{
    ACCESS_TOKEN_HEADER, RPC_CONTROL_TIMEOUT_SECS, RPC_DATA_TIMEOUT_SECS,
};
use jobhive_core::{
    IdleBeatRequest, JobHiveError, KillRequest, LogRequest, LogResult, Response, Result,
    TriggerRequest,
};

/// 执行器侧RPC接口
#[async_trait]
pub trait ExecutorRpc: Send + Sync {
    /// 存活探测
    async fn beat(&self, address: &str) -> Result<Response<String>>;

    /// 空闲探测：指定任务无运行且队列为空才返回成功
    async fn idle_beat(&self, address: &str, req: &IdleBeatRequest) -> Result<Response<String>>;

    /// 触发执行
    async fn run(&self, address: &str, req: &TriggerRequest) -> Result<Response<String>>;

    /// 终止任务，幂等
    async fn kill(&self, address: &str, req: &KillRequest) -> Result<Response<String>>;

    /// 拉取执行日志分片
    async fn log(&self, address: &str, req: &LogRequest) -> Result<Response<LogResult>>;
}

/// 基于HTTP/JSON的执行器客户端
pub struct HttpExecutorRpc {
    control_client: reqwest::Client,
    data_client: reqwest::Client,
    access_token: String,
}

impl HttpExecutorRpc {
    pub fn new(access_token: String) -> Result<Self> {
        let control_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(RPC_CONTROL_TIMEOUT_SECS))
            .build()
            .map_err(|e| JobHiveError::Internal(format!("构建RPC客户端失败: {e}")))?;
        let data_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(RPC_DATA_TIMEOUT_SECS))
            .build()
            .map_err(|e| JobHiveError::Internal(format!("构建RPC客户端失败: {e}")))?;
        Ok(Self {
            control_client,
            data_client,
            access_token,
        })
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        client: &reqwest::Client,
        address: &str,
        path: &str,
        body: &B,
    ) -> Result<Response<T>> {
        let url = format!("{}/{}", address.trim_end_matches('/'), path);
        let resp = client
            .post(&url)
            .header(ACCESS_TOKEN_HEADER, &self.access_token)
            .json(body)
            .send()
            .await?;
        Ok(resp.json::<Response<T>>().await?)
    }
}

#[async_trait]
impl ExecutorRpc for HttpExecutorRpc {
    async fn beat(&self, address: &str) -> Result<Response<String>> {
        self.post(&self.control_client, address, "beat", &()).await
    }

    async fn idle_beat(&self, address: &str, req: &IdleBeatRequest) -> Result<Response<String>> {
        self.post(&self.control_client, address, "idleBeat", req)
            .await
    }

    async fn run(&self, address: &str, req: &TriggerRequest) -> Result<Response<String>> {
        self.post(&self.control_client, address, "run", req).await
    }

    async fn kill(&self, address: &str, req: &KillRequest) -> Result<Response<String>> {
        self.post(&self.control_client, address, "kill", req).await
    }

    async fn log(&self, address: &str, req: &LogRequest) -> Result<Response<LogResult>> {
        self.post(&self.data_client, address, "log", req).await
    }
}
