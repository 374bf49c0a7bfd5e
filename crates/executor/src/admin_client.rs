//! # 调度中心RPC客户端
//!
//! 执行器访问调度中心openapi的出站接口。配置了多个调度中心
//! 地址时逐个尝试，任一成功即返回。

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use jobhive_core::constants::{ACCESS_TOKEN_HEADER, RPC_DATA_TIMEOUT_SECS};
use jobhive_core::{CallbackRequest, JobHiveError, RegistryRequest, Response, Result};

#[async_trait]
pub trait AdminRpc: Send + Sync {
    /// 批量上报执行结果
    async fn callback(&self, batch: &[CallbackRequest]) -> Result<Response<String>>;

    /// 心跳注册
    async fn registry(&self, req: &RegistryRequest) -> Result<Response<String>>;

    /// 优雅下线摘除
    async fn registry_remove(&self, req: &RegistryRequest) -> Result<Response<String>>;
}

pub struct HttpAdminRpc {
    client: reqwest::Client,
    admin_addresses: Vec<String>,
    access_token: String,
}

impl HttpAdminRpc {
    pub fn new(admin_addresses: Vec<String>, access_token: String) -> Result<Self> {
        if admin_addresses.is_empty() {
            return Err(JobHiveError::config_error("调度中心地址列表不能为空"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(RPC_DATA_TIMEOUT_SECS))
            .build()
            .map_err(|e| JobHiveError::Internal(format!("构建RPC客户端失败: {e}")))?;
        Ok(Self {
            client,
            admin_addresses,
            access_token,
        })
    }

    /// 逐个调度中心地址尝试，第一个成功响应生效
    async fn post_any<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response<T>> {
        let mut last_error: Option<JobHiveError> = None;
        for address in &self.admin_addresses {
            let url = format!("{}/{}", address.trim_end_matches('/'), path);
            let attempt = async {
                let resp = self
                    .client
                    .post(&url)
                    .header(ACCESS_TOKEN_HEADER, &self.access_token)
                    .json(body)
                    .send()
                    .await?;
                Ok::<Response<T>, JobHiveError>(resp.json::<Response<T>>().await?)
            }
            .await;

            match attempt {
                Ok(resp) if resp.is_success() => return Ok(resp),
                Ok(resp) => {
                    debug!(address = %address, code = resp.code, "调度中心返回失败响应");
                    last_error = Some(JobHiveError::Network(format!(
                        "调度中心{address}返回失败: {}",
                        resp.msg.unwrap_or_default()
                    )));
                }
                Err(e) => {
                    debug!(address = %address, error = %e, "调度中心调用异常");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| JobHiveError::Network("无可用调度中心".into())))
    }
}

#[async_trait]
impl AdminRpc for HttpAdminRpc {
    async fn callback(&self, batch: &[CallbackRequest]) -> Result<Response<String>> {
        self.post_any("api/callback", batch).await
    }

    async fn registry(&self, req: &RegistryRequest) -> Result<Response<String>> {
        self.post_any("api/registry", req).await
    }

    async fn registry_remove(&self, req: &RegistryRequest) -> Result<Response<String>> {
        self.post_any("api/registryRemove", req).await
    }
}
