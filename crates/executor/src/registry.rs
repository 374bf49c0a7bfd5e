//! # 注册心跳
//!
//! 启动即注册，之后每30秒向调度中心续心跳；停机时显式摘除，
//! 不等调度中心的死亡超时。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use jobhive_core::constants::BEAT_INTERVAL_SECS;
use jobhive_core::{RegistryRequest, RegistryType};

use crate::admin_client::AdminRpc;

/// 启动心跳任务
pub fn start_registry_task(
    admin: Arc<dyn AdminRpc>,
    app_name: String,
    address: String,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let request = RegistryRequest {
            registry_type: RegistryType::Executor,
            app_name: app_name.clone(),
            address: address.clone(),
        };

        let mut interval = tokio::time::interval(Duration::from_secs(BEAT_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = interval.tick() => {
                    match admin.registry(&request).await {
                        Ok(resp) if resp.is_success() => {
                            debug!(app = %app_name, address = %address, "注册心跳成功");
                        }
                        Ok(resp) => {
                            warn!(
                                app = %app_name,
                                msg = resp.msg.as_deref().unwrap_or(""),
                                "注册心跳被拒绝"
                            );
                        }
                        Err(e) => {
                            warn!(app = %app_name, error = %e, "注册心跳失败");
                        }
                    }
                }
            }
        }

        // 优雅下线：显式摘除注册
        match admin.registry_remove(&request).await {
            Ok(resp) if resp.is_success() => {
                info!(app = %app_name, address = %address, "注册已摘除");
            }
            Ok(resp) => {
                warn!(msg = resp.msg.as_deref().unwrap_or(""), "注册摘除被拒绝");
            }
            Err(e) => {
                warn!(error = %e, "注册摘除失败，等待调度中心死亡超时清理");
            }
        }
    })
}
