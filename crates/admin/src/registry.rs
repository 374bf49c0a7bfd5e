//! # 执行器注册表
//!
//! 心跳驱动的服务发现。执行器每30秒上报一次(组名, 地址)；
//! 后台清扫任务移除超过90秒未心跳的条目；优雅下线走显式摘除。
//! 路由读取的永远是当前存活快照，死地址不会流入派发。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use jobhive_core::constants::{BEAT_INTERVAL_SECS, DEAD_TIMEOUT_SECS};
use jobhive_core::{JobHiveError, RegistryRequest, Result};

use crate::model::RegistryEntry;

pub struct RegistryService {
    /// key: (app_name, address)
    entries: RwLock<HashMap<(String, String), RegistryEntry>>,
}

impl RegistryService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// 心跳上报：校验后按(app, address)覆盖写入，刷新心跳时间
    pub async fn registry(&self, req: RegistryRequest) -> Result<()> {
        req.validate()
            .map_err(JobHiveError::registration_error)?;

        let key = (req.app_name.clone(), req.address.clone());
        let entry = RegistryEntry {
            registry_type: req.registry_type,
            app_name: req.app_name,
            address: req.address,
            update_time: Utc::now(),
        };
        self.entries.write().await.insert(key, entry);
        Ok(())
    }

    /// 优雅下线：立即删除，不等死亡超时
    pub async fn registry_remove(&self, req: RegistryRequest) -> Result<()> {
        req.validate()
            .map_err(JobHiveError::registration_error)?;

        let key = (req.app_name.clone(), req.address.clone());
        if self.entries.write().await.remove(&key).is_some() {
            info!(app = %key.0, address = %key.1, "执行器已摘除注册");
        }
        Ok(())
    }

    /// 指定组当前存活地址快照，按地址排序保证路由顺序稳定
    pub async fn live_addresses(&self, app_name: &str) -> Vec<String> {
        self.live_addresses_at(app_name, Utc::now()).await
    }

    /// 以指定时间判定存活，便于对死亡超时边界做确定性验证
    pub async fn live_addresses_at(&self, app_name: &str, now: DateTime<Utc>) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut addresses: Vec<String> = entries
            .values()
            .filter(|entry| {
                entry.app_name == app_name
                    && entry.registry_type == jobhive_core::RegistryType::Executor
                    && (now - entry.update_time).num_seconds() <= DEAD_TIMEOUT_SECS
            })
            .map(|entry| entry.address.clone())
            .collect();
        addresses.sort();
        addresses
    }

    /// 地址是否仍在任一组的存活快照内（结果丢失判定使用）
    pub async fn is_address_alive(&self, address: &str) -> bool {
        let now = Utc::now();
        self.entries.read().await.values().any(|entry| {
            entry.address == address
                && (now - entry.update_time).num_seconds() <= DEAD_TIMEOUT_SECS
        })
    }

    /// 清扫一次：物理删除死亡条目
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| (now - entry.update_time).num_seconds() <= DEAD_TIMEOUT_SECS);
        let removed = before - entries.len();
        if removed > 0 {
            warn!(removed, "注册表清扫移除了死亡条目");
        }
        removed
    }

    /// 启动周期清扫任务
    pub fn start_sweep_task(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(BEAT_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => {
                        registry.sweep(Utc::now()).await;
                    }
                }
            }
            debug!("注册表清扫任务退出");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use jobhive_core::RegistryType;

    fn beat_req(app: &str, address: &str) -> RegistryRequest {
        RegistryRequest {
            registry_type: RegistryType::Executor,
            app_name: app.into(),
            address: address.into(),
        }
    }

    #[tokio::test]
    async fn test_registry_upsert_and_remove() {
        let registry = RegistryService::new();
        registry
            .registry(beat_req("demo", "http://10.0.0.1:9999"))
            .await
            .unwrap();
        registry
            .registry(beat_req("demo", "http://10.0.0.2:9999"))
            .await
            .unwrap();
        assert_eq!(registry.live_addresses("demo").await.len(), 2);

        registry
            .registry_remove(beat_req("demo", "http://10.0.0.1:9999"))
            .await
            .unwrap();
        let alive = registry.live_addresses("demo").await;
        assert_eq!(alive, vec!["http://10.0.0.2:9999".to_string()]);
    }

    #[tokio::test]
    async fn test_dead_timeout_boundary() {
        let registry = RegistryService::new();
        registry
            .registry(beat_req("demo", "http://10.0.0.1:9999"))
            .await
            .unwrap();

        let heartbeat = Utc::now();
        // 死亡超时前1秒仍存活
        let just_before = heartbeat + ChronoDuration::seconds(DEAD_TIMEOUT_SECS - 1);
        assert_eq!(registry.live_addresses_at("demo", just_before).await.len(), 1);
        // 死亡超时后1秒判定死亡
        let just_after = heartbeat + ChronoDuration::seconds(DEAD_TIMEOUT_SECS + 1);
        assert!(registry.live_addresses_at("demo", just_after).await.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_removes_dead_entries() {
        let registry = RegistryService::new();
        registry
            .registry(beat_req("demo", "http://10.0.0.1:9999"))
            .await
            .unwrap();
        let removed = registry
            .sweep(Utc::now() + ChronoDuration::seconds(DEAD_TIMEOUT_SECS + 5))
            .await;
        assert_eq!(removed, 1);
        assert!(registry.live_addresses("demo").await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_heartbeat_rejected() {
        let registry = RegistryService::new();
        let result = registry.registry(beat_req("", "http://10.0.0.1:9999")).await;
        assert!(result.is_err());
        assert!(registry.live_addresses("").await.is_empty());
    }
}
