//! # 执行器路由策略
//!
//! 从存活地址列表中为一次触发选出目标执行器。
//! 有状态策略（轮询、LFU、LRU）按任务id维护独立状态，
//! 缓存每24小时整体重置，地址列表变化时剔除失效条目。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use jobhive_core::{JobHiveError, Result, RouteStrategy, TriggerRequest};

use crate::executor_client::ExecutorRpc;

/// 一致性哈希虚拟节点数
const VIRTUAL_NODE_COUNT: u32 = 100;

/// 有状态路由缓存的有效期
const CACHE_TTL_HOURS: i64 = 24;

/// LFU计数超过该值后重新随机初始化，防止计数溢出导致的粘滞
const LFU_RESET_THRESHOLD: u64 = 1_000_000;

/// 路由结果。note用于携带降级说明等诊断信息，写入调度日志。
#[derive(Debug, Clone)]
pub struct RouteResult {
    pub address: String,
    pub note: Option<String>,
}

impl RouteResult {
    fn of(address: String) -> Self {
        Self {
            address,
            note: None,
        }
    }
}

struct RouteCache<T> {
    valid_until: DateTime<Utc>,
    data: T,
}

impl<T: Default> RouteCache<T> {
    fn new() -> Self {
        Self {
            valid_until: Utc::now() + Duration::hours(CACHE_TTL_HOURS),
            data: T::default(),
        }
    }

    fn refresh_if_expired(&mut self) {
        if Utc::now() > self.valid_until {
            self.data = T::default();
            self.valid_until = Utc::now() + Duration::hours(CACHE_TTL_HOURS);
        }
    }
}

pub struct Router {
    rpc: Arc<dyn ExecutorRpc>,
    round_state: Mutex<RouteCache<HashMap<i64, usize>>>,
    lfu_state: Mutex<RouteCache<HashMap<i64, HashMap<String, u64>>>>,
    /// 每任务一份访问序列，队首为最久未使用
    lru_state: Mutex<RouteCache<HashMap<i64, Vec<String>>>>,
}

impl Router {
    pub fn new(rpc: Arc<dyn ExecutorRpc>) -> Self {
        Self {
            rpc,
            round_state: Mutex::new(RouteCache::new()),
            lfu_state: Mutex::new(RouteCache::new()),
            lru_state: Mutex::new(RouteCache::new()),
        }
    }

    /// 为一次触发选择执行器地址。空地址列表一律返回“无可用执行器”。
    pub async fn route(
        &self,
        strategy: RouteStrategy,
        req: &TriggerRequest,
        addresses: &[String],
    ) -> Result<RouteResult> {
        if addresses.is_empty() {
            return Err(JobHiveError::NoAvailableExecutor);
        }

        let result = match strategy {
            RouteStrategy::First => RouteResult::of(addresses[0].clone()),
            RouteStrategy::Last => RouteResult::of(addresses[addresses.len() - 1].clone()),
            RouteStrategy::Round => RouteResult::of(self.select_round(req.job_id, addresses)),
            RouteStrategy::Random => {
                let index = rand::rng().random_range(0..addresses.len());
                RouteResult::of(addresses[index].clone())
            }
            RouteStrategy::ConsistentHash => {
                RouteResult::of(select_consistent_hash(req.job_id, addresses))
            }
            RouteStrategy::LeastFrequentlyUsed => {
                RouteResult::of(self.select_lfu(req.job_id, addresses))
            }
            RouteStrategy::LeastRecentlyUsed => {
                RouteResult::of(self.select_lru(req.job_id, addresses))
            }
            RouteStrategy::Failover => self.select_failover(addresses).await,
            RouteStrategy::Busyover => self.select_busyover(req.job_id, addresses).await?,
            RouteStrategy::ShardingBroadcast => {
                // 广播派发在触发层逐分片展开，这里只需定位本分片的地址
                let index = (req.shard_index.max(0) as usize) % addresses.len();
                RouteResult::of(addresses[index].clone())
            }
        };

        debug!(
            job_id = req.job_id,
            strategy = strategy.as_str(),
            address = %result.address,
            "路由完成"
        );
        Ok(result)
    }

    fn select_round(&self, job_id: i64, addresses: &[String]) -> String {
        let mut state = self.round_state.lock().expect("round路由状态锁中毒");
        state.refresh_if_expired();
        let counter = state.data.entry(job_id).or_insert_with(|| {
            // 随机起点，避免全部任务同时压向第一台执行器
            rand::rng().random_range(0..100)
        });
        let index = *counter % addresses.len();
        *counter = counter.wrapping_add(1);
        addresses[index].clone()
    }

    fn select_lfu(&self, job_id: i64, addresses: &[String]) -> String {
        let mut state = self.lfu_state.lock().expect("lfu路由状态锁中毒");
        state.refresh_if_expired();
        let freq_map = state.data.entry(job_id).or_default();

        // 新地址随机初始化计数，计数过大时同样重置
        for address in addresses {
            let need_init = freq_map
                .get(address)
                .map(|count| *count > LFU_RESET_THRESHOLD)
                .unwrap_or(true);
            if need_init {
                let init = rand::rng().random_range(0..addresses.len() as u64);
                freq_map.insert(address.clone(), init);
            }
        }
        // 地址列表变化时剔除失效条目
        freq_map.retain(|address, _| addresses.contains(address));

        let chosen = freq_map
            .iter()
            .min_by_key(|(address, count)| (**count, (*address).clone()))
            .map(|(address, _)| address.clone())
            .expect("LFU候选不应为空");
        *freq_map.get_mut(&chosen).expect("LFU条目刚刚写入") += 1;
        chosen
    }

    fn select_lru(&self, job_id: i64, addresses: &[String]) -> String {
        let mut state = self.lru_state.lock().expect("lru路由状态锁中毒");
        state.refresh_if_expired();
        let order = state.data.entry(job_id).or_default();

        order.retain(|address| addresses.contains(address));
        for address in addresses {
            if !order.contains(address) {
                order.push(address.clone());
            }
        }

        // 队首最久未使用；选中后移到队尾
        let chosen = order.remove(0);
        order.push(chosen.clone());
        chosen
    }

    /// 故障转移：按序探活，全部失败时降级返回最后一个地址
    async fn select_failover(&self, addresses: &[String]) -> RouteResult {
        let mut probe_notes = Vec::new();
        for address in addresses {
            match self.rpc.beat(address).await {
                Ok(resp) if resp.is_success() => {
                    probe_notes.push(format!("{address} 心跳正常"));
                    return RouteResult {
                        address: address.clone(),
                        note: Some(probe_notes.join("; ")),
                    };
                }
                Ok(resp) => {
                    probe_notes.push(format!(
                        "{address} 心跳失败: {}",
                        resp.msg.unwrap_or_default()
                    ));
                }
                Err(e) => {
                    probe_notes.push(format!("{address} 心跳异常: {e}"));
                }
            }
        }

        let fallback = addresses[addresses.len() - 1].clone();
        warn!(
            address = %fallback,
            "FAILOVER探活全部失败，降级使用最后一个地址派发"
        );
        RouteResult {
            address: fallback,
            note: Some(format!("探活全部失败，降级派发; {}", probe_notes.join("; "))),
        }
    }

    /// 忙碌转移：选择第一个空闲执行器，全忙则失败
    async fn select_busyover(&self, job_id: i64, addresses: &[String]) -> Result<RouteResult> {
        let idle_req = jobhive_core::IdleBeatRequest { job_id };
        let mut probe_notes = Vec::new();
        for address in addresses {
            match self.rpc.idle_beat(address, &idle_req).await {
                Ok(resp) if resp.is_success() => {
                    return Ok(RouteResult {
                        address: address.clone(),
                        note: Some(format!("{address} 空闲")),
                    });
                }
                Ok(resp) => {
                    probe_notes.push(format!(
                        "{address} 忙碌: {}",
                        resp.msg.unwrap_or_default()
                    ));
                }
                Err(e) => {
                    probe_notes.push(format!("{address} 探测异常: {e}"));
                }
            }
        }
        Err(JobHiveError::Dispatch(format!(
            "BUSYOVER未找到空闲执行器: {}",
            probe_notes.join("; ")
        )))
    }
}

/// 32位哈希环上的一致性哈希。同一任务在地址存续期间稳定命中同一地址；
/// 地址增删只迁移环上相邻区段的任务。
fn select_consistent_hash(job_id: i64, addresses: &[String]) -> String {
    let mut ring: BTreeMap<u32, &String> = BTreeMap::new();
    for address in addresses {
        for node in 0..VIRTUAL_NODE_COUNT {
            let key = format!("SHARD-{address}-NODE-{node}");
            ring.insert(hash_u32(&key), address);
        }
    }

    let job_hash = hash_u32(&job_id.to_string());
    ring.range(job_hash..)
        .next()
        .or_else(|| ring.iter().next())
        .map(|(_, address)| (*address).clone())
        .expect("哈希环不应为空")
}

fn hash_u32(key: &str) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
