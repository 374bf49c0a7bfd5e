//! 路由策略的集成验证

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use jobhive_admin::executor_client::ExecutorRpc;
use jobhive_admin::route::Router;
use jobhive_core::{
    GlueType, IdleBeatRequest, JobHiveError, KillRequest, LogRequest, LogResult, Response, Result,
    RouteStrategy, TriggerRequest,
};

/// 可配置健康/空闲状态的执行器RPC桩
struct MockExecutorRpc {
    healthy: HashMap<String, bool>,
    idle: HashMap<String, bool>,
    beat_calls: Mutex<Vec<String>>,
}

impl MockExecutorRpc {
    fn new(healthy: &[(&str, bool)], idle: &[(&str, bool)]) -> Arc<Self> {
        Arc::new(Self {
            healthy: healthy
                .iter()
                .map(|(address, ok)| (address.to_string(), *ok))
                .collect(),
            idle: idle
                .iter()
                .map(|(address, ok)| (address.to_string(), *ok))
                .collect(),
            beat_calls: Mutex::new(Vec::new()),
        })
    }

    fn all_healthy() -> Arc<Self> {
        Arc::new(Self {
            healthy: HashMap::new(),
            idle: HashMap::new(),
            beat_calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ExecutorRpc for MockExecutorRpc {
    async fn beat(&self, address: &str) -> Result<Response<String>> {
        self.beat_calls.lock().await.push(address.to_string());
        if *self.healthy.get(address).unwrap_or(&true) {
            Ok(Response::of_success())
        } else {
            Ok(Response::of_fail("执行器不可达"))
        }
    }

    async fn idle_beat(&self, address: &str, _req: &IdleBeatRequest) -> Result<Response<String>> {
        if *self.idle.get(address).unwrap_or(&true) {
            Ok(Response::of_success())
        } else {
            Ok(Response::of_fail("任务执行中"))
        }
    }

    async fn run(&self, _address: &str, _req: &TriggerRequest) -> Result<Response<String>> {
        Ok(Response::of_success())
    }

    async fn kill(&self, _address: &str, _req: &KillRequest) -> Result<Response<String>> {
        Ok(Response::of_success())
    }

    async fn log(&self, _address: &str, _req: &LogRequest) -> Result<Response<LogResult>> {
        Ok(Response::of_fail("不支持"))
    }
}

fn trigger_req(job_id: i64) -> TriggerRequest {
    TriggerRequest {
        job_id,
        executor_handler: "demoHandler".into(),
        executor_params: String::new(),
        executor_block_strategy: "SERIAL_EXECUTION".into(),
        executor_timeout: 0,
        log_id: 1,
        log_date_time: chrono::Utc::now(),
        glue_type: GlueType::Bean,
        glue_source: String::new(),
        glue_updatetime: 0,
        shard_index: 0,
        shard_total: 1,
        schedule_time: None,
    }
}

fn addresses() -> Vec<String> {
    vec![
        "http://10.0.0.1:9999".to_string(),
        "http://10.0.0.2:9999".to_string(),
        "http://10.0.0.3:9999".to_string(),
    ]
}

#[tokio::test]
async fn test_first_and_last() {
    let router = Router::new(MockExecutorRpc::all_healthy());
    let list = addresses();
    let req = trigger_req(1);

    let first = router.route(RouteStrategy::First, &req, &list).await.unwrap();
    assert_eq!(first.address, list[0]);
    let last = router.route(RouteStrategy::Last, &req, &list).await.unwrap();
    assert_eq!(last.address, list[2]);
}

#[tokio::test]
async fn test_round_robin_visits_each_before_repeat() {
    let router = Router::new(MockExecutorRpc::all_healthy());
    let list = addresses();
    let req = trigger_req(7);

    // 同一任务连续N次路由，应在重复前覆盖全部N个地址
    let mut first_round = HashSet::new();
    for _ in 0..list.len() {
        let chosen = router
            .route(RouteStrategy::Round, &req, &list)
            .await
            .unwrap();
        first_round.insert(chosen.address);
    }
    assert_eq!(first_round.len(), list.len());

    let mut second_round = HashSet::new();
    for _ in 0..list.len() {
        let chosen = router
            .route(RouteStrategy::Round, &req, &list)
            .await
            .unwrap();
        second_round.insert(chosen.address);
    }
    assert_eq!(second_round.len(), list.len());
}

#[tokio::test]
async fn test_consistent_hash_sticky_across_calls() {
    let router = Router::new(MockExecutorRpc::all_healthy());
    let list = addresses();
    let req = trigger_req(42);

    let first = router
        .route(RouteStrategy::ConsistentHash, &req, &list)
        .await
        .unwrap();
    for _ in 0..10 {
        let again = router
            .route(RouteStrategy::ConsistentHash, &req, &list)
            .await
            .unwrap();
        assert_eq!(again.address, first.address);
    }
}

#[tokio::test]
async fn test_lru_cycles_through_all() {
    let router = Router::new(MockExecutorRpc::all_healthy());
    let list = addresses();
    let req = trigger_req(9);

    let mut seen = Vec::new();
    for _ in 0..list.len() {
        let chosen = router
            .route(RouteStrategy::LeastRecentlyUsed, &req, &list)
            .await
            .unwrap();
        seen.push(chosen.address);
    }
    let distinct: HashSet<&String> = seen.iter().collect();
    assert_eq!(distinct.len(), list.len(), "LRU应先轮完所有地址");
}

#[tokio::test]
async fn test_lfu_uses_all_addresses_over_time() {
    let router = Router::new(MockExecutorRpc::all_healthy());
    let list = addresses();
    let req = trigger_req(11);

    let mut seen = HashSet::new();
    for _ in 0..30 {
        let chosen = router
            .route(RouteStrategy::LeastFrequentlyUsed, &req, &list)
            .await
            .unwrap();
        seen.insert(chosen.address);
    }
    assert_eq!(seen.len(), list.len());
}

#[tokio::test]
async fn test_failover_selects_first_healthy() {
    // 两个执行器，第一个不健康时应选中第二个
    let rpc = MockExecutorRpc::new(
        &[("http://10.0.0.1:9999", false), ("http://10.0.0.2:9999", true)],
        &[],
    );
    let router = Router::new(rpc);
    let list = vec![
        "http://10.0.0.1:9999".to_string(),
        "http://10.0.0.2:9999".to_string(),
    ];
    let chosen = router
        .route(RouteStrategy::Failover, &trigger_req(1), &list)
        .await
        .unwrap();
    assert_eq!(chosen.address, "http://10.0.0.2:9999");
}

#[tokio::test]
async fn test_failover_all_healthy_prefers_first() {
    let rpc = MockExecutorRpc::new(
        &[("http://10.0.0.1:9999", true), ("http://10.0.0.2:9999", true)],
        &[],
    );
    let router = Router::new(rpc);
    let list = vec![
        "http://10.0.0.1:9999".to_string(),
        "http://10.0.0.2:9999".to_string(),
    ];
    for _ in 0..5 {
        let chosen = router
            .route(RouteStrategy::Failover, &trigger_req(1), &list)
            .await
            .unwrap();
        assert_eq!(chosen.address, "http://10.0.0.1:9999");
    }
}

#[tokio::test]
async fn test_failover_degrades_to_last_when_none_healthy() {
    let rpc = MockExecutorRpc::new(
        &[
            ("http://10.0.0.1:9999", false),
            ("http://10.0.0.2:9999", false),
            ("http://10.0.0.3:9999", false),
        ],
        &[],
    );
    let router = Router::new(rpc);
    let list = addresses();
    let chosen = router
        .route(RouteStrategy::Failover, &trigger_req(1), &list)
        .await
        .unwrap();
    // 全部探活失败时降级使用最后一个地址，并携带降级说明
    assert_eq!(chosen.address, list[2]);
    assert!(chosen.note.unwrap().contains("降级"));
}

#[tokio::test]
async fn test_busyover_picks_first_idle() {
    let rpc = MockExecutorRpc::new(
        &[],
        &[
            ("http://10.0.0.1:9999", false),
            ("http://10.0.0.2:9999", true),
            ("http://10.0.0.3:9999", true),
        ],
    );
    let router = Router::new(rpc);
    let chosen = router
        .route(RouteStrategy::Busyover, &trigger_req(1), &addresses())
        .await
        .unwrap();
    assert_eq!(chosen.address, "http://10.0.0.2:9999");
}

#[tokio::test]
async fn test_busyover_all_busy_fails() {
    let rpc = MockExecutorRpc::new(
        &[],
        &[
            ("http://10.0.0.1:9999", false),
            ("http://10.0.0.2:9999", false),
            ("http://10.0.0.3:9999", false),
        ],
    );
    let router = Router::new(rpc);
    let result = router
        .route(RouteStrategy::Busyover, &trigger_req(1), &addresses())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_empty_address_list_always_errors() {
    let router = Router::new(MockExecutorRpc::all_healthy());
    let strategies = [
        RouteStrategy::First,
        RouteStrategy::Last,
        RouteStrategy::Round,
        RouteStrategy::Random,
        RouteStrategy::ConsistentHash,
        RouteStrategy::LeastFrequentlyUsed,
        RouteStrategy::LeastRecentlyUsed,
        RouteStrategy::Failover,
        RouteStrategy::Busyover,
        RouteStrategy::ShardingBroadcast,
    ];
    for strategy in strategies {
        let result = router.route(strategy, &trigger_req(1), &[]).await;
        assert!(
            matches!(result, Err(JobHiveError::NoAvailableExecutor)),
            "策略{strategy:?}对空地址列表应返回无可用执行器"
        );
    }
}

#[tokio::test]
async fn test_sharding_broadcast_maps_shard_to_address() {
    let router = Router::new(MockExecutorRpc::all_healthy());
    let list = addresses();
    let mut req = trigger_req(1);
    req.shard_index = 1;
    req.shard_total = 3;
    let chosen = router
        .route(RouteStrategy::ShardingBroadcast, &req, &list)
        .await
        .unwrap();
    assert_eq!(chosen.address, list[1]);
}
