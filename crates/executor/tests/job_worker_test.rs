//! 任务工作者阻塞策略、终止语义与结果回调的集成验证

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, Notify};

use jobhive_core::{
    CallbackRequest, GlueType, HandleCode, IdleBeatRequest, KillRequest, RegistryRequest,
    Response, Result, TriggerRequest,
};
use jobhive_executor::{
    AdminRpc, CallbackDispatcher, ExecutorService, JobContext, JobHandler, JobLogAppender,
};

#[derive(Default)]
struct MockAdminRpc {
    callbacks: Mutex<Vec<CallbackRequest>>,
}

impl MockAdminRpc {
    async fn callback_for(&self, log_id: i64) -> Option<CallbackRequest> {
        self.callbacks
            .lock()
            .await
            .iter()
            .find(|cb| cb.log_id == log_id)
            .cloned()
    }

    /// 轮询等待指定日志的回调到达
    async fn wait_callback(&self, log_id: i64, timeout: Duration) -> Option<CallbackRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(cb) = self.callback_for(log_id).await {
                return Some(cb);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[async_trait]
impl AdminRpc for MockAdminRpc {
    async fn callback(&self, batch: &[CallbackRequest]) -> Result<Response<String>> {
        self.callbacks.lock().await.extend_from_slice(batch);
        Ok(Response::of_success())
    }

    async fn registry(&self, _req: &RegistryRequest) -> Result<Response<String>> {
        Ok(Response::of_success())
    }

    async fn registry_remove(&self, _req: &RegistryRequest) -> Result<Response<String>> {
        Ok(Response::of_success())
    }
}

/// 等待放行信号的门控处理器，用于制造“执行中”状态
struct GateHandler {
    release: Arc<Notify>,
}

#[async_trait]
impl JobHandler for GateHandler {
    async fn execute(&self, ctx: JobContext) -> Result<String> {
        ctx.log("门控任务等待放行");
        self.release.notified().await;
        Ok("门控任务完成".into())
    }
}

/// 长睡眠处理器，用于验证超时
struct SlowHandler;

#[async_trait]
impl JobHandler for SlowHandler {
    async fn execute(&self, _ctx: JobContext) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok("不应执行到这里".into())
    }
}

struct Fixture {
    service: Arc<ExecutorService>,
    admin: Arc<MockAdminRpc>,
    _shutdown_tx: watch::Sender<bool>,
    _dir: tempfile::TempDir,
}

fn fixture(queue_capacity: usize) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let appender = Arc::new(JobLogAppender::new(dir.path().to_str().unwrap()).unwrap());
    let admin = Arc::new(MockAdminRpc::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let callback = CallbackDispatcher::start(
        admin.clone() as Arc<dyn AdminRpc>,
        appender.callback_dir(),
        shutdown_rx,
    )
    .unwrap();
    let service = ExecutorService::new(callback, appender, queue_capacity);
    Fixture {
        service,
        admin,
        _shutdown_tx: shutdown_tx,
        _dir: dir,
    }
}

fn trigger_req(job_id: i64, log_id: i64, handler: &str, block_strategy: &str) -> TriggerRequest {
    TriggerRequest {
        job_id,
        executor_handler: handler.into(),
        executor_params: String::new(),
        executor_block_strategy: block_strategy.into(),
        executor_timeout: 0,
        log_id,
        log_date_time: chrono::Utc::now(),
        glue_type: GlueType::Bean,
        glue_source: String::new(),
        glue_updatetime: 0,
        shard_index: 0,
        shard_total: 1,
        schedule_time: None,
    }
}

#[tokio::test]
async fn test_handler_not_found() {
    let fx = fixture(10);
    let resp = fx
        .service
        .run(trigger_req(1, 1, "missingHandler", "SERIAL_EXECUTION"))
        .await;
    assert!(!resp.is_success());
    assert!(resp.msg.unwrap().contains("任务处理器未找到"));
}

#[tokio::test]
async fn test_serial_execution_enqueues_while_running() {
    let fx = fixture(10);
    let release = Arc::new(Notify::new());
    fx.service.register_handler(
        "gateHandler",
        Arc::new(GateHandler {
            release: release.clone(),
        }),
    );

    // 第一条触发进入执行
    let first = fx
        .service
        .run(trigger_req(1, 101, "gateHandler", "SERIAL_EXECUTION"))
        .await;
    assert!(first.is_success());
    tokio::time::sleep(Duration::from_millis(200)).await;

    // 执行中提交第二条：串行策略应入队而非拒绝
    let second = fx
        .service
        .run(trigger_req(1, 102, "gateHandler", "SERIAL_EXECUTION"))
        .await;
    assert!(second.is_success(), "串行策略下第二条触发应入队");

    release.notify_one();
    let cb1 = fx.admin.wait_callback(101, Duration::from_secs(3)).await.unwrap();
    assert_eq!(cb1.handle_code, HandleCode::SUCCESS);
    release.notify_one();
    let cb2 = fx.admin.wait_callback(102, Duration::from_secs(3)).await.unwrap();
    assert_eq!(cb2.handle_code, HandleCode::SUCCESS);
}

#[tokio::test]
async fn test_serial_execution_rejects_when_queue_full() {
    let fx = fixture(1);
    let release = Arc::new(Notify::new());
    fx.service.register_handler(
        "gateHandler",
        Arc::new(GateHandler {
            release: release.clone(),
        }),
    );

    // 一条执行中 + 一条排队占满容量
    assert!(fx
        .service
        .run(trigger_req(1, 201, "gateHandler", "SERIAL_EXECUTION"))
        .await
        .is_success());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(fx
        .service
        .run(trigger_req(1, 202, "gateHandler", "SERIAL_EXECUTION"))
        .await
        .is_success());

    // 超出队列容量：快速失败
    let overflow = fx
        .service
        .run(trigger_req(1, 203, "gateHandler", "SERIAL_EXECUTION"))
        .await;
    assert!(!overflow.is_success());
    assert!(overflow.msg.unwrap().contains("队列已满"));

    fx.service.kill(KillRequest { job_id: 1 }).await;
}

#[tokio::test]
async fn test_discard_later_rejects_second_trigger() {
    let fx = fixture(10);
    let release = Arc::new(Notify::new());
    fx.service.register_handler(
        "gateHandler",
        Arc::new(GateHandler {
            release: release.clone(),
        }),
    );

    assert!(fx
        .service
        .run(trigger_req(1, 301, "gateHandler", "DISCARD_LATER"))
        .await
        .is_success());
    tokio::time::sleep(Duration::from_millis(200)).await;

    // 执行中到达的触发立即拒绝，永远不会排队
    let second = fx
        .service
        .run(trigger_req(1, 302, "gateHandler", "DISCARD_LATER"))
        .await;
    assert!(!second.is_success());
    assert!(second.msg.unwrap().contains("DISCARD_LATER"));

    release.notify_one();
    let cb1 = fx.admin.wait_callback(301, Duration::from_secs(3)).await.unwrap();
    assert_eq!(cb1.handle_code, HandleCode::SUCCESS);
    assert!(fx.admin.callback_for(302).await.is_none(), "被丢弃的触发没有执行回调");
}

#[tokio::test]
async fn test_cover_early_kills_inflight_and_runs_newest() {
    let fx = fixture(10);
    let release = Arc::new(Notify::new());
    fx.service.register_handler(
        "gateHandler",
        Arc::new(GateHandler {
            release: release.clone(),
        }),
    );

    assert!(fx
        .service
        .run(trigger_req(1, 401, "gateHandler", "COVER_EARLY"))
        .await
        .is_success());
    tokio::time::sleep(Duration::from_millis(200)).await;

    // 后到者优先：终止进行中的执行
    let second = fx
        .service
        .run(trigger_req(1, 402, "gateHandler", "COVER_EARLY"))
        .await;
    assert!(second.is_success());

    // 被终止的执行上报独立的killed结果码，而非成功
    let killed = fx.admin.wait_callback(401, Duration::from_secs(3)).await.unwrap();
    assert_eq!(killed.handle_code, HandleCode::KILLED);

    release.notify_one();
    let cb2 = fx.admin.wait_callback(402, Duration::from_secs(3)).await.unwrap();
    assert_eq!(cb2.handle_code, HandleCode::SUCCESS);
}

#[tokio::test]
async fn test_kill_is_idempotent_and_idle_beat_reflects_state() {
    let fx = fixture(10);
    let release = Arc::new(Notify::new());
    fx.service.register_handler(
        "gateHandler",
        Arc::new(GateHandler {
            release: release.clone(),
        }),
    );

    assert!(fx
        .service
        .run(trigger_req(1, 501, "gateHandler", "SERIAL_EXECUTION"))
        .await
        .is_success());
    tokio::time::sleep(Duration::from_millis(200)).await;

    // 执行中：非空闲
    let busy = fx.service.idle_beat(IdleBeatRequest { job_id: 1 }).await;
    assert!(!busy.is_success());

    // 终止执行：回调必须是killed终态
    let kill = fx.service.kill(KillRequest { job_id: 1 }).await;
    assert!(kill.is_success());
    let cb = fx.admin.wait_callback(501, Duration::from_secs(3)).await.unwrap();
    assert_eq!(cb.handle_code, HandleCode::KILLED);

    // 终止后空闲；重复kill依旧成功（幂等）
    let idle = fx.service.idle_beat(IdleBeatRequest { job_id: 1 }).await;
    assert!(idle.is_success());
    assert!(fx.service.kill(KillRequest { job_id: 1 }).await.is_success());
}

#[tokio::test]
async fn test_duplicate_log_id_rejected_while_queued() {
    let fx = fixture(10);
    let release = Arc::new(Notify::new());
    fx.service.register_handler(
        "gateHandler",
        Arc::new(GateHandler {
            release: release.clone(),
        }),
    );

    assert!(fx
        .service
        .run(trigger_req(1, 601, "gateHandler", "SERIAL_EXECUTION"))
        .await
        .is_success());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(fx
        .service
        .run(trigger_req(1, 602, "gateHandler", "SERIAL_EXECUTION"))
        .await
        .is_success());
    let duplicate = fx
        .service
        .run(trigger_req(1, 602, "gateHandler", "SERIAL_EXECUTION"))
        .await;
    assert!(!duplicate.is_success());
    assert!(duplicate.msg.unwrap().contains("重复"));

    fx.service.kill(KillRequest { job_id: 1 }).await;
}

#[tokio::test]
async fn test_execution_timeout_reports_timeout_code() {
    let fx = fixture(10);
    fx.service.register_handler("slowHandler", Arc::new(SlowHandler));

    let mut req = trigger_req(1, 701, "slowHandler", "SERIAL_EXECUTION");
    req.executor_timeout = 1;
    assert!(fx.service.run(req).await.is_success());

    let cb = fx.admin.wait_callback(701, Duration::from_secs(5)).await.unwrap();
    assert_eq!(cb.handle_code, HandleCode::TIMEOUT);
}
