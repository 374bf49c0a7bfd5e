//! 回调完成、级联触发、失败重试与结果丢失的集成验证

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use jobhive_admin::complete::JobCompleteService;
use jobhive_admin::model::{JobInfo, JobLog, TriggerTask};
use jobhive_admin::registry::RegistryService;
use jobhive_admin::storage::{
    JobInfoStore, JobLogStore, MemoryJobInfoStore, MemoryJobLogStore,
};
use jobhive_admin::trigger_pool::{TriggerPool, TriggerRunner};
use jobhive_core::{
    BlockStrategy, CallbackRequest, GlueType, HandleCode, MisfireStrategy, RegistryRequest,
    RegistryType, Response, RouteStrategy, ScheduleType, TriggerStatus, TriggerType,
};

struct RecordingRunner {
    tasks: Mutex<Vec<TriggerTask>>,
}

impl RecordingRunner {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(Vec::new()),
        })
    }

    async fn recorded(&self) -> Vec<TriggerTask> {
        self.tasks.lock().await.clone()
    }
}

#[async_trait]
impl TriggerRunner for RecordingRunner {
    async fn run_trigger(&self, task: TriggerTask) {
        self.tasks.lock().await.push(task);
    }

    async fn on_rejected(&self, task: TriggerTask, _reason: String) {
        self.tasks.lock().await.push(task);
    }
}

fn job_with_children(id: i64, children: Vec<i64>) -> JobInfo {
    JobInfo {
        id,
        job_group: 1,
        job_desc: "回调测试任务".into(),
        author: "test".into(),
        schedule_type: ScheduleType::Cron,
        schedule_conf: "0 * * * * *".into(),
        misfire_strategy: MisfireStrategy::DoNothing,
        executor_route_strategy: RouteStrategy::First,
        executor_block_strategy: BlockStrategy::SerialExecution,
        executor_handler: "demoHandler".into(),
        executor_params: String::new(),
        executor_timeout: 0,
        executor_fail_retry_count: 0,
        glue_type: GlueType::Bean,
        glue_source: String::new(),
        glue_updatetime: 0,
        child_job_ids: children,
        trigger_status: TriggerStatus::Running,
        trigger_last_time: None,
        trigger_next_time: None,
    }
}

struct Fixture {
    job_store: Arc<MemoryJobInfoStore>,
    log_store: Arc<MemoryJobLogStore>,
    registry: Arc<RegistryService>,
    pool: Arc<TriggerPool>,
    runner: Arc<RecordingRunner>,
    complete: Arc<JobCompleteService>,
}

fn fixture() -> Fixture {
    let job_store = Arc::new(MemoryJobInfoStore::new());
    let log_store = Arc::new(MemoryJobLogStore::new());
    let registry = RegistryService::new();
    let runner = RecordingRunner::new();
    let pool = TriggerPool::start(2, 1, runner.clone());
    let complete = JobCompleteService::new(
        job_store.clone() as Arc<dyn JobInfoStore>,
        log_store.clone() as Arc<dyn JobLogStore>,
        registry.clone(),
        pool.clone(),
    );
    Fixture {
        job_store,
        log_store,
        registry,
        pool,
        runner,
        complete,
    }
}

fn success_callback(log_id: i64) -> CallbackRequest {
    CallbackRequest {
        log_id,
        handle_code: HandleCode::SUCCESS,
        handle_msg: Some("执行成功".into()),
        finish_time: Utc::now(),
    }
}

#[tokio::test]
async fn test_callback_updates_log_and_cascades_children() {
    let fx = fixture();
    fx.job_store.save(job_with_children(1, vec![2])).await.unwrap();
    let mut log = JobLog::new(1, 1, None);
    log.trigger_code = Response::<String>::SUCCESS_CODE;
    let log_id = fx.log_store.save(log).await.unwrap();

    let resp = fx.complete.handle_callbacks(vec![success_callback(log_id)]).await;
    assert!(resp.is_success());

    let stored = fx.log_store.load(log_id).await.unwrap().unwrap();
    assert_eq!(stored.handle_code, HandleCode::SUCCESS);
    assert!(stored.handle_time.is_some());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let tasks = fx.runner.recorded().await;
    assert_eq!(tasks.len(), 1, "成功完成应级联触发子任务");
    assert_eq!(tasks[0].job_id, 2);
    assert_eq!(tasks[0].trigger_type, TriggerType::Parent);
    fx.pool.stop().await;
}

#[tokio::test]
async fn test_killed_callback_is_terminal_and_not_success() {
    let fx = fixture();
    fx.job_store.save(job_with_children(1, vec![2])).await.unwrap();
    let mut log = JobLog::new(1, 1, None);
    log.trigger_code = Response::<String>::SUCCESS_CODE;
    let log_id = fx.log_store.save(log).await.unwrap();

    let killed = CallbackRequest {
        log_id,
        handle_code: HandleCode::KILLED,
        handle_msg: Some("任务被终止".into()),
        finish_time: Utc::now(),
    };
    fx.complete.handle_callbacks(vec![killed]).await;

    let stored = fx.log_store.load(log_id).await.unwrap().unwrap();
    assert_eq!(stored.handle_code, HandleCode::KILLED);

    // 终态只写一次：迟到的成功回调被忽略，也不触发级联
    fx.complete.handle_callbacks(vec![success_callback(log_id)]).await;
    let stored = fx.log_store.load(log_id).await.unwrap().unwrap();
    assert_eq!(stored.handle_code, HandleCode::KILLED);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(fx.runner.recorded().await.is_empty());
    fx.pool.stop().await;
}

#[tokio::test]
async fn test_fail_retry_dispatches_with_decremented_budget() {
    let fx = fixture();
    fx.job_store.save(job_with_children(3, vec![])).await.unwrap();
    let mut log = JobLog::new(1, 3, None);
    log.trigger_code = Response::<String>::FAIL_CODE;
    log.executor_fail_retry_count = 2;
    log.executor_sharding_param = Some("1/3".into());
    fx.log_store.save(log).await.unwrap();

    let dispatched = fx.complete.scan_fail_retry().await.unwrap();
    assert_eq!(dispatched, 1);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let tasks = fx.runner.recorded().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].trigger_type, TriggerType::Retry);
    assert_eq!(tasks[0].fail_retry_count, 1, "重试预算应递减");
    assert_eq!(tasks[0].sharding_param, Some((1, 3)), "分片参数应保留");

    // 已派发的日志不会重复补偿
    assert_eq!(fx.complete.scan_fail_retry().await.unwrap(), 0);
    fx.pool.stop().await;
}

#[tokio::test]
async fn test_lost_job_marked_failed_when_executor_vanishes() {
    let fx = fixture();
    let now = Utc::now();

    // 存活执行器上的日志不受影响
    fx.registry
        .registry(RegistryRequest {
            registry_type: RegistryType::Executor,
            app_name: "demo".into(),
            address: "http://10.0.0.1:9999".into(),
        })
        .await
        .unwrap();
    let mut alive_log = JobLog::new(1, 1, None);
    alive_log.trigger_code = Response::<String>::SUCCESS_CODE;
    alive_log.executor_address = Some("http://10.0.0.1:9999".into());
    alive_log.trigger_time = now - ChronoDuration::minutes(20);
    let alive_id = fx.log_store.save(alive_log).await.unwrap();

    // 已失联执行器上的日志判定为结果丢失
    let mut lost_log = JobLog::new(1, 2, None);
    lost_log.trigger_code = Response::<String>::SUCCESS_CODE;
    lost_log.executor_address = Some("http://10.0.0.9:9999".into());
    lost_log.trigger_time = now - ChronoDuration::minutes(20);
    let lost_id = fx.log_store.save(lost_log).await.unwrap();

    let lost = fx.complete.scan_lost_jobs(now).await.unwrap();
    assert_eq!(lost, 1);
    let stored_alive = fx.log_store.load(alive_id).await.unwrap().unwrap();
    assert_eq!(stored_alive.handle_code, 0);
    let stored_lost = fx.log_store.load(lost_id).await.unwrap().unwrap();
    assert_eq!(stored_lost.handle_code, HandleCode::FAIL);
    assert!(stored_lost.handle_msg.unwrap().contains("丢失"));
    fx.pool.stop().await;
}
