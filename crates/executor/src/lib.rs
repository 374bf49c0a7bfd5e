//! # JobHive Executor
//!
//! 执行器侧任务生命周期：内嵌RPC服务受理触发，按任务id懒创建
//! 工作者串行消费有界触发队列，阻塞策略与终止信号在准入层原子
//! 生效；执行结果经回调派发器攒批上报，失败溢写本地重投。

pub mod admin_client;
pub mod app;
pub mod callback;
pub mod executor;
pub mod handler;
pub mod job_worker;
pub mod log;
pub mod registry;
pub mod script;
pub mod server;

pub use admin_client::{AdminRpc, HttpAdminRpc};
pub use app::ExecutorApp;
pub use callback::CallbackDispatcher;
pub use executor::ExecutorService;
pub use handler::{FnJobHandler, HandlerRegistry, JobContext, JobHandler};
pub use job_worker::{JobWorker, RunState};
pub use log::JobLogAppender;
pub use script::ScriptJobHandler;
