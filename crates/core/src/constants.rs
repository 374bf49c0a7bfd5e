//! 系统级常量定义

/// 执行器心跳间隔（秒）
pub const BEAT_INTERVAL_SECS: u64 = 30;

/// 注册信息死亡超时（秒），为心跳间隔的3倍
pub const DEAD_TIMEOUT_SECS: i64 = BEAT_INTERVAL_SECS as i64 * 3;

/// 调度预读窗口（毫秒），同时也是misfire判定阈值
pub const PRE_READ_MS: i64 = 5000;

/// 快线程池默认工作者数量
pub const TRIGGER_POOL_FAST_MAX: usize = 200;

/// 慢线程池默认工作者数量
pub const TRIGGER_POOL_SLOW_MAX: usize = 100;

/// 快线程池队列容量
pub const FAST_POOL_QUEUE_SIZE: usize = 2000;

/// 慢线程池队列容量
pub const SLOW_POOL_QUEUE_SIZE: usize = 5000;

/// 单次触发耗时超过该值（毫秒）计为一次慢触发
pub const TRIGGER_SLOW_MS: u128 = 500;

/// 一分钟内慢触发次数达到该值后，该任务改走慢线程池
pub const SLOW_ROUTE_THRESHOLD: u32 = 10;

/// 任务工作者触发队列默认容量
pub const JOB_QUEUE_CAPACITY: usize = 500;

/// 任务工作者队列轮询超时（秒）
pub const JOB_POLL_TIMEOUT_SECS: u64 = 3;

/// 连续空闲轮询达到该次数后任务工作者自行销毁
pub const JOB_IDLE_TIMES: u32 = 30;

/// 回调handle_msg最大长度，超出部分截断
pub const MAX_HANDLE_MSG_LEN: usize = 50_000;

/// 回调批次投递失败的最大重试次数
pub const CALLBACK_RETRY_TIMES: u32 = 3;

/// 回调溢写文件重投间隔（秒）
pub const CALLBACK_RETRY_INTERVAL_SECS: u64 = 30;

/// beat/idleBeat/run/kill等控制类RPC的客户端超时（秒）
pub const RPC_CONTROL_TIMEOUT_SECS: u64 = 3;

/// callback/log等数据类RPC的客户端超时（秒）
pub const RPC_DATA_TIMEOUT_SECS: u64 = 10;

/// 运行中日志在注册表失联超过该分钟数后判定为结果丢失
pub const LOST_JOB_TIMEOUT_MINS: i64 = 10;

/// 执行日志文件默认保留天数
pub const LOG_RETENTION_DAYS: i64 = 30;

/// 访问令牌请求头名称
pub const ACCESS_TOKEN_HEADER: &str = "JobHive-Access-Token";
