//! 调度过期（misfire）处理

use tracing::warn;

use crate::model::{JobInfo, TriggerTask};

/// 触发时间已错过misfire阈值时的补偿决策。
/// DO_NOTHING只留痕；FIRE_ONCE_NOW生成一条立即触发任务，
/// 理论调度时间为None。下次触发时间的推进由扫描循环统一完成。
pub fn recover(job: &JobInfo) -> Option<TriggerTask> {
    match job.misfire_strategy {
        jobhive_core::MisfireStrategy::DoNothing => {
            warn!(job_id = job.id, "任务触发已过期，按DO_NOTHING策略跳过本次触发");
            None
        }
        jobhive_core::MisfireStrategy::FireOnceNow => {
            warn!(job_id = job.id, "任务触发已过期，按FIRE_ONCE_NOW策略立即补偿一次");
            Some(TriggerTask::of_misfire(job.id))
        }
    }
}
