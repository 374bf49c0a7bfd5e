//! # 调度时间计算
//!
//! CRON表达式解析与下次触发时间生成。对同一任务并发调用安全：
//! 计算是纯函数，不依赖共享可变状态。

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

use jobhive_core::{JobHiveError, Result, ScheduleType};

use crate::model::JobInfo;

/// CRON时钟：秒级六/七字段表达式
pub struct CronClock {
    schedule: Schedule,
}

impl CronClock {
    pub fn new(cron_expr: &str) -> Result<Self> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| JobHiveError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { schedule })
    }

    /// 严格晚于from的最早一次有效触发时间
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 从from开始的连续count次触发时间
    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    pub fn validate(cron_expr: &str) -> Result<()> {
        Schedule::from_str(cron_expr).map_err(|e| JobHiveError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}

/// 按任务的调度方式生成下次触发时间。
/// 返回`Ok(None)`表示该任务不参与周期调度。
pub fn next_trigger_time(job: &JobInfo, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    match job.schedule_type {
        ScheduleType::None => Ok(None),
        ScheduleType::Cron => {
            let clock = CronClock::new(&job.schedule_conf)?;
            Ok(clock.next_after(from))
        }
        ScheduleType::FixRate => {
            let interval: i64 = job.schedule_conf.trim().parse().map_err(|_| {
                JobHiveError::InvalidSchedule(format!(
                    "固定频率配置必须为正整数秒: {}",
                    job.schedule_conf
                ))
            })?;
            if interval <= 0 {
                return Err(JobHiveError::InvalidSchedule(format!(
                    "固定频率必须大于0: {interval}"
                )));
            }
            Ok(Some(from + Duration::seconds(interval)))
        }
    }
}

/// 配置阶段的调度合法性校验
pub fn validate_schedule(schedule_type: ScheduleType, schedule_conf: &str) -> Result<()> {
    match schedule_type {
        ScheduleType::None => Ok(()),
        ScheduleType::Cron => CronClock::validate(schedule_conf),
        ScheduleType::FixRate => match schedule_conf.trim().parse::<i64>() {
            Ok(interval) if interval > 0 => Ok(()),
            _ => Err(JobHiveError::InvalidSchedule(format!(
                "固定频率配置必须为正整数秒: {schedule_conf}"
            ))),
        },
    }
}
