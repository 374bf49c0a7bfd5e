//! # 执行日志文件
//!
//! 每次执行一个日志文件：`{base}/yyyy-MM-dd/{log_id}.log`。
//! `log`接口按行号切片读取供轮询界面展示；过期日期目录由
//! 清理任务按保留天数删除。

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use jobhive_core::{LogResult, Result};

const DATE_DIR_FORMAT: &str = "%Y-%m-%d";

pub struct JobLogAppender {
    base_path: PathBuf,
}

impl JobLogAppender {
    pub fn new(base_path: &str) -> Result<Self> {
        let base = PathBuf::from(base_path);
        fs::create_dir_all(&base)?;
        fs::create_dir_all(base.join("glue"))?;
        fs::create_dir_all(base.join("callback"))?;
        Ok(Self { base_path: base })
    }

    /// 回调溢写文件目录
    pub fn callback_dir(&self) -> PathBuf {
        self.base_path.join("callback")
    }

    /// 脚本glue源文件目录
    pub fn glue_dir(&self) -> PathBuf {
        self.base_path.join("glue")
    }

    /// 定位一次执行的日志文件路径，按日期分目录
    pub fn log_file_path(&self, log_date: DateTime<Utc>, log_id: i64) -> PathBuf {
        let day_dir = self
            .base_path
            .join(log_date.format(DATE_DIR_FORMAT).to_string());
        day_dir.join(format!("{log_id}.log"))
    }

    /// 追加一行日志，自动补时间戳前缀。写失败只留痕不中断执行。
    pub fn append(&self, log_file: &Path, content: &str) {
        if let Some(parent) = log_file.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!(error = %e, "创建日志目录失败");
                return;
            }
        }
        let line = format!("{} {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"), content);
        let result = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = result {
            error!(file = %log_file.display(), error = %e, "执行日志写入失败");
        }
    }

    /// 从指定行号读取日志分片（行号1起）。
    /// 文件不存在视为空内容，to_line与from_line对齐。
    pub fn read(&self, log_file: &Path, from_line: i32) -> LogResult {
        let content = fs::read_to_string(log_file).unwrap_or_default();
        let lines: Vec<&str> = if content.is_empty() {
            Vec::new()
        } else {
            content.lines().collect()
        };
        let total = lines.len() as i32;
        let from = from_line.max(1);
        if from > total {
            return LogResult {
                from_line_num: from,
                to_line_num: total.max(from - 1),
                log_content: String::new(),
                is_end: true,
            };
        }
        let slice: Vec<&str> = lines[(from - 1) as usize..].to_vec();
        LogResult {
            from_line_num: from,
            to_line_num: total,
            log_content: slice.join("\n"),
            // 是否真正结束由执行状态决定，调用方按需覆盖
            is_end: false,
        }
    }

    /// 删除超过保留天数的日期目录，返回删除的目录数。
    /// retention_days为负时不清理。
    pub fn clean_expired(&self, retention_days: i64) -> usize {
        if retention_days < 0 {
            return 0;
        }
        let today = Utc::now().date_naive();
        let mut removed = 0usize;
        let Ok(entries) = fs::read_dir(&self.base_path) else {
            return 0;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Ok(dir_date) = NaiveDate::parse_from_str(name, DATE_DIR_FORMAT) else {
                continue;
            };
            if (today - dir_date).num_days() > retention_days {
                match fs::remove_dir_all(entry.path()) {
                    Ok(()) => {
                        info!(dir = name, "清理过期执行日志目录");
                        removed += 1;
                    }
                    Err(e) => warn!(dir = name, error = %e, "清理日志目录失败"),
                }
            }
        }
        removed
    }

    /// 启动每日清理任务
    pub fn start_clean_task(
        self: &std::sync::Arc<Self>,
        retention_days: i64,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let appender = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => {
                        appender.clean_expired(retention_days);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let appender = JobLogAppender::new(dir.path().to_str().unwrap()).unwrap();
        let log_file = appender.log_file_path(Utc::now(), 100);

        appender.append(&log_file, "任务执行开始");
        appender.append(&log_file, "处理第1批数据");
        appender.append(&log_file, "任务执行结束");

        let result = appender.read(&log_file, 1);
        assert_eq!(result.from_line_num, 1);
        assert_eq!(result.to_line_num, 3);
        assert!(result.log_content.contains("处理第1批数据"));

        // 增量读取
        let tail = appender.read(&log_file, 3);
        assert_eq!(tail.to_line_num, 3);
        assert!(tail.log_content.contains("任务执行结束"));
        assert!(!tail.log_content.contains("开始"));
    }

    #[test]
    fn test_read_past_end_reports_empty() {
        let dir = tempfile::tempdir().unwrap();
        let appender = JobLogAppender::new(dir.path().to_str().unwrap()).unwrap();
        let log_file = appender.log_file_path(Utc::now(), 101);
        appender.append(&log_file, "仅一行");

        let result = appender.read(&log_file, 5);
        assert!(result.log_content.is_empty());
        assert!(result.is_end);
    }

    #[test]
    fn test_clean_expired_keeps_recent() {
        let dir = tempfile::tempdir().unwrap();
        let appender = JobLogAppender::new(dir.path().to_str().unwrap()).unwrap();

        let old_dir = dir.path().join("2020-01-01");
        fs::create_dir_all(&old_dir).unwrap();
        let today_dir = dir
            .path()
            .join(Utc::now().format(DATE_DIR_FORMAT).to_string());
        fs::create_dir_all(&today_dir).unwrap();

        let removed = appender.clean_expired(30);
        assert_eq!(removed, 1);
        assert!(!old_dir.exists());
        assert!(today_dir.exists());
    }
}
