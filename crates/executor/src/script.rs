//! # 脚本glue处理器
//!
//! SHELL/PYTHON类型的任务把glue源码落到本地脚本文件，
//! 由解释器子进程执行，标准输出与错误流实时写入执行日志。
//! 子进程随执行任务中止而被杀死（kill_on_drop），终止语义与
//! BEAN处理器一致。

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use jobhive_core::{GlueType, JobHiveError, Result};

use crate::handler::{JobContext, JobHandler};

pub struct ScriptJobHandler {
    job_id: i64,
    glue_type: GlueType,
    glue_source: String,
    glue_updatetime: i64,
    glue_dir: PathBuf,
}

impl ScriptJobHandler {
    pub fn new(
        job_id: i64,
        glue_type: GlueType,
        glue_source: String,
        glue_updatetime: i64,
        glue_dir: PathBuf,
    ) -> Result<Self> {
        if !glue_type.is_script() {
            return Err(JobHiveError::Configuration(format!(
                "非脚本glue类型: {glue_type:?}"
            )));
        }
        Ok(Self {
            job_id,
            glue_type,
            glue_source,
            glue_updatetime,
            glue_dir,
        })
    }

    /// 脚本文件按(job_id, 源码版本)命名，版本变更产生新文件
    fn script_file(&self) -> PathBuf {
        let suffix = self.glue_type.suffix().unwrap_or(".sh");
        self.glue_dir
            .join(format!("{}_{}{}", self.job_id, self.glue_updatetime, suffix))
    }
}

#[async_trait]
impl JobHandler for ScriptJobHandler {
    async fn execute(&self, ctx: JobContext) -> Result<String> {
        let interpreter = self
            .glue_type
            .interpreter()
            .ok_or_else(|| JobHiveError::Execution("脚本glue缺少解释器".into()))?;

        let script_file = self.script_file();
        if !script_file.exists() {
            std::fs::write(&script_file, &self.glue_source)?;
            debug!(file = %script_file.display(), "glue脚本已落盘");
        }

        // 约定参数：脚本参数、分片序号、分片总数
        let mut child = tokio::process::Command::new(interpreter)
            .arg(&script_file)
            .arg(&ctx.params)
            .arg(ctx.shard_index.to_string())
            .arg(ctx.shard_total.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JobHiveError::Execution(format!("脚本进程启动失败: {e}")))?;

        // 输出流实时转写到执行日志
        if let Some(stdout) = child.stdout.take() {
            let log_ctx = ctx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log_ctx.log(&line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let log_ctx = ctx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log_ctx.log(&line);
                }
            });
        }

        let status = child
            .wait()
            .await
            .map_err(|e| JobHiveError::Execution(format!("脚本进程等待失败: {e}")))?;
        if status.success() {
            Ok(format!("脚本执行成功, exitCode={}", status.code().unwrap_or(0)))
        } else {
            Err(JobHiveError::Execution(format!(
                "脚本执行失败, exitCode={:?}",
                status.code()
            )))
        }
    }
}
