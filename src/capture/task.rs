//! 外部截图触发 - 通过计划任务调用截图工具

use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::config::AgentConfig;
use crate::error::CycleError;

/// 请求外部截图的协作方
pub trait CaptureTrigger: Send + Sync {
    /// 名称（用于日志）
    fn name(&self) -> &str;

    /// 请求一次截图；返回 Err 表示本周期不应继续上传
    fn request_capture(&self) -> Result<(), CycleError>;
}

/// 运行计划任务的截图触发器
///
/// 默认执行 `schtasks /run /tn <task>`，退出码 0 表示成功。
#[derive(Debug, Clone)]
pub struct ScheduledTaskTrigger {
    program: String,
    args: Vec<String>,
}

impl ScheduledTaskTrigger {
    /// 使用任意程序与参数
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// 从配置构造 `schtasks /run /tn <task>` 形式的调用
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.capture_program.clone(),
            vec![
                "/run".to_string(),
                "/tn".to_string(),
                config.capture_task.clone(),
            ],
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn resolve_program(&self) -> Result<PathBuf, CycleError> {
        which::which(&self.program).map_err(|e| CycleError::CaptureInvocation {
            code: None,
            stderr: format!("{} not found: {}", self.program, e),
        })
    }
}

impl CaptureTrigger for ScheduledTaskTrigger {
    fn name(&self) -> &str {
        &self.program
    }

    fn request_capture(&self) -> Result<(), CycleError> {
        let program = self.resolve_program()?;
        debug!(program = %program.display(), args = ?self.args, "Running capture task");

        let output = Command::new(&program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CycleError::CaptureInvocation {
                code: None,
                stderr: format!("failed to spawn {}: {}", program.display(), e),
            })?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            info!(output = %stdout.trim(), "Capture task triggered successfully");
            Ok(())
        } else {
            Err(CycleError::CaptureInvocation {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_builds_schtasks_call() {
        let config = AgentConfig {
            capture_task: "GrabScreen".to_string(),
            ..Default::default()
        };
        let trigger = ScheduledTaskTrigger::from_config(&config);
        assert_eq!(trigger.program(), "schtasks");
        assert_eq!(trigger.args(), ["/run", "/tn", "GrabScreen"]);
    }

    #[test]
    fn test_missing_program_is_invocation_error() {
        let trigger = ScheduledTaskTrigger::new("definitely-not-a-real-capture-tool-42", vec![]);
        let err = trigger.request_capture().unwrap_err();
        match err {
            CycleError::CaptureInvocation { code, stderr } => {
                assert_eq!(code, None);
                assert!(stderr.contains("not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_zero_exit_code_is_success() {
        let trigger = ScheduledTaskTrigger::new("sh", vec!["-c".into(), "echo queued".into()]);
        assert!(trigger.request_capture().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_code_carries_stderr() {
        let trigger = ScheduledTaskTrigger::new(
            "sh",
            vec!["-c".into(), "echo 'task missing' >&2; exit 3".into()],
        );
        match trigger.request_capture().unwrap_err() {
            CycleError::CaptureInvocation { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "task missing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
