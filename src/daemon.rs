//! Agent 进程管理 - 单实例锁与 PID 文件

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use tracing::{debug, warn};

use crate::config::config_dir;

const PID_FILE: &str = "agent.pid";

/// Agent 进程管理器
pub struct AgentDaemon {
    /// 数据目录
    data_dir: PathBuf,
}

impl AgentDaemon {
    /// 使用默认目录 `~/.config/capture-relay`
    pub fn new() -> Self {
        Self::with_dir(config_dir())
    }

    /// 使用指定目录（测试用）
    pub fn with_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// 获取 PID 文件路径
    pub fn pid_file_path(&self) -> PathBuf {
        self.data_dir.join(PID_FILE)
    }

    /// 获取单实例锁并写入当前 PID
    ///
    /// 已有实例持有锁时返回错误。
    pub fn acquire(&self) -> Result<InstanceLock> {
        fs::create_dir_all(&self.data_dir).with_context(|| {
            format!("Failed to create data directory {}", self.data_dir.display())
        })?;

        let path = self.pid_file_path();
        let mut file = open_pid_file(&path)?;
        if file.try_lock_exclusive().is_err() {
            let holder = read_pid_from(&mut file).ok().flatten();
            match holder {
                Some(pid) => bail!("Agent is already running (pid {})", pid),
                None => bail!("Agent is already running ({} is locked)", path.display()),
            }
        }

        let pid = std::process::id();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", pid)?;
        file.flush()?;
        debug!(pid, path = %path.display(), "Instance lock acquired");

        Ok(InstanceLock { file, path, pid })
    }

    /// 检查是否有实例持有锁
    pub fn is_running(&self) -> bool {
        let path = self.pid_file_path();
        if !path.exists() {
            return false;
        }
        match open_pid_file(&path) {
            Ok(file) => match file.try_lock_exclusive() {
                Ok(()) => {
                    let _ = file.unlock();
                    false
                }
                Err(_) => true,
            },
            Err(_) => false,
        }
    }

    /// 读取 PID
    pub fn read_pid(&self) -> Result<Option<u32>> {
        let path = self.pid_file_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(content.trim().parse().ok())
    }

    /// 向运行中的实例发送 SIGTERM；没有实例时返回 false
    pub fn stop(&self) -> Result<bool> {
        if !self.is_running() {
            return Ok(false);
        }
        let Some(pid) = self.read_pid()? else {
            return Ok(false);
        };
        terminate(pid)?;
        Ok(true)
    }
}

impl Default for AgentDaemon {
    fn default() -> Self {
        Self::new()
    }
}

/// 单实例锁，释放时解锁并删除 PID 文件
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
    pid: u32,
}

impl InstanceLock {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // 先删除再解锁，避免新实例刚写入的 PID 被删掉
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove pid file");
        }
        let _ = self.file.unlock();
    }
}

fn open_pid_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open pid file {}", path.display()))
}

fn read_pid_from(file: &mut File) -> Result<Option<u32>> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut content)?;
    Ok(content.trim().parse().ok())
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<()> {
    let output = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .output()
        .context("Failed to run kill")?;
    if !output.status.success() {
        bail!(
            "kill -TERM {} failed: {}",
            pid,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(windows)]
fn terminate(pid: u32) -> Result<()> {
    let output = Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .output()
        .context("Failed to run taskkill")?;
    if !output.status.success() {
        bail!(
            "taskkill /PID {} failed: {}",
            pid,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pid_file_path() {
        let daemon = AgentDaemon::new();
        let path = daemon.pid_file_path();
        assert!(path.to_string_lossy().contains("capture-relay"));
        assert!(path.to_string_lossy().ends_with("agent.pid"));
    }

    #[test]
    fn test_not_running_without_pid_file() {
        let dir = TempDir::new().unwrap();
        let daemon = AgentDaemon::with_dir(dir.path());
        assert!(!daemon.is_running());
        assert_eq!(daemon.read_pid().unwrap(), None);
        assert!(!daemon.stop().unwrap());
    }

    #[test]
    fn test_acquire_writes_pid_and_blocks_second_instance() {
        let dir = TempDir::new().unwrap();
        let daemon = AgentDaemon::with_dir(dir.path().join("state"));

        let lock = daemon.acquire().unwrap();
        assert_eq!(lock.pid(), std::process::id());
        assert_eq!(daemon.read_pid().unwrap(), Some(std::process::id()));
        assert!(daemon.is_running());

        let err = daemon.acquire().unwrap_err();
        assert!(err.to_string().contains("already running"));

        drop(lock);
        assert!(!daemon.pid_file_path().exists());
        assert!(!daemon.is_running());
        daemon.acquire().unwrap();
    }

    #[test]
    fn test_stale_pid_file_is_not_running() {
        let dir = TempDir::new().unwrap();
        let daemon = AgentDaemon::with_dir(dir.path());
        fs::write(daemon.pid_file_path(), "999999").unwrap();

        // 文件存在但没有被锁住
        assert!(!daemon.is_running());
        assert!(!daemon.stop().unwrap());

        let lock = daemon.acquire().unwrap();
        assert_eq!(daemon.read_pid().unwrap(), Some(lock.pid()));
    }
}
