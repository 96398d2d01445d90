//! Agent 生命周期 - 立即截图、定时截图与触发轮询的启停
//!
//! `Stopped → Starting → Running → Stopping → Stopped`

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::AgentConfig;
use crate::error::LifecycleError;
use crate::orchestrator::{CaptureCycle, CaptureOrchestrator};
use crate::trigger::{HttpTriggerSource, PollStats, TriggerPoller, TriggerSource};

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRunState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for AgentRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentRunState::Stopped => "stopped",
            AgentRunState::Starting => "starting",
            AgentRunState::Running => "running",
            AgentRunState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// 一次运行的统计（`stop` 返回）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub poll: PollStats,
    pub timer_cycles: u64,
}

struct Workers {
    cancel: CancelToken,
    timer: JoinHandle<u64>,
    poller: JoinHandle<PollStats>,
}

/// Agent 生命周期
pub struct AgentLifecycle {
    cycle: Arc<dyn CaptureCycle>,
    source: Arc<dyn TriggerSource>,
    capture_interval: Duration,
    poll_interval: Duration,
    state: AgentRunState,
    workers: Option<Workers>,
}

impl AgentLifecycle {
    pub fn new(
        cycle: Arc<dyn CaptureCycle>,
        source: Arc<dyn TriggerSource>,
        capture_interval: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            cycle,
            source,
            capture_interval,
            poll_interval,
            state: AgentRunState::Stopped,
            workers: None,
        }
    }

    /// 按配置组装编排器与 HTTP 触发来源
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let orchestrator = CaptureOrchestrator::from_config(config)?;
        let source = HttpTriggerSource::new(config).context("Failed to create trigger source")?;
        Ok(Self::new(
            Arc::new(orchestrator),
            Arc::new(source),
            config.capture_interval(),
            config.poll_interval(),
        ))
    }

    pub fn state(&self) -> AgentRunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == AgentRunState::Running
    }

    /// 启动：先同步执行一次截图，再启动定时线程与轮询线程
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        if self.state != AgentRunState::Stopped {
            return Err(LifecycleError::AlreadyRunning(self.state));
        }
        self.state = AgentRunState::Starting;
        info!(
            capture_interval_ms = self.capture_interval.as_millis() as u64,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Agent starting"
        );

        let outcome = self.cycle.run_cycle();
        debug!(outcome = ?outcome, "Initial capture cycle finished");

        let cancel = CancelToken::new();
        let timer = match spawn_timer(self.cycle.clone(), self.capture_interval, cancel.clone()) {
            Ok(handle) => handle,
            Err(source) => {
                self.state = AgentRunState::Stopped;
                return Err(LifecycleError::Spawn {
                    name: "capture-timer",
                    source,
                });
            }
        };

        let poller = TriggerPoller::new(self.source.clone(), self.cycle.clone(), self.poll_interval);
        let poller = match poller.spawn(cancel.clone()) {
            Ok(handle) => handle,
            Err(source) => {
                cancel.cancel();
                let _ = timer.join();
                self.state = AgentRunState::Stopped;
                return Err(LifecycleError::Spawn {
                    name: "trigger-poller",
                    source,
                });
            }
        };

        self.workers = Some(Workers {
            cancel,
            timer,
            poller,
        });
        self.state = AgentRunState::Running;
        info!("Agent running");
        Ok(())
    }

    /// 停止：取消共享令牌并等待两个线程退出
    ///
    /// 正在执行的周期会完成，之后不会再开始新的周期。
    pub fn stop(&mut self) -> Result<RunSummary, LifecycleError> {
        if self.state != AgentRunState::Running {
            return Err(LifecycleError::NotRunning(self.state));
        }
        self.state = AgentRunState::Stopping;
        info!("Agent stopping");

        let mut summary = RunSummary::default();
        if let Some(workers) = self.workers.take() {
            workers.cancel.cancel();
            match workers.poller.join() {
                Ok(stats) => summary.poll = stats,
                Err(_) => warn!("Trigger poller thread panicked"),
            }
            match workers.timer.join() {
                Ok(cycles) => summary.timer_cycles = cycles,
                Err(_) => warn!("Capture timer thread panicked"),
            }
        }

        self.state = AgentRunState::Stopped;
        info!(
            polls = summary.poll.polls,
            triggers = summary.poll.triggers,
            timer_cycles = summary.timer_cycles,
            "Agent stopped"
        );
        Ok(summary)
    }
}

impl Drop for AgentLifecycle {
    fn drop(&mut self) {
        if self.state == AgentRunState::Running {
            let _ = self.stop();
        }
    }
}

/// 固定间隔的截图定时器；返回执行的周期数
///
/// 按固定节拍触发，周期耗时不会推迟后续节拍；落后整拍时立即触发并丢弃积压。
fn spawn_timer(
    cycle: Arc<dyn CaptureCycle>,
    interval: Duration,
    cancel: CancelToken,
) -> std::io::Result<JoinHandle<u64>> {
    thread::Builder::new()
        .name("capture-timer".to_string())
        .spawn(move || {
            let mut cycles = 0;
            let mut next = Instant::now() + interval;
            while !cancel.wait_timeout(next.saturating_duration_since(Instant::now())) {
                let outcome = cycle.run_cycle();
                cycles += 1;
                debug!(outcome = ?outcome, "Timed capture cycle finished");

                next += interval;
                let now = Instant::now();
                if next < now {
                    debug!(
                        behind_ms = now.duration_since(next).as_millis() as u64,
                        "Capture cycle overran its tick"
                    );
                    next = now;
                }
            }
            cycles
        })
}
