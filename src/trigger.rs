//! 触发轮询 - 定期询问服务器是否需要立即截图
//!
//! `Idle → Polling → (Triggered | Idle) → Polling …`，只能通过取消结束。
//! 检查失败一律视为"无触发"，不会终止循环。

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::{endpoint_url, AgentConfig};
use crate::error::PollError;
use crate::orchestrator::CaptureCycle;

/// 触发来源
pub trait TriggerSource: Send + Sync {
    /// 一次检查；Ok(true) 表示服务器请求截图
    fn check(&self) -> Result<bool, PollError>;
}

/// `GET /check_trigger` 的响应体
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TriggerResponse {
    pub trigger: bool,
    #[serde(default)]
    pub action: Option<String>,
}

impl TriggerResponse {
    /// 严格解析 JSON
    pub fn parse(body: &str) -> Result<Self, PollError> {
        Ok(serde_json::from_str(body)?)
    }

    /// 只有 `trigger == true` 且 action 匹配时才算触发
    pub fn requests(&self, action: &str) -> bool {
        self.trigger && self.action.as_deref() == Some(action)
    }
}

/// HTTP 触发来源：`GET {base}/check_trigger`
#[derive(Debug, Clone)]
pub struct HttpTriggerSource {
    client: Client,
    url: Url,
    action: String,
}

impl HttpTriggerSource {
    pub fn new(config: &AgentConfig) -> Result<Self, PollError> {
        let base = config
            .base_url()
            .map_err(|e| PollError::Url(e.to_string()))?;
        let url = endpoint_url(&base, &["check_trigger"])
            .ok_or_else(|| PollError::Url(base.to_string()))?;
        let client = Client::builder().timeout(config.poll_timeout()).build()?;

        Ok(Self {
            client,
            url,
            action: config.capture_action.clone(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl TriggerSource for HttpTriggerSource {
    fn check(&self) -> Result<bool, PollError> {
        let response = self.client.get(self.url.clone()).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status(status.as_u16()));
        }

        let body = response.text()?;
        let parsed = TriggerResponse::parse(&body)?;
        Ok(parsed.requests(&self.action))
    }
}

/// 轮询统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub polls: u64,
    pub triggers: u64,
    pub errors: u64,
}

/// 触发轮询器
pub struct TriggerPoller {
    source: Arc<dyn TriggerSource>,
    cycle: Arc<dyn CaptureCycle>,
    interval: Duration,
}

impl TriggerPoller {
    pub fn new(
        source: Arc<dyn TriggerSource>,
        cycle: Arc<dyn CaptureCycle>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            cycle,
            interval,
        }
    }

    /// 在当前线程运行，直到 `cancel` 被触发
    pub fn run(&self, cancel: &CancelToken) -> PollStats {
        info!(interval_ms = self.interval.as_millis() as u64, "Trigger polling started");
        let mut stats = PollStats::default();

        while !cancel.is_cancelled() {
            stats.polls += 1;
            match self.source.check() {
                // 请求期间被取消：不再开始新的周期
                Ok(true) if cancel.is_cancelled() => {
                    debug!("Trigger received after cancellation, ignoring");
                }
                Ok(true) => {
                    stats.triggers += 1;
                    info!("Trigger received, taking screenshot");
                    // 同步执行，周期结束前不会再次轮询
                    let outcome = self.cycle.run_cycle();
                    debug!(outcome = ?outcome, "Triggered cycle finished");
                }
                Ok(false) => {}
                Err(e) => {
                    stats.errors += 1;
                    warn!(error = %e, "Trigger check failed");
                }
            }

            if cancel.wait_timeout(self.interval) {
                break;
            }
        }

        info!(
            polls = stats.polls,
            triggers = stats.triggers,
            errors = stats.errors,
            "Trigger polling stopped"
        );
        stats
    }

    /// 在独立线程上运行
    pub fn spawn(self, cancel: CancelToken) -> io::Result<JoinHandle<PollStats>> {
        thread::Builder::new()
            .name("trigger-poller".to_string())
            .spawn(move || self.run(&cancel))
    }
}
