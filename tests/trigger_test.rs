//! 触发轮询测试 - 真实 HTTP 端点

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use capture_relay::{
    AgentConfig, CancelToken, CaptureCycle, CycleOutcome, HttpTriggerSource, PollError,
    TriggerPoller, TriggerSource,
};
use support::{StubResponse, StubServer};

fn source_for(url: &str) -> HttpTriggerSource {
    let config = AgentConfig {
        server_url: url.to_string(),
        poll_timeout_ms: 2_000,
        ..Default::default()
    };
    HttpTriggerSource::new(&config).unwrap()
}

#[test]
fn test_matching_response_is_a_trigger() {
    let server =
        StubServer::start(|_, _| StubResponse::json(r#"{"trigger": true, "action": "take_screenshot"}"#));
    let source = source_for(server.url());

    assert!(source.check().unwrap());

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/check_trigger");
}

#[test]
fn test_non_matching_responses_are_not_triggers() {
    let idle = StubServer::start(|_, _| StubResponse::json(r#"{"trigger": false}"#));
    assert!(!source_for(idle.url()).check().unwrap());

    let other = StubServer::start(|_, _| {
        StubResponse::json(r#"{"trigger": true, "action": "reboot"}"#)
    });
    assert!(!source_for(other.url()).check().unwrap());
}

#[test]
fn test_failures_are_poll_errors() {
    let failing = StubServer::start(|_, _| StubResponse::status(500));
    assert!(matches!(
        source_for(failing.url()).check(),
        Err(PollError::Status(500))
    ));

    // 只是提到 action 的纯文本被拒绝
    let loose = StubServer::start(|_, _| StubResponse::json("please take_screenshot now"));
    assert!(matches!(
        source_for(loose.url()).check(),
        Err(PollError::Decode(_))
    ));

    let unreachable = source_for(&support::closed_url());
    assert!(matches!(unreachable.check(), Err(PollError::Request(_))));
}

/// 统计周期数，达到 `limit` 后取消轮询
struct CancellingCycle {
    runs: AtomicUsize,
    limit: usize,
    cancel: CancelToken,
}

impl CaptureCycle for CancellingCycle {
    fn run_cycle(&self) -> CycleOutcome {
        if self.runs.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit {
            self.cancel.cancel();
        }
        CycleOutcome::NoArtifact
    }
}

#[test]
fn test_poller_runs_one_cycle_per_trigger() {
    // Given: 服务器隔次返回触发
    let server = StubServer::start(|_, index| {
        if index % 2 == 0 {
            StubResponse::json(r#"{"trigger": true, "action": "take_screenshot"}"#)
        } else {
            StubResponse::json(r#"{"trigger": false, "action": "take_screenshot"}"#)
        }
    });
    let cancel = CancelToken::new();
    let cycle = Arc::new(CancellingCycle {
        runs: AtomicUsize::new(0),
        limit: 2,
        cancel: cancel.clone(),
    });

    // When: 轮询直到执行两个周期
    let poller = TriggerPoller::new(
        Arc::new(source_for(server.url())),
        cycle.clone(),
        Duration::from_millis(10),
    );
    let stats = poller.run(&cancel);

    // Then: 第 0、2 次触发，第 1 次没有
    assert_eq!(cycle.runs.load(Ordering::SeqCst), 2);
    assert_eq!(stats.triggers, 2);
    assert_eq!(stats.polls, 3);
    assert_eq!(stats.errors, 0);
}

#[test]
fn test_poller_survives_unreachable_server() {
    let cancel = CancelToken::new();
    let cycle = Arc::new(CancellingCycle {
        runs: AtomicUsize::new(0),
        limit: usize::MAX,
        cancel: cancel.clone(),
    });
    let poller = TriggerPoller::new(
        Arc::new(source_for(&support::closed_url())),
        cycle.clone(),
        Duration::from_millis(10),
    );
    let handle = poller.spawn(cancel.clone()).unwrap();

    std::thread::sleep(Duration::from_millis(200));
    let started = Instant::now();
    cancel.cancel();
    let stats = handle.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(stats.polls >= 1);
    assert_eq!(stats.errors, stats.polls);
    assert_eq!(cycle.runs.load(Ordering::SeqCst), 0);
}
