//! Capture Relay CLI
//!
//! 定时/按需截图并上传到收集服务器

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use capture_relay::{
    AgentConfig, AgentDaemon, AgentLifecycle, CaptureOrchestrator, ChunkedUploader, CycleOutcome,
    ForwardingLayer, HttpChunkTransport, HttpTriggerSource, LogForwarder, TriggerSource,
};

#[derive(Parser)]
#[command(name = "crelay")]
#[command(about = "Capture Relay - 截图并通过分块上传转发到收集服务器")]
#[command(version)]
struct Cli {
    /// 配置文件路径（JSON）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 前台运行 agent，直到 Ctrl-C / SIGTERM
    Run {
        /// 不把日志转发到服务器
        #[arg(long)]
        no_forward: bool,
    },
    /// 执行一次截图周期
    Once,
    /// 分块上传单个文件（成功后删除）
    Upload {
        /// 文件路径
        path: PathBuf,
    },
    /// 检查一次服务器触发
    CheckTrigger,
    /// 显示生效的配置
    Config {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 查看 agent 是否在运行
    Status,
    /// 停止运行中的 agent
    Stop,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AgentConfig::load(cli.config.as_deref()).context("Failed to load config")?;

    let forward = match &cli.command {
        Commands::Run { no_forward } => config.forward_logs && !no_forward,
        Commands::Once => config.forward_logs,
        _ => false,
    };
    init_tracing(&config, forward);

    match cli.command {
        Commands::Run { .. } => run_agent(&config)?,
        Commands::Once => {
            let orchestrator = CaptureOrchestrator::from_config(&config)?;
            match orchestrator.run_cycle() {
                CycleOutcome::Uploaded { file_name, bytes } => {
                    println!("已上传 {} ({} 字节)", file_name, bytes);
                }
                CycleOutcome::NoArtifact => {
                    println!(
                        "未找到截图: {} / {}",
                        config.artifact_dir.display(),
                        config.artifact_pattern
                    );
                }
                CycleOutcome::CaptureFailed => bail!("Capture request failed"),
                CycleOutcome::UploadFailed => bail!("Upload failed, screenshot kept"),
            }
        }
        Commands::Upload { path } => {
            let transport = HttpChunkTransport::new(&config)?;
            let uploader = ChunkedUploader::from_config(&config, Arc::new(transport))
                .with_progress(Box::new(|p| {
                    eprintln!("  [{}/{}] {:.1}%", p.chunk_index, p.total_chunks, p.percent);
                }));
            let report = uploader
                .upload(&path)
                .with_context(|| format!("Failed to upload {}", path.display()))?;
            println!(
                "已上传 {} ({} 字节, {} 个分块, {} 次重试)",
                report.file_name, report.total_size, report.chunks, report.retries
            );
        }
        Commands::CheckTrigger => {
            let source = HttpTriggerSource::new(&config)?;
            if source.check().context("Trigger check failed")? {
                println!("服务器请求截图 ({})", config.capture_action);
            } else {
                println!("无触发");
            }
        }
        Commands::Config { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("服务器:       {}", config.server_url);
                println!("截图目录:     {}", config.artifact_dir.display());
                println!("文件匹配:     {}", config.artifact_pattern);
                println!("分块大小:     {} 字节", config.chunk_size);
                println!("重试次数:     {}", config.retry_budget);
                println!("轮询间隔:     {} ms", config.poll_interval_ms);
                println!("截图间隔:     {} ms", config.capture_interval_ms);
                println!(
                    "截图命令:     {} /run /tn {}",
                    config.capture_program, config.capture_task
                );
                println!("日志转发:     {}", config.forward_logs);
            }
        }
        Commands::Status => {
            let daemon = AgentDaemon::new();
            if daemon.is_running() {
                match daemon.read_pid()? {
                    Some(pid) => println!("agent 运行中 (PID: {})", pid),
                    None => println!("agent 运行中"),
                }
            } else {
                println!("agent 未运行");
            }
        }
        Commands::Stop => {
            let daemon = AgentDaemon::new();
            if daemon.stop()? {
                println!("已发送停止信号");
            } else {
                println!("agent 未运行");
            }
        }
    }

    Ok(())
}

/// 初始化 tracing：stderr 输出，可选地转发到服务器
///
/// 通过 RUST_LOG 控制日志级别，例如: RUST_LOG=debug crelay run
fn init_tracing(config: &AgentConfig, forward: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("capture_relay=info,crelay=info"));

    let mut forward_error = None;
    let forwarding = if forward {
        match LogForwarder::from_config(config) {
            Ok(forwarder) => Some(ForwardingLayer::new(forwarder)),
            Err(e) => {
                forward_error = Some(e);
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false),
        )
        .with(forwarding)
        .init();

    if let Some(e) = forward_error {
        warn!(error = %e, "Log forwarding disabled");
    }
}

fn run_agent(config: &AgentConfig) -> Result<()> {
    let daemon = AgentDaemon::new();
    let lock = daemon.acquire()?;
    info!(
        pid = lock.pid(),
        server = %config.server_url,
        dir = %config.artifact_dir.display(),
        "Capture relay starting"
    );

    let mut agent = AgentLifecycle::from_config(config)?;
    agent.start()?;

    wait_for_shutdown()?;
    info!("Shutdown signal received");

    agent.stop()?;
    drop(lock);
    Ok(())
}

/// 阻塞等待 Ctrl-C 或 SIGTERM
///
/// 只为信号等待创建单线程 runtime，其余部分都是同步线程。
fn wait_for_shutdown() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create signal runtime")?;

    runtime.block_on(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut terminate = signal(SignalKind::terminate())?;
            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
        }
        Ok::<(), std::io::Error>(())
    })?;

    Ok(())
}
