//! Ops Alert Bridge CLI
//!
//! 从 stdin 读取 JSONL 入站事件，向 stdout 写出 JSONL 出站消息；
//! 日志走 stderr（RUST_LOG 控制级别）

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use ops_alert_bridge::bridge::outbound::{AlertLevel, OutboundEvent};
use ops_alert_bridge::{spawn, BridgeConfig, BusEvent};

#[derive(Parser)]
#[command(name = "oab")]
#[command(about = "Ops Alert Bridge - 运维告警的路由、去重与升级")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行桥接器（stdin 入站 JSONL -> stdout 出站 JSONL）
    Run {
        /// 配置文件路径（默认 ~/.config/ops-alert-bridge/bridge.json）
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// 校验配置文件并打印摘要
    CheckConfig {
        /// 配置文件路径
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 环境变量控制日志级别，默认为 info
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ops_alert_bridge=info,oab=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_bridge(load_config(config)?).await,
        Commands::CheckConfig { config } => check_config(load_config(config)?),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<BridgeConfig> {
    let path = path.unwrap_or_else(BridgeConfig::default_path);
    if path.exists() {
        info!(path = %path.display(), "Loading config");
        BridgeConfig::load(&path)
    } else {
        warn!(path = %path.display(), "Config not found, using defaults");
        Ok(BridgeConfig::default())
    }
}

async fn run_bridge(config: BridgeConfig) -> Result<()> {
    let (out_tx, mut out_rx) = unbounded_channel::<OutboundEvent>();
    let handle = spawn(config, out_tx.clone())?;

    // 出站：逐行写 stdout
    let writer = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "Failed to serialize outbound event"),
            }
        }
    });

    // 入站：逐行读 stdin
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<BusEvent>(trimmed) {
            Ok(event) => handle.send_event(event),
            Err(e) => {
                // 畸形载荷只丢这一条，同时上报告警事件
                warn!(error = %e, "Malformed bus event, dropping");
                let _ = out_tx.send(OutboundEvent::Alert {
                    level: AlertLevel::Error,
                    message: format!("malformed bus event: {}", e),
                    context: serde_json::Value::Null,
                });
            }
        }
    }

    info!("Input stream closed, shutting down");
    handle.shutdown().await;
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

fn check_config(config: BridgeConfig) -> Result<()> {
    // 编译期校验路由与静音时段，提前暴露配置错误
    ops_alert_bridge::bridge::RouteResolver::new(&config.routes, config.default_channel.clone())?;
    if let Some(quiet) = &config.quiet_hours {
        ops_alert_bridge::bridge::QuietHours::from_config(quiet)?;
    }
    if config.secrets.signing_key.is_empty() {
        warn!("signingKey is empty: inbound commands are only checked when signed");
    }

    println!("routes: {}", config.routes.len());
    println!("escalation stages: {}", config.escalation.stages.len());
    println!(
        "soak window: {}s, dedupe window: {}s, metrics flush: {}s",
        config.soak.window_sec, config.dedupe.window_sec, config.metrics_flush_sec
    );
    println!("default channel: {}", config.default_channel);
    println!("config ok");
    Ok(())
}
