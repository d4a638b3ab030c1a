//! 消息循环 - 桥接器的单属主执行环境
//!
//! 一个 tokio 任务独占 Bridge 状态，从无界信道串行消费消息；
//! soak / 升级定时器与指标节拍器都只向这条信道回发消息。
//! 同一线程键的事件因此严格按到达顺序求值。

use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::info;

use super::core::Bridge;
use super::event::BusEvent;
use super::outbound::OutboundEvent;
use crate::config::BridgeConfig;

/// 桥接器消息
#[derive(Debug, Clone)]
pub enum BridgeMsg {
    /// 入站总线消息
    Bus(BusEvent),
    /// soak 冲洗定时器到期
    SoakFlush { thread_key: String },
    /// 升级梯级定时器到期
    EscalationFire { incident_id: String, stage: usize },
    /// 指标冲洗节拍
    MetricsFlush,
    /// 结束消息循环
    Shutdown,
}

/// 运行中桥接器的句柄
pub struct BridgeHandle {
    tx: UnboundedSender<BridgeMsg>,
    join: JoinHandle<()>,
    metrics_ticker: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    /// 获取消息发送端（喂入站事件用）
    pub fn sender(&self) -> UnboundedSender<BridgeMsg> {
        self.tx.clone()
    }

    pub fn send_event(&self, event: BusEvent) {
        let _ = self.tx.send(BridgeMsg::Bus(event));
    }

    /// 停止节拍器并等待消息循环退出
    pub async fn shutdown(self) {
        if let Some(ticker) = self.metrics_ticker {
            ticker.abort();
        }
        let _ = self.tx.send(BridgeMsg::Shutdown);
        let _ = self.join.await;
    }
}

/// 启动桥接器：消息循环 + 指标节拍器
pub fn spawn(
    config: BridgeConfig,
    outbound: UnboundedSender<OutboundEvent>,
) -> Result<BridgeHandle> {
    let (tx, rx) = unbounded_channel();
    let metrics_flush_sec = config.metrics_flush_sec;
    let bridge = Bridge::new(config, outbound, tx.clone())?;

    let metrics_ticker = if metrics_flush_sec > 0 {
        let tick_tx = tx.clone();
        let period = Duration::from_secs(metrics_flush_sec);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // 首个 tick 立即返回，跳过
            interval.tick().await;
            loop {
                interval.tick().await;
                if tick_tx.send(BridgeMsg::MetricsFlush).is_err() {
                    break;
                }
            }
        }))
    } else {
        None
    };

    let join = tokio::spawn(run(bridge, rx));
    Ok(BridgeHandle {
        tx,
        join,
        metrics_ticker,
    })
}

async fn run(mut bridge: Bridge, mut rx: UnboundedReceiver<BridgeMsg>) {
    info!("Bridge loop started");
    while let Some(msg) = rx.recv().await {
        if matches!(msg, BridgeMsg::Shutdown) {
            break;
        }
        bridge.handle(msg);
    }
    info!("Bridge loop stopped");
}
