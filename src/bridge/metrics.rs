//! 指标聚合 - 发送 / 抑制 / 确认时延计数与周期冲洗
//!
//! 计数器由桥接器实例独占，读取-重置在同一串行化纪律下进行，
//! 不会丢更新。每 `metricsFlushSec` 以 `bridge.metrics` 事件冲洗一次。

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 抑制原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuppressReason {
    Mute,
    Dedupe,
    Quiet,
    Soak,
    Rate,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressReason::Mute => "mute",
            SuppressReason::Dedupe => "dedupe",
            SuppressReason::Quiet => "quiet",
            SuppressReason::Soak => "soak",
            SuppressReason::Rate => "rate",
        }
    }
}

/// 冲洗出的指标快照（`bridge.metrics` 载荷）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// 按渠道类型计数的已发送 intent
    pub sent: HashMap<String, u64>,
    /// 按原因计数的抑制
    pub suppressed: HashMap<String, u64>,
    /// 产出的通知条数（含升级通知）
    pub notifications: u64,
    /// 触发的升级梯级数
    pub escalations: u64,
    pub acks: u64,
    /// 签名失败被丢弃的命令数
    pub commands_rejected: u64,
    /// 平均确认时延（秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_latency_avg_sec: Option<f64>,
    pub window_started_at: Option<DateTime<Utc>>,
    pub flushed_at: Option<DateTime<Utc>>,
}

/// 指标聚合器
pub struct MetricsAggregator {
    sent: HashMap<String, u64>,
    suppressed: HashMap<SuppressReason, u64>,
    notifications: u64,
    escalations: u64,
    acks: u64,
    commands_rejected: u64,
    ack_latency_sum_ms: i64,
    ack_latency_count: u64,
    window_started_at: DateTime<Utc>,
}

impl MetricsAggregator {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            sent: HashMap::new(),
            suppressed: HashMap::new(),
            notifications: 0,
            escalations: 0,
            acks: 0,
            commands_rejected: 0,
            ack_latency_sum_ms: 0,
            ack_latency_count: 0,
            window_started_at: now,
        }
    }

    pub fn record_sent(&mut self, channel_type: &str) {
        *self.sent.entry(channel_type.to_string()).or_insert(0) += 1;
    }

    pub fn record_suppressed(&mut self, reason: SuppressReason) {
        *self.suppressed.entry(reason).or_insert(0) += 1;
    }

    pub fn record_notification(&mut self) {
        self.notifications += 1;
    }

    pub fn record_escalation(&mut self) {
        self.escalations += 1;
    }

    pub fn record_ack(&mut self, latency: Option<Duration>) {
        self.acks += 1;
        if let Some(latency) = latency {
            self.ack_latency_sum_ms += latency.num_milliseconds();
            self.ack_latency_count += 1;
        }
    }

    pub fn record_command_rejected(&mut self) {
        self.commands_rejected += 1;
    }

    pub fn suppressed_count(&self, reason: SuppressReason) -> u64 {
        self.suppressed.get(&reason).copied().unwrap_or(0)
    }

    /// 读取并清零全部计数器
    pub fn snapshot_and_reset(&mut self, now: DateTime<Utc>) -> MetricsSnapshot {
        let ack_latency_avg_sec = if self.ack_latency_count > 0 {
            Some(self.ack_latency_sum_ms as f64 / self.ack_latency_count as f64 / 1000.0)
        } else {
            None
        };

        let snapshot = MetricsSnapshot {
            sent: std::mem::take(&mut self.sent),
            suppressed: self
                .suppressed
                .drain()
                .map(|(reason, count)| (reason.as_str().to_string(), count))
                .collect(),
            notifications: std::mem::take(&mut self.notifications),
            escalations: std::mem::take(&mut self.escalations),
            acks: std::mem::take(&mut self.acks),
            commands_rejected: std::mem::take(&mut self.commands_rejected),
            ack_latency_avg_sec,
            window_started_at: Some(self.window_started_at),
            flushed_at: Some(now),
        };

        self.ack_latency_sum_ms = 0;
        self.ack_latency_count = 0;
        self.window_started_at = now;
        snapshot
    }
}
