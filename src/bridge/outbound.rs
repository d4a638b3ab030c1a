//! 出站总线模型 - 桥接器产出的全部消息
//!
//! 核心不做网络传输，只向下游总线发射结构化消息：规范化的通知、
//! 每渠道一条的发送 intent、确认 / 解决事件、周期指标与运维告警。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::command::CommandOrigin;
use super::dispatcher::{DiscordSend, EmailSend, TelegramSend, WebhookSend};
use super::metrics::MetricsSnapshot;
use super::severity::Severity;

/// 规范化的出站通知（交给分发器的单元）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingNotification {
    pub dedupe_key: String,
    /// 限流后实际投递的渠道
    pub channels: Vec<String>,
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub thread_key: String,
    /// 需要操作者响应时的动作（"ack" / "resolve"）
    #[serde(default)]
    pub actions: Vec<String>,
    /// 主事件的上下文（模板寻径用的同一份 JSON）
    #[serde(default)]
    pub context: Value,
    pub ttl_sec: u64,
}

/// 运维告警级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warn,
    Error,
}

/// 出站总线消息（按 `event` 字段区分）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum OutboundEvent {
    #[serde(rename = "bridge.notification.outgoing")]
    NotificationOutgoing {
        notification: OutgoingNotification,
    },
    #[serde(rename = "bridge.telegram.send")]
    TelegramSend(TelegramSend),
    #[serde(rename = "bridge.discord.send")]
    DiscordSend(DiscordSend),
    #[serde(rename = "bridge.email.send")]
    EmailSend(EmailSend),
    #[serde(rename = "bridge.webhook.send")]
    WebhookSend(WebhookSend),
    #[serde(rename = "incident.acknowledged")]
    IncidentAcknowledged {
        #[serde(rename = "incidentId")]
        incident_id: String,
        by: CommandOrigin,
        #[serde(rename = "ackLatencySec", skip_serializing_if = "Option::is_none")]
        ack_latency_sec: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "incident.resolved.external")]
    IncidentResolved {
        #[serde(rename = "incidentId")]
        incident_id: String,
        by: CommandOrigin,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "bridge.metrics")]
    Metrics(MetricsSnapshot),
    #[serde(rename = "bridge.alert")]
    Alert {
        level: AlertLevel,
        message: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        context: Value,
    },
}

impl OutboundEvent {
    /// intent 的渠道类型（指标用），非 intent 返回 None
    pub fn channel_type(&self) -> Option<&'static str> {
        match self {
            OutboundEvent::TelegramSend(_) => Some("telegram"),
            OutboundEvent::DiscordSend(_) => Some("discord"),
            OutboundEvent::EmailSend(_) => Some("email"),
            OutboundEvent::WebhookSend(_) => Some("webhook"),
            _ => None,
        }
    }
}
