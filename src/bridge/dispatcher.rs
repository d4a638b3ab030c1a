//! 渠道扇出分发器 - 把一条通知翻译成各渠道的发送 intent
//!
//! 渠道串形如 "type:target"。四种渠道族各有强类型的 intent 形态，
//! 都携带同一 threadKey 供下游聚合回复。未知渠道类型只跳过该渠道，
//! 其余渠道照常投递。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use super::outbound::{AlertLevel, OutboundEvent, OutgoingNotification};
use super::severity::Severity;
use super::signing::Signer;

/// 渠道族
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Telegram,
    Discord,
    Email,
    Webhook,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Telegram => "telegram",
            ChannelKind::Discord => "discord",
            ChannelKind::Email => "email",
            ChannelKind::Webhook => "webhook",
        }
    }

    pub fn parse(s: &str) -> Option<ChannelKind> {
        match s {
            "telegram" => Some(ChannelKind::Telegram),
            "discord" => Some(ChannelKind::Discord),
            "email" => Some(ChannelKind::Email),
            "webhook" => Some(ChannelKind::Webhook),
            _ => None,
        }
    }
}

/// 解析 "type:target" 渠道串
pub fn parse_channel(channel: &str) -> Option<(ChannelKind, &str)> {
    let (kind, target) = channel.split_once(':')?;
    let kind = ChannelKind::parse(kind)?;
    if target.is_empty() {
        return None;
    }
    Some((kind, target))
}

/// 聊天消息上的动作按钮
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAction {
    pub label: String,
    /// 回发到入站命令通道的指令文本（如 "/ack INC-1"）
    pub command: String,
}

/// Telegram 发送 intent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramSend {
    pub chat_id: String,
    pub text: String,
    #[serde(default)]
    pub actions: Vec<MessageAction>,
    pub thread_key: String,
}

/// Discord embed 字段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Discord 发送 intent（富 embed，按严重度着色）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordSend {
    pub channel_id: String,
    pub title: String,
    pub description: String,
    /// RGB 颜色值
    pub color: u32,
    #[serde(default)]
    pub fields: Vec<EmbedField>,
    pub thread_key: String,
}

/// 邮件线程头（同线程的通知聚到一个会话）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailHeaders {
    pub message_id: String,
    pub in_reply_to: String,
    pub references: String,
}

/// 邮件发送 intent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSend {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub headers: EmailHeaders,
    pub thread_key: String,
}

/// Webhook 发送 intent（载荷带 HMAC 签名）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSend {
    pub url: String,
    pub payload: Value,
    /// 对序列化载荷的 hex HMAC-SHA-256
    pub signature: String,
    pub thread_key: String,
}

/// 渠道扇出分发器
pub struct Dispatcher {
    colors: HashMap<Severity, u32>,
    signer: Signer,
}

/// 未配置严重度颜色时的缺省灰
const DEFAULT_COLOR: u32 = 0x95a5a6;

impl Dispatcher {
    pub fn new(severity_colors: &HashMap<String, String>, signer: Signer) -> Self {
        let mut colors = HashMap::new();
        for (name, hex) in severity_colors {
            if let (Some(severity), Some(color)) = (Severity::parse(name), parse_color(hex)) {
                colors.insert(severity, color);
            }
        }
        Self { colors, signer }
    }

    /// 把通知扇出为发送 intent；未知渠道类型产出 warn 级告警并跳过
    pub fn dispatch(&self, notification: &OutgoingNotification) -> Vec<OutboundEvent> {
        let mut events = Vec::with_capacity(notification.channels.len());

        for channel in &notification.channels {
            match parse_channel(channel) {
                Some((ChannelKind::Telegram, target)) => {
                    events.push(OutboundEvent::TelegramSend(self.telegram(notification, target)));
                }
                Some((ChannelKind::Discord, target)) => {
                    events.push(OutboundEvent::DiscordSend(self.discord(notification, target)));
                }
                Some((ChannelKind::Email, target)) => {
                    events.push(OutboundEvent::EmailSend(self.email(notification, target)));
                }
                Some((ChannelKind::Webhook, target)) => {
                    events.push(OutboundEvent::WebhookSend(self.webhook(notification, target)));
                }
                None => {
                    warn!(channel = %channel, "Unknown channel type, skipping");
                    events.push(OutboundEvent::Alert {
                        level: AlertLevel::Warn,
                        message: format!("unknown channel '{}', skipped", channel),
                        context: json!({ "threadKey": notification.thread_key }),
                    });
                }
            }
        }

        events
    }

    fn telegram(&self, n: &OutgoingNotification, target: &str) -> TelegramSend {
        let incident_id = n.context.get("incident_id").and_then(|v| v.as_str());
        let actions = n
            .actions
            .iter()
            .map(|action| MessageAction {
                label: capitalize(action),
                command: match incident_id {
                    Some(id) => format!("/{} {}", action, id),
                    None => format!("/{}", action),
                },
            })
            .collect();

        TelegramSend {
            chat_id: target.to_string(),
            text: format!("{}\n{}", n.title, n.body),
            actions,
            thread_key: n.thread_key.clone(),
        }
    }

    fn discord(&self, n: &OutgoingNotification, target: &str) -> DiscordSend {
        let mut fields = vec![EmbedField {
            name: "severity".to_string(),
            value: n.severity.as_str().to_string(),
            inline: true,
        }];
        for key in ["symbol", "service", "status"] {
            if let Some(value) = n.context.get(key).and_then(|v| v.as_str()) {
                fields.push(EmbedField {
                    name: key.to_string(),
                    value: value.to_string(),
                    inline: true,
                });
            }
        }

        DiscordSend {
            channel_id: target.to_string(),
            title: n.title.clone(),
            description: n.body.clone(),
            color: self.colors.get(&n.severity).copied().unwrap_or(DEFAULT_COLOR),
            fields,
            thread_key: n.thread_key.clone(),
        }
    }

    fn email(&self, n: &OutgoingNotification, target: &str) -> EmailSend {
        EmailSend {
            to: target.to_string(),
            subject: n.title.clone(),
            body: n.body.clone(),
            headers: EmailHeaders {
                message_id: format!("<{}@ops-alert-bridge>", n.dedupe_key),
                in_reply_to: format!("<{}@ops-alert-bridge>", n.thread_key),
                references: format!("<{}@ops-alert-bridge>", n.thread_key),
            },
            thread_key: n.thread_key.clone(),
        }
    }

    fn webhook(&self, n: &OutgoingNotification, target: &str) -> WebhookSend {
        let payload = json!({
            "dedupeKey": n.dedupe_key,
            "threadKey": n.thread_key,
            "severity": n.severity.as_str(),
            "title": n.title,
            "body": n.body,
            "actions": n.actions,
            "context": n.context,
            "ttlSec": n.ttl_sec,
        });
        // serde_json 键序稳定，签名对序列化字节可复验
        let bytes = serde_json::to_vec(&payload).unwrap_or_default();
        WebhookSend {
            url: target.to_string(),
            signature: self.signer.sign(&bytes),
            payload,
            thread_key: n.thread_key.clone(),
        }
    }
}

/// 解析 "#rrggbb" / "rrggbb" 颜色串
fn parse_color(hex: &str) -> Option<u32> {
    u32::from_str_radix(hex.trim().trim_start_matches('#'), 16).ok()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colors() -> HashMap<String, String> {
        HashMap::from([
            ("critical".to_string(), "#e74c3c".to_string()),
            ("high".to_string(), "#e67e22".to_string()),
        ])
    }

    fn notification(channels: Vec<&str>) -> OutgoingNotification {
        OutgoingNotification {
            dedupe_key: "00ff".to_string(),
            channels: channels.into_iter().map(String::from).collect(),
            title: "[critical] drawdown".to_string(),
            body: "risk=2.1%".to_string(),
            severity: Severity::Critical,
            thread_key: "INC-1".to_string(),
            actions: vec!["ack".to_string(), "resolve".to_string()],
            context: json!({"incident_id": "INC-1", "symbol": "BTC-USDT"}),
            ttl_sec: 300,
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(&colors(), Signer::new("hook-key"))
    }

    #[test]
    fn test_parse_channel() {
        assert_eq!(parse_channel("telegram:ops"), Some((ChannelKind::Telegram, "ops")));
        assert_eq!(
            parse_channel("webhook:https://x/alerts"),
            Some((ChannelKind::Webhook, "https://x/alerts"))
        );
        assert_eq!(parse_channel("pager:ops"), None);
        assert_eq!(parse_channel("telegram:"), None);
        assert_eq!(parse_channel("nocolon"), None);
    }

    #[test]
    fn test_fanout_one_intent_per_channel() {
        let events = dispatcher().dispatch(&notification(vec![
            "telegram:ops",
            "email:oncall@x",
            "webhook:https://x/alerts",
        ]));

        assert_eq!(events.len(), 3);
        let types: Vec<_> = events.iter().filter_map(|e| e.channel_type()).collect();
        assert_eq!(types, vec!["telegram", "email", "webhook"]);
    }

    #[test]
    fn test_all_intents_carry_thread_key() {
        let events = dispatcher().dispatch(&notification(vec![
            "telegram:ops",
            "discord:123",
            "email:oncall@x",
            "webhook:https://x/a",
        ]));

        for event in events {
            match event {
                OutboundEvent::TelegramSend(send) => assert_eq!(send.thread_key, "INC-1"),
                OutboundEvent::DiscordSend(send) => assert_eq!(send.thread_key, "INC-1"),
                OutboundEvent::EmailSend(send) => assert_eq!(send.thread_key, "INC-1"),
                OutboundEvent::WebhookSend(send) => assert_eq!(send.thread_key, "INC-1"),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_unknown_channel_skipped_others_delivered() {
        let events = dispatcher().dispatch(&notification(vec!["pager:ops", "telegram:ops"]));

        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            OutboundEvent::Alert { level: AlertLevel::Warn, .. }
        ));
        assert!(matches!(events[1], OutboundEvent::TelegramSend(_)));
    }

    #[test]
    fn test_telegram_action_buttons() {
        let events = dispatcher().dispatch(&notification(vec!["telegram:ops"]));
        let OutboundEvent::TelegramSend(send) = &events[0] else {
            panic!("expected telegram intent");
        };

        assert_eq!(send.chat_id, "ops");
        assert_eq!(send.actions.len(), 2);
        assert_eq!(send.actions[0].label, "Ack");
        assert_eq!(send.actions[0].command, "/ack INC-1");
        assert_eq!(send.actions[1].command, "/resolve INC-1");
    }

    #[test]
    fn test_discord_severity_color_and_fields() {
        let events = dispatcher().dispatch(&notification(vec!["discord:123"]));
        let OutboundEvent::DiscordSend(send) = &events[0] else {
            panic!("expected discord intent");
        };

        assert_eq!(send.color, 0xe74c3c);
        assert!(send.fields.iter().any(|f| f.name == "severity" && f.value == "critical"));
        assert!(send.fields.iter().any(|f| f.name == "symbol" && f.value == "BTC-USDT"));
    }

    #[test]
    fn test_discord_unconfigured_severity_uses_default_color() {
        let mut n = notification(vec!["discord:123"]);
        n.severity = Severity::Low;
        let events = dispatcher().dispatch(&n);
        let OutboundEvent::DiscordSend(send) = &events[0] else {
            panic!("expected discord intent");
        };
        assert_eq!(send.color, DEFAULT_COLOR);
    }

    #[test]
    fn test_email_threading_headers() {
        let events = dispatcher().dispatch(&notification(vec!["email:oncall@x"]));
        let OutboundEvent::EmailSend(send) = &events[0] else {
            panic!("expected email intent");
        };

        assert_eq!(send.to, "oncall@x");
        assert_eq!(send.headers.message_id, "<00ff@ops-alert-bridge>");
        assert_eq!(send.headers.in_reply_to, "<INC-1@ops-alert-bridge>");
        assert_eq!(send.headers.references, send.headers.in_reply_to);
    }

    #[test]
    fn test_webhook_signature_verifies() {
        let signer = Signer::new("hook-key");
        let events = dispatcher().dispatch(&notification(vec!["webhook:https://x/alerts"]));
        let OutboundEvent::WebhookSend(send) = &events[0] else {
            panic!("expected webhook intent");
        };

        let bytes = serde_json::to_vec(&send.payload).unwrap();
        assert!(signer.verify(&bytes, &send.signature));
        assert_eq!(send.payload["threadKey"], "INC-1");
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#e74c3c"), Some(0xe74c3c));
        assert_eq!(parse_color("e74c3c"), Some(0xe74c3c));
        assert_eq!(parse_color("red"), None);
    }
}
