//! 告警桥接核心 - 事件抑制、路由、通知与升级
//!
//! # 设计目标
//! 1. 单属主状态：所有状态表由一个 Bridge 实例独占，经消息循环串行变更
//! 2. 渠道解耦：核心只发射结构化发送 intent，不做网络传输
//! 3. 可撤销定时：soak 冲洗与升级梯级都是可 O(1) 撤销的定时任务
//! 4. 失败隔离：单个事件的错误只产出 `bridge.alert`，不影响状态机
//!
//! # 使用示例
//! ```ignore
//! use ops_alert_bridge::bridge::runtime;
//! use ops_alert_bridge::config::BridgeConfig;
//!
//! let (out_tx, out_rx) = tokio::sync::mpsc::unbounded_channel();
//! let handle = runtime::spawn(BridgeConfig::default(), out_tx)?;
//! handle.send_event(event);
//! ```

pub mod command;
pub mod composer;
pub mod core;
pub mod dedupe;
pub mod dispatcher;
pub mod escalation;
pub mod event;
pub mod metrics;
pub mod outbound;
pub mod quiet_hours;
pub mod rate_limit;
pub mod router;
pub mod runtime;
pub mod severity;
pub mod signing;
pub mod soak;
pub mod thread_key;

pub use command::{AckRecord, CommandKind, CommandOrigin, InboundCommand};
pub use composer::{render, summarize_metrics, Composed, Composer};
pub use self::core::{Bridge, ProcessOutcome};
pub use dedupe::{DedupeCheck, DedupeEntry, DedupeIndex};
pub use dispatcher::{
    parse_channel, ChannelKind, DiscordSend, Dispatcher, EmailSend, TelegramSend, WebhookSend,
};
pub use escalation::{EscalationBook, EscalationPolicy, EscalationStage, EscalationState};
pub use event::{BusEvent, IncidentEvent, IncidentPhase, PrefsUpdate, RiskIncident, SloStatus, TelemetryAlert};
pub use metrics::{MetricsAggregator, MetricsSnapshot, SuppressReason};
pub use outbound::{AlertLevel, OutboundEvent, OutgoingNotification};
pub use quiet_hours::QuietHours;
pub use rate_limit::RateLimiter;
pub use router::{Resolution, RouteResolver, RouteRuleSpec, SeveritySpec};
pub use runtime::{spawn, BridgeHandle, BridgeMsg};
pub use severity::Severity;
pub use signing::Signer;
pub use soak::{SoakBuffer, SoakEntry, SoakOffer};
pub use thread_key::{dedupe_key, thread_key};
