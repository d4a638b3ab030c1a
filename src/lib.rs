//! Ops Alert Bridge - 运维告警的路由、去重与升级核心

pub mod bridge;
pub mod config;

pub use bridge::{
    spawn, AlertLevel, Bridge, BridgeHandle, BridgeMsg, BusEvent, IncidentEvent, InboundCommand,
    MetricsSnapshot, OutboundEvent, OutgoingNotification, ProcessOutcome, Severity, Signer,
    SuppressReason,
};
pub use config::BridgeConfig;
