//! 统一事件模型 - 桥接器的输入总线
//!
//! 定义上游事件总线送入的所有消息结构，解决数据格式不一致问题：
//! 风险事件、遥测告警、SLO 状态，以及路由表 / 值班表 / 偏好 / 入站命令。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use super::command::InboundCommand;
use super::router::RouteRuleSpec;
use super::severity::{slo_severity, telemetry_severity, Severity};
use crate::config::{MuteConfig, QuietHoursConfig};

/// 风险事件阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentPhase {
    Open,
    Update,
    Closed,
}

impl IncidentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentPhase::Open => "open",
            IncidentPhase::Update => "update",
            IncidentPhase::Closed => "closed",
        }
    }
}

/// 事件影响范围（用于静音匹配和消息渲染）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentScope {
    /// 交易标的
    #[serde(default)]
    pub symbol: Option<String>,
    /// 场所 / 交易所
    #[serde(default)]
    pub venue: Option<String>,
}

/// 风险事件载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskIncident {
    /// 事件 ID（线程键，贯穿事件生命周期）
    pub incident_id: String,
    /// 事件类型（如 drawdown / exposure_breach）
    #[serde(rename = "type")]
    pub incident_type: String,
    /// 严重度
    pub severity: Severity,
    /// 影响范围
    #[serde(default)]
    pub scope: Option<IncidentScope>,
    /// 指标快照（如 {"risk": "2.1%", "slip": "4bps"}）
    #[serde(default)]
    pub metrics: serde_json::Map<String, Value>,
    /// 备注
    #[serde(default)]
    pub notes: Option<String>,
}

/// 遥测告警载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryAlert {
    /// 告警级别（仅 error 级触发处理）
    pub level: String,
    /// 告警内容
    pub message: String,
    /// 附加上下文（可能包含 symbol / service）
    #[serde(default)]
    pub context: Value,
}

/// SLO 状态载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SloStatus {
    pub service: String,
    pub slo: String,
    /// 评估窗口（如 "30d"）
    pub window: String,
    /// ok | at_risk | breached 等，仅非 ok 触发处理
    pub status: String,
    #[serde(default)]
    pub error_budget_used_pct: f64,
}

/// 偏好更新（部分更新：缺省字段保持现值）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefsUpdate {
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub quiet_hours: Option<QuietHoursConfig>,
    #[serde(default)]
    pub mute: Option<MuteConfig>,
}

/// 入站总线消息（按 `event` 字段区分）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum BusEvent {
    #[serde(rename = "risk.incident.open")]
    RiskIncidentOpen {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        incident: RiskIncident,
    },
    #[serde(rename = "risk.incident.update")]
    RiskIncidentUpdate {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        incident: RiskIncident,
    },
    #[serde(rename = "risk.incident.closed")]
    RiskIncidentClosed {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        incident: RiskIncident,
    },
    #[serde(rename = "telemetry.alert")]
    TelemetryAlert {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        alert: TelemetryAlert,
    },
    #[serde(rename = "telemetry.slo.status")]
    SloStatus {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        status: SloStatus,
    },
    /// 值班表：梯队名 -> 渠道列表
    #[serde(rename = "oncall.roster")]
    OncallRoster {
        timestamp: DateTime<Utc>,
        tiers: HashMap<String, Vec<String>>,
    },
    /// 路由表（整表替换，按序匹配）
    #[serde(rename = "bridge.channel.map")]
    ChannelMap {
        timestamp: DateTime<Utc>,
        rules: Vec<RouteRuleSpec>,
    },
    #[serde(rename = "bridge.prefs")]
    Prefs {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        prefs: PrefsUpdate,
    },
    #[serde(rename = "bridge.inbound.command")]
    InboundCommand {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        command: InboundCommand,
    },
}

impl BusEvent {
    /// 提取需要走抑制管线的事件；配置类消息返回 None
    pub fn into_incident(self) -> Option<IncidentEvent> {
        match self {
            BusEvent::RiskIncidentOpen { timestamp, incident } => Some(IncidentEvent::Risk {
                phase: IncidentPhase::Open,
                incident,
                timestamp,
            }),
            BusEvent::RiskIncidentUpdate { timestamp, incident } => Some(IncidentEvent::Risk {
                phase: IncidentPhase::Update,
                incident,
                timestamp,
            }),
            BusEvent::RiskIncidentClosed { timestamp, incident } => Some(IncidentEvent::Risk {
                phase: IncidentPhase::Closed,
                incident,
                timestamp,
            }),
            BusEvent::TelemetryAlert { timestamp, alert } => {
                Some(IncidentEvent::Telemetry { alert, timestamp })
            }
            BusEvent::SloStatus { timestamp, status } => {
                Some(IncidentEvent::Slo { status, timestamp })
            }
            _ => None,
        }
    }
}

/// 进入抑制管线的事件（风险 / 遥测 / SLO 三类）
#[derive(Debug, Clone)]
pub enum IncidentEvent {
    Risk {
        phase: IncidentPhase,
        incident: RiskIncident,
        timestamp: DateTime<Utc>,
    },
    Telemetry {
        alert: TelemetryAlert,
        timestamp: DateTime<Utc>,
    },
    Slo {
        status: SloStatus,
        timestamp: DateTime<Utc>,
    },
}

impl IncidentEvent {
    /// 总线上的事件名（路由规则的正则匹配对象）
    pub fn kind(&self) -> &'static str {
        match self {
            IncidentEvent::Risk { phase, .. } => match phase {
                IncidentPhase::Open => "risk.incident.open",
                IncidentPhase::Update => "risk.incident.update",
                IncidentPhase::Closed => "risk.incident.closed",
            },
            IncidentEvent::Telemetry { .. } => "telemetry.alert",
            IncidentEvent::Slo { .. } => "telemetry.slo.status",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            IncidentEvent::Risk { timestamp, .. }
            | IncidentEvent::Telemetry { timestamp, .. }
            | IncidentEvent::Slo { timestamp, .. } => *timestamp,
        }
    }

    /// 派生严重度
    pub fn severity(&self) -> Severity {
        match self {
            IncidentEvent::Risk { incident, .. } => incident.severity,
            IncidentEvent::Telemetry { alert, .. } => telemetry_severity(&alert.level),
            IncidentEvent::Slo { status, .. } => {
                slo_severity(&status.status, status.error_budget_used_pct)
            }
        }
    }

    pub fn incident_id(&self) -> Option<&str> {
        match self {
            IncidentEvent::Risk { incident, .. } => Some(incident.incident_id.as_str()),
            _ => None,
        }
    }

    /// 静音匹配用的标的
    pub fn symbol(&self) -> Option<&str> {
        match self {
            IncidentEvent::Risk { incident, .. } => incident
                .scope
                .as_ref()
                .and_then(|s| s.symbol.as_deref()),
            IncidentEvent::Telemetry { alert, .. } => {
                alert.context.get("symbol").and_then(|v| v.as_str())
            }
            IncidentEvent::Slo { .. } => None,
        }
    }

    /// 静音匹配用的事件类型
    pub fn incident_type(&self) -> Option<&str> {
        match self {
            IncidentEvent::Risk { incident, .. } => Some(incident.incident_type.as_str()),
            _ => None,
        }
    }

    /// 路由匹配用的服务名
    pub fn service(&self) -> Option<&str> {
        match self {
            IncidentEvent::Slo { status, .. } => Some(status.service.as_str()),
            IncidentEvent::Telemetry { alert, .. } => {
                alert.context.get("service").and_then(|v| v.as_str())
            }
            IncidentEvent::Risk { .. } => None,
        }
    }

    /// 路由匹配用的状态字符串
    pub fn status_str(&self) -> Option<&str> {
        match self {
            IncidentEvent::Slo { status, .. } => Some(status.status.as_str()),
            _ => None,
        }
    }

    /// 是否值得处理：遥测仅 error 级，SLO 仅非 ok
    pub fn should_process(&self) -> bool {
        match self {
            IncidentEvent::Risk { .. } => true,
            IncidentEvent::Telemetry { alert, .. } => alert.level == "error",
            IncidentEvent::Slo { status, .. } => status.status != "ok",
        }
    }

    /// 渲染模板用的上下文（供 `${path.to.field}` 寻径）
    pub fn context_value(&self) -> Value {
        match self {
            IncidentEvent::Risk {
                phase,
                incident,
                timestamp,
            } => json!({
                "kind": self.kind(),
                "phase": phase.as_str(),
                "severity": incident.severity.as_str(),
                "incident_id": incident.incident_id,
                "type": incident.incident_type,
                "symbol": incident.scope.as_ref().and_then(|s| s.symbol.clone()),
                "venue": incident.scope.as_ref().and_then(|s| s.venue.clone()),
                "metrics": Value::Object(incident.metrics.clone()),
                "notes": incident.notes,
                "timestamp": timestamp.to_rfc3339(),
            }),
            IncidentEvent::Telemetry { alert, timestamp } => json!({
                "kind": self.kind(),
                "severity": self.severity().as_str(),
                "level": alert.level,
                "message": alert.message,
                "context": alert.context,
                "timestamp": timestamp.to_rfc3339(),
            }),
            IncidentEvent::Slo { status, timestamp } => json!({
                "kind": self.kind(),
                "severity": self.severity().as_str(),
                "service": status.service,
                "slo": status.slo,
                "window": status.window,
                "status": status.status,
                "error_budget_used_pct": status.error_budget_used_pct,
                "timestamp": timestamp.to_rfc3339(),
            }),
        }
    }

    /// 批量通知里追加更新的一行摘要
    pub fn short_label(&self) -> String {
        match self {
            IncidentEvent::Risk { phase, incident, .. } => {
                format!("{} {}", incident.incident_type, phase.as_str())
            }
            IncidentEvent::Telemetry { alert, .. } => {
                let mut msg = alert.message.clone();
                if msg.len() > 48 {
                    msg.truncate(48);
                    msg.push('…');
                }
                msg
            }
            IncidentEvent::Slo { status, .. } => {
                format!("{}/{} {}", status.service, status.slo, status.status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn risk_json() -> String {
        r#"{
            "event": "risk.incident.open",
            "timestamp": "2026-08-06T10:00:00Z",
            "incidentId": "INC-42",
            "type": "drawdown",
            "severity": "critical",
            "scope": {"symbol": "BTC-USDT"},
            "metrics": {"risk": "2.1%", "slip": "4bps"},
            "notes": "breach on fast book"
        }"#
        .to_string()
    }

    #[test]
    fn test_parse_risk_incident_open() {
        let event: BusEvent = serde_json::from_str(&risk_json()).unwrap();
        let incident = event.into_incident().unwrap();

        assert_eq!(incident.kind(), "risk.incident.open");
        assert_eq!(incident.severity(), Severity::Critical);
        assert_eq!(incident.incident_id(), Some("INC-42"));
        assert_eq!(incident.symbol(), Some("BTC-USDT"));
        assert_eq!(incident.incident_type(), Some("drawdown"));
        assert!(incident.should_process());
    }

    #[test]
    fn test_parse_telemetry_alert() {
        let json = r#"{
            "event": "telemetry.alert",
            "timestamp": "2026-08-06T10:00:00Z",
            "level": "error",
            "message": "order gateway timeout",
            "context": {"service": "order-gw", "symbol": "ETH-USDT"}
        }"#;
        let incident = serde_json::from_str::<BusEvent>(json)
            .unwrap()
            .into_incident()
            .unwrap();

        assert_eq!(incident.kind(), "telemetry.alert");
        assert_eq!(incident.severity(), Severity::High);
        assert_eq!(incident.service(), Some("order-gw"));
        assert_eq!(incident.symbol(), Some("ETH-USDT"));
        assert!(incident.should_process());
    }

    #[test]
    fn test_telemetry_non_error_is_filtered() {
        let json = r#"{
            "event": "telemetry.alert",
            "timestamp": "2026-08-06T10:00:00Z",
            "level": "info",
            "message": "heartbeat ok"
        }"#;
        let incident = serde_json::from_str::<BusEvent>(json)
            .unwrap()
            .into_incident()
            .unwrap();
        assert!(!incident.should_process());
    }

    #[test]
    fn test_slo_status_severity_and_filter() {
        let json = r#"{
            "event": "telemetry.slo.status",
            "timestamp": "2026-08-06T10:00:00Z",
            "service": "md-feed",
            "slo": "availability",
            "window": "30d",
            "status": "breached",
            "errorBudgetUsedPct": 104.2
        }"#;
        let incident = serde_json::from_str::<BusEvent>(json)
            .unwrap()
            .into_incident()
            .unwrap();

        assert_eq!(incident.severity(), Severity::Critical);
        assert_eq!(incident.service(), Some("md-feed"));
        assert_eq!(incident.status_str(), Some("breached"));
        assert!(incident.should_process());

        let ok = r#"{
            "event": "telemetry.slo.status",
            "timestamp": "2026-08-06T10:00:00Z",
            "service": "md-feed",
            "slo": "availability",
            "window": "30d",
            "status": "ok"
        }"#;
        let incident = serde_json::from_str::<BusEvent>(ok)
            .unwrap()
            .into_incident()
            .unwrap();
        assert!(!incident.should_process());
    }

    #[test]
    fn test_config_events_are_not_incidents() {
        let json = r#"{
            "event": "oncall.roster",
            "timestamp": "2026-08-06T10:00:00Z",
            "tiers": {"primary": ["telegram:ops"]}
        }"#;
        let event: BusEvent = serde_json::from_str(json).unwrap();
        assert!(event.into_incident().is_none());
    }

    #[test]
    fn test_prefs_partial_update_shape() {
        // 只带 locale 的偏好更新，其余字段缺省
        let json = r#"{
            "event": "bridge.prefs",
            "timestamp": "2026-08-06T10:00:00Z",
            "locale": "zh"
        }"#;
        let event: BusEvent = serde_json::from_str(json).unwrap();
        match event {
            BusEvent::Prefs { prefs, .. } => {
                assert_eq!(prefs.locale.as_deref(), Some("zh"));
                assert!(prefs.quiet_hours.is_none());
                assert!(prefs.mute.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_context_value_paths() {
        let event: BusEvent = serde_json::from_str(&risk_json()).unwrap();
        let incident = event.into_incident().unwrap();
        let ctx = incident.context_value();

        assert_eq!(ctx["incident_id"], "INC-42");
        assert_eq!(ctx["metrics"]["risk"], "2.1%");
        assert_eq!(ctx["severity"], "critical");
    }

    #[test]
    fn test_short_label() {
        let event: BusEvent = serde_json::from_str(&risk_json()).unwrap();
        let incident = event.into_incident().unwrap();
        assert_eq!(incident.short_label(), "drawdown open");
    }
}
