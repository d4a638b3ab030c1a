//! 路由解析 - 按序匹配规则，解析事件的目标渠道
//!
//! 规则按配置顺序求值，首个完全匹配的规则胜出；无匹配时回退到
//! 单一默认渠道，通知从不因缺路由而丢弃。解析是纯函数，无副作用。

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::event::IncidentEvent;
use super::severity::Severity;

/// 路由规则的线上形态（`bridge.channel.map` 与配置文件共用）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRuleSpec {
    #[serde(default, rename = "match")]
    pub matcher: RouteMatchSpec,
    pub channels: Vec<String>,
    #[serde(default)]
    pub rate_limit_per_min: Option<u32>,
}

/// 匹配条件（全部可选，给出的条件须全部成立）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMatchSpec {
    /// 对事件名的正则（如 "^risk\\."）
    #[serde(default)]
    pub event: Option<String>,
    /// 严重度：">=high" 为序比较，"high" 为精确匹配
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// 严重度匹配（序数比较，避免字符串排序的坑）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeveritySpec {
    AtLeast(Severity),
    Exact(Severity),
}

impl SeveritySpec {
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Some(rest) = trimmed.strip_prefix(">=") {
            let sev = Severity::parse(rest)
                .ok_or_else(|| anyhow!("unknown severity in spec '{}'", s))?;
            return Ok(SeveritySpec::AtLeast(sev));
        }
        let sev =
            Severity::parse(trimmed).ok_or_else(|| anyhow!("unknown severity in spec '{}'", s))?;
        Ok(SeveritySpec::Exact(sev))
    }

    pub fn matches(&self, severity: Severity) -> bool {
        match self {
            SeveritySpec::AtLeast(min) => severity >= *min,
            SeveritySpec::Exact(exact) => severity == *exact,
        }
    }
}

/// 编译后的路由规则
#[derive(Debug, Clone)]
pub struct RouteRule {
    event: Option<Regex>,
    severity: Option<SeveritySpec>,
    service: Option<String>,
    status: Option<String>,
    channels: Vec<String>,
    rate_limit_per_min: Option<u32>,
}

impl RouteRule {
    fn compile(spec: &RouteRuleSpec) -> Result<Self> {
        let event = spec
            .matcher
            .event
            .as_deref()
            .map(|p| Regex::new(p).with_context(|| format!("invalid event pattern '{}'", p)))
            .transpose()?;
        let severity = spec
            .matcher
            .severity
            .as_deref()
            .map(SeveritySpec::parse)
            .transpose()?;

        Ok(Self {
            event,
            severity,
            service: spec.matcher.service.clone(),
            status: spec.matcher.status.clone(),
            channels: spec.channels.clone(),
            rate_limit_per_min: spec.rate_limit_per_min,
        })
    }

    fn matches(&self, event: &IncidentEvent) -> bool {
        if let Some(re) = &self.event {
            if !re.is_match(event.kind()) {
                return false;
            }
        }
        if let Some(spec) = &self.severity {
            if !spec.matches(event.severity()) {
                return false;
            }
        }
        if let Some(service) = &self.service {
            if event.service() != Some(service.as_str()) {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if event.status_str() != Some(status.as_str()) {
                return false;
            }
        }
        true
    }
}

/// 路由解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub channels: Vec<String>,
    /// 命中规则的限流覆盖（None 用渠道类型默认值）
    pub rate_limit_per_min: Option<u32>,
}

/// 路由解析器
pub struct RouteResolver {
    rules: Vec<RouteRule>,
    default_channel: String,
}

impl RouteResolver {
    pub fn new(specs: &[RouteRuleSpec], default_channel: impl Into<String>) -> Result<Self> {
        Ok(Self {
            rules: Self::compile(specs)?,
            default_channel: default_channel.into(),
        })
    }

    fn compile(specs: &[RouteRuleSpec]) -> Result<Vec<RouteRule>> {
        specs.iter().map(RouteRule::compile).collect()
    }

    /// 整表替换路由规则（`bridge.channel.map`）；编译失败时保留旧表
    pub fn replace_rules(&mut self, specs: &[RouteRuleSpec]) -> Result<()> {
        self.rules = Self::compile(specs)?;
        Ok(())
    }

    /// 解析事件的目标渠道，确定性且无副作用
    pub fn resolve(&self, event: &IncidentEvent) -> Resolution {
        for rule in &self.rules {
            if rule.matches(event) {
                return Resolution {
                    channels: rule.channels.clone(),
                    rate_limit_per_min: rule.rate_limit_per_min,
                };
            }
        }
        Resolution {
            channels: vec![self.default_channel.clone()],
            rate_limit_per_min: None,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::event::{IncidentPhase, RiskIncident, SloStatus};
    use chrono::Utc;

    fn risk_event(severity: Severity) -> IncidentEvent {
        IncidentEvent::Risk {
            phase: IncidentPhase::Open,
            incident: RiskIncident {
                incident_id: "INC-1".to_string(),
                incident_type: "drawdown".to_string(),
                severity,
                scope: None,
                metrics: serde_json::Map::new(),
                notes: None,
            },
            timestamp: Utc::now(),
        }
    }

    fn slo_event(service: &str, status: &str) -> IncidentEvent {
        IncidentEvent::Slo {
            status: SloStatus {
                service: service.to_string(),
                slo: "availability".to_string(),
                window: "30d".to_string(),
                status: status.to_string(),
                error_budget_used_pct: 50.0,
            },
            timestamp: Utc::now(),
        }
    }

    fn spec(json: &str) -> RouteRuleSpec {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_severity_spec_parse() {
        assert_eq!(
            SeveritySpec::parse(">=high").unwrap(),
            SeveritySpec::AtLeast(Severity::High)
        );
        assert_eq!(
            SeveritySpec::parse("medium").unwrap(),
            SeveritySpec::Exact(Severity::Medium)
        );
        assert!(SeveritySpec::parse(">=loud").is_err());
    }

    #[test]
    fn test_at_least_matches_critical_not_medium() {
        // 规则 {severity: ">=high"} 必须匹配 critical、不匹配 medium
        let rules = vec![spec(
            r#"{"match": {"severity": ">=high"}, "channels": ["telegram:ops", "email:oncall@x"]}"#,
        )];
        let resolver = RouteResolver::new(&rules, "telegram:default").unwrap();

        let critical = resolver.resolve(&risk_event(Severity::Critical));
        assert_eq!(critical.channels, vec!["telegram:ops", "email:oncall@x"]);

        let medium = resolver.resolve(&risk_event(Severity::Medium));
        assert_eq!(medium.channels, vec!["telegram:default"]);
    }

    #[test]
    fn test_first_match_wins() {
        let rules = vec![
            spec(r#"{"match": {"severity": ">=high"}, "channels": ["telegram:first"]}"#),
            spec(r#"{"match": {"severity": ">=low"}, "channels": ["telegram:second"]}"#),
        ];
        let resolver = RouteResolver::new(&rules, "telegram:default").unwrap();

        let resolution = resolver.resolve(&risk_event(Severity::Critical));
        assert_eq!(resolution.channels, vec!["telegram:first"]);
    }

    #[test]
    fn test_event_regex_and_service_match() {
        let rules = vec![
            spec(r#"{"match": {"event": "^telemetry\\.slo", "service": "md-feed"}, "channels": ["discord:slo"]}"#),
        ];
        let resolver = RouteResolver::new(&rules, "telegram:default").unwrap();

        assert_eq!(
            resolver.resolve(&slo_event("md-feed", "breached")).channels,
            vec!["discord:slo"]
        );
        // 服务不同 -> 默认渠道
        assert_eq!(
            resolver.resolve(&slo_event("order-gw", "breached")).channels,
            vec!["telegram:default"]
        );
    }

    #[test]
    fn test_status_match() {
        let rules = vec![spec(
            r#"{"match": {"status": "breached"}, "channels": ["webhook:https://x/alerts"]}"#,
        )];
        let resolver = RouteResolver::new(&rules, "telegram:default").unwrap();

        assert_eq!(
            resolver.resolve(&slo_event("md-feed", "breached")).channels,
            vec!["webhook:https://x/alerts"]
        );
        assert_eq!(
            resolver.resolve(&slo_event("md-feed", "at_risk")).channels,
            vec!["telegram:default"]
        );
    }

    #[test]
    fn test_rate_limit_override_carried() {
        let rules = vec![spec(
            r#"{"match": {}, "channels": ["telegram:ops"], "rateLimitPerMin": 3}"#,
        )];
        let resolver = RouteResolver::new(&rules, "telegram:default").unwrap();

        let resolution = resolver.resolve(&risk_event(Severity::Low));
        assert_eq!(resolution.rate_limit_per_min, Some(3));
    }

    #[test]
    fn test_replace_rules_keeps_old_on_error() {
        let rules = vec![spec(r#"{"match": {}, "channels": ["telegram:a"]}"#)];
        let mut resolver = RouteResolver::new(&rules, "telegram:default").unwrap();

        let bad = vec![spec(r#"{"match": {"event": "["}, "channels": ["telegram:b"]}"#)];
        assert!(resolver.replace_rules(&bad).is_err());

        // 旧表不变
        assert_eq!(
            resolver.resolve(&risk_event(Severity::Low)).channels,
            vec!["telegram:a"]
        );
    }

    #[test]
    fn test_invalid_regex_rejected_at_compile() {
        let rules = vec![spec(r#"{"match": {"event": "["}, "channels": ["telegram:a"]}"#)];
        assert!(RouteResolver::new(&rules, "telegram:default").is_err());
    }
}
