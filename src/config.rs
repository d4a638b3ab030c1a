//! 桥接器配置 - JSON 配置文件与运行时偏好的结构定义
//!
//! 所有字段均有缺省值；配置文件只需覆盖关心的部分。
//! 默认路径 `~/.config/ops-alert-bridge/bridge.json`。

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::bridge::router::RouteRuleSpec;
use crate::bridge::severity::Severity;

/// 静音时段配置（固定偏移时区，如 "+08:00" / "UTC"）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QuietHoursConfig {
    pub start: String,
    pub end: String,
    pub timezone: String,
}

impl Default for QuietHoursConfig {
    fn default() -> Self {
        Self {
            start: "23:30".to_string(),
            end: "07:30".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

/// Soak 批量窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SoakConfig {
    pub window_sec: u64,
    /// 单个批量保留的事件载荷上限
    pub max_batch: usize,
}

impl Default for SoakConfig {
    fn default() -> Self {
        Self {
            window_sec: 60,
            max_batch: 20,
        }
    }
}

/// 去重窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DedupeConfig {
    pub window_sec: u64,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self { window_sec: 300 }
    }
}

/// 每渠道类型的每分钟发送上限
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateConfig {
    pub telegram_per_min: u32,
    pub discord_per_min: u32,
    pub email_per_min: u32,
    pub webhook_per_min: u32,
    /// 未覆盖渠道类型的兜底上限
    pub default_per_min: u32,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            telegram_per_min: 20,
            discord_per_min: 20,
            email_per_min: 10,
            webhook_per_min: 60,
            default_per_min: 30,
        }
    }
}

impl RateConfig {
    /// 渠道类型的默认上限
    pub fn limit_for(&self, channel_type: &str) -> u32 {
        match channel_type {
            "telegram" => self.telegram_per_min,
            "discord" => self.discord_per_min,
            "email" => self.email_per_min,
            "webhook" => self.webhook_per_min,
            _ => self.default_per_min,
        }
    }
}

/// 升级梯级配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConfig {
    /// 距升级开始的秒数偏移
    pub after_sec: u64,
    #[serde(default)]
    pub channels: Vec<String>,
    /// 值班表梯队名（oncall.roster 解析出的额外渠道）
    #[serde(default)]
    pub target: Option<String>,
}

/// 升级策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EscalationConfig {
    pub stages: Vec<StageConfig>,
    /// 需要人工确认的严重度集合
    pub require_ack_severities: Vec<Severity>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            require_ack_severities: vec![Severity::High, Severity::Critical],
        }
    }
}

/// 通知模板
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TemplatesConfig {
    pub title: String,
    /// locale -> 正文模板
    pub body_by_locale: HashMap<String, String>,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            title: "[${severity}] ${type ?? slo ?? kind}".to_string(),
            body_by_locale: HashMap::from([
                (
                    "en".to_string(),
                    "${message ?? notes ?? 'incident update'} | ${metrics_summary ?? status ?? ''}"
                        .to_string(),
                ),
                (
                    "zh".to_string(),
                    "${message ?? notes ?? '事件更新'} | ${metrics_summary ?? status ?? ''}"
                        .to_string(),
                ),
            ]),
        }
    }
}

/// 密钥配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecretsConfig {
    /// webhook 签名与入站命令校验共用的 HMAC 密钥
    pub signing_key: String,
}

/// 静音列表
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MuteConfig {
    pub symbols: Vec<String>,
    pub types: Vec<String>,
}

/// 桥接器总配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    pub quiet_hours: Option<QuietHoursConfig>,
    pub soak: SoakConfig,
    pub dedupe: DedupeConfig,
    pub rate: RateConfig,
    pub escalation: EscalationConfig,
    pub templates: TemplatesConfig,
    pub secrets: SecretsConfig,
    /// severity 名 -> "#rrggbb"（Discord embed 着色）
    pub severity_colors: HashMap<String, String>,
    pub metrics_flush_sec: u64,
    /// 无路由命中时的兜底渠道
    pub default_channel: String,
    pub locale: String,
    pub mute: MuteConfig,
    /// 初始路由表（可被 bridge.channel.map 整表替换）
    pub routes: Vec<RouteRuleSpec>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            quiet_hours: None,
            soak: SoakConfig::default(),
            dedupe: DedupeConfig::default(),
            rate: RateConfig::default(),
            escalation: EscalationConfig::default(),
            templates: TemplatesConfig::default(),
            secrets: SecretsConfig::default(),
            severity_colors: HashMap::from([
                ("low".to_string(), "#95a5a6".to_string()),
                ("medium".to_string(), "#f1c40f".to_string()),
                ("high".to_string(), "#e67e22".to_string()),
                ("critical".to_string(), "#e74c3c".to_string()),
            ]),
            metrics_flush_sec: 60,
            default_channel: "telegram:ops".to_string(),
            locale: "en".to_string(),
            mute: MuteConfig::default(),
            routes: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// 从 JSON 文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: BridgeConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// 默认配置文件路径
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("ops-alert-bridge")
            .join("bridge.json")
    }
}
