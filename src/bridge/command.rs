//! 入站命令 - ack / resolve / note 及其签名校验
//!
//! 带签名的命令必须通过 HMAC 校验（对 `cmd:incidentId:userId` 计算），
//! 校验失败的命令被丢弃且不产生任何状态变更。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::signing::Signer;

/// 命令种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Ack,
    Resolve,
    Note,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Ack => "ack",
            CommandKind::Resolve => "resolve",
            CommandKind::Note => "note",
        }
    }
}

/// 入站命令（`bridge.inbound.command` 载荷）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundCommand {
    pub cmd: CommandKind,
    pub incident_id: String,
    pub user_id: String,
    /// 命令来源渠道（如 "telegram"）
    #[serde(default)]
    pub channel: Option<String>,
    /// note 命令的正文
    #[serde(default)]
    pub note: Option<String>,
    /// 可选签名；给出时必须校验通过
    #[serde(default)]
    pub signature: Option<String>,
}

impl InboundCommand {
    /// 签名覆盖的规范串
    pub fn signing_payload(&self) -> String {
        format!("{}:{}:{}", self.cmd.as_str(), self.incident_id, self.user_id)
    }

    /// 校验签名：无签名视为通过（签名是可选的），有签名必须匹配
    pub fn verify(&self, signer: &Signer) -> bool {
        match &self.signature {
            None => true,
            Some(sig) => signer.verify(self.signing_payload().as_bytes(), sig),
        }
    }

    pub fn origin(&self) -> CommandOrigin {
        CommandOrigin {
            user_id: self.user_id.clone(),
            channel: self.channel.clone(),
        }
    }
}

/// 命令来源（确认 / 解决事件的操作者）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOrigin {
    pub user_id: String,
    #[serde(default)]
    pub channel: Option<String>,
}

/// 确认记录；存在即取消该事件的全部待发升级
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRecord {
    pub incident_id: String,
    pub ack_at: DateTime<Utc>,
    pub by: CommandOrigin,
}
