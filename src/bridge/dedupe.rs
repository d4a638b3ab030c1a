//! 通知去重索引 - 抑制短窗口内的重复事件
//!
//! 同一 `(threadKey, severity, 分钟桶)` 的重复事件在 `dedupe.windowSec`
//! 内只产生一条通知，后续命中只累加计数。过期条目在访问时惰性清理。

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// 去重条目
#[derive(Debug, Clone)]
pub struct DedupeEntry {
    /// 过期时间
    pub expires_at: DateTime<Utc>,
    /// 窗口内命中次数（含首个事件）
    pub count: u32,
}

/// 去重检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeCheck {
    /// 首次出现，应继续处理
    Fresh,
    /// 窗口内重复，应抑制
    Duplicate {
        /// 累计命中次数
        count: u32,
    },
}

/// 去重索引
pub struct DedupeIndex {
    entries: HashMap<String, DedupeEntry>,
    window: Duration,
}

impl DedupeIndex {
    pub fn new(window_sec: u64) -> Self {
        Self {
            entries: HashMap::new(),
            window: Duration::seconds(window_sec as i64),
        }
    }

    /// 检查去重键
    ///
    /// 未过期命中 -> 计数加一并报告重复；未命中 -> 插入新条目，
    /// `expires_at = now + window`。
    pub fn check(&mut self, key: &str, now: DateTime<Utc>) -> DedupeCheck {
        self.cleanup(now);

        if let Some(entry) = self.entries.get_mut(key) {
            if entry.expires_at > now {
                entry.count += 1;
                debug!(key = %key, count = entry.count, "Event deduplicated");
                return DedupeCheck::Duplicate { count: entry.count };
            }
        }

        self.entries.insert(
            key.to_string(),
            DedupeEntry {
                expires_at: now + self.window,
                count: 1,
            },
        );
        DedupeCheck::Fresh
    }

    /// 惰性清理过期条目
    fn cleanup(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_first_sight_is_fresh() {
        let mut index = DedupeIndex::new(300);
        assert_eq!(index.check("k1", at(0)), DedupeCheck::Fresh);
    }

    #[test]
    fn test_repeat_within_window_is_duplicate() {
        let mut index = DedupeIndex::new(300);
        index.check("k1", at(0));

        assert_eq!(index.check("k1", at(10)), DedupeCheck::Duplicate { count: 2 });
        assert_eq!(index.check("k1", at(20)), DedupeCheck::Duplicate { count: 3 });
    }

    #[test]
    fn test_expiry_allows_resend() {
        let mut index = DedupeIndex::new(300);
        index.check("k1", at(0));

        // 窗口过期后同键重新视为首次
        assert_eq!(index.check("k1", at(301)), DedupeCheck::Fresh);
    }

    #[test]
    fn test_different_keys_independent() {
        let mut index = DedupeIndex::new(300);
        index.check("k1", at(0));
        assert_eq!(index.check("k2", at(1)), DedupeCheck::Fresh);
    }

    #[test]
    fn test_cleanup_drops_expired_entries() {
        let mut index = DedupeIndex::new(60);
        index.check("k1", at(0));
        index.check("k2", at(0));
        assert_eq!(index.len(), 2);

        // 过期后任意访问触发清理
        index.check("k3", at(120));
        assert_eq!(index.len(), 1);
    }
}
