//! 渠道限流 - 每渠道独立的 60 秒滚动计数
//!
//! 计数键是完整的 "type:target" 渠道串。窗口起点超过 60 秒即重置；
//! 达到上限的发送被拒绝，调用方按 `rate` 原因计入抑制指标。

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// 限流窗口长度
const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct RateCounter {
    count: u32,
    window_start: Instant,
}

/// 每渠道限流器
pub struct RateLimiter {
    counters: HashMap<String, RateCounter>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            counters: HashMap::new(),
        }
    }

    /// 检查并记账一次发送
    pub fn allow(&mut self, channel: &str, limit: u32) -> bool {
        self.allow_at(channel, limit, Instant::now())
    }

    /// 检查并记账一次发送（带时间戳，用于测试）
    pub fn allow_at(&mut self, channel: &str, limit: u32, now: Instant) -> bool {
        let counter = self
            .counters
            .entry(channel.to_string())
            .or_insert(RateCounter {
                count: 0,
                window_start: now,
            });

        if now.duration_since(counter.window_start) > WINDOW {
            counter.count = 0;
            counter.window_start = now;
        }

        if counter.count >= limit {
            return false;
        }

        counter.count += 1;
        true
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_within_window() {
        let mut limiter = RateLimiter::new();
        let now = Instant::now();

        // telegramPerMin=8：同一分钟内 10 次发送，8 过 2 拒
        let mut allowed = 0;
        let mut rejected = 0;
        for i in 0..10 {
            if limiter.allow_at("telegram:ops", 8, now + Duration::from_secs(i)) {
                allowed += 1;
            } else {
                rejected += 1;
            }
        }
        assert_eq!(allowed, 8);
        assert_eq!(rejected, 2);
    }

    #[test]
    fn test_window_reset() {
        let mut limiter = RateLimiter::new();
        let now = Instant::now();

        assert!(limiter.allow_at("c", 1, now));
        assert!(!limiter.allow_at("c", 1, now + Duration::from_secs(30)));

        // 窗口过期后重新放行
        assert!(limiter.allow_at("c", 1, now + Duration::from_secs(61)));
    }

    #[test]
    fn test_channels_are_independent() {
        let mut limiter = RateLimiter::new();
        let now = Instant::now();

        assert!(limiter.allow_at("telegram:ops", 1, now));
        assert!(!limiter.allow_at("telegram:ops", 1, now));
        // 同类型不同目标是另一个计数
        assert!(limiter.allow_at("telegram:risk", 1, now));
        assert!(limiter.allow_at("email:oncall@x", 1, now));
    }

    #[test]
    fn test_zero_limit_rejects_everything() {
        let mut limiter = RateLimiter::new();
        assert!(!limiter.allow("muted:chan", 0));
    }
}
