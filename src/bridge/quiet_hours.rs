//! Quiet-hours window evaluation
//!
//! A quiet window is a local-time range in a configured fixed-offset
//! timezone. Overnight ranges (start > end, e.g. 23:30-07:30) wrap past
//! midnight. Events arriving inside the window are deferred, not
//! dropped.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveTime, Utc};

use crate::config::QuietHoursConfig;

#[derive(Debug, Clone)]
pub struct QuietHours {
    start: NaiveTime,
    end: NaiveTime,
    tz: FixedOffset,
}

impl QuietHours {
    pub fn new(start: &str, end: &str, timezone: &str) -> Result<Self> {
        let start = NaiveTime::parse_from_str(start, "%H:%M")
            .with_context(|| format!("invalid quiet-hours start '{}'", start))?;
        let end = NaiveTime::parse_from_str(end, "%H:%M")
            .with_context(|| format!("invalid quiet-hours end '{}'", end))?;
        let tz = parse_offset(timezone)?;
        Ok(Self { start, end, tz })
    }

    pub fn from_config(config: &QuietHoursConfig) -> Result<Self> {
        Self::new(&config.start, &config.end, &config.timezone)
    }

    /// Whether `now` falls inside the quiet window, evaluated in the
    /// configured timezone. An empty window (start == end) never matches.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        if self.start == self.end {
            return false;
        }

        let local = now.with_timezone(&self.tz).time();
        if self.start < self.end {
            local >= self.start && local < self.end
        } else {
            // overnight wrap
            local >= self.start || local < self.end
        }
    }
}

/// Parse a fixed-offset timezone: "+08:00", "-05:00", "Z" or "UTC"
fn parse_offset(s: &str) -> Result<FixedOffset> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("utc") || trimmed == "Z" {
        return Ok(FixedOffset::east_opt(0).expect("zero offset is always valid"));
    }
    trimmed
        .parse::<FixedOffset>()
        .map_err(|e| anyhow!("invalid timezone offset '{}': {}", s, e))
}
