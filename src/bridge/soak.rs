//! Soak 缓冲 - 按线程键聚合短时间内的连发更新
//!
//! 每个活跃线程键至多持有一个缓冲条目。线程的首个事件创建条目并由调用方
//! 武装一个 `soak.windowSec` 的冲洗定时器；窗口内的后续事件只追加。
//! 首次投递因此至少延迟一个 soak 窗口，这是刻意的批量化取舍。
//!
//! 静音时段到达的事件同样只进入这一个缓冲，条目被标记为 held；
//! 冲洗定时器到期时若仍处于静音时段，调用方应顺延一个窗口而不是投递。

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::event::IncidentEvent;

/// 单个线程键的缓冲条目
#[derive(Debug)]
pub struct SoakEntry {
    pub thread_key: String,
    /// 缓冲的事件（最多 max_batch 条，首个事件是主事件）
    pub events: Vec<IncidentEvent>,
    pub first_event_at: DateTime<Utc>,
    /// 窗口内到达的事件总数（超出 max_batch 的部分只计数）
    pub total: usize,
    /// 创建时线程首事件的去重键（通知沿用它）
    pub dedupe_key: String,
    /// 是否因静音时段而延后投递
    pub held_for_quiet: bool,
}

/// offer 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoakOffer {
    /// 新建了缓冲，调用方需要武装冲洗定时器
    Created,
    /// 追加到已有缓冲，事件被抑制（随批量一起投递）
    Appended,
}

/// Soak 缓冲区
pub struct SoakBuffer {
    entries: HashMap<String, SoakEntry>,
    max_batch: usize,
}

impl SoakBuffer {
    pub fn new(max_batch: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_batch: max_batch.max(1),
        }
    }

    /// 向线程键的缓冲投递一个事件
    pub fn offer(
        &mut self,
        thread_key: &str,
        event: IncidentEvent,
        dedupe_key: &str,
        now: DateTime<Utc>,
        quiet: bool,
    ) -> SoakOffer {
        if let Some(entry) = self.entries.get_mut(thread_key) {
            entry.total += 1;
            if entry.events.len() < self.max_batch {
                entry.events.push(event);
            }
            if quiet {
                entry.held_for_quiet = true;
            }
            return SoakOffer::Appended;
        }

        self.entries.insert(
            thread_key.to_string(),
            SoakEntry {
                thread_key: thread_key.to_string(),
                events: vec![event],
                first_event_at: now,
                total: 1,
                dedupe_key: dedupe_key.to_string(),
                held_for_quiet: quiet,
            },
        );
        SoakOffer::Created
    }

    /// 取走并移除一个缓冲条目（冲洗时调用）
    pub fn take(&mut self, thread_key: &str) -> Option<SoakEntry> {
        self.entries.remove(thread_key)
    }

    /// 标记条目为静音延后（冲洗定时器在静音时段内到期时调用）
    pub fn mark_held(&mut self, thread_key: &str) {
        if let Some(entry) = self.entries.get_mut(thread_key) {
            entry.held_for_quiet = true;
        }
    }

    pub fn contains(&self, thread_key: &str) -> bool {
        self.entries.contains_key(thread_key)
    }

    pub fn is_held(&self, thread_key: &str) -> bool {
        self.entries
            .get(thread_key)
            .map(|e| e.held_for_quiet)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
