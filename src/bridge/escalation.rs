//! Staged escalation for unacknowledged incidents
//!
//! An incident that requires acknowledgement walks
//! `Stage(0) -> Stage(1) -> ... -> Exhausted` unless an ack arrives.
//! Stage `afterSec` values are offsets from escalation start; the timer
//! armed between stages sleeps the delta. Acknowledgement cancels the
//! pending timer from any stage; a timer that already fired still gets
//! its ack state re-checked when the fire message is handled, so an
//! in-flight stage delivery stands but no further stages fire.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use super::severity::Severity;
use crate::config::EscalationConfig;

/// One contact tier
#[derive(Debug, Clone)]
pub struct EscalationStage {
    /// Offset from escalation start, seconds
    pub after_sec: u64,
    pub channels: Vec<String>,
    /// On-call roster tier to notify in addition to `channels`
    pub target: Option<String>,
}

/// Escalation policy derived from config
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    pub stages: Vec<EscalationStage>,
    require_ack: Vec<Severity>,
}

impl EscalationPolicy {
    pub fn from_config(config: &EscalationConfig) -> Self {
        Self {
            stages: config
                .stages
                .iter()
                .map(|s| EscalationStage {
                    after_sec: s.after_sec,
                    channels: s.channels.clone(),
                    target: s.target.clone(),
                })
                .collect(),
            require_ack: config.require_ack_severities.clone(),
        }
    }

    pub fn requires_ack(&self, severity: Severity) -> bool {
        self.require_ack.contains(&severity)
    }

    /// Sleep duration before stage `idx` fires: the full offset for
    /// stage 0, the delta to the previous stage otherwise.
    pub fn stage_delay(&self, idx: usize) -> Option<Duration> {
        let stage = self.stages.get(idx)?;
        let delay = if idx == 0 {
            stage.after_sec
        } else {
            stage.after_sec.saturating_sub(self.stages[idx - 1].after_sec)
        };
        Some(Duration::from_secs(delay))
    }
}

/// Per-incident escalation progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationState {
    /// Waiting for stage `idx` to fire
    Pending(usize),
    /// All stages fired without an ack; operators must step in
    Exhausted,
}

/// One incident under escalation
pub struct EscalationEntry {
    pub incident_id: String,
    pub thread_key: String,
    pub severity: Severity,
    /// Composed title of the original notification, reused in stage messages
    pub summary: String,
    pub started_at: DateTime<Utc>,
    pub state: EscalationState,
    /// Armed timer; None once exhausted
    pub handle: Option<JoinHandle<()>>,
}

/// All incidents currently under escalation
pub struct EscalationBook {
    entries: HashMap<String, EscalationEntry>,
}

impl EscalationBook {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Insert an entry, cancelling any existing chain for the incident
    /// (idempotent restart).
    pub fn insert(&mut self, entry: EscalationEntry) {
        self.cancel(&entry.incident_id);
        self.entries.insert(entry.incident_id.clone(), entry);
    }

    /// Cancel and remove an incident's escalation. Returns whether an
    /// entry existed. Abort is O(1) and safe against a concurrently
    /// firing timer: the fire handler re-checks state.
    pub fn cancel(&mut self, incident_id: &str) -> bool {
        match self.entries.remove(incident_id) {
            Some(entry) => {
                if let Some(handle) = entry.handle {
                    handle.abort();
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, incident_id: &str) -> Option<&EscalationEntry> {
        self.entries.get(incident_id)
    }

    pub fn get_mut(&mut self, incident_id: &str) -> Option<&mut EscalationEntry> {
        self.entries.get_mut(incident_id)
    }

    pub fn contains(&self, incident_id: &str) -> bool {
        self.entries.contains_key(incident_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EscalationBook {
    fn default() -> Self {
        Self::new()
    }
}
