//! Thread key and dedupe key derivation
//!
//! The thread key groups every event belonging to one logical incident
//! stream; it feeds soak batching and escalation targeting. The dedupe
//! key is a deterministic hash over `(thread key, severity, minute
//! bucket)` that suppresses near-duplicate repeats inside the dedupe
//! window.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};

use super::event::IncidentEvent;
use super::severity::Severity;

/// Derive the thread key for an event
///
/// Priority:
/// 1. incident id when the event carries one (stable for the incident's life)
/// 2. `service:slo:window` for SLO status reports
/// 3. time-based fallback `<kind>:<minute bucket>` for everything else
pub fn thread_key(event: &IncidentEvent) -> String {
    if let Some(id) = event.incident_id() {
        return id.to_string();
    }

    if let IncidentEvent::Slo { status, .. } = event {
        return format!("{}:{}:{}", status.service, status.slo, status.window);
    }

    format!("{}:{}", event.kind(), minute_bucket(event.timestamp()))
}

/// Derive the dedupe key for `(thread_key, severity)` at `now`
///
/// The key is a 16-hex-digit hash, ensuring:
/// - same thread + severity inside one minute bucket -> same key
/// - different thread, severity or bucket -> different keys
pub fn dedupe_key(thread_key: &str, severity: Severity, now: DateTime<Utc>) -> String {
    let mut hasher = DefaultHasher::new();
    thread_key.hash(&mut hasher);
    severity.as_str().hash(&mut hasher);
    minute_bucket(now).hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Floor a timestamp to its 60-second bucket (epoch seconds)
fn minute_bucket(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(60) * 60
}
