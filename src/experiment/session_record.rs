//! Session Record - one timed participation unit

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::clock::elapsed_millis;

/// Device context captured at session start.
///
/// Probing is the host's job; the core only stores what it is given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Operating system / platform string.
    pub platform: String,
    /// Screen width in CSS pixels.
    pub screen_width: u32,
    /// Screen height in CSS pixels.
    pub screen_height: u32,
    /// Whether the device reports touch support.
    pub touch: bool,
}

/// Browser context captured at session start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserInfo {
    /// User agent string.
    pub user_agent: String,
    /// Preferred language.
    pub language: String,
    /// IANA timezone name.
    pub timezone: String,
}

/// Payload of `session-started`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartInfo {
    /// One-based session number.
    pub session_id: u32,
    /// Variant configuration for this session.
    pub speed_config: Value,
    /// Device context.
    #[serde(default)]
    pub device_info: DeviceInfo,
    /// Browser context.
    #[serde(default)]
    pub browser_info: BrowserInfo,
}

impl SessionStartInfo {
    /// Start info with empty device/browser context.
    #[must_use]
    pub fn new(session_id: u32, speed_config: Value) -> Self {
        Self {
            session_id,
            speed_config,
            device_info: DeviceInfo::default(),
            browser_info: BrowserInfo::default(),
        }
    }
}

/// A timestamped lifecycle marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    /// Marker name, e.g. `session_started`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Wall time of the marker.
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the session started.
    pub session_time: i64,
    /// Marker-specific fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An event recorded by the host during a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    /// Event type, e.g. `point_scored`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Wall time of the event.
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the session started.
    pub session_time: i64,
    /// Free-form event data.
    #[serde(default)]
    pub data: Value,
}

/// One session from start to end.
///
/// Created on session start, appended to while active, then finalized
/// (`end_time`, `duration`, `completed`) and moved into session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Participant the session belongs to.
    pub user_id: String,
    /// One-based session number.
    pub session_id: u32,
    /// Variant configuration.
    pub speed_config: Value,
    /// Wall time the session started.
    pub start_time: DateTime<Utc>,
    /// Wall time the session ended, once finalized.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Duration in milliseconds, once finalized.
    #[serde(default)]
    pub duration: Option<i64>,
    /// Recorded events, in order.
    pub events: Vec<SessionEvent>,
    /// Lifecycle markers, in order.
    pub milestones: Vec<Milestone>,
    /// Device context.
    #[serde(default)]
    pub device_info: DeviceInfo,
    /// Browser context.
    #[serde(default)]
    pub browser_info: BrowserInfo,
    /// Whether the session ran to a normal end.
    #[serde(default)]
    pub completed: bool,
    /// Running per-type event counters.
    #[serde(default)]
    pub summary: BTreeMap<String, u64>,
}

impl SessionRecord {
    /// Open a session record with empty events and milestones.
    #[must_use]
    pub fn new(user_id: impl Into<String>, info: SessionStartInfo, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: info.session_id,
            speed_config: info.speed_config,
            start_time: now,
            end_time: None,
            duration: None,
            events: Vec::new(),
            milestones: Vec::new(),
            device_info: info.device_info,
            browser_info: info.browser_info,
            completed: false,
            summary: BTreeMap::new(),
        }
    }

    /// Milliseconds since the session started.
    #[must_use]
    pub fn session_time(&self, now: DateTime<Utc>) -> i64 {
        elapsed_millis(self.start_time, now)
    }

    /// Append a milestone.
    pub fn add_milestone(&mut self, kind: &str, now: DateTime<Utc>, extra: Map<String, Value>) {
        self.milestones.push(Milestone {
            kind: kind.to_string(),
            timestamp: now,
            session_time: self.session_time(now),
            extra,
        });
    }

    /// Append an event and bump its summary counter.
    pub fn record_event(&mut self, event_type: &str, data: Value, now: DateTime<Utc>) {
        self.events.push(SessionEvent {
            event_type: event_type.to_string(),
            timestamp: now,
            session_time: self.session_time(now),
            data,
        });
        *self.summary.entry(event_type.to_string()).or_insert(0) += 1;
    }

    /// Number of logged events of `event_type`.
    #[must_use]
    pub fn count_events(&self, event_type: &str) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// The last `n` events, oldest first.
    #[must_use]
    pub fn recent_events(&self, n: usize) -> &[SessionEvent] {
        let start = self.events.len().saturating_sub(n);
        &self.events[start..]
    }

    /// Set end time, duration and completion.
    pub fn finalize(&mut self, now: DateTime<Utc>, completed: bool) {
        self.end_time = Some(now);
        self.duration = Some(self.session_time(now));
        self.completed = completed;
    }

    /// Structural check applied to untrusted session data before adoption:
    /// non-empty `userId`, `sessionId` and `speedConfig` present, and
    /// `events` present as a list (possibly empty).
    #[must_use]
    pub fn is_structurally_valid(value: &Value) -> bool {
        let Some(obj) = value.as_object() else {
            return false;
        };
        let has_user = obj
            .get("userId")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty());
        let has_session = obj.get("sessionId").is_some_and(|v| !v.is_null());
        let has_speed = obj.get("speedConfig").is_some_and(|v| !v.is_null());
        let has_events = obj.get("events").is_some_and(Value::is_array);
        has_user && has_session && has_speed && has_events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn record() -> SessionRecord {
        SessionRecord::new(
            "alice",
            SessionStartInfo::new(1, json!({"ball": 1.5})),
            at(10_000),
        )
    }

    #[test]
    fn test_record_event_tracks_summary() {
        let mut session = record();
        session.record_event("point_scored", json!({}), at(11_000));
        session.record_event("point_scored", json!({}), at(12_000));
        session.record_event("paddle_hit", Value::Null, at(12_500));

        assert_eq!(session.count_events("point_scored"), 2);
        assert_eq!(session.summary.get("point_scored"), Some(&2));
        assert_eq!(session.events[2].session_time, 2_500);
        assert_eq!(session.recent_events(2).len(), 2);
        assert_eq!(session.recent_events(10).len(), 3);
    }

    #[test]
    fn test_finalize_sets_duration() {
        let mut session = record();
        session.finalize(at(70_000), true);
        assert_eq!(session.duration, Some(60_000));
        assert!(session.completed);
    }

    #[test]
    fn test_structural_validity() {
        let session = record();
        let value = serde_json::to_value(&session).unwrap();
        assert!(SessionRecord::is_structurally_valid(&value));

        let mut missing_events = value.clone();
        missing_events.as_object_mut().unwrap().remove("events");
        assert!(!SessionRecord::is_structurally_valid(&missing_events));

        let mut blank_user = value;
        blank_user["userId"] = json!("");
        assert!(!SessionRecord::is_structurally_valid(&blank_user));

        assert!(!SessionRecord::is_structurally_valid(&json!([1, 2])));
    }

    #[test]
    fn test_milestone_flattens_extra_fields() {
        let mut session = record();
        let mut extra = Map::new();
        extra.insert("eventCount".into(), json!(0));
        session.add_milestone("session_started", at(10_000), extra);

        let value = serde_json::to_value(&session.milestones[0]).unwrap();
        assert_eq!(value["type"], "session_started");
        assert_eq!(value["eventCount"], 0);
        assert_eq!(value["sessionTime"], 0);
    }
}
