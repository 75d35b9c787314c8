//! Snapshot encoding and startup validation.
//!
//! Persisted layout:
//!
//! ```json
//! { "version": 1, "state": { "events": [ ... ] } }
//! ```
//!
//! Validation never fails: anything unreadable degrades to fewer (or zero)
//! events. Elements are kept only if they decode into a complete
//! `PendingEvent`; they are never repaired. A snapshot can only contain
//! `syncing` events if the process died mid-attempt, so those come back as
//! `pending`.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use crate::types::{EventStatus, PendingEvent};

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u64 = 1;

/// Versions this build can read. `0` is the bare `{"events": [...]}` object
/// written before the versioned envelope; its events use the same shape.
const READABLE_VERSIONS: &[u64] = &[0, SNAPSHOT_VERSION];

#[derive(Serialize)]
struct Envelope<'a> {
    version: u64,
    state: State<'a>,
}

#[derive(Serialize)]
struct State<'a> {
    events: &'a [PendingEvent],
}

/// Serialize `events` into the current snapshot layout.
pub fn encode_snapshot(events: &[PendingEvent]) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Envelope {
        version: SNAPSHOT_VERSION,
        state: State { events },
    })
}

/// Why a snapshot was discarded wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    /// Not valid JSON.
    Unparseable,
    /// The snapshot (or its `state`) is not a JSON object.
    NotAnObject,
    /// `events` is missing or not an array.
    EventsNotArray,
    /// `version` is not a non-negative integer.
    InvalidVersion,
    /// A version this build has no migration for.
    UnsupportedVersion(u64),
}

/// Outcome of validating a persisted snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedSnapshot {
    pub events: Vec<PendingEvent>,
    /// Elements dropped as malformed or as duplicate ids.
    pub dropped: usize,
    /// Events moved from `syncing` back to `pending`.
    pub recovered_syncing: usize,
    /// Schema version the snapshot declared (`0` for the bare layout).
    pub version: Option<u64>,
    pub reset: Option<ResetReason>,
}

impl ValidatedSnapshot {
    fn reset(reason: ResetReason) -> Self {
        Self {
            reset: Some(reason),
            ..Self::default()
        }
    }
}

/// Validate raw stored text. `None` (nothing stored) yields an empty queue.
pub fn validate_snapshot(raw: Option<&str>) -> ValidatedSnapshot {
    let Some(raw) = raw else {
        return ValidatedSnapshot::default();
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => validate_value(value),
        Err(_) => ValidatedSnapshot::reset(ResetReason::Unparseable),
    }
}

/// Validate an already-parsed snapshot value.
pub fn validate_value(value: Value) -> ValidatedSnapshot {
    let Value::Object(mut root) = value else {
        return ValidatedSnapshot::reset(ResetReason::NotAnObject);
    };

    let version = match root.get("version") {
        None => 0,
        Some(v) => match v.as_u64() {
            Some(v) => v,
            None => return ValidatedSnapshot::reset(ResetReason::InvalidVersion),
        },
    };
    if !READABLE_VERSIONS.contains(&version) {
        return ValidatedSnapshot::reset(ResetReason::UnsupportedVersion(version));
    }

    let mut state = match root.remove("state") {
        Some(Value::Object(state)) => state,
        Some(_) => return ValidatedSnapshot::reset(ResetReason::NotAnObject),
        None => root,
    };

    let Some(Value::Array(elements)) = state.remove("events") else {
        return ValidatedSnapshot::reset(ResetReason::EventsNotArray);
    };

    let mut out = ValidatedSnapshot {
        version: Some(version),
        ..ValidatedSnapshot::default()
    };
    let mut seen = HashSet::with_capacity(elements.len());

    for element in elements {
        let Ok(mut event) = serde_json::from_value::<PendingEvent>(element) else {
            out.dropped += 1;
            continue;
        };
        if !seen.insert(event.local_id) {
            out.dropped += 1;
            continue;
        }
        if event.status == EventStatus::Syncing {
            event.status = EventStatus::Pending;
            out.recovered_syncing += 1;
        }
        out.events.push(event);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use wardrobe_core::LocalId;

    use crate::types::{EventSource, NewWearEvent};

    fn event(id: &str, subject: &str, status: EventStatus) -> PendingEvent {
        let mut e = PendingEvent::from_input(
            id.parse::<LocalId>().unwrap(),
            NewWearEvent::new(subject, ["item-1"], "2024-01-15", EventSource::ManualEntry),
            Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap(),
        );
        e.status = status;
        e
    }

    const ID_A: &str = "11111111-1111-4111-8111-111111111111";
    const ID_B: &str = "22222222-2222-4222-9222-222222222222";

    fn valid_json(id: &str, status: &str) -> Value {
        json!({
            "localId": id,
            "subjectId": "outfit-1",
            "relatedIds": ["item-1", "item-2"],
            "occurredOn": "2024-01-15",
            "source": "savedPreset",
            "createdAt": "2024-01-15T09:30:00.000Z",
            "attemptCount": 1,
            "status": status,
            "lastAttemptAt": "2024-01-15T09:31:00.000Z"
        })
    }

    #[test]
    fn absent_snapshot_is_empty_without_reset() {
        let out = validate_snapshot(None);
        assert!(out.events.is_empty());
        assert_eq!(out.reset, None);
    }

    #[test]
    fn garbage_resets() {
        assert_eq!(validate_snapshot(Some("{not json")).reset, Some(ResetReason::Unparseable));
        assert_eq!(validate_value(json!(null)).reset, Some(ResetReason::NotAnObject));
        assert_eq!(validate_value(json!([1, 2])).reset, Some(ResetReason::NotAnObject));
        assert_eq!(
            validate_value(json!({"version": 1, "state": {"events": "nope"}})).reset,
            Some(ResetReason::EventsNotArray)
        );
        assert_eq!(
            validate_value(json!({"version": 1, "state": {}})).reset,
            Some(ResetReason::EventsNotArray)
        );
        assert_eq!(
            validate_value(json!({"version": 1, "state": 5})).reset,
            Some(ResetReason::NotAnObject)
        );
    }

    #[test]
    fn unknown_version_resets() {
        let out = validate_value(json!({"version": 7, "state": {"events": [valid_json(ID_A, "pending")]}}));
        assert_eq!(out.reset, Some(ResetReason::UnsupportedVersion(7)));
        assert!(out.events.is_empty());

        let out = validate_value(json!({"version": "1", "state": {"events": []}}));
        assert_eq!(out.reset, Some(ResetReason::InvalidVersion));
    }

    #[test]
    fn bare_legacy_layout_is_migrated() {
        let out = validate_value(json!({"events": [valid_json(ID_A, "failed")]}));
        assert_eq!(out.reset, None);
        assert_eq!(out.version, Some(0));
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].status, EventStatus::Failed);
    }

    #[test]
    fn syncing_comes_back_pending() {
        let out = validate_value(json!({"version": 1, "state": {"events": [valid_json(ID_A, "syncing")]}}));
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].status, EventStatus::Pending);
        assert_eq!(out.events[0].attempt_count, 1);
        assert_eq!(out.recovered_syncing, 1);
    }

    #[test]
    fn malformed_elements_are_dropped_not_repaired() {
        let mut missing_id = valid_json(ID_B, "pending");
        missing_id.as_object_mut().unwrap().remove("localId");

        let mut bare_string_related = valid_json(ID_B, "pending");
        bare_string_related["relatedIds"] = json!("item-1");

        let mut bad_source = valid_json(ID_B, "pending");
        bad_source["source"] = json!("carrierPigeon");

        let mut bad_status = valid_json(ID_B, "pending");
        bad_status["status"] = json!("synced");

        let mut bad_count = valid_json(ID_B, "pending");
        bad_count["attemptCount"] = json!("2");

        let mut non_string_item = valid_json(ID_B, "pending");
        non_string_item["relatedIds"] = json!(["item-1", 2]);

        let out = validate_value(json!({"version": 1, "state": {"events": [
            valid_json(ID_A, "pending"),
            missing_id,
            bare_string_related,
            bad_source,
            bad_status,
            bad_count,
            non_string_item,
            "not an object",
            null,
        ]}}));

        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].local_id.to_string(), ID_A);
        assert_eq!(out.dropped, 8);
        assert_eq!(out.reset, None);
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let mut second = valid_json(ID_A, "failed");
        second["subjectId"] = json!("outfit-2");
        let out = validate_value(json!({"version": 1, "state": {"events": [valid_json(ID_A, "pending"), second]}}));
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].subject_id, "outfit-1");
        assert_eq!(out.dropped, 1);
    }

    #[test]
    fn optional_fields_may_be_absent_or_null() {
        let mut e = valid_json(ID_A, "pending");
        e["note"] = Value::Null;
        e.as_object_mut().unwrap().remove("lastAttemptAt");
        let out = validate_value(json!({"version": 1, "state": {"events": [e]}}));
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].note, None);
        assert_eq!(out.events[0].last_attempt_at, None);
    }

    #[test]
    fn valid_snapshot_round_trips_unchanged() {
        let mut failed = event(ID_B, "outfit-2", EventStatus::Failed);
        failed.attempt_count = 2;
        failed.last_error = Some("timeout".to_string());
        let events = vec![event(ID_A, "outfit-1", EventStatus::Pending), failed];

        let encoded = encode_snapshot(&events).unwrap();
        let out = validate_snapshot(Some(&encoded));

        assert_eq!(out.events, events);
        assert_eq!(out.version, Some(SNAPSHOT_VERSION));
        assert_eq!(out.dropped, 0);
    }

    #[test]
    fn encoded_layout_is_versioned_envelope() {
        let encoded = encode_snapshot(&[]).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&encoded).unwrap(),
            json!({"version": 1, "state": {"events": []}})
        );
    }
}
