//! Queue record types.
//!
//! These are the shapes persisted in the offline snapshot, so their serde
//! representation (camelCase field names, camelCase enum values, omitted
//! optionals) is part of the on-disk format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wardrobe_core::LocalId;

/// Where a wear event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventSource {
    RecommendationEngine,
    SavedPreset,
    ManualEntry,
    Imported,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::RecommendationEngine => "recommendationEngine",
            EventSource::SavedPreset => "savedPreset",
            EventSource::ManualEntry => "manualEntry",
            EventSource::Imported => "imported",
        }
    }
}

/// Sync lifecycle of a queued event.
///
/// There is no "synced" state: a delivered event is removed from the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Waiting for its first (or a fresh) delivery attempt.
    Pending,
    /// A delivery attempt has started and not yet been reported.
    Syncing,
    /// The most recent attempt failed.
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Syncing => "syncing",
            EventStatus::Failed => "failed",
        }
    }
}

/// A wear event recorded on-device and awaiting delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEvent {
    pub local_id: LocalId,
    /// Outfit the event concerns.
    pub subject_id: String,
    /// Items worn as part of the outfit, in the order given.
    pub related_ids: Vec<String>,
    /// Calendar date key (`YYYY-MM-DD`), not a timestamp.
    pub occurred_on: String,
    pub source: EventSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingEvent {
    /// Build a fresh `pending` event from caller input.
    pub fn from_input(local_id: LocalId, input: NewWearEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            local_id,
            subject_id: input.subject_id,
            related_ids: input.related_ids,
            occurred_on: input.occurred_on,
            source: input.source,
            note: input.note,
            created_at,
            attempt_count: 0,
            status: EventStatus::Pending,
            last_attempt_at: None,
            last_error: None,
        }
    }

    /// True when this event occupies the `(subject_id, occurred_on)` slot.
    pub fn has_key(&self, subject_id: &str, occurred_on: &str) -> bool {
        self.subject_id == subject_id && self.occurred_on == occurred_on
    }

    /// Failed, with no attempts left under `max_sync_attempts`.
    pub fn is_exhausted(&self, max_sync_attempts: u32) -> bool {
        self.status == EventStatus::Failed && self.attempt_count >= max_sync_attempts
    }

    pub fn is_retryable(&self, max_sync_attempts: u32) -> bool {
        match self.status {
            EventStatus::Pending => true,
            EventStatus::Failed => self.attempt_count < max_sync_attempts,
            EventStatus::Syncing => false,
        }
    }
}

/// Input for `PendingEventQueue::add`.
///
/// `related_ids` should be non-empty; the queue stores whatever it is given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWearEvent {
    pub subject_id: String,
    pub related_ids: Vec<String>,
    pub occurred_on: String,
    pub source: EventSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl NewWearEvent {
    pub fn new<I, S>(
        subject_id: impl Into<String>,
        related_ids: I,
        occurred_on: impl Into<String>,
        source: EventSource,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subject_id: subject_id.into(),
            related_ids: related_ids.into_iter().map(Into::into).collect(),
            occurred_on: occurred_on.into(),
            source,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Point-in-time counts, for sync indicators and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
    /// Failed events that have used up every attempt.
    pub exhausted: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> PendingEvent {
        let id: LocalId = "3f2b8c1e-9d4a-4b6e-8f1a-2c3d4e5f6a7b".parse().unwrap();
        let input = NewWearEvent::new(
            "outfit-1",
            ["item-1", "item-2"],
            "2024-01-15",
            EventSource::RecommendationEngine,
        );
        PendingEvent::from_input(id, input, Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap())
    }

    #[test]
    fn wire_format_uses_camel_case_and_omits_absent_optionals() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "localId": "3f2b8c1e-9d4a-4b6e-8f1a-2c3d4e5f6a7b",
                "subjectId": "outfit-1",
                "relatedIds": ["item-1", "item-2"],
                "occurredOn": "2024-01-15",
                "source": "recommendationEngine",
                "createdAt": "2024-01-15T08:00:00Z",
                "attemptCount": 0,
                "status": "pending"
            })
        );
    }

    #[test]
    fn retryable_and_exhausted_follow_attempt_ceiling() {
        let mut event = sample();
        assert!(event.is_retryable(3));

        event.status = EventStatus::Syncing;
        assert!(!event.is_retryable(3));

        event.status = EventStatus::Failed;
        event.attempt_count = 2;
        assert!(event.is_retryable(3));
        assert!(!event.is_exhausted(3));

        event.attempt_count = 3;
        assert!(!event.is_retryable(3));
        assert!(event.is_exhausted(3));
    }

    #[test]
    fn enum_strings_match_serde() {
        for source in [
            EventSource::RecommendationEngine,
            EventSource::SavedPreset,
            EventSource::ManualEntry,
            EventSource::Imported,
        ] {
            assert_eq!(serde_json::to_value(source).unwrap(), source.as_str());
        }
        for status in [EventStatus::Pending, EventStatus::Syncing, EventStatus::Failed] {
            assert_eq!(serde_json::to_value(status).unwrap(), status.as_str());
        }
    }
}
