//! Event types for the Parlor voice event system

use crate::channel::{Channel, ParticipantId, Priority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Voice service events
///
/// Broadcast to in-process observers and streamed over SSE.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VoiceEvent {
    /// Item could not start immediately and waits in a channel queue
    ItemQueued {
        item_id: Uuid,
        channel: Channel,
        priority: Priority,
        position: Option<usize>,
        timestamp: DateTime<Utc>,
    },

    /// Item started playing on its channel
    PlaybackStarted {
        item_id: Uuid,
        channel: Channel,
        participant_id: Option<ParticipantId>,
        timestamp: DateTime<Utc>,
    },

    /// Item finished playing (completed naturally or stopped)
    PlaybackFinished {
        item_id: Uuid,
        channel: Channel,
        completed: bool,
        timestamp: DateTime<Utc>,
    },

    /// Item failed (decode error, output error, interrupted while queued)
    PlaybackFailed {
        item_id: Uuid,
        channel: Channel,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Audio became available for a speech request
    SynthesisCompleted {
        channel: Channel,
        backend_id: Option<String>,
        cached: bool,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// No backend produced audio within the time budget
    SynthesisFailed {
        channel: Channel,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Backend health verdict changed
    BackendHealthChanged {
        backend_id: String,
        healthy: bool,
        timestamp: DateTime<Utc>,
    },

    /// Master volume changed
    VolumeChanged {
        volume: f32,
        timestamp: DateTime<Utc>,
    },

    /// Service enabled/disabled
    EnabledChanged {
        enabled: bool,
        timestamp: DateTime<Utc>,
    },
}

impl VoiceEvent {
    /// Event type name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            VoiceEvent::ItemQueued { .. } => "ItemQueued",
            VoiceEvent::PlaybackStarted { .. } => "PlaybackStarted",
            VoiceEvent::PlaybackFinished { .. } => "PlaybackFinished",
            VoiceEvent::PlaybackFailed { .. } => "PlaybackFailed",
            VoiceEvent::SynthesisCompleted { .. } => "SynthesisCompleted",
            VoiceEvent::SynthesisFailed { .. } => "SynthesisFailed",
            VoiceEvent::BackendHealthChanged { .. } => "BackendHealthChanged",
            VoiceEvent::VolumeChanged { .. } => "VolumeChanged",
            VoiceEvent::EnabledChanged { .. } => "EnabledChanged",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = VoiceEvent::PlaybackStarted {
            item_id: Uuid::nil(),
            channel: Channel::participant(1),
            participant_id: Some(2),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PlaybackStarted");
        assert_eq!(json["channel"], "p1");
        assert_eq!(json["participant_id"], 2);
        assert_eq!(event.event_type(), "PlaybackStarted");
    }
}
