//! Playback items and lifecycle callbacks

use crate::audio::DecodedAudio;
use crate::error::{Error, Result};
use parlor_common::{ParticipantId, Priority, Usage};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

type StartCallback = Box<dyn FnOnce() + Send + 'static>;
type EndCallback = Box<dyn FnOnce() + Send + 'static>;
type ErrorCallback = Box<dyn FnOnce(&Error) + Send + 'static>;

/// Caller-supplied lifecycle callbacks
///
/// Each callback fires at most once. `on_start` precedes `on_end`; an item
/// that fails fires `on_error` instead of `on_end`.
#[derive(Default)]
pub struct PlaybackCallbacks {
    on_start: Option<StartCallback>,
    on_end: Option<EndCallback>,
    on_error: Option<ErrorCallback>,
}

impl PlaybackCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    pub fn on_end(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(&Error) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub(crate) fn fire_start(&mut self) {
        if let Some(f) = self.on_start.take() {
            f();
        }
    }

    pub(crate) fn fire_end(&mut self) {
        if let Some(f) = self.on_end.take() {
            f();
        }
    }

    pub(crate) fn fire_error(&mut self, err: &Error) {
        if let Some(f) = self.on_error.take() {
            f(err);
        }
    }
}

impl fmt::Debug for PlaybackCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackCallbacks")
            .field("on_start", &self.on_start.is_some())
            .field("on_end", &self.on_end.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Audio to play
#[derive(Debug, Clone)]
pub enum Payload {
    /// Encoded bytes (WAV, MP3, ...), decoded when the item starts
    Encoded(Arc<[u8]>),
    /// Already-decoded stereo PCM
    Pcm(DecodedAudio),
}

/// How a started item ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackOutcome {
    /// Played to the end
    Completed,
    /// Cut off by `stop_channel`/`stop_all` or an interrupting system request
    Stopped,
}

/// Request to play audio
#[derive(Debug)]
pub struct PlaybackRequest {
    pub usage: Usage,
    pub participant_id: Option<ParticipantId>,
    pub priority: Priority,
    /// Item volume (0.0-1.0), multiplied with channel and master volume
    pub volume: f32,
    pub payload: Payload,
    pub callbacks: PlaybackCallbacks,
    /// Hint of the current participant count for ceiling derivation
    pub total_participants: Option<usize>,
    /// Short description for logs
    pub label: String,
}

impl PlaybackRequest {
    pub fn system(payload: Payload, priority: Priority) -> Self {
        Self {
            usage: Usage::System,
            participant_id: None,
            priority,
            volume: 1.0,
            payload,
            callbacks: PlaybackCallbacks::default(),
            total_participants: None,
            label: String::new(),
        }
    }

    pub fn participant(participant_id: ParticipantId, payload: Payload, priority: Priority) -> Self {
        Self {
            usage: Usage::Participant,
            participant_id: Some(participant_id),
            ..Self::system(payload, priority)
        }
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_callbacks(mut self, callbacks: PlaybackCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// Item owned by the engine from `play` until it finishes or is evicted
pub(crate) struct PlaybackItem {
    pub id: Uuid,
    pub participant_id: Option<ParticipantId>,
    pub priority: Priority,
    pub volume: f32,
    pub payload: Payload,
    pub callbacks: PlaybackCallbacks,
    pub label: String,
    /// Arrival order, breaks priority ties
    pub seq: u64,
    responder: Option<oneshot::Sender<Result<PlaybackOutcome>>>,
}

impl PlaybackItem {
    pub fn new(
        request: PlaybackRequest,
        seq: u64,
        responder: oneshot::Sender<Result<PlaybackOutcome>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            participant_id: request.participant_id,
            priority: request.priority,
            volume: request.volume,
            payload: request.payload,
            callbacks: request.callbacks,
            label: request.label,
            seq,
            responder: Some(responder),
        }
    }

    /// Resolve the caller's ticket
    pub fn resolve(&mut self, result: Result<PlaybackOutcome>) {
        if let Some(tx) = self.responder.take() {
            // Caller may have dropped the ticket
            let _ = tx.send(result);
        }
    }

    /// Fire `on_error` and reject the ticket
    pub fn fail(&mut self, err: Error) {
        self.callbacks.fire_error(&err);
        self.resolve(Err(err));
    }
}

/// Handle returned by `play`
#[derive(Debug)]
pub struct PlaybackTicket {
    pub item_id: Uuid,
    pub allocation: crate::scheduler::AllocationResult,
    rx: oneshot::Receiver<Result<PlaybackOutcome>>,
}

impl PlaybackTicket {
    pub(crate) fn new(
        item_id: Uuid,
        allocation: crate::scheduler::AllocationResult,
        rx: oneshot::Receiver<Result<PlaybackOutcome>>,
    ) -> Self {
        Self {
            item_id,
            allocation,
            rx,
        }
    }

    /// Wait until the item has played, been stopped or failed
    pub async fn wait(self) -> Result<PlaybackOutcome> {
        self.rx
            .await
            .map_err(|_| Error::Internal("playback item dropped without resolution".to_string()))?
    }
}
