//! Shared service state
//!
//! Event bus shared by the playback engine, the synthesis pipeline and the
//! HTTP surface.

use parlor_common::VoiceEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Shared state accessible by all components
pub struct SharedState {
    /// Event broadcaster for in-process observers and SSE
    pub event_tx: broadcast::Sender<VoiceEvent>,

    /// Total speech requests accepted
    pub speak_requests_total: AtomicU64,

    /// Speech requests that ended without audio
    pub synthesis_failures_total: AtomicU64,
}

impl SharedState {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            event_tx,
            speak_requests_total: AtomicU64::new(0),
            synthesis_failures_total: AtomicU64::new(0),
        }
    }

    /// Broadcast an event to all listeners
    pub fn broadcast_event(&self, event: VoiceEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }

    /// Subscribe to the event stream
    pub fn subscribe_events(&self) -> broadcast::Receiver<VoiceEvent> {
        self.event_tx.subscribe()
    }

    pub fn record_speak_request(&self) {
        self.speak_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_synthesis_failure(&self) {
        self.synthesis_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn speak_requests(&self) -> u64 {
        self.speak_requests_total.load(Ordering::Relaxed)
    }

    pub fn synthesis_failures(&self) -> u64 {
        self.synthesis_failures_total.load(Ordering::Relaxed)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
