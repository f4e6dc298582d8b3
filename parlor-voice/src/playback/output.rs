//! Audio output
//!
//! The engine hands each rendered voice to an [`AudioOutput`]. The default
//! [`ClockedOutput`] plays voices against the runtime clock: a voice finishes
//! once its rendered duration has elapsed, unless it is stopped first.

use super::graph::RenderedVoice;
use crate::error::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A voice that the output is playing
pub struct VoiceHandle {
    finished: oneshot::Receiver<()>,
    stop: CancellationToken,
}

impl VoiceHandle {
    pub fn new(finished: oneshot::Receiver<()>, stop: CancellationToken) -> Self {
        Self { finished, stop }
    }

    /// Resolves when the voice has played out (or the output dropped it)
    pub async fn wait(&mut self) {
        let _ = (&mut self.finished).await;
    }

    /// Silence the voice now
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Token that silences the voice when cancelled
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }
}

/// Master-bus meter
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeterSnapshot {
    pub voices_started: u64,
    pub active_voices: usize,
    /// Highest absolute sample level seen on the master bus
    pub peak: f32,
}

/// Sink for rendered voices
pub trait AudioOutput: Send + Sync {
    /// Start playing a voice; errors surface as `Error::PlaybackStart`
    fn start(&self, voice: RenderedVoice) -> Result<VoiceHandle>;

    fn meter(&self) -> MeterSnapshot;
}

#[derive(Default)]
struct Meter {
    voices_started: AtomicU64,
    active_voices: AtomicUsize,
    peak_bits: AtomicU32,
}

impl Meter {
    fn record_peak(&self, peak: f32) {
        // Non-negative floats order the same as their bit patterns
        self.peak_bits.fetch_max(peak.max(0.0).to_bits(), Ordering::Relaxed);
    }
}

/// Output that plays voices against the tokio clock
#[derive(Clone, Default)]
pub struct ClockedOutput {
    meter: Arc<Meter>,
}

impl ClockedOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioOutput for ClockedOutput {
    fn start(&self, voice: RenderedVoice) -> Result<VoiceHandle> {
        if voice.sample_rate == 0 {
            return Err(Error::PlaybackStart(format!(
                "channel {}: invalid sample rate",
                voice.channel
            )));
        }

        let (done_tx, done_rx) = oneshot::channel();
        let stop = CancellationToken::new();
        let meter = Arc::clone(&self.meter);

        meter.voices_started.fetch_add(1, Ordering::Relaxed);
        meter.active_voices.fetch_add(1, Ordering::Relaxed);
        meter.record_peak(voice.peak);

        let token = stop.clone();
        let duration = voice.duration;
        let channel = voice.channel;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = token.cancelled() => {
                    debug!("Voice on channel {} stopped early", channel);
                }
            }
            meter.active_voices.fetch_sub(1, Ordering::Relaxed);
            let _ = done_tx.send(());
        });

        Ok(VoiceHandle::new(done_rx, stop))
    }

    fn meter(&self) -> MeterSnapshot {
        MeterSnapshot {
            voices_started: self.meter.voices_started.load(Ordering::Relaxed),
            active_voices: self.meter.active_voices.load(Ordering::Relaxed),
            peak: f32::from_bits(self.meter.peak_bits.load(Ordering::Relaxed)),
        }
    }
}
