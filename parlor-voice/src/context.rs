//! Voice context
//!
//! Explicit handle on one voice service instance: configuration, playback
//! engine, synthesis pipeline and event bus. Built once at startup and passed
//! to every collaborator; cloning shares the same instance.

use crate::config::VoiceConfig;
use crate::error::{Error, Result};
use crate::playback::{
    AudioOutput, ClockedOutput, EngineStats, Payload, PlaybackCallbacks, PlaybackEngine,
    PlaybackOutcome, PlaybackRequest,
};
use crate::state::SharedState;
use crate::synthesis::{
    AudioResult, BackendDescriptor, BackendStatus, CacheStats, Shortfall, SynthesisBackend,
    SynthesisOptions, SynthesisPipeline,
};
use parlor_common::{Channel, ParticipantId, Priority, Usage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type AudioGeneratedCallback = Box<dyn FnOnce(Option<&AudioResult>) + Send + 'static>;

/// Voice and style parameters for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceParams {
    pub lang: Option<String>,
    pub speaker: Option<String>,
    pub speed: Option<f32>,
    /// Item volume (0.0-1.0)
    pub volume: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            lang: None,
            speaker: None,
            speed: None,
            volume: 1.0,
        }
    }
}

/// Options for [`VoiceContext::speak`] and [`VoiceContext::play_prerendered`]
#[derive(Default)]
pub struct SpeakOptions {
    /// Explicit channel; `system` selects the announcement channel
    pub channel: Option<Channel>,
    pub participant_id: Option<ParticipantId>,
    pub priority: Priority,
    pub voice: VoiceParams,
    pub callbacks: PlaybackCallbacks,
    /// Hint of the current participant count
    pub total_participants: Option<usize>,
    on_audio_generated: Option<AudioGeneratedCallback>,
}

impl SpeakOptions {
    /// Announcement on the system channel
    pub fn system(priority: Priority) -> Self {
        Self {
            channel: Some(Channel::System),
            priority,
            ..Default::default()
        }
    }

    /// Chatter from a participant
    pub fn participant(participant_id: ParticipantId, priority: Priority) -> Self {
        Self {
            participant_id: Some(participant_id),
            priority,
            ..Default::default()
        }
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_participant(mut self, participant_id: ParticipantId) -> Self {
        self.participant_id = Some(participant_id);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_voice(mut self, voice: VoiceParams) -> Self {
        self.voice = voice;
        self
    }

    pub fn with_callbacks(mut self, callbacks: PlaybackCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_total_participants(mut self, total: usize) -> Self {
        self.total_participants = Some(total);
        self
    }

    /// Called once audio is available, or once it is certain there is none
    pub fn on_audio_generated(
        mut self,
        f: impl FnOnce(Option<&AudioResult>) + Send + 'static,
    ) -> Self {
        self.on_audio_generated = Some(Box::new(f));
        self
    }

    fn usage(&self) -> Usage {
        match (self.channel, self.participant_id) {
            (Some(Channel::System), _) => Usage::System,
            (_, Some(_)) | (Some(Channel::Participant(_)), None) => Usage::Participant,
            (None, None) => Usage::System,
        }
    }

    fn playback_request(&mut self, payload: Payload, label: String) -> PlaybackRequest {
        PlaybackRequest {
            usage: self.usage(),
            participant_id: self.participant_id,
            priority: self.priority,
            volume: self.voice.volume,
            payload,
            callbacks: std::mem::take(&mut self.callbacks),
            total_participants: self.total_participants,
            label,
        }
    }
}

impl fmt::Debug for SpeakOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeakOptions")
            .field("channel", &self.channel)
            .field("participant_id", &self.participant_id)
            .field("priority", &self.priority)
            .field("voice", &self.voice)
            .finish_non_exhaustive()
    }
}

/// How a speech request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakOutcome {
    /// Audio was played (to the end or until stopped)
    Played(PlaybackOutcome),
    /// No backend produced audio in time; nothing was played
    NoAudio,
}

/// Combined service statistics
#[derive(Debug, Clone, Serialize)]
pub struct VoiceStats {
    pub playback: EngineStats,
    pub cache: CacheStats,
    pub backends: Vec<BackendStatus>,
    pub speak_requests: u64,
    pub synthesis_failures: u64,
}

/// Voice service instance
#[derive(Clone)]
pub struct VoiceContext {
    config: Arc<VoiceConfig>,
    engine: PlaybackEngine,
    pipeline: Arc<SynthesisPipeline>,
    state: Arc<SharedState>,
}

impl VoiceContext {
    /// Build a context playing on the clocked output
    pub fn new(config: VoiceConfig) -> Result<Self> {
        Self::with_output(config, Arc::new(ClockedOutput::new()))
    }

    /// Build a context playing on `output`; registers the configured backends
    pub fn with_output(config: VoiceConfig, output: Arc<dyn AudioOutput>) -> Result<Self> {
        let state = Arc::new(SharedState::new());
        let engine = PlaybackEngine::new(&config, output, Arc::clone(&state));
        let pipeline = Arc::new(SynthesisPipeline::new(
            config.synthesis.clone(),
            Arc::clone(&state),
        ));

        for descriptor in &config.backends {
            pipeline.register_backend(descriptor.clone())?;
        }

        Ok(Self {
            config: Arc::new(config),
            engine,
            pipeline,
            state,
        })
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn pipeline(&self) -> &Arc<SynthesisPipeline> {
        &self.pipeline
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    // ========================================
    // Speech
    // ========================================

    /// Synthesize `text` and play it
    ///
    /// Resolves once the audio has played, was stopped, or turned out to be
    /// unavailable. Total synthesis failure is not an error: `on_error`
    /// fires with the cause (`BackendUnhealthy`, `SynthesisTimeout` or
    /// `SynthesisUnavailable`) and the result is `SpeakOutcome::NoAudio`. `on_audio_generated` fires in both cases,
    /// before playback starts.
    pub async fn speak(&self, text: &str, mut options: SpeakOptions) -> Result<SpeakOutcome> {
        if !self.engine.is_enabled() {
            return Err(Error::ServiceDisabled);
        }
        self.state.record_speak_request();

        let channel = self.synthesis_channel(&options);
        let synthesis_options = SynthesisOptions {
            lang: options.voice.lang.clone(),
            speaker: options.voice.speaker.clone(),
            speed: options.voice.speed,
        };

        let audio = self.pipeline.try_obtain(text, channel, &synthesis_options).await;

        if let Some(f) = options.on_audio_generated.take() {
            f(audio.as_ref().ok());
        }

        let audio = match audio {
            Ok(audio) => audio,
            Err(shortfall) => {
                let err = shortfall_error(shortfall, channel);
                warn!("Speech dropped: {}", err);
                options.callbacks.fire_error(&err);
                return Ok(SpeakOutcome::NoAudio);
            }
        };

        debug!(
            "Speaking {} bytes from '{}' (cached: {}, ~{} ms)",
            audio.audio.len(),
            audio.backend_id,
            audio.from_cache,
            audio.estimated_duration.as_millis()
        );

        let request = options.playback_request(Payload::Encoded(audio.audio), label_for(text));
        let ticket = self.engine.play(request)?;
        let outcome = ticket.wait().await?;
        Ok(SpeakOutcome::Played(outcome))
    }

    /// Play already-rendered audio, bypassing synthesis
    pub async fn play_prerendered(
        &self,
        audio: impl Into<Arc<[u8]>>,
        mut options: SpeakOptions,
    ) -> Result<PlaybackOutcome> {
        let request = options.playback_request(Payload::Encoded(audio.into()), "prerendered".to_string());
        let ticket = self.engine.play(request)?;
        ticket.wait().await
    }

    /// Channel whose cache slot the synthesized audio belongs to
    fn synthesis_channel(&self, options: &SpeakOptions) -> Channel {
        if let Some(channel) = options.channel {
            return channel;
        }
        match (options.usage(), options.participant_id) {
            (Usage::Participant, Some(id)) => self.engine.preferred_channel(id),
            (Usage::Participant, None) => Channel::participant(0),
            (Usage::System, _) => Channel::System,
        }
    }

    // ========================================
    // Control
    // ========================================

    /// Fix the participant ceiling; 0 derives it from the participant count
    pub fn set_concurrency_ceiling(&self, ceiling: usize) -> usize {
        let applied = if ceiling == 0 {
            self.engine.use_derived_ceiling()
        } else {
            self.engine.set_concurrency_ceiling(ceiling)
        };
        info!("Participant concurrency ceiling set to {}", applied);
        applied
    }

    pub fn update_total_participants(&self, total: usize) -> usize {
        self.engine.update_total_participants(total)
    }

    pub fn set_master_volume(&self, volume: f32) -> f32 {
        self.engine.set_master_volume(volume)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.engine.set_enabled(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.engine.is_enabled()
    }

    /// Register an HTTP synthesis backend
    pub fn register_backend(&self, descriptor: BackendDescriptor) -> Result<()> {
        self.pipeline.register_backend(descriptor)
    }

    /// Register a custom synthesis backend implementation
    pub fn register_backend_with(
        &self,
        descriptor: BackendDescriptor,
        backend: Arc<dyn SynthesisBackend>,
    ) {
        self.pipeline.register_backend_with(descriptor, backend);
    }

    pub fn stop_channel(&self, channel: Channel) {
        self.engine.stop_channel(channel);
    }

    pub fn stop_all(&self) {
        self.engine.stop_all();
    }

    /// Start the periodic backend health monitor
    pub fn spawn_health_monitor(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.pipeline
            .spawn_health_monitor(self.config.synthesis.health_check_interval, shutdown)
    }

    pub fn stats(&self) -> VoiceStats {
        VoiceStats {
            playback: self.engine.stats(),
            cache: self.pipeline.cache_stats(),
            backends: self.pipeline.backends(),
            speak_requests: self.state.speak_requests(),
            synthesis_failures: self.state.synthesis_failures(),
        }
    }
}

fn shortfall_error(shortfall: Shortfall, channel: Channel) -> Error {
    match shortfall {
        Shortfall::AllUnhealthy => {
            Error::BackendUnhealthy(format!("every backend for channel {} is unhealthy", channel))
        }
        Shortfall::BudgetExhausted { elapsed_ms } => Error::SynthesisTimeout(elapsed_ms),
        Shortfall::NoBackends => {
            Error::SynthesisUnavailable(format!("no enabled backend for channel {}", channel))
        }
        Shortfall::AllFailed => Error::SynthesisUnavailable(format!(
            "every backend for channel {} failed",
            channel
        )),
    }
}

/// Short log label for spoken text
fn label_for(text: &str) -> String {
    const MAX_CHARS: usize = 40;
    if text.chars().count() <= MAX_CHARS {
        return text.to_string();
    }
    let mut label: String = text.chars().take(MAX_CHARS).collect();
    label.push('…');
    label
}
