//! Synthesis pipeline
//!
//! Converts text into an encoded audio payload by falling back across the
//! registered backends in priority order, under one hard wall-clock budget.
//!
//! **Contract:** [`SynthesisPipeline::obtain`] always resolves within
//! `primary_timeout + fallback_timeout` (plus scheduling overhead). Backend
//! failures are absorbed; exhaustion is reported as `None`, never as an error.
//!
//! **Budget accounting:**
//! - Health probes and synthesis calls both spend the shared budget
//! - A probe is bounded by `health_timeout` and by what is left of the budget
//! - The first synthesis attempt is bounded by `primary_timeout`; later
//!   attempts may use whatever remains
//! - Timed-out futures are dropped, which aborts the in-flight request

use super::backend::{BackendDescriptor, HttpBackend, SynthesisBackend, SynthesisRequest};
use super::cache::{CacheEntry, CacheStats, SynthesisCache};
use crate::audio::{sniff_format, AudioFormat};
use crate::config::SynthesisConfig;
use crate::error::Result;
use crate::state::SharedState;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parlor_common::{Channel, VoiceEvent};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Speaking rate used for duration estimates
const CHARS_PER_MINUTE: u64 = 150;

/// Rough playing time of `text` at 150 characters per minute
pub fn estimate_duration(text: &str) -> Duration {
    let chars = text.chars().count() as u64;
    Duration::from_millis(chars * 60_000 / CHARS_PER_MINUTE)
}

/// Per-request voice parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOptions {
    pub lang: Option<String>,
    pub speaker: Option<String>,
    pub speed: Option<f32>,
}

/// Audio produced (or recalled) for one request
#[derive(Debug, Clone)]
pub struct AudioResult {
    pub audio: Arc<[u8]>,
    pub estimated_duration: Duration,
    pub format: AudioFormat,
    pub backend_id: String,
    pub from_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Why [`SynthesisPipeline::try_obtain`] produced no audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortfall {
    /// No enabled backend is registered
    NoBackends,
    /// Every candidate was skipped as unhealthy
    AllUnhealthy,
    /// At least one backend was tried and every attempt failed
    AllFailed,
    /// The hard budget ran out
    BudgetExhausted { elapsed_ms: u64 },
}

/// Registered backend as reported by [`SynthesisPipeline::backends`]
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    #[serde(flatten)]
    pub descriptor: BackendDescriptor,
    pub health: HealthStatus,
    pub last_checked: Option<DateTime<Utc>>,
}

struct BackendEntry {
    descriptor: BackendDescriptor,
    backend: Arc<dyn SynthesisBackend>,
    health: HealthStatus,
    checked_at: Option<Instant>,
    last_checked: Option<DateTime<Utc>>,
}

/// Snapshot of a backend taken before any await
struct Candidate {
    id: String,
    backend: Arc<dyn SynthesisBackend>,
    fresh_verdict: Option<bool>,
}

pub struct SynthesisPipeline {
    config: SynthesisConfig,
    backends: RwLock<Vec<BackendEntry>>,
    cache: Mutex<SynthesisCache>,
    state: Arc<SharedState>,
}

impl SynthesisPipeline {
    pub fn new(config: SynthesisConfig, state: Arc<SharedState>) -> Self {
        let cache = SynthesisCache::new(config.cache_ttl, config.cache_capacity);
        Self {
            config,
            backends: RwLock::new(Vec::new()),
            cache: Mutex::new(cache),
            state,
        }
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    // ========================================
    // Registration
    // ========================================

    /// Register an HTTP backend described by `descriptor`
    ///
    /// A descriptor with an id that is already registered replaces it.
    pub fn register_backend(&self, descriptor: BackendDescriptor) -> Result<()> {
        let backend = HttpBackend::new(&descriptor.base_url)?;
        self.register_backend_with(descriptor, Arc::new(backend));
        Ok(())
    }

    /// Register a backend implementation under `descriptor`
    pub fn register_backend_with(
        &self,
        descriptor: BackendDescriptor,
        backend: Arc<dyn SynthesisBackend>,
    ) {
        info!(
            "Registering synthesis backend '{}' (priority {}, enabled {})",
            descriptor.id, descriptor.priority, descriptor.enabled
        );

        let entry = BackendEntry {
            descriptor,
            backend,
            health: HealthStatus::Unknown,
            checked_at: None,
            last_checked: None,
        };

        let mut backends = self.backends.write().unwrap_or_else(PoisonError::into_inner);
        match backends
            .iter_mut()
            .find(|existing| existing.descriptor.id == entry.descriptor.id)
        {
            Some(existing) => *existing = entry,
            None => backends.push(entry),
        }
    }

    /// Registered backends, lowest priority rank first
    pub fn backends(&self) -> Vec<BackendStatus> {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        let mut statuses: Vec<BackendStatus> = backends
            .iter()
            .map(|entry| BackendStatus {
                descriptor: entry.descriptor.clone(),
                health: entry.health,
                last_checked: entry.last_checked,
            })
            .collect();
        statuses.sort_by_key(|status| status.descriptor.priority);
        statuses
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).stats()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    // ========================================
    // Obtain
    // ========================================

    /// Audio for `text` on `channel`, or None when no backend delivers in time
    pub async fn obtain(
        &self,
        text: &str,
        channel: Channel,
        options: &SynthesisOptions,
    ) -> Option<AudioResult> {
        self.try_obtain(text, channel, options).await.ok()
    }

    /// Like [`obtain`](Self::obtain), reporting why no audio was produced
    pub async fn try_obtain(
        &self,
        text: &str,
        channel: Channel,
        options: &SynthesisOptions,
    ) -> std::result::Result<AudioResult, Shortfall> {
        let started = Instant::now();

        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(text, channel);
        if let Some(entry) = cached {
            debug!("Synthesis cache hit on channel {}", channel);
            self.announce_completed(channel, &entry.backend_id, true, started);
            return Ok(AudioResult {
                audio: entry.audio,
                estimated_duration: entry.estimated_duration,
                format: entry.format,
                backend_id: entry.backend_id,
                from_cache: true,
            });
        }

        let candidates = self.candidates(channel);
        if candidates.is_empty() {
            warn!("No enabled synthesis backend for channel {}", channel);
            self.announce_failed(channel, started);
            return Err(Shortfall::NoBackends);
        }

        let request = SynthesisRequest {
            text: text.to_string(),
            lang: options
                .lang
                .clone()
                .unwrap_or_else(|| self.config.default_lang.clone()),
            speaker: options.speaker.clone(),
            speed: options.speed,
        };

        let deadline = started + self.config.total_budget();
        let mut first_attempt = true;
        let mut attempted = false;

        for candidate in candidates {
            if Instant::now() >= deadline {
                break;
            }

            let healthy = match candidate.fresh_verdict {
                Some(verdict) => verdict,
                None => self.probe(&candidate.id, &candidate.backend, deadline).await,
            };
            if !healthy {
                debug!("Skipping unhealthy backend '{}'", candidate.id);
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let slice = if first_attempt {
                remaining.min(self.config.primary_timeout)
            } else {
                remaining
            };
            first_attempt = false;
            attempted = true;

            match timeout(slice, candidate.backend.synthesize(&request)).await {
                Ok(Ok(audio)) if !audio.is_empty() => {
                    let result = AudioResult {
                        format: sniff_format(&audio),
                        audio: Arc::from(audio),
                        estimated_duration: estimate_duration(text),
                        backend_id: candidate.id.clone(),
                        from_cache: false,
                    };

                    self.cache
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(
                            text,
                            channel,
                            CacheEntry {
                                audio: result.audio.clone(),
                                estimated_duration: result.estimated_duration,
                                format: result.format,
                                backend_id: result.backend_id.clone(),
                                created_at: Instant::now(),
                            },
                        );

                    debug!(
                        "Backend '{}' synthesized {} bytes ({}) for channel {}",
                        candidate.id,
                        result.audio.len(),
                        result.format.mime_type(),
                        channel
                    );
                    self.announce_completed(channel, &candidate.id, false, started);
                    return Ok(result);
                }
                Ok(Ok(_)) => {
                    warn!("Backend '{}' returned empty audio", candidate.id);
                    self.record_health(&candidate.id, false);
                }
                Ok(Err(e)) => {
                    warn!("Backend '{}' synthesis failed: {}", candidate.id, e);
                    self.record_health(&candidate.id, false);
                }
                Err(_) => {
                    warn!(
                        "Backend '{}' synthesis timed out after {} ms",
                        candidate.id,
                        slice.as_millis()
                    );
                    self.record_health(&candidate.id, false);
                }
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let shortfall = if Instant::now() >= deadline {
            Shortfall::BudgetExhausted { elapsed_ms }
        } else if attempted {
            Shortfall::AllFailed
        } else {
            Shortfall::AllUnhealthy
        };

        warn!(
            "No synthesis backend produced audio for channel {} within {} ms ({:?})",
            channel, elapsed_ms, shortfall
        );
        self.announce_failed(channel, started);
        Err(shortfall)
    }

    /// Enabled backends for `channel`, affinity-matched if possible, by priority
    fn candidates(&self, channel: Channel) -> Vec<Candidate> {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);

        let enabled: Vec<&BackendEntry> = backends
            .iter()
            .filter(|entry| entry.descriptor.enabled)
            .collect();
        let preferred: Vec<&BackendEntry> = enabled
            .iter()
            .copied()
            .filter(|entry| entry.descriptor.prefers(channel))
            .collect();
        let mut chosen = if preferred.is_empty() { enabled } else { preferred };
        chosen.sort_by_key(|entry| entry.descriptor.priority);

        chosen
            .into_iter()
            .map(|entry| Candidate {
                id: entry.descriptor.id.clone(),
                backend: entry.backend.clone(),
                fresh_verdict: self.fresh_verdict(entry),
            })
            .collect()
    }

    fn fresh_verdict(&self, entry: &BackendEntry) -> Option<bool> {
        let checked_at = entry.checked_at?;
        if checked_at.elapsed() > self.config.health_cache_ttl {
            return None;
        }
        match entry.health {
            HealthStatus::Healthy => Some(true),
            HealthStatus::Unhealthy => Some(false),
            HealthStatus::Unknown => None,
        }
    }

    // ========================================
    // Health
    // ========================================

    async fn probe(&self, id: &str, backend: &Arc<dyn SynthesisBackend>, deadline: Instant) -> bool {
        let limit = deadline
            .saturating_duration_since(Instant::now())
            .min(self.config.health_timeout);

        let healthy = match timeout(limit, backend.check_health()).await {
            Ok(Ok(healthy)) => healthy,
            Ok(Err(e)) => {
                debug!("Health probe for '{}' failed: {}", id, e);
                false
            }
            Err(_) => {
                debug!("Health probe for '{}' timed out", id);
                false
            }
        };

        self.record_health(id, healthy);
        healthy
    }

    fn record_health(&self, id: &str, healthy: bool) {
        let status = if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        let changed = {
            let mut backends = self.backends.write().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = backends.iter_mut().find(|entry| entry.descriptor.id == id) else {
                return;
            };
            let changed = entry.health != status;
            entry.health = status;
            entry.checked_at = Some(Instant::now());
            entry.last_checked = Some(Utc::now());
            changed
        };

        if changed {
            if healthy {
                info!("Synthesis backend '{}' is healthy", id);
            } else {
                warn!("Synthesis backend '{}' is unhealthy", id);
            }
            self.state.broadcast_event(VoiceEvent::BackendHealthChanged {
                backend_id: id.to_string(),
                healthy,
                timestamp: Utc::now(),
            });
        }
    }

    /// Probe every enabled backend concurrently
    pub async fn check_all_health(&self) -> Vec<(String, bool)> {
        let targets: Vec<(String, Arc<dyn SynthesisBackend>)> = {
            let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
            backends
                .iter()
                .filter(|entry| entry.descriptor.enabled)
                .map(|entry| (entry.descriptor.id.clone(), entry.backend.clone()))
                .collect()
        };

        let deadline = Instant::now() + self.config.health_timeout;
        let probes = targets.iter().map(|(id, backend)| async move {
            let healthy = self.probe(id, backend, deadline).await;
            (id.clone(), healthy)
        });

        join_all(probes).await
    }

    /// Re-probe all backends every `interval` until `shutdown` fires
    pub fn spawn_health_monitor(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Health monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let results = pipeline.check_all_health().await;
                        let healthy = results.iter().filter(|(_, ok)| *ok).count();
                        debug!("Health monitor: {}/{} backends healthy", healthy, results.len());
                    }
                }
            }
        })
    }

    // ========================================
    // Events
    // ========================================

    fn announce_completed(&self, channel: Channel, backend_id: &str, cached: bool, started: Instant) {
        self.state.broadcast_event(VoiceEvent::SynthesisCompleted {
            channel,
            backend_id: Some(backend_id.to_string()),
            cached,
            elapsed_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
    }

    fn announce_failed(&self, channel: Channel, started: Instant) {
        self.state.record_synthesis_failure();
        self.state.broadcast_event(VoiceEvent::SynthesisFailed {
            channel,
            elapsed_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
    }
}
