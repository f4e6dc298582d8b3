//! parlor-voice configuration
//!
//! `VoiceConfig` is fully specified: every field has an explicit default in
//! `Default`. Partial input (TOML file, command line) arrives as
//! `ConfigOverrides`, where every field is optional, and is folded onto a base
//! configuration by [`merge`].

use crate::error::Result;
use crate::synthesis::BackendDescriptor;
use parlor_common::{Channel, MAX_PARTICIPANT_CHANNELS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "PARLOR_VOICE_CONFIG";

/// Config file name under the per-user config directory
pub const CONFIG_FILE_NAME: &str = "voice.toml";

/// How a system request that is granted while the system channel is playing
/// gets its turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreemptionMode {
    /// Granted request plays right after the current one; nothing is cut off
    NextTurn,
    /// Current system item is stopped and the granted request plays next
    Interrupt,
}

/// Gain/pan strip settings for one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelMix {
    /// Base volume (0.0-1.0)
    pub volume: f32,
    /// Stereo position (-1.0 = left, 0.0 = centre, 1.0 = right)
    pub pan: f32,
}

impl ChannelMix {
    pub fn clamped(self) -> Self {
        Self {
            volume: clamp_unit(self.volume),
            pan: clamp_pan(self.pan),
        }
    }
}

/// Synthesis pipeline settings
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisConfig {
    /// First slice of the shared time budget
    pub primary_timeout: Duration,
    /// Second slice of the shared time budget
    pub fallback_timeout: Duration,
    /// Upper bound for a single health probe
    pub health_timeout: Duration,
    /// How long a health verdict is reused before probing again
    pub health_cache_ttl: Duration,
    /// Period of the background health monitor
    pub health_check_interval: Duration,
    /// Cache entry lifetime
    pub cache_ttl: Duration,
    /// Maximum number of cached results
    pub cache_capacity: usize,
    /// Language sent to backends when the caller gives none
    pub default_lang: String,
}

impl SynthesisConfig {
    /// Hard ceiling for one `obtain` call
    pub fn total_budget(&self) -> Duration {
        self.primary_timeout + self.fallback_timeout
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            primary_timeout: Duration::from_secs(5),
            fallback_timeout: Duration::from_secs(5),
            health_timeout: Duration::from_secs(2),
            health_cache_ttl: Duration::from_secs(15),
            health_check_interval: Duration::from_secs(300),
            cache_ttl: Duration::from_secs(60 * 60),
            cache_capacity: 100,
            default_lang: "zh".to_string(),
        }
    }
}

/// Voice service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    /// Accept new speech/playback requests
    pub enabled: bool,
    /// HTTP control surface bind address
    pub bind_addr: String,
    /// Size of the participant channel pool (1-8)
    pub participant_channels: usize,
    /// Fixed concurrency ceiling; None derives it from the participant count
    pub concurrency_ceiling: Option<usize>,
    /// Participant count used to derive the ceiling
    pub total_participants: usize,
    /// Master volume (0.0-1.0)
    pub master_volume: f32,
    /// System channel preemption behaviour
    pub system_preemption: PreemptionMode,
    /// Per-channel gain/pan strips
    pub channel_mix: BTreeMap<Channel, ChannelMix>,
    /// Synthesis pipeline settings
    pub synthesis: SynthesisConfig,
    /// Remote synthesis backends
    pub backends: Vec<BackendDescriptor>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "127.0.0.1:5760".to_string(),
            participant_channels: MAX_PARTICIPANT_CHANNELS,
            concurrency_ceiling: None,
            total_participants: 4,
            master_volume: 1.0,
            system_preemption: PreemptionMode::NextTurn,
            channel_mix: default_channel_mix(),
            synthesis: SynthesisConfig::default(),
            backends: Vec::new(),
        }
    }
}

impl VoiceConfig {
    /// Load configuration: defaults, then the TOML file if one is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let overrides: ConfigOverrides = parlor_common::config::load_toml_or_default(path)?;
        Ok(merge(VoiceConfig::default(), overrides))
    }

    /// Mix strip for a channel, falling back to unity gain at centre
    pub fn mix_for(&self, channel: Channel) -> ChannelMix {
        self.channel_mix
            .get(&channel)
            .copied()
            .unwrap_or(ChannelMix { volume: 1.0, pan: 0.0 })
    }
}

/// Spread participants across the stereo field, system centred
fn default_channel_mix() -> BTreeMap<Channel, ChannelMix> {
    const PANS: [f32; MAX_PARTICIPANT_CHANNELS] = [-0.7, 0.7, -0.5, 0.5, -0.3, 0.3, -0.15, 0.15];

    let mut mix = BTreeMap::new();
    mix.insert(Channel::System, ChannelMix { volume: 1.0, pan: 0.0 });
    for (index, pan) in PANS.iter().enumerate() {
        mix.insert(Channel::participant(index), ChannelMix { volume: 1.0, pan: *pan });
    }
    mix
}

// ============================================================================
// Overrides
// ============================================================================

/// Partial mix strip settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelMixOverrides {
    pub volume: Option<f32>,
    pub pan: Option<f32>,
}

/// Partial synthesis settings (durations in milliseconds)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SynthesisOverrides {
    pub primary_timeout_ms: Option<u64>,
    pub fallback_timeout_ms: Option<u64>,
    pub health_timeout_ms: Option<u64>,
    pub health_cache_ttl_ms: Option<u64>,
    pub health_check_interval_ms: Option<u64>,
    pub cache_ttl_ms: Option<u64>,
    pub cache_capacity: Option<usize>,
    pub default_lang: Option<String>,
}

/// Partial configuration as read from TOML or the command line
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub enabled: Option<bool>,
    pub bind_addr: Option<String>,
    pub participant_channels: Option<usize>,
    /// Fixed ceiling; 0 selects the derived ceiling
    pub concurrency_ceiling: Option<usize>,
    pub total_participants: Option<usize>,
    pub master_volume: Option<f32>,
    pub system_preemption: Option<PreemptionMode>,
    pub channels: BTreeMap<Channel, ChannelMixOverrides>,
    pub synthesis: SynthesisOverrides,
    pub backends: Option<Vec<BackendDescriptor>>,
}

/// Fold `overrides` onto `base`, clamping numeric settings into range
pub fn merge(base: VoiceConfig, overrides: ConfigOverrides) -> VoiceConfig {
    let participant_channels = overrides
        .participant_channels
        .unwrap_or(base.participant_channels)
        .clamp(1, MAX_PARTICIPANT_CHANNELS);

    let concurrency_ceiling = match overrides.concurrency_ceiling {
        Some(0) => None,
        Some(n) => Some(n),
        None => base.concurrency_ceiling,
    }
    .map(|n| n.clamp(1, participant_channels));

    let mut channel_mix = base.channel_mix;
    for (channel, mix) in overrides.channels {
        let current = channel_mix
            .get(&channel)
            .copied()
            .unwrap_or(ChannelMix { volume: 1.0, pan: 0.0 });
        let merged = ChannelMix {
            volume: mix.volume.unwrap_or(current.volume),
            pan: mix.pan.unwrap_or(current.pan),
        };
        channel_mix.insert(channel, merged);
    }
    for mix in channel_mix.values_mut() {
        *mix = mix.clamped();
    }

    VoiceConfig {
        enabled: overrides.enabled.unwrap_or(base.enabled),
        bind_addr: overrides.bind_addr.unwrap_or(base.bind_addr),
        participant_channels,
        concurrency_ceiling,
        total_participants: overrides
            .total_participants
            .unwrap_or(base.total_participants),
        master_volume: clamp_unit(overrides.master_volume.unwrap_or(base.master_volume)),
        system_preemption: overrides
            .system_preemption
            .unwrap_or(base.system_preemption),
        channel_mix,
        synthesis: merge_synthesis(base.synthesis, overrides.synthesis),
        backends: overrides.backends.unwrap_or(base.backends),
    }
}

fn merge_synthesis(base: SynthesisConfig, overrides: SynthesisOverrides) -> SynthesisConfig {
    let ms = |value: Option<u64>, fallback: Duration| {
        value.map(Duration::from_millis).unwrap_or(fallback)
    };

    SynthesisConfig {
        primary_timeout: ms(overrides.primary_timeout_ms, base.primary_timeout),
        fallback_timeout: ms(overrides.fallback_timeout_ms, base.fallback_timeout),
        health_timeout: ms(overrides.health_timeout_ms, base.health_timeout),
        health_cache_ttl: ms(overrides.health_cache_ttl_ms, base.health_cache_ttl),
        health_check_interval: ms(overrides.health_check_interval_ms, base.health_check_interval),
        cache_ttl: ms(overrides.cache_ttl_ms, base.cache_ttl),
        cache_capacity: overrides.cache_capacity.unwrap_or(base.cache_capacity).max(1),
        default_lang: overrides.default_lang.unwrap_or(base.default_lang),
    }
}

pub(crate) fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

pub(crate) fn clamp_pan(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(-1.0, 1.0)
}
