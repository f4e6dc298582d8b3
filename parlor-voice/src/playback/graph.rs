//! Output graph: per-channel gain/pan strips feeding a master bus
//!
//! Each channel owns one strip (base volume + stereo pan). An item's effective
//! gain is `item volume × channel volume × master volume`; panning is
//! constant-power, normalised so a centred strip passes audio at unity.

use crate::audio::DecodedAudio;
use crate::config::{clamp_pan, clamp_unit, ChannelMix, VoiceConfig};
use parlor_common::Channel;
use serde::Serialize;
use std::collections::BTreeMap;
use std::f32::consts::{FRAC_PI_4, SQRT_2};
use std::sync::Arc;
use std::time::Duration;

/// Gains computed for one item on one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StripGains {
    /// Combined item × channel × master gain
    pub gain: f32,
    pub left: f32,
    pub right: f32,
}

/// Item rendered through its channel strip, ready for the output
#[derive(Debug, Clone)]
pub struct RenderedVoice {
    pub channel: Channel,
    /// Interleaved stereo samples after gain and pan
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub duration: Duration,
    /// Largest absolute sample value
    pub peak: f32,
}

/// Strip settings as reported in statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StripSettings {
    pub volume: f32,
    pub pan: f32,
}

pub struct OutputGraph {
    master_volume: f32,
    strips: BTreeMap<Channel, ChannelMix>,
}

impl OutputGraph {
    /// Build one strip per channel from the configured mix
    pub fn new(config: &VoiceConfig) -> Self {
        let strips = Channel::all(config.participant_channels)
            .into_iter()
            .map(|channel| (channel, config.mix_for(channel).clamped()))
            .collect();

        Self {
            master_volume: clamp_unit(config.master_volume),
            strips,
        }
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    /// Set the master volume; returns the clamped value
    pub fn set_master_volume(&mut self, volume: f32) -> f32 {
        self.master_volume = clamp_unit(volume);
        self.master_volume
    }

    /// Set a channel's base volume; None for channels outside the graph
    pub fn set_channel_volume(&mut self, channel: Channel, volume: f32) -> Option<f32> {
        let strip = self.strips.get_mut(&channel)?;
        strip.volume = clamp_unit(volume);
        Some(strip.volume)
    }

    /// Set a channel's pan; None for channels outside the graph
    pub fn set_channel_pan(&mut self, channel: Channel, pan: f32) -> Option<f32> {
        let strip = self.strips.get_mut(&channel)?;
        strip.pan = clamp_pan(pan);
        Some(strip.pan)
    }

    pub fn strip(&self, channel: Channel) -> Option<StripSettings> {
        self.strips.get(&channel).map(|mix| StripSettings {
            volume: mix.volume,
            pan: mix.pan,
        })
    }

    /// Gains for an item of `item_volume` on `channel`
    pub fn gains(&self, channel: Channel, item_volume: f32) -> StripGains {
        let mix = self
            .strips
            .get(&channel)
            .copied()
            .unwrap_or(ChannelMix { volume: 1.0, pan: 0.0 });

        let gain = clamp_unit(clamp_unit(item_volume) * mix.volume * self.master_volume);
        let angle = (mix.pan + 1.0) * FRAC_PI_4;

        StripGains {
            gain,
            left: gain * (SQRT_2 * angle.cos()).min(1.0),
            right: gain * (SQRT_2 * angle.sin()).min(1.0),
        }
    }
}

/// Apply strip gains to decoded audio
pub fn render_voice(channel: Channel, audio: &DecodedAudio, gains: StripGains) -> RenderedVoice {
    let mut peak = 0.0f32;
    let samples: Vec<f32> = audio
        .samples
        .chunks_exact(2)
        .flat_map(|frame| {
            let left = frame[0] * gains.left;
            let right = frame[1] * gains.right;
            peak = peak.max(left.abs()).max(right.abs());
            [left, right]
        })
        .collect();

    RenderedVoice {
        channel,
        samples: Arc::from(samples),
        sample_rate: audio.sample_rate,
        duration: audio.duration(),
        peak,
    }
}
