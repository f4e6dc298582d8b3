//! Audio playback
//!
//! The playback engine, its per-channel output graph and wait queues, and the
//! output sink voices are played on.

pub mod engine;
pub mod graph;
pub mod item;
pub mod output;
mod queue;

pub use engine::{ChannelStats, EngineStats, PlaybackEngine};
pub use graph::{render_voice, OutputGraph, RenderedVoice, StripGains, StripSettings};
pub use item::{Payload, PlaybackCallbacks, PlaybackOutcome, PlaybackRequest, PlaybackTicket};
pub use output::{AudioOutput, ClockedOutput, MeterSnapshot, VoiceHandle};
