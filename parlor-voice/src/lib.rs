//! # Parlor voice service (parlor-voice)
//!
//! Channel-scheduled speech for a card table: one exclusive system channel
//! plus a pool of shared participant channels, fed by remote synthesis
//! backends with bounded-latency fallback and caching.
//!
//! **Components:**
//! - [`scheduler`]: channel allocation policy (no I/O)
//! - [`playback`]: per-channel playback slots, queues and output graph
//! - [`synthesis`]: backend fallback pipeline and result cache
//! - [`context`]: the explicit service handle callers hold

pub mod api;
pub mod audio;
pub mod config;
pub mod context;
pub mod error;
pub mod playback;
pub mod scheduler;
pub mod state;
pub mod synthesis;

pub use config::VoiceConfig;
pub use context::{SpeakOptions, SpeakOutcome, VoiceContext, VoiceParams};
pub use error::{Error, Result};
pub use state::SharedState;
