//! # Parlor Common Library
//!
//! Shared code for the Parlor voice services including:
//! - Channel vocabulary (system/participant channels, usage classes, priorities)
//! - Event types (VoiceEvent enum) broadcast to observers
//! - Configuration file resolution and TOML loading
//! - Common error type

pub mod channel;
pub mod config;
pub mod error;
pub mod events;

pub use channel::{Channel, ParticipantId, Priority, Usage, MAX_PARTICIPANT_CHANNELS};
pub use error::{Error, Result};
pub use events::VoiceEvent;
