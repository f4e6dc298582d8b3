//! Channel vocabulary shared by the scheduler, the playback engine and callers
//!
//! A table has one reserved *system* channel (announcements, highest priority
//! class) plus a pool of shared *participant* channels. Channels are addressed
//! by a compact string form on the wire: `system`, `p0` .. `p7`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest participant pool a deployment may configure
pub const MAX_PARTICIPANT_CHANNELS: usize = 8;

/// Participant (seat/player) identifier
pub type ParticipantId = u32;

/// Logical audio output line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Channel {
    /// Reserved, exclusive announcement channel
    System,
    /// Shared participant channel (0-based pool index)
    Participant(u8),
}

impl Channel {
    /// Participant channel by pool index
    pub fn participant(index: usize) -> Self {
        Channel::Participant(index as u8)
    }

    /// Pool index for participant channels, None for the system channel
    pub fn participant_index(&self) -> Option<usize> {
        match self {
            Channel::System => None,
            Channel::Participant(index) => Some(*index as usize),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Channel::System)
    }

    /// All channels for a pool of `pool_size` participant channels, system first
    pub fn all(pool_size: usize) -> Vec<Channel> {
        let mut channels = Vec::with_capacity(pool_size + 1);
        channels.push(Channel::System);
        channels.extend((0..pool_size).map(Channel::participant));
        channels
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::System => write!(f, "system"),
            Channel::Participant(index) => write!(f, "p{}", index),
        }
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("system") {
            return Ok(Channel::System);
        }

        let index = s
            .strip_prefix('p')
            .or_else(|| s.strip_prefix('P'))
            .and_then(|rest| rest.parse::<usize>().ok())
            .ok_or_else(|| Error::InvalidInput(format!("Unknown channel: {}", s)))?;

        if index >= MAX_PARTICIPANT_CHANNELS {
            return Err(Error::InvalidInput(format!(
                "Participant channel {} out of range (max {})",
                index,
                MAX_PARTICIPANT_CHANNELS - 1
            )));
        }

        Ok(Channel::participant(index))
    }
}

impl TryFrom<String> for Channel {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.to_string()
    }
}

/// Usage class of an allocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Usage {
    /// Announcements and system sounds (system channel)
    System,
    /// Participant chatter (shared pool)
    Participant,
}

/// Request priority; higher is more urgent
///
/// Canonical classes: system = 4, adversarial chat = 3, tactical signal = 2,
/// ambient chat = 1. Zero marks an idle channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const IDLE: Priority = Priority(0);
    pub const AMBIENT: Priority = Priority(1);
    pub const TACTICAL: Priority = Priority(2);
    pub const ADVERSARIAL: Priority = Priority(3);
    pub const SYSTEM: Priority = Priority(4);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::AMBIENT
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
