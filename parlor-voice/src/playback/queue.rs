//! Per-channel wait queue
//!
//! Items are kept sorted: system-channel grants waiting for the current item
//! to finish come first, then descending priority, then arrival order.

use super::item::PlaybackItem;
use parlor_common::{ParticipantId, Priority};
use std::cmp::Reverse;

pub(crate) struct QueuedItem {
    pub item: PlaybackItem,
    /// Granted by the scheduler but waiting for the slot (not counted in the
    /// scheduler's queue length)
    pub granted: bool,
}

impl QueuedItem {
    fn sort_key(&self) -> (bool, Reverse<Priority>, u64) {
        (!self.granted, Reverse(self.item.priority), self.item.seq)
    }
}

/// Head-of-queue summary used when draining
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueHead {
    pub participant_id: Option<ParticipantId>,
    pub priority: Priority,
    pub seq: u64,
    pub granted: bool,
}

#[derive(Default)]
pub(crate) struct ChannelQueue {
    items: Vec<QueuedItem>,
}

impl ChannelQueue {
    /// Insert in order; returns the 1-based position
    pub fn push(&mut self, item: PlaybackItem, granted: bool) -> usize {
        let entry = QueuedItem { item, granted };
        let key = entry.sort_key();
        let index = self.items.partition_point(|existing| existing.sort_key() <= key);
        self.items.insert(index, entry);
        index + 1
    }

    pub fn head(&self) -> Option<QueueHead> {
        self.items.first().map(|entry| QueueHead {
            participant_id: entry.item.participant_id,
            priority: entry.item.priority,
            seq: entry.item.seq,
            granted: entry.granted,
        })
    }

    pub fn pop(&mut self) -> Option<QueuedItem> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0))
        }
    }

    /// Remove everything, in queue order
    pub fn take_all(&mut self) -> Vec<QueuedItem> {
        std::mem::take(&mut self.items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
