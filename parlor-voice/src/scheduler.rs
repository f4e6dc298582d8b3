//! Channel scheduler
//!
//! Pure allocation-policy engine: tracks channel state and decides, for each
//! allocation request, which channel a caller should use and whether it must
//! queue. No I/O and no playback side effects; the playback engine owns the
//! queued items themselves and drives `release`/`promote` as items finish.
//!
//! **Policy summary:**
//! - System requests always get the system channel. An idle channel is taken;
//!   an active one is granted to an equal-or-higher priority request and
//!   queued against a strictly higher one.
//! - Participant requests first honour sticky assignment (a participant whose
//!   previous item is still playing queues behind it on the same channel),
//!   then take the least-used idle channel while under the concurrency
//!   ceiling, otherwise join the shortest queue among occupied channels.
//! - No request is ever rejected.

use parlor_common::{Channel, ParticipantId, Priority, Usage, MAX_PARTICIPANT_CHANNELS};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tokio::time::Instant;
use tracing::debug;

/// Ceiling derived from the total participant count
///
/// Step function: up to 3 participants → 2, up to 5 → 3, up to 7 → 4,
/// otherwise 5.
pub fn derive_ceiling(total_participants: usize) -> usize {
    match total_participants {
        0..=3 => 2,
        4..=5 => 3,
        6..=7 => 4,
        _ => 5,
    }
}

/// Per-channel scheduling state
#[derive(Debug, Clone)]
pub struct ChannelState {
    pub channel: Channel,
    /// An item currently holds the channel
    pub is_active: bool,
    /// Participant holding the channel (participant channels only)
    pub occupant: Option<ParticipantId>,
    /// Priority of the occupying item, `Priority::IDLE` when idle
    pub priority: Priority,
    /// Requests waiting for this channel
    pub queue_length: usize,
    /// Monotonic allocation counter used for load balancing
    pub usage_count: u64,
    pub last_used_at: Option<Instant>,
}

impl ChannelState {
    fn new(channel: Channel) -> Self {
        Self {
            channel,
            is_active: false,
            occupant: None,
            priority: Priority::IDLE,
            queue_length: 0,
            usage_count: 0,
            last_used_at: None,
        }
    }

    fn occupy(&mut self, occupant: Option<ParticipantId>, priority: Priority) {
        self.is_active = true;
        self.occupant = occupant;
        self.priority = priority;
        self.usage_count += 1;
        self.last_used_at = Some(Instant::now());
    }

    fn vacate(&mut self) -> Option<ParticipantId> {
        self.is_active = false;
        self.priority = Priority::IDLE;
        self.occupant.take()
    }
}

/// Allocation request; not retained after allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRequest {
    pub usage: Usage,
    pub participant_id: Option<ParticipantId>,
    pub priority: Priority,
    /// Hint of the current total participant count
    pub total_participants: Option<usize>,
}

impl AllocationRequest {
    pub fn system(priority: Priority) -> Self {
        Self {
            usage: Usage::System,
            participant_id: None,
            priority,
            total_participants: None,
        }
    }

    pub fn participant(participant_id: ParticipantId, priority: Priority) -> Self {
        Self {
            usage: Usage::Participant,
            participant_id: Some(participant_id),
            priority,
            total_participants: None,
        }
    }

    pub fn with_total_participants(mut self, total: usize) -> Self {
        self.total_participants = Some(total);
        self
    }
}

/// Why an allocation came out the way it did (diagnostic only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationReason {
    /// System channel was idle
    SystemIdle,
    /// System channel busy with lower-or-equal priority; request granted
    SystemPreempt,
    /// System channel busy with higher priority; request queued
    SystemBusy,
    /// Participant's previous item still playing; queued behind it
    StickyQueue,
    /// Least-used idle participant channel assigned
    LoadBalanced,
    /// Concurrency ceiling reached; queued on the shortest queue
    CeilingReached,
}

impl fmt::Display for AllocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AllocationReason::SystemIdle => "system channel idle",
            AllocationReason::SystemPreempt => "system channel granted to equal or higher priority",
            AllocationReason::SystemBusy => "system channel busy with higher priority",
            AllocationReason::StickyQueue => "participant already playing on this channel",
            AllocationReason::LoadBalanced => "least-used idle channel",
            AllocationReason::CeilingReached => "concurrency ceiling reached, shortest queue",
        };
        f.write_str(text)
    }
}

/// Allocation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocationResult {
    pub channel: Channel,
    pub queued: bool,
    /// 1-based waiting position (system queue, or across the participant pool)
    pub queue_position: Option<usize>,
    pub reason: AllocationReason,
}

impl AllocationResult {
    fn granted(channel: Channel, reason: AllocationReason) -> Self {
        Self {
            channel,
            queued: false,
            queue_position: None,
            reason,
        }
    }

    fn queued(channel: Channel, position: usize, reason: AllocationReason) -> Self {
        Self {
            channel,
            queued: true,
            queue_position: Some(position),
            reason,
        }
    }
}

/// How the participant concurrency ceiling is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeilingPolicy {
    Fixed(usize),
    Derived,
}

/// Read-only view of one channel for statistics
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSnapshot {
    pub channel: Channel,
    pub is_active: bool,
    pub occupant: Option<ParticipantId>,
    pub priority: Priority,
    pub queue_length: usize,
    pub usage_count: u64,
}

/// Usage-count spread across the participant pool
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadBalanceStats {
    pub min_usage: u64,
    pub avg_usage: f64,
    pub max_usage: u64,
}

/// Scheduler statistics
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub ceiling: usize,
    pub active_participants: usize,
    pub total_participants: usize,
    pub channels: Vec<ChannelSnapshot>,
    pub load: LoadBalanceStats,
}

/// Channel allocation policy engine
pub struct ChannelScheduler {
    system: ChannelState,
    pool: Vec<ChannelState>,
    /// Participant → channel it last played on (sticky assignment)
    sticky: HashMap<ParticipantId, Channel>,
    active_participants: usize,
    policy: CeilingPolicy,
    total_participants: usize,
    ceiling: usize,
}

impl ChannelScheduler {
    /// Create a scheduler with `pool_size` participant channels (clamped 1-8)
    ///
    /// `fixed_ceiling` of None derives the ceiling from `total_participants`.
    pub fn new(pool_size: usize, fixed_ceiling: Option<usize>, total_participants: usize) -> Self {
        let pool_size = pool_size.clamp(1, MAX_PARTICIPANT_CHANNELS);
        let policy = match fixed_ceiling {
            Some(n) => CeilingPolicy::Fixed(n),
            None => CeilingPolicy::Derived,
        };

        let mut scheduler = Self {
            system: ChannelState::new(Channel::System),
            pool: (0..pool_size)
                .map(|index| ChannelState::new(Channel::participant(index)))
                .collect(),
            sticky: HashMap::new(),
            active_participants: 0,
            policy,
            total_participants,
            ceiling: 1,
        };
        scheduler.recompute_ceiling();
        scheduler
    }

    // ========================================
    // Allocation
    // ========================================

    /// Decide which channel a request uses and whether it must queue
    pub fn allocate(&mut self, request: &AllocationRequest) -> AllocationResult {
        if let Some(total) = request.total_participants {
            if total != self.total_participants {
                self.update_total_participants(total);
            }
        }

        let result = match request.usage {
            Usage::System => self.allocate_system(request.priority),
            Usage::Participant => {
                self.allocate_participant(request.participant_id, request.priority)
            }
        };

        debug!(
            "Allocate {:?} participant={:?} priority={} -> {} queued={} position={:?} ({})",
            request.usage,
            request.participant_id,
            request.priority,
            result.channel,
            result.queued,
            result.queue_position,
            result.reason
        );

        result
    }

    fn allocate_system(&mut self, priority: Priority) -> AllocationResult {
        let state = &mut self.system;

        if !state.is_active {
            state.occupy(None, priority);
            return AllocationResult::granted(Channel::System, AllocationReason::SystemIdle);
        }

        // Counted in usage when promote() occupies the channel
        if state.priority <= priority {
            state.priority = priority;
            return AllocationResult::granted(Channel::System, AllocationReason::SystemPreempt);
        }

        state.queue_length += 1;
        AllocationResult::queued(
            Channel::System,
            state.queue_length,
            AllocationReason::SystemBusy,
        )
    }

    fn allocate_participant(
        &mut self,
        participant_id: Option<ParticipantId>,
        priority: Priority,
    ) -> AllocationResult {
        if let Some(id) = participant_id {
            if let Some(&channel) = self.sticky.get(&id) {
                if let Some(state) = self.pool_state_mut(channel) {
                    if state.is_active && state.occupant == Some(id) {
                        state.queue_length += 1;
                        let position = self.total_participant_queue();
                        return AllocationResult::queued(
                            channel,
                            position,
                            AllocationReason::StickyQueue,
                        );
                    }
                }
                // Mapping is stale (channel idle or taken over)
                self.sticky.remove(&id);
            }
        }

        if self.active_participants < self.ceiling {
            if let Some(index) = self.least_used_idle() {
                let channel = self.pool[index].channel;
                self.pool[index].occupy(participant_id, priority);
                self.active_participants += 1;
                if let Some(id) = participant_id {
                    self.sticky.insert(id, channel);
                }
                return AllocationResult::granted(channel, AllocationReason::LoadBalanced);
            }
        }

        let index = self.shortest_queue();
        self.pool[index].queue_length += 1;
        let channel = self.pool[index].channel;
        let position = self.total_participant_queue();
        AllocationResult::queued(channel, position, AllocationReason::CeilingReached)
    }

    /// Idle channel with the lowest usage count, ties to the lowest index
    fn least_used_idle(&self) -> Option<usize> {
        self.pool
            .iter()
            .enumerate()
            .filter(|(_, state)| !state.is_active)
            .min_by_key(|(index, state)| (state.usage_count, *index))
            .map(|(index, _)| index)
    }

    /// Occupied channel with the shortest queue, ties to the lowest index
    fn shortest_queue(&self) -> usize {
        self.pool
            .iter()
            .enumerate()
            .filter(|(_, state)| state.is_active)
            .min_by_key(|(index, state)| (state.queue_length, *index))
            .or_else(|| {
                self.pool
                    .iter()
                    .enumerate()
                    .min_by_key(|(index, state)| (state.queue_length, *index))
            })
            .map(|(index, _)| index)
            .unwrap_or(0)
    }

    fn total_participant_queue(&self) -> usize {
        self.pool.iter().map(|state| state.queue_length).sum()
    }

    // ========================================
    // Release / promotion
    // ========================================

    /// Mark a channel idle
    ///
    /// Does not start anything queued; the playback engine drains its own
    /// queues and calls [`promote`](Self::promote).
    pub fn release(&mut self, channel: Channel, participant_id: Option<ParticipantId>) {
        match channel {
            Channel::System => {
                if !self.system.is_active {
                    debug!("Release of idle system channel ignored");
                    return;
                }
                self.system.vacate();
            }
            Channel::Participant(_) => {
                let Some(state) = self.pool_state_mut(channel) else {
                    debug!("Release of unknown channel {} ignored", channel);
                    return;
                };
                if !state.is_active {
                    debug!("Release of idle channel {} ignored", channel);
                    return;
                }

                let occupant = state.vacate();
                self.active_participants = self.active_participants.saturating_sub(1);

                if let Some(id) = participant_id.or(occupant) {
                    if self.sticky.get(&id) == Some(&channel) {
                        self.sticky.remove(&id);
                    }
                }
            }
        }
    }

    /// Put a waiting request onto a specific idle channel
    ///
    /// `from_queue` marks requests counted in the channel's queue length.
    /// Returns false when the channel is busy or the participant ceiling is
    /// reached; the caller keeps the item waiting.
    pub fn promote(
        &mut self,
        channel: Channel,
        participant_id: Option<ParticipantId>,
        priority: Priority,
        from_queue: bool,
    ) -> bool {
        match channel {
            Channel::System => {
                if self.system.is_active {
                    return false;
                }
                self.system.occupy(None, priority);
                if from_queue {
                    self.system.queue_length = self.system.queue_length.saturating_sub(1);
                }
                true
            }
            Channel::Participant(_) => {
                if self.active_participants >= self.ceiling {
                    return false;
                }
                let Some(state) = self.pool_state_mut(channel) else {
                    return false;
                };
                if state.is_active {
                    return false;
                }

                state.occupy(participant_id, priority);
                if from_queue {
                    state.queue_length = state.queue_length.saturating_sub(1);
                }
                self.active_participants += 1;

                if let Some(id) = participant_id {
                    let holds_other = self
                        .sticky
                        .get(&id)
                        .and_then(|current| self.channel_state(*current))
                        .map(|state| state.is_active && state.occupant == Some(id))
                        .unwrap_or(false);
                    if !holds_other {
                        self.sticky.insert(id, channel);
                    }
                }
                true
            }
        }
    }

    /// Forget `count` queued requests on a channel (evicted by the caller)
    pub fn cancel_queued(&mut self, channel: Channel, count: usize) {
        let state = match channel {
            Channel::System => Some(&mut self.system),
            Channel::Participant(_) => self.pool_state_mut(channel),
        };
        if let Some(state) = state {
            state.queue_length = state.queue_length.saturating_sub(count);
        }
    }

    // ========================================
    // Ceiling configuration
    // ========================================

    /// Fix the participant ceiling, clamped to `[1, pool size]`
    pub fn set_concurrency_ceiling(&mut self, ceiling: usize) -> usize {
        self.policy = CeilingPolicy::Fixed(ceiling);
        self.recompute_ceiling();
        self.ceiling
    }

    /// Derive the ceiling from the participant count from now on
    pub fn use_derived_ceiling(&mut self) -> usize {
        self.policy = CeilingPolicy::Derived;
        self.recompute_ceiling();
        self.ceiling
    }

    /// Record the participant count; re-derives a derived ceiling
    pub fn update_total_participants(&mut self, total: usize) -> usize {
        self.total_participants = total;
        self.recompute_ceiling();
        self.ceiling
    }

    fn recompute_ceiling(&mut self) {
        let raw = match self.policy {
            CeilingPolicy::Fixed(n) => n,
            CeilingPolicy::Derived => derive_ceiling(self.total_participants),
        };
        let ceiling = raw.clamp(1, self.pool.len());
        if ceiling != self.ceiling {
            debug!("Participant concurrency ceiling {} -> {}", self.ceiling, ceiling);
        }
        self.ceiling = ceiling;
    }

    // ========================================
    // Queries
    // ========================================

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn policy(&self) -> CeilingPolicy {
        self.policy
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    pub fn active_participants(&self) -> usize {
        self.active_participants
    }

    pub fn is_active(&self, channel: Channel) -> bool {
        self.channel_state(channel)
            .map(|state| state.is_active)
            .unwrap_or(false)
    }

    pub fn channel_state(&self, channel: Channel) -> Option<&ChannelState> {
        match channel {
            Channel::System => Some(&self.system),
            Channel::Participant(_) => channel
                .participant_index()
                .and_then(|index| self.pool.get(index)),
        }
    }

    fn pool_state_mut(&mut self, channel: Channel) -> Option<&mut ChannelState> {
        channel
            .participant_index()
            .and_then(move |index| self.pool.get_mut(index))
    }

    /// Channel a participant's audio is keyed to: sticky channel, else `id mod pool size`
    pub fn preferred_channel(&self, participant_id: ParticipantId) -> Channel {
        if let Some(channel) = self.sticky.get(&participant_id) {
            return *channel;
        }
        Channel::participant(participant_id as usize % self.pool.len())
    }

    /// All channels, system first
    pub fn channels(&self) -> Vec<Channel> {
        Channel::all(self.pool.len())
    }

    pub fn stats(&self) -> SchedulerStats {
        let snapshot = |state: &ChannelState| ChannelSnapshot {
            channel: state.channel,
            is_active: state.is_active,
            occupant: state.occupant,
            priority: state.priority,
            queue_length: state.queue_length,
            usage_count: state.usage_count,
        };

        let mut channels = Vec::with_capacity(self.pool.len() + 1);
        channels.push(snapshot(&self.system));
        channels.extend(self.pool.iter().map(snapshot));

        let usages: Vec<u64> = self.pool.iter().map(|state| state.usage_count).collect();
        let load = LoadBalanceStats {
            min_usage: usages.iter().copied().min().unwrap_or(0),
            avg_usage: usages.iter().sum::<u64>() as f64 / usages.len().max(1) as f64,
            max_usage: usages.iter().copied().max().unwrap_or(0),
        };

        SchedulerStats {
            ceiling: self.ceiling,
            active_participants: self.active_participants,
            total_participants: self.total_participants,
            channels,
            load,
        }
    }
}
