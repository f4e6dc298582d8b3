//! Playback engine
//!
//! Owns the output graph, one playback slot per channel and one wait queue
//! per channel, and drives the scheduler's allocate/release lifecycle.
//!
//! **Locking:** scheduler, graph, slots and queues live behind a single
//! `std::sync::Mutex` that is never held across an `.await` and never held
//! while caller callbacks run. Allocation, queue insertion, release and
//! promotion are therefore atomic with respect to each other.
//!
//! **Item lifecycle:**
//! 1. `play` allocates a channel; the item either takes the free slot and is
//!    launched on its own task, or waits in the channel queue
//! 2. The task decodes the payload, renders it through the channel strip and
//!    starts it on the output (`on_start`)
//! 3. On completion or stop: `on_end`, resolve the ticket, release the channel,
//!    then promote waiting items onto idle channels

use super::graph::{render_voice, OutputGraph, StripSettings};
use super::item::{Payload, PlaybackItem, PlaybackOutcome, PlaybackRequest, PlaybackTicket};
use super::output::{AudioOutput, MeterSnapshot};
use super::queue::ChannelQueue;
use crate::audio::decode_payload;
use crate::config::{PreemptionMode, VoiceConfig};
use crate::error::{Error, Result};
use crate::scheduler::{AllocationRequest, ChannelScheduler, LoadBalanceStats};
use crate::state::SharedState;
use chrono::Utc;
use parlor_common::{Channel, ParticipantId, Priority, VoiceEvent};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Item currently holding a channel
struct ActiveSlot {
    item_id: Uuid,
    stop: CancellationToken,
}

/// Item cleared to start, launched once the lock is released
struct Launch {
    channel: Channel,
    item: PlaybackItem,
    stop: CancellationToken,
}

struct EngineState {
    scheduler: ChannelScheduler,
    graph: OutputGraph,
    slots: HashMap<Channel, ActiveSlot>,
    queues: HashMap<Channel, ChannelQueue>,
}

impl EngineState {
    fn reserve(&mut self, channel: Channel, item: PlaybackItem) -> Launch {
        let stop = CancellationToken::new();
        self.slots.insert(
            channel,
            ActiveSlot {
                item_id: item.id,
                stop: stop.clone(),
            },
        );
        Launch {
            channel,
            item,
            stop,
        }
    }

    /// Promote waiting items onto idle channels while the scheduler allows
    fn drain(&mut self) -> Vec<Launch> {
        let mut launches = Vec::new();

        // System channel ignores the participant ceiling
        if !self.slots.contains_key(&Channel::System) {
            let head = self.queues.get(&Channel::System).and_then(|q| q.head());
            if let Some(head) = head {
                if self
                    .scheduler
                    .promote(Channel::System, None, head.priority, !head.granted)
                {
                    if let Some(entry) = self.queues.get_mut(&Channel::System).and_then(|q| q.pop()) {
                        launches.push(self.reserve(Channel::System, entry.item));
                    }
                }
            }
        }

        // Participant channels: best waiting head first
        loop {
            let best = self
                .queues
                .iter()
                .filter(|(channel, _)| !channel.is_system() && !self.slots.contains_key(*channel))
                .filter_map(|(channel, queue)| queue.head().map(|head| (*channel, head)))
                .min_by_key(|(_, head)| (!head.granted, Reverse(head.priority), head.seq));

            let Some((channel, head)) = best else {
                break;
            };

            if !self
                .scheduler
                .promote(channel, head.participant_id, head.priority, !head.granted)
            {
                // Ceiling reached; nothing else can start either
                break;
            }

            match self.queues.get_mut(&channel).and_then(|q| q.pop()) {
                Some(entry) => launches.push(self.reserve(channel, entry.item)),
                None => break,
            }
        }

        launches
    }
}

/// Per-channel statistics
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub channel: Channel,
    pub active: bool,
    pub active_item: Option<Uuid>,
    pub occupant: Option<ParticipantId>,
    pub priority: Priority,
    pub queued: usize,
    pub usage_count: u64,
    pub strip: Option<StripSettings>,
}

/// Engine statistics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub enabled: bool,
    pub master_volume: f32,
    pub ceiling: usize,
    pub active_participants: usize,
    pub total_participants: usize,
    pub channels: Vec<ChannelStats>,
    pub load: LoadBalanceStats,
    pub meter: MeterSnapshot,
}

struct EngineInner {
    state: Mutex<EngineState>,
    enabled: AtomicBool,
    preemption: PreemptionMode,
    output: Arc<dyn AudioOutput>,
    shared: Arc<SharedState>,
    next_seq: AtomicU64,
}

/// Audio playback engine
///
/// Cheap to clone; clones share the same channels and queues.
#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Arc<EngineInner>,
}

impl PlaybackEngine {
    pub fn new(config: &VoiceConfig, output: Arc<dyn AudioOutput>, shared: Arc<SharedState>) -> Self {
        let scheduler = ChannelScheduler::new(
            config.participant_channels,
            config.concurrency_ceiling,
            config.total_participants,
        );

        info!(
            "Playback engine: {} participant channels, ceiling {}, preemption {:?}",
            scheduler.pool_size(),
            scheduler.ceiling(),
            config.system_preemption
        );

        let state = EngineState {
            scheduler,
            graph: OutputGraph::new(config),
            slots: HashMap::new(),
            queues: HashMap::new(),
        };

        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(state),
                enabled: AtomicBool::new(config.enabled),
                preemption: config.system_preemption,
                output,
                shared,
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================
    // Play
    // ========================================

    /// Allocate a channel and play now, or queue behind the channel's current item
    ///
    /// Fails fast with `Error::ServiceDisabled` when the engine is disabled;
    /// the scheduler is not consulted and no callback fires.
    pub fn play(&self, request: PlaybackRequest) -> Result<PlaybackTicket> {
        if !self.is_enabled() {
            return Err(Error::ServiceDisabled);
        }

        let allocation_request = AllocationRequest {
            usage: request.usage,
            participant_id: request.participant_id,
            priority: request.priority,
            total_participants: request.total_participants,
        };

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let item = PlaybackItem::new(request, seq, tx);
        let item_id = item.id;
        let priority = item.priority;
        let label = item.label.clone();

        let (allocation, launch, waiting_position) = {
            let mut state = self.lock();
            let allocation = state.scheduler.allocate(&allocation_request);
            let channel = allocation.channel;

            if !allocation.queued && !state.slots.contains_key(&channel) {
                let launch = state.reserve(channel, item);
                (allocation, Some(launch), None)
            } else {
                let granted = !allocation.queued;
                if granted && self.inner.preemption == PreemptionMode::Interrupt {
                    if let Some(slot) = state.slots.get(&channel) {
                        debug!("Interrupting item {} on channel {}", slot.item_id, channel);
                        slot.stop.cancel();
                    }
                }

                let local_position = state.queues.entry(channel).or_default().push(item, granted);
                let position = allocation.queue_position.unwrap_or(local_position);
                (allocation, None, Some(position))
            }
        };

        match waiting_position {
            Some(position) => {
                debug!(
                    "Queued item {} '{}' on channel {} at position {} ({})",
                    item_id, label, allocation.channel, position, allocation.reason
                );
                self.inner.shared.broadcast_event(VoiceEvent::ItemQueued {
                    item_id,
                    channel: allocation.channel,
                    priority,
                    position: Some(position),
                    timestamp: Utc::now(),
                });
            }
            None => {
                debug!(
                    "Starting item {} '{}' on channel {} ({})",
                    item_id, label, allocation.channel, allocation.reason
                );
            }
        }

        if let Some(launch) = launch {
            self.launch(launch);
        }

        Ok(PlaybackTicket::new(item_id, allocation, rx))
    }

    fn launch(&self, launch: Launch) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_item(launch).await;
        });
    }

    async fn run_item(self, launch: Launch) {
        let Launch {
            channel,
            mut item,
            stop,
        } = launch;
        let item_id = item.id;

        match self.perform(channel, &mut item, &stop).await {
            Ok(outcome) => {
                item.callbacks.fire_end();
                item.resolve(Ok(outcome));
                self.inner.shared.broadcast_event(VoiceEvent::PlaybackFinished {
                    item_id,
                    channel,
                    completed: outcome == PlaybackOutcome::Completed,
                    timestamp: Utc::now(),
                });
            }
            Err(err) => {
                warn!("Item {} on channel {} failed: {}", item_id, channel, err);
                self.inner.shared.broadcast_event(VoiceEvent::PlaybackFailed {
                    item_id,
                    channel,
                    reason: err.to_string(),
                    timestamp: Utc::now(),
                });
                item.fail(err);
            }
        }

        self.complete(channel, item_id);
    }

    /// Decode, render and play one item until it ends or is stopped
    async fn perform(
        &self,
        channel: Channel,
        item: &mut PlaybackItem,
        stop: &CancellationToken,
    ) -> Result<PlaybackOutcome> {
        let payload = std::mem::replace(&mut item.payload, Payload::Pcm(Default::default()));
        let audio = match payload {
            Payload::Encoded(bytes) => decode_payload(&bytes)?,
            Payload::Pcm(audio) => audio,
        };

        if stop.is_cancelled() {
            return Err(Error::Interrupted(channel));
        }

        let gains = self.lock().graph.gains(channel, item.volume);
        let voice = render_voice(channel, &audio, gains);
        let mut handle = self.inner.output.start(voice)?;

        item.callbacks.fire_start();
        self.inner.shared.broadcast_event(VoiceEvent::PlaybackStarted {
            item_id: item.id,
            channel,
            participant_id: item.participant_id,
            timestamp: Utc::now(),
        });

        let voice_stop = handle.stop_token();
        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                voice_stop.cancel();
                Ok(PlaybackOutcome::Stopped)
            }
            _ = handle.wait() => Ok(PlaybackOutcome::Completed),
        }
    }

    /// Free the channel held by `item_id` and start whatever may start next
    fn complete(&self, channel: Channel, item_id: Uuid) {
        let launches = {
            let mut state = self.lock();
            let holds_slot = state
                .slots
                .get(&channel)
                .map(|slot| slot.item_id == item_id)
                .unwrap_or(false);
            if holds_slot {
                state.slots.remove(&channel);
                state.scheduler.release(channel, None);
            }
            state.drain()
        };

        for launch in launches {
            debug!(
                "Starting queued item {} on channel {}",
                launch.item.id, launch.channel
            );
            self.launch(launch);
        }
    }

    fn drain_and_launch(&self) {
        let launches = self.lock().drain();
        for launch in launches {
            self.launch(launch);
        }
    }

    // ========================================
    // Stop
    // ========================================

    /// Stop the active item and reject everything queued on `channel`
    ///
    /// Idempotent; the stopped active item ends with `on_end` and
    /// `PlaybackOutcome::Stopped`, queued items get `on_error` with
    /// `Error::Interrupted`.
    pub fn stop_channel(&self, channel: Channel) {
        let evicted = {
            let mut state = self.lock();
            if let Some(slot) = state.slots.get(&channel) {
                slot.stop.cancel();
            }

            let evicted = state
                .queues
                .get_mut(&channel)
                .map(|queue| queue.take_all())
                .unwrap_or_default();
            let counted = evicted.iter().filter(|entry| !entry.granted).count();
            state.scheduler.cancel_queued(channel, counted);
            evicted
        };

        if !evicted.is_empty() {
            info!("Evicted {} queued items from channel {}", evicted.len(), channel);
        }

        for entry in evicted {
            let mut item = entry.item;
            self.inner.shared.broadcast_event(VoiceEvent::PlaybackFailed {
                item_id: item.id,
                channel,
                reason: Error::Interrupted(channel).to_string(),
                timestamp: Utc::now(),
            });
            item.fail(Error::Interrupted(channel));
        }
    }

    /// `stop_channel` on every channel
    pub fn stop_all(&self) {
        for channel in self.channels() {
            self.stop_channel(channel);
        }
    }

    // ========================================
    // Configuration
    // ========================================

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable the engine; disabling stops everything
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.inner.enabled.swap(enabled, Ordering::SeqCst);
        if previous == enabled {
            return;
        }

        info!("Voice playback {}", if enabled { "enabled" } else { "disabled" });
        if !enabled {
            self.stop_all();
        }
        self.inner.shared.broadcast_event(VoiceEvent::EnabledChanged {
            enabled,
            timestamp: Utc::now(),
        });
    }

    /// Set the master volume; returns the clamped value
    pub fn set_master_volume(&self, volume: f32) -> f32 {
        let volume = self.lock().graph.set_master_volume(volume);
        self.inner.shared.broadcast_event(VoiceEvent::VolumeChanged {
            volume,
            timestamp: Utc::now(),
        });
        volume
    }

    pub fn master_volume(&self) -> f32 {
        self.lock().graph.master_volume()
    }

    pub fn set_channel_volume(&self, channel: Channel, volume: f32) -> Result<f32> {
        self.lock()
            .graph
            .set_channel_volume(channel, volume)
            .ok_or_else(|| Error::BadRequest(format!("Unknown channel: {}", channel)))
    }

    pub fn set_channel_pan(&self, channel: Channel, pan: f32) -> Result<f32> {
        self.lock()
            .graph
            .set_channel_pan(channel, pan)
            .ok_or_else(|| Error::BadRequest(format!("Unknown channel: {}", channel)))
    }

    /// Fix the participant ceiling; returns the clamped value
    pub fn set_concurrency_ceiling(&self, ceiling: usize) -> usize {
        let ceiling = self.lock().scheduler.set_concurrency_ceiling(ceiling);
        self.drain_and_launch();
        ceiling
    }

    /// Derive the ceiling from the participant count
    pub fn use_derived_ceiling(&self) -> usize {
        let ceiling = self.lock().scheduler.use_derived_ceiling();
        self.drain_and_launch();
        ceiling
    }

    /// Record the participant count; returns the resulting ceiling
    pub fn update_total_participants(&self, total: usize) -> usize {
        let ceiling = self.lock().scheduler.update_total_participants(total);
        self.drain_and_launch();
        ceiling
    }

    // ========================================
    // Queries
    // ========================================

    pub fn channels(&self) -> Vec<Channel> {
        self.lock().scheduler.channels()
    }

    pub fn preferred_channel(&self, participant_id: ParticipantId) -> Channel {
        self.lock().scheduler.preferred_channel(participant_id)
    }

    pub fn is_channel_active(&self, channel: Channel) -> bool {
        self.lock().slots.contains_key(&channel)
    }

    pub fn queue_length(&self, channel: Channel) -> usize {
        self.lock()
            .queues
            .get(&channel)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> EngineStats {
        let meter = self.inner.output.meter();
        let state = self.lock();
        let scheduler_stats = state.scheduler.stats();

        let channels = scheduler_stats
            .channels
            .iter()
            .map(|snapshot| ChannelStats {
                channel: snapshot.channel,
                active: snapshot.is_active,
                active_item: state.slots.get(&snapshot.channel).map(|slot| slot.item_id),
                occupant: snapshot.occupant,
                priority: snapshot.priority,
                queued: state
                    .queues
                    .get(&snapshot.channel)
                    .map(|queue| queue.len())
                    .unwrap_or(0),
                usage_count: snapshot.usage_count,
                strip: state.graph.strip(snapshot.channel),
            })
            .collect();

        EngineStats {
            enabled: self.is_enabled(),
            master_volume: state.graph.master_volume(),
            ceiling: scheduler_stats.ceiling,
            active_participants: scheduler_stats.active_participants,
            total_participants: scheduler_stats.total_participants,
            channels,
            load: scheduler_stats.load,
            meter,
        }
    }
}
