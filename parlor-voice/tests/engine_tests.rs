//! Playback engine integration tests
//!
//! Queue draining, callback ordering and failure surfacing through
//! `on_error`, using the clocked output under a paused tokio clock.

mod helpers;

use helpers::{wav_bytes, Recorder};
use parlor_common::{Channel, Priority, VoiceEvent};
use parlor_voice::config::VoiceConfig;
use parlor_voice::error::Error;
use parlor_voice::playback::{
    AudioOutput, ClockedOutput, MeterSnapshot, Payload, PlaybackEngine, PlaybackOutcome,
    PlaybackRequest, RenderedVoice, VoiceHandle,
};
use parlor_voice::scheduler::AllocationReason;
use parlor_voice::state::SharedState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn engine_with(config: VoiceConfig) -> (PlaybackEngine, Arc<SharedState>) {
    let state = Arc::new(SharedState::new());
    let engine = PlaybackEngine::new(&config, Arc::new(ClockedOutput::new()), state.clone());
    (engine, state)
}

fn wav(duration_ms: u32) -> Payload {
    Payload::Encoded(Arc::from(wav_bytes(duration_ms)))
}

/// Output whose device is gone
struct BrokenOutput;

impl AudioOutput for BrokenOutput {
    fn start(&self, _voice: RenderedVoice) -> parlor_voice::Result<VoiceHandle> {
        Err(Error::PlaybackStart("device unavailable".to_string()))
    }

    fn meter(&self) -> MeterSnapshot {
        MeterSnapshot {
            voices_started: 0,
            active_voices: 0,
            peak: 0.0,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_sticky_queue_starts_without_new_trigger() {
    let (engine, _) = engine_with(VoiceConfig::default());

    let first = engine
        .play(PlaybackRequest::participant(2, wav(500), Priority::AMBIENT))
        .unwrap();
    let second = engine
        .play(PlaybackRequest::participant(2, wav(500), Priority::AMBIENT))
        .unwrap();

    let channel = first.allocation.channel;
    assert!(!first.allocation.queued);
    assert_eq!(second.allocation.channel, channel);
    assert!(second.allocation.queued);
    assert_eq!(second.allocation.queue_position, Some(1));
    assert_eq!(second.allocation.reason, AllocationReason::StickyQueue);
    assert_eq!(engine.queue_length(channel), 1);

    let started = Instant::now();
    assert_eq!(first.wait().await.unwrap(), PlaybackOutcome::Completed);
    assert_eq!(second.wait().await.unwrap(), PlaybackOutcome::Completed);

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1000));
    assert!(elapsed < Duration::from_millis(1100));
    assert_eq!(engine.queue_length(channel), 0);
}

#[tokio::test(start_paused = true)]
async fn test_callbacks_fire_in_order() {
    let (engine, _) = engine_with(VoiceConfig::default());
    let recorder = Recorder::new();

    let ticket = engine
        .play(
            PlaybackRequest::system(wav(200), Priority::SYSTEM)
                .with_callbacks(recorder.callbacks("announce")),
        )
        .unwrap();

    assert_eq!(ticket.wait().await.unwrap(), PlaybackOutcome::Completed);
    assert_eq!(recorder.events(), vec!["announce:start", "announce:end"]);
}

#[tokio::test(start_paused = true)]
async fn test_queue_drains_by_priority_then_arrival() {
    let (engine, _) = engine_with(VoiceConfig::default());
    let recorder = Recorder::new();

    let play = |tag: &str, priority: Priority| {
        engine
            .play(
                PlaybackRequest::participant(1, wav(100), priority)
                    .with_callbacks(recorder.callbacks(tag)),
            )
            .unwrap()
    };

    let _first = play("first", Priority::AMBIENT);
    let _ambient = play("ambient", Priority::AMBIENT);
    let _tactical = play("tactical", Priority::TACTICAL);
    let _adversarial = play("adversarial", Priority::ADVERSARIAL);
    let late = play("late", Priority::AMBIENT);

    late.wait().await.unwrap();

    let starts: Vec<String> = recorder
        .events()
        .into_iter()
        .filter(|event| event.ends_with(":start"))
        .collect();
    assert_eq!(
        starts,
        vec![
            "first:start",
            "adversarial:start",
            "tactical:start",
            "ambient:start",
            "late:start"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_decode_failure_surfaces_through_on_error() {
    let (engine, state) = engine_with(VoiceConfig::default());
    let mut events = state.subscribe_events();
    let recorder = Recorder::new();

    let ticket = engine
        .play(
            PlaybackRequest::system(Payload::Encoded(Arc::from(&b"not audio at all"[..])), Priority::SYSTEM)
                .with_callbacks(recorder.callbacks("garbage")),
        )
        .unwrap();

    assert!(matches!(ticket.wait().await, Err(Error::Decode(_))));

    let log = recorder.events();
    assert_eq!(log.len(), 1);
    assert!(log[0].starts_with("garbage:error:Audio decode error"));

    tokio::task::yield_now().await;
    assert!(!engine.is_channel_active(Channel::System));

    let mut saw_failed = false;
    while let Ok(event) = events.try_recv() {
        if let VoiceEvent::PlaybackFailed { channel, .. } = event {
            assert_eq!(channel, Channel::System);
            saw_failed = true;
        }
    }
    assert!(saw_failed);

    // Channel is usable again
    let next = engine
        .play(PlaybackRequest::system(wav(50), Priority::SYSTEM))
        .unwrap();
    assert!(!next.allocation.queued);
    assert_eq!(next.wait().await.unwrap(), PlaybackOutcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_output_failure_surfaces_as_playback_start() {
    let state = Arc::new(SharedState::new());
    let engine = PlaybackEngine::new(&VoiceConfig::default(), Arc::new(BrokenOutput), state);
    let recorder = Recorder::new();

    let ticket = engine
        .play(
            PlaybackRequest::participant(7, wav(100), Priority::TACTICAL)
                .with_callbacks(recorder.callbacks("signal")),
        )
        .unwrap();
    let channel = ticket.allocation.channel;

    assert!(matches!(ticket.wait().await, Err(Error::PlaybackStart(_))));
    assert_eq!(recorder.events().len(), 1);
    assert!(recorder.events()[0].starts_with("signal:error:Playback start failed"));

    tokio::task::yield_now().await;
    assert!(!engine.is_channel_active(channel));
    assert_eq!(engine.stats().active_participants, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_channel_stops_active_and_interrupts_queued() {
    let (engine, _) = engine_with(VoiceConfig::default());
    let recorder = Recorder::new();

    let active = engine
        .play(
            PlaybackRequest::participant(3, wav(5_000), Priority::AMBIENT)
                .with_callbacks(recorder.callbacks("active")),
        )
        .unwrap();
    let queued_a = engine
        .play(
            PlaybackRequest::participant(3, wav(100), Priority::AMBIENT)
                .with_callbacks(recorder.callbacks("queued-a")),
        )
        .unwrap();
    let queued_b = engine
        .play(
            PlaybackRequest::participant(3, wav(100), Priority::TACTICAL)
                .with_callbacks(recorder.callbacks("queued-b")),
        )
        .unwrap();
    let channel = active.allocation.channel;

    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.stop_channel(channel);
    // Idempotent
    engine.stop_channel(channel);

    assert!(matches!(queued_a.wait().await, Err(Error::Interrupted(c)) if c == channel));
    assert!(matches!(queued_b.wait().await, Err(Error::Interrupted(c)) if c == channel));
    assert_eq!(active.wait().await.unwrap(), PlaybackOutcome::Stopped);

    let log = recorder.events();
    assert!(log.contains(&"active:start".to_string()));
    assert!(log.contains(&"active:end".to_string()));
    assert!(log.iter().any(|e| e.starts_with("queued-a:error:Interrupted")));
    assert!(log.iter().any(|e| e.starts_with("queued-b:error:Interrupted")));
    assert!(!log.iter().any(|e| e.starts_with("queued-a:start")));

    tokio::task::yield_now().await;
    assert!(!engine.is_channel_active(channel));
    assert_eq!(engine.queue_length(channel), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ceiling_holds_while_queue_drains() {
    let (engine, _) = engine_with(VoiceConfig {
        concurrency_ceiling: Some(2),
        ..Default::default()
    });

    let tickets: Vec<_> = (0..5)
        .map(|id| {
            engine
                .play(PlaybackRequest::participant(id, wav(300), Priority::AMBIENT))
                .unwrap()
        })
        .collect();

    assert_eq!(tickets.iter().filter(|t| !t.allocation.queued).count(), 2);
    assert!(engine.stats().active_participants <= 2);

    for ticket in tickets {
        assert_eq!(ticket.wait().await.unwrap(), PlaybackOutcome::Completed);
        assert!(engine.stats().active_participants <= 2);
    }

    tokio::task::yield_now().await;
    assert_eq!(engine.stats().active_participants, 0);
}

#[tokio::test(start_paused = true)]
async fn test_disable_stops_everything_and_rejects_new_work() {
    let (engine, state) = engine_with(VoiceConfig::default());
    let mut events = state.subscribe_events();

    let playing = engine
        .play(PlaybackRequest::system(wav(5_000), Priority::SYSTEM))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    engine.set_enabled(false);
    assert_eq!(playing.wait().await.unwrap(), PlaybackOutcome::Stopped);
    assert!(matches!(
        engine.play(PlaybackRequest::system(wav(10), Priority::SYSTEM)),
        Err(Error::ServiceDisabled)
    ));

    let mut saw_disabled = false;
    while let Ok(event) = events.try_recv() {
        if let VoiceEvent::EnabledChanged { enabled, .. } = event {
            assert!(!enabled);
            saw_disabled = true;
        }
    }
    assert!(saw_disabled);
}

#[tokio::test]
async fn test_mix_controls_clamp_and_reject_unknown_channels() {
    let (engine, _) = engine_with(VoiceConfig {
        participant_channels: 7,
        ..Default::default()
    });

    assert_eq!(engine.set_master_volume(1.5), 1.0);
    assert_eq!(engine.master_volume(), 1.0);
    assert_eq!(engine.set_channel_volume(Channel::participant(0), -0.5).unwrap(), 0.0);
    assert_eq!(engine.set_channel_pan(Channel::System, 2.0).unwrap(), 1.0);
    assert!(matches!(
        engine.set_channel_volume(Channel::participant(7), 0.5),
        Err(Error::BadRequest(_))
    ));
    assert_eq!(engine.channels().len(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_stats_report_usage_and_meter() {
    let (engine, _) = engine_with(VoiceConfig::default());

    for id in 0..3 {
        engine
            .play(PlaybackRequest::participant(id, wav(100), Priority::AMBIENT))
            .unwrap()
            .wait()
            .await
            .unwrap();
    }

    let stats = engine.stats();
    assert_eq!(stats.channels[0].channel, Channel::System);
    assert_eq!(stats.meter.voices_started, 3);
    assert!(stats.meter.peak > 0.0);
    assert_eq!(stats.load.min_usage, 0);
    assert_eq!(stats.load.max_usage, 1);
    // Load balancing spreads sequential requests over distinct channels
    let used = stats.channels.iter().filter(|c| c.usage_count == 1).count();
    assert_eq!(used, 3);
}
