//! Voice context integration tests
//!
//! End-to-end speech: synthesis, `on_audio_generated`, playback and the
//! failure contract that keeps the caller's flow moving.

mod helpers;

use helpers::{spawn_mock_backend, wav_bytes, Recorder, ScriptedBackend};
use parlor_common::{Channel, Priority};
use parlor_voice::config::VoiceConfig;
use parlor_voice::error::Error;
use parlor_voice::playback::PlaybackOutcome;
use parlor_voice::synthesis::BackendDescriptor;
use parlor_voice::{SpeakOptions, SpeakOutcome, VoiceContext, VoiceParams};
use std::time::Duration;
use tokio::time::Instant;

fn context() -> VoiceContext {
    VoiceContext::new(VoiceConfig::default()).unwrap()
}

fn traced(options: SpeakOptions, recorder: &Recorder, tag: &str) -> SpeakOptions {
    let generated = recorder.clone();
    let tag_owned = tag.to_string();
    options
        .with_callbacks(recorder.callbacks(tag))
        .on_audio_generated(move |audio| {
            let what = if audio.is_some() { "some" } else { "none" };
            generated.push(format!("{}:generated:{}", tag_owned, what));
        })
}

#[tokio::test(start_paused = true)]
async fn test_speak_plays_synthesized_audio() {
    let voice = context();
    let backend = ScriptedBackend::healthy();
    voice.register_backend_with(BackendDescriptor::new("scripted", 1, ""), backend.clone());
    let recorder = Recorder::new();

    let outcome = voice
        .speak("east wind round", traced(SpeakOptions::system(Priority::SYSTEM), &recorder, "round"))
        .await
        .unwrap();

    assert_eq!(outcome, SpeakOutcome::Played(PlaybackOutcome::Completed));
    assert_eq!(
        recorder.events(),
        vec!["round:generated:some", "round:start", "round:end"]
    );
    assert_eq!(backend.synth_calls(), 1);

    let stats = voice.stats();
    assert_eq!(stats.speak_requests, 1);
    assert_eq!(stats.synthesis_failures, 0);
    assert_eq!(stats.cache.entries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_all_backends_unhealthy_still_unblocks_caller() {
    let voice = context();
    for (id, priority) in [("a", 1), ("b", 2), ("c", 3)] {
        voice.register_backend_with(BackendDescriptor::new(id, priority, ""), ScriptedBackend::unhealthy());
    }
    let recorder = Recorder::new();

    let started = Instant::now();
    let outcome = voice
        .speak("anyone there", traced(SpeakOptions::participant(4, Priority::AMBIENT), &recorder, "chat"))
        .await
        .unwrap();

    assert_eq!(outcome, SpeakOutcome::NoAudio);
    assert!(started.elapsed() <= Duration::from_secs(10));

    let log = recorder.events();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0], "chat:generated:none");
    assert!(log[1].starts_with("chat:error:Backend unhealthy"));
    assert_eq!(voice.stats().synthesis_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_backends_report_timeout_to_on_error() {
    let voice = context();
    for (id, priority) in [("a", 1), ("b", 2)] {
        voice.register_backend_with(
            BackendDescriptor::new(id, priority, ""),
            ScriptedBackend::slow(Duration::from_secs(60)),
        );
    }
    let recorder = Recorder::new();

    let started = Instant::now();
    let outcome = voice
        .speak("still waiting", traced(SpeakOptions::participant(2, Priority::AMBIENT), &recorder, "late"))
        .await
        .unwrap();

    assert_eq!(outcome, SpeakOutcome::NoAudio);
    assert!(started.elapsed() <= Duration::from_millis(10_050));

    let log = recorder.events();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0], "late:generated:none");
    assert!(log[1].starts_with("late:error:Synthesis timed out after"));
}

#[tokio::test]
async fn test_disabled_service_fails_fast_without_backend_calls() {
    let voice = VoiceContext::new(VoiceConfig {
        enabled: false,
        ..Default::default()
    })
    .unwrap();
    let backend = ScriptedBackend::healthy();
    voice.register_backend_with(BackendDescriptor::new("scripted", 1, ""), backend.clone());
    let recorder = Recorder::new();

    let result = voice
        .speak("hello", traced(SpeakOptions::system(Priority::SYSTEM), &recorder, "x"))
        .await;

    assert!(matches!(result, Err(Error::ServiceDisabled)));
    assert_eq!(backend.health_checks(), 0);
    assert_eq!(backend.synth_calls(), 0);
    assert!(recorder.events().is_empty());
    assert_eq!(voice.stats().speak_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_participant_speech_uses_preferred_channel_cache_slot() {
    let voice = context();
    let backend = ScriptedBackend::healthy();
    voice.register_backend_with(BackendDescriptor::new("scripted", 1, ""), backend.clone());

    let options = || SpeakOptions::participant(9, Priority::TACTICAL);
    voice.speak("pon", options()).await.unwrap();
    voice.speak("pon", options()).await.unwrap();

    // Second request reused the cached audio
    assert_eq!(backend.synth_calls(), 1);
    assert_eq!(voice.stats().cache.hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_voice_params_reach_backend() {
    let voice = context();
    let backend = ScriptedBackend::healthy();
    voice.register_backend_with(BackendDescriptor::new("scripted", 1, ""), backend.clone());

    let params = VoiceParams {
        lang: Some("en".to_string()),
        speaker: Some("dealer".to_string()),
        speed: Some(0.9),
        volume: 0.5,
    };
    voice
        .speak("shuffle", SpeakOptions::system(Priority::SYSTEM).with_voice(params))
        .await
        .unwrap();

    let request = backend.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(request.lang, "en");
    assert_eq!(request.speaker.as_deref(), Some("dealer"));
}

#[tokio::test(start_paused = true)]
async fn test_play_prerendered_bypasses_synthesis() {
    let voice = context();
    let backend = ScriptedBackend::healthy();
    voice.register_backend_with(BackendDescriptor::new("scripted", 1, ""), backend.clone());

    let outcome = voice
        .play_prerendered(wav_bytes(150), SpeakOptions::participant(1, Priority::AMBIENT))
        .await
        .unwrap();

    assert_eq!(outcome, PlaybackOutcome::Completed);
    assert_eq!(backend.synth_calls(), 0);
    assert_eq!(voice.stats().playback.meter.voices_started, 1);
}

#[tokio::test]
async fn test_ceiling_controls() {
    let voice = context();

    assert_eq!(voice.set_concurrency_ceiling(2), 2);
    // Fixed ceiling ignores participant-count updates
    assert_eq!(voice.update_total_participants(8), 2);

    // 0 switches back to the derived ceiling
    assert_eq!(voice.set_concurrency_ceiling(0), 5);
    assert_eq!(voice.update_total_participants(2), 2);
    assert_eq!(voice.stats().playback.ceiling, 2);
}

#[tokio::test]
async fn test_speak_through_http_backend() {
    let url = spawn_mock_backend("ok", wav_bytes(100)).await;
    let voice = VoiceContext::new(VoiceConfig {
        backends: vec![BackendDescriptor::new("mock", 1, url)],
        ..Default::default()
    })
    .unwrap();

    let outcome = voice
        .speak("tenpai", SpeakOptions::system(Priority::SYSTEM))
        .await
        .unwrap();
    assert_eq!(outcome, SpeakOutcome::Played(PlaybackOutcome::Completed));

    let backends = voice.pipeline().backends();
    assert_eq!(backends.len(), 1);
    assert_eq!(backends[0].descriptor.id, "mock");
}

#[tokio::test]
async fn test_stop_all_through_context() {
    let voice = context();
    voice.register_backend_with(BackendDescriptor::new("scripted", 1, ""), ScriptedBackend::healthy());

    let speaker = voice.clone();
    let long_audio = wav_bytes(5_000);
    let handle = tokio::spawn(async move {
        speaker
            .play_prerendered(long_audio, SpeakOptions::system(Priority::SYSTEM))
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(voice.engine().is_channel_active(Channel::System));
    voice.stop_all();

    assert_eq!(handle.await.unwrap().unwrap(), PlaybackOutcome::Stopped);
}
