//! Shared fixtures for parlor-voice integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parlor_voice::error::{Error, Result};
use parlor_voice::synthesis::{SynthesisBackend, SynthesisRequest};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mono 16-bit WAV of silence-ish tone lasting `duration_ms`
pub fn wav_bytes(duration_ms: u32) -> Vec<u8> {
    let sample_rate = 16_000u32;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let frames = sample_rate * duration_ms / 1000;
        for i in 0..frames {
            let sample = if i % 32 < 16 { 4_000i16 } else { -4_000i16 };
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

// ============================================================================
// Scripted synthesis backend
// ============================================================================

/// In-process backend whose health, output and latency are set by the test
pub struct ScriptedBackend {
    healthy: AtomicBool,
    fail: AtomicBool,
    audio: Mutex<Vec<u8>>,
    delay: Mutex<Duration>,
    health_delay: Mutex<Duration>,
    pub health_checks: AtomicUsize,
    pub synth_calls: AtomicUsize,
    pub last_request: Mutex<Option<SynthesisRequest>>,
}

impl ScriptedBackend {
    /// Healthy backend answering instantly with a 100 ms WAV
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            audio: Mutex::new(wav_bytes(100)),
            delay: Mutex::new(Duration::ZERO),
            health_delay: Mutex::new(Duration::ZERO),
            health_checks: AtomicUsize::new(0),
            synth_calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        })
    }

    pub fn unhealthy() -> Arc<Self> {
        let backend = Self::healthy();
        backend.set_healthy(false);
        backend
    }

    /// Healthy backend whose synthesis takes `delay`
    pub fn slow(delay: Duration) -> Arc<Self> {
        let backend = Self::healthy();
        *backend.delay.lock().unwrap() = delay;
        backend
    }

    /// Backend whose health probe takes `delay` before answering healthy
    pub fn slow_health(delay: Duration) -> Arc<Self> {
        let backend = Self::healthy();
        backend.set_health_delay(delay);
        backend
    }

    pub fn set_health_delay(&self, delay: Duration) {
        *self.health_delay.lock().unwrap() = delay;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_audio(&self, audio: Vec<u8>) {
        *self.audio.lock().unwrap() = audio;
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    pub fn synth_calls(&self) -> usize {
        self.synth_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SynthesisBackend for ScriptedBackend {
    async fn check_health(&self) -> Result<bool> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);

        let delay = *self.health_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.healthy.load(Ordering::SeqCst))
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        self.synth_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Backend("scripted failure".to_string()));
        }
        Ok(self.audio.lock().unwrap().clone())
    }
}

// ============================================================================
// Callback recorder
// ============================================================================

/// Ordered log of lifecycle events, shared between callbacks
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Callbacks that log `<tag>:start`, `<tag>:end` and `<tag>:error`
    pub fn callbacks(&self, tag: &str) -> parlor_voice::playback::PlaybackCallbacks {
        let start = (self.clone(), format!("{}:start", tag));
        let end = (self.clone(), format!("{}:end", tag));
        let error = (self.clone(), tag.to_string());
        parlor_voice::playback::PlaybackCallbacks::new()
            .on_start(move || start.0.push(start.1))
            .on_end(move || end.0.push(end.1))
            .on_error(move |e| error.0.push(format!("{}:error:{}", error.1, e)))
    }
}

// ============================================================================
// Mock HTTP synthesis server
// ============================================================================

/// Serve `/health` and `/synthesize` on an ephemeral port; returns the base URL
pub async fn spawn_mock_backend(health_status: &'static str, audio: Vec<u8>) -> String {
    use axum::{
        routing::{get, post},
        Json, Router,
    };

    let audio = Arc::new(audio);
    let app = Router::new()
        .route(
            "/health",
            get(move || async move { Json(serde_json::json!({ "status": health_status })) }),
        )
        .route(
            "/synthesize",
            post(move |Json(body): Json<serde_json::Value>| {
                let audio = Arc::clone(&audio);
                async move {
                    if body.get("text").and_then(|t| t.as_str()).unwrap_or("").is_empty() {
                        return (axum::http::StatusCode::BAD_REQUEST, Vec::new());
                    }
                    (axum::http::StatusCode::OK, audio.as_ref().clone())
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}
