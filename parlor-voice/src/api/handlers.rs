//! HTTP request handlers

use crate::api::server::AppContext;
use crate::context::{SpeakOptions, SpeakOutcome, VoiceParams, VoiceStats};
use crate::error::Error;
use crate::synthesis::{BackendDescriptor, BackendStatus};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use parlor_common::{Channel, ParticipantId, Priority};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

type HandlerError = (StatusCode, Json<StatusResponse>);

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    pub text: String,
    pub channel: Option<Channel>,
    pub participant_id: Option<ParticipantId>,
    pub priority: Option<u8>,
    #[serde(default)]
    pub voice: VoiceParams,
    pub total_participants: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SpeakAccepted {
    status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VolumeRequest {
    pub volume: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VolumeResponse {
    pub volume: f32,
}

#[derive(Debug, Deserialize)]
pub struct ChannelMixRequest {
    pub volume: Option<f32>,
    pub pan: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct ChannelMixResponse {
    channel: Channel,
    volume: Option<f32>,
    pan: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct CeilingRequest {
    /// 0 derives the ceiling from the participant count
    pub ceiling: usize,
}

#[derive(Debug, Deserialize)]
pub struct ParticipantsRequest {
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CeilingResponse {
    pub ceiling: usize,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> HandlerError {
    (
        status,
        Json(StatusResponse {
            status: format!("error: {}", message.into()),
        }),
    )
}

fn ok_response() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
    })
}

fn parse_channel(raw: &str) -> Result<Channel, HandlerError> {
    raw.parse::<Channel>()
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "parlor-voice".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Speech
// ============================================================================

/// POST /speak - Synthesize and play text
///
/// Fire-and-forget: returns 202 once the request is accepted; playback
/// progress is reported on the event stream.
pub async fn speak(
    State(ctx): State<AppContext>,
    Json(req): Json<SpeakRequest>,
) -> Result<(StatusCode, Json<SpeakAccepted>), HandlerError> {
    if req.text.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "text is empty"));
    }
    if !ctx.voice.is_enabled() {
        return Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            Error::ServiceDisabled.to_string(),
        ));
    }

    let default_priority = match req.channel {
        Some(Channel::System) => Priority::SYSTEM,
        _ if req.participant_id.is_none() && req.channel.is_none() => Priority::SYSTEM,
        _ => Priority::AMBIENT,
    };

    let mut options = SpeakOptions::default()
        .with_priority(req.priority.map(Priority).unwrap_or(default_priority))
        .with_voice(req.voice);
    if let Some(channel) = req.channel {
        options = options.with_channel(channel);
    }
    if let Some(participant_id) = req.participant_id {
        options = options.with_participant(participant_id);
    }
    if let Some(total) = req.total_participants {
        options = options.with_total_participants(total);
    }

    debug!("Accepted speech request: {:?}", options);

    let voice = ctx.voice.clone();
    let text = req.text;
    tokio::spawn(async move {
        match voice.speak(&text, options).await {
            Ok(SpeakOutcome::Played(outcome)) => debug!("Speech finished: {:?}", outcome),
            Ok(SpeakOutcome::NoAudio) => debug!("Speech produced no audio"),
            Err(e) => warn!("Speech failed: {}", e),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SpeakAccepted {
            status: "accepted".to_string(),
        }),
    ))
}

// ============================================================================
// Playback Control
// ============================================================================

/// GET /stats - Channel, cache and backend statistics
pub async fn get_stats(State(ctx): State<AppContext>) -> Json<VoiceStats> {
    Json(ctx.voice.stats())
}

/// POST /stop - Stop every channel
pub async fn stop_all(State(ctx): State<AppContext>) -> Json<StatusResponse> {
    info!("Stopping all channels");
    ctx.voice.stop_all();
    ok_response()
}

/// POST /channels/:channel/stop - Stop one channel
pub async fn stop_channel(
    State(ctx): State<AppContext>,
    Path(channel): Path<String>,
) -> Result<Json<StatusResponse>, HandlerError> {
    let channel = parse_channel(&channel)?;
    info!("Stopping channel {}", channel);
    ctx.voice.stop_channel(channel);
    Ok(ok_response())
}

/// POST /channels/:channel/mix - Set a channel's base volume and/or pan
pub async fn set_channel_mix(
    State(ctx): State<AppContext>,
    Path(channel): Path<String>,
    Json(req): Json<ChannelMixRequest>,
) -> Result<Json<ChannelMixResponse>, HandlerError> {
    let channel = parse_channel(&channel)?;
    let engine = ctx.voice.engine();
    let bad_request = |e: Error| error_response(StatusCode::BAD_REQUEST, e.to_string());

    let volume = req
        .volume
        .map(|v| engine.set_channel_volume(channel, v))
        .transpose()
        .map_err(bad_request)?;
    let pan = req
        .pan
        .map(|p| engine.set_channel_pan(channel, p))
        .transpose()
        .map_err(bad_request)?;

    Ok(Json(ChannelMixResponse {
        channel,
        volume,
        pan,
    }))
}

/// GET /volume - Master volume
pub async fn get_volume(State(ctx): State<AppContext>) -> Json<VolumeResponse> {
    Json(VolumeResponse {
        volume: ctx.voice.engine().master_volume(),
    })
}

/// POST /volume - Set master volume (clamped to 0.0-1.0)
pub async fn set_volume(
    State(ctx): State<AppContext>,
    Json(req): Json<VolumeRequest>,
) -> Json<VolumeResponse> {
    let volume = ctx.voice.set_master_volume(req.volume);
    info!("Master volume set to {:.2}", volume);
    Json(VolumeResponse { volume })
}

/// POST /enabled - Enable or disable the service
pub async fn set_enabled(
    State(ctx): State<AppContext>,
    Json(req): Json<EnabledRequest>,
) -> Json<EnabledRequest> {
    ctx.voice.set_enabled(req.enabled);
    Json(EnabledRequest {
        enabled: ctx.voice.is_enabled(),
    })
}

// ============================================================================
// Scheduling
// ============================================================================

/// POST /ceiling - Fix the participant concurrency ceiling
pub async fn set_ceiling(
    State(ctx): State<AppContext>,
    Json(req): Json<CeilingRequest>,
) -> Json<CeilingResponse> {
    Json(CeilingResponse {
        ceiling: ctx.voice.set_concurrency_ceiling(req.ceiling),
    })
}

/// POST /participants - Update the participant count
pub async fn set_participants(
    State(ctx): State<AppContext>,
    Json(req): Json<ParticipantsRequest>,
) -> Json<CeilingResponse> {
    Json(CeilingResponse {
        ceiling: ctx.voice.update_total_participants(req.total),
    })
}

// ============================================================================
// Synthesis Backends
// ============================================================================

/// GET /backends - Registered backends with health
pub async fn list_backends(State(ctx): State<AppContext>) -> Json<Vec<BackendStatus>> {
    Json(ctx.voice.pipeline().backends())
}

/// POST /backends - Register (or replace) an HTTP backend
pub async fn register_backend(
    State(ctx): State<AppContext>,
    Json(descriptor): Json<BackendDescriptor>,
) -> Result<(StatusCode, Json<StatusResponse>), HandlerError> {
    if descriptor.id.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "backend id is empty"));
    }

    let id = descriptor.id.clone();
    ctx.voice
        .register_backend(descriptor)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;

    info!("Registered backend '{}' via API", id);
    Ok((StatusCode::CREATED, ok_response()))
}
