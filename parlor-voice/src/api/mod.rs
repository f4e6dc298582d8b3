//! HTTP control surface
//!
//! REST endpoints for speech, playback control and configuration, plus an
//! SSE stream of voice events.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{create_router, run, AppContext};
