//! Text-to-speech synthesis
//!
//! Backends, the result cache and the fallback pipeline that ties them
//! together.

pub mod backend;
pub mod cache;
pub mod pipeline;

pub use backend::{BackendDescriptor, HttpBackend, SynthesisBackend, SynthesisRequest};
pub use cache::{cache_key, CacheEntry, CacheStats, SynthesisCache};
pub use pipeline::{
    estimate_duration, AudioResult, BackendStatus, HealthStatus, Shortfall, SynthesisOptions,
    SynthesisPipeline,
};
