//! OpenAI Realtime API adapter.
//!
//! Bidirectional audio over one WebSocket per call, with server-side VAD and
//! input transcription. Responses are only ever created on request, so turn
//! taking and barge-in stay under gateway control.
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse
//!
//! # Audio Format
//!
//! `pcm16` (24kHz, resampled from and to telephony audio) or `g711_ulaw`
//! (8kHz, no resampling).

mod client;
mod config;
mod messages;

pub use client::{OpenAIRealtimeProvider, OpenAIRealtimeSession};
pub use config::{
    DEFAULT_TRANSCRIPTION_MODEL, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL,
    OpenAIRealtimeAudioFormat, OpenAIRealtimeConfig, OpenAIRealtimeModel, OpenAIRealtimeVoice,
};
pub use messages::{ClientEvent, ServerEvent, SessionConfig, TurnDetection};
