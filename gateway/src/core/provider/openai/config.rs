//! Realtime adapter settings: model, voice, wire audio format and the
//! timeouts that bound every acknowledgement.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Rate of `pcm16` audio on the Realtime API.
pub const OPENAI_REALTIME_SAMPLE_RATE: u32 = 24000;

pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Implements `as_str`, lenient parsing and `Display` from one name table.
macro_rules! wire_names {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }

            /// Case-insensitive lookup; unknown names give the default.
            pub fn from_str_or_default(s: &str) -> Self {
                let wanted = s.trim().to_ascii_lowercase();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == wanted)
                    .unwrap_or_default()
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenAIRealtimeModel {
    #[default]
    #[serde(rename = "gpt-4o-realtime-preview")]
    Gpt4oRealtimePreview,
    #[serde(rename = "gpt-4o-realtime-preview-2024-12-17")]
    Gpt4oRealtimePreview20241217,
    #[serde(rename = "gpt-4o-mini-realtime-preview")]
    Gpt4oMiniRealtimePreview,
    #[serde(rename = "gpt-realtime")]
    GptRealtime,
}

wire_names!(OpenAIRealtimeModel {
    Gpt4oRealtimePreview => "gpt-4o-realtime-preview",
    Gpt4oRealtimePreview20241217 => "gpt-4o-realtime-preview-2024-12-17",
    Gpt4oMiniRealtimePreview => "gpt-4o-mini-realtime-preview",
    GptRealtime => "gpt-realtime",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAIRealtimeVoice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

wire_names!(OpenAIRealtimeVoice {
    Alloy => "alloy",
    Ash => "ash",
    Ballad => "ballad",
    Coral => "coral",
    Echo => "echo",
    Sage => "sage",
    Shimmer => "shimmer",
    Verse => "verse",
});

/// Audio format negotiated with the backend.
///
/// `G711Ulaw` passes telephony audio through at 8 kHz; `Pcm16` is resampled to
/// and from 24 kHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenAIRealtimeAudioFormat {
    #[default]
    #[serde(rename = "pcm16")]
    Pcm16,
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
}

wire_names!(OpenAIRealtimeAudioFormat {
    Pcm16 => "pcm16",
    G711Ulaw => "g711_ulaw",
});

impl OpenAIRealtimeAudioFormat {
    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::Pcm16 => OPENAI_REALTIME_SAMPLE_RATE,
            Self::G711Ulaw => 8000,
        }
    }

    /// Like `from_str_or_default`, also accepting common aliases.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pcm" | "linear16" => Self::Pcm16,
            "ulaw" | "mulaw" => Self::G711Ulaw,
            other => Self::from_str_or_default(other),
        }
    }
}

// =============================================================================
// Provider Configuration
// =============================================================================

/// Connection and session settings for the realtime adapter.
#[derive(Debug, Clone)]
pub struct OpenAIRealtimeConfig {
    pub api_key: String,
    pub model: OpenAIRealtimeModel,
    /// Used when the call instructions carry no voice
    pub default_voice: OpenAIRealtimeVoice,
    pub audio_format: OpenAIRealtimeAudioFormat,
    /// WebSocket endpoint, overridable for local backends
    pub url: String,
    pub transcription_model: String,
    pub temperature: Option<f32>,

    /// Server VAD activation threshold (0.0-1.0)
    pub vad_threshold: f32,
    pub vad_prefix_padding_ms: u32,
    pub vad_silence_duration_ms: u32,

    pub connect_timeout: Duration,
    /// Bound on waiting for `response.created`
    pub response_ack_timeout: Duration,
    /// Bound on waiting for a cancel to be confirmed
    pub cancel_ack_timeout: Duration,
    /// Bound on enqueueing a client event
    pub send_timeout: Duration,
}

impl Default for OpenAIRealtimeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: OpenAIRealtimeModel::default(),
            default_voice: OpenAIRealtimeVoice::default(),
            audio_format: OpenAIRealtimeAudioFormat::default(),
            url: OPENAI_REALTIME_URL.to_string(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            temperature: None,
            vad_threshold: 0.5,
            vad_prefix_padding_ms: 300,
            vad_silence_duration_ms: 500,
            connect_timeout: Duration::from_secs(10),
            response_ack_timeout: Duration::from_secs(5),
            cancel_ack_timeout: Duration::from_millis(1500),
            send_timeout: Duration::from_secs(1),
        }
    }
}

impl OpenAIRealtimeConfig {
    /// Build the WebSocket URL with model parameter.
    pub fn ws_url(&self) -> String {
        format!("{}?model={}", self.url, self.model.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
