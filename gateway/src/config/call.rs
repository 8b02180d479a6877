use std::time::Duration;

use serde::Deserialize;

use crate::core::response::ResponsePolicy;

/// Phrases that end a conversation when heard from either side.
pub const DEFAULT_GOODBYE_PHRASES: &[&str] = &[
    "goodbye",
    "good bye",
    "bye",
    "bye bye",
    "have a nice day",
    "talk to you later",
    "להתראות",
    "ביי",
    "יום טוב",
];

/// Spoken when call instructions cannot be loaded.
pub const DEFAULT_FALLBACK_LINE: &str =
    "We are experiencing a technical difficulty. Please call back later. Goodbye.";

/// Injected as a user message before the apology turn.
pub const DEFAULT_APOLOGY_PROMPT: &str = "(System: a technical problem occurred. Apologize \
     briefly to the caller, tell them someone will get back to them, and say goodbye.)";

/// Directive for the opening turn.
pub const DEFAULT_GREETING_DIRECTIVE: &str =
    "Greet the caller briefly and ask how you can help.";

/// Per-call tunables.
///
/// Every timing rule of the call pipeline lives here so deployments can adjust
/// them without rebuilding.
#[derive(Debug, Clone, PartialEq)]
pub struct CallConfig {
    /// Nominal inbound frame rate (20 ms frames)
    pub nominal_fps: u32,
    /// Burst ceiling as a multiple of the nominal rate
    pub ceiling_ratio: f64,
    pub silence_timeout_secs: u64,
    pub max_call_duration_secs: u64,
    pub min_response_age_ms: u64,
    pub stale_audio_ms: u64,
    pub cancel_cooldown_ms: u64,
    pub cancel_ack_timeout_ms: u64,
    pub response_ack_timeout_ms: u64,
    pub rapid_create_window_ms: u64,
    pub retry_window_secs: u64,
    /// Minimum trimmed character length of a caller transcript that counts
    pub min_transcript_len: usize,
    /// Let backend VAD alone interrupt the assistant
    pub barge_in_on_speech_started: bool,
    /// Outbound queue capacity in 20 ms frames
    pub outbound_queue_frames: usize,
    pub prompt_timeout_ms: u64,
    pub collaborator_timeout_ms: u64,
    pub goodbye_phrases: Vec<String>,
    /// Realtime backend server VAD activation threshold
    pub vad_threshold: f32,
    pub vad_prefix_padding_ms: u32,
    pub vad_silence_duration_ms: u32,
    pub fallback_line: String,
    pub apology_prompt: String,
    pub greeting_directive: String,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            nominal_fps: 50,
            ceiling_ratio: 1.4,
            silence_timeout_secs: 20,
            max_call_duration_secs: 1800,
            min_response_age_ms: 150,
            stale_audio_ms: 700,
            cancel_cooldown_ms: 200,
            cancel_ack_timeout_ms: 1500,
            response_ack_timeout_ms: 5000,
            rapid_create_window_ms: 500,
            retry_window_secs: 60,
            min_transcript_len: 2,
            barge_in_on_speech_started: false,
            outbound_queue_frames: 1500,
            prompt_timeout_ms: 3000,
            collaborator_timeout_ms: 3000,
            goodbye_phrases: DEFAULT_GOODBYE_PHRASES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            vad_threshold: 0.5,
            vad_prefix_padding_ms: 300,
            vad_silence_duration_ms: 500,
            fallback_line: DEFAULT_FALLBACK_LINE.to_string(),
            apology_prompt: DEFAULT_APOLOGY_PROMPT.to_string(),
            greeting_directive: DEFAULT_GREETING_DIRECTIVE.to_string(),
        }
    }
}

impl CallConfig {
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs(self.silence_timeout_secs)
    }

    pub fn max_call_duration(&self) -> Duration {
        Duration::from_secs(self.max_call_duration_secs)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_timeout_ms)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    pub fn response_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.response_ack_timeout_ms)
    }

    pub fn response_policy(&self) -> ResponsePolicy {
        ResponsePolicy {
            min_response_age: Duration::from_millis(self.min_response_age_ms),
            stale_audio: Duration::from_millis(self.stale_audio_ms),
            cancel_cooldown: Duration::from_millis(self.cancel_cooldown_ms),
            cancel_ack_timeout: Duration::from_millis(self.cancel_ack_timeout_ms),
            rapid_create_window: Duration::from_millis(self.rapid_create_window_ms),
            retry_window: Duration::from_secs(self.retry_window_secs),
        }
    }

    /// Instructions used when the prompt service is unavailable.
    pub fn fallback_instructions(&self) -> String {
        format!(
            "A technical problem prevents you from helping today. Say exactly: \"{}\" \
             Do not say anything else.",
            self.fallback_line
        )
    }
}

/// `call:` section of the YAML file. Unset keys keep the environment value.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CallYaml {
    pub nominal_fps: Option<u32>,
    pub ceiling_ratio: Option<f64>,
    pub silence_timeout_secs: Option<u64>,
    pub max_call_duration_secs: Option<u64>,
    pub min_response_age_ms: Option<u64>,
    pub stale_audio_ms: Option<u64>,
    pub cancel_cooldown_ms: Option<u64>,
    pub cancel_ack_timeout_ms: Option<u64>,
    pub response_ack_timeout_ms: Option<u64>,
    pub rapid_create_window_ms: Option<u64>,
    pub retry_window_secs: Option<u64>,
    pub min_transcript_len: Option<usize>,
    pub barge_in_on_speech_started: Option<bool>,
    pub outbound_queue_frames: Option<usize>,
    pub prompt_timeout_ms: Option<u64>,
    pub collaborator_timeout_ms: Option<u64>,
    pub goodbye_phrases: Option<Vec<String>>,
    pub vad_threshold: Option<f32>,
    pub vad_prefix_padding_ms: Option<u32>,
    pub vad_silence_duration_ms: Option<u32>,
    pub fallback_line: Option<String>,
    pub apology_prompt: Option<String>,
    pub greeting_directive: Option<String>,
}

macro_rules! overlay {
    ($target:expr, $source:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $source.$field {
                $target.$field = value;
            }
        )+
    };
}

impl CallYaml {
    pub fn apply(self, config: &mut CallConfig) {
        overlay!(
            config,
            self,
            nominal_fps,
            ceiling_ratio,
            silence_timeout_secs,
            max_call_duration_secs,
            min_response_age_ms,
            stale_audio_ms,
            cancel_cooldown_ms,
            cancel_ack_timeout_ms,
            response_ack_timeout_ms,
            rapid_create_window_ms,
            retry_window_secs,
            min_transcript_len,
            barge_in_on_speech_started,
            outbound_queue_frames,
            prompt_timeout_ms,
            collaborator_timeout_ms,
            goodbye_phrases,
            vad_threshold,
            vad_prefix_padding_ms,
            vad_silence_duration_ms,
            fallback_line,
            apology_prompt,
            greeting_directive,
        );
    }
}
