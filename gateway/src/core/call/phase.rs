use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of a call.
///
/// ```text
/// Init → Greeting → Listening ⇄ AiSpeaking → Hangup
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallPhase {
    Init,
    Greeting,
    Listening,
    AiSpeaking,
    Hangup,
}

impl CallPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallPhase::Init => "INIT",
            CallPhase::Greeting => "GREETING",
            CallPhase::Listening => "LISTENING",
            CallPhase::AiSpeaking => "AI_SPEAKING",
            CallPhase::Hangup => "HANGUP",
        }
    }
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HangupReason {
    SilenceTimeout,
    Goodbye,
    RemoteHangup,
    ProviderError,
    MaxDuration,
    Superseded,
    ConfigUnavailable,
}

impl HangupReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HangupReason::SilenceTimeout => "silence_timeout",
            HangupReason::Goodbye => "goodbye",
            HangupReason::RemoteHangup => "remote_hangup",
            HangupReason::ProviderError => "provider_error",
            HangupReason::MaxDuration => "max_duration",
            HangupReason::Superseded => "superseded",
            HangupReason::ConfigUnavailable => "config_unavailable",
        }
    }
}

impl fmt::Display for HangupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call direction as reported by the telephony leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
