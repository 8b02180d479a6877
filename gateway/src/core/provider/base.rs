//! Base traits and types for conversational voice providers.
//!
//! A provider turns caller audio into assistant audio. Two shapes exist:
//!
//! - realtime bidirectional backends that stream audio both ways over one socket
//! - sequential STT → LLM → TTS pipelines
//!
//! Both expose the same [`VoiceProvider`] / [`ProviderSession`] capability set and
//! report back through one [`ProviderEvent`] stream, so call handling never needs to
//! know which backend is in use.
//!
//! # Audio Format
//!
//! Audio crossing this interface is PCM 16-bit signed at the telephony rate (8 kHz).
//! Adapters resample internally when the backend speaks another rate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capacity of the per-session provider event channel.
pub const PROVIDER_EVENT_CAPACITY: usize = 512;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Connection to the provider failed or was lost
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Provider-specific error
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Session already closed
    #[error("Not connected")]
    NotConnected,

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
}

impl ProviderError {
    /// Classify the error for retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::ConnectionFailed(_)
            | ProviderError::AuthenticationFailed(_)
            | ProviderError::InvalidConfiguration(_)
            | ProviderError::NotConnected => ErrorKind::Fatal,
            ProviderError::WebSocketError(_)
            | ProviderError::ProviderError(_)
            | ProviderError::SerializationError(_)
            | ProviderError::Timeout(_)
            | ProviderError::RateLimitExceeded(_) => ErrorKind::Transient,
        }
    }
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Failure classification shared by errors and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Worth one retry of the same intent
    Transient,
    /// The session is unusable; the call must end
    Fatal,
    /// A cancel raced a response that had already finished
    CancelNotActive,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Fatal => write!(f, "fatal"),
            ErrorKind::CancelNotActive => write!(f, "cancel_not_active"),
        }
    }
}

// =============================================================================
// Provider Kinds
// =============================================================================

/// Backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Bidirectional realtime WebSocket backend
    #[default]
    Realtime,
    /// STT → LLM → TTS pipeline
    Sequential,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Realtime => "realtime",
            ProviderKind::Sequential => "sequential",
        }
    }

    /// Parse a kind name, falling back to realtime for unknown values.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "sequential" | "pipeline" | "stt-llm-tts" => ProviderKind::Sequential,
            _ => ProviderKind::Realtime,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Events
// =============================================================================

/// Transcript role (user or assistant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    /// Caller speech
    User,
    /// Assistant speech
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Events a provider session reports back to the call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// Backend voice activity detection heard the caller start talking
    SpeechStarted,
    /// Backend voice activity detection heard the caller stop
    SpeechStopped,
    /// Interim transcript text
    TranscriptPartial { role: TranscriptRole, text: String },
    /// Finalized transcript text
    TranscriptFinal { role: TranscriptRole, text: String },
    /// Assistant audio, PCM16 at 8 kHz
    AudioChunk { response_id: String, pcm: Vec<i16> },
    ResponseStarted { response_id: String },
    ResponseCompleted { response_id: String },
    ResponseCancelled { response_id: String },
    ResponseFailed {
        response_id: String,
        kind: ErrorKind,
        message: String,
    },
    /// Session-level error not tied to a response
    Error { kind: ErrorKind, message: String },
}

/// Result of asking the backend to cancel a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The backend confirmed the cancel
    Cancelled,
    /// The backend had nothing active to cancel
    NotActive,
    /// No confirmation arrived in time
    Unacknowledged,
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Per-call session settings handed to a provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderSessionConfig {
    /// Call identifier, used for logging
    pub call_id: String,
    /// System instructions the session starts with
    pub instructions: String,
    /// Directive used for the greeting turn
    pub greeting_instructions: Option<String>,
    /// Voice identifier, backend specific
    pub voice: Option<String>,
    /// Language hint (BCP-47 or ISO-639-1)
    pub language: Option<String>,
}

// =============================================================================
// Traits
// =============================================================================

/// Factory for per-call provider sessions.
#[async_trait]
pub trait VoiceProvider: Send + Sync {
    /// Backend family of this provider.
    fn kind(&self) -> ProviderKind;

    /// Open a session for one call.
    ///
    /// Returns the session handle and the receiver of its events. The receiver
    /// closing means the backend is gone.
    async fn start_session(
        &self,
        config: ProviderSessionConfig,
    ) -> ProviderResult<(Box<dyn ProviderSession>, mpsc::Receiver<ProviderEvent>)>;
}

/// One live conversation with a backend.
///
/// Every method is bounded in time by the adapter.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    /// Stream one frame of caller audio (PCM16 @ 8 kHz).
    async fn send_audio_frame(&self, pcm: &[i16]) -> ProviderResult<()>;

    /// Inject a text message into the conversation as the user.
    async fn send_text(&self, text: &str) -> ProviderResult<()>;

    /// Replace the session instructions.
    async fn update_instructions(&self, instructions: &str) -> ProviderResult<()>;

    /// Ask for an assistant turn and return its provider-assigned id.
    async fn request_response(&self, is_greeting: bool) -> ProviderResult<String>;

    /// Cancel a response in flight.
    async fn cancel_response(&self, response_id: &str) -> ProviderResult<CancelOutcome>;

    /// Close the session. Idempotent.
    async fn close(&self) -> ProviderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(
            ProviderError::ConnectionFailed("lost".into()).kind(),
            ErrorKind::Fatal
        );
        assert_eq!(ProviderError::NotConnected.kind(), ErrorKind::Fatal);
        assert_eq!(
            ProviderError::Timeout("response.created".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            ProviderError::RateLimitExceeded("tpm".into()).kind(),
            ErrorKind::Transient
        );
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::Timeout("cancel ack".to_string());
        assert_eq!(err.to_string(), "Operation timed out: cancel ack");
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!(
            ProviderKind::from_str_or_default("Sequential"),
            ProviderKind::Sequential
        );
        assert_eq!(
            ProviderKind::from_str_or_default("realtime"),
            ProviderKind::Realtime
        );
        assert_eq!(
            ProviderKind::from_str_or_default("unknown"),
            ProviderKind::Realtime
        );
        assert_eq!(ProviderKind::Sequential.to_string(), "sequential");
    }

    #[test]
    fn test_transcript_role_display() {
        assert_eq!(TranscriptRole::User.to_string(), "user");
        assert_eq!(TranscriptRole::Assistant.to_string(), "assistant");
    }
}
