//! OpenAI HTTP backends for the sequential pipeline.
//!
//! - Transcription: `POST /audio/transcriptions` (multipart WAV upload)
//! - Chat: `POST /chat/completions`
//! - Speech: `POST /audio/speech` with `response_format: "pcm"` (24kHz PCM16)

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{ChatMessage, ChatModel, Synthesizer, Transcriber};
use crate::core::audio::{TELEPHONY_SAMPLE_RATE, pcm16_from_le_bytes, resample};
use crate::core::provider::base::{ProviderError, ProviderResult};

/// Default API base URL.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Sample rate of `response_format: "pcm"` speech output.
const OPENAI_TTS_PCM_SAMPLE_RATE: u32 = 24000;

/// Shared HTTP settings for the three endpoints.
#[derive(Debug, Clone)]
pub struct OpenAIHttpConfig {
    pub api_key: String,
    pub base_url: String,
    pub stt_model: String,
    pub chat_model: String,
    pub tts_model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub request_timeout: Duration,
}

impl Default for OpenAIHttpConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: OPENAI_API_BASE.to_string(),
            stt_model: "whisper-1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            tts_model: "tts-1".to_string(),
            temperature: None,
            max_tokens: Some(300),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl OpenAIHttpConfig {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// OpenAI error response format.
#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
    #[serde(rename = "type", default)]
    error_type: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Encode PCM16 mono as an in-memory WAV file.
pub fn wav_bytes(pcm: &[i16], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in pcm {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

fn map_request_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::ProviderError(format!("Request failed: {e}"))
    }
}

/// Turn a non-success response into a provider error.
async fn check_status(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<OpenAIErrorResponse>(&body) {
        Ok(parsed) => format!(
            "OpenAI API error: {} ({})",
            parsed.error.message, parsed.error.error_type
        ),
        Err(_) => format!("OpenAI API error ({status}): {body}"),
    };
    Err(match status.as_u16() {
        401 | 403 => ProviderError::AuthenticationFailed(message),
        429 => ProviderError::RateLimitExceeded(message),
        _ => ProviderError::ProviderError(message),
    })
}

/// Whisper / gpt-4o-transcribe over multipart upload.
pub struct OpenAITranscriber {
    client: reqwest::Client,
    config: OpenAIHttpConfig,
}

impl OpenAITranscriber {
    pub fn new(client: reqwest::Client, config: OpenAIHttpConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Transcriber for OpenAITranscriber {
    async fn transcribe(&self, pcm: &[i16], language: Option<&str>) -> ProviderResult<String> {
        let wav = wav_bytes(pcm, TELEPHONY_SAMPLE_RATE)
            .map_err(|e| ProviderError::SerializationError(format!("WAV encoding failed: {e}")))?;

        let file_part = Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| ProviderError::InvalidConfiguration(format!("Invalid MIME type: {e}")))?;
        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.config.stt_model.clone())
            .text("response_format", "json");
        if let Some(language) = language.filter(|l| !l.is_empty()) {
            form = form.text("language", language.to_string());
        }

        let response = self
            .client
            .post(self.config.url("audio/transcriptions"))
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.request_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(map_request_error)?;
        let parsed: TranscriptionResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::SerializationError(format!("Failed to parse response: {e}")))?;

        debug!(chars = parsed.text.len(), "Transcription complete");
        Ok(parsed.text)
    }
}

/// Chat completions.
pub struct OpenAIChat {
    client: reqwest::Client,
    config: OpenAIHttpConfig,
}

impl OpenAIChat {
    pub fn new(client: reqwest::Client, config: OpenAIHttpConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    async fn complete(&self, messages: &[ChatMessage]) -> ProviderResult<String> {
        let mut body = json!({
            "model": self.config.chat_model,
            "messages": messages,
        });
        if let Some(temperature) = self.config.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let response = self
            .client
            .post(self.config.url("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_request_error)?;
        let parsed: ChatCompletionResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::SerializationError(format!("Failed to parse response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ProviderError::ProviderError("chat completion returned no text".to_string()))
    }
}

/// Text to speech, returned at the telephony rate.
pub struct OpenAISpeech {
    client: reqwest::Client,
    config: OpenAIHttpConfig,
}

impl OpenAISpeech {
    pub fn new(client: reqwest::Client, config: OpenAIHttpConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Synthesizer for OpenAISpeech {
    async fn synthesize(&self, text: &str, voice: &str) -> ProviderResult<Vec<i16>> {
        let body = json!({
            "model": self.config.tts_model,
            "input": text,
            "voice": voice,
            "response_format": "pcm",
        });

        let response = self
            .client
            .post(self.config.url("audio/speech"))
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_request_error)?;
        let bytes = check_status(response)
            .await?
            .bytes()
            .await
            .map_err(map_request_error)?;

        let pcm = pcm16_from_le_bytes(&bytes)
            .map_err(|e| ProviderError::SerializationError(e.to_string()))?;
        Ok(resample(&pcm, OPENAI_TTS_PCM_SAMPLE_RATE, TELEPHONY_SAMPLE_RATE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_bytes_header() {
        let wav = wav_bytes(&[0, 1, -1, 100], 8000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 8);

        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.spec().channels, 1);
    }

    #[test]
    fn test_url_joining() {
        let config = OpenAIHttpConfig {
            base_url: "http://localhost:9000/v1/".into(),
            ..Default::default()
        };
        assert_eq!(
            config.url("chat/completions"),
            "http://localhost:9000/v1/chat/completions"
        );
    }
}
