//! Sequential STT → LLM → TTS provider.
//!
//! Caller audio is segmented locally with an energy gate, each utterance is
//! transcribed, and assistant turns run as one task per response:
//! chat completion, then speech synthesis, then audio events. Cancelling a
//! response aborts its task.
//!
//! The three stages sit behind [`Transcriber`], [`ChatModel`] and
//! [`Synthesizer`] so backends can be swapped independently.

mod openai;
mod segmenter;

pub use openai::{
    OPENAI_API_BASE, OpenAIChat, OpenAIHttpConfig, OpenAISpeech, OpenAITranscriber, wav_bytes,
};
pub use segmenter::{Segment, SegmenterConfig, UtteranceSegmenter, rms_energy};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::base::{
    CancelOutcome, PROVIDER_EVENT_CAPACITY, ProviderError, ProviderEvent, ProviderKind,
    ProviderResult, ProviderSession, ProviderSessionConfig, TranscriptRole, VoiceProvider,
};

/// Samples per audio event (200 ms at 8 kHz).
const AUDIO_CHUNK_SAMPLES: usize = 1600;

// =============================================================================
// Stage traits
// =============================================================================

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Speech to text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one utterance of PCM16 @ 8 kHz.
    async fn transcribe(&self, pcm: &[i16], language: Option<&str>) -> ProviderResult<String>;
}

/// Text generation.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> ProviderResult<String>;
}

/// Text to speech, returning PCM16 @ 8 kHz.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> ProviderResult<Vec<i16>>;
}

// =============================================================================
// Provider
// =============================================================================

/// Settings for the sequential pipeline.
#[derive(Debug, Clone)]
pub struct SequentialConfig {
    pub segmenter: SegmenterConfig,
    /// Used when the call instructions carry no voice
    pub default_voice: String,
    /// Conversation turns kept for the chat model
    pub max_history: usize,
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            segmenter: SegmenterConfig::default(),
            default_voice: "alloy".to_string(),
            max_history: 20,
        }
    }
}

#[derive(Clone)]
pub struct SequentialProvider {
    config: Arc<SequentialConfig>,
    transcriber: Arc<dyn Transcriber>,
    chat: Arc<dyn ChatModel>,
    synthesizer: Arc<dyn Synthesizer>,
}

impl SequentialProvider {
    pub fn new(
        config: SequentialConfig,
        transcriber: Arc<dyn Transcriber>,
        chat: Arc<dyn ChatModel>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            transcriber,
            chat,
            synthesizer,
        }
    }

    /// Pipeline backed by the OpenAI HTTP APIs.
    pub fn openai(config: SequentialConfig, http: OpenAIHttpConfig) -> ProviderResult<Self> {
        if http.api_key.is_empty() {
            return Err(ProviderError::AuthenticationFailed(
                "OpenAI API key is required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(http.request_timeout)
            .build()
            .map_err(|e| ProviderError::InvalidConfiguration(e.to_string()))?;
        Ok(Self::new(
            config,
            Arc::new(OpenAITranscriber::new(client.clone(), http.clone())),
            Arc::new(OpenAIChat::new(client.clone(), http.clone())),
            Arc::new(OpenAISpeech::new(client, http)),
        ))
    }
}

#[async_trait]
impl VoiceProvider for SequentialProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sequential
    }

    async fn start_session(
        &self,
        config: ProviderSessionConfig,
    ) -> ProviderResult<(Box<dyn ProviderSession>, mpsc::Receiver<ProviderEvent>)> {
        let (events_tx, events_rx) = mpsc::channel(PROVIDER_EVENT_CAPACITY);
        let voice = config
            .voice
            .clone()
            .unwrap_or_else(|| self.config.default_voice.clone());

        info!(call_id = %config.call_id, voice = %voice, "Sequential pipeline session started");

        let session = SequentialSession {
            shared: Arc::new(Shared {
                call_id: config.call_id,
                language: config.language,
                voice,
                greeting_instructions: config.greeting_instructions,
                max_history: self.config.max_history,
                transcriber: self.transcriber.clone(),
                chat: self.chat.clone(),
                synthesizer: self.synthesizer.clone(),
                events: events_tx,
                conversation: Mutex::new(Conversation {
                    instructions: config.instructions,
                    history: Vec::new(),
                }),
                closed: AtomicBool::new(false),
            }),
            segmenter: Mutex::new(UtteranceSegmenter::new(self.config.segmenter.clone())),
            reply: Mutex::new(None),
            next_response: AtomicU64::new(1),
        };
        Ok((Box::new(session), events_rx))
    }
}

// =============================================================================
// Session
// =============================================================================

struct Conversation {
    instructions: String,
    history: Vec<ChatMessage>,
}

struct Shared {
    call_id: String,
    language: Option<String>,
    voice: String,
    greeting_instructions: Option<String>,
    max_history: usize,
    transcriber: Arc<dyn Transcriber>,
    chat: Arc<dyn ChatModel>,
    synthesizer: Arc<dyn Synthesizer>,
    events: mpsc::Sender<ProviderEvent>,
    conversation: Mutex<Conversation>,
    closed: AtomicBool,
}

impl Shared {
    /// Emit without waiting; used from calls made by the call loop itself.
    fn emit_now(&self, event: ProviderEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!(call_id = %self.call_id, error = %e, "Dropping pipeline event");
        }
    }

    async fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event).await;
    }

    fn remember(&self, message: ChatMessage) {
        let mut conversation = self.conversation.lock();
        conversation.history.push(message);
        let excess = conversation.history.len().saturating_sub(self.max_history);
        if excess > 0 {
            conversation.history.drain(..excess);
        }
    }

    fn prompt(&self, is_greeting: bool) -> Vec<ChatMessage> {
        let conversation = self.conversation.lock();
        let mut system = conversation.instructions.clone();
        if is_greeting && let Some(directive) = &self.greeting_instructions {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(directive);
        }
        let mut messages = Vec::with_capacity(conversation.history.len() + 1);
        messages.push(ChatMessage::system(system));
        messages.extend(conversation.history.iter().cloned());
        messages
    }

    async fn transcribe(self: Arc<Self>, pcm: Vec<i16>) {
        match self.transcriber.transcribe(&pcm, self.language.as_deref()).await {
            Ok(text) if !text.trim().is_empty() => {
                debug!(call_id = %self.call_id, text = %text, "Utterance transcribed");
                self.remember(ChatMessage::user(text.clone()));
                self.emit(ProviderEvent::TranscriptFinal {
                    role: TranscriptRole::User,
                    text,
                })
                .await;
            }
            Ok(_) => debug!(call_id = %self.call_id, "Empty transcription"),
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "Transcription failed");
                self.emit(ProviderEvent::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn reply(self: Arc<Self>, response_id: String, is_greeting: bool) {
        self.emit(ProviderEvent::ResponseStarted {
            response_id: response_id.clone(),
        })
        .await;

        match self.generate(&response_id, is_greeting).await {
            Ok(()) => {
                self.emit(ProviderEvent::ResponseCompleted { response_id }).await;
            }
            Err(e) => {
                warn!(call_id = %self.call_id, response_id = %response_id, error = %e, "Pipeline response failed");
                self.emit(ProviderEvent::ResponseFailed {
                    response_id,
                    kind: e.kind(),
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn generate(&self, response_id: &str, is_greeting: bool) -> ProviderResult<()> {
        let text = self.chat.complete(&self.prompt(is_greeting)).await?;
        self.remember(ChatMessage::assistant(text.clone()));
        self.emit(ProviderEvent::TranscriptFinal {
            role: TranscriptRole::Assistant,
            text: text.clone(),
        })
        .await;

        let pcm = self.synthesizer.synthesize(&text, &self.voice).await?;
        for chunk in pcm.chunks(AUDIO_CHUNK_SAMPLES) {
            self.emit(ProviderEvent::AudioChunk {
                response_id: response_id.to_string(),
                pcm: chunk.to_vec(),
            })
            .await;
        }
        Ok(())
    }
}

pub struct SequentialSession {
    shared: Arc<Shared>,
    segmenter: Mutex<UtteranceSegmenter>,
    /// The response currently being generated
    reply: Mutex<Option<(String, JoinHandle<()>)>>,
    next_response: AtomicU64,
}

impl SequentialSession {
    fn ensure_open(&self) -> ProviderResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(ProviderError::NotConnected);
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderSession for SequentialSession {
    async fn send_audio_frame(&self, pcm: &[i16]) -> ProviderResult<()> {
        self.ensure_open()?;
        let segment = self.segmenter.lock().push(pcm);
        match segment {
            Segment::Pending => {}
            Segment::SpeechStarted => self.shared.emit_now(ProviderEvent::SpeechStarted),
            Segment::Utterance(utterance) => {
                self.shared.emit_now(ProviderEvent::SpeechStopped);
                tokio::spawn(self.shared.clone().transcribe(utterance));
            }
        }
        Ok(())
    }

    async fn send_text(&self, text: &str) -> ProviderResult<()> {
        self.ensure_open()?;
        self.shared.remember(ChatMessage::user(text));
        Ok(())
    }

    async fn update_instructions(&self, instructions: &str) -> ProviderResult<()> {
        self.ensure_open()?;
        self.shared.conversation.lock().instructions = instructions.to_string();
        Ok(())
    }

    async fn request_response(&self, is_greeting: bool) -> ProviderResult<String> {
        self.ensure_open()?;
        let response_id = format!(
            "seq_{}",
            self.next_response.fetch_add(1, Ordering::Relaxed)
        );

        let mut reply = self.reply.lock();
        if let Some((previous, task)) = reply.take()
            && !task.is_finished()
        {
            warn!(call_id = %self.shared.call_id, response_id = %previous, "Replacing unfinished response");
            task.abort();
        }
        let task = tokio::spawn(self.shared.clone().reply(response_id.clone(), is_greeting));
        *reply = Some((response_id.clone(), task));
        Ok(response_id)
    }

    async fn cancel_response(&self, response_id: &str) -> ProviderResult<CancelOutcome> {
        let task = {
            let mut reply = self.reply.lock();
            match reply.take_if(|(id, task)| id.as_str() == response_id && !task.is_finished()) {
                Some((_, task)) => task,
                None => return Ok(CancelOutcome::NotActive),
            }
        };
        task.abort();
        self.shared.emit_now(ProviderEvent::ResponseCancelled {
            response_id: response_id.to_string(),
        });
        Ok(CancelOutcome::Cancelled)
    }

    async fn close(&self) -> ProviderResult<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some((_, task)) = self.reply.lock().take() {
            task.abort();
        }
        debug!(call_id = %self.shared.call_id, "Sequential pipeline session closed");
        Ok(())
    }
}

impl Drop for SequentialSession {
    fn drop(&mut self) {
        if let Some((_, task)) = self.reply.get_mut().take() {
            task.abort();
        }
    }
}
