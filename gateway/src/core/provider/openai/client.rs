//! OpenAI Realtime API client implementation.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit 24kHz or G.711 u-law 8kHz, base64 encoded
//!
//! Server VAD is configured to detect speech and transcribe only; the gateway
//! decides when responses are created and cancelled.
//!
//! One connection task per call owns the socket. The session handle talks to it
//! over a bounded channel and waits on oneshot acknowledgements for
//! `response.create` and `response.cancel`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::config::{OPENAI_REALTIME_SAMPLE_RATE, OpenAIRealtimeAudioFormat, OpenAIRealtimeConfig, OpenAIRealtimeVoice};
use super::messages::{
    ApiError, ClientEvent, ConversationItem, InputAudioTranscription, ResponseConfig, ServerEvent,
    SessionConfig, TurnDetection,
};
use crate::core::audio::codec::{linear_to_mulaw, mulaw_sample};
use crate::core::audio::{TELEPHONY_SAMPLE_RATE, pcm16_from_le_bytes, pcm16_to_le_bytes, resample};
use crate::core::provider::base::{
    CancelOutcome, ErrorKind, PROVIDER_EVENT_CAPACITY, ProviderError, ProviderEvent, ProviderKind,
    ProviderResult, ProviderSession, ProviderSessionConfig, TranscriptRole, VoiceProvider,
};

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Provider
// =============================================================================

/// Opens one OpenAI Realtime WebSocket per call.
#[derive(Debug, Clone)]
pub struct OpenAIRealtimeProvider {
    config: Arc<OpenAIRealtimeConfig>,
}

impl OpenAIRealtimeProvider {
    pub fn new(config: OpenAIRealtimeConfig) -> ProviderResult<Self> {
        if config.api_key.is_empty() {
            return Err(ProviderError::AuthenticationFailed(
                "OpenAI API key is required".to_string(),
            ));
        }
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &OpenAIRealtimeConfig {
        &self.config
    }

    /// Build the upgrade request with OpenAI headers.
    fn build_request(&self) -> ProviderResult<http::Request<()>> {
        let url = self.config.ws_url();
        let uri: http::Uri = url
            .parse()
            .map_err(|e| ProviderError::InvalidConfiguration(format!("invalid realtime URL {url}: {e}")))?;
        let host = uri
            .authority()
            .map(|a| a.as_str().to_string())
            .ok_or_else(|| ProviderError::InvalidConfiguration(format!("realtime URL has no host: {url}")))?;

        http::Request::builder()
            .uri(uri)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("OpenAI-Beta", "realtime=v1")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| ProviderError::ConnectionFailed(e.to_string()))
    }

    /// Build the initial session configuration.
    fn build_session_config(&self, session: &ProviderSessionConfig) -> SessionConfig {
        let voice = session
            .voice
            .as_deref()
            .map(OpenAIRealtimeVoice::from_str_or_default)
            .unwrap_or(self.config.default_voice);
        let format = self.config.audio_format.as_str().to_string();

        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: Some(session.instructions.clone()),
            voice: Some(voice.as_str().to_string()),
            input_audio_format: Some(format.clone()),
            output_audio_format: Some(format),
            input_audio_transcription: Some(InputAudioTranscription {
                model: self.config.transcription_model.clone(),
                language: session.language.clone(),
            }),
            turn_detection: Some(TurnDetection::ServerVad {
                threshold: Some(self.config.vad_threshold),
                prefix_padding_ms: Some(self.config.vad_prefix_padding_ms),
                silence_duration_ms: Some(self.config.vad_silence_duration_ms),
                create_response: Some(false),
                interrupt_response: Some(false),
            }),
            temperature: self.config.temperature,
        }
    }
}

fn map_connect_error(e: tungstenite::Error) -> ProviderError {
    match &e {
        tungstenite::Error::Http(response)
            if response.status() == http::StatusCode::UNAUTHORIZED
                || response.status() == http::StatusCode::FORBIDDEN =>
        {
            ProviderError::AuthenticationFailed(format!("realtime handshake rejected: {}", response.status()))
        }
        _ => ProviderError::ConnectionFailed(e.to_string()),
    }
}

#[async_trait]
impl VoiceProvider for OpenAIRealtimeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Realtime
    }

    async fn start_session(
        &self,
        config: ProviderSessionConfig,
    ) -> ProviderResult<(Box<dyn ProviderSession>, mpsc::Receiver<ProviderEvent>)> {
        let request = self.build_request()?;
        let (ws_stream, _response) = timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| ProviderError::ConnectionFailed("realtime connect timed out".to_string()))?
        .map_err(map_connect_error)?;

        info!(call_id = %config.call_id, model = %self.config.model, "Connected to OpenAI Realtime API");

        let (ws_sink, ws_stream) = ws_stream.split();
        let (tx, rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(PROVIDER_EVENT_CAPACITY);

        let shared = Arc::new(SessionShared::default());
        let token = CancellationToken::new();
        let router = EventRouter::new(
            config.call_id.clone(),
            shared.clone(),
            self.config.audio_format,
            events_tx,
        );
        tokio::spawn(run_connection(ws_sink, ws_stream, rx, router, token.clone()));

        let session = OpenAIRealtimeSession {
            call_id: config.call_id.clone(),
            config: self.config.clone(),
            sender: tx,
            shared,
            token,
            instructions: Mutex::new(config.instructions.clone()),
            greeting_instructions: config.greeting_instructions.clone(),
        };
        session
            .send(ClientEvent::SessionUpdate {
                session: self.build_session_config(&config),
            })
            .await?;

        Ok((Box::new(session), events_rx))
    }
}

// =============================================================================
// Connection task
// =============================================================================

/// Acknowledgements the session handle is waiting for.
#[derive(Default)]
struct SessionShared {
    pending_create: Mutex<Option<oneshot::Sender<ProviderResult<String>>>>,
    pending_cancel: Mutex<Option<(String, oneshot::Sender<CancelOutcome>)>>,
    closed: AtomicBool,
}

impl SessionShared {
    fn resolve_create(&self, result: ProviderResult<String>) -> bool {
        match self.pending_create.lock().take() {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    fn resolve_cancel(&self, response_id: Option<&str>, outcome: CancelOutcome) -> bool {
        let mut pending = self.pending_cancel.lock();
        let matches = match (pending.as_ref(), response_id) {
            (Some((id, _)), Some(done)) => id == done,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return false;
        }
        if let Some((_, tx)) = pending.take() {
            let _ = tx.send(outcome);
        }
        true
    }

    /// Drop every pending acknowledgement; waiters see the connection as gone.
    fn abandon_pending(&self) {
        self.pending_create.lock().take();
        self.pending_cancel.lock().take();
    }
}

/// Failure class of a server `error` event.
fn classify(error: &ApiError) -> ErrorKind {
    if error.is_cancel_not_active() {
        return ErrorKind::CancelNotActive;
    }
    match (error.error_type.as_str(), error.code.as_deref()) {
        ("authentication_error" | "permission_error", _) => ErrorKind::Fatal,
        (_, Some("session_expired" | "invalid_api_key")) => ErrorKind::Fatal,
        _ => ErrorKind::Transient,
    }
}

/// Translates server events into provider events and resolves acknowledgements.
struct EventRouter {
    call_id: String,
    shared: Arc<SessionShared>,
    format: OpenAIRealtimeAudioFormat,
    events: mpsc::Sender<ProviderEvent>,
    user_transcript: String,
    assistant_transcript: String,
}

impl EventRouter {
    fn new(
        call_id: String,
        shared: Arc<SessionShared>,
        format: OpenAIRealtimeAudioFormat,
        events: mpsc::Sender<ProviderEvent>,
    ) -> Self {
        Self {
            call_id,
            shared,
            format,
            events,
            user_transcript: String::new(),
            assistant_transcript: String::new(),
        }
    }

    async fn handle(&mut self, event: ServerEvent) {
        for event in self.route(event) {
            if self.events.send(event).await.is_err() {
                trace!(call_id = %self.call_id, "Event receiver gone");
                return;
            }
        }
    }

    fn route(&mut self, event: ServerEvent) -> Vec<ProviderEvent> {
        match event {
            ServerEvent::SessionCreated { session } => {
                info!(call_id = %self.call_id, session_id = %session.id, "OpenAI Realtime session created");
                vec![]
            }
            ServerEvent::SessionUpdated { session } => {
                debug!(call_id = %self.call_id, session_id = %session.id, "OpenAI Realtime session updated");
                vec![]
            }
            ServerEvent::Error { error } => self.route_error(error),
            ServerEvent::SpeechStarted { audio_start_ms } => {
                debug!(call_id = %self.call_id, audio_start_ms, "Speech started");
                vec![ProviderEvent::SpeechStarted]
            }
            ServerEvent::SpeechStopped { audio_end_ms } => {
                debug!(call_id = %self.call_id, audio_end_ms, "Speech stopped");
                vec![ProviderEvent::SpeechStopped]
            }
            ServerEvent::TranscriptionDelta { delta, .. } => {
                self.user_transcript.push_str(&delta);
                vec![ProviderEvent::TranscriptPartial {
                    role: TranscriptRole::User,
                    text: self.user_transcript.clone(),
                }]
            }
            ServerEvent::TranscriptionCompleted { transcript, .. } => {
                self.user_transcript.clear();
                vec![ProviderEvent::TranscriptFinal {
                    role: TranscriptRole::User,
                    text: transcript,
                }]
            }
            ServerEvent::TranscriptionFailed { item_id, error } => {
                self.user_transcript.clear();
                warn!(call_id = %self.call_id, item_id = %item_id, error = %error.message, "Input transcription failed");
                vec![]
            }
            ServerEvent::ResponseCreated { response } => {
                if !self.shared.resolve_create(Ok(response.id.clone())) {
                    debug!(call_id = %self.call_id, response_id = %response.id, "Response created without a pending request");
                }
                vec![ProviderEvent::ResponseStarted {
                    response_id: response.id,
                }]
            }
            ServerEvent::AudioDelta { response_id, delta } => {
                match ServerEvent::decode_audio_delta(&delta)
                    .map_err(|e| e.to_string())
                    .and_then(|bytes| from_backend(self.format, &bytes))
                {
                    Ok(pcm) if !pcm.is_empty() => vec![ProviderEvent::AudioChunk { response_id, pcm }],
                    Ok(_) => vec![],
                    Err(e) => {
                        error!(call_id = %self.call_id, response_id = %response_id, error = %e, "Failed to decode audio delta");
                        vec![]
                    }
                }
            }
            ServerEvent::AudioTranscriptDelta { delta, .. } => {
                self.assistant_transcript.push_str(&delta);
                vec![ProviderEvent::TranscriptPartial {
                    role: TranscriptRole::Assistant,
                    text: self.assistant_transcript.clone(),
                }]
            }
            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                self.assistant_transcript.clear();
                vec![ProviderEvent::TranscriptFinal {
                    role: TranscriptRole::Assistant,
                    text: transcript,
                }]
            }
            ServerEvent::ResponseDone { response } => {
                let cancelled = response.status == "cancelled";
                let outcome = if cancelled {
                    CancelOutcome::Cancelled
                } else {
                    CancelOutcome::NotActive
                };
                self.shared.resolve_cancel(Some(&response.id), outcome);

                if let Some(usage) = &response.usage {
                    debug!(
                        call_id = %self.call_id,
                        response_id = %response.id,
                        input_tokens = usage.input_tokens,
                        output_tokens = usage.output_tokens,
                        "Response usage"
                    );
                }

                match response.status.as_str() {
                    "cancelled" => vec![ProviderEvent::ResponseCancelled {
                        response_id: response.id,
                    }],
                    "failed" => {
                        let message = response.failure_reason();
                        vec![ProviderEvent::ResponseFailed {
                            response_id: response.id,
                            kind: ErrorKind::Transient,
                            message,
                        }]
                    }
                    _ => vec![ProviderEvent::ResponseCompleted {
                        response_id: response.id,
                    }],
                }
            }
            ServerEvent::Unknown => vec![],
        }
    }

    fn route_error(&mut self, error: ApiError) -> Vec<ProviderEvent> {
        let kind = classify(&error);
        let message = format!("{}: {}", error.error_type, error.message);

        if kind == ErrorKind::CancelNotActive {
            if self.shared.resolve_cancel(None, CancelOutcome::NotActive) {
                debug!(call_id = %self.call_id, "Cancel raced response completion");
                return vec![];
            }
            return vec![ProviderEvent::Error { kind, message }];
        }

        warn!(call_id = %self.call_id, kind = %kind, code = ?error.code, error = %message, "OpenAI Realtime error");
        if self
            .shared
            .resolve_create(Err(ProviderError::ProviderError(message.clone())))
            && kind != ErrorKind::Fatal
        {
            return vec![];
        }
        vec![ProviderEvent::Error { kind, message }]
    }

    /// The socket is gone. Reports a fatal error unless the session closed it.
    async fn connection_lost(&mut self, reason: &str) {
        self.shared.abandon_pending();
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(call_id = %self.call_id, reason, "OpenAI Realtime connection lost");
        let _ = self
            .events
            .send(ProviderEvent::Error {
                kind: ErrorKind::Fatal,
                message: format!("realtime connection lost: {reason}"),
            })
            .await;
    }
}

async fn run_connection(
    mut ws_sink: SplitSink<WsStream, Message>,
    mut ws_stream: SplitStream<WsStream>,
    mut outgoing: mpsc::Receiver<ClientEvent>,
    mut router: EventRouter,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = ws_sink.send(Message::Close(None)).await;
                debug!(call_id = %router.call_id, "OpenAI Realtime session closed");
                break;
            }

            // Handle outgoing messages
            Some(event) = outgoing.recv() => {
                let json = match serde_json::to_string(&event) {
                    Ok(j) => j,
                    Err(e) => {
                        error!(call_id = %router.call_id, event = event.name(), error = %e, "Failed to serialize event");
                        continue;
                    }
                };
                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                    router.connection_lost(&e.to_string()).await;
                    break;
                }
            }

            // Handle incoming messages
            msg = ws_stream.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => router.handle(event).await,
                    Err(e) => warn!(call_id = %router.call_id, error = %e, "Failed to parse server event"),
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                        warn!(call_id = %router.call_id, error = %e, "Failed to send pong");
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    router.connection_lost("closed by server").await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    router.connection_lost(&e.to_string()).await;
                    break;
                }
                None => {
                    router.connection_lost("stream ended").await;
                    break;
                }
            },
        }
    }
    router.shared.closed.store(true, Ordering::SeqCst);
    router.shared.abandon_pending();
}

// =============================================================================
// Audio conversion
// =============================================================================

fn to_backend(format: OpenAIRealtimeAudioFormat, pcm: &[i16]) -> Vec<u8> {
    match format {
        OpenAIRealtimeAudioFormat::Pcm16 => pcm16_to_le_bytes(&resample(
            pcm,
            TELEPHONY_SAMPLE_RATE,
            OPENAI_REALTIME_SAMPLE_RATE,
        )),
        OpenAIRealtimeAudioFormat::G711Ulaw => pcm.iter().map(|&s| linear_to_mulaw(s)).collect(),
    }
}

fn from_backend(format: OpenAIRealtimeAudioFormat, bytes: &[u8]) -> Result<Vec<i16>, String> {
    match format {
        OpenAIRealtimeAudioFormat::Pcm16 => {
            let pcm = pcm16_from_le_bytes(bytes).map_err(|e| e.to_string())?;
            Ok(resample(&pcm, OPENAI_REALTIME_SAMPLE_RATE, TELEPHONY_SAMPLE_RATE))
        }
        OpenAIRealtimeAudioFormat::G711Ulaw => Ok(bytes.iter().map(|&b| mulaw_sample(b)).collect()),
    }
}

// =============================================================================
// Session
// =============================================================================

/// Handle to one realtime conversation.
pub struct OpenAIRealtimeSession {
    call_id: String,
    config: Arc<OpenAIRealtimeConfig>,
    sender: mpsc::Sender<ClientEvent>,
    shared: Arc<SessionShared>,
    token: CancellationToken,
    /// Instructions currently installed on the session
    instructions: Mutex<String>,
    greeting_instructions: Option<String>,
}

impl OpenAIRealtimeSession {
    async fn send(&self, event: ClientEvent) -> ProviderResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(ProviderError::NotConnected);
        }
        let name = event.name();
        match timeout(self.config.send_timeout, self.sender.send(event)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ProviderError::NotConnected),
            Err(_) => Err(ProviderError::Timeout(format!("sending {name}"))),
        }
    }

    fn greeting_response_instructions(&self) -> Option<String> {
        let directive = self.greeting_instructions.as_deref()?;
        let base = self.instructions.lock().clone();
        Some(if base.trim().is_empty() {
            directive.to_string()
        } else {
            format!("{base}\n\n{directive}")
        })
    }
}

#[async_trait]
impl ProviderSession for OpenAIRealtimeSession {
    async fn send_audio_frame(&self, pcm: &[i16]) -> ProviderResult<()> {
        let bytes = to_backend(self.config.audio_format, pcm);
        self.send(ClientEvent::audio_append(&bytes)).await
    }

    async fn send_text(&self, text: &str) -> ProviderResult<()> {
        self.send(ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        })
        .await
    }

    async fn update_instructions(&self, instructions: &str) -> ProviderResult<()> {
        self.send(ClientEvent::SessionUpdate {
            session: SessionConfig {
                instructions: Some(instructions.to_string()),
                ..Default::default()
            },
        })
        .await?;
        *self.instructions.lock() = instructions.to_string();
        Ok(())
    }

    async fn request_response(&self, is_greeting: bool) -> ProviderResult<String> {
        let (tx, rx) = oneshot::channel();
        if self.shared.pending_create.lock().replace(tx).is_some() {
            warn!(call_id = %self.call_id, "Previous response.create was never acknowledged");
        }

        let instructions = if is_greeting {
            self.greeting_response_instructions()
        } else {
            None
        };
        let response = ResponseConfig {
            instructions,
            metadata: Some(json!({ "call_id": self.call_id, "greeting": is_greeting })),
            ..Default::default()
        };
        if let Err(e) = self
            .send(ClientEvent::ResponseCreate {
                response: Some(response),
            })
            .await
        {
            self.shared.pending_create.lock().take();
            return Err(e);
        }

        match timeout(self.config.response_ack_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProviderError::NotConnected),
            Err(_) => {
                self.shared.pending_create.lock().take();
                Err(ProviderError::Timeout("response.created".to_string()))
            }
        }
    }

    async fn cancel_response(&self, response_id: &str) -> ProviderResult<CancelOutcome> {
        let (tx, rx) = oneshot::channel();
        *self.shared.pending_cancel.lock() = Some((response_id.to_string(), tx));

        if let Err(e) = self
            .send(ClientEvent::ResponseCancel {
                response_id: Some(response_id.to_string()),
            })
            .await
        {
            self.shared.pending_cancel.lock().take();
            return Err(e);
        }

        match timeout(self.config.cancel_ack_timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(ProviderError::NotConnected),
            Err(_) => {
                self.shared.pending_cancel.lock().take();
                Ok(CancelOutcome::Unacknowledged)
            }
        }
    }

    async fn close(&self) -> ProviderResult<()> {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.token.cancel();
        }
        Ok(())
    }
}

impl Drop for OpenAIRealtimeSession {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// =============================================================================
// Tests
// =============================================================================
