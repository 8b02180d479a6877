//! The call state machine.
//!
//! ```text
//! Init → Greeting → Listening ⇄ AiSpeaking → Hangup
//! ```
//!
//! `run_call` owns the per-call state and drives it from one `select!` loop over
//! telephony media, provider events, playback feedback and the call's
//! [`HangupSignal`]. Hangup timers and the carrier's `stop` are watched by
//! their own tasks, and every backend await in the loop races the signal.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::hangup::{HangupSignal, HangupTimer};
use super::outbound::{OutboundFrame, OutboundQueue, SharedOutboundQueue};
use super::recorder::{CallRecorder, SharedRecorder};
use super::writer::{PlaybackEvent, TelephonyWriter};
use super::{
    CallInput, CallOutput, CallPhase, CallStart, GoodbyeDetector, HangupReason, TeardownGuard,
};
use crate::config::CallConfig;
use crate::core::audio::{
    AudioFrame, FRAME_BYTES, FrameChunker, FrameScheduler, FrameVerdict, SchedulerStats, decode,
    decode_base64,
};
use crate::core::collaborators::{
    CallInfo, CallInstructions, CompletionGate, LeadStore, PostCallRecord, PostCallSink,
    PromptProvider,
};
use crate::core::provider::{
    ErrorKind, ProviderEvent, ProviderKind, ProviderSession, ProviderSessionConfig, TranscriptRole,
    VoiceProvider,
};
use crate::core::registry::{CallRegistry, Registration};
use crate::core::response::{
    INTENT_APOLOGY, INTENT_CALLER_TURN, INTENT_GREETING, ResponseCounters, ResponseHandle,
    ResponseStatus, ResponseTracker, TriggerOutcome,
};
use crate::core::turn::{SharedTurnTracker, TurnTracker};

const PLAYBACK_CHANNEL_CAPACITY: usize = 64;
/// About ten seconds of caller audio
const MEDIA_CHANNEL_CAPACITY: usize = 512;
const HANGUP_NOTIFY_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything a call needs from the outside world.
#[derive(Clone)]
pub struct CallServices {
    pub config: Arc<CallConfig>,
    pub provider: Arc<dyn VoiceProvider>,
    pub registry: Arc<CallRegistry>,
    pub prompts: Arc<dyn PromptProvider>,
    pub leads: Arc<dyn LeadStore>,
    pub completion_gate: Arc<dyn CompletionGate>,
    pub post_call: Arc<dyn PostCallSink>,
    pub goodbye: Arc<GoodbyeDetector>,
    /// Stereo WAV recordings are written here when set
    pub recordings_dir: Option<PathBuf>,
}

/// Final state of a finished call.
#[derive(Debug, Clone)]
pub struct CallSummary {
    pub call_id: String,
    pub provider_kind: ProviderKind,
    pub hangup_reason: Option<HangupReason>,
    pub duration: Duration,
    pub scheduler: SchedulerStats,
    pub responses: ResponseCounters,
}

/// Run one call from its `start` event to teardown.
pub async fn run_call(
    services: CallServices,
    start: CallStart,
    inbound: mpsc::Receiver<CallInput>,
    outbound: mpsc::Sender<CallOutput>,
) -> CallSummary {
    let registration =
        services
            .registry
            .register(&start.call_id, &start.business_id, start.direction);

    let (playback_tx, mut playback_rx) = mpsc::channel(PLAYBACK_CHANNEL_CAPACITY);
    let (media_tx, mut media_rx) = mpsc::channel(MEDIA_CHANNEL_CAPACITY);
    let mut call = CallSession::new(services, &start, registration, outbound);
    let writer = call.spawn_writer(playback_tx);
    call.spawn_hangup_timer();
    call.spawn_inbound(inbound, media_tx);
    call.spawn_lead_upsert(&start);

    if let Some(mut events) = call.begin().await {
        call.run(&mut media_rx, &mut events, &mut playback_rx).await;
    }

    call.tasks.cancel();
    if let Err(e) = writer.await {
        warn!(call_id = %call.info.call_id, error = %e, "Telephony writer task failed");
    }
    call.summary()
}

struct CallSession {
    services: CallServices,
    info: CallInfo,
    started_at: Instant,
    phase: CallPhase,
    hangup_reason: Option<HangupReason>,

    session: Option<Arc<dyn ProviderSession>>,
    instructions: Option<CallInstructions>,
    installed_instructions: String,
    instructions_upgraded: bool,

    /// No new caller turns are answered (apology or fallback line in progress)
    winding_down: bool,
    config_unavailable: bool,
    pending_hangup: Option<HangupReason>,
    /// The caller finished a turn while a response was still active
    pending_caller_turn: bool,

    turns: SharedTurnTracker,
    responses: ResponseTracker,
    scheduler: FrameScheduler,
    next_seq: u64,

    queue: SharedOutboundQueue,
    chunker: Option<(String, FrameChunker)>,
    /// Response whose audio the writer is sending right now
    playing: Option<String>,
    recorder: Option<SharedRecorder>,
    outbound: mpsc::Sender<CallOutput>,
    /// Stops the writer, hangup timer and inbound tasks
    tasks: CancellationToken,

    registration: Registration,
    signal: HangupSignal,
    teardown: TeardownGuard,
}

impl CallSession {
    fn new(
        services: CallServices,
        start: &CallStart,
        registration: Registration,
        outbound: mpsc::Sender<CallOutput>,
    ) -> Self {
        let started_at = Instant::now();
        let config = services.config.clone();
        let call_id = start.call_id.clone();
        let recorder = services
            .recordings_dir
            .as_ref()
            .map(|_| CallRecorder::shared(call_id.clone(), started_at));

        Self {
            info: CallInfo {
                call_id: call_id.clone(),
                business_id: start.business_id.clone(),
                direction: start.direction,
                caller: start.caller.clone(),
                callee: start.callee.clone(),
            },
            started_at,
            phase: CallPhase::Init,
            hangup_reason: None,
            session: None,
            instructions: None,
            installed_instructions: String::new(),
            instructions_upgraded: false,
            winding_down: false,
            config_unavailable: false,
            pending_hangup: None,
            pending_caller_turn: false,
            turns: TurnTracker::new(
                call_id.clone(),
                started_at,
                config.min_transcript_len,
                config.barge_in_on_speech_started,
            )
            .shared(),
            responses: ResponseTracker::new(call_id.clone(), started_at, config.response_policy()),
            scheduler: FrameScheduler::new(call_id.clone(), config.nominal_fps, config.ceiling_ratio),
            next_seq: 0,
            queue: OutboundQueue::shared(call_id, config.outbound_queue_frames),
            chunker: None,
            playing: None,
            recorder,
            outbound,
            tasks: CancellationToken::new(),
            registration,
            signal: HangupSignal::new(),
            teardown: TeardownGuard::new(),
            services,
        }
    }

    fn call_id(&self) -> &str {
        &self.info.call_id
    }

    fn spawn_writer(&self, playback: mpsc::Sender<PlaybackEvent>) -> JoinHandle<()> {
        TelephonyWriter {
            call_id: self.info.call_id.clone(),
            queue: self.queue.clone(),
            output: self.outbound.clone(),
            playback,
            recorder: self.recorder.clone(),
            token: self.tasks.clone(),
        }
        .spawn()
    }

    fn spawn_hangup_timer(&self) {
        let config = &self.services.config;
        HangupTimer {
            call_id: self.info.call_id.clone(),
            started_at: self.started_at,
            max_duration: config.max_call_duration(),
            silence_timeout: config.silence_timeout(),
            turns: self.turns.clone(),
            superseded: self.registration.superseded.clone(),
            signal: self.signal.clone(),
            token: self.tasks.clone(),
        }
        .spawn();
    }

    /// Drain telephony input beside the call loop so `stop` is seen while the
    /// loop waits on a backend.
    fn spawn_inbound(
        &self,
        mut inbound: mpsc::Receiver<CallInput>,
        media: mpsc::Sender<(String, Instant)>,
    ) {
        let call_id = self.info.call_id.clone();
        let signal = self.signal.clone();
        let token = self.tasks.clone();

        tokio::spawn(async move {
            loop {
                let input = tokio::select! {
                    _ = token.cancelled() => return,
                    input = inbound.recv() => input,
                };
                match input {
                    Some(CallInput::Media {
                        payload,
                        received_at,
                    }) => {
                        if let Err(TrySendError::Full(_)) = media.try_send((payload, received_at)) {
                            warn!(call_id = %call_id, "Call loop behind, dropping inbound media");
                        }
                    }
                    Some(CallInput::Stop) | None => {
                        signal.raise(HangupReason::RemoteHangup);
                        return;
                    }
                }
            }
        });
    }

    /// Record the caller in the lead store without holding up the call.
    fn spawn_lead_upsert(&self, start: &CallStart) {
        let Some(phone) = start.caller.clone().filter(|p| !p.trim().is_empty()) else {
            return;
        };
        let leads = self.services.leads.clone();
        let call_id = start.call_id.clone();
        let limit = self.services.config.collaborator_timeout();
        let mut fields = start.metadata.clone();
        fields.insert("business_id".to_string(), start.business_id.clone());
        fields.insert("direction".to_string(), start.direction.to_string());

        tokio::spawn(async move {
            match timeout(limit, leads.upsert_by_phone(&phone, &call_id, &fields)).await {
                Ok(Ok(lead_id)) => info!(call_id = %call_id, lead_id = %lead_id, "Lead upserted"),
                Ok(Err(e)) => warn!(call_id = %call_id, error = %e, "Lead upsert failed"),
                Err(_) => warn!(call_id = %call_id, "Lead upsert timed out"),
            }
        });
    }

    fn set_phase(&mut self, next: CallPhase) {
        if self.phase == next || self.phase == CallPhase::Hangup {
            return;
        }
        debug!(call_id = %self.info.call_id, from = %self.phase, to = %next, "Call phase change");
        self.phase = next;
    }

    // =========================================================================
    // Start-up
    // =========================================================================

    /// Load instructions, open the provider session and request the greeting.
    async fn begin(&mut self) -> Option<mpsc::Receiver<ProviderEvent>> {
        let config = self.services.config.clone();
        let loaded = self
            .signal
            .race(timeout(
                config.prompt_timeout(),
                self.services
                    .prompts
                    .get_instructions(&self.info.business_id, self.info.direction),
            ))
            .await;
        let Some(loaded) = loaded else {
            self.hangup_raised().await;
            return None;
        };

        let instructions = match loaded {
            Ok(Ok(instructions)) => Some(instructions),
            Ok(Err(e)) => {
                warn!(call_id = %self.call_id(), error = %e, "Failed to load call instructions, using fallback line");
                None
            }
            Err(_) => {
                warn!(
                    call_id = %self.call_id(),
                    timeout_ms = config.prompt_timeout_ms,
                    "Timed out loading call instructions, using fallback line"
                );
                None
            }
        };

        let session_config = match &instructions {
            Some(loaded) => {
                let initial = if loaded.compact_instructions.trim().is_empty() {
                    loaded.full_instructions.clone()
                } else {
                    loaded.compact_instructions.clone()
                };
                ProviderSessionConfig {
                    call_id: self.info.call_id.clone(),
                    instructions: initial,
                    greeting_instructions: Some(config.greeting_directive.clone()),
                    voice: loaded.voice_id.clone(),
                    language: loaded.language.clone(),
                }
            }
            None => {
                self.config_unavailable = true;
                self.winding_down = true;
                ProviderSessionConfig {
                    call_id: self.info.call_id.clone(),
                    instructions: config.fallback_instructions(),
                    greeting_instructions: Some(format!("Say exactly: \"{}\"", config.fallback_line)),
                    voice: None,
                    language: None,
                }
            }
        };
        self.installed_instructions = session_config.instructions.clone();
        self.instructions = instructions;

        let started = self
            .signal
            .race(self.services.provider.start_session(session_config))
            .await;
        let events = match started {
            None => {
                self.hangup_raised().await;
                return None;
            }
            Some(Ok((session, events))) => {
                self.session = Some(Arc::from(session));
                events
            }
            Some(Err(e)) => {
                error!(call_id = %self.call_id(), error = %e, "Failed to start provider session");
                self.hangup(HangupReason::ProviderError).await;
                return None;
            }
        };

        info!(
            call_id = %self.info.call_id,
            business_id = %self.info.business_id,
            direction = %self.info.direction,
            provider = %self.services.provider.kind(),
            "Call started"
        );

        self.set_phase(CallPhase::Greeting);
        let session = self.session.clone()?;
        match self
            .signal
            .race(self.responses.trigger(&*session, INTENT_GREETING, true, true))
            .await
        {
            Some(outcome) => self.apply_trigger_outcome(outcome).await,
            None => self.hangup_raised().await,
        }
        Some(events)
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    async fn run(
        &mut self,
        media: &mut mpsc::Receiver<(String, Instant)>,
        events: &mut mpsc::Receiver<ProviderEvent>,
        playback: &mut mpsc::Receiver<PlaybackEvent>,
    ) {
        let signal = self.signal.clone();

        while self.phase != CallPhase::Hangup {
            tokio::select! {
                reason = signal.raised() => self.hangup(reason).await,
                Some((payload, received_at)) = media.recv() => {
                    self.on_media(&payload, received_at).await
                }
                event = events.recv() => match event {
                    Some(event) => self.on_provider_event(event).await,
                    None => {
                        warn!(call_id = %self.call_id(), "Provider event stream closed");
                        self.hangup(HangupReason::ProviderError).await;
                    }
                },
                Some(event) = playback.recv() => self.on_playback(event),
            }

            self.execute_pending_hangup().await;
        }
    }

    async fn on_media(&mut self, payload: &str, received_at: Instant) {
        let wire = match decode_base64(payload) {
            Ok(wire) => wire,
            Err(e) => {
                debug!(call_id = %self.call_id(), error = %e, "Dropping malformed media payload");
                return;
            }
        };

        let frames = AudioFrame::from_wire(self.next_seq, &wire, received_at);
        self.next_seq += frames.len() as u64;

        for frame in frames {
            if self.scheduler.offer(frame.received_at) == FrameVerdict::Drop {
                continue;
            }
            let pcm = match decode(&frame.payload) {
                Ok(pcm) => pcm,
                Err(e) => {
                    debug!(call_id = %self.call_id(), seq = frame.seq, error = %e, "Dropping frame");
                    continue;
                }
            };
            if let Some(recorder) = &self.recorder {
                recorder.lock().write_caller(frame.received_at, &pcm);
            }

            let Some(session) = self.session.clone() else {
                return;
            };
            if let Err(e) = session.send_audio_frame(&pcm).await {
                if e.kind() == ErrorKind::Fatal {
                    error!(call_id = %self.call_id(), error = %e, "Provider rejected audio");
                    self.hangup(HangupReason::ProviderError).await;
                    return;
                }
                warn!(call_id = %self.call_id(), seq = frame.seq, error = %e, "Failed to forward audio frame");
            }
        }
    }

    async fn on_provider_event(&mut self, event: ProviderEvent) {
        let now = Instant::now();
        match event {
            ProviderEvent::SpeechStarted => {
                let barge_in = self.turns.lock().on_speech_started(now);
                if barge_in {
                    self.barge_in("speech_started").await;
                }
            }
            ProviderEvent::SpeechStopped => self.turns.lock().on_speech_stopped(now),
            ProviderEvent::TranscriptPartial {
                role: TranscriptRole::User,
                text,
            } => {
                let barge_in = self.turns.lock().on_transcript_partial(&text, now);
                if barge_in {
                    self.barge_in("caller_partial").await;
                }
            }
            ProviderEvent::TranscriptPartial { .. } => {}
            ProviderEvent::TranscriptFinal {
                role: TranscriptRole::User,
                text,
            } => self.on_caller_final(&text).await,
            ProviderEvent::TranscriptFinal {
                role: TranscriptRole::Assistant,
                text,
            } => {
                info!(call_id = %self.call_id(), text = %text, "Assistant said");
                self.check_goodbye(&text).await;
            }
            ProviderEvent::AudioChunk { response_id, pcm } => {
                self.on_audio_chunk(&response_id, &pcm, now)
            }
            ProviderEvent::ResponseStarted { response_id } => {
                if self.responses.on_started(&response_id) {
                    self.set_phase(CallPhase::AiSpeaking);
                }
            }
            ProviderEvent::ResponseCompleted { response_id } => {
                if let Some(handle) = self.responses.on_completed(&response_id) {
                    self.on_response_finished(handle).await;
                }
            }
            ProviderEvent::ResponseCancelled { response_id } => {
                if let Some(handle) = self.responses.on_cancelled(&response_id) {
                    self.on_response_finished(handle).await;
                }
            }
            ProviderEvent::ResponseFailed {
                response_id,
                kind,
                message,
            } => {
                let Some(session) = self.session.clone() else {
                    return;
                };
                let failed = self
                    .signal
                    .race(
                        self.responses
                            .on_failed(&*session, &response_id, kind, &message),
                    )
                    .await;
                match failed {
                    Some(Some(outcome)) => {
                        self.drop_response_audio(&response_id);
                        self.apply_trigger_outcome(outcome).await;
                        self.settle_phase();
                    }
                    Some(None) => {}
                    None => self.hangup_raised().await,
                }
            }
            ProviderEvent::Error {
                kind: ErrorKind::Fatal,
                message,
            } => {
                error!(call_id = %self.call_id(), error = %message, "Fatal provider error");
                self.hangup(HangupReason::ProviderError).await;
            }
            ProviderEvent::Error {
                kind: ErrorKind::CancelNotActive,
                ..
            } => {
                if let Some(handle) = self.responses.on_cancel_not_active() {
                    self.on_response_finished(handle).await;
                }
            }
            ProviderEvent::Error {
                kind: ErrorKind::Transient,
                message,
            } => {
                warn!(call_id = %self.call_id(), error = %message, "Provider reported a transient error");
            }
        }
    }

    fn on_audio_chunk(&mut self, response_id: &str, pcm: &[i16], now: Instant) {
        if !self.responses.on_audio(response_id, now) {
            return;
        }
        if matches!(self.phase, CallPhase::Greeting | CallPhase::Listening) {
            self.set_phase(CallPhase::AiSpeaking);
        }

        let same_response = self
            .chunker
            .as_ref()
            .is_some_and(|(id, _)| id == response_id);
        if !same_response {
            self.chunker = Some((response_id.to_string(), FrameChunker::new()));
        }
        let frames = match self.chunker.as_mut() {
            Some((_, chunker)) => chunker.push(pcm),
            None => return,
        };
        self.enqueue(response_id, frames);
    }

    fn enqueue(&self, response_id: &str, frames: Vec<[u8; FRAME_BYTES]>) {
        if frames.is_empty() {
            return;
        }
        let mut queue = self.queue.lock();
        for payload in frames {
            queue.push(OutboundFrame {
                response_id: response_id.to_string(),
                payload,
            });
        }
    }

    fn drop_response_audio(&mut self, response_id: &str) {
        if self
            .chunker
            .as_ref()
            .is_some_and(|(id, _)| id == response_id)
        {
            self.chunker = None;
        }
        let dropped = self.queue.lock().discard_response(response_id);
        if dropped > 0 {
            debug!(call_id = %self.call_id(), response_id, dropped, "Discarded queued audio");
        }
    }

    async fn on_response_finished(&mut self, handle: ResponseHandle) {
        if handle.status == ResponseStatus::Completed {
            if let Some((id, mut chunker)) = self.chunker.take() {
                if id == handle.response_id {
                    if let Some(tail) = chunker.flush() {
                        self.enqueue(&id, vec![tail]);
                    }
                } else {
                    self.chunker = Some((id, chunker));
                }
            }
            if !self.instructions_upgraded && !self.config_unavailable {
                self.upgrade_instructions().await;
            }
        } else {
            self.drop_response_audio(&handle.response_id);
        }

        if handle.intent == INTENT_APOLOGY {
            self.pending_hangup.get_or_insert(HangupReason::ProviderError);
        }
        if self.config_unavailable && handle.is_greeting {
            self.pending_hangup
                .get_or_insert(HangupReason::ConfigUnavailable);
        }

        self.settle_phase();
        if self.pending_caller_turn && !self.responses.is_active() {
            self.answer_caller().await;
        }
    }

    /// Install the full instructions after the first finished turn. Runs once.
    async fn upgrade_instructions(&mut self) {
        self.instructions_upgraded = true;
        let Some(full) = self
            .instructions
            .as_ref()
            .map(|i| i.full_instructions.clone())
        else {
            return;
        };
        if full.trim().is_empty() || full == self.installed_instructions {
            return;
        }
        let Some(session) = self.session.clone() else {
            return;
        };
        match self.signal.race(session.update_instructions(&full)).await {
            Some(Ok(())) => {
                self.installed_instructions = full;
                info!(call_id = %self.call_id(), "Full instructions installed");
            }
            Some(Err(e)) => {
                warn!(call_id = %self.call_id(), error = %e, "Failed to install full instructions");
            }
            None => self.hangup_raised().await,
        }
    }

    /// Return to listening once nothing is generating or playing.
    fn settle_phase(&mut self) {
        if !matches!(self.phase, CallPhase::Greeting | CallPhase::AiSpeaking) {
            return;
        }
        if self.responses.is_active() || self.turns.lock().ai_is_speaking() {
            return;
        }
        if self.queue.lock().is_empty() {
            self.set_phase(CallPhase::Listening);
        }
    }

    fn on_playback(&mut self, event: PlaybackEvent) {
        let now = Instant::now();
        match event {
            PlaybackEvent::Started { response_id } => {
                debug!(call_id = %self.call_id(), response_id = %response_id, "Assistant audio playing");
                self.playing = Some(response_id);
                self.turns.lock().on_ai_audio_started(now);
                if matches!(self.phase, CallPhase::Greeting | CallPhase::Listening) {
                    self.set_phase(CallPhase::AiSpeaking);
                }
            }
            PlaybackEvent::Drained { response_id } => {
                debug!(call_id = %self.call_id(), response_id = %response_id, "Assistant audio drained");
                self.playing = None;
                self.turns.lock().on_ai_audio_stopped(now);
                self.settle_phase();
            }
        }
    }

    // =========================================================================
    // Turn taking
    // =========================================================================

    async fn on_caller_final(&mut self, text: &str) {
        let verdict = self.turns.lock().on_transcript_final(text, Instant::now());
        info!(call_id = %self.call_id(), text, qualifies = verdict.qualifies, "Caller said");
        if !verdict.qualifies {
            return;
        }

        if verdict.barge_in {
            self.barge_in("caller_final").await;
        }

        self.check_goodbye(text).await;

        if self.winding_down || self.phase == CallPhase::Hangup {
            return;
        }
        if self.responses.is_active() {
            debug!(call_id = %self.call_id(), "Response still active, answering once it finishes");
            self.pending_caller_turn = true;
            return;
        }
        self.answer_caller().await;
    }

    async fn answer_caller(&mut self) {
        self.pending_caller_turn = false;
        if self.winding_down || self.phase == CallPhase::Hangup {
            return;
        }
        let Some(session) = self.session.clone() else {
            return;
        };
        let Some(outcome) = self
            .signal
            .race(
                self.responses
                    .trigger(&*session, INTENT_CALLER_TURN, false, false),
            )
            .await
        else {
            return self.hangup_raised().await;
        };
        self.apply_trigger_outcome(outcome).await;
    }

    /// Cut the assistant off. Returns true when playback was stopped.
    async fn barge_in(&mut self, reason: &str) -> bool {
        if !self.turns.lock().ai_is_speaking() {
            return false;
        }

        if self.responses.is_active() {
            let Some(session) = self.session.clone() else {
                return false;
            };
            match self.signal.race(self.responses.cancel(&*session, reason)).await {
                Some(true) => {}
                Some(false) => return false,
                None => {
                    self.hangup_raised().await;
                    return false;
                }
            }
        }

        // the response being heard and the one just cancelled
        let mut interrupted: Vec<String> = self.playing.take().into_iter().collect();
        if let Some(latest) = self.responses.latest().map(|h| h.response_id.clone())
            && !interrupted.contains(&latest)
        {
            interrupted.push(latest);
        }
        for response_id in &interrupted {
            self.drop_response_audio(response_id);
        }
        if self
            .signal
            .race(self.notify(CallOutput::Clear))
            .await
            .is_none()
        {
            self.hangup_raised().await;
            return false;
        }
        self.turns.lock().barge_in_applied(Instant::now());
        self.set_phase(CallPhase::Listening);
        info!(call_id = %self.call_id(), reason, "Barge-in, assistant interrupted");
        true
    }

    async fn check_goodbye(&mut self, text: &str) {
        if self.pending_hangup.is_some() || !self.services.goodbye.matches(text) {
            return;
        }
        if !self.turns.lock().confirmed_spoken() {
            debug!(call_id = %self.call_id(), "Goodbye ignored, caller has not spoken yet");
            return;
        }
        let Some(policy) = self
            .instructions
            .as_ref()
            .filter(|i| i.goodbye_hangup_enabled)
            .map(|i| i.required_fields_policy)
        else {
            return;
        };

        let allowed = self
            .signal
            .race(timeout(
                self.services.config.collaborator_timeout(),
                self.services
                    .completion_gate
                    .allows_goodbye_hangup(&self.info, policy),
            ))
            .await;
        let Some(allowed) = allowed else {
            return self.hangup_raised().await;
        };
        match allowed {
            Ok(Ok(true)) => {
                info!(call_id = %self.call_id(), "Goodbye detected, hanging up once the assistant finishes");
                self.pending_hangup = Some(HangupReason::Goodbye);
            }
            Ok(Ok(false)) => {
                info!(call_id = %self.call_id(), "Goodbye detected but completion gate declined");
            }
            Ok(Err(e)) => {
                warn!(call_id = %self.call_id(), error = %e, "Completion gate failed, staying on the line");
            }
            Err(_) => {
                warn!(call_id = %self.call_id(), "Completion gate timed out, staying on the line");
            }
        }
    }

    async fn apply_trigger_outcome(&mut self, outcome: TriggerOutcome) {
        match outcome {
            TriggerOutcome::Created { .. } => {}
            TriggerOutcome::ApologizeAndHangup => self.apologize().await,
            TriggerOutcome::HangupNow => self.hangup(HangupReason::ProviderError).await,
        }
    }

    async fn apologize(&mut self) {
        self.winding_down = true;
        let Some(session) = self.session.clone() else {
            self.hangup(HangupReason::ProviderError).await;
            return;
        };
        let prompt = self.services.config.apology_prompt.clone();
        match self
            .signal
            .race(self.responses.apologize(&*session, &prompt))
            .await
        {
            Some(TriggerOutcome::Created { .. }) => {
                self.pending_hangup = Some(HangupReason::ProviderError);
            }
            Some(_) => self.hangup(HangupReason::ProviderError).await,
            None => self.hangup_raised().await,
        }
    }

    // =========================================================================
    // Hangup
    // =========================================================================

    /// Finish a hangup that was raised while an await was in flight.
    async fn hangup_raised(&mut self) {
        if let Some(reason) = self.signal.reason() {
            self.hangup(reason).await;
        }
    }

    async fn execute_pending_hangup(&mut self) {
        let Some(reason) = self.pending_hangup else {
            return;
        };
        if self.phase == CallPhase::Hangup
            || self.turns.lock().ai_is_speaking()
            || self.responses.is_active()
            || !self.queue.lock().is_empty()
        {
            return;
        }
        self.hangup(reason).await;
    }

    async fn notify(&self, output: CallOutput) {
        if timeout(HANGUP_NOTIFY_TIMEOUT, self.outbound.send(output))
            .await
            .is_err()
        {
            warn!(call_id = %self.call_id(), "Telephony leg not draining, event dropped");
        }
    }

    /// Tear the call down. Only the first caller does any work.
    async fn hangup(&mut self, reason: HangupReason) {
        if !self.teardown.begin() {
            return;
        }
        self.signal.raise(reason);
        self.hangup_reason = Some(reason);
        self.set_phase(CallPhase::Hangup);
        info!(call_id = %self.call_id(), reason = %reason, "Hanging up");

        if let Some(session) = self.session.take()
            && let Err(e) = session.close().await
        {
            warn!(call_id = %self.call_id(), error = %e, "Failed to close provider session");
        }

        self.scheduler.stop();
        self.services
            .registry
            .unregister(&self.info.call_id, self.registration.token);

        self.tasks.cancel();
        self.queue.lock().clear();
        self.notify(CallOutput::Hangup(reason)).await;

        self.spawn_post_call(reason);
    }

    /// Finalize the recording and hand the call to the post-call sink.
    fn spawn_post_call(&mut self, reason: HangupReason) {
        let recording = match (&self.recorder, &self.services.recordings_dir) {
            (Some(shared), Some(dir)) => {
                let taken = std::mem::replace(
                    &mut *shared.lock(),
                    CallRecorder::new(self.info.call_id.clone(), self.started_at),
                );
                Some((taken, dir.clone()))
            }
            _ => None,
        };

        let mut record = PostCallRecord {
            call_id: self.info.call_id.clone(),
            business_id: self.info.business_id.clone(),
            recording_ref: None,
            duration_secs: self.started_at.elapsed().as_secs_f64(),
            direction: self.info.direction,
            hangup_reason: reason,
        };
        let sink = self.services.post_call.clone();

        tokio::spawn(async move {
            if let Some((recorder, dir)) = recording {
                match recorder.finalize(&dir).await {
                    Ok(path) => record.recording_ref = Some(path.display().to_string()),
                    Err(e) => {
                        warn!(call_id = %record.call_id, error = %e, "Failed to write call recording")
                    }
                }
            }
            if let Err(e) = sink.submit(&record).await {
                warn!(call_id = %record.call_id, error = %e, "Post-call hand-off failed");
            }
        });
    }

    fn summary(&self) -> CallSummary {
        CallSummary {
            call_id: self.info.call_id.clone(),
            provider_kind: self.services.provider.kind(),
            hangup_reason: self.hangup_reason,
            duration: self.started_at.elapsed(),
            scheduler: self.scheduler.stats(),
            responses: self.responses.counters(),
        }
    }
}
