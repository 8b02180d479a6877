//! Caller voice activity and turn tracking.
//!
//! Backend VAD is noisy, so it only ever marks the caller as a *candidate*
//! speaker. The caller counts as having actually spoken only once a final
//! transcript of at least `min_transcript_len` characters arrives.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Tracker shared between the call task and its hangup timer.
pub type SharedTurnTracker = Arc<Mutex<TurnTracker>>;

#[derive(Debug, Clone, Default)]
pub struct TurnState {
    pub candidate_speaking: bool,
    pub confirmed_spoken: bool,
    pub last_voice_activity_at: Option<Instant>,
    pub last_ai_audio_sent_at: Option<Instant>,
    pub ai_is_speaking: bool,
}

/// What a final caller transcript means for the call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalTranscript {
    /// Long enough to count as a real caller turn
    pub qualifies: bool,
    /// This transcript flipped `confirmed_spoken`
    pub newly_confirmed: bool,
    /// The caller talked over the assistant
    pub barge_in: bool,
}

#[derive(Debug)]
pub struct TurnTracker {
    call_id: String,
    started_at: Instant,
    min_transcript_len: usize,
    barge_in_on_speech_started: bool,
    state: TurnState,
}

impl TurnTracker {
    pub fn new(
        call_id: impl Into<String>,
        started_at: Instant,
        min_transcript_len: usize,
        barge_in_on_speech_started: bool,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            started_at,
            min_transcript_len,
            barge_in_on_speech_started,
            state: TurnState::default(),
        }
    }

    pub fn shared(self) -> SharedTurnTracker {
        Arc::new(Mutex::new(self))
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    pub fn ai_is_speaking(&self) -> bool {
        self.state.ai_is_speaking
    }

    pub fn confirmed_spoken(&self) -> bool {
        self.state.confirmed_spoken
    }

    fn meets_minimum(&self, text: &str) -> bool {
        text.trim().chars().count() >= self.min_transcript_len
    }

    /// Returns true when this should be treated as a barge-in.
    pub fn on_speech_started(&mut self, now: Instant) -> bool {
        self.state.candidate_speaking = true;
        self.state.last_voice_activity_at = Some(now);
        self.barge_in_on_speech_started && self.state.ai_is_speaking
    }

    pub fn on_speech_stopped(&mut self, now: Instant) {
        if self.state.candidate_speaking {
            self.state.last_voice_activity_at = Some(now);
        }
        self.state.candidate_speaking = false;
    }

    /// Returns true when this should be treated as a barge-in.
    pub fn on_transcript_partial(&mut self, text: &str, now: Instant) -> bool {
        self.state.last_voice_activity_at = Some(now);
        self.state.ai_is_speaking && self.meets_minimum(text)
    }

    pub fn on_transcript_final(&mut self, text: &str, now: Instant) -> FinalTranscript {
        self.state.last_voice_activity_at = Some(now);
        self.state.candidate_speaking = false;

        if !self.meets_minimum(text) {
            debug!(call_id = %self.call_id, text, "Transcript below minimum length");
            return FinalTranscript::default();
        }

        let newly_confirmed = !self.state.confirmed_spoken;
        if newly_confirmed {
            self.state.confirmed_spoken = true;
            debug!(call_id = %self.call_id, "Caller confirmed as having spoken");
        }

        FinalTranscript {
            qualifies: true,
            newly_confirmed,
            barge_in: self.state.ai_is_speaking,
        }
    }

    /// First outbound frame of a stretch of assistant audio hit the wire.
    pub fn on_ai_audio_started(&mut self, now: Instant) {
        self.state.ai_is_speaking = true;
        self.state.last_ai_audio_sent_at = Some(now);
    }

    /// The outbound queue drained.
    pub fn on_ai_audio_stopped(&mut self, now: Instant) {
        if self.state.ai_is_speaking {
            self.state.last_ai_audio_sent_at = Some(now);
        }
        self.state.ai_is_speaking = false;
    }

    /// A barge-in succeeded; playback was cut.
    pub fn barge_in_applied(&mut self, now: Instant) {
        self.on_ai_audio_stopped(now);
    }

    /// Time since the last sign of life on either side of the call.
    ///
    /// Zero while the assistant is speaking or VAD hears the caller.
    pub fn idle_for(&self, now: Instant) -> Duration {
        if self.state.ai_is_speaking || self.state.candidate_speaking {
            return Duration::ZERO;
        }
        let last = [
            Some(self.started_at),
            self.state.last_voice_activity_at,
            self.state.last_ai_audio_sent_at,
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(self.started_at);
        now.saturating_duration_since(last)
    }
}
