//! Response lifecycle tracking.
//!
//! The tracker is the only component that creates or cancels assistant turns,
//! and the only one that retries a failed turn. Each call owns one tracker.
//!
//! ```text
//! Idle → Pending → InProgress → {Completed | Cancelled | Failed} → Idle
//! ```
//!
//! Bookkeeping keeps at most one handle in `Pending`/`InProgress`. A second
//! trigger while one is live is logged as `DOUBLE_CREATE_RISK` and proceeds; the
//! older handle is retired as cancelled so its late audio is discarded.

use std::collections::VecDeque;

use thiserror::Error;
use tokio::time::{Duration, Instant, timeout};
use tracing::{debug, info, warn};

use crate::core::provider::{CancelOutcome, ErrorKind, ProviderError, ProviderSession};

/// Reason string of the opening turn.
pub const INTENT_GREETING: &str = "greeting";
/// Reason string of a turn answering the caller.
pub const INTENT_CALLER_TURN: &str = "caller_turn";
/// Reason string of the apology spoken before a failure hangup.
pub const INTENT_APOLOGY: &str = "apology";

const HISTORY_LIMIT: usize = 32;

// =============================================================================
// Errors
// =============================================================================

/// Reasons a cancel was refused.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("no active response")]
    NoActiveResponse,

    #[error("response {response_id} is {age_ms}ms old, minimum is {min_ms}ms")]
    TooYoung {
        response_id: String,
        age_ms: u128,
        min_ms: u128,
    },

    #[error("response {response_id} has sent no audio yet ({age_ms}ms old)")]
    NoAudioYet { response_id: String, age_ms: u128 },

    #[error("last cancel was {since_ms}ms ago, cooldown is {cooldown_ms}ms")]
    Cooldown { since_ms: u128, cooldown_ms: u128 },
}

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl ResponseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResponseStatus::Completed | ResponseStatus::Cancelled | ResponseStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Pending => "pending",
            ResponseStatus::InProgress => "in_progress",
            ResponseStatus::Completed => "completed",
            ResponseStatus::Cancelled => "cancelled",
            ResponseStatus::Failed => "failed",
        }
    }
}

/// One assistant turn.
#[derive(Debug, Clone)]
pub struct ResponseHandle {
    pub response_id: String,
    pub created_at: Instant,
    pub status: ResponseStatus,
    pub is_greeting: bool,
    pub intent: String,
    pub first_audio_at: Option<Instant>,
    pub last_audio_at: Option<Instant>,
    /// 0 for the first attempt, 1 for the retry
    pub attempt: u32,
}

/// Timing rules for triggers, cancels and retries.
#[derive(Debug, Clone)]
pub struct ResponsePolicy {
    /// Cancels are refused for responses younger than this
    pub min_response_age: Duration,
    /// A response younger than this that has sent no audio cannot be cancelled
    pub stale_audio: Duration,
    /// Minimum gap between two cancels on the same call
    pub cancel_cooldown: Duration,
    /// Upper bound on waiting for a cancel acknowledgement
    pub cancel_ack_timeout: Duration,
    /// Triggers closer together than this are flagged `RAPID_CREATE`
    pub rapid_create_window: Duration,
    /// Transient failures are retried only while the call is younger than this
    pub retry_window: Duration,
}

impl Default for ResponsePolicy {
    fn default() -> Self {
        Self {
            min_response_age: Duration::from_millis(150),
            stale_audio: Duration::from_millis(700),
            cancel_cooldown: Duration::from_millis(200),
            cancel_ack_timeout: Duration::from_millis(1500),
            rapid_create_window: Duration::from_millis(500),
            retry_window: Duration::from_secs(60),
        }
    }
}

/// What the call has to do after a trigger or a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A response exists now; `retried` when it came from the single retry
    Created { response_id: String, retried: bool },
    /// Speak the apology, then hang up
    ApologizeAndHangup,
    /// Hang up without speaking
    HangupNow,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseCounters {
    pub triggers: u64,
    pub cancels: u64,
    pub refused_cancels: u64,
    pub double_creates: u64,
    pub rapid_creates: u64,
    pub retries: u64,
}

/// Parameters of a turn that failed and may be retried.
#[derive(Debug, Clone)]
struct FailedTurn {
    intent: String,
    is_greeting: bool,
    attempt: u32,
}

// =============================================================================
// Tracker
// =============================================================================

pub struct ResponseTracker {
    call_id: String,
    call_started_at: Instant,
    policy: ResponsePolicy,
    active: Option<ResponseHandle>,
    history: VecDeque<ResponseHandle>,
    last_trigger_at: Option<Instant>,
    last_cancel_at: Option<Instant>,
    counters: ResponseCounters,
}

impl ResponseTracker {
    pub fn new(call_id: impl Into<String>, call_started_at: Instant, policy: ResponsePolicy) -> Self {
        Self {
            call_id: call_id.into(),
            call_started_at,
            policy,
            active: None,
            history: VecDeque::new(),
            last_trigger_at: None,
            last_cancel_at: None,
            counters: ResponseCounters::default(),
        }
    }

    /// The handle in `Pending`/`InProgress`, if any.
    pub fn active(&self) -> Option<&ResponseHandle> {
        self.active.as_ref().filter(|h| !h.status.is_terminal())
    }

    pub fn is_active(&self) -> bool {
        self.active().is_some()
    }

    /// The most recent handle, terminal or not.
    pub fn latest(&self) -> Option<&ResponseHandle> {
        self.active.as_ref()
    }

    /// Every handle this call has seen, oldest first (bounded history).
    pub fn handles(&self) -> impl Iterator<Item = &ResponseHandle> {
        self.history.iter().chain(self.active.iter())
    }

    pub fn counters(&self) -> ResponseCounters {
        self.counters
    }

    /// Create an assistant turn.
    ///
    /// Transient failures are retried once here; the outcome tells the call
    /// whether a response exists or the call has to wind down.
    pub async fn trigger(
        &mut self,
        session: &dyn ProviderSession,
        intent: &str,
        force: bool,
        is_greeting: bool,
    ) -> TriggerOutcome {
        match self.create(session, intent, force, is_greeting, 0).await {
            Ok(response_id) => TriggerOutcome::Created {
                response_id,
                retried: false,
            },
            Err(err) => {
                let failed = FailedTurn {
                    intent: intent.to_string(),
                    is_greeting,
                    attempt: 0,
                };
                self.recover(session, failed, err.kind(), &err.to_string())
                    .await
            }
        }
    }

    /// Inject the apology nudge and request the apology turn.
    pub async fn apologize(&mut self, session: &dyn ProviderSession, nudge: &str) -> TriggerOutcome {
        if let Err(e) = session.send_text(nudge).await {
            warn!(call_id = %self.call_id, error = %e, "Failed to send apology prompt");
            return TriggerOutcome::HangupNow;
        }
        self.trigger(session, INTENT_APOLOGY, true, false).await
    }

    async fn create(
        &mut self,
        session: &dyn ProviderSession,
        intent: &str,
        force: bool,
        is_greeting: bool,
        attempt: u32,
    ) -> Result<String, ProviderError> {
        let now = Instant::now();

        if let Some(mut live) = self.active.take_if(|h| !h.status.is_terminal()) {
            if !force {
                self.counters.double_creates += 1;
                warn!(
                    call_id = %self.call_id,
                    active_response = %live.response_id,
                    intent,
                    "DOUBLE_CREATE_RISK: triggering while a response is still active"
                );
            }
            live.status = ResponseStatus::Cancelled;
            self.retire(live);
        } else if let Some(done) = self.active.take() {
            self.retire(done);
        }

        if attempt == 0
            && let Some(last) = self.last_trigger_at
            && now.saturating_duration_since(last) < self.policy.rapid_create_window
        {
            self.counters.rapid_creates += 1;
            warn!(
                call_id = %self.call_id,
                since_ms = now.saturating_duration_since(last).as_millis(),
                intent,
                "RAPID_CREATE: responses requested in quick succession"
            );
        }

        self.counters.triggers += 1;
        self.last_trigger_at = Some(now);

        let response_id = session.request_response(is_greeting).await?;
        info!(
            call_id = %self.call_id,
            response_id = %response_id,
            intent,
            is_greeting,
            attempt,
            "Response created"
        );
        self.active = Some(ResponseHandle {
            response_id: response_id.clone(),
            created_at: Instant::now(),
            status: ResponseStatus::Pending,
            is_greeting,
            intent: intent.to_string(),
            first_audio_at: None,
            last_audio_at: None,
            attempt,
        });
        Ok(response_id)
    }

    async fn recover(
        &mut self,
        session: &dyn ProviderSession,
        mut failed: FailedTurn,
        mut kind: ErrorKind,
        message: &str,
    ) -> TriggerOutcome {
        let mut message = message.to_string();
        loop {
            warn!(
                call_id = %self.call_id,
                intent = %failed.intent,
                attempt = failed.attempt,
                kind = %kind,
                error = %message,
                "Response failed"
            );

            if kind == ErrorKind::Fatal {
                return TriggerOutcome::HangupNow;
            }
            if failed.intent == INTENT_APOLOGY {
                return TriggerOutcome::HangupNow;
            }

            let call_age = Instant::now().saturating_duration_since(self.call_started_at);
            if failed.attempt > 0 || call_age >= self.policy.retry_window {
                return TriggerOutcome::ApologizeAndHangup;
            }

            self.counters.retries += 1;
            info!(
                call_id = %self.call_id,
                intent = %failed.intent,
                "Retrying response once"
            );
            match self
                .create(session, &failed.intent, true, failed.is_greeting, 1)
                .await
            {
                Ok(response_id) => {
                    return TriggerOutcome::Created {
                        response_id,
                        retried: true,
                    };
                }
                Err(err) => {
                    kind = err.kind();
                    message = err.to_string();
                    failed.attempt = 1;
                }
            }
        }
    }

    fn retire(&mut self, handle: ResponseHandle) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(handle);
    }

    fn check_cancel(&self, now: Instant) -> Result<String, ResponseError> {
        let handle = self.active().ok_or(ResponseError::NoActiveResponse)?;
        let age = now.saturating_duration_since(handle.created_at);

        if age < self.policy.min_response_age {
            return Err(ResponseError::TooYoung {
                response_id: handle.response_id.clone(),
                age_ms: age.as_millis(),
                min_ms: self.policy.min_response_age.as_millis(),
            });
        }
        if handle.first_audio_at.is_none() && age < self.policy.stale_audio {
            return Err(ResponseError::NoAudioYet {
                response_id: handle.response_id.clone(),
                age_ms: age.as_millis(),
            });
        }
        if let Some(last) = self.last_cancel_at {
            let since = now.saturating_duration_since(last);
            if since < self.policy.cancel_cooldown {
                return Err(ResponseError::Cooldown {
                    since_ms: since.as_millis(),
                    cooldown_ms: self.policy.cancel_cooldown.as_millis(),
                });
            }
        }
        Ok(handle.response_id.clone())
    }

    /// Cancel the active response.
    ///
    /// Returns false without touching the provider when the cancel is refused.
    /// On true the handle is terminal; the caller clears speaking state and
    /// discards that response's queued audio.
    pub async fn cancel(&mut self, session: &dyn ProviderSession, reason: &str) -> bool {
        let now = Instant::now();
        let response_id = match self.check_cancel(now) {
            Ok(id) => id,
            Err(refusal) => {
                self.counters.refused_cancels += 1;
                info!(
                    call_id = %self.call_id,
                    reason,
                    refusal = %refusal,
                    "CANCEL_REFUSED"
                );
                return false;
            }
        };

        self.counters.cancels += 1;
        self.last_cancel_at = Some(now);

        let status = match timeout(
            self.policy.cancel_ack_timeout,
            session.cancel_response(&response_id),
        )
        .await
        {
            Ok(Ok(CancelOutcome::Cancelled)) => ResponseStatus::Cancelled,
            Ok(Ok(CancelOutcome::NotActive)) => {
                info!(
                    call_id = %self.call_id,
                    response_id = %response_id,
                    "Provider had nothing to cancel, treating response as completed"
                );
                ResponseStatus::Completed
            }
            Ok(Ok(CancelOutcome::Unacknowledged)) | Err(_) => {
                warn!(
                    call_id = %self.call_id,
                    response_id = %response_id,
                    "Cancel not acknowledged in time, assuming cancelled"
                );
                ResponseStatus::Cancelled
            }
            Ok(Err(e)) => {
                warn!(
                    call_id = %self.call_id,
                    response_id = %response_id,
                    error = %e,
                    "Cancel request failed, assuming cancelled"
                );
                ResponseStatus::Cancelled
            }
        };

        if let Some(handle) = self.active.as_mut() {
            handle.status = status;
        }
        info!(
            call_id = %self.call_id,
            response_id = %response_id,
            reason,
            status = status.as_str(),
            "Response cancelled"
        );
        true
    }

    // =========================================================================
    // Provider acknowledgements
    // =========================================================================

    fn live_mut(&mut self, response_id: &str, event: &str) -> Option<&mut ResponseHandle> {
        let call_id = &self.call_id;
        match self.active.as_mut() {
            Some(handle) if handle.response_id == response_id && !handle.status.is_terminal() => {
                Some(handle)
            }
            _ => {
                debug!(call_id = %call_id, response_id, event, "Ignoring event for inactive response");
                None
            }
        }
    }

    /// Provider says the response is generating. Returns true on transition.
    pub fn on_started(&mut self, response_id: &str) -> bool {
        match self.live_mut(response_id, "started") {
            Some(handle) if handle.status == ResponseStatus::Pending => {
                handle.status = ResponseStatus::InProgress;
                true
            }
            _ => false,
        }
    }

    /// Record audio produced by a response. Returns false when the audio belongs
    /// to a response that is no longer live and must be discarded.
    pub fn on_audio(&mut self, response_id: &str, now: Instant) -> bool {
        match self.live_mut(response_id, "audio") {
            Some(handle) => {
                if handle.status == ResponseStatus::Pending {
                    handle.status = ResponseStatus::InProgress;
                }
                handle.first_audio_at.get_or_insert(now);
                handle.last_audio_at = Some(now);
                true
            }
            None => false,
        }
    }

    fn finish(&mut self, response_id: &str, status: ResponseStatus) -> Option<ResponseHandle> {
        let call_id = self.call_id.clone();
        let handle = self.live_mut(response_id, status.as_str())?;
        handle.status = status;
        debug!(call_id = %call_id, response_id, status = status.as_str(), "Response finished");
        Some(handle.clone())
    }

    /// Returns the handle when this event completed it.
    pub fn on_completed(&mut self, response_id: &str) -> Option<ResponseHandle> {
        self.finish(response_id, ResponseStatus::Completed)
    }

    pub fn on_cancelled(&mut self, response_id: &str) -> Option<ResponseHandle> {
        self.finish(response_id, ResponseStatus::Cancelled)
    }

    /// A cancel raced the end of the response; treat the live handle as completed.
    pub fn on_cancel_not_active(&mut self) -> Option<ResponseHandle> {
        let response_id = self.active()?.response_id.clone();
        self.finish(&response_id, ResponseStatus::Completed)
    }

    /// Provider reports the response failed. Retries once when allowed.
    ///
    /// Returns `None` when the event referred to a response that is not live.
    pub async fn on_failed(
        &mut self,
        session: &dyn ProviderSession,
        response_id: &str,
        kind: ErrorKind,
        message: &str,
    ) -> Option<TriggerOutcome> {
        let failed = {
            let handle = self.live_mut(response_id, "failed")?;
            handle.status = ResponseStatus::Failed;
            FailedTurn {
                intent: handle.intent.clone(),
                is_greeting: handle.is_greeting,
                attempt: handle.attempt,
            }
        };
        Some(self.recover(session, failed, kind, message).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::testing::MockProvider;
    use tokio::time::advance;

    fn tracker() -> ResponseTracker {
        ResponseTracker::new("call-1", Instant::now(), ResponsePolicy::default())
    }

    fn created(outcome: TriggerOutcome) -> String {
        match outcome {
            TriggerOutcome::Created { response_id, .. } => response_id,
            other => panic!("expected a response, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_greeting_trigger_creates_single_greeting_handle() {
        let provider = MockProvider::new();
        let session = provider.session();
        let mut tracker = tracker();

        let id = created(tracker.trigger(&session, INTENT_GREETING, true, true).await);

        let handle = tracker.active().unwrap();
        assert_eq!(handle.response_id, id);
        assert!(handle.is_greeting);
        assert_eq!(handle.status, ResponseStatus::Pending);
        assert_eq!(tracker.handles().filter(|h| h.is_greeting).count(), 1);
        assert_eq!(provider.state.lock().requests, vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_create_is_logged_and_bookkeeping_stays_single() {
        let provider = MockProvider::new();
        let session = provider.session();
        let mut tracker = tracker();

        let first = created(tracker.trigger(&session, INTENT_GREETING, true, true).await);
        advance(Duration::from_millis(100)).await;
        let second = created(tracker.trigger(&session, INTENT_CALLER_TURN, false, false).await);

        let counters = tracker.counters();
        assert_eq!(counters.double_creates, 1);
        assert_eq!(counters.rapid_creates, 1);
        assert_eq!(counters.triggers, 2);

        let live: Vec<_> = tracker
            .handles()
            .filter(|h| !h.status.is_terminal())
            .collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].response_id, second);

        // late audio of the superseded response is rejected
        assert!(!tracker.on_audio(&first, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_respects_minimum_age() {
        let provider = MockProvider::new();
        let session = provider.session();
        let mut tracker = tracker();

        let id = created(tracker.trigger(&session, INTENT_CALLER_TURN, false, false).await);
        tracker.on_started(&id);

        advance(Duration::from_millis(50)).await;
        assert!(tracker.on_audio(&id, Instant::now()));

        advance(Duration::from_millis(50)).await;
        assert!(!tracker.cancel(&session, "barge_in").await);
        assert!(provider.state.lock().cancels.is_empty());

        advance(Duration::from_millis(100)).await;
        assert!(tracker.cancel(&session, "barge_in").await);
        assert_eq!(provider.state.lock().cancels, vec![id.clone()]);
        assert_eq!(tracker.latest().unwrap().status, ResponseStatus::Cancelled);
        assert!(!tracker.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_refused_for_silent_young_response() {
        let provider = MockProvider::new();
        let session = provider.session();
        let mut tracker = tracker();

        let id = created(tracker.trigger(&session, INTENT_CALLER_TURN, false, false).await);
        tracker.on_started(&id);

        advance(Duration::from_millis(300)).await;
        assert!(!tracker.cancel(&session, "barge_in").await);

        advance(Duration::from_millis(500)).await;
        assert!(tracker.cancel(&session, "barge_in").await);
        assert_eq!(provider.state.lock().cancels.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_cooldown() {
        let provider = MockProvider::new();
        let session = provider.session();
        let mut tracker = tracker();

        let first = created(tracker.trigger(&session, INTENT_CALLER_TURN, false, false).await);
        advance(Duration::from_millis(160)).await;
        tracker.on_audio(&first, Instant::now());
        assert!(tracker.cancel(&session, "barge_in").await);

        let second = created(tracker.trigger(&session, INTENT_CALLER_TURN, false, false).await);
        tracker.on_audio(&second, Instant::now());
        advance(Duration::from_millis(160)).await;
        // second is old enough but the previous cancel was 160ms ago
        assert!(!tracker.cancel(&session, "barge_in").await);

        advance(Duration::from_millis(50)).await;
        assert!(tracker.cancel(&session, "barge_in").await);
        let counters = tracker.counters();
        assert_eq!(counters.cancels, 2);
        assert_eq!(counters.refused_cancels, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_without_active_response_is_refused() {
        let provider = MockProvider::new();
        let session = provider.session();
        let mut tracker = tracker();

        assert!(!tracker.cancel(&session, "barge_in").await);

        let id = created(tracker.trigger(&session, INTENT_CALLER_TURN, false, false).await);
        tracker.on_completed(&id);
        advance(Duration::from_secs(1)).await;
        assert!(!tracker.cancel(&session, "barge_in").await);
        assert!(provider.state.lock().cancels.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_not_active_counts_as_completed() {
        let provider = MockProvider::new();
        provider.set_cancel_outcome(CancelOutcome::NotActive);
        let session = provider.session();
        let mut tracker = tracker();

        let id = created(tracker.trigger(&session, INTENT_CALLER_TURN, false, false).await);
        tracker.on_audio(&id, Instant::now());
        advance(Duration::from_millis(200)).await;

        assert!(tracker.cancel(&session, "barge_in").await);
        assert_eq!(tracker.latest().unwrap().status, ResponseStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_transitions_are_idempotent() {
        let provider = MockProvider::new();
        let session = provider.session();
        let mut tracker = tracker();

        let id = created(tracker.trigger(&session, INTENT_CALLER_TURN, false, false).await);
        assert!(tracker.on_started(&id));
        assert!(!tracker.on_started(&id));
        assert!(tracker.on_completed(&id).is_some());
        assert!(tracker.on_completed(&id).is_none());
        assert!(tracker.on_cancelled(&id).is_none());
        assert!(tracker.on_completed("resp_unknown").is_none());
        assert_eq!(tracker.latest().unwrap().status, ResponseStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_once() {
        let provider = MockProvider::new();
        provider.fail_next_request(ProviderError::Timeout("response.created".into()));
        let session = provider.session();
        let mut tracker = tracker();

        let outcome = tracker.trigger(&session, INTENT_CALLER_TURN, false, false).await;
        assert!(matches!(outcome, TriggerOutcome::Created { retried: true, .. }));
        assert_eq!(tracker.counters().retries, 1);
        assert_eq!(tracker.active().unwrap().attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_failure_apologizes() {
        let provider = MockProvider::new();
        let session = provider.session();
        let mut tracker = tracker();

        let id = created(tracker.trigger(&session, INTENT_CALLER_TURN, false, false).await);
        let outcome = tracker
            .on_failed(&session, &id, ErrorKind::Transient, "server_error")
            .await;
        let retry_id = match outcome {
            Some(TriggerOutcome::Created { response_id, retried: true }) => response_id,
            other => panic!("unexpected outcome {other:?}"),
        };

        let outcome = tracker
            .on_failed(&session, &retry_id, ErrorKind::Transient, "server_error")
            .await;
        assert_eq!(outcome, Some(TriggerOutcome::ApologizeAndHangup));
        assert_eq!(tracker.counters().retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_retry_window_apologizes() {
        let provider = MockProvider::new();
        let session = provider.session();
        let mut tracker = tracker();

        advance(Duration::from_secs(61)).await;
        provider.fail_next_request(ProviderError::ProviderError("server_error".into()));
        let outcome = tracker.trigger(&session, INTENT_CALLER_TURN, false, false).await;
        assert_eq!(outcome, TriggerOutcome::ApologizeAndHangup);
        assert_eq!(tracker.counters().retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_hangs_up() {
        let provider = MockProvider::new();
        provider.fail_next_request(ProviderError::NotConnected);
        let session = provider.session();
        let mut tracker = tracker();

        let outcome = tracker.trigger(&session, INTENT_CALLER_TURN, false, false).await;
        assert_eq!(outcome, TriggerOutcome::HangupNow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_apology_hangs_up_immediately() {
        let provider = MockProvider::new();
        let session = provider.session();
        let mut tracker = tracker();

        let id = created(tracker.apologize(&session, "apologize").await);
        assert_eq!(provider.state.lock().texts, vec!["apologize".to_string()]);

        let outcome = tracker
            .on_failed(&session, &id, ErrorKind::Transient, "server_error")
            .await;
        assert_eq!(outcome, Some(TriggerOutcome::HangupNow));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_for_unknown_response_ignored() {
        let provider = MockProvider::new();
        let session = provider.session();
        let mut tracker = tracker();

        let outcome = tracker
            .on_failed(&session, "resp_unknown", ErrorKind::Transient, "x")
            .await;
        assert!(outcome.is_none());
        assert!(provider.state.lock().requests.is_empty());
    }
}
