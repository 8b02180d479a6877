//! Hangup triggers that run beside the call loop.
//!
//! Silence, maximum duration, supersession and the carrier's `stop` all raise
//! one [`HangupSignal`]. The call loop selects on it, and every provider or
//! collaborator await in the loop races it, so a slow backend never holds a
//! hangup back.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::HangupReason;
use crate::core::turn::SharedTurnTracker;

const TIMER_PERIOD: Duration = Duration::from_secs(1);

/// First-reason-wins hangup latch.
#[derive(Debug, Clone, Default)]
pub struct HangupSignal {
    token: CancellationToken,
    reason: Arc<Mutex<Option<HangupReason>>>,
}

impl HangupSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when a hangup was already raised.
    pub fn raise(&self, reason: HangupReason) -> bool {
        {
            let mut slot = self.reason.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
        }
        self.token.cancel();
        true
    }

    pub fn reason(&self) -> Option<HangupReason> {
        *self.reason.lock()
    }

    /// Resolves with the reason once a hangup is raised.
    pub async fn raised(&self) -> HangupReason {
        loop {
            self.token.cancelled().await;
            if let Some(reason) = self.reason() {
                return reason;
            }
        }
    }

    /// Await `fut` unless a hangup is raised first.
    pub async fn race<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            output = fut => Some(output),
        }
    }
}

/// Silence, max-duration and supersession watcher for one call.
pub struct HangupTimer {
    pub call_id: String,
    pub started_at: Instant,
    pub max_duration: Duration,
    pub silence_timeout: Duration,
    pub turns: SharedTurnTracker,
    pub superseded: CancellationToken,
    pub signal: HangupSignal,
    pub token: CancellationToken,
}

impl HangupTimer {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut tick = interval(TIMER_PERIOD);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = self.signal.raised() => return,
                _ = self.superseded.cancelled() => {
                    self.signal.raise(HangupReason::Superseded);
                    return;
                }
                _ = tick.tick() => {
                    if let Some(reason) = self.check(Instant::now()) {
                        self.signal.raise(reason);
                        return;
                    }
                }
            }
        }
    }

    fn check(&self, now: Instant) -> Option<HangupReason> {
        if now.saturating_duration_since(self.started_at) >= self.max_duration {
            info!(call_id = %self.call_id, "Maximum call duration reached");
            return Some(HangupReason::MaxDuration);
        }
        let idle = self.turns.lock().idle_for(now);
        if idle >= self.silence_timeout {
            info!(call_id = %self.call_id, idle_secs = idle.as_secs(), "Silence timeout");
            return Some(HangupReason::SilenceTimeout);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::turn::TurnTracker;
    use tokio::time::sleep;

    fn timer(signal: &HangupSignal, turns: SharedTurnTracker) -> HangupTimer {
        HangupTimer {
            call_id: "call-1".into(),
            started_at: Instant::now(),
            max_duration: Duration::from_secs(60),
            silence_timeout: Duration::from_secs(20),
            turns,
            superseded: CancellationToken::new(),
            signal: signal.clone(),
            token: CancellationToken::new(),
        }
    }

    #[test]
    fn test_first_reason_wins() {
        let signal = HangupSignal::new();
        assert_eq!(signal.reason(), None);
        assert!(signal.raise(HangupReason::RemoteHangup));
        assert!(!signal.raise(HangupReason::SilenceTimeout));
        assert_eq!(signal.reason(), Some(HangupReason::RemoteHangup));
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_gives_up_when_raised() {
        let signal = HangupSignal::new();
        let raiser = signal.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            raiser.raise(HangupReason::RemoteHangup);
        });

        let started = Instant::now();
        let out = signal.race(sleep(Duration::from_secs(5))).await;
        assert!(out.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(signal.race(async { 7 }).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_raises_signal() {
        let signal = HangupSignal::new();
        let turns = TurnTracker::new("call-1", Instant::now(), 2, false).shared();
        let task = timer(&signal, turns).spawn();

        sleep(Duration::from_secs(19)).await;
        assert_eq!(signal.reason(), None);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(signal.reason(), Some(HangupReason::SilenceTimeout));
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_wins_over_activity() {
        let signal = HangupSignal::new();
        let turns = TurnTracker::new("call-1", Instant::now(), 2, false).shared();
        turns.lock().on_speech_started(Instant::now());
        let task = timer(&signal, turns).spawn();

        sleep(Duration::from_secs(61)).await;
        assert_eq!(signal.reason(), Some(HangupReason::MaxDuration));
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_supersession_raises_signal() {
        let signal = HangupSignal::new();
        let turns = TurnTracker::new("call-1", Instant::now(), 2, false).shared();
        let timer = timer(&signal, turns);
        let superseded = timer.superseded.clone();
        let task = timer.spawn();

        superseded.cancel();
        task.await.unwrap();
        assert_eq!(signal.reason(), Some(HangupReason::Superseded));
    }
}
