//! Scripted provider used by unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};

use super::base::{
    CancelOutcome, ProviderError, ProviderEvent, ProviderKind, ProviderResult, ProviderSession,
    ProviderSessionConfig, VoiceProvider,
};

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub sessions_started: usize,
    pub last_config: Option<ProviderSessionConfig>,
    pub audio_frames: usize,
    pub texts: Vec<String>,
    pub instruction_updates: Vec<String>,
    pub requests: Vec<bool>,
    pub cancels: Vec<String>,
    pub closes: usize,
    pub next_id: u32,
    pub request_failures: VecDeque<ProviderError>,
    /// Holds every `request_response` this long before answering
    pub request_delay: Option<Duration>,
    pub cancel_outcome: Option<CancelOutcome>,
    pub fail_start: bool,
}

#[derive(Clone, Default)]
pub(crate) struct MockProvider {
    pub state: Arc<Mutex<MockState>>,
    events: Arc<Mutex<Option<mpsc::Sender<ProviderEvent>>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an event into the running session.
    pub async fn emit(&self, event: ProviderEvent) {
        let tx = self.events.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    /// Drop the event sender, as if the backend went away.
    pub fn disconnect(&self) {
        self.events.lock().take();
    }

    pub fn session(&self) -> MockSession {
        MockSession {
            state: self.state.clone(),
        }
    }

    pub fn fail_next_request(&self, error: ProviderError) {
        self.state.lock().request_failures.push_back(error);
    }

    pub fn set_cancel_outcome(&self, outcome: CancelOutcome) {
        self.state.lock().cancel_outcome = Some(outcome);
    }
}

#[async_trait]
impl VoiceProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Realtime
    }

    async fn start_session(
        &self,
        config: ProviderSessionConfig,
    ) -> ProviderResult<(Box<dyn ProviderSession>, mpsc::Receiver<ProviderEvent>)> {
        {
            let mut state = self.state.lock();
            if state.fail_start {
                return Err(ProviderError::ConnectionFailed("mock refused".into()));
            }
            state.sessions_started += 1;
            state.last_config = Some(config);
        }
        let (tx, rx) = mpsc::channel(64);
        *self.events.lock() = Some(tx);
        Ok((Box::new(self.session()), rx))
    }
}

pub(crate) struct MockSession {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl ProviderSession for MockSession {
    async fn send_audio_frame(&self, _pcm: &[i16]) -> ProviderResult<()> {
        self.state.lock().audio_frames += 1;
        Ok(())
    }

    async fn send_text(&self, text: &str) -> ProviderResult<()> {
        self.state.lock().texts.push(text.to_string());
        Ok(())
    }

    async fn update_instructions(&self, instructions: &str) -> ProviderResult<()> {
        self.state
            .lock()
            .instruction_updates
            .push(instructions.to_string());
        Ok(())
    }

    async fn request_response(&self, is_greeting: bool) -> ProviderResult<String> {
        let delay = {
            let mut state = self.state.lock();
            state.requests.push(is_greeting);
            state.request_delay
        };
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        let mut state = self.state.lock();
        if let Some(err) = state.request_failures.pop_front() {
            return Err(err);
        }
        state.next_id += 1;
        Ok(format!("resp_{}", state.next_id))
    }

    async fn cancel_response(&self, response_id: &str) -> ProviderResult<CancelOutcome> {
        let mut state = self.state.lock();
        state.cancels.push(response_id.to_string());
        Ok(state.cancel_outcome.unwrap_or(CancelOutcome::Cancelled))
    }

    async fn close(&self) -> ProviderResult<()> {
        self.state.lock().closes += 1;
        Ok(())
    }
}
