//! Per-call orchestration.
//!
//! A call is one tokio task that owns every piece of per-call state. Helper
//! tasks pace playback and watch for hangups. The call talks to the telephony
//! leg through [`CallInput`] / [`CallOutput`] channels, so the same state
//! machine runs behind the WebSocket handler and inside tests.

pub mod goodbye;
mod hangup;
pub mod outbound;
mod phase;
pub mod recorder;
mod session;
pub mod writer;

pub use goodbye::GoodbyeDetector;
pub use phase::{CallPhase, Direction, HangupReason};
pub use session::{CallServices, CallSummary, run_call};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::Instant;

use crate::core::audio::FRAME_BYTES;

/// Call metadata carried by the telephony `start` event.
#[derive(Debug, Clone, Default)]
pub struct CallStart {
    pub call_id: String,
    pub direction: Direction,
    pub business_id: String,
    pub caller: Option<String>,
    pub callee: Option<String>,
    /// Remaining metadata fields, forwarded to the lead store
    pub metadata: HashMap<String, String>,
}

/// Telephony events consumed by a running call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallInput {
    Media {
        /// Base64 mu-law payload
        payload: String,
        /// When the telephony leg read the message off the socket
        received_at: Instant,
    },
    Stop,
}

impl CallInput {
    /// Media received just now.
    pub fn media(payload: impl Into<String>) -> Self {
        CallInput::Media {
            payload: payload.into(),
            received_at: Instant::now(),
        }
    }
}

/// Telephony events produced by a running call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutput {
    Media([u8; FRAME_BYTES]),
    /// Flush whatever the carrier still buffers
    Clear,
    Hangup(HangupReason),
}

/// Once-only teardown latch, safe to share across tasks.
#[derive(Debug, Clone, Default)]
pub struct TeardownGuard(Arc<AtomicBool>);

impl TeardownGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true for exactly one caller.
    pub fn begin(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_done(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
