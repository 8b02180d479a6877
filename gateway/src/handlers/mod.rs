//! HTTP and WebSocket request handlers
//!
//! - `api` - health check and active call listing
//! - `recording` - call recording download
//! - `telephony` - carrier audio WebSocket

pub mod api;
pub mod recording;
pub mod telephony;

pub use telephony::telephony_handler;
