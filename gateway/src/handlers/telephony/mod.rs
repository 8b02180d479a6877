//! Telephony WebSocket handlers
//!
//! # Protocol
//!
//! ## Carrier → Gateway
//!
//! - **start**: `{"event":"start","call_id","direction","metadata":{business_id,from,to,...}}`
//! - **media**: `{"event":"media","payload":"<base64 mu-law>"}`
//! - **stop**: `{"event":"stop"}`
//!
//! Other events are ignored.
//!
//! ## Gateway → Carrier
//!
//! - **media**: `{"event":"media","call_id","payload"}`, one 20 ms frame each
//! - **clear**: `{"event":"clear","call_id"}` when the caller barges in
//! - **hangup**: `{"event":"hangup","call_id","reason"}`, followed by a close frame

mod handler;
pub mod messages;

pub use handler::telephony_handler;
