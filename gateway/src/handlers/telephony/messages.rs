//! Telephony WebSocket message types
//!
//! JSON text frames tagged by `event`. Audio travels as base64 mu-law, 8 kHz
//! mono, in 20 ms (160 byte) frames.

use std::collections::HashMap;

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::audio::FRAME_BYTES;
use crate::core::call::{CallOutput, CallStart, Direction, HangupReason};

// =============================================================================
// Incoming Messages (Carrier -> Gateway)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelephonyIncomingMessage {
    Start {
        call_id: String,
        #[serde(default)]
        direction: Direction,
        #[serde(default)]
        metadata: HashMap<String, serde_json::Value>,
    },
    Media {
        payload: String,
    },
    Stop,
    /// Events the gateway does not act on (marks, dtmf, keepalives)
    #[serde(other)]
    Unknown,
}

fn metadata_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.trim().is_empty() => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Build the call description from a `start` event.
///
/// `business_id`, `from` and `to` are lifted out of the metadata; the rest is
/// kept as strings for the lead store.
pub fn call_start(
    call_id: String,
    direction: Direction,
    metadata: HashMap<String, serde_json::Value>,
) -> CallStart {
    let mut fields: HashMap<String, String> = metadata
        .into_iter()
        .filter_map(|(key, value)| metadata_string(value).map(|v| (key, v)))
        .collect();

    CallStart {
        call_id,
        direction,
        business_id: fields.remove("business_id").unwrap_or_default(),
        caller: fields.remove("from"),
        callee: fields.remove("to"),
        metadata: fields,
    }
}

// =============================================================================
// Outgoing Messages (Gateway -> Carrier)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelephonyOutgoingMessage {
    Media { call_id: String, payload: String },
    Clear { call_id: String },
    Hangup { call_id: String, reason: HangupReason },
}

impl TelephonyOutgoingMessage {
    pub fn from_output(call_id: &str, output: CallOutput) -> Self {
        let call_id = call_id.to_string();
        match output {
            CallOutput::Media(frame) => TelephonyOutgoingMessage::Media {
                call_id,
                payload: encode_frame(&frame),
            },
            CallOutput::Clear => TelephonyOutgoingMessage::Clear { call_id },
            CallOutput::Hangup(reason) => TelephonyOutgoingMessage::Hangup { call_id, reason },
        }
    }
}

pub fn encode_frame(frame: &[u8; FRAME_BYTES]) -> String {
    BASE64_STANDARD.encode(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_start_event() {
        let raw = json!({
            "event": "start",
            "call_id": "c-1",
            "direction": "outbound",
            "metadata": {
                "business_id": "acme",
                "from": "+972501234567",
                "to": "+97231234567",
                "campaign": 7,
                "note": null
            }
        });
        let message: TelephonyIncomingMessage = serde_json::from_value(raw).unwrap();
        let TelephonyIncomingMessage::Start {
            call_id,
            direction,
            metadata,
        } = message
        else {
            panic!("expected start");
        };

        let start = call_start(call_id, direction, metadata);
        assert_eq!(start.call_id, "c-1");
        assert_eq!(start.direction, Direction::Outbound);
        assert_eq!(start.business_id, "acme");
        assert_eq!(start.caller.as_deref(), Some("+972501234567"));
        assert_eq!(start.callee.as_deref(), Some("+97231234567"));
        assert_eq!(start.metadata.get("campaign").map(String::as_str), Some("7"));
        assert!(!start.metadata.contains_key("note"));
    }

    #[test]
    fn test_start_defaults_to_inbound() {
        let message: TelephonyIncomingMessage =
            serde_json::from_str(r#"{"event":"start","call_id":"c-2"}"#).unwrap();
        assert!(matches!(
            message,
            TelephonyIncomingMessage::Start { direction: Direction::Inbound, .. }
        ));
    }

    #[test]
    fn test_unknown_event_is_tolerated() {
        let message: TelephonyIncomingMessage =
            serde_json::from_str(r#"{"event":"mark","name":"x"}"#).unwrap();
        assert_eq!(message, TelephonyIncomingMessage::Unknown);

        let stop: TelephonyIncomingMessage = serde_json::from_str(r#"{"event":"stop"}"#).unwrap();
        assert_eq!(stop, TelephonyIncomingMessage::Stop);
    }

    #[test]
    fn test_outgoing_shapes() {
        let media = TelephonyOutgoingMessage::from_output("c-1", CallOutput::Media([0xFF; 160]));
        let value = serde_json::to_value(&media).unwrap();
        assert_eq!(value["event"], "media");
        assert_eq!(value["call_id"], "c-1");
        assert_eq!(
            BASE64_STANDARD
                .decode(value["payload"].as_str().unwrap())
                .unwrap(),
            vec![0xFF; 160]
        );

        let clear = serde_json::to_value(TelephonyOutgoingMessage::from_output(
            "c-1",
            CallOutput::Clear,
        ))
        .unwrap();
        assert_eq!(clear, json!({"event": "clear", "call_id": "c-1"}));

        let hangup = serde_json::to_value(TelephonyOutgoingMessage::from_output(
            "c-1",
            CallOutput::Hangup(HangupReason::SilenceTimeout),
        ))
        .unwrap();
        assert_eq!(
            hangup,
            json!({"event": "hangup", "call_id": "c-1", "reason": "silence_timeout"})
        );
    }
}
