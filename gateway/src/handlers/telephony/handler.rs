//! Telephony WebSocket handler
//!
//! One connection carries one call. The handler waits for the `start` event,
//! runs the call task, and bridges JSON frames to the call channels in both
//! directions.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tracing::{debug, error, info, warn};

use crate::core::call::{CallInput, CallOutput, CallStart, run_call};
use crate::state::AppState;

use super::messages::{TelephonyIncomingMessage, TelephonyOutgoingMessage, call_start};

/// Inbound media buffered ahead of the call task (~5 s of audio)
const INBOUND_CHANNEL_SIZE: usize = 256;

/// Outbound events buffered ahead of the socket writer
const OUTBOUND_CHANNEL_SIZE: usize = 64;

/// How long a connection may stay open without sending `start`
const START_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum WebSocket message size (1 MB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Telephony WebSocket handler
///
/// Upgrades the HTTP connection to a WebSocket carrying one call.
pub async fn telephony_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    debug!("Telephony WebSocket connection upgrade requested");

    ws.max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_telephony_socket(socket, state))
}

fn parse(text: &str) -> Option<TelephonyIncomingMessage> {
    match serde_json::from_str(text) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(error = %e, "Ignoring malformed telephony message");
            None
        }
    }
}

/// Read frames until the `start` event. `None` means the carrier left first.
async fn await_start(receiver: &mut SplitStream<WebSocket>) -> Option<CallStart> {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match parse(&text) {
                Some(TelephonyIncomingMessage::Start {
                    call_id,
                    direction,
                    metadata,
                }) => return Some(call_start(call_id, direction, metadata)),
                Some(TelephonyIncomingMessage::Stop) => return None,
                Some(_) => debug!("Ignoring telephony event before start"),
                None => {}
            },
            Ok(Message::Close(_)) => return None,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Telephony WebSocket error before start");
                return None;
            }
        }
    }
    None
}

async fn handle_telephony_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let start = match timeout(START_TIMEOUT, await_start(&mut receiver)).await {
        Ok(Some(start)) => start,
        Ok(None) => {
            info!("Telephony connection closed before start");
            return;
        }
        Err(_) => {
            warn!("No start event received, closing telephony connection");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let call_id = start.call_id.clone();
    info!(
        call_id = %call_id,
        business_id = %start.business_id,
        direction = %start.direction,
        "Telephony call started"
    );

    let (input_tx, input_rx) = mpsc::channel::<CallInput>(INBOUND_CHANNEL_SIZE);
    let (output_tx, mut output_rx) = mpsc::channel::<CallOutput>(OUTBOUND_CHANNEL_SIZE);

    let mut call_task = tokio::spawn(run_call(
        app_state.services.clone(),
        start,
        input_rx,
        output_tx,
    ));

    // Sender task for outgoing messages
    let sender_call_id = call_id.clone();
    let sender_task = tokio::spawn(async move {
        while let Some(output) = output_rx.recv().await {
            let hangup = matches!(output, CallOutput::Hangup(_));
            let message = TelephonyOutgoingMessage::from_output(&sender_call_id, output);
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    error!(call_id = %sender_call_id, "Failed to serialize outgoing message: {}", e);
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(json.into())).await {
                debug!(call_id = %sender_call_id, "Telephony socket closed while sending: {}", e);
                break;
            }
            if hangup {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    });

    let mut call_finished = false;
    loop {
        tokio::select! {
            message = receiver.next() => {
                let input = match message {
                    Some(Ok(Message::Text(text))) => match parse(&text) {
                        Some(TelephonyIncomingMessage::Media { payload }) => CallInput::media(payload),
                        Some(TelephonyIncomingMessage::Stop) => {
                            info!(call_id = %call_id, "Carrier sent stop");
                            CallInput::Stop
                        }
                        Some(TelephonyIncomingMessage::Start { .. }) => {
                            warn!(call_id = %call_id, "Ignoring repeated start event");
                            continue;
                        }
                        Some(TelephonyIncomingMessage::Unknown) | None => continue,
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!(call_id = %call_id, "Telephony WebSocket closed by carrier");
                        CallInput::Stop
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(call_id = %call_id, error = %e, "Telephony WebSocket error");
                        CallInput::Stop
                    }
                };
                let stop = input == CallInput::Stop;
                if input_tx.send(input).await.is_err() || stop {
                    break;
                }
            }
            result = &mut call_task => {
                call_finished = true;
                if let Err(e) = result {
                    error!(call_id = %call_id, "Call task failed: {}", e);
                }
                break;
            }
        }
    }

    drop(input_tx);
    if !call_finished {
        match call_task.await {
            Ok(summary) => debug!(
                call_id = %call_id,
                reason = ?summary.hangup_reason,
                "Call task finished"
            ),
            Err(e) => error!(call_id = %call_id, "Call task failed: {}", e),
        }
    }
    if let Err(e) = sender_task.await {
        error!(call_id = %call_id, "Telephony sender task failed: {}", e);
    }

    info!(call_id = %call_id, "Telephony connection closed");
}
