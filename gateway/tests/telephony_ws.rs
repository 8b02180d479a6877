//! Telephony WebSocket end-to-end tests
//!
//! Runs the real router on a local port with a scripted AI provider and
//! drives it with a tokio-tungstenite client acting as the carrier.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use callbridge_gateway::config::{CallConfig, ServerConfig};
use callbridge_gateway::core::call::{CallServices, GoodbyeDetector};
use callbridge_gateway::core::collaborators::{
    AllowAllGate, CallInstructions, LoggingLeadStore, LoggingPostCallSink, StaticPromptProvider,
};
use callbridge_gateway::core::provider::{
    CancelOutcome, ProviderEvent, ProviderKind, ProviderResult, ProviderSession,
    ProviderSessionConfig, VoiceProvider,
};
use callbridge_gateway::core::registry::CallRegistry;
use callbridge_gateway::{routes, state::AppState};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Samples of assistant audio per response (10 frames)
const REPLY_SAMPLES: usize = 1600;

#[derive(Default)]
struct Counters {
    sessions: AtomicUsize,
    audio_frames: AtomicUsize,
    closes: AtomicUsize,
}

/// Answers every response request with a short burst of audio.
struct ScriptedProvider {
    counters: Arc<Counters>,
}

struct ScriptedSession {
    counters: Arc<Counters>,
    events: mpsc::Sender<ProviderEvent>,
    next_id: AtomicUsize,
}

#[async_trait]
impl VoiceProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Realtime
    }

    async fn start_session(
        &self,
        _config: ProviderSessionConfig,
    ) -> ProviderResult<(Box<dyn ProviderSession>, mpsc::Receiver<ProviderEvent>)> {
        self.counters.sessions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        Ok((
            Box::new(ScriptedSession {
                counters: self.counters.clone(),
                events: tx,
                next_id: AtomicUsize::new(0),
            }),
            rx,
        ))
    }
}

#[async_trait]
impl ProviderSession for ScriptedSession {
    async fn send_audio_frame(&self, _pcm: &[i16]) -> ProviderResult<()> {
        self.counters.audio_frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_text(&self, _text: &str) -> ProviderResult<()> {
        Ok(())
    }

    async fn update_instructions(&self, _instructions: &str) -> ProviderResult<()> {
        Ok(())
    }

    async fn request_response(&self, _is_greeting: bool) -> ProviderResult<String> {
        let id = format!("resp_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let events = self.events.clone();
        let response_id = id.clone();
        tokio::spawn(async move {
            let _ = events
                .send(ProviderEvent::ResponseStarted {
                    response_id: response_id.clone(),
                })
                .await;
            let _ = events
                .send(ProviderEvent::AudioChunk {
                    response_id: response_id.clone(),
                    pcm: vec![2000; REPLY_SAMPLES],
                })
                .await;
            let _ = events
                .send(ProviderEvent::ResponseCompleted { response_id })
                .await;
        });
        Ok(id)
    }

    async fn cancel_response(&self, _response_id: &str) -> ProviderResult<CancelOutcome> {
        Ok(CancelOutcome::NotActive)
    }

    async fn close(&self) -> ProviderResult<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn start_server() -> (SocketAddr, Arc<Counters>, Arc<AppState>) {
    let counters = Arc::new(Counters::default());
    let call = CallConfig::default();
    let services = CallServices {
        goodbye: Arc::new(GoodbyeDetector::new(call.goodbye_phrases.as_slice()).unwrap()),
        config: Arc::new(call),
        provider: Arc::new(ScriptedProvider {
            counters: counters.clone(),
        }),
        registry: Arc::new(CallRegistry::new()),
        prompts: Arc::new(StaticPromptProvider::new(CallInstructions::default())),
        leads: Arc::new(LoggingLeadStore),
        completion_gate: Arc::new(AllowAllGate),
        post_call: Arc::new(LoggingPostCallSink),
        recordings_dir: None,
    };
    let state = AppState::with_services(ServerConfig::default(), services);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = routes::create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, counters, state)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/telephony"))
        .await
        .unwrap();
    client
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

fn start_event(call_id: &str) -> Value {
    json!({
        "event": "start",
        "call_id": call_id,
        "direction": "inbound",
        "metadata": {"business_id": "acme", "from": "+972501234567", "to": "+97231234567"}
    })
}

/// Next JSON event from the gateway, skipping control frames.
async fn next_event(client: &mut Client) -> Option<Value> {
    loop {
        let message = timeout(Duration::from_secs(5), client.next())
            .await
            .ok()??
            .ok()?;
        match message {
            Message::Text(text) => return serde_json::from_str(&text).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

async fn wait_for_empty_registry(state: &AppState) {
    for _ in 0..50 {
        if state.registry().is_empty() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("call still registered");
}

#[tokio::test]
async fn test_greeting_audio_reaches_carrier() {
    let (addr, counters, state) = start_server().await;
    let mut client = connect(addr).await;

    send_json(&mut client, start_event("CA-greet")).await;

    for _ in 0..REPLY_SAMPLES / 160 {
        let event = next_event(&mut client).await.unwrap();
        assert_eq!(event["event"], "media");
        assert_eq!(event["call_id"], "CA-greet");
        let payload = BASE64_STANDARD
            .decode(event["payload"].as_str().unwrap())
            .unwrap();
        assert_eq!(payload.len(), 160);
    }
    assert!(state.registry().contains("CA-greet"));
    assert_eq!(counters.sessions.load(Ordering::SeqCst), 1);

    let frame = BASE64_STANDARD.encode([0xFFu8; 160]);
    for _ in 0..10 {
        send_json(&mut client, json!({"event": "media", "payload": frame})).await;
    }
    send_json(&mut client, json!({"event": "mark", "name": "ignored"})).await;
    send_json(&mut client, json!({"event": "stop"})).await;

    let hangup = next_event(&mut client).await.unwrap();
    assert_eq!(hangup["event"], "hangup");
    assert_eq!(hangup["reason"], "remote_hangup");

    wait_for_empty_registry(&state).await;
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reconnect_supersedes_previous_connection() {
    let (addr, counters, state) = start_server().await;

    let mut first = connect(addr).await;
    send_json(&mut first, start_event("CA-dup")).await;
    assert_eq!(next_event(&mut first).await.unwrap()["event"], "media");

    let mut second = connect(addr).await;
    send_json(&mut second, start_event("CA-dup")).await;

    let mut superseded = None;
    while let Some(event) = next_event(&mut first).await {
        if event["event"] == "hangup" {
            superseded = Some(event);
            break;
        }
    }
    let superseded = superseded.unwrap();
    assert_eq!(superseded["reason"], "superseded");

    assert_eq!(next_event(&mut second).await.unwrap()["event"], "media");
    assert!(state.registry().contains("CA-dup"));
    assert_eq!(state.registry().len(), 1);
    assert_eq!(counters.sessions.load(Ordering::SeqCst), 2);

    send_json(&mut second, json!({"event": "stop"})).await;
    wait_for_empty_registry(&state).await;
}

#[tokio::test]
async fn test_close_before_start_registers_nothing() {
    let (addr, counters, state) = start_server().await;

    let mut client = connect(addr).await;
    send_json(&mut client, json!({"event": "media", "payload": "AAAA"})).await;
    send_json(&mut client, json!({"event": "connected"})).await;
    client.close(None).await.unwrap();

    sleep(Duration::from_millis(100)).await;
    assert!(state.registry().is_empty());
    assert_eq!(counters.sessions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_calls_endpoint_lists_active_call() {
    let (addr, _counters, state) = start_server().await;
    let mut client = connect(addr).await;
    send_json(&mut client, start_event("CA-list")).await;
    next_event(&mut client).await.unwrap();

    let body: Value = reqwest::get(format!("http://{addr}/calls"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["calls"][0]["call_id"], "CA-list");
    assert_eq!(body["calls"][0]["business_id"], "acme");

    let health: Value = reqwest::get(format!("http://{addr}/"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({"status": "OK"}));

    send_json(&mut client, json!({"event": "stop"})).await;
    wait_for_empty_registry(&state).await;
}
