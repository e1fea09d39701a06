//! Session fixtures: options, bot messages, handshake mocks and event capture.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rtvi_client::{
    ConfigOption, EventKind, MemoryTransport, Message, MessageType, ServiceConfigOption,
    VoiceClient, VoiceClientOptions, VoiceEvent,
};

pub const HANDSHAKE_PATH: &str = "/connect";

/// Service configuration the tests request at connect time.
pub fn sample_config() -> Vec<ServiceConfigOption> {
    vec![
        ServiceConfigOption::new(
            "llm",
            vec![
                ConfigOption::new("model", json!("llama3-70b")),
                ConfigOption::new("temperature", json!(0.4)),
            ],
        ),
        ServiceConfigOption::new("tts", vec![ConfigOption::new("voice", json!("en-US-1"))]),
    ]
}

/// Options pointing at a mock handshake server.
pub fn options_for(server: &MockServer) -> VoiceClientOptions {
    let mut options = VoiceClientOptions::new(
        format!("{}{}", server.uri(), HANDSHAKE_PATH),
        [("llm", "together"), ("tts", "edge")],
    );
    options.config = sample_config();
    options
}

/// Answer the handshake POST with `bundle`.
pub async fn mount_handshake(server: &MockServer, bundle: Value) {
    Mock::given(method("POST"))
        .and(path(HANDSHAKE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle))
        .mount(server)
        .await;
}

pub fn bot_ready_message(version: &str) -> Message {
    Message::new(
        MessageType::BotReady,
        json!({"version": version, "config": sample_config()}),
    )
}

/// Poll `condition` until it holds or a generous deadline passes.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached within 5s");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Connect `client` over a memory transport and play the bot's side of the handshake.
pub async fn connect_ready(client: &VoiceClient, transport: &MemoryTransport) {
    let connecting = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    wait_until(|| transport.last_sent(&MessageType::ClientReady).is_some()).await;
    transport.inject_message(bot_ready_message("1.0.0"));
    connecting
        .await
        .expect("connect task panicked")
        .expect("connect failed");
}

/// Records every event of the kinds it is attached to.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<VoiceEvent>>>,
}

impl EventRecorder {
    pub fn attach(client: &VoiceClient, kinds: &[EventKind]) -> Self {
        let recorder = Self::default();
        for kind in kinds {
            let events = recorder.events.clone();
            client.on(
                *kind,
                Arc::new(move |event: &VoiceEvent| events.lock().push(event.clone())),
            );
        }
        recorder
    }

    pub fn events(&self) -> Vec<VoiceEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(VoiceEvent::kind).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }
}
