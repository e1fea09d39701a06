//! RTVI over a plain WebSocket.
//!
//! Each RTVI envelope travels as one JSON text frame. The socket is owned by a
//! spawned task that multiplexes the outbound queue and inbound frames with
//! `tokio::select!`; decoded messages are forwarded to the session as
//! [`TransportEvent::Message`]. There is no media path, so mic and camera
//! switches only record the requested state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{debug, error, info, warn};

use super::config::{CLOSE_TIMEOUT, WebSocketTransportConfig, WsAuthBundle};
use crate::config::VoiceClientOptions;
use crate::core::messages::Message;
use crate::core::transport::{Transport, TransportEvent, TransportEventSender, TransportState};
use crate::errors::{RtviError, RtviResult};

/// State shared between the transport and its socket task.
#[derive(Default)]
struct Shared {
    state: Mutex<TransportState>,
    events: Mutex<Option<TransportEventSender>>,
    /// Set while `disconnect` is tearing the socket down
    intentional_disconnect: AtomicBool,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            if tx.send(event).is_err() {
                debug!("Session stopped listening to transport events");
            }
        }
    }

    fn set_state(&self, state: TransportState) {
        {
            let mut current = self.state.lock();
            if *current == state {
                return;
            }
            *current = state;
        }
        self.emit(TransportEvent::StateChanged(state));
    }
}

/// WebSocket transport for bots that speak RTVI over JSON text frames.
pub struct WebSocketTransport {
    config: WebSocketTransportConfig,
    shared: Arc<Shared>,
    ws_sender: Mutex<Option<mpsc::Sender<String>>>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
    mic_enabled: AtomicBool,
    cam_enabled: AtomicBool,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(WebSocketTransportConfig::default())
    }
}

impl WebSocketTransport {
    pub fn new(config: WebSocketTransportConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
            ws_sender: Mutex::new(None),
            connection_handle: Mutex::new(None),
            mic_enabled: AtomicBool::new(true),
            cam_enabled: AtomicBool::new(false),
        }
    }

    fn build_request(
        bundle: &WsAuthBundle,
    ) -> RtviResult<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let mut request = bundle
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RtviError::Transport(format!("Invalid WebSocket request: {}", e)))?;

        if let Some(token) = &bundle.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| RtviError::Transport(format!("Invalid token: {}", e)))?;
            request.headers_mut().insert(http::header::AUTHORIZATION, value);
        }
        Ok(request)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn initialize(
        &self,
        options: &VoiceClientOptions,
        events: TransportEventSender,
    ) -> RtviResult<()> {
        self.mic_enabled.store(options.enable_mic, Ordering::SeqCst);
        self.cam_enabled.store(options.enable_cam, Ordering::SeqCst);
        self.shared.intentional_disconnect.store(false, Ordering::SeqCst);
        *self.shared.events.lock() = Some(events);
        // A fresh session always hears the initial state
        *self.shared.state.lock() = TransportState::Idle;
        self.shared.set_state(TransportState::Initialized);
        Ok(())
    }

    async fn connect(&self, auth_bundle: serde_json::Value) -> RtviResult<()> {
        if self.shared.events.lock().is_none() {
            return Err(RtviError::Transport("transport not initialized".to_string()));
        }
        let bundle = WsAuthBundle::from_value(&auth_bundle)?;
        let request = Self::build_request(&bundle)?;

        self.shared.set_state(TransportState::Connecting);

        let connected = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await;
        let (ws_stream, _response) = match connected {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                self.shared.set_state(TransportState::Error);
                return Err(RtviError::Transport(format!(
                    "Failed to connect to {}: {}",
                    bundle.url, e
                )));
            }
            Err(_) => {
                self.shared.set_state(TransportState::Error);
                return Err(RtviError::Transport(format!(
                    "Timed out connecting to {}",
                    bundle.url
                )));
            }
        };

        info!(url = %bundle.url, "WebSocket transport connected");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<String>(self.config.channel_capacity);
        *self.ws_sender.lock() = Some(tx);

        let shared = self.shared.clone();
        self.shared.set_state(TransportState::Connected);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = rx.recv() => match outgoing {
                        Some(json) => {
                            if let Err(e) = ws_sink.send(WsMessage::Text(json.into())).await {
                                error!("Failed to send WebSocket message: {}", e);
                                shared.emit(TransportEvent::Error(e.to_string()));
                                break;
                            }
                        }
                        None => {
                            // Sender dropped by disconnect
                            let _ = ws_sink.send(WsMessage::Close(None)).await;
                            break;
                        }
                    },

                    incoming = ws_stream.next() => match incoming {
                        Some(Ok(WsMessage::Text(text))) => match Message::parse(&text) {
                            Ok(message) => shared.emit(TransportEvent::Message(message)),
                            Err(e) => warn!("Failed to parse RTVI message: {} - {}", e, text),
                        },
                        Some(Ok(WsMessage::Ping(data))) => {
                            if let Err(e) = ws_sink.send(WsMessage::Pong(data)).await {
                                error!("Failed to send pong: {}", e);
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            info!("WebSocket closed by server");
                            break;
                        }
                        Some(Err(e)) => {
                            error!("WebSocket error: {}", e);
                            if !shared.intentional_disconnect.load(Ordering::SeqCst) {
                                shared.emit(TransportEvent::Error(e.to_string()));
                            }
                            break;
                        }
                        Some(Ok(_)) => {}
                    },
                }
            }

            if !shared.intentional_disconnect.load(Ordering::SeqCst) {
                shared.set_state(TransportState::Disconnected);
            }
            debug!("WebSocket task finished");
        });
        *self.connection_handle.lock() = Some(handle);

        Ok(())
    }

    async fn disconnect(&self) -> RtviResult<()> {
        self.shared.intentional_disconnect.store(true, Ordering::SeqCst);

        // Dropping the sender asks the socket task to send a close frame
        self.ws_sender.lock().take();

        let handle = self.connection_handle.lock().take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(CLOSE_TIMEOUT, handle).await.is_err() {
                warn!("WebSocket did not close in time, aborting");
                abort.abort();
            }
        }

        self.shared.set_state(TransportState::Disconnected);
        self.shared.events.lock().take();
        info!("WebSocket transport disconnected");
        Ok(())
    }

    fn send_message(&self, message: &Message) -> RtviResult<()> {
        let json = message.serialize()?;
        match self.ws_sender.lock().as_ref() {
            Some(tx) => tx.try_send(json).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    RtviError::Transport("outbound queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => RtviError::NotConnected,
            }),
            None => Err(RtviError::NotConnected),
        }
    }

    fn state(&self) -> TransportState {
        *self.shared.state.lock()
    }

    fn enable_mic(&self, enable: bool) {
        self.mic_enabled.store(enable, Ordering::SeqCst);
    }

    fn enable_cam(&self, enable: bool) {
        self.cam_enabled.store(enable, Ordering::SeqCst);
    }

    fn is_mic_enabled(&self) -> bool {
        self.mic_enabled.load(Ordering::SeqCst)
    }

    fn is_cam_enabled(&self) -> bool {
        self.cam_enabled.load(Ordering::SeqCst)
    }
}
