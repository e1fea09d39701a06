//! Voice session orchestrator.
//!
//! [`VoiceClient`] composes a [`Transport`], a [`MessageDispatcher`] and an
//! [`EventBus`] and drives the session state machine:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Ready -> Disconnecting -> Disconnected
//!            \______________\___________\________________________/
//!                          any -> Error
//! ```
//!
//! All mutable session data (state, pending requests, cached bot config, the
//! connect waiter and timer handles) sits behind one lock. The lock is never
//! held across an `.await` or while event handlers run; events produced under
//! the lock are published after it is released.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::auth::{AuthHandler, HandshakeRequest, HttpAuthHandler};
use super::state::SessionState;
use crate::config::VoiceClientOptions;
use crate::core::dispatcher::{DispatcherStats, MessageDispatcher, PendingReply, Reply, Routing};
use crate::core::events::{EventBus, EventHandler, EventKind, VoiceEvent};
use crate::core::messages::{
    ActionData, BotReadyData, ConfigData, Message, MessageType, Metrics, ServiceConfigList,
    ServiceConfigOption, Transcript,
};
use crate::core::transport::{
    Tracks, Transport, TransportEvent, TransportEventReceiver, TransportEventSender,
    TransportState,
};
use crate::errors::{RtviError, RtviResult};

type ReadySender = oneshot::Sender<RtviResult<()>>;

/// Payload of `tts-text`.
#[derive(Debug, Deserialize)]
struct BotText {
    text: String,
}

// =============================================================================
// Session
// =============================================================================

/// State guarded by the session lock.
struct Session {
    state: SessionState,
    dispatcher: MessageDispatcher,
    bot_version: Option<String>,
    bot_config: Vec<ServiceConfigOption>,
    /// Settled when the bot is ready or the connect attempt fails
    ready: Option<ReadySender>,
    /// Bumped on every connect; activity tagged with an older epoch is stale
    epoch: u64,
    handshake_timer: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

impl Session {
    fn transition(&mut self, next: SessionState, events: &mut Vec<VoiceEvent>) -> RtviResult<()> {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Refusing session state transition");
            return Err(RtviError::InvalidStateTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = %self.state, to = %next, "Session state changed");
        self.state = next;
        events.push(VoiceEvent::SessionStateChanged(next));
        Ok(())
    }

    /// Single guard for every command that needs a ready bot.
    fn ensure_ready(&self) -> RtviResult<()> {
        if self.state.is_ready() {
            Ok(())
        } else {
            Err(RtviError::NotReady { state: self.state })
        }
    }

    fn settle_ready(&mut self, outcome: RtviResult<()>) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(outcome);
        }
    }

    fn stop_timers(&mut self) {
        if let Some(timer) = self.handshake_timer.take() {
            timer.abort();
        }
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }

    /// Release everything owned by the current connection.
    fn teardown(&mut self, reason: &str, ready_error: RtviError) {
        self.stop_timers();
        self.dispatcher.cancel_all(reason);
        self.settle_ready(Err(ready_error));
    }

    fn refresh_cache(&mut self, message: &Message) {
        match message.message_type {
            MessageType::BotReady => {
                if let Ok(data) = message.data_as::<BotReadyData>() {
                    self.bot_version = Some(data.version);
                    self.bot_config = data.config;
                }
            }
            MessageType::Config | MessageType::ConfigUpdated => {
                if let Ok(data) = message.data_as::<ConfigData>() {
                    self.bot_config = data.config_list;
                }
            }
            _ => {}
        }
    }

    /// Turn a message no request was waiting for into events.
    ///
    /// Returns an error when the message ends the connect attempt.
    fn classify(&mut self, message: Message, events: &mut Vec<VoiceEvent>) -> Option<RtviError> {
        let event = match message.message_type {
            MessageType::BotReady => {
                self.on_bot_ready(message, events);
                return None;
            }
            MessageType::Error => return self.on_bot_error(message, events),
            MessageType::Transcript => decode_event(message, VoiceEvent::Transcript),
            MessageType::UserTranscription => {
                decode_event(message, |t: Transcript| VoiceEvent::UserTranscript(t))
            }
            MessageType::BotTranscription => {
                decode_event(message, |t: BotText| VoiceEvent::BotTranscript(t.text))
            }
            MessageType::Config => {
                decode_event(message, |d: ConfigData| VoiceEvent::Config(d.config_list))
            }
            MessageType::ConfigUpdated => {
                decode_event(message, |d: ConfigData| VoiceEvent::ConfigUpdated(d.config_list))
            }
            MessageType::ConfigAvailable => VoiceEvent::ConfigDescribe(message.data),
            MessageType::ActionsAvailable => VoiceEvent::ActionsAvailable(message.data),
            MessageType::ConfigError => VoiceEvent::ConfigError(message),
            MessageType::ErrorResponse => VoiceEvent::MessageError(message),
            MessageType::Metrics => decode_event(message, |m: Metrics| VoiceEvent::Metrics(m)),
            MessageType::UserStartedSpeaking => VoiceEvent::UserStartedSpeaking,
            MessageType::UserStoppedSpeaking => VoiceEvent::UserStoppedSpeaking,
            MessageType::BotStartedSpeaking => VoiceEvent::BotStartedSpeaking,
            MessageType::BotStoppedSpeaking => VoiceEvent::BotStoppedSpeaking,
            _ => VoiceEvent::GenericMessage(message),
        };
        events.push(event);
        None
    }

    fn on_bot_ready(&mut self, message: Message, events: &mut Vec<VoiceEvent>) {
        let data = message.data_as::<BotReadyData>().unwrap_or_else(|e| {
            warn!(id = %message.id, error = %e, "Malformed bot-ready payload");
            BotReadyData::default()
        });

        match self.state {
            SessionState::Connecting | SessionState::Connected => {
                // bot-ready implies the transport is up even if it has not said so yet
                if self.state == SessionState::Connecting
                    && self.transition(SessionState::Connected, events).is_err()
                {
                    return;
                }
                if self.transition(SessionState::Ready, events).is_err() {
                    return;
                }
                if let Some(timer) = self.handshake_timer.take() {
                    timer.abort();
                }
                info!(version = %data.version, "Bot ready");
                self.settle_ready(Ok(()));
                events.push(VoiceEvent::BotReady(data));
            }
            SessionState::Ready => {
                debug!(version = %data.version, "Repeated bot-ready");
                events.push(VoiceEvent::BotReady(data));
            }
            state => warn!(%state, "Ignoring bot-ready outside of a connection"),
        }
    }

    fn on_bot_error(&mut self, message: Message, events: &mut Vec<VoiceEvent>) -> Option<RtviError> {
        let text = match message.data.get("error").and_then(|e| e.as_str()) {
            Some(text) => text.to_string(),
            None => message.data.to_string(),
        };

        match self.state {
            SessionState::Connecting | SessionState::Connected => {
                Some(RtviError::BotError(text))
            }
            _ => {
                warn!(error = %text, "Bot reported an error");
                events.push(VoiceEvent::Error(text));
                None
            }
        }
    }
}

/// Decode a payload into an event, falling back to a generic message.
fn decode_event<T, F>(message: Message, wrap: F) -> VoiceEvent
where
    T: DeserializeOwned,
    F: FnOnce(T) -> VoiceEvent,
{
    match message.data_as::<T>() {
        Ok(payload) => wrap(payload),
        Err(e) => {
            warn!(id = %message.id, error = %e, "Undecodable payload");
            VoiceEvent::GenericMessage(message)
        }
    }
}

fn ready_outcome(settled: Result<RtviResult<()>, oneshot::error::RecvError>) -> RtviResult<()> {
    settled.unwrap_or_else(|_| {
        Err(RtviError::HandshakeFailed(
            "session closed before the bot was ready".to_string(),
        ))
    })
}

// =============================================================================
// Shared inner state
// =============================================================================

struct Inner {
    options: VoiceClientOptions,
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthHandler>,
    events: EventBus,
    session: Mutex<Session>,
}

impl Inner {
    fn publish_all(&self, events: Vec<VoiceEvent>) {
        for event in &events {
            self.events.publish(event);
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.session.lock().epoch == epoch
    }

    /// Move an active session to `Error`. Returns false if the session was
    /// not active or belongs to another connection.
    fn fail_session(&self, epoch: u64, err: &RtviError) -> bool {
        let mut events = Vec::new();
        let failed = {
            let mut session = self.session.lock();
            if session.epoch != epoch || !session.state.is_active() {
                false
            } else if session.transition(SessionState::Error, &mut events).is_ok() {
                error!(error = %err, "Session failed");
                session.teardown("session failed", err.clone());
                events.push(VoiceEvent::Error(err.to_string()));
                true
            } else {
                false
            }
        };
        self.publish_all(events);
        failed
    }

    async fn fail_and_disconnect(&self, epoch: u64, err: RtviError) {
        if self.fail_session(epoch, &err) {
            if let Err(e) = self.transport.disconnect().await {
                warn!(error = %e, "Failed to disconnect transport after session failure");
            }
        }
    }

    /// Initialize the transport, fetch the auth bundle and join.
    async fn start_transport(&self, events: TransportEventSender) -> RtviResult<()> {
        self.transport.initialize(&self.options, events).await?;
        let request = HandshakeRequest::from_options(&self.options);
        let bundle = self.auth.authenticate(&request).await?;
        self.transport.connect(bundle).await
    }

    async fn handle_transport_event(&self, epoch: u64, event: TransportEvent) {
        if !self.is_current(epoch) {
            debug!(epoch, "Ignoring transport event from a previous connection");
            return;
        }

        match event {
            TransportEvent::Message(message) => {
                if !message.is_rtvi() {
                    warn!(label = %message.label, message_type = %message.message_type, "Dropping message with unknown label");
                    return;
                }
                if let Some(err) = self.handle_message(message) {
                    self.fail_and_disconnect(epoch, err).await;
                }
            }
            TransportEvent::StateChanged(state) => self.handle_transport_state(epoch, state).await,
            TransportEvent::TrackStarted(track) => {
                self.events.publish(&VoiceEvent::TrackStarted(track))
            }
            TransportEvent::TrackStopped(track) => {
                self.events.publish(&VoiceEvent::TrackStopped(track))
            }
            TransportEvent::ParticipantJoined(participant) => {
                if !participant.local {
                    info!(participant = %participant.id, "Bot joined");
                    self.events.publish(&VoiceEvent::BotConnected(participant));
                }
            }
            TransportEvent::ParticipantLeft(participant) => {
                if !participant.local {
                    info!(participant = %participant.id, "Bot left");
                    self.events.publish(&VoiceEvent::BotDisconnected(participant));
                }
            }
            TransportEvent::Error(reason) => {
                self.fail_and_disconnect(epoch, RtviError::Transport(reason)).await;
            }
        }
    }

    async fn handle_transport_state(&self, epoch: u64, state: TransportState) {
        debug!(%state, "Transport state changed");
        self.events.publish(&VoiceEvent::TransportStateChanged(state));

        match state {
            TransportState::Connected => {
                let mut events = Vec::new();
                let joined = {
                    let mut session = self.session.lock();
                    session.state == SessionState::Connecting
                        && session.transition(SessionState::Connected, &mut events).is_ok()
                };
                if joined {
                    events.push(VoiceEvent::Connected);
                    if let Err(e) = self.transport.send_message(&Message::client_ready()) {
                        warn!(error = %e, "Failed to send client-ready");
                    }
                }
                self.publish_all(events);
            }
            TransportState::Disconnected => {
                let mut events = Vec::new();
                {
                    let mut session = self.session.lock();
                    // Loss of a live session still passes through Disconnecting
                    if session.state.is_active() {
                        let _ = session.transition(SessionState::Disconnecting, &mut events);
                    }
                    if session.state == SessionState::Disconnecting
                        && session.transition(SessionState::Disconnected, &mut events).is_ok()
                    {
                        info!("Transport disconnected");
                        session.teardown(
                            "transport disconnected",
                            RtviError::HandshakeFailed(
                                "transport disconnected before the bot was ready".to_string(),
                            ),
                        );
                        events.push(VoiceEvent::Disconnected);
                    }
                }
                self.publish_all(events);
            }
            TransportState::Error => {
                self.fail_and_disconnect(
                    epoch,
                    RtviError::Transport("transport entered error state".to_string()),
                )
                .await;
            }
            _ => {}
        }
    }

    /// Offer a message to the dispatcher, then publish what is left.
    fn handle_message(&self, message: Message) -> Option<RtviError> {
        debug!(id = %message.id, message_type = %message.message_type, "Inbound message");

        let mut events = Vec::new();
        let fatal = {
            let mut session = self.session.lock();
            session.refresh_cache(&message);

            let config_error =
                (message.message_type == MessageType::ConfigError).then(|| message.clone());
            let routing = if message.message_type.is_error_reply() {
                session.dispatcher.reject(message)
            } else {
                session.dispatcher.resolve(message)
            };

            match routing {
                Routing::Settled => {
                    // config-error is always surfaced
                    if let Some(message) = config_error {
                        events.push(VoiceEvent::ConfigError(message));
                    }
                    None
                }
                Routing::Unmatched(message) => session.classify(message, &mut events),
            }
        };
        self.publish_all(events);
        fatal
    }
}

async fn run_event_loop(inner: Weak<Inner>, epoch: u64, mut events: TransportEventReceiver) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_transport_event(epoch, event).await;
    }
    debug!(epoch, "Transport event loop finished");
}

async fn run_sweeper(inner: Weak<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let expired = inner.session.lock().dispatcher.sweep_expired();
        if expired > 0 {
            debug!(expired, "Swept expired requests");
        }
    }
}

async fn run_handshake_timer(inner: Weak<Inner>, epoch: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };

    warn!(timeout_ms = timeout.as_millis() as u64, "Bot did not become ready in time");
    // fail_session aborts this task; nothing below may await
    if inner.fail_session(epoch, &RtviError::HandshakeTimeout(timeout)) {
        let transport = inner.transport.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.disconnect().await {
                warn!(error = %e, "Failed to disconnect transport after handshake timeout");
            }
        });
    }
}

// =============================================================================
// Public client
// =============================================================================

/// Client side of an RTVI voice session.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct VoiceClient {
    inner: Arc<Inner>,
}

impl VoiceClient {
    /// Create a client over a transport. Nothing happens until [`connect`](Self::connect).
    pub fn new(options: VoiceClientOptions, transport: Arc<dyn Transport>) -> Self {
        let auth: Arc<dyn AuthHandler> = match &options.custom_auth_handler {
            Some(handler) => handler.clone(),
            None => Arc::new(HttpAuthHandler::new()),
        };
        let dispatcher = MessageDispatcher::with_horizon(transport.clone(), options.request_timeout);

        Self {
            inner: Arc::new(Inner {
                options,
                transport,
                auth,
                events: EventBus::new(),
                session: Mutex::new(Session {
                    state: SessionState::Idle,
                    dispatcher,
                    bot_version: None,
                    bot_config: Vec::new(),
                    ready: None,
                    epoch: 0,
                    handshake_timer: None,
                    sweeper: None,
                }),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start a session and wait until the bot reports ready.
    ///
    /// Valid from `Idle`, `Disconnected` and `Error`. On failure the session
    /// ends in `Error` and an [`VoiceEvent::Error`] is published.
    pub async fn connect(&self) -> RtviResult<()> {
        let inner = &self.inner;
        inner.options.validate()?;

        let (ready_tx, mut ready_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut events = Vec::new();
        let epoch = {
            let mut session = inner.session.lock();
            session.transition(SessionState::Connecting, &mut events)?;
            session.epoch += 1;
            session.bot_version = None;
            session.bot_config.clear();
            session.ready = Some(ready_tx);
            session.epoch
        };
        inner.publish_all(events);
        info!(epoch, base_url = %inner.options.base_url, "Connecting session");

        tokio::spawn(run_event_loop(Arc::downgrade(inner), epoch, events_rx));
        let sweeper = tokio::spawn(run_sweeper(
            Arc::downgrade(inner),
            inner.options.sweep_interval,
        ));
        let timer = inner
            .options
            .timeout
            .map(|timeout| tokio::spawn(run_handshake_timer(Arc::downgrade(inner), epoch, timeout)));
        {
            let mut session = inner.session.lock();
            if session.epoch == epoch && session.state.is_active() {
                session.sweeper = Some(sweeper);
                session.handshake_timer = timer;
            } else {
                sweeper.abort();
                if let Some(timer) = timer {
                    timer.abort();
                }
            }
        }

        let outcome = {
            let handshake = inner.start_transport(events_tx);
            tokio::pin!(handshake);
            let mut started = false;
            loop {
                tokio::select! {
                    settled = &mut ready_rx => break ready_outcome(settled),
                    result = &mut handshake, if !started => match result {
                        Ok(()) => {
                            debug!(epoch, "Transport joined, waiting for bot-ready");
                            started = true;
                        }
                        Err(e) => break Err(e),
                    },
                }
            }
        };

        match outcome {
            Ok(()) => {
                info!(epoch, "Session ready");
                Ok(())
            }
            Err(e) => {
                inner.fail_and_disconnect(epoch, e.clone()).await;
                Err(e)
            }
        }
    }

    /// End the session. Pending requests are cancelled.
    ///
    /// No-op unless a connection attempt or session is active.
    pub async fn disconnect(&self) -> RtviResult<()> {
        let inner = &self.inner;
        let mut events = Vec::new();
        {
            let mut session = inner.session.lock();
            if !session.state.is_active() {
                debug!(state = %session.state, "Nothing to disconnect");
                return Ok(());
            }
            session.transition(SessionState::Disconnecting, &mut events)?;
            session.teardown(
                "client disconnected",
                RtviError::HandshakeFailed("disconnected before the bot was ready".to_string()),
            );
        }
        inner.publish_all(events);
        info!("Disconnecting session");

        let result = inner.transport.disconnect().await;
        if let Err(e) = &result {
            warn!(error = %e, "Transport disconnect failed");
        }

        let mut events = Vec::new();
        {
            let mut session = inner.session.lock();
            if session.state == SessionState::Disconnecting
                && session.transition(SessionState::Disconnected, &mut events).is_ok()
            {
                events.push(VoiceEvent::Disconnected);
            }
        }
        inner.publish_all(events);
        result
    }

    /// Return a finished session (`Error` or `Disconnected`) to `Idle`.
    pub fn reset(&self) -> RtviResult<()> {
        let mut events = Vec::new();
        {
            let mut session = self.inner.session.lock();
            session.transition(SessionState::Idle, &mut events)?;
            session.bot_version = None;
            session.bot_config.clear();
        }
        self.inner.publish_all(events);
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.inner.session.lock().state
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Subscribe to an event kind. The same handler is only registered once.
    pub fn on(&self, kind: EventKind, handler: EventHandler) {
        self.inner.events.on(kind, handler);
    }

    /// Unsubscribe a handler previously passed to [`on`](Self::on).
    pub fn off(&self, kind: EventKind, handler: &EventHandler) {
        self.inner.events.off(kind, handler);
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Send a request and get a future for its reply without awaiting it.
    pub fn dispatch(&self, message: Message, should_reject: bool) -> RtviResult<PendingReply> {
        let mut session = self.inner.session.lock();
        session.ensure_ready()?;
        session.dispatcher.dispatch(message, should_reject)
    }

    /// Send a request and wait for its reply.
    ///
    /// With `should_reject`, an error reply fails with [`RtviError::ErrorResponse`];
    /// otherwise it is returned as [`Reply::Suppressed`].
    pub async fn send_command(&self, message: Message, should_reject: bool) -> RtviResult<Reply> {
        self.dispatch(message, should_reject)?.await
    }

    /// Send a message that expects no reply.
    pub fn send_message(&self, message: &Message) -> RtviResult<()> {
        message.ensure_rtvi()?;
        self.inner.session.lock().ensure_ready()?;
        self.inner.transport.send_message(message)
    }

    /// Ask the bot to apply new service configuration.
    pub async fn update_config(
        &self,
        config: &[ServiceConfigOption],
        should_reject: bool,
    ) -> RtviResult<Reply> {
        self.send_command(Message::update_config(config), should_reject)
            .await
    }

    /// Fetch the bot's current configuration.
    pub async fn get_bot_config(&self) -> RtviResult<Vec<ServiceConfigOption>> {
        let reply = self.send_command(Message::get_bot_config(), true).await?;
        Ok(reply.into_message().data_as::<ConfigData>()?.config_list)
    }

    /// Fetch the configuration options the bot supports.
    pub async fn describe_config(&self) -> RtviResult<serde_json::Value> {
        let reply = self.send_command(Message::describe_config(), true).await?;
        Ok(reply.into_message().data)
    }

    /// Fetch the actions the bot supports.
    pub async fn describe_actions(&self) -> RtviResult<serde_json::Value> {
        let reply = self.send_command(Message::describe_actions(), true).await?;
        Ok(reply.into_message().data)
    }

    /// Run a service action and return the bot's result payload.
    pub async fn action(&self, action: &ActionData) -> RtviResult<serde_json::Value> {
        let reply = self.send_command(Message::action(action)?, true).await?;
        Ok(reply.into_message().data)
    }

    // -------------------------------------------------------------------------
    // Cached state
    // -------------------------------------------------------------------------

    /// Version reported by `bot-ready`.
    pub fn bot_version(&self) -> Option<String> {
        self.inner.session.lock().bot_version.clone()
    }

    /// Last configuration reported by the bot.
    pub fn bot_config(&self) -> Vec<ServiceConfigOption> {
        self.inner.session.lock().bot_config.clone()
    }

    /// Value of one option in the bot's last reported configuration.
    pub fn bot_option_value(&self, service: &str, option: &str) -> Option<serde_json::Value> {
        self.inner
            .session
            .lock()
            .bot_config
            .service_option_value(service, option)
            .cloned()
    }

    /// Configuration requested by this client at connect time.
    pub fn config(&self) -> &[ServiceConfigOption] {
        &self.inner.options.config
    }

    pub fn options(&self) -> &VoiceClientOptions {
        &self.inner.options
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.session.lock().dispatcher.pending_count()
    }

    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.inner.session.lock().dispatcher.stats()
    }

    // -------------------------------------------------------------------------
    // Media
    // -------------------------------------------------------------------------

    pub fn transport_state(&self) -> TransportState {
        self.inner.transport.state()
    }

    pub fn enable_mic(&self, enable: bool) {
        self.inner.transport.enable_mic(enable);
    }

    pub fn enable_cam(&self, enable: bool) {
        self.inner.transport.enable_cam(enable);
    }

    pub fn is_mic_enabled(&self) -> bool {
        self.inner.transport.is_mic_enabled()
    }

    pub fn is_cam_enabled(&self) -> bool {
        self.inner.transport.is_cam_enabled()
    }

    pub fn tracks(&self) -> Tracks {
        self.inner.transport.tracks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::messages::ConfigOption;
    use crate::core::transport::{MemoryTransport, Participant};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticAuth;

    #[async_trait]
    impl AuthHandler for StaticAuth {
        async fn authenticate(&self, _request: &HandshakeRequest) -> RtviResult<serde_json::Value> {
            Ok(json!({"room": "test"}))
        }
    }

    struct FailingAuth;

    #[async_trait]
    impl AuthHandler for FailingAuth {
        async fn authenticate(&self, _request: &HandshakeRequest) -> RtviResult<serde_json::Value> {
            Err(RtviError::HandshakeFailed("denied".to_string()))
        }
    }

    fn options() -> VoiceClientOptions {
        VoiceClientOptions::new("http://localhost:7860/connect", [("llm", "together")])
            .with_auth_handler(Arc::new(StaticAuth))
    }

    fn client_with(options: VoiceClientOptions) -> (Arc<MemoryTransport>, VoiceClient) {
        let transport = Arc::new(MemoryTransport::new());
        let client = VoiceClient::new(options, transport.clone());
        (transport, client)
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached");
    }

    fn bot_ready_message() -> Message {
        Message::new(
            MessageType::BotReady,
            json!({"version": "0.2.0", "config": [
                {"service": "llm", "options": [{"name": "model", "value": "llama3"}]}
            ]}),
        )
    }

    async fn ready_client() -> (Arc<MemoryTransport>, VoiceClient) {
        let (transport, client) = client_with(options());
        let connecting = tokio::spawn({
            let client = client.clone();
            async move { client.connect().await }
        });
        wait_until(|| transport.last_sent(&MessageType::ClientReady).is_some()).await;
        transport.inject_message(bot_ready_message());
        connecting.await.unwrap().unwrap();
        (transport, client)
    }

    #[tokio::test]
    async fn test_connect_reaches_ready() {
        let (transport, client) = ready_client().await;
        assert_eq!(client.state(), SessionState::Ready);
        assert_eq!(client.bot_version().as_deref(), Some("0.2.0"));
        assert_eq!(
            client.bot_option_value("llm", "model"),
            Some(json!("llama3"))
        );
        assert_eq!(transport.auth_bundles(), vec![json!({"room": "test"})]);
    }

    #[tokio::test]
    async fn test_state_changes_published_in_order() {
        let (transport, client) = client_with(options());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        client.on(EventKind::SessionStateChanged, {
            let seen = seen.clone();
            Arc::new(move |event: &VoiceEvent| {
                if let VoiceEvent::SessionStateChanged(state) = event {
                    seen.lock().push(*state);
                }
            })
        });

        let connecting = tokio::spawn({
            let client = client.clone();
            async move { client.connect().await }
        });
        wait_until(|| transport.last_sent(&MessageType::ClientReady).is_some()).await;
        transport.inject_message(bot_ready_message());
        connecting.await.unwrap().unwrap();
        client.disconnect().await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                SessionState::Connecting,
                SessionState::Connected,
                SessionState::Ready,
                SessionState::Disconnecting,
                SessionState::Disconnected,
            ]
        );
        assert_eq!(client.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_commands_guarded_until_ready() {
        let (transport, client) = client_with(options());
        let config = vec![ServiceConfigOption::new(
            "llm",
            vec![ConfigOption::new("model", json!("gpt-4o"))],
        )];

        match client.update_config(&config, true).await {
            Err(RtviError::NotReady { state }) => assert_eq!(state, SessionState::Idle),
            other => panic!("Expected NotReady, got {:?}", other),
        }
        assert!(matches!(
            client.describe_actions().await,
            Err(RtviError::NotReady { .. })
        ));
        assert!(matches!(
            client.send_message(&Message::client_ready()),
            Err(RtviError::NotReady { .. })
        ));
        assert!(transport.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_update_config_while_connecting_refused() {
        let transport = Arc::new(MemoryTransport::manual());
        let client = VoiceClient::new(options(), transport.clone());
        let connecting = tokio::spawn({
            let client = client.clone();
            async move { client.connect().await }
        });
        wait_until(|| !transport.auth_bundles().is_empty()).await;
        assert_eq!(client.state(), SessionState::Connecting);

        match client.update_config(&[], true).await {
            Err(RtviError::NotReady { state }) => assert_eq!(state, SessionState::Connecting),
            other => panic!("Expected NotReady, got {:?}", other),
        }
        assert!(transport.last_sent(&MessageType::UpdateConfig).is_none());

        client.disconnect().await.unwrap();
        assert!(connecting.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_request_reply_round_trip() {
        let (transport, client) = ready_client().await;

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.get_bot_config().await }
        });
        wait_until(|| transport.last_sent(&MessageType::GetConfig).is_some()).await;
        let request = transport.last_sent(&MessageType::GetConfig).unwrap();

        transport.inject_message(Message::with_id(
            MessageType::Config,
            json!({"config_list": [{"service": "tts", "options": []}]}),
            request.id.clone(),
        ));

        let config = pending.await.unwrap().unwrap();
        assert_eq!(config[0].service, "tts");
        assert_eq!(client.pending_requests(), 0);
        // The cache follows the latest config message
        assert_eq!(client.bot_config()[0].service, "tts");
    }

    #[tokio::test]
    async fn test_error_response_rejects_or_suppresses() {
        let (transport, client) = ready_client().await;

        let rejected = client.dispatch(Message::describe_actions(), true).unwrap();
        let suppressed = client.dispatch(Message::describe_config(), false).unwrap();
        let rejected_id = rejected.id().to_string();
        let suppressed_id = suppressed.id().to_string();

        for id in [&rejected_id, &suppressed_id] {
            transport.inject_message(Message::with_id(
                MessageType::ErrorResponse,
                json!({"error": "nope"}),
                id.clone(),
            ));
        }

        match rejected.await {
            Err(RtviError::ErrorResponse(m)) => assert_eq!(m.id, rejected_id),
            other => panic!("Expected ErrorResponse, got {:?}", other),
        }
        assert!(suppressed.await.unwrap().is_suppressed());
    }

    #[tokio::test]
    async fn test_config_error_always_published() {
        let (transport, client) = ready_client().await;
        let errors = Arc::new(AtomicUsize::new(0));
        client.on(EventKind::ConfigError, {
            let errors = errors.clone();
            Arc::new(move |_event: &VoiceEvent| {
                errors.fetch_add(1, Ordering::SeqCst);
            })
        });

        let pending = client
            .dispatch(Message::update_config(&[]), true)
            .unwrap();
        let id = pending.id().to_string();
        transport.inject_message(Message::with_id(
            MessageType::ConfigError,
            json!({"error": "bad option"}),
            id,
        ));

        assert!(matches!(pending.await, Err(RtviError::ErrorResponse(_))));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unmatched_messages_become_events() {
        let (transport, client) = ready_client().await;
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for kind in [
            EventKind::BotTranscript,
            EventKind::UserTranscript,
            EventKind::Metrics,
            EventKind::UserStartedSpeaking,
            EventKind::GenericMessage,
            EventKind::Error,
        ] {
            let seen = seen.clone();
            client.on(
                kind,
                Arc::new(move |event: &VoiceEvent| seen.lock().push(event.clone())),
            );
        }

        transport.inject_message(Message::new(
            MessageType::BotTranscription,
            json!({"text": "Hello there"}),
        ));
        transport.inject_message(Message::new(
            MessageType::UserTranscription,
            json!({"text": "hi", "final": true, "timestamp": "t", "user_id": "u"}),
        ));
        transport.inject_message(Message::with_id(
            MessageType::Metrics,
            json!({"ttfb": [{"processor": "llm", "value": 0.25}]}),
            "0",
        ));
        transport.inject_message(Message::new(MessageType::UserStartedSpeaking, json!({})));
        transport.inject_message(Message::new(MessageType::ActionResponse, json!({"result": 1})));
        transport.inject_message(Message::new(MessageType::Error, json!({"error": "llm down"})));

        wait_until(|| seen.lock().len() == 6).await;
        let seen = seen.lock();
        assert_eq!(seen[0], VoiceEvent::BotTranscript("Hello there".to_string()));
        match &seen[1] {
            VoiceEvent::UserTranscript(t) => assert!(t.is_final),
            other => panic!("Expected UserTranscript, got {:?}", other),
        }
        assert!(matches!(seen[2], VoiceEvent::Metrics(_)));
        assert_eq!(seen[3], VoiceEvent::UserStartedSpeaking);
        assert!(matches!(seen[4], VoiceEvent::GenericMessage(_)));
        assert_eq!(seen[5], VoiceEvent::Error("llm down".to_string()));
        // An error after ready does not end the session
        assert_eq!(client.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_foreign_label_dropped() {
        let (transport, client) = ready_client().await;
        let generic = Arc::new(AtomicUsize::new(0));
        client.on(EventKind::GenericMessage, {
            let generic = generic.clone();
            Arc::new(move |_event: &VoiceEvent| {
                generic.fetch_add(1, Ordering::SeqCst);
            })
        });

        let mut foreign = Message::new(MessageType::ActionResponse, json!({}));
        foreign.label = "other".to_string();
        transport.inject_message(foreign);
        transport.inject_message(Message::new(MessageType::ActionResponse, json!({})));

        wait_until(|| generic.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(generic.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let transport = Arc::new(MemoryTransport::new());
        let mut options = options();
        options.timeout = Some(Duration::from_millis(5000));
        let client = VoiceClient::new(options, transport.clone());

        let errors = Arc::new(AtomicUsize::new(0));
        client.on(EventKind::Error, {
            let errors = errors.clone();
            Arc::new(move |_event: &VoiceEvent| {
                errors.fetch_add(1, Ordering::SeqCst);
            })
        });

        match client.connect().await {
            Err(RtviError::HandshakeTimeout(t)) => assert_eq!(t, Duration::from_millis(5000)),
            other => panic!("Expected HandshakeTimeout, got {:?}", other),
        }
        assert_eq!(client.state(), SessionState::Error);
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        client.reset().unwrap();
        assert_eq!(client.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_auth_failure_moves_to_error() {
        let (transport, client) =
            client_with(options().with_auth_handler(Arc::new(FailingAuth)));

        match client.connect().await {
            Err(RtviError::HandshakeFailed(msg)) => assert_eq!(msg, "denied"),
            other => panic!("Expected HandshakeFailed, got {:?}", other),
        }
        assert_eq!(client.state(), SessionState::Error);
        assert!(transport.auth_bundles().is_empty());
        assert_eq!(transport.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn test_bot_error_before_ready_fails_connect() {
        let (transport, client) = client_with(options());
        let connecting = tokio::spawn({
            let client = client.clone();
            async move { client.connect().await }
        });
        wait_until(|| transport.last_sent(&MessageType::ClientReady).is_some()).await;
        transport.inject_message(Message::new(
            MessageType::Error,
            json!({"error": "no capacity"}),
        ));

        match connecting.await.unwrap() {
            Err(RtviError::BotError(msg)) => assert_eq!(msg, "no capacity"),
            other => panic!("Expected BotError, got {:?}", other),
        }
        assert_eq!(client.state(), SessionState::Error);
    }

    #[tokio::test]
    async fn test_transport_loss_cancels_pending() {
        let (transport, client) = ready_client().await;
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        client.on(EventKind::SessionStateChanged, {
            let seen = seen.clone();
            Arc::new(move |event: &VoiceEvent| {
                if let VoiceEvent::SessionStateChanged(state) = event {
                    seen.lock().push(*state);
                }
            })
        });
        let pending = client.dispatch(Message::get_bot_config(), true).unwrap();

        transport.inject(TransportEvent::StateChanged(TransportState::Disconnected));

        assert!(matches!(
            pending.await,
            Err(RtviError::RequestCancelled { .. })
        ));
        wait_until(|| client.state() == SessionState::Disconnected).await;
        assert_eq!(
            *seen.lock(),
            vec![SessionState::Disconnecting, SessionState::Disconnected]
        );

        // Reconnect from Disconnected
        let connecting = tokio::spawn({
            let client = client.clone();
            async move { client.connect().await }
        });
        wait_until(|| transport.auth_bundles().len() == 2).await;
        wait_until(|| client.state() == SessionState::Connected).await;
        transport.inject_message(bot_ready_message());
        connecting.await.unwrap().unwrap();
        assert_eq!(client.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_bot_participant_events() {
        let (transport, client) = ready_client().await;
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for kind in [EventKind::BotConnected, EventKind::BotDisconnected] {
            let seen = seen.clone();
            client.on(kind, Arc::new(move |event: &VoiceEvent| seen.lock().push(event.kind())));
        }

        let local = Participant {
            id: "me".to_string(),
            name: "Me".to_string(),
            local: true,
        };
        let bot = Participant {
            id: "bot".to_string(),
            name: "Bot".to_string(),
            local: false,
        };
        transport.inject(TransportEvent::ParticipantJoined(local));
        transport.inject(TransportEvent::ParticipantJoined(bot.clone()));
        transport.inject(TransportEvent::ParticipantLeft(bot));

        wait_until(|| seen.lock().len() == 2).await;
        assert_eq!(
            *seen.lock(),
            vec![EventKind::BotConnected, EventKind::BotDisconnected]
        );
    }

    #[tokio::test]
    async fn test_invalid_transitions_refused() {
        let (_transport, client) = client_with(options());
        assert!(matches!(
            client.reset(),
            Err(RtviError::InvalidStateTransition { .. })
        ));
        // Disconnect while idle is a no-op
        client.disconnect().await.unwrap();
        assert_eq!(client.state(), SessionState::Idle);

        let (_transport, ready) = ready_client().await;
        assert!(matches!(
            ready.connect().await,
            Err(RtviError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_validates_options() {
        let transport = Arc::new(MemoryTransport::new());
        let options = VoiceClientOptions::new("http://localhost", Vec::<(String, String)>::new());
        let client = VoiceClient::new(options, transport);
        assert!(matches!(
            client.connect().await,
            Err(RtviError::InvalidConfiguration(_))
        ));
        assert_eq!(client.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_media_pass_through() {
        let (transport, client) = client_with(options());
        client.enable_cam(true);
        assert!(client.is_cam_enabled());
        client.enable_mic(false);
        assert!(!transport.is_mic_enabled());
        assert_eq!(client.tracks(), Tracks::default());
    }
}
