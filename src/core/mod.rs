pub mod dispatcher;
pub mod events;
pub mod messages;
pub mod session;
pub mod transport;

// Re-export commonly used types for convenience
pub use dispatcher::{
    DEFAULT_REQUEST_TIMEOUT, DispatcherStats, MessageDispatcher, PendingReply, Reply, Routing,
};

pub use events::{EventBus, EventHandler, EventKind, VoiceEvent};

pub use messages::{
    ActionArgument, ActionData, BotReadyData, ConfigData, ConfigOption, Message, MessageType,
    Metrics, MetricsData, RTVI_MESSAGE_LABEL, ServiceConfigList, ServiceConfigOption, Transcript,
    set_service_option,
};

pub use session::{AuthHandler, HandshakeRequest, HttpAuthHandler, SessionState, VoiceClient};

pub use transport::{
    MemoryTransport, Transport, TransportEvent, TransportKind, TransportState, WebSocketTransport,
    create_transport,
};
