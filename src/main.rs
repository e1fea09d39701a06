use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rtvi_client::{
    EventKind, TransportKind, VoiceClient, VoiceClientOptions, VoiceEvent, create_transport,
};

/// RTVI client - connect to a voice bot and log the session
#[derive(Parser, Debug)]
#[command(name = "rtvi-client")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Transport to use (websocket, memory)
    #[arg(short = 't', long = "transport", default_value = "websocket")]
    transport: String,
}

/// Event kinds logged by the binary.
const LOGGED_EVENTS: [EventKind; 18] = [
    EventKind::SessionStateChanged,
    EventKind::TransportStateChanged,
    EventKind::BotReady,
    EventKind::BotConnected,
    EventKind::BotDisconnected,
    EventKind::Config,
    EventKind::ConfigUpdated,
    EventKind::ConfigError,
    EventKind::MessageError,
    EventKind::Error,
    EventKind::Transcript,
    EventKind::UserTranscript,
    EventKind::BotTranscript,
    EventKind::Metrics,
    EventKind::UserStartedSpeaking,
    EventKind::UserStoppedSpeaking,
    EventKind::BotStartedSpeaking,
    EventKind::BotStoppedSpeaking,
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Install the crypto provider before any TLS connection is attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let options = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            VoiceClientOptions::from_file(path)?
        }
        None => VoiceClientOptions::from_env()?,
    };

    let kind = TransportKind::parse(&cli.transport)
        .ok_or_else(|| anyhow!("Unknown transport '{}'", cli.transport))?;
    info!(transport = %kind, base_url = %options.base_url, "Starting RTVI client");

    let client = VoiceClient::new(options, create_transport(kind));
    for kind in LOGGED_EVENTS {
        client.on(kind, Arc::new(log_event));
    }

    client.connect().await?;
    info!(
        version = client.bot_version().as_deref().unwrap_or("unknown"),
        "Bot ready, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    if let Err(e) = client.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    Ok(())
}

fn log_event(event: &VoiceEvent) {
    match event {
        VoiceEvent::SessionStateChanged(state) => info!(%state, "Session state"),
        VoiceEvent::TransportStateChanged(state) => info!(%state, "Transport state"),
        VoiceEvent::BotTranscript(text) => info!("bot: {}", text),
        VoiceEvent::UserTranscript(t) | VoiceEvent::Transcript(t) => {
            info!(is_final = t.is_final, "user: {}", t.text)
        }
        VoiceEvent::Error(message) => warn!("Error: {}", message),
        VoiceEvent::ConfigError(m) | VoiceEvent::MessageError(m) => {
            warn!(id = %m.id, "{}: {}", m.message_type, m.data)
        }
        other => info!("{:?}", other),
    }
}
