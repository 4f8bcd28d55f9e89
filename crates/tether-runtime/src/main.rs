//! Tether listener binary.
//!
//! Connects to a realtime server, joins rooms and logs every notification.
//!
//! # Usage
//!
//! ```bash
//! TETHER_TOKEN=... tether-listen --server wss://chat.example.com/realtime --room m1 --room m2
//!
//! # Force the long-polling transport
//! tether-listen --server https://chat.example.com/realtime --long-poll --token ...
//! ```

use std::{sync::Arc, time::Duration};

use clap::Parser;
use secrecy::SecretString;
use tether_client::{ClientConfig, EventKind, Listener, Notification, ReconnectPolicy, RoomId};
use tether_runtime::{RealtimeService, RuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tether realtime listener
#[derive(Parser, Debug)]
#[command(name = "tether-listen")]
#[command(about = "Connect to a Tether realtime server and log events")]
#[command(version)]
struct Args {
    /// Realtime server address
    #[arg(short, long, default_value = "ws://localhost:8080/realtime")]
    server: String,

    /// Bearer token
    #[arg(short, long, env = "TETHER_TOKEN", hide_env_values = true)]
    token: String,

    /// Room to join (repeatable)
    #[arg(short, long = "room")]
    rooms: Vec<String>,

    /// Use long-polling only
    #[arg(long)]
    long_poll: bool,

    /// Base reconnection delay in milliseconds
    #[arg(long, default_value = "1000")]
    reconnect_base_ms: u64,

    /// Maximum reconnection attempts
    #[arg(long, default_value = "5")]
    max_attempts: u32,

    /// Authentication timeout in seconds
    #[arg(long, default_value = "10")]
    auth_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

const LOGGED_KINDS: [&str; 9] = [
    "new_message",
    "presence",
    "typing",
    "messages_read",
    "room_unlocked",
    "state_changed",
    "auth_rejected",
    "reconnect_exhausted",
    "local_notification",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        tracing::debug!("TLS crypto provider already installed");
    }

    let config = RuntimeConfig {
        server: args.server,
        client: ClientConfig {
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(args.reconnect_base_ms),
                max_attempts: args.max_attempts,
                ..ReconnectPolicy::default()
            },
            auth_timeout: Duration::from_secs(args.auth_timeout_secs),
        },
        ..RuntimeConfig::default()
    };

    tracing::info!("Tether listener starting");
    tracing::info!("Server {}", config.server);

    let service = if args.long_poll {
        let connector =
            tether_runtime::transport::LongPollConnector::new(config.connect_timeout, config.poll_timeout)?;
        RealtimeService::start(config, connector)?
    } else {
        let connector = config.connector()?;
        RealtimeService::start(config, connector)?
    };
    let handle = service.handle();

    let log: Listener = Arc::new(|notification: &Notification| match notification {
        Notification::Server(event) => {
            let (name, payload) = event.to_wire();
            tracing::info!(event = %name, %payload, "server event");
        },
        other => tracing::info!(event = %other.kind(), ?other, "client event"),
    });
    for kind in LOGGED_KINDS {
        handle.on(EventKind::from(kind), Arc::clone(&log));
    }

    for room in args.rooms {
        handle.join_room(RoomId::new(room))?;
    }
    handle.connect(SecretString::new(args.token))?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    service.shutdown().await?;

    Ok(())
}
