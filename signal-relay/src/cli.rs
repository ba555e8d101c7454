use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{
    config::{ConfigError, ServerSettings},
    message::Vocabulary,
    relay::RelaySettings,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server, accepting WebSocket connections.
    Serve(ServeArgs),
    /// Connect to a relay and exchange messages from the terminal.
    Client(ClientArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    /// Default log filter. `RUST_LOG` takes precedence when set.
    #[arg(long, global = true, env = "LOGGING_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, global = true, env = "LOGGING_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Interface to bind.
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to bind. Use 0 for an ephemeral port.
    #[arg(long, env = "SERVER_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Full socket address to bind, overriding --host and --port.
    #[arg(long, env = "SERVER_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Seconds to wait for connections to drain on shutdown.
    #[arg(long, env = "SERVER_SHUTDOWN_TIMEOUT", default_value_t = 30)]
    pub shutdown_timeout: u64,

    /// Path serving the WebSocket upgrade.
    #[arg(long, env = "WEBSOCKET_PATH", default_value = "/ws")]
    pub websocket_path: String,

    /// Largest inbound frame accepted, in bytes.
    #[arg(long, env = "WEBSOCKET_MAX_MESSAGE_SIZE", default_value_t = 1024 * 1024)]
    pub max_message_size: usize,

    /// Seconds between keep-alive pings.
    #[arg(long, env = "WEBSOCKET_PING_INTERVAL", default_value_t = 30)]
    pub ping_interval: u64,

    /// Outbound messages buffered per connection before it is shed.
    #[arg(long, env = "RELAY_QUEUE_CAPACITY", default_value_t = crate::connection::DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Requests buffered on each hub input channel.
    #[arg(long, env = "RELAY_HUB_CAPACITY", default_value_t = crate::hub::DEFAULT_HUB_CAPACITY)]
    pub hub_capacity: usize,

    #[arg(long, env = "MONITORING_LIVENESS_PATH", default_value = "/health/live")]
    pub liveness_path: String,

    #[arg(long, env = "MONITORING_READINESS_PATH", default_value = "/health/ready")]
    pub readiness_path: String,

    #[command(flatten)]
    pub vocabulary: VocabularyArgs,
}

/// Message-type strings of the signaling protocol.
#[derive(Args, Debug, Clone)]
pub struct VocabularyArgs {
    #[arg(long = "type-broadcast", env = "PROTOCOL_TYPE_BROADCAST", default_value = "broadcast")]
    pub broadcast: String,
    #[arg(long = "type-join", env = "PROTOCOL_TYPE_JOIN", default_value = "join")]
    pub join: String,
    #[arg(long = "type-leave", env = "PROTOCOL_TYPE_LEAVE", default_value = "leave")]
    pub leave: String,
    #[arg(long = "type-offer", env = "PROTOCOL_TYPE_OFFER", default_value = "offer")]
    pub offer: String,
    #[arg(long = "type-answer", env = "PROTOCOL_TYPE_ANSWER", default_value = "answer")]
    pub answer: String,
    #[arg(long = "type-ice-candidate", env = "PROTOCOL_TYPE_ICE_CANDIDATE", default_value = "ice-candidate")]
    pub ice_candidate: String,
    #[arg(long = "type-list", env = "PROTOCOL_TYPE_LIST", default_value = "list")]
    pub list: String,
    #[arg(long = "type-me", env = "PROTOCOL_TYPE_ME", default_value = "me")]
    pub me: String,
}

impl From<VocabularyArgs> for Vocabulary {
    fn from(args: VocabularyArgs) -> Self {
        Self {
            broadcast: args.broadcast,
            join: args.join,
            leave: args.leave,
            offer: args.offer,
            answer: args.answer,
            ice_candidate: args.ice_candidate,
            list: args.list,
            me: args.me,
        }
    }
}

impl ServeArgs {
    pub fn settings(&self) -> Result<ServerSettings, ConfigError> {
        ServerSettings {
            listen: self
                .listen
                .unwrap_or_else(|| SocketAddr::new(self.host, self.port)),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
            websocket_path: self.websocket_path.clone(),
            max_message_size: self.max_message_size,
            ping_interval: Duration::from_secs(self.ping_interval),
            liveness_path: self.liveness_path.clone(),
            readiness_path: self.readiness_path.clone(),
            relay: RelaySettings {
                queue_capacity: self.queue_capacity,
                hub_capacity: self.hub_capacity,
                vocabulary: self.vocabulary.clone().into(),
            },
        }
        .validate()
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// WebSocket URL of the relay.
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    pub url: String,
}
