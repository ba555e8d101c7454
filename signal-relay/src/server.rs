//! HTTP boundary: WebSocket upgrade plus liveness and readiness probes.

use std::{
    collections::BTreeMap,
    future::{Future, IntoFuture},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, select, sync::Notify};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    config::ServerSettings,
    events::{EventSink, StatsSnapshot, TracingSink},
    message::Reply,
    relay::Relay,
    session,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckStatus {
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, CheckStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelaySummary>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RelaySummary {
    pub connections: usize,
    pub rooms: usize,
    pub events: StatsSnapshot,
}

#[derive(Clone)]
pub struct AppState {
    relay: Arc<Relay>,
    sink: Arc<TracingSink>,
    ping_interval: Duration,
    max_message_size: usize,
}

impl AppState {
    /// Starts the relay core with a tracing sink. Must run inside a Tokio runtime.
    pub fn start(settings: &ServerSettings) -> Self {
        let sink = Arc::new(TracingSink::new());
        let events: Arc<dyn EventSink> = sink.clone();
        Self {
            relay: Arc::new(Relay::start(settings.relay.clone(), events)),
            sink,
            ping_interval: settings.ping_interval,
            max_message_size: settings.max_message_size,
        }
    }

    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }
}

pub fn router(state: AppState, settings: &ServerSettings) -> Router {
    Router::new()
        .route(&settings.websocket_path, get(upgrade))
        .route(&settings.liveness_path, get(live))
        .route(&settings.readiness_path, get(ready))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let relay = Arc::clone(&state.relay);
    let ping_interval = state.ping_interval;
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| session::run(socket, relay, ping_interval))
}

async fn live() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: HealthStatus::Up,
        timestamp: Utc::now(),
        checks: BTreeMap::new(),
        relay: None,
    })
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let hub = if state.relay.is_running() {
        CheckStatus {
            status: HealthStatus::Up,
            message: None,
        }
    } else {
        CheckStatus {
            status: HealthStatus::Down,
            message: Some("hub task is not running".into()),
        }
    };
    let status = hub.status;

    let response = HealthResponse {
        status,
        timestamp: Utc::now(),
        checks: BTreeMap::from([("hub".to_string(), hub)]),
        relay: Some(RelaySummary {
            connections: state.relay.registry().len(),
            rooms: state.relay.rooms().room_count(),
            events: state.sink.stats(),
        }),
    };
    let code = match status {
        HealthStatus::Up => StatusCode::OK,
        HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(response))
}

pub struct Server {
    listener: TcpListener,
    state: AppState,
    router: Router,
    shutdown_timeout: Duration,
}

impl Server {
    pub async fn bind(settings: ServerSettings) -> Result<Self> {
        let listener = TcpListener::bind(settings.listen)
            .await
            .with_context(|| format!("failed to bind {}", settings.listen))?;
        let state = AppState::start(&settings);
        let router = router(state.clone(), &settings);

        Ok(Self {
            listener,
            state,
            router,
            shutdown_timeout: settings.shutdown_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server {
            listener,
            state,
            router,
            shutdown_timeout,
        } = self;

        let draining = Arc::new(Notify::new());
        let signal = Arc::clone(&draining);
        let relay = Arc::clone(&state.relay);
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            shutdown.await;
            handle_shutdown(&relay).await;
            signal.notify_one();
        });

        select! {
            result = serve.into_future() => result.context("relay server failed")?,
            _ = async {
                draining.notified().await;
                tokio::time::sleep(shutdown_timeout).await;
            } => warn!(?shutdown_timeout, "graceful shutdown timed out"),
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(relay: &Relay) {
    info!("relay shutting down");
    let notice = match Reply::error("server".into(), "relay shutting down").encode() {
        Ok(notice) => notice,
        Err(err) => {
            warn!(error = %err, "failed to encode shutdown notice");
            return;
        }
    };
    if let Err(err) = relay.hub().broadcast(notice, None).await {
        warn!(error = %err, "failed to broadcast shutdown notice");
    }
}
