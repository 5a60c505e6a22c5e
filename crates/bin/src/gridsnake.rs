//! gridsnake - channel server behind an axum router.

use axum::{
    Json, Router,
    extract::{
        ConnectInfo, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use server::{Client, ConnectionLimits, Inbound, SessionRegistry, SessionSettings, SocketParams};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct AppState {
    registry: SessionRegistry,
    limits: ConnectionLimits,
    outbound_capacity: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct Health {
    status: String,
    sessions: usize,
    connections: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,server=debug")),
        )
        .init();

    info!("gridsnake v{}", env!("CARGO_PKG_VERSION"));

    // Load server configuration
    let config = server::Config::load()?;
    info!("Loaded configuration");
    info!("  Port: {}", config.server.port);
    info!("  Board: {}x{}, {} players max", config.board.cols, config.board.rows, config.board.max_players);
    info!("  Tick: {}ms", config.session.tick_interval_ms);

    let state = AppState {
        registry: SessionRegistry::new(SessionSettings::from(&config)),
        limits: ConnectionLimits::from_config(&config),
        outbound_capacity: config.server.outbound_capacity,
    };

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server running on http://{}", addr);
    info!(
        "Channel endpoint: ws://{}/socket/websocket (topics {}<board_id>)",
        addr,
        protocol::GAME_TOPIC_PREFIX
    );

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/socket/websocket", get(websocket_handler))
        .route("/health", get(health))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
        sessions: state.registry.len().await,
        connections: state.limits.total().await,
    })
}

/// Upgrade a socket connection, subject to the connection limits.
async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<SocketParams>,
    State(state): State<AppState>,
) -> Response {
    let ip = addr.ip();
    let Some(id) = state.limits.acquire(ip).await else {
        warn!("Connection rejected (limit reached): {}", addr);
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    if let Some(vsn) = params.vsn.as_deref().filter(|v| !v.starts_with("2.")) {
        debug!("Client {} asked for serializer {}, speaking 2.0.0", addr, vsn);
    }

    let limits = state.limits.clone();
    ws.on_failed_upgrade(move |e| {
        warn!("Upgrade from {} failed: {}", addr, e);
        tokio::spawn(async move { limits.release(ip).await });
    })
    .on_upgrade(move |socket| async move {
        handle_websocket(socket, addr, id, params.player_id(), &state).await;
        state.limits.release(ip).await;
    })
}

/// Pump one websocket through a channel [`Client`].
async fn handle_websocket(
    socket: WebSocket,
    addr: SocketAddr,
    id: u64,
    player_id: Option<String>,
    state: &AppState,
) {
    info!("New connection from {} (client {})", addr, id);

    let (write, read) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(state.outbound_capacity);
    let writer = tokio::spawn(server::write_frames(write, outbound_rx, |text| {
        Message::Text(text.into())
    }));
    let client = Client::new(id, addr, player_id, state.registry.clone(), outbound_tx);
    server::pump(client, read, writer, inbound).await;
}

fn inbound(msg: &Message) -> Inbound<'_> {
    match msg {
        Message::Text(text) => Inbound::Text(text.as_str()),
        Message::Close(_) => Inbound::Close,
        _ => Inbound::Skip,
    }
}
