//! Huddle Relay Server
//!
//! A lightweight WebSocket relay that lets peers in the same room find each
//! other:
//!
//! 1. **Presence**: `join-room` announces a newcomer to the members already in
//!    the room; `user-leave` (explicit, or synthesized when a connection drops)
//!    announces a departure.
//!
//! 2. **Media toggles**: audio/video toggles are rebroadcast verbatim to the
//!    rest of the room.
//!
//! **Privacy**: The relay never sees media or chat. Sessions and data channels
//! run directly between peers; the relay only forwards small control events.

mod error;
mod handler;
mod protocol;
mod state;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::Method,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use clap::Parser;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::{RelayConfig, RelayState};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "huddle-relay", version, about = "Huddle room signaling relay")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "RELAY_PORT")]
    port: u16,

    /// Maximum members per room
    #[arg(
        long,
        default_value_t = 50,
        env = "MAX_ROOM_SIZE",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    max_room_size: u32,

    /// Seconds between WebSocket keep-alive pings (0 disables)
    #[arg(long, default_value_t = 30, env = "PING_INTERVAL_SECS")]
    ping_interval_secs: u64,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle_relay=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = RelayConfig {
        port: args.port,
        max_room_size: args.max_room_size as usize,
        ping_interval_secs: args.ping_interval_secs,
    };

    let state = RelayState::new(config);
    let app = router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Huddle relay server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}

/// Build the HTTP router around a relay state.
fn router(state: RelayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade handler for client connections.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_websocket(socket, state))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "huddle-relay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Statistics endpoint.
async fn stats_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(json!({
        "connections": state.connection_count(),
        "rooms": state.room_count(),
        "members": state.member_count(),
        "timestamp": chrono::Utc::now().timestamp_millis(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
