mod config;

use std::net::SocketAddr;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use pulse_api::middleware::decode_claims;
use pulse_api::state::AppStateInner;
use pulse_gateway::connection;
use pulse_gateway::dispatcher::Dispatcher;
use pulse_gateway::presence::{self, PresenceTracker};

use crate::config::Config;

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
    presence: PresenceTracker,
    jwt_secret: String,
}

#[derive(Deserialize)]
struct GatewayQuery {
    token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = pulse_db::Database::open(&config.db_path)?;

    let dispatcher = Dispatcher::new();
    let presence = PresenceTracker::new(dispatcher.clone(), config.presence_ttl);

    // Reaper drops presence sessions whose heartbeats stopped
    let shutdown = CancellationToken::new();
    let reaper = tokio::spawn(presence::run_reaper_loop(
        presence.clone(),
        config.presence_heartbeat,
        shutdown.clone(),
    ));

    let app_state = AppStateInner::new(db, dispatcher.clone(), presence.clone(), config.service_config());

    let gateway_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(GatewayState {
            dispatcher,
            presence,
            jwt_secret: config.jwt_secret.clone(),
        });

    let app = Router::new()
        .merge(pulse_api::router(app_state))
        .merge(gateway_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Pulse server listening on {}", addr);
    info!(
        "Presence: heartbeat every {:?}, sessions expire after {:?}",
        config.presence_heartbeat, config.presence_ttl
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = reaper.await {
        warn!("Presence reaper ended abnormally: {}", e);
    }
    Ok(())
}

/// Browsers cannot set headers on a WebSocket handshake, so the token rides
/// in the query string. It is checked before the upgrade is accepted.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(claims) = decode_claims(&query.token, &state.jwt_secret) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.on_upgrade(move |socket| {
        connection::handle_connection_authenticated(
            socket,
            state.dispatcher,
            state.presence,
            claims.sub,
            claims.username,
        )
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Received Ctrl+C, shutting down...");
    }
}
