//! HTTP routes for the ridechat server.
//!
//! The WebSocket upgrade resolves the room and the caller's identity before
//! accepting; everything after the upgrade happens in [`crate::session`].

use crate::config::Config;
use crate::metrics;
use crate::session;
use crate::state::{build_authenticator, AppState, Backends};
use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use ridechat_core::{validate_room_id, AuthError, Identity};
use ridechat_transport::split_websocket;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Query parameters accepted on the WebSocket endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct JoinParams {
    /// Room to join; the configured default room when absent or empty.
    #[serde(rename = "roomId")]
    pub room_id: Option<String>,
    /// Access token, for clients that cannot set headers.
    pub token: Option<String>,
}

/// Run the HTTP/WebSocket server until ctrl-c.
///
/// # Errors
///
/// Returns an error if the backends cannot be reached or the server fails
/// to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let auth = build_authenticator(&config)?;
    let backends = Backends::connect(&config).await?;
    let addr = config.bind_addr()?;
    let state = AppState::start(config, backends, auth);

    let listener = TcpListener::bind(addr).await?;
    info!("ridechat server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    serve(listener, state).await
}

/// Serve the routes on an already bound listener until ctrl-c.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

/// Build the route table.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Live connection and queue counters.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.registry.stats();
    Json(serde_json::json!({
        "connections": stats.connection_count,
        "rooms": stats.room_count,
        "authenticated": stats.authenticated_count,
        "persistQueueDepth": state.persist.depth(),
    }))
}

/// Extract a bearer token from the `Authorization` header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Verify the caller, if a token was presented.
///
/// Returns `Err` with the rejection response when authentication fails and
/// is required.
async fn resolve_identity(
    state: &AppState,
    token: Option<String>,
) -> Result<Option<Identity>, Response> {
    let result = match token {
        Some(token) => state.auth.authenticate(&token).await,
        None => Err(AuthError::MissingToken),
    };

    match result {
        Ok(identity) => Ok(Some(identity)),
        Err(e) if state.config.auth.required => {
            debug!(error = %e, "Rejecting unauthenticated connection");
            ridechat_core::metrics::record_error("auth");
            Err((StatusCode::UNAUTHORIZED, e.to_string()).into_response())
        }
        Err(AuthError::MissingToken) => Ok(None),
        Err(e) => {
            warn!(error = %e, "Invalid token, continuing anonymously");
            Ok(None)
        }
    }
}

/// WebSocket upgrade handler.
///
/// Any room key joins except those longer than 256 bytes or containing
/// control characters, which are rejected with 400 before the upgrade.
/// A missing `roomId` joins the default room.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<JoinParams>,
    headers: HeaderMap,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let room = params
        .room_id
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| state.config.history.default_room.clone());
    if let Err(reason) = validate_room_id(&room) {
        debug!(room = %room, reason, "Rejecting connection");
        return (StatusCode::BAD_REQUEST, reason).into_response();
    }

    let token = params.token.or_else(|| bearer_token(&headers));
    let identity = match resolve_identity(&state, token).await {
        Ok(identity) => identity,
        Err(rejection) => return rejection,
    };

    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = split_websocket(socket, max_message_size, Some(remote));
            session::run_session(state, room, identity, sink, stream).await;
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_join_params_from_query() {
        let Query(params): Query<JoinParams> =
            Query::try_from_uri(&"/ws?roomId=ride-7&token=t".parse().unwrap()).unwrap();
        assert_eq!(params.room_id.as_deref(), Some("ride-7"));
        assert_eq!(params.token.as_deref(), Some("t"));

        let Query(params): Query<JoinParams> =
            Query::try_from_uri(&"/ws".parse().unwrap()).unwrap();
        assert!(params.room_id.is_none());
    }
}
