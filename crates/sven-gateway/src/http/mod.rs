// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The gateway's HTTP/WebSocket surface: bearer auth, security headers, CSRF
//! guard, TLS termination, and the reverse-dial tunnel's two endpoints.
//!
//! The general REST surface for CRUD on projects/tasks/users is out of
//! scope here (`§1`) — this module only exposes what the core touches:
//! the tunnel, and a health probe for the `connectivity-probe` CLI.

pub mod auth;
pub mod security;
pub mod tls;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;

use crate::{
    config::HttpConfig,
    crypto::token::StoredToken,
    session::AgentSessionIndex,
    tunnel::{self, AsConnectionManager, AsSessionIndex, GatewayConnectionManager, TunnelState},
};

use auth::{AsAuthState, AuthState, bearer_auth_mw};
use security::{csrf_guard, security_headers};

/// Shared state threaded through every handler and middleware layer.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub connection_manager: Arc<GatewayConnectionManager>,
    pub session_index: Arc<AgentSessionIndex>,
}

impl AsAuthState for AppState {
    fn auth_state(&self) -> &AuthState {
        &self.auth
    }
}

impl AsConnectionManager for AppState {
    fn connection_manager(&self) -> &Arc<GatewayConnectionManager> {
        &self.connection_manager
    }
}

impl AsSessionIndex for AppState {
    fn session_index(&self) -> &Arc<AgentSessionIndex> {
        &self.session_index
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    tunnel_clients: usize,
    active_tunnels: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.connection_manager.stats().await;
    Json(HealthResponse {
        status: "ok",
        tunnel_clients: stats.client_count,
        active_tunnels: stats.active_count,
    })
}

/// The JSON shape the `connectivity-probe` CLI parses (`§6`).
#[derive(Debug, Serialize, Deserialize)]
pub struct ProbeResult {
    pub session_id: String,
    pub control_connected: bool,
    pub data_tunnel_working: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProbeQuery {
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

/// `GET /tunnel/:client_key/probe` — exercises the full reverse-dial round
/// trip (control-channel liveness, then an actual data-connection dial) so
/// `connectivity-probe` can report both halves of `§4.5`/`§4.6` without the
/// operator needing shell access to the runner box.
async fn probe_handler(
    Path(client_key): Path<String>,
    Query(query): Query<ProbeQuery>,
    State(state): State<AppState>,
) -> Json<ProbeResult> {
    let session_id = client_key
        .strip_prefix("desktop-")
        .unwrap_or(&client_key)
        .to_string();

    let record = state.connection_manager.get(&client_key).await;
    let control_connected = match &record {
        Some(r) => matches!(r.state().await, TunnelState::Active),
        None => false,
    };

    if !control_connected {
        return Json(ProbeResult {
            session_id,
            control_connected: false,
            data_tunnel_working: false,
            latency_ms: 0,
            error: Some("control channel not active".to_string()),
        });
    }

    let started = std::time::Instant::now();
    let result = state
        .connection_manager
        .dial(
            &client_key,
            Duration::from_millis(query.timeout_ms),
            CancellationToken::new(),
        )
        .await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(mut socket) => {
            use futures::SinkExt;
            let _ = socket.close().await;
            Json(ProbeResult {
                session_id,
                control_connected: true,
                data_tunnel_working: true,
                latency_ms,
                error: None,
            })
        }
        Err(e) => Json(ProbeResult {
            session_id,
            control_connected: true,
            data_tunnel_working: false,
            latency_ms,
            error: Some(e.to_string()),
        }),
    }
}

/// Assembles the full router: tunnel endpoints behind bearer auth, security
/// headers and CSRF guard on every response, `/healthz` open for local
/// probing (it carries no information an unauthenticated peer couldn't
/// already infer from a TCP connect).
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route(
            "/tunnel/:client_key/control",
            get(tunnel::ws::control_handler::<AppState>),
        )
        .route(
            "/tunnel/:client_key/data/:conn_id",
            get(tunnel::ws::data_handler::<AppState>),
        )
        .route("/tunnel/:client_key/probe", get(probe_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            bearer_auth_mw::<AppState>,
        ))
        .route("/healthz", get(healthz))
        .layer(axum::middleware::from_fn(csrf_guard))
        .layer(axum::middleware::from_fn(security_headers))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

/// Binds and serves `router` forever, over TLS unless
/// `config.insecure_dev_mode` is set. Blocks until the server stops.
pub async fn serve(
    config: &HttpConfig,
    token_hash: StoredToken,
    connection_manager: Arc<GatewayConnectionManager>,
    session_index: Arc<AgentSessionIndex>,
) -> crate::error::Result<()> {
    let addr: SocketAddr = config
        .bind
        .parse()
        .map_err(|e| crate::error::GatewayError::Config(format!("invalid http.bind: {e}")))?;

    let state = AppState {
        auth: AuthState::with_defaults(token_hash),
        connection_manager,
        session_index,
    };

    let app = router(state, config.max_body_bytes)
        .into_make_service_with_connect_info::<SocketAddr>();

    if config.insecure_dev_mode {
        info!(%addr, "starting gateway HTTP listener (insecure-dev-mode, no TLS)");
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(crate::error::GatewayError::Http)?;
        axum::serve(listener, app)
            .await
            .map_err(crate::error::GatewayError::Http)?;
    } else {
        let cert_dir = config
            .tls_cert_dir
            .clone()
            .unwrap_or_else(default_tls_cert_dir);
        let runtime = tls::TlsRuntime::load_or_generate(&cert_dir)
            .map_err(|e| crate::error::GatewayError::Tls(e.to_string()))?;
        info!(%addr, fingerprint = %runtime.fingerprint_sha256, "starting gateway HTTPS listener");

        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            &runtime.cert_path,
            &runtime.key_path,
        )
        .await
        .map_err(|e| crate::error::GatewayError::Tls(e.to_string()))?;

        axum_server::bind_rustls(addr, tls_config)
            .serve(app)
            .await
            .map_err(crate::error::GatewayError::Http)?;
    }

    Ok(())
}

pub(crate) fn default_tls_cert_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".config/sven/gateway/tls")
}
