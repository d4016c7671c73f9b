// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Gateway startup — assembles all subsystems and starts them.
//!
//! # Startup sequence
//!
//! [`run`] performs these steps in order, then blocks on the HTTP server:
//!
//! 1. Build the [`crate::fleet::Fleet`] (runner registry + placement engine) from `config.fleet`.
//! 2. Load or generate the HTTP bearer token; print it **once** if new.
//! 3. Open the durable session store and the in-memory [`AgentSessionIndex`] on top of it.
//! 4. Construct the reverse-dial [`GatewayConnectionManager`].
//! 5. Start the Axum HTTPS server (blocks until shutdown).
//!
//! # Token management
//!
//! ```text
//! First start:   token generated -> SHA-256 hash stored in token.yaml
//!                raw token printed once (save it!)
//! Client:        Authorization: Bearer <token>
//! Rotate:        sven gateway regenerate-token
//!                old token immediately invalid
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use tracing::info;

use crate::{
    config::GatewayConfig,
    crypto::token::StoredTokenFile,
    http::ProbeResult,
    session::{AgentSessionIndex, FileSessionStore, MemorySessionStore, SessionStore},
    tunnel::GatewayConnectionManager,
};

/// Start the gateway. Runs until the HTTP server stops (Ctrl+C/SIGTERM, or
/// an unrecoverable bind/TLS error).
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    // ── Fleet ─────────────────────────────────────────────────────────────────
    // Kept alive for the process lifetime: the placement engine's admission
    // state (slots, runner registry) must outlive every request that could
    // reference it, not just the call that builds it.
    let fleet = crate::fleet::build(&config.fleet).await;
    info!(
        runner_count = config.fleet.runners.len(),
        model_count = config.fleet.models.len(),
        "fleet assembled"
    );

    // ── Token ─────────────────────────────────────────────────────────────────
    let token_path = config
        .http
        .token_file
        .clone()
        .unwrap_or_else(default_token_path);
    let token_hash = if token_path.exists() {
        StoredTokenFile::load(&token_path)?.token_hash
    } else {
        info!("generating new gateway bearer token");
        let raw = StoredTokenFile::generate_and_save(&token_path)?;
        info!("=======================================================");
        info!("Gateway bearer token (shown once — save it now!):");
        info!("  {}", raw.as_str());
        info!("Export it as SVEN_GATEWAY_TOKEN to use `sven connectivity-probe`.");
        info!("=======================================================");
        StoredTokenFile::load(&token_path)?.token_hash
    };

    // ── Session index + durable store ────────────────────────────────────────
    let store: Arc<dyn SessionStore> = match &config.session_store.path {
        Some(path) => FileSessionStore::open(path.clone())
            .await
            .with_context(|| format!("opening session store at {}", path.display()))?,
        None => Arc::new(MemorySessionStore::default()),
    };
    let session_index = Arc::new(AgentSessionIndex::new(store));

    // ── Reverse-dial connection manager ──────────────────────────────────────
    let connection_manager = Arc::new(GatewayConnectionManager::new(Duration::from_secs(
        config.tunnel.grace_window_secs,
    )));

    // ── HTTP server (blocks until shutdown) ──────────────────────────────────
    info!(
        bind = %config.http.bind,
        tls = !config.http.insecure_dev_mode,
        "starting HTTP gateway",
    );

    crate::http::serve(&config.http, token_hash, connection_manager, session_index).await?;

    drop(fleet);
    Ok(())
}

/// Regenerate the HTTP bearer token, printing the new raw token once.
pub fn regenerate_token(config: &GatewayConfig) -> anyhow::Result<()> {
    let token_path = config
        .http
        .token_file
        .clone()
        .unwrap_or_else(default_token_path);
    let raw = StoredTokenFile::generate_and_save(&token_path)?;
    println!("New bearer token (save it now — it won't be shown again):");
    println!("  {}", raw.as_str());
    println!();
    println!("Usage:  Authorization: Bearer {}", raw.as_str());
    Ok(())
}

/// Checks a session's reverse-dial tunnel end to end, the way an operator's
/// `connectivity-probe` invocation would (`SPEC_FULL.md` §6): dials the
/// *running* gateway's own `/tunnel/:client_key/probe` endpoint over the
/// network and reports what it says. This is an external check — it never
/// looks at in-process state, so it also exercises the HTTP/TLS/auth layer
/// the real client path goes through.
///
/// The raw bearer token is never written to disk (only its SHA-256 hash is,
/// see [`crate::crypto::token`]), so a separate CLI invocation has no way to
/// recover it from the gateway's config; it is read instead from the
/// `SVEN_GATEWAY_TOKEN` environment variable.
pub async fn connectivity_probe(
    config: &GatewayConfig,
    session_id: &str,
    timeout: Duration,
) -> ProbeResult {
    let client_key = format!("desktop-{session_id}");
    match probe_over_http(config, &client_key, timeout).await {
        Ok(report) => report,
        Err(e) => ProbeResult {
            session_id: session_id.to_string(),
            control_connected: false,
            data_tunnel_working: false,
            latency_ms: 0,
            error: Some(e.to_string()),
        },
    }
}

async fn probe_over_http(
    config: &GatewayConfig,
    client_key: &str,
    timeout: Duration,
) -> anyhow::Result<ProbeResult> {
    let token = std::env::var("SVEN_GATEWAY_TOKEN")
        .context("SVEN_GATEWAY_TOKEN must be set to the gateway's bearer token")?;

    let addr: std::net::SocketAddr = config
        .http
        .bind
        .parse()
        .with_context(|| format!("invalid http.bind {:?}", config.http.bind))?;

    let mut builder = reqwest::Client::builder().timeout(timeout + Duration::from_secs(2));

    let (scheme, host) = if config.http.insecure_dev_mode {
        ("http", addr.ip().to_string())
    } else {
        // The gateway's self-signed certificate is issued for "localhost"
        // (see http::tls::generate_self_signed); dialing that name rather
        // than the bind IP lets certificate verification succeed without
        // disabling hostname checks.
        let cert_dir = config
            .http
            .tls_cert_dir
            .clone()
            .unwrap_or_else(crate::http::default_tls_cert_dir);
        let cert_path = cert_dir.join("cert.pem");
        let pem = std::fs::read(&cert_path)
            .with_context(|| format!("reading gateway certificate at {}", cert_path.display()))?;
        let cert = reqwest::Certificate::from_pem(&pem).context("parsing gateway certificate")?;
        builder = builder.add_root_certificate(cert);
        ("https", "localhost".to_string())
    };

    let url = format!(
        "{scheme}://{host}:{}/tunnel/{client_key}/probe?timeout_ms={}",
        addr.port(),
        timeout.as_millis(),
    );

    let client = builder.build().context("building probe HTTP client")?;

    let resp = client
        .get(&url)
        .bearer_auth(token)
        .send()
        .await
        .context("probe request failed")?;

    if !resp.status().is_success() {
        anyhow::bail!("gateway returned HTTP {}", resp.status());
    }

    resp.json::<ProbeResult>()
        .await
        .context("parsing probe response")
}

// ── Default paths ───────────────────────────────────────────────────────────

pub fn default_token_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config/sven/gateway/token.yaml")
}
