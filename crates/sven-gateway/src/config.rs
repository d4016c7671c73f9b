// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Gateway configuration loaded from YAML.
//!
//! Configuration is YAML (never TOML). Layers are **deep-merged** — you can
//! override only the fields you care about in each file.
//!
//! Search order (later overrides earlier):
//! 1. `/etc/sven/gateway.yaml`
//! 2. `~/.config/sven/gateway.yaml`
//! 3. `.sven/gateway.yaml` (workspace-local)
//! 4. Path given to [`load`] explicitly.
//!
//! **All defaults are production-safe.** Running `load(None)` with no config
//! file gives you TLS on, loopback bind, and an empty fleet (no runners
//! registered until the operator adds them).
//!
//! # Example full config
//! ```yaml
//! http:
//!   bind: "127.0.0.1:18790"
//!   insecure_dev_mode: false
//!   token_file: "~/.config/sven/gateway-token.yaml"
//!
//! tunnel:
//!   grace_window_secs: 60
//!   data_conn_timeout_secs: 15
//!   placement_timeout_secs: 15
//!   streaming_idle_secs: 90
//!
//! session_store:
//!   path: "~/.config/sven/gateway/sessions.yaml"
//!
//! fleet:
//!   runners:
//!     - runner_id: "gpu-0"
//!       total_vram_bytes: 85899345920
//!   models:
//!     llama-70b:
//!       runtime_kind: moderate-batched
//!       weight_bytes_per_gpu: 140000000000
//!       kv_bytes_per_token: 524288
//! ```

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sven_scheduler::{KvCacheKind, RuntimeKind};

fn default_http_bind() -> String {
    "127.0.0.1:18790".to_string()
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub session_store: SessionStoreConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
}

/// HTTP/WebSocket listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// `host:port` to listen on. Default: `127.0.0.1:18790` (loopback only).
    #[serde(default = "default_http_bind")]
    pub bind: String,

    /// TLS is **enabled by default**. Set this to `true` only for local
    /// development. The flag is intentionally named to make it uncomfortable
    /// to leave on in production.
    #[serde(default)]
    pub insecure_dev_mode: bool,

    /// Directory where the auto-generated ECDSA P-256 certificate and private
    /// key are stored. Defaults to `~/.config/sven/gateway/tls/`.
    pub tls_cert_dir: Option<PathBuf>,

    /// Path to the YAML file that stores the SHA-256 hashed HTTP bearer token.
    /// If `None`, the token file is auto-located at
    /// `~/.config/sven/gateway/token.yaml`.
    pub token_file: Option<PathBuf>,

    /// Maximum request body size in bytes (default: 4 MiB).
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,
}

fn default_max_body() -> usize {
    4 * 1024 * 1024
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_http_bind(),
            insecure_dev_mode: false,
            tls_cert_dir: None,
            token_file: None,
            max_body_bytes: default_max_body(),
        }
    }
}

/// Reverse-dial tunnel timing (`SPEC_FULL.md` §4.5, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// How long a lost control channel is still considered the valid
    /// endpoint for its `client_key` (default: 60s).
    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: u64,

    /// Timeout for placement when no slot has capacity (default: 15s).
    #[serde(default = "default_placement_timeout_secs")]
    pub placement_timeout_secs: u64,

    /// Timeout for establishing a new data connection (default: 15s).
    #[serde(default = "default_data_conn_timeout_secs")]
    pub data_conn_timeout_secs: u64,

    /// Idle timeout for a streaming read (default: 90s).
    #[serde(default = "default_streaming_idle_secs")]
    pub streaming_idle_secs: u64,
}

fn default_grace_window_secs() -> u64 {
    60
}
fn default_placement_timeout_secs() -> u64 {
    15
}
fn default_data_conn_timeout_secs() -> u64 {
    15
}
fn default_streaming_idle_secs() -> u64 {
    90
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            grace_window_secs: default_grace_window_secs(),
            placement_timeout_secs: default_placement_timeout_secs(),
            data_conn_timeout_secs: default_data_conn_timeout_secs(),
            streaming_idle_secs: default_streaming_idle_secs(),
        }
    }
}

/// Location of the durable session-metadata shadow store
/// (`SPEC_FULL.md` §4.7, §4.9, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStoreConfig {
    /// YAML file backing `UpdateMetadata`/`LoadMetadata`.
    /// Default: `~/.config/sven/gateway/sessions.yaml`
    pub path: Option<PathBuf>,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self { path: None }
    }
}

/// The fleet this gateway schedules onto: known runners and the model
/// catalog they can host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub runners: Vec<RunnerConfigEntry>,
    #[serde(default)]
    pub models: HashMap<String, ModelConfigEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfigEntry {
    pub runner_id: String,
    pub total_vram_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfigEntry {
    pub runtime_kind: RuntimeKindConfig,
    pub weight_bytes_per_gpu: u64,
    pub kv_bytes_per_token: u64,
    /// Explicit `concurrency` override; absent means use the runtime kind's
    /// protocol default (`SPEC_FULL.md` §4.2 decision tree).
    pub concurrency: Option<u32>,
    #[serde(default)]
    pub kv_cache_kind: KvCacheKindConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeKindConfig {
    FastBatched,
    ModerateBatched,
    SingleRequest,
}

impl From<RuntimeKindConfig> for RuntimeKind {
    fn from(v: RuntimeKindConfig) -> Self {
        match v {
            RuntimeKindConfig::FastBatched => RuntimeKind::FastBatched,
            RuntimeKindConfig::ModerateBatched => RuntimeKind::ModerateBatched,
            RuntimeKindConfig::SingleRequest => RuntimeKind::SingleRequest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KvCacheKindConfig {
    Mha,
    Mqa,
    Gqa { groups: u8 },
}

impl Default for KvCacheKindConfig {
    fn default() -> Self {
        KvCacheKindConfig::Mha
    }
}

impl From<KvCacheKindConfig> for KvCacheKind {
    fn from(v: KvCacheKindConfig) -> Self {
        match v {
            KvCacheKindConfig::Mha => KvCacheKind::Mha,
            KvCacheKindConfig::Mqa => KvCacheKind::Mqa,
            KvCacheKindConfig::Gqa { groups } => KvCacheKind::Gqa { groups },
        }
    }
}

// ── Loader ────────────────────────────────────────────────────────────────────

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    paths.push(PathBuf::from("/etc/sven/gateway.yaml"));
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/sven/gateway.yaml"));
    }
    paths.push(PathBuf::from(".sven/gateway.yaml"));
    paths
}

pub fn load(extra: Option<&Path>) -> anyhow::Result<GatewayConfig> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading gateway config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit gateway config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let config: GatewayConfig = if matches!(&merged, serde_yaml::Value::Mapping(m) if m.is_empty())
    {
        GatewayConfig::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    Ok(config)
}

fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_http_bind_is_loopback() {
        let c = GatewayConfig::default();
        assert!(
            c.http.bind.starts_with("127.0.0.1"),
            "default must be loopback-only"
        );
    }

    #[test]
    fn default_tls_is_enabled() {
        let c = GatewayConfig::default();
        assert!(!c.http.insecure_dev_mode, "TLS must be on by default");
    }

    #[test]
    fn default_tunnel_grace_window_is_60s() {
        let c = GatewayConfig::default();
        assert_eq!(c.tunnel.grace_window_secs, 60);
    }

    #[test]
    fn config_yaml_round_trip() {
        let c = GatewayConfig::default();
        let yaml = serde_yaml::to_string(&c).unwrap();
        let back: GatewayConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.http.bind, c.http.bind);
        assert_eq!(back.tunnel.grace_window_secs, c.tunnel.grace_window_secs);
    }

    #[test]
    fn fleet_section_parses_model_and_runner() {
        let yaml = r#"
fleet:
  runners:
    - runner_id: gpu-0
      total_vram_bytes: 1000
  models:
    m:
      runtime_kind: moderate-batched
      weight_bytes_per_gpu: 100
      kv_bytes_per_token: 10
"#;
        let c: GatewayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.fleet.runners.len(), 1);
        assert_eq!(c.fleet.runners[0].runner_id, "gpu-0");
        let model = c.fleet.models.get("m").unwrap();
        assert_eq!(model.runtime_kind, RuntimeKindConfig::ModerateBatched);
        assert!(model.concurrency.is_none());
    }

    #[test]
    fn load_returns_defaults_when_no_files_exist() {
        let c = load(None).unwrap();
        assert_eq!(c.http.bind, default_http_bind());
    }
}
