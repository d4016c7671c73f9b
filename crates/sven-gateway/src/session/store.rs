// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The durable shadow store for session metadata.
//!
//! [`AgentSessionIndex`](super::index::AgentSessionIndex) is the in-memory
//! routing truth; this is its opaque durability backend. Nothing above this
//! layer should know whether metadata lives in a YAML file, a database, or
//! anything else — it is addressed purely as `UpdateMetadata`/`LoadMetadata`
//! against a `session_id`.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::types::SessionMetadata;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn update_metadata(&self, session_id: &str, metadata: SessionMetadata);
    async fn load_metadata(&self, session_id: &str) -> Option<SessionMetadata>;
    async fn clear_metadata(&self, session_id: &str);
}

/// A `SessionStore` backed by a single YAML file, rewritten wholesale on
/// every mutation. Sessions number in the dozens to low thousands for a
/// single gateway, not millions, so a full-file rewrite per update is the
/// simplest correct thing and matches how the token/peers files in this
/// crate are already persisted.
pub struct FileSessionStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, SessionMetadata>>,
}

impl FileSessionStore {
    pub async fn open(path: PathBuf) -> anyhow::Result<Arc<Self>> {
        let cache = if path.is_file() {
            let text = tokio::fs::read_to_string(&path).await?;
            serde_yaml::from_str(&text).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Arc::new(Self {
            path,
            cache: Mutex::new(cache),
        }))
    }

    async fn persist(&self, cache: &HashMap<String, SessionMetadata>) {
        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match serde_yaml::to_string(cache) {
            Ok(yaml) => {
                if let Err(e) = tokio::fs::write(&self.path, yaml).await {
                    tracing::warn!(error = %e, path = %self.path.display(), "failed to persist session store");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize session store"),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn update_metadata(&self, session_id: &str, metadata: SessionMetadata) {
        let mut cache = self.cache.lock().await;
        cache.insert(session_id.to_string(), metadata);
        self.persist(&cache).await;
    }

    async fn load_metadata(&self, session_id: &str) -> Option<SessionMetadata> {
        self.cache.lock().await.get(session_id).cloned()
    }

    async fn clear_metadata(&self, session_id: &str) {
        let mut cache = self.cache.lock().await;
        if cache.remove(session_id).is_some() {
            self.persist(&cache).await;
        }
    }
}

/// An in-memory store for tests and for running without a configured
/// `session_store.path`.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<HashMap<String, SessionMetadata>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn update_metadata(&self, session_id: &str, metadata: SessionMetadata) {
        self.inner.lock().await.insert(session_id.to_string(), metadata);
    }

    async fn load_metadata(&self, session_id: &str) -> Option<SessionMetadata> {
        self.inner.lock().await.get(session_id).cloned()
    }

    async fn clear_metadata(&self, session_id: &str) {
        self.inner.lock().await.remove(session_id);
    }
}
