// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Bearer tokens for the gateway's HTTP API.
//!
//! The raw token is shown to the operator exactly once, at generation time.
//! Only its SHA-256 hash is ever written to disk, so a stolen config
//! directory does not hand over a usable credential — you'd still need the
//! original 32 random bytes, which were never persisted.

use std::path::Path;

use anyhow::Context;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// A freshly generated, unhashed bearer token. Exists only in memory between
/// generation and the moment it is printed to the operator.
pub struct RawToken(String);

impl RawToken {
    /// Generates 32 bytes from the OS CSPRNG and encodes them as URL-safe
    /// base64 without padding (43 characters).
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            bytes,
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hashes the token for storage. The raw value is dropped after this call.
    pub fn into_stored(self) -> StoredToken {
        StoredToken {
            hash: hex::encode(Sha256::digest(self.0.as_bytes())),
        }
    }
}

/// The SHA-256 hash of a bearer token, safe to persist and log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(with = "hex_bytes")]
    hash: Vec<u8>,
}

impl StoredToken {
    /// Constant-time comparison against a bearer value presented over HTTP.
    /// Never short-circuits on the first differing byte.
    pub fn verify(&self, candidate: &str) -> bool {
        let candidate_hash = Sha256::digest(candidate.as_bytes());
        self.hash.ct_eq(candidate_hash.as_slice()).into()
    }
}

/// The on-disk representation of [`StoredToken`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTokenFile {
    pub token_hash: StoredToken,
}

impl StoredTokenFile {
    /// Generates a new token, persists its hash, and returns the raw value
    /// for one-time display to the operator.
    pub fn generate_and_save(path: &Path) -> anyhow::Result<RawToken> {
        let raw = RawToken::generate();
        let stored = Sha256::digest(raw.as_str().as_bytes());
        let file = StoredTokenFile {
            token_hash: StoredToken {
                hash: stored.to_vec(),
            },
        };
        let yaml = serde_yaml::to_string(&file).context("serializing token file")?;
        write_secret_file(path, &yaml)?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> anyhow::Result<StoredTokenFile> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading token file {}", path.display()))?;
        serde_yaml::from_str(&text).context("parsing token file")
    }
}

/// Writes `contents` to `path` with `0600` permissions on Unix, creating
/// parent directories as needed.
pub fn write_secret_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("setting permissions on {}", path.display()))?;
    }
    Ok(())
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
