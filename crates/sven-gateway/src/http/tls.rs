// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Self-signed TLS for the gateway's HTTP listener.
//!
//! There is no certificate authority here: operators connect with the
//! fingerprint they were shown at pairing time, the same trust model as SSH
//! host keys. A fresh ECDSA P-256 certificate is generated on first run and
//! renewed automatically once it is within [`CERT_RENEW_BEFORE_DAYS`] of
//! expiry.

use std::path::{Path, PathBuf};

use anyhow::Context;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use crate::crypto::token::write_secret_file;

/// Certificates are valid for 90 days...
pub const CERT_VALIDITY_DAYS: i64 = 90;
/// ...and renewed once fewer than 7 remain.
pub const CERT_RENEW_BEFORE_DAYS: i64 = 7;

const CERT_FILE: &str = "cert.pem";
const KEY_FILE: &str = "key.pem";
const META_FILE: &str = "cert-meta.yaml";

/// Side-car metadata recording when the generated certificate expires, so we
/// don't need to parse the DER back out of the PEM file to decide whether to
/// renew it.
#[derive(Debug, Serialize, Deserialize)]
struct CertMeta {
    #[serde(with = "time::serde::rfc3339")]
    not_after: OffsetDateTime,
    fingerprint_sha256: String,
}

/// A loaded (or freshly generated) TLS identity for the gateway.
pub struct TlsRuntime {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// SHA-256 fingerprint of the DER-encoded certificate, shown to operators
    /// during pairing so they can verify the connection out of band.
    pub fingerprint_sha256: String,
}

impl TlsRuntime {
    /// Loads the certificate/key pair from `cert_dir` if present and not
    /// close to expiry, otherwise generates and persists a new pair.
    pub fn load_or_generate(cert_dir: &Path) -> anyhow::Result<Self> {
        let cert_path = cert_dir.join(CERT_FILE);
        let key_path = cert_dir.join(KEY_FILE);
        let meta_path = cert_dir.join(META_FILE);

        if cert_path.is_file() && key_path.is_file() && meta_path.is_file() {
            let meta_text = std::fs::read_to_string(&meta_path)
                .with_context(|| format!("reading {}", meta_path.display()))?;
            if let Ok(meta) = serde_yaml::from_str::<CertMeta>(&meta_text) {
                let renew_at = meta.not_after - Duration::days(CERT_RENEW_BEFORE_DAYS);
                if OffsetDateTime::now_utc() < renew_at {
                    return Ok(Self {
                        cert_path,
                        key_path,
                        fingerprint_sha256: meta.fingerprint_sha256,
                    });
                }
            }
            tracing::info!("existing gateway certificate near expiry, regenerating");
        }

        generate_self_signed(&cert_path, &key_path, &meta_path)
    }
}

fn generate_self_signed(
    cert_path: &Path,
    key_path: &Path,
    meta_path: &Path,
) -> anyhow::Result<TlsRuntime> {
    let key_pair = KeyPair::generate().context("generating ECDSA P-256 key pair")?;

    let mut params = CertificateParams::new(vec!["localhost".to_string()])
        .context("building certificate params")?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "sven-gateway");
    params.distinguished_name = dn;
    let not_before = OffsetDateTime::now_utc() - Duration::hours(1);
    let not_after = OffsetDateTime::now_utc() + Duration::days(CERT_VALIDITY_DAYS);
    params.not_before = not_before;
    params.not_after = not_after;

    let cert = params
        .self_signed(&key_pair)
        .context("self-signing certificate")?;

    let cert_pem = cert.pem();
    let key_pem = key_pair.serialize_pem();

    write_secret_file(cert_path, &cert_pem)?;
    write_secret_file(key_path, &key_pem)?;

    let fingerprint = hex::encode(Sha256::digest(cert.der()));

    let meta = CertMeta {
        not_after,
        fingerprint_sha256: fingerprint.clone(),
    };
    write_secret_file(meta_path, &serde_yaml::to_string(&meta)?)?;

    Ok(TlsRuntime {
        cert_path: cert_path.to_path_buf(),
        key_path: key_path.to_path_buf(),
        fingerprint_sha256: fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_reloads_without_renewing() {
        let dir = tempfile::tempdir().unwrap();
        let first = TlsRuntime::load_or_generate(dir.path()).unwrap();
        let second = TlsRuntime::load_or_generate(dir.path()).unwrap();
        assert_eq!(first.fingerprint_sha256, second.fingerprint_sha256);
    }

    #[test]
    fn fingerprint_is_64_hex_chars() {
        let dir = tempfile::tempdir().unwrap();
        let rt = TlsRuntime::load_or_generate(dir.path()).unwrap();
        assert_eq!(rt.fingerprint_sha256.len(), 64);
        assert!(rt.fingerprint_sha256.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
