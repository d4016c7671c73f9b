// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The branch policy gate (`§4.10`): a pre-receive-style check that rejects
//! unauthorized ref updates from agent-authenticated principals *before*
//! they are written to the git-proxy's repository.
//!
//! # Security model
//!
//! Same default-deny, set-membership shape used elsewhere in the gateway for
//! authorization state (see `crypto::token`): a principal with no policy on
//! file is allowed to push nothing. Policies
//! are derived per-push from the principal's task assignment by the
//! (out-of-scope) git-proxy and handed to [`evaluate`] here; this module
//! only decides admit/reject, it never writes refs itself — the git-proxy's
//! pre-receive hook is responsible for actually stopping the write when
//! [`evaluate`] returns rejections.
//!
//! Non-agent principals never reach this gate: it only applies to
//! agent-issued pushes (`§4.10`).

use std::{collections::HashMap, collections::HashSet, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// One ref update a push is attempting to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub ref_name: String,
    pub is_force: bool,
}

/// The allowed scope for one agent-authenticated principal's pushes,
/// derived from its task assignment. `allowed_branches` gates ordinary
/// updates; `force_push_allowed` is a separate, narrower set since
/// force-pushing is strictly more dangerous than a fast-forward.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedBranchPolicy {
    #[serde(default)]
    pub allowed_branches: HashSet<String>,
    #[serde(default)]
    pub force_push_allowed: HashSet<String>,
}

impl PinnedBranchPolicy {
    pub fn new(allowed_branches: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed_branches: allowed_branches.into_iter().collect(),
            force_push_allowed: HashSet::new(),
        }
    }

    pub fn with_force_push_allowed(mut self, branches: impl IntoIterator<Item = String>) -> Self {
        self.force_push_allowed = branches.into_iter().collect();
        self
    }
}

/// One rejected ref update, carrying enough context for the git-protocol
/// error line the (out-of-scope) pre-receive hook formats for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefRejection {
    pub ref_name: String,
    pub reason: GatewayError,
}

/// Pure, I/O-free evaluation of a push's ref updates against `policy`
/// (`§4.10`). Returns `Ok(())` only if every update is allowed; otherwise
/// every rejected update is reported (not just the first) so the
/// pre-receive hook can reject the whole push in one pass while still
/// telling the client exactly which refs were the problem.
///
/// The gate MUST prevent the write outright — there is no post-push
/// rollback path (`§4.10`). Because this function performs no I/O, calling
/// it and then simply not writing the rejected refs *is* that prevention;
/// the hook never gets a chance to write them in the first place.
pub fn evaluate(
    policy: &PinnedBranchPolicy,
    updates: &[RefUpdate],
) -> Result<(), Vec<RefRejection>> {
    let mut allowed: Vec<String> = policy.allowed_branches.iter().cloned().collect();
    allowed.sort();

    let rejections: Vec<RefRejection> = updates
        .iter()
        .filter_map(|update| {
            if !policy.allowed_branches.contains(&update.ref_name) {
                return Some(RefRejection {
                    ref_name: update.ref_name.clone(),
                    reason: GatewayError::PushRejected {
                        ref_name: update.ref_name.clone(),
                        allowed: allowed.clone(),
                    },
                });
            }
            if update.is_force && !policy.force_push_allowed.contains(&update.ref_name) {
                return Some(RefRejection {
                    ref_name: update.ref_name.clone(),
                    reason: GatewayError::ForcePushRejected {
                        ref_name: update.ref_name.clone(),
                    },
                });
            }
            None
        })
        .collect();

    if rejections.is_empty() {
        Ok(())
    } else {
        Err(rejections)
    }
}

/// Renders rejections as a human-readable git-protocol error message,
/// listing the allowed branches so the client knows what it could push
/// instead (`§4.10`, `§7`).
pub fn format_rejection_message(policy: &PinnedBranchPolicy, rejections: &[RefRejection]) -> String {
    let mut allowed: Vec<&String> = policy.allowed_branches.iter().collect();
    allowed.sort();

    let mut lines = vec!["push rejected by branch policy:".to_string()];
    for r in rejections {
        lines.push(format!("  - {}: {}", r.ref_name, r.reason));
    }
    lines.push(format!("allowed branches: {allowed:?}"));
    lines.join("\n")
}

/// On-disk store of [`PinnedBranchPolicy`] keyed by principal, loaded/
/// persisted as YAML with `0o600` permissions, the same restrictively-
/// permissioned-file pattern used by [`crate::crypto::token::StoredTokenFile`].
#[derive(Debug, Default)]
pub struct BranchPolicyStore {
    policies: HashMap<String, PinnedBranchPolicy>,
    path: Option<std::path::PathBuf>,
}

impl BranchPolicyStore {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self {
                policies: HashMap::new(),
                path: Some(path.to_path_buf()),
            });
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let policies: HashMap<String, PinnedBranchPolicy> = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self {
            policies,
            path: Some(path.to_path_buf()),
        })
    }

    /// Principals with no policy on file are denied everything — there is
    /// no implicit "allow all" default.
    pub fn policy_for(&self, principal: &str) -> PinnedBranchPolicy {
        self.policies.get(principal).cloned().unwrap_or_default()
    }

    pub fn set_policy(&mut self, principal: impl Into<String>, policy: PinnedBranchPolicy) -> anyhow::Result<()> {
        self.policies.insert(principal.into(), policy);
        self.persist()
    }

    fn persist(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let yaml = serde_yaml::to_string(&self.policies).context("serializing branch policies")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating dir {}", parent.display()))?;
        }

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut f = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(path)
                .with_context(|| format!("writing {}", path.display()))?;
            f.write_all(yaml.as_bytes())?;
        }
        #[cfg(not(unix))]
        {
            std::fs::write(path, yaml.as_bytes())
                .with_context(|| format!("writing {}", path.display()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(name: &str, force: bool) -> RefUpdate {
        RefUpdate {
            ref_name: name.to_string(),
            is_force: force,
        }
    }

    #[test]
    fn s6_push_to_disallowed_branch_is_rejected_allowed_one_succeeds() {
        let policy = PinnedBranchPolicy::new(["feature/001234".to_string()]);
        let updates = [update("main", false), update("feature/001234", false)];

        let err = evaluate(&policy, &updates).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].ref_name, "main");
    }

    #[test]
    fn fully_allowed_push_succeeds() {
        let policy = PinnedBranchPolicy::new(["feature/x".to_string()]);
        let updates = [update("feature/x", false)];
        assert!(evaluate(&policy, &updates).is_ok());
    }

    #[test]
    fn force_push_to_allowed_branch_without_force_flag_is_rejected() {
        let policy = PinnedBranchPolicy::new(["main".to_string()]);
        let updates = [update("main", true)];
        let err = evaluate(&policy, &updates).unwrap_err();
        assert!(matches!(err[0].reason, GatewayError::ForcePushRejected { .. }));
    }

    #[test]
    fn force_push_to_explicitly_allowed_branch_succeeds() {
        let policy = PinnedBranchPolicy::new(["main".to_string()])
            .with_force_push_allowed(["main".to_string()]);
        let updates = [update("main", true)];
        assert!(evaluate(&policy, &updates).is_ok());
    }

    #[test]
    fn empty_policy_denies_everything() {
        let policy = PinnedBranchPolicy::default();
        let updates = [update("main", false)];
        assert!(evaluate(&policy, &updates).is_err());
    }

    #[test]
    fn rejection_message_lists_allowed_branches() {
        let policy = PinnedBranchPolicy::new(["feature/001234".to_string()]);
        let updates = [update("main", false)];
        let err = evaluate(&policy, &updates).unwrap_err();
        let msg = format_rejection_message(&policy, &err);
        assert!(msg.contains("feature/001234"));
        assert!(msg.contains("main"));
    }

    #[test]
    fn store_round_trips_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("branch_policies.yaml");

        let mut store = BranchPolicyStore::load(&path).unwrap();
        store
            .set_policy("agent-1", PinnedBranchPolicy::new(["feature/001234".to_string()]))
            .unwrap();

        let reloaded = BranchPolicyStore::load(&path).unwrap();
        let policy = reloaded.policy_for("agent-1");
        assert!(policy.allowed_branches.contains("feature/001234"));
    }

    #[test]
    fn unknown_principal_gets_default_deny_policy() {
        let store = BranchPolicyStore::default();
        let policy = store.policy_for("nobody");
        assert!(policy.allowed_branches.is_empty());
        let updates = [update("main", false)];
        assert!(evaluate(&policy, &updates).is_err());
    }
}
