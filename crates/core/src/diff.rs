// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Drift computation between fetched desired state and the last-applied
//! snapshot. Pure data-in/data-out; reconcile handlers receive the result.

use std::collections::{BTreeMap, HashSet};

use crate::state::{DesiredState, PeerSpec, PolicySpec, SigningKeySet};

/// Structured description of what differs between desired state and the
/// reconciler's snapshot. Peer and policy changes are id-keyed; the
/// remaining categories are wholesale-replaced by the cache, so a boolean
/// flag is all handlers need.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDiff {
    pub peers_to_add: Vec<PeerSpec>,
    pub peers_to_remove: Vec<String>,
    pub peers_to_update: Vec<PeerSpec>,
    pub policies_to_add: Vec<PolicySpec>,
    pub policies_to_remove: Vec<String>,
    pub metadata_changed: bool,
    pub data_changed: bool,
    pub secret_refs_changed: bool,
    pub signing_keys_changed: bool,
    pub new_signing_keys: Option<SigningKeySet>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.peers_to_add.is_empty()
            && self.peers_to_remove.is_empty()
            && self.peers_to_update.is_empty()
            && self.policies_to_add.is_empty()
            && self.policies_to_remove.is_empty()
            && !self.metadata_changed
            && !self.data_changed
            && !self.secret_refs_changed
            && !self.signing_keys_changed
    }

    /// Human-readable correction lines for the drift report.
    pub fn corrections(&self) -> Vec<String> {
        let mut out = Vec::new();
        for peer in &self.peers_to_add {
            out.push(format!("add peer {}", peer.id));
        }
        for id in &self.peers_to_remove {
            out.push(format!("remove peer {id}"));
        }
        for peer in &self.peers_to_update {
            out.push(format!("update peer {}", peer.id));
        }
        for policy in &self.policies_to_add {
            out.push(format!("add policy {}", policy.id));
        }
        for id in &self.policies_to_remove {
            out.push(format!("remove policy {id}"));
        }
        if self.metadata_changed {
            out.push("refresh metadata".to_string());
        }
        if self.data_changed {
            out.push("refresh data entries".to_string());
        }
        if self.secret_refs_changed {
            out.push("refresh secret index".to_string());
        }
        if self.signing_keys_changed {
            out.push("rotate signing keys".to_string());
        }
        out
    }
}

/// Compute the drift between a freshly fetched `desired` state and the
/// last successfully applied `snapshot`.
pub fn state_diff(desired: &DesiredState, snapshot: &DesiredState) -> StateDiff {
    let mut diff = StateDiff::default();

    diff_peers(desired, snapshot, &mut diff);
    diff_policies(desired, snapshot, &mut diff);

    diff.metadata_changed = desired.metadata != snapshot.metadata;
    diff.data_changed = versions_differ(
        desired.data.iter().map(|e| (e.key.as_str(), e.version)),
        snapshot.data.iter().map(|e| (e.key.as_str(), e.version)),
    );
    diff.secret_refs_changed = versions_differ(
        desired.secret_refs.iter().map(|r| (r.key.as_str(), r.version)),
        snapshot.secret_refs.iter().map(|r| (r.key.as_str(), r.version)),
    );

    // An absent signing_keys field means "no change", never a rotation to
    // empty; only a present value is compared against the snapshot's.
    if let Some(keys) = &desired.signing_keys {
        if snapshot.signing_keys.as_ref() != Some(keys) {
            diff.signing_keys_changed = true;
            diff.new_signing_keys = Some(keys.clone());
        }
    }

    diff
}

fn diff_peers(desired: &DesiredState, snapshot: &DesiredState, diff: &mut StateDiff) {
    let current: BTreeMap<&str, &PeerSpec> =
        snapshot.peers.iter().map(|p| (p.id.as_str(), p)).collect();
    let wanted: BTreeMap<&str, &PeerSpec> =
        desired.peers.iter().map(|p| (p.id.as_str(), p)).collect();

    for (id, peer) in &wanted {
        match current.get(id) {
            None => diff.peers_to_add.push((*peer).clone()),
            Some(existing) if peer_changed(peer, existing) => {
                diff.peers_to_update.push((*peer).clone());
            }
            Some(_) => {}
        }
    }
    for id in current.keys() {
        if !wanted.contains_key(id) {
            diff.peers_to_remove.push((*id).to_string());
        }
    }
}

/// A peer needs updating when its public key, endpoint, or allowed-ip set
/// differs. Allowed-ip comparison is set-based: ordering is irrelevant.
fn peer_changed(desired: &PeerSpec, current: &PeerSpec) -> bool {
    if desired.public_key != current.public_key || desired.endpoint != current.endpoint {
        return true;
    }
    let desired_ips: HashSet<&str> = desired.allowed_ips.iter().map(String::as_str).collect();
    let current_ips: HashSet<&str> = current.allowed_ips.iter().map(String::as_str).collect();
    desired_ips != current_ips
}

fn diff_policies(desired: &DesiredState, snapshot: &DesiredState, diff: &mut StateDiff) {
    let current: HashSet<&str> = snapshot.policies.iter().map(|p| p.id.as_str()).collect();
    let wanted: HashSet<&str> = desired.policies.iter().map(|p| p.id.as_str()).collect();

    for policy in &desired.policies {
        if !current.contains(policy.id.as_str()) {
            diff.policies_to_add.push(policy.clone());
        }
    }
    for policy in &snapshot.policies {
        if !wanted.contains(policy.id.as_str()) {
            diff.policies_to_remove.push(policy.id.clone());
        }
    }
}

/// True when any key is present on exactly one side or its version differs.
fn versions_differ<'a>(
    desired: impl Iterator<Item = (&'a str, u64)>,
    snapshot: impl Iterator<Item = (&'a str, u64)>,
) -> bool {
    let desired: BTreeMap<&str, u64> = desired.collect();
    let snapshot: BTreeMap<&str, u64> = snapshot.collect();
    desired != snapshot
}

#[cfg(test)]
#[path = "diff_tests.rs"]
mod tests;
