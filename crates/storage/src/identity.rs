// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! On-disk node identity: `identity.json` plus standalone key files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use plexd_core::NodeIdentity;
use thiserror::Error;
use tracing::warn;

use crate::fsio::{create_private_dir, write_atomic};

const IDENTITY_FILE: &str = "identity.json";
const PRIVATE_KEY_FILE: &str = "private_key";
const NODE_SECRET_KEY_FILE: &str = "node_secret_key";
const SIGNING_PUBLIC_KEY_FILE: &str = "signing_public_key";

/// Identity persistence errors. `NotRegistered` is the one recoverable
/// case — it means no identity has ever been written to this data dir.
/// Everything else is a damaged installation and fails the load.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("node is not registered")]
    NotRegistered,

    #[error("identity record is missing {0}")]
    MissingField(&'static str),

    #[error("identity file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("private key is not valid base64: {0}")]
    BadPrivateKey(base64::DecodeError),

    #[error("private key must be 32 bytes, got {0}")]
    BadPrivateKeyLength(usize),

    #[error("identity io error: {0}")]
    Io(#[from] io::Error),
}

/// Stores the node identity under a data directory.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    dir: PathBuf,
}

impl IdentityStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist the whole identity: the JSON record plus the three
    /// standalone key files, each written atomically with owner-only
    /// permissions.
    pub fn save(&self, identity: &NodeIdentity) -> Result<(), IdentityError> {
        create_private_dir(&self.dir)?;

        let record = serde_json::to_vec_pretty(identity).map_err(|source| {
            IdentityError::Corrupt { path: self.dir.join(IDENTITY_FILE), source }
        })?;
        write_atomic(&self.dir.join(IDENTITY_FILE), &record)?;
        write_atomic(
            &self.dir.join(PRIVATE_KEY_FILE),
            BASE64.encode(&identity.private_key).as_bytes(),
        )?;
        write_atomic(
            &self.dir.join(NODE_SECRET_KEY_FILE),
            identity.node_secret_key.as_bytes(),
        )?;
        write_atomic(
            &self.dir.join(SIGNING_PUBLIC_KEY_FILE),
            identity.signing_public_key.as_bytes(),
        )?;
        Ok(())
    }

    /// Load the identity, distinguishing "never registered" from a
    /// damaged record. A present-but-unreadable file is always fatal.
    pub fn load(&self) -> Result<NodeIdentity, IdentityError> {
        let record_path = self.dir.join(IDENTITY_FILE);
        let record = match fs::read(&record_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(IdentityError::NotRegistered)
            }
            Err(e) => return Err(IdentityError::Io(e)),
        };

        let mut identity: NodeIdentity = serde_json::from_slice(&record)
            .map_err(|source| IdentityError::Corrupt { path: record_path, source })?;

        if identity.node_id.is_empty() {
            return Err(IdentityError::MissingField("node_id"));
        }
        if identity.mesh_ip.is_empty() {
            return Err(IdentityError::MissingField("mesh_ip"));
        }

        let private_b64 = fs::read_to_string(self.dir.join(PRIVATE_KEY_FILE))?;
        let private_key = BASE64
            .decode(private_b64.trim().as_bytes())
            .map_err(IdentityError::BadPrivateKey)?;
        if private_key.len() != 32 {
            return Err(IdentityError::BadPrivateKeyLength(private_key.len()));
        }
        identity.private_key = private_key;

        identity.node_secret_key = fs::read_to_string(self.dir.join(NODE_SECRET_KEY_FILE))?;
        if identity.node_secret_key.is_empty() {
            return Err(IdentityError::MissingField("node_secret_key"));
        }

        // The standalone key file is what operators rotate by hand; when it
        // disagrees with the JSON record, the file wins.
        let key_file = fs::read_to_string(self.dir.join(SIGNING_PUBLIC_KEY_FILE))?;
        let key_file = key_file.trim();
        if key_file.is_empty() {
            return Err(IdentityError::MissingField("signing_public_key"));
        }
        if key_file != identity.signing_public_key {
            warn!(
                record = %identity.signing_public_key,
                file = %key_file,
                "signing_public_key file disagrees with identity.json; using file value"
            );
            identity.signing_public_key = key_file.to_string();
        }

        Ok(identity)
    }

    /// Whether a load would succeed, without surfacing the identity.
    pub fn is_registered(&self) -> bool {
        self.load().is_ok()
    }

    /// Remove the identity files (deregistration). Missing files are fine.
    pub fn remove(&self) -> Result<(), IdentityError> {
        for name in [
            IDENTITY_FILE,
            PRIVATE_KEY_FILE,
            NODE_SECRET_KEY_FILE,
            SIGNING_PUBLIC_KEY_FILE,
        ] {
            match fs::remove_file(self.dir.join(name)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(IdentityError::Io(e)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
