// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! In-memory state cache with synchronous file persistence.
//!
//! One readers-writer lock guards four maps: metadata, data entries, the
//! secret index, and locally-authored reports. Mutators persist under the
//! lock; a failed file write is logged and retried implicitly by the next
//! update because memory is authoritative. Accessors hand out deep copies.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use plexd_core::{
    validate_report_key, DataEntry, KeyVersion, ReportEntry, ReportKeyError, SecretRef,
};
use thiserror::Error;
use tracing::warn;

use crate::fsio::{create_private_dir, write_atomic};

const METADATA_FILE: &str = "metadata.json";
const SECRETS_FILE: &str = "secrets.json";
const DATA_DIR: &str = "data";
const REPORT_DIR: &str = "report";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("report {key} is at version {current}")]
    VersionConflict { key: String, current: u64 },

    #[error("report {key} not found")]
    NotFound { key: String },

    #[error(transparent)]
    InvalidKey(#[from] ReportKeyError),

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("cache io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Default)]
struct CacheInner {
    metadata: BTreeMap<String, String>,
    data: BTreeMap<String, DataEntry>,
    secret_index: Vec<SecretRef>,
    reports: BTreeMap<String, ReportEntry>,
}

/// Consistent point-in-time view used by the state summary endpoint.
#[derive(Debug, Clone, Default)]
pub struct CacheSummary {
    pub metadata: BTreeMap<String, String>,
    pub data: Vec<KeyVersion>,
    pub secrets: Vec<KeyVersion>,
    pub reports: Vec<KeyVersion>,
}

/// Thread-safe mirror of desired state plus local reports, persisted under
/// `<data_dir>/state/`.
pub struct StateCache {
    state_dir: PathBuf,
    inner: RwLock<CacheInner>,
}

impl StateCache {
    /// Create the `state/` tree if needed and load whatever is on disk.
    /// Missing files mean an empty category; a file that exists but does
    /// not parse is fatal.
    pub fn load(data_dir: &Path) -> Result<Self, CacheError> {
        let state_dir = data_dir.join("state");
        create_private_dir(&state_dir)?;
        create_private_dir(&state_dir.join(DATA_DIR))?;
        create_private_dir(&state_dir.join(REPORT_DIR))?;

        let mut inner = CacheInner::default();

        if let Some(metadata) = read_json_opt(&state_dir.join(METADATA_FILE))? {
            inner.metadata = metadata;
        }
        if let Some(secrets) = read_json_opt(&state_dir.join(SECRETS_FILE))? {
            inner.secret_index = secrets;
        }
        for entry in read_json_dir::<DataEntry>(&state_dir.join(DATA_DIR))? {
            inner.data.insert(entry.key.clone(), entry);
        }
        for entry in read_json_dir::<ReportEntry>(&state_dir.join(REPORT_DIR))? {
            inner.reports.insert(entry.key.clone(), entry);
        }

        Ok(Self { state_dir, inner: RwLock::new(inner) })
    }

    /// Replace the whole metadata map.
    pub fn update_metadata(&self, metadata: BTreeMap<String, String>) {
        let mut inner = self.inner.write();
        inner.metadata = metadata;
        persist_json(&self.state_dir.join(METADATA_FILE), &inner.metadata);
    }

    /// Replace the data map. Files for keys no longer present are removed
    /// so the on-disk directory is exactly the new key set.
    pub fn update_data(&self, entries: Vec<DataEntry>) {
        let mut inner = self.inner.write();
        inner.data = entries.into_iter().map(|e| (e.key.clone(), e)).collect();

        let dir = self.state_dir.join(DATA_DIR);
        for entry in inner.data.values() {
            persist_keyed(&dir, &entry.key, entry);
        }
        prune_dir(&dir, &inner.data);
    }

    /// Replace the secret-ref index (never the values).
    pub fn update_secret_index(&self, refs: Vec<SecretRef>) {
        let mut inner = self.inner.write();
        inner.secret_index = refs;
        persist_json(&self.state_dir.join(SECRETS_FILE), &inner.secret_index);
    }

    /// Create or update a report. `if_match` must equal the current
    /// version when present; `if_match == 0` means "must not exist yet".
    pub fn put_report(
        &self,
        key: &str,
        content_type: &str,
        payload: serde_json::Value,
        if_match: Option<u64>,
    ) -> Result<ReportEntry, CacheError> {
        validate_report_key(key)?;

        let mut inner = self.inner.write();
        let current = inner.reports.get(key).map(|r| r.version);

        if let Some(expected) = if_match {
            let actual = current.unwrap_or(0);
            if expected != actual {
                return Err(CacheError::VersionConflict { key: key.to_string(), current: actual });
            }
        }

        let entry = ReportEntry {
            key: key.to_string(),
            content_type: content_type.to_string(),
            payload,
            version: current.unwrap_or(0) + 1,
            updated_at: Utc::now(),
        };
        inner.reports.insert(key.to_string(), entry.clone());
        persist_keyed(&self.state_dir.join(REPORT_DIR), key, &entry);
        Ok(entry)
    }

    /// Delete a report from memory and disk.
    pub fn delete_report(&self, key: &str) -> Result<(), CacheError> {
        validate_report_key(key)?;

        let mut inner = self.inner.write();
        if inner.reports.remove(key).is_none() {
            return Err(CacheError::NotFound { key: key.to_string() });
        }
        let path = self.state_dir.join(REPORT_DIR).join(format!("{key}.json"));
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to remove report file");
            }
        }
        Ok(())
    }

    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.inner.read().metadata.clone()
    }

    pub fn metadata_value(&self, key: &str) -> Option<String> {
        self.inner.read().metadata.get(key).cloned()
    }

    pub fn data_entries(&self) -> Vec<DataEntry> {
        self.inner.read().data.values().cloned().collect()
    }

    pub fn data_entry(&self, key: &str) -> Option<DataEntry> {
        self.inner.read().data.get(key).cloned()
    }

    pub fn secret_index(&self) -> Vec<SecretRef> {
        self.inner.read().secret_index.clone()
    }

    pub fn reports(&self) -> Vec<ReportEntry> {
        self.inner.read().reports.values().cloned().collect()
    }

    pub fn report(&self, key: &str) -> Option<ReportEntry> {
        self.inner.read().reports.get(key).cloned()
    }

    /// Everything the state summary endpoint needs, at one instant.
    pub fn summary(&self) -> CacheSummary {
        let inner = self.inner.read();
        CacheSummary {
            metadata: inner.metadata.clone(),
            data: inner
                .data
                .values()
                .map(|e| KeyVersion { key: e.key.clone(), version: e.version })
                .collect(),
            secrets: inner
                .secret_index
                .iter()
                .map(|r| KeyVersion { key: r.key.clone(), version: r.version })
                .collect(),
            reports: inner
                .reports
                .values()
                .map(|e| KeyVersion { key: e.key.clone(), version: e.version })
                .collect(),
        }
    }
}

fn read_json_opt<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, CacheError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::Io(e)),
    };
    let value = serde_json::from_slice(&bytes)
        .map_err(|source| CacheError::Parse { path: path.to_path_buf(), source })?;
    Ok(Some(value))
}

fn read_json_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>, CacheError> {
    let mut out = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(CacheError::Io(e)),
    };
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = fs::read(&path)?;
        let value = serde_json::from_slice(&bytes)
            .map_err(|source| CacheError::Parse { path: path.clone(), source })?;
        out.push(value);
    }
    Ok(out)
}

/// Persist a JSON document; failures are logged, never surfaced, because
/// the in-memory state wins and the next update retries the file.
fn persist_json<T: serde::Serialize>(path: &Path, value: &T) {
    let bytes = match serde_json::to_vec_pretty(value) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to encode state file");
            return;
        }
    };
    if let Err(e) = write_atomic(path, &bytes) {
        warn!(path = %path.display(), error = %e, "failed to persist state file");
    }
}

/// Persist one keyed entry as `<dir>/<key>.json`. Keys that cannot be a
/// file name are kept in memory only.
fn persist_keyed<T: serde::Serialize>(dir: &Path, key: &str, value: &T) {
    if validate_report_key(key).is_err() {
        warn!(key, "state key is not a valid file name; keeping in memory only");
        return;
    }
    persist_json(&dir.join(format!("{key}.json")), value);
}

/// Remove `<dir>/*.json` files whose stem is no longer a live key.
fn prune_dir<V>(dir: &Path, live: &BTreeMap<String, V>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "failed to scan state directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if !live.contains_key(stem) {
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to prune state file");
            }
        }
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
