//! Local snapshots of fetched registry data.
//!
//! Each file is a JSON envelope holding the payload as serialized JSON plus
//! its SHA-256. A missing, unreadable or tampered snapshot is treated as
//! absent so the caller falls back to a live fetch.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::HierarchyMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Records,
    Hierarchy(HierarchyMode),
    Details,
}

impl SnapshotKind {
    pub const ALL: [SnapshotKind; 4] = [
        SnapshotKind::Records,
        SnapshotKind::Hierarchy(HierarchyMode::Tree),
        SnapshotKind::Hierarchy(HierarchyMode::Flat),
        SnapshotKind::Details,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Records => "records",
            Self::Hierarchy(HierarchyMode::Tree) => "hierarchy",
            Self::Hierarchy(HierarchyMode::Flat) => "hierarchy_flat",
            Self::Details => "details",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Self::Records => "org_all.json",
            Self::Hierarchy(HierarchyMode::Tree) => "org_hierarchy.json",
            Self::Hierarchy(HierarchyMode::Flat) => "org_hierarchy_flat.json",
            Self::Details => "org_details.json",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    kind: String,
    sha256: String,
    payload: String,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: SnapshotKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn exists(&self, kind: SnapshotKind) -> bool {
        self.path(kind).is_file()
    }

    pub fn save<T: Serialize>(&self, kind: SnapshotKind, value: &T) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let payload = serde_json::to_string(value)
            .with_context(|| format!("failed to serialize {} snapshot", kind.as_str()))?;
        let envelope = SnapshotEnvelope {
            kind: kind.as_str().to_string(),
            sha256: sha256_hex(&payload),
            payload,
        };
        let path = self.path(kind);
        let content = serde_json::to_string_pretty(&envelope)
            .with_context(|| format!("failed to serialize {} snapshot", kind.as_str()))?;
        fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), "wrote snapshot");
        Ok(path)
    }

    /// Returns `None` when the snapshot is missing or fails verification.
    pub fn load<T: DeserializeOwned>(&self, kind: SnapshotKind) -> Result<Option<T>> {
        let path = self.path(kind);
        if !path.exists() {
            return Ok(None);
        }
        let content =
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;

        let envelope: SnapshotEnvelope = match serde_json::from_str(&content) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(path = %path.display(), %error, "unreadable snapshot; ignoring");
                return Ok(None);
            }
        };
        if envelope.kind != kind.as_str() {
            warn!(path = %path.display(), found = %envelope.kind, "snapshot kind mismatch; ignoring");
            return Ok(None);
        }
        if sha256_hex(&envelope.payload) != envelope.sha256 {
            warn!(path = %path.display(), "snapshot hash mismatch; ignoring");
            return Ok(None);
        }
        match serde_json::from_str(&envelope.payload) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                warn!(path = %path.display(), %error, "snapshot payload does not decode; ignoring");
                Ok(None)
            }
        }
    }

    /// Use the stored snapshot unless `refresh` is set or it is unusable;
    /// otherwise fetch live and rewrite it.
    pub fn load_or_fetch<T, F>(&self, kind: SnapshotKind, refresh: bool, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        if !refresh && let Some(value) = self.load(kind)? {
            debug!(snapshot = kind.as_str(), "using stored snapshot");
            return Ok(value);
        }
        info!(snapshot = kind.as_str(), refresh, "fetching from registry");
        let value = fetch()?;
        self.save(kind, &value)?;
        Ok(value)
    }
}

fn sha256_hex(payload: &str) -> String {
    Sha256::digest(payload.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::bail;
    use tempfile::tempdir;

    use super::{SnapshotKind, SnapshotStore};
    use crate::config::HierarchyMode;
    use crate::model::OrganizationRecord;

    fn records() -> Vec<OrganizationRecord> {
        vec![OrganizationRecord::new("1", "ΥΠΟΥΡΓΕΙΟ ΥΓΕΙΑΣ")]
    }

    #[test]
    fn stored_snapshot_avoids_fetch() {
        let temp = tempdir().expect("tempdir");
        let store = SnapshotStore::new(temp.path().join("snapshots"));
        let mut fetches = 0;

        let first: Vec<OrganizationRecord> = store
            .load_or_fetch(SnapshotKind::Records, false, || {
                fetches += 1;
                Ok(records())
            })
            .expect("first");
        assert!(store.path(SnapshotKind::Records).ends_with("org_all.json"));
        let second: Vec<OrganizationRecord> = store
            .load_or_fetch(SnapshotKind::Records, false, || {
                bail!("should not fetch")
            })
            .expect("second");
        assert_eq!(first, second);
        assert_eq!(fetches, 1);

        let refreshed: Vec<OrganizationRecord> = store
            .load_or_fetch(SnapshotKind::Records, true, || Ok(Vec::new()))
            .expect("refresh");
        assert!(refreshed.is_empty());
    }

    #[test]
    fn tampered_snapshot_falls_back_to_fetch() {
        let temp = tempdir().expect("tempdir");
        let store = SnapshotStore::new(temp.path());
        store.save(SnapshotKind::Records, &records()).expect("save");

        let path = store.path(SnapshotKind::Records);
        let content = fs::read_to_string(&path).expect("read");
        fs::write(&path, content.replace("ΥΓΕΙΑΣ", "ΠΑΙΔΕΙΑΣ")).expect("tamper");

        assert_eq!(
            store
                .load::<Vec<OrganizationRecord>>(SnapshotKind::Records)
                .expect("load"),
            None
        );
        let fetched: Vec<OrganizationRecord> = store
            .load_or_fetch(SnapshotKind::Records, false, || Ok(records()))
            .expect("fallback");
        assert_eq!(fetched, records());
        assert!(
            store
                .load::<Vec<OrganizationRecord>>(SnapshotKind::Records)
                .expect("reload")
                .is_some()
        );
    }

    #[test]
    fn kinds_do_not_cross_read() {
        let temp = tempdir().expect("tempdir");
        let store = SnapshotStore::new(temp.path());
        store.save(SnapshotKind::Details, &records()).expect("save");
        fs::copy(
            store.path(SnapshotKind::Details),
            store.path(SnapshotKind::Hierarchy(HierarchyMode::Tree)),
        )
        .expect("copy");

        assert!(
            store
                .load::<Vec<OrganizationRecord>>(SnapshotKind::Hierarchy(HierarchyMode::Tree))
                .expect("load")
                .is_none()
        );
        assert!(!store.exists(SnapshotKind::Records));
    }
}
