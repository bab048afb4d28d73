//! Storage Collaborators - Artifacts, Manifest, Pointers
//!
//! Artifacts are content-addressed and write-once. The manifest is
//! append-only. Pointers are the only mutable state, and each swap is atomic.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::ir::LayerKey;
use crate::manifest::{Manifest, ManifestEntry, RegistryPointers};
use crate::pipeline::CompiledArtifact;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub trait ArtifactStore: Send + Sync {
    fn contains(&self, checksum: &str) -> Result<bool, StoreError>;
    /// Store under `artifact.checksum`. Storing an existing checksum is a no-op.
    fn put(&self, artifact: &CompiledArtifact) -> Result<(), StoreError>;
    fn get(&self, checksum: &str) -> Result<CompiledArtifact, StoreError>;
}

pub trait ManifestStore: Send + Sync {
    fn load_manifest(&self) -> Result<Manifest, StoreError>;
    fn append_entry(&self, entry: &ManifestEntry) -> Result<(), StoreError>;
}

pub trait PointerStore: Send + Sync {
    fn load_pointers(&self) -> Result<RegistryPointers, StoreError>;
    /// Point `key` at `entry_id`, returning the previous entry id.
    fn swap_pointer(&self, key: &LayerKey, entry_id: &str) -> Result<Option<String>, StoreError>;
}

/// All three stores behind one object.
pub trait LayerStore: ArtifactStore + ManifestStore + PointerStore {}

impl<T: ArtifactStore + ManifestStore + PointerStore> LayerStore for T {}

// --- In-memory ---

/// Store operation that can be made to fail once, for exercising publish ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    ArtifactPut,
    ManifestAppend,
    PointerSwap,
}

#[derive(Default)]
pub struct MemoryStore {
    artifacts: RwLock<HashMap<String, CompiledArtifact>>,
    manifest: RwLock<Manifest>,
    pointers: RwLock<RegistryPointers>,
    fail_next: Mutex<Option<FailPoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call at `point` fail with `StoreError::Unavailable`.
    pub fn fail_on(&self, point: FailPoint) {
        *self.fail_next.lock() = Some(point);
    }

    fn check(&self, point: FailPoint) -> Result<(), StoreError> {
        let mut fail = self.fail_next.lock();
        if *fail == Some(point) {
            *fail = None;
            return Err(StoreError::Unavailable(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.read().len()
    }
}

impl ArtifactStore for MemoryStore {
    fn contains(&self, checksum: &str) -> Result<bool, StoreError> {
        Ok(self.artifacts.read().contains_key(checksum))
    }

    fn put(&self, artifact: &CompiledArtifact) -> Result<(), StoreError> {
        self.check(FailPoint::ArtifactPut)?;
        self.artifacts
            .write()
            .entry(artifact.checksum.clone())
            .or_insert_with(|| artifact.clone());
        Ok(())
    }

    fn get(&self, checksum: &str) -> Result<CompiledArtifact, StoreError> {
        self.artifacts
            .read()
            .get(checksum)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(checksum.to_string()))
    }
}

impl ManifestStore for MemoryStore {
    fn load_manifest(&self) -> Result<Manifest, StoreError> {
        Ok(self.manifest.read().clone())
    }

    fn append_entry(&self, entry: &ManifestEntry) -> Result<(), StoreError> {
        self.check(FailPoint::ManifestAppend)?;
        self.manifest.write().entries.push(entry.clone());
        Ok(())
    }
}

impl PointerStore for MemoryStore {
    fn load_pointers(&self) -> Result<RegistryPointers, StoreError> {
        Ok(self.pointers.read().clone())
    }

    fn swap_pointer(&self, key: &LayerKey, entry_id: &str) -> Result<Option<String>, StoreError> {
        self.check(FailPoint::PointerSwap)?;
        Ok(self
            .pointers
            .write()
            .pointers
            .insert(key.clone(), entry_id.to_string()))
    }
}

// --- Filesystem ---

/// Directory layout:
/// `artifacts/<checksum>.json`, `manifest.json`, `pointers.json`.
pub struct FsStore {
    root: PathBuf,
    /// Serializes read-modify-write of manifest and pointers.
    write_lock: Mutex<()>,
}

impl FsStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join("artifacts"))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_path(&self, checksum: &str) -> Result<PathBuf, StoreError> {
        if checksum.is_empty() || !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StoreError::NotFound(checksum.to_string()));
        }
        Ok(self.root.join("artifacts").join(format!("{}.json", checksum)))
    }

    /// Write-then-rename so readers never see a half-written file.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn read_json<T: serde::de::DeserializeOwned + Default>(&self, name: &str) -> Result<T, StoreError> {
        let path = self.root.join(name);
        if !path.exists() {
            return Ok(T::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl ArtifactStore for FsStore {
    fn contains(&self, checksum: &str) -> Result<bool, StoreError> {
        Ok(self.artifact_path(checksum)?.exists())
    }

    fn put(&self, artifact: &CompiledArtifact) -> Result<(), StoreError> {
        let path = self.artifact_path(&artifact.checksum)?;
        if path.exists() {
            debug!(checksum = %artifact.checksum, "Artifact already stored");
            return Ok(());
        }
        let bytes = serde_json::to_vec_pretty(artifact)?;
        self.write_atomic(&path, &bytes)
    }

    fn get(&self, checksum: &str) -> Result<CompiledArtifact, StoreError> {
        let path = self.artifact_path(checksum)?;
        if !path.exists() {
            return Err(StoreError::NotFound(checksum.to_string()));
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl ManifestStore for FsStore {
    fn load_manifest(&self) -> Result<Manifest, StoreError> {
        self.read_json("manifest.json")
    }

    fn append_entry(&self, entry: &ManifestEntry) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut manifest: Manifest = self.read_json("manifest.json")?;
        manifest.entries.push(entry.clone());
        let bytes = serde_json::to_vec_pretty(&manifest)?;
        self.write_atomic(&self.root.join("manifest.json"), &bytes)
    }
}

impl PointerStore for FsStore {
    fn load_pointers(&self) -> Result<RegistryPointers, StoreError> {
        self.read_json("pointers.json")
    }

    fn swap_pointer(&self, key: &LayerKey, entry_id: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.write_lock.lock();
        let mut pointers: RegistryPointers = self.read_json("pointers.json")?;
        let previous = pointers.pointers.insert(key.clone(), entry_id.to_string());
        let bytes = serde_json::to_vec_pretty(&pointers)?;
        self.write_atomic(&self.root.join("pointers.json"), &bytes)?;
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_fail_point_fires_once() {
        let store = MemoryStore::new();
        let key = LayerKey::blueprint("home", "/");
        store.fail_on(FailPoint::PointerSwap);
        assert!(store.swap_pointer(&key, "a").is_err());
        assert_eq!(store.swap_pointer(&key, "b").unwrap(), None);
        assert_eq!(store.swap_pointer(&key, "c").unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn test_fs_store_pointers_persist() {
        let dir = tempfile::tempdir().unwrap();
        let key = LayerKey::blueprint("home", "/");
        {
            let store = FsStore::open(dir.path()).unwrap();
            assert!(store.load_pointers().unwrap().pointers.is_empty());
            store.swap_pointer(&key, "entry-1").unwrap();
        }
        let reopened = FsStore::open(dir.path()).unwrap();
        assert_eq!(reopened.load_pointers().unwrap().get(&key), Some("entry-1"));
    }

    #[test]
    fn test_fs_store_rejects_non_hex_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        assert!(matches!(store.get("../manifest"), Err(StoreError::NotFound(_))));
        assert!(!store.contains("deadbeef").unwrap());
    }
}
