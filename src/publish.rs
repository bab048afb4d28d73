//! Publisher - Store, Record, Then Point
//!
//! Order is fixed: artifact, manifest entry, pointer swap. A failure at any
//! step leaves the pointer where it was.

use parking_lot::Mutex;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ir::LayerKey;
use crate::manifest::ManifestEntry;
use crate::pipeline::CompiledArtifact;
use crate::store::{LayerStore, StoreError};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Checksum mismatch for {layer_key}: recorded {recorded}, computed {computed}")]
    ChecksumMismatch {
        layer_key: LayerKey,
        recorded: String,
        computed: String,
    },

    #[error("Version regression for {layer_key}: live {live}, publishing {publishing}")]
    VersionRegression {
        layer_key: LayerKey,
        live: String,
        publishing: String,
    },

    #[error("Invalid version `{0}`: {1}")]
    InvalidVersion(String, semver::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    /// Pointer now references a new entry.
    Published,
    /// Identical content was already live; nothing changed.
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    pub outcome: PublishOutcome,
    pub entry: ManifestEntry,
    /// Entry id the pointer referenced before this publish.
    pub previous: Option<String>,
}

pub struct Publisher {
    store: Arc<dyn LayerStore>,
    key_locks: Mutex<HashMap<LayerKey, Arc<Mutex<()>>>>,
}

impl Publisher {
    pub fn new(store: Arc<dyn LayerStore>) -> Self {
        Self {
            store,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn LayerStore> {
        &self.store
    }

    fn lock_for(&self, key: &LayerKey) -> Arc<Mutex<()>> {
        self.key_locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Entry currently live for `key`, if any.
    pub fn live_entry(&self, key: &LayerKey) -> Result<Option<ManifestEntry>, PublishError> {
        let pointers = self.store.load_pointers()?;
        let Some(id) = pointers.get(key) else {
            return Ok(None);
        };
        Ok(self.store.load_manifest()?.get(id).cloned())
    }

    pub fn publish(&self, artifact: &CompiledArtifact) -> Result<PublishReceipt, PublishError> {
        let key = &artifact.layer_key;
        let computed = crate::hashing::compute_checksum(&artifact.ir)?;
        if computed != artifact.checksum {
            return Err(PublishError::ChecksumMismatch {
                layer_key: key.clone(),
                recorded: artifact.checksum.clone(),
                computed,
            });
        }

        let lock = self.lock_for(key);
        let _guard = lock.lock();

        let manifest = self.store.load_manifest()?;
        let pointers = self.store.load_pointers()?;
        let previous = pointers.get(key).map(str::to_string);
        let live = previous.as_deref().and_then(|id| manifest.get(id));

        if let Some(live) = live {
            if live.checksum == artifact.checksum && self.store.contains(&artifact.checksum)? {
                debug!(layer_key = %key, checksum = %artifact.checksum, "Content already live");
                return Ok(PublishReceipt {
                    outcome: PublishOutcome::Unchanged,
                    entry: live.clone(),
                    previous,
                });
            }
            let live_version = parse_version(&live.content_version)?;
            let publishing = parse_version(&artifact.content_version)?;
            if publishing < live_version {
                warn!(layer_key = %key, live = %live_version, publishing = %publishing, "Refusing version regression");
                return Err(PublishError::VersionRegression {
                    layer_key: key.clone(),
                    live: live.content_version.clone(),
                    publishing: artifact.content_version.clone(),
                });
            }
        }

        // 1. artifact (write-once)
        if !self.store.contains(&artifact.checksum)? {
            self.store.put(artifact)?;
            debug!(layer_key = %key, checksum = %artifact.checksum, "Stored artifact");
        }

        // 2. manifest entry, reused when this content was published under this key before
        let entry = match manifest.find(key, &artifact.checksum) {
            Some(existing) => existing.clone(),
            None => {
                let entry = ManifestEntry::for_artifact(artifact);
                self.store.append_entry(&entry)?;
                debug!(layer_key = %key, entry = %entry.id, "Appended manifest entry");
                entry
            }
        };

        // 3. pointer swap
        self.store.swap_pointer(key, &entry.id)?;
        info!(
            layer_key = %key,
            checksum = %artifact.checksum,
            version = %artifact.content_version,
            "Published"
        );

        Ok(PublishReceipt {
            outcome: PublishOutcome::Published,
            entry,
            previous,
        })
    }
}

fn parse_version(text: &str) -> Result<Version, PublishError> {
    Version::parse(text).map_err(|e| PublishError::InvalidVersion(text.to_string(), e))
}
