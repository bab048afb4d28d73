//! Manifest - Catalog of Published Layers
//!
//! Entries are append-only. "Latest" per layer key lives in `RegistryPointers`,
//! never in the manifest itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::ir::LayerKey;
use crate::pipeline::CompiledArtifact;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub id: String,
    pub layer_key: LayerKey,
    /// Key into the artifact store.
    pub artifact_ref: String,
    pub checksum: String,
    pub schema_version: String,
    pub content_version: String,
    pub compiled_at: DateTime<Utc>,
    pub published_at: DateTime<Utc>,
}

impl ManifestEntry {
    pub fn for_artifact(artifact: &CompiledArtifact) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            layer_key: artifact.layer_key.clone(),
            artifact_ref: artifact.checksum.clone(),
            checksum: artifact.checksum.clone(),
            schema_version: artifact.schema_version.clone(),
            content_version: artifact.content_version.clone(),
            compiled_at: artifact.compiled_at,
            published_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn get(&self, id: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entry already recording `checksum` under `key`, if any.
    pub fn find(&self, key: &LayerKey, checksum: &str) -> Option<&ManifestEntry> {
        self.entries
            .iter()
            .find(|e| &e.layer_key == key && e.checksum == checksum)
    }
}

/// Layer key -> live manifest entry id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegistryPointers {
    pub pointers: BTreeMap<LayerKey, String>,
}

impl RegistryPointers {
    pub fn get(&self, key: &LayerKey) -> Option<&str> {
        self.pointers.get(key).map(String::as_str)
    }

    /// Live entries, resolved against `manifest`. Dangling pointers are skipped.
    pub fn live<'a>(&'a self, manifest: &'a Manifest) -> impl Iterator<Item = &'a ManifestEntry> + 'a {
        self.pointers.values().filter_map(|id| manifest.get(id))
    }
}
