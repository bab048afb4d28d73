//! Registry - Immutable Snapshots, Atomic Swap
//!
//! Readers clone an `Arc` to the current snapshot and resolve against it for
//! the whole request. Refresh builds a complete new snapshot and swaps the
//! pointer; nothing is mutated in place.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ir::{LayerKey, PageDefinition, PageKind};
use crate::manifest::{Manifest, ManifestEntry, RegistryPointers};
use crate::pipeline::CompiledArtifact;
use crate::store::{LayerStore, StoreError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No blueprint published for {module}:{route}")]
    LayerNotFound { module: String, route: String },

    #[error("Pointer for {layer_key} references missing manifest entry {entry}")]
    DanglingPointer { layer_key: LayerKey, entry: String },

    #[error("Artifact for {layer_key} does not match manifest checksum {checksum}")]
    ChecksumMismatch { layer_key: LayerKey, checksum: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Who is asking for which page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestContext {
    pub tenant: String,
    pub module: String,
    pub route: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

impl RequestContext {
    pub fn new(tenant: impl Into<String>, module: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            module: module.into(),
            route: route.into(),
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Every scoping dimension the overlay sets must equal the request's value.
    pub fn matches(&self, key: &LayerKey) -> bool {
        fn dim(set: &Option<String>, wanted: Option<&str>) -> bool {
            set.as_deref().map_or(true, |v| Some(v) == wanted)
        }
        key.kind == PageKind::Overlay
            && key.module == self.module
            && key.route == self.route
            && dim(&key.tenant, Some(&self.tenant))
            && key.role.as_ref().map_or(true, |r| self.roles.contains(r))
            && dim(&key.variant, self.variant.as_deref())
            && dim(&key.locale, self.locale.as_deref())
    }
}

/// Application order key: category of the most specific dimension set
/// (tenant < role < variant < locale), then dimension count, then key text.
pub fn precedence(key: &LayerKey) -> (u8, usize, String) {
    let rank = [&key.tenant, &key.role, &key.variant, &key.locale]
        .iter()
        .rposition(|d| d.is_some())
        .unwrap_or(0) as u8;
    (rank, key.scope().dimensions(), key.to_string())
}

/// One published layer as seen by a snapshot.
#[derive(Debug, Clone)]
pub struct Layer {
    pub entry: ManifestEntry,
    pub artifact: Arc<CompiledArtifact>,
}

impl Layer {
    pub fn key(&self) -> &LayerKey {
        &self.entry.layer_key
    }

    pub fn ir(&self) -> &PageDefinition {
        &self.artifact.ir
    }

    pub fn checksum(&self) -> &str {
        &self.entry.checksum
    }
}

/// Blueprint plus matching overlays in application order.
#[derive(Debug, Clone)]
pub struct ResolvedLayers {
    pub generation: u64,
    pub blueprint: Layer,
    pub overlays: Vec<Layer>,
}

impl ResolvedLayers {
    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        std::iter::once(&self.blueprint.entry).chain(self.overlays.iter().map(|l| &l.entry))
    }
}

#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    pub generation: u64,
    pub manifest: Manifest,
    pub pointers: RegistryPointers,
    layers: HashMap<LayerKey, Layer>,
}

impl RegistrySnapshot {
    fn load(store: &dyn LayerStore, generation: u64) -> Result<Self, RegistryError> {
        let manifest = store.load_manifest()?;
        let pointers = store.load_pointers()?;
        let mut artifacts: HashMap<String, Arc<CompiledArtifact>> = HashMap::new();
        let mut layers = HashMap::new();
        for (key, id) in &pointers.pointers {
            let entry = manifest.get(id).ok_or_else(|| RegistryError::DanglingPointer {
                layer_key: key.clone(),
                entry: id.clone(),
            })?;
            let artifact = match artifacts.get(&entry.artifact_ref) {
                Some(artifact) => artifact.clone(),
                None => {
                    let artifact = Arc::new(store.get(&entry.artifact_ref)?);
                    artifacts.insert(entry.artifact_ref.clone(), artifact.clone());
                    artifact
                }
            };
            if artifact.checksum != entry.checksum {
                return Err(RegistryError::ChecksumMismatch {
                    layer_key: key.clone(),
                    checksum: entry.checksum.clone(),
                });
            }
            layers.insert(
                key.clone(),
                Layer {
                    entry: entry.clone(),
                    artifact,
                },
            );
        }
        Ok(Self {
            generation,
            manifest,
            pointers,
            layers,
        })
    }

    pub fn layer(&self, key: &LayerKey) -> Option<&Layer> {
        self.layers.get(key)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn resolve_layers(&self, ctx: &RequestContext) -> Result<ResolvedLayers, RegistryError> {
        let blueprint = self
            .layers
            .get(&LayerKey::blueprint(&ctx.module, &ctx.route))
            .cloned()
            .ok_or_else(|| RegistryError::LayerNotFound {
                module: ctx.module.clone(),
                route: ctx.route.clone(),
            })?;
        let mut overlays: Vec<Layer> = self
            .layers
            .values()
            .filter(|l| ctx.matches(l.key()))
            .cloned()
            .collect();
        overlays.sort_by_cached_key(|l| precedence(l.key()));
        Ok(ResolvedLayers {
            generation: self.generation,
            blueprint,
            overlays,
        })
    }
}

pub struct Registry {
    current: RwLock<Arc<RegistrySnapshot>>,
    refresh_lock: Mutex<()>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Registry loaded from `store`, at generation 1.
    pub fn load(store: &dyn LayerStore) -> Result<Self, RegistryError> {
        let registry = Self::new();
        registry.refresh(store)?;
        Ok(registry)
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Build the next snapshot and swap it in. On failure the current
    /// snapshot stays live.
    pub fn refresh(&self, store: &dyn LayerStore) -> Result<u64, RegistryError> {
        let _guard = self.refresh_lock.lock();
        let next_generation = self.generation() + 1;
        match RegistrySnapshot::load(store, next_generation) {
            Ok(snapshot) => {
                let layers = snapshot.len();
                *self.current.write() = Arc::new(snapshot);
                info!(generation = next_generation, layers, "Registry snapshot swapped");
                Ok(next_generation)
            }
            Err(e) => {
                warn!(generation = next_generation - 1, error = %e, "Registry refresh failed; keeping current snapshot");
                Err(e)
            }
        }
    }

    pub fn resolve_layers(&self, ctx: &RequestContext) -> Result<ResolvedLayers, RegistryError> {
        self.snapshot().resolve_layers(ctx)
    }

    /// Refresh from `store` every `every` until the handle is aborted.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        store: Arc<dyn LayerStore>,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let registry = Arc::clone(&registry);
                let store = Arc::clone(&store);
                let result = tokio::task::spawn_blocking(move || registry.refresh(store.as_ref())).await;
                if let Err(e) = result {
                    warn!(error = %e, "Registry refresh task panicked");
                } else {
                    debug!("Registry poll complete");
                }
            }
        })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay(tenant: Option<&str>, role: Option<&str>, variant: Option<&str>, locale: Option<&str>) -> LayerKey {
        LayerKey {
            kind: PageKind::Overlay,
            module: "home".into(),
            route: "/".into(),
            tenant: tenant.map(Into::into),
            role: role.map(Into::into),
            variant: variant.map(Into::into),
            locale: locale.map(Into::into),
        }
    }

    #[test]
    fn test_precedence_categories() {
        let tenant = overlay(Some("acme"), None, None, None);
        let role = overlay(None, Some("admin"), None, None);
        let tenant_role = overlay(Some("acme"), Some("admin"), None, None);
        let locale = overlay(None, None, None, Some("de"));
        let mut keys = vec![locale.clone(), tenant_role.clone(), role.clone(), tenant.clone()];
        keys.sort_by_key(precedence);
        assert_eq!(keys, vec![tenant, role, tenant_role, locale]);
    }

    #[test]
    fn test_request_matching() {
        let ctx = RequestContext::new("acme", "home", "/").with_role("admin");
        assert!(ctx.matches(&overlay(Some("acme"), None, None, None)));
        assert!(ctx.matches(&overlay(None, Some("admin"), None, None)));
        assert!(!ctx.matches(&overlay(Some("globex"), None, None, None)));
        assert!(!ctx.matches(&overlay(None, None, Some("b"), None)));
        assert!(!ctx.matches(&LayerKey::blueprint("home", "/")));
    }

    #[test]
    fn test_empty_registry_reports_layer_not_found() {
        let registry = Registry::new();
        let err = registry
            .resolve_layers(&RequestContext::new("acme", "home", "/"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::LayerNotFound { .. }));
    }
}
