//! Page Engine - Registry → Resolver → Evaluator per Request
//!
//! Overlay failures degrade to the blueprint alone. A missing blueprint is
//! the caller's problem and is returned as an error.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheKey, RenderCache};
use crate::config::EngineConfig;
use crate::evaluator::{Evaluator, ViewerContext};
use crate::registry::{Registry, RegistryError, RequestContext};
use crate::render::RenderModel;
use crate::resolver::{ResolveError, ResolvedPage, Resolver};
use crate::store::LayerStore;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),
}

/// A resolution, possibly without its overlays.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub page: ResolvedPage,
    pub generation: u64,
    /// Set when overlays failed to apply and the blueprint was used alone.
    pub degraded: bool,
}

pub struct PageEngine {
    registry: Arc<Registry>,
    store: Arc<dyn LayerStore>,
    resolver: Resolver,
    evaluator: Evaluator,
    cache: RenderCache,
    config: EngineConfig,
}

impl PageEngine {
    /// Load the registry from `store` and build an engine around it.
    pub fn open(
        store: Arc<dyn LayerStore>,
        evaluator: Evaluator,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let registry = Arc::new(Registry::load(store.as_ref())?);
        Ok(Self {
            registry,
            store,
            resolver: Resolver::new(),
            evaluator,
            cache: RenderCache::new(config.cache.capacity),
            config,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    pub fn refresh(&self) -> Result<u64, EngineError> {
        Ok(self.registry.refresh(self.store.as_ref())?)
    }

    /// Start polling refresh when `[registry] refresh_interval_secs` is set.
    pub fn start_refresh(&self) -> Option<tokio::task::JoinHandle<()>> {
        let every = self.config.registry.refresh_interval()?;
        Some(self.registry.spawn_refresh(Arc::clone(&self.store), every))
    }

    pub fn resolve(&self, ctx: &RequestContext) -> Result<Resolution, EngineError> {
        let layers = self.registry.resolve_layers(ctx)?;
        match self.resolver.resolve(&layers) {
            Ok(page) => Ok(Resolution {
                page,
                generation: layers.generation,
                degraded: false,
            }),
            Err(ResolveError::Serialization(e)) => Err(ResolveError::Serialization(e).into()),
            Err(e) => {
                warn!(
                    module = %ctx.module,
                    route = %ctx.route,
                    tenant = %ctx.tenant,
                    error = %e,
                    "Overlay resolution failed; rendering blueprint only"
                );
                Ok(Resolution {
                    page: self.resolver.blueprint_only(&layers)?,
                    generation: layers.generation,
                    degraded: true,
                })
            }
        }
    }

    pub async fn render(
        &self,
        ctx: &RequestContext,
        viewer: &ViewerContext,
    ) -> Result<Arc<RenderModel>, EngineError> {
        let resolution = self.resolve(ctx)?;
        let key = CacheKey::new(&resolution.page.fingerprint, viewer);
        if let Some(hit) = self.cache.get(&key) {
            debug!(fingerprint = %key.fingerprint, "Render cache hit");
            return Ok(hit);
        }
        let mut model = self.evaluator.evaluate(&resolution.page, viewer).await;
        model.degraded = resolution.degraded;
        let model = Arc::new(model);
        if model.has_source_failures() {
            debug!(fingerprint = %key.fingerprint, "Render has failed data sources; not cached");
        } else {
            self.cache.insert(key, Arc::clone(&model));
        }
        Ok(model)
    }
}
