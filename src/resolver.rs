//! Resolver - Left Fold of Overlays Over a Blueprint
//!
//! Pure: the same layers in the same order always give the same page and
//! the same fingerprint.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::hashing::compute_fingerprint;
use crate::ir::{ContractTable, LayerKey, PageDefinition, PageKind, PatchTarget};
use crate::merge::{apply_overlay, PatchError};
use crate::registry::ResolvedLayers;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Overlay {layer} targets {target} `{id}`, which no longer exists")]
    DanglingOverlayTarget {
        layer: LayerKey,
        target: PatchTarget,
        id: String,
    },

    #[error("Overlay {layer} has an incomplete patch: {reason}")]
    IncompletePatch { layer: LayerKey, reason: String },

    #[error("Layer {layer} does not belong on this blueprint: {reason}")]
    LayerMismatch { layer: LayerKey, reason: String },

    #[error("Overlay {layer} duplicates component id `{id}`")]
    DuplicateId { layer: LayerKey, id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A layer handed to the resolver: its IR and its content checksum.
#[derive(Debug, Clone, Copy)]
pub struct LayerInput<'a> {
    pub ir: &'a PageDefinition,
    pub checksum: &'a str,
}

/// Merged page, ready for evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPage {
    pub page: PageDefinition,
    pub fingerprint: String,
    pub contracts: ContractTable,
    /// Contributing layers in application order, blueprint first.
    pub layers: Vec<LayerKey>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Resolver;

impl Resolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, layers: &ResolvedLayers) -> Result<ResolvedPage, ResolveError> {
        let overlays: Vec<LayerInput<'_>> = layers
            .overlays
            .iter()
            .map(|l| LayerInput {
                ir: l.ir(),
                checksum: l.checksum(),
            })
            .collect();
        self.resolve_inputs(
            LayerInput {
                ir: layers.blueprint.ir(),
                checksum: layers.blueprint.checksum(),
            },
            &overlays,
        )
    }

    /// The blueprint alone, for degraded rendering.
    pub fn blueprint_only(&self, layers: &ResolvedLayers) -> Result<ResolvedPage, ResolveError> {
        self.resolve_inputs(
            LayerInput {
                ir: layers.blueprint.ir(),
                checksum: layers.blueprint.checksum(),
            },
            &[],
        )
    }

    pub fn resolve_inputs(
        &self,
        blueprint: LayerInput<'_>,
        overlays: &[LayerInput<'_>],
    ) -> Result<ResolvedPage, ResolveError> {
        let base_key = blueprint.ir.layer_key();
        if blueprint.ir.kind != PageKind::Blueprint {
            return Err(ResolveError::LayerMismatch {
                layer: base_key,
                reason: "base layer is not a blueprint".to_string(),
            });
        }

        let mut page = blueprint.ir.clone();
        for overlay in overlays {
            check_belongs(blueprint.ir, overlay.ir)?;
            let layer = overlay.ir.layer_key();
            page = apply_overlay(&page, overlay.ir).map_err(|e| match e {
                PatchError::MissingTarget { target, id } => ResolveError::DanglingOverlayTarget {
                    layer: layer.clone(),
                    target,
                    id,
                },
                PatchError::DuplicateComponent(id) => ResolveError::DuplicateId {
                    layer: layer.clone(),
                    id,
                },
                other @ (PatchError::Incomplete { .. } | PatchError::PayloadMismatch { .. }) => {
                    ResolveError::IncompletePatch {
                        layer: layer.clone(),
                        reason: other.to_string(),
                    }
                }
            })?;
            debug!(layer_key = %layer, patches = overlay.ir.patches.len(), "Applied overlay");
        }

        let checksums: Vec<&str> = std::iter::once(blueprint.checksum)
            .chain(overlays.iter().map(|o| o.checksum))
            .collect();
        let fingerprint = compute_fingerprint(&page, &checksums)?;
        let layers = std::iter::once(base_key)
            .chain(overlays.iter().map(|o| o.ir.layer_key()))
            .collect();

        Ok(ResolvedPage {
            contracts: page.contract_table(),
            page,
            fingerprint,
            layers,
        })
    }
}

fn check_belongs(blueprint: &PageDefinition, overlay: &PageDefinition) -> Result<(), ResolveError> {
    let mismatch = |reason: String| ResolveError::LayerMismatch {
        layer: overlay.layer_key(),
        reason,
    };
    if overlay.kind != PageKind::Overlay {
        return Err(mismatch("layer is not an overlay".to_string()));
    }
    if overlay.module != blueprint.module || overlay.route != blueprint.route {
        return Err(mismatch(format!(
            "overlay is for {}:{}, blueprint is {}:{}",
            overlay.module, overlay.route, blueprint.module, blueprint.route
        )));
    }
    if overlay.extends != blueprint.page_id {
        return Err(mismatch(format!(
            "overlay extends `{}`, blueprint is `{}`",
            overlay.extends.as_deref().unwrap_or(""),
            blueprint.page_id.as_deref().unwrap_or("")
        )));
    }
    Ok(())
}
