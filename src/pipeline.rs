//! Compilation Pipeline - Single Entry Point
//!
//! CRITICAL: compile MUST call validate internally. No bypass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::diagnostics::{CompileError, CompileErrors, ReasonCode};
use crate::document::{DocumentNode, DocumentSet};
use crate::hashing::compute_checksum;
use crate::ir::{ContractTable, LayerKey, PageDefinition, PageKind};
use crate::manifest::ManifestEntry;
use crate::transform::Transformer;
use crate::validation::{ValidationContext, ValidationResult, Validator};
use crate::ENGINE_VERSION;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static VALIDATION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_validation_call_count() -> u32 {
    VALIDATION_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_validation_call_count() {
    VALIDATION_CALL_COUNT.store(0, Ordering::SeqCst);
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Compilation rejected: {0}")]
    Rejected(CompileErrors),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl PipelineError {
    /// Compile errors, when the failure is the document's fault.
    pub fn compile_errors(&self) -> Option<&CompileErrors> {
        match self {
            PipelineError::Rejected(errors) => Some(errors),
            PipelineError::SerializationError(_) => None,
        }
    }
}

impl From<CompileErrors> for PipelineError {
    fn from(errors: CompileErrors) -> Self {
        PipelineError::Rejected(errors)
    }
}

/// A document in a batch that failed to compile.
#[derive(Debug, Error)]
#[error("{}: {}", .path.display(), .source)]
pub struct BatchError {
    pub path: PathBuf,
    #[source]
    pub source: PipelineError,
}

/// Everything a document compiles against besides itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileContext<'a> {
    /// Blueprint IR; required for overlays.
    pub base: Option<&'a PageDefinition>,
    /// Overlays applied before this one whose introduced ids may be targeted.
    pub additional: &'a [PageDefinition],
    /// Manifest entry currently live for this document's layer key.
    pub prior: Option<&'a ManifestEntry>,
}

impl<'a> CompileContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(mut self, base: &'a PageDefinition) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_additional(mut self, additional: &'a [PageDefinition]) -> Self {
        self.additional = additional;
        self
    }

    pub fn with_prior(mut self, prior: Option<&'a ManifestEntry>) -> Self {
        self.prior = prior;
        self
    }

    fn validation(&self) -> ValidationContext<'a> {
        ValidationContext {
            base: self.base,
            additional: self.additional,
            prior_content_version: self.prior.map(|p| p.content_version.as_str()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompiledArtifact {
    pub layer_key: LayerKey,
    pub ir: PageDefinition,
    /// SHA-256 over the canonical IR only.
    pub checksum: String,
    pub schema_version: String,
    pub content_version: String,
    pub engine_version: String,
    pub compiled_at: DateTime<Utc>,
    pub contracts: ContractTable,
}

impl CompiledArtifact {
    /// Recompute the checksum and compare with the recorded one.
    pub fn verify(&self) -> Result<bool, serde_json::Error> {
        Ok(compute_checksum(&self.ir)? == self.checksum)
    }
}

/// The compilation pipeline - single entry point for all document compilation
pub struct CompilationPipeline {
    transformer: Transformer,
    validator: Validator,
}

impl CompilationPipeline {
    pub fn new() -> Self {
        Self {
            transformer: Transformer::new(),
            validator: Validator::new(),
        }
    }

    /// Transform a document into IR without validating it.
    pub fn transform(&self, document: &DocumentNode) -> Result<PageDefinition, PipelineError> {
        Ok(self.transformer.transform(document)?)
    }

    /// Validate a document in its compile context
    ///
    /// This is the ONLY validation entry point.
    pub fn validate_document(
        &self,
        document: &DocumentNode,
        ctx: &CompileContext<'_>,
    ) -> Result<(PageDefinition, ValidationResult), PipelineError> {
        #[cfg(feature = "test-hooks")]
        VALIDATION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        let ir = self.transformer.transform(document)?;
        let result = self.validator.validate(&ir, &ctx.validation());
        for warning in result.warnings() {
            debug!(layer_key = %result.layer_key, code = %warning.code, "{}", warning.message);
        }
        Ok((ir, result))
    }

    /// Compile a document
    ///
    /// CRITICAL: This ALWAYS calls validate_document internally. No bypass possible.
    pub fn compile(
        &self,
        document: &DocumentNode,
        ctx: &CompileContext<'_>,
    ) -> Result<CompiledArtifact, PipelineError> {
        // MANDATORY: Validation is always called. This is non-negotiable.
        let (ir, validation) = self.validate_document(document, ctx)?;

        if let Some(errors) = validation.errors() {
            warn!(layer_key = %validation.layer_key, errors = errors.len(), "Compilation rejected");
            return Err(PipelineError::Rejected(errors));
        }

        let checksum = compute_checksum(&ir)?;

        if let Some(prior) = ctx.prior {
            if prior.content_version == ir.content_version && prior.checksum != checksum {
                let errors = CompileErrors(vec![CompileError::page(
                    ReasonCode::VersionNotBumped,
                    format!(
                        "content changed but contentVersion {} is already published",
                        ir.content_version
                    ),
                )]);
                warn!(layer_key = %validation.layer_key, "Compilation rejected: version not bumped");
                return Err(PipelineError::Rejected(errors));
            }
        }

        let artifact = CompiledArtifact {
            layer_key: ir.layer_key(),
            contracts: ir.contract_table(),
            checksum,
            schema_version: ir.schema_version.clone(),
            content_version: ir.content_version.clone(),
            engine_version: ENGINE_VERSION.to_string(),
            compiled_at: Utc::now(),
            ir,
        };

        info!(
            layer_key = %artifact.layer_key,
            checksum = %artifact.checksum,
            version = %artifact.content_version,
            "Compiled document"
        );
        Ok(artifact)
    }
}

impl CompilationPipeline {
    /// Compile every document in `set`, blueprints first. Overlays compile
    /// against the blueprint in the set whose page id they extend. The first
    /// rejected document stops the batch.
    pub fn compile_set(&self, set: &DocumentSet) -> Result<Vec<CompiledArtifact>, BatchError> {
        let mut artifacts: Vec<CompiledArtifact> = Vec::with_capacity(set.len());
        for doc in set.in_compile_order() {
            let fail = |source| BatchError {
                path: doc.path.clone(),
                source,
            };
            let ir = self.transform(&doc.root).map_err(fail)?;
            let base = ir.extends.as_deref().and_then(|extends| {
                artifacts
                    .iter()
                    .map(|a| &a.ir)
                    .find(|b| b.kind == PageKind::Blueprint && b.page_id.as_deref() == Some(extends))
            });
            let ctx = CompileContext {
                base,
                ..Default::default()
            };
            let artifact = self.compile(&doc.root, &ctx).map_err(fail)?;
            debug!(path = %doc.path.display(), layer_key = %artifact.layer_key, "Compiled batch document");
            artifacts.push(artifact);
        }
        info!(documents = artifacts.len(), "Compiled document set");
        Ok(artifacts)
    }
}

impl Default for CompilationPipeline {
    fn default() -> Self {
        Self::new()
    }
}
