//! PageStack Core - Layered Page Compiler
//!
//! # The Five Laws (Non-Negotiable)
//! 1. Blueprints Are Canon
//! 2. Overlays Patch, Never Fork
//! 3. Validation Blocks Publish
//! 4. Deterministic Checksums
//! 5. Pointers Swap Atomically

pub mod document;
pub mod ir;
pub mod diagnostics;
pub mod transform;
pub mod merge;
pub mod expression;
pub mod validation;
pub mod hashing;
pub mod pipeline;
pub mod manifest;
pub mod store;
pub mod publish;
pub mod registry;
pub mod resolver;
pub mod evaluator;
pub mod render;
pub mod cache;
pub mod engine;
pub mod config;

pub use document::{DocumentNode, DocumentSet};
pub use ir::{LayerKey, PageDefinition, PageKind};
pub use diagnostics::{CompileError, CompileErrors, ReasonCode};
pub use validation::{ValidationResult, ValidationRule, ValidationViolation, ViolationSeverity};
pub use hashing::{canonical_json, compute_checksum, compute_fingerprint};
pub use pipeline::{BatchError, CompilationPipeline, CompileContext, CompiledArtifact, PipelineError};
pub use manifest::{Manifest, ManifestEntry, RegistryPointers};
pub use store::{FsStore, LayerStore, MemoryStore, StoreError};
pub use publish::{PublishError, PublishOutcome, PublishReceipt, Publisher};
pub use registry::{Registry, RegistryError, RequestContext, ResolvedLayers};
pub use resolver::{ResolveError, ResolvedPage, Resolver};
pub use evaluator::{Evaluator, HttpClient, ServiceDispatcher, ViewerContext};
pub use render::{RenderModel, RenderValue};
pub use engine::{EngineError, PageEngine};
pub use config::EngineConfig;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
