//! PageStack CLI - Compile, Publish and Inspect Layers
//!
//! Commands: validate, compile, publish, build, layers, resolve, render
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 on validation or resolution failure, 1 on other errors

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use pagestack_core::{
    BatchError, CompilationPipeline, CompileContext, DocumentSet, EngineConfig, Evaluator, FsStore, LayerKey,
    LayerStore, PageDefinition, PageEngine, PageKind, PipelineError, Publisher, Registry,
    RegistryError, RequestContext, ViewerContext,
};
use pagestack_core::engine::EngineError;
use pagestack_core::store::StoreError;

#[derive(Parser)]
#[command(name = "pagestack-cli")]
#[command(about = "PageStack CLI - Layered Page Compiler")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine config (TOML)
    #[arg(short, long, default_value = "pagestack.toml")]
    config: PathBuf,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a document without compiling it
    Validate(DocumentArgs),

    /// Compile a document to an artifact
    Compile(DocumentArgs),

    /// Compile and publish a document
    Publish {
        #[command(flatten)]
        document: DocumentArgs,

        /// Store directory (defaults to [store] root)
        #[arg(short, long)]
        store: Option<PathBuf>,
    },

    /// Compile every document in a directory, optionally publishing them
    Build {
        /// Directory of JSON documents
        dir: PathBuf,

        /// Publish into this store directory after compiling
        #[arg(short, long)]
        store: Option<PathBuf>,
    },

    /// List the layers a request would resolve
    Layers(RequestArgs),

    /// Resolve a request to a merged page
    Resolve(RequestArgs),

    /// Resolve and evaluate a request (static data sources only)
    Render {
        #[command(flatten)]
        request: RequestArgs,

        /// Entitlement flags held by the viewer
        #[arg(long = "entitlement")]
        entitlements: Vec<String>,
    },
}

#[derive(Args)]
struct DocumentArgs {
    /// Document (JSON node tree)
    document: PathBuf,

    /// Blueprint document an overlay extends
    #[arg(short, long)]
    base: Option<PathBuf>,
}

#[derive(Args)]
struct RequestArgs {
    /// Store directory (defaults to [store] root)
    #[arg(short, long)]
    store: Option<PathBuf>,

    #[arg(long)]
    module: String,

    #[arg(long)]
    route: String,

    #[arg(long)]
    tenant: String,

    #[arg(long = "role")]
    roles: Vec<String>,

    #[arg(long)]
    variant: Option<String>,

    #[arg(long)]
    locale: Option<String>,
}

impl RequestArgs {
    fn context(&self) -> RequestContext {
        RequestContext {
            tenant: self.tenant.clone(),
            module: self.module.clone(),
            route: self.route.clone(),
            roles: self.roles.iter().cloned().collect(),
            variant: self.variant.clone(),
            locale: self.locale.clone(),
        }
    }
}

/// Failure classes mapped to exit codes.
enum Failure {
    Rejected(serde_json::Value),
    Other(String),
}

impl From<PipelineError> for Failure {
    fn from(e: PipelineError) -> Self {
        match e.compile_errors() {
            Some(errors) => Failure::Rejected(json!({ "valid": false, "errors": errors })),
            None => Failure::Other(e.to_string()),
        }
    }
}

impl From<BatchError> for Failure {
    fn from(e: BatchError) -> Self {
        let path = e.path.display().to_string();
        match e.source.compile_errors() {
            Some(errors) => Failure::Rejected(json!({ "valid": false, "path": path, "errors": errors })),
            None => Failure::Other(e.to_string()),
        }
    }
}

impl From<StoreError> for Failure {
    fn from(e: StoreError) -> Self {
        Failure::Other(e.to_string())
    }
}

impl From<RegistryError> for Failure {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::LayerNotFound { .. } => Failure::Rejected(json!({ "error": e.to_string() })),
            other => Failure::Other(other.to_string()),
        }
    }
}

impl From<EngineError> for Failure {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Registry(e) => e.into(),
            EngineError::Resolve(e) => Failure::Rejected(json!({ "error": e.to_string() })),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Failure> {
    let text = serde_json::to_string_pretty(value).map_err(|e| Failure::Other(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn load_document(path: &Path) -> Result<pagestack_core::DocumentNode, Failure> {
    DocumentSet::read_file(path).map_err(|e| Failure::Other(e.to_string()))
}

fn open_store(arg: &Option<PathBuf>, config: &EngineConfig) -> Result<Arc<FsStore>, Failure> {
    let root = arg.clone().unwrap_or_else(|| config.store.root.clone());
    debug!(root = %root.display(), "Opening store");
    Ok(Arc::new(FsStore::open(root)?))
}

/// Blueprint IR from `--base`, else the live blueprint in `store`.
fn base_ir(
    pipeline: &CompilationPipeline,
    args: &DocumentArgs,
    ir: &PageDefinition,
    store: Option<&dyn LayerStore>,
) -> Result<Option<PageDefinition>, Failure> {
    if ir.kind == PageKind::Blueprint {
        return Ok(None);
    }
    if let Some(path) = &args.base {
        return Ok(Some(pipeline.transform(&load_document(path)?)?));
    }
    let Some(store) = store else {
        return Ok(None);
    };
    let key = LayerKey::blueprint(&ir.module, &ir.route);
    let pointers = store.load_pointers()?;
    let manifest = store.load_manifest()?;
    let Some(entry) = pointers.get(&key).and_then(|id| manifest.get(id)) else {
        return Ok(None);
    };
    Ok(Some(store.get(&entry.artifact_ref)?.ir))
}

fn run(cli: Cli) -> Result<(), Failure> {
    let config = EngineConfig::load_or_default(&cli.config);
    let pipeline = CompilationPipeline::new();

    match cli.command {
        Commands::Validate(args) => {
            let document = load_document(&args.document)?;
            let ir = pipeline.transform(&document)?;
            let base = base_ir(&pipeline, &args, &ir, None)?;
            let ctx = CompileContext {
                base: base.as_ref(),
                ..Default::default()
            };
            let (_, result) = pipeline.validate_document(&document, &ctx)?;
            print_json(&result)?;
            if !result.valid {
                return Err(Failure::Rejected(json!({ "valid": false })));
            }
            Ok(())
        }

        Commands::Compile(args) => {
            let document = load_document(&args.document)?;
            let ir = pipeline.transform(&document)?;
            let base = base_ir(&pipeline, &args, &ir, None)?;
            let ctx = CompileContext {
                base: base.as_ref(),
                ..Default::default()
            };
            let artifact = pipeline.compile(&document, &ctx)?;
            print_json(&json!({ "success": true, "artifact": artifact }))
        }

        Commands::Publish { document: args, store } => {
            let store = open_store(&store, &config)?;
            let publisher = Publisher::new(store.clone());
            let document = load_document(&args.document)?;
            let ir = pipeline.transform(&document)?;
            let base = base_ir(&pipeline, &args, &ir, Some(store.as_ref() as &dyn LayerStore))?;
            let prior = publisher
                .live_entry(&ir.layer_key())
                .map_err(|e| Failure::Other(e.to_string()))?;
            let ctx = CompileContext {
                base: base.as_ref(),
                additional: &[],
                prior: prior.as_ref(),
            };
            let artifact = pipeline.compile(&document, &ctx)?;
            let receipt = publisher
                .publish(&artifact)
                .map_err(|e| Failure::Other(e.to_string()))?;
            info!(layer_key = %receipt.entry.layer_key, outcome = ?receipt.outcome, "Publish complete");
            print_json(&json!({ "success": true, "receipt": receipt }))
        }

        Commands::Build { dir, store } => {
            let set = DocumentSet::load_from_dir(&dir).map_err(|e| Failure::Other(e.to_string()))?;
            let artifacts = pipeline.compile_set(&set)?;
            let Some(store) = store else {
                let compiled: Vec<_> = artifacts
                    .iter()
                    .map(|a| json!({ "layerKey": a.layer_key, "checksum": a.checksum }))
                    .collect();
                return print_json(&json!({ "success": true, "compiled": compiled }));
            };
            let store = open_store(&Some(store), &config)?;
            let publisher = Publisher::new(store);
            let mut receipts = Vec::with_capacity(artifacts.len());
            for artifact in &artifacts {
                let receipt = publisher
                    .publish(artifact)
                    .map_err(|e| Failure::Other(e.to_string()))?;
                info!(layer_key = %receipt.entry.layer_key, outcome = ?receipt.outcome, "Publish complete");
                receipts.push(receipt);
            }
            print_json(&json!({ "success": true, "receipts": receipts }))
        }

        Commands::Layers(args) => {
            let store = open_store(&args.store, &config)?;
            let registry = Registry::load(store.as_ref())?;
            let layers = registry.resolve_layers(&args.context())?;
            let entries: Vec<_> = layers.entries().collect();
            print_json(&json!({ "generation": layers.generation, "layers": entries }))
        }

        Commands::Resolve(args) => {
            let store = open_store(&args.store, &config)?;
            let engine = PageEngine::open(store, Evaluator::offline(config.evaluator.clone()), config)?;
            let resolution = engine.resolve(&args.context())?;
            print_json(&json!({
                "generation": resolution.generation,
                "degraded": resolution.degraded,
                "resolved": resolution.page,
            }))
        }

        Commands::Render { request, entitlements } => {
            let store = open_store(&request.store, &config)?;
            let engine = PageEngine::open(store, Evaluator::offline(config.evaluator.clone()), config)?;
            let viewer = ViewerContext {
                roles: request.roles.iter().cloned().collect(),
                entitlements: entitlements.into_iter().collect(),
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| Failure::Other(e.to_string()))?;
            let model = runtime.block_on(engine.render(&request.context(), &viewer))?;
            print_json(model.as_ref())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Rejected(output)) => {
            if output.get("errors").is_some() || output.get("error").is_some() {
                println!("{}", output);
            }
            ExitCode::from(2)
        }
        Err(Failure::Other(message)) => {
            println!("{}", json!({ "success": false, "error": message }));
            ExitCode::FAILURE
        }
    }
}
