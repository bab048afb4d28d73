//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pagestack_core::evaluator::{CollaboratorError, HttpClient, ServiceDispatcher};
use pagestack_core::ir::HttpRequest;
use pagestack_core::{CompilationPipeline, CompileContext, CompiledArtifact, DocumentNode, PageDefinition};

pub fn node(tag: &str) -> DocumentNode {
    DocumentNode::new(tag)
}

pub fn static_prop(name: &str, value: impl Into<Value>) -> DocumentNode {
    node("prop").attr("name", name).attr("value", value)
}

pub fn component(id: &str, type_name: &str) -> DocumentNode {
    node("component").attr("id", id).attr("type", type_name).attr("namespace", "core")
}

/// `portal:/home` blueprint.
///
/// Region `main`: `hero` (static title), `stats_card` (bound to http `stats`),
/// `profile_card` (bound to static `profile`, plus an expression),
/// `admin_panel` (allow admin), `promo` (deny guest).
pub fn blueprint_doc(content_version: &str) -> DocumentNode {
    node("blueprint")
        .attr("id", "home")
        .attr("module", "portal")
        .attr("route", "/home")
        .attr("schemaVersion", "1.0.0")
        .attr("contentVersion", content_version)
        .child(
            node("region")
                .attr("id", "main")
                .child(component("hero", "Banner").child(static_prop("title", "Welcome")))
                .child(
                    component("stats_card", "Stat")
                        .child(node("prop").attr("name", "count").attr("contract", "stats.count"))
                        .child(node("prop").attr("name", "refresh").attr("action", "reload")),
                )
                .child(
                    component("profile_card", "Profile")
                        .child(node("prop").attr("name", "name").attr("contract", "profile.name"))
                        .child(
                            node("prop")
                                .attr("name", "greeting")
                                .attr("expr", "concat(const.greeting, \", \", name)"),
                        ),
                )
                .child(
                    component("admin_panel", "Panel")
                        .attr("allow", json!(["admin"]))
                        .child(static_prop("label", "Admin")),
                )
                .child(
                    component("promo", "Promo")
                        .child(node("access").attr("deny", "guest"))
                        .child(static_prop("text", "Upgrade")),
                ),
        )
        .child(
            node("dataSource")
                .attr("id", "stats")
                .attr("kind", "http")
                .attr("url", "https://stats.internal/totals")
                .attr("contract", json!({"count": "totals.count"})),
        )
        .child(
            node("dataSource")
                .attr("id", "profile")
                .attr("kind", "static")
                .attr("data", json!({"user": {"name": "Ada"}}))
                .child(node("field").attr("name", "name").attr("path", "user.name")),
        )
        .child(node("action").attr("id", "reload").attr("kind", "refresh"))
        .child(node("constant").attr("name", "greeting").attr("value", "Hello"))
}

pub fn overlay_root(scope: &[(&str, &str)], content_version: &str) -> DocumentNode {
    let mut root = node("overlay")
        .attr("extends", "home")
        .attr("module", "portal")
        .attr("route", "/home")
        .attr("schemaVersion", "1.0.0")
        .attr("contentVersion", content_version);
    for (name, value) in scope {
        root = root.attr(name, *value);
    }
    root
}

/// Overlay for tenant acme retitling `hero`.
pub fn acme_overlay_doc(title: &str, content_version: &str) -> DocumentNode {
    overlay_root(&[("tenant", "acme")], content_version).child(
        node("patch")
            .attr("target", "component")
            .attr("id", "hero")
            .attr("op", "merge")
            .child(node("component").child(static_prop("title", title))),
    )
}

pub fn remove_hero_doc(scope: &[(&str, &str)]) -> DocumentNode {
    overlay_root(scope, "1.0.0").child(
        node("patch")
            .attr("target", "component")
            .attr("id", "hero")
            .attr("op", "remove"),
    )
}

pub fn retitle_hero_doc(scope: &[(&str, &str)], title: &str) -> DocumentNode {
    overlay_root(scope, "1.0.0").child(
        node("patch")
            .attr("target", "component")
            .attr("id", "hero")
            .attr("op", "merge")
            .child(node("component").child(static_prop("title", title))),
    )
}

pub fn compile_blueprint(doc: &DocumentNode) -> CompiledArtifact {
    CompilationPipeline::new()
        .compile(doc, &CompileContext::new())
        .expect("blueprint compiles")
}

pub fn compile_overlay(doc: &DocumentNode, base: &PageDefinition) -> CompiledArtifact {
    CompilationPipeline::new()
        .compile(doc, &CompileContext::new().with_base(base))
        .expect("overlay compiles")
}

// --- Collaborators ---

#[derive(Clone)]
pub enum Reply {
    Value(Value),
    Fail(String),
    /// Fails the first request to the URL, answers every later one.
    FailFirst { message: String, then: Value },
    /// Never answers; only a timeout ends the fetch.
    Hang,
}

/// HTTP client answering by URL, recording every request.
#[derive(Default)]
pub struct MockHttp {
    replies: HashMap<String, Reply>,
    pub calls: Mutex<Vec<String>>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, url: &str, reply: Reply) -> Self {
        self.replies.insert(url.to_string(), reply);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl HttpClient for MockHttp {
    async fn fetch(&self, request: &HttpRequest) -> Result<Value, CollaboratorError> {
        let attempt = {
            let mut calls = self.calls.lock();
            calls.push(request.url.clone());
            calls.iter().filter(|u| **u == request.url).count()
        };
        match self.replies.get(&request.url).cloned() {
            Some(Reply::Value(v)) => Ok(v),
            Some(Reply::Fail(message)) => Err(CollaboratorError::Failed(message)),
            Some(Reply::FailFirst { message, .. }) if attempt == 1 => Err(CollaboratorError::Failed(message)),
            Some(Reply::FailFirst { then, .. }) => Ok(then),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(CollaboratorError::Failed("woke up".into()))
            }
            None => Err(CollaboratorError::Status {
                code: 404,
                message: request.url.clone(),
            }),
        }
    }
}

/// Service dispatcher echoing `args` for handler `echo`.
pub struct EchoServices;

#[async_trait]
impl ServiceDispatcher for EchoServices {
    async fn call(&self, handler: &str, args: &Value) -> Result<Value, CollaboratorError> {
        match handler {
            "echo" => Ok(args.clone()),
            other => Err(CollaboratorError::UnknownHandler(other.to_string())),
        }
    }
}

pub fn stats_ok() -> Arc<MockHttp> {
    Arc::new(MockHttp::new().reply(
        "https://stats.internal/totals",
        Reply::Value(json!({"totals": {"count": 42}})),
    ))
}
