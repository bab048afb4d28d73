//! Evaluator - RBAC, Data, Bindings, Expressions, Actions
//!
//! Each node is evaluated independently; a failed source or expression marks
//! its own props and nothing else. Fetches run concurrently, each under its
//! own timeout. Dropping the `evaluate` future drops every in-flight fetch.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EvaluatorConfig;
use crate::expression::{self, ExpressionError, Sandbox};
use crate::ir::{is_visible, AccessRule, Binding, DataSource, DataSourceSpec, HttpRequest, Prop, PropValue};
use crate::render::{
    RenderAction, RenderComponent, RenderModel, RenderProp, RenderRegion, RenderValue, SourceStatus,
};
use crate::resolver::ResolvedPage;
use crate::validation::lookup_path;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("unknown service handler `{0}`")]
    UnknownHandler(String),

    #[error("{0}")]
    Failed(String),
}

/// Per-node failure recorded in the render model.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationError {
    #[error("data source `{source_id}` timed out after {after_ms}ms")]
    Timeout { source_id: String, after_ms: u64 },

    #[error("data source `{source_id}` failed: {message}")]
    SourceFailed { source_id: String, message: String },

    #[error("{node}.{prop}: {message}")]
    Expression {
        node: String,
        prop: String,
        message: String,
    },
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn fetch(&self, request: &HttpRequest) -> Result<Value, CollaboratorError>;
}

#[async_trait]
pub trait ServiceDispatcher: Send + Sync {
    async fn call(&self, handler: &str, args: &Value) -> Result<Value, CollaboratorError>;
}

/// Stand-in for deployments without remote data.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

#[async_trait]
impl HttpClient for Unconfigured {
    async fn fetch(&self, request: &HttpRequest) -> Result<Value, CollaboratorError> {
        Err(CollaboratorError::Unavailable(format!("no http client for {}", request.url)))
    }
}

#[async_trait]
impl ServiceDispatcher for Unconfigured {
    async fn call(&self, handler: &str, _args: &Value) -> Result<Value, CollaboratorError> {
        Err(CollaboratorError::UnknownHandler(handler.to_string()))
    }
}

/// Roles and entitlement flags supplied by the RBAC/licensing collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ViewerContext {
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub entitlements: BTreeSet<String>,
}

impl ViewerContext {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            entitlements: BTreeSet::new(),
        }
    }

    pub fn with_entitlement(mut self, flag: impl Into<String>) -> Self {
        self.entitlements.insert(flag.into());
        self
    }
}

/// Outcome of resolving one data source.
enum SourceResult {
    Ready(Value),
    Denied,
    Failed(EvaluationError),
}

pub struct Evaluator {
    http: Arc<dyn HttpClient>,
    services: Arc<dyn ServiceDispatcher>,
    config: EvaluatorConfig,
}

impl Evaluator {
    pub fn new(
        http: Arc<dyn HttpClient>,
        services: Arc<dyn ServiceDispatcher>,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            http,
            services,
            config,
        }
    }

    /// Evaluator for pages with static sources only.
    pub fn offline(config: EvaluatorConfig) -> Self {
        Self::new(Arc::new(Unconfigured), Arc::new(Unconfigured), config)
    }

    pub async fn evaluate(&self, resolved: &ResolvedPage, viewer: &ViewerContext) -> RenderModel {
        let page = &resolved.page;
        let visible = |access: Option<&AccessRule>| is_visible(access, &viewer.roles, &viewer.entitlements);

        let components: Vec<(&str, Vec<_>)> = page
            .regions
            .iter()
            .map(|r| {
                let kept = r
                    .components
                    .iter()
                    .filter(|c| visible(c.access.as_ref()))
                    .collect::<Vec<_>>();
                (r.id.as_str(), kept)
            })
            .collect();
        let actions: Vec<_> = page
            .actions
            .iter()
            .filter(|a| visible(a.access.as_ref()))
            .collect();
        let visible_actions: BTreeSet<&str> = actions.iter().map(|a| a.id.as_str()).collect();

        // sources referenced by the visible tree only
        let referenced: BTreeSet<String> = components
            .iter()
            .flat_map(|(_, cs)| cs.iter().flat_map(|c| c.props.iter()))
            .chain(actions.iter().flat_map(|a| a.config.iter()))
            .filter_map(|p| match &p.value {
                PropValue::Binding { binding } => resolved
                    .contracts
                    .target_of(binding)
                    .map(|t| t.source)
                    .or_else(|| Some(binding.source_id().to_string())),
                _ => None,
            })
            .collect();

        let mut results: HashMap<String, SourceResult> = HashMap::new();
        let mut pending = Vec::new();
        for id in &referenced {
            match page.data_source(id) {
                Some(source) if visible(source.access.as_ref()) => pending.push(source),
                Some(_) => {
                    debug!(source = %id, "Data source denied for viewer");
                    results.insert(id.clone(), SourceResult::Denied);
                }
                None => {
                    results.insert(
                        id.clone(),
                        SourceResult::Failed(EvaluationError::SourceFailed {
                            source_id: id.clone(),
                            message: "not declared".to_string(),
                        }),
                    );
                }
            }
        }
        for (id, result) in join_all(pending.into_iter().map(|s| self.fetch(s))).await {
            results.insert(id, result);
        }

        let constants = expression::object(&page.constants);
        let mut errors = Vec::new();
        let mut resolve = |owner: &str, props: &[Prop]| {
            self.resolve_props(owner, props, resolved, &results, &visible_actions, &constants, &mut errors)
        };

        let regions = components
            .iter()
            .map(|(id, cs)| RenderRegion {
                id: id.to_string(),
                components: cs
                    .iter()
                    .map(|c| RenderComponent {
                        id: c.id.clone(),
                        type_name: c.type_name.clone(),
                        namespace: c.namespace.clone(),
                        version: c.version.clone(),
                        props: resolve(c.id.as_str(), c.props.as_slice()),
                    })
                    .collect(),
            })
            .collect();
        let actions = actions
            .iter()
            .map(|a| RenderAction {
                id: a.id.clone(),
                kind: a.kind.clone(),
                config: resolve(a.id.as_str(), a.config.as_slice()),
            })
            .collect();

        let sources = results
            .iter()
            .map(|(id, r)| {
                let status = match r {
                    SourceResult::Ready(_) => SourceStatus::Ready,
                    SourceResult::Denied => SourceStatus::Denied,
                    SourceResult::Failed(EvaluationError::Timeout { after_ms, .. }) => {
                        SourceStatus::TimedOut { after_ms: *after_ms }
                    }
                    SourceResult::Failed(e) => SourceStatus::Failed {
                        message: e.to_string(),
                    },
                };
                (id.clone(), status)
            })
            .collect();
        errors.extend(results.into_values().filter_map(|r| match r {
            SourceResult::Failed(e) => Some(e),
            _ => None,
        }));
        errors.sort_by_key(|e| e.to_string());

        RenderModel {
            page_id: page.page_id.clone(),
            module: page.module.clone(),
            route: page.route.clone(),
            fingerprint: resolved.fingerprint.clone(),
            regions,
            actions,
            constants: page.constants.clone(),
            sources,
            errors,
            degraded: false,
        }
    }

    async fn fetch(&self, source: &DataSource) -> (String, SourceResult) {
        let after = source
            .spec
            .timeout_ms()
            .map(std::time::Duration::from_millis)
            .unwrap_or_else(|| self.config.data_source_timeout());
        let outcome = match &source.spec {
            DataSourceSpec::Static { data } => return (source.id.clone(), SourceResult::Ready(data.clone())),
            DataSourceSpec::Http { request } => tokio::time::timeout(after, self.http.fetch(request)).await,
            DataSourceSpec::Service { handler, args, .. } => {
                tokio::time::timeout(after, self.services.call(handler, args)).await
            }
        };
        let result = match outcome {
            Ok(Ok(value)) => SourceResult::Ready(value),
            Ok(Err(e)) => {
                warn!(source = %source.id, error = %e, "Data source failed");
                SourceResult::Failed(EvaluationError::SourceFailed {
                    source_id: source.id.clone(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                let after_ms = after.as_millis() as u64;
                warn!(source = %source.id, after_ms, "Data source timed out");
                SourceResult::Failed(EvaluationError::Timeout {
                    source_id: source.id.clone(),
                    after_ms,
                })
            }
        };
        (source.id.clone(), result)
    }

    fn resolve_binding(
        &self,
        binding: &Binding,
        resolved: &ResolvedPage,
        results: &HashMap<String, SourceResult>,
    ) -> RenderValue {
        let Some(target) = resolved.contracts.target_of(binding) else {
            return RenderValue::unavailable(format!("no contract field `{}`", binding.source_id()));
        };
        match results.get(&target.source) {
            Some(SourceResult::Ready(data)) => match lookup_path(data, &target.path) {
                Some(value) => RenderValue::ready(value.clone()),
                None => RenderValue::unavailable(format!("field `{}` missing", target.path)),
            },
            Some(SourceResult::Denied) => RenderValue::unavailable("access denied"),
            Some(SourceResult::Failed(e)) => RenderValue::unavailable(e.to_string()),
            None => RenderValue::unavailable(format!("data source `{}` not loaded", target.source)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_props(
        &self,
        owner: &str,
        props: &[Prop],
        resolved: &ResolvedPage,
        results: &HashMap<String, SourceResult>,
        visible_actions: &BTreeSet<&str>,
        constants: &Value,
        errors: &mut Vec<EvaluationError>,
    ) -> Vec<RenderProp> {
        let mut values: Vec<Option<RenderValue>> = props
            .iter()
            .map(|p| match &p.value {
                PropValue::Static { value } => Some(RenderValue::ready(value.clone())),
                PropValue::Binding { binding } => Some(self.resolve_binding(binding, resolved, results)),
                PropValue::Action { action } if visible_actions.contains(action.as_str()) => {
                    Some(RenderValue::Action {
                        action: action.clone(),
                    })
                }
                PropValue::Action { action } => {
                    Some(RenderValue::unavailable(format!("action `{}` not available", action)))
                }
                PropValue::Expression { .. } => None,
            })
            .collect();

        // expressions see this node's ready bindings and `const`
        let mut vars: BTreeMap<String, Value> = BTreeMap::new();
        let mut unavailable: BTreeSet<&str> = BTreeSet::new();
        for (prop, value) in props.iter().zip(&values) {
            if !matches!(prop.value, PropValue::Binding { .. }) {
                continue;
            }
            match value.as_ref().and_then(RenderValue::value) {
                Some(v) => {
                    vars.insert(prop.name.clone(), v.clone());
                }
                None => {
                    unavailable.insert(prop.name.as_str());
                }
            }
        }
        vars.insert("const".to_string(), constants.clone());

        for (prop, slot) in props.iter().zip(values.iter_mut()) {
            let PropValue::Expression { source } = &prop.value else {
                continue;
            };
            let expr = match expression::parse(source) {
                Ok(expr) => expr,
                Err(e) => {
                    *slot = Some(self.expression_error(owner, &prop.name, e, errors));
                    continue;
                }
            };
            // reading an unavailable binding makes the expression unavailable too
            if let Some(name) = expr.roots().into_iter().find(|r| unavailable.contains(r.as_str())) {
                *slot = Some(RenderValue::unavailable(format!("reads unavailable `{}`", name)));
                continue;
            }
            let outcome = Sandbox::new(&vars, self.config.expression_gas_limit).eval(&expr);
            *slot = Some(match outcome {
                Ok(value) => RenderValue::ready(value),
                Err(e) => self.expression_error(owner, &prop.name, e, errors),
            });
        }

        props
            .iter()
            .zip(values)
            .map(|(p, v)| RenderProp {
                name: p.name.clone(),
                value: v.unwrap_or_else(|| RenderValue::unavailable("unresolved")),
            })
            .collect()
    }

    fn expression_error(
        &self,
        owner: &str,
        prop: &str,
        e: ExpressionError,
        errors: &mut Vec<EvaluationError>,
    ) -> RenderValue {
        debug!(node = %owner, prop = %prop, error = %e, "Expression failed");
        errors.push(EvaluationError::Expression {
            node: owner.to_string(),
            prop: prop.to_string(),
            message: e.to_string(),
        });
        RenderValue::Error {
            message: e.to_string(),
        }
    }
}
