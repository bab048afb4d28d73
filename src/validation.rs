//! Validation System - Rule/Policy Separation
//!
//! Rules produce structured violations.
//! Policy: any `Error` blocks compilation, warnings are recorded only.

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::diagnostics::{CompileError, CompileErrors, ReasonCode};
use crate::expression::{self, BUILTINS};
use crate::ir::{
    AccessRule, Binding, DataSourceSpec, PageDefinition, PageKind, PatchPayload, Prop, PropValue,
};
use crate::merge::{apply_patch, PatchError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationViolation {
    pub rule: String,
    pub code: ReasonCode,
    pub severity: ViolationSeverity,
    pub node_id: Option<String>,
    pub message: String,
}

impl ValidationViolation {
    fn error(rule: &str, code: ReasonCode, node_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            code,
            severity: ViolationSeverity::Error,
            node_id: node_id.map(str::to_string),
            message: message.into(),
        }
    }
}

impl From<&ValidationViolation> for CompileError {
    fn from(v: &ValidationViolation) -> Self {
        CompileError::new(v.code, v.node_id.as_deref(), v.message.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ValidationViolation>,
    pub layer_key: String,
    pub content_version: String,
}

impl ValidationResult {
    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(|v| v.severity == ViolationSeverity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationViolation> {
        self.violations.iter().filter(|v| v.severity == ViolationSeverity::Warning)
    }

    /// Blocking violations as compile errors; `None` when valid.
    pub fn errors(&self) -> Option<CompileErrors> {
        let errors: Vec<CompileError> = self
            .violations
            .iter()
            .filter(|v| v.severity == ViolationSeverity::Error)
            .map(CompileError::from)
            .collect();
        (!errors.is_empty()).then(|| CompileErrors(errors))
    }
}

/// What a document is validated against besides itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationContext<'a> {
    /// The blueprint an overlay patches.
    pub base: Option<&'a PageDefinition>,
    /// Overlays applied before this one; ids they introduce are targetable.
    pub additional: &'a [PageDefinition],
    /// `contentVersion` currently published for the same layer key.
    pub prior_content_version: Option<&'a str>,
}

/// Validation rule trait - produces violations
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, page: &PageDefinition, ctx: &ValidationContext<'_>) -> Vec<ValidationViolation>;
}

/// The tree an overlay's references are checked against: the blueprint with
/// earlier overlays and this overlay's patches applied. Patches that cannot
/// apply are skipped here and reported by `ReferentialRule`.
fn effective_tree(page: &PageDefinition, ctx: &ValidationContext<'_>) -> Option<PageDefinition> {
    if page.kind == PageKind::Blueprint {
        return Some(page.clone());
    }
    let base = ctx.base?;
    let mut tree = base.clone();
    for layer in ctx.additional.iter().chain(std::iter::once(page)) {
        for patch in &layer.patches {
            if let Ok(next) = apply_patch(&tree, patch) {
                tree = next;
            }
        }
        tree.constants
            .extend(layer.constants.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    Some(tree)
}

// --- Concrete Rules ---

pub struct StructuralRule;

impl ValidationRule for StructuralRule {
    fn name(&self) -> &'static str { "structural" }

    fn validate(&self, page: &PageDefinition, _ctx: &ValidationContext<'_>) -> Vec<ValidationViolation> {
        let mut violations = vec![];
        match page.kind {
            PageKind::Blueprint => {
                if page.page_id.is_none() {
                    violations.push(ValidationViolation::error(
                        self.name(),
                        ReasonCode::MissingPageId,
                        None,
                        "blueprint has no page id",
                    ));
                }
                if !page.scope.is_empty() {
                    violations.push(ValidationViolation::error(
                        self.name(),
                        ReasonCode::UnexpectedScope,
                        page.page_id.as_deref(),
                        "blueprints must not set tenant, role, variant or locale",
                    ));
                }
            }
            PageKind::Overlay => {
                if page.scope.is_empty() {
                    violations.push(ValidationViolation::error(
                        self.name(),
                        ReasonCode::MissingScope,
                        page.extends.as_deref(),
                        "overlays must set at least one of tenant, role, variant, locale",
                    ));
                }
            }
        }

        let mut duplicates = |namespace: &str, ids: Vec<&str>| {
            let mut seen = BTreeSet::new();
            for id in ids {
                if !seen.insert(id) {
                    violations.push(ValidationViolation::error(
                        "structural",
                        ReasonCode::DuplicateId,
                        Some(id),
                        format!("{} id `{}` declared more than once", namespace, id),
                    ));
                }
            }
        };
        duplicates("region", page.regions.iter().map(|r| r.id.as_str()).collect());
        duplicates("component", page.components().map(|c| c.id.as_str()).collect());
        duplicates("data source", page.data_sources.iter().map(|d| d.id.as_str()).collect());
        duplicates("action", page.actions.iter().map(|a| a.id.as_str()).collect());
        violations
    }
}

pub struct ReferentialRule;

impl ReferentialRule {
    fn check_overlay_targets(
        &self,
        page: &PageDefinition,
        ctx: &ValidationContext<'_>,
        violations: &mut Vec<ValidationViolation>,
    ) {
        let Some(base) = ctx.base else {
            violations.push(ValidationViolation::error(
                self.name(),
                ReasonCode::MissingBlueprint,
                page.extends.as_deref(),
                "overlay validated without the blueprint it extends",
            ));
            return;
        };
        if page.extends != base.page_id || page.module != base.module || page.route != base.route {
            violations.push(ValidationViolation::error(
                self.name(),
                ReasonCode::BlueprintMismatch,
                page.extends.as_deref(),
                format!(
                    "overlay {}:{} extends `{}` but blueprint is {}:{} `{}`",
                    page.module,
                    page.route,
                    page.extends.as_deref().unwrap_or(""),
                    base.module,
                    base.route,
                    base.page_id.as_deref().unwrap_or(""),
                ),
            ));
        }

        let mut tree = base.clone();
        for layer in ctx.additional {
            for patch in &layer.patches {
                if let Ok(next) = apply_patch(&tree, patch) {
                    tree = next;
                }
            }
        }
        for patch in &page.patches {
            match apply_patch(&tree, patch) {
                Ok(next) => tree = next,
                Err(e) => {
                    let code = match &e {
                        PatchError::MissingTarget { .. } => ReasonCode::MissingOverlayTarget,
                        PatchError::DuplicateComponent(_) => ReasonCode::DuplicateId,
                        PatchError::Incomplete { .. } | PatchError::PayloadMismatch { .. } => {
                            ReasonCode::IncompletePatch
                        }
                    };
                    violations.push(ValidationViolation::error(
                        self.name(),
                        code,
                        Some(&patch.target_id),
                        e.to_string(),
                    ));
                }
            }
        }
    }

    fn check_binding(
        &self,
        tree: &PageDefinition,
        owner: &str,
        prop: &Prop,
        violations: &mut Vec<ValidationViolation>,
    ) {
        let node_id = format!("{}.{}", owner, prop.name);
        match &prop.value {
            PropValue::Binding { binding } => {
                let source_id = binding.source_id();
                let Some(source) = tree.data_source(source_id) else {
                    violations.push(ValidationViolation::error(
                        self.name(),
                        ReasonCode::UnknownDataSource,
                        Some(&node_id),
                        format!("binding reads undeclared data source `{}`", source_id),
                    ));
                    return;
                };
                match binding {
                    Binding::Contract { contract } => {
                        let alias = contract.split_once('.').map_or("", |(_, a)| a);
                        if !source.contract.contains_key(alias) {
                            violations.push(ValidationViolation::error(
                                self.name(),
                                ReasonCode::UnknownContractField,
                                Some(&node_id),
                                format!("data source `{}` exposes no contract field `{}`", source_id, alias),
                            ));
                        }
                    }
                    Binding::Path { path, .. } => {
                        if !path_resolves(&source.spec, &source.contract, path) {
                            violations.push(ValidationViolation::error(
                                self.name(),
                                ReasonCode::UnresolvedPath,
                                Some(&node_id),
                                format!("path `{}` does not resolve in data source `{}`", path, source_id),
                            ));
                        }
                    }
                }
            }
            PropValue::Action { action } => {
                if tree.action(action).is_none() {
                    violations.push(ValidationViolation::error(
                        self.name(),
                        ReasonCode::UnknownAction,
                        Some(&node_id),
                        format!("prop references undeclared action `{}`", action),
                    ));
                }
            }
            PropValue::Static { .. } | PropValue::Expression { .. } => {}
        }
    }
}

/// Explicit paths must exist in static data; for remote sources with a
/// contract the first segment must match a contract path's first segment.
fn path_resolves(spec: &DataSourceSpec, contract: &BTreeMap<String, String>, path: &str) -> bool {
    match spec {
        DataSourceSpec::Static { data } => lookup_path(data, path).is_some(),
        _ if contract.is_empty() => true,
        _ => {
            let head = path.split('.').next().unwrap_or(path);
            contract.values().any(|p| p.split('.').next() == Some(head))
        }
    }
}

/// Dotted-path lookup; numeric segments index arrays.
pub fn lookup_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

impl ValidationRule for ReferentialRule {
    fn name(&self) -> &'static str { "referential" }

    fn validate(&self, page: &PageDefinition, ctx: &ValidationContext<'_>) -> Vec<ValidationViolation> {
        let mut violations = vec![];
        if page.kind == PageKind::Overlay {
            self.check_overlay_targets(page, ctx, &mut violations);
        }
        let Some(tree) = effective_tree(page, ctx) else {
            return violations;
        };
        for component in tree.components() {
            for prop in &component.props {
                self.check_binding(&tree, &component.id, prop, &mut violations);
            }
        }
        for action in &tree.actions {
            for prop in &action.config {
                self.check_binding(&tree, &action.id, prop, &mut violations);
            }
        }
        violations
    }
}

pub struct VersioningRule;

impl ValidationRule for VersioningRule {
    fn name(&self) -> &'static str { "versioning" }

    fn validate(&self, page: &PageDefinition, ctx: &ValidationContext<'_>) -> Vec<ValidationViolation> {
        let mut violations = vec![];
        let parse = |field: &str, text: &str, violations: &mut Vec<ValidationViolation>| {
            match Version::parse(text) {
                Ok(v) => Some(v),
                Err(e) => {
                    violations.push(ValidationViolation::error(
                        "versioning",
                        ReasonCode::InvalidSemver,
                        None,
                        format!("{} `{}` is not semver: {}", field, text, e),
                    ));
                    None
                }
            }
        };
        parse("schemaVersion", &page.schema_version, &mut violations);
        let content = parse("contentVersion", &page.content_version, &mut violations);

        if let (Some(content), Some(prior)) = (content, ctx.prior_content_version) {
            // an unparseable prior entry cannot be compared; publishing will replace it
            if let Ok(prior) = Version::parse(prior) {
                if content < prior {
                    violations.push(ValidationViolation::error(
                        self.name(),
                        ReasonCode::VersionRegression,
                        None,
                        format!("contentVersion {} regresses published {}", content, prior),
                    ));
                }
            }
        }
        violations
    }
}

pub struct AccessControlRule;

impl AccessControlRule {
    fn check(&self, owner: &str, rule: &AccessRule, violations: &mut Vec<ValidationViolation>) {
        for (label, list) in [("allow", &rule.allow), ("deny", &rule.deny)] {
            if matches!(list, Some(roles) if roles.is_empty()) {
                violations.push(ValidationViolation::error(
                    self.name(),
                    ReasonCode::EmptyRoleList,
                    Some(owner),
                    format!("`{}` list is declared but empty", label),
                ));
            }
        }
        if let (Some(allow), Some(deny)) = (&rule.allow, &rule.deny) {
            for role in allow.intersection(deny) {
                violations.push(ValidationViolation::error(
                    self.name(),
                    ReasonCode::AmbiguousRole,
                    Some(owner),
                    format!("role `{}` is both allowed and denied", role),
                ));
            }
        }
    }
}

impl ValidationRule for AccessControlRule {
    fn name(&self) -> &'static str { "access_control" }

    fn validate(&self, page: &PageDefinition, _ctx: &ValidationContext<'_>) -> Vec<ValidationViolation> {
        let mut violations = vec![];
        let mut directives: Vec<(&str, &AccessRule)> = vec![];
        for component in page.components() {
            directives.extend(component.access.as_ref().map(|a| (component.id.as_str(), a)));
        }
        for source in &page.data_sources {
            directives.extend(source.access.as_ref().map(|a| (source.id.as_str(), a)));
        }
        for action in &page.actions {
            directives.extend(action.access.as_ref().map(|a| (action.id.as_str(), a)));
        }
        for patch in &page.patches {
            let id = patch.target_id.as_str();
            match &patch.payload {
                Some(PatchPayload::Region(region)) => {
                    for c in &region.components {
                        let owner = c.id.as_deref().unwrap_or(id);
                        directives.extend(c.access.as_ref().map(|a| (owner, a)));
                    }
                }
                Some(PatchPayload::Component(c)) => directives.extend(c.access.as_ref().map(|a| (id, a))),
                Some(PatchPayload::DataSource(d)) => directives.extend(d.access.as_ref().map(|a| (id, a))),
                Some(PatchPayload::Action(a)) => directives.extend(a.access.as_ref().map(|r| (id, r))),
                None => {}
            }
        }
        for (owner, rule) in directives {
            self.check(owner, rule, &mut violations);
        }
        violations
    }
}

/// Expression props must parse, call only builtins and read only sibling
/// binding props or `const`.
pub struct ExpressionRule;

impl ExpressionRule {
    fn check_props(&self, owner: &str, props: &[Prop], violations: &mut Vec<ValidationViolation>) {
        let visible: BTreeSet<&str> = props
            .iter()
            .filter(|p| matches!(p.value, PropValue::Binding { .. }))
            .map(|p| p.name.as_str())
            .chain(std::iter::once("const"))
            .collect();
        for prop in props {
            let PropValue::Expression { source } = &prop.value else {
                continue;
            };
            let node_id = format!("{}.{}", owner, prop.name);
            let expr = match expression::parse(source) {
                Ok(expr) => expr,
                Err(e) => {
                    violations.push(ValidationViolation::error(
                        self.name(),
                        ReasonCode::InvalidExpression,
                        Some(&node_id),
                        e.to_string(),
                    ));
                    continue;
                }
            };
            for call in expr.calls() {
                if !BUILTINS.contains(&call.as_str()) {
                    violations.push(ValidationViolation::error(
                        self.name(),
                        ReasonCode::InvalidExpression,
                        Some(&node_id),
                        format!("unknown function `{}`", call),
                    ));
                }
            }
            for root in expr.roots() {
                if !visible.contains(root.as_str()) {
                    violations.push(ValidationViolation::error(
                        self.name(),
                        ReasonCode::UnknownIdentifier,
                        Some(&node_id),
                        format!("`{}` is neither a binding prop of `{}` nor `const`", root, owner),
                    ));
                }
            }
        }
    }
}

impl ValidationRule for ExpressionRule {
    fn name(&self) -> &'static str { "expression" }

    fn validate(&self, page: &PageDefinition, ctx: &ValidationContext<'_>) -> Vec<ValidationViolation> {
        let mut violations = vec![];
        let Some(tree) = effective_tree(page, ctx) else {
            return violations;
        };
        for component in tree.components() {
            self.check_props(&component.id, &component.props, &mut violations);
        }
        for action in &tree.actions {
            self.check_props(&action.id, &action.config, &mut violations);
        }
        violations
    }
}

/// Warns about blueprint data sources nothing binds to.
pub struct UnusedDataSourceRule;

impl ValidationRule for UnusedDataSourceRule {
    fn name(&self) -> &'static str { "unused_data_source" }

    fn validate(&self, page: &PageDefinition, _ctx: &ValidationContext<'_>) -> Vec<ValidationViolation> {
        if page.kind != PageKind::Blueprint {
            return vec![];
        }
        let referenced: BTreeSet<&str> = page
            .components()
            .flat_map(|c| c.props.iter())
            .chain(page.actions.iter().flat_map(|a| a.config.iter()))
            .filter_map(|p| match &p.value {
                PropValue::Binding { binding } => Some(binding.source_id()),
                _ => None,
            })
            .collect();
        page.data_sources
            .iter()
            .filter(|d| !referenced.contains(d.id.as_str()))
            .map(|d| ValidationViolation {
                rule: self.name().to_string(),
                code: ReasonCode::UnusedDataSource,
                severity: ViolationSeverity::Warning,
                node_id: Some(d.id.clone()),
                message: format!("data source `{}` is never bound", d.id),
            })
            .collect()
    }
}

/// Validator orchestrates rules and applies policy
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(StructuralRule),
                Box::new(ReferentialRule),
                Box::new(VersioningRule),
                Box::new(AccessControlRule),
                Box::new(ExpressionRule),
                Box::new(UnusedDataSourceRule),
            ],
        }
    }

    /// Run every rule; no short-circuiting, so authors see everything at once.
    pub fn validate(&self, page: &PageDefinition, ctx: &ValidationContext<'_>) -> ValidationResult {
        let violations: Vec<_> = self
            .rules
            .iter()
            .flat_map(|rule| rule.validate(page, ctx))
            .collect();
        let valid = !violations.iter().any(|v| v.severity == ViolationSeverity::Error);
        ValidationResult {
            valid,
            violations,
            layer_key: page.layer_key().to_string(),
            content_version: page.content_version.clone(),
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_path() {
        let data = json!({"totals": {"count": 3}, "rows": [{"id": "a"}]});
        assert_eq!(lookup_path(&data, "totals.count"), Some(&json!(3)));
        assert_eq!(lookup_path(&data, "rows.0.id"), Some(&json!("a")));
        assert_eq!(lookup_path(&data, "rows.9.id"), None);
        assert_eq!(lookup_path(&data, "missing"), None);
    }

    #[test]
    fn test_remote_path_against_contract() {
        let spec = DataSourceSpec::Service {
            handler: "stats".into(),
            args: json!({}),
            timeout_ms: None,
        };
        let contract: BTreeMap<String, String> = [("count".to_string(), "totals.count".to_string())].into();
        assert!(path_resolves(&spec, &contract, "totals.sum"));
        assert!(!path_resolves(&spec, &contract, "other.sum"));
        assert!(path_resolves(&spec, &BTreeMap::new(), "anything"));
    }
}
