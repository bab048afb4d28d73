//! Transformer - Authored Tree to Canonical IR
//!
//! Assigns structural identity, tags prop kinds and maps legacy vocabulary
//! onto the current shapes. Cross-references are the validator's job; this
//! stage only rejects input it cannot shape.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use crate::diagnostics::{CompileError, CompileErrors, ReasonCode};
use crate::document::DocumentNode;
use crate::ir::{
    AccessRule, Action, ActionPatch, Binding, Component, ComponentPatch, DataSource,
    DataSourcePatch, DataSourceSpec, HttpRequest, PageDefinition, PageKind, Patch, PatchOp,
    PatchPayload, PatchTarget, Prop, PropKind, PropValue, Region, RegionPatch, Scope,
    LAYER_KEY_SEPARATOR, WILDCARD,
};

/// Grouping tags that carry no meaning of their own.
const TRANSPARENT_TAGS: &[&str] = &[
    "regions",
    "components",
    "dataSources",
    "actions",
    "props",
    "constants",
    "patches",
    "contract",
    "config",
];

/// Map legacy tag names onto the current vocabulary.
fn canonical_tag(tag: &str) -> &str {
    match tag {
        "slot" => "region",
        "widget" => "component",
        "datasource" | "data-source" | "data_source" | "source" => "dataSource",
        "data-sources" | "datasources" => "dataSources",
        other => other,
    }
}

fn canonical_source_kind(kind: &str) -> Option<&'static str> {
    match kind {
        "static" | "inline" | "const" | "json" => Some("static"),
        "http" | "rest" | "fetch" => Some("http"),
        "service" | "rpc" | "handler" => Some("service"),
        _ => None,
    }
}

fn parse_target(target: &str) -> Option<PatchTarget> {
    match target {
        "region" | "slot" => Some(PatchTarget::Region),
        "component" | "widget" => Some(PatchTarget::Component),
        "dataSource" | "datasource" | "data-source" => Some(PatchTarget::DataSource),
        "action" => Some(PatchTarget::Action),
        _ => None,
    }
}

fn parse_op(op: &str) -> Option<PatchOp> {
    match op {
        "merge" => Some(PatchOp::Merge),
        "replace" => Some(PatchOp::Replace),
        "remove" | "delete" => Some(PatchOp::Remove),
        _ => None,
    }
}

/// Expand transparent grouping nodes, depth-first, preserving order.
fn flatten(children: &[DocumentNode]) -> Vec<&DocumentNode> {
    let mut out = Vec::new();
    for child in children {
        if TRANSPARENT_TAGS.contains(&canonical_tag(&child.tag)) {
            out.extend(flatten(&child.children));
        } else {
            out.push(child);
        }
    }
    out
}

pub struct Transformer;

impl Transformer {
    pub fn new() -> Self {
        Self
    }

    pub fn transform(&self, document: &DocumentNode) -> Result<PageDefinition, CompileErrors> {
        let mut ctx = Ctx::default();
        let page = ctx.page(document);
        match page {
            Some(page) if ctx.errors.is_empty() => Ok(page),
            _ => Err(CompileErrors(ctx.errors)),
        }
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct Ctx {
    errors: Vec<CompileError>,
}

impl Ctx {
    fn error(&mut self, code: ReasonCode, node_id: Option<&str>, message: impl Into<String>) {
        self.errors.push(CompileError::new(code, node_id, message));
    }

    fn require(&mut self, node: &DocumentNode, names: &[&str], owner: Option<&str>) -> Option<String> {
        let value = node.get_str(names);
        if value.is_none() {
            self.error(
                ReasonCode::MissingAttribute,
                owner,
                format!("<{}> requires `{}`", node.tag, names[0]),
            );
        }
        value
    }

    /// String attribute that will end up inside a layer key or id.
    fn key_part(&mut self, node: &DocumentNode, names: &[&str], owner: Option<&str>) -> Option<String> {
        let value = node.get_str(names)?;
        if value.contains(LAYER_KEY_SEPARATOR) {
            self.error(
                ReasonCode::InvalidValue,
                owner,
                format!("`{}` must not contain `{}`", names[0], LAYER_KEY_SEPARATOR),
            );
        } else if value == WILDCARD {
            self.error(
                ReasonCode::InvalidValue,
                owner,
                format!("`{}` must not be `{}`", names[0], WILDCARD),
            );
        }
        Some(value)
    }

    fn page(&mut self, root: &DocumentNode) -> Option<PageDefinition> {
        let kind = match root.tag.as_str() {
            "blueprint" => PageKind::Blueprint,
            "overlay" => PageKind::Overlay,
            other => {
                self.error(
                    ReasonCode::UnknownTag,
                    None,
                    format!("root must be <blueprint> or <overlay>, got <{}>", other),
                );
                return None;
            }
        };

        let page_id = self.key_part(root, &["id", "pageId"], None);
        let owner = page_id.clone();
        let owner = owner.as_deref();
        let module = self.key_part(root, &["module"], owner);
        let route = self.key_part(root, &["route", "path"], owner);
        if module.is_none() {
            self.require(root, &["module"], owner);
        }
        if route.is_none() {
            self.require(root, &["route", "path"], owner);
        }
        let schema_version = self.require(root, &["schemaVersion", "schema"], owner);
        let content_version = self.require(root, &["contentVersion", "version"], owner);

        let scope = Scope {
            tenant: self.key_part(root, &["tenant"], owner),
            role: self.key_part(root, &["role"], owner),
            variant: self.key_part(root, &["variant"], owner),
            locale: self.key_part(root, &["locale"], owner),
        };

        let mut page = PageDefinition {
            kind,
            schema_version: schema_version.unwrap_or_default(),
            content_version: content_version.unwrap_or_default(),
            module: module.unwrap_or_default(),
            route: route.unwrap_or_default(),
            scope,
            page_id: None,
            extends: None,
            regions: Vec::new(),
            data_sources: Vec::new(),
            actions: Vec::new(),
            constants: BTreeMap::new(),
            patches: Vec::new(),
        };

        match kind {
            PageKind::Blueprint => page.page_id = page_id,
            PageKind::Overlay => {
                page.extends = self.require(root, &["extends", "page", "blueprint"], None);
            }
        }

        for child in flatten(&root.children) {
            match (kind, canonical_tag(&child.tag)) {
                (PageKind::Blueprint, "region") => {
                    if let Some(region) = self.region(child) {
                        page.regions.push(region);
                    }
                }
                (PageKind::Blueprint, "dataSource") => {
                    if let Some(source) = self.data_source(child) {
                        page.data_sources.push(source);
                    }
                }
                (PageKind::Blueprint, "action") => {
                    if let Some(action) = self.action(child) {
                        page.actions.push(action);
                    }
                }
                (_, "constant") => {
                    if let Some((name, value)) = self.constant(child) {
                        page.constants.insert(name, value);
                    }
                }
                (PageKind::Overlay, "patch") => {
                    if let Some(patch) = self.patch(child) {
                        page.patches.push(patch);
                    }
                }
                (PageKind::Overlay, "region" | "component" | "dataSource" | "action") => {
                    self.error(
                        ReasonCode::MalformedNode,
                        child.get_str(&["id"]).as_deref(),
                        format!("overlay content <{}> must be wrapped in a <patch>", child.tag),
                    );
                }
                (_, other) => self.error(
                    ReasonCode::UnknownTag,
                    child.get_str(&["id"]).as_deref(),
                    format!("unexpected <{}> in <{}>", other, root.tag),
                ),
            }
        }

        // order carries no meaning for the keyed collections
        page.data_sources.sort_by(|a, b| a.id.cmp(&b.id));
        page.actions.sort_by(|a, b| a.id.cmp(&b.id));
        Some(page)
    }

    fn region(&mut self, node: &DocumentNode) -> Option<Region> {
        let id = self.key_part(node, &["id"], None);
        let Some(id) = id.or_else(|| self.require(node, &["id"], None)) else {
            return None;
        };
        let mut components = Vec::new();
        for (index, child) in flatten(&node.children).into_iter().enumerate() {
            if canonical_tag(&child.tag) == "component" {
                if let Some(component) = self.component(child, &id, index) {
                    components.push(component);
                }
            } else {
                self.error(
                    ReasonCode::UnknownTag,
                    Some(&id),
                    format!("unexpected <{}> in region", child.tag),
                );
            }
        }
        Some(Region { id, components })
    }

    fn component(&mut self, node: &DocumentNode, region_id: &str, index: usize) -> Option<Component> {
        let id = self
            .key_part(node, &["id"], None)
            .unwrap_or_else(|| format!("{}.{}", region_id, index));
        let patch = self.component_fields(node, &id);
        let type_name = self.require(node, &["type", "component"], Some(&id));
        let namespace = self.require(node, &["namespace", "ns"], Some(&id));
        Some(Component {
            id,
            type_name: type_name?,
            namespace: namespace?,
            version: patch.version,
            props: patch.props,
            access: patch.access,
        })
    }

    /// Fields shared by full components and component patches.
    fn component_fields(&mut self, node: &DocumentNode, id: &str) -> ComponentPatch {
        let mut props = Vec::new();
        for child in flatten(&node.children) {
            match canonical_tag(&child.tag) {
                "prop" => {
                    if let Some(prop) = self.prop(child, id) {
                        props.push(prop);
                    }
                }
                "access" => {}
                other => self.error(
                    ReasonCode::UnknownTag,
                    Some(id),
                    format!("unexpected <{}> in component", other),
                ),
            }
        }
        ComponentPatch {
            id: node.get_str(&["id"]),
            type_name: node.get_str(&["type", "component"]),
            namespace: node.get_str(&["namespace", "ns"]),
            version: node.get_str(&["version"]),
            props,
            access: self.access(node, id),
        }
    }

    fn prop(&mut self, node: &DocumentNode, owner: &str) -> Option<Prop> {
        let name = self.require(node, &["name"], Some(owner))?;
        let prop_id = format!("{}.{}", owner, name);

        let kind = match node.get_str(&["kind"]) {
            Some(kind) => match PropKind::from_str(&kind) {
                Ok(kind) => kind,
                Err(()) => {
                    self.error(
                        ReasonCode::UnknownKind,
                        Some(&prop_id),
                        format!("unknown prop kind `{}`", kind),
                    );
                    return None;
                }
            },
            None if node.has(&["value"]) => PropKind::Static,
            None if node.has(&["contract", "bind", "source"]) => PropKind::Binding,
            None if node.has(&["expr", "expression"]) => PropKind::Expression,
            None if node.has(&["action"]) => PropKind::Action,
            None => {
                self.error(
                    ReasonCode::MissingAttribute,
                    Some(&prop_id),
                    "prop needs one of `value`, `contract`, `source`+`path`, `expr` or `action`",
                );
                return None;
            }
        };

        let value = match kind {
            PropKind::Static => match node.get(&["value"]) {
                Some(v) => PropValue::Static { value: v.clone() },
                None => {
                    self.require(node, &["value"], Some(&prop_id));
                    return None;
                }
            },
            PropKind::Binding => PropValue::Binding {
                binding: self.binding(node, &prop_id)?,
            },
            PropKind::Expression => PropValue::Expression {
                source: self.require(node, &["expr", "expression"], Some(&prop_id))?,
            },
            PropKind::Action => PropValue::Action {
                action: self.require(node, &["action"], Some(&prop_id))?,
            },
        };
        Some(Prop { name, value })
    }

    fn binding(&mut self, node: &DocumentNode, prop_id: &str) -> Option<Binding> {
        if let Some(contract) = node.get_str(&["contract", "bind"]) {
            let well_formed = contract
                .split_once('.')
                .map_or(false, |(source, alias)| !source.is_empty() && !alias.is_empty());
            if !well_formed {
                self.error(
                    ReasonCode::InvalidValue,
                    Some(prop_id),
                    format!("contract alias `{}` must look like `dataSourceId.field`", contract),
                );
                return None;
            }
            return Some(Binding::Contract { contract });
        }
        let source = self.require(node, &["source"], Some(prop_id));
        let path = self.require(node, &["path"], Some(prop_id));
        Some(Binding::Path {
            source: source?,
            path: path?,
        })
    }

    fn role_list(&mut self, value: &Value, owner: &str) -> Option<BTreeSet<String>> {
        match value {
            Value::String(s) => Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            Value::Array(items) => {
                let mut roles = BTreeSet::new();
                for item in items {
                    match item.as_str().map(str::trim) {
                        Some(role) if !role.is_empty() => {
                            roles.insert(role.to_string());
                        }
                        _ => {
                            self.error(
                                ReasonCode::InvalidValue,
                                Some(owner),
                                format!("role list entries must be non-empty strings, got {}", item),
                            );
                            return None;
                        }
                    }
                }
                Some(roles)
            }
            other => {
                self.error(
                    ReasonCode::InvalidValue,
                    Some(owner),
                    format!("role list must be an array or comma-separated string, got {}", other),
                );
                None
            }
        }
    }

    /// RBAC from an `<access>` child, or from `allow`/`deny`/`requires` attributes.
    fn access(&mut self, node: &DocumentNode, owner: &str) -> Option<AccessRule> {
        let access_nodes: Vec<_> = node.children.iter().filter(|c| c.tag == "access").collect();
        if access_nodes.len() > 1 {
            self.error(
                ReasonCode::MalformedNode,
                Some(owner),
                "at most one <access> directive per node",
            );
        }
        let source = access_nodes.first().copied().unwrap_or(node);
        if !source.has(&["allow", "deny", "requires"]) {
            return None;
        }
        let mut rule = AccessRule::default();
        if let Some(v) = source.get(&["allow"]) {
            rule.allow = self.role_list(v, owner);
        }
        if let Some(v) = source.get(&["deny"]) {
            rule.deny = self.role_list(v, owner);
        }
        if let Some(v) = source.get(&["requires"]) {
            rule.requires = self.role_list(v, owner).unwrap_or_default();
        }
        Some(rule)
    }

    fn data_source(&mut self, node: &DocumentNode) -> Option<DataSource> {
        let id = self.key_part(node, &["id"], None);
        let id = id.or_else(|| self.require(node, &["id"], None))?;
        let spec = self.data_source_spec(node, &id);
        let contract = self.contract(node, &id);
        let access = self.access(node, &id);
        Some(DataSource {
            id,
            spec: spec?,
            contract,
            access,
        })
    }

    fn data_source_spec(&mut self, node: &DocumentNode, id: &str) -> Option<DataSourceSpec> {
        let raw_kind = self.require(node, &["kind", "type"], Some(id))?;
        let Some(kind) = canonical_source_kind(&raw_kind) else {
            self.error(
                ReasonCode::UnknownKind,
                Some(id),
                format!("unknown data source kind `{}`", raw_kind),
            );
            return None;
        };
        match kind {
            "static" => match node.get(&["data", "value"]) {
                Some(data) => Some(DataSourceSpec::Static { data: data.clone() }),
                None => {
                    self.require(node, &["data", "value"], Some(id));
                    None
                }
            },
            "http" => {
                let request_node = node.children.iter().find(|c| c.tag == "request").unwrap_or(node);
                let url = self.require(request_node, &["url", "endpoint"], Some(id))?;
                let headers = match request_node.get(&["headers"]) {
                    None => BTreeMap::new(),
                    Some(Value::Object(map)) => map
                        .iter()
                        .map(|(k, v)| {
                            let text = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                            (k.clone(), text)
                        })
                        .collect(),
                    Some(other) => {
                        self.error(
                            ReasonCode::InvalidValue,
                            Some(id),
                            format!("headers must be an object, got {}", other),
                        );
                        BTreeMap::new()
                    }
                };
                Some(DataSourceSpec::Http {
                    request: HttpRequest {
                        method: request_node
                            .get_str(&["method"])
                            .map(|m| m.to_uppercase())
                            .unwrap_or_else(|| "GET".to_string()),
                        url,
                        headers,
                        body: request_node.get(&["body"]).cloned(),
                        timeout_ms: self.timeout(request_node, id),
                    },
                })
            }
            _ => Some(DataSourceSpec::Service {
                handler: self.require(node, &["handler", "service"], Some(id))?,
                args: node
                    .get(&["args", "params"])
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default())),
                timeout_ms: self.timeout(node, id),
            }),
        }
    }

    fn timeout(&mut self, node: &DocumentNode, id: &str) -> Option<u64> {
        let value = node.get(&["timeoutMs", "timeout"])?;
        match value.as_u64() {
            Some(ms) => Some(ms),
            None => {
                self.error(
                    ReasonCode::InvalidValue,
                    Some(id),
                    format!("timeoutMs must be a non-negative integer, got {}", value),
                );
                None
            }
        }
    }

    /// Contract aliases from a `contract` attribute object and/or `<field>` children.
    fn contract(&mut self, node: &DocumentNode, id: &str) -> BTreeMap<String, String> {
        let mut contract = BTreeMap::new();
        match node.get(&["contract"]) {
            None => {}
            Some(Value::Object(map)) => {
                for (alias, path) in map {
                    match path.as_str() {
                        Some(path) => {
                            contract.insert(alias.clone(), path.to_string());
                        }
                        None => self.error(
                            ReasonCode::InvalidValue,
                            Some(id),
                            format!("contract field `{}` must map to a path string", alias),
                        ),
                    }
                }
            }
            Some(other) => self.error(
                ReasonCode::InvalidValue,
                Some(id),
                format!("contract must be an object, got {}", other),
            ),
        }
        for child in flatten(&node.children) {
            match child.tag.as_str() {
                "field" | "alias" => {
                    let name = self.require(child, &["name"], Some(id));
                    let path = child.get_str(&["path"]).or_else(|| name.clone());
                    if let (Some(name), Some(path)) = (name, path) {
                        contract.insert(name, path);
                    }
                }
                "access" | "request" => {}
                other => self.error(
                    ReasonCode::UnknownTag,
                    Some(id),
                    format!("unexpected <{}> in data source", other),
                ),
            }
        }
        contract
    }

    fn action(&mut self, node: &DocumentNode) -> Option<Action> {
        let id = self.key_part(node, &["id"], None);
        let id = id.or_else(|| self.require(node, &["id"], None))?;
        let patch = self.action_fields(node, &id);
        let kind = self.require(node, &["kind", "type"], Some(&id))?;
        Some(Action {
            id,
            kind,
            config: patch.config,
            access: patch.access,
        })
    }

    fn action_fields(&mut self, node: &DocumentNode, id: &str) -> ActionPatch {
        let mut config = Vec::new();
        for child in flatten(&node.children) {
            match canonical_tag(&child.tag) {
                "prop" | "param" => {
                    if let Some(prop) = self.prop(child, id) {
                        config.push(prop);
                    }
                }
                "access" => {}
                other => self.error(
                    ReasonCode::UnknownTag,
                    Some(id),
                    format!("unexpected <{}> in action", other),
                ),
            }
        }
        ActionPatch {
            kind: node.get_str(&["kind", "type"]),
            config,
            access: self.access(node, id),
        }
    }

    fn constant(&mut self, node: &DocumentNode) -> Option<(String, Value)> {
        let name = self.require(node, &["name"], None)?;
        match node.get(&["value"]) {
            Some(value) => Some((name, value.clone())),
            None => {
                self.require(node, &["value"], Some(&name));
                None
            }
        }
    }

    fn patch(&mut self, node: &DocumentNode) -> Option<Patch> {
        let target_id = self.require(node, &["id", "targetId"], None)?;
        let owner = Some(target_id.as_str());
        let raw_target = self.require(node, &["target"], owner)?;
        let raw_op = self.require(node, &["op", "operation"], owner)?;

        let Some(target) = parse_target(&raw_target) else {
            self.error(
                ReasonCode::UnknownKind,
                owner,
                format!("unknown patch target `{}`", raw_target),
            );
            return None;
        };
        let Some(operation) = parse_op(&raw_op) else {
            self.error(
                ReasonCode::UnknownKind,
                owner,
                format!("unknown patch operation `{}`", raw_op),
            );
            return None;
        };

        let payload_nodes = flatten(&node.children);
        let payload = match (operation, payload_nodes.as_slice()) {
            (PatchOp::Remove, []) => None,
            (PatchOp::Remove, _) => {
                self.error(ReasonCode::MalformedNode, owner, "remove patches carry no payload");
                return None;
            }
            (_, [single]) => Some(self.payload(single, target, &target_id)?),
            (_, _) => {
                self.error(
                    ReasonCode::MalformedNode,
                    owner,
                    format!("{:?} patch needs exactly one <{}> payload", operation, target),
                );
                return None;
            }
        };

        Some(Patch {
            target,
            target_id,
            operation,
            payload,
        })
    }

    fn payload(&mut self, node: &DocumentNode, target: PatchTarget, target_id: &str) -> Option<PatchPayload> {
        if parse_target(canonical_tag(&node.tag)) != Some(target) {
            self.error(
                ReasonCode::MalformedNode,
                Some(target_id),
                format!("payload <{}> does not match patch target `{}`", node.tag, target),
            );
            return None;
        }
        let payload = match target {
            PatchTarget::Region => {
                let mut components = Vec::new();
                for child in flatten(&node.children) {
                    if canonical_tag(&child.tag) != "component" {
                        self.error(
                            ReasonCode::UnknownTag,
                            Some(target_id),
                            format!("unexpected <{}> in region payload", child.tag),
                        );
                        continue;
                    }
                    let Some(id) = self.require(child, &["id"], Some(target_id)) else {
                        continue;
                    };
                    components.push(self.component_fields(child, &id));
                }
                PatchPayload::Region(RegionPatch { components })
            }
            PatchTarget::Component => PatchPayload::Component(self.component_fields(node, target_id)),
            PatchTarget::DataSource => {
                let spec = if node.has(&["kind", "type"]) {
                    Some(self.data_source_spec(node, target_id)?)
                } else {
                    None
                };
                PatchPayload::DataSource(DataSourcePatch {
                    spec,
                    contract: self.contract(node, target_id),
                    access: self.access(node, target_id),
                })
            }
            PatchTarget::Action => PatchPayload::Action(self.action_fields(node, target_id)),
        };
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blueprint() -> DocumentNode {
        DocumentNode::new("blueprint")
            .attr("id", "home")
            .attr("module", "portal")
            .attr("route", "/home")
            .attr("schemaVersion", "1.0.0")
            .attr("contentVersion", "1.2.0")
    }

    #[test]
    fn test_transform_minimal_blueprint() {
        let doc = blueprint().child(
            DocumentNode::new("regions").child(
                DocumentNode::new("region").attr("id", "main").child(
                    DocumentNode::new("component")
                        .attr("id", "hero")
                        .attr("type", "Banner")
                        .attr("namespace", "core")
                        .child(DocumentNode::new("prop").attr("name", "title").attr("value", "Welcome")),
                ),
            ),
        );
        let page = Transformer::new().transform(&doc).unwrap();
        assert_eq!(page.kind, PageKind::Blueprint);
        assert_eq!(page.page_id.as_deref(), Some("home"));
        let hero = page.component("hero").unwrap();
        assert_eq!(hero.props[0].kind(), PropKind::Static);
        assert_eq!(hero.props[0].value, PropValue::Static { value: json!("Welcome") });
    }

    #[test]
    fn test_prop_kind_inference() {
        let doc = blueprint().child(
            DocumentNode::new("region").attr("id", "main").child(
                DocumentNode::new("widget")
                    .attr("type", "Stat")
                    .attr("namespace", "core")
                    .child(DocumentNode::new("prop").attr("name", "a").attr("bind", "stats.count"))
                    .child(
                        DocumentNode::new("prop")
                            .attr("name", "b")
                            .attr("source", "stats")
                            .attr("path", "totals.count"),
                    )
                    .child(DocumentNode::new("prop").attr("name", "c").attr("expression", "a + 1"))
                    .child(DocumentNode::new("prop").attr("name", "d").attr("action", "refresh")),
            ),
        );
        let page = Transformer::new().transform(&doc).unwrap();
        // positional id for components without one
        let component = page.component("main.0").unwrap();
        let kinds: Vec<_> = component.props.iter().map(Prop::kind).collect();
        assert_eq!(
            kinds,
            vec![PropKind::Binding, PropKind::Binding, PropKind::Expression, PropKind::Action]
        );
    }

    #[test]
    fn test_legacy_data_source_vocabulary() {
        let doc = blueprint()
            .child(
                DocumentNode::new("data-source")
                    .attr("id", "stats")
                    .attr("kind", "rest")
                    .attr("endpoint", "https://api.example.test/stats")
                    .attr("contract", json!({"count": "totals.count"})),
            )
            .child(
                DocumentNode::new("datasource")
                    .attr("id", "inline")
                    .attr("kind", "const")
                    .attr("value", json!({"x": 1})),
            );
        let page = Transformer::new().transform(&doc).unwrap();
        // sorted by id
        assert_eq!(page.data_sources[0].id, "inline");
        assert!(matches!(page.data_sources[0].spec, DataSourceSpec::Static { .. }));
        match &page.data_sources[1].spec {
            DataSourceSpec::Http { request } => {
                assert_eq!(request.method, "GET");
                assert_eq!(request.url, "https://api.example.test/stats");
            }
            other => panic!("expected http, got {:?}", other),
        }
        assert_eq!(page.data_sources[1].contract["count"], "totals.count");
    }

    #[test]
    fn test_unknown_kinds_rejected() {
        let doc = blueprint()
            .child(DocumentNode::new("dataSource").attr("id", "x").attr("kind", "carrier-pigeon"))
            .child(
                DocumentNode::new("region").attr("id", "main").child(
                    DocumentNode::new("component")
                        .attr("id", "c")
                        .attr("type", "T")
                        .attr("namespace", "n")
                        .child(DocumentNode::new("prop").attr("name", "p").attr("kind", "magic")),
                ),
            );
        let errors = Transformer::new().transform(&doc).unwrap_err();
        assert_eq!(errors.codes(), vec![ReasonCode::UnknownKind, ReasonCode::UnknownKind]);
    }

    #[test]
    fn test_missing_attributes_collected() {
        let doc = DocumentNode::new("blueprint").attr("id", "home").child(
            DocumentNode::new("region").attr("id", "main").child(DocumentNode::new("component")),
        );
        let errors = Transformer::new().transform(&doc).unwrap_err();
        assert!(errors.len() >= 6);
        assert!(errors.iter().all(|e| e.code == ReasonCode::MissingAttribute));
    }

    #[test]
    fn test_overlay_patches() {
        let doc = DocumentNode::new("overlay")
            .attr("extends", "home")
            .attr("module", "portal")
            .attr("route", "/home")
            .attr("tenant", "acme")
            .attr("schemaVersion", "1.0.0")
            .attr("contentVersion", "1.0.0")
            .child(
                DocumentNode::new("patch")
                    .attr("target", "component")
                    .attr("targetId", "hero")
                    .attr("operation", "merge")
                    .child(
                        DocumentNode::new("component")
                            .child(DocumentNode::new("prop").attr("name", "title").attr("value", "Hi")),
                    ),
            )
            .child(
                DocumentNode::new("patch")
                    .attr("target", "component")
                    .attr("id", "footer")
                    .attr("op", "remove"),
            );
        let page = Transformer::new().transform(&doc).unwrap();
        assert_eq!(page.extends.as_deref(), Some("home"));
        assert_eq!(page.scope.tenant.as_deref(), Some("acme"));
        assert_eq!(page.patches.len(), 2);
        assert_eq!(page.patches[0].operation, PatchOp::Merge);
        assert!(matches!(page.patches[0].payload, Some(PatchPayload::Component(_))));
        assert_eq!(page.patches[1].operation, PatchOp::Remove);
        assert!(page.patches[1].payload.is_none());
    }

    #[test]
    fn test_overlay_rejects_bare_content() {
        let doc = DocumentNode::new("overlay")
            .attr("extends", "home")
            .attr("module", "portal")
            .attr("route", "/home")
            .attr("tenant", "acme")
            .attr("schemaVersion", "1.0.0")
            .attr("contentVersion", "1.0.0")
            .child(DocumentNode::new("region").attr("id", "main"));
        let errors = Transformer::new().transform(&doc).unwrap_err();
        assert!(errors.has(ReasonCode::MalformedNode));
    }

    #[test]
    fn test_access_from_child_and_attrs() {
        let doc = blueprint().child(
            DocumentNode::new("region").attr("id", "main").child(
                DocumentNode::new("component")
                    .attr("id", "admin-panel")
                    .attr("type", "Panel")
                    .attr("namespace", "core")
                    .attr("deny", "guest, banned")
                    .child(DocumentNode::new("access").attr("allow", json!(["admin"]))),
            ),
        );
        let page = Transformer::new().transform(&doc).unwrap();
        let access = page.component("admin-panel").unwrap().access.clone().unwrap();
        // the <access> child wins over inline attributes
        assert_eq!(access.allow, Some(["admin".to_string()].into()));
        assert_eq!(access.deny, None);
    }

    #[test]
    fn test_separator_in_scope_rejected() {
        let doc = blueprint().attr("module", "a|b");
        let errors = Transformer::new().transform(&doc).unwrap_err();
        assert!(errors.has(ReasonCode::InvalidValue));
    }

    #[test]
    fn test_wildcard_scope_value_rejected() {
        let doc = DocumentNode::new("overlay")
            .attr("extends", "home")
            .attr("module", "portal")
            .attr("route", "/home")
            .attr("schemaVersion", "1.0.0")
            .attr("contentVersion", "1.0.0")
            .attr("tenant", "*");
        let errors = Transformer::new().transform(&doc).unwrap_err();
        assert!(errors.has(ReasonCode::InvalidValue));
        // a value merely containing `*` keeps its string form unambiguous
        let ok = blueprint().attr("route", "/files/*");
        assert!(Transformer::new().transform(&ok).is_ok());
    }
}
