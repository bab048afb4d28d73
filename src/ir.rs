//! Canonical IR - The Contract Every Stage Reads
//!
//! Produced by the transformer, checked by the validator, hashed by the
//! compiler and folded by the resolver. Nothing here knows about authoring
//! syntax.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    Blueprint,
    Overlay,
}

impl PageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PageKind::Blueprint => "blueprint",
            PageKind::Overlay => "overlay",
        }
    }
}

/// Scoping attributes. Blueprints leave all of them empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl Scope {
    pub fn is_empty(&self) -> bool {
        self.dimensions() == 0
    }

    /// Number of scoping dimensions that are set.
    pub fn dimensions(&self) -> usize {
        [&self.tenant, &self.role, &self.variant, &self.locale]
            .iter()
            .filter(|d| d.is_some())
            .count()
    }
}

/// Root node of a compiled document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageDefinition {
    pub kind: PageKind,
    pub schema_version: String,
    pub content_version: String,
    pub module: String,
    pub route: String,
    #[serde(default)]
    pub scope: Scope,
    /// Blueprint page id; the join key overlays reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    /// Overlays only: the blueprint page id they patch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default)]
    pub regions: Vec<Region>,
    /// Sorted by id.
    #[serde(default)]
    pub data_sources: Vec<DataSource>,
    /// Sorted by id.
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub constants: BTreeMap<String, Value>,
    #[serde(default)]
    pub patches: Vec<Patch>,
}

impl PageDefinition {
    pub fn layer_key(&self) -> LayerKey {
        LayerKey {
            kind: self.kind,
            module: self.module.clone(),
            route: self.route.clone(),
            tenant: self.scope.tenant.clone(),
            role: self.scope.role.clone(),
            variant: self.scope.variant.clone(),
            locale: self.scope.locale.clone(),
        }
    }

    pub fn region(&self, id: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn component(&self, id: &str) -> Option<&Component> {
        self.components().find(|c| c.id == id)
    }

    pub fn data_source(&self, id: &str) -> Option<&DataSource> {
        self.data_sources.iter().find(|d| d.id == id)
    }

    pub fn action(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.regions.iter().flat_map(|r| r.components.iter())
    }

    /// Ids declared by this page, per namespace.
    pub fn declared_ids(&self) -> DeclaredIds {
        let mut ids = DeclaredIds::default();
        for region in &self.regions {
            ids.regions.insert(region.id.clone());
            for component in &region.components {
                ids.components.insert(component.id.clone());
            }
        }
        ids.data_sources.extend(self.data_sources.iter().map(|d| d.id.clone()));
        ids.actions.extend(self.actions.iter().map(|a| a.id.clone()));
        ids
    }

    /// Build the alias table bindings resolve through.
    pub fn contract_table(&self) -> ContractTable {
        let mut table = ContractTable::default();
        for source in &self.data_sources {
            for (alias, path) in &source.contract {
                table.entries.insert(
                    format!("{}.{}", source.id, alias),
                    ContractTarget {
                        source: source.id.clone(),
                        path: path.clone(),
                    },
                );
            }
        }
        table
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredIds {
    pub regions: BTreeSet<String>,
    pub components: BTreeSet<String>,
    pub data_sources: BTreeSet<String>,
    pub actions: BTreeSet<String>,
}

impl DeclaredIds {
    pub fn set(&self, target: PatchTarget) -> &BTreeSet<String> {
        match target {
            PatchTarget::Region => &self.regions,
            PatchTarget::Component => &self.components,
            PatchTarget::DataSource => &self.data_sources,
            PatchTarget::Action => &self.actions,
        }
    }

    pub fn set_mut(&mut self, target: PatchTarget) -> &mut BTreeSet<String> {
        match target {
            PatchTarget::Region => &mut self.regions,
            PatchTarget::Component => &mut self.components,
            PatchTarget::DataSource => &mut self.data_sources,
            PatchTarget::Action => &mut self.actions,
        }
    }

    pub fn contains(&self, target: PatchTarget, id: &str) -> bool {
        self.set(target).contains(id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Region {
    pub id: String,
    #[serde(default)]
    pub components: Vec<Component>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Component {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub props: Vec<Prop>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessRule>,
}

impl Component {
    pub fn prop(&self, name: &str) -> Option<&Prop> {
        self.props.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PropKind {
    Static,
    Binding,
    Expression,
    Action,
}

impl FromStr for PropKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(PropKind::Static),
            "binding" => Ok(PropKind::Binding),
            "expression" => Ok(PropKind::Expression),
            "action" => Ok(PropKind::Action),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prop {
    pub name: String,
    #[serde(flatten)]
    pub value: PropValue,
}

impl Prop {
    pub fn static_value(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value: PropValue::Static { value },
        }
    }

    pub fn kind(&self) -> PropKind {
        self.value.kind()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PropValue {
    Static { value: Value },
    Binding { binding: Binding },
    Expression { source: String },
    Action { action: String },
}

impl PropValue {
    pub fn kind(&self) -> PropKind {
        match self {
            PropValue::Static { .. } => PropKind::Static,
            PropValue::Binding { .. } => PropKind::Binding,
            PropValue::Expression { .. } => PropKind::Expression,
            PropValue::Action { .. } => PropKind::Action,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Binding {
    /// `dataSourceId.alias`, resolved through the data source's contract.
    Contract { contract: String },
    /// Direct read of `path` inside `source`.
    Path { source: String, path: String },
}

impl Binding {
    /// Data source id this binding reads from.
    pub fn source_id(&self) -> &str {
        match self {
            Binding::Contract { contract } => contract.split('.').next().unwrap_or(contract),
            Binding::Path { source, .. } => source,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSource {
    pub id: String,
    #[serde(flatten)]
    pub spec: DataSourceSpec,
    /// alias -> field path inside the payload
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contract: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessRule>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceKind {
    Static,
    Http,
    Service,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DataSourceSpec {
    Static {
        data: Value,
    },
    Http {
        request: HttpRequest,
    },
    Service {
        handler: String,
        #[serde(default)]
        args: Value,
        #[serde(default, rename = "timeoutMs", skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
}

impl DataSourceSpec {
    pub fn kind(&self) -> DataSourceKind {
        match self {
            DataSourceSpec::Static { .. } => DataSourceKind::Static,
            DataSourceSpec::Http { .. } => DataSourceKind::Http,
            DataSourceSpec::Service { .. } => DataSourceKind::Service,
        }
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        match self {
            DataSourceSpec::Static { .. } => None,
            DataSourceSpec::Http { request } => request.timeout_ms,
            DataSourceSpec::Service { timeout_ms, .. } => *timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub config: Vec<Prop>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessRule>,
}

/// RBAC directive. `None` lists mean "not declared"; an empty declared list is
/// a validation error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny: Option<BTreeSet<String>>,
    /// Entitlement flags that must all be held.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub requires: BTreeSet<String>,
}

impl AccessRule {
    pub fn permits(&self, roles: &BTreeSet<String>, entitlements: &BTreeSet<String>) -> bool {
        if let Some(deny) = &self.deny {
            if deny.iter().any(|r| roles.contains(r)) {
                return false;
            }
        }
        if let Some(allow) = &self.allow {
            if !allow.iter().any(|r| roles.contains(r)) {
                return false;
            }
        }
        self.requires.is_subset(entitlements)
    }
}

/// Visibility for an optional directive: absent means visible.
pub fn is_visible(
    access: Option<&AccessRule>,
    roles: &BTreeSet<String>,
    entitlements: &BTreeSet<String>,
) -> bool {
    access.map_or(true, |rule| rule.permits(roles, entitlements))
}

// --- Overlay patches ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum PatchTarget {
    Region,
    Component,
    DataSource,
    Action,
}

impl PatchTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            PatchTarget::Region => "region",
            PatchTarget::Component => "component",
            PatchTarget::DataSource => "dataSource",
            PatchTarget::Action => "action",
        }
    }
}

impl fmt::Display for PatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Merge,
    Replace,
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    pub target: PatchTarget,
    pub target_id: String,
    pub operation: PatchOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<PatchPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "node", rename_all = "camelCase")]
pub enum PatchPayload {
    Region(RegionPatch),
    Component(ComponentPatch),
    DataSource(DataSourcePatch),
    Action(ActionPatch),
}

impl PatchPayload {
    pub fn target(&self) -> PatchTarget {
        match self {
            PatchPayload::Region(_) => PatchTarget::Region,
            PatchPayload::Component(_) => PatchTarget::Component,
            PatchPayload::DataSource(_) => PatchTarget::DataSource,
            PatchPayload::Action(_) => PatchTarget::Action,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegionPatch {
    #[serde(default)]
    pub components: Vec<ComponentPatch>,
}

/// Partial component. Fields left `None` keep the base value on merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComponentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub props: Vec<Prop>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessRule>,
}

impl ComponentPatch {
    /// Full component when the patch carries every required field.
    pub fn to_component(&self, id: &str) -> Option<Component> {
        Some(Component {
            id: id.to_string(),
            type_name: self.type_name.clone()?,
            namespace: self.namespace.clone()?,
            version: self.version.clone(),
            props: self.props.clone(),
            access: self.access.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DataSourcePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<DataSourceSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contract: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub config: Vec<Prop>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessRule>,
}

// --- Contract aliases ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractTarget {
    pub source: String,
    pub path: String,
}

/// `dataSourceId.alias -> (dataSourceId, path)`, a plain map lookup at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractTable {
    pub entries: BTreeMap<String, ContractTarget>,
}

impl ContractTable {
    pub fn lookup(&self, alias: &str) -> Option<&ContractTarget> {
        self.entries.get(alias)
    }

    /// Concrete `(source, path)` for any binding.
    pub fn target_of(&self, binding: &Binding) -> Option<ContractTarget> {
        match binding {
            Binding::Contract { contract } => self.lookup(contract).cloned(),
            Binding::Path { source, path } => Some(ContractTarget {
                source: source.clone(),
                path: path.clone(),
            }),
        }
    }
}

// --- Layer keys ---

/// `(kind, module, route, tenant?, role?, variant?, locale?)` identifying one compiled document.
///
/// Serialized as `kind|module|route|tenant|role|variant|locale` with `*` for unset
/// dimensions, so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct LayerKey {
    pub kind: PageKind,
    pub module: String,
    pub route: String,
    pub tenant: Option<String>,
    pub role: Option<String>,
    pub variant: Option<String>,
    pub locale: Option<String>,
}

pub const LAYER_KEY_SEPARATOR: char = '|';
/// Stands for an unset scope dimension in the string form.
pub const WILDCARD: &str = "*";

impl LayerKey {
    pub fn blueprint(module: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            kind: PageKind::Blueprint,
            module: module.into(),
            route: route.into(),
            tenant: None,
            role: None,
            variant: None,
            locale: None,
        }
    }

    pub fn scope(&self) -> Scope {
        Scope {
            tenant: self.tenant.clone(),
            role: self.role.clone(),
            variant: self.variant.clone(),
            locale: self.locale.clone(),
        }
    }
}

impl fmt::Display for LayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dim = |d: &Option<String>| d.clone().unwrap_or_else(|| WILDCARD.to_string());
        write!(
            f,
            "{}|{}|{}|{}|{}|{}|{}",
            self.kind.as_str(),
            self.module,
            self.route,
            dim(&self.tenant),
            dim(&self.role),
            dim(&self.variant),
            dim(&self.locale),
        )
    }
}

impl FromStr for LayerKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(LAYER_KEY_SEPARATOR).collect();
        if parts.len() != 7 {
            return Err(format!("layer key needs 7 segments, got {}: {}", parts.len(), s));
        }
        let kind = match parts[0] {
            "blueprint" => PageKind::Blueprint,
            "overlay" => PageKind::Overlay,
            other => return Err(format!("unknown layer kind: {}", other)),
        };
        let dim = |p: &str| (p != WILDCARD).then(|| p.to_string());
        Ok(Self {
            kind,
            module: parts[1].to_string(),
            route: parts[2].to_string(),
            tenant: dim(parts[3]),
            role: dim(parts[4]),
            variant: dim(parts[5]),
            locale: dim(parts[6]),
        })
    }
}

impl From<LayerKey> for String {
    fn from(key: LayerKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for LayerKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
