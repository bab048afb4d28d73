//! Render Model - Evaluated Page
//!
//! Same shape as the merged page with RBAC-denied nodes dropped and every
//! prop reduced to a value, an unavailable marker, an error or an action ref.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::evaluator::EvaluationError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RenderValue {
    Ready { value: Value },
    /// Bound data could not be produced. Never silently defaulted.
    Unavailable { reason: String },
    Error { message: String },
    /// Reference to a visible action in `RenderModel::actions`.
    Action { action: String },
}

impl RenderValue {
    pub fn ready(value: Value) -> Self {
        RenderValue::Ready { value }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        RenderValue::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            RenderValue::Ready { value } => Some(value),
            _ => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, RenderValue::Unavailable { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderProp {
    pub name: String,
    #[serde(flatten)]
    pub value: RenderValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderComponent {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub props: Vec<RenderProp>,
}

impl RenderComponent {
    pub fn prop(&self, name: &str) -> Option<&RenderValue> {
        self.props.iter().find(|p| p.name == name).map(|p| &p.value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderRegion {
    pub id: String,
    pub components: Vec<RenderComponent>,
}

/// Fully resolved action descriptor. Never executed here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderAction {
    pub id: String,
    pub kind: String,
    pub config: Vec<RenderProp>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Ready,
    Denied,
    Failed { message: String },
    TimedOut { after_ms: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderModel {
    pub page_id: Option<String>,
    pub module: String,
    pub route: String,
    pub fingerprint: String,
    pub regions: Vec<RenderRegion>,
    pub actions: Vec<RenderAction>,
    pub constants: BTreeMap<String, Value>,
    /// Every data source the visible tree referenced.
    pub sources: BTreeMap<String, SourceStatus>,
    /// Per-node failures; the rest of the page still rendered.
    pub errors: Vec<EvaluationError>,
    /// Set when overlays were skipped and only the blueprint rendered.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl RenderModel {
    pub fn region(&self, id: &str) -> Option<&RenderRegion> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn component(&self, id: &str) -> Option<&RenderComponent> {
        self.regions
            .iter()
            .flat_map(|r| r.components.iter())
            .find(|c| c.id == id)
    }

    pub fn action(&self, id: &str) -> Option<&RenderAction> {
        self.actions.iter().find(|a| a.id == id)
    }

    pub fn prop(&self, component: &str, name: &str) -> Option<&RenderValue> {
        self.component(component)?.prop(name)
    }

    /// True when a data source failed or timed out during this evaluation.
    pub fn has_source_failures(&self) -> bool {
        self.errors.iter().any(|e| {
            matches!(
                e,
                EvaluationError::Timeout { .. } | EvaluationError::SourceFailed { .. }
            )
        })
    }
}
