//! Compile Diagnostics - Node Id + Reason Code, Always
//!
//! Authors get every problem in one pass. Tooling matches on `ReasonCode`,
//! never on message text.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    // Structural (transformer)
    UnknownTag,
    MissingAttribute,
    UnknownKind,
    InvalidValue,
    MalformedNode,
    // Structural (validator)
    MissingPageId,
    DuplicateId,
    MissingScope,
    UnexpectedScope,
    // Referential
    UnknownDataSource,
    UnknownContractField,
    UnresolvedPath,
    UnknownAction,
    UnusedDataSource,
    MissingBlueprint,
    BlueprintMismatch,
    MissingOverlayTarget,
    IncompletePatch,
    // Versioning
    InvalidSemver,
    VersionRegression,
    VersionNotBumped,
    // Access control
    EmptyRoleList,
    AmbiguousRole,
    // Expressions
    InvalidExpression,
    UnknownIdentifier,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::UnknownTag => "unknown_tag",
            ReasonCode::MissingAttribute => "missing_attribute",
            ReasonCode::UnknownKind => "unknown_kind",
            ReasonCode::InvalidValue => "invalid_value",
            ReasonCode::MalformedNode => "malformed_node",
            ReasonCode::MissingPageId => "missing_page_id",
            ReasonCode::DuplicateId => "duplicate_id",
            ReasonCode::MissingScope => "missing_scope",
            ReasonCode::UnexpectedScope => "unexpected_scope",
            ReasonCode::UnknownDataSource => "unknown_data_source",
            ReasonCode::UnknownContractField => "unknown_contract_field",
            ReasonCode::UnresolvedPath => "unresolved_path",
            ReasonCode::UnknownAction => "unknown_action",
            ReasonCode::UnusedDataSource => "unused_data_source",
            ReasonCode::MissingBlueprint => "missing_blueprint",
            ReasonCode::BlueprintMismatch => "blueprint_mismatch",
            ReasonCode::MissingOverlayTarget => "missing_overlay_target",
            ReasonCode::IncompletePatch => "incomplete_patch",
            ReasonCode::InvalidSemver => "invalid_semver",
            ReasonCode::VersionRegression => "version_regression",
            ReasonCode::VersionNotBumped => "version_not_bumped",
            ReasonCode::EmptyRoleList => "empty_role_list",
            ReasonCode::AmbiguousRole => "ambiguous_role",
            ReasonCode::InvalidExpression => "invalid_expression",
            ReasonCode::UnknownIdentifier => "unknown_identifier",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("[{code}] {}: {message}", .node_id.as_deref().unwrap_or("<page>"))]
pub struct CompileError {
    pub code: ReasonCode,
    /// Offending node; `None` for page-level problems.
    pub node_id: Option<String>,
    pub message: String,
}

impl CompileError {
    pub fn new(code: ReasonCode, node_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code,
            node_id: node_id.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn at(code: ReasonCode, node_id: &str, message: impl Into<String>) -> Self {
        Self::new(code, Some(node_id), message)
    }

    pub fn page(code: ReasonCode, message: impl Into<String>) -> Self {
        Self::new(code, None, message)
    }
}

/// Non-empty list of compile errors for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompileErrors(pub Vec<CompileError>);

impl CompileErrors {
    pub fn codes(&self) -> Vec<ReasonCode> {
        self.0.iter().map(|e| e.code).collect()
    }

    pub fn has(&self, code: ReasonCode) -> bool {
        self.0.iter().any(|e| e.code == code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompileError> {
        self.0.iter()
    }
}

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<_> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{} compile error(s): {}", self.0.len(), messages.join("; "))
    }
}

impl std::error::Error for CompileErrors {}

impl From<Vec<CompileError>> for CompileErrors {
    fn from(errors: Vec<CompileError>) -> Self {
        Self(errors)
    }
}
