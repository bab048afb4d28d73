//! Authored Documents - Generic Node Trees
//!
//! Markup parsing is done upstream; documents arrive here already
//! deserialized as `DocumentNode` trees (JSON on disk).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentNode {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, Value>,
    #[serde(default)]
    pub children: Vec<DocumentNode>,
}

impl DocumentNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    /// Builder-style attribute setter.
    pub fn attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    /// Builder-style child append.
    pub fn child(mut self, node: DocumentNode) -> Self {
        self.children.push(node);
        self
    }

    /// First present attribute among `names` (current name first, legacy aliases after).
    pub fn get(&self, names: &[&str]) -> Option<&Value> {
        names.iter().find_map(|n| self.attrs.get(*n))
    }

    /// String attribute, trimmed. Numbers and booleans are stringified.
    pub fn get_str(&self, names: &[&str]) -> Option<String> {
        match self.get(names)? {
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn has(&self, names: &[&str]) -> bool {
        self.get(names).is_some()
    }
}

/// A named source document, as loaded from disk.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub root: DocumentNode,
}

/// Loads and holds authored documents.
pub struct DocumentSet {
    documents: Vec<SourceDocument>,
}

impl DocumentSet {
    pub fn new() -> Self {
        Self { documents: Vec::new() }
    }

    pub fn read_file(path: &Path) -> Result<DocumentNode, DocumentError> {
        let content = fs::read_to_string(path).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| DocumentError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load every `*.json` document in `dir`, sorted by file name.
    /// A file that fails to parse fails the whole load.
    pub fn load_from_dir(dir: &Path) -> Result<Self, DocumentError> {
        let io = |source| DocumentError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(io)? {
            let path = entry.map_err(io)?.path();
            if path.extension().map_or(false, |e| e == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut set = Self::new();
        for path in paths {
            let root = Self::read_file(&path)?;
            debug!(path = %path.display(), tag = %root.tag, "Loaded document");
            set.push(path, root);
        }
        Ok(set)
    }

    pub fn push(&mut self, path: PathBuf, root: DocumentNode) {
        self.documents.push(SourceDocument { path, root });
    }

    pub fn list(&self) -> &[SourceDocument] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Blueprints first, so overlays can compile against them.
    pub fn in_compile_order(&self) -> Vec<&SourceDocument> {
        let mut docs: Vec<_> = self.documents.iter().collect();
        docs.sort_by_key(|d| d.root.tag != "blueprint");
        docs
    }
}

impl Default for DocumentSet {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
