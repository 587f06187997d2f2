//! Service record batch schema
//!
//! A batch is the already-resolved view of every declared service: its
//! kind, the services it depends on and, for groups, its members. Parsing
//! the human-authored definitions that produce a batch happens elsewhere.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root of a record batch file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceRecords {
    /// Record format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Service definitions (ordered map: declaration order is significant)
    #[serde(default)]
    pub services: IndexMap<String, RecordSpec>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Per-service fields as they appear in the batch file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordSpec {
    #[serde(default)]
    pub kind: ServiceKind,

    /// Services that must be up before this one starts
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Members of a bundle or module
    #[serde(default)]
    pub contents: Vec<String>,
}

/// Kind of a declared service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Long-running daemon held by the supervisor
    #[default]
    Classic,
    /// Run-to-completion up/down scripts
    Oneshot,
    /// Named set of services, no runtime identity
    Bundle,
    /// Composite service shipped with its own members, no runtime identity
    Module,
}

impl ServiceKind {
    /// Groups are settled by their members and never reach the supervisor
    pub fn is_group(&self) -> bool {
        matches!(self, ServiceKind::Bundle | ServiceKind::Module)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Classic => "classic",
            ServiceKind::Oneshot => "oneshot",
            ServiceKind::Bundle => "bundle",
            ServiceKind::Module => "module",
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One flattened dependency record, the input of the graph builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub kind: ServiceKind,
    pub depends_on: Vec<String>,
    pub contents: Vec<String>,
}

impl ServiceRecord {
    pub fn new(name: impl Into<String>, kind: ServiceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            depends_on: Vec::new(),
            contents: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn contents<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contents.extend(members.into_iter().map(Into::into));
        self
    }
}

impl ServiceRecords {
    /// Load records from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RecordsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| RecordsError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse records from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, RecordsError> {
        let records: ServiceRecords = serde_yaml::from_str(yaml)?;
        records.validate()?;
        Ok(records)
    }

    /// Check the fields the graph builder cannot reason about
    pub fn validate(&self) -> Result<(), RecordsError> {
        for (name, spec) in &self.services {
            if name.trim().is_empty() {
                return Err(RecordsError::Invalid("service name cannot be empty".to_string()));
            }
            if !spec.kind.is_group() && !spec.contents.is_empty() {
                return Err(RecordsError::Invalid(format!(
                    "service '{}' of kind {} cannot declare contents",
                    name, spec.kind
                )));
            }
        }
        Ok(())
    }

    /// Flatten into builder input, preserving declaration order
    pub fn to_records(&self) -> Vec<ServiceRecord> {
        self.services
            .iter()
            .map(|(name, spec)| ServiceRecord {
                name: name.clone(),
                kind: spec.kind,
                depends_on: spec.depends_on.clone(),
                contents: spec.contents.clone(),
            })
            .collect()
    }
}

/// Errors that can occur when loading a record batch
#[derive(Debug, thiserror::Error)]
pub enum RecordsError {
    #[error("Failed to read records file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse records: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid records: {0}")]
    Invalid(String),
}
