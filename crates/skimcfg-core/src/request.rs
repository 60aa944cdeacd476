//! Generation request files
//!
//! A request carries the user's parameter values plus either the features
//! available on the backend or the node classes it reports.

use crate::error::{Result, SkimError};
use crate::feature::{FeatureRegistry, FeatureSet};
use crate::param::{ParamRegistry, ParamValueSet};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Maximum allowed request file size (1 MiB)
pub const MAX_REQUEST_FILE_SIZE: u64 = 1024 * 1024;

/// A generation request as read from disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Parameter values keyed by id or display name
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    /// Features available on the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
    /// Node classes reported by the backend; takes precedence over `features`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_types: Option<Vec<String>>,
}

impl GenerationRequest {
    /// Parse from a JSON string
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_limit(path, MAX_REQUEST_FILE_SIZE)
    }

    fn load_with_limit(path: &Path, limit: u64) -> Result<Self> {
        let size = std::fs::metadata(path)?.len();
        if size > limit {
            return Err(SkimError::RequestTooLarge { size, limit });
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Validated parameter values
    pub fn values(&self, registry: &ParamRegistry) -> Result<ParamValueSet> {
        ParamValueSet::from_json(registry, &self.params)
    }

    /// Features to generate with. Reported node classes are resolved
    /// against the registry; otherwise the listed features are used as-is,
    /// and without either the registry's startup view applies.
    pub fn resolve_features(&self, features: &FeatureRegistry) -> FeatureSet {
        if let Some(node_types) = &self.node_types {
            return features.resolve(node_types.iter().map(String::as_str));
        }
        match &self.features {
            Some(listed) => listed.iter().map(String::as_str).collect(),
            None => features.supported.clone(),
        }
    }
}
