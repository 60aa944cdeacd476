//! Feature availability and installable custom nodes
//!
//! A feature is an identifier that gates parameters and workflow steps until
//! the external node backing it is installed on the backend.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

/// Subfolder of the ComfyUI backend where downloaded custom nodes live
pub const DOWNLOADED_NODES_DIR: &str = "DLNodes";

/// Set of feature ids available on the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(BTreeSet<String>);

impl FeatureSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a feature is available
    pub fn contains(&self, feature: &str) -> bool {
        self.0.contains(feature)
    }

    /// Mark a feature as available
    pub fn insert(&mut self, feature: impl Into<String>) -> bool {
        self.0.insert(feature.into())
    }

    /// Mark a feature as unavailable
    pub fn remove(&mut self, feature: &str) -> bool {
        self.0.remove(feature)
    }

    /// Add every feature of `other`
    pub fn union_with(&mut self, other: &FeatureSet) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Iterate feature ids in order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Whether no feature is available
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// A custom node the user can be prompted to install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallableFeature {
    /// Name shown in the install prompt
    pub display_name: String,
    /// Feature id the installation provides
    pub feature_id: String,
    /// Source repository
    pub url: String,
    /// Node author
    pub author: String,
    /// Confirmation text shown before installing
    pub notice: String,
}

/// Maps node class name prefixes to the feature that provides them
#[derive(Debug, Clone, Default)]
pub struct NodeFeatureMap {
    prefixes: BTreeMap<String, String>,
}

impl NodeFeatureMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that node classes starting with `prefix` require `feature`
    pub fn insert(&mut self, prefix: impl Into<String>, feature: impl Into<String>) {
        self.prefixes.insert(prefix.into(), feature.into());
    }

    /// Feature required by a node class, if any
    pub fn feature_for(&self, node_type: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|(prefix, _)| node_type.starts_with(prefix.as_str()))
            .map(|(_, feature)| feature.as_str())
    }

    /// Features provided by the node classes a backend reports
    pub fn features_for_nodes<'a>(
        &self,
        node_types: impl IntoIterator<Item = &'a str>,
    ) -> FeatureSet {
        node_types
            .into_iter()
            .filter_map(|node| self.feature_for(node))
            .collect()
    }
}

/// Features assumed available before the backend has reported its nodes
#[derive(Debug, Clone, Default)]
pub struct FeatureRegistry {
    /// Features currently considered available
    pub supported: FeatureSet,
    /// Features to drop again if the backend does not report their nodes
    pub discard_if_not_found: FeatureSet,
    /// Node class to feature mapping
    pub node_map: NodeFeatureMap,
    /// Features that can be installed on demand
    pub installable: Vec<InstallableFeature>,
}

impl FeatureRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an installable feature, replacing one with the same id
    pub fn register_installable(&mut self, feature: InstallableFeature) {
        self.installable.retain(|f| f.feature_id != feature.feature_id);
        self.installable.push(feature);
    }

    /// Look up an installable feature by id
    pub fn installable(&self, feature_id: &str) -> Option<&InstallableFeature> {
        self.installable.iter().find(|f| f.feature_id == feature_id)
    }

    /// Optimistically mark `feature` as supported when its node folder
    /// already exists under the backend. Returns whether it was found.
    pub fn detect_installed(
        &mut self,
        backend_folder: &Path,
        node_folder: &str,
        feature: &str,
    ) -> bool {
        let path = backend_folder.join(DOWNLOADED_NODES_DIR).join(node_folder);
        if path.is_dir() {
            info!(
                "Found {} at {:?}, assuming '{}' is installed",
                node_folder, path, feature
            );
            self.supported.insert(feature);
            self.discard_if_not_found.insert(feature);
            true
        } else {
            debug!("{:?} not present, '{}' stays unavailable", path, feature);
            false
        }
    }

    /// Features available given the node classes a backend reports.
    ///
    /// Features derived from the reported nodes are added. Features that
    /// were only assumed via [`detect_installed`](Self::detect_installed)
    /// and are missing from the report are left out. The registry itself is
    /// not modified.
    pub fn resolve<'a>(&self, node_types: impl IntoIterator<Item = &'a str>) -> FeatureSet {
        let reported = self.node_map.features_for_nodes(node_types);
        let mut features = self.supported.clone();
        for feature in self.discard_if_not_found.iter() {
            if !reported.contains(feature) {
                debug!("Backend does not report '{}', discarding", feature);
                features.remove(feature);
            }
        }
        features.union_with(&reported);
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn map() -> NodeFeatureMap {
        let mut map = NodeFeatureMap::new();
        map.insert("Skimmed CFG", "skimmedcfg");
        map
    }

    #[test]
    fn test_feature_for_prefix() {
        let map = map();
        assert_eq!(map.feature_for("Skimmed CFG - Timed flip"), Some("skimmedcfg"));
        assert_eq!(map.feature_for("KSampler"), None);

        let features = map.features_for_nodes(["KSampler", "Skimmed CFG"]);
        assert!(features.contains("skimmedcfg"));
        assert_eq!(features.iter().count(), 1);
    }

    #[test]
    fn test_detect_installed() {
        let dir = TempDir::new().unwrap();
        let mut registry = FeatureRegistry::new();

        assert!(!registry.detect_installed(dir.path(), "Skimmed_CFG", "skimmedcfg"));
        assert!(registry.supported.is_empty());

        std::fs::create_dir_all(dir.path().join(DOWNLOADED_NODES_DIR).join("Skimmed_CFG"))
            .unwrap();
        assert!(registry.detect_installed(dir.path(), "Skimmed_CFG", "skimmedcfg"));
        assert!(registry.supported.contains("skimmedcfg"));
        assert!(registry.discard_if_not_found.contains("skimmedcfg"));
    }

    #[test]
    fn test_resolve_discards_missing() {
        let mut registry = FeatureRegistry::new();
        registry.node_map = map();
        registry.supported.insert("skimmedcfg");
        registry.discard_if_not_found.insert("skimmedcfg");

        let features = registry.resolve(["KSampler"]);
        assert!(!features.contains("skimmedcfg"));
        // The assumed feature survives for the next resolution
        assert!(registry.supported.contains("skimmedcfg"));

        let features = registry.resolve(["KSampler", "Skimmed CFG"]);
        assert!(features.contains("skimmedcfg"));
    }

    #[test]
    fn test_resolve_adds_reported_without_storing() {
        let mut registry = FeatureRegistry::new();
        registry.node_map = map();

        assert!(registry.resolve(["Skimmed CFG - replace"]).contains("skimmedcfg"));
        assert!(registry.supported.is_empty());
    }

    #[test]
    fn test_register_installable_replaces() {
        let mut registry = FeatureRegistry::new();
        let feature = InstallableFeature {
            display_name: "A".into(),
            feature_id: "a".into(),
            url: String::new(),
            author: String::new(),
            notice: String::new(),
        };
        registry.register_installable(feature.clone());
        registry.register_installable(InstallableFeature {
            display_name: "A2".into(),
            ..feature
        });
        assert_eq!(registry.installable.len(), 1);
        assert_eq!(registry.installable("a").unwrap().display_name, "A2");
    }
}
