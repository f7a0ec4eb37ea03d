//! Labware definitions, locations and definition lookup.
//!
//! Definitions are looked up by load name, namespace and version.
//! [`FsLabwareResolver`] reads them from a directory tree laid out as
//! `<root>/<namespace>/<load_name>/<version>.json`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_NAMESPACE: &str = "opentrons";

pub type LabwareId = String;

// =============================================================================
// Definitions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabwareDimensions {
    pub x_dimension: f64,
    pub y_dimension: f64,
    pub z_dimension: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabwareParameters {
    pub load_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabwareMetadata {
    #[serde(default)]
    pub display_name: String,
}

/// The subset of a labware definition file this crate reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabwareDefinition {
    pub namespace: String,
    pub version: u32,
    pub parameters: LabwareParameters,
    #[serde(default)]
    pub metadata: LabwareMetadata,
    pub dimensions: LabwareDimensions,
}

impl LabwareDefinition {
    pub fn load_name(&self) -> &str {
        &self.parameters.load_name
    }

    /// `namespace/load_name/version`
    pub fn uri(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.load_name(), self.version)
    }

    /// Overall height in mm.
    pub fn height(&self) -> f64 {
        self.dimensions.z_dimension
    }
}

/// Load name plus optional namespace and version, as given in a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabwareLoadParams {
    pub load_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl LabwareLoadParams {
    pub fn new(load_name: impl Into<String>) -> Self {
        Self {
            load_name: load_name.into(),
            namespace: None,
            version: None,
        }
    }

    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }
}

// =============================================================================
// Locations
// =============================================================================

/// Where a labware instance currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LabwareLocation {
    #[serde(rename_all = "camelCase")]
    Slot { slot_name: String },
    /// On the stacker's shuttle platform, reachable by the gripper.
    #[serde(rename_all = "camelCase")]
    OnModule { module_id: String },
    /// Inside the stacker's hopper.
    #[serde(rename_all = "camelCase")]
    InStackerHopper { module_id: String },
    OffDeck,
}

// =============================================================================
// Resolution
// =============================================================================

#[derive(Error, Debug)]
pub enum LabwareError {
    #[error("Labware definition not found: {namespace}/{load_name}/{version}")]
    NotFound {
        namespace: String,
        load_name: String,
        version: String,
    },

    #[error("Failed to read labware definition {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid labware definition {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Labware definition {path} does not match request: {reason}")]
    Mismatch { path: PathBuf, reason: String },
}

impl LabwareError {
    fn not_found(params: &LabwareLoadParams) -> Self {
        LabwareError::NotFound {
            namespace: params.namespace_or_default().to_string(),
            load_name: params.load_name.clone(),
            version: params
                .version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "latest".to_string()),
        }
    }
}

/// Finds the full definition for a load name.
pub trait LabwareResolver: Send + Sync {
    fn resolve(&self, params: &LabwareLoadParams) -> Result<LabwareDefinition, LabwareError>;
}

/// Resolver over definitions held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLabwareResolver {
    definitions: HashMap<(String, String), Vec<LabwareDefinition>>,
}

impl InMemoryLabwareResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definition(mut self, definition: LabwareDefinition) -> Self {
        self.insert(definition);
        self
    }

    pub fn insert(&mut self, definition: LabwareDefinition) {
        let key = (
            definition.namespace.clone(),
            definition.load_name().to_string(),
        );
        self.definitions.entry(key).or_default().push(definition);
    }
}

impl LabwareResolver for InMemoryLabwareResolver {
    fn resolve(&self, params: &LabwareLoadParams) -> Result<LabwareDefinition, LabwareError> {
        let key = (
            params.namespace_or_default().to_string(),
            params.load_name.clone(),
        );
        let candidates = self
            .definitions
            .get(&key)
            .ok_or_else(|| LabwareError::not_found(params))?;

        let found = match params.version {
            Some(version) => candidates.iter().find(|d| d.version == version),
            None => candidates.iter().max_by_key(|d| d.version),
        };
        found.cloned().ok_or_else(|| LabwareError::not_found(params))
    }
}

/// Resolver over `<root>/<namespace>/<load_name>/<version>.json`.
///
/// Without a version the highest numbered file wins.
#[derive(Debug, Clone)]
pub struct FsLabwareResolver {
    root: PathBuf,
}

impl FsLabwareResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn latest_version(dir: &Path) -> Result<Option<u32>, LabwareError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(LabwareError::Io {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        };

        let mut latest = None;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(version) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
            {
                latest = latest.max(Some(version));
            }
        }
        Ok(latest)
    }
}

impl LabwareResolver for FsLabwareResolver {
    fn resolve(&self, params: &LabwareLoadParams) -> Result<LabwareDefinition, LabwareError> {
        let namespace = params.namespace_or_default();
        let dir = self.root.join(namespace).join(&params.load_name);

        let version = match params.version {
            Some(v) => v,
            None => Self::latest_version(&dir)?.ok_or_else(|| LabwareError::not_found(params))?,
        };
        let path = dir.join(format!("{version}.json"));

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LabwareError::not_found(params))
            }
            Err(source) => return Err(LabwareError::Io { path, source }),
        };
        let definition: LabwareDefinition = serde_json::from_str(&raw)
            .map_err(|source| LabwareError::Parse {
                path: path.clone(),
                source,
            })?;

        if definition.load_name() != params.load_name
            || definition.namespace != namespace
            || definition.version != version
        {
            return Err(LabwareError::Mismatch {
                path,
                reason: format!("file declares {}", definition.uri()),
            });
        }

        tracing::debug!(uri = %definition.uri(), "Resolved labware definition");
        Ok(definition)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn definition(load_name: &str, version: u32, height: f64) -> LabwareDefinition {
        LabwareDefinition {
            namespace: DEFAULT_NAMESPACE.to_string(),
            version,
            parameters: LabwareParameters {
                load_name: load_name.to_string(),
            },
            metadata: LabwareMetadata {
                display_name: load_name.to_string(),
            },
            dimensions: LabwareDimensions {
                x_dimension: 127.76,
                y_dimension: 85.48,
                z_dimension: height,
            },
        }
    }

    fn write_definition(root: &Path, definition: &LabwareDefinition) {
        let dir = root
            .join(&definition.namespace)
            .join(definition.load_name());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(format!("{}.json", definition.version)),
            serde_json::to_string(definition).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_fs_resolver_picks_latest_version() {
        let root = tempfile::tempdir().unwrap();
        write_definition(root.path(), &definition("tiprack_1000ul", 1, 99.0));
        write_definition(root.path(), &definition("tiprack_1000ul", 2, 98.5));

        let resolver = FsLabwareResolver::new(root.path());
        let latest = resolver
            .resolve(&LabwareLoadParams::new("tiprack_1000ul"))
            .unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.height(), 98.5);

        let pinned = resolver
            .resolve(&LabwareLoadParams {
                version: Some(1),
                ..LabwareLoadParams::new("tiprack_1000ul")
            })
            .unwrap();
        assert_eq!(pinned.version, 1);
    }

    #[test]
    fn test_fs_resolver_missing_definition() {
        let root = tempfile::tempdir().unwrap();
        let resolver = FsLabwareResolver::new(root.path());
        let err = resolver
            .resolve(&LabwareLoadParams::new("does_not_exist"))
            .unwrap_err();
        assert!(matches!(err, LabwareError::NotFound { .. }));
        assert!(err.to_string().contains("opentrons/does_not_exist/latest"));
    }

    #[test]
    fn test_fs_resolver_rejects_mismatched_file() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("opentrons").join("plate_a");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("1.json"),
            serde_json::to_string(&definition("plate_b", 1, 10.0)).unwrap(),
        )
        .unwrap();

        let err = FsLabwareResolver::new(root.path())
            .resolve(&LabwareLoadParams::new("plate_a"))
            .unwrap_err();
        assert!(matches!(err, LabwareError::Mismatch { .. }));
    }

    #[test]
    fn test_fs_resolver_invalid_json() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("custom").join("plate");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("3.json"), "{ not json").unwrap();

        let err = FsLabwareResolver::new(root.path())
            .resolve(&LabwareLoadParams {
                load_name: "plate".into(),
                namespace: Some("custom".into()),
                version: Some(3),
            })
            .unwrap_err();
        assert!(matches!(err, LabwareError::Parse { .. }));
    }

    #[test]
    fn test_in_memory_resolver() {
        let resolver = InMemoryLabwareResolver::new()
            .with_definition(definition("plate", 1, 14.0))
            .with_definition(definition("plate", 3, 15.0));
        assert_eq!(
            resolver
                .resolve(&LabwareLoadParams::new("plate"))
                .unwrap()
                .version,
            3
        );
        assert!(resolver
            .resolve(&LabwareLoadParams {
                namespace: Some("custom".into()),
                ..LabwareLoadParams::new("plate")
            })
            .is_err());
    }

    #[test]
    fn test_location_serialization() {
        let location = LabwareLocation::InStackerHopper {
            module_id: "stacker-1".into(),
        };
        let json = serde_json::to_value(&location).unwrap();
        assert_eq!(json["kind"], "inStackerHopper");
        assert_eq!(json["moduleId"], "stacker-1");
    }
}
