//! Datapoint catalog and path resolution
//!
//! The catalog is built from a VSS tree: nested mappings whose leaves carry a
//! `datatype` attribute. Intermediate nodes list their children either under
//! `children` or directly. Every leaf becomes a canonical key mapped to its
//! declared datatype.

use std::collections::BTreeMap;
use std::path::Path;

use serde_yaml::Value as YamlValue;
use thiserror::Error;

use crate::path::{is_valid_segment, UNDERSCORE};

/// Identifier field written alongside every instance document
pub const DEFAULT_ID_FIELD: &str = "Vehicle_VehicleIdentification_VIN";

/// Errors raised while loading a catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read datapoints file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported data points file format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to parse datapoints: {0}")]
    Parse(String),

    #[error("Invalid segment '{segment}' in {path}: names must not contain '.' or '_'")]
    InvalidSegment { path: String, segment: String },

    #[error("Datapoints file declares no leaves")]
    Empty,
}

/// Declared datapoints of the schema, keyed by canonical key
#[derive(Debug, Clone, Default)]
pub struct DatapointCatalog {
    datapoints: BTreeMap<String, String>,
    id_field: String,
}

impl DatapointCatalog {
    /// Build a catalog from explicit `(key, datatype)` pairs
    pub fn from_entries<I, K, V>(entries: I, id_field: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            datapoints: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            id_field: id_field.into(),
        }
    }

    /// Load a catalog from a `.yaml`, `.yml` or `.json` file
    pub fn load(path: impl AsRef<Path>, id_field: &str) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let lower = path.to_string_lossy().to_lowercase();
        if !(lower.ends_with(".json") || lower.ends_with(".yaml") || lower.ends_with(".yml")) {
            return Err(CatalogError::UnsupportedFormat(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        // JSON is a subset of YAML, one parser covers both
        Self::from_yaml_str(&content, id_field)
    }

    /// Parse a VSS tree from YAML or JSON text
    pub fn from_yaml_str(content: &str, id_field: &str) -> Result<Self, CatalogError> {
        let root: YamlValue =
            serde_yaml::from_str(content).map_err(|e| CatalogError::Parse(e.to_string()))?;
        if !root.is_mapping() {
            return Err(CatalogError::Parse(
                "top level is not a mapping".to_string(),
            ));
        }

        let mut datapoints = BTreeMap::new();
        collect_leaves(&root, &mut Vec::new(), &mut datapoints)?;
        if datapoints.is_empty() {
            return Err(CatalogError::Empty);
        }

        tracing::debug!(count = datapoints.len(), "Loaded datapoint catalog");
        Ok(Self {
            datapoints,
            id_field: id_field.to_string(),
        })
    }

    /// Every declared datapoint key starting with `prefix`, the id field excluded.
    ///
    /// Plain string prefix match, so `Vehicle_Cabin` also matches
    /// `Vehicle_CabinLight_On`.
    pub fn resolve(&self, prefix: &str) -> Vec<String> {
        self.datapoints
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| *key != &self.id_field)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.datapoints.contains_key(key)
    }

    pub fn datatype(&self, key: &str) -> Option<&str> {
        self.datapoints.get(key).map(String::as_str)
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn len(&self) -> usize {
        self.datapoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.datapoints.keys().map(String::as_str)
    }
}

fn collect_leaves(
    node: &YamlValue,
    trail: &mut Vec<String>,
    out: &mut BTreeMap<String, String>,
) -> Result<(), CatalogError> {
    let Some(mapping) = node.as_mapping() else {
        return Ok(());
    };

    for (name, value) in mapping {
        let Some(name) = name.as_str() else {
            continue;
        };
        let Some(child) = value.as_mapping() else {
            continue;
        };
        if !is_valid_segment(name) {
            return Err(CatalogError::InvalidSegment {
                path: trail.join("."),
                segment: name.to_string(),
            });
        }

        trail.push(name.to_string());
        match child.get("datatype") {
            Some(datatype) if !datatype.is_null() => {
                let datatype = match datatype.as_str() {
                    Some(s) => s.to_string(),
                    None => serde_yaml::to_string(datatype)
                        .unwrap_or_default()
                        .trim()
                        .to_string(),
                };
                out.insert(trail.join(&UNDERSCORE.to_string()), datatype);
            }
            _ => {
                let next = child.get("children").unwrap_or(value);
                collect_leaves(next, trail, out)?;
            }
        }
        trail.pop();
    }
    Ok(())
}
