//! Reads network definitions and bridge configuration from disk.
//!
//! Provides format detection (RON/JSON/TOML), deserialization and the
//! validation pass that turns a [`NetworkDefinition`] into a runnable
//! [`NetworkEngine`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::info;

use watersim_core::config::BridgeConfig;

use crate::network_engine::NetworkEngine;
use crate::schema::{NetworkDefinition, NodeData};

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur while loading data files.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A pattern reference could not be resolved.
    #[error("unresolved {expected_kind} reference '{name}' in {file}")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    /// Two entities of the same class, or two patterns, share an id.
    #[error("duplicate {class} id '{name}' in {file}")]
    DuplicateName {
        file: PathBuf,
        class: &'static str,
        name: String,
    },

    /// The values are well-formed but unusable.
    #[error("invalid definition in {file}: {detail}")]
    Invalid { file: PathBuf, detail: String },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Deserialize `content` in the given format. `path` is only used in errors.
pub fn deserialize_str<T: DeserializeOwned>(
    content: &str,
    format: Format,
    path: &Path,
) -> Result<T, DataLoadError> {
    let parse_error = |detail: String| DataLoadError::Parse {
        file: path.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse_error(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse_error(e.to_string())),
    }
}

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    deserialize_str(&content, format, path)
}

// ===========================================================================
// Validation
// ===========================================================================

/// Check whether a name already exists in a map, returning a `DuplicateName`
/// error if so.
pub fn check_duplicate<V>(
    map: &HashMap<String, V>,
    name: &str,
    class: &'static str,
    file: &Path,
) -> Result<(), DataLoadError> {
    if map.contains_key(name) {
        Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            class,
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

/// Look up a name in a map, returning an `UnresolvedRef` error if not found.
pub fn resolve_name<'a, V>(
    map: &'a HashMap<String, V>,
    name: &str,
    file: &Path,
    expected_kind: &'static str,
) -> Result<&'a V, DataLoadError> {
    map.get(name).ok_or_else(|| DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    })
}

/// Validate a definition and resolve its pattern references.
///
/// Returns, for each node and then each link, the index of its pattern in
/// `network.patterns`.
pub fn validate_network(
    network: &NetworkDefinition,
    file: &Path,
) -> Result<(Vec<Option<usize>>, Vec<Option<usize>>), DataLoadError> {
    let invalid = |detail: String| DataLoadError::Invalid {
        file: file.to_path_buf(),
        detail,
    };

    if network.options.hydraulic_step == 0 {
        return Err(invalid("hydraulic_step must be positive".into()));
    }
    if network.options.pattern_step == Some(0) {
        return Err(invalid("pattern_step must be positive".into()));
    }

    let mut patterns = HashMap::new();
    for (i, pattern) in network.patterns.iter().enumerate() {
        check_duplicate(&patterns, &pattern.id, "pattern", file)?;
        if pattern.multipliers.is_empty() {
            return Err(invalid(format!("pattern '{}' has no multipliers", pattern.id)));
        }
        patterns.insert(pattern.id.clone(), i);
    }

    let mut seen = HashMap::new();
    let mut node_patterns = Vec::with_capacity(network.nodes.len());
    for node in &network.nodes {
        check_duplicate(&seen, node.id(), "node", file)?;
        seen.insert(node.id().to_string(), ());
        if let NodeData::Tank {
            id,
            min_level,
            max_level,
            ..
        } = node
        {
            if min_level > max_level {
                return Err(invalid(format!(
                    "tank '{id}' has min_level {min_level} above max_level {max_level}"
                )));
            }
        }
        node_patterns.push(match node.pattern() {
            Some(name) => Some(*resolve_name(&patterns, name, file, "pattern")?),
            None => None,
        });
    }

    seen.clear();
    let mut link_patterns = Vec::with_capacity(network.links.len());
    for link in &network.links {
        check_duplicate(&seen, link.id(), "link", file)?;
        seen.insert(link.id().to_string(), ());
        link_patterns.push(match link.pattern() {
            Some(name) => Some(*resolve_name(&patterns, name, file, "pattern")?),
            None => None,
        });
    }

    Ok((node_patterns, link_patterns))
}

// ===========================================================================
// Entry points
// ===========================================================================

/// Load a network file and build the reference engine for it.
pub fn load_network(path: &Path) -> Result<NetworkEngine, DataLoadError> {
    let network: NetworkDefinition = deserialize_file(path)?;
    let engine = NetworkEngine::from_definition(network, path)?;
    info!(
        file = %path.display(),
        nodes = engine.node_count(),
        links = engine.link_count(),
        "network loaded"
    );
    Ok(engine)
}

/// Load a bridge configuration file. Missing keys take their defaults.
pub fn load_bridge_config(path: &Path) -> Result<BridgeConfig, DataLoadError> {
    let config: BridgeConfig = deserialize_file(path)?;
    config.validate().map_err(|e| DataLoadError::Invalid {
        file: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
