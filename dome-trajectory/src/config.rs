//! Algorithm configuration documents and their validation.
//!
//! A configuration document is YAML with two keys:
//!
//! ```yaml
//! algorithm_name: simple
//! algorithm_config:
//!   max_daz: 7.1
//! ```
//!
//! Validation turns a document into an [`AlgorithmConfig`] whose name is
//! registered and whose parameters the algorithm accepts. It has no side effects
//! and gives the same answer for the same document every time.

use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use crate::algorithm::{AlgorithmRegistry, TrajectoryAlgorithm};
use crate::error::ConfigurationError;

/// Document used when `start` is given an empty selector.
pub const DEFAULT_DOCUMENT: &str = "\
algorithm_name: simple
algorithm_config:
  max_daz: 5.0
";

/// Raw shape of a configuration document.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigDocument {
    algorithm_name: String,
    #[serde(default)]
    algorithm_config: Option<Mapping>,
}

/// A validated algorithm selection.
///
/// `parameters` are the resolved parameters reported by the algorithm itself,
/// defaults included.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlgorithmConfig {
    pub name: String,
    pub parameters: Mapping,
}

impl AlgorithmConfig {
    /// Build the algorithm this configuration describes.
    pub fn instantiate(
        &self,
        registry: &AlgorithmRegistry,
    ) -> Result<Box<dyn TrajectoryAlgorithm>, ConfigurationError> {
        registry.build(&self.name, &self.parameters)
    }

    /// Parameters rendered as a YAML document.
    pub fn parameters_yaml(&self) -> Result<String, ConfigurationError> {
        serde_yaml::to_string(&self.parameters).map_err(|e| {
            ConfigurationError::Malformed(format!(
                "cannot render parameters of {}: {}",
                self.name, e
            ))
        })
    }
}

/// Validate a configuration document against the registered algorithms.
pub fn validate(
    registry: &AlgorithmRegistry,
    document: &str,
) -> Result<AlgorithmConfig, ConfigurationError> {
    let doc: ConfigDocument = serde_yaml::from_str(document)
        .map_err(|e| ConfigurationError::Malformed(e.to_string()))?;

    let name = doc.algorithm_name.trim();
    if name.is_empty() {
        return Err(ConfigurationError::Malformed(
            "algorithm_name must not be empty".to_string(),
        ));
    }

    let parameters = doc.algorithm_config.unwrap_or_default();
    let algorithm = registry.build(name, &parameters)?;

    Ok(AlgorithmConfig {
        name: algorithm.name().to_string(),
        parameters: algorithm.parameters(),
    })
}
