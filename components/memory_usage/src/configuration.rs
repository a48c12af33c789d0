//! Component configuration as delivered by the host.
//!
//! The configuration is a JSON document listing categories and, inside each
//! category, the components with the package and class names they own. A
//! copy is bundled with the crate and used whenever the provided document is
//! missing or invalid.

use serde::{Deserialize, Serialize};

use crate::ConfigurationError;

/// Bundled default configuration.
pub const DEFAULT_CONFIGURATION_JSON: &str =
    include_str!("../resources/default_memory_usage_config.json");

/// Top-level memory usage report configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryUsageReportConfiguration {
    /// Size above which a shared cluster triggers the extended report
    pub shared_cluster_extended_report_threshold_bytes: Option<u64>,
    /// Size above which the uncategorized component triggers the extended report
    pub uncategorized_component_extended_report_threshold_bytes: Option<u64>,
    /// Categories in registration order
    pub categories: Vec<CategoryConfiguration>,
}

/// One category and its components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfiguration {
    /// Category label
    pub label: String,
    /// Extended report threshold, `None` means never exceeded
    pub extended_report_threshold_bytes: Option<u64>,
    /// Class names whose instances are counted for this category
    pub tracked_fqns: Vec<String>,
    /// Components of the category
    pub components: Vec<ComponentConfiguration>,
}

/// One component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfiguration {
    /// Component label
    pub label: String,
    /// Extended report threshold, `None` means never exceeded
    pub extended_report_threshold_bytes: Option<u64>,
    /// Package prefixes owned by the component
    pub package_names: Vec<String>,
    /// Exact class names owned by the component
    pub class_names: Vec<String>,
    /// Class names whose instances are counted for this component
    pub tracked_fqns: Vec<String>,
    /// Class names of class loaders the component owns
    pub custom_class_loaders: Vec<String>,
}

impl MemoryUsageReportConfiguration {
    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Malformed`] if the document does not parse.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The bundled default configuration.
    pub fn bundled_default() -> Self {
        match Self::from_json(DEFAULT_CONFIGURATION_JSON) {
            Ok(configuration) => configuration,
            Err(err) => {
                tracing::error!(error = %err, "bundled memory usage configuration is invalid");
                Self::default()
            }
        }
    }
}
