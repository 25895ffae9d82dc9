//! Result and error types for wmsparity.

use thiserror::Error;

/// Result type for wmsparity operations
pub type ParityResult<T> = Result<T, ParityError>;

/// Errors that can occur while running a rendering comparison
#[derive(Debug, Error)]
pub enum ParityError {
    /// Configuration could not be resolved
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Map definition (layer store) could not be loaded
    #[error("Project error: {message}")]
    Project {
        /// Error message
        message: String,
    },

    /// A test layer's data source has no `TYPENAME` query key
    #[error("Layer {layer}: data source has no TYPENAME key ({data_source})")]
    MissingTypeName {
        /// Layer name
        layer: String,
        /// Data source connection string
        data_source: String,
    },

    /// Two test layers share a name
    #[error("Duplicate test name: {name}")]
    DuplicateName {
        /// Colliding name
        name: String,
    },

    /// Network failure while requesting a map
    #[error("Request to {url} failed: {source}")]
    Transport {
        /// Request URL
        url: String,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },

    /// Endpoint URL could not be parsed
    #[error("Invalid endpoint URL {url}: {message}")]
    InvalidEndpoint {
        /// URL as configured
        url: String,
        /// Error message
        message: String,
    },

    /// Image could not be decoded or encoded
    #[error("Image error for {path}: {message}")]
    Image {
        /// Image path (or `<memory>`)
        path: String,
        /// Error message
        message: String,
    },

    /// Images cannot be compared (geometry, channels, size)
    #[error("Image comparison failed: {message}")]
    ImageComparison {
        /// Error message
        message: String,
    },

    /// Style document is not well-formed
    #[error("Invalid style document: {message}")]
    InvalidStyle {
        /// Error message
        message: String,
    },

    /// Report generation error
    #[error("Report generation failed: {message}")]
    Report {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl ParityError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a comparison precondition error
    #[must_use]
    pub fn comparison(message: impl Into<String>) -> Self {
        Self::ImageComparison {
            message: message.into(),
        }
    }

    /// Create a report error
    #[must_use]
    pub fn report(message: impl Into<String>) -> Self {
        Self::Report {
            message: message.into(),
        }
    }
}
