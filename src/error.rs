use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the powermap engine
#[derive(Error, Debug)]
pub enum PowerMapError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Malformed source record during normalization
    #[error(transparent)]
    Normalization(#[from] crate::normalizer::NormalizationError),

    /// Rejected relationship edit (formal-edge cycle or duplicate parent)
    #[error(transparent)]
    Conflict(#[from] crate::graph::hierarchy::ConflictError),

    /// Failed decryption of a sensitive field
    #[error(transparent)]
    Decryption(#[from] crate::crypto::DecryptionError),

    /// Narrative provider failure
    #[error(transparent)]
    Narrative(#[from] crate::insight::NarrativeError),

    /// External source exceeded its ingestion deadline
    #[error("Source '{source_name}' exceeded its deadline")]
    Timeout { source_name: String },

    /// Internal invariant violation during a snapshot build
    #[error("Graph build failed: {0}")]
    GraphBuild(String),

    /// Tenant context has been shut down
    #[error("Tenant {tenant_id} is shut down")]
    TenantShutdown { tenant_id: uuid::Uuid },

    /// Unknown player reference
    #[error("Unknown player: {id}")]
    UnknownPlayer { id: uuid::Uuid },

    /// Invalid weight or level input
    #[error("Invalid {field}: {message}")]
    InvalidInput { field: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for powermap operations
pub type Result<T> = std::result::Result<T, PowerMapError>;
