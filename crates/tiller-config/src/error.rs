//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while loading, validating or mutating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The key has no schema entry (neither literal nor wildcard).
    #[error("no default for key: {key}")]
    UnknownKey {
        /// The offending dotted key.
        key: String,
    },

    /// The key names a section where a value was expected.
    #[error("key denotes a section, not a value: {key}")]
    SectionKey {
        /// The offending dotted key.
        key: String,
    },

    /// The supplied value has a different type than the schema declares.
    #[error("type mismatch: want `{expected}`, got `{found}` for key `{key}`")]
    TypeMismatch {
        /// The dotted key.
        key: String,
        /// Type declared by the schema.
        expected: String,
        /// Type that was supplied.
        found: String,
    },

    /// Invalid configuration value.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field with the invalid value.
        field: String,
        /// Explanation of why the value is invalid.
        reason: String,
    },

    /// Merge was attempted between stores built from different schemas.
    #[error("refusing to merge: different schemas")]
    SchemaMismatch,

    /// Text could not be converted into the type of a key.
    #[error("cannot cast `{value}` for key `{key}`: {reason}")]
    Cast {
        /// The dotted key.
        key: String,
        /// The text that failed to convert.
        value: String,
        /// Explanation of the failure.
        reason: String,
    },

    /// The decoded document has a shape the store cannot represent.
    #[error("failed to decode configuration: {0}")]
    Decode(String),

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// Failed to read configuration file.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file extension does not map to a known format.
    #[error("unsupported configuration file format: {path}")]
    UnsupportedFormat {
        /// Path to the file.
        path: PathBuf,
    },

    /// Environment variable parsing error.
    #[error("failed to parse environment variable {var}: {reason}")]
    EnvParseError {
        /// The environment variable name.
        var: String,
        /// Explanation of the parsing error.
        reason: String,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML configuration: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to write TOML configuration: {0}")]
    TomlWriteError(#[from] toml::ser::Error),

    /// JSON parsing or serialization error.
    #[error("failed to process JSON configuration: {0}")]
    JsonError(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Create a new unknown key error.
    pub fn unknown_key(key: impl Into<String>) -> Self {
        Self::UnknownKey { key: key.into() }
    }

    /// Create a new section key error.
    pub fn section_key(key: impl Into<String>) -> Self {
        Self::SectionKey { key: key.into() }
    }

    /// Create a new type mismatch error.
    pub fn type_mismatch(
        key: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            key: key.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a new invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a new cast error.
    pub fn cast(key: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cast {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a new decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Create a new file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Create a new read error.
    pub fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadError {
            path: path.into(),
            source,
        }
    }

    /// Create a new unsupported format error.
    pub fn unsupported_format(path: impl Into<PathBuf>) -> Self {
        Self::UnsupportedFormat { path: path.into() }
    }

    /// Create a new environment variable parse error.
    pub fn env_parse_error(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvParseError {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for conditions that indicate a wrong key in the calling
    /// code rather than bad data.
    pub fn is_key_error(&self) -> bool {
        matches!(self, Self::UnknownKey { .. } | Self::SectionKey { .. })
    }
}
