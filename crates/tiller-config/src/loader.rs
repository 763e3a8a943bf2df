//! Layered store loading and file persistence.
//!
//! This module provides the [`StoreLoader`] for building a store from
//! multiple sources: schema defaults, a file, and environment variables. The
//! [`from_file`] and [`to_file`] helpers cover the common single-file case.

use std::env;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use tracing::debug;

use crate::codec::{Decoder, JsonDecoder, JsonEncoder, TomlDecoder, TomlEncoder, Version};
use crate::tree::RawTable;
use crate::{ConfigError, Result, Schema, Store, Strictness};

/// Supported on-disk formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// TOML with an optional `# version: N` header line.
    Toml,
    /// JSON envelope `{"version": N, "config": {...}}`.
    Json,
}

impl Format {
    /// Pick the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            _ => Err(ConfigError::unsupported_format(path)),
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    fn decode(self, content: &[u8]) -> Result<(Version, RawTable)> {
        match self {
            Self::Toml => TomlDecoder::new(content).decode(),
            Self::Json => JsonDecoder::new(content).decode(),
        }
    }
}

/// Store loader with layered approach.
///
/// Later layers override earlier ones:
/// 1. Schema defaults
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables
///
/// # Example
///
/// ```no_run
/// use tiller_config::{Entry, Schema, Section, StoreLoader, Strictness};
///
/// # fn main() -> Result<(), tiller_config::ConfigError> {
/// let schema = Schema::new(
///     Section::new().section("daemon", Section::new().entry("port", Entry::new(6666))),
/// );
///
/// let store = StoreLoader::new(schema)
///     .strictness(Strictness::Warn)
///     .with_file("config.toml")?
///     .with_env_prefix("TILLER")
///     .load()?;
///
/// println!("daemon listens on {}", store.int("daemon.port"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StoreLoader {
    schema: Schema,
    strictness: Strictness,
    data: Option<(Version, RawTable)>,
    env_prefix: Option<String>,
}

impl StoreLoader {
    /// Create a loader that yields nothing but defaults.
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            strictness: Strictness::default(),
            data: None,
            env_prefix: None,
        }
    }

    /// Set the strictness policy of the resulting store.
    #[must_use]
    pub fn strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    /// Load data from a file, replacing previously loaded data.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file does not exist, cannot be read, has
    /// an unknown extension or cannot be decoded.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let format = Format::from_path(path)?;
        let content = fs::read(path).map_err(|e| ConfigError::read_error(path, e))?;
        let (version, raw) = format.decode(&content)?;
        debug!(path = %path.display(), %version, "read configuration file");

        self.data = Some((version, raw));
        Ok(self)
    }

    /// Load data from a file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load data from a string in the given format (`"toml"` or `"json"`).
    ///
    /// # Example
    ///
    /// ```
    /// use tiller_config::{Entry, Schema, Section, StoreLoader};
    ///
    /// let schema = Schema::new(Section::new().entry("name", Entry::new("")));
    /// let store = StoreLoader::new(schema)
    ///     .with_string("# version: 2\nname = \"tiller\"\n", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(store.string("name"), "tiller");
    /// assert_eq!(store.version().0, 2);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self> {
        let format = Format::from_name(format).ok_or_else(|| {
            ConfigError::decode(format!("unsupported configuration format: {format}"))
        })?;

        self.data = Some(format.decode(content.as_bytes())?);
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Variables use the format `PREFIX__SECTION__KEY`; with prefix
    /// `TILLER`, `TILLER__DAEMON__PORT=7000` sets `daemon.port`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Validate the collected layers and build the store.
    pub fn load(self) -> Result<Store> {
        let (version, raw) = self.data.unwrap_or_default();
        let store = Store::from_raw(version, raw, self.schema, self.strictness)?;

        if let Some(prefix) = &self.env_prefix {
            apply_env_overrides(&store, prefix)?;
        }

        Ok(store)
    }
}

/// Open a store from `path`, picking the codec by extension.
pub fn from_file<P: AsRef<Path>>(path: P, schema: Schema, strictness: Strictness) -> Result<Store> {
    StoreLoader::new(schema)
        .strictness(strictness)
        .with_file(path)?
        .load()
}

/// Reload `store` from `path`, picking the codec by extension.
pub fn reload_file<P: AsRef<Path>>(store: &Store, path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::file_not_found(path));
    }

    let format = Format::from_path(path)?;
    let content = fs::read(path).map_err(|e| ConfigError::read_error(path, e))?;
    let (version, raw) = format.decode(&content)?;
    store.reload_raw(version, raw)
}

/// Save `store` to `path`, picking the codec by extension.
pub fn to_file<P: AsRef<Path>>(path: P, store: &Store) -> Result<()> {
    let path = path.as_ref();
    let format = Format::from_path(path)?;
    let writer = BufWriter::new(File::create(path)?);

    match format {
        Format::Toml => store.save(&mut TomlEncoder::new(writer))?,
        Format::Json => store.save(&mut JsonEncoder::pretty(writer))?,
    }

    debug!(path = %path.display(), "wrote configuration file");
    Ok(())
}

/// Apply every `PREFIX__...` environment variable to `store`.
///
/// Returns the number of values that were applied.
pub fn apply_env_overrides(store: &Store, prefix: &str) -> Result<usize> {
    let prefix = prefix.to_uppercase();
    let marker = format!("{prefix}__");
    let mut env_vars: Vec<(String, String)> = env::vars()
        .filter(|(k, _)| k.starts_with(&marker))
        .collect();
    env_vars.sort();

    let mut applied = 0;
    for (name, value) in env_vars {
        if apply_env_var(store, &name, &value, &prefix)? {
            applied += 1;
        }
    }

    Ok(applied)
}

/// Apply a single environment variable.
///
/// Returns `false` if the variable does not name a key of the schema.
pub fn apply_env_var(store: &Store, name: &str, value: &str, prefix: &str) -> Result<bool> {
    let key = name
        .strip_prefix(prefix)
        .and_then(|k| k.strip_prefix("__"))
        .ok_or_else(|| ConfigError::env_parse_error(name, "invalid key format"))?
        .split("__")
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(".");

    if !store.is_valid_key(&key) {
        debug!(var = %name, %key, "skipping environment variable without schema entry");
        return Ok(false);
    }

    let value = store
        .cast(&key, value)
        .map_err(|e| ConfigError::env_parse_error(name, e.to_string()))?;
    store.set(&key, value)?;
    Ok(true)
}
