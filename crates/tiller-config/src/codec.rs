//! Decoders and encoders moving data trees in and out of a store.
//!
//! A store only depends on the [`Decoder`] and [`Encoder`] traits. Two
//! formats ship with the crate:
//!
//! - TOML, with an optional first line `# version: N` carrying the version.
//! - JSON, wrapped in an envelope `{"version": N, "config": {...}}`.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::schema::join_key;
use crate::tree::{Node, RawTable, RawValue, Tree};
use crate::{ConfigError, Result, Value};

/// Version tag of a persisted configuration.
///
/// Only a decode or reload supplying a new tag changes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u64);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Source of a raw data tree.
pub trait Decoder {
    /// Produce the version tag and the raw tree.
    fn decode(&mut self) -> Result<(Version, RawTable)>;
}

/// Sink for a canonical data tree.
pub trait Encoder {
    /// Persist `tree` tagged with `version`.
    fn encode(&mut self, version: Version, tree: &Tree) -> Result<()>;
}

fn version_line() -> &'static Regex {
    static VERSION_LINE: OnceLock<Regex> = OnceLock::new();
    VERSION_LINE.get_or_init(|| {
        Regex::new(r"^# version:\s*(\d+)\s*$").expect("valid regex")
    })
}

/// Extract the version tag from the first line of a TOML document.
fn parse_version_line(content: &str) -> Result<Version> {
    let first = content.lines().next().unwrap_or_default();
    match version_line().captures(first) {
        Some(caps) => caps[1]
            .parse()
            .map(Version)
            .map_err(|e| ConfigError::decode(format!("invalid version tag `{}`: {e}", &caps[1]))),
        None => Ok(Version::default()),
    }
}

/// Reads the TOML wire format.
#[derive(Debug)]
pub struct TomlDecoder<R> {
    reader: R,
}

impl<R: Read> TomlDecoder<R> {
    /// Decode from `reader`.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read> Decoder for TomlDecoder<R> {
    fn decode(&mut self) -> Result<(Version, RawTable)> {
        let mut bytes = Vec::new();
        self.reader.read_to_end(&mut bytes)?;
        let content =
            String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let version = parse_version_line(&content)?;
        let table: toml::Table = toml::from_str(&content)?;
        Ok((version, raw_from_toml_table(table)?))
    }
}

fn raw_from_toml_table(table: toml::Table) -> Result<RawTable> {
    table
        .into_iter()
        .map(|(key, value)| Ok((key, raw_from_toml(value)?)))
        .collect()
}

fn raw_from_toml(value: toml::Value) -> Result<RawValue> {
    Ok(match value {
        toml::Value::String(s) => RawValue::String(s),
        toml::Value::Integer(i) => RawValue::Int(i),
        toml::Value::Float(x) => RawValue::Float(x),
        toml::Value::Boolean(b) => RawValue::Bool(b),
        toml::Value::Array(items) => RawValue::List(
            items
                .into_iter()
                .map(raw_from_toml)
                .collect::<Result<_>>()?,
        ),
        toml::Value::Table(table) => RawValue::Table(raw_from_toml_table(table)?),
        toml::Value::Datetime(dt) => {
            return Err(ConfigError::decode(format!("unsupported datetime value `{dt}`")))
        }
    })
}

/// Writes the TOML wire format.
#[derive(Debug)]
pub struct TomlEncoder<W> {
    writer: W,
}

impl<W: Write> TomlEncoder<W> {
    /// Encode into `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Give back the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Encoder for TomlEncoder<W> {
    fn encode(&mut self, version: Version, tree: &Tree) -> Result<()> {
        let body = toml::to_string(&toml_from_tree(tree))?;
        writeln!(self.writer, "# version: {version}")?;
        self.writer.write_all(body.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }
}

fn toml_from_tree(tree: &Tree) -> toml::Table {
    tree.iter()
        .map(|(key, node)| {
            let value = match node {
                Node::Leaf(value) => toml_from_value(value),
                Node::Section(children) => toml::Value::Table(toml_from_tree(children)),
            };
            (key.clone(), value)
        })
        .collect()
}

fn toml_from_value(value: &Value) -> toml::Value {
    match value {
        Value::String(s) => toml::Value::String(s.clone()),
        Value::Int(i) => toml::Value::Integer(*i),
        Value::Float(x) => toml::Value::Float(*x),
        Value::Bool(b) => toml::Value::Boolean(*b),
        Value::List(list) => {
            toml::Value::Array(list.to_values().iter().map(toml_from_value).collect())
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonEnvelope {
    #[serde(default)]
    version: Version,
    #[serde(default)]
    config: serde_json::Map<String, JsonValue>,
}

#[derive(Serialize)]
struct JsonEnvelopeRef {
    version: Version,
    config: JsonValue,
}

/// Reads JSON envelopes.
#[derive(Debug)]
pub struct JsonDecoder<R> {
    reader: R,
}

impl<R: Read> JsonDecoder<R> {
    /// Decode from `reader`.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read> Decoder for JsonDecoder<R> {
    fn decode(&mut self) -> Result<(Version, RawTable)> {
        let envelope: JsonEnvelope = serde_json::from_reader(&mut self.reader)?;
        let table = envelope
            .config
            .into_iter()
            .map(|(key, value)| Ok((key, raw_from_json(value)?)))
            .collect::<Result<_>>()?;
        Ok((envelope.version, table))
    }
}

fn raw_from_json(value: JsonValue) -> Result<RawValue> {
    Ok(match value {
        JsonValue::String(s) => RawValue::String(s),
        JsonValue::Bool(b) => RawValue::Bool(b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                RawValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                RawValue::UInt(u)
            } else if let Some(x) = n.as_f64() {
                RawValue::Float(x)
            } else {
                return Err(ConfigError::decode(format!("unsupported number `{n}`")));
            }
        }
        JsonValue::Array(items) => RawValue::List(
            items
                .into_iter()
                .map(raw_from_json)
                .collect::<Result<_>>()?,
        ),
        JsonValue::Object(map) => RawValue::Table(
            map.into_iter()
                .map(|(key, value)| Ok((key, raw_from_json(value)?)))
                .collect::<Result<_>>()?,
        ),
        JsonValue::Null => return Err(ConfigError::decode("null is not a configuration value")),
    })
}

/// Writes JSON envelopes.
#[derive(Debug)]
pub struct JsonEncoder<W> {
    writer: W,
    pretty: bool,
}

impl<W: Write> JsonEncoder<W> {
    /// Encode compact JSON into `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pretty: false,
        }
    }

    /// Encode indented JSON into `writer`.
    pub fn pretty(writer: W) -> Self {
        Self {
            writer,
            pretty: true,
        }
    }

    /// Give back the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Encoder for JsonEncoder<W> {
    fn encode(&mut self, version: Version, tree: &Tree) -> Result<()> {
        let envelope = JsonEnvelopeRef {
            version,
            config: json_from_tree(tree, "")?,
        };
        if self.pretty {
            serde_json::to_writer_pretty(&mut self.writer, &envelope)?;
        } else {
            serde_json::to_writer(&mut self.writer, &envelope)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

fn json_from_tree(tree: &Tree, prefix: &str) -> Result<JsonValue> {
    let mut object = serde_json::Map::new();
    for (key, node) in tree {
        let full = join_key(prefix, key);
        let value = match node {
            Node::Leaf(value) => json_from_value(&full, value)?,
            Node::Section(children) => json_from_tree(children, &full)?,
        };
        object.insert(key.clone(), value);
    }
    Ok(JsonValue::Object(object))
}

fn json_from_value(key: &str, value: &Value) -> Result<JsonValue> {
    let json = match value {
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Int(i) => JsonValue::from(*i),
        Value::Float(x) => JsonValue::Number(json_number(key, *x)?),
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::List(list) => JsonValue::Array(
            list.to_values()
                .iter()
                .map(|element| json_from_value(key, element))
                .collect::<Result<_>>()?,
        ),
    };
    Ok(json)
}

/// JSON has no form for NaN and the infinities.
fn json_number(key: &str, x: f64) -> Result<serde_json::Number> {
    serde_json::Number::from_f64(x).ok_or_else(|| {
        ConfigError::invalid_value(key, format!("{x} cannot be written as JSON"))
    })
}
