//! Configuration schema types.
//!
//! A [`Schema`] declares every legal key, its type (inferred from the default
//! value), documentation, an optional validator and whether changing it needs
//! a restart. It is immutable once built and cheap to clone.
//!
//! # Example
//!
//! ```
//! use tiller_config::{validators, Entry, Schema, Section};
//!
//! let schema = Schema::new(
//!     Section::new()
//!         .section(
//!             "daemon",
//!             Section::new().entry(
//!                 "port",
//!                 Entry::new(6666)
//!                     .needs_restart()
//!                     .docs("Port of the daemon process")
//!                     .validator(validators::int_range(1, 65535)),
//!             ),
//!         )
//!         .section(
//!             "mounts",
//!             Section::new().template(
//!                 Section::new()
//!                     .entry("path", Entry::new(""))
//!                     .entry("read_only", Entry::new(false)),
//!             ),
//!         ),
//! );
//!
//! assert!(schema.entry("daemon.port").is_ok());
//! assert!(schema.entry("mounts.anything.read_only").is_ok());
//! assert!(schema.entry("daemon").is_err());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::validators::Validator;
use crate::{ConfigError, Result, Value, ValueKind};

/// Placeholder segment used when listing template children for display.
pub const TEMPLATE_PLACEHOLDER: &str = "*";

/// Metadata and default for a single configuration key.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    default: Value,
    needs_restart: bool,
    docs: String,
    validator: Option<Validator>,
}

impl Entry {
    /// Create an entry; the key's type is the type of `default`.
    pub fn new(default: impl Into<Value>) -> Self {
        Self {
            default: default.into(),
            needs_restart: false,
            docs: String::new(),
            validator: None,
        }
    }

    /// Mark the key as only taking effect after a restart.
    pub fn needs_restart(mut self) -> Self {
        self.needs_restart = true;
        self
    }

    /// Attach documentation.
    pub fn docs(mut self, docs: impl Into<String>) -> Self {
        self.docs = docs.into();
        self
    }

    /// Attach a validator that every loaded or set value must pass.
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// The default value.
    pub fn default_value(&self) -> &Value {
        &self.default
    }

    /// The canonical type of this key.
    pub fn kind(&self) -> ValueKind {
        self.default.kind()
    }

    /// Whether a change needs a restart to take effect.
    pub fn requires_restart(&self) -> bool {
        self.needs_restart
    }

    /// Documentation text (may be empty).
    pub fn documentation(&self) -> &str {
        &self.docs
    }

    /// Run the validator, if any, against `value`.
    pub(crate) fn validate(&self, key: &str, value: &Value) -> Result<()> {
        match &self.validator {
            Some(validator) => validator
                .check(value)
                .map_err(|reason| ConfigError::invalid_value(key, reason)),
            None => Ok(()),
        }
    }
}

/// A node in the schema tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    /// Nested section.
    Section(Section),
    /// Leaf entry.
    Entry(Entry),
}

impl From<Section> for SchemaNode {
    fn from(section: Section) -> Self {
        SchemaNode::Section(section)
    }
}

impl From<Entry> for SchemaNode {
    fn from(entry: Entry) -> Self {
        SchemaNode::Entry(entry)
    }
}

/// A schema section: named children plus an optional wildcard template.
///
/// The template applies to every child name that is not declared literally.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Section {
    children: BTreeMap<String, SchemaNode>,
    template: Option<Box<SchemaNode>>,
}

impl Section {
    /// Create an empty section.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a leaf entry.
    pub fn entry(mut self, name: impl Into<String>, entry: Entry) -> Self {
        self.children.insert(name.into(), SchemaNode::Entry(entry));
        self
    }

    /// Declare a nested section.
    pub fn section(mut self, name: impl Into<String>, section: Section) -> Self {
        self.children.insert(name.into(), SchemaNode::Section(section));
        self
    }

    /// Declare the wildcard template used for undeclared child names.
    pub fn template(mut self, node: impl Into<SchemaNode>) -> Self {
        self.template = Some(Box::new(node.into()));
        self
    }

    /// Literally declared child.
    pub fn child(&self, name: &str) -> Option<&SchemaNode> {
        self.children.get(name)
    }

    /// Literal child if declared, otherwise the template.
    pub fn lookup(&self, name: &str) -> Option<&SchemaNode> {
        self.children.get(name).or(self.template.as_deref())
    }

    /// Literally declared children, sorted by name.
    pub fn children(&self) -> impl Iterator<Item = (&str, &SchemaNode)> {
        self.children.iter().map(|(name, node)| (name.as_str(), node))
    }

    /// The wildcard template, if declared.
    pub fn template_node(&self) -> Option<&SchemaNode> {
        self.template.as_deref()
    }

    /// True if `name` is declared literally.
    pub fn declares(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }
}

/// Result of resolving a dotted key against a schema.
#[derive(Debug, Clone, Copy)]
pub enum Resolved<'a> {
    /// The key names a leaf.
    Entry(&'a Entry),
    /// The key names a section.
    Section(&'a Section),
}

/// Immutable, shared schema.
#[derive(Clone)]
pub struct Schema {
    root: Arc<Section>,
}

impl Schema {
    /// Freeze `root` into a schema.
    pub fn new(root: Section) -> Self {
        Self {
            root: Arc::new(root),
        }
    }

    /// Root section.
    pub fn root(&self) -> &Section {
        &self.root
    }

    /// Resolve a dotted key.
    ///
    /// Each segment matches a literal child first and falls back to the
    /// section's template. The empty key resolves to the root section.
    pub fn resolve(&self, key: &str) -> Option<Resolved<'_>> {
        let mut node = Resolved::Section(&self.root);
        if key.is_empty() {
            return Some(node);
        }

        for segment in key.split('.') {
            let Resolved::Section(section) = node else {
                // Path continues below a leaf.
                return None;
            };

            if segment.is_empty() {
                return None;
            }

            node = match section.lookup(segment)? {
                SchemaNode::Section(child) => Resolved::Section(child),
                SchemaNode::Entry(entry) => Resolved::Entry(entry),
            };
        }

        Some(node)
    }

    /// Resolve `key` to a leaf entry.
    pub fn entry(&self, key: &str) -> Result<&Entry> {
        match self.resolve(key) {
            Some(Resolved::Entry(entry)) => Ok(entry),
            Some(Resolved::Section(_)) => Err(ConfigError::section_key(key)),
            None => Err(ConfigError::unknown_key(key)),
        }
    }

    /// Resolve `key` to a section.
    pub fn section(&self, key: &str) -> Option<&Section> {
        match self.resolve(key)? {
            Resolved::Section(section) => Some(section),
            Resolved::Entry(_) => None,
        }
    }

    /// True if every segment of `key` is declared literally, i.e. no
    /// template was needed to resolve it.
    pub fn is_literal(&self, key: &str) -> bool {
        if key.is_empty() {
            return true;
        }

        let mut section = self.root();
        let mut segments = key.split('.').peekable();
        while let Some(segment) = segments.next() {
            match section.child(segment) {
                Some(SchemaNode::Section(child)) => section = child,
                Some(SchemaNode::Entry(_)) => return segments.peek().is_none(),
                None => return false,
            }
        }
        true
    }

    /// Every declared leaf with its dotted path, sorted.
    ///
    /// Template children show up under [`TEMPLATE_PLACEHOLDER`].
    pub fn entries(&self) -> Vec<(String, &Entry)> {
        let mut out = Vec::new();
        collect_entries(&self.root, "", &mut out);
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

fn collect_entries<'a>(section: &'a Section, prefix: &str, out: &mut Vec<(String, &'a Entry)>) {
    let template = section
        .template_node()
        .map(|node| (TEMPLATE_PLACEHOLDER, node));

    for (name, node) in section.children().chain(template) {
        let path = join_key(prefix, name);
        match node {
            SchemaNode::Entry(entry) => out.push((path, entry)),
            SchemaNode::Section(child) => collect_entries(child, &path, out),
        }
    }
}

/// Join a prefix and a key with a dot, ignoring empty parts.
pub(crate) fn join_key(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_matches('.');
    let key = key.trim_matches('.');
    match (prefix.is_empty(), key.is_empty()) {
        (true, _) => key.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}.{key}"),
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.root, &other.root) || self.root == other.root
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema").field("root", &self.root).finish()
    }
}
