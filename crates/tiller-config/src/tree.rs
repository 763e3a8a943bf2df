//! Data trees: the raw form handed over by decoders and the canonical form
//! kept by a store.

use std::collections::BTreeMap;

use crate::{ConfigError, Result, Value};

/// Canonical data tree kept by a store.
pub type Tree = BTreeMap<String, Node>;

/// A node of the canonical data tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A canonical leaf value.
    Leaf(Value),
    /// A nested section.
    Section(Tree),
}

/// Raw, not yet validated data tree as produced by a decoder.
pub type RawTable = BTreeMap<String, RawValue>;

/// A raw value. Numbers may come in any width and lists are untyped.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Boolean.
    Bool(bool),
    /// Signed integer of any width.
    Int(i64),
    /// Unsigned integer of any width.
    UInt(u64),
    /// Float of any width.
    Float(f64),
    /// String.
    String(String),
    /// Untyped list.
    List(Vec<RawValue>),
    /// Nested mapping.
    Table(RawTable),
}

impl RawValue {
    /// Short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            RawValue::Bool(_) => "bool",
            RawValue::Int(_) | RawValue::UInt(_) => "int",
            RawValue::Float(_) => "float",
            RawValue::String(_) => "string",
            RawValue::List(_) => "list",
            RawValue::Table(_) => "section",
        }
    }
}

macro_rules! raw_from {
    ($variant:ident as $target:ty: $($ty:ty),*) => {
        $(
            impl From<$ty> for RawValue {
                fn from(v: $ty) -> Self {
                    RawValue::$variant(<$target>::from(v))
                }
            }
        )*
    };
}

raw_from!(Int as i64: i8, i16, i32, i64);
raw_from!(UInt as u64: u8, u16, u32, u64);
raw_from!(Float as f64: f32, f64);

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        RawValue::Bool(v)
    }
}

impl From<String> for RawValue {
    fn from(v: String) -> Self {
        RawValue::String(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::String(v.to_string())
    }
}

impl<T: Into<RawValue>> From<Vec<T>> for RawValue {
    fn from(v: Vec<T>) -> Self {
        RawValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<RawTable> for RawValue {
    fn from(v: RawTable) -> Self {
        RawValue::Table(v)
    }
}

/// Look up any node by dotted key.
pub(crate) fn get_node<'a>(tree: &'a Tree, key: &str) -> Option<&'a Node> {
    let mut segments = key.split('.');
    let mut node = tree.get(segments.next()?)?;
    for segment in segments {
        match node {
            Node::Section(children) => node = children.get(segment)?,
            Node::Leaf(_) => return None,
        }
    }
    Some(node)
}

/// Look up a leaf by dotted key.
pub(crate) fn get_leaf<'a>(tree: &'a Tree, key: &str) -> Option<&'a Value> {
    match get_node(tree, key)? {
        Node::Leaf(value) => Some(value),
        Node::Section(_) => None,
    }
}

/// Mutable access to a section by dotted key; the empty key is the root.
pub(crate) fn get_section_mut<'a>(tree: &'a mut Tree, key: &str) -> Option<&'a mut Tree> {
    if key.is_empty() {
        return Some(tree);
    }

    let mut current = tree;
    for segment in key.split('.') {
        match current.get_mut(segment)? {
            Node::Section(children) => current = children,
            Node::Leaf(_) => return None,
        }
    }
    Some(current)
}

/// Store `value` at `key`, creating missing parent sections on the way.
pub(crate) fn insert_leaf(tree: &mut Tree, key: &str, value: Value) -> Result<()> {
    insert_node(tree, key, Node::Leaf(value))
}

/// Store `node` at `key`, creating missing parent sections on the way.
///
/// A leaf never replaces a section.
pub(crate) fn insert_node(tree: &mut Tree, key: &str, node: Node) -> Result<()> {
    let segments: Vec<&str> = key.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(ConfigError::unknown_key(key));
    };

    let mut current = tree;
    for segment in parents {
        let slot = current
            .entry((*segment).to_string())
            .or_insert_with(|| Node::Section(Tree::new()));
        match slot {
            Node::Section(children) => current = children,
            Node::Leaf(_) => {
                return Err(ConfigError::invalid_value(
                    key,
                    "trying to override value with section",
                ))
            }
        }
    }

    if matches!(node, Node::Leaf(_)) && matches!(current.get(*last), Some(Node::Section(_))) {
        return Err(ConfigError::section_key(key));
    }
    current.insert((*last).to_string(), node);
    Ok(())
}

/// Detach the node at `key`.
pub(crate) fn remove_node(tree: &mut Tree, key: &str) -> Option<Node> {
    let (parent, last) = match key.rsplit_once('.') {
        Some((parent, last)) => (parent, last),
        None => ("", key),
    };
    get_section_mut(tree, parent)?.remove(last)
}

/// All leaves with their full dotted keys, in key order.
pub(crate) fn leaves(tree: &Tree) -> Vec<(String, &Value)> {
    let mut out = Vec::new();
    collect_leaves(tree, "", &mut out);
    out
}

fn collect_leaves<'a>(tree: &'a Tree, prefix: &str, out: &mut Vec<(String, &'a Value)>) {
    for (name, node) in tree {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match node {
            Node::Leaf(value) => out.push((key, value)),
            Node::Section(children) => collect_leaves(children, &key, out),
        }
    }
}
