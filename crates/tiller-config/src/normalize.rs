//! Validation of raw data trees against a schema.
//!
//! Normalization is fail-closed: the first error aborts and nothing of the
//! input survives.

use std::collections::BTreeSet;

use crate::schema::{join_key, Resolved, SchemaNode};
use crate::tree::{Node, RawTable, RawValue, Tree};
use crate::value::{List, ScalarKind};
use crate::{ConfigError, Result, Schema, Section, Value, ValueKind};

/// A validated tree plus the keys that were filled in from defaults.
#[derive(Debug, Clone, Default)]
pub(crate) struct Normalized {
    pub(crate) tree: Tree,
    pub(crate) default_keys: BTreeSet<String>,
}

/// Validate `raw` against `schema`, coerce it to canonical values and fill in
/// every missing literal key with its default.
pub(crate) fn normalize(raw: RawTable, schema: &Schema) -> Result<Normalized> {
    let mut tree = Tree::new();
    validate_table(raw, schema, "", &mut tree)?;

    let mut default_keys = BTreeSet::new();
    fill_defaults(&mut tree, schema.root(), "", &mut default_keys);

    Ok(Normalized { tree, default_keys })
}

/// A tree holding nothing but defaults.
pub(crate) fn defaults(schema: &Schema) -> Normalized {
    let mut normalized = Normalized::default();
    fill_defaults(
        &mut normalized.tree,
        schema.root(),
        "",
        &mut normalized.default_keys,
    );
    normalized
}

fn validate_table(raw: RawTable, schema: &Schema, prefix: &str, out: &mut Tree) -> Result<()> {
    for (name, value) in raw {
        let key = join_key(prefix, &name);
        match value {
            RawValue::Table(children) => {
                match schema.resolve(&key) {
                    Some(Resolved::Section(_)) => {}
                    Some(Resolved::Entry(entry)) => {
                        return Err(ConfigError::type_mismatch(
                            key,
                            entry.kind().to_string(),
                            "section",
                        ))
                    }
                    None => return Err(ConfigError::unknown_key(key)),
                }

                let mut section = Tree::new();
                validate_table(children, schema, &key, &mut section)?;
                out.insert(name, Node::Section(section));
            }
            leaf => {
                let entry = schema.entry(&key)?;
                let value = coerce(&key, leaf, entry.kind())?;
                entry.validate(&key, &value)?;
                out.insert(name, Node::Leaf(value));
            }
        }
    }

    Ok(())
}

/// Convert a raw leaf into the canonical form of `expected`.
pub(crate) fn coerce(key: &str, raw: RawValue, expected: ValueKind) -> Result<Value> {
    match (expected, raw) {
        (ValueKind::String, RawValue::String(s)) => Ok(Value::String(s)),
        (ValueKind::Int, RawValue::Int(i)) => Ok(Value::Int(i)),
        (ValueKind::Int, RawValue::UInt(u)) => to_i64(key, u).map(Value::Int),
        (ValueKind::Float, RawValue::Float(x)) => Ok(Value::Float(x)),
        (ValueKind::Bool, RawValue::Bool(b)) => Ok(Value::Bool(b)),
        (ValueKind::List(elem), RawValue::List(items)) => {
            coerce_list(key, elem, items).map(Value::List)
        }
        (expected, raw) => Err(ConfigError::type_mismatch(
            key,
            expected.to_string(),
            raw.type_name(),
        )),
    }
}

fn coerce_list(key: &str, elem: ScalarKind, items: Vec<RawValue>) -> Result<List> {
    let items = items.into_iter().enumerate();
    let list = match elem {
        ScalarKind::String => List::Strings(
            items
                .map(|(idx, item)| match item {
                    RawValue::String(s) => Ok(s),
                    other => Err(element_error(key, elem, idx, &other)),
                })
                .collect::<Result<_>>()?,
        ),
        ScalarKind::Int => List::Ints(
            items
                .map(|(idx, item)| match item {
                    RawValue::Int(i) => Ok(i),
                    RawValue::UInt(u) => to_i64(key, u),
                    other => Err(element_error(key, elem, idx, &other)),
                })
                .collect::<Result<_>>()?,
        ),
        ScalarKind::Float => List::Floats(
            items
                .map(|(idx, item)| match item {
                    RawValue::Float(x) => Ok(x),
                    other => Err(element_error(key, elem, idx, &other)),
                })
                .collect::<Result<_>>()?,
        ),
        ScalarKind::Bool => List::Bools(
            items
                .map(|(idx, item)| match item {
                    RawValue::Bool(b) => Ok(b),
                    other => Err(element_error(key, elem, idx, &other)),
                })
                .collect::<Result<_>>()?,
        ),
    };

    Ok(list)
}

fn element_error(key: &str, elem: ScalarKind, idx: usize, found: &RawValue) -> ConfigError {
    ConfigError::invalid_value(
        key,
        format!(
            "{elem} list contains non-{elem} element at index {idx} ({})",
            found.type_name()
        ),
    )
}

fn to_i64(key: &str, value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| ConfigError::invalid_value(key, format!("{value} does not fit into int")))
}

/// Materialize defaults for every literal entry below `section`.
///
/// Children matched by the wildcard template are left as they are: their
/// missing leaves are served from the template default on read.
pub(crate) fn fill_defaults(
    tree: &mut Tree,
    section: &Section,
    prefix: &str,
    default_keys: &mut BTreeSet<String>,
) {
    for (name, node) in section.children() {
        let key = join_key(prefix, name);
        match node {
            SchemaNode::Entry(entry) => {
                if !tree.contains_key(name) {
                    tree.insert(name.to_string(), Node::Leaf(entry.default_value().clone()));
                    default_keys.insert(key);
                }
            }
            SchemaNode::Section(child) => {
                let slot = tree
                    .entry(name.to_string())
                    .or_insert_with(|| Node::Section(Tree::new()));
                if let Node::Section(children) = slot {
                    fill_defaults(children, child, &key, default_keys);
                }
            }
        }
    }
}
