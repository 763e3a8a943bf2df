//! Canonical configuration values.
//!
//! Every leaf in a store holds a [`Value`]. Integers of every width live in
//! [`Value::Int`], floats of every width in [`Value::Float`], and lists are
//! homogeneous by construction through [`List`].

use std::fmt;
use std::time::Duration;

/// Separator used when a list is rendered to or parsed from a single string.
pub const LIST_SEPARATOR: &str = ";;";

/// A canonical configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A string value. Durations are stored as strings, too.
    String(String),
    /// Any integer, widened to 64 bit.
    Int(i64),
    /// Any float, widened to 64 bit.
    Float(f64),
    /// A boolean.
    Bool(bool),
    /// A homogeneous list of scalars.
    List(List),
}

/// A homogeneous list of scalar values.
#[derive(Debug, Clone, PartialEq)]
pub enum List {
    /// List of strings.
    Strings(Vec<String>),
    /// List of integers.
    Ints(Vec<i64>),
    /// List of floats.
    Floats(Vec<f64>),
    /// List of booleans.
    Bools(Vec<bool>),
}

/// Type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// [`Value::String`]
    String,
    /// [`Value::Int`]
    Int,
    /// [`Value::Float`]
    Float,
    /// [`Value::Bool`]
    Bool,
    /// A list whose elements have the given scalar kind.
    List(ScalarKind),
}

/// Type tag of a scalar (a list element).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// String element.
    String,
    /// Integer element.
    Int,
    /// Float element.
    Float,
    /// Boolean element.
    Bool,
}

impl ValueKind {
    /// Top level type compatibility.
    ///
    /// Lists are compatible with every other list regardless of their element
    /// type; element types are checked separately when a list is coerced.
    pub fn is_compatible(self, other: ValueKind) -> bool {
        match (self, other) {
            (ValueKind::List(_), ValueKind::List(_)) => true,
            (a, b) => a == b,
        }
    }

    /// Element kind for list kinds.
    pub fn element(self) -> Option<ScalarKind> {
        match self {
            ValueKind::List(elem) => Some(elem),
            _ => None,
        }
    }
}

impl From<ScalarKind> for ValueKind {
    fn from(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::String => ValueKind::String,
            ScalarKind::Int => ValueKind::Int,
            ScalarKind::Float => ValueKind::Float,
            ScalarKind::Bool => ValueKind::Bool,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::String => "string",
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Bool => "bool",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::String => f.write_str("string"),
            ValueKind::Int => f.write_str("int"),
            ValueKind::Float => f.write_str("float"),
            ValueKind::Bool => f.write_str("bool"),
            ValueKind::List(elem) => write!(f, "[{elem}]"),
        }
    }
}

impl Value {
    /// Type tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Bool(_) => ValueKind::Bool,
            Value::List(list) => ValueKind::List(list.element_kind()),
        }
    }

    /// Borrow the string, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The integer, if this is an integer value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The float, if this is a float value.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The boolean, if this is a boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow the list, if this is a list value.
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    /// Zero value of the given kind.
    pub fn zero(kind: ValueKind) -> Self {
        match kind {
            ValueKind::String => Value::String(String::new()),
            ValueKind::Int => Value::Int(0),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::Bool => Value::Bool(false),
            ValueKind::List(elem) => Value::List(List::empty(elem)),
        }
    }
}

impl List {
    /// An empty list with the given element kind.
    pub fn empty(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::String => List::Strings(Vec::new()),
            ScalarKind::Int => List::Ints(Vec::new()),
            ScalarKind::Float => List::Floats(Vec::new()),
            ScalarKind::Bool => List::Bools(Vec::new()),
        }
    }

    /// Kind of the list's elements.
    pub fn element_kind(&self) -> ScalarKind {
        match self {
            List::Strings(_) => ScalarKind::String,
            List::Ints(_) => ScalarKind::Int,
            List::Floats(_) => ScalarKind::Float,
            List::Bools(_) => ScalarKind::Bool,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            List::Strings(v) => v.len(),
            List::Ints(v) => v.len(),
            List::Floats(v) => v.len(),
            List::Bools(v) => v.len(),
        }
    }

    /// True if the list has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements as individual scalar values, in order.
    pub fn to_values(&self) -> Vec<Value> {
        match self {
            List::Strings(v) => v.iter().cloned().map(Value::String).collect(),
            List::Ints(v) => v.iter().copied().map(Value::Int).collect(),
            List::Floats(v) => v.iter().copied().map(Value::Float).collect(),
            List::Bools(v) => v.iter().copied().map(Value::Bool).collect(),
        }
    }
}

impl fmt::Display for Value {
    /// Natural textual form. List elements are joined with [`LIST_SEPARATOR`].
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::List(list) => {
                let rendered: Vec<String> =
                    list.to_values().iter().map(ToString::to_string).collect();
                f.write_str(&rendered.join(LIST_SEPARATOR))
            }
        }
    }
}

macro_rules! value_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Int(i64::from(v))
                }
            }

            impl From<Vec<$ty>> for Value {
                fn from(v: Vec<$ty>) -> Self {
                    Value::List(List::Ints(v.into_iter().map(i64::from).collect()))
                }
            }
        )*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::List(List::Floats(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Vec<bool>> for Value {
    fn from(v: Vec<bool>) -> Self {
        Value::List(List::Bools(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(List::Strings(v))
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Value::List(List::Strings(v.into_iter().map(str::to_string).collect()))
    }
}

impl From<List> for Value {
    fn from(v: List) -> Self {
        Value::List(v)
    }
}

/// Conversion from a stored [`Value`] into a static Rust type.
///
/// Used by the typed accessors of [`Store`](crate::Store).
pub trait FromValue: Sized {
    /// Name of the type for error messages.
    const TYPE_NAME: &'static str;

    /// Convert, or `None` if the value has a different type.
    fn from_value(value: Value) -> Option<Self>;

    /// Value returned by best-effort reads that cannot be satisfied.
    fn zero() -> Self;
}

macro_rules! from_value_impl {
    ($ty:ty, $name:literal, $zero:expr, $pat:pat => $out:expr) => {
        impl FromValue for $ty {
            const TYPE_NAME: &'static str = $name;

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    $pat => Some($out),
                    _ => None,
                }
            }

            fn zero() -> Self {
                $zero
            }
        }
    };
}

from_value_impl!(String, "string", String::new(), Value::String(s) => s);
from_value_impl!(i64, "int", 0, Value::Int(i) => i);
from_value_impl!(f64, "float", 0.0, Value::Float(x) => x);
from_value_impl!(bool, "bool", false, Value::Bool(b) => b);
from_value_impl!(Vec<String>, "[string]", Vec::new(), Value::List(List::Strings(v)) => v);
from_value_impl!(Vec<i64>, "[int]", Vec::new(), Value::List(List::Ints(v)) => v);
from_value_impl!(Vec<f64>, "[float]", Vec::new(), Value::List(List::Floats(v)) => v);
from_value_impl!(Vec<bool>, "[bool]", Vec::new(), Value::List(List::Bools(v)) => v);

/// Textual encoding used for stored durations.
pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

/// Parse a stored duration.
pub fn parse_duration(text: &str) -> std::result::Result<Duration, String> {
    humantime::parse_duration(text.trim()).map_err(|e| e.to_string())
}
