//! Reusable validators for schema entries.

use std::fmt;
use std::sync::Arc;

use crate::value::parse_duration;
use crate::Value;

type CheckFn = dyn Fn(&Value) -> Result<(), String> + Send + Sync;

/// A check that a value must pass before it is stored.
///
/// Validators are compared by identity: two validators are equal only if
/// they are clones of the same instance.
#[derive(Clone)]
pub struct Validator(Arc<CheckFn>);

impl Validator {
    /// Wrap a closure returning a human readable rejection reason.
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        Self(Arc::new(check))
    }

    /// Run the check.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        (self.0)(value)
    }
}

impl PartialEq for Validator {
    fn eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.0).cast::<()>() == Arc::as_ptr(&other.0).cast::<()>()
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Validator(..)")
    }
}

/// Integer within `min..=max`.
pub fn int_range(min: i64, max: i64) -> Validator {
    Validator::new(move |value| match value {
        Value::Int(i) if (min..=max).contains(i) => Ok(()),
        Value::Int(i) => Err(format!("{i} is not in range [{min}, {max}]")),
        other => Err(format!("expected an int, got `{}`", other.kind())),
    })
}

/// Float within `min..=max`.
pub fn float_range(min: f64, max: f64) -> Validator {
    Validator::new(move |value| match value {
        Value::Float(x) if (min..=max).contains(x) => Ok(()),
        Value::Float(x) => Err(format!("{x} is not in range [{min}, {max}]")),
        other => Err(format!("expected a float, got `{}`", other.kind())),
    })
}

/// String equal to one of `choices`.
pub fn one_of<I, S>(choices: I) -> Validator
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let choices: Vec<String> = choices.into_iter().map(Into::into).collect();
    Validator::new(move |value| match value {
        Value::String(s) if choices.iter().any(|c| c == s) => Ok(()),
        Value::String(s) => Err(format!(
            "`{s}` is not one of: {}",
            choices.join(", ")
        )),
        other => Err(format!("expected a string, got `{}`", other.kind())),
    })
}

/// String that parses as a duration such as `5m20s` or `1h 30m`.
pub fn duration() -> Validator {
    Validator::new(|value| match value {
        Value::String(s) => parse_duration(s)
            .map(|_| ())
            .map_err(|e| format!("invalid duration `{s}`: {e}")),
        other => Err(format!("expected a duration string, got `{}`", other.kind())),
    })
}

/// Apply `inner` to every element of a list.
pub fn list(inner: Validator) -> Validator {
    Validator::new(move |value| match value {
        Value::List(items) => items
            .to_values()
            .iter()
            .enumerate()
            .try_for_each(|(idx, item)| {
                inner
                    .check(item)
                    .map_err(|reason| format!("element {idx}: {reason}"))
            }),
        other => Err(format!("expected a list, got `{}`", other.kind())),
    })
}
