//! Schema-validated hierarchical configuration store.
//!
//! This crate provides a typed configuration store with support for:
//! - A declarative schema with defaults, docs, validators and restart flags
//! - Wildcard templates for sections with arbitrary child names
//! - Typed accessors with a selectable strictness policy
//! - Change subscriptions per key or for every key
//! - Section views that share storage with their parent
//! - Merge, reload and reset with one notification per changed key
//! - TOML and JSON persistence plus environment variable overrides
//!
//! # Overview
//!
//! A [`Schema`] is built once from [`Section`]s and [`Entry`]s and never
//! changes afterwards. A [`Store`] validates data against it:
//!
//! - Integers of any width become `i64`, floats of any width `f64`
//! - Lists must hold elements of the declared type only
//! - Missing literal keys are filled in from their defaults
//! - Keys matched by a wildcard template fall back to the template default
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use tiller_config::{validators, Entry, Schema, Section, Store, Strictness};
//!
//! # fn main() -> Result<(), tiller_config::ConfigError> {
//! let schema = Schema::new(
//!     Section::new()
//!         .section(
//!             "daemon",
//!             Section::new().entry(
//!                 "port",
//!                 Entry::new(6666)
//!                     .needs_restart()
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
//! let store = Store::new(schema, Strictness::Panic);
//! let changes = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&changes);
//! store.subscribe("daemon.port", move |_| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! })?;
//!
//! store.set_int("daemon.port", 7000)?;
//! assert_eq!(changes.load(Ordering::SeqCst), 1);
//!
//! let mounts = store.section("mounts");
//! mounts.set_string("alpha.path", "/srv")?;
//! assert!(!store.bool("mounts.alpha.read_only"));
//! # Ok(())
//! # }
//! ```
//!
//! # File Format
//!
//! ```toml
//! # version: 3
//! [daemon]
//! port = 7000
//!
//! [mounts.alpha]
//! path = "/srv"
//! ```
//!
//! # Environment Variable Overrides
//!
//! With [`StoreLoader::with_env_prefix`] every key can be overridden using
//! the format `PREFIX__SECTION__KEY`. For example:
//!
//! - `TILLER__DAEMON__PORT=7001`
//! - `TILLER__MOUNTS__ALPHA__READ_ONLY=true`

#![warn(missing_docs)]

mod cast;
pub mod codec;
mod error;
mod events;
mod loader;
mod normalize;
mod schema;
mod store;
mod tree;
pub mod validators;
mod value;

pub use codec::{Decoder, Encoder, JsonDecoder, JsonEncoder, TomlDecoder, TomlEncoder, Version};
pub use error::{ConfigError, Result};
pub use events::{Callback, SubscriptionId};
pub use loader::{
    apply_env_overrides, apply_env_var, from_file, reload_file, to_file, Format, StoreLoader,
};
pub use schema::{Entry, Resolved, Schema, SchemaNode, Section, TEMPLATE_PLACEHOLDER};
pub use store::{Store, Strictness};
pub use tree::{Node, RawTable, RawValue, Tree};
pub use validators::Validator;
pub use value::{
    format_duration, parse_duration, FromValue, List, ScalarKind, Value, ValueKind,
    LIST_SEPARATOR,
};
