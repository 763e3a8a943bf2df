//! The configuration store.
//!
//! A [`Store`] owns a validated data tree behind a single lock. Section views
//! created with [`Store::section`] share that lock and tree but address keys
//! below a prefix and keep their own subscriptions.
//!
//! Change callbacks are gathered while the lock is held and invoked after it
//! was released, so a callback may call back into any handle of the family.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::cast;
use crate::codec::{Decoder, Encoder, Version};
use crate::events::{self, Callback, HandleId, Pending, Registry, SubscriptionId};
use crate::normalize::{self, Normalized};
use crate::schema::{join_key, Resolved};
use crate::tree::{self, Node, RawTable, Tree};
use crate::value::{format_duration, parse_duration, FromValue, List};
use crate::{ConfigError, Entry, Result, Schema, Section, Value};

/// How a store reacts to programmer defects: unknown keys, section keys and
/// reads with the wrong static type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Strictness {
    /// Fail fast: every defect panics.
    #[default]
    Panic,
    /// Best effort, logging every downgraded defect with `tracing::warn!`.
    Warn,
    /// Best effort: reads yield zero values, setters return errors.
    Ignore,
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strictness::Panic => "panic",
            Strictness::Warn => "warn",
            Strictness::Ignore => "ignore",
        };
        f.write_str(name)
    }
}

/// Everything guarded by the family lock.
struct State {
    tree: Tree,
    version: Version,
    /// Materialized keys whose value came from the schema default.
    default_keys: BTreeSet<String>,
    registries: BTreeMap<HandleId, Registry>,
    next_handle: HandleId,
    next_subscription: u64,
}

impl State {
    fn register(&mut self, prefix: &str) -> HandleId {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.registries.insert(handle, Registry::new(prefix));
        handle
    }

    /// Callbacks of the committing handle interested in the changed keys.
    /// Other handles of the family are not consulted.
    fn notify(&self, handle: HandleId, changed: &[String]) -> Vec<Pending> {
        let mut pending = Vec::new();
        if let Some(registry) = self.registries.get(&handle) {
            for key in changed {
                registry.collect(key, &mut pending);
            }
        }
        pending
    }
}

struct Shared {
    schema: Schema,
    strictness: Strictness,
    state: Mutex<State>,
}

/// Handle to a configuration store, either the root or a section view.
///
/// # Example
///
/// ```
/// use tiller_config::{Entry, Schema, Section, Store, Strictness};
///
/// let schema = Schema::new(
///     Section::new()
///         .entry("a", Entry::new(1))
///         .entry("b", Entry::new("")),
/// );
/// let store = Store::new(schema, Strictness::Panic);
///
/// assert_eq!(store.int("a"), 1);
/// store.set_int("a", 2).unwrap();
/// assert_eq!(store.uncast("a"), "2");
/// assert!(!store.is_default("a"));
/// assert!(store.is_default("b"));
/// ```
pub struct Store {
    shared: Arc<Shared>,
    prefix: String,
    handle: HandleId,
}

impl Store {
    /// Create a store holding nothing but defaults.
    pub fn new(schema: Schema, strictness: Strictness) -> Self {
        let normalized = normalize::defaults(&schema);
        Self::from_parts(schema, strictness, Version::default(), normalized)
    }

    /// Create a store from an already decoded raw tree.
    pub fn from_raw(
        version: Version,
        raw: RawTable,
        schema: Schema,
        strictness: Strictness,
    ) -> Result<Self> {
        let normalized = normalize::normalize(raw, &schema)?;
        debug!(
            %version,
            defaulted = normalized.default_keys.len(),
            %strictness,
            "opened configuration"
        );
        Ok(Self::from_parts(schema, strictness, version, normalized))
    }

    /// Decode and validate a store.
    pub fn open<D: Decoder + ?Sized>(
        decoder: &mut D,
        schema: Schema,
        strictness: Strictness,
    ) -> Result<Self> {
        let (version, raw) = decoder.decode()?;
        Self::from_raw(version, raw, schema, strictness)
    }

    fn from_parts(
        schema: Schema,
        strictness: Strictness,
        version: Version,
        normalized: Normalized,
    ) -> Self {
        let mut state = State {
            tree: normalized.tree,
            version,
            default_keys: normalized.default_keys,
            registries: BTreeMap::new(),
            next_handle: 0,
            next_subscription: 0,
        };
        let handle = state.register("");

        Self {
            shared: Arc::new(Shared {
                schema,
                strictness,
                state: Mutex::new(state),
            }),
            prefix: String::new(),
            handle,
        }
    }

    fn full_key(&self, key: &str) -> String {
        join_key(&self.prefix, key)
    }

    fn covers(&self, full_key: &str) -> bool {
        events::strip_prefix(&self.prefix, full_key).is_some()
    }

    /// Apply the strictness policy to a programmer defect.
    fn report(&self, err: &ConfigError) {
        match self.shared.strictness {
            Strictness::Panic => panic!("{err}"),
            Strictness::Warn => {
                warn!(prefix = %self.prefix, error = %err, "invalid configuration access");
            }
            Strictness::Ignore => {}
        }
    }

    fn finish(&self, result: Result<()>, pending: Vec<Pending>) -> Result<()> {
        events::fire(pending);
        if let Err(err) = &result {
            if err.is_key_error() {
                self.report(err);
            }
        }
        result
    }

    // ---- reads ----

    /// Current value of `key`, falling back to the schema default.
    ///
    /// Returns `None` for unknown or section keys unless the store panics on
    /// them.
    pub fn get(&self, key: &str) -> Option<Value> {
        let full = self.full_key(key);
        let result = self.shared.schema.entry(&full).map(|entry| {
            let state = self.shared.state.lock();
            let value = tree::get_leaf(&state.tree, &full).unwrap_or(entry.default_value());
            value.clone()
        });

        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.report(&err);
                None
            }
        }
    }

    /// Current value of `key` as a static type.
    pub fn get_as<T: FromValue>(&self, key: &str) -> T {
        let Some(value) = self.get(key) else {
            return T::zero();
        };

        let found = value.kind();
        T::from_value(value).unwrap_or_else(|| {
            self.report(&ConfigError::type_mismatch(
                self.full_key(key),
                T::TYPE_NAME,
                found.to_string(),
            ));
            T::zero()
        })
    }

    /// Boolean value of `key`.
    pub fn bool(&self, key: &str) -> bool {
        self.get_as(key)
    }

    /// String value of `key`.
    pub fn string(&self, key: &str) -> String {
        self.get_as(key)
    }

    /// Integer value of `key`.
    pub fn int(&self, key: &str) -> i64 {
        self.get_as(key)
    }

    /// Float value of `key`.
    pub fn float(&self, key: &str) -> f64 {
        self.get_as(key)
    }

    /// String list value of `key`.
    pub fn strings(&self, key: &str) -> Vec<String> {
        self.get_as(key)
    }

    /// Integer list value of `key`.
    pub fn ints(&self, key: &str) -> Vec<i64> {
        self.get_as(key)
    }

    /// Float list value of `key`.
    pub fn floats(&self, key: &str) -> Vec<f64> {
        self.get_as(key)
    }

    /// Boolean list value of `key`.
    pub fn bools(&self, key: &str) -> Vec<bool> {
        self.get_as(key)
    }

    /// Duration stored as text at `key`.
    ///
    /// # Panics
    ///
    /// Panics if the stored text is not a duration, regardless of the
    /// strictness. Such values must be rejected by a validator on write.
    pub fn duration(&self, key: &str) -> Duration {
        match self.get(key) {
            Some(Value::String(text)) => stored_duration(&self.full_key(key), &text),
            Some(other) => {
                self.report(&ConfigError::type_mismatch(
                    self.full_key(key),
                    "duration",
                    other.kind().to_string(),
                ));
                Duration::ZERO
            }
            None => Duration::ZERO,
        }
    }

    /// Durations stored as a string list at `key`.
    ///
    /// # Panics
    ///
    /// Panics if a stored element is not a duration.
    pub fn durations(&self, key: &str) -> Vec<Duration> {
        let full = self.full_key(key);
        self.strings(key)
            .iter()
            .map(|text| stored_duration(&full, text))
            .collect()
    }

    // ---- writes ----

    /// Store `value` at `key`.
    ///
    /// Nothing changes and no callback fires if `value` equals the current
    /// value. Type mismatches and validator rejections are returned as
    /// errors; unknown and section keys additionally go through the
    /// strictness policy.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let full = self.full_key(key);
        let value = value.into();

        let (result, pending) = {
            let mut state = self.shared.state.lock();
            match self.apply(&mut state, &full, value) {
                Ok(true) => (Ok(()), state.notify(self.handle, std::slice::from_ref(&full))),
                Ok(false) => (Ok(()), Vec::new()),
                Err(err) => (Err(err), Vec::new()),
            }
        };

        self.finish(result, pending)
    }

    /// Single key write under the lock. Returns whether the value changed.
    fn apply(&self, state: &mut State, full: &str, value: Value) -> Result<bool> {
        let entry = self.shared.schema.entry(full)?;
        let expected = entry.kind();
        let found = value.kind();
        if !expected.is_compatible(found) {
            return Err(ConfigError::type_mismatch(
                full,
                expected.to_string(),
                found.to_string(),
            ));
        }
        if expected != found {
            return Err(ConfigError::invalid_value(
                full,
                format!("expected {expected} list, got {found}"),
            ));
        }

        let current = tree::get_leaf(&state.tree, full).unwrap_or(entry.default_value());
        if *current == value {
            return Ok(false);
        }

        entry.validate(full, &value)?;
        tree::insert_leaf(&mut state.tree, full, value)?;
        state.default_keys.remove(full);
        trace!(key = %full, "configuration value changed");
        Ok(true)
    }

    /// Store a boolean.
    pub fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set(key, value)
    }

    /// Store a string.
    pub fn set_string(&self, key: &str, value: impl Into<String>) -> Result<()> {
        self.set(key, Value::String(value.into()))
    }

    /// Store an integer.
    pub fn set_int(&self, key: &str, value: i64) -> Result<()> {
        self.set(key, value)
    }

    /// Store a float.
    pub fn set_float(&self, key: &str, value: f64) -> Result<()> {
        self.set(key, value)
    }

    /// Store a duration in its textual form.
    pub fn set_duration(&self, key: &str, value: Duration) -> Result<()> {
        self.set(key, format_duration(value))
    }

    /// Store a list of strings.
    pub fn set_strings<I, S>(&self, key: &str, values: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(key, List::Strings(values.into_iter().map(Into::into).collect()))
    }

    /// Store a list of integers.
    pub fn set_ints(&self, key: &str, values: impl IntoIterator<Item = i64>) -> Result<()> {
        self.set(key, List::Ints(values.into_iter().collect()))
    }

    /// Store a list of floats.
    pub fn set_floats(&self, key: &str, values: impl IntoIterator<Item = f64>) -> Result<()> {
        self.set(key, List::Floats(values.into_iter().collect()))
    }

    /// Store a list of booleans.
    pub fn set_bools(&self, key: &str, values: impl IntoIterator<Item = bool>) -> Result<()> {
        self.set(key, List::Bools(values.into_iter().collect()))
    }

    /// Store a list of durations in their textual form.
    pub fn set_durations(
        &self,
        key: &str,
        values: impl IntoIterator<Item = Duration>,
    ) -> Result<()> {
        self.set(
            key,
            List::Strings(values.into_iter().map(format_duration).collect()),
        )
    }

    /// Parse `text` into the type of `key` without storing it.
    pub fn cast(&self, key: &str, text: &str) -> Result<Value> {
        let full = self.full_key(key);
        match self.shared.schema.entry(&full) {
            Ok(entry) => cast::cast(&full, entry.kind(), text),
            Err(err) => {
                self.report(&err);
                Err(err)
            }
        }
    }

    /// Textual form of the current value of `key`; empty for invalid keys
    /// under best effort.
    pub fn uncast(&self, key: &str) -> String {
        self.get(key).map(|value| value.to_string()).unwrap_or_default()
    }

    // ---- bulk operations ----

    /// Restore defaults.
    ///
    /// The empty key resets everything below this handle. A leaf key goes
    /// through [`set`](Self::set) with the default. A section key drops the
    /// whole subtree; literal children get their defaults back while
    /// wildcard children are forgotten.
    pub fn reset(&self, key: &str) -> Result<()> {
        let full = self.full_key(key);
        let section = match self.shared.schema.resolve(&full) {
            Some(Resolved::Entry(entry)) => return self.reset_entry(&full, entry),
            Some(Resolved::Section(section)) => section,
            None => {
                let err = ConfigError::unknown_key(full);
                self.report(&err);
                return Err(err);
            }
        };

        let pending = {
            let mut state = self.shared.state.lock();
            let mut tree = state.tree.clone();
            let mut default_keys = state.default_keys.clone();
            self.reset_section(&mut tree, &mut default_keys, &full, section)?;

            let changed = changed_keys(&self.shared.schema, &state.tree, &tree);
            state.tree = tree;
            state.default_keys = default_keys;
            debug!(key = %full, changed = changed.len(), "reset configuration section");
            state.notify(self.handle, &changed)
        };

        events::fire(pending);
        Ok(())
    }

    fn reset_entry(&self, full: &str, entry: &Entry) -> Result<()> {
        let (result, pending) = {
            let mut state = self.shared.state.lock();
            match self.apply(&mut state, full, entry.default_value().clone()) {
                Ok(changed) => {
                    if tree::get_leaf(&state.tree, full).is_some() {
                        state.default_keys.insert(full.to_string());
                    }
                    let pending = if changed {
                        state.notify(self.handle, &[full.to_string()])
                    } else {
                        Vec::new()
                    };
                    (Ok(()), pending)
                }
                Err(err) => (Err(err), Vec::new()),
            }
        };

        self.finish(result, pending)
    }

    fn reset_section(
        &self,
        tree: &mut Tree,
        default_keys: &mut BTreeSet<String>,
        full: &str,
        section: &Section,
    ) -> Result<()> {
        if full.is_empty() {
            let fresh = normalize::defaults(&self.shared.schema);
            *tree = fresh.tree;
            *default_keys = fresh.default_keys;
            return Ok(());
        }

        tree::remove_node(tree, full);
        default_keys.retain(|key| events::strip_prefix(full, key).is_none());

        if self.shared.schema.is_literal(full) {
            let mut fresh = Tree::new();
            normalize::fill_defaults(&mut fresh, section, full, default_keys);
            tree::insert_node(tree, full, Node::Section(fresh))?;
        }
        Ok(())
    }

    /// Copy every explicitly set value of `source` that differs from this
    /// store into this store.
    ///
    /// Values `source` only holds as defaults are skipped. Both stores must
    /// share the same schema. Only keys visible to both handles are
    /// considered.
    pub fn merge(&self, source: &Store) -> Result<()> {
        if self.shared.schema != source.shared.schema {
            return Err(ConfigError::SchemaMismatch);
        }
        if Arc::ptr_eq(&self.shared, &source.shared) {
            return Ok(());
        }

        let explicit: Vec<(String, Value)> = {
            let state = source.shared.state.lock();
            tree::leaves(&state.tree)
                .into_iter()
                .filter(|(key, _)| !state.default_keys.contains(key))
                .filter(|(key, _)| source.covers(key) && self.covers(key))
                .map(|(key, value)| (key, value.clone()))
                .collect()
        };

        let pending = {
            let mut state = self.shared.state.lock();
            let mut tree = state.tree.clone();
            let mut changed = Vec::new();
            for (key, value) in explicit {
                if resolved(&self.shared.schema, &tree, &key).as_ref() == Some(&value) {
                    continue;
                }
                tree::insert_leaf(&mut tree, &key, value)?;
                changed.push(key);
            }

            state.tree = tree;
            for key in &changed {
                state.default_keys.remove(key);
            }
            debug!(changed = changed.len(), "merged configuration");
            state.notify(self.handle, &changed)
        };

        events::fire(pending);
        Ok(())
    }

    /// Decode a new tree and swap it in.
    pub fn reload<D: Decoder + ?Sized>(&self, decoder: &mut D) -> Result<()> {
        let (version, raw) = decoder.decode()?;
        self.reload_raw(version, raw)
    }

    /// Replace the whole tree with nothing but defaults.
    pub fn reload_defaults(&self) -> Result<()> {
        self.reload_raw(Version::default(), RawTable::new())
    }

    /// Validate `raw` and swap it in together with `version`.
    ///
    /// On error the store is left untouched. Otherwise one notification
    /// fires per key whose value changed.
    pub fn reload_raw(&self, version: Version, raw: RawTable) -> Result<()> {
        let Normalized { tree, default_keys } = normalize::normalize(raw, &self.shared.schema)?;

        let pending = {
            let mut state = self.shared.state.lock();
            let before = std::mem::replace(&mut state.tree, tree);
            state.default_keys = default_keys;
            state.version = version;

            let changed = changed_keys(&self.shared.schema, &before, &state.tree);
            debug!(%version, changed = changed.len(), "reloaded configuration");
            state.notify(self.handle, &changed)
        };

        events::fire(pending);
        Ok(())
    }

    /// Encode the whole tree, including keys outside this handle's prefix.
    pub fn save<E: Encoder + ?Sized>(&self, encoder: &mut E) -> Result<()> {
        let (version, tree) = {
            let state = self.shared.state.lock();
            (state.version, state.tree.clone())
        };
        encoder.encode(version, &tree)
    }

    // ---- views and events ----

    /// View of the keys below `prefix`, sharing this store's data.
    ///
    /// The view starts without subscriptions.
    pub fn section(&self, prefix: &str) -> Store {
        let full = self.full_key(prefix);
        match self.shared.schema.resolve(&full) {
            Some(Resolved::Section(_)) => {}
            Some(Resolved::Entry(_)) => self.report(&ConfigError::invalid_value(
                &full,
                "key denotes a value, not a section",
            )),
            None => self.report(&ConfigError::unknown_key(&full)),
        }

        let handle = self.shared.state.lock().register(&full);
        Store {
            shared: Arc::clone(&self.shared),
            prefix: full,
            handle,
        }
    }

    /// Call `callback` whenever `key` changes; the empty key subscribes to
    /// every change below this handle.
    ///
    /// The callback receives the changed key relative to this handle.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let bucket = if key.is_empty() {
            String::new()
        } else {
            let full = self.full_key(key);
            if let Err(err) = self.shared.schema.entry(&full) {
                self.report(&err);
                return Err(err);
            }
            full
        };

        let mut state = self.shared.state.lock();
        let id = SubscriptionId(state.next_subscription);
        state.next_subscription += 1;

        let callback: Callback = Arc::new(callback);
        state
            .registries
            .entry(self.handle)
            .or_insert_with(|| Registry::new(self.prefix.clone()))
            .add(bucket, id, callback);
        Ok(id)
    }

    /// Drop a subscription of this handle. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        // Callbacks may own store handles; drop them after unlocking.
        let removed = {
            let mut state = self.shared.state.lock();
            state
                .registries
                .get_mut(&self.handle)
                .and_then(|registry| registry.remove(id))
        };
        removed.is_some()
    }

    /// Drop every subscription of this handle.
    pub fn clear_subscriptions(&self) {
        let removed = {
            let mut state = self.shared.state.lock();
            state
                .registries
                .get_mut(&self.handle)
                .map(Registry::take)
        };
        drop(removed);
    }

    /// Number of live subscriptions on this handle.
    pub fn subscriptions(&self) -> usize {
        self.shared
            .state
            .lock()
            .registries
            .get(&self.handle)
            .map_or(0, Registry::len)
    }

    // ---- introspection ----

    /// True if `key` currently holds its schema default without having been
    /// set.
    pub fn is_default(&self, key: &str) -> bool {
        let full = self.full_key(key);
        if let Err(err) = self.shared.schema.entry(&full) {
            self.report(&err);
            return false;
        }

        let state = self.shared.state.lock();
        state.default_keys.contains(&full) || tree::get_leaf(&state.tree, &full).is_none()
    }

    /// Schema entry of `key`.
    pub fn entry(&self, key: &str) -> Option<Entry> {
        match self.shared.schema.entry(&self.full_key(key)) {
            Ok(entry) => Some(entry.clone()),
            Err(err) => {
                self.report(&err);
                None
            }
        }
    }

    /// Materialized keys below this handle, relative to it and sorted.
    pub fn keys(&self) -> Vec<String> {
        let state = self.shared.state.lock();
        let mut keys: Vec<String> = tree::leaves(&state.tree)
            .into_iter()
            .filter_map(|(key, _)| events::strip_prefix(&self.prefix, &key).map(str::to_string))
            .collect();
        keys.sort();
        keys
    }

    /// True if `key` names a leaf of the schema.
    pub fn is_valid_key(&self, key: &str) -> bool {
        self.shared.schema.entry(&self.full_key(key)).is_ok()
    }

    /// Version tag of the loaded data.
    pub fn version(&self) -> Version {
        self.shared.state.lock().version
    }

    /// The schema this store validates against.
    pub fn schema(&self) -> &Schema {
        &self.shared.schema
    }

    /// The strictness policy.
    pub fn strictness(&self) -> Strictness {
        self.shared.strictness
    }

    /// Prefix of this handle; empty for the root.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let removed = {
            let mut state = self.shared.state.lock();
            state.registries.remove(&self.handle)
        };
        drop(removed);
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("prefix", &self.prefix)
            .field("handle", &self.handle)
            .field("strictness", &self.shared.strictness)
            .finish_non_exhaustive()
    }
}

fn stored_duration(key: &str, text: &str) -> Duration {
    parse_duration(text)
        .unwrap_or_else(|e| panic!("stored value of `{key}` is not a duration: {e}"))
}

/// Value of `key` in `tree`, falling back to the schema default.
fn resolved(schema: &Schema, tree: &Tree, key: &str) -> Option<Value> {
    match tree::get_leaf(tree, key) {
        Some(value) => Some(value.clone()),
        None => schema
            .entry(key)
            .ok()
            .map(|entry| entry.default_value().clone()),
    }
}

/// Keys whose resolved value differs between two trees.
fn changed_keys(schema: &Schema, before: &Tree, after: &Tree) -> Vec<String> {
    let keys: BTreeSet<String> = tree::leaves(before)
        .into_iter()
        .chain(tree::leaves(after))
        .map(|(key, _)| key)
        .collect();

    keys.into_iter()
        .filter(|key| resolved(schema, before, key) != resolved(schema, after, key))
        .collect()
}
