//! End-to-end store scenarios.
//!
//! These tests drive the public API the way an embedding application does:
//!
//! 1. Defaults - Every literal leaf is served from its default
//! 2. Wildcards - Template children next to literal siblings
//! 3. Mutation - Idempotent set, reset of leaves and sections
//! 4. Bulk - Merge and reload with one notification per changed key
//! 5. Views - Section handles and their subscriptions
//! 6. Persistence - Round-trip through the TOML wire format

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use tiller_config::{
    validators, ConfigError, Decoder, Encoder, Entry, RawTable, RawValue, Schema, Section, Store,
    Strictness, SubscriptionId, TomlDecoder, TomlEncoder, Value, Version, TEMPLATE_PLACEHOLDER,
};

/// Schema modelled after a small storage daemon.
fn schema() -> Schema {
    let mount = Section::new()
        .entry("path", Entry::new(""))
        .entry("read_only", Entry::new(false));
    let default_mount = Section::new()
        .entry("path", Entry::new("/"))
        .entry("read_only", Entry::new(true));

    Schema::new(
        Section::new()
            .section(
                "daemon",
                Section::new()
                    .entry(
                        "port",
                        Entry::new(6666)
                            .needs_restart()
                            .docs("Port of the daemon process")
                            .validator(validators::int_range(1, 65535)),
                    )
                    .entry(
                        "ping_interval",
                        Entry::new("5m").validator(validators::duration()),
                    ),
            )
            .section(
                "fs",
                Section::new()
                    .section(
                        "compress",
                        Section::new().entry(
                            "default_algo",
                            Entry::new("snappy")
                                .validator(validators::one_of(["snappy", "lz4", "none"])),
                        ),
                    )
                    .section(
                        "sync",
                        Section::new()
                            .entry("ignore_moved", Entry::new(false))
                            .entry("patterns", Entry::new(vec!["*.tmp"])),
                    ),
            )
            .section(
                "mounts",
                Section::new()
                    .template(mount)
                    .section("default", default_mount),
            ),
    )
}

/// Builds a raw table from `(key, value)` pairs.
fn table(entries: Vec<(&str, RawValue)>) -> RawTable {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Raw input declaring only `mounts.alpha.path`.
fn alpha_mount(path: &str) -> RawTable {
    table(vec![(
        "mounts",
        RawValue::Table(table(vec![(
            "alpha",
            RawValue::Table(table(vec![("path", RawValue::from(path))])),
        )])),
    )])
}

/// Subscribes a counter to `key` on `store`.
fn counter(store: &Store, key: &str) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&hits);
    store
        .subscribe(key, move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    hits
}

/// Subscribes a recorder of changed keys to `key` on `store`.
fn recorder(store: &Store, key: &str) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    store
        .subscribe(key, move |changed| {
            sink.lock().unwrap().push(changed.to_string());
        })
        .unwrap();
    seen
}

fn hits(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

// ============================================================================
// Defaults
// ============================================================================

#[test]
fn test_every_literal_leaf_starts_as_default() {
    let schema = schema();
    let store = Store::new(schema.clone(), Strictness::Panic);

    for (path, entry) in schema.entries() {
        if path.split('.').any(|segment| segment == TEMPLATE_PLACEHOLDER) {
            continue;
        }
        assert_eq!(store.get(&path).as_ref(), Some(entry.default_value()), "{path}");
        assert!(store.is_default(&path), "{path}");
    }
}

#[test]
fn test_scalar_scenario() {
    let schema = Schema::new(
        Section::new()
            .entry("a", Entry::new(1))
            .entry("b", Entry::new("")),
    );
    let store = Store::from_raw(Version(0), RawTable::new(), schema, Strictness::Panic).unwrap();
    assert_eq!(store.get("a"), Some(Value::Int(1)));
    assert_eq!(store.get("b"), Some(Value::from("")));

    let changes = recorder(&store, "");
    store.set_int("a", 2).unwrap();
    assert_eq!(*changes.lock().unwrap(), vec!["a"]);
    assert_eq!(store.int("a"), 2);
    assert_eq!(store.cast("a", "5").unwrap(), Value::Int(5));
    assert_eq!(store.uncast("a"), "2");
}

#[test]
fn test_open_rejects_bad_input_atomically() {
    let raw = table(vec![
        (
            "daemon",
            RawValue::Table(table(vec![("port", RawValue::from(70000))])),
        ),
    ]);
    let err = Store::from_raw(Version(1), raw, schema(), Strictness::Panic).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));

    let raw = table(vec![("nope", RawValue::from(true))]);
    let err = Store::from_raw(Version(1), raw, schema(), Strictness::Panic).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownKey { .. }));
}

// ============================================================================
// Wildcards
// ============================================================================

#[test]
fn test_mount_scenario() {
    let store =
        Store::from_raw(Version(0), alpha_mount("x"), schema(), Strictness::Panic).unwrap();

    assert_eq!(store.string("mounts.alpha.path"), "x");
    assert!(!store.bool("mounts.alpha.read_only"));
    assert!(store.is_default("mounts.alpha.read_only"));

    let keys = store.keys();
    assert!(keys.contains(&"mounts.alpha.path".to_string()));
    assert!(!keys.contains(&"mounts.alpha.read_only".to_string()));
}

#[test]
fn test_literal_sibling_keeps_its_schema() {
    let store = Store::new(schema(), Strictness::Panic);
    assert_eq!(store.string("mounts.default.path"), "/");
    assert!(store.bool("mounts.default.read_only"));
    assert_eq!(store.string("mounts.other.path"), "");
    assert!(!store.bool("mounts.other.read_only"));
    assert!(!store.is_valid_key("mounts.other.size"));
}

#[test]
fn test_set_materializes_wildcard_child() {
    let store = Store::new(schema(), Strictness::Panic);
    let changes = recorder(&store, "mounts.beta.read_only");

    store.set_bool("mounts.beta.read_only", true).unwrap();
    assert_eq!(*changes.lock().unwrap(), vec!["mounts.beta.read_only"]);
    assert!(store.keys().contains(&"mounts.beta.read_only".to_string()));
    assert!(!store.keys().contains(&"mounts.beta.path".to_string()));
}

proptest! {
    #[test]
    fn prop_template_matches_any_undeclared_name(name in "[a-z][a-z0-9_]{0,11}") {
        prop_assume!(name != "default");
        let store = Store::new(schema(), Strictness::Panic);
        let path = format!("mounts.{name}.path");
        let read_only = format!("mounts.{name}.read_only");

        prop_assert!(store.is_valid_key(&path));
        prop_assert_eq!(store.string(&path), "");
        prop_assert!(!store.bool(&read_only));

        store.set_string(&path, "/data").unwrap();
        prop_assert_eq!(store.string(&path), "/data");
        prop_assert_eq!(store.string("mounts.default.path"), "/");
    }
}

// ============================================================================
// Mutation
// ============================================================================

#[test]
fn test_idempotent_set() {
    let store = Store::new(schema(), Strictness::Panic);
    let all = counter(&store, "");
    let port = counter(&store, "daemon.port");

    store.set_int("daemon.port", 6666).unwrap();
    assert_eq!(hits(&all), 0);
    assert!(store.is_default("daemon.port"));

    store.set_int("daemon.port", 7000).unwrap();
    store.set_int("daemon.port", 7000).unwrap();
    assert_eq!(hits(&all), 1);
    assert_eq!(hits(&port), 1);
    assert!(!store.is_default("daemon.port"));
}

#[test]
fn test_failed_set_changes_nothing() {
    let store = Store::new(schema(), Strictness::Panic);
    let all = counter(&store, "");

    assert!(store.set_string("fs.compress.default_algo", "zstd").is_err());
    assert!(store.set_float("daemon.port", 1.0).is_err());
    assert!(store.set_string("mounts.gamma.path", "x").is_ok());
    assert!(store.set_int("mounts.delta.read_only", 1).is_err());

    assert_eq!(store.string("fs.compress.default_algo"), "snappy");
    assert!(!store.keys().contains(&"mounts.delta.read_only".to_string()));
    assert_eq!(hits(&all), 1);
}

#[test]
fn test_durations() {
    let store = Store::new(schema(), Strictness::Panic);
    assert_eq!(store.duration("daemon.ping_interval"), Duration::from_secs(300));

    store
        .set_duration("daemon.ping_interval", Duration::from_secs(320))
        .unwrap();
    assert_eq!(store.duration("daemon.ping_interval"), Duration::from_secs(320));

    store
        .set_durations("fs.sync.patterns", [Duration::from_secs(1)])
        .unwrap();
    assert_eq!(store.durations("fs.sync.patterns"), vec![Duration::from_secs(1)]);
}

#[test]
fn test_reset_leaf_restores_default_marker() {
    let store = Store::new(schema(), Strictness::Panic);
    store.set_string("fs.compress.default_algo", "lz4").unwrap();
    let all = counter(&store, "");

    store.reset("fs.compress.default_algo").unwrap();
    assert_eq!(store.string("fs.compress.default_algo"), "snappy");
    assert!(store.is_default("fs.compress.default_algo"));
    assert_eq!(hits(&all), 1);

    store.reset("fs.compress.default_algo").unwrap();
    assert_eq!(hits(&all), 1);
}

#[test]
fn test_reset_section_forgets_wildcard_children() {
    let store =
        Store::from_raw(Version(0), alpha_mount("x"), schema(), Strictness::Panic).unwrap();
    store.set_string("mounts.default.path", "/srv").unwrap();
    store.set_int("daemon.port", 7000).unwrap();
    let changes = recorder(&store, "");

    store.reset("mounts").unwrap();

    let mut seen = changes.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["mounts.alpha.path", "mounts.default.path"]);
    assert!(!store.keys().iter().any(|k| k.starts_with("mounts.alpha")));
    assert_eq!(store.string("mounts.alpha.path"), "");
    assert_eq!(store.string("mounts.default.path"), "/");
    assert!(store.is_default("mounts.default.path"));
    assert_eq!(store.int("daemon.port"), 7000);
}

#[test]
fn test_reset_everything() {
    let store =
        Store::from_raw(Version(0), alpha_mount("x"), schema(), Strictness::Panic).unwrap();
    store.set_int("daemon.port", 7000).unwrap();
    let all = counter(&store, "");

    store.reset("").unwrap();
    assert_eq!(hits(&all), 2);
    assert_eq!(store.int("daemon.port"), 6666);
    assert_eq!(store.keys(), Store::new(schema(), Strictness::Panic).keys());
}

// ============================================================================
// Bulk operations
// ============================================================================

#[test]
fn test_merge_selectivity() {
    let schema = schema();
    let target = Store::new(schema.clone(), Strictness::Panic);
    let source = Store::new(schema, Strictness::Panic);

    target.set_int("daemon.port", 7000).unwrap();
    target.set_bool("fs.sync.ignore_moved", true).unwrap();
    source.set_bool("fs.sync.ignore_moved", true).unwrap();
    source.set_string("fs.compress.default_algo", "none").unwrap();
    source.set_string("mounts.alpha.path", "/a").unwrap();

    let changes = recorder(&target, "");
    target.merge(&source).unwrap();

    let mut seen = changes.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["fs.compress.default_algo", "mounts.alpha.path"]);

    // Explicit target values survive defaults held by the source.
    assert_eq!(target.int("daemon.port"), 7000);
    assert_eq!(target.string("fs.compress.default_algo"), "none");
    assert!(!target.is_default("fs.compress.default_algo"));
    assert_eq!(target.string("mounts.alpha.path"), "/a");

    // The source is untouched.
    assert_eq!(source.int("daemon.port"), 6666);
}

#[test]
fn test_merge_refuses_different_schema() {
    let target = Store::new(schema(), Strictness::Panic);
    let source = Store::new(
        Schema::new(Section::new().entry("a", Entry::new(1))),
        Strictness::Panic,
    );
    assert!(matches!(
        target.merge(&source),
        Err(ConfigError::SchemaMismatch)
    ));
}

#[test]
fn test_reload_notifies_changed_keys() {
    let store =
        Store::from_raw(Version(1), alpha_mount("x"), schema(), Strictness::Panic).unwrap();
    store.set_int("daemon.port", 7000).unwrap();
    let changes = recorder(&store, "");
    let port = counter(&store, "daemon.port");

    let raw = table(vec![(
        "daemon",
        RawValue::Table(table(vec![("port", RawValue::from(7000u16))])),
    )]);
    store.reload_raw(Version(2), raw).unwrap();

    assert_eq!(*changes.lock().unwrap(), vec!["mounts.alpha.path"]);
    assert_eq!(hits(&port), 0);
    assert_eq!(store.version(), Version(2));
    assert_eq!(store.string("mounts.alpha.path"), "");
}

#[test]
fn test_reload_failure_leaves_store_unchanged() {
    let store =
        Store::from_raw(Version(1), alpha_mount("x"), schema(), Strictness::Panic).unwrap();
    let all = counter(&store, "");

    let raw = table(vec![(
        "fs",
        RawValue::Table(table(vec![(
            "sync",
            RawValue::Table(table(vec![(
                "patterns",
                RawValue::from(vec![RawValue::from("a"), RawValue::from(1)]),
            )])),
        )])),
    )]);
    assert!(store.reload_raw(Version(2), raw).is_err());

    assert_eq!(hits(&all), 0);
    assert_eq!(store.version(), Version(1));
    assert_eq!(store.string("mounts.alpha.path"), "x");
}

#[test]
fn test_reload_defaults_resets_default_markers() {
    let store = Store::new(schema(), Strictness::Panic);
    store.set_int("daemon.port", 7000).unwrap();
    store.reload_defaults().unwrap();
    assert!(store.is_default("daemon.port"));
    assert_eq!(store.int("daemon.port"), 6666);
}

// ============================================================================
// Views
// ============================================================================

#[test]
fn test_section_view_shares_data() {
    let store = Store::new(schema(), Strictness::Panic);
    let fs = store.section("fs");
    let sync = fs.section("sync");

    assert_eq!(sync.prefix(), "fs.sync");
    sync.set_bool("ignore_moved", true).unwrap();
    assert!(store.bool("fs.sync.ignore_moved"));
    assert!(fs.bool("sync.ignore_moved"));
    assert!(fs.is_valid_key("compress.default_algo"));
    assert!(!fs.is_valid_key("daemon.port"));
    assert_eq!(sync.keys(), vec!["ignore_moved", "patterns"]);
}

#[test]
fn test_section_signals() {
    let store = Store::new(schema(), Strictness::Panic);
    let fs = store.section("fs");
    let root_all = recorder(&store, "");
    let fs_all = recorder(&fs, "");
    let fs_exact = counter(&fs, "sync.ignore_moved");

    fs.set_bool("sync.ignore_moved", true).unwrap();
    store.set_string("fs.compress.default_algo", "lz4").unwrap();
    store.set_bool("fs.sync.ignore_moved", false).unwrap();
    store.set_int("daemon.port", 7000).unwrap();

    // Each handle only hears about changes committed through itself.
    assert_eq!(
        *root_all.lock().unwrap(),
        vec![
            "fs.compress.default_algo",
            "fs.sync.ignore_moved",
            "daemon.port"
        ]
    );
    assert_eq!(*fs_all.lock().unwrap(), vec!["sync.ignore_moved"]);
    assert_eq!(hits(&fs_exact), 1);

    fs.reset("").unwrap();
    assert_eq!(
        *fs_all.lock().unwrap(),
        vec!["sync.ignore_moved", "compress.default_algo"]
    );
    assert_eq!(root_all.lock().unwrap().len(), 3);
}

#[test]
fn test_sibling_views_do_not_share_signals() {
    let store = Store::new(schema(), Strictness::Panic);
    let first = store.section("fs");
    let second = store.section("fs");
    let first_hits = counter(&first, "sync.ignore_moved");
    let second_hits = counter(&second, "sync.ignore_moved");

    first.set_bool("sync.ignore_moved", true).unwrap();
    assert_eq!(hits(&first_hits), 1);
    assert_eq!(hits(&second_hits), 0);

    // Dropping a view removes its subscriptions.
    drop(first);
    second.set_bool("sync.ignore_moved", false).unwrap();
    assert_eq!(hits(&second_hits), 1);
    assert_eq!(store.subscriptions(), 0);
}

#[test]
fn test_view_starts_without_subscriptions() {
    let store = Store::new(schema(), Strictness::Panic);
    store.subscribe("", |_| {}).unwrap();
    let view = store.section("daemon");
    assert_eq!(view.subscriptions(), 0);
    assert_eq!(store.subscriptions(), 1);
}

#[test]
fn test_callback_may_reenter_store() {
    let store = Store::new(schema(), Strictness::Panic);
    let inner = store.section("");
    let observed = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&observed);

    store
        .subscribe("daemon.port", move |_| {
            let port = usize::try_from(inner.int("daemon.port")).unwrap();
            sink.store(port, Ordering::SeqCst);
            inner.set_bool("fs.sync.ignore_moved", true).unwrap();
        })
        .unwrap();

    store.set_int("daemon.port", 7000).unwrap();
    assert_eq!(hits(&observed), 7000);
    assert!(store.bool("fs.sync.ignore_moved"));
}

/// Subscribes a callback on `store` that owns a view of the same store and
/// a clone of `token`.
fn subscribe_owning_view(store: &Store, token: &Arc<()>) -> SubscriptionId {
    let view = store.section("daemon");
    let token = Arc::clone(token);
    store
        .subscribe("daemon.port", move |_| {
            let _ = view.int("port");
            let _token = &token;
        })
        .unwrap()
}

#[test]
fn test_unsubscribe_releases_callback_owning_a_view() {
    let store = Store::new(schema(), Strictness::Panic);
    let token = Arc::new(());
    let id = subscribe_owning_view(&store, &token);
    assert_eq!(Arc::strong_count(&token), 2);

    assert!(store.unsubscribe(id));
    assert_eq!(Arc::strong_count(&token), 1);
    store.set_int("daemon.port", 7000).unwrap();
}

#[test]
fn test_clear_releases_callbacks_owning_views() {
    let store = Store::new(schema(), Strictness::Panic);
    let token = Arc::new(());
    subscribe_owning_view(&store, &token);
    subscribe_owning_view(&store, &token);
    assert_eq!(Arc::strong_count(&token), 3);

    store.clear_subscriptions();
    assert_eq!(Arc::strong_count(&token), 1);
    assert_eq!(store.subscriptions(), 0);
}

#[test]
fn test_drop_releases_callbacks_owning_views() {
    let store = Store::new(schema(), Strictness::Panic);
    let token = Arc::new(());
    subscribe_owning_view(&store, &token);
    store.set_int("daemon.port", 7000).unwrap();

    drop(store);
    assert_eq!(Arc::strong_count(&token), 1);
}

#[test]
fn test_concurrent_writers() {
    let store = Store::new(schema(), Strictness::Panic);
    let all = counter(&store, "");

    std::thread::scope(|scope| {
        for idx in 0..8 {
            let store = &store;
            scope.spawn(move || {
                store
                    .set_string(&format!("mounts.m{idx}.path"), format!("/m{idx}"))
                    .unwrap();
            });
        }
    });

    assert_eq!(hits(&all), 8);
    for idx in 0..8 {
        assert_eq!(store.string(&format!("mounts.m{idx}.path")), format!("/m{idx}"));
    }
}

// ============================================================================
// Strictness
// ============================================================================

#[test]
#[should_panic(expected = "key denotes a section")]
fn test_panic_on_section_set() {
    let store = Store::new(schema(), Strictness::Panic);
    let _ = store.set_int("daemon", 1);
}

#[test]
#[should_panic(expected = "no default for key")]
fn test_panic_on_unknown_subscription() {
    let store = Store::new(schema(), Strictness::Panic);
    let _ = store.subscribe("daemon.nope", |_| {});
}

#[test]
#[should_panic(expected = "type mismatch")]
fn test_panic_on_wrong_static_type() {
    let store = Store::new(schema(), Strictness::Panic);
    let _ = store.string("daemon.port");
}

#[test]
fn test_best_effort_policies() {
    for strictness in [Strictness::Warn, Strictness::Ignore] {
        let store = Store::new(schema(), strictness);
        assert_eq!(store.int("daemon.nope"), 0);
        assert_eq!(store.string("daemon.port"), "");
        assert_eq!(store.get("daemon"), None);
        assert!(!store.is_default("mounts"));
        assert_eq!(store.duration("daemon.nope"), Duration::ZERO);
        assert!(matches!(
            store.set_int("daemon", 1),
            Err(ConfigError::SectionKey { .. })
        ));
        assert!(store.subscribe("nope", |_| {}).is_err());
        assert!(store.reset("nope").is_err());
        assert!(store.cast("nope", "1").is_err());
    }
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_toml_round_trip() {
    let schema = schema();
    let store =
        Store::from_raw(Version(4), alpha_mount("x"), schema.clone(), Strictness::Panic).unwrap();
    store.set_int("daemon.port", 7000).unwrap();
    store.set_strings("fs.sync.patterns", ["*.tmp", "*.swp"]).unwrap();
    store.set_bool("mounts.beta.read_only", true).unwrap();

    let mut encoder = TomlEncoder::new(Vec::new());
    store.save(&mut encoder).unwrap();
    let bytes = encoder.into_inner();

    let reopened =
        Store::open(&mut TomlDecoder::new(bytes.as_slice()), schema, Strictness::Panic).unwrap();
    assert_eq!(reopened.version(), Version(4));
    assert_eq!(reopened.keys(), store.keys());
    for key in store.keys() {
        assert_eq!(reopened.get(&key), store.get(&key), "{key}");
    }
}

#[test]
fn test_decoder_and_encoder_are_object_safe() {
    let store = Store::new(schema(), Strictness::Panic);
    let mut buffer = Vec::new();
    {
        let mut encoder = TomlEncoder::new(&mut buffer);
        let encoder: &mut dyn Encoder = &mut encoder;
        store.save(encoder).unwrap();
    }

    let mut decoder = TomlDecoder::new(buffer.as_slice());
    let decoder: &mut dyn Decoder = &mut decoder;
    store.reload(decoder).unwrap();
    assert_eq!(store.int("daemon.port"), 6666);
}
