//! Registry Lifecycle Tests
//!
//! End-to-end checks of deduplication, reference counting, memoized
//! serialization and snapshot round trips through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use master_schemas::ledger::{AccountMemoryUsage, AccountRefCounts};
use master_schemas::snapshot::{self, SchemaRecord, SnapshotImage};
use master_schemas::{
    AccountId, ColumnSchema, JsonRenderer, RenderError, SchemaError, SchemaId, SchemaRegistry,
    SchemaRenderer, SortOrder, TableSchema, ValueType,
};

fn schema(value_column: &str) -> TableSchema {
    TableSchema::new(
        vec![
            ColumnSchema::new("id", ValueType::Uint64)
                .sorted(SortOrder::Ascending)
                .required(),
            ColumnSchema::new(value_column, ValueType::String).with_group("default"),
        ],
        true,
        true,
    )
    .unwrap()
}

fn save(registry: &SchemaRegistry) -> Vec<u8> {
    let mut bytes = Vec::new();
    registry.save_snapshot(&mut bytes, false).unwrap();
    bytes
}

fn encode(image: &SnapshotImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    snapshot::write_image(&mut bytes, image, false).unwrap();
    bytes
}

fn record(id: u64, content: TableSchema, refs: &[(&str, i64)], charged: &[(&str, i64)]) -> SchemaRecord {
    SchemaRecord {
        id: SchemaId::new(id),
        content,
        referencing_accounts: refs
            .iter()
            .map(|(a, c)| (AccountId::new(*a), *c))
            .collect::<AccountRefCounts>(),
        charged_memory_usage: charged
            .iter()
            .map(|(a, c)| (AccountId::new(*a), *c))
            .collect::<AccountMemoryUsage>(),
    }
}

// =============================================================================
// Deduplication
// =============================================================================

#[test]
fn test_equal_content_resolves_to_same_object() {
    let mut registry = SchemaRegistry::new();
    let first = registry.resolve(schema("value"));
    // Built independently, equal only structurally.
    let second = registry.resolve(Arc::new(schema("value")));

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_distinct_content_resolves_to_distinct_objects() {
    let mut registry = SchemaRegistry::new();
    let first = registry.resolve(schema("value"));
    let second = registry.resolve(schema("payload"));

    assert!(!Arc::ptr_eq(&first, &second));
    assert_ne!(first.id(), second.id());
}

// =============================================================================
// Reference counting
// =============================================================================

#[test]
fn test_refcount_transitions() {
    let mut registry = SchemaRegistry::new();
    let account = AccountId::new("tmp");
    let object = registry.resolve(schema("value"));

    assert!(registry.ref_by(&object, &account).unwrap());
    assert!(!registry.ref_by(&object, &account).unwrap());
    assert!(!registry.unref_by(&object, &account).unwrap().account_unreferenced);
    assert!(registry.unref_by(&object, &account).unwrap().account_unreferenced);
}

#[test]
fn test_unref_without_reference_underflows() {
    let mut registry = SchemaRegistry::new();
    let object = registry.resolve(schema("value"));
    registry.ref_by(&object, &AccountId::new("sys")).unwrap();

    let err = registry.unref_by(&object, &AccountId::new("tmp")).unwrap_err();
    assert!(matches!(err, SchemaError::RefcountUnderflow { .. }));
    assert_eq!(object.ref_count(&AccountId::new("sys")), 1);
}

#[test]
fn test_release_allocates_new_identity() {
    let mut registry = SchemaRegistry::new();
    let tmp = AccountId::new("tmp");
    let sys = AccountId::new("sys");
    let object = registry.resolve(schema("value"));
    registry.ref_by(&object, &tmp).unwrap();
    registry.ref_by(&object, &sys).unwrap();

    assert!(!registry.unref_by(&object, &tmp).unwrap().object_released);
    assert!(registry.unref_by(&object, &sys).unwrap().object_released);

    let recreated = registry.resolve(schema("value"));
    assert!(!Arc::ptr_eq(&object, &recreated));
    assert!(recreated.id() > object.id());
    registry.check_invariants().unwrap();
}

#[test]
fn test_two_tables_one_account_scenario() {
    let mut registry = SchemaRegistry::new();
    let account = AccountId::new("a");

    let first_table = registry.resolve(schema("value"));
    let second_table = registry.resolve(schema("value"));
    assert!(Arc::ptr_eq(&first_table, &second_table));

    assert!(registry.ref_by(&first_table, &account).unwrap());
    assert!(!registry.ref_by(&second_table, &account).unwrap());

    let dropped_one = registry.unref_by(&first_table, &account).unwrap();
    assert!(!dropped_one.account_unreferenced);
    assert!(!dropped_one.object_released);

    let dropped_two = registry.unref_by(&second_table, &account).unwrap();
    assert!(dropped_two.account_unreferenced);
    assert!(dropped_two.object_released);
    assert!(registry.is_empty());
}

// =============================================================================
// Memoized serialization
// =============================================================================

struct CountingRenderer {
    calls: AtomicUsize,
}

impl SchemaRenderer for CountingRenderer {
    fn render(&self, schema: &TableSchema) -> Result<String, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(std::time::Duration::from_millis(10));
        JsonRenderer::default().render(schema)
    }
}

#[test]
fn test_ten_concurrent_readers_render_once() {
    let renderer = Arc::new(CountingRenderer {
        calls: AtomicUsize::new(0),
    });
    let mut registry = SchemaRegistry::with_renderer(renderer.clone());
    let object = registry.resolve(schema("value"));
    let barrier = Arc::new(Barrier::new(10));

    let readers: Vec<_> = (0..10)
        .map(|_| {
            let object = Arc::clone(&object);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let handle = object.as_serialized_async();
                futures::executor::block_on(handle).unwrap()
            })
        })
        .collect();

    let rendered: Vec<_> = readers.into_iter().map(|r| r.join().unwrap()).collect();
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    assert!(rendered.iter().all(|r| r.as_str() == rendered[0].as_str()));
}

#[test]
fn test_readers_run_alongside_writer() {
    let mut registry = SchemaRegistry::new();
    let account = AccountId::new("tmp");
    let object = registry.resolve(schema("value"));
    registry.ref_by(&object, &account).unwrap();

    let reader = {
        let object = Arc::clone(&object);
        let account = account.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                object.as_serialized_sync().unwrap();
                assert!(object.charged_master_memory_usage(&account) >= 0);
            }
        })
    };

    for usage in 0..200 {
        registry
            .set_charged_master_memory_usage(&object, &account, usage)
            .unwrap();
    }
    reader.join().unwrap();
    assert_eq!(object.charged_master_memory_usage(&account), 199);
}

// =============================================================================
// Snapshots
// =============================================================================

#[test]
fn test_snapshot_round_trip() {
    let mut registry = SchemaRegistry::new();
    let tmp = AccountId::new("tmp");
    let sys = AccountId::new("sys");

    let first = registry.resolve(schema("value"));
    let second = registry.resolve(schema("payload"));
    let third = registry.resolve(schema("gone"));
    registry.ref_by(&first, &tmp).unwrap();
    registry.ref_by(&first, &tmp).unwrap();
    registry.ref_by(&first, &sys).unwrap();
    registry.ref_by(&second, &sys).unwrap();
    registry.ref_by(&third, &sys).unwrap();
    registry.set_charged_master_memory_usage(&first, &tmp, 300).unwrap();
    registry.set_charged_master_memory_usage(&second, &sys, 120).unwrap();
    registry.unref_by(&third, &sys).unwrap();
    first.as_serialized_sync().unwrap();

    let bytes = save(&registry);
    let mut restored = SchemaRegistry::new();
    restored.load_snapshot(bytes.as_slice()).unwrap();
    restored.check_invariants().unwrap();

    assert_eq!(restored.len(), 2);
    for original in registry.iter() {
        let loaded = Arc::clone(restored.get(original.id()).unwrap());
        assert_eq!(loaded.content(), original.content());
        assert_eq!(loaded.referencing_accounts(), original.referencing_accounts());
        assert_eq!(loaded.charged_memory_usage(), original.charged_memory_usage());
        assert!(!loaded.is_serialization_materialized());
        assert!(Arc::ptr_eq(&loaded, &restored.resolve(original.content().as_ref().clone())));
    }

    assert_eq!(save(&restored), bytes);

    // Ids are never reused after a reload.
    let fresh = restored.resolve(schema("new"));
    assert!(fresh.id() > third.id());
}

#[test]
fn test_unreferenced_objects_are_not_persisted() {
    let mut registry = SchemaRegistry::new();
    registry.resolve(schema("pending"));
    registry
        .resolve_and_ref(schema("value"), &AccountId::new("tmp"))
        .unwrap();

    let mut restored = SchemaRegistry::new();
    restored.load_snapshot(save(&registry).as_slice()).unwrap();
    assert_eq!(restored.len(), 1);
    assert!(restored.find(&schema("pending")).is_none());
    assert_eq!(restored.stats().next_id, registry.stats().next_id);
}

#[test]
fn test_snapshot_is_deterministic() {
    let build = |order: &[&str]| {
        let mut registry = SchemaRegistry::new();
        let object = registry.resolve(schema("value"));
        for account in order {
            registry.ref_by(&object, &AccountId::new(*account)).unwrap();
        }
        save(&registry)
    };
    assert_eq!(build(&["tmp", "sys", "intermediate"]), build(&["intermediate", "tmp", "sys"]));
}

#[test]
fn test_load_rejects_duplicate_content() {
    let image = SnapshotImage::new(
        3,
        vec![
            record(1, schema("value"), &[("tmp", 1)], &[]),
            record(2, schema("value"), &[("sys", 1)], &[]),
        ],
    );
    let mut registry = SchemaRegistry::new();
    let err = registry.load_snapshot(encode(&image).as_slice()).unwrap_err();
    assert!(matches!(err, SchemaError::CorruptSnapshot(_)));
}

#[test]
fn test_load_rejects_bad_ledgers() {
    let cases = vec![
        record(1, schema("value"), &[("tmp", 0)], &[]),
        record(1, schema("value"), &[("tmp", -2)], &[]),
        record(1, schema("value"), &[], &[]),
        record(1, schema("value"), &[("tmp", 1)], &[("tmp", -5)]),
        record(1, schema("value"), &[("tmp", 1)], &[("sys", 5)]),
    ];
    for bad in cases {
        let image = SnapshotImage::new(2, vec![bad]);
        let mut registry = SchemaRegistry::new();
        let err = registry.load_snapshot(encode(&image).as_slice()).unwrap_err();
        assert!(matches!(err, SchemaError::CorruptSnapshot(_)), "unexpected {:?}", err);
    }
}

#[test]
fn test_load_rejects_stale_next_id_and_duplicate_ids() {
    let stale = SnapshotImage::new(1, vec![record(1, schema("value"), &[("tmp", 1)], &[])]);
    let duplicate_ids = SnapshotImage::new(
        3,
        vec![
            record(2, schema("value"), &[("tmp", 1)], &[]),
            record(2, schema("payload"), &[("tmp", 1)], &[]),
        ],
    );
    for image in [stale, duplicate_ids] {
        let mut registry = SchemaRegistry::new();
        assert!(matches!(
            registry.load_snapshot(encode(&image).as_slice()),
            Err(SchemaError::CorruptSnapshot(_))
        ));
    }
}

#[test]
fn test_failed_load_leaves_registry_untouched() {
    let mut registry = SchemaRegistry::new();
    let account = AccountId::new("tmp");
    let (object, _) = registry.resolve_and_ref(schema("value"), &account).unwrap();

    let corrupt = SnapshotImage::new(
        3,
        vec![
            record(1, schema("payload"), &[("tmp", 1)], &[]),
            record(2, schema("payload"), &[("tmp", 1)], &[]),
        ],
    );
    assert!(registry.load_snapshot(encode(&corrupt).as_slice()).is_err());

    assert!(object.is_alive());
    assert!(Arc::ptr_eq(&object, &registry.resolve(schema("value"))));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_successful_load_detaches_previous_objects() {
    let mut registry = SchemaRegistry::new();
    let account = AccountId::new("tmp");
    let (old, _) = registry.resolve_and_ref(schema("value"), &account).unwrap();

    let image = SnapshotImage::new(10, vec![record(9, schema("payload"), &[("sys", 2)], &[("sys", 64)])]);
    registry.load_snapshot(encode(&image).as_slice()).unwrap();

    assert!(!old.is_alive());
    assert!(registry.find(&schema("value")).is_none());
    let loaded = registry.get(SchemaId::new(9)).unwrap();
    assert_eq!(loaded.ref_count(&AccountId::new("sys")), 2);
    assert_eq!(loaded.charged_master_memory_usage(&AccountId::new("sys")), 64);
    assert_eq!(registry.stats().next_id, 10);
}

#[test]
fn test_snapshot_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schemas.json");

    let mut registry = SchemaRegistry::new();
    registry
        .resolve_and_ref(schema("value"), &AccountId::new("tmp"))
        .unwrap();
    snapshot::save_to_path(&registry, &path, true).unwrap();
    assert!(!dir.path().join("schemas.json.tmp").exists());

    let mut restored = SchemaRegistry::new();
    snapshot::load_from_path(&mut restored, &path).unwrap();
    assert_eq!(restored.len(), 1);
}
