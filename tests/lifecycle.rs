//! End-to-end lifecycle tests against an in-memory database engine

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};

use chrono::{TimeZone, Utc};
use scislisa_backup::backup::{
    RestoreSelector, RetentionEnforcer, SnapshotManager, SnapshotSelector,
};
use scislisa_backup::config::RetentionPolicy;
use scislisa_backup::engine::{ConnectionConfig, Exporter, Importer};
use scislisa_backup::error::SnapshotResult;
use scislisa_backup::store::{SnapshotManifest, SnapshotStore};
use scislisa_backup::SnapshotError;
use tempfile::TempDir;

/// Table name to row count
type Tables = BTreeMap<String, u64>;

/// A database whose dump format is one `table rows` line per table
#[derive(Default)]
struct MemoryDatabase {
    tables: RefCell<Tables>,
    fail_midway: Cell<bool>,
    imports: Cell<usize>,
}

impl MemoryDatabase {
    fn with_tables(tables: &[(&str, u64)]) -> Self {
        let db = Self::default();
        for (name, rows) in tables {
            db.tables.borrow_mut().insert(name.to_string(), *rows);
        }
        db
    }

    fn snapshot(&self) -> Tables {
        self.tables.borrow().clone()
    }
}

impl Exporter for MemoryDatabase {
    fn name(&self) -> &str {
        "memory"
    }

    fn export(&self, _source: &ConnectionConfig, out: &mut dyn Write) -> SnapshotResult<()> {
        for (i, (table, rows)) in self.tables.borrow().iter().enumerate() {
            if self.fail_midway.get() && i == 1 {
                return Err(SnapshotError::ExportProcess(
                    "server closed the connection unexpectedly".into(),
                ));
            }
            writeln!(out, "{} {}", table, rows)?;
        }
        Ok(())
    }
}

impl Importer for MemoryDatabase {
    fn name(&self) -> &str {
        "memory"
    }

    fn import(&self, _target: &ConnectionConfig, input: &mut dyn Read) -> SnapshotResult<()> {
        self.imports.set(self.imports.get() + 1);
        let mut restored = Tables::new();
        for line in BufReader::new(input).lines() {
            let line = line?;
            let (table, rows) = line
                .split_once(' ')
                .ok_or_else(|| SnapshotError::ImportProcess(format!("bad line: {}", line)))?;
            let rows = rows
                .parse()
                .map_err(|_| SnapshotError::ImportProcess(format!("bad row count: {}", line)))?;
            restored.insert(table.to_string(), rows);
        }
        *self.tables.borrow_mut() = restored;
        Ok(())
    }
}

fn create_test_store() -> (SnapshotStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = SnapshotStore::new(temp_dir.path().join("snapshots"), "scislisa", "sql");
    (store, temp_dir)
}

fn complete_names(store: &SnapshotStore) -> Vec<String> {
    store
        .list_complete()
        .unwrap()
        .into_iter()
        .map(|s| s.file_name())
        .collect()
}

/// Publish a snapshot stamped with a fixed time, as a dump run on that day would
fn dated_run(store: &SnapshotStore, day: u32) {
    let created_at = Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap();
    let mut partial = store.begin(store.name_for(created_at)).unwrap();
    writeln!(partial.writer().unwrap(), "publications {}", day).unwrap();
    store
        .publish(partial, |name, size_bytes| SnapshotManifest {
            schema_version: 1,
            name: name.file_name(),
            source: "postgres@localhost:5432/scislisa-service".into(),
            exporter: "memory".into(),
            created_at,
            completed_at: created_at,
            size_bytes,
        })
        .unwrap();
}

#[test]
fn test_retention_after_every_run() {
    let keep = 3;
    let (store, _temp) = create_test_store();
    let manager = SnapshotManager::new(store, RetentionPolicy::keep(keep));
    let db = MemoryDatabase::with_tables(&[("authors", 10), ("publications", 42)]);

    let mut created = Vec::new();
    for run in 1..=7usize {
        let outcome = manager
            .run_backup(&db, &ConnectionConfig::default(), true)
            .unwrap();
        created.push(outcome.snapshot.file_name());

        let remaining = complete_names(manager.store());
        assert_eq!(remaining.len(), run.min(keep as usize));

        let mut expected: Vec<String> = created.iter().rev().take(keep as usize).cloned().collect();
        expected.sort();
        expected.reverse();
        assert_eq!(remaining, expected);
    }
}

#[test]
fn test_failed_dump_leaves_store_unchanged() {
    let (store, _temp) = create_test_store();
    let manager = SnapshotManager::new(store, RetentionPolicy::keep(5));
    let db = MemoryDatabase::with_tables(&[("authors", 10), ("publications", 42)]);

    manager
        .run_backup(&db, &ConnectionConfig::default(), true)
        .unwrap();
    let before = complete_names(manager.store());

    db.fail_midway.set(true);
    let err = manager
        .run_backup(&db, &ConnectionConfig::default(), true)
        .unwrap_err();

    assert!(matches!(err, SnapshotError::ExportProcess(_)));
    assert_eq!(complete_names(manager.store()), before);
    assert!(manager.store().list_pending().unwrap().is_empty());
}

#[test]
fn test_prune_twice_is_idempotent() {
    let (store, _temp) = create_test_store();
    for day in 1..=6 {
        dated_run(&store, day);
    }
    let enforcer = RetentionEnforcer::new(&store);

    enforcer.prune(4).unwrap();
    let first = complete_names(&store);
    enforcer.prune(4).unwrap();

    assert_eq!(complete_names(&store), first);
    assert_eq!(first.len(), 4);
}

#[test]
fn test_dump_then_restore_round_trip() {
    let (store, _temp) = create_test_store();
    let manager = SnapshotManager::new(store, RetentionPolicy::default());
    let source = MemoryDatabase::with_tables(&[
        ("authors", 120),
        ("faculty", 35),
        ("publications", 2048),
    ]);
    let at_dump_time = source.snapshot();

    let run = manager
        .run_backup(&source, &ConnectionConfig::default(), true)
        .unwrap();
    source.tables.borrow_mut().insert("publications".into(), 9999);

    let target = MemoryDatabase::default();
    manager
        .restore(
            &target,
            &SnapshotSelector::Named(run.snapshot.file_name()),
            &ConnectionConfig::default(),
        )
        .unwrap();

    assert_eq!(target.snapshot(), at_dump_time);
}

#[test]
fn test_latest_on_empty_store() {
    let (store, _temp) = create_test_store();

    let err = RestoreSelector::new(&store)
        .resolve(&SnapshotSelector::Latest)
        .unwrap_err();

    assert!(matches!(err, SnapshotError::NoSnapshotAvailable(_)));
}

#[test]
fn test_seven_dated_runs_keep_five() {
    let (store, _temp) = create_test_store();
    let enforcer = RetentionEnforcer::new(&store);

    for day in 1..=7 {
        dated_run(&store, day);
        enforcer.prune(5).unwrap();
    }

    assert_eq!(
        complete_names(&store),
        vec![
            "scislisa_backup_20260107_000000.sql",
            "scislisa_backup_20260106_000000.sql",
            "scislisa_backup_20260105_000000.sql",
            "scislisa_backup_20260104_000000.sql",
            "scislisa_backup_20260103_000000.sql",
        ]
    );
}

#[test]
fn test_missing_snapshot_never_reaches_importer() {
    let (store, _temp) = create_test_store();
    dated_run(&store, 1);
    let manager = SnapshotManager::new(store, RetentionPolicy::default());
    let target = MemoryDatabase::with_tables(&[("authors", 7)]);

    let err = manager
        .restore(
            &target,
            &SnapshotSelector::Named("scislisa_backup_20260202_120000.sql".into()),
            &ConnectionConfig::default(),
        )
        .unwrap_err();

    assert!(matches!(err, SnapshotError::SnapshotNotFound(_)));
    assert_eq!(target.imports.get(), 0);
    assert_eq!(target.snapshot().get("authors"), Some(&7));
}
