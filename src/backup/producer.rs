//! Dump Producer
//!
//! Streams a full logical export of the source database into a new snapshot.
//! The export lands in a partial file first and is only published under its
//! snapshot name once the exporter reported success, so other components
//! never see a half-written dump as complete.

use std::io::{BufWriter, Write};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::engine::{ConnectionConfig, Exporter};
use crate::error::SnapshotResult;
use crate::store::{PartialSnapshot, Snapshot, SnapshotManifest, SnapshotName, SnapshotStore};

const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// One dump attempt and the name it ran under
#[derive(Debug)]
pub struct DumpAttempt {
    /// Name of the claimed partial file, or the intended name when no
    /// partial could be claimed
    pub name: SnapshotName,
    pub result: SnapshotResult<Snapshot>,
}

/// Creates snapshots in a store using an exporter
pub struct DumpProducer<'a> {
    store: &'a SnapshotStore,
    exporter: &'a dyn Exporter,
}

impl<'a> DumpProducer<'a> {
    pub fn new(store: &'a SnapshotStore, exporter: &'a dyn Exporter) -> Self {
        Self { store, exporter }
    }

    /// Take a snapshot of `source`
    ///
    /// On any error the partial file is removed and the store is left as it
    /// was before the call.
    pub fn create_snapshot(&self, source: &ConnectionConfig) -> SnapshotResult<Snapshot> {
        self.attempt(source).result
    }

    /// Like [`create_snapshot`](Self::create_snapshot), also reporting the
    /// name the dump was written under when it fails
    pub fn attempt(&self, source: &ConnectionConfig) -> DumpAttempt {
        let started_at = Utc::now();
        let intended = self.store.name_for(started_at);
        let partial = match self.store.begin(intended.clone()) {
            Ok(partial) => partial,
            Err(e) => {
                return DumpAttempt {
                    name: intended,
                    result: Err(e),
                }
            }
        };
        let name = partial.name().clone();
        let result = self.export_into(partial, source, started_at);
        DumpAttempt { name, result }
    }

    fn export_into(
        &self,
        mut partial: PartialSnapshot,
        source: &ConnectionConfig,
        started_at: DateTime<Utc>,
    ) -> SnapshotResult<Snapshot> {
        let name = partial.name().clone();

        info!(
            snapshot = %name,
            source = %source.identifier(),
            exporter = self.exporter.name(),
            "creating snapshot"
        );

        let exported = {
            let mut writer = BufWriter::new(partial.writer()?);
            self.exporter
                .export(source, &mut writer)
                .and_then(|()| writer.flush().map_err(Into::into))
        };

        if let Err(e) = exported {
            warn!(snapshot = %name, error = %e, "export failed, discarding partial snapshot");
            return Err(e);
        }

        let exporter = self.exporter.name().to_string();
        let source_id = source.identifier();
        let snapshot = self.store.publish(partial, |final_name, size_bytes| SnapshotManifest {
            schema_version: MANIFEST_SCHEMA_VERSION,
            name: final_name.file_name(),
            source: source_id,
            exporter,
            created_at: started_at,
            completed_at: Utc::now(),
            size_bytes,
        })?;

        info!(
            snapshot = %snapshot.name,
            size_bytes = snapshot.size_bytes,
            "snapshot complete"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SnapshotError;
    use std::io;
    use tempfile::TempDir;

    enum Behavior {
        Succeed(&'static str),
        FailAfter(&'static str),
        Refuse,
        DiskFull,
    }

    struct FakeExporter(Behavior);

    impl Exporter for FakeExporter {
        fn name(&self) -> &str {
            "fake"
        }

        fn export(&self, _source: &ConnectionConfig, out: &mut dyn Write) -> SnapshotResult<()> {
            match self.0 {
                Behavior::Succeed(body) => {
                    out.write_all(body.as_bytes())?;
                    Ok(())
                }
                Behavior::FailAfter(body) => {
                    out.write_all(body.as_bytes())?;
                    out.flush()?;
                    Err(SnapshotError::ExportProcess("server closed the connection".into()))
                }
                Behavior::Refuse => Err(SnapshotError::Connection("connection refused".into())),
                Behavior::DiskFull => {
                    Err(io::Error::new(io::ErrorKind::StorageFull, "no space left on device").into())
                }
            }
        }
    }

    fn create_test_store() -> (SnapshotStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path().to_path_buf(), "scislisa", "sql");
        (store, temp_dir)
    }

    fn entries(store: &SnapshotStore) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_create_snapshot() {
        let (store, _temp) = create_test_store();
        let exporter = FakeExporter(Behavior::Succeed("CREATE TABLE faculty ();\n"));

        let snapshot = DumpProducer::new(&store, &exporter)
            .create_snapshot(&ConnectionConfig::default())
            .unwrap();

        assert!(snapshot.path.exists());
        assert!(snapshot.file_name().starts_with("scislisa_backup_"));
        assert_eq!(
            std::fs::read_to_string(&snapshot.path).unwrap(),
            "CREATE TABLE faculty ();\n"
        );

        let manifest = snapshot.manifest.unwrap();
        assert_eq!(manifest.exporter, "fake");
        assert_eq!(manifest.source, "postgres@localhost:5432/scislisa-service");
        assert_eq!(manifest.size_bytes, snapshot.size_bytes);

        // Just the dump and its manifest
        assert_eq!(entries(&store).len(), 2);
    }

    #[test]
    fn test_failed_export_leaves_no_file() {
        let (store, _temp) = create_test_store();
        let exporter = FakeExporter(Behavior::FailAfter("CREATE TABLE faculty ();\nCOPY"));

        let err = DumpProducer::new(&store, &exporter)
            .create_snapshot(&ConnectionConfig::default())
            .unwrap_err();

        assert!(matches!(err, SnapshotError::ExportProcess(_)));
        assert!(entries(&store).is_empty());
    }

    #[test]
    fn test_connection_error_leaves_no_file() {
        let (store, _temp) = create_test_store();
        let exporter = FakeExporter(Behavior::Refuse);

        let err = DumpProducer::new(&store, &exporter)
            .create_snapshot(&ConnectionConfig::default())
            .unwrap_err();

        assert!(matches!(err, SnapshotError::Connection(_)));
        assert!(entries(&store).is_empty());
    }

    #[test]
    fn test_disk_full_leaves_no_file() {
        let (store, _temp) = create_test_store();
        let exporter = FakeExporter(Behavior::DiskFull);

        let err = DumpProducer::new(&store, &exporter)
            .create_snapshot(&ConnectionConfig::default())
            .unwrap_err();

        assert!(matches!(err, SnapshotError::DiskFull(_)));
        assert!(entries(&store).is_empty());
    }

    #[test]
    fn test_failed_attempt_reports_claimed_name() {
        let (store, _temp) = create_test_store();
        store.ensure_exists().unwrap();
        // Occupy the base name of the next few seconds
        let now = Utc::now();
        for offset in 0..3 {
            let taken = store.name_for(now + chrono::Duration::seconds(offset));
            std::fs::write(store.path_of(&taken), "earlier").unwrap();
        }

        let attempt = DumpProducer::new(&store, &FakeExporter(Behavior::Refuse))
            .attempt(&ConnectionConfig::default());

        assert!(matches!(attempt.result, Err(SnapshotError::Connection(_))));
        assert_eq!(attempt.name.sequence(), 1);
        assert_ne!(attempt.name, store.name_for(attempt.name.created_at()));
        assert!(!store.path_of(&attempt.name).exists());
        assert!(store.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_back_to_back_runs_get_distinct_names() {
        let (store, _temp) = create_test_store();
        let exporter = FakeExporter(Behavior::Succeed("dump"));
        let producer = DumpProducer::new(&store, &exporter);

        let first = producer.create_snapshot(&ConnectionConfig::default()).unwrap();
        let second = producer.create_snapshot(&ConnectionConfig::default()).unwrap();

        assert_ne!(first.file_name(), second.file_name());
        assert!(second.name > first.name);
        assert_eq!(store.list_complete().unwrap().len(), 2);
    }
}
