//! Integration tests for the scislisa-backup binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn scislisa_backup(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("scislisa-backup").unwrap();
    cmd.env("SCISLISA_BACKUP_HOME", home)
        .env_remove("SCISLISA_SNAPSHOT_DIR")
        .env_remove("SCISLISA_KEEP_COUNT")
        .env_remove("POSTGRES_HOST")
        .env_remove("POSTGRES_PASSWORD")
        .env_remove("RESTORE_POSTGRES_HOST")
        .env("SCISLISA_LOG", "off");
    cmd
}

fn seed(home: &Path, stamps: &[&str]) {
    let store = home.join("snapshots");
    fs::create_dir_all(&store).unwrap();
    for stamp in stamps {
        fs::write(
            store.join(format!("scislisa_backup_{}.sql", stamp)),
            "CREATE TABLE authors ();\n",
        )
        .unwrap();
    }
}

#[test]
fn test_cli_help() {
    let home = TempDir::new().unwrap();
    scislisa_backup(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("restore"))
        .stdout(predicate::str::contains("prune"));
}

#[test]
fn test_list_empty_store() {
    let home = TempDir::new().unwrap();
    scislisa_backup(home.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No snapshots found"));
}

#[test]
fn test_list_shows_newest_first() {
    let home = TempDir::new().unwrap();
    seed(home.path(), &["20260101_000000", "20260103_000000", "20260102_000000"]);

    scislisa_backup(home.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::is_match(
            r"(?s)1\. scislisa_backup_20260103_000000\.sql.*2\. scislisa_backup_20260102_000000\.sql",
        )
        .unwrap())
        .stdout(predicate::str::contains("Total: 3 snapshot(s)"));
}

#[test]
fn test_restore_latest_on_empty_store_fails() {
    let home = TempDir::new().unwrap();
    scislisa_backup(home.path())
        .args(["restore", "latest", "--force"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("No snapshot available"));
}

#[test]
fn test_restore_missing_snapshot_fails() {
    let home = TempDir::new().unwrap();
    seed(home.path(), &["20260101_000000"]);

    scislisa_backup(home.path())
        .args(["restore", "scislisa_backup_20260202_120000.sql", "--force"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Snapshot not found"));
}

#[test]
fn test_restore_without_force_is_a_preview() {
    let home = TempDir::new().unwrap();
    seed(home.path(), &["20260101_000000"]);

    scislisa_backup(home.path())
        .arg("restore")
        .assert()
        .success()
        .stdout(predicate::str::contains("scislisa_backup_20260101_000000.sql"))
        .stdout(predicate::str::contains("--force"));
}

#[test]
fn test_prune_preview_deletes_nothing() {
    let home = TempDir::new().unwrap();
    seed(
        home.path(),
        &["20260101_000000", "20260102_000000", "20260103_000000"],
    );

    scislisa_backup(home.path())
        .args(["prune", "--keep", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("To be deleted: 2"));

    assert_eq!(fs::read_dir(home.path().join("snapshots")).unwrap().count(), 3);
}

#[test]
fn test_prune_force() {
    let home = TempDir::new().unwrap();
    seed(
        home.path(),
        &["20260101_000000", "20260102_000000", "20260103_000000"],
    );

    scislisa_backup(home.path())
        .args(["prune", "--keep", "1", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Kept 1, deleted 2"));

    let store = home.path().join("snapshots");
    assert!(store.join("scislisa_backup_20260103_000000.sql").exists());
    assert!(!store.join("scislisa_backup_20260101_000000.sql").exists());

    scislisa_backup(home.path())
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("PRUNE scislisa_backup_20260101_000000.sql"));
}

#[test]
fn test_delete_requires_force() {
    let home = TempDir::new().unwrap();
    seed(home.path(), &["20260101_000000"]);
    let snapshot = home.path().join("snapshots/scislisa_backup_20260101_000000.sql");

    scislisa_backup(home.path())
        .args(["delete", "20260101_000000"])
        .assert()
        .success();
    assert!(snapshot.exists());

    scislisa_backup(home.path())
        .args(["delete", "20260101_000000", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted scislisa_backup_20260101_000000.sql"));
    assert!(!snapshot.exists());
}

#[test]
fn test_info_latest() {
    let home = TempDir::new().unwrap();
    seed(home.path(), &["20260101_000000", "20260105_093000"]);

    scislisa_backup(home.path())
        .args(["info", "latest"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2026-01-05 09:30:00 UTC"))
        .stdout(predicate::str::contains("Manifest: missing"));
}

#[test]
fn test_store_flag_overrides_location() {
    let home = TempDir::new().unwrap();
    let elsewhere = TempDir::new().unwrap();
    fs::write(
        elsewhere.path().join("scislisa_backup_20260101_000000.sql"),
        "dump",
    )
    .unwrap();

    scislisa_backup(home.path())
        .args(["list", "--store"])
        .arg(elsewhere.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("scislisa_backup_20260101_000000.sql"));
}

#[test]
fn test_create_with_missing_pg_dump_fails_cleanly() {
    let home = TempDir::new().unwrap();
    fs::write(
        home.path().join("config.json"),
        r#"{"tools": {"pg_dump": "/nonexistent/pg_dump", "psql": "psql"}}"#,
    )
    .unwrap();

    scislisa_backup(home.path())
        .arg("create")
        .assert()
        .failure()
        .stderr(predicate::str::contains("/nonexistent/pg_dump"));

    let leftovers = fs::read_dir(home.path().join("snapshots"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn test_invalid_keep_count_env_fails() {
    let home = TempDir::new().unwrap();
    scislisa_backup(home.path())
        .env("SCISLISA_KEEP_COUNT", "five")
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("SCISLISA_KEEP_COUNT"));
}

#[test]
fn test_config_show_and_init() {
    let home = TempDir::new().unwrap();

    scislisa_backup(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Keep count:    5"))
        .stdout(predicate::str::contains("Initialized:     no"));

    scislisa_backup(home.path())
        .env("POSTGRES_PASSWORD", "hunter2")
        .args(["config", "init"])
        .assert()
        .success();

    let written = fs::read_to_string(home.path().join("config.json")).unwrap();
    assert!(written.contains("\"keep_count\": 5"));
    assert!(!written.contains("hunter2"));
}

#[test]
fn test_prune_removes_abandoned_partial() {
    let home = TempDir::new().unwrap();
    seed(home.path(), &["20260101_000000"]);
    let abandoned = home
        .path()
        .join("snapshots/.scislisa_backup_20251231_000000.sql.partial");
    let file = fs::File::create(&abandoned).unwrap();
    file.set_modified(std::time::SystemTime::now() - std::time::Duration::from_secs(72 * 3600))
        .unwrap();
    drop(file);

    scislisa_backup(home.path())
        .args(["prune", "--keep", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Abandoned partial files"))
        .stdout(predicate::str::contains(".scislisa_backup_20251231_000000.sql.partial"));
    assert!(abandoned.exists());

    scislisa_backup(home.path())
        .args(["prune", "--keep", "1", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 abandoned partial file(s) removed"));
    assert!(!abandoned.exists());
    assert!(home
        .path()
        .join("snapshots/scislisa_backup_20260101_000000.sql")
        .exists());
}
