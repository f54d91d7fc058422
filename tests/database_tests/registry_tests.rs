//! Tests for DatabaseRegistry
//!
//! These tests verify:
//! - Create/lookup/drop and their error cases
//! - Catalogue persistence across reloads
//! - Rollback when the catalogue cannot be written
//! - Default database creation and shutdown
//! - Registry operations never wait on a draining database

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel;
use elevator::config::{Config, StorageEngineConfig};
use elevator::database::{Catalogue, DatabaseRegistry, Job, MountStatus, Reply};
use elevator::error::ElevatorError;
use elevator::protocol::{Command, Identity};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn small_config() -> StorageEngineConfig {
    StorageEngineConfig {
        cache_size: 1024 * 1024,
        write_buffer_size: 1024 * 1024,
        ..StorageEngineConfig::default()
    }
}

fn catalogue_path(temp: &TempDir) -> PathBuf {
    temp.path().join("store")
}

fn data_root(temp: &TempDir) -> PathBuf {
    temp.path().join("data")
}

fn load_registry(temp: &TempDir) -> DatabaseRegistry {
    DatabaseRegistry::load(catalogue_path(temp), data_root(temp), small_config()).unwrap()
}

fn put_job(key: &str, value: &str, reply_to: &channel::Sender<Reply>) -> Job {
    Job {
        identity: Identity::new(vec![Bytes::from_static(b"test")]),
        command: Command::Put {
            key: key.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
        },
        reply_to: reply_to.clone(),
    }
}

// =============================================================================
// Create / Lookup Tests
// =============================================================================

#[test]
fn test_empty_registry_without_catalogue() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);

    assert!(registry.is_empty());
    assert!(registry.list().is_empty());
}

#[test]
fn test_create_and_lookup() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);

    let created = registry.create("alpha").unwrap();
    let found = registry.lookup("alpha").unwrap();

    assert_eq!(created.id(), found.id());
    assert_eq!(found.path(), data_root(&temp).join("alpha").as_path());
    assert_eq!(found.status(), MountStatus::Unmounted);
    assert!(found.path().is_dir());
    assert!(catalogue_path(&temp).exists());
}

#[test]
fn test_create_duplicate_is_database_exists() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);

    registry.create("alpha").unwrap();

    assert!(matches!(
        registry.create("alpha"),
        Err(ElevatorError::DatabaseExists(_))
    ));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_create_invalid_names() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);

    let too_long = "x".repeat(129);
    for name in ["", "has space", "../escape", "dot.name", too_long.as_str()] {
        assert!(
            matches!(
                registry.create(name),
                Err(ElevatorError::InvalidDatabaseName(_))
            ),
            "name {:?} should be rejected",
            name
        );
    }
    assert!(registry.is_empty());
}

#[test]
fn test_lookup_missing_is_database_not_found() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);

    assert!(matches!(
        registry.lookup("missing"),
        Err(ElevatorError::DatabaseNotFound(_))
    ));
    assert!(!registry.contains("missing"));
}

#[test]
fn test_list_is_sorted_with_status() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);

    registry.create("gamma").unwrap();
    registry.create("alpha").unwrap();
    registry.create("beta").unwrap();
    registry.mount("beta").unwrap();

    let listed: Vec<(String, MountStatus)> = registry
        .list()
        .into_iter()
        .map(|info| (info.name, info.status))
        .collect();

    assert_eq!(
        listed,
        vec![
            ("alpha".to_string(), MountStatus::Unmounted),
            ("beta".to_string(), MountStatus::Mounted),
            ("gamma".to_string(), MountStatus::Unmounted),
        ]
    );
    registry.shutdown().unwrap();
}

// =============================================================================
// Drop Tests
// =============================================================================

#[test]
fn test_drop_removes_entry_and_files() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);

    let db = registry.create("alpha").unwrap();
    let path = db.path().to_path_buf();

    registry.drop_database("alpha").unwrap();

    assert!(!registry.contains("alpha"));
    assert!(!path.exists());
    assert!(Catalogue::load(&catalogue_path(&temp))
        .unwrap()
        .databases
        .is_empty());
}

#[test]
fn test_drop_mounted_is_refused() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);

    registry.create("alpha").unwrap();
    registry.mount("alpha").unwrap();

    assert!(matches!(
        registry.drop_database("alpha"),
        Err(ElevatorError::DatabaseMounted(_))
    ));
    assert!(registry.contains("alpha"));

    registry.unmount("alpha").unwrap();
    registry.drop_database("alpha").unwrap();
}

#[test]
fn test_drop_missing_is_database_not_found() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);

    assert!(matches!(
        registry.drop_database("missing"),
        Err(ElevatorError::DatabaseNotFound(_))
    ));
}

#[test]
fn test_create_clears_leftover_directory() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);

    // Files from an earlier "alpha" that were never cleaned up
    let leftover = data_root(&temp).join("alpha");
    fs::create_dir_all(&leftover).unwrap();
    fs::write(leftover.join("000001.sst"), b"stale").unwrap();

    let db = registry.create("alpha").unwrap();

    assert!(db.path().is_dir());
    assert!(!db.path().join("000001.sst").exists());
}

#[test]
fn test_recreate_after_drop_starts_empty() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);
    let (tx, rx) = channel::unbounded();

    registry.create("alpha").unwrap();
    registry.dispatch("alpha", put_job("k", "v", &tx)).unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    registry.unmount("alpha").unwrap();
    registry.drop_database("alpha").unwrap();

    registry.create("alpha").unwrap();
    registry.mount("alpha").unwrap();
    registry.unmount("alpha").unwrap();

    let engine =
        elevator::Engine::open(&data_root(&temp).join("alpha"), &small_config()).unwrap();
    assert_eq!(engine.get(b"k").unwrap(), None);
}

#[test]
fn test_recreate_after_drop_gets_new_id() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);

    let first = registry.create("alpha").unwrap().id().to_string();
    registry.drop_database("alpha").unwrap();
    let second = registry.create("alpha").unwrap().id().to_string();

    assert_ne!(first, second);
}

#[test]
fn test_dispatch_to_dropped_handle_fails() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);
    let (tx, _rx) = channel::unbounded();

    let stale = registry.create("alpha").unwrap();
    registry.drop_database("alpha").unwrap();

    assert!(matches!(
        stale.dispatch(put_job("k", "v", &tx), registry.engine_config()),
        Err(ElevatorError::DatabaseNotFound(_))
    ));
    assert!(matches!(
        stale.mount(registry.engine_config()),
        Err(ElevatorError::DatabaseNotFound(_))
    ));
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_reload_restores_databases_unmounted() {
    let temp = TempDir::new().unwrap();

    let (alpha_id, beta_id) = {
        let registry = load_registry(&temp);
        let alpha = registry.create("alpha").unwrap().id().to_string();
        let beta = registry.create("beta").unwrap().id().to_string();
        registry.mount("alpha").unwrap();
        registry.shutdown().unwrap();
        (alpha, beta)
    };

    let registry = load_registry(&temp);

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.lookup("alpha").unwrap().id(), alpha_id);
    assert_eq!(registry.lookup("beta").unwrap().id(), beta_id);
    assert!(registry
        .list()
        .iter()
        .all(|info| info.status == MountStatus::Unmounted));
}

#[test]
fn test_data_survives_reload() {
    let temp = TempDir::new().unwrap();
    let (tx, rx) = channel::unbounded();

    {
        let registry = load_registry(&temp);
        registry.create("alpha").unwrap();
        registry.dispatch("alpha", put_job("k", "v", &tx)).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        registry.shutdown().unwrap();
    }

    let registry = load_registry(&temp);
    registry.mount("alpha").unwrap();
    registry.unmount("alpha").unwrap();

    let engine =
        elevator::Engine::open(&data_root(&temp).join("alpha"), &small_config()).unwrap();
    assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_corrupt_catalogue_is_rejected() {
    let temp = TempDir::new().unwrap();
    fs::write(catalogue_path(&temp), b"{ not json").unwrap();

    let result = DatabaseRegistry::load(catalogue_path(&temp), data_root(&temp), small_config());

    assert!(matches!(result, Err(ElevatorError::CatalogueCorrupt(_))));
}

#[test]
fn test_catalogue_with_invalid_name_is_rejected() {
    let temp = TempDir::new().unwrap();
    fs::write(
        catalogue_path(&temp),
        br#"{"databases":{"../etc":{"id":"x","path":"/tmp/x"}}}"#,
    )
    .unwrap();

    let result = DatabaseRegistry::load(catalogue_path(&temp), data_root(&temp), small_config());

    assert!(matches!(result, Err(ElevatorError::CatalogueCorrupt(_))));
}

#[test]
fn test_create_rolled_back_when_catalogue_unwritable() {
    let temp = TempDir::new().unwrap();
    // The catalogue's parent is a regular file, so it can never be written
    let blocker = temp.path().join("blocker");
    fs::write(&blocker, b"").unwrap();

    let registry =
        DatabaseRegistry::load(blocker.join("store"), data_root(&temp), small_config()).unwrap();

    assert!(matches!(
        registry.create("alpha"),
        Err(ElevatorError::CataloguePersist(_))
    ));
    assert!(!registry.contains("alpha"));
    assert!(!data_root(&temp).join("alpha").exists());
}

#[test]
fn test_drop_rolled_back_when_catalogue_unwritable() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);
    let db = registry.create("alpha").unwrap();

    // A directory where the temporary catalogue goes blocks the rewrite
    let tmp = temp.path().join("store.tmp");
    fs::create_dir(&tmp).unwrap();

    assert!(matches!(
        registry.drop_database("alpha"),
        Err(ElevatorError::CataloguePersist(_))
    ));
    assert!(registry.contains("alpha"));
    assert!(db.path().exists());

    // The entry is fully usable again
    registry.mount("alpha").unwrap();
    registry.unmount("alpha").unwrap();

    fs::remove_dir(&tmp).unwrap();
    registry.drop_database("alpha").unwrap();
}

#[test]
fn test_failed_catalogue_write_leaves_no_temporary_file() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);

    // A directory at the catalogue path makes the final rename fail
    fs::create_dir(catalogue_path(&temp)).unwrap();

    assert!(matches!(
        registry.create("alpha"),
        Err(ElevatorError::CataloguePersist(_))
    ));
    assert!(!registry.contains("alpha"));
    assert!(!temp.path().join("store.tmp").exists());
    assert!(!data_root(&temp).join("alpha").exists());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_registry_does_not_wait_on_draining_database() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(load_registry(&temp));
    registry.create("a").unwrap();
    registry.create("b").unwrap();

    // Nobody reads a's replies yet, so its drain cannot finish
    let (a_tx, a_rx) = channel::bounded(0);
    for i in 0..5 {
        registry
            .dispatch("a", put_job(&format!("k{}", i), "v", &a_tx))
            .unwrap();
    }

    let unmounter = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.unmount("a"))
    };
    let deadline = Instant::now() + Duration::from_secs(5);
    while registry.lookup("a").unwrap().status() != MountStatus::Unmounting {
        assert!(Instant::now() < deadline, "unmount never started");
        thread::sleep(Duration::from_millis(5));
    }

    // Everything below must finish while a is still draining
    let (done_tx, done_rx) = channel::bounded(1);
    let checker = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            assert!(matches!(
                registry.drop_database("a"),
                Err(ElevatorError::DatabaseMounted(_))
            ));

            let listed: Vec<(String, MountStatus)> = registry
                .list()
                .into_iter()
                .map(|info| (info.name, info.status))
                .collect();
            assert_eq!(
                listed,
                vec![
                    ("a".to_string(), MountStatus::Unmounting),
                    ("b".to_string(), MountStatus::Unmounted),
                ]
            );

            let (tx, rx) = channel::unbounded();
            registry.dispatch("b", put_job("k", "v", &tx)).unwrap();
            assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().response.is_ok());
            done_tx.send(()).unwrap();
        })
    };

    let finished = done_rx.recv_timeout(Duration::from_secs(10));
    for _ in 0..5 {
        a_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
    checker.join().unwrap();
    assert!(finished.is_ok(), "registry blocked behind a draining database");

    unmounter.join().unwrap().unwrap();
    registry.drop_database("a").unwrap();
    registry.shutdown().unwrap();
}

// =============================================================================
// Default Database / Shutdown Tests
// =============================================================================

#[test]
fn test_ensure_default_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);

    assert!(registry.ensure_default("default").unwrap());
    assert!(!registry.ensure_default("default").unwrap());
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_from_config_uses_configured_paths() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .store_path(catalogue_path(&temp))
        .data_root(data_root(&temp))
        .cache_size(1024 * 1024)
        .write_buffer_size(1024 * 1024)
        .build();

    let registry = DatabaseRegistry::from_config(&config).unwrap();

    assert_eq!(registry.catalogue_path(), catalogue_path(&temp).as_path());
    assert_eq!(registry.data_root(), data_root(&temp).as_path());
    assert_eq!(registry.engine_config().cache_size, 1024 * 1024);
}

#[test]
fn test_shutdown_unmounts_everything() {
    let temp = TempDir::new().unwrap();
    let registry = load_registry(&temp);

    for name in ["a", "b", "c"] {
        registry.create(name).unwrap();
        registry.mount(name).unwrap();
    }

    registry.shutdown().unwrap();

    assert!(registry
        .list()
        .iter()
        .all(|info| info.status == MountStatus::Unmounted));
}
