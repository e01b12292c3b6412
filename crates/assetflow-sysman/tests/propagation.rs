//! State propagation against the file-backed version store

use assetflow_common::{AssetKey, AssetState, AssetType, Config};
use assetflow_storage::{FilesTransaction, StorageManager, shared};
use assetflow_sysman::{
    AssetManagerInterface, AssetVersion, PropagationOutcome, StateUpdater, VERSION_FILE_NAME,
    version_storage,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const SOURCE: &str = "Imagery/src.kiasset";
const DATABASE: &str = "Databases/db.kdatabase";
const PACKET: &str = "Databases/db.kdatabase/pkg.kda";

#[derive(Default)]
struct Notifications(Mutex<Vec<(AssetKey, AssetState)>>);

impl AssetManagerInterface for Notifications {
    fn notify_version_state_change(&self, key: &AssetKey, state: AssetState) {
        self.0.lock().push((key.clone(), state));
    }

    fn notify_version_progress(&self, _key: &AssetKey, _progress: f64) {}
}

fn key(asset_ref: &str) -> AssetKey {
    AssetKey::with_version(asset_ref, 1)
}

fn commit(storage: &StorageManager<AssetVersion>) {
    let mut txn = FilesTransaction::new();
    assert!(storage.save_dirty_to_staging(&mut txn, None));
    txn.commit().unwrap();
}

/// A database whose only packet listens to one imagery source
fn seed(root: &Path) -> (Config, Arc<StorageManager<AssetVersion>>) {
    let config = Config::with_asset_root(root);
    let storage = Arc::new(version_storage(&config));

    let mut source = AssetVersion::new_leaf(key(SOURCE), AssetType::Imagery, "Product");
    source.state = AssetState::Queued;
    source.listeners.push(key(PACKET));

    let mut packet = AssetVersion::new_leaf(key(PACKET), AssetType::Database, "Packet");
    packet.state = AssetState::Waiting;
    packet.inputs.push(key(SOURCE));
    packet.parents.push(key(DATABASE));

    let mut database =
        AssetVersion::new_composite(key(DATABASE), AssetType::Database, "Database", false);
    database.state = AssetState::Waiting;
    database.children.push(key(PACKET));

    for version in [source, packet, database] {
        storage.add_new(version.name.clone(), shared(version));
    }
    commit(&storage);
    (config, storage)
}

fn stored_state(storage: &StorageManager<AssetVersion>, asset_ref: &str) -> AssetState {
    storage.get(&key(asset_ref)).unwrap().unwrap().read().state
}

#[test]
fn test_success_reaches_listener_and_parent() {
    let dir = tempdir().unwrap();
    let (config, storage) = seed(dir.path());
    assert!(
        dir.path()
            .join("Databases/db.kdatabase/ver001")
            .join(VERSION_FILE_NAME)
            .exists()
    );

    let notifications = Arc::new(Notifications::default());
    let updater = StateUpdater::new(storage.clone(), notifications.clone(), dir.path());
    let outcome = updater
        .set_state_for_ref_and_dependents(&key(SOURCE), AssetState::Succeeded, |_| true)
        .unwrap();
    assert_eq!(outcome, PropagationOutcome::Completed);
    assert_eq!(
        *notifications.0.lock(),
        vec![
            (key(SOURCE), AssetState::Succeeded),
            (key(PACKET), AssetState::Queued),
            (key(DATABASE), AssetState::Queued),
        ]
    );
    assert_eq!(storage.dirty_size(), 3);

    commit(&storage);
    let reopened = version_storage(&config);
    assert_eq!(stored_state(&reopened, SOURCE), AssetState::Succeeded);
    assert_eq!(stored_state(&reopened, PACKET), AssetState::Queued);
    assert_eq!(stored_state(&reopened, DATABASE), AssetState::Queued);
}

#[test]
fn test_failure_blocks_listener_and_parent() {
    let dir = tempdir().unwrap();
    let (_config, storage) = seed(dir.path());
    let updater = StateUpdater::new(
        storage.clone(),
        Arc::new(Notifications::default()),
        dir.path(),
    );

    updater
        .set_state_for_ref_and_dependents(&key(SOURCE), AssetState::Failed, |_| true)
        .unwrap();
    assert_eq!(stored_state(&storage, SOURCE), AssetState::Failed);
    assert_eq!(stored_state(&storage, PACKET), AssetState::Blocked);
    assert_eq!(stored_state(&storage, DATABASE), AssetState::Blocked);
}

#[test]
fn test_abort_discards_propagated_states() {
    let dir = tempdir().unwrap();
    let (_config, storage) = seed(dir.path());
    let updater = StateUpdater::new(
        storage.clone(),
        Arc::new(Notifications::default()),
        dir.path(),
    );

    updater
        .set_state_for_ref_and_dependents(&key(SOURCE), AssetState::Succeeded, |_| true)
        .unwrap();
    assert!(storage.is_dirty(&key(SOURCE)));

    storage.abort();
    assert_eq!(storage.dirty_size(), 0);
    assert_eq!(stored_state(&storage, SOURCE), AssetState::Queued);
    assert_eq!(stored_state(&storage, PACKET), AssetState::Waiting);
}
