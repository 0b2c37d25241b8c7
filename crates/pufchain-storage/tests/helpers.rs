use std::fs;

use pufchain_storage::sled_store::SledArchive;
use tempfile::{tempdir, TempDir};

pub fn create_temp_archive() -> (TempDir, SledArchive) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().to_path_buf();
    (
        temp_dir,
        SledArchive::open(&db_path).expect("Failed to open SledArchive"),
    )
}

pub fn teardown_archive(temp_dir: TempDir, archive: SledArchive) {
    let db_path = temp_dir.path().to_path_buf();
    archive.clear().expect("Failed to clear the archive");
    drop(archive);
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    assert!(!db_path.exists(), "Database directory should be removed");
}
