// tests/validation_test.rs

mod common;

use common::*;
use shelf_dl::{
    constants::layout,
    downloader::{BookValidator, FileStorage, FileValidator, StorageService},
    models::ValidationResult,
};
use std::{fs, path::Path};
use tempfile::tempdir;

fn reason(validator: &FileValidator, id: &str) -> String {
    match validator.validate_book_integrity(id) {
        ValidationResult::Invalid(reason) => reason,
        ValidationResult::Valid => "valid".to_string(),
    }
}

fn audio_path(root: &Path, id: &str, index: u32) -> std::path::PathBuf {
    root.join(id).join(layout::AUDIO_DIR).join(layout::audio_file_name(index))
}

#[test]
fn test_checks_run_in_order() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let storage = FileStorage::new(root);
    let validator = FileValidator::new(root);

    assert_eq!(reason(&validator, "ghost"), "Metadata file missing");

    storage.create_book_directory("b1").unwrap();
    fs::write(root.join("b1").join(layout::METADATA_FILE), b"{\"id\": 7}").unwrap();
    assert_eq!(reason(&validator, "b1"), "Invalid metadata file");

    let with_cover = book("b1", "L1", true);
    storage.save_book_metadata(&with_cover).unwrap();
    assert_eq!(reason(&validator, "b1"), "Audio info missing");

    write_book_fixture(&storage, &with_cover, 3, 2);
    fs::remove_file(root.join("b1").join(layout::COVER_FILE)).unwrap();
    assert_eq!(reason(&validator, "b1"), "Missing audio track 2");

    fs::write(audio_path(root, "b1", 2), vec![0u8; 10 * 1024 - 1]).unwrap();
    assert_eq!(reason(&validator, "b1"), "Audio track 2 is corrupted");

    fs::write(audio_path(root, "b1", 2), vec![0u8; 10 * 1024]).unwrap();
    assert_eq!(reason(&validator, "b1"), "Cover image missing");

    fs::write(root.join("b1").join(layout::COVER_FILE), vec![0xFFu8; 1023]).unwrap();
    assert_eq!(reason(&validator, "b1"), "Cover image is corrupted");

    fs::write(root.join("b1").join(layout::COVER_FILE), jpeg_bytes()).unwrap();
    assert_eq!(validator.validate_book_integrity("b1"), ValidationResult::Valid);
}

#[test]
fn test_validation_is_idempotent() {
    let dir = tempdir().unwrap();
    let storage = FileStorage::new(dir.path());
    write_book_fixture(&storage, &book("ok", "L1", false), 2, 2);
    write_book_fixture(&storage, &book("short", "L2", false), 2, 1);
    let validator = FileValidator::new(dir.path());

    for id in ["ok", "short", "missing"] {
        let first = validator.validate_book_integrity(id);
        let second = validator.validate_book_integrity(id);
        assert_eq!(first, second, "{id}");
    }
    assert!(validator.validate_book_integrity("ok").is_valid());
}

#[test]
fn test_track_count_comes_from_manifest_not_chapters() {
    let dir = tempdir().unwrap();
    let storage = FileStorage::new(dir.path());
    // one chapter, but the session delivered three files
    write_book_fixture(&storage, &book("b1", "L1", false), 3, 3);
    let validator = FileValidator::new(dir.path());
    assert!(validator.validate_book_integrity("b1").is_valid());

    // extra files beyond the manifest are ignored
    storage.save_audio_file("b1", 7, &vec![1u8; AUDIO_BYTES]).unwrap();
    assert!(validator.validate_book_integrity("b1").is_valid());
}

#[test]
fn test_stray_cover_must_still_be_sound() {
    let dir = tempdir().unwrap();
    let storage = FileStorage::new(dir.path());
    write_book_fixture(&storage, &book("b1", "L1", false), 1, 1);
    let validator = FileValidator::new(dir.path());

    storage.save_cover_image("b1", &[0xFF, 0xD8, 0xFF]).unwrap();
    assert_eq!(reason(&validator, "b1"), "Cover image is corrupted");
}

#[test]
fn test_validate_file_threshold() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("f.bin");
    fs::write(&path, vec![0u8; 100]).unwrap();
    let validator = FileValidator::new(dir.path());

    assert!(validator.validate_file(&path, 100));
    assert!(!validator.validate_file(&path, 101));
    assert!(!validator.validate_file(&dir.path().join("absent"), 0));
    assert!(!validator.validate_file(dir.path(), 0));
}
