// src/downloader/validation.rs

use crate::{
    constants::{layout, limits},
    models::{AudioInfo, Book, ValidationResult},
};
use log::debug;
use regex::Regex;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

static AUDIO_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^chapter_(\d+)\.mp3$").unwrap());

/// Audits a book directory against its manifest. Never fails: every problem
/// is reported as `ValidationResult::Invalid` with a reason.
pub trait BookValidator: Send + Sync {
    fn validate_book_integrity(&self, book_id: &str) -> ValidationResult;
    fn validate_file(&self, path: &Path, minimum_size: u64) -> bool;
}

pub struct FileValidator {
    root: PathBuf,
}

impl FileValidator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<Result<T, String>> {
        let content = fs::read(path).ok()?;
        Some(serde_json::from_slice(&content).map_err(|e| e.to_string()))
    }

    fn check(&self, book_dir: &Path) -> ValidationResult {
        let book: Book = match Self::read_json(&book_dir.join(layout::METADATA_FILE)) {
            None => return ValidationResult::invalid("Metadata file missing"),
            Some(Err(e)) => {
                debug!("metadata.json in {} does not decode: {}", book_dir.display(), e);
                return ValidationResult::invalid("Invalid metadata file");
            }
            Some(Ok(book)) => book,
        };

        let audio_info: AudioInfo = match Self::read_json(&book_dir.join(layout::AUDIO_INFO_FILE)) {
            Some(Ok(info)) => info,
            _ => return ValidationResult::invalid("Audio info missing"),
        };

        let audio_dir = book_dir.join(layout::AUDIO_DIR);
        for index in 0..audio_info.audio_track_count {
            let path = audio_dir.join(layout::audio_file_name(index));
            if !path.is_file() {
                return ValidationResult::invalid(format!("Missing audio track {index}"));
            }
            if !self.validate_file(&path, limits::MIN_AUDIO_FILE_BYTES) {
                return ValidationResult::invalid(format!("Audio track {index} is corrupted"));
            }
        }

        let cover = book_dir.join(layout::COVER_FILE);
        if cover.is_file() {
            if !self.validate_file(&cover, limits::MIN_COVER_FILE_BYTES) {
                return ValidationResult::invalid("Cover image is corrupted");
            }
        } else if book.has_cover() {
            return ValidationResult::invalid("Cover image missing");
        }

        ValidationResult::Valid
    }
}

impl BookValidator for FileValidator {
    fn validate_book_integrity(&self, book_id: &str) -> ValidationResult {
        let book_dir = match crate::utils::secure_join_path(&self.root, Path::new(book_id)) {
            Ok(dir) => dir,
            Err(e) => return ValidationResult::invalid(e.to_string()),
        };
        let result = self.check(&book_dir);
        if let ValidationResult::Invalid(reason) = &result {
            debug!("Book '{}' failed validation: {}", book_id, reason);
        }
        result
    }

    fn validate_file(&self, path: &Path, minimum_size: u64) -> bool {
        fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() >= minimum_size)
    }
}

/// Indices of the `chapter_<n>.mp3` files physically present for a book.
pub fn audio_file_indices(book_dir: &Path) -> Vec<u32> {
    let Ok(entries) = fs::read_dir(book_dir.join(layout::AUDIO_DIR)) else {
        return Vec::new();
    };
    let mut indices: Vec<u32> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            AUDIO_FILE_RE
                .captures(name.to_str()?)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
        })
        .collect();
    indices.sort_unstable();
    indices
}
