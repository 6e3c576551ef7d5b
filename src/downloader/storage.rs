// src/downloader/storage.rs

use crate::{
    constants::layout,
    error::*,
    models::{AudioInfo, Book},
    utils,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

/// Owns the on-disk layout of downloaded books.
///
/// Every write is durable: the payload goes to a temp file in the target
/// directory, is synced, atomically renamed into place, and then the
/// containing directory is synced so the new entry survives a crash.
pub trait StorageService: Send + Sync {
    fn root(&self) -> &Path;
    fn book_dir(&self, book_id: &str) -> AppResult<PathBuf>;

    fn create_book_directory(&self, book_id: &str) -> AppResult<PathBuf>;
    fn save_book_metadata(&self, book: &Book) -> AppResult<()>;
    fn save_audio_info(&self, book_id: &str, info: &AudioInfo) -> AppResult<()>;
    fn save_audio_file(&self, book_id: &str, index: u32, bytes: &[u8]) -> AppResult<()>;
    fn save_cover_image(&self, book_id: &str, bytes: &[u8]) -> AppResult<()>;
    fn delete_book_directory(&self, book_id: &str) -> AppResult<()>;

    /// Every book whose metadata decodes; unreadable entries are skipped.
    fn load_downloaded_books(&self) -> AppResult<Vec<Book>>;
    /// Every subdirectory of the root, whether or not its metadata is readable.
    fn list_book_ids(&self) -> AppResult<Vec<String>>;
    fn load_book(&self, book_id: &str) -> AppResult<Option<Book>>;

    fn check_available_storage(&self, required_bytes: u64) -> bool;
    fn available_space(&self) -> AppResult<u64>;
    fn total_download_size(&self) -> AppResult<u64>;
    fn book_storage_size(&self, book_id: &str) -> AppResult<u64>;
}

pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn ensure_root(&self) -> AppResult<()> {
        if !self.root.is_dir() {
            fs::create_dir_all(&self.root)?;
            if let Some(parent) = self.root.parent().filter(|p| !p.as_os_str().is_empty()) {
                sync_dir(parent)?;
            }
        }
        Ok(())
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> AppResult<()> {
        let json = serde_json::to_vec_pretty(value)?;
        durable_write(path, &json)
    }
}

impl StorageService for FileStorage {
    fn root(&self) -> &Path {
        &self.root
    }

    fn book_dir(&self, book_id: &str) -> AppResult<PathBuf> {
        let dir = utils::secure_join_path(&self.root, Path::new(book_id))?;
        if dir.parent() != Some(self.root.as_path()) {
            return Err(AppError::Security(format!("invalid book id '{}'", book_id)));
        }
        Ok(dir)
    }

    fn create_book_directory(&self, book_id: &str) -> AppResult<PathBuf> {
        self.ensure_root()?;
        let dir = self.book_dir(book_id)?;
        fs::create_dir_all(dir.join(layout::AUDIO_DIR))?;
        sync_dir(&dir)?;
        sync_dir(&self.root)?;
        debug!("Created book directory {}", dir.display());
        Ok(dir)
    }

    fn save_book_metadata(&self, book: &Book) -> AppResult<()> {
        let path = self.book_dir(&book.id)?.join(layout::METADATA_FILE);
        self.write_json(&path, book)?;
        debug!("Saved metadata for '{}'", book.id);
        Ok(())
    }

    fn save_audio_info(&self, book_id: &str, info: &AudioInfo) -> AppResult<()> {
        let path = self.book_dir(book_id)?.join(layout::AUDIO_INFO_FILE);
        self.write_json(&path, info)?;
        debug!(
            "Saved audio manifest for '{}' ({} tracks)",
            book_id, info.audio_track_count
        );
        Ok(())
    }

    fn save_audio_file(&self, book_id: &str, index: u32, bytes: &[u8]) -> AppResult<()> {
        let audio_dir = self.book_dir(book_id)?.join(layout::AUDIO_DIR);
        if !audio_dir.is_dir() {
            fs::create_dir_all(&audio_dir)?;
            if let Some(parent) = audio_dir.parent() {
                sync_dir(parent)?;
            }
        }
        durable_write(&audio_dir.join(layout::audio_file_name(index)), bytes)
    }

    fn save_cover_image(&self, book_id: &str, bytes: &[u8]) -> AppResult<()> {
        let path = self.book_dir(book_id)?.join(layout::COVER_FILE);
        durable_write(&path, bytes)
    }

    fn delete_book_directory(&self, book_id: &str) -> AppResult<()> {
        let dir = self.book_dir(book_id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Book directory {} already gone", dir.display());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        sync_dir(&self.root)?;
        info!("Deleted book directory {}", dir.display());
        Ok(())
    }

    fn load_downloaded_books(&self) -> AppResult<Vec<Book>> {
        let mut books = Vec::new();
        for book_id in self.list_book_ids()? {
            match self.load_book(&book_id) {
                Ok(Some(book)) => books.push(book),
                Ok(None) => debug!("Skipping '{}': no metadata", book_id),
                Err(e) => warn!("Skipping '{}': unreadable metadata ({})", book_id, e),
            }
        }
        Ok(books)
    }

    fn list_book_ids(&self) -> AppResult<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn load_book(&self, book_id: &str) -> AppResult<Option<Book>> {
        let path = self.book_dir(book_id)?.join(layout::METADATA_FILE);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&content)?))
    }

    fn check_available_storage(&self, required_bytes: u64) -> bool {
        match self.available_space() {
            Ok(available) => {
                debug!(
                    "Free space check: available {} bytes, required {} bytes",
                    available, required_bytes
                );
                available >= required_bytes
            }
            Err(e) => {
                warn!("Could not determine free space: {}", e);
                false
            }
        }
    }

    fn available_space(&self) -> AppResult<u64> {
        // the root may not exist yet; measure the closest existing ancestor
        let probe = self
            .root
            .ancestors()
            .find(|p| p.is_dir())
            .unwrap_or_else(|| Path::new("."));
        Ok(fs2::available_space(probe)?)
    }

    fn total_download_size(&self) -> AppResult<u64> {
        if !self.root.is_dir() {
            return Ok(0);
        }
        dir_size(&self.root)
    }

    fn book_storage_size(&self, book_id: &str) -> AppResult<u64> {
        let dir = self.book_dir(book_id)?;
        if !dir.is_dir() {
            return Ok(0);
        }
        dir_size(&dir)
    }
}

/// Write-then-sync-file-then-sync-directory.
pub fn durable_write(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| AppError::Security(format!("'{}' has no parent directory", path.display())))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    let file = tmp.persist(path)?;
    file.sync_all()?;
    sync_dir(dir)
}

/// Flushes directory metadata (entry creation, rename, removal) to disk.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> AppResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> AppResult<()> {
    // directory handles cannot be synced here; the rename itself is durable
    Ok(())
}

fn dir_size(dir: &Path) -> AppResult<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            total += dir_size(&entry.path())?;
        } else if file_type.is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

