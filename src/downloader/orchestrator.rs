// src/downloader/orchestrator.rs

use super::{
    retry::{RetryPolicy, run_with_retry},
    storage::StorageService,
    transport::NetworkTransport,
    validation::BookValidator,
};
use crate::{
    client::BookApi,
    constants::{self, progress},
    error::*,
    models::{AudioInfo, Book, DownloadProgress, DownloadStage, ValidationResult},
    utils,
};
use dashmap::{DashMap, mapref::entry::Entry};
use log::{debug, error, info, warn};
use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeaseHolder {
    Download,
    Healing,
}

struct LeaseEntry {
    generation: u64,
    holder: LeaseHolder,
    token: CancellationToken,
}

/// Registry of books someone is working on. Holding an entry is the
/// exclusive right to write into that book's directory; the entry lives
/// until the holder's lease is dropped, even after a cancel.
#[derive(Clone, Default)]
pub struct ActiveDownloads {
    entries: Arc<DashMap<String, LeaseEntry>>,
    generation: Arc<AtomicU64>,
    released: Arc<Notify>,
}

impl ActiveDownloads {
    pub fn contains(&self, book_id: &str) -> bool {
        self.entries.contains_key(book_id)
    }

    fn claim(&self, book_id: &str, holder: LeaseHolder) -> Result<DownloadLease, LeaseHolder> {
        match self.entries.entry(book_id.to_string()) {
            Entry::Occupied(slot) => Err(slot.get().holder),
            Entry::Vacant(slot) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let token = CancellationToken::new();
                slot.insert(LeaseEntry {
                    generation,
                    holder,
                    token: token.clone(),
                });
                Ok(DownloadLease {
                    registry: self.clone(),
                    book_id: book_id.to_string(),
                    generation,
                    token,
                })
            }
        }
    }

    pub(crate) fn acquire(&self, book_id: &str, holder: LeaseHolder) -> AppResult<DownloadLease> {
        self.claim(book_id, holder)
            .map_err(|_| AppError::AlreadyDownloading(book_id.to_string()))
    }

    /// Takes a download lease, waiting out a healing check of the same book.
    /// Fails at once if another download holds it.
    pub(crate) async fn acquire_for_download(&self, book_id: &str) -> AppResult<DownloadLease> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            match self.claim(book_id, LeaseHolder::Download) {
                Ok(lease) => return Ok(lease),
                Err(LeaseHolder::Download) => {
                    return Err(AppError::AlreadyDownloading(book_id.to_string()));
                }
                Err(LeaseHolder::Healing) => {
                    debug!("'{}' is being checked by healing, waiting", book_id);
                    released.await;
                }
            }
        }
    }

    /// Signals the running download, if any. The entry stays until the task
    /// has actually stopped.
    pub fn cancel(&self, book_id: &str) -> bool {
        match self.entries.get(book_id) {
            Some(entry) if entry.holder == LeaseHolder::Download => {
                entry.token.cancel();
                true
            }
            _ => false,
        }
    }
}

pub(crate) struct DownloadLease {
    registry: ActiveDownloads,
    book_id: String,
    generation: u64,
    token: CancellationToken,
}

impl Drop for DownloadLease {
    fn drop(&mut self) {
        self.registry
            .entries
            .remove_if(&self.book_id, |_, entry| entry.generation == self.generation);
        self.registry.released.notify_waiters();
    }
}

struct StageReporter {
    book_id: String,
    callback: ProgressCallback,
    last: AtomicU64,
}

impl StageReporter {
    fn report(&self, fraction: f64, message: impl Into<String>, stage: DownloadStage) {
        self.last.store(fraction.to_bits(), Ordering::Relaxed);
        let update = DownloadProgress::new(&self.book_id, fraction, message, stage);
        debug!(
            "[{}] {:.0}% {}: {}",
            update.book_id,
            update.progress * 100.0,
            update.stage,
            update.message
        );
        (self.callback)(update);
    }

    fn fail(&self, error: &AppError) {
        let last = f64::from_bits(self.last.load(Ordering::Relaxed));
        self.report(last, error.to_string(), DownloadStage::Failed);
    }
}

fn audio_progress(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return progress::AUDIO_START;
    }
    progress::AUDIO_START + progress::AUDIO_SPAN * (completed as f64 / total as f64)
}

fn checkpoint(cancel: &CancellationToken) -> AppResult<()> {
    if cancel.is_cancelled() {
        Err(AppError::Cancelled)
    } else {
        Ok(())
    }
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = AppResult<T>>,
) -> AppResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        res = fut => res,
    }
}

/// Drives one book through the download stages.
pub struct DownloadOrchestrator {
    api: Arc<dyn BookApi>,
    transport: Arc<dyn NetworkTransport>,
    storage: Arc<dyn StorageService>,
    validator: Arc<dyn BookValidator>,
    retry_policy: Arc<dyn RetryPolicy>,
    active: ActiveDownloads,
    metadata_retry_count: u32,
}

impl DownloadOrchestrator {
    pub fn new(
        api: Arc<dyn BookApi>,
        transport: Arc<dyn NetworkTransport>,
        storage: Arc<dyn StorageService>,
        validator: Arc<dyn BookValidator>,
        retry_policy: Arc<dyn RetryPolicy>,
    ) -> Self {
        Self {
            api,
            transport,
            storage,
            validator,
            retry_policy,
            active: ActiveDownloads::default(),
            metadata_retry_count: constants::network::METADATA_RETRY_COUNT,
        }
    }

    pub fn with_metadata_retry_count(mut self, retry_count: u32) -> Self {
        self.metadata_retry_count = retry_count;
        self
    }

    pub fn active_downloads(&self) -> ActiveDownloads {
        self.active.clone()
    }

    pub fn storage(&self) -> Arc<dyn StorageService> {
        self.storage.clone()
    }

    pub fn cancel_download(&self, book_id: &str) -> bool {
        let cancelled = self.active.cancel(book_id);
        if cancelled {
            info!("Cancellation requested for '{}'", book_id);
        }
        cancelled
    }

    /// Downloads `book`, reporting every stage through `on_progress`.
    ///
    /// Failures are reported as a `Failed` stage before the error is returned.
    /// A second call for a book that is already in flight fails with
    /// `AlreadyDownloading` without touching the directory. An existing
    /// directory is removed first; nothing is updated in place.
    pub async fn download_book(&self, book: &Book, on_progress: ProgressCallback) -> AppResult<()> {
        let lease = self.active.acquire_for_download(&book.id).await?;
        let reporter = StageReporter {
            book_id: book.id.clone(),
            callback: on_progress,
            last: AtomicU64::new(0f64.to_bits()),
        };

        info!("Starting download of '{}' ({})", book.title, book.id);
        match self.run_stages(book, &lease.token, &reporter).await {
            Ok(()) => {
                info!("Download of '{}' complete", book.id);
                Ok(())
            }
            Err(e) => {
                match &e {
                    AppError::Cancelled => warn!("Download of '{}' cancelled", book.id),
                    _ => error!("Download of '{}' failed: {}", book.id, e),
                }
                reporter.fail(&e);
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        book: &Book,
        cancel: &CancellationToken,
        reporter: &StageReporter,
    ) -> AppResult<()> {
        let policy = self.retry_policy.as_ref();

        checkpoint(cancel)?;
        reporter.report(progress::PREPARING, "Preparing download", DownloadStage::Preparing);
        let book_id = book.id.clone();
        self.on_storage(move |s| {
            s.delete_book_directory(&book_id)?;
            s.create_book_directory(&book_id).map(drop)
        })
        .await?;

        checkpoint(cancel)?;
        reporter.report(
            progress::FETCHING_METADATA,
            format!("Fetching details for '{}'", book.title),
            DownloadStage::FetchingMetadata,
        );
        let mut details = until_cancelled(
            cancel,
            self.api.fetch_book_details(&book.id, self.metadata_retry_count),
        )
        .await?;
        if details.id != book.id {
            warn!(
                "Server returned id '{}' for '{}', keeping the requested id",
                details.id, book.id
            );
            details.id = book.id.clone();
        }
        if details.chapters.is_empty() && !book.chapters.is_empty() {
            details.chapters = book.chapters.clone();
        }
        let metadata = details.clone();
        self.on_storage(move |s| s.save_book_metadata(&metadata)).await?;
        reporter.report(
            progress::METADATA_SAVED,
            "Saved book details",
            DownloadStage::FetchingMetadata,
        );

        if details.has_cover() {
            checkpoint(cancel)?;
            reporter.report(
                progress::DOWNLOADING_COVER,
                "Downloading cover",
                DownloadStage::DownloadingCover,
            );
            let cover = run_with_retry(policy, cancel, "cover download", |_| {
                self.transport.download_cover(&details.id)
            })
            .await
            .map_err(|e| match e {
                AppError::Cancelled => e,
                other => AppError::CoverDownloadFailed(Box::new(other)),
            })?;
            let book_id = details.id.clone();
            self.on_storage(move |s| s.save_cover_image(&book_id, &cover)).await?;
        }

        let library_item_id = details
            .library_item_id()
            .ok_or(AppError::MissingLibraryItemId)?
            .to_string();

        checkpoint(cancel)?;
        reporter.report(
            progress::AUDIO_START,
            "Opening playback session",
            DownloadStage::DownloadingAudio,
        );
        let session = run_with_retry(policy, cancel, "playback session", |_| {
            self.transport.create_playback_session(&library_item_id)
        })
        .await?;

        let mut tracks = session.audio_tracks;
        tracks.sort_by_key(|t| t.index);
        let total = tracks.len();
        if total == 0 {
            warn!("Playback session {} for '{}' has no audio tracks", session.id, book.id);
            return Err(AppError::InvalidResponse);
        }

        for (position, track) in tracks.iter().enumerate() {
            checkpoint(cancel)?;
            let content_url = track
                .content_url
                .as_deref()
                .filter(|u| !u.trim().is_empty())
                .ok_or(AppError::MissingContentUrl { track: track.index })?;
            let url = utils::resolve_content_url(self.transport.base_url(), content_url)?;

            reporter.report(
                audio_progress(position, total),
                format!("Downloading track {} of {}", position + 1, total),
                DownloadStage::DownloadingAudio,
            );
            let label = format!("track {} download", track.index);
            let bytes = run_with_retry(policy, cancel, &label, |_| {
                self.transport.download_file(&url, self.transport.token())
            })
            .await?;

            let book_id = details.id.clone();
            let file_index = position as u32;
            self.on_storage(move |s| s.save_audio_file(&book_id, file_index, &bytes))
                .await?;
        }

        checkpoint(cancel)?;
        let audio_info = AudioInfo::new(total as u32);
        let book_id = details.id.clone();
        self.on_storage(move |s| s.save_audio_info(&book_id, &audio_info))
            .await?;

        checkpoint(cancel)?;
        reporter.report(progress::FINALIZING, "Verifying download", DownloadStage::Finalizing);
        let validator = self.validator.clone();
        let book_id = details.id.clone();
        let verdict = tokio::task::spawn_blocking(move || validator.validate_book_integrity(&book_id))
            .await
            .map_err(|e| AppError::Other(e.into()))?;
        if let ValidationResult::Invalid(reason) = verdict {
            return Err(AppError::VerificationFailed(reason));
        }

        reporter.report(progress::COMPLETE, "Download complete", DownloadStage::Complete);
        Ok(())
    }

    /// Runs a storage call on the blocking pool; fsyncs can take a while.
    async fn on_storage<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StorageService) -> AppResult<T> + Send + 'static,
    {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || f(storage.as_ref()))
            .await
            .map_err(|e| AppError::Other(e.into()))?
    }
}
