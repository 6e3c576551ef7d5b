// tests/common/mod.rs

#![allow(dead_code)]

use async_trait::async_trait;
use shelf_dl::{
    client::BookApi,
    downloader::{
        BookValidator, DownloadOrchestrator, FileStorage, FileValidator, NetworkTransport,
        ProgressCallback, RemovalObserver, RetryPolicy, StorageService,
        retry::ExponentialBackoffPolicy,
    },
    error::{AppError, AppResult},
    models::{AudioInfo, AudioTrack, Book, Chapter, DownloadProgress, PlaybackSession},
};
use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};
use tokio::sync::Notify;
use url::Url;

pub const AUDIO_BYTES: usize = 16 * 1024;

pub fn jpeg_bytes() -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
    bytes.resize(2048, 0x42);
    bytes
}

pub fn book(id: &str, library_item_id: &str, with_cover: bool) -> Book {
    Book {
        id: id.to_string(),
        title: format!("Title of {id}"),
        author: "Some Author".to_string(),
        chapters: vec![Chapter {
            id: "0".to_string(),
            title: "Chapter 1".to_string(),
            start: 0.0,
            end: 60.0,
            library_item_id: library_item_id.to_string(),
            episode_id: None,
        }],
        cover_path: with_cover.then(|| format!("/metadata/items/{id}/cover.jpg")),
    }
}

pub fn session(library_item_id: &str, tracks: usize) -> PlaybackSession {
    PlaybackSession {
        id: format!("session-{library_item_id}"),
        audio_tracks: (0..tracks as u32)
            .map(|index| AudioTrack {
                index,
                content_url: Some(format!("/api/items/{library_item_id}/file/{index}")),
                duration: 60.0,
                mime_type: "audio/mpeg".to_string(),
            })
            .collect(),
        duration: 60.0 * tracks as f64,
        media_type: "book".to_string(),
        library_item_id: library_item_id.to_string(),
        episode_id: None,
    }
}

#[derive(Default)]
pub struct FakeApi {
    books: Mutex<HashMap<String, Book>>,
    pub calls: AtomicU32,
}

impl FakeApi {
    pub fn with_book(book: Book) -> Self {
        let api = Self::default();
        api.books.lock().unwrap().insert(book.id.clone(), book);
        api
    }
}

#[async_trait]
impl BookApi for FakeApi {
    async fn fetch_book_details(&self, book_id: &str, _retry_count: u32) -> AppResult<Book> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.books
            .lock()
            .unwrap()
            .get(book_id)
            .cloned()
            .ok_or(AppError::HttpError(404))
    }
}

pub struct FakeTransport {
    base_url: Url,
    sessions: Mutex<HashMap<String, PlaybackSession>>,
    pub cover_failures: Mutex<VecDeque<AppError>>,
    pub file_failures: Mutex<VecDeque<AppError>>,
    pub audio_size: Mutex<usize>,
    pub hang_files: AtomicBool,
    pub file_started: Notify,
    pub cover_calls: AtomicU32,
    pub file_calls: AtomicU32,
    pub requested_urls: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn with_session(session: PlaybackSession) -> Self {
        let mut sessions = HashMap::new();
        sessions.insert(session.library_item_id.clone(), session);
        Self {
            base_url: Url::parse("http://books.test/").unwrap(),
            sessions: Mutex::new(sessions),
            cover_failures: Mutex::new(VecDeque::new()),
            file_failures: Mutex::new(VecDeque::new()),
            audio_size: Mutex::new(AUDIO_BYTES),
            hang_files: AtomicBool::new(false),
            file_started: Notify::new(),
            cover_calls: AtomicU32::new(0),
            file_calls: AtomicU32::new(0),
            requested_urls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_cover(self, errors: impl IntoIterator<Item = AppError>) -> Self {
        self.cover_failures.lock().unwrap().extend(errors);
        self
    }

    pub fn fail_files(self, errors: impl IntoIterator<Item = AppError>) -> Self {
        self.file_failures.lock().unwrap().extend(errors);
        self
    }
}

#[async_trait]
impl NetworkTransport for FakeTransport {
    async fn download_file(&self, url: &Url, _token: &str) -> AppResult<Vec<u8>> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        self.requested_urls.lock().unwrap().push(url.to_string());
        self.file_started.notify_one();
        if self.hang_files.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(err) = self.file_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(vec![0x55; *self.audio_size.lock().unwrap()])
    }

    async fn download_cover(&self, _book_id: &str) -> AppResult<Vec<u8>> {
        self.cover_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.cover_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(jpeg_bytes())
    }

    async fn create_playback_session(&self, library_item_id: &str) -> AppResult<PlaybackSession> {
        self.sessions
            .lock()
            .unwrap()
            .get(library_item_id)
            .cloned()
            .ok_or(AppError::InvalidResponse)
    }

    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn token(&self) -> &str {
        "fake-token"
    }
}

#[derive(Default)]
pub struct CountingObserver {
    pub removed: Mutex<Vec<String>>,
}

impl RemovalObserver for CountingObserver {
    fn on_book_removed(&self, book_id: &str) {
        self.removed.lock().unwrap().push(book_id.to_string());
    }
}

/// Collects every progress update a download reports.
#[derive(Clone, Default)]
pub struct ProgressLog(pub Arc<Mutex<Vec<DownloadProgress>>>);

impl ProgressLog {
    pub fn callback(&self) -> ProgressCallback {
        let log = self.0.clone();
        Arc::new(move |update| log.lock().unwrap().push(update))
    }

    pub fn updates(&self) -> Vec<DownloadProgress> {
        self.0.lock().unwrap().clone()
    }
}

pub fn fast_retry() -> Arc<dyn RetryPolicy> {
    Arc::new(ExponentialBackoffPolicy::new(3, Duration::from_millis(5)))
}

pub struct Harness {
    pub storage: Arc<dyn StorageService>,
    pub validator: Arc<dyn BookValidator>,
    pub api: Arc<FakeApi>,
    pub transport: Arc<FakeTransport>,
    pub orchestrator: Arc<DownloadOrchestrator>,
}

pub fn harness(root: &Path, api: FakeApi, transport: FakeTransport) -> Harness {
    custom_harness(root, Arc::new(FileStorage::new(root)), api, transport, fast_retry())
}

pub fn custom_harness(
    root: &Path,
    storage: Arc<dyn StorageService>,
    api: FakeApi,
    transport: FakeTransport,
    retry_policy: Arc<dyn RetryPolicy>,
) -> Harness {
    let validator: Arc<dyn BookValidator> = Arc::new(FileValidator::new(root));
    let api = Arc::new(api);
    let transport = Arc::new(transport);
    let orchestrator = Arc::new(DownloadOrchestrator::new(
        api.clone(),
        transport.clone(),
        storage.clone(),
        validator.clone(),
        retry_policy,
    ));
    Harness {
        storage,
        validator,
        api,
        transport,
        orchestrator,
    }
}

/// File storage whose audio writes stall for `delay` after announcing
/// themselves on `write_started`.
pub struct SlowAudioStorage {
    inner: FileStorage,
    delay: Duration,
    pub write_started: Arc<Notify>,
    pub writes_finished: AtomicU32,
}

impl SlowAudioStorage {
    pub fn new(root: &Path, delay: Duration) -> Self {
        Self {
            inner: FileStorage::new(root),
            delay,
            write_started: Arc::new(Notify::new()),
            writes_finished: AtomicU32::new(0),
        }
    }
}

impl StorageService for SlowAudioStorage {
    fn root(&self) -> &Path {
        self.inner.root()
    }
    fn book_dir(&self, book_id: &str) -> AppResult<PathBuf> {
        self.inner.book_dir(book_id)
    }
    fn create_book_directory(&self, book_id: &str) -> AppResult<PathBuf> {
        self.inner.create_book_directory(book_id)
    }
    fn save_book_metadata(&self, book: &Book) -> AppResult<()> {
        self.inner.save_book_metadata(book)
    }
    fn save_audio_info(&self, book_id: &str, info: &AudioInfo) -> AppResult<()> {
        self.inner.save_audio_info(book_id, info)
    }
    fn save_audio_file(&self, book_id: &str, index: u32, bytes: &[u8]) -> AppResult<()> {
        self.write_started.notify_one();
        std::thread::sleep(self.delay);
        let result = self.inner.save_audio_file(book_id, index, bytes);
        self.writes_finished.fetch_add(1, Ordering::SeqCst);
        result
    }
    fn save_cover_image(&self, book_id: &str, bytes: &[u8]) -> AppResult<()> {
        self.inner.save_cover_image(book_id, bytes)
    }
    fn delete_book_directory(&self, book_id: &str) -> AppResult<()> {
        self.inner.delete_book_directory(book_id)
    }
    fn load_downloaded_books(&self) -> AppResult<Vec<Book>> {
        self.inner.load_downloaded_books()
    }
    fn list_book_ids(&self) -> AppResult<Vec<String>> {
        self.inner.list_book_ids()
    }
    fn load_book(&self, book_id: &str) -> AppResult<Option<Book>> {
        self.inner.load_book(book_id)
    }
    fn check_available_storage(&self, required_bytes: u64) -> bool {
        self.inner.check_available_storage(required_bytes)
    }
    fn available_space(&self) -> AppResult<u64> {
        self.inner.available_space()
    }
    fn total_download_size(&self) -> AppResult<u64> {
        self.inner.total_download_size()
    }
    fn book_storage_size(&self, book_id: &str) -> AppResult<u64> {
        self.inner.book_storage_size(book_id)
    }
}

/// Writes a book directory by hand: metadata, a manifest claiming
/// `manifest_tracks`, and `present_tracks` audio files.
pub fn write_book_fixture(
    storage: &dyn StorageService,
    book: &Book,
    manifest_tracks: u32,
    present_tracks: u32,
) {
    storage.create_book_directory(&book.id).unwrap();
    storage.save_book_metadata(book).unwrap();
    for index in 0..present_tracks {
        storage
            .save_audio_file(&book.id, index, &vec![0x55; AUDIO_BYTES])
            .unwrap();
    }
    if book.has_cover() {
        storage.save_cover_image(&book.id, &jpeg_bytes()).unwrap();
    }
    storage
        .save_audio_info(&book.id, &AudioInfo::new(manifest_tracks))
        .unwrap();
}
