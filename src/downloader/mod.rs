// src/downloader/mod.rs

pub mod connectivity;
pub mod healing;
pub mod orchestrator;
pub mod retry;
pub mod storage;
pub mod transport;
pub mod validation;

pub use connectivity::{ConnectivityEvent, ConnectivityMonitor};
pub use healing::{HealingReport, HealingService, RemovalObserver};
pub use orchestrator::{ActiveDownloads, DownloadOrchestrator, ProgressCallback};
pub use retry::{ExponentialBackoffPolicy, FixedDelayPolicy, RetryPolicy};
pub use storage::{FileStorage, StorageService};
pub use transport::{HttpTransport, NetworkTransport};
pub use validation::{BookValidator, FileValidator};

use crate::{
    error::*,
    models::{Book, DownloadProgress, DownloadStage},
};
use anyhow::anyhow;
use log::{debug, info, warn};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{broadcast, mpsc, oneshot};

/// What the manager knows about one book.
#[derive(Debug, Clone, PartialEq)]
pub struct BookDownloadState {
    pub progress: f64,
    pub stage: DownloadStage,
    pub message: String,
    pub in_flight: bool,
}

impl BookDownloadState {
    fn queued() -> Self {
        Self {
            progress: 0.0,
            stage: DownloadStage::Preparing,
            message: "Queued".to_string(),
            in_flight: true,
        }
    }
}

enum Command {
    Download {
        book: Book,
        reply: oneshot::Sender<AppResult<()>>,
    },
    Progress(DownloadProgress),
    Finished {
        book_id: String,
        result: AppResult<()>,
    },
    Cancel {
        book_id: String,
        reply: oneshot::Sender<bool>,
    },
    Delete {
        book_id: String,
        reply: oneshot::Sender<AppResult<()>>,
    },
    BookRemoved(String),
    State {
        book_id: String,
        reply: oneshot::Sender<Option<BookDownloadState>>,
    },
    DownloadedBooks {
        reply: oneshot::Sender<Vec<Book>>,
    },
    Refresh {
        reply: oneshot::Sender<AppResult<Vec<Book>>>,
    },
}

/// Handle to the coordination actor. Cheap to clone; every clone talks to
/// the same single-owner task.
#[derive(Clone)]
pub struct DownloadManager {
    tx: mpsc::UnboundedSender<Command>,
    progress: broadcast::Sender<DownloadProgress>,
}

impl DownloadManager {
    /// Spawns the actor on the current runtime.
    pub fn spawn(orchestrator: Arc<DownloadOrchestrator>, min_free_bytes: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (progress, _) = broadcast::channel(256);
        let actor = ManagerActor {
            orchestrator,
            min_free_bytes,
            self_tx: tx.downgrade(),
            progress: progress.clone(),
            states: HashMap::new(),
            waiters: HashMap::new(),
            pending_deletes: HashMap::new(),
            books: Vec::new(),
        };
        tokio::spawn(actor.run(rx));
        Self { tx, progress }
    }

    /// Every progress update of every download, in order per book.
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadProgress> {
        self.progress.subscribe()
    }

    /// Downloads `book` and resolves once it has completed or failed.
    pub async fn download(&self, book: Book) -> AppResult<()> {
        self.ask(|reply| Command::Download { book, reply }).await?
    }

    pub async fn cancel(&self, book_id: &str) -> AppResult<bool> {
        let book_id = book_id.to_string();
        self.ask(|reply| Command::Cancel { book_id, reply }).await
    }

    /// Deletes a book. An in-flight download is cancelled first and the
    /// directory is removed once it has stopped writing.
    pub async fn delete_book(&self, book_id: &str) -> AppResult<()> {
        let book_id = book_id.to_string();
        self.ask(|reply| Command::Delete { book_id, reply }).await?
    }

    pub async fn state(&self, book_id: &str) -> AppResult<Option<BookDownloadState>> {
        let book_id = book_id.to_string();
        self.ask(|reply| Command::State { book_id, reply }).await
    }

    pub async fn downloaded_books(&self) -> AppResult<Vec<Book>> {
        self.ask(|reply| Command::DownloadedBooks { reply }).await
    }

    pub async fn refresh(&self) -> AppResult<Vec<Book>> {
        self.ask(|reply| Command::Refresh { reply }).await?
    }

    async fn ask<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> AppResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).map_err(|_| manager_gone())?;
        rx.await.map_err(|_| manager_gone())
    }
}

impl RemovalObserver for DownloadManager {
    fn on_book_removed(&self, book_id: &str) {
        if self.tx.send(Command::BookRemoved(book_id.to_string())).is_err() {
            debug!("Manager gone, dropping removal of '{}'", book_id);
        }
    }
}

fn manager_gone() -> AppError {
    AppError::Other(anyhow!("download manager has shut down"))
}

struct ManagerActor {
    orchestrator: Arc<DownloadOrchestrator>,
    min_free_bytes: u64,
    self_tx: mpsc::WeakUnboundedSender<Command>,
    progress: broadcast::Sender<DownloadProgress>,
    states: HashMap<String, BookDownloadState>,
    waiters: HashMap<String, oneshot::Sender<AppResult<()>>>,
    pending_deletes: HashMap<String, Vec<oneshot::Sender<AppResult<()>>>>,
    books: Vec<Book>,
}

impl ManagerActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        if let Err(e) = self.reload().await {
            warn!("Could not load downloaded books: {}", e);
        }
        while let Some(cmd) = rx.recv().await {
            self.handle(cmd).await;
        }
        debug!("Download manager stopped");
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Download { book, reply } => self.start_download(book, reply),
            Command::Progress(update) => {
                if let Some(state) = self.states.get_mut(&update.book_id) {
                    state.progress = update.progress;
                    state.stage = update.stage;
                    state.message = update.message.clone();
                }
                let _ = self.progress.send(update);
            }
            Command::Finished { book_id, result } => self.finish(book_id, result).await,
            Command::Cancel { book_id, reply } => {
                let cancelled = self.orchestrator.cancel_download(&book_id);
                let _ = reply.send(cancelled);
            }
            Command::Delete { book_id, reply } => {
                if self.states.get(&book_id).is_some_and(|s| s.in_flight) {
                    info!("Cancelling '{}' before deleting it", book_id);
                    self.orchestrator.cancel_download(&book_id);
                    self.pending_deletes.entry(book_id).or_default().push(reply);
                } else {
                    let result = self.delete(&book_id).await;
                    let _ = reply.send(result);
                }
            }
            Command::BookRemoved(book_id) => {
                info!("Book '{}' was removed by healing", book_id);
                self.forget(&book_id);
            }
            Command::State { book_id, reply } => {
                let _ = reply.send(self.states.get(&book_id).cloned());
            }
            Command::DownloadedBooks { reply } => {
                let _ = reply.send(self.books.clone());
            }
            Command::Refresh { reply } => {
                let result = self.reload().await.map(|()| self.books.clone());
                let _ = reply.send(result);
            }
        }
    }

    fn start_download(&mut self, book: Book, reply: oneshot::Sender<AppResult<()>>) {
        if self.states.get(&book.id).is_some_and(|s| s.in_flight) {
            let _ = reply.send(Err(AppError::AlreadyDownloading(book.id)));
            return;
        }

        let storage = self.orchestrator.storage();
        if !storage.check_available_storage(self.min_free_bytes) {
            let available = storage.available_space().unwrap_or(0);
            warn!(
                "Not starting '{}': {} bytes free, {} required",
                book.id, available, self.min_free_bytes
            );
            let _ = reply.send(Err(AppError::InsufficientStorage {
                required: self.min_free_bytes,
                available,
            }));
            return;
        }

        let Some(tx) = self.self_tx.upgrade() else {
            let _ = reply.send(Err(manager_gone()));
            return;
        };

        self.states.insert(book.id.clone(), BookDownloadState::queued());
        self.waiters.insert(book.id.clone(), reply);

        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            let progress_tx = tx.clone();
            let on_progress: ProgressCallback = Arc::new(move |update: DownloadProgress| {
                let _ = progress_tx.send(Command::Progress(update));
            });
            let result = orchestrator.download_book(&book, on_progress).await;
            let _ = tx.send(Command::Finished {
                book_id: book.id,
                result,
            });
        });
    }

    async fn finish(&mut self, book_id: String, result: AppResult<()>) {
        if let Some(state) = self.states.get_mut(&book_id) {
            state.in_flight = false;
        }
        let succeeded = result.is_ok();

        if let Some(replies) = self.pending_deletes.remove(&book_id) {
            let deleted = self.delete(&book_id).await;
            for reply in replies {
                let _ = reply.send(match &deleted {
                    Ok(()) => Ok(()),
                    Err(e) => Err(AppError::Other(anyhow!("{e}"))),
                });
            }
        } else if succeeded && let Err(e) = self.reload().await {
            warn!("Could not refresh downloaded books: {}", e);
        }

        if let Some(waiter) = self.waiters.remove(&book_id) {
            let _ = waiter.send(result);
        }
    }

    async fn delete(&mut self, book_id: &str) -> AppResult<()> {
        let storage = self.orchestrator.storage();
        let id = book_id.to_string();
        tokio::task::spawn_blocking(move || storage.delete_book_directory(&id))
            .await
            .map_err(|e| AppError::Other(e.into()))??;
        self.forget(book_id);
        Ok(())
    }

    fn forget(&mut self, book_id: &str) {
        self.books.retain(|b| b.id != book_id);
        if self.states.get(book_id).is_some_and(|s| !s.in_flight) {
            self.states.remove(book_id);
        }
    }

    async fn reload(&mut self) -> AppResult<()> {
        let storage = self.orchestrator.storage();
        let books = tokio::task::spawn_blocking(move || storage.load_downloaded_books())
            .await
            .map_err(|e| AppError::Other(e.into()))??;
        debug!("{} downloaded book(s) on disk", books.len());
        self.books = books;
        Ok(())
    }
}
