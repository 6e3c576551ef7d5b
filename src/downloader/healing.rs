// src/downloader/healing.rs

use super::{
    connectivity::ConnectivityEvent,
    orchestrator::{ActiveDownloads, LeaseHolder},
    storage::StorageService,
    validation::BookValidator,
};
use crate::{config::HealingSettings, error::AppError, models::ValidationResult};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::{
    sync::{Mutex, broadcast},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

/// Told about every book a sweep deletes.
pub trait RemovalObserver: Send + Sync {
    fn on_book_removed(&self, book_id: &str);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealingReport {
    pub checked: usize,
    pub removed: Vec<String>,
    pub skipped_in_flight: Vec<String>,
}

struct SweepContext {
    storage: Arc<dyn StorageService>,
    validator: Arc<dyn BookValidator>,
    active: ActiveDownloads,
    observer: Arc<dyn RemovalObserver>,
    sweep_lock: Mutex<()>,
}

impl SweepContext {
    async fn sweep(&self, reason: &str) -> HealingReport {
        let _serial = self.sweep_lock.lock().await;
        info!("Healing sweep started ({})", reason);

        let storage = self.storage.clone();
        let validator = self.validator.clone();
        let active = self.active.clone();
        let observer = self.observer.clone();
        let outcome =
            tokio::task::spawn_blocking(move || scan(&*storage, &*validator, &active, &*observer))
                .await;

        match outcome {
            Ok(report) => {
                info!(
                    "Healing sweep finished: {} checked, {} removed, {} in flight",
                    report.checked,
                    report.removed.len(),
                    report.skipped_in_flight.len()
                );
                report
            }
            Err(e) => {
                error!("Healing sweep aborted: {}", e);
                HealingReport::default()
            }
        }
    }
}

fn scan(
    storage: &dyn StorageService,
    validator: &dyn BookValidator,
    active: &ActiveDownloads,
    observer: &dyn RemovalObserver,
) -> HealingReport {
    let mut report = HealingReport::default();
    let ids = match storage.list_book_ids() {
        Ok(ids) => ids,
        Err(e) => {
            error!("Could not list downloaded books: {}", e);
            return report;
        }
    };

    for book_id in ids {
        // holding the lease keeps a new download out while we decide
        let _lease = match active.acquire(&book_id, LeaseHolder::Healing) {
            Ok(lease) => lease,
            Err(AppError::AlreadyDownloading(_)) => {
                debug!("Skipping '{}': download in progress", book_id);
                report.skipped_in_flight.push(book_id);
                continue;
            }
            Err(e) => {
                warn!("Skipping '{}': {}", book_id, e);
                continue;
            }
        };

        report.checked += 1;
        let ValidationResult::Invalid(reason) = validator.validate_book_integrity(&book_id) else {
            continue;
        };
        warn!("Book '{}' is damaged ({}), removing it", book_id, reason);
        match storage.delete_book_directory(&book_id) {
            Ok(()) => {
                observer.on_book_removed(&book_id);
                report.removed.push(book_id);
            }
            Err(e) => error!("Could not remove damaged book '{}': {}", book_id, e),
        }
    }
    report
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<ConnectivityEvent>>,
) -> Option<Result<ConnectivityEvent, broadcast::error::RecvError>> {
    match events {
        Some(rx) => Some(rx.recv().await),
        None => std::future::pending().await,
    }
}

/// Background worker that finds damaged book directories and deletes them.
///
/// Sweeps run once after a settle delay, then on a fixed interval, and
/// additionally after a debounced connectivity change.
pub struct HealingService {
    ctx: Arc<SweepContext>,
    settings: HealingSettings,
    connectivity: Option<broadcast::Sender<ConnectivityEvent>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HealingService {
    pub fn new(
        storage: Arc<dyn StorageService>,
        validator: Arc<dyn BookValidator>,
        active: ActiveDownloads,
        observer: Arc<dyn RemovalObserver>,
        settings: HealingSettings,
    ) -> Self {
        Self {
            ctx: Arc::new(SweepContext {
                storage,
                validator,
                active,
                observer,
                sweep_lock: Mutex::new(()),
            }),
            settings,
            connectivity: None,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    /// Subscribes the reactive trigger to connectivity changes.
    pub fn with_connectivity(mut self, events: broadcast::Sender<ConnectivityEvent>) -> Self {
        self.connectivity = Some(events);
        self
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn start(&mut self) {
        if self.is_running() {
            debug!("Healing service already running");
            return;
        }
        self.cancel = CancellationToken::new();
        let ctx = self.ctx.clone();
        let settings = self.settings;
        let cancel = self.cancel.clone();
        let events = self.connectivity.as_ref().map(|tx| tx.subscribe());
        info!(
            "Healing service started (every {:?}, first in {:?})",
            settings.interval, settings.settle_delay
        );
        self.handle = Some(tokio::spawn(run_loop(ctx, settings, events, cancel)));
    }

    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Healing task ended abnormally: {}", e);
            }
            info!("Healing service stopped");
        }
    }

    /// Runs a sweep right away; waits for any sweep already in progress.
    pub async fn heal_now(&self) -> HealingReport {
        self.ctx.sweep("on demand").await
    }
}

impl Drop for HealingService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_loop(
    ctx: Arc<SweepContext>,
    settings: HealingSettings,
    mut events: Option<broadcast::Receiver<ConnectivityEvent>>,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(settings.settle_delay) => {}
    }
    ctx.sweep("startup").await;

    let mut next_periodic = Instant::now() + settings.interval;
    let mut reconnect_at: Option<Instant> = None;
    loop {
        let deadline = reconnect_at.map_or(next_periodic, |at| at.min(next_periodic));
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {
                if reconnect_at.is_some_and(|at| at <= Instant::now()) {
                    reconnect_at = None;
                    ctx.sweep("connectivity change").await;
                } else {
                    next_periodic = Instant::now() + settings.interval;
                    ctx.sweep("scheduled").await;
                }
            }
            event = next_event(&mut events) => match event {
                Some(Ok(event)) => {
                    debug!("Connectivity {:?}, sweeping in {:?}", event, settings.reconnect_debounce);
                    reconnect_at = Some(Instant::now() + settings.reconnect_debounce);
                }
                Some(Err(broadcast::error::RecvError::Lagged(n))) => {
                    debug!("Missed {} connectivity events", n);
                    reconnect_at = Some(Instant::now() + settings.reconnect_debounce);
                }
                Some(Err(broadcast::error::RecvError::Closed)) | None => {
                    debug!("Connectivity channel closed");
                    events = None;
                }
            }
        }
    }
}
