// src/lib.rs

pub mod cli;
pub mod client;
pub mod config;
pub mod constants;
pub mod downloader;
pub mod error;
pub mod models;
pub mod report;
pub mod symbols;
pub mod ui;
pub mod utils;

use crate::{
    cli::Cli,
    client::{RemoteApi, RobustClient},
    config::AppConfig,
    downloader::{
        BookValidator, ConnectivityEvent, ConnectivityMonitor, DownloadManager, DownloadOrchestrator,
        ExponentialBackoffPolicy, FileStorage, FileValidator, HealingService, HttpTransport,
        RetryPolicy, StorageService, validation,
    },
    error::{AppError, AppResult},
    models::{Book, DownloadProgress, ValidationResult},
    report::BatchReport,
};
use anyhow::anyhow;
use colored::*;
use futures::{StreamExt, stream};
use indicatif::{MultiProgress, ProgressBar};
use itertools::Itertools;
use log::{debug, info, warn};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Everything a run needs, wired once from the configuration.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub http: RobustClient,
    pub storage: Arc<dyn StorageService>,
    pub validator: Arc<dyn BookValidator>,
    pub orchestrator: Arc<DownloadOrchestrator>,
    pub manager: DownloadManager,
}

impl AppContext {
    /// Builds the pipeline and spawns the download manager; needs a runtime.
    pub fn build(config: Arc<AppConfig>) -> AppResult<Self> {
        let http = RobustClient::new(config.clone())?;
        let storage: Arc<dyn StorageService> = Arc::new(FileStorage::new(&config.downloads_dir));
        let validator: Arc<dyn BookValidator> =
            Arc::new(FileValidator::new(&config.downloads_dir));
        let retry_policy: Arc<dyn RetryPolicy> = Arc::new(ExponentialBackoffPolicy::new(
            config.max_retries,
            config.retry_base_delay,
        ));
        let orchestrator = Arc::new(
            DownloadOrchestrator::new(
                Arc::new(RemoteApi::new(http.clone())),
                Arc::new(HttpTransport::new(http.clone())),
                storage.clone(),
                validator.clone(),
                retry_policy,
            )
            .with_metadata_retry_count(config.metadata_retry_count),
        );
        let manager = DownloadManager::spawn(orchestrator.clone(), config.min_free_bytes);
        Ok(Self {
            config,
            http,
            storage,
            validator,
            orchestrator,
            manager,
        })
    }

    pub fn healing_service(&self) -> HealingService {
        HealingService::new(
            self.storage.clone(),
            self.validator.clone(),
            self.orchestrator.active_downloads(),
            Arc::new(self.manager.clone()),
            self.config.healing,
        )
    }
}

/// Library entry point, called from `main.rs`.
pub async fn run_from_cli(args: Arc<Cli>, cancel: CancellationToken) -> AppResult<()> {
    debug!("CLI arguments: {:?}", args);

    let token = if args.needs_server() {
        obtain_token(&args)?
    } else {
        String::new()
    };
    let config = Arc::new(AppConfig::new(&args, token)?);
    info!(
        "Server {}, downloads in {}",
        config.server_url,
        config.downloads_dir.display()
    );
    let ctx = AppContext::build(config)?;

    if let Some(book_id) = &args.delete {
        delete_book(&ctx, book_id).await
    } else if args.list {
        list_books(&ctx).await
    } else if args.verify {
        verify_books(&ctx).await
    } else if args.heal {
        heal_books(&ctx).await
    } else if args.watch {
        watch(&ctx, &cancel).await
    } else {
        let ids = collect_book_ids(&args)?;
        download_books(&ctx, ids, args.force_redownload, &cancel).await
    }
}

fn obtain_token(args: &Cli) -> AppResult<String> {
    let (token, source) = config::token::resolve_token(args.token.as_deref());
    if let Some(token) = token {
        info!("Access token loaded from {}", source);
        ui::info(&format!("Using the access token from {}.", source));
        return Ok(token);
    }

    info!("No stored access token");
    ui::box_message(
        "Access token needed",
        &[
            "Open the server's web app and sign in.",
            "Go to Settings > Users and select your account.",
            "Copy the API token shown there.",
            &format!(
                "Or export it as {} before running this command.",
                constants::TOKEN_ENV_VAR
            ),
        ],
        |s| s.cyan(),
    );
    let token = ui::prompt_hidden("Paste your access token (input is hidden)")
        .map_err(|_| AppError::UserInterrupt)?
        .trim()
        .to_string();
    if token.is_empty() {
        return Err(AppError::TokenMissing);
    }
    if ui::confirm("Save this token to the config file?", true) {
        config::token::save_token(&token)?;
    }
    Ok(token)
}

/// Ids from `--book` and the batch file, in order, without duplicates.
fn collect_book_ids(args: &Cli) -> AppResult<Vec<String>> {
    let mut ids = args.book.clone();
    if let Some(batch_file) = &args.batch_file {
        let content = std::fs::read_to_string(batch_file).map_err(|e| {
            log::error!("Cannot read batch file '{}': {}", batch_file.display(), e);
            AppError::from(e)
        })?;
        ids.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    let ids: Vec<String> = ids.into_iter().unique().collect();
    if ids.is_empty() {
        return Err(AppError::UserInputError("No book ids to download.".to_string()));
    }
    Ok(ids)
}

enum Outcome {
    Downloaded,
    AlreadyComplete,
}

async fn download_one(ctx: &AppContext, book_id: &str, force: bool) -> AppResult<Outcome> {
    if !force && ctx.validator.validate_book_integrity(book_id).is_valid() {
        return Ok(Outcome::AlreadyComplete);
    }
    if force {
        ctx.manager.delete_book(book_id).await?;
    }
    ctx.manager.download(Book::placeholder(book_id)).await?;
    Ok(Outcome::Downloaded)
}

async fn download_books(
    ctx: &AppContext,
    ids: Vec<String>,
    force: bool,
    cancel: &CancellationToken,
) -> AppResult<()> {
    ui::print_header(&format!(
        "Downloading {} book(s) (press {} to stop)",
        ids.len(),
        *symbols::CTRL_C
    ));
    ui::info(&format!("Saving to {}", display_path(&ctx.config.downloads_dir)));

    let multi = MultiProgress::new();
    let renderer = spawn_progress_renderer(ctx.manager.subscribe(), multi.clone());

    let batch = stream::iter(ids.iter().cloned())
        .map(|book_id| async move {
            let outcome = download_one(ctx, &book_id, force).await;
            (book_id, outcome)
        })
        .buffer_unordered(ctx.config.max_workers)
        .collect::<Vec<_>>();
    tokio::pin!(batch);

    let mut interrupted = false;
    let outcomes = tokio::select! {
        outcomes = &mut batch => outcomes,
        _ = cancel.cancelled() => {
            interrupted = true;
            warn!("Interrupted, cancelling in-flight downloads");
            for book_id in &ids {
                let _ = ctx.manager.cancel(book_id).await;
            }
            batch.await
        }
    };
    renderer.abort();
    let _ = multi.clear();

    let mut report = BatchReport::new(ids.len());
    for (book_id, outcome) in outcomes {
        match outcome {
            Ok(Outcome::Downloaded) => report.record_success(),
            Ok(Outcome::AlreadyComplete) => report.record_skip(&book_id, "Already downloaded"),
            Err(e) => report.record_failure(&book_id, &e),
        }
    }
    report.print();

    if interrupted {
        Err(AppError::UserInterrupt)
    } else if report.all_succeeded() {
        Ok(())
    } else {
        Err(AppError::Other(anyhow!(
            "{} book(s) could not be downloaded",
            report.stats().failed
        )))
    }
}

fn spawn_progress_renderer(
    mut updates: broadcast::Receiver<DownloadProgress>,
    multi: MultiProgress,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut bars: HashMap<String, ProgressBar> = HashMap::new();
        loop {
            let update = match updates.recv().await {
                Ok(update) => update,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let pbar = bars
                .entry(update.book_id.clone())
                .or_insert_with(|| multi.add(ui::new_book_progress_bar(&update.book_id)));
            ui::set_fraction(pbar, update.progress);
            if update.stage.is_terminal() {
                let (symbol, color_fn) = update.stage.get_display_info();
                pbar.finish_with_message(format!(
                    "{} {}",
                    symbol,
                    color_fn(update.message.as_str().into())
                ));
            } else {
                pbar.set_message(update.message);
            }
        }
    })
}

async fn delete_book(ctx: &AppContext, book_id: &str) -> AppResult<()> {
    if ctx.storage.load_book(book_id)?.is_none() && !ctx.storage.book_dir(book_id)?.is_dir() {
        ui::warn(&format!("Book '{}' is not downloaded.", book_id));
        return Ok(());
    }
    ctx.manager.delete_book(book_id).await?;
    println!("{} Deleted '{}'.", *symbols::OK, book_id);
    Ok(())
}

async fn list_books(ctx: &AppContext) -> AppResult<()> {
    let books = ctx.manager.downloaded_books().await?;
    ui::print_header(&format!("Downloaded books ({})", books.len()));
    if books.is_empty() {
        ui::info("Nothing downloaded yet.");
    }
    for book in books.iter().sorted_by(|a, b| a.title.cmp(&b.title)) {
        let size = ctx.storage.book_storage_size(&book.id).unwrap_or(0);
        let verdict = ctx.validator.validate_book_integrity(&book.id);
        let symbol = if verdict.is_valid() {
            &*symbols::OK
        } else {
            &*symbols::WARN
        };
        let tracks = ctx
            .storage
            .book_dir(&book.id)
            .map(|dir| validation::audio_file_indices(&dir).len())
            .unwrap_or(0);
        println!(
            "{} {} {} {}, {} track(s)",
            symbol,
            utils::truncate_text(&book.title, constants::TITLE_TRUNCATE_LENGTH).bold(),
            format!("[{}]", book.id).dimmed(),
            format_bytes(size),
            tracks
        );
        if !book.author.is_empty() {
            println!("    {}", book.author);
        }
    }

    let used = ctx.storage.total_download_size()?;
    let free = ctx.storage.available_space()?;
    ui::print_sub_header("Storage");
    println!("  Location: {}", display_path(ctx.storage.root()));
    println!("  Used:     {}", format_bytes(used));
    println!("  Free:     {}", format_bytes(free));
    Ok(())
}

async fn verify_books(ctx: &AppContext) -> AppResult<()> {
    let ids = ctx.storage.list_book_ids()?;
    ui::print_header(&format!("Verifying {} book(s)", ids.len()));
    let mut damaged = 0;
    for book_id in &ids {
        match ctx.validator.validate_book_integrity(book_id) {
            ValidationResult::Valid => println!("{} {}", *symbols::OK, book_id),
            ValidationResult::Invalid(reason) => {
                damaged += 1;
                println!("{} {} {}", *symbols::ERROR, book_id, reason.red());
            }
        }
    }
    if damaged > 0 {
        println!(
            "\n{} {} damaged book(s); run with --heal to remove them.",
            *symbols::WARN,
            damaged
        );
        Err(AppError::Other(anyhow!("{} book(s) failed verification", damaged)))
    } else {
        println!("\n{} All books are intact.", *symbols::OK);
        Ok(())
    }
}

async fn heal_books(ctx: &AppContext) -> AppResult<()> {
    ui::print_header("Healing downloaded books");
    let report = ctx.healing_service().heal_now().await;
    for book_id in &report.removed {
        println!("{} Removed damaged book '{}'", *symbols::HEAL, book_id);
    }
    for book_id in &report.skipped_in_flight {
        println!("{} '{}' is downloading, left alone", *symbols::INFO, book_id);
    }
    println!(
        "\n{} Checked {} book(s), removed {}.",
        *symbols::OK,
        report.checked,
        report.removed.len()
    );
    Ok(())
}

async fn watch(ctx: &AppContext, cancel: &CancellationToken) -> AppResult<()> {
    let mut monitor = ConnectivityMonitor::new(ctx.http.clone(), ctx.config.healing.probe_interval);
    let mut healing = ctx.healing_service().with_connectivity(monitor.sender());

    let mut events = monitor.subscribe();
    let announcer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ConnectivityEvent::Online => println!("{} Server is reachable again", *symbols::OK),
                ConnectivityEvent::Offline => println!("{} Server is unreachable", *symbols::WARN),
            }
        }
    });

    monitor.start();
    healing.start();
    ui::print_header(&format!(
        "Watching {} (press {} to stop)",
        display_path(&ctx.config.downloads_dir),
        *symbols::CTRL_C
    ));

    cancel.cancelled().await;

    healing.stop().await;
    monitor.stop().await;
    announcer.abort();
    ui::info("Stopped watching.");
    Ok(())
}

fn display_path(path: &Path) -> String {
    dunce::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .display()
        .to_string()
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
