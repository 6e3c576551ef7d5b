// src/report.rs

use crate::{error::AppError, models::DownloadStatus, symbols, ui};
use colored::*;
use itertools::Itertools;
use log::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Outcome tally of one CLI run, printed at the end.
#[derive(Debug, Default)]
pub struct BatchReport {
    stats: BatchStats,
    skipped: Vec<(String, String)>,
    failed: Vec<(String, String)>,
}

impl BatchReport {
    pub fn new(total: usize) -> Self {
        info!("Starting a batch of {} book(s)", total);
        Self {
            stats: BatchStats {
                total,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn record_success(&mut self) {
        self.stats.success += 1;
    }

    pub fn record_skip(&mut self, book: &str, reason: &str) {
        info!("Skipped '{}': {}", book, reason);
        self.stats.skipped += 1;
        self.skipped.push((book.to_string(), reason.to_string()));
    }

    pub fn record_failure(&mut self, book: &str, error: &AppError) {
        let status = DownloadStatus::from(error);
        log::error!("'{}' failed ({:?}): {}", book, status, error);
        if status == DownloadStatus::Skipped {
            self.record_skip(book, &error.to_string());
            return;
        }
        self.stats.failed += 1;
        let (_, _, summary) = status.get_display_info();
        self.failed.push((book.to_string(), format!("{summary}: {error}")));
    }

    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    pub fn all_succeeded(&self) -> bool {
        self.stats.failed == 0
    }

    pub fn print(&self) {
        let stats = &self.stats;
        info!(
            "Batch report: total={}, success={}, skipped={}, failed={}",
            stats.total, stats.success, stats.skipped, stats.failed
        );

        if !self.skipped.is_empty() || !self.failed.is_empty() {
            ui::print_sub_header("Details");
            if !self.skipped.is_empty() {
                println!("\n{} Skipped ({}):", *symbols::INFO, stats.skipped);
                print_grouped(&self.skipped, |s| s.cyan());
            }
            if !self.failed.is_empty() {
                println!("\n{} Failed ({}):", *symbols::ERROR, stats.failed);
                print_grouped(&self.failed, |s| s.red());
            }
        }

        ui::print_sub_header("Summary");
        if stats.total > 0 && stats.failed == 0 {
            println!(
                "{} All {} book(s) are available offline ({} skipped).",
                *symbols::OK,
                stats.total,
                stats.skipped
            );
        } else {
            println!(
                "{} | {} | {}",
                format!("Downloaded: {}", stats.success).green(),
                format!("Failed: {}", stats.failed).red(),
                format!("Skipped: {}", stats.skipped).yellow()
            );
        }
    }
}

fn print_grouped(items: &[(String, String)], color_fn: fn(ColoredString) -> ColoredString) {
    let grouped = items
        .iter()
        .map(|(book, reason)| (reason.as_str(), book.as_str()))
        .into_group_map();
    for reason in grouped.keys().sorted() {
        println!("  - {}", color_fn(reason.to_string().into()));
        if let Some(books) = grouped.get(reason) {
            for book in books.iter().sorted() {
                println!("    - {}", book);
            }
        }
    }
}
