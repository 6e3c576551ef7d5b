// src/cli.rs

use clap::{Parser, ValueEnum, command, crate_version};
use std::path::PathBuf;

/// Verbosity of the log file.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Parser, Debug, Clone)]
#[command(
    version = crate_version!(),
    about,
    long_about = None,
    arg_required_else_help = true,
    disable_help_flag = true,
    disable_version_flag = true,
)]
#[command(group(
    clap::ArgGroup::new("mode")
        .required(true)
        .args(&["book", "batch_file", "list", "verify", "heal", "delete", "watch"]),
))]
pub struct Cli {
    // --- Mode ---
    /// Download one or more books by id
    #[arg(long, value_name = "ID", num_args = 1.., help_heading = "Mode")]
    pub book: Vec<String>,
    /// Download every book id listed in a text file (one per line, '#' starts a comment)
    #[arg(short, long, value_name = "FILE", help_heading = "Mode")]
    pub batch_file: Option<PathBuf>,
    /// List downloaded books and their size on disk
    #[arg(long, action = clap::ArgAction::SetTrue, help_heading = "Mode")]
    pub list: bool,
    /// Check every downloaded book and report the damaged ones without touching them
    #[arg(long, action = clap::ArgAction::SetTrue, help_heading = "Mode")]
    pub verify: bool,
    /// Check every downloaded book and delete the damaged ones
    #[arg(long, action = clap::ArgAction::SetTrue, help_heading = "Mode")]
    pub heal: bool,
    /// Delete a downloaded book
    #[arg(long, value_name = "ID", help_heading = "Mode")]
    pub delete: Option<String>,
    /// Stay running, healing periodically and whenever the server comes back
    #[arg(long, action = clap::ArgAction::SetTrue, help_heading = "Mode")]
    pub watch: bool,

    // --- Options ---
    /// Server base URL, e.g. https://books.example.com
    #[arg(long, value_name = "URL", help_heading = "Options")]
    pub server: Option<String>,
    /// Access token; takes precedence over the environment and config file
    #[arg(long, help_heading = "Options")]
    pub token: Option<String>,
    /// Directory that holds downloaded books
    #[arg(short, long, value_name = "DIR", help_heading = "Options")]
    pub output: Option<PathBuf>,
    /// Download again even if a complete copy is already on disk
    #[arg(short, long, action = clap::ArgAction::SetTrue, help_heading = "Options")]
    pub force_redownload: bool,
    /// Number of books downloaded at the same time
    #[arg(short, long, value_parser = clap::value_parser!(usize), help_heading = "Options")]
    pub workers: Option<usize>,

    // --- General ---
    /// Print help and exit
    #[arg(short = 'h', long, action = clap::ArgAction::Help, global = true, help_heading = "General")]
    _help: Option<bool>,
    /// Print version and exit
    #[arg(short = 'V', long, action = clap::ArgAction::Version, global = true, help_heading = "General")]
    _version: Option<bool>,
    /// (hidden) Log file verbosity, for debugging
    #[arg(long, value_enum, default_value_t = LogLevel::Off, global = true, hide = true)]
    pub log_level: LogLevel,
}

impl Cli {
    /// Whether this run talks to the server at all.
    pub fn needs_server(&self) -> bool {
        !self.book.is_empty() || self.batch_file.is_some() || self.watch
    }
}
