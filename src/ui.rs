// src/ui.rs

use crate::{constants, symbols};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};

/// Resolution of the per-book progress bars (progress is reported as a fraction).
const PROGRESS_SCALE: u64 = 1000;

pub fn print_header(title: &str) {
    println!("\n{}", "═".repeat(constants::UI_WIDTH));
    println!(" {}", title.cyan().bold());
    println!("{}", "═".repeat(constants::UI_WIDTH));
}

pub fn print_sub_header(title: &str) {
    println!("\n--- {} ---", title.bold());
}

pub fn box_message(title: &str, content: &[&str], color_func: fn(ColoredString) -> ColoredString) {
    println!("\n┌{}┐", "─".repeat(constants::UI_WIDTH - 2));
    println!("  {}", color_func(title.bold()));
    println!("├{}┤", "─".repeat(constants::UI_WIDTH - 2));
    for line in content {
        println!("  {}", line);
    }
    println!("└{}┘", "─".repeat(constants::UI_WIDTH - 2));
}

pub fn info(message: &str) {
    println!("{} {}", *symbols::INFO, message);
}

pub fn warn(message: &str) {
    println!("{} {}", *symbols::WARN, message.yellow());
}

pub fn prompt(message: &str, default: Option<&str>) -> io::Result<String> {
    let default_str = default.map_or("".to_string(), |d| format!(" (default: {})", d));
    print!("\n>>> {}{}: ", message, default_str);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_string();
    if input.is_empty() {
        Ok(default.unwrap_or("").to_string())
    } else {
        Ok(input)
    }
}

pub fn confirm(question: &str, default_yes: bool) -> bool {
    let options = if default_yes { "(Y/n)" } else { "(y/N)" };
    loop {
        match prompt(
            &format!("{} {} (press {} to cancel)", question, options, *symbols::CTRL_C),
            None,
        ) {
            Ok(choice) => match choice.to_lowercase().as_str() {
                "y" => return true,
                "n" => return false,
                "" => return default_yes,
                _ => println!("{}", "Please answer 'y' or 'n'.".red()),
            },
            Err(_) => return false,
        }
    }
}

pub fn prompt_hidden(message: &str) -> io::Result<String> {
    print!("\n>>> {}: ", message);
    io::stdout().flush()?;
    rpassword::read_password()
}

/// One bar per book, driven by the fractional progress of the pipeline.
pub fn new_book_progress_bar(title: &str) -> ProgressBar {
    let pbar = ProgressBar::new(PROGRESS_SCALE);
    let style = ProgressStyle::with_template(
        "{prefix:.bold} [{bar:30.cyan/blue}] {percent:>3}% {wide_msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    pbar.set_style(style);
    pbar.set_prefix(crate::utils::truncate_text(title, constants::TITLE_TRUNCATE_LENGTH / 2));
    pbar
}

pub fn set_fraction(pbar: &ProgressBar, fraction: f64) {
    pbar.set_position((fraction.clamp(0.0, 1.0) * PROGRESS_SCALE as f64) as u64);
}
