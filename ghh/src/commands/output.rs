//! Output formatting utilities for CLI

use crate::api::ProgressLine;
use crate::error::Error;
use crate::registry::{RegistryEntry, WingStatus};
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use console::{style, Emoji};
use event_stream::EventStream;

pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", ":: ");
pub static CHECK: Emoji<'_, '_> = Emoji("✓ ", "OK ");
pub static CROSS: Emoji<'_, '_> = Emoji("✗ ", "ERR ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ ", "i ");

/// Print success message
pub fn success(msg: impl Into<String>) {
    println!("{} {}", style(CHECK).green(), style(msg.into()).green());
}

/// Print error message
pub fn error(msg: impl Into<String>) {
    eprintln!("{} {}", style(CROSS).red(), style(msg.into()).red());
}

/// Print info message
pub fn info(msg: impl Into<String>) {
    println!("{} {}", style(INFO).cyan(), msg.into());
}

/// Print warning message
pub fn warn(msg: impl Into<String>) {
    println!("{} {}", style("⚠").yellow(), style(msg.into()).yellow());
}

/// Print a banner announcing a long operation
pub fn banner(msg: impl Into<String>) {
    println!("{}{}", ROCKET, style(msg.into()).bold());
}

/// Print progress lines as they arrive: `info` in green, `error` in red.
pub fn print_progress(progress: &EventStream<ProgressLine, Error>) {
    progress.subscribe_value(|line: &ProgressLine| match line {
        ProgressLine::Info { message } => println!("{}", style(message).green()),
        ProgressLine::Error { message } => eprintln!("{}", style(message).red()),
    });
}

/// Print wing table
pub fn print_entries_table(entries: &[RegistryEntry]) {
    if entries.is_empty() {
        info("No wings registered");
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Name", "Status", "PID", "Port", "Started", "Config"]);

    for entry in entries {
        table.add_row(vec![
            Cell::new(&entry.name),
            format_status(entry.status),
            Cell::new(entry.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())),
            Cell::new(entry.port),
            Cell::new(
                entry
                    .started_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(entry.config_file_path.display()),
        ]);
    }

    println!("{table}");
}

fn format_status(status: WingStatus) -> Cell {
    match status {
        WingStatus::Active => Cell::new(status).fg(Color::Green),
        WingStatus::Stopped => Cell::new(status).fg(Color::Yellow),
    }
}
