//! Output formatting for the headless viewer.

use clap::ValueEnum;
use evlens_core::DisplayEvent;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// One aligned line per event.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Write one event in `format`.
pub fn write_event(out: &mut dyn Write, event: &DisplayEvent, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => writeln!(out, "{}", text_line(event))?,
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(event)?)?,
    }
    Ok(())
}

/// `2024-01-01 12:00:00  Warning      Security [4625] Logon  An account failed to log on.`
pub fn text_line(event: &DisplayEvent) -> String {
    let description = event.description.replace(['\r', '\n'], " ");
    format!(
        "{}  {:<11}  {} [{}] {}  {}",
        event.timestamp.format("%Y-%m-%d %H:%M:%S"),
        event.severity.to_string(),
        event.provider_name,
        event.id,
        event.task_name,
        description.trim(),
    )
}
