//! Core types for evlens-core.
//!
//! This module defines the data structures shared across all pipeline
//! layers: the [`RawRecord`] handed over by a record source, the resolved
//! [`DisplayEvent`], its [`Severity`], and the [`LogSpecifier`] /
//! [`LogKind`] pair that names a log.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a log source. Immutable once a log is opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogSpecifier {
    pub name: String,
    pub kind: LogKind,
}

impl LogSpecifier {
    pub fn live(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: LogKind::Live,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: LogKind::File,
        }
    }
}

/// Whether a log is a live channel (tailed after the initial scan) or an
/// archived file (scanned once).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Live,
    File,
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogKind::Live => write!(f, "live"),
            LogKind::File => write!(f, "file"),
        }
    }
}

/// Opaque position within a record source.
///
/// The pipeline never inspects a checkpoint; it only stores it, hands it
/// back to the source that produced it, and compares positions within one
/// source (later records have greater checkpoints).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint(u64);

impl Checkpoint {
    /// Wrap a source-specific position. Only record sources should call this.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Unwrap back into the source-specific position.
    pub fn into_raw(self) -> u64 {
        self.0
    }
}

/// Identity of one open attempt of a log.
///
/// A fresh id is allocated every time a log is opened, so an action tagged
/// with the id of a replaced attempt can never touch its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogId(u64);

static NEXT_LOG_ID: AtomicU64 = AtomicU64::new(1);

impl LogId {
    pub fn next() -> Self {
        Self(NEXT_LOG_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for LogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "log#{}", self.0)
    }
}

/// A single record as yielded by the record source, before resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub record_id: Option<u64>,
    pub event_id: u16,
    #[serde(default)]
    pub version: u8,
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub task: u16,
    #[serde(default)]
    pub opcode: u8,
    /// Keyword bit mask. High bits carry the standard channel keywords.
    #[serde(default)]
    pub keywords: u64,
    pub provider_name: String,
    #[serde(default)]
    pub log_name: String,
    #[serde(default)]
    pub machine: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub activity_id: Option<String>,
    /// Insertion strings substituted into the provider's message template.
    #[serde(default)]
    pub properties: Vec<String>,
    /// Filled in by the record source; never part of the serialized record.
    #[serde(skip)]
    pub checkpoint: Option<Checkpoint>,
}

/// Event severity, normalised from the raw level byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    Error,
    Warning,
    Information,
    Verbose,
}

impl Severity {
    pub fn from_level(level: u8) -> Self {
        match level {
            1 => Severity::Critical,
            2 => Severity::Error,
            3 => Severity::Warning,
            5 => Severity::Verbose,
            _ => Severity::Information,
        }
    }

    /// Case-insensitive parse of the display name, used by the filter query.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "critical" | "crit" => Some(Severity::Critical),
            "error" | "err" => Some(Severity::Error),
            "warning" | "warn" => Some(Severity::Warning),
            "information" | "info" => Some(Severity::Information),
            "verbose" => Some(Severity::Verbose),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Critical => write!(f, "Critical"),
            Severity::Error => write!(f, "Error"),
            Severity::Warning => write!(f, "Warning"),
            Severity::Information => write!(f, "Information"),
            Severity::Verbose => write!(f, "Verbose"),
        }
    }
}

/// A resolved, display-ready event. Immutable once constructed; shared
/// behind `Arc` between the log table, the pending buffer and the visible
/// slices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayEvent {
    pub id: u16,
    pub record_id: Option<u64>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub machine: String,
    pub severity: Severity,
    pub provider_name: String,
    pub task_name: String,
    pub opcode_name: String,
    /// Rendered message. Never absent: an unresolvable template renders as
    /// the empty string.
    pub description: String,
    pub keywords: BTreeSet<String>,
    pub activity_id: Option<String>,
    /// Name of the log this event belongs to.
    pub owning_log: String,
    /// Source position of the record, used to resume and de-duplicate live
    /// delivery.
    #[serde(skip)]
    pub checkpoint: Option<Checkpoint>,
}
