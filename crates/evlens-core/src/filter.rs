//! Recomputes the visible slice of every open log from a [`Filter`].
//!
//! A [`Filter`] is plain data (criteria, not a closure) so it can be logged,
//! compared and serialized. [`apply`] compiles it once and runs the same
//! predicate over every open log.
//!
//! # Query syntax
//!
//! [`Filter::parse`] accepts whitespace-separated terms:
//!
//! | Term | Meaning |
//! |------|---------|
//! | `id:4624` / `id:4624-4634` | event id or inclusive id range (repeatable) |
//! | `provider:<name>` | provider name, case-insensitive (repeatable) |
//! | `task:<name>` | task name, case-insensitive (repeatable) |
//! | `level:<severity>` | `critical`, `error`, `warning`, `information`, `verbose` |
//! | `keyword:<name>` | event carries this keyword |
//! | `since:<rfc3339>` / `until:<rfc3339>` | timestamp bounds, inclusive |
//! | anything else | free text matched against the description |
//!
//! Free text wrapped in slashes (`/time.*out/`) is a case-insensitive regex;
//! otherwise it is a case-insensitive substring.

use crate::store::ActiveLogTable;
use crate::types::{DisplayEvent, LogId, Severity};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

/// Visible events per open log, newest-first.
pub type VisibleSlices = BTreeMap<LogId, Arc<[Arc<DisplayEvent>]>>;

/// Inclusive event id range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub start: u16,
    pub end: u16,
}

impl IdRange {
    pub fn single(id: u16) -> Self {
        Self { start: id, end: id }
    }

    fn contains(&self, id: u16) -> bool {
        (self.start..=self.end).contains(&id)
    }
}

/// Criteria an event must satisfy to be visible. Every non-empty criterion
/// must match; within one criterion any listed value matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub event_ids: Vec<IdRange>,
    #[serde(default)]
    pub providers: BTreeSet<String>,
    #[serde(default)]
    pub tasks: BTreeSet<String>,
    #[serde(default)]
    pub severities: BTreeSet<Severity>,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub until: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("invalid event id or range: {0:?}")]
    BadId(String),
    #[error("unknown level: {0:?}")]
    BadLevel(String),
    #[error("invalid timestamp: {0:?}")]
    BadTimestamp(String),
    #[error("invalid regex: {0}")]
    BadRegex(String),
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        *self == Filter::default()
    }

    /// Parse a query string (see module docs).
    pub fn parse(input: &str) -> Result<Filter, FilterError> {
        let mut filter = Filter::default();
        let mut text: Vec<&str> = Vec::new();

        for term in input.split_whitespace() {
            let Some((key, value)) = term.split_once(':').filter(|(_, v)| !v.is_empty()) else {
                text.push(term);
                continue;
            };
            match key.to_ascii_lowercase().as_str() {
                "id" => filter.event_ids.push(parse_id_range(value)?),
                "provider" => {
                    filter.providers.insert(value.to_string());
                }
                "task" => {
                    filter.tasks.insert(value.to_string());
                }
                "level" => {
                    let severity =
                        Severity::parse(value).ok_or_else(|| FilterError::BadLevel(value.to_string()))?;
                    filter.severities.insert(severity);
                }
                "keyword" => {
                    filter.keywords.insert(value.to_string());
                }
                "since" => filter.since = Some(parse_timestamp(value)?),
                "until" => filter.until = Some(parse_timestamp(value)?),
                _ => text.push(term),
            }
        }

        if !text.is_empty() {
            let joined = text.join(" ");
            if let Some(pattern) = regex_source(&joined) {
                build_regex(pattern).map_err(|e| FilterError::BadRegex(e.to_string()))?;
            }
            filter.text = Some(joined);
        }
        Ok(filter)
    }

    /// Compile into a matcher. A text criterion that is not a valid regex
    /// is matched as a literal substring.
    pub fn compile(&self) -> CompiledFilter<'_> {
        let text = self.text.as_deref().map(|t| match regex_source(t).map(build_regex) {
            Some(Ok(re)) => TextMatcher::Regex(re),
            _ => TextMatcher::Substring(t.to_lowercase()),
        });
        CompiledFilter {
            filter: self,
            providers: lowercase_set(&self.providers),
            tasks: lowercase_set(&self.tasks),
            text,
        }
    }

    /// Convenience for one-off checks. Prefer [`Filter::compile`] in loops.
    pub fn matches(&self, event: &DisplayEvent) -> bool {
        self.compile().matches(event)
    }
}

enum TextMatcher {
    Substring(String),
    Regex(Regex),
}

/// A [`Filter`] with its text pattern compiled and name sets normalised.
pub struct CompiledFilter<'a> {
    filter: &'a Filter,
    providers: BTreeSet<String>,
    tasks: BTreeSet<String>,
    text: Option<TextMatcher>,
}

impl CompiledFilter<'_> {
    pub fn matches(&self, event: &DisplayEvent) -> bool {
        let f = self.filter;

        if !f.event_ids.is_empty() && !f.event_ids.iter().any(|r| r.contains(event.id)) {
            return false;
        }
        if !self.providers.is_empty() && !self.providers.contains(&event.provider_name.to_lowercase()) {
            return false;
        }
        if !self.tasks.is_empty() && !self.tasks.contains(&event.task_name.to_lowercase()) {
            return false;
        }
        if !f.severities.is_empty() && !f.severities.contains(&event.severity) {
            return false;
        }
        if !f.keywords.is_empty() && !f.keywords.iter().any(|k| event.keywords.contains(k)) {
            return false;
        }
        if f.since.is_some_and(|since| event.timestamp < since) {
            return false;
        }
        if f.until.is_some_and(|until| event.timestamp > until) {
            return false;
        }
        match &self.text {
            None => true,
            Some(TextMatcher::Substring(needle)) => event.description.to_lowercase().contains(needle),
            Some(TextMatcher::Regex(re)) => re.is_match(&event.description),
        }
    }
}

/// Recompute the visible slice of every open log under `filter`.
pub fn apply(table: &ActiveLogTable, filter: &Filter) -> VisibleSlices {
    if filter.is_empty() {
        return table
            .iter()
            .map(|(id, log)| (*id, Arc::from(log.events.as_slice())))
            .collect();
    }

    let compiled = filter.compile();
    table
        .iter()
        .map(|(id, log)| {
            let visible: Vec<Arc<DisplayEvent>> = log
                .events
                .iter()
                .filter(|e| compiled.matches(e))
                .cloned()
                .collect();
            (*id, Arc::from(visible))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_id_range(value: &str) -> Result<IdRange, FilterError> {
    let bad = || FilterError::BadId(value.to_string());
    match value.split_once('-') {
        Some((start, end)) => {
            let start: u16 = start.parse().map_err(|_| bad())?;
            let end: u16 = end.parse().map_err(|_| bad())?;
            if start > end {
                return Err(bad());
            }
            Ok(IdRange { start, end })
        }
        None => value.parse().map(IdRange::single).map_err(|_| bad()),
    }
}

fn parse_timestamp(value: &str) -> Result<chrono::DateTime<chrono::Utc>, FilterError> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|_| FilterError::BadTimestamp(value.to_string()))
}

fn regex_source(text: &str) -> Option<&str> {
    text.strip_prefix('/')
        .and_then(|t| t.strip_suffix('/'))
        .filter(|t| !t.is_empty())
}

fn build_regex(pattern: &str) -> Result<Regex, regex::Error> {
    regex::RegexBuilder::new(pattern).case_insensitive(true).build()
}

fn lowercase_set(set: &BTreeSet<String>) -> BTreeSet<String> {
    set.iter().map(|s| s.to_lowercase()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
