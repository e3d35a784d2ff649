//! Event resolver — turns a [`RawRecord`] plus provider metadata into a
//! [`DisplayEvent`].
//!
//! Resolution never fails. A provider without metadata yields a fallback
//! description; a missing or empty message template yields an empty
//! description. Structured fields are always kept.
//!
//! Two variants exist, picked per log open through [`ResolverFactory`]:
//!
//! - [`LocalProviderResolver`] asks a [`MetadataSource`] for each provider
//!   and caches the answer (hit or miss) for its own lifetime.
//! - [`DatabaseResolver`] reads from a pre-loaded, shared [`ProviderDatabase`].

use crate::config::ResolverKind;
use crate::source::{ActivityId, MetadataSource, StatusSink};
use crate::types::{DisplayEvent, RawRecord, Severity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Provider metadata
// ---------------------------------------------------------------------------

/// Message template of one event id/version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub id: u16,
    #[serde(default)]
    pub version: u8,
    #[serde(default)]
    pub template: Option<String>,
}

/// Everything a provider publishes about its events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub name: String,
    #[serde(default)]
    pub events: Vec<EventTemplate>,
    /// Keyword bit mask → keyword name.
    #[serde(default)]
    pub keywords: BTreeMap<u64, String>,
    #[serde(default)]
    pub tasks: BTreeMap<u16, String>,
    #[serde(default)]
    pub opcodes: BTreeMap<u8, String>,
}

impl ProviderMetadata {
    fn template(&self, id: u16, version: u8) -> Option<&str> {
        self.events
            .iter()
            .find(|e| e.id == id && e.version == version)
            .and_then(|e| e.template.as_deref())
    }
}

/// A set of providers loaded up front from one or more database files.
/// Keys are case-insensitive.
#[derive(Debug, Default)]
pub struct ProviderDatabase {
    providers: HashMap<String, Arc<ProviderMetadata>>,
}

impl ProviderDatabase {
    /// Build from a list of providers. When a provider appears more than
    /// once, the first occurrence wins.
    pub fn from_providers(providers: impl IntoIterator<Item = ProviderMetadata>) -> Self {
        let mut map = HashMap::new();
        for provider in providers {
            map.entry(provider.name.to_ascii_lowercase())
                .or_insert_with(|| Arc::new(provider));
        }
        Self { providers: map }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProviderMetadata>> {
        self.providers.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Resolver capability
// ---------------------------------------------------------------------------

/// Turns raw records into display models. One instance per worker or tail
/// session; instances are never shared between threads.
pub trait EventResolver: Send {
    fn kind(&self) -> ResolverKind;

    fn resolve(&mut self, raw: &RawRecord, owning_log: &str) -> DisplayEvent;
}

/// Where resolver status messages go, and under which activity.
#[derive(Clone)]
pub struct StatusTag {
    pub sink: Arc<dyn StatusSink>,
    pub activity: ActivityId,
}

/// Resolves providers through a [`MetadataSource`], one lookup per provider
/// name per instance.
pub struct LocalProviderResolver {
    source: Arc<dyn MetadataSource>,
    cache: HashMap<String, Option<Arc<ProviderMetadata>>>,
    status: Option<StatusTag>,
}

impl LocalProviderResolver {
    pub fn new(source: Arc<dyn MetadataSource>, status: Option<StatusTag>) -> Self {
        Self {
            source,
            cache: HashMap::new(),
            status,
        }
    }

    fn provider(&mut self, name: &str) -> Option<Arc<ProviderMetadata>> {
        if let Some(cached) = self.cache.get(name) {
            return cached.clone();
        }

        let found = self.source.lookup(name).map(Arc::new);
        match (&found, &self.status) {
            (Some(_), Some(tag)) => tag
                .sink
                .resolver_status(tag.activity, format!("Loaded provider {name}")),
            (None, Some(tag)) => tag
                .sink
                .resolver_status(tag.activity, format!("No metadata for provider {name}")),
            _ => {}
        }
        tracing::debug!(provider = name, found = found.is_some(), "provider lookup");
        self.cache.insert(name.to_string(), found.clone());
        found
    }
}

impl EventResolver for LocalProviderResolver {
    fn kind(&self) -> ResolverKind {
        ResolverKind::Local
    }

    fn resolve(&mut self, raw: &RawRecord, owning_log: &str) -> DisplayEvent {
        let provider = self.provider(&raw.provider_name);
        render(raw, provider.as_deref(), owning_log)
    }
}

/// Resolves providers from a shared [`ProviderDatabase`].
pub struct DatabaseResolver {
    database: Arc<ProviderDatabase>,
}

impl DatabaseResolver {
    pub fn new(database: Arc<ProviderDatabase>) -> Self {
        Self { database }
    }
}

impl EventResolver for DatabaseResolver {
    fn kind(&self) -> ResolverKind {
        ResolverKind::Database
    }

    fn resolve(&mut self, raw: &RawRecord, owning_log: &str) -> DisplayEvent {
        let provider = self.database.get(&raw.provider_name);
        render(raw, provider.as_deref(), owning_log)
    }
}

/// Creates a fresh resolver for each worker or tail session.
#[derive(Clone)]
pub enum ResolverFactory {
    Local(Arc<dyn MetadataSource>),
    Database(Arc<ProviderDatabase>),
}

impl ResolverFactory {
    pub fn kind(&self) -> ResolverKind {
        match self {
            ResolverFactory::Local(_) => ResolverKind::Local,
            ResolverFactory::Database(_) => ResolverKind::Database,
        }
    }

    pub fn create(&self, status: Option<StatusTag>) -> Box<dyn EventResolver> {
        match self {
            ResolverFactory::Local(source) => {
                Box::new(LocalProviderResolver::new(Arc::clone(source), status))
            }
            ResolverFactory::Database(db) => Box::new(DatabaseResolver::new(Arc::clone(db))),
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

const STANDARD_KEYWORDS: &[(u64, &str)] = &[
    (0x0001_0000_0000_0000, "Response Time"),
    (0x0002_0000_0000_0000, "WDI Context"),
    (0x0004_0000_0000_0000, "WDI Diagnostic"),
    (0x0008_0000_0000_0000, "SQM"),
    (0x0010_0000_0000_0000, "Audit Failure"),
    (0x0020_0000_0000_0000, "Audit Success"),
    (0x0040_0000_0000_0000, "Correlation Hint"),
    (0x0080_0000_0000_0000, "Classic"),
];

fn standard_opcode(opcode: u8) -> Option<&'static str> {
    Some(match opcode {
        0 => "Info",
        1 => "Start",
        2 => "Stop",
        3 => "DCStart",
        4 => "DCStop",
        7 => "Extension",
        8 => "Reply",
        9 => "Resume",
        10 => "Suspend",
        11 => "Send",
        240 => "Receive",
        _ => return None,
    })
}

/// Build the display model for `raw` from optional provider metadata.
pub fn render(raw: &RawRecord, provider: Option<&ProviderMetadata>, owning_log: &str) -> DisplayEvent {
    let description = match provider {
        None => format!("No provider metadata available for '{}'", raw.provider_name),
        Some(meta) => match meta.template(raw.event_id, raw.version) {
            Some(template) => format_message(template, &raw.properties),
            None => {
                tracing::debug!(
                    provider = %raw.provider_name,
                    event_id = raw.event_id,
                    version = raw.version,
                    "no message template"
                );
                String::new()
            }
        },
    };

    DisplayEvent {
        id: raw.event_id,
        record_id: raw.record_id,
        timestamp: raw.timestamp,
        machine: raw.machine.clone(),
        severity: Severity::from_level(raw.level),
        provider_name: raw.provider_name.clone(),
        task_name: task_name(raw.task, provider),
        opcode_name: opcode_name(raw.opcode, provider),
        description,
        keywords: keyword_names(raw.keywords, provider),
        activity_id: raw.activity_id.clone(),
        owning_log: owning_log.to_string(),
        checkpoint: raw.checkpoint,
    }
}

fn task_name(task: u16, provider: Option<&ProviderMetadata>) -> String {
    if let Some(name) = provider.and_then(|p| p.tasks.get(&task)) {
        return name.clone();
    }
    if task == 0 {
        "None".to_string()
    } else {
        format!("({task})")
    }
}

fn opcode_name(opcode: u8, provider: Option<&ProviderMetadata>) -> String {
    provider
        .and_then(|p| p.opcodes.get(&opcode).cloned())
        .or_else(|| standard_opcode(opcode).map(str::to_string))
        .unwrap_or_else(|| format!("({opcode})"))
}

fn keyword_names(mask: u64, provider: Option<&ProviderMetadata>) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = STANDARD_KEYWORDS
        .iter()
        .filter(|(bit, _)| mask & bit != 0)
        .map(|(_, name)| (*name).to_string())
        .collect();

    if let Some(meta) = provider {
        names.extend(
            meta.keywords
                .iter()
                .filter(|(bits, _)| **bits != 0 && mask & **bits == **bits)
                .map(|(_, name)| name.clone()),
        );
    }
    names
}

/// Substitute `%1`..`%N` insertion strings into a message template.
///
/// `%%` is a literal percent, `%n` a newline and `%t` a tab. A reference to
/// an insertion string that does not exist is kept verbatim. The result is
/// trimmed; a template that renders to whitespace only yields `""`.
pub fn format_message(template: &str, properties: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some('n') => {
                chars.next();
                out.push('\n');
            }
            Some('t') => {
                chars.next();
                out.push('\t');
            }
            Some(d) if d.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    chars.next();
                }
                let value = digits
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| i.checked_sub(1))
                    .and_then(|i| properties.get(i));
                match value {
                    Some(v) => out.push_str(v),
                    None => {
                        out.push('%');
                        out.push_str(&digits);
                    }
                }
            }
            _ => out.push('%'),
        }
    }

    out.trim().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn raw(provider: &str, id: u16) -> RawRecord {
        RawRecord {
            record_id: Some(7),
            event_id: id,
            version: 0,
            level: 2,
            task: 12,
            opcode: 1,
            keywords: 0x0020_0000_0000_0000 | 0x4,
            provider_name: provider.to_string(),
            log_name: "Security".to_string(),
            machine: "host-1".to_string(),
            timestamp: chrono::Utc::now(),
            activity_id: None,
            properties: vec!["alice".into(), "CORP".into()],
            checkpoint: None,
        }
    }

    fn provider() -> ProviderMetadata {
        ProviderMetadata {
            name: "Auth".to_string(),
            events: vec![
                EventTemplate {
                    id: 4624,
                    version: 0,
                    template: Some("User %2\\%1 logged on. 100%%".to_string()),
                },
                EventTemplate {
                    id: 4625,
                    version: 0,
                    template: Some("   ".to_string()),
                },
            ],
            keywords: BTreeMap::from([(0x4, "Logon".to_string()), (0x8, "Unused".to_string())]),
            tasks: BTreeMap::from([(12, "Logon".to_string())]),
            opcodes: BTreeMap::new(),
        }
    }

    struct CountingSource {
        lookups: AtomicUsize,
        provider: Option<ProviderMetadata>,
    }

    impl MetadataSource for CountingSource {
        fn lookup(&self, _: &str) -> Option<ProviderMetadata> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.provider.clone()
        }
    }

    #[test]
    fn renders_template_with_insertion_strings() {
        let event = render(&raw("Auth", 4624), Some(&provider()), "Security");
        assert_eq!(event.description, "User CORP\\alice logged on. 100%");
        assert_eq!(event.task_name, "Logon");
        assert_eq!(event.opcode_name, "Start");
        assert_eq!(event.severity, Severity::Error);
        assert_eq!(event.owning_log, "Security");
        assert_eq!(
            event.keywords,
            BTreeSet::from(["Audit Success".to_string(), "Logon".to_string()])
        );
    }

    #[test]
    fn missing_provider_yields_fallback_description() {
        let event = render(&raw("Ghost", 1), None, "System");
        assert_eq!(event.description, "No provider metadata available for 'Ghost'");
        assert_eq!(event.task_name, "(12)");
        assert!(event.keywords.contains("Audit Success"));
    }

    #[test]
    fn missing_or_blank_template_yields_empty_description() {
        let meta = provider();
        assert_eq!(render(&raw("Auth", 9999), Some(&meta), "Security").description, "");
        assert_eq!(render(&raw("Auth", 4625), Some(&meta), "Security").description, "");
    }

    #[test]
    fn unknown_insertion_index_is_kept() {
        assert_eq!(format_message("a %3 b%nc", &["x".into()]), "a %3 b\nc");
    }

    #[test]
    fn local_resolver_looks_each_provider_up_once() {
        let source = Arc::new(CountingSource {
            lookups: AtomicUsize::new(0),
            provider: None,
        });
        let mut resolver = LocalProviderResolver::new(source.clone(), None);
        for _ in 0..5 {
            resolver.resolve(&raw("Ghost", 1), "System");
        }
        assert_eq!(source.lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn database_resolver_is_case_insensitive() {
        let db = Arc::new(ProviderDatabase::from_providers([provider()]));
        let mut resolver = ResolverFactory::Database(db).create(None);
        assert_eq!(resolver.kind(), ResolverKind::Database);
        let event = resolver.resolve(&raw("AUTH", 4624), "Security");
        assert_eq!(event.description, "User CORP\\alice logged on. 100%");
    }
}
