//! Test builders — ergonomic constructors for records, events and a wired-up
//! dispatcher.
//!
//! These builders are designed for readability in test assertions, not for
//! production use. They panic on invalid input rather than returning `Result`.

use evlens_core::config::ScannerConfig;
use evlens_core::dispatcher::{self, Collaborators, DispatchHandle};
use evlens_core::resolver::{ProviderDatabase, ResolverFactory};
use evlens_core::source::NullStatusSink;
use evlens_core::{Checkpoint, DisplayEvent, EventLogState, RawRecord, Severity};
use evlens_feeds::MemoryChannel;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// RawRecordBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`RawRecord`] test fixtures.
///
/// # Example
///
/// ```rust
/// let record = RawRecordBuilder::new(4625)
///     .provider("Security")
///     .level(2)
///     .properties(["alice"])
///     .build();
/// ```
pub struct RawRecordBuilder {
    record: RawRecord,
}

impl RawRecordBuilder {
    pub fn new(event_id: u16) -> Self {
        Self {
            record: RawRecord {
                record_id: None,
                event_id,
                version: 0,
                level: 4,
                task: 0,
                opcode: 0,
                keywords: 0,
                provider_name: "Test-Provider".to_string(),
                log_name: String::new(),
                machine: "test-host".to_string(),
                timestamp: chrono::Utc::now(),
                activity_id: None,
                properties: Vec::new(),
                checkpoint: None,
            },
        }
    }

    pub fn record_id(mut self, id: u64) -> Self {
        self.record.record_id = Some(id);
        self
    }

    pub fn provider(mut self, name: impl Into<String>) -> Self {
        self.record.provider_name = name.into();
        self
    }

    pub fn level(mut self, level: u8) -> Self {
        self.record.level = level;
        self
    }

    pub fn task(mut self, task: u16) -> Self {
        self.record.task = task;
        self
    }

    pub fn keywords(mut self, mask: u64) -> Self {
        self.record.keywords = mask;
        self
    }

    pub fn properties<I, S>(mut self, props: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record.properties = props.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> RawRecord {
        self.record
    }
}

// ---------------------------------------------------------------------------
// Display events for reducer-level tests
// ---------------------------------------------------------------------------

/// A resolved event for `log` at source position `position`.
pub fn display_event(log: &str, id: u16, position: u64) -> Arc<DisplayEvent> {
    Arc::new(DisplayEvent {
        id,
        record_id: Some(position),
        timestamp: chrono::Utc::now(),
        machine: "test-host".into(),
        severity: Severity::Information,
        provider_name: format!("Provider-{}", id % 4),
        task_name: format!("Task-{}", id % 3),
        opcode_name: "Info".into(),
        description: format!("event {id} at {position}"),
        keywords: BTreeSet::new(),
        activity_id: None,
        owning_log: log.into(),
        checkpoint: Some(Checkpoint::from_raw(position)),
    })
}

// ---------------------------------------------------------------------------
// Corpus helpers
// ---------------------------------------------------------------------------

/// `n` records with record ids `0..n`, cycling through three providers and
/// every severity level.
pub fn build_corpus(n: usize) -> Vec<RawRecord> {
    (0..n)
        .map(|i| {
            RawRecordBuilder::new((i % 50) as u16 + 1000)
                .record_id(i as u64)
                .provider(format!("Provider-{}", i % 3))
                .level((i % 5) as u8 + 1)
                .task((i % 4) as u16)
                .properties([format!("value-{i}")])
                .build()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Pipeline wiring
// ---------------------------------------------------------------------------

/// A running dispatcher over a [`MemoryChannel`].
pub struct Pipeline {
    pub channel: MemoryChannel,
    pub handle: DispatchHandle,
    pub snapshots: watch::Receiver<Arc<EventLogState>>,
    pub task: JoinHandle<()>,
}

/// Start a dispatcher over `channel` with small scanner batches.
pub fn pipeline(channel: MemoryChannel, initial: EventLogState) -> Pipeline {
    let collaborators = Collaborators {
        source: Arc::new(channel.clone()),
        live: Some(Arc::new(channel.clone())),
        resolvers: ResolverFactory::Local(Arc::new(channel.clone())),
        status: Arc::new(NullStatusSink),
        scanner: ScannerConfig {
            batch_size: 50,
            workers: 4,
            progress_interval_ms: 20,
        },
    };
    let (handle, snapshots, task) = dispatcher::spawn(initial, collaborators);
    Pipeline {
        channel,
        handle,
        snapshots,
        task,
    }
}

/// Resolver factory with no provider metadata at all.
pub fn bare_resolvers() -> ResolverFactory {
    ResolverFactory::Database(Arc::new(ProviderDatabase::default()))
}

impl Pipeline {
    /// Wait (up to five seconds) for a snapshot satisfying `pred`.
    pub async fn wait_for(&mut self, pred: impl Fn(&EventLogState) -> bool) -> Arc<EventLogState> {
        let state = tokio::time::timeout(Duration::from_secs(5), self.snapshots.wait_for(|s| pred(s)))
            .await
            .expect("timed out waiting for pipeline state")
            .expect("dispatcher stopped");
        Arc::clone(&state)
    }

    pub fn current(&self) -> Arc<EventLogState> {
        Arc::clone(&self.snapshots.borrow())
    }
}
