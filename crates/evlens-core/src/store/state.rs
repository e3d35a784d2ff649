//! The immutable snapshot published after every applied action.

use crate::filter::{Filter, VisibleSlices};
use crate::types::{Checkpoint, DisplayEvent, LogId, LogKind, LogSpecifier};
use crate::watcher::WatcherHandle;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Events and filter-picker values of one open log.
#[derive(Debug, Clone)]
pub struct EventLogData {
    pub id: LogId,
    pub name: String,
    pub kind: LogKind,
    /// Newest-first. Only ever extended at the front.
    pub events: Vec<Arc<DisplayEvent>>,
    pub event_ids: BTreeSet<u16>,
    pub provider_names: BTreeSet<String>,
    pub task_names: BTreeSet<String>,
}

impl EventLogData {
    pub fn new(id: LogId, spec: &LogSpecifier) -> Self {
        Self {
            id,
            name: spec.name.clone(),
            kind: spec.kind,
            events: Vec::new(),
            event_ids: BTreeSet::new(),
            provider_names: BTreeSet::new(),
            task_names: BTreeSet::new(),
        }
    }
}

/// Open logs keyed by open-attempt id. Names are unique across entries.
#[derive(Debug, Clone, Default)]
pub struct ActiveLogTable {
    logs: BTreeMap<LogId, Arc<EventLogData>>,
}

impl ActiveLogTable {
    pub fn get(&self, id: LogId) -> Option<&Arc<EventLogData>> {
        self.logs.get(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<EventLogData>> {
        self.logs.values().find(|log| log.name == name)
    }

    pub fn contains(&self, id: LogId) -> bool {
        self.logs.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LogId, &Arc<EventLogData>)> {
        self.logs.iter()
    }

    pub fn ids(&self) -> Vec<LogId> {
        self.logs.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn insert(&mut self, log: EventLogData) {
        self.logs.insert(log.id, Arc::new(log));
    }

    pub fn remove(&mut self, id: LogId) -> Option<Arc<EventLogData>> {
        self.logs.remove(&id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Enabled,
    Disabled,
    /// Enable requested; deliveries are refused until the watcher confirms.
    Resuming,
}

/// The store's record of the one watcher tailing a live log.
///
/// The handle is owned by this slot: the store disposes it when the slot is
/// removed or replaced, and nothing else does.
#[derive(Debug, Clone)]
pub struct WatcherSlot {
    pub handle: Arc<WatcherHandle>,
    pub state: WatcherState,
    /// Position of the newest live event accepted into the store.
    pub last_accepted: Option<Checkpoint>,
    /// Bumped on every enable/disable decision.
    pub generation: u64,
}

/// Complete, immutable view of the pipeline at one version.
#[derive(Debug, Clone)]
pub struct EventLogState {
    pub version: u64,
    pub logs: ActiveLogTable,
    /// Events held back while continuous update is off, newest-first.
    pub new_events: Vec<Arc<DisplayEvent>>,
    pub max_new_events: usize,
    pub continuously_update: bool,
    pub filter: Filter,
    pub visible: VisibleSlices,
    pub selected: Option<Arc<DisplayEvent>>,
    pub watchers: BTreeMap<LogId, WatcherSlot>,
    /// Cancellation signal of every scan still in flight.
    pub scans: BTreeMap<LogId, CancellationToken>,
    /// Message of the most recent failed open attempt.
    pub last_error: Option<String>,
}

impl EventLogState {
    pub fn new(max_new_events: usize, continuously_update: bool) -> Self {
        Self {
            version: 0,
            logs: ActiveLogTable::default(),
            new_events: Vec::new(),
            max_new_events,
            continuously_update,
            filter: Filter::default(),
            visible: VisibleSlices::new(),
            selected: None,
            watchers: BTreeMap::new(),
            scans: BTreeMap::new(),
            last_error: None,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.buffer.max_new_events, config.buffer.continuously_update)
    }

    pub fn is_buffer_full(&self) -> bool {
        self.new_events.len() >= self.max_new_events
    }

    pub fn watcher_state(&self, id: LogId) -> Option<WatcherState> {
        self.watchers.get(&id).map(|slot| slot.state)
    }

    /// Visible events of one log, newest-first.
    pub fn visible_events(&self, id: LogId) -> &[Arc<DisplayEvent>] {
        self.visible.get(&id).map(|v| &v[..]).unwrap_or(&[])
    }

    pub fn is_loading(&self, id: LogId) -> bool {
        self.scans.contains_key(&id)
    }
}

impl Default for EventLogState {
    fn default() -> Self {
        Self::new(5000, true)
    }
}
