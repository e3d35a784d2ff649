//! The closed set of actions the store accepts, and the effects a reduction
//! asks the dispatcher to carry out.

use super::state::ActiveLogTable;
use crate::filter::Filter;
use crate::types::{Checkpoint, DisplayEvent, LogId, LogSpecifier};
use crate::watcher::WatcherHandle;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Every way the store's state can change.
#[derive(Debug, Clone)]
pub enum Action {
    /// Open (or reopen) a log. `id` identifies this attempt; build with
    /// [`Action::open_log`].
    OpenLog { id: LogId, spec: LogSpecifier },
    CloseLog(LogId),
    CloseAll,
    /// Bulk scan finished; events are newest-first.
    LoadEvents {
        id: LogId,
        events: Vec<Arc<DisplayEvent>>,
        event_ids: BTreeSet<u16>,
        provider_names: BTreeSet<String>,
        task_names: BTreeSet<String>,
    },
    /// One live event arrived.
    AddEvent(Arc<DisplayEvent>),
    /// Continuous mode: a live event has been merged into this table.
    AddEventSuccess(ActiveLogTable),
    /// Paused mode: a live event has been buffered.
    AddEventBuffered {
        buffer: Vec<Arc<DisplayEvent>>,
        is_full: bool,
    },
    /// Merge the pending buffer into the logs.
    LoadNewEvents,
    SetContinuouslyUpdate(bool),
    SetFilters(Filter),
    SelectEvent(Option<Arc<DisplayEvent>>),
    /// Hand a freshly started watcher over to the store. `from` is the
    /// checkpoint the watcher was started after.
    AttachWatcher {
        id: LogId,
        handle: Arc<WatcherHandle>,
        from: Option<Checkpoint>,
    },
    /// The watcher of `id` applied the enable decided at `generation` and
    /// is about to deliver again.
    WatcherResumed { id: LogId, generation: u64 },
    /// Roll back a failed or cancelled open attempt. `reason` is `None` for
    /// cancellation.
    OpenFailed { id: LogId, reason: Option<String> },
}

impl Action {
    pub fn open_log(spec: LogSpecifier) -> Self {
        Action::OpenLog {
            id: LogId::next(),
            spec,
        }
    }

    /// Short name for log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Action::OpenLog { .. } => "OpenLog",
            Action::CloseLog(_) => "CloseLog",
            Action::CloseAll => "CloseAll",
            Action::LoadEvents { .. } => "LoadEvents",
            Action::AddEvent(_) => "AddEvent",
            Action::AddEventSuccess(_) => "AddEventSuccess",
            Action::AddEventBuffered { .. } => "AddEventBuffered",
            Action::LoadNewEvents => "LoadNewEvents",
            Action::SetContinuouslyUpdate(_) => "SetContinuouslyUpdate",
            Action::SetFilters(_) => "SetFilters",
            Action::SelectEvent(_) => "SelectEvent",
            Action::AttachWatcher { .. } => "AttachWatcher",
            Action::WatcherResumed { .. } => "WatcherResumed",
            Action::OpenFailed { .. } => "OpenFailed",
        }
    }
}

/// Side effects requested by a reduction. Reducers only describe them; the
/// dispatcher runs them after publishing the new snapshot.
#[derive(Debug)]
pub enum Effect {
    StartScan {
        id: LogId,
        spec: LogSpecifier,
        cancel: CancellationToken,
    },
    CancelScan(CancellationToken),
    DisposeWatcher(Arc<WatcherHandle>),
    /// Pause the watcher and rewind it to `resume_after`, or to where it
    /// started when `None`.
    DisableWatcher {
        handle: Arc<WatcherHandle>,
        resume_after: Option<Checkpoint>,
        generation: u64,
    },
    /// Run the watcher again, then confirm with [`Action::WatcherResumed`].
    EnableWatcher {
        id: LogId,
        handle: Arc<WatcherHandle>,
        generation: u64,
    },
}
