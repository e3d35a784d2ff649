//! Routing of live events and merging of buffered ones.
//!
//! In continuous mode an event is merged straight into its log. Otherwise
//! it is prepended to the pending buffer, which is merged later in one go by
//! [`flush`]. Events are routed to their log by [`DisplayEvent::owning_log`],
//! so any number of logs can be open and tailing at once.

use crate::store::{Action, ActiveLogTable, EventLogData, EventLogState};
use crate::types::DisplayEvent;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Route one live event. Returns `None` when its log is not open.
pub fn route(state: &EventLogState, event: Arc<DisplayEvent>) -> Option<Action> {
    let log = state.logs.by_name(&event.owning_log)?;

    if state.continuously_update {
        let mut table = state.logs.clone();
        table.insert(merge_batch(log, std::slice::from_ref(&event)));
        return Some(Action::AddEventSuccess(table));
    }

    let mut buffer = Vec::with_capacity(state.new_events.len() + 1);
    buffer.push(event);
    buffer.extend(state.new_events.iter().cloned());
    let is_full = buffer.len() >= state.max_new_events;
    Some(Action::AddEventBuffered { buffer, is_full })
}

/// Prepend a newest-first batch to a log and widen its picker sets.
pub fn merge_batch(log: &EventLogData, batch: &[Arc<DisplayEvent>]) -> EventLogData {
    let mut merged = EventLogData {
        id: log.id,
        name: log.name.clone(),
        kind: log.kind,
        events: Vec::with_capacity(batch.len() + log.events.len()),
        event_ids: log.event_ids.clone(),
        provider_names: log.provider_names.clone(),
        task_names: log.task_names.clone(),
    };
    merged.events.extend(batch.iter().cloned());
    merged.events.extend(log.events.iter().cloned());

    for event in batch {
        widen_sets(
            &mut merged.event_ids,
            &mut merged.provider_names,
            &mut merged.task_names,
            event,
        );
    }
    merged
}

/// Add the picker values of `event` to the three sets. Names are cloned
/// only when new.
pub(crate) fn widen_sets(
    event_ids: &mut BTreeSet<u16>,
    provider_names: &mut BTreeSet<String>,
    task_names: &mut BTreeSet<String>,
    event: &DisplayEvent,
) {
    event_ids.insert(event.id);
    for (set, name) in [(provider_names, &event.provider_name), (task_names, &event.task_name)] {
        if !set.contains(name) {
            set.insert(name.clone());
        }
    }
}

/// Merge a newest-first pending buffer into the logs it belongs to.
///
/// Relative order within each log is preserved, so every log stays
/// newest-first. Events whose log is no longer open are discarded.
pub fn flush(table: &ActiveLogTable, buffer: &[Arc<DisplayEvent>]) -> ActiveLogTable {
    let mut groups: BTreeMap<&str, Vec<Arc<DisplayEvent>>> = BTreeMap::new();
    for event in buffer {
        groups
            .entry(event.owning_log.as_str())
            .or_default()
            .push(Arc::clone(event));
    }

    let mut merged = table.clone();
    for (name, batch) in groups {
        match table.by_name(name) {
            Some(log) => merged.insert(merge_batch(log, &batch)),
            None => tracing::debug!(log = name, dropped = batch.len(), "buffered events for closed log"),
        }
    }
    merged
}
