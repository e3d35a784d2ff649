//! Pure reducers: `(state, action) -> (state, effects)`.
//!
//! Nothing in this module touches the outside world. Cancelling scans and
//! toggling or disposing watchers are returned as [`Effect`]s for the
//! dispatcher to run after the new snapshot is published.

use super::action::{Action, Effect};
use super::state::{EventLogData, EventLogState, WatcherSlot, WatcherState};
use crate::distributor;
use crate::filter;
use crate::types::{DisplayEvent, LogId, LogKind};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of applying one action.
pub struct Reduction {
    pub state: Arc<EventLogState>,
    pub effects: Vec<Effect>,
}

impl Reduction {
    fn unchanged(state: &Arc<EventLogState>) -> Self {
        Self {
            state: Arc::clone(state),
            effects: Vec::new(),
        }
    }

    fn changed(mut state: EventLogState, effects: Vec<Effect>) -> Self {
        state.version += 1;
        Self {
            state: Arc::new(state),
            effects,
        }
    }

    /// Whether the action produced a new snapshot.
    pub fn is_change_of(&self, previous: &Arc<EventLogState>) -> bool {
        !Arc::ptr_eq(&self.state, previous)
    }
}

/// Apply `action` to `state`.
pub fn reduce(state: &Arc<EventLogState>, action: Action) -> Reduction {
    match action {
        Action::OpenLog { id, spec } => {
            let mut s = (**state).clone();
            let mut effects = Vec::new();

            if let Some(previous) = s.logs.by_name(&spec.name).map(|log| log.id) {
                remove_log(&mut s, previous, &mut effects);
                resume_if_room(&mut s, &mut effects);
            }

            let cancel = CancellationToken::new();
            s.logs.insert(EventLogData::new(id, &spec));
            s.visible.insert(id, Arc::from(Vec::new()));
            s.scans.insert(id, cancel.clone());
            s.last_error = None;
            effects.push(Effect::StartScan { id, spec, cancel });
            Reduction::changed(s, effects)
        }

        Action::CloseLog(id) => {
            if !state.logs.contains(id) && !state.scans.contains_key(&id) {
                return Reduction::unchanged(state);
            }
            let mut s = (**state).clone();
            let mut effects = Vec::new();
            remove_log(&mut s, id, &mut effects);
            resume_if_room(&mut s, &mut effects);
            Reduction::changed(s, effects)
        }

        Action::CloseAll => {
            if state.logs.is_empty() && state.scans.is_empty() && state.new_events.is_empty() {
                return Reduction::unchanged(state);
            }
            let mut s = (**state).clone();
            let mut effects = Vec::new();
            let ids: Vec<LogId> = s.logs.ids().into_iter().chain(s.scans.keys().copied()).collect();
            for id in ids {
                remove_log(&mut s, id, &mut effects);
            }
            s.new_events.clear();
            s.selected = None;
            Reduction::changed(s, effects)
        }

        Action::LoadEvents {
            id,
            events,
            event_ids,
            provider_names,
            task_names,
        } => {
            let Some(log) = state.logs.get(id) else {
                tracing::debug!(%id, "LoadEvents for a log that is no longer open");
                return Reduction::unchanged(state);
            };
            let mut merged = distributor::merge_batch(log, &events);
            merged.event_ids.extend(event_ids);
            merged.provider_names.extend(provider_names);
            merged.task_names.extend(task_names);

            let mut s = (**state).clone();
            s.logs.insert(merged);
            s.scans.remove(&id);
            s.visible = filter::apply(&s.logs, &s.filter);
            Reduction::changed(s, Vec::new())
        }

        Action::AddEvent(event) => add_event(state, event),

        Action::AddEventSuccess(table) => {
            let mut s = (**state).clone();
            s.logs = table;
            s.visible = filter::apply(&s.logs, &s.filter);
            Reduction::changed(s, Vec::new())
        }

        Action::AddEventBuffered { buffer, is_full } => {
            let mut s = (**state).clone();
            let mut effects = Vec::new();
            s.new_events = buffer;
            if is_full {
                disable_watchers(&mut s, &mut effects);
            }
            Reduction::changed(s, effects)
        }

        Action::LoadNewEvents => {
            let any_disabled = state.watchers.values().any(|w| w.state == WatcherState::Disabled);
            if state.new_events.is_empty() && !any_disabled {
                return Reduction::unchanged(state);
            }
            let mut s = (**state).clone();
            let mut effects = Vec::new();
            flush_pending(&mut s, &mut effects);
            Reduction::changed(s, effects)
        }

        Action::SetContinuouslyUpdate(enabled) => {
            if state.continuously_update == enabled
                && (!enabled || state.new_events.is_empty())
            {
                return Reduction::unchanged(state);
            }
            let mut s = (**state).clone();
            let mut effects = Vec::new();
            s.continuously_update = enabled;
            if enabled {
                flush_pending(&mut s, &mut effects);
            }
            Reduction::changed(s, effects)
        }

        Action::SetFilters(new_filter) => {
            if state.filter == new_filter {
                return Reduction::unchanged(state);
            }
            let mut s = (**state).clone();
            s.visible = filter::apply(&s.logs, &new_filter);
            s.filter = new_filter;
            Reduction::changed(s, Vec::new())
        }

        Action::SelectEvent(event) => {
            let mut s = (**state).clone();
            s.selected = event;
            Reduction::changed(s, Vec::new())
        }

        Action::AttachWatcher { id, handle, from } => {
            let live = state.logs.get(id).is_some_and(|log| log.kind == LogKind::Live);
            if !live {
                tracing::debug!(%id, "watcher arrived for a log that is gone; disposing");
                return Reduction {
                    state: Arc::clone(state),
                    effects: vec![Effect::DisposeWatcher(handle)],
                };
            }

            let mut s = (**state).clone();
            let mut effects = Vec::new();
            let mut generation = 1;
            if let Some(old) = s.watchers.remove(&id) {
                generation += old.generation;
                effects.push(Effect::DisposeWatcher(old.handle));
            }
            // Subscriptions start paused, so the first toggle always comes
            // from here.
            let mut slot = WatcherSlot {
                handle,
                state: WatcherState::Disabled,
                last_accepted: from,
                generation,
            };
            if !s.continuously_update && s.is_buffer_full() {
                effects.push(Effect::DisableWatcher {
                    handle: Arc::clone(&slot.handle),
                    resume_after: slot.last_accepted,
                    generation: slot.generation,
                });
            } else {
                slot.state = WatcherState::Resuming;
                effects.push(Effect::EnableWatcher {
                    id,
                    handle: Arc::clone(&slot.handle),
                    generation: slot.generation,
                });
            }
            s.watchers.insert(id, slot);
            Reduction::changed(s, effects)
        }

        Action::WatcherResumed { id, generation } => {
            let current = state
                .watchers
                .get(&id)
                .is_some_and(|slot| slot.state == WatcherState::Resuming && slot.generation == generation);
            if !current {
                return Reduction::unchanged(state);
            }
            let mut s = (**state).clone();
            if let Some(slot) = s.watchers.get_mut(&id) {
                slot.state = WatcherState::Enabled;
            }
            Reduction::changed(s, Vec::new())
        }

        Action::OpenFailed { id, reason } => {
            if !state.logs.contains(id) && !state.scans.contains_key(&id) {
                return Reduction::unchanged(state);
            }
            let mut s = (**state).clone();
            let mut effects = Vec::new();
            remove_log(&mut s, id, &mut effects);
            resume_if_room(&mut s, &mut effects);
            s.last_error = reason;
            Reduction::changed(s, effects)
        }
    }
}

/// Guard, de-duplicate and route one live event, then reduce the routed
/// follow-up action in the same step.
fn add_event(state: &Arc<EventLogState>, event: Arc<DisplayEvent>) -> Reduction {
    let Some(log) = state.logs.by_name(&event.owning_log) else {
        return Reduction::unchanged(state);
    };
    let log_id = log.id;

    match state.watchers.get(&log_id) {
        Some(slot) => {
            // A disabled watcher rewinds to `last_accepted`, so anything it
            // delivered before confirming the resume comes around again.
            if slot.state != WatcherState::Enabled {
                return Reduction::unchanged(state);
            }
            if let (Some(position), Some(last)) = (event.checkpoint, slot.last_accepted) {
                if position <= last {
                    return Reduction::unchanged(state);
                }
            }
        }
        // Live logs take events only from their own attached watcher; its
        // subscription starts after the scan and delivers them then.
        None if log.kind == LogKind::Live => {
            tracing::trace!(log = %log.name, "live event before watcher attached; refused");
            return Reduction::unchanged(state);
        }
        None => {}
    }
    if !state.continuously_update && state.is_buffer_full() {
        return Reduction::unchanged(state);
    }

    let mut s = (**state).clone();
    if let (Some(slot), Some(position)) = (s.watchers.get_mut(&log_id), event.checkpoint) {
        slot.last_accepted = Some(position);
    }
    let s = Arc::new(s);

    match distributor::route(&s, event) {
        Some(follow_up) => reduce(&s, follow_up),
        None => Reduction::unchanged(state),
    }
}

/// Drop one log and everything that hangs off it.
fn remove_log(s: &mut EventLogState, id: LogId, effects: &mut Vec<Effect>) {
    if let Some(cancel) = s.scans.remove(&id) {
        effects.push(Effect::CancelScan(cancel));
    }
    if let Some(slot) = s.watchers.remove(&id) {
        effects.push(Effect::DisposeWatcher(slot.handle));
    }
    s.visible.remove(&id);
    if let Some(log) = s.logs.remove(id) {
        s.new_events.retain(|e| e.owning_log != log.name);
        if s.selected.as_ref().is_some_and(|e| e.owning_log == log.name) {
            s.selected = None;
        }
        tracing::debug!(%id, log = %log.name, "log removed");
    }
}

/// Re-enable the surviving watchers if a removal made room in the buffer.
fn resume_if_room(s: &mut EventLogState, effects: &mut Vec<Effect>) {
    if !s.is_buffer_full() {
        enable_watchers(s, effects);
    }
}

fn disable_watchers(s: &mut EventLogState, effects: &mut Vec<Effect>) {
    for slot in s.watchers.values_mut() {
        if slot.state != WatcherState::Disabled {
            slot.state = WatcherState::Disabled;
            slot.generation += 1;
            effects.push(Effect::DisableWatcher {
                handle: Arc::clone(&slot.handle),
                resume_after: slot.last_accepted,
                generation: slot.generation,
            });
        }
    }
}

fn enable_watchers(s: &mut EventLogState, effects: &mut Vec<Effect>) {
    for (id, slot) in s.watchers.iter_mut() {
        if slot.state == WatcherState::Disabled {
            slot.state = WatcherState::Resuming;
            slot.generation += 1;
            effects.push(Effect::EnableWatcher {
                id: *id,
                handle: Arc::clone(&slot.handle),
                generation: slot.generation,
            });
        }
    }
}

fn flush_pending(s: &mut EventLogState, effects: &mut Vec<Effect>) {
    if !s.new_events.is_empty() {
        s.logs = distributor::flush(&s.logs, &s.new_events);
        s.new_events.clear();
        s.visible = filter::apply(&s.logs, &s.filter);
    }
    enable_watchers(s, effects);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
