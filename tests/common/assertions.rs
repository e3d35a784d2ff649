//! Domain-specific assertion macros for evlens harnesses.
//!
//! These wrap `pretty_assertions` and add context-rich failure messages that
//! make it clear *which* pipeline guarantee was violated.

use evlens_core::{DisplayEvent, EventLogState, LogId};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Ordering assertions
// ---------------------------------------------------------------------------

/// Assert that a slice of events is strictly newest-first by record id.
///
/// ```rust
/// assert_newest_first!(log.events);
/// ```
#[macro_export]
macro_rules! assert_newest_first {
    ($events:expr) => {{
        let events: &[std::sync::Arc<evlens_core::DisplayEvent>] = &$events;
        for pair in events.windows(2) {
            let (newer, older) = (pair[0].record_id, pair[1].record_id);
            if newer <= older {
                panic!(
                    "assert_newest_first! failed: {:?} is listed before {:?}\n  {} events checked",
                    newer,
                    older,
                    events.len()
                );
            }
        }
    }};
}

/// Assert the record ids of a slice of events, in order.
#[macro_export]
macro_rules! assert_record_ids {
    ($events:expr, $expected:expr) => {{
        let events: &[std::sync::Arc<evlens_core::DisplayEvent>] = &$events;
        let actual: Vec<u64> = events.iter().filter_map(|e| e.record_id).collect();
        let expected: Vec<u64> = $expected.into_iter().collect();
        pretty_assertions::assert_eq!(actual, expected, "record ids differ");
    }};
}

// ---------------------------------------------------------------------------
// State helpers
// ---------------------------------------------------------------------------

/// Every event that is either in a log or waiting in the pending buffer.
pub fn all_known_events(state: &EventLogState) -> Vec<Arc<DisplayEvent>> {
    let mut all: Vec<Arc<DisplayEvent>> = state
        .logs
        .iter()
        .flat_map(|(_, log)| log.events.iter().cloned())
        .collect();
    all.extend(state.new_events.iter().cloned());
    all
}

/// Assert that nothing in the snapshot still refers to `id`.
pub fn assert_log_gone(state: &EventLogState, id: LogId, name: &str) {
    assert!(!state.logs.contains(id), "{id} still in the log table");
    assert!(!state.visible.contains_key(&id), "{id} still has a visible slice");
    assert!(!state.watchers.contains_key(&id), "{id} still has a watcher");
    assert!(!state.scans.contains_key(&id), "{id} still has a running scan");
    assert!(
        state.new_events.iter().all(|e| e.owning_log != name),
        "pending buffer still holds events of {name}"
    );
    assert!(
        state.selected.as_ref().is_none_or(|e| e.owning_log != name),
        "selection still points into {name}"
    );
}
