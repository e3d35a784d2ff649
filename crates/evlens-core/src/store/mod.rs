//! State store: immutable snapshots, the actions that change them, and the
//! pure reducers in between.
//!
//! The dispatcher in [`crate::dispatcher`] owns the current snapshot and is
//! the only caller of [`reduce`].

mod action;
mod reducer;
mod state;

pub use action::{Action, Effect};
pub use reducer::{reduce, Reduction};
pub use state::{ActiveLogTable, EventLogData, EventLogState, WatcherSlot, WatcherState};
