//! evlens-core — event log viewer core library.
//!
//! This crate turns raw event records into display-ready events and keeps
//! the state of every open log. It knows nothing about where records come
//! from; record sources, live subscriptions, provider metadata and status
//! reporting are traits in [`source`], implemented in `evlens-feeds`.
//!
//! # Architecture
//!
//! ```text
//!            ┌──► Scanner ──(LoadEvents)──────┐
//! OpenLog ───┤                                ▼
//!            └──► LiveWatcher ──(AddEvent)──► Dispatcher ──► reduce ──► watch::Receiver
//!                                               ▲   │
//!                                               │   └──► effects (cancel, enable, disable, dispose)
//!                                    distributor / filter
//! ```
//!
//! The dispatcher is the only writer of [`store::EventLogState`]. Every
//! change produces a new immutable snapshot; readers only ever see whole
//! snapshots.

pub mod config;
pub mod dispatcher;
pub mod distributor;
pub mod error;
pub mod filter;
pub mod resolver;
pub mod scanner;
pub mod source;
pub mod store;
pub mod types;
pub mod watcher;

pub use dispatcher::{Collaborators, DispatchHandle};
pub use error::{PipelineError, SourceError};
pub use filter::Filter;
pub use store::{Action, EventLogState};
pub use types::{Checkpoint, DisplayEvent, LogId, LogKind, LogSpecifier, RawRecord, Severity};
