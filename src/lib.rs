//! evlens — structured system event log viewer.
//!
//! The binary is a headless front end over the `evlens-core` pipeline. This
//! crate exposes the runner and the output formats so that integration
//! tests can drive a full open/scan/tail cycle without a terminal.
//!
//! # Architecture
//!
//! ```text
//! evlens-feeds (sources) ──► evlens-core (scanner, watcher, store) ──► runner ──► stdout
//! ```

pub mod render;
pub mod runner;

pub use render::OutputFormat;
pub use runner::{run, Feeds, RunOptions};
