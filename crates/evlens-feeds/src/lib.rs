//! evlens-feeds — record sources, provider catalogs and status sinks for
//! evlens.
//!
//! Every type here implements one or more of the collaborator traits in
//! [`evlens_core::source`]:
//!
//! | Type | Implements |
//! |------|------------|
//! | [`JsonlSource`] | `RecordSource`, `LiveSubscriber` |
//! | [`MemoryChannel`] | `RecordSource`, `LiveSubscriber`, `MetadataSource` |
//! | [`ProviderDirectory`] | `MetadataSource` |
//! | [`TracingStatusSink`], [`ChannelStatusSink`] | `StatusSink` |

pub mod catalog;
pub mod jsonl;
pub mod memory;
pub mod status;
mod tail;

pub use catalog::{load_database, ProviderDirectory};
pub use jsonl::JsonlSource;
pub use memory::MemoryChannel;
pub use status::{ChannelStatusSink, StatusEvent, TracingStatusSink};
