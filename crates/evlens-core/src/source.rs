//! Collaborator contracts consumed by the pipeline.
//!
//! The pipeline does not know how records are read from the operating
//! system or from disk. It drives whatever implements these traits; the
//! `evlens-feeds` crate ships file-backed and in-memory implementations.

use crate::error::SourceError;
use crate::resolver::ProviderMetadata;
use crate::types::{Checkpoint, LogSpecifier, RawRecord};

/// Sequential iterator over raw records. Every item carries its checkpoint.
pub type RecordIter = Box<dyn Iterator<Item = Result<RawRecord, SourceError>> + Send>;

/// Something that can enumerate a log from the start, or from a checkpoint.
///
/// Each call must return an independent handle: the bulk scanner holds one
/// sequential handle and one extra handle per worker, all concurrently.
pub trait RecordSource: Send + Sync {
    fn scan(&self, spec: &LogSpecifier) -> Result<RecordIter, SourceError>;

    /// Iterate starting *at* the record identified by `checkpoint`.
    fn seek(&self, spec: &LogSpecifier, checkpoint: Checkpoint) -> Result<RecordIter, SourceError>;
}

/// Callback invoked once per newly arrived record on the source's own
/// delivery thread.
pub type RecordCallback = Box<dyn Fn(RawRecord) + Send + Sync>;

/// Live tail capability of a source.
pub trait LiveSubscriber: Send + Sync {
    /// Prepare to deliver records that arrive after `from` (or after the
    /// current end when `from` is `None`). The subscription starts paused;
    /// nothing is delivered before the first `set_enabled(true)`.
    fn subscribe(
        &self,
        spec: &LogSpecifier,
        from: Option<Checkpoint>,
        on_record: RecordCallback,
    ) -> Result<Box<dyn LiveSubscription>, SourceError>;
}

/// A running live tail. Disabling pauses delivery; re-enabling resumes from
/// the last delivered record, or from the position set by [`rewind`].
/// `set_enabled` may block until the delivery loop acknowledges, so it must
/// never be called from inside the callback.
///
/// [`rewind`]: LiveSubscription::rewind
pub trait LiveSubscription: Send + Sync {
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// Make the next delivery start right after `after`, or where the
    /// subscription started when `None`. Records past that point that were
    /// already delivered will be delivered again.
    fn rewind(&self, _after: Option<Checkpoint>) {}
    /// Stop delivery for good. Called exactly once by [`crate::watcher::WatcherHandle`].
    fn dispose(&self);
}

/// Provider metadata lookup, by provider name.
pub trait MetadataSource: Send + Sync {
    fn lookup(&self, provider_name: &str) -> Option<ProviderMetadata>;
}

/// Identifies one long-running activity reported to a [`StatusSink`]
/// (one scan, one tail session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActivityId(pub u64);

impl ActivityId {
    pub fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Write-only status side channel. The pipeline emits; it never reads back.
pub trait StatusSink: Send + Sync {
    fn progress(&self, activity: ActivityId, resolved: usize);
    fn resolver_status(&self, activity: ActivityId, message: String);
    fn clear(&self, activity: ActivityId);
    fn failure(&self, message: String);
}

/// A sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn progress(&self, _: ActivityId, _: usize) {}
    fn resolver_status(&self, _: ActivityId, _: String) {}
    fn clear(&self, _: ActivityId) {}
    fn failure(&self, _: String) {}
}
