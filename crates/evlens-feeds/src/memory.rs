//! In-memory event channels.
//!
//! [`MemoryChannel`] keeps named logs as vectors of records that can be
//! appended to at runtime. It implements every collaborator trait the
//! pipeline needs, which makes it the backing store of the integration
//! tests and the benchmarks. The checkpoint of a record is its index in its
//! log.

use crate::tail::{Rewind, TailControl, Wake};
use evlens_core::error::SourceError;
use evlens_core::resolver::ProviderMetadata;
use evlens_core::source::{
    LiveSubscriber, LiveSubscription, MetadataSource, RecordCallback, RecordIter, RecordSource,
};
use evlens_core::{Checkpoint, LogSpecifier, RawRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

const IDLE_WAIT: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Log {
    records: Arc<Vec<RawRecord>>,
    subscribers: Vec<Weak<TailControl>>,
}

#[derive(Default)]
struct Inner {
    logs: Mutex<HashMap<String, Log>>,
    providers: RwLock<HashMap<String, ProviderMetadata>>,
}

/// A set of named, appendable in-memory logs. Cheap to clone; clones share
/// the same logs.
#[derive(Clone, Default)]
pub struct MemoryChannel {
    inner: Arc<Inner>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn logs(&self) -> MutexGuard<'_, HashMap<String, Log>> {
        self.inner.logs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create `log` if it does not exist yet.
    pub fn create(&self, log: &str) {
        self.logs().entry(log.to_string()).or_default();
    }

    /// Append records to `log`, creating it if needed, and wake its live
    /// subscribers. Checkpoints are assigned here.
    pub fn append(&self, log: &str, records: impl IntoIterator<Item = RawRecord>) {
        let mut logs = self.logs();
        let entry = logs.entry(log.to_string()).or_default();
        let records_mut = Arc::make_mut(&mut entry.records);
        for mut record in records {
            record.checkpoint = Some(Checkpoint::from_raw(records_mut.len() as u64));
            if record.log_name.is_empty() {
                record.log_name = log.to_string();
            }
            records_mut.push(record);
        }
        entry.subscribers.retain(|sub| match sub.upgrade() {
            Some(control) => {
                control.poke();
                true
            }
            None => false,
        });
    }

    pub fn len(&self, log: &str) -> usize {
        self.logs().get(log).map_or(0, |l| l.records.len())
    }

    /// Register provider metadata served through [`MetadataSource`].
    pub fn add_provider(&self, provider: ProviderMetadata) {
        self.inner
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider.name.clone(), provider);
    }

    fn snapshot(&self, log: &str) -> Result<Arc<Vec<RawRecord>>, SourceError> {
        self.logs()
            .get(log)
            .map(|l| Arc::clone(&l.records))
            .ok_or_else(|| SourceError::NotFound(log.to_string()))
    }
}

impl RecordSource for MemoryChannel {
    fn scan(&self, spec: &LogSpecifier) -> Result<RecordIter, SourceError> {
        self.seek(spec, Checkpoint::from_raw(0))
    }

    fn seek(&self, spec: &LogSpecifier, checkpoint: Checkpoint) -> Result<RecordIter, SourceError> {
        let records = self.snapshot(&spec.name)?;
        let start = checkpoint.into_raw() as usize;
        Ok(Box::new(
            (start..records.len()).map(move |i| Ok(records[i].clone())),
        ))
    }
}

impl MetadataSource for MemoryChannel {
    fn lookup(&self, provider_name: &str) -> Option<ProviderMetadata> {
        self.inner
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider_name)
            .cloned()
    }
}

struct MemorySubscription {
    control: Arc<TailControl>,
}

impl LiveSubscription for MemorySubscription {
    fn set_enabled(&self, enabled: bool) {
        self.control.set_enabled(enabled);
    }

    fn is_enabled(&self) -> bool {
        self.control.is_enabled()
    }

    fn rewind(&self, after: Option<Checkpoint>) {
        self.control.rewind(after);
    }

    fn dispose(&self) {
        self.control.dispose();
    }
}

impl LiveSubscriber for MemoryChannel {
    fn subscribe(
        &self,
        spec: &LogSpecifier,
        from: Option<Checkpoint>,
        on_record: RecordCallback,
    ) -> Result<Box<dyn LiveSubscription>, SourceError> {
        let control = Arc::new(TailControl::new());
        let start = {
            let mut logs = self.logs();
            let log = logs
                .get_mut(&spec.name)
                .ok_or_else(|| SourceError::NotFound(spec.name.clone()))?;
            log.subscribers.push(Arc::downgrade(&control));
            match from {
                Some(cp) => cp.into_raw() as usize + 1,
                None => log.records.len(),
            }
        };

        let channel = self.clone();
        let name = spec.name.clone();
        let thread = {
            let control = Arc::clone(&control);
            std::thread::Builder::new()
                .name(format!("evlens-memory-{}", spec.name))
                .spawn(move || {
                    let mut next = start;
                    loop {
                        match control.wait(IDLE_WAIT) {
                            Wake::Disposed => break,
                            Wake::Paused => continue,
                            Wake::Ready => {}
                        }
                        match control.take_rewind() {
                            Some(Rewind::Start) => next = start,
                            Some(Rewind::After(cp)) => next = cp.into_raw() as usize + 1,
                            None => {}
                        }
                        let Ok(records) = channel.snapshot(&name) else { break };
                        while next < records.len() {
                            let record = records[next].clone();
                            if !control.deliver(|| on_record(record)) {
                                break;
                            }
                            next += 1;
                        }
                    }
                })?
        };
        control.attach_thread(thread);

        Ok(Box::new(MemorySubscription { control }))
    }
}
