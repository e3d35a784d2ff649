//! Bulk scanner — reads and resolves the whole history of a log.
//!
//! One blocking producer walks the log oldest-first and records the
//! checkpoint at the start of every batch of `batch_size` records. A pool of
//! blocking workers picks those batches up, seeks to them with their own
//! record handle, and resolves them with their own resolver. Batches are
//! reassembled by ordinal, so the output order does not depend on which
//! worker finished first.
//!
//! ```text
//!  producer ──(ordinal, checkpoint)──► queue ──► worker 0..N ──► batches
//!                                                     │
//!                                         resolved ───┴──► progress ticker ──► StatusSink
//! ```
//!
//! The queue is a multi-consumer `crossbeam` channel; every worker holds
//! its own receiver. Cancellation is cooperative: the producer checks the
//! token once per record, workers once per record and between polls of the
//! queue.

use crate::config::ScannerConfig;
use crate::distributor::widen_sets;
use crate::error::PipelineError;
use crate::resolver::{ResolverFactory, StatusTag};
use crate::source::{ActivityId, RecordSource, StatusSink};
use crate::types::{Checkpoint, DisplayEvent, LogSpecifier};
use std::collections::BTreeSet;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const QUEUE_POLL: Duration = Duration::from_millis(25);

/// Everything a completed scan hands to the store.
#[derive(Debug, Default)]
pub struct ScanOutput {
    /// Newest-first.
    pub events: Vec<Arc<DisplayEvent>>,
    pub event_ids: BTreeSet<u16>,
    pub provider_names: BTreeSet<String>,
    pub task_names: BTreeSet<String>,
    /// Position of the newest record seen, where a live tail picks up.
    pub checkpoint: Option<Checkpoint>,
}

type Batch = (usize, Vec<Arc<DisplayEvent>>);

/// Runs bulk scans against one record source.
#[derive(Clone)]
pub struct Scanner {
    source: Arc<dyn RecordSource>,
    resolvers: ResolverFactory,
    status: Arc<dyn StatusSink>,
    config: ScannerConfig,
}

impl Scanner {
    pub fn new(
        source: Arc<dyn RecordSource>,
        resolvers: ResolverFactory,
        status: Arc<dyn StatusSink>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            source,
            resolvers,
            status,
            config,
        }
    }

    /// Scan `spec` to its current end.
    ///
    /// Returns [`PipelineError::Cancelled`] if `cancel` fires before the
    /// scan completes; no partial output is produced in that case.
    pub async fn run(
        &self,
        spec: &LogSpecifier,
        cancel: CancellationToken,
    ) -> Result<ScanOutput, PipelineError> {
        let activity = ActivityId::next();
        let resolved = Arc::new(AtomicUsize::new(0));
        // Local token: a failing worker stops its siblings without looking
        // like a user cancellation.
        let abort = cancel.child_token();

        tracing::info!(
            log = %spec.name,
            workers = self.config.workers,
            batch_size = self.config.batch_size,
            resolver = ?self.resolvers.kind(),
            "scan started"
        );

        let (ticker, ticking) = self.spawn_ticker(activity, Arc::clone(&resolved));

        let (tx, queue) = channel::unbounded::<(usize, Checkpoint)>();

        let producer = {
            let source = Arc::clone(&self.source);
            let spec = spec.clone();
            let abort = abort.clone();
            let batch_size = self.config.batch_size;
            tokio::task::spawn_blocking(move || {
                let result = produce(source.as_ref(), &spec, batch_size, &tx, &abort);
                if result.is_err() {
                    abort.cancel();
                }
                result
            })
        };

        let mut workers = Vec::with_capacity(self.config.workers);
        for worker in 0..self.config.workers {
            let source = Arc::clone(&self.source);
            let spec = spec.clone();
            let queue = queue.clone();
            let abort = abort.clone();
            let resolved = Arc::clone(&resolved);
            let mut resolver = self.resolvers.create(Some(StatusTag {
                sink: Arc::clone(&self.status),
                activity,
            }));
            let batch_size = self.config.batch_size;
            workers.push(tokio::task::spawn_blocking(move || {
                let result = consume(
                    source.as_ref(),
                    &spec,
                    batch_size,
                    &queue,
                    resolver.as_mut(),
                    &resolved,
                    &abort,
                );
                if let Err(e) = &result {
                    if !e.is_cancelled() {
                        tracing::warn!(worker, error = %e, "scan worker failed");
                        abort.cancel();
                    }
                }
                result
            }));
        }
        // Only workers hold the queue from here on.
        drop(queue);

        let mut first_error: Option<PipelineError> = None;
        let mut note = |err: PipelineError| {
            if first_error.as_ref().is_none_or(|e| e.is_cancelled()) {
                first_error = Some(err);
            }
        };

        let terminal = match producer.await {
            Ok(Ok(terminal)) => terminal,
            Ok(Err(e)) => {
                note(e);
                None
            }
            Err(join) => {
                note(PipelineError::Unexpected(join.to_string()));
                None
            }
        };

        let mut batches: Vec<Batch> = Vec::new();
        for worker in workers {
            match worker.await {
                Ok(Ok(mut done)) => batches.append(&mut done),
                Ok(Err(e)) => note(e),
                Err(join) => note(PipelineError::Unexpected(join.to_string())),
            }
        }

        ticker.cancel();
        let _ = ticking.await;
        self.status.clear(activity);

        if cancel.is_cancelled() {
            tracing::debug!(log = %spec.name, "scan cancelled");
            return Err(PipelineError::Cancelled);
        }
        if let Some(err) = first_error {
            tracing::warn!(log = %spec.name, error = %err, "scan failed");
            return Err(err);
        }

        let output = assemble(batches, terminal);
        tracing::info!(
            log = %spec.name,
            events = output.events.len(),
            checkpoint = ?output.checkpoint,
            "scan complete"
        );
        Ok(output)
    }

    /// Report the resolved count once per interval until the returned token
    /// is cancelled.
    fn spawn_ticker(
        &self,
        activity: ActivityId,
        resolved: Arc<AtomicUsize>,
    ) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let stop = CancellationToken::new();
        let guard = stop.clone();
        let status = Arc::clone(&self.status);
        let period = self.config.progress_interval();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = guard.cancelled() => break,
                    _ = interval.tick() => status.progress(activity, resolved.load(Ordering::Relaxed)),
                }
            }
        });
        (stop, task)
    }
}

/// Walk the log once, queueing the start of every batch. Returns the
/// checkpoint of the last readable record.
fn produce(
    source: &dyn RecordSource,
    spec: &LogSpecifier,
    batch_size: usize,
    queue: &Sender<(usize, Checkpoint)>,
    abort: &CancellationToken,
) -> Result<Option<Checkpoint>, PipelineError> {
    let records = source.scan(spec)?;
    let mut count = 0usize;
    let mut last = None;

    for item in records {
        if abort.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let record = match item {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(log = %spec.name, error = %e, "skipping unreadable record");
                continue;
            }
        };
        let Some(checkpoint) = record.checkpoint else {
            return Err(PipelineError::InvalidData(format!(
                "record {:?} of {} has no checkpoint",
                record.record_id, spec.name
            )));
        };
        if count % batch_size == 0 && queue.send((count / batch_size, checkpoint)).is_err() {
            // Every worker is gone; whoever stopped them reports why.
            break;
        }
        count += 1;
        last = Some(checkpoint);
    }

    tracing::debug!(log = %spec.name, records = count, batches = count.div_ceil(batch_size), "log walked");
    Ok(last)
}

/// Resolve queued batches until the queue is closed and drained.
fn consume(
    source: &dyn RecordSource,
    spec: &LogSpecifier,
    batch_size: usize,
    queue: &Receiver<(usize, Checkpoint)>,
    resolver: &mut dyn crate::resolver::EventResolver,
    resolved: &AtomicUsize,
    abort: &CancellationToken,
) -> Result<Vec<Batch>, PipelineError> {
    let mut done = Vec::new();

    loop {
        if abort.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let (ordinal, start) = match queue.recv_timeout(QUEUE_POLL) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(done),
        };

        let mut events = Vec::with_capacity(batch_size);
        for item in source.seek(spec, start)? {
            if abort.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            match item {
                Ok(raw) => {
                    events.push(Arc::new(resolver.resolve(&raw, &spec.name)));
                    resolved.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => tracing::warn!(log = %spec.name, error = %e, "skipping unreadable record"),
            }
            if events.len() == batch_size {
                break;
            }
        }
        done.push((ordinal, events));
    }
}

/// Reassemble batches oldest-first, then flip to newest-first.
fn assemble(mut batches: Vec<Batch>, checkpoint: Option<Checkpoint>) -> ScanOutput {
    batches.sort_unstable_by_key(|(ordinal, _)| *ordinal);
    let mut events: Vec<Arc<DisplayEvent>> = batches.into_iter().flat_map(|(_, b)| b).collect();
    events.reverse();

    let mut output = ScanOutput {
        checkpoint,
        ..ScanOutput::default()
    };
    for event in &events {
        widen_sets(
            &mut output.event_ids,
            &mut output.provider_names,
            &mut output.task_names,
            event,
        );
    }
    output.events = events;
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::resolver::{ProviderDatabase, ProviderMetadata};
    use crate::source::{NullStatusSink, RecordIter};
    use crate::types::RawRecord;
    use pretty_assertions::assert_eq;

    /// Records 0..n, checkpoint == index. `broken` indexes yield errors.
    struct VecSource {
        records: Arc<Vec<RawRecord>>,
        broken: BTreeSet<usize>,
    }

    impl VecSource {
        fn new(n: usize) -> Self {
            let records = (0..n)
                .map(|i| RawRecord {
                    record_id: Some(i as u64),
                    event_id: (i % 7) as u16,
                    version: 0,
                    level: 4,
                    task: 0,
                    opcode: 0,
                    keywords: 0,
                    provider_name: format!("Provider{}", i % 3),
                    log_name: "Test".into(),
                    machine: "host".into(),
                    timestamp: chrono::Utc::now(),
                    activity_id: None,
                    properties: vec![i.to_string()],
                    checkpoint: Some(Checkpoint::from_raw(i as u64)),
                })
                .collect();
            Self {
                records: Arc::new(records),
                broken: BTreeSet::new(),
            }
        }

        fn iter_from(&self, start: usize) -> RecordIter {
            let records = Arc::clone(&self.records);
            let broken = self.broken.clone();
            Box::new((start..records.len()).map(move |i| {
                if broken.contains(&i) {
                    Err(SourceError::InvalidData(format!("record {i}")))
                } else {
                    Ok(records[i].clone())
                }
            }))
        }
    }

    impl RecordSource for VecSource {
        fn scan(&self, _: &LogSpecifier) -> Result<RecordIter, SourceError> {
            Ok(self.iter_from(0))
        }
        fn seek(&self, _: &LogSpecifier, checkpoint: Checkpoint) -> Result<RecordIter, SourceError> {
            Ok(self.iter_from(checkpoint.into_raw() as usize))
        }
    }

    struct MissingSource;

    impl RecordSource for MissingSource {
        fn scan(&self, spec: &LogSpecifier) -> Result<RecordIter, SourceError> {
            Err(SourceError::NotFound(spec.name.clone()))
        }
        fn seek(&self, spec: &LogSpecifier, _: Checkpoint) -> Result<RecordIter, SourceError> {
            Err(SourceError::NotFound(spec.name.clone()))
        }
    }

    fn resolvers() -> ResolverFactory {
        let provider = ProviderMetadata {
            name: "Provider0".into(),
            ..ProviderMetadata::default()
        };
        ResolverFactory::Database(Arc::new(ProviderDatabase::from_providers([provider])))
    }

    fn scanner(source: impl RecordSource + 'static, workers: usize, batch_size: usize) -> Scanner {
        Scanner::new(
            Arc::new(source),
            resolvers(),
            Arc::new(NullStatusSink),
            ScannerConfig {
                batch_size,
                workers,
                progress_interval_ms: 10,
            },
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn scan_is_complete_and_newest_first() {
        let s = scanner(VecSource::new(10_000), 8, 200);
        let out = s.run(&LogSpecifier::live("Test"), CancellationToken::new()).await.unwrap();

        assert_eq!(out.events.len(), 10_000);
        let ids: Vec<u64> = out.events.iter().map(|e| e.record_id.unwrap()).collect();
        let expected: Vec<u64> = (0..10_000).rev().collect();
        assert_eq!(ids, expected);
        assert_eq!(out.event_ids, (0..7).collect::<BTreeSet<u16>>());
        assert_eq!(out.provider_names.len(), 3);
        assert_eq!(out.checkpoint, Some(Checkpoint::from_raw(9_999)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn every_queued_batch_is_taken_once() {
        // More workers than there is work at any moment, all pulling from
        // the one queue.
        let s = scanner(VecSource::new(500), 16, 1);
        let out = s.run(&LogSpecifier::file("t"), CancellationToken::new()).await.unwrap();
        let ids: Vec<u64> = out.events.iter().map(|e| e.record_id.unwrap()).collect();
        assert_eq!(ids, (0..500).rev().collect::<Vec<u64>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn partial_last_batch_and_single_worker() {
        let s = scanner(VecSource::new(7), 1, 3);
        let out = s.run(&LogSpecifier::file("t"), CancellationToken::new()).await.unwrap();
        let ids: Vec<u64> = out.events.iter().map(|e| e.record_id.unwrap()).collect();
        assert_eq!(ids, vec![6, 5, 4, 3, 2, 1, 0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_log_yields_empty_output() {
        let s = scanner(VecSource::new(0), 4, 10);
        let out = s.run(&LogSpecifier::file("t"), CancellationToken::new()).await.unwrap();
        assert!(out.events.is_empty());
        assert!(out.checkpoint.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unreadable_records_are_skipped() {
        let mut source = VecSource::new(20);
        source.broken = BTreeSet::from([0, 5, 19]);
        let s = scanner(source, 3, 4);
        let out = s.run(&LogSpecifier::file("t"), CancellationToken::new()).await.unwrap();
        assert_eq!(out.events.len(), 17);
        assert!(out.events.iter().all(|e| ![0, 5, 19].contains(&e.record_id.unwrap())));
        assert_eq!(out.checkpoint, Some(Checkpoint::from_raw(18)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn open_failure_is_reported() {
        let s = scanner(MissingSource, 2, 10);
        let err = s.run(&LogSpecifier::file("nope"), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(name) if name == "nope"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_stops_the_scan() {
        let cancel = CancellationToken::new();
        let s = scanner(VecSource::new(1_000_000), 4, 200);
        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { s.run(&LogSpecifier::live("Test"), cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let err = run.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }
}
