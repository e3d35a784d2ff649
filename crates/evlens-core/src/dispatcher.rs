//! Dispatcher — the single writer of [`EventLogState`].
//!
//! [`spawn`] starts one tokio task that receives [`Action`]s over an
//! unbounded channel, reduces them one at a time, publishes every changed
//! snapshot over a `watch` channel and then runs the reduction's effects.
//! Any number of [`DispatchHandle`]s may submit concurrently; the order the
//! task receives them in is the order they are applied in.
//!
//! The task stops once every external handle has been dropped. It then
//! closes all logs, so running scans are cancelled and watchers disposed.

use crate::config::ScannerConfig;
use crate::resolver::{ResolverFactory, StatusTag};
use crate::scanner::Scanner;
use crate::source::{ActivityId, LiveSubscriber, RecordSource, StatusSink};
use crate::store::{reduce, Action, Effect, EventLogState};
use crate::types::{LogId, LogKind, LogSpecifier};
use crate::watcher::LiveWatcher;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
#[error("dispatcher has shut down")]
pub struct DispatchClosed;

#[derive(Clone)]
enum Sender {
    Strong(mpsc::UnboundedSender<Action>),
    /// Used by the pipeline's own tasks so they do not keep the dispatcher
    /// alive on their own.
    Weak(mpsc::WeakUnboundedSender<Action>),
}

/// Submits actions to the dispatcher. Never blocks.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: Sender,
}

impl DispatchHandle {
    pub fn send(&self, action: Action) -> Result<(), DispatchClosed> {
        match &self.tx {
            Sender::Strong(tx) => tx.send(action).map_err(|_| DispatchClosed),
            Sender::Weak(tx) => tx
                .upgrade()
                .ok_or(DispatchClosed)?
                .send(action)
                .map_err(|_| DispatchClosed),
        }
    }

    fn downgrade(&self) -> DispatchHandle {
        let tx = match &self.tx {
            Sender::Strong(tx) => Sender::Weak(tx.downgrade()),
            Sender::Weak(tx) => Sender::Weak(tx.clone()),
        };
        DispatchHandle { tx }
    }
}

impl std::fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.tx {
            Sender::Strong(_) => "strong",
            Sender::Weak(_) => "weak",
        };
        f.debug_struct("DispatchHandle").field("tx", &kind).finish()
    }
}

/// Everything outside the store the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn RecordSource>,
    /// `None` when the source cannot tail; live logs are then scanned only.
    pub live: Option<Arc<dyn LiveSubscriber>>,
    pub resolvers: ResolverFactory,
    pub status: Arc<dyn StatusSink>,
    pub scanner: ScannerConfig,
}

/// Start the dispatcher with `initial` as the first snapshot.
///
/// Returns the submission handle, a receiver that always holds the latest
/// snapshot, and the task's join handle (resolves after shutdown).
pub fn spawn(
    initial: EventLogState,
    collaborators: Collaborators,
) -> (DispatchHandle, watch::Receiver<Arc<EventLogState>>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = DispatchHandle {
        tx: Sender::Strong(tx),
    };
    let state = Arc::new(initial);
    let (snapshots, subscriber) = watch::channel(Arc::clone(&state));

    let dispatcher = Dispatcher {
        state,
        snapshots,
        internal: handle.downgrade(),
        collaborators: Arc::new(collaborators),
        watcher_ops: None,
    };
    let task = tokio::spawn(dispatcher.run(rx));
    (handle, subscriber, task)
}

struct Dispatcher {
    state: Arc<EventLogState>,
    snapshots: watch::Sender<Arc<EventLogState>>,
    internal: DispatchHandle,
    collaborators: Arc<Collaborators>,
    /// Last queued blocking watcher operation. Each one waits for the one
    /// before it, so sources see toggles in the order they were decided.
    watcher_ops: Option<JoinHandle<()>>,
}

impl Dispatcher {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Action>) {
        tracing::debug!("dispatcher started");
        while let Some(action) = rx.recv().await {
            self.apply(action);
        }

        tracing::debug!("dispatcher shutting down");
        self.apply(Action::CloseAll);
        if let Some(last) = self.watcher_ops.take() {
            let _ = last.await;
        }
    }

    fn apply(&mut self, action: Action) {
        let name = action.name();
        let reduction = reduce(&self.state, action);

        if reduction.is_change_of(&self.state) {
            self.state = reduction.state;
            self.snapshots.send_replace(Arc::clone(&self.state));
            tracing::trace!(
                action = name,
                version = self.state.version,
                pending = self.state.new_events.len(),
                "state published"
            );
        } else {
            tracing::trace!(action = name, "no change");
        }

        for effect in reduction.effects {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::StartScan { id, spec, cancel } => {
                tokio::spawn(run_open(
                    Arc::clone(&self.collaborators),
                    self.internal.clone(),
                    id,
                    spec,
                    cancel,
                ));
            }
            Effect::CancelScan(token) => token.cancel(),
            Effect::DisposeWatcher(handle) => self.queue_watcher_op(move || handle.dispose()),
            Effect::DisableWatcher {
                handle,
                resume_after,
                generation,
            } => self.queue_watcher_op(move || handle.set_enabled(false, resume_after, generation)),
            Effect::EnableWatcher { id, handle, generation } => {
                let dispatch = self.internal.clone();
                self.queue_watcher_op(move || {
                    // Confirm first so every delivery after the enable
                    // queues behind the confirmation.
                    let _ = dispatch.send(Action::WatcherResumed { id, generation });
                    handle.set_enabled(true, None, generation);
                })
            }
        }
    }

    /// Run `op` on a blocking thread once every earlier watcher operation
    /// has finished.
    fn queue_watcher_op(&mut self, op: impl FnOnce() + Send + 'static) {
        let previous = self.watcher_ops.take();
        self.watcher_ops = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if let Err(e) = tokio::task::spawn_blocking(op).await {
                tracing::error!(error = %e, "watcher operation panicked");
            }
        }));
    }
}

/// Scan a freshly opened log and, for live logs, start tailing it where
/// the scan ended. Every outcome is reported back as an action tagged with
/// `id`.
async fn run_open(
    collaborators: Arc<Collaborators>,
    dispatch: DispatchHandle,
    id: LogId,
    spec: LogSpecifier,
    cancel: CancellationToken,
) {
    let scanner = Scanner::new(
        Arc::clone(&collaborators.source),
        collaborators.resolvers.clone(),
        Arc::clone(&collaborators.status),
        collaborators.scanner.clone(),
    );

    let output = match scanner.run(&spec, cancel.clone()).await {
        Ok(output) => output,
        Err(e) if e.is_cancelled() => {
            let _ = dispatch.send(Action::OpenFailed { id, reason: None });
            return;
        }
        Err(e) => {
            let message = format!("Failed to open {}: {e}", spec.name);
            collaborators.status.failure(message.clone());
            let _ = dispatch.send(Action::OpenFailed {
                id,
                reason: Some(message),
            });
            return;
        }
    };

    let checkpoint = output.checkpoint;
    let loaded = dispatch.send(Action::LoadEvents {
        id,
        events: output.events,
        event_ids: output.event_ids,
        provider_names: output.provider_names,
        task_names: output.task_names,
    });
    if loaded.is_err() || spec.kind != LogKind::Live || cancel.is_cancelled() {
        return;
    }
    let Some(subscriber) = collaborators.live.clone() else {
        tracing::debug!(log = %spec.name, "source cannot tail; live log stays static");
        return;
    };

    let tag = StatusTag {
        sink: Arc::clone(&collaborators.status),
        activity: ActivityId::next(),
    };
    let started = {
        let spec = spec.clone();
        let resolvers = collaborators.resolvers.clone();
        let dispatch = dispatch.clone();
        tokio::task::spawn_blocking(move || {
            LiveWatcher::start(&spec, checkpoint, subscriber.as_ref(), &resolvers, Some(tag), dispatch)
        })
        .await
    };

    match started {
        Ok(Ok(handle)) => {
            let handle = Arc::new(handle);
            let attached = dispatch.send(Action::AttachWatcher {
                id,
                handle: Arc::clone(&handle),
                from: checkpoint,
            });
            if attached.is_err() {
                // Disposing joins the delivery thread; keep that off the
                // runtime.
                tracing::debug!(log = %spec.name, "dispatcher gone; disposing unattached watcher");
                let _ = tokio::task::spawn_blocking(move || handle.dispose()).await;
            }
        }
        Ok(Err(e)) => {
            tracing::warn!(log = %spec.name, error = %e, "live watcher failed to start");
            collaborators
                .status
                .failure(format!("Live updates unavailable for {}: {e}", spec.name));
        }
        Err(join) => {
            tracing::error!(log = %spec.name, error = %join, "live watcher start panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::resolver::ProviderDatabase;
    use crate::source::{LiveSubscription, NullStatusSink, RecordCallback, RecordIter};
    use crate::types::{Checkpoint, RawRecord};
    use std::sync::Mutex;
    use std::thread::ThreadId;
    use std::time::Duration;

    struct Fixed(usize);

    impl RecordSource for Fixed {
        fn scan(&self, spec: &LogSpecifier) -> Result<RecordIter, SourceError> {
            self.seek(spec, Checkpoint::from_raw(0))
        }
        fn seek(&self, spec: &LogSpecifier, checkpoint: Checkpoint) -> Result<RecordIter, SourceError> {
            let log = spec.name.clone();
            Ok(Box::new((checkpoint.into_raw() as usize..self.0).map(move |i| {
                Ok(RawRecord {
                    record_id: Some(i as u64),
                    event_id: 1,
                    version: 0,
                    level: 4,
                    task: 0,
                    opcode: 0,
                    keywords: 0,
                    provider_name: "P".into(),
                    log_name: log.clone(),
                    machine: String::new(),
                    timestamp: chrono::Utc::now(),
                    activity_id: None,
                    properties: Vec::new(),
                    checkpoint: Some(Checkpoint::from_raw(i as u64)),
                })
            })))
        }
    }

    fn collaborators(records: usize) -> Collaborators {
        Collaborators {
            source: Arc::new(Fixed(records)),
            live: None,
            resolvers: ResolverFactory::Database(Arc::new(ProviderDatabase::default())),
            status: Arc::new(NullStatusSink),
            scanner: ScannerConfig {
                batch_size: 10,
                workers: 2,
                progress_interval_ms: 50,
            },
        }
    }

    async fn wait_for(
        rx: &mut watch::Receiver<Arc<EventLogState>>,
        pred: impl Fn(&EventLogState) -> bool,
    ) -> Arc<EventLogState> {
        let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| pred(s)))
            .await
            .expect("timed out waiting for state")
            .expect("dispatcher stopped");
        Arc::clone(&state)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn open_loads_events() {
        let (handle, mut rx, _task) = spawn(EventLogState::default(), collaborators(35));
        handle.send(Action::open_log(LogSpecifier::file("f"))).unwrap();

        let state = wait_for(&mut rx, |s| s.logs.len() == 1 && s.scans.is_empty()).await;
        let (id, log) = state.logs.iter().next().unwrap();
        assert_eq!(log.events.len(), 35);
        assert_eq!(state.visible_events(*id).len(), 35);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_after_last_handle_dropped() {
        let (handle, mut rx, task) = spawn(EventLogState::default(), collaborators(5));
        handle.send(Action::open_log(LogSpecifier::file("f"))).unwrap();
        wait_for(&mut rx, |s| s.logs.len() == 1 && s.scans.is_empty()).await;

        drop(handle);
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(rx.borrow().logs.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn watcher_operations_run_in_queue_order() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let state = Arc::new(EventLogState::default());
        let mut dispatcher = Dispatcher {
            snapshots: watch::channel(Arc::clone(&state)).0,
            state,
            internal: DispatchHandle {
                tx: Sender::Strong(tx),
            },
            collaborators: Arc::new(collaborators(0)),
            watcher_ops: None,
        };

        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..20u64 {
            let order = Arc::clone(&order);
            dispatcher.queue_watcher_op(move || {
                // Early operations are the slow ones.
                std::thread::sleep(Duration::from_millis(20u64.saturating_sub(n)));
                order.lock().unwrap().push(n);
            });
        }
        dispatcher.watcher_ops.take().unwrap().await.unwrap();
        assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    struct Recorded(Arc<Mutex<Option<ThreadId>>>);

    impl LiveSubscription for Recorded {
        fn set_enabled(&self, _enabled: bool) {}
        fn is_enabled(&self) -> bool {
            false
        }
        fn dispose(&self) {
            *self.0.lock().unwrap() = Some(std::thread::current().id());
        }
    }

    /// Drops the last strong dispatch handle while subscribing, so the
    /// attach that follows finds the dispatcher gone.
    struct ClosingSubscriber {
        last_handle: Mutex<Option<DispatchHandle>>,
        disposed_on: Arc<Mutex<Option<ThreadId>>>,
    }

    impl LiveSubscriber for ClosingSubscriber {
        fn subscribe(
            &self,
            _spec: &LogSpecifier,
            _from: Option<Checkpoint>,
            _on_record: RecordCallback,
        ) -> Result<Box<dyn LiveSubscription>, SourceError> {
            self.last_handle.lock().unwrap().take();
            Ok(Box::new(Recorded(Arc::clone(&self.disposed_on))))
        }
    }

    #[tokio::test]
    async fn unattached_watcher_is_disposed_off_the_runtime() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let strong = DispatchHandle {
            tx: Sender::Strong(tx),
        };
        let weak = strong.downgrade();
        let disposed_on = Arc::new(Mutex::new(None));
        let mut c = collaborators(3);
        c.live = Some(Arc::new(ClosingSubscriber {
            last_handle: Mutex::new(Some(strong)),
            disposed_on: Arc::clone(&disposed_on),
        }));

        run_open(
            Arc::new(c),
            weak,
            LogId::next(),
            LogSpecifier::live("f"),
            CancellationToken::new(),
        )
        .await;

        // The current-thread runtime runs every task on this thread.
        let thread = disposed_on.lock().unwrap().expect("watcher was not disposed");
        assert_ne!(thread, std::thread::current().id());
    }

    #[tokio::test]
    async fn noop_actions_do_not_publish() {
        let (handle, rx, _task) = spawn(EventLogState::default(), collaborators(0));
        handle.send(Action::LoadNewEvents).unwrap();
        handle.send(Action::SetContinuouslyUpdate(true)).unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rx.borrow().version, 0);
    }
}
