//! Live watcher — tails a live log after its bulk scan completed.
//!
//! [`LiveWatcher::start`] subscribes to the source from the scan's terminal
//! checkpoint. Every delivered record is resolved on the delivery thread and
//! submitted to the dispatcher as [`Action::AddEvent`]; the callback never
//! waits on the store.
//!
//! # Ownership
//!
//! The returned [`WatcherHandle`] is handed to the store with
//! [`Action::AttachWatcher`] and from then on belongs to the snapshot entry
//! of its log. The handle disposes the subscription at most once, either
//! explicitly or on drop.
//!
//! # Enabled / Disabled
//!
//! A new subscription is paused; the store enables it when the handle is
//! attached. `set_enabled` on a subscription may wait for the delivery
//! loop, which may itself be waiting on the callback. The store therefore
//! never toggles a watcher inline: it emits an effect and the dispatcher
//! runs it on a blocking task, one watcher operation at a time in the order
//! the store decided them.

use crate::dispatcher::DispatchHandle;
use crate::error::PipelineError;
use crate::resolver::{ResolverFactory, StatusTag};
use crate::source::{LiveSubscriber, LiveSubscription};
use crate::store::Action;
use crate::types::{Checkpoint, LogSpecifier};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Owned reference to one live subscription.
pub struct WatcherHandle {
    log: String,
    subscription: Box<dyn LiveSubscription>,
    disposed: AtomicBool,
    /// Generation of the last applied toggle. Older generations are ignored.
    applied: Mutex<u64>,
}

impl WatcherHandle {
    pub fn new(log: impl Into<String>, subscription: Box<dyn LiveSubscription>) -> Self {
        Self {
            log: log.into(),
            subscription,
            disposed: AtomicBool::new(false),
            applied: Mutex::new(0),
        }
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn is_enabled(&self) -> bool {
        !self.is_disposed() && self.subscription.is_enabled()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Apply the enabled state decided by the store at `generation`.
    ///
    /// When disabling, `resume_after` is the last record the store accepted
    /// (`None` if it has accepted none); the subscription rewinds there so
    /// nothing delivered after it is lost.
    /// May block; never call from the delivery callback.
    pub fn set_enabled(&self, enabled: bool, resume_after: Option<Checkpoint>, generation: u64) {
        let mut applied = match self.applied.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.is_disposed() || generation <= *applied {
            return;
        }
        *applied = generation;

        self.subscription.set_enabled(enabled);
        if !enabled {
            self.subscription.rewind(resume_after);
        }
        tracing::debug!(log = %self.log, enabled, generation, "watcher toggled");
    }

    /// Stop the subscription. Only the first call reaches the source.
    pub fn dispose(&self) {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::debug!(log = %self.log, "watcher disposed");
            self.subscription.dispose();
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("log", &self.log)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Starts live tails.
pub struct LiveWatcher;

impl LiveWatcher {
    /// Subscribe to `spec` starting after `from`, forwarding resolved events
    /// to `dispatch`. Nothing is forwarded until the store enables the
    /// returned handle.
    pub fn start(
        spec: &LogSpecifier,
        from: Option<Checkpoint>,
        subscriber: &dyn LiveSubscriber,
        resolvers: &ResolverFactory,
        status: Option<StatusTag>,
        dispatch: DispatchHandle,
    ) -> Result<WatcherHandle, PipelineError> {
        // The subscription calls back one record at a time, but the trait
        // only promises `Fn + Sync`, so the resolver sits behind a mutex.
        let resolver = Mutex::new(resolvers.create(status));
        let owning_log = spec.name.clone();

        let subscription = subscriber.subscribe(
            spec,
            from,
            Box::new(move |raw| {
                let event = match resolver.lock() {
                    Ok(mut r) => r.resolve(&raw, &owning_log),
                    Err(poisoned) => poisoned.into_inner().resolve(&raw, &owning_log),
                };
                if dispatch.send(Action::AddEvent(Arc::new(event))).is_err() {
                    tracing::trace!(log = %owning_log, "dispatcher gone; dropping live event");
                }
            }),
        )?;

        tracing::info!(log = %spec.name, checkpoint = ?from, "live watcher started");
        Ok(WatcherHandle::new(spec.name.clone(), subscription))
    }
}
