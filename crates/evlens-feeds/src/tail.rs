//! Delivery-thread control shared by the live subscriptions in this crate.
//!
//! Each subscription runs one background thread that waits on a
//! [`TailControl`] and hands records to the pipeline callback through
//! [`TailControl::deliver`]. Disabling takes the delivery gate, so once
//! `set_enabled(false)` returns no callback is running and none will start
//! until re-enabled. A new control starts paused.

use evlens_core::Checkpoint;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Where a rewound delivery thread continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rewind {
    /// Back to the position the subscription started at.
    Start,
    /// Right after this checkpoint.
    After(Checkpoint),
}

/// What the delivery thread should do after [`TailControl::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Ready,
    Paused,
    Disposed,
}

#[derive(Debug)]
struct TailState {
    enabled: bool,
    disposed: bool,
    /// Set by a producer when new data may be available.
    dirty: bool,
    rewind: Option<Rewind>,
}

#[derive(Debug)]
pub(crate) struct TailControl {
    state: Mutex<TailState>,
    changed: Condvar,
    gate: Mutex<()>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TailControl {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TailState {
                enabled: false,
                disposed: false,
                dirty: true,
                rewind: None,
            }),
            changed: Condvar::new(),
            gate: Mutex::new(()),
            thread: Mutex::new(None),
        }
    }

    pub(crate) fn attach_thread(&self, handle: JoinHandle<()>) {
        *relock(&self.thread) = Some(handle);
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        {
            let mut s = relock(&self.state);
            s.enabled = enabled;
            s.dirty = true;
        }
        self.changed.notify_all();
        if !enabled {
            // Wait out a delivery already in progress.
            drop(relock(&self.gate));
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        let s = relock(&self.state);
        s.enabled && !s.disposed
    }

    pub(crate) fn rewind(&self, after: Option<Checkpoint>) {
        relock(&self.state).rewind = Some(after.map_or(Rewind::Start, Rewind::After));
        self.poke();
    }

    pub(crate) fn take_rewind(&self) -> Option<Rewind> {
        relock(&self.state).rewind.take()
    }

    /// Signal that new data may be available.
    pub(crate) fn poke(&self) {
        relock(&self.state).dirty = true;
        self.changed.notify_all();
    }

    /// Stop the delivery thread and wait for it, unless called from it.
    pub(crate) fn dispose(&self) {
        {
            let mut s = relock(&self.state);
            s.disposed = true;
            s.enabled = false;
        }
        self.changed.notify_all();

        let handle = relock(&self.thread).take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        relock(&self.state).disposed
    }

    /// Block until poked, toggled or disposed, or until `timeout` passes.
    pub(crate) fn wait(&self, timeout: Duration) -> Wake {
        let mut s = relock(&self.state);
        if !s.disposed && !s.dirty {
            s = self
                .changed
                .wait_timeout(s, timeout)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        s.dirty = false;
        if s.disposed {
            Wake::Disposed
        } else if s.enabled {
            Wake::Ready
        } else {
            Wake::Paused
        }
    }

    /// Run `f` if delivery is currently allowed. Returns whether it ran.
    pub(crate) fn deliver(&self, f: impl FnOnce()) -> bool {
        let _gate = relock(&self.gate);
        {
            let s = relock(&self.state);
            if !s.enabled || s.disposed {
                return false;
            }
        }
        f();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn deliver_respects_enabled_flag() {
        let ctl = TailControl::new();
        assert!(!ctl.deliver(|| panic!("must not run before the first enable")));
        ctl.set_enabled(true);
        assert!(ctl.deliver(|| {}));
        ctl.set_enabled(false);
        assert!(!ctl.deliver(|| panic!("must not run while disabled")));
        ctl.set_enabled(true);
        assert!(ctl.deliver(|| {}));
    }

    #[test]
    fn wait_reports_dispose() {
        let ctl = Arc::new(TailControl::new());
        assert_eq!(ctl.wait(Duration::from_millis(1)), Wake::Paused);
        ctl.set_enabled(true);
        assert_eq!(ctl.wait(Duration::from_millis(1)), Wake::Ready);
        ctl.set_enabled(false);
        assert_eq!(ctl.wait(Duration::from_millis(1)), Wake::Paused);
        ctl.dispose();
        assert_eq!(ctl.wait(Duration::from_millis(1)), Wake::Disposed);
        assert!(!ctl.is_enabled());
    }

    #[test]
    fn rewind_is_taken_once() {
        let ctl = TailControl::new();
        ctl.rewind(Some(Checkpoint::from_raw(7)));
        assert_eq!(ctl.take_rewind(), Some(Rewind::After(Checkpoint::from_raw(7))));
        assert_eq!(ctl.take_rewind(), None);
        ctl.rewind(None);
        assert_eq!(ctl.take_rewind(), Some(Rewind::Start));
    }
}
