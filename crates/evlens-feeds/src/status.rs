//! Status sinks.
//!
//! [`TracingStatusSink`] turns status updates into log lines.
//! [`ChannelStatusSink`] forwards them to whoever renders them (a status
//! bar, the headless runner's stderr line, a test).

use evlens_core::source::{ActivityId, StatusSink};
use tokio::sync::mpsc;

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn progress(&self, activity: ActivityId, resolved: usize) {
        tracing::info!(activity = activity.0, resolved, "loading");
    }

    fn resolver_status(&self, activity: ActivityId, message: String) {
        tracing::debug!(activity = activity.0, %message, "resolver");
    }

    fn clear(&self, activity: ActivityId) {
        tracing::debug!(activity = activity.0, "activity finished");
    }

    fn failure(&self, message: String) {
        tracing::error!(%message, "failure");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Progress { activity: ActivityId, resolved: usize },
    Resolver { activity: ActivityId, message: String },
    Cleared(ActivityId),
    Failure(String),
}

/// Forwards status updates over an unbounded channel. Updates sent after
/// the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelStatusSink {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelStatusSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: StatusEvent) {
        let _ = self.tx.send(event);
    }
}

impl StatusSink for ChannelStatusSink {
    fn progress(&self, activity: ActivityId, resolved: usize) {
        self.emit(StatusEvent::Progress { activity, resolved });
    }

    fn resolver_status(&self, activity: ActivityId, message: String) {
        self.emit(StatusEvent::Resolver { activity, message });
    }

    fn clear(&self, activity: ActivityId) {
        self.emit(StatusEvent::Cleared(activity));
    }

    fn failure(&self, message: String) {
        self.emit(StatusEvent::Failure(message));
    }
}
