//! # Events emitted by a process supervisor.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Lifecycle events**: state transitions, spawn, exit
//! - **Stop protocol events**: exit signal sent/failed, kill issued
//! - **Output events**: captured stdout/stderr lines
//!
//! The [`Event`] struct carries additional metadata such as timestamps, the
//! supervisor label, the reached state, pid and exit code.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use procbus::{Event, EventKind, State};
//!
//! let ev = Event::new(EventKind::StateChanged)
//!     .with_supervisor("worker")
//!     .with_state(State::Running)
//!     .with_pid(4242);
//!
//! assert_eq!(ev.kind, EventKind::StateChanged);
//! assert_eq!(ev.state, Some(State::Running));
//! assert_eq!(ev.supervisor.as_deref(), Some("worker"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::core::State;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of supervisor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Lifecycle events ===
    /// The state machine completed a transition (fired on every transition,
    /// including a repeated `Running` after a restart).
    ///
    /// Sets: `state`, `supervisor`
    StateChanged,

    /// The OS process was spawned.
    ///
    /// Sets: `pid`, `supervisor`
    ProcessSpawned,

    /// The OS process terminated.
    ///
    /// Sets: `pid`, `exit_code`, `supervisor`
    ProcessExited,

    // === Stop protocol ===
    /// Graceful exit signal delivered to the peer.
    ///
    /// Sets: `reason` (acknowledgement body), `supervisor`
    ExitSignalSent,

    /// Graceful exit signal could not be delivered.
    ///
    /// Sets: `reason` (transport error), `supervisor`
    ExitSignalFailed,

    /// Forced termination was requested.
    ///
    /// Sets: `pid`, `supervisor`
    KillIssued,

    // === Output ===
    /// One line captured from the child's stdout.
    ///
    /// Sets: `line`, `pid`, `supervisor`
    OutputLine,

    /// One line captured from the child's stderr (when capture is enabled).
    ///
    /// Sets: `line`, `pid`, `supervisor`
    ErrorLine,

    // === Subscriber events ===
    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `subscriber`, `reason`
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `subscriber`, `reason`
    SubscriberPanicked,
}

/// Supervisor event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Label of the emitting supervisor.
    pub supervisor: Option<Arc<str>>,
    /// Subscriber name, for `SubscriberOverflow` / `SubscriberPanicked`.
    pub subscriber: Option<&'static str>,
    /// State reached, for `StateChanged`.
    pub state: Option<State>,
    /// OS process id, if applicable.
    pub pid: Option<u32>,
    /// Process exit code (`-1` when terminated by a signal).
    pub exit_code: Option<i32>,
    /// Captured output line.
    pub line: Option<Arc<str>>,
    /// Human-readable reason (errors, acknowledgements, overflow details).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            supervisor: None,
            subscriber: None,
            state: None,
            pid: None,
            exit_code: None,
            line: None,
            reason: None,
        }
    }

    /// Attaches the emitting supervisor label.
    #[inline]
    pub fn with_supervisor(mut self, label: impl Into<Arc<str>>) -> Self {
        self.supervisor = Some(label.into());
        self
    }

    /// Attaches the reached state.
    #[inline]
    pub fn with_state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    /// Attaches a process id.
    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches an exit code.
    #[inline]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Attaches a captured output line.
    #[inline]
    pub fn with_line(mut self, line: impl Into<Arc<str>>) -> Self {
        self.line = Some(line.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a `StateChanged` event.
    #[inline]
    pub fn state_changed(label: &Arc<str>, state: State) -> Self {
        Event::new(EventKind::StateChanged)
            .with_supervisor(Arc::clone(label))
            .with_state(state)
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        let mut ev = Event::new(EventKind::SubscriberOverflow).with_reason(reason);
        ev.subscriber = Some(subscriber);
        ev
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        let mut ev = Event::new(EventKind::SubscriberPanicked).with_reason(info);
        ev.subscriber = Some(subscriber);
        ev
    }

    /// Returns true if this event reports reaching `state`.
    #[inline]
    pub fn is_state(&self, state: State) -> bool {
        self.kind == EventKind::StateChanged && self.state == Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = Event::new(EventKind::OutputLine);
        let b = Event::new(EventKind::OutputLine);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn is_state_requires_state_changed_kind() {
        let label: Arc<str> = Arc::from("sup");
        assert!(Event::state_changed(&label, State::Running).is_state(State::Running));
        assert!(!Event::state_changed(&label, State::Running).is_state(State::Stopping));
        assert!(!Event::new(EventKind::ProcessSpawned)
            .with_state(State::Running)
            .is_state(State::Running));
    }

    #[test]
    fn subscriber_events_do_not_claim_a_supervisor() {
        let overflow = Event::subscriber_overflow("metrics", "full");
        assert_eq!(overflow.subscriber, Some("metrics"));
        assert_eq!(overflow.supervisor, None);
        assert_eq!(overflow.reason.as_deref(), Some("full"));

        let panicked = Event::subscriber_panicked("audit", "boom".to_string());
        assert_eq!(panicked.subscriber, Some("audit"));
        assert_eq!(panicked.supervisor, None);
    }
}
