//! # Supervisor event hooks.
//!
//! [`Subscribe`] is how callers observe a supervisor without polling it: state
//! changes, spawn/exit records, captured output lines and exit-signal outcomes
//! all arrive as [`Event`]s.
//!
//! ```text
//! Bus ──► subscriber listener ──► SubscriberSet ──► [queue] ──► on_event()
//! ```
//!
//! A subscriber owns a bounded queue and a worker task. When the queue is full
//! the event is dropped for that subscriber and `EventKind::SubscriberOverflow`
//! is published; a panic inside `on_event` becomes
//! `EventKind::SubscriberPanicked`. Delivery is FIFO per subscriber.

use async_trait::async_trait;

use crate::events::{Event, EventKind};

/// Observer of one supervisor's events.
///
/// `on_event` runs on the subscriber's own task; keep it non-blocking.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event);

    /// Name reported in overflow and panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Queue depth for this subscriber (clamped to 1). Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }

    /// Filter applied before queueing. Chatty children can flood a subscriber
    /// with `OutputLine`s; return false for kinds you never look at.
    fn interested(&self, kind: EventKind) -> bool {
        let _ = kind;
        true
    }
}
