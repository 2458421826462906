//! Supervisor events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by a [`ProcessSupervisor`](crate::ProcessSupervisor),
//! its process watcher and output pumps, and subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: the queue-owned state machine, the exit watcher, stdout/stderr
//!   pumps, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `when_state_is` waiters, the graceful-stop race, the
//!   subscriber listener fanning out to a `SubscriberSet`, raw `subscribe()` receivers.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
