//! # Event subscribers for supervisor observability.
//!
//! This module provides the [`Subscribe`] trait and the [`SubscriberSet`] that
//! fans supervisor events out to user handlers.
//!
//! ## Architecture
//! ```text
//! Bus ──► subscriber listener ──► SubscriberSet::emit(&Event)
//!                                     ├──► [queue 1] ──► worker ──► sub1.on_event()
//!                                     └──► [queue N] ──► worker ──► subN.on_event()
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use procbus::{Event, EventKind, Subscribe};
//! use async_trait::async_trait;
//!
//! struct Exits;
//!
//! #[async_trait]
//! impl Subscribe for Exits {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::ProcessExited {
//!             // record exit code
//!         }
//!     }
//! }
//! ```

#[cfg(feature = "logging")]
mod log;
mod subscriber;
mod subscriber_set;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;
pub(crate) use subscriber_set::panic_message;
