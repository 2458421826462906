//! # Cooperative shutdown over the channel.
//!
//! One side asks its partner to exit by sending an empty envelope tagged
//! [`EventType::EXIT`]; the partner runs a local shutdown callback when it arrives.
//!
//! ```text
//! host: signal_exit(client) ──► *[Exit]* ──► child server ──► on_exit()
//!                         ◄── "received" ──┘
//! ```
//!
//! The acknowledgement only proves delivery. Completion of the partner's shutdown
//! is observed elsewhere (process exit, the watchdog, or supervisor states).

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use hyper::body::Bytes;
use tracing::{debug, warn};

use crate::channel::{ChannelClient, ChannelServer, Envelope, EventType, ListenerSlot};
use crate::error::ChannelError;
use crate::subscribers::panic_message;

/// Registration of a shutdown callback on a [`ChannelServer`].
///
/// Dropping the listener (or calling [`dispose`](ShutdownListener::dispose))
/// unregisters the callback, unless another `Exit` handler replaced it meanwhile.
#[must_use = "dropping the listener unregisters the shutdown callback"]
pub struct ShutdownListener {
    slot: ListenerSlot,
}

impl ShutdownListener {
    /// Unregisters the callback. Idempotent.
    pub fn dispose(&self) {
        self.slot.remove();
    }
}

impl Drop for ShutdownListener {
    fn drop(&mut self) {
        self.slot.remove();
    }
}

/// Invokes `on_exit` every time an `Exit` envelope arrives on `server`.
///
/// A panic inside `on_exit` is logged and swallowed; the server keeps receiving.
pub fn listen<F>(server: &ChannelServer, on_exit: F) -> ShutdownListener
where
    F: Fn() + Send + Sync + 'static,
{
    let slot = server.register(
        EventType::EXIT,
        Arc::new(move |_: &Envelope| {
            debug!("exit signal received");
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(&on_exit)) {
                warn!(reason = %panic_message(&*panic), "shutdown callback panicked");
            }
        }),
    );
    ShutdownListener { slot }
}

/// Asks the partner behind `client` to exit and returns its acknowledgement.
///
/// Does not wait for the partner to actually terminate.
pub async fn signal_exit(client: &ChannelClient) -> Result<String, ChannelError> {
    client.send(Bytes::new(), &EventType::EXIT).await
}
