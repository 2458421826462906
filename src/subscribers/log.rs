//! # LogWriter: tracing-backed event renderer
//!
//! A minimal subscriber that renders supervisor [`Event`]s through `tracing`.
//!
//! ## Example output
//! ```text
//! INFO procbus: state changed supervisor="worker" state=Running
//! INFO procbus: process spawned supervisor="worker" pid=4242
//! DEBUG procbus: stdout supervisor="worker" line="ready"
//! INFO procbus: process exited supervisor="worker" pid=4242 exit_code=0
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let sup = e.supervisor.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::StateChanged => {
                info!(supervisor = sup, state = ?e.state, "state changed");
            }
            EventKind::ProcessSpawned => {
                info!(supervisor = sup, pid = ?e.pid, "process spawned");
            }
            EventKind::ProcessExited => {
                info!(supervisor = sup, pid = ?e.pid, exit_code = ?e.exit_code, "process exited");
            }
            EventKind::ExitSignalSent => {
                info!(supervisor = sup, ack = ?e.reason, "exit signal sent");
            }
            EventKind::ExitSignalFailed => {
                warn!(supervisor = sup, err = ?e.reason, "exit signal failed");
            }
            EventKind::KillIssued => {
                warn!(supervisor = sup, pid = ?e.pid, "kill issued");
            }
            EventKind::OutputLine => {
                debug!(supervisor = sup, line = ?e.line, "stdout");
            }
            EventKind::ErrorLine => {
                debug!(supervisor = sup, line = ?e.line, "stderr");
            }
            EventKind::SubscriberOverflow => {
                warn!(subscriber = ?e.subscriber, reason = ?e.reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                warn!(subscriber = ?e.subscriber, info = ?e.reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
