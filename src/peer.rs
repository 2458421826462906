//! # Child-side endpoint.
//!
//! Wires everything a supervised child needs from its [`LaunchParams`]:
//!
//! ```text
//! LaunchParams ──► ChannelServer(child_port)  ◄── host client
//!              ├─► ChannelClient(parent_port) ──► host server
//!              ├─► cooperative::listen        ──► on_shutdown_requested()
//!              └─► PeerWatchdog(parent_pid)   ──► on_parent_exit(pid)
//! ```

use std::sync::Arc;

use tracing::info;

use crate::channel::{ChannelClient, ChannelPair, ChannelServer};
use crate::config::Config;
use crate::cooperative::{self, ShutdownListener};
use crate::dispatch::Dispatch;
use crate::error::ChannelError;
use crate::launch::LaunchParams;
use crate::watchdog::PeerWatchdog;

/// The child's channel pair plus its parent watchdog and shutdown listener.
pub struct PeerEndpoint {
    params: LaunchParams,
    pair: ChannelPair,
    shutdown: ShutdownListener,
    watchdog: PeerWatchdog,
}

impl PeerEndpoint {
    /// Binds the child's server, connects to the host and starts watching it.
    ///
    /// `on_shutdown_requested` runs (through `dispatch`) for every exit signal from
    /// the host. `on_parent_exit` runs once when the host process is gone; if it is
    /// already gone, before this returns.
    pub async fn connect<E, S>(
        params: LaunchParams,
        dispatch: Arc<dyn Dispatch>,
        cfg: &Config,
        on_parent_exit: E,
        on_shutdown_requested: S,
    ) -> Result<Self, ChannelError>
    where
        E: FnOnce(u32) + Send + 'static,
        S: Fn() + Send + Sync + 'static,
    {
        let pair = ChannelPair::bind(params.child_port, params.parent_port, dispatch, cfg).await?;
        info!(
            parent_port = params.parent_port,
            parent_pid = params.parent_pid,
            child_port = pair.server.port(),
            "peer endpoint connected"
        );

        let shutdown = cooperative::listen(&pair.server, move || {
            info!("shutdown requested by host");
            on_shutdown_requested();
        });
        let watchdog = PeerWatchdog::new(params.parent_pid, cfg.watchdog_poll_clamped(), move |pid| {
            info!(pid, "host process exited");
            on_parent_exit(pid);
        });

        Ok(Self {
            params,
            pair,
            shutdown,
            watchdog,
        })
    }

    /// Parameters this endpoint was built from.
    pub fn params(&self) -> LaunchParams {
        self.params
    }

    /// The child's inbound endpoint.
    pub fn server(&self) -> &ChannelServer {
        &self.pair.server
    }

    /// Client pointed at the host's server.
    pub fn client(&self) -> &Arc<ChannelClient> {
        &self.pair.client
    }

    /// Returns true once the host was observed gone.
    pub fn parent_exited(&self) -> bool {
        self.watchdog.has_fired()
    }

    /// Unregisters the shutdown listener, stops the watchdog and closes both
    /// endpoints. Idempotent.
    pub fn dispose(&self) {
        self.shutdown.dispose();
        self.watchdog.dispose();
        self.pair.dispose();
    }
}
