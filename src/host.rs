//! # Host-side manager for several supervised children.
//!
//! ```text
//! HostManager
//!   ├─ ChannelServer (host port)          ◄── every child's client
//!   └─ supervisors: name ─► ProcessSupervisor
//!                             └─ ChannelClient (partner port) ──► child's server
//! ```
//!
//! `supervise` allocates a partner port that no registered child uses, appends
//! the launch tokens (host port, host pid, partner port) to the child's
//! arguments and registers the supervisor under the program's file stem.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::channel::{ChannelClient, ChannelServer};
use crate::config::Config;
use crate::core::{ProcessSpec, ProcessSupervisor, State};
use crate::dispatch::Dispatch;
use crate::error::HostError;
use crate::launch::LaunchParams;
use crate::ports;
use crate::subscribers::Subscribe;

/// How long dispose waits for a stopped child's exit to be reported.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Owns the host's channel server and one supervisor per child.
pub struct HostManager {
    server: ChannelServer,
    cfg: Config,
    supervisors: Mutex<HashMap<String, Arc<ProcessSupervisor>>>,
    disposed: AtomicBool,
}

impl HostManager {
    /// Binds the host server on `port` (`0` = any free port).
    pub async fn bind(port: u16, dispatch: Arc<dyn Dispatch>, cfg: Config) -> Result<Self, HostError> {
        let server = ChannelServer::bind_with(port, dispatch, cfg.ack_body.clone()).await?;
        Ok(Self {
            server,
            cfg,
            supervisors: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        })
    }

    /// The host's inbound endpoint.
    pub fn server(&self) -> &ChannelServer {
        &self.server
    }

    /// Creates and registers a supervisor for `spec` (not started).
    pub fn supervise(&self, spec: ProcessSpec) -> Result<Arc<ProcessSupervisor>, HostError> {
        self.supervise_with(spec, Vec::new())
    }

    /// Like [`supervise`](HostManager::supervise), attaching event subscribers.
    pub fn supervise_with(
        &self,
        mut spec: ProcessSpec,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Result<Arc<ProcessSupervisor>, HostError> {
        let name = spec.label();
        let mut supervisors = self.supervisors.lock();
        if supervisors.contains_key(&name) {
            return Err(HostError::Duplicate(name));
        }

        let child_port = self.allocate_port(&supervisors)?;
        let params = LaunchParams {
            parent_port: self.server.port(),
            parent_pid: std::process::id(),
            child_port,
        };
        spec.args.extend(params.to_args());
        debug!(name = %name, args = ?spec.args, "launch arguments prepared");

        let client = ChannelClient::with_timeout(child_port, self.cfg.request_timeout())?;
        let sup = ProcessSupervisor::builder(spec, Arc::new(client))
            .with_config(self.cfg.clone())
            .with_subscribers(subscribers)
            .build();
        let sup = Arc::new(sup);

        info!(name = %name, child_port, "child registered");
        supervisors.insert(name, Arc::clone(&sup));
        Ok(sup)
    }

    fn allocate_port(
        &self,
        supervisors: &HashMap<String, Arc<ProcessSupervisor>>,
    ) -> Result<u16, HostError> {
        let attempts = self.cfg.max_port_attempts.max(1);
        for _ in 0..attempts {
            let port = ports::free_port().map_err(HostError::PortProbe)?;
            let taken = port == self.server.port()
                || supervisors
                    .values()
                    .any(|s| s.client().partner_port() == port);
            if !taken {
                return Ok(port);
            }
            debug!(port, "port collides with a registered partner; probing again");
        }
        Err(HostError::PortsExhausted { attempts })
    }

    /// Supervisor registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<ProcessSupervisor>> {
        self.supervisors.lock().get(name).cloned()
    }

    /// Names of all registered children.
    pub fn names(&self) -> Vec<String> {
        self.supervisors.lock().keys().cloned().collect()
    }

    /// Stops every running child with the configured stop timeout, waits for
    /// each exit to be reported, then disposes all supervisors and the server.
    /// Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let supervisors: Vec<_> = self.supervisors.lock().drain().collect();
        let stops = supervisors
            .iter()
            .filter(|(_, sup)| sup.current_state() == State::Running)
            .map(|(name, sup)| {
                let exited = sup.when_exited();
                let stop = sup.stop_default();
                async move {
                    if let Err(err) = stop.await {
                        debug!(name = %name, error = %err, "stop during dispose failed");
                        return;
                    }
                    if tokio::time::timeout(EXIT_GRACE, exited).await.is_err() {
                        warn!(name = %name, "child did not report its exit in time");
                    }
                }
            });
        futures::future::join_all(stops).await;

        for (_, sup) in &supervisors {
            sup.dispose();
        }
        self.server.dispose();
        info!(children = supervisors.len(), "host manager disposed");
    }
}
