//! # Peer exit watchdog.
//!
//! Watches one OS process id and fires a callback exactly once when that process
//! is gone, independent of the message channel.
//!
//! ```text
//! new(pid) ──► probe(pid) ── Gone ──► fire()            (before new() returns)
//!                 │
//!                Alive ──► spawn poller ──► probe again ── Gone ──► fire()
//!                               │
//!                               └─ every `poll` ──► probe ── Gone ──► fire()
//! ```
//!
//! ## Rules
//! - `fired` is a single-assignment flag; whichever path sets it first runs the callback.
//! - The immediate re-check after the poller is armed covers the window between
//!   the first lookup and the first tick.
//! - Zombie and dead entries count as gone.
//! - There is no OS exit notification here: the pid is polled every `poll`
//!   (`Config::watchdog_poll`), so the callback may lag the real exit by up to
//!   one interval. The pid need not be our child, which rules out `wait`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessStatus, System};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Result of one process-table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    /// The pid exists and has not terminated.
    Alive,
    /// The pid is absent, a zombie, or dead.
    Gone,
}

/// Process-table lookup used by [`PeerWatchdog`].
pub trait ProcessProbe: Send + Sync + 'static {
    /// Reports whether `pid` is still running.
    fn probe(&self, pid: u32) -> PeerStatus;
}

/// [`ProcessProbe`] backed by `sysinfo`.
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    /// Creates a probe with an empty process table.
    ///
    /// Each lookup refreshes only the watched pid instead of the whole table.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SysinfoProbe {
    fn probe(&self, pid: u32) -> PeerStatus {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return PeerStatus::Gone;
        }
        match system.process(pid).map(|p| p.status()) {
            Some(ProcessStatus::Zombie) | Some(ProcessStatus::Dead) | None => PeerStatus::Gone,
            Some(_) => PeerStatus::Alive,
        }
    }
}

type ExitCallback = Box<dyn FnOnce(u32) + Send + 'static>;

struct Inner {
    pid: u32,
    fired: AtomicBool,
    callback: Mutex<Option<ExitCallback>>,
}

impl Inner {
    /// Runs the callback if nobody did yet. Returns true for the caller that fired.
    fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        info!(pid = self.pid, "watched process exited");
        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            callback(self.pid);
        }
        true
    }
}

/// Fires a callback once when a watched process terminates.
///
/// Dropping the watchdog stops polling without firing.
pub struct PeerWatchdog {
    inner: Arc<Inner>,
    token: CancellationToken,
}

impl PeerWatchdog {
    /// Watches `pid` with the `sysinfo` probe at the given polling interval.
    ///
    /// If `pid` is not running, `on_exit` runs before this returns. Otherwise a
    /// poller is spawned on the current tokio runtime.
    pub fn new<F>(pid: u32, poll: Duration, on_exit: F) -> Self
    where
        F: FnOnce(u32) + Send + 'static,
    {
        Self::with_probe(pid, poll, Arc::new(SysinfoProbe::new()), on_exit)
    }

    /// Watches `pid` using a custom probe.
    pub fn with_probe<F>(pid: u32, poll: Duration, probe: Arc<dyn ProcessProbe>, on_exit: F) -> Self
    where
        F: FnOnce(u32) + Send + 'static,
    {
        let inner = Arc::new(Inner {
            pid,
            fired: AtomicBool::new(false),
            callback: Mutex::new(Some(Box::new(on_exit))),
        });
        let token = CancellationToken::new();
        let watchdog = Self {
            inner: Arc::clone(&inner),
            token: token.clone(),
        };

        if probe.probe(pid) == PeerStatus::Gone {
            debug!(pid, "watched process not found");
            inner.fire();
            return watchdog;
        }

        tokio::spawn(poll_loop(
            Arc::clone(&inner),
            Arc::clone(&probe),
            poll,
            token.clone(),
        ));

        if probe.probe(pid) == PeerStatus::Gone {
            inner.fire();
            token.cancel();
        }
        watchdog
    }

    /// Watched process id.
    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    /// Returns true once the callback has been claimed.
    pub fn has_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Stops polling. Idempotent; never fires the callback.
    pub fn dispose(&self) {
        self.token.cancel();
    }
}

impl Drop for PeerWatchdog {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn poll_loop(
    inner: Arc<Inner>,
    probe: Arc<dyn ProcessProbe>,
    poll: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately; the constructor already probed.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if inner.fired.load(Ordering::Acquire) {
                    break;
                }
                if probe.probe(inner.pid) == PeerStatus::Gone {
                    inner.fire();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Replays a scripted sequence of statuses, then reports `Gone` forever.
    struct Scripted(Mutex<VecDeque<PeerStatus>>);

    impl Scripted {
        fn new(script: &[PeerStatus]) -> Arc<Self> {
            Arc::new(Self(Mutex::new(script.iter().copied().collect())))
        }
    }

    impl ProcessProbe for Scripted {
        fn probe(&self, _pid: u32) -> PeerStatus {
            self.0.lock().pop_front().unwrap_or(PeerStatus::Gone)
        }
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<Mutex<Option<u32>>>) {
        (Arc::new(AtomicUsize::new(0)), Arc::new(Mutex::new(None)))
    }

    #[tokio::test]
    async fn absent_pid_fires_before_construction_returns() {
        let (hits, seen) = counter();
        let (h, s) = (hits.clone(), seen.clone());
        let wd = PeerWatchdog::with_probe(
            4242,
            Duration::from_millis(10),
            Scripted::new(&[PeerStatus::Gone]),
            move |pid| {
                h.fetch_add(1, Ordering::SeqCst);
                *s.lock() = Some(pid);
            },
        );

        assert!(wd.has_fired());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), Some(4242));
    }

    #[tokio::test]
    async fn death_right_after_lookup_fires_exactly_once() {
        let (hits, _) = counter();
        let h = hits.clone();
        let wd = PeerWatchdog::with_probe(
            7,
            Duration::from_millis(10),
            Scripted::new(&[PeerStatus::Alive, PeerStatus::Gone]),
            move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert!(wd.has_fired());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn poller_fires_once_when_process_dies_later() {
        let (hits, _) = counter();
        let h = hits.clone();
        let wd = PeerWatchdog::with_probe(
            7,
            Duration::from_millis(10),
            Scripted::new(&[PeerStatus::Alive, PeerStatus::Alive, PeerStatus::Alive]),
            move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert!(!wd.has_fired());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(wd.has_fired());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispose_stops_polling_without_firing() {
        let (hits, _) = counter();
        let h = hits.clone();
        let wd = PeerWatchdog::with_probe(
            7,
            Duration::from_millis(20),
            Scripted::new(&[PeerStatus::Alive, PeerStatus::Alive, PeerStatus::Alive]),
            move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            },
        );
        wd.dispose();
        wd.dispose();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!wd.has_fired());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sysinfo_sees_current_process() {
        let probe = SysinfoProbe::new();
        assert_eq!(probe.probe(std::process::id()), PeerStatus::Alive);
    }
}
