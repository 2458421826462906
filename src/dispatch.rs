//! # Handler dispatch onto the host's execution context.
//!
//! Inbound channel messages are never handed to user handlers directly from the
//! accept loop. They are posted through a [`Dispatch`] implementation chosen by the
//! host, which decides where the callback actually runs.
//!
//! ## Implementations
//! - [`Inline`] runs the callback on the posting task (no marshaling)
//! - [`TokioDispatch`] spawns the callback onto a tokio runtime's blocking pool
//! - [`Mailbox`] queues callbacks (optionally delayed) until the host drains them
//!   on its own thread with [`Mailbox::run_pending`]
//!
//! ```text
//! accept task ── post(cb) ──► Mailbox ──► [queue] ──► host loop: run_pending()
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// A callback to run on the host's designated context.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Capability to run a callback "soon" on a designated execution context.
pub trait Dispatch: Send + Sync + 'static {
    /// Schedules `callback`; must not block the caller.
    fn post(&self, callback: Callback);
}

/// Runs every callback immediately on the posting task.
#[derive(Clone, Copy, Debug, Default)]
pub struct Inline;

impl Dispatch for Inline {
    fn post(&self, callback: Callback) {
        callback();
    }
}

/// Runs callbacks on a tokio runtime's blocking pool.
#[derive(Clone, Debug)]
pub struct TokioDispatch {
    handle: Handle,
}

impl TokioDispatch {
    /// Binds to the current runtime. Panics outside a runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self {
            handle: Handle::current(),
        }
    }

    /// Binds to the given runtime handle.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Dispatch for TokioDispatch {
    fn post(&self, callback: Callback) {
        let _ = self.handle.spawn_blocking(callback);
    }
}

struct Delayed {
    due: Instant,
    callback: Callback,
}

/// Host-drained callback queue.
///
/// Posting never blocks. Callbacks run, in posting order, only when the host calls
/// [`run_pending`](Mailbox::run_pending) (typically once per frame/tick on its main
/// thread). Delayed callbacks become eligible once their delay has elapsed.
pub struct Mailbox {
    tx: mpsc::UnboundedSender<Callback>,
    rx: Mutex<mpsc::UnboundedReceiver<Callback>>,
    delayed: Mutex<Vec<Delayed>>,
}

impl Mailbox {
    /// Creates an empty mailbox.
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Mutex::new(rx),
            delayed: Mutex::new(Vec::new()),
        })
    }

    /// Schedules `callback` to run no earlier than `delay` from now.
    pub fn post_after(&self, delay: Duration, callback: Callback) {
        if delay.is_zero() {
            self.post(callback);
            return;
        }
        self.delayed.lock().push(Delayed {
            due: Instant::now() + delay,
            callback,
        });
    }

    /// Runs every callback that is currently due; returns how many ran.
    ///
    /// Callbacks posted while draining run on the next call.
    pub fn run_pending(&self) -> usize {
        let mut batch: Vec<Callback> = Vec::new();
        {
            let mut rx = self.rx.lock();
            while let Ok(cb) = rx.try_recv() {
                batch.push(cb);
            }
        }
        {
            let now = Instant::now();
            let mut delayed = self.delayed.lock();
            let mut i = 0;
            while i < delayed.len() {
                if delayed[i].due <= now {
                    batch.push(delayed.remove(i).callback);
                } else {
                    i += 1;
                }
            }
        }

        let ran = batch.len();
        for cb in batch {
            cb();
        }
        ran
    }
}

impl Dispatch for Mailbox {
    fn post(&self, callback: Callback) {
        // The receiver lives in `self`, so the send cannot fail.
        let _ = self.tx.send(callback);
    }
}

impl<D: Dispatch> Dispatch for Arc<D> {
    fn post(&self, callback: Callback) {
        (**self).post(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn inline_runs_immediately() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        Inline.post(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mailbox_runs_in_post_order_on_drain() {
        let mailbox = Mailbox::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            mailbox.post(Box::new(move || log.lock().push(i)));
        }
        assert!(log.lock().is_empty());

        assert_eq!(mailbox.run_pending(), 3);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert_eq!(mailbox.run_pending(), 0);
    }

    #[test]
    fn mailbox_holds_delayed_until_due() {
        let mailbox = Mailbox::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        mailbox.post_after(
            Duration::from_millis(30),
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(mailbox.run_pending(), 0);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(mailbox.run_pending(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tokio_dispatch_runs_off_task() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        TokioDispatch::current().post(Box::new(move || {
            let _ = tx.send(42);
        }));
        assert_eq!(rx.await.unwrap(), 42);
    }
}
