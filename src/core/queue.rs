//! # Trigger queue: strict FIFO serializer for state-machine operations.
//!
//! A [`TriggerQueue`] owns a piece of state `S` through a single worker task.
//! Operations are closures over `&mut S`; they run one at a time, to completion,
//! in submission order, no matter which task submitted them.
//!
//! ```text
//! enqueue(f1) ─┐
//! enqueue(f2) ─┼──► [unbounded mpsc] ──► worker: f1(&mut S).await; f2(&mut S).await; ...
//! enqueue(f3) ─┘                              │
//!                                             └──► oneshot ──► Pending<R>
//! ```
//!
//! ## Rules
//! - Submission order is fixed when `enqueue*` returns, not when the result is awaited.
//! - Entries never overlap, including asynchronous ones.
//! - After [`dispose`](TriggerQueue::dispose), queued and new entries are dropped and
//!   their [`Pending`] resolves to [`QueueClosed`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SupervisorError;

/// The queue was disposed before the entry ran.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("trigger queue closed")]
pub struct QueueClosed;

impl From<QueueClosed> for SupervisorError {
    fn from(_: QueueClosed) -> Self {
        SupervisorError::QueueClosed
    }
}

type Job<S> = Box<dyn for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send + 'static>;

fn job<S, F>(f: F) -> Job<S>
where
    F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send + 'static,
{
    Box::new(f)
}

struct Inner<S> {
    tx: mpsc::UnboundedSender<Job<S>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Job<S>>>>,
    token: CancellationToken,
}

/// FIFO serializer owning state `S`.
///
/// Cheap to clone; all clones feed the same worker.
pub struct TriggerQueue<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for TriggerQueue<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Send + 'static> TriggerQueue<S> {
    /// Creates an idle queue. Entries submitted before [`run`](TriggerQueue::run)
    /// are buffered.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                tx,
                rx: Mutex::new(Some(rx)),
                token: CancellationToken::new(),
            }),
        }
    }

    /// Spawns the worker that owns `state`.
    ///
    /// Returns `None` if the worker was already started. Must be called within a
    /// tokio runtime.
    pub fn run(&self, mut state: S) -> Option<JoinHandle<()>> {
        let mut rx = self.inner.rx.lock().take()?;
        let token = self.inner.token.clone();

        Some(tokio::spawn(async move {
            loop {
                let job = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    job = rx.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };
                job(&mut state).await;
            }
            rx.close();
            debug!("trigger queue worker stopped");
        }))
    }

    /// Submits an asynchronous entry.
    pub fn enqueue<R, F>(&self, f: F) -> Pending<R>
    where
        R: Send + 'static,
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, R> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(job(move |state| {
            let fut = f(state);
            Box::pin(async move {
                let _ = tx.send(fut.await);
            })
        }));
        Pending { rx }
    }

    /// Submits a synchronous entry.
    pub fn enqueue_sync<R, F>(&self, f: F) -> Pending<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(job(move |state| {
            let _ = tx.send(f(state));
            Box::pin(std::future::ready(()))
        }));
        Pending { rx }
    }

    fn submit(&self, job: Job<S>) {
        if self.inner.token.is_cancelled() {
            return;
        }
        // A failed send drops the job, which resolves its Pending as closed.
        let _ = self.inner.tx.send(job);
    }

    /// Stops the worker after the running entry (if any). Idempotent.
    pub fn dispose(&self) {
        self.inner.token.cancel();
    }

    /// Returns true once the queue was disposed.
    pub fn is_closed(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Token cancelled when the queue is disposed.
    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}

impl<S: Send + 'static> Default for TriggerQueue<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a queued entry.
///
/// Dropping it does not cancel the entry; the entry still runs in order.
#[must_use = "the entry runs regardless; await to observe its result"]
pub struct Pending<R> {
    rx: oneshot::Receiver<R>,
}

impl<R> Future for Pending<R> {
    type Output = Result<R, QueueClosed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|r| r.map_err(|_| QueueClosed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::time::Duration;

    #[tokio::test]
    async fn sync_entries_run_in_submission_order() {
        let queue = TriggerQueue::<Vec<u32>>::new();
        queue.run(Vec::new());

        for i in 0..5 {
            let _ = queue.enqueue_sync(move |log: &mut Vec<u32>| log.push(i));
        }
        let log = queue.enqueue_sync(|log: &mut Vec<u32>| log.clone()).await.unwrap();
        assert_eq!(log, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn async_entries_never_overlap() {
        let queue = TriggerQueue::<Vec<&'static str>>::new();
        queue.run(Vec::new());

        let mut handles = Vec::new();
        for delay in [30u64, 5, 15, 1] {
            let q = queue.clone();
            handles.push(tokio::spawn(async move {
                q.enqueue(move |log: &mut Vec<&'static str>| {
                    async move {
                        log.push("begin");
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        log.push("end");
                    }
                    .boxed()
                })
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let log = queue.enqueue_sync(|log: &mut Vec<&'static str>| log.clone()).await.unwrap();
        assert_eq!(log.len(), 8);
        for pair in log.chunks(2) {
            assert_eq!(pair, ["begin", "end"]);
        }
    }

    #[tokio::test]
    async fn entries_buffer_until_worker_starts() {
        let queue = TriggerQueue::<u32>::new();
        let pending = queue.enqueue_sync(|n: &mut u32| {
            *n += 1;
            *n
        });
        queue.run(41);
        assert_eq!(pending.await.unwrap(), 42);
        assert!(queue.run(0).is_none());
    }

    #[tokio::test]
    async fn disposed_queue_resolves_closed() {
        let queue = TriggerQueue::<()>::new();
        let worker = queue.run(()).unwrap();
        queue.dispose();
        queue.dispose();
        worker.await.unwrap();

        assert!(queue.is_closed());
        assert_eq!(queue.enqueue_sync(|_: &mut ()| 1).await, Err(QueueClosed));
    }
}
