//! # ProcessSupervisor: one managed child, one state machine, one trigger queue.
//!
//! ## Architecture
//! ```text
//! caller tasks                      TriggerQueue<Machine> (single worker)
//!   start() ───────► enqueue ─────►  Machine::start ──► process::spawn ──► watcher
//!   stop(t) ───────► enqueue ─────►  Machine::stop  ──► kill | signal_exit
//!      │                                                               │
//!      └── graceful wait on Bus ── timeout ──► enqueue escalate        │
//!                                                                      │
//!   watcher: child exited ──────────► enqueue on_process_exit ◄────────┘
//!
//! Machine ── StateChanged / ProcessSpawned / KillIssued ──► Bus ──► when_state_is waiters
//!                                                              └──► subscribers
//! ```
//!
//! ## Rules
//! - Every mutation goes through the queue; nothing else writes the state.
//! - `start`, `stop` and `when_state_is` register their work when called; the
//!   returned futures only observe the outcome.
//! - Only the queue worker issues kill requests, including the timeout escalation.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use procbus::{ChannelClient, ProcessSpec, ProcessSupervisor, RunType, State};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(ChannelClient::new(47001)?);
//! let spec = ProcessSpec::new("./worker").run_type(RunType::NonTerminating);
//! let sup = ProcessSupervisor::new(spec, client);
//!
//! let killed = sup.when_state_is(State::ExitedKilled, None);
//! sup.start().await?;
//! sup.stop(Some(Duration::from_secs(2))).await?;
//! killed.await?;
//! sup.dispose();
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::builder::SupervisorBuilder;
use super::machine::{Machine, Snapshot, State, StopPlan};
use super::process::{ProcessInfo, ProcessSpec};
use super::queue::TriggerQueue;
use crate::channel::ChannelClient;
use crate::config::Config;
use crate::error::{SupervisorError, WaitError};
use crate::events::{Bus, Event};

/// Supervises one external process through its lifecycle states.
pub struct ProcessSupervisor {
    label: Arc<str>,
    queue: TriggerQueue<Machine>,
    bus: Bus,
    client: Arc<ChannelClient>,
    shared: Arc<Snapshot>,
    cfg: Config,
}

impl ProcessSupervisor {
    /// Creates a supervisor with default configuration and no subscribers.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(spec: ProcessSpec, client: Arc<ChannelClient>) -> Self {
        SupervisorBuilder::new(spec, client).build()
    }

    /// Returns a builder for configuration and subscribers.
    pub fn builder(spec: ProcessSpec, client: Arc<ChannelClient>) -> SupervisorBuilder {
        SupervisorBuilder::new(spec, client)
    }

    pub(crate) fn new_internal(
        spec: ProcessSpec,
        client: Arc<ChannelClient>,
        cfg: Config,
        bus: Bus,
    ) -> Self {
        let label: Arc<str> = Arc::from(spec.label());
        let shared = Arc::new(Snapshot::new());
        let queue = TriggerQueue::new();
        let machine = Machine::new(
            Arc::clone(&label),
            spec,
            Arc::clone(&client),
            bus.clone(),
            queue.clone(),
            Arc::clone(&shared),
        );
        queue.run(machine);

        Self {
            label,
            queue,
            bus,
            client,
            shared,
            cfg,
        }
    }

    /// Label derived from the program's file stem.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Enqueues `Start`.
    ///
    /// Resolves once the trigger was consumed. A spawn failure is not an error
    /// here: the state becomes `StartFailed` and the cause is kept in
    /// [`last_start_error`](ProcessSupervisor::last_start_error).
    pub fn start(&self) -> impl Future<Output = Result<(), SupervisorError>> + Send + 'static {
        let pending = self.queue.enqueue_sync(|m: &mut Machine| m.start());
        async move { pending.await? }
    }

    /// Enqueues `Stop`.
    ///
    /// With no timeout (or zero) the process is killed right away. Otherwise the
    /// partner is asked to exit and gets `timeout` to reach `ExitedSuccessfully`
    /// or `ExitedWithError` before it is killed. Resolves when that protocol is done;
    /// the final exit state is reported separately.
    pub fn stop(
        &self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<(), SupervisorError>> + Send + 'static {
        let pending = self.queue.enqueue_sync(move |m: &mut Machine| m.stop(timeout));
        let queue = self.queue.clone();
        let shared = Arc::clone(&self.shared);

        async move {
            let StopPlan::Graceful { rx, timeout } = pending.await?? else {
                return Ok::<(), SupervisorError>(());
            };
            let exited = wait_for(rx, &shared, |s| {
                matches!(s, State::ExitedSuccessfully | State::ExitedWithError)
            });
            if tokio::time::timeout(timeout, exited).await.is_err() {
                queue.enqueue_sync(|m: &mut Machine| m.escalate()).await?;
            }
            Ok(())
        }
    }

    /// [`stop`](ProcessSupervisor::stop) with the configured default timeout.
    pub fn stop_default(&self) -> impl Future<Output = Result<(), SupervisorError>> + Send + 'static {
        self.stop(self.cfg.stop_timeout())
    }

    /// Resolves the next time the state transitions to `target`.
    ///
    /// The subscription is taken when this is called. Cancelling `cancel` resolves
    /// with [`WaitError::Canceled`] and leaves the supervisor untouched.
    pub fn when_state_is(
        &self,
        target: State,
        cancel: Option<CancellationToken>,
    ) -> impl Future<Output = Result<(), WaitError>> + Send + 'static {
        let rx = self.bus.subscribe();
        let shared = Arc::clone(&self.shared);
        let closed = self.queue.closed_token();

        async move {
            let cancel = cancel.unwrap_or_default();
            tokio::select! {
                _ = cancel.cancelled() => Err(WaitError::Canceled),
                _ = closed.cancelled() => Err(WaitError::Closed),
                res = wait_for(rx, &shared, |s| s == target) => res,
            }
        }
    }

    /// Resolves the next time the state becomes any exited state.
    pub(crate) fn when_exited(&self) -> impl Future<Output = Result<(), WaitError>> + Send + 'static {
        let rx = self.bus.subscribe();
        let shared = Arc::clone(&self.shared);
        let closed = self.queue.closed_token();

        async move {
            tokio::select! {
                _ = closed.cancelled() => Err(WaitError::Closed),
                res = wait_for(rx, &shared, |s| s.is_exited()) => res,
            }
        }
    }

    /// State at the time of the call.
    pub fn current_state(&self) -> State {
        *self.shared.state.read()
    }

    /// Cause of the most recent spawn failure, if any.
    pub fn last_start_error(&self) -> Option<Arc<io::Error>> {
        self.shared.last_start_error.lock().clone()
    }

    /// Pid and exit code of the current process, while one is known.
    pub fn process_info(&self) -> Option<ProcessInfo> {
        *self.shared.process.read()
    }

    /// Raw receiver for this supervisor's events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Client used to reach the supervised process.
    pub fn client(&self) -> &Arc<ChannelClient> {
        &self.client
    }

    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.queue.closed_token()
    }

    /// Closes the trigger queue and the channel client. Idempotent.
    ///
    /// Does not kill a running process; stop it first.
    pub fn dispose(&self) {
        if !self.queue.is_closed() {
            info!(supervisor = %self.label, state = ?self.current_state(), "supervisor disposed");
        }
        self.queue.dispose();
        self.client.dispose();
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.queue.dispose();
    }
}

/// Waits for a `StateChanged` event whose state satisfies `pred`.
///
/// After lagging, the current snapshot is checked instead of the skipped events.
async fn wait_for<P>(
    mut rx: broadcast::Receiver<Event>,
    shared: &Snapshot,
    pred: P,
) -> Result<(), WaitError>
where
    P: Fn(State) -> bool,
{
    loop {
        match rx.recv().await {
            Ok(ev) => {
                if ev.state.is_some_and(|s| ev.is_state(s) && pred(s)) {
                    return Ok(());
                }
            }
            Err(RecvError::Lagged(_)) => {
                if pred(*shared.state.read()) {
                    return Ok(());
                }
            }
            Err(RecvError::Closed) => return Err(WaitError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Trigger;

    fn supervisor(spec: ProcessSpec) -> ProcessSupervisor {
        let client = Arc::new(ChannelClient::new(9).unwrap());
        ProcessSupervisor::new(spec, client)
    }

    #[tokio::test]
    async fn stop_before_start_is_rejected() {
        let sup = supervisor(ProcessSpec::new("sleep"));
        let err = sup.stop(None).await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::InvalidTransition {
                state: State::NotStarted,
                trigger: Trigger::Stop,
            }
        ));
        assert_eq!(sup.current_state(), State::NotStarted);
    }

    #[tokio::test]
    async fn spawn_failure_ends_in_start_failed() {
        let sup = supervisor(ProcessSpec::new("/definitely/not/a/program"));
        let failed = sup.when_state_is(State::StartFailed, None);

        sup.start().await.unwrap();
        failed.await.unwrap();
        assert_eq!(sup.current_state(), State::StartFailed);
        assert!(sup.last_start_error().is_some());
        assert!(sup.process_info().is_none());
    }

    #[tokio::test]
    async fn cancelled_wait_leaves_state_alone() {
        let sup = supervisor(ProcessSpec::new("sleep"));
        let token = CancellationToken::new();
        let wait = sup.when_state_is(State::Running, Some(token.clone()));

        token.cancel();
        assert_eq!(wait.await, Err(WaitError::Canceled));
        assert_eq!(sup.current_state(), State::NotStarted);
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_closes_waiters() {
        let sup = supervisor(ProcessSpec::new("sleep"));
        let wait = sup.when_state_is(State::Running, None);

        sup.dispose();
        sup.dispose();
        assert_eq!(wait.await, Err(WaitError::Closed));
        assert!(sup.client().is_disposed());
        assert!(matches!(sup.start().await, Err(SupervisorError::QueueClosed)));
    }

    #[tokio::test]
    async fn label_comes_from_file_stem() {
        let sup = supervisor(ProcessSpec::new("/opt/bin/trainer.sh"));
        assert_eq!(sup.label(), "trainer");
    }
}
