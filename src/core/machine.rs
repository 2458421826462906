//! # Process lifecycle state machine.
//!
//! Two layers:
//! - [`transition`]: the pure transition table, `(State, Trigger, GuardInput) → State`.
//! - [`Machine`]: the queue-owned state with entry actions (spawn, signal exit, kill).
//!
//! ## Transition table
//! ```text
//! NotStarted ─────────────── Start ──────────────► Running
//! StartFailed │ ExitedSuccessfully │
//! ExitedUnexpectedly │ ExitedKilled ── Start ────► Running
//!
//! Running ── Stop ─────────────────────────────────► Stopping
//! Running ── StartError ───────────────────────────► StartFailed
//! Running ── ProcessExit [SelfTerminating, code=0] ─► ExitedSuccessfully
//! Running ── ProcessExit [SelfTerminating, code≠0] ─► ExitedWithError
//! Running ── ProcessExit [NonTerminating] ──────────► ExitedUnexpectedly
//!
//! Stopping ── ProcessExit [¬killed, code=0] ────────► ExitedSuccessfully
//! Stopping ── ProcessExit [¬killed, code≠0] ────────► ExitedWithError
//! Stopping ── ProcessExit [killed] ─────────────────► ExitedKilled
//! ```
//!
//! `Stopping` guards do not look at the run type, so a stopped `SelfTerminating`
//! child always settles. `ExitedWithError` is terminal for `Start`.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::process::{self, ProcessHandle, ProcessInfo, ProcessSpec};
use super::queue::TriggerQueue;
use crate::channel::ChannelClient;
use crate::cooperative;
use crate::error::SupervisorError;
use crate::events::{Bus, Event, EventKind};

/// Lifecycle state of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Created, never started.
    NotStarted,
    /// Process spawned and considered live.
    Running,
    /// The OS refused to start the process.
    StartFailed,
    /// Stop requested; waiting for the process to exit.
    Stopping,
    /// Exited with code 0 (on its own, or after a graceful stop).
    ExitedSuccessfully,
    /// Exited with a non-zero code without being killed.
    ExitedWithError,
    /// A `NonTerminating` process exited while `Running`.
    ExitedUnexpectedly,
    /// Exited after forced termination.
    ExitedKilled,
}

impl State {
    /// Returns true for every state a process ends in.
    pub fn is_exited(self) -> bool {
        matches!(
            self,
            State::ExitedSuccessfully
                | State::ExitedWithError
                | State::ExitedUnexpectedly
                | State::ExitedKilled
        )
    }
}

/// Internal events consumed by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Spawn the process.
    Start,
    /// Spawning failed.
    StartError,
    /// Stop the process.
    Stop,
    /// The OS process terminated.
    ProcessExit,
}

/// Whether a process is expected to exit on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunType {
    /// Exit is a normal outcome.
    #[default]
    SelfTerminating,
    /// Runs until told to stop; any exit while `Running` is unexpected.
    NonTerminating,
}

/// Live facts the guards are evaluated against.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardInput {
    /// Run type of the supervised process.
    pub run_type: RunType,
    /// Forced termination was issued during the current stop.
    pub killed: bool,
    /// The process has terminated.
    pub has_exited: bool,
    /// Exit code, when known.
    pub exit_code: Option<i32>,
}

/// Returns the target state, or `None` when the trigger is not permitted.
pub fn transition(from: State, trigger: Trigger, g: &GuardInput) -> Option<State> {
    use State::*;

    match (from, trigger) {
        (NotStarted | StartFailed | ExitedSuccessfully | ExitedUnexpectedly | ExitedKilled, Trigger::Start) => {
            Some(Running)
        }
        (Running, Trigger::Stop) => Some(Stopping),
        (Running, Trigger::StartError) => Some(StartFailed),
        (Running, Trigger::ProcessExit) if g.has_exited => Some(match g.run_type {
            RunType::SelfTerminating if g.exit_code == Some(0) => ExitedSuccessfully,
            RunType::SelfTerminating => ExitedWithError,
            RunType::NonTerminating => ExitedUnexpectedly,
        }),
        (Stopping, Trigger::ProcessExit) if g.has_exited => Some(if g.killed {
            ExitedKilled
        } else if g.exit_code == Some(0) {
            ExitedSuccessfully
        } else {
            ExitedWithError
        }),
        _ => None,
    }
}

/// State shared read-only with the supervisor handle.
#[derive(Debug)]
pub(crate) struct Snapshot {
    pub(crate) state: RwLock<State>,
    pub(crate) last_start_error: Mutex<Option<Arc<io::Error>>>,
    pub(crate) process: RwLock<Option<ProcessInfo>>,
}

impl Snapshot {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(State::NotStarted),
            last_start_error: Mutex::new(None),
            process: RwLock::new(None),
        }
    }
}

/// What the caller of `stop` still has to do outside the queue.
pub(crate) enum StopPlan {
    /// Kill already issued.
    Done,
    /// Exit signal sent; wait for an exit state or escalate after `timeout`.
    Graceful {
        rx: broadcast::Receiver<Event>,
        timeout: Duration,
    },
}

/// Queue-owned lifecycle state. Only the queue worker touches it.
pub(crate) struct Machine {
    label: Arc<str>,
    spec: ProcessSpec,
    state: State,
    killed: bool,
    generation: u64,
    process: Option<ProcessHandle>,
    client: Arc<ChannelClient>,
    bus: Bus,
    queue: TriggerQueue<Machine>,
    shared: Arc<Snapshot>,
}

impl Machine {
    pub(crate) fn new(
        label: Arc<str>,
        spec: ProcessSpec,
        client: Arc<ChannelClient>,
        bus: Bus,
        queue: TriggerQueue<Machine>,
        shared: Arc<Snapshot>,
    ) -> Self {
        Self {
            label,
            spec,
            state: State::NotStarted,
            killed: false,
            generation: 0,
            process: None,
            client,
            bus,
            queue,
            shared,
        }
    }

    fn guard(&self, exit_code: Option<i32>) -> GuardInput {
        GuardInput {
            run_type: self.spec.run_type,
            killed: self.killed,
            has_exited: exit_code.is_some(),
            exit_code,
        }
    }

    fn fire(&mut self, trigger: Trigger, guard: &GuardInput) -> Result<State, SupervisorError> {
        let to = transition(self.state, trigger, guard).ok_or(SupervisorError::InvalidTransition {
            state: self.state,
            trigger,
        })?;
        info!(supervisor = %self.label, from = ?self.state, to = ?to, ?trigger, "state changed");
        self.state = to;
        *self.shared.state.write() = to;
        self.bus.publish(Event::state_changed(&self.label, to));
        Ok(to)
    }

    /// `Start`: spawn the process, falling back to `StartFailed` on spawn error.
    pub(crate) fn start(&mut self) -> Result<(), SupervisorError> {
        let guard = self.guard(None);
        self.fire(Trigger::Start, &guard)?;
        self.killed = false;
        *self.shared.last_start_error.lock() = None;

        self.generation += 1;
        let generation = self.generation;
        let queue = self.queue.clone();
        let spawned = process::spawn(
            &self.spec,
            Arc::clone(&self.label),
            self.bus.clone(),
            move |code| {
                let _ = queue.enqueue_sync(move |m: &mut Machine| m.on_process_exit(generation, code));
            },
        );

        match spawned {
            Ok(handle) => {
                let pid = handle.pid();
                *self.shared.process.write() = Some(ProcessInfo {
                    pid,
                    exit_code: None,
                });
                self.process = Some(handle);
                self.bus.publish(
                    Event::new(EventKind::ProcessSpawned)
                        .with_supervisor(Arc::clone(&self.label))
                        .with_pid(pid),
                );
            }
            Err(err) => self.on_start_error(Arc::new(err))?,
        }
        Ok(())
    }

    /// `StartError`: record the cause and drop the process handle.
    fn on_start_error(&mut self, err: Arc<io::Error>) -> Result<(), SupervisorError> {
        warn!(supervisor = %self.label, error = %err, "failed to start process");
        let guard = self.guard(None);
        self.fire(Trigger::StartError, &guard)?;
        *self.shared.last_start_error.lock() = Some(err);
        self.process = None;
        *self.shared.process.write() = None;
        Ok(())
    }

    /// `Stop`: kill now, or signal exit and let the caller wait up to `timeout`.
    pub(crate) fn stop(&mut self, timeout: Option<Duration>) -> Result<StopPlan, SupervisorError> {
        let guard = self.guard(None);
        self.fire(Trigger::Stop, &guard)?;

        let Some(timeout) = timeout.filter(|t| !t.is_zero()) else {
            self.force_kill();
            return Ok(StopPlan::Done);
        };

        let rx = self.bus.subscribe();
        let client = Arc::clone(&self.client);
        let bus = self.bus.clone();
        let label = Arc::clone(&self.label);
        tokio::spawn(async move {
            let ev = match cooperative::signal_exit(&client).await {
                Ok(ack) => Event::new(EventKind::ExitSignalSent).with_reason(ack),
                Err(err) => {
                    warn!(supervisor = %label, error = %err, "exit signal not delivered");
                    Event::new(EventKind::ExitSignalFailed).with_reason(err.to_string())
                }
            };
            bus.publish(ev.with_supervisor(label));
        });
        Ok(StopPlan::Graceful { rx, timeout })
    }

    /// Graceful window elapsed: kill if the process is still stopping.
    pub(crate) fn escalate(&mut self) {
        if self.state == State::Stopping {
            debug!(supervisor = %self.label, "graceful stop timed out");
            self.force_kill();
        }
    }

    fn force_kill(&mut self) {
        self.killed = true;
        let Some(process) = &self.process else {
            return;
        };
        self.bus.publish(
            Event::new(EventKind::KillIssued)
                .with_supervisor(Arc::clone(&self.label))
                .with_pid(process.pid()),
        );
        if !process.kill() {
            warn!(supervisor = %self.label, pid = process.pid(), "kill ignored; process already gone");
        }
    }

    /// `ProcessExit` reported by the watcher of spawn number `generation`.
    fn on_process_exit(&mut self, generation: u64, code: i32) {
        if generation != self.generation {
            debug!(supervisor = %self.label, generation, "ignoring exit of a previous process");
            return;
        }
        if let Some(info) = self.shared.process.write().as_mut() {
            info.exit_code = Some(code);
        }
        let guard = self.guard(Some(code));
        if let Err(err) = self.fire(Trigger::ProcessExit, &guard) {
            warn!(supervisor = %self.label, exit_code = code, error = %err, "process exit not handled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited(run_type: RunType, killed: bool, code: i32) -> GuardInput {
        GuardInput {
            run_type,
            killed,
            has_exited: true,
            exit_code: Some(code),
        }
    }

    #[test]
    fn start_is_permitted_from_restartable_states() {
        let g = GuardInput::default();
        for from in [
            State::NotStarted,
            State::StartFailed,
            State::ExitedSuccessfully,
            State::ExitedUnexpectedly,
            State::ExitedKilled,
        ] {
            assert_eq!(transition(from, Trigger::Start, &g), Some(State::Running), "{from:?}");
        }
        for from in [State::Running, State::Stopping, State::ExitedWithError] {
            assert_eq!(transition(from, Trigger::Start, &g), None, "{from:?}");
        }
    }

    #[test]
    fn running_exit_depends_on_run_type() {
        use RunType::*;
        let t = |g| transition(State::Running, Trigger::ProcessExit, &g);
        assert_eq!(t(exited(SelfTerminating, false, 0)), Some(State::ExitedSuccessfully));
        assert_eq!(t(exited(SelfTerminating, false, 2)), Some(State::ExitedWithError));
        assert_eq!(t(exited(NonTerminating, false, 0)), Some(State::ExitedUnexpectedly));
        assert_eq!(t(exited(NonTerminating, false, -1)), Some(State::ExitedUnexpectedly));
        assert_eq!(t(GuardInput::default()), None);
    }

    #[test]
    fn stopping_exit_covers_every_combination() {
        for run_type in [RunType::SelfTerminating, RunType::NonTerminating] {
            let t = |killed, code| {
                transition(State::Stopping, Trigger::ProcessExit, &exited(run_type, killed, code))
            };
            assert_eq!(t(false, 0), Some(State::ExitedSuccessfully));
            assert_eq!(t(false, 1), Some(State::ExitedWithError));
            assert_eq!(t(true, -1), Some(State::ExitedKilled));
            assert_eq!(t(true, 0), Some(State::ExitedKilled));
        }
    }

    #[test]
    fn stop_and_start_error_only_from_running() {
        let g = GuardInput::default();
        assert_eq!(transition(State::Running, Trigger::Stop, &g), Some(State::Stopping));
        assert_eq!(transition(State::Running, Trigger::StartError, &g), Some(State::StartFailed));
        assert_eq!(transition(State::NotStarted, Trigger::Stop, &g), None);
        assert_eq!(transition(State::Stopping, Trigger::Stop, &g), None);
        assert_eq!(transition(State::ExitedKilled, Trigger::ProcessExit, &exited(RunType::NonTerminating, true, 0)), None);
    }

    #[test]
    fn exited_states_are_classified() {
        assert!(State::ExitedKilled.is_exited());
        assert!(!State::Stopping.is_exited());
        assert!(!State::StartFailed.is_exited());
    }
}
