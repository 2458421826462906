//! Supervision core: the state machine, its trigger queue and the OS process.
//!
//! The public API from this module is [`ProcessSupervisor`] (plus its builder and
//! the types its operations speak in). Internal modules:
//! - [`queue`]: strict FIFO serializer owning the machine state;
//! - `machine`: transition table and entry actions;
//! - `process`: spawning, output pumps, exit watcher, kill requests;
//! - `supervisor`: the caller-facing handle;
//! - `builder`: configuration and subscriber wiring.

mod builder;
mod machine;
mod process;
pub mod queue;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use machine::{transition, GuardInput, RunType, State, Trigger};
pub use process::{ProcessInfo, ProcessSpec};
pub use queue::{Pending, QueueClosed, TriggerQueue};
pub use supervisor::ProcessSupervisor;
