//! # procbus
//!
//! **Procbus** supervises an external child process for the lifetime of a host
//! application and keeps a small loopback message channel between the two, so
//! they can exchange typed events ("please exit", scene/episode data) without
//! relying on OS signals alone.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                host process                                    child process
//! ┌─────────────────────────────────────────────┐        ┌──────────────────────────────┐
//! │ HostManager                                 │        │ PeerEndpoint                 │
//! │  ├─ ChannelServer (host port) ◄─────────────┼────────┼── ChannelClient              │
//! │  └─ ProcessSupervisor  (one per child)      │        │                              │
//! │      ├─ ChannelClient ──────────────────────┼───────►│  ChannelServer (child port)  │
//! │      ├─ TriggerQueue ─► Machine (state)     │        │   └─ Exit ─► on_shutdown()   │
//! │      │     └─ spawn / kill ─────────────────┼───────►│                              │
//! │      └─ Bus ─► SubscriberSet ─► subscribers │        │  PeerWatchdog (host pid)     │
//! └─────────────────────────────────────────────┘        │   └─ gone ─► on_parent_exit()│
//!                                                        └──────────────────────────────┘
//! ```
//!
//! ### Lifecycle
//! ```text
//! NotStarted ──Start──► Running ──Stop──► Stopping ──ProcessExit──► ExitedSuccessfully
//!                         │                                      ├─► ExitedWithError
//!                         ├──StartError──► StartFailed           └─► ExitedKilled
//!                         └──ProcessExit──► ExitedSuccessfully | ExitedWithError | ExitedUnexpectedly
//!
//! stop(timeout):
//!   ├─ none/zero ─► killed = true, kill
//!   └─ positive  ─► send *[Exit]* to the child
//!                   ├─ ExitedSuccessfully / ExitedWithError within timeout ─► done
//!                   └─ timeout ─► killed = true, kill ─► ExitedKilled
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / functions                        |
//! |-------------------|---------------------------------------------------------------|----------------------------------------------|
//! | **Supervision**   | Spawn, stop and observe one child through a state machine.    | [`ProcessSupervisor`], [`State`]             |
//! | **Channel**       | Loopback request/response messaging with per-event dispatch.  | [`ChannelServer`], [`ChannelClient`]         |
//! | **Shutdown**      | Cooperative exit signal layered on the channel.               | [`cooperative::listen`], [`cooperative::signal_exit`] |
//! | **Watchdog**      | Exactly-once notification when a pid terminates.             | [`PeerWatchdog`]                             |
//! | **Dispatch**      | Where inbound handlers run.                                   | [`Dispatch`], [`Mailbox`]                    |
//! | **Subscriber API**| Hook into supervisor events.                                  | [`Subscribe`], [`Event`]                     |
//! | **Wiring**        | Host manager, child endpoint, launch parameters.              | [`HostManager`], [`PeerEndpoint`], [`LaunchParams`] |
//! | **Configuration** | Centralized settings.                                         | [`Config`]                                   |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use procbus::{Config, HostManager, Inline, ProcessSpec, RunType, State};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = HostManager::bind(0, Arc::new(Inline), Config::default()).await?;
//!
//!     let spec = ProcessSpec::new("./worker").run_type(RunType::NonTerminating);
//!     let worker = host.supervise(spec)?;
//!
//!     let done = worker.when_state_is(State::ExitedSuccessfully, None);
//!     worker.start().await?;
//!     worker.stop(Some(Duration::from_secs(3))).await?;
//!     done.await?;
//!
//!     host.dispose().await;
//!     Ok(())
//! }
//! ```
mod channel;
mod config;
mod core;
mod dispatch;
mod error;
mod events;
mod host;
mod launch;
mod peer;
mod ports;
mod subscribers;
mod watchdog;

pub mod cooperative;

// ---- Public re-exports ----

pub use channel::{codec, ChannelClient, ChannelPair, ChannelServer, Envelope, EventType, Handler};
pub use config::Config;
pub use core::{
    queue, transition, GuardInput, Pending, ProcessInfo, ProcessSpec, ProcessSupervisor, QueueClosed,
    RunType, State, SupervisorBuilder, Trigger, TriggerQueue,
};
pub use dispatch::{Callback, Dispatch, Inline, Mailbox, TokioDispatch};
pub use error::{ChannelError, CodecError, HostError, LaunchError, SupervisorError, WaitError};
pub use events::{Bus, Event, EventKind};
pub use host::HostManager;
pub use launch::{LaunchParams, CHILD_PORT, PARENT_PROCESS_PID, PARENT_PROCESS_PORT};
pub use peer::PeerEndpoint;
pub use ports::free_port;
pub use subscribers::{Subscribe, SubscriberSet};
pub use watchdog::{PeerStatus, PeerWatchdog, ProcessProbe, SysinfoProbe};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
