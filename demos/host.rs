//! # Example: host
//!
//! Launches the `peer` example as a supervised child, waits for its greeting
//! over the channel, then asks it to exit cooperatively.
//!
//! ## Flow
//! ```text
//! HostManager::bind()
//!     ├─► supervise(peer)       ── appends ParentProcessPort / ParentProcessPid / ChildPort
//!     ├─► start()               ── Running
//!     ├─► ◄── SceneStart {...}  ── peer greets the host
//!     ├─► stop(3s)              ── Exit sent, Stopping
//!     └─► ExitedSuccessfully    ── peer returned 0
//! ```
//!
//! ## Run
//! ```bash
//! cargo build --example peer
//! RUST_LOG=procbus=debug cargo run --example host
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use procbus::{Config, EventType, HostManager, ProcessSpec, RunType, State, TokioDispatch};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct Greeting {
    scene: String,
    episode: u32,
}

fn peer_binary() -> std::io::Result<PathBuf> {
    if let Some(path) = std::env::args().nth(1) {
        return Ok(PathBuf::from(path));
    }
    Ok(std::env::current_exe()?.with_file_name("peer"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config {
        stop_timeout: Duration::from_secs(3),
        ..Config::default()
    };
    let host = HostManager::bind(0, Arc::new(TokioDispatch::current()), cfg).await?;

    let (greeted_tx, mut greeted_rx) = tokio::sync::mpsc::unbounded_channel();
    host.server().add_listener(EventType::SCENE_START, move |env| {
        match serde_json::from_slice::<Greeting>(&env.payload) {
            Ok(g) => println!("[host] peer entered scene {:?} (episode {})", g.scene, g.episode),
            Err(err) => println!("[host] unreadable greeting: {err}"),
        }
        let _ = greeted_tx.send(());
    });
    host.server().add_listener(EventType::TRAINING_DATA, |env| {
        println!("[host] training data: {}", String::from_utf8_lossy(&env.payload));
    });

    let spec = ProcessSpec::new(peer_binary()?).run_type(RunType::NonTerminating);
    let peer = host.supervise(spec)?;

    let done = peer.when_state_is(State::ExitedSuccessfully, None);
    peer.start().await?;
    println!("[host] peer state: {:?}", peer.current_state());

    tokio::time::timeout(Duration::from_secs(10), greeted_rx.recv()).await?;

    peer.stop_default().await?;
    tokio::time::timeout(Duration::from_secs(5), done).await??;
    println!("[host] peer state: {:?}", peer.current_state());

    host.dispose().await;
    Ok(())
}
