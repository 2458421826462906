//! # Example: peer
//!
//! The child half of the `host` example. Reads its launch parameters from the
//! command line, greets the host, streams a few training samples and exits
//! with code 0 when the host sends *[Exit]* (or when the host process dies).
//!
//! Not meant to be run directly; `cargo run --example host` launches it.

use std::sync::Arc;
use std::time::Duration;

use procbus::{Config, EventType, LaunchParams, PeerEndpoint, TokioDispatch};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct Greeting<'a> {
    scene: &'a str,
    episode: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let params = LaunchParams::from_env()?;
    let done = CancellationToken::new();

    let on_exit = done.clone();
    let on_parent_gone = done.clone();
    let peer = PeerEndpoint::connect(
        params,
        Arc::new(TokioDispatch::current()),
        &Config::default(),
        move |pid| {
            eprintln!("[peer] host {pid} is gone");
            on_parent_gone.cancel();
        },
        move || on_exit.cancel(),
    )
    .await?;

    peer.client()
        .send_json(&Greeting { scene: "arena", episode: 1 }, &EventType::SCENE_START)
        .await?;

    let mut tick = tokio::time::interval(Duration::from_millis(200));
    let mut step = 0u32;
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = tick.tick() => {
                step += 1;
                let sample = format!("{{\"step\":{step}}}");
                if let Err(err) = peer.client().send(sample, &EventType::TRAINING_DATA).await {
                    eprintln!("[peer] send failed: {err}");
                }
            }
        }
    }

    println!("[peer] exiting after {step} steps");
    peer.dispose();
    Ok(())
}
