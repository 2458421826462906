use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use super::process::ProcessSpec;
use super::supervisor::ProcessSupervisor;
use crate::{
    channel::ChannelClient,
    config::Config,
    events::{Bus, Event},
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for constructing a [`ProcessSupervisor`] with optional features.
pub struct SupervisorBuilder {
    spec: ProcessSpec,
    client: Arc<ChannelClient>,
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SupervisorBuilder {
    /// Creates a builder for `spec`, reaching the child through `client`.
    pub fn new(spec: ProcessSpec, client: Arc<ChannelClient>) -> Self {
        Self {
            spec,
            client,
            cfg: Config::default(),
            subscribers: Vec::new(),
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, cfg: Config) -> Self {
        self.cfg = cfg;
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive supervisor events (state changes, output lines, stop
    /// protocol) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the supervisor and starts its trigger queue.
    ///
    /// Must be called within a tokio runtime.
    pub fn build(self) -> ProcessSupervisor {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());

        let sup = ProcessSupervisor::new_internal(self.spec, self.client, self.cfg, bus.clone());
        if !self.subscribers.is_empty() {
            let set = SubscriberSet::new(self.subscribers, bus.clone());
            tokio::spawn(subscriber_listener(bus.subscribe(), set, sup.closed_token()));
        }
        sup
    }
}

/// Forwards bus events to the subscriber set until the supervisor is disposed.
async fn subscriber_listener(
    mut rx: broadcast::Receiver<Event>,
    set: SubscriberSet,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            ev = rx.recv() => match ev {
                Ok(ev) => set.emit(&ev),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        }
    }
    while let Ok(ev) = rx.try_recv() {
        set.emit(&ev);
    }
    set.shutdown().await;
}
