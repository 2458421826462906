//! # Channel server: loopback listener, envelope decoding and per-event dispatch.
//!
//! ## Architecture
//! ```text
//! TcpListener(127.0.0.1:port)
//!   └─► accept loop (re-arms immediately) ──► connection task (hyper http1)
//!                                                 │
//!          POST body ──► codec::decode ──► ack "received" (200) / error (404)
//!                              │
//!                              └─► Dispatch::post(callback)
//!                                        ├─► global handler (if any)
//!                                        ├─► typed subscriptions (serde_json, drop on mismatch)
//!                                        └─► registry[event_type] (if any)
//! ```
//!
//! ## Rules
//! - The acknowledgement does not depend on whether dispatch succeeds.
//! - Only one handler per event type is retained; registering replaces (last write wins).
//! - Handlers run wherever the configured [`Dispatch`] runs them.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::{self, Envelope, EventType};
use crate::dispatch::{Dispatch, Inline};
use crate::error::ChannelError;
use crate::subscribers::panic_message;

/// Handler invoked with every decoded envelope it is registered for.
pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync + 'static>;

/// Handler tables shared between the server handle and its connection tasks.
#[derive(Default)]
struct Registry {
    global: RwLock<Option<Handler>>,
    typed: RwLock<Vec<Handler>>,
    by_event: RwLock<HashMap<EventType, Handler>>,
    dropped: AtomicU64,
}

impl Registry {
    /// Runs the global handler, typed subscriptions, then the per-event handler.
    ///
    /// A panicking handler is logged and skipped; the rest still run.
    fn deliver(&self, envelope: &Envelope) {
        let global = self.global.read().clone();
        if let Some(handler) = global {
            invoke("global", &handler, envelope);
        }

        let typed = self.typed.read().clone();
        for handler in typed {
            invoke("typed", &handler, envelope);
        }

        let specific = self.by_event.read().get(&envelope.event_type).cloned();
        if let Some(handler) = specific {
            invoke("per-event", &handler, envelope);
        }
    }
}

fn invoke(slot: &'static str, handler: &Handler, envelope: &Envelope) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
        warn!(
            slot,
            event_type = %envelope.event_type,
            reason = %panic_message(&*payload),
            "message handler panicked"
        );
    }
}

struct Shared {
    registry: Registry,
    dispatch: Arc<dyn Dispatch>,
    ack: Bytes,
}

/// Loopback message server.
///
/// Dropping the server stops the accept loop; [`dispose`](ChannelServer::dispose)
/// does the same explicitly and may be called any number of times.
pub struct ChannelServer {
    port: u16,
    shared: Arc<Shared>,
    token: CancellationToken,
}

impl ChannelServer {
    /// Binds `127.0.0.1:port` (`0` = any free port) with inline dispatch and the default ack.
    pub async fn bind(port: u16) -> Result<Self, ChannelError> {
        Self::bind_with(port, Arc::new(Inline), "received").await
    }

    /// Binds `127.0.0.1:port` dispatching handlers through `dispatch`.
    ///
    /// Must be called within a tokio runtime; the accept loop runs on it.
    pub async fn bind_with(
        port: u16,
        dispatch: Arc<dyn Dispatch>,
        ack: impl Into<String>,
    ) -> Result<Self, ChannelError> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
            .await
            .map_err(ChannelError::Bind)?;
        let port = listener.local_addr().map_err(ChannelError::Bind)?.port();

        let shared = Arc::new(Shared {
            registry: Registry::default(),
            dispatch,
            ack: Bytes::from(ack.into()),
        });
        let token = CancellationToken::new();

        tokio::spawn(accept_loop(listener, Arc::clone(&shared), token.clone()));
        info!(port, "channel server listening");

        Ok(Self {
            port,
            shared,
            token,
        })
    }

    /// Port the server is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `http://localhost:<port>/`
    pub fn address(&self) -> String {
        format!("http://localhost:{}/", self.port)
    }

    /// Sets the single receive-everything handler (replaces any previous one).
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        *self.shared.registry.global.write() = Some(Arc::new(handler));
    }

    /// Clears the receive-everything handler.
    pub fn clear_on_message(&self) {
        *self.shared.registry.global.write() = None;
    }

    /// Subscribes to every message whose payload decodes as `T`.
    ///
    /// Payloads that do not match `T` are dropped for this subscription: `action`
    /// is not called, the drop is logged and counted in
    /// [`dropped_payloads`](ChannelServer::dropped_payloads). Annotate `T` with
    /// `#[serde(deny_unknown_fields)]` to reject extra members as well.
    pub fn on<T, F>(&self, action: F)
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let shared = Arc::downgrade(&self.shared);
        let handler: Handler = Arc::new(move |envelope: &Envelope| {
            match serde_json::from_slice::<T>(&envelope.payload) {
                Ok(value) => action(value),
                Err(err) => {
                    if let Some(shared) = shared.upgrade() {
                        shared.registry.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    warn!(
                        event_type = %envelope.event_type,
                        target = std::any::type_name::<T>(),
                        error = %err,
                        "payload does not match subscription schema; dropped"
                    );
                }
            }
        });
        self.shared.registry.typed.write().push(handler);
    }

    /// Registers the handler for `event_type`, replacing any existing one.
    pub fn add_listener<F>(&self, event_type: EventType, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.shared
            .registry
            .by_event
            .write()
            .insert(event_type, Arc::new(handler));
    }

    /// Removes the handler for `event_type`, if any.
    pub fn remove_listener(&self, event_type: &EventType) {
        self.shared.registry.by_event.write().remove(event_type);
    }

    /// Registers `handler` for `event_type` and returns a slot that can later remove
    /// exactly this registration, even if the server handle has moved.
    pub(crate) fn register(&self, event_type: EventType, handler: Handler) -> ListenerSlot {
        self.shared
            .registry
            .by_event
            .write()
            .insert(event_type.clone(), Arc::clone(&handler));
        ListenerSlot {
            shared: Arc::downgrade(&self.shared),
            event_type,
            handler,
        }
    }

    /// Returns true if a handler is registered for `event_type`.
    pub fn has_listener(&self, event_type: &EventType) -> bool {
        self.shared.registry.by_event.read().contains_key(event_type)
    }

    /// Number of payloads dropped by typed subscriptions because of a schema mismatch.
    pub fn dropped_payloads(&self) -> u64 {
        self.shared.registry.dropped.load(Ordering::Relaxed)
    }

    /// Stops accepting connections. Idempotent.
    pub fn dispose(&self) {
        if !self.token.is_cancelled() {
            info!(port = self.port, "channel server stopped");
        }
        self.token.cancel();
    }
}

impl Drop for ChannelServer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// A single registration made through [`ChannelServer::register`].
pub(crate) struct ListenerSlot {
    shared: Weak<Shared>,
    event_type: EventType,
    handler: Handler,
}

impl ListenerSlot {
    /// Removes the registration if it is still the active handler for its tag.
    ///
    /// A later registration for the same tag replaced this one and is left alone.
    pub(crate) fn remove(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut by_event = shared.registry.by_event.write();
        if by_event
            .get(&self.event_type)
            .is_some_and(|current| Arc::ptr_eq(current, &self.handler))
        {
            by_event.remove(&self.event_type);
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, token: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, remote) = match accepted {
            Ok(conn) => conn,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };

        let shared = Arc::clone(&shared);
        let token = token.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let shared = Arc::clone(&shared);
                async move { Ok::<_, Infallible>(handle_request(req, &shared).await) }
            });
            let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
            tokio::select! {
                _ = token.cancelled() => {}
                res = conn => {
                    if let Err(err) = res {
                        warn!(%remote, error = %err, "failed to write acknowledgement");
                    }
                }
            }
        });
    }
}

async fn handle_request(req: Request<Incoming>, shared: &Arc<Shared>) -> Response<Full<Bytes>> {
    if req.method() != Method::POST {
        return reply(StatusCode::NOT_FOUND, Bytes::from_static(b"expected a POST request"));
    }

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!(error = %err, "failed to read request body");
            return reply(StatusCode::NOT_FOUND, Bytes::from(format!("read error: {err}")));
        }
    };

    let envelope = match codec::decode(body) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, "malformed envelope");
            return reply(StatusCode::NOT_FOUND, Bytes::from(format!("decode error: {err}")));
        }
    };

    debug!(
        event_type = %envelope.event_type,
        len = envelope.payload.len(),
        "message received"
    );

    let target = Arc::clone(shared);
    shared
        .dispatch
        .post(Box::new(move || target.registry.deliver(&envelope)));

    reply(StatusCode::OK, shared.ack.clone())
}

fn reply(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}
