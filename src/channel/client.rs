//! # Channel client: sends envelopes to a partner's server.
//!
//! A client is bound to one partner port for its whole lifetime. Each send is one
//! HTTP POST round trip to `http://localhost:<port>/`; the partner's
//! acknowledgement body is returned as-is. Failures are not retried here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hyper::body::Bytes;
use serde::Serialize;
use tracing::debug;

use super::codec::{self, EventType};
use crate::error::ChannelError;

/// Loopback message client.
#[derive(Debug)]
pub struct ChannelClient {
    partner_port: u16,
    http: reqwest::Client,
    closed: AtomicBool,
}

impl ChannelClient {
    /// Creates a client for `partner_port` without a transport timeout.
    pub fn new(partner_port: u16) -> Result<Self, ChannelError> {
        Self::with_timeout(partner_port, None)
    }

    /// Creates a client for `partner_port` whose round trips give up after `timeout`.
    pub fn with_timeout(partner_port: u16, timeout: Option<Duration>) -> Result<Self, ChannelError> {
        let mut builder = reqwest::Client::builder().no_proxy();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            partner_port,
            http: builder.build()?,
            closed: AtomicBool::new(false),
        })
    }

    /// Partner port this client talks to.
    pub fn partner_port(&self) -> u16 {
        self.partner_port
    }

    /// `http://localhost:<partner_port>/`
    pub fn partner_address(&self) -> String {
        address(self.partner_port)
    }

    /// Sends `payload` tagged `event_type` and returns the partner's acknowledgement.
    pub async fn send(
        &self,
        payload: impl Into<Bytes>,
        event_type: &EventType,
    ) -> Result<String, ChannelError> {
        self.send_to(self.partner_port, payload, event_type).await
    }

    /// Serializes `value` as JSON and sends it tagged `event_type`.
    pub async fn send_json<T: Serialize + ?Sized>(
        &self,
        value: &T,
        event_type: &EventType,
    ) -> Result<String, ChannelError> {
        let json = serde_json::to_vec(value)?;
        self.send(json, event_type).await
    }

    /// Sends to an arbitrary loopback `port` instead of the bound partner.
    pub async fn send_to(
        &self,
        port: u16,
        payload: impl Into<Bytes>,
        event_type: &EventType,
    ) -> Result<String, ChannelError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Closed);
        }

        let payload = payload.into();
        let body = codec::encode(event_type, &payload);
        debug!(port, %event_type, len = payload.len(), "sending message");

        let resp = self.http.post(address(port)).body(body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(ChannelError::Rejected {
                status: status.as_u16(),
                body: text,
            })
        }
    }

    /// Marks the client closed; later sends fail with [`ChannelError::Closed`]. Idempotent.
    pub fn dispose(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Returns true once [`dispose`](ChannelClient::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn address(port: u16) -> String {
    format!("http://localhost:{port}/")
}
