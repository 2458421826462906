//! Server and client owned together by one side of a channel.

use std::sync::Arc;

use super::client::ChannelClient;
use super::server::ChannelServer;
use crate::config::Config;
use crate::dispatch::Dispatch;
use crate::error::ChannelError;

/// One side's endpoints: its own server plus a client pointed at the partner.
pub struct ChannelPair {
    /// Inbound endpoint.
    pub server: ChannelServer,
    /// Outbound endpoint.
    pub client: Arc<ChannelClient>,
}

impl ChannelPair {
    /// Binds the server on `port` and creates a client for `partner_port`.
    pub async fn bind(
        port: u16,
        partner_port: u16,
        dispatch: Arc<dyn Dispatch>,
        cfg: &Config,
    ) -> Result<Self, ChannelError> {
        let server = ChannelServer::bind_with(port, dispatch, cfg.ack_body.clone()).await?;
        let client = ChannelClient::with_timeout(partner_port, cfg.request_timeout())?;
        Ok(Self {
            server,
            client: Arc::new(client),
        })
    }

    /// Disposes both endpoints. Idempotent.
    pub fn dispose(&self) {
        self.server.dispose();
        self.client.dispose();
    }
}
