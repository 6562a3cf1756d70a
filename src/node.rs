//! Top-level wiring: config + messaging client in, a running accept
//! loop out.

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::hop_client::HopClient;
use crate::loop_coordinator::LoopCoordinator;
use crate::messaging::MessagingClient;
use crate::metrics::MetricsSink;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct SetupNode {
    messaging: Arc<dyn MessagingClient>,
    dispatcher: Arc<Dispatcher>,
    server_count: u16,
}

impl SetupNode {
    pub fn new(config: &Config, messaging: Arc<dyn MessagingClient>, metrics: Arc<dyn MetricsSink>) -> Self {
        let hop_client = Arc::new(HopClient::new(messaging.clone()));
        let coordinator = Arc::new(LoopCoordinator::new(hop_client, config.pubkey));
        let dispatcher = Arc::new(Dispatcher::new(coordinator, metrics));
        Self {
            messaging,
            dispatcher,
            server_count: config.messaging.server_count,
        }
    }

    /// Runs the accept loop until `cancel` fires or accept errors terminally.
    pub async fn serve(&self, cancel: CancellationToken) -> Result<()> {
        if self.server_count > 0 {
            self.messaging
                .ensure_server_connections(self.server_count)
                .await
                .map_err(|e| e.context("establishing messaging-server connections"))?;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("accept loop cancelled, shutting down");
                    return Ok(());
                }
                accepted = self.messaging.accept() => {
                    let channel = accepted.map_err(|e| e.context("accept loop"))?;
                    let dispatcher = self.dispatcher.clone();
                    let request_scope = cancel.child_token();
                    tokio::spawn(async move {
                        dispatcher.handle_channel(channel, request_scope).await;
                    });
                }
            }
        }
    }
}
