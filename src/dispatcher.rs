//! Accept loop and per-request dispatch: one frame in, one frame out,
//! then the channel closes.

use crate::error::{Error, Result};
use crate::loop_coordinator::LoopCoordinator;
use crate::messaging::ChannelStream;
use crate::metrics::MetricsSink;
use crate::model::{LoopData, LoopDescriptor};
use crate::protocol::{self, PacketType};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Dispatcher {
    coordinator: Arc<LoopCoordinator>,
    metrics: Arc<dyn MetricsSink>,
}

impl Dispatcher {
    pub fn new(coordinator: Arc<LoopCoordinator>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { coordinator, metrics }
    }

    /// Reads one request, dispatches it, writes exactly one response frame.
    pub async fn handle_channel(&self, mut channel: Box<dyn ChannelStream>, cancel: CancellationToken) {
        let start = Instant::now();
        let outcome = self.handle_one(&mut channel, &cancel).await;
        let is_error = outcome.is_err();

        let write_result = match &outcome {
            Ok(value) => protocol::write_frame(&mut channel, PacketType::RespSuccess, value).await,
            Err(e) => protocol::write_frame(&mut channel, PacketType::RespFailure, &e.to_string()).await,
        };
        if let Err(e) = write_result {
            warn!(error = %e, "failed to write response frame");
        }

        self.metrics.record(start.elapsed(), is_error);
        match outcome {
            Ok(_) => info!(duration_ms = start.elapsed().as_millis() as u64, "request handled"),
            Err(e) => info!(duration_ms = start.elapsed().as_millis() as u64, error = %e, "request failed"),
        }
    }

    async fn handle_one(
        &self,
        channel: &mut Box<dyn ChannelStream>,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        let (code, payload) = protocol::read_frame(channel).await?;
        match code {
            c if c == PacketType::CreateLoop as u8 => {
                let ld: LoopDescriptor = protocol::decode_payload(&payload)?;
                self.coordinator.create_loop(&ld, cancel).await?;
                Ok(serde_json::Value::Null)
            }
            c if c == PacketType::CloseLoop as u8 => {
                let ld: LoopData = protocol::decode_payload(&payload)?;
                self.coordinator.serve_close(&ld, cancel).await?;
                Ok(serde_json::Value::Null)
            }
            _ => Err(Error::policy("unknown foundation packet")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hop_client::HopClient;
    use crate::messaging::MockMessagingClient;
    use crate::metrics::CountingMetricsSink;
    use crate::model::{Address, Loop, PublicKey};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    fn pk(byte: u8) -> PublicKey {
        PublicKey([byte; 32])
    }

    fn dispatcher_with(local: PublicKey, metrics: Arc<CountingMetricsSink>) -> Dispatcher {
        let peers = Arc::new(Mutex::new(HashMap::new()));
        let client: Arc<dyn crate::messaging::MessagingClient> =
            Arc::new(MockMessagingClient::new(local, peers));
        let hop_client = Arc::new(HopClient::new(client));
        let coordinator = Arc::new(LoopCoordinator::new(hop_client, local));
        Dispatcher::new(coordinator, metrics)
    }

    #[tokio::test]
    async fn unknown_packet_code_yields_policy_failure_and_no_dials() {
        let metrics = Arc::new(CountingMetricsSink::default());
        let dispatcher = dispatcher_with(pk(1), metrics.clone());

        let (mut client_side, server_side) = tokio::io::duplex(4096);
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.push(99);
        use tokio::io::AsyncWriteExt;
        client_side.write_all(&buf).await.unwrap();

        let cancel = CancellationToken::new();
        dispatcher
            .handle_channel(Box::new(server_side), cancel)
            .await;

        let (code, payload) = protocol::read_frame(&mut client_side).await.unwrap();
        assert_eq!(code, PacketType::RespFailure as u8);
        let msg: String = protocol::decode_payload(&payload).unwrap();
        assert!(msg.contains("unknown foundation packet"));
        assert_eq!(metrics.total(), 1);
        assert_eq!(metrics.errors(), 1);
    }

    #[tokio::test]
    async fn empty_create_loop_succeeds() {
        let metrics = Arc::new(CountingMetricsSink::default());
        let dispatcher = dispatcher_with(pk(1), metrics.clone());

        let (mut client_side, server_side) = tokio::io::duplex(4096);
        let ld = LoopDescriptor {
            loop_: Loop {
                local: Address { pk: pk(1), port: 1 },
                remote: Address { pk: pk(2), port: 2 },
            },
            forward: vec![],
            reverse: vec![],
            expiry: chrono::Utc::now(),
        };
        protocol::write_frame(&mut client_side, PacketType::CreateLoop, &ld)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        dispatcher
            .handle_channel(Box::new(server_side), cancel)
            .await;

        let (code, _payload) = protocol::read_frame(&mut client_side).await.unwrap();
        assert_eq!(code, PacketType::RespSuccess as u8);
        assert_eq!(metrics.errors(), 0);
    }
}
