//! Thin per-hop RPC wrapper. Each operation dials a fresh channel,
//! exchanges exactly one request/response frame, and closes the channel
//! on every exit path.

use crate::error::{Error, Result};
use crate::messaging::MessagingClient;
use crate::model::{LoopData, PublicKey, Rule, RouteId};
use crate::protocol::{self, PacketType};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct HopClient {
    messaging: Arc<dyn MessagingClient>,
}

impl HopClient {
    pub fn new(messaging: Arc<dyn MessagingClient>) -> Self {
        Self { messaging }
    }

    pub async fn request_route_id(&self, pk: PublicKey, cancel: &CancellationToken) -> Result<RouteId> {
        let value = self
            .call(pk, PacketType::RequestRouteId, &serde_json::json!(null), cancel)
            .await?;
        serde_json::from_value(value).map_err(|e| Error::protocol(format!("decoding RouteID: {e}")))
    }

    pub async fn add_rule(&self, pk: PublicKey, rule: &Rule, cancel: &CancellationToken) -> Result<()> {
        self.call(pk, PacketType::AddRule, rule, cancel).await?;
        Ok(())
    }

    pub async fn confirm_loop(&self, pk: PublicKey, ld: &LoopData, cancel: &CancellationToken) -> Result<()> {
        self.call(pk, PacketType::ConfirmLoop, ld, cancel).await?;
        Ok(())
    }

    pub async fn loop_closed(&self, pk: PublicKey, ld: &LoopData, cancel: &CancellationToken) -> Result<()> {
        self.call(pk, PacketType::LoopClosed, ld, cancel).await?;
        Ok(())
    }

    async fn call<T: serde::Serialize + ?Sized>(
        &self,
        pk: PublicKey,
        packet_type: PacketType,
        payload: &T,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            res = self.do_call(pk, packet_type, payload) => res,
        }
    }

    async fn do_call<T: serde::Serialize + ?Sized>(
        &self,
        pk: PublicKey,
        packet_type: PacketType,
        payload: &T,
    ) -> Result<serde_json::Value> {
        let mut channel = self.messaging.dial(pk).await?;
        protocol::write_frame(&mut channel, packet_type, payload).await?;
        let (code, body) = protocol::read_frame(&mut channel).await?;
        match code {
            c if c == PacketType::RespSuccess as u8 => protocol::decode_payload(&body),
            c if c == PacketType::RespFailure as u8 => {
                let msg: String = protocol::decode_payload(&body)?;
                Err(Error::remote(msg))
            }
            other => Err(Error::protocol(format!("unexpected response code {other}"))),
        }
    }
}
