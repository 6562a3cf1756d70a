//! Builds forward and reverse routes for a loop, cross-confirms both
//! endpoints, and rolls back the responder confirmation if the initiator
//! confirmation fails.

use crate::error::{Error, Result};
use crate::hop_client::HopClient;
use crate::model::{Address, Loop, LoopData, LoopDescriptor, PublicKey};
use crate::route_builder::build_route;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct LoopCoordinator {
    hop_client: Arc<HopClient>,
    local_pubkey: PublicKey,
}

impl LoopCoordinator {
    pub fn new(hop_client: Arc<HopClient>, local_pubkey: PublicKey) -> Self {
        Self {
            hop_client,
            local_pubkey,
        }
    }

    pub async fn create_loop(&self, ld: &LoopDescriptor, cancel: &CancellationToken) -> Result<()> {
        // Reverse first, then forward: a forward-build failure then leaves
        // only the reverse-side rules to expire rather than both sides.
        let r_id = build_route(
            ld.expiry,
            &ld.reverse,
            ld.loop_.local.port,
            ld.loop_.remote.port,
            self.hop_client.clone(),
            cancel,
        )
        .await
        .map_err(|e| e.context("rule setup"))?;

        let f_id = build_route(
            ld.expiry,
            &ld.forward,
            ld.loop_.remote.port,
            ld.loop_.local.port,
            self.hop_client.clone(),
            cancel,
        )
        .await
        .map_err(|e| e.context("rule setup"))?;

        if ld.forward.is_empty() || ld.reverse.is_empty() {
            info!("loop created with no endpoint confirmation (empty route)");
            return Ok(());
        }

        let initiator = ld.forward[0].from;
        let responder = ld.reverse[0].from;

        let ld_resp = LoopData {
            loop_: Loop {
                remote: Address {
                    pk: initiator,
                    port: ld.loop_.local.port,
                },
                local: Address {
                    pk: responder,
                    port: ld.loop_.remote.port,
                },
            },
            route_id: r_id,
        };
        self.hop_client
            .confirm_loop(responder, &ld_resp, cancel)
            .await
            .map_err(|e| e.context("confirming responder"))?;

        let ld_init = LoopData {
            loop_: Loop {
                remote: Address {
                    pk: responder,
                    port: ld.loop_.remote.port,
                },
                local: Address {
                    pk: initiator,
                    port: ld.loop_.local.port,
                },
            },
            route_id: f_id,
        };
        if let Err(err) = self.hop_client.confirm_loop(initiator, &ld_init, cancel).await {
            if let Err(rollback_err) = self.close_loop(responder, &ld_resp, cancel).await {
                warn!(error = %rollback_err, "rollback LoopClosed to responder failed");
            }
            return Err(err.context("confirming initiator"));
        }

        info!("loop created and both endpoints confirmed");
        Ok(())
    }

    pub async fn close_loop(&self, on: PublicKey, ld: &LoopData, cancel: &CancellationToken) -> Result<()> {
        self.hop_client.loop_closed(on, ld, cancel).await
    }

    pub async fn serve_close(&self, ld: &LoopData, cancel: &CancellationToken) -> Result<()> {
        let local = ld.loop_.local.pk;
        let remote = ld.loop_.remote.pk;

        let recipient = if local == self.local_pubkey {
            remote
        } else if remote == self.local_pubkey {
            local
        } else {
            return Err(Error::policy("configured PubKey not found in edges"));
        };

        let swapped = LoopData {
            loop_: Loop {
                local: ld.loop_.remote,
                remote: ld.loop_.local,
            },
            route_id: ld.route_id,
        };
        self.close_loop(recipient, &swapped, cancel).await
    }
}
