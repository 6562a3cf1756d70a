//! Concurrent per-hop rule provisioning with rollback-by-omission.
//!
//! Builds one direction of a loop: acquires a RouteID from every hop,
//! installs a chained rule at each (terminating in an `AppRule` at the
//! far end), then commits a single ForwardRule on the initiator once
//! every hop has succeeded. Failure anywhere cancels the siblings and
//! skips the initiator commit — partially-installed hop rules are left
//! to expire rather than explicitly revoked (§9 of the design notes).

use crate::error::{Error, Result};
use crate::hop_client::HopClient;
use crate::model::{Port, Route, RouteId, Rule};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Builds one direction of a loop and returns the RouteID the initiator
/// should tag outbound packets with.
///
/// `terminal_local_port` is the port of the node this route terminates at
/// (bound to the resulting AppRule); `peer_port` is the port on the other
/// side of the loop, carried as the AppRule's `remote_port`.
pub async fn build_route(
    expiry: DateTime<Utc>,
    route: &Route,
    terminal_local_port: Port,
    peer_port: Port,
    hop_client: Arc<HopClient>,
    cancel: &CancellationToken,
) -> Result<RouteId> {
    let n = route.len();
    if n == 0 {
        return Ok(0);
    }

    let scope = cancel.child_token();
    let initiator = route[0].from;

    let mut txs: Vec<Option<oneshot::Sender<RouteId>>> = Vec::with_capacity(n);
    let mut rxs: Vec<Option<oneshot::Receiver<RouteId>>> = Vec::with_capacity(n);
    for _ in 0..n {
        let (tx, rx) = oneshot::channel();
        txs.push(Some(tx));
        rxs.push(Some(rx));
    }

    let mut tasks = FuturesUnordered::new();
    for i in 0..n {
        let hop = route[i];
        let is_terminal = i == n - 1;
        let next_tp = if is_terminal { None } else { Some(route[i + 1].tp) };
        let tx = txs[i].take().expect("one tx per index, taken once");
        let succ_rx = if is_terminal { None } else { rxs[i + 1].take() };
        let hop_client = hop_client.clone();
        let scope = scope.clone();

        tasks.push(tokio::spawn(async move {
            let route_id = hop_client.request_route_id(hop.to, &scope).await?;
            // successor may already be gone (cancelled) -- ignore send failure,
            // it will observe cancellation on its own suspension point instead.
            let _ = tx.send(route_id);

            let rule = if is_terminal {
                Rule::App {
                    expiry,
                    responding_route_id: 0,
                    remote_pk: initiator,
                    remote_port: peer_port,
                    local_port: terminal_local_port,
                    route_id,
                }
            } else {
                let next_route_id = succ_rx
                    .expect("non-terminal hop always has a successor receiver")
                    .await
                    .map_err(|_| Error::Cancelled)?;
                Rule::Forward {
                    expiry,
                    next_route_id,
                    next_transport: next_tp.expect("non-terminal hop always has a next transport"),
                    route_id,
                }
            };

            hop_client.add_rule(hop.to, &rule, &scope).await?;
            Ok::<(usize, RouteId), Error>((i, route_id))
        }));
    }

    let mut first_error: Option<Error> = None;
    let mut route_ids: Vec<Option<RouteId>> = vec![None; n];
    while let Some(joined) = tasks.next().await {
        let result = match joined {
            Ok(r) => r,
            Err(join_err) => Err(Error::transport(format!("hop task panicked: {join_err}"))),
        };
        match result {
            Ok((i, route_id)) => route_ids[i] = Some(route_id),
            Err(e) => {
                if !e.is_cancelled() && first_error.is_none() {
                    first_error = Some(e);
                    scope.cancel();
                }
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    // No sibling reported a concrete error, but the parent's own
    // cancellation (e.g. node shutdown) can still have unwound every task
    // via Cancelled, which the loop above suppresses. Treat any hole in
    // route_ids as that case rather than assume index 0 is present --
    // otherwise this would panic, or worse, commit the initiator rule
    // without every hop having actually succeeded.
    if route_ids.iter().any(|r| r.is_none()) {
        return Err(Error::Cancelled);
    }
    let route_id_0 = route_ids[0].expect("checked above");

    // Final initiator commit runs under its own scope: once every hop has
    // succeeded it must not be abandoned part-way by the inbound request's
    // cancellation (see open question in the design notes).
    let commit_scope = CancellationToken::new();
    let initiator_route_id = hop_client.request_route_id(initiator, &commit_scope).await?;
    let commit_rule = Rule::Forward {
        expiry,
        next_route_id: route_id_0,
        next_transport: route[0].tp,
        route_id: initiator_route_id,
    };
    hop_client.add_rule(initiator, &commit_rule, &commit_scope).await?;

    Ok(initiator_route_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MockMessagingClient;
    use crate::model::{Hop, PublicKey};
    use crate::protocol::{self, PacketType};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    fn pk(byte: u8) -> PublicKey {
        PublicKey([byte; 32])
    }

    async fn spawn_peer<F>(
        peers: &Arc<Mutex<HashMap<PublicKey, tokio::sync::mpsc::UnboundedSender<tokio::io::DuplexStream>>>>,
        who: PublicKey,
        mut handler: F,
    ) where
        F: FnMut(u8, Vec<u8>) -> (PacketType, serde_json::Value) + Send + 'static,
    {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        peers.lock().await.insert(who, tx);
        tokio::spawn(async move {
            while let Some(mut stream) = rx.recv().await {
                let (code, body) = protocol::read_frame(&mut stream).await.unwrap();
                let (resp_type, resp_payload) = handler(code, body);
                protocol::write_frame(&mut stream, resp_type, &resp_payload)
                    .await
                    .unwrap();
            }
        });
    }

    #[tokio::test]
    async fn empty_route_returns_zero_without_dialing() {
        let peers = Arc::new(Mutex::new(HashMap::new()));
        let client: Arc<dyn crate::messaging::MessagingClient> =
            Arc::new(MockMessagingClient::new(pk(1), peers));
        let hop_client = Arc::new(HopClient::new(client));
        let cancel = CancellationToken::new();
        let route: Route = vec![];
        let route_id = build_route(Utc::now(), &route, 1, 2, hop_client, &cancel)
            .await
            .unwrap();
        assert_eq!(route_id, 0);
    }

    #[tokio::test]
    async fn two_hop_route_chains_routeids_and_commits_initiator() {
        let peers: Arc<Mutex<HashMap<PublicKey, tokio::sync::mpsc::UnboundedSender<tokio::io::DuplexStream>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let mut next_id: u32 = 100;
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));

        for who in [pk(10), pk(20), pk(1)] {
            let counter = counter.clone();
            spawn_peer(&peers, who, move |code, body| {
                if code == PacketType::RequestRouteId as u8 {
                    let id = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                    (PacketType::RespSuccess, serde_json::json!(id))
                } else if code == PacketType::AddRule as u8 {
                    let _: Rule = serde_json::from_slice(&body).unwrap();
                    (PacketType::RespSuccess, serde_json::json!(null))
                } else {
                    (PacketType::RespFailure, serde_json::json!("unexpected"))
                }
            })
            .await;
        }
        let _ = next_id;

        let client: Arc<dyn crate::messaging::MessagingClient> =
            Arc::new(MockMessagingClient::new(pk(1), peers));
        let hop_client = Arc::new(HopClient::new(client));
        let cancel = CancellationToken::new();

        let route: Route = vec![
            Hop {
                from: pk(1),
                to: pk(10),
                tp: uuid::Uuid::new_v4(),
            },
            Hop {
                from: pk(10),
                to: pk(20),
                tp: uuid::Uuid::new_v4(),
            },
        ];

        let route_id = build_route(Utc::now(), &route, 55, 66, hop_client, &cancel)
            .await
            .unwrap();
        assert!(route_id > 0);
    }

    #[tokio::test]
    async fn failure_at_one_hop_cancels_siblings_and_skips_commit() {
        let peers: Arc<Mutex<HashMap<PublicKey, tokio::sync::mpsc::UnboundedSender<tokio::io::DuplexStream>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        spawn_peer(&peers, pk(20), |code, _body| {
            if code == PacketType::RequestRouteId as u8 {
                (PacketType::RespSuccess, serde_json::json!(1))
            } else {
                (PacketType::RespFailure, serde_json::json!("busy"))
            }
        })
        .await;
        spawn_peer(&peers, pk(10), |code, _body| {
            if code == PacketType::RequestRouteId as u8 {
                (PacketType::RespSuccess, serde_json::json!(2))
            } else {
                (PacketType::RespSuccess, serde_json::json!(null))
            }
        })
        .await;

        let client: Arc<dyn crate::messaging::MessagingClient> =
            Arc::new(MockMessagingClient::new(pk(1), peers));
        let hop_client = Arc::new(HopClient::new(client));
        let cancel = CancellationToken::new();

        let route: Route = vec![
            Hop {
                from: pk(1),
                to: pk(10),
                tp: uuid::Uuid::new_v4(),
            },
            Hop {
                from: pk(10),
                to: pk(20),
                tp: uuid::Uuid::new_v4(),
            },
        ];

        let err = build_route(Utc::now(), &route, 1, 2, hop_client, &cancel)
            .await
            .unwrap_err();
        assert!(!err.is_cancelled());
        assert!(err.to_string().contains("busy"));
    }
}
