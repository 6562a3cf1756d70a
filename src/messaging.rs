//! Peer messaging client abstraction.
//!
//! The encrypted dial/accept-by-public-key transport and the discovery
//! service that backs it are external collaborators; this module only
//! defines the seam the rest of the crate drives, plus a concrete
//! TCP-over-a-static-directory implementation that stands in for them
//! in tests and local runs.

use crate::error::{Error, Result};
use crate::model::PublicKey;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// A bidirectional byte stream to one peer, good for exactly one
/// request/response exchange.
pub trait ChannelStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ChannelStream for T {}

/// Dial/accept peer channels addressed by public key.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Opens a fresh channel to `pk`. Callers use it for one request/response
    /// then drop it.
    async fn dial(&self, pk: PublicKey) -> Result<Box<dyn ChannelStream>>;

    /// Accepts the next inbound channel from any peer.
    async fn accept(&self) -> Result<Box<dyn ChannelStream>>;

    /// The identity this client is configured to present to peers.
    fn local_pubkey(&self) -> PublicKey;

    /// Establishes `count` upstream messaging-server connections before the
    /// accept loop starts serving. A no-op for transports with nothing to
    /// warm up.
    async fn ensure_server_connections(&self, count: u16) -> Result<()>;
}

/// A `MessagingClient` over plain TCP, with peers looked up in a static
/// public-key-to-address directory instead of a real discovery service.
pub struct TcpMessagingClient {
    local_pk: PublicKey,
    directory: HashMap<PublicKey, SocketAddr>,
    listener: Mutex<Option<TcpListener>>,
    bind_addr: SocketAddr,
}

impl TcpMessagingClient {
    pub fn new(local_pk: PublicKey, bind_addr: SocketAddr, directory: HashMap<PublicKey, SocketAddr>) -> Self {
        Self {
            local_pk,
            directory,
            listener: Mutex::new(None),
            bind_addr,
        }
    }

    async fn listener(&self) -> Result<()> {
        let mut guard = self.listener.lock().await;
        if guard.is_none() {
            let listener = TcpListener::bind(self.bind_addr)
                .await
                .map_err(|e| Error::transport(format!("binding {}: {e}", self.bind_addr)))?;
            *guard = Some(listener);
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingClient for TcpMessagingClient {
    async fn dial(&self, pk: PublicKey) -> Result<Box<dyn ChannelStream>> {
        let addr = self
            .directory
            .get(&pk)
            .ok_or_else(|| Error::transport(format!("no known address for peer {pk}")))?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::transport(format!("dialling {pk}: {e}")))?;
        Ok(Box::new(stream))
    }

    async fn accept(&self) -> Result<Box<dyn ChannelStream>> {
        self.listener().await?;
        let guard = self.listener.lock().await;
        let listener = guard.as_ref().expect("listener initialized above");
        let (stream, _peer) = listener
            .accept()
            .await
            .map_err(|e| Error::transport(format!("accept: {e}")))?;
        Ok(Box::new(stream))
    }

    fn local_pubkey(&self) -> PublicKey {
        self.local_pk
    }

    async fn ensure_server_connections(&self, count: u16) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.listener().await
    }
}

/// In-memory messaging client for tests, backed by `tokio::io::duplex`
/// pairs routed through a shared registry keyed by public key.
pub struct MockMessagingClient {
    local_pk: PublicKey,
    peers: Arc<Mutex<HashMap<PublicKey, tokio::sync::mpsc::UnboundedSender<tokio::io::DuplexStream>>>>,
    dial_count: Arc<std::sync::atomic::AtomicUsize>,
}

impl MockMessagingClient {
    pub fn new(
        local_pk: PublicKey,
        peers: Arc<Mutex<HashMap<PublicKey, tokio::sync::mpsc::UnboundedSender<tokio::io::DuplexStream>>>>,
    ) -> Self {
        Self {
            local_pk,
            peers,
            dial_count: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        }
    }

    pub fn dial_count(&self) -> usize {
        self.dial_count.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingClient for MockMessagingClient {
    async fn dial(&self, pk: PublicKey) -> Result<Box<dyn ChannelStream>> {
        self.dial_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let senders = self.peers.lock().await;
        let sender = senders
            .get(&pk)
            .ok_or_else(|| Error::transport(format!("no mock peer registered for {pk}")))?;
        let (client_side, server_side) = tokio::io::duplex(4096);
        sender
            .send(server_side)
            .map_err(|_| Error::transport("mock peer channel closed"))?;
        Ok(Box::new(client_side))
    }

    async fn accept(&self) -> Result<Box<dyn ChannelStream>> {
        Err(Error::transport("MockMessagingClient does not accept"))
    }

    fn local_pubkey(&self) -> PublicKey {
        self.local_pk
    }

    async fn ensure_server_connections(&self, _count: u16) -> Result<()> {
        Ok(())
    }
}
