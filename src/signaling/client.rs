//! Rendezvous client implementation.
//!
//! Speaks the peer side of the protocol: enroll, look up other peers, ask
//! the server to introduce us, and wait for introductions.

use std::future::Future;
use std::time::Duration;

use log::{debug, info};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::framing::write_frame;
use super::protocol::*;
use crate::error::{RendezvousError, RendezvousResult};

/// Default bound on waiting for a reply.
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait after a lone zero byte before calling a peer offline.
const DEFAULT_SETTLE_WINDOW: Duration = Duration::from_millis(200);

/// Rendezvous client over any byte stream.
pub struct RendezvousClient<S> {
    stream: S,
    peer_id: PeerId,
    response_timeout: Duration,
    settle_window: Duration,
}

impl RendezvousClient<TcpStream> {
    /// Connect to a rendezvous server via TCP
    pub async fn connect(server_addr: &str) -> RendezvousResult<Self> {
        info!("Connecting to rendezvous server at {}", server_addr);
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S> RendezvousClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new client with an existing stream
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            peer_id: PeerId::UNENROLLED,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            settle_window: DEFAULT_SETTLE_WINDOW,
        }
    }

    pub fn with_response_timeout(mut self, limit: Duration) -> Self {
        self.response_timeout = limit;
        self
    }

    /// Set how long `get_peer_info` waits for more bytes after a zero byte.
    pub fn with_settle_window(mut self, window: Duration) -> Self {
        self.settle_window = window;
        self
    }

    /// Identifier from the last successful enrollment (0 if none).
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    async fn bounded<T, F>(limit: Duration, operation: &'static str, fut: F) -> RendezvousResult<T>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        match timeout(limit, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RendezvousError::timeout(operation, limit)),
        }
    }

    /// Enroll our record and return the assigned identifier.
    pub async fn enroll(&mut self, record: PeerRecord) -> RendezvousResult<PeerId> {
        info!("Enrolling as {}", record);
        write_frame(&mut self.stream, &Request::Enroll(record).encode()).await?;

        let mut buf = [0u8; PEER_ID_LEN];
        Self::bounded(
            self.response_timeout,
            "read enrollment reply",
            self.stream.read_exact(&mut buf),
        )
        .await?;

        self.peer_id = PeerId::from_be_bytes(buf);
        info!("Enrolled successfully, ID: {}", self.peer_id);
        Ok(self.peer_id)
    }

    /// Look up a peer. `None` means the server answered with the offline byte.
    ///
    /// The reply is not self-describing, so a lone zero byte is taken as
    /// "offline" once the settle window passes without more data. An
    /// introduction landing inside that window would be misread; callers
    /// expecting introductions should not overlap them with lookups.
    pub async fn get_peer_info(&mut self, id: PeerId) -> RendezvousResult<Option<PeerRecord>> {
        write_frame(&mut self.stream, &Request::GetPeerInfo(id).encode()).await?;

        let mut buf = [0u8; PEER_RECORD_LEN];
        Self::bounded(
            self.response_timeout,
            "read peer info",
            self.stream.read_exact(&mut buf[..1]),
        )
        .await?;

        let mut filled = 1;
        if buf[0] == OFFLINE_SENTINEL {
            // `read` is cancel-safe, so a timeout here loses nothing
            match timeout(self.settle_window, self.stream.read(&mut buf[1..])).await {
                Err(_) | Ok(Ok(0)) => {
                    debug!("Peer {} offline", id);
                    return Ok(None);
                }
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        Self::bounded(
            self.response_timeout,
            "read peer info",
            self.stream.read_exact(&mut buf[filled..]),
        )
        .await?;

        let record = PeerRecord::from_bytes(&buf);
        info!("Peer {} info: {}", id, record);
        Ok(Some(record))
    }

    /// Ask the server to forward our record to `target`. No reply follows.
    pub async fn notify_peer(&mut self, target: PeerId) -> RendezvousResult<()> {
        if !self.peer_id.is_enrolled() {
            return Err(RendezvousError::NotEnrolled);
        }
        info!("Requesting introduction to peer {}", target);
        write_frame(&mut self.stream, &Request::NotifyPeer(target).encode()).await
    }

    /// Wait (without deadline) for another peer's introduction.
    pub async fn wait_for_introduction(&mut self) -> RendezvousResult<PeerRecord> {
        let mut buf = [0u8; PEER_RECORD_LEN];
        self.stream.read_exact(&mut buf).await?;
        let record = PeerRecord::from_bytes(&buf);
        info!("Introduction received: {}", record);
        Ok(record)
    }
}
