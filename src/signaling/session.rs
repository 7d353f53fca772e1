//! Per-connection protocol loop.
//!
//! Each accepted connection gets a reader loop (this module's [`Session`])
//! and a writer task. Everything bound for the connection, its own replies
//! and introductions forwarded by other sessions, goes through one bounded
//! queue, so writes on a connection never interleave.
//!
//! Error handling:
//! - transport errors (header read, idle timeout, own writes) close the session
//! - the idle timeout only applies until the peer enrolls; an enrolled peer
//!   may stay silent while it waits to be introduced
//! - a payload that cannot be read is discarded and the loop goes on
//! - unknown tags are logged and skipped
//!
//! The registry entry is removed on every exit path.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::framing::{read_operation, read_peer_id, read_peer_record, write_frame};
use super::protocol::{Operation, PeerId, PeerRecord, Response};
use super::registry::{PeerHandle, PeerRegistry};
use crate::config::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_IO_TIMEOUT_SECS, DEFAULT_OUTBOUND_QUEUE};
use crate::error::{RendezvousError, RendezvousResult};

/// Deadlines and buffering for one connection.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Bound on waiting for the next operation tag before the peer has
    /// enrolled. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// Bound on reading a payload and on each write.
    pub io_timeout: Duration,
    /// Outbound queue capacity.
    pub outbound_queue: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            io_timeout: Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

/// Serve one connection until it closes.
///
/// Returns `Ok(())` when the peer closes the stream on a message boundary,
/// otherwise the transport error that ended the session.
pub async fn handle_connection<S>(
    stream: S,
    remote_addr: SocketAddr,
    registry: PeerRegistry,
    limits: SessionLimits,
) -> RendezvousResult<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel::<Response>(limits.outbound_queue);
    let mut writer_task = tokio::spawn(write_outbound(writer, rx, limits.io_timeout));

    let handle = PeerHandle::new(tx, remote_addr);
    let mut session = Session::new(remote_addr, registry.clone(), handle, limits);

    let mut writer_done = false;
    let result = tokio::select! {
        result = session.run(&mut reader) => result,
        joined = &mut writer_task => {
            writer_done = true;
            match joined {
                Ok(Ok(())) => Err(RendezvousError::ConnectionClosed),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(RendezvousError::Io(std::io::Error::other(e))),
            }
        }
    };

    // Cleanup: always remove the enrollment on any exit
    if let Some(id) = session.peer_id() {
        registry.remove(id).await;
        info!("Peer {} unregistered ({})", id, remote_addr);
    }

    // Dropping the session drops our sender; the writer drains what is queued
    drop(session);
    if !writer_done && timeout(limits.io_timeout, &mut writer_task).await.is_err() {
        debug!("Writer for {} still busy, aborting", remote_addr);
        writer_task.abort();
    }

    result
}

/// Drain the outbound queue onto the connection.
async fn write_outbound<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Response>,
    io_timeout: Duration,
) -> RendezvousResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let frame = response.encode();
        timeout(io_timeout, write_frame(&mut writer, &frame))
            .await
            .map_err(|_| RendezvousError::timeout("write to peer", io_timeout))??;
    }
    let _ = writer.shutdown().await;
    Ok(())
}

/// Reader-side state of one connection.
struct Session {
    remote_addr: SocketAddr,
    registry: PeerRegistry,
    handle: PeerHandle,
    limits: SessionLimits,
    enrolled: Option<(PeerId, PeerRecord)>,
}

impl Session {
    fn new(
        remote_addr: SocketAddr,
        registry: PeerRegistry,
        handle: PeerHandle,
        limits: SessionLimits,
    ) -> Self {
        Self {
            remote_addr,
            registry,
            handle,
            limits,
            enrolled: None,
        }
    }

    fn peer_id(&self) -> Option<PeerId> {
        self.enrolled.map(|(id, _)| id)
    }

    async fn run<R>(&mut self, reader: &mut R) -> RendezvousResult<()>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let tag = match self.next_tag(reader).await? {
                Some(tag) => tag,
                None => return Ok(()),
            };

            match Operation::try_from(tag) {
                Ok(Operation::Enroll) => self.on_enroll(reader).await?,
                Ok(Operation::GetPeerInfo) => self.on_get_peer_info(reader).await?,
                Ok(Operation::NotifyPeer) => self.on_notify_peer(reader).await,
                Err(e) => warn!("{} from {}", e, self.remote_addr),
            }
        }
    }

    async fn next_tag<R>(&self, reader: &mut R) -> RendezvousResult<Option<u16>>
    where
        R: AsyncRead + Unpin,
    {
        match self.limits.idle_timeout {
            Some(idle) if self.enrolled.is_none() => timeout(idle, read_operation(reader))
                .await
                .map_err(|_| RendezvousError::timeout("wait for enrollment", idle))?,
            _ => read_operation(reader).await,
        }
    }

    /// Read a payload under the io deadline. Failures are logged and
    /// swallowed; a dead stream shows up on the next tag read.
    async fn read_payload<T, F>(&self, operation: Operation, read: F) -> Option<T>
    where
        F: Future<Output = RendezvousResult<T>>,
    {
        let limit = self.limits.io_timeout;
        let result = match timeout(limit, read).await {
            Ok(result) => result,
            Err(_) => Err(RendezvousError::timeout("read payload", limit)),
        };
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(
                    "Discarding malformed {} from {}: {}",
                    operation, self.remote_addr, e
                );
                None
            }
        }
    }

    async fn reply(&self, response: Response) -> RendezvousResult<()> {
        self.handle.deliver(response, self.limits.io_timeout).await
    }

    async fn on_enroll<R>(&mut self, reader: &mut R) -> RendezvousResult<()>
    where
        R: AsyncRead + Unpin,
    {
        let Some(record) = self
            .read_payload(Operation::Enroll, read_peer_record(reader))
            .await
        else {
            return Ok(());
        };

        let previous = self.peer_id();
        let id = match self
            .registry
            .enroll_replacing(previous, record, self.handle.clone())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!("Enrollment from {} failed: {}", self.remote_addr, e);
                return Ok(());
            }
        };

        match previous {
            Some(previous) => info!(
                "Peer {} re-enrolled as {} from {}: {}",
                previous, id, self.remote_addr, record
            ),
            None => info!("Peer {} enrolled from {}: {}", id, self.remote_addr, record),
        }
        self.enrolled = Some((id, record));

        self.reply(Response::Enrolled(id)).await
    }

    async fn on_get_peer_info<R>(&mut self, reader: &mut R) -> RendezvousResult<()>
    where
        R: AsyncRead + Unpin,
    {
        let Some(target) = self
            .read_payload(Operation::GetPeerInfo, read_peer_id(reader))
            .await
        else {
            return Ok(());
        };

        let record = self.registry.lookup(target).await;
        if record.is_none() {
            debug!("Peer {} offline (asked by {})", target, self.remote_addr);
        }
        self.reply(Response::PeerInfo(record)).await
    }

    /// Forward our own record to the target's connection. Never fails the
    /// session: the requester gets no acknowledgment either way.
    async fn on_notify_peer<R>(&mut self, reader: &mut R)
    where
        R: AsyncRead + Unpin,
    {
        let Some(target) = self
            .read_payload(Operation::NotifyPeer, read_peer_id(reader))
            .await
        else {
            return;
        };

        let Some((own_id, own_record)) = self.enrolled else {
            warn!(
                "Ignoring notify to peer {} from {}: not enrolled",
                target, self.remote_addr
            );
            return;
        };

        let Some(target_handle) = self.registry.lookup_connection(target).await else {
            info!("Peer {} offline, notify from peer {} dropped", target, own_id);
            return;
        };

        match target_handle
            .deliver(Response::Introduction(own_record), self.limits.io_timeout)
            .await
        {
            Ok(()) => info!(
                "Peer {} introduced to peer {} ({})",
                own_id,
                target,
                target_handle.remote_addr()
            ),
            Err(e) => warn!("Unable to notify peer {} from {}: {}", target, own_id, e),
        }
    }
}
