//! Shared registry of enrolled peers.
//!
//! One lock guards both the identifier counter and the entries, and each
//! entry holds its record and connection handle together, so an entry is
//! either fully visible or absent.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::RwLock;

use super::protocol::{PeerId, PeerRecord, Response};
use crate::error::{RendezvousError, RendezvousResult};

/// Identifiers are pre-incremented, so the first enrollment receives 2.
const INITIAL_SEQUENCE: u32 = 1;

/// Non-owning handle to a session's outbound queue.
///
/// Dropping a handle never closes the connection; the session does that.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    tx: mpsc::Sender<Response>,
    remote_addr: SocketAddr,
}

impl PeerHandle {
    pub fn new(tx: mpsc::Sender<Response>, remote_addr: SocketAddr) -> Self {
        Self { tx, remote_addr }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Queue a message for the connection's writer, waiting at most `limit`
    /// for queue space.
    pub async fn deliver(&self, response: Response, limit: Duration) -> RendezvousResult<()> {
        match self.tx.send_timeout(response, limit).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                Err(RendezvousError::timeout("queue outbound message", limit))
            }
            Err(SendTimeoutError::Closed(_)) => Err(RendezvousError::ConnectionClosed),
        }
    }
}

#[derive(Debug)]
struct RegistryEntry {
    record: PeerRecord,
    handle: PeerHandle,
}

#[derive(Debug)]
struct RegistryState {
    last_issued: u32,
    entries: HashMap<PeerId, RegistryEntry>,
}

impl RegistryState {
    fn new(last_issued: u32) -> Self {
        Self {
            last_issued,
            entries: HashMap::new(),
        }
    }

    fn next_id(&mut self) -> RendezvousResult<PeerId> {
        let next = self
            .last_issued
            .checked_add(1)
            .ok_or(RendezvousError::IdentifiersExhausted)?;
        self.last_issued = next;
        Ok(PeerId::new(next))
    }
}

/// Thread-safe registry of enrolled peers, shared by every session.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::new(INITIAL_SEQUENCE))),
        }
    }

    #[cfg(test)]
    fn with_last_issued(last_issued: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::new(last_issued))),
        }
    }

    /// Allocate a fresh identifier and store the record with its handle.
    pub async fn enroll(&self, record: PeerRecord, handle: PeerHandle) -> RendezvousResult<PeerId> {
        self.enroll_replacing(None, record, handle).await
    }

    /// Enroll, removing `previous` in the same critical section.
    ///
    /// On failure nothing changes, `previous` included.
    pub async fn enroll_replacing(
        &self,
        previous: Option<PeerId>,
        record: PeerRecord,
        handle: PeerHandle,
    ) -> RendezvousResult<PeerId> {
        let mut state = self.state.write().await;
        let id = state.next_id()?;
        if let Some(previous) = previous {
            if state.entries.remove(&previous).is_some() {
                debug!("Peer {} replaced by {}", previous, id);
            }
        }
        state.entries.insert(id, RegistryEntry { record, handle });
        Ok(id)
    }

    pub async fn lookup(&self, id: PeerId) -> Option<PeerRecord> {
        let state = self.state.read().await;
        state.entries.get(&id).map(|entry| entry.record)
    }

    pub async fn lookup_connection(&self, id: PeerId) -> Option<PeerHandle> {
        let state = self.state.read().await;
        state.entries.get(&id).map(|entry| entry.handle.clone())
    }

    /// Remove an entry. Returns false if it was already gone.
    pub async fn remove(&self, id: PeerId) -> bool {
        let mut state = self.state.write().await;
        state.entries.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
