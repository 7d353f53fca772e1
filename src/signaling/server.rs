//! Rendezvous server: accepts connections and runs a session per connection.

use std::net::SocketAddr;

use log::{debug, error, info, warn};
use tokio::net::TcpListener;

use super::registry::PeerRegistry;
use super::session::{handle_connection, SessionLimits};
use crate::config::ResolvedServerConfig;
use crate::error::RendezvousResult;

/// Rendezvous server bound to a listening socket.
pub struct RendezvousServer {
    listener: TcpListener,
    registry: PeerRegistry,
    limits: SessionLimits,
}

impl RendezvousServer {
    /// Bind the listener described by `config`.
    pub async fn bind(config: &ResolvedServerConfig) -> RendezvousResult<Self> {
        let listener = TcpListener::bind(config.bind).await?;
        Ok(Self {
            listener,
            registry: PeerRegistry::new(),
            limits: config.session_limits(),
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> RendezvousResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared registry used by every session of this server.
    pub fn registry(&self) -> PeerRegistry {
        self.registry.clone()
    }

    /// Accept connections forever. A failing session never stops the loop.
    pub async fn run(self) -> RendezvousResult<()> {
        info!("Rendezvous server listening on {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    info!("Client connected from {}", peer_addr);
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
                    }
                    let registry = self.registry.clone();
                    let limits = self.limits;
                    tokio::spawn(async move {
                        match handle_connection(stream, peer_addr, registry, limits).await {
                            Ok(()) => info!("Client {} disconnected", peer_addr),
                            Err(e) if e.is_transport() => {
                                info!("Client {} disconnected: {}", peer_addr, e)
                            }
                            Err(e) => warn!("Session for {} failed: {}", peer_addr, e),
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Run the rendezvous server (convenience function)
pub async fn run_rendezvous_server(config: &ResolvedServerConfig) -> RendezvousResult<()> {
    let server = RendezvousServer::bind(config).await?;
    server.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfigBuilder;
    use crate::signaling::client::RendezvousClient;
    use crate::signaling::protocol::{PeerId, PeerRecord, Request, OFFLINE_SENTINEL};
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    const STEP: Duration = Duration::from_secs(5);

    async fn start_server() -> (SocketAddr, PeerRegistry) {
        let config = ServerConfigBuilder::new()
            .apply_defaults()
            .apply_cli(Some("127.0.0.1:0".to_string()), None, None)
            .build()
            .unwrap();
        let server = RendezvousServer::bind(&config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        tokio::spawn(server.run());
        (addr, registry)
    }

    fn mapped(ip: &str, port: u16, nat_type: u16) -> PeerRecord {
        PeerRecord::from_ip(ip.parse().unwrap(), port, nat_type)
    }

    /// Poll until `check` holds; removal runs after the socket closes.
    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        timeout(STEP, async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_introduction_scenario() {
        let (addr, registry) = start_server().await;
        let record_a = mapped("192.0.2.1", 51820, 1);
        let record_b = mapped("198.51.100.20", 40000, 5);

        let mut a = RendezvousClient::connect(&addr.to_string()).await.unwrap();
        let mut b = RendezvousClient::connect(&addr.to_string()).await.unwrap();

        let a_id = a.enroll(record_a).await.unwrap();
        let b_id = b.enroll(record_b).await.unwrap();
        assert_eq!(a_id, PeerId::new(2));
        assert_eq!(b_id, PeerId::new(3));

        assert_eq!(b.get_peer_info(a_id).await.unwrap(), Some(record_a));

        a.notify_peer(b_id).await.unwrap();
        let introduced = timeout(STEP, b.wait_for_introduction())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(introduced, record_a);

        drop(a);
        eventually(|| {
            let registry = registry.clone();
            async move { registry.lookup(a_id).await.is_none() }
        })
        .await;

        assert_eq!(b.get_peer_info(a_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_distinct_identifiers_across_connections() {
        let (addr, _registry) = start_server().await;

        let mut tasks = Vec::new();
        for port in 0..16u16 {
            let addr = addr.to_string();
            tasks.push(tokio::spawn(async move {
                let mut client = RendezvousClient::connect(&addr).await.unwrap();
                let id = client.enroll(mapped("192.0.2.9", port, 2)).await.unwrap();
                // Keep the connection open until every enrollment is done
                (id, client)
            }));
        }

        let mut ids = HashSet::new();
        let mut clients = Vec::new();
        for task in tasks {
            let (id, client) = task.await.unwrap();
            assert!(id.get() > 0);
            assert!(ids.insert(id));
            clients.push(client);
        }
        assert_eq!(ids.len(), 16);
    }

    #[tokio::test]
    async fn test_raw_wire_exchange() {
        let (addr, _registry) = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        // Unknown tag is skipped
        stream.write_all(&99u16.to_be_bytes()).await.unwrap();

        let record = mapped("192.0.2.1", 51820, 1);
        stream
            .write_all(&Request::Enroll(record).encode())
            .await
            .unwrap();
        let mut id = [0u8; 4];
        timeout(STEP, stream.read_exact(&mut id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(u32::from_be_bytes(id), 2);

        stream
            .write_all(&Request::GetPeerInfo(PeerId::new(500)).encode())
            .await
            .unwrap();
        let mut sentinel = [0xFFu8; 1];
        timeout(STEP, stream.read_exact(&mut sentinel))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sentinel[0], OFFLINE_SENTINEL);

        stream
            .write_all(&Request::GetPeerInfo(PeerId::new(2)).encode())
            .await
            .unwrap();
        let mut buf = [0u8; 20];
        timeout(STEP, stream.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(PeerRecord::from_bytes(&buf), record);
    }

    #[tokio::test]
    async fn test_abrupt_disconnect_cleans_up() {
        let (addr, registry) = start_server().await;
        let mut client = RendezvousClient::connect(&addr.to_string()).await.unwrap();
        let id = client.enroll(mapped("192.0.2.1", 1, 0)).await.unwrap();
        assert!(registry.lookup(id).await.is_some());

        // Half a GetPeerInfo, then gone
        let mut stream = client.into_inner();
        stream.write_all(&[0x00, 0x02, 0x00]).await.unwrap();
        drop(stream);

        eventually(|| {
            let registry = registry.clone();
            async move { registry.is_empty().await }
        })
        .await;
    }
}
