//! Rendezvous signaling for NAT hole punching.
//!
//! This module provides:
//! - Fixed-width binary protocol types and field framing
//! - A shared registry of enrolled peers
//! - The per-connection session loop and the TCP server around it
//! - A client for the peer side of the protocol
//!
//! # Protocol
//!
//! Every message is a 2-byte big-endian operation tag followed by a payload
//! whose size is fixed by the tag. Replies carry no tag.
//!
//! ## Operations
//!
//! - `enroll` (1) - Store our record, receive an identifier
//! - `get_peer_info` (2) - Fetch another peer's record, or a single zero byte
//! - `notify_peer` (3) - Have our record forwarded to another peer (no reply)
//!
//! ## Server → client
//!
//! - introduction - Another peer's record, pushed after it called `notify_peer`

pub mod client;
pub mod framing;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use client::RendezvousClient;
pub use framing::{read_operation, read_peer_id, read_peer_record, write_frame};
pub use protocol::{
    NatType, Operation, PeerId, PeerRecord, Request, Response, ADDRESS_LEN, OFFLINE_SENTINEL,
    PEER_ID_LEN, PEER_RECORD_LEN,
};
pub use registry::{PeerHandle, PeerRegistry};
pub use server::{run_rendezvous_server, RendezvousServer};
pub use session::{handle_connection, SessionLimits};
