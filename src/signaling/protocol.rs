//! Wire types for the rendezvous protocol.
//!
//! Every field is fixed-size and big-endian; there is no length prefix,
//! version or checksum. A request is a 2-byte operation tag followed by the
//! operation's payload:
//!
//! ```text
//! Enroll       tag=1 │ address (16) │ port (2) │ nat_type (2) │  -> identifier (4)
//! GetPeerInfo  tag=2 │ identifier (4) │                        -> record (20) | 0x00
//! NotifyPeer   tag=3 │ identifier (4) │                        -> nothing
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{RendezvousError, RendezvousResult};

/// Size of the operation tag.
pub const OPERATION_TAG_LEN: usize = 2;

/// Size of the opaque address field of a peer record.
pub const ADDRESS_LEN: usize = 16;

/// Size of an encoded peer identifier.
pub const PEER_ID_LEN: usize = 4;

/// Size of an encoded peer record (address + port + nat_type).
pub const PEER_RECORD_LEN: usize = ADDRESS_LEN + 2 + 2;

/// Single-byte reply to `GetPeerInfo` when the target is not enrolled.
pub const OFFLINE_SENTINEL: u8 = 0;

// ============================================================================
// Operations
// ============================================================================

/// Operation requested by a connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Operation {
    Enroll = 1,
    GetPeerInfo = 2,
    NotifyPeer = 3,
}

impl Operation {
    /// Map a wire tag to an operation, `None` for anything unrecognized.
    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            1 => Some(Operation::Enroll),
            2 => Some(Operation::GetPeerInfo),
            3 => Some(Operation::NotifyPeer),
            _ => None,
        }
    }

    pub fn tag(self) -> u16 {
        self as u16
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Enroll => "enroll",
            Operation::GetPeerInfo => "get_peer_info",
            Operation::NotifyPeer => "notify_peer",
        }
    }
}

impl TryFrom<u16> for Operation {
    type Error = RendezvousError;

    fn try_from(tag: u16) -> Result<Self, Self::Error> {
        Operation::from_tag(tag).ok_or(RendezvousError::UnknownOperation(tag))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Peer identifier
// ============================================================================

/// Identifier handed out on enrollment. Zero means "not enrolled".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PeerId(u32);

impl PeerId {
    /// The reserved identifier of a connection that has not enrolled.
    pub const UNENROLLED: PeerId = PeerId(0);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub fn is_enrolled(self) -> bool {
        self.0 != 0
    }

    pub fn to_be_bytes(self) -> [u8; PEER_ID_LEN] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}

impl From<u32> for PeerId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// NAT classification
// ============================================================================

/// NAT behavior codes as reported by peers after their STUN probe.
///
/// The server never interprets these; they only make logs readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NatType {
    Blocked = 0,
    OpenInternet = 1,
    FullCone = 2,
    RestrictedNat = 3,
    PortRestrictedCone = 4,
    SymmetricNat = 5,
    Error = 6,
}

impl NatType {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(NatType::Blocked),
            1 => Some(NatType::OpenInternet),
            2 => Some(NatType::FullCone),
            3 => Some(NatType::RestrictedNat),
            4 => Some(NatType::PortRestrictedCone),
            5 => Some(NatType::SymmetricNat),
            6 => Some(NatType::Error),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn description(self) -> &'static str {
        match self {
            NatType::Blocked => "blocked",
            NatType::OpenInternet => "open internet",
            NatType::FullCone => "full cone",
            NatType::RestrictedNat => "restricted NAT",
            NatType::PortRestrictedCone => "port-restricted cone",
            NatType::SymmetricNat => "symmetric NAT",
            NatType::Error => "error",
        }
    }
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

// ============================================================================
// Peer record
// ============================================================================

/// Address information a peer reports about itself.
///
/// `address` is stored and returned byte-for-byte. Peers in the wild put
/// dotted text, a left-justified IPv4 address or a full IPv6 address there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerRecord {
    pub address: [u8; ADDRESS_LEN],
    pub port: u16,
    pub nat_type: u16,
}

impl PeerRecord {
    pub fn new(address: [u8; ADDRESS_LEN], port: u16, nat_type: u16) -> Self {
        Self {
            address,
            port,
            nat_type,
        }
    }

    /// Build a record from an IP address. IPv4 is stored IPv4-mapped.
    pub fn from_ip(ip: IpAddr, port: u16, nat_type: u16) -> Self {
        let v6 = match ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        Self::new(v6.octets(), port, nat_type)
    }

    /// Build a record whose address field holds text, NUL padded.
    pub fn from_text(text: &str, port: u16, nat_type: u16) -> RendezvousResult<Self> {
        let bytes = text.as_bytes();
        if bytes.len() > ADDRESS_LEN {
            return Err(RendezvousError::InvalidAddress(format!(
                "'{}' is {} bytes, the address field holds {}",
                text,
                bytes.len(),
                ADDRESS_LEN
            )));
        }
        let mut address = [0u8; ADDRESS_LEN];
        address[..bytes.len()].copy_from_slice(bytes);
        Ok(Self::new(address, port, nat_type))
    }

    pub fn nat(&self) -> Option<NatType> {
        NatType::from_code(self.nat_type)
    }

    /// Best-effort rendering of the address field, for logs.
    pub fn display_address(&self) -> String {
        let text_len = self
            .address
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(ADDRESS_LEN);
        if text_len > 0 {
            if let Ok(text) = std::str::from_utf8(&self.address[..text_len]) {
                if let Ok(ip) = text.parse::<IpAddr>() {
                    return ip.to_string();
                }
            }
        }
        self.raw_ip().to_string()
    }

    /// Interpret the address field as a binary IP address.
    pub fn raw_ip(&self) -> IpAddr {
        let v6 = Ipv6Addr::from(self.address);
        if let Some(v4) = v6.to_ipv4_mapped() {
            return IpAddr::V4(v4);
        }
        // Left-justified IPv4, zero padded
        if self.address[4..].iter().all(|&b| b == 0) && self.address[..4].iter().any(|&b| b != 0)
        {
            let [a, b, c, d, ..] = self.address;
            return IpAddr::V4(Ipv4Addr::new(a, b, c, d));
        }
        IpAddr::V6(v6)
    }

    pub fn to_bytes(&self) -> [u8; PEER_RECORD_LEN] {
        let mut buf = [0u8; PEER_RECORD_LEN];
        buf[..ADDRESS_LEN].copy_from_slice(&self.address);
        buf[ADDRESS_LEN..ADDRESS_LEN + 2].copy_from_slice(&self.port.to_be_bytes());
        buf[ADDRESS_LEN + 2..].copy_from_slice(&self.nat_type.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; PEER_RECORD_LEN]) -> Self {
        let mut address = [0u8; ADDRESS_LEN];
        address.copy_from_slice(&buf[..ADDRESS_LEN]);
        let port = u16::from_be_bytes([buf[ADDRESS_LEN], buf[ADDRESS_LEN + 1]]);
        let nat_type = u16::from_be_bytes([buf[ADDRESS_LEN + 2], buf[ADDRESS_LEN + 3]]);
        Self::new(address, port, nat_type)
    }
}

impl fmt::Display for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (", self.display_address(), self.port)?;
        match self.nat() {
            Some(nat) => write!(f, "{})", nat),
            None => write!(f, "unknown({}))", self.nat_type),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Client -> server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Enroll(PeerRecord),
    GetPeerInfo(PeerId),
    NotifyPeer(PeerId),
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Request::Enroll(_) => Operation::Enroll,
            Request::GetPeerInfo(_) => Operation::GetPeerInfo,
            Request::NotifyPeer(_) => Operation::NotifyPeer,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(OPERATION_TAG_LEN + PEER_RECORD_LEN);
        buf.extend_from_slice(&self.operation().tag().to_be_bytes());
        match self {
            Request::Enroll(record) => buf.extend_from_slice(&record.to_bytes()),
            Request::GetPeerInfo(id) | Request::NotifyPeer(id) => {
                buf.extend_from_slice(&id.to_be_bytes())
            }
        }
        buf
    }
}

/// Server -> client message.
///
/// None of these carry a tag: the receiver knows what it asked for.
/// `Introduction` is the one unsolicited message and is byte-identical to a
/// found `PeerInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Enrolled(PeerId),
    PeerInfo(Option<PeerRecord>),
    Introduction(PeerRecord),
}

impl Response {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Response::Enrolled(id) => id.to_be_bytes().to_vec(),
            Response::PeerInfo(Some(record)) | Response::Introduction(record) => {
                record.to_bytes().to_vec()
            }
            Response::PeerInfo(None) => vec![OFFLINE_SENTINEL],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> PeerRecord {
        PeerRecord::from_ip("192.0.2.1".parse().unwrap(), 51820, 1)
    }

    #[test]
    fn test_operation_tags() {
        assert_eq!(Operation::from_tag(1), Some(Operation::Enroll));
        assert_eq!(Operation::from_tag(2), Some(Operation::GetPeerInfo));
        assert_eq!(Operation::from_tag(3), Some(Operation::NotifyPeer));
        assert_eq!(Operation::from_tag(0), None);
        assert_eq!(Operation::from_tag(99), None);
        assert!(matches!(
            Operation::try_from(99),
            Err(RendezvousError::UnknownOperation(99))
        ));
        assert_eq!(Operation::NotifyPeer.tag(), 3);
    }

    #[test]
    fn test_peer_record_layout_is_big_endian() {
        let record = PeerRecord::new([0xAA; ADDRESS_LEN], 0x1234, 0x0005);
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[..16], &[0xAA; 16]);
        assert_eq!(&bytes[16..18], &[0x12, 0x34]);
        assert_eq!(&bytes[18..20], &[0x00, 0x05]);
        assert_eq!(PeerRecord::from_bytes(&bytes), record);
    }

    #[test]
    fn test_enroll_request_encoding() {
        let record = sample_record();
        let encoded = Request::Enroll(record).encode();
        assert_eq!(encoded.len(), 22);
        assert_eq!(&encoded[..2], &[0x00, 0x01]);
        assert_eq!(&encoded[2..], &record.to_bytes());

        let notify = Request::NotifyPeer(PeerId::new(0x01020304)).encode();
        assert_eq!(notify, vec![0x00, 0x03, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_response_encoding() {
        assert_eq!(
            Response::Enrolled(PeerId::new(2)).encode(),
            vec![0, 0, 0, 2]
        );
        assert_eq!(Response::PeerInfo(None).encode(), vec![OFFLINE_SENTINEL]);
        let record = sample_record();
        assert_eq!(
            Response::PeerInfo(Some(record)).encode(),
            Response::Introduction(record).encode()
        );
    }

    #[test]
    fn test_from_ip_maps_ipv4() {
        let record = sample_record();
        assert_eq!(&record.address[..12], &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff]);
        assert_eq!(&record.address[12..], &[192, 0, 2, 1]);
        assert_eq!(record.display_address(), "192.0.2.1");
    }

    #[test]
    fn test_display_address_variants() {
        let text = PeerRecord::from_text("203.0.113.9", 4000, 5).unwrap();
        assert_eq!(text.display_address(), "203.0.113.9");

        let mut raw = [0u8; ADDRESS_LEN];
        raw[..4].copy_from_slice(&[198, 51, 100, 7]);
        assert_eq!(PeerRecord::new(raw, 1, 0).display_address(), "198.51.100.7");

        let v6: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let record = PeerRecord::from_ip(IpAddr::V6(v6), 443, 2);
        assert_eq!(record.display_address(), "2001:db8::1");
    }

    #[test]
    fn test_from_text_rejects_long_address() {
        let result = PeerRecord::from_text("2001:db8:ffff:ffff::1", 1, 1);
        assert!(matches!(result, Err(RendezvousError::InvalidAddress(_))));
    }

    #[test]
    fn test_record_display_includes_nat_description() {
        let record = sample_record();
        assert_eq!(record.to_string(), "192.0.2.1:51820 (open internet)");
        let odd = PeerRecord::from_ip("192.0.2.1".parse().unwrap(), 1, 42);
        assert_eq!(odd.to_string(), "192.0.2.1:1 (unknown(42))");
    }

    #[test]
    fn test_nat_type_codes() {
        for code in 0..=6 {
            assert_eq!(NatType::from_code(code).unwrap().code(), code);
        }
        assert_eq!(NatType::from_code(7), None);
        assert_eq!(NatType::PortRestrictedCone.description(), "port-restricted cone");
    }

    #[test]
    fn test_peer_id_enrollment() {
        assert!(!PeerId::UNENROLLED.is_enrolled());
        assert!(PeerId::new(2).is_enrolled());
        assert_eq!(PeerId::from_be_bytes([0, 0, 1, 0]), PeerId::new(256));
    }
}
