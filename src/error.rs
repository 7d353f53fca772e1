//! Error types for the rendezvous service.

use std::time::Duration;
use thiserror::Error;

/// Rendezvous-specific errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RendezvousError {
    /// Network I/O error (stream closed mid-field, reset, broken pipe).
    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),

    /// A bounded read or write did not complete in time.
    #[error("Timed out after {after:?} while trying to {operation}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The remote side closed its connection (or its writer went away).
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation tag outside of the known set.
    #[error("Unrecognized operation tag: {0}")]
    UnknownOperation(u16),

    /// The connection asked for something that requires a prior enrollment.
    #[error("Connection has not enrolled")]
    NotEnrolled,

    /// The 32-bit identifier space is used up.
    #[error("Peer identifiers exhausted")]
    IdentifiersExhausted,

    /// Address does not fit the 16-byte address field.
    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),
}

impl RendezvousError {
    /// Create a timeout error for the named operation.
    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    /// Returns true if this error means the connection itself is unusable.
    ///
    /// **Transport (session-fatal):**
    /// - `Io` - stream closed or failed
    /// - `Timeout` - deadline on a read or write expired
    /// - `ConnectionClosed` - peer or writer gone
    ///
    /// Everything else is a per-request condition the session survives.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RendezvousError::Io(_)
                | RendezvousError::Timeout { .. }
                | RendezvousError::ConnectionClosed
        )
    }
}

/// Result type alias for rendezvous operations.
pub type RendezvousResult<T> = Result<T, RendezvousError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        let io = RendezvousError::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(io.is_transport());
        assert!(RendezvousError::timeout("read", Duration::from_secs(1)).is_transport());
        assert!(RendezvousError::ConnectionClosed.is_transport());

        assert!(!RendezvousError::UnknownOperation(99).is_transport());
        assert!(!RendezvousError::NotEnrolled.is_transport());
        assert!(!RendezvousError::IdentifiersExhausted.is_transport());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            RendezvousError::UnknownOperation(99).to_string(),
            "Unrecognized operation tag: 99"
        );
        assert_eq!(
            RendezvousError::NotEnrolled.to_string(),
            "Connection has not enrolled"
        );
        let timeout = RendezvousError::timeout("write response", Duration::from_secs(10));
        assert_eq!(
            timeout.to_string(),
            "Timed out after 10s while trying to write response"
        );
    }
}
