//! punch-rendezvous library
//!
//! Rendezvous service that lets peers behind NATs learn each other's
//! observed address so they can attempt a direct connection.

pub mod config;
pub mod error;
pub mod signaling;

pub use error::{RendezvousError, RendezvousResult};
