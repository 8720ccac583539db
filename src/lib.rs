//! A TFTP client (RFC 1350, octet mode).
//!
//! [`tftp`] holds the wire codec, [`session`] the per-transfer transport, [`processor`] the
//! download and upload state machines and [`client`] the code that drives them against a server.

pub mod client;
pub mod config;
pub mod processor;
pub mod session;
pub mod tftp;

#[cfg(test)]
mod testing;

pub use client::{download, upload, Client};
pub use config::TransferOptions;
pub use processor::TransferError;
pub use tftp::{ErrorCode, Packet};
