//! Fronthaul Collaborator Interfaces Library
//! 
//! This crate provides the packet-buffer and endpoint contracts the fronthaul core
//! exchanges packets through, plus an in-memory loopback endpoint.

pub mod buffer;
pub mod endpoint;

pub use buffer::{PacketView, SharedPayload};
pub use endpoint::{loopback, EndpointStats, LoopbackSink, LoopbackSource, PacketSink, PacketSource};

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("Payload range {start}..{end} outside buffer of {len} bytes")]
    PayloadRange { start: usize, end: usize, len: usize },
    
    #[error("Buffer full")]
    BufferFull,
    
    #[error("Endpoint closed")]
    Closed,
}
