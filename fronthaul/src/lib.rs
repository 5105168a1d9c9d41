//! O-RAN 7.2 Fronthaul Transport Library
//! 
//! This crate implements the timing-synchronized Control-Plane/User-Plane section
//! scheduling and wire codec between an O-DU and its O-RUs.

pub mod channel;
pub mod codec;
pub mod config;
pub mod delay;
pub mod engine;
pub mod receiver;
pub mod scheduler;
pub mod section;
pub mod sequence;
pub mod stats;
pub mod timing;
pub mod worker;

pub use config::FronthaulConfig;
pub use engine::{EngineCore, EngineHandle, FronthaulEngine, SlotContext, SlotHandler};
pub use stats::{FronthaulStats, StatsSnapshot};

use interfaces::InterfaceError;
use thiserror::Error;

/// Errors surfaced by the fronthaul core
///
/// None of these unwind across the real-time path; every boundary returns them and
/// the matching counter in [`FronthaulStats`] is bumped by the component that saw it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FronthaulError {
    #[error("Malformed packet: unexpected {field}")]
    Malformed { field: &'static str },
    
    #[error("Truncated packet: {needed} bytes needed, {available} available")]
    Truncated { needed: usize, available: usize },
    
    #[error("Sequence anomaly on eAxC {eaxc:#06x}: expected {expected}, received {received}")]
    SequenceAnomaly { eaxc: u16, expected: u8, received: u8 },
    
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(&'static str),
    
    #[error("Late transmission: send symbol {target} not ahead of OTA symbol {current}")]
    LateTransmission { target: u64, current: u64 },
    
    #[error("Clock drift: {missed_symbols} symbols and {missed_slots} slots missed")]
    ClockDrift { missed_symbols: u64, missed_slots: u64 },
    
    #[error("Invalid section descriptor: {0}")]
    InvalidDescriptor(String),
    
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    
    #[error("Invalid state: {0}")]
    InvalidState(String),
    
    #[error("Engine not initialized")]
    NotInitialized,
    
    #[error("Interface error: {0}")]
    Interface(#[from] InterfaceError),
}

impl FronthaulError {
    /// Shorthand for a fixed-field mismatch
    pub fn malformed(field: &'static str) -> Self {
        FronthaulError::Malformed { field }
    }

    /// Whether the error came from a decode-side bounds or field check
    pub fn is_corrupt_packet(&self) -> bool {
        matches!(self, FronthaulError::Malformed { .. } | FronthaulError::Truncated { .. })
    }
}
