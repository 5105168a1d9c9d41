//! Sequence Engine
//! 
//! Independent 8-bit transmit and receive counters per flow and plane. Counters are
//! atomics so the engine is shared by reference between the real-time thread and
//! the codec workers; each counter is still only advanced by its owning path.

use std::sync::atomic::{AtomicU8, Ordering};

use common::types::{ChannelKey, Plane};
use tracing::{debug, trace};

use crate::channel::ChannelLayout;
use crate::FronthaulError;

/// Outcome of a receive-side check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqCheck {
    InSequence,
    /// The expected value before resynchronization
    OutOfOrder { expected: u8 },
}

/// Per-flow sequence counters
pub struct SequenceEngine {
    layout: ChannelLayout,
    tx: Vec<AtomicU8>,
    rx_expected: Vec<AtomicU8>,
}

/// Borrowed transmit counter of one flow and plane
pub struct TxSequence<'a> {
    counter: &'a AtomicU8,
}

impl TxSequence<'_> {
    /// Current value, then advance
    pub fn next(&self) -> u8 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl SequenceEngine {
    pub fn new(layout: &ChannelLayout) -> Self {
        let slots = layout.channel_count() * Plane::ALL.len();
        Self {
            layout: layout.clone(),
            tx: (0..slots).map(|_| AtomicU8::new(0)).collect(),
            rx_expected: (0..slots).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    fn slot(&self, key: ChannelKey, plane: Plane) -> Result<usize, FronthaulError> {
        self.layout
            .channel_index(key)
            .map(|index| index * Plane::ALL.len() + plane.index())
            .ok_or_else(|| FronthaulError::InvalidState(format!("no flow for {:?}", key)))
    }

    /// Return the current transmit value and advance, wrapping 255 to 0
    pub fn next_tx_seq(&self, key: ChannelKey, plane: Plane) -> Result<u8, FronthaulError> {
        let seq = self.tx[self.slot(key, plane)?].fetch_add(1, Ordering::Relaxed);
        trace!("TX seq {} for {:?}/{:?}", seq, key, plane);
        Ok(seq)
    }

    /// Counter handle for a packetizer that may emit several messages
    pub fn tx_counter(&self, key: ChannelKey, plane: Plane) -> Result<TxSequence<'_>, FronthaulError> {
        let slot = self.slot(key, plane)?;
        Ok(TxSequence { counter: &self.tx[slot] })
    }

    /// Check a received value; the expected value always becomes `received + 1`
    pub fn validate_rx_seq(
        &self,
        key: ChannelKey,
        plane: Plane,
        received: u8,
    ) -> Result<SeqCheck, FronthaulError> {
        let slot = self.slot(key, plane)?;
        let expected = self.rx_expected[slot].swap(received.wrapping_add(1), Ordering::Relaxed);
        if expected == received {
            Ok(SeqCheck::InSequence)
        } else {
            debug!(
                "Sequence mismatch on {:?}/{:?}: expected {}, received {}",
                key, plane, expected, received
            );
            Ok(SeqCheck::OutOfOrder { expected })
        }
    }

    /// Next value the receive side expects
    pub fn expected(&self, key: ChannelKey, plane: Plane) -> Result<u8, FronthaulError> {
        Ok(self.rx_expected[self.slot(key, plane)?].load(Ordering::Relaxed))
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in self.tx.iter().chain(self.rx_expected.iter()) {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
