//! Egress Ring
//! 
//! One bounded queue per future symbol, created up front. Producers enqueue a packet
//! for the absolute symbol it must leave on; the real-time thread drains exactly the
//! queue of the current symbol into the sink.

use std::sync::Arc;

use interfaces::{PacketSink, PacketView};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use crate::stats::FronthaulStats;
use crate::timing::OtaCursor;
use crate::FronthaulError;

/// A packet waiting for its transmission symbol
#[derive(Debug)]
pub struct EgressPacket {
    pub send_abs: u64,
    pub control: bool,
    pub packet: PacketView,
}

/// Create the ring: `horizon` symbol queues of `capacity` packets each
pub fn egress_ring(horizon: usize, capacity: usize, cursor: OtaCursor) -> (EgressProducer, EgressDispatcher) {
    let horizon = horizon.max(2);
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..horizon).map(|_| mpsc::channel(capacity.max(1))).unzip();
    debug!("Egress ring: {} symbol queues x {} packets", horizon, capacity);
    (
        EgressProducer { queues: senders.into(), cursor, horizon: horizon as u64 },
        EgressDispatcher { queues: receivers, horizon: horizon as u64 },
    )
}

/// Enqueue side, shared by the codec workers
#[derive(Clone)]
pub struct EgressProducer {
    queues: Arc<[mpsc::Sender<EgressPacket>]>,
    cursor: OtaCursor,
    horizon: u64,
}

impl EgressProducer {
    /// Symbols ahead of the cursor a packet may be queued
    pub fn horizon(&self) -> u64 {
        self.horizon
    }

    /// Queue a packet for symbol `send_abs`
    ///
    /// A symbol at or behind the published OTA symbol is a late transmission and the
    /// packet is not queued.
    pub fn enqueue(&self, send_abs: u64, packet: PacketView, control: bool) -> Result<(), FronthaulError> {
        let current = self.cursor.load();
        if send_abs <= current {
            return Err(FronthaulError::LateTransmission { target: send_abs, current });
        }
        if send_abs - current >= self.horizon {
            return Err(FronthaulError::CapacityExceeded("egress horizon"));
        }
        let queue = &self.queues[(send_abs % self.horizon) as usize];
        match queue.try_send(EgressPacket { send_abs, control, packet }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(FronthaulError::CapacityExceeded("egress queue")),
            Err(TrySendError::Closed(_)) => Err(FronthaulError::InvalidState("egress ring closed".into())),
        }
    }
}

/// Drain side, owned by the real-time thread
pub struct EgressDispatcher {
    queues: Vec<mpsc::Receiver<EgressPacket>>,
    horizon: u64,
}

impl EgressDispatcher {
    /// Hand every packet due at `abs_symbol` to the sink; returns how many were sent
    ///
    /// Packets left over from a skipped symbol are counted as late and dropped.
    pub fn drain<S: PacketSink + ?Sized>(&mut self, abs_symbol: u64, sink: &S, stats: &FronthaulStats) -> usize {
        let queue = &mut self.queues[(abs_symbol % self.horizon) as usize];
        let mut sent = 0;
        while let Ok(entry) = queue.try_recv() {
            if entry.send_abs != abs_symbol {
                warn!(
                    "Dropping packet for symbol {} found at symbol {}",
                    entry.send_abs, abs_symbol
                );
                stats.record_late();
                continue;
            }
            let len = entry.packet.len();
            match sink.transmit(entry.packet) {
                Ok(()) => {
                    stats.record_tx(len, entry.control);
                    sent += 1;
                }
                Err(e) => {
                    warn!("Egress failed at symbol {}: {}", abs_symbol, e);
                    stats.record_egress_error();
                }
            }
        }
        if sent > 0 {
            trace!("Symbol {}: {} packets out", abs_symbol, sent);
        }
        sent
    }
}
