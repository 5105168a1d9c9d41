//! Fronthaul Endpoints
//! 
//! Sink/source contracts between the fronthaul core and the I/O subsystem, and an
//! in-memory loopback endpoint used by the sample application and tests.

use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, trace};

use crate::{InterfaceError, PacketView};

/// Egress side of a physical endpoint; must never block
pub trait PacketSink: Send {
    /// Hand a packet to the wire
    fn transmit(&self, packet: PacketView) -> Result<(), InterfaceError>;
}

/// Ingress side of a physical endpoint; must never block
pub trait PacketSource: Send {
    /// Next received frame, if any is pending
    fn poll_receive(&mut self) -> Option<Bytes>;
}

/// Endpoint statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct EndpointStats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_dropped: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
}

#[derive(Debug, Default)]
struct EndpointCounters {
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    tx_dropped: AtomicU64,
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
}

impl EndpointCounters {
    fn snapshot(&self) -> EndpointStats {
        EndpointStats {
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_dropped: self.tx_dropped.load(Ordering::Relaxed),
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Create a connected loopback pair holding at most `capacity` frames in flight
pub fn loopback(capacity: usize) -> (LoopbackSink, LoopbackSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let counters = Arc::new(EndpointCounters::default());
    debug!("Loopback endpoint created with capacity {}", capacity);
    (
        LoopbackSink { tx, counters: counters.clone() },
        LoopbackSource { rx, counters },
    )
}

/// Transmit half of the loopback endpoint
#[derive(Clone)]
pub struct LoopbackSink {
    tx: mpsc::Sender<Bytes>,
    counters: Arc<EndpointCounters>,
}

impl LoopbackSink {
    /// Current counters
    pub fn stats(&self) -> EndpointStats {
        self.counters.snapshot()
    }
}

impl PacketSink for LoopbackSink {
    fn transmit(&self, packet: PacketView) -> Result<(), InterfaceError> {
        // The view is linearized here so attached payloads are released on return.
        let frame = packet.to_bytes();
        let len = frame.len() as u64;
        drop(packet);
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.counters.tx_packets.fetch_add(1, Ordering::Relaxed);
                self.counters.tx_bytes.fetch_add(len, Ordering::Relaxed);
                trace!("Loopback TX {} bytes", len);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.tx_dropped.fetch_add(1, Ordering::Relaxed);
                Err(InterfaceError::BufferFull)
            }
            Err(TrySendError::Closed(_)) => Err(InterfaceError::Closed),
        }
    }
}

/// Receive half of the loopback endpoint
pub struct LoopbackSource {
    rx: mpsc::Receiver<Bytes>,
    counters: Arc<EndpointCounters>,
}

impl LoopbackSource {
    /// Current counters
    pub fn stats(&self) -> EndpointStats {
        self.counters.snapshot()
    }

    /// Wait for the next frame; `None` once every sink is dropped
    pub async fn recv(&mut self) -> Option<Bytes> {
        let frame = self.rx.recv().await?;
        self.count_rx(&frame);
        Some(frame)
    }

    fn count_rx(&self, frame: &Bytes) {
        self.counters.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.counters.rx_bytes.fetch_add(frame.len() as u64, Ordering::Relaxed);
    }
}

impl PacketSource for LoopbackSource {
    fn poll_receive(&mut self) -> Option<Bytes> {
        match self.rx.try_recv() {
            Ok(frame) => {
                self.count_rx(&frame);
                Some(frame)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SharedPayload;

    #[test]
    fn test_loopback_poll() {
        let (sink, mut source) = loopback(4);
        assert!(source.poll_receive().is_none());

        sink.transmit(PacketView::from_bytes(Bytes::from_static(b"abc"))).unwrap();
        let frame = source.poll_receive().unwrap();
        assert_eq!(frame.as_ref(), b"abc");

        let stats = sink.stats();
        assert_eq!(stats.tx_packets, 1);
        assert_eq!(stats.tx_bytes, 3);
        assert_eq!(stats.rx_packets, 1);
    }

    #[test]
    fn test_loopback_full() {
        let (sink, _source) = loopback(1);
        sink.transmit(PacketView::from_bytes(Bytes::from_static(b"a"))).unwrap();
        let err = sink.transmit(PacketView::from_bytes(Bytes::from_static(b"b")));
        assert_eq!(err, Err(InterfaceError::BufferFull));
        assert_eq!(sink.stats().tx_dropped, 1);
    }

    #[test]
    fn test_transmit_releases_payload() {
        let (sink, mut source) = loopback(2);
        let payload = SharedPayload::new(vec![7u8; 4]);
        let mut view = PacketView::from_bytes(Bytes::from_static(&[1]));
        view.attach(&payload, 0..4).unwrap();
        sink.transmit(view).unwrap();
        assert_eq!(payload.ref_count(), 1);
        assert_eq!(source.poll_receive().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_loopback_async_recv() {
        let (sink, mut source) = loopback(2);
        tokio::spawn(async move {
            sink.transmit(PacketView::from_bytes(Bytes::from_static(b"xyz"))).unwrap();
        });
        let frame = source.recv().await.unwrap();
        assert_eq!(frame.as_ref(), b"xyz");
    }
}
