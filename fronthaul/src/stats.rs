//! Fronthaul Statistics
//! 
//! Lock-free counters bumped from the real-time thread, the workers and the
//! receive path, with a serializable snapshot for periodic reporting.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::debug;

use common::types::ChannelClass;

/// Receive-timing classification of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RxTiming {
    Early,
    OnTime,
    Late,
}

/// Engine counters
#[derive(Debug, Default)]
pub struct FronthaulStats {
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    tx_cplane_packets: AtomicU64,
    tx_uplane_packets: AtomicU64,
    late_transmissions: AtomicU64,
    capacity_exceeded: AtomicU64,
    egress_errors: AtomicU64,
    total_msgs_rcvd: AtomicU64,
    rx_bytes: AtomicU64,
    rx_cplane_packets: AtomicU64,
    rx_uplane_packets: AtomicU64,
    rx_on_time: AtomicU64,
    rx_early: AtomicU64,
    rx_late: AtomicU64,
    rx_corrupt: AtomicU64,
    rx_pkt_dupl: AtomicU64,
    rx_unknown_flow: AtomicU64,
    rx_pusch: AtomicU64,
    rx_prach: AtomicU64,
    rx_srs: AtomicU64,
    symbols_delivered: AtomicU64,
    partial_deliveries: AtomicU64,
    missed_symbols: AtomicU64,
    missed_slots: AtomicU64,
    delay_tx: AtomicU64,
    delay_rx: AtomicU64,
    delay_samples: AtomicU64,
    delay_avg_ns: AtomicI64,
    tx_bytes_per_sec: AtomicU64,
    rx_bytes_per_sec: AtomicU64,
    last_tx_bytes: AtomicU64,
    last_rx_bytes: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Default, Clone, Serialize)]
pub struct StatsSnapshot {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_cplane_packets: u64,
    pub tx_uplane_packets: u64,
    pub late_transmissions: u64,
    pub capacity_exceeded: u64,
    pub egress_errors: u64,
    pub total_msgs_rcvd: u64,
    pub rx_bytes: u64,
    pub rx_cplane_packets: u64,
    pub rx_uplane_packets: u64,
    pub rx_on_time: u64,
    pub rx_early: u64,
    pub rx_late: u64,
    pub rx_corrupt: u64,
    pub rx_pkt_dupl: u64,
    pub rx_unknown_flow: u64,
    pub rx_pusch: u64,
    pub rx_prach: u64,
    pub rx_srs: u64,
    pub symbols_delivered: u64,
    pub partial_deliveries: u64,
    pub missed_symbols: u64,
    pub missed_slots: u64,
    pub delay_tx: u64,
    pub delay_rx: u64,
    pub delay_samples: u64,
    /// Last averaged one-way delay
    pub delay_avg_ns: i64,
    pub tx_bytes_per_sec: u64,
    pub rx_bytes_per_sec: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl FronthaulStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A packet left through the sink
    pub fn record_tx(&self, bytes: usize, control: bool) {
        bump(&self.tx_packets);
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        if control {
            bump(&self.tx_cplane_packets);
        } else {
            bump(&self.tx_uplane_packets);
        }
    }

    pub fn record_late(&self) {
        bump(&self.late_transmissions);
    }

    pub fn record_capacity(&self) {
        bump(&self.capacity_exceeded);
    }

    /// The sink refused a packet
    pub fn record_egress_error(&self) {
        bump(&self.egress_errors);
    }

    /// Any frame handed to the validator, before decoding
    pub fn record_rx(&self, bytes: usize) {
        bump(&self.total_msgs_rcvd);
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_rx_plane(&self, control: bool) {
        if control {
            bump(&self.rx_cplane_packets);
        } else {
            bump(&self.rx_uplane_packets);
        }
    }

    pub fn record_rx_timing(&self, timing: RxTiming) {
        match timing {
            RxTiming::Early => bump(&self.rx_early),
            RxTiming::OnTime => bump(&self.rx_on_time),
            RxTiming::Late => bump(&self.rx_late),
        }
    }

    pub fn record_corrupt(&self) {
        bump(&self.rx_corrupt);
    }

    /// Sequence anomaly (duplicate, loss or reorder)
    pub fn record_dupl(&self) {
        bump(&self.rx_pkt_dupl);
    }

    pub fn record_unknown_flow(&self) {
        bump(&self.rx_unknown_flow);
    }

    /// Uplink U-plane packet of a given channel class
    pub fn record_rx_class(&self, class: ChannelClass) {
        match class {
            ChannelClass::Pusch => bump(&self.rx_pusch),
            ChannelClass::Prach => bump(&self.rx_prach),
            ChannelClass::Srs => bump(&self.rx_srs),
            ChannelClass::Pdsch | ChannelClass::CsiRs => {}
        }
    }

    pub fn record_delivery(&self, complete: bool) {
        bump(&self.symbols_delivered);
        if !complete {
            bump(&self.partial_deliveries);
        }
    }

    /// Clock drift, as absolute totals reported by the clock
    pub fn set_drift(&self, missed_symbols: u64, missed_slots: u64) {
        self.missed_symbols.store(missed_symbols, Ordering::Relaxed);
        self.missed_slots.store(missed_slots, Ordering::Relaxed);
    }

    /// Delay measurement message sent
    pub fn record_delay_tx(&self) {
        bump(&self.delay_tx);
    }

    /// Delay measurement message received
    pub fn record_delay_rx(&self) {
        bump(&self.delay_rx);
    }

    pub fn record_delay_sample(&self) {
        bump(&self.delay_samples);
    }

    pub fn set_delay_average(&self, ns: i64) {
        self.delay_avg_ns.store(ns, Ordering::Relaxed);
    }

    /// Update per-second throughput; called once per OTA second
    pub fn roll_second(&self) {
        let tx = self.tx_bytes.load(Ordering::Relaxed);
        let rx = self.rx_bytes.load(Ordering::Relaxed);
        let last_tx = self.last_tx_bytes.swap(tx, Ordering::Relaxed);
        let last_rx = self.last_rx_bytes.swap(rx, Ordering::Relaxed);
        self.tx_bytes_per_sec.store(tx.saturating_sub(last_tx), Ordering::Relaxed);
        self.rx_bytes_per_sec.store(rx.saturating_sub(last_rx), Ordering::Relaxed);
        debug!(
            "Throughput: TX {} B/s, RX {} B/s",
            tx.saturating_sub(last_tx),
            rx.saturating_sub(last_rx)
        );
    }

    /// Copy every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            tx_packets: load(&self.tx_packets),
            tx_bytes: load(&self.tx_bytes),
            tx_cplane_packets: load(&self.tx_cplane_packets),
            tx_uplane_packets: load(&self.tx_uplane_packets),
            late_transmissions: load(&self.late_transmissions),
            capacity_exceeded: load(&self.capacity_exceeded),
            egress_errors: load(&self.egress_errors),
            total_msgs_rcvd: load(&self.total_msgs_rcvd),
            rx_bytes: load(&self.rx_bytes),
            rx_cplane_packets: load(&self.rx_cplane_packets),
            rx_uplane_packets: load(&self.rx_uplane_packets),
            rx_on_time: load(&self.rx_on_time),
            rx_early: load(&self.rx_early),
            rx_late: load(&self.rx_late),
            rx_corrupt: load(&self.rx_corrupt),
            rx_pkt_dupl: load(&self.rx_pkt_dupl),
            rx_unknown_flow: load(&self.rx_unknown_flow),
            rx_pusch: load(&self.rx_pusch),
            rx_prach: load(&self.rx_prach),
            rx_srs: load(&self.rx_srs),
            symbols_delivered: load(&self.symbols_delivered),
            partial_deliveries: load(&self.partial_deliveries),
            missed_symbols: load(&self.missed_symbols),
            missed_slots: load(&self.missed_slots),
            delay_tx: load(&self.delay_tx),
            delay_rx: load(&self.delay_rx),
            delay_samples: load(&self.delay_samples),
            delay_avg_ns: self.delay_avg_ns.load(Ordering::Relaxed),
            tx_bytes_per_sec: load(&self.tx_bytes_per_sec),
            rx_bytes_per_sec: load(&self.rx_bytes_per_sec),
        }
    }
}
