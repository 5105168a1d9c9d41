//! OTA Clock
//! 
//! Drives a monotonic absolute symbol index from the wall clock. The index counts
//! symbols since the (offset-adjusted) epoch, so frame numbering follows from it
//! directly and stays aligned with the time source across restarts.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::types::{
    SubcarrierSpacing, FRAMES_PER_SECOND, SFN_PERIOD, SUBFRAMES_PER_FRAME, SYMBOLS_PER_SLOT,
};
use tracing::{debug, info, trace, warn};

use crate::config::{DriftPolicy, WaitMode};
use crate::FronthaulError;

const NS_PER_SEC: u64 = 1_000_000_000;

/// Source of wall-clock time
pub trait WallClock: Send {
    /// Nanoseconds since the Unix epoch
    fn now_ns(&self) -> u64;

    /// Whether the time source is locked to the grandmaster
    fn is_synchronized(&self) -> bool {
        true
    }

    /// Return once `now_ns() >= deadline_ns`
    fn wait_until(&self, deadline_ns: u64) {
        while self.now_ns() < deadline_ns {
            std::hint::spin_loop();
        }
    }
}

/// System real-time clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    mode: WaitMode,
}

impl SystemClock {
    pub fn new(mode: WaitMode) -> Self {
        Self { mode }
    }
}

impl WallClock for SystemClock {
    fn now_ns(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }

    fn wait_until(&self, deadline_ns: u64) {
        loop {
            let now = self.now_ns();
            if now >= deadline_ns {
                return;
            }
            match self.mode {
                WaitMode::Spin => std::hint::spin_loop(),
                WaitMode::SpinYield => std::thread::yield_now(),
                WaitMode::Sleep => std::thread::sleep(Duration::from_nanos(deadline_ns - now)),
            }
        }
    }
}

/// Manually driven clock for deterministic runs
///
/// Clones share the same time. Waiting jumps straight to the deadline.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
    synchronized: Arc<AtomicBool>,
}

impl ManualClock {
    pub fn new(start_ns: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ns)),
            synchronized: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set(&self, ns: u64) {
        self.now.store(ns, Ordering::Release);
    }

    pub fn advance(&self, ns: u64) {
        self.now.fetch_add(ns, Ordering::AcqRel);
    }

    pub fn set_synchronized(&self, synchronized: bool) {
        self.synchronized.store(synchronized, Ordering::Release);
    }
}

impl WallClock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }

    fn is_synchronized(&self) -> bool {
        self.synchronized.load(Ordering::Acquire)
    }

    fn wait_until(&self, deadline_ns: u64) {
        self.now.fetch_max(deadline_ns, Ordering::AcqRel);
    }
}

/// Air-interface position of one absolute symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OtaPosition {
    /// Symbols since the adjusted epoch
    pub abs_symbol: u64,
    /// System frame number (0..1024)
    pub frame: u16,
    pub subframe: u8,
    /// Slot within the subframe
    pub slot: u8,
    pub symbol: u8,
    /// Symbol index within the current second
    pub symbol_in_second: u32,
}

impl OtaPosition {
    /// Frame id as carried on the wire
    pub fn frame_id(&self) -> u8 {
        (self.frame & 0xFF) as u8
    }

    /// Absolute slot index
    pub fn abs_slot(&self) -> u64 {
        self.abs_symbol / SYMBOLS_PER_SLOT as u64
    }

    /// Whether this is the first symbol of a slot
    pub fn is_slot_start(&self) -> bool {
        self.symbol == 0
    }
}

/// Pure mapping between absolute symbols and air positions for one numerology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeline {
    scs: SubcarrierSpacing,
}

impl Timeline {
    pub fn new(scs: SubcarrierSpacing) -> Self {
        Self { scs }
    }

    pub fn scs(&self) -> SubcarrierSpacing {
        self.scs
    }

    pub fn symbols_per_second(&self) -> u64 {
        self.scs.symbols_per_second() as u64
    }

    fn symbols_per_frame(&self) -> u64 {
        self.symbols_per_second() / FRAMES_PER_SECOND as u64
    }

    fn symbols_per_subframe(&self) -> u64 {
        self.scs.slots_per_subframe() as u64 * SYMBOLS_PER_SLOT as u64
    }

    /// Nanoseconds from the start of the second to symbol `n` of that second
    pub fn boundary(&self, n: u64) -> u64 {
        n * NS_PER_SEC / self.symbols_per_second()
    }

    /// Duration of symbol `n` of a second; alternates so a second sums exactly
    pub fn symbol_duration_ns(&self, n: u64) -> u64 {
        self.boundary(n + 1) - self.boundary(n)
    }

    /// Air position of an absolute symbol
    pub fn position(&self, abs_symbol: u64) -> OtaPosition {
        let sps = self.symbols_per_second();
        let second = abs_symbol / sps;
        let in_second = abs_symbol % sps;
        let slot_in_second = in_second / SYMBOLS_PER_SLOT as u64;
        let slots_per_subframe = self.scs.slots_per_subframe() as u64;
        let subframe_in_second = slot_in_second / slots_per_subframe;
        let frame = (second * FRAMES_PER_SECOND as u64 + subframe_in_second / SUBFRAMES_PER_FRAME as u64)
            % SFN_PERIOD as u64;
        OtaPosition {
            abs_symbol,
            frame: frame as u16,
            subframe: (subframe_in_second % SUBFRAMES_PER_FRAME as u64) as u8,
            slot: (slot_in_second % slots_per_subframe) as u8,
            symbol: (in_second % SYMBOLS_PER_SLOT as u64) as u8,
            symbol_in_second: in_second as u32,
        }
    }

    /// Absolute symbol of a received air position, taken nearest to `reference`
    ///
    /// The 8-bit frame id is resolved within ±128 frames of the reference frame.
    pub fn abs_from_air(
        &self,
        reference: u64,
        frame_id: u8,
        subframe: u8,
        slot: u8,
        symbol: u8,
    ) -> Option<u64> {
        if subframe as u32 >= SUBFRAMES_PER_FRAME
            || slot as u32 >= self.scs.slots_per_subframe()
            || symbol as u32 >= SYMBOLS_PER_SLOT
        {
            return None;
        }
        let per_frame = self.symbols_per_frame();
        let reference_frame_start = reference - reference % per_frame;
        let reference_frame_id = ((reference / per_frame) & 0xFF) as u8;
        let diff = frame_id.wrapping_sub(reference_frame_id) as i8 as i64;
        let frame_start = reference_frame_start as i64 + diff * per_frame as i64;
        let within = subframe as u64 * self.symbols_per_subframe()
            + (slot as u64 * SYMBOLS_PER_SLOT as u64)
            + symbol as u64;
        u64::try_from(frame_start).ok().map(|start| start + within)
    }
}

/// Shared, read-only view of the last published OTA symbol
#[derive(Debug, Clone, Default)]
pub struct OtaCursor(Arc<AtomicU64>);

impl OtaCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn publish(&self, abs_symbol: u64) {
        self.0.store(abs_symbol, Ordering::Release);
    }
}

/// Symbol-rate clock for the real-time thread
pub struct OtaClock<C: WallClock> {
    clock: C,
    timeline: Timeline,
    offset_ns: i64,
    drift_policy: DriftPolicy,
    next_abs: Option<u64>,
    current: Option<OtaPosition>,
    missed_symbols: u64,
    missed_slots: u64,
    cursor: OtaCursor,
}

impl<C: WallClock> OtaClock<C> {
    /// Create a clock; `offset_ns` is subtracted from wall time before frame numbering
    pub fn new(clock: C, scs: SubcarrierSpacing, offset_ns: i64, drift_policy: DriftPolicy) -> Self {
        Self {
            clock,
            timeline: Timeline::new(scs),
            offset_ns,
            drift_policy,
            next_abs: None,
            current: None,
            missed_symbols: 0,
            missed_slots: 0,
            cursor: OtaCursor::new(),
        }
    }

    pub fn timeline(&self) -> Timeline {
        self.timeline
    }

    pub fn wall_clock(&self) -> &C {
        &self.clock
    }

    /// Cursor published on every tick
    pub fn cursor(&self) -> OtaCursor {
        self.cursor.clone()
    }

    /// Wall time of the start of an absolute symbol
    pub fn wall_ns_of(&self, abs_symbol: u64) -> u64 {
        let sps = self.timeline.symbols_per_second();
        let adjusted = (abs_symbol / sps) * NS_PER_SEC + self.timeline.boundary(abs_symbol % sps);
        (adjusted as i64).saturating_add(self.offset_ns).max(0) as u64
    }

    /// Absolute symbol containing a wall time
    pub fn abs_at(&self, wall_ns: u64) -> u64 {
        let adjusted = (wall_ns as i64).saturating_sub(self.offset_ns).max(0) as u64;
        let sps = self.timeline.symbols_per_second();
        let second = adjusted / NS_PER_SEC;
        let into = adjusted % NS_PER_SEC;
        let mut n = into * sps / NS_PER_SEC;
        // Integer boundaries round down, so the symbol may start one nanosecond later.
        if n + 1 < sps && self.timeline.boundary(n + 1) <= into {
            n += 1;
        }
        second * sps + n
    }

    /// Align to the next symbol boundary after the current wall time
    pub fn start(&mut self) -> OtaPosition {
        if !self.clock.is_synchronized() {
            warn!("OTA clock started without time synchronization");
        }
        let next = self.abs_at(self.clock.now_ns()) + 1;
        self.next_abs = Some(next);
        let position = self.timeline.position(next);
        info!(
            "OTA clock started at frame {} subframe {} slot {} symbol {}",
            position.frame, position.subframe, position.slot, position.symbol
        );
        position
    }

    /// Wait for the next symbol boundary and return its position
    pub fn tick(&mut self) -> Result<OtaPosition, FronthaulError> {
        let mut abs = match self.next_abs {
            Some(abs) => abs,
            None => {
                self.start();
                self.next_abs.ok_or(FronthaulError::NotInitialized)?
            }
        };
        let deadline = self.wall_ns_of(abs);
        self.clock.wait_until(deadline);
        let now = self.clock.now_ns();
        let lag = now.saturating_sub(deadline);

        let symbol_ns = self.timeline.scs().symbol_duration_ns().max(1);
        let slot_ns = self.timeline.scs().slot_duration_ns();
        if lag > 2 * symbol_ns {
            self.missed_symbols += lag / symbol_ns;
            debug!("OTA clock {} ns behind at symbol {}", lag, abs);
        }
        if lag > 2 * slot_ns {
            self.missed_slots += lag / slot_ns;
            warn!(
                "OTA clock drift: {} slots behind, total missed {}",
                lag / slot_ns,
                self.missed_slots
            );
            if self.drift_policy == DriftPolicy::Stop {
                return Err(FronthaulError::ClockDrift {
                    missed_symbols: self.missed_symbols,
                    missed_slots: self.missed_slots,
                });
            }
            abs = self.abs_at(now);
        } else if abs % self.timeline.symbols_per_second() == 0 {
            // Re-derive the frame anchor from the time source once per second
            let wall_abs = self.abs_at(now);
            let sps = self.timeline.symbols_per_second();
            if wall_abs / sps != abs / sps {
                warn!(
                    "OTA second mismatch: expected {}, wall clock at {}; re-anchoring",
                    abs / sps,
                    wall_abs / sps
                );
                abs = wall_abs;
            }
        }

        self.next_abs = Some(abs + 1);
        let position = self.timeline.position(abs);
        self.current = Some(position);
        self.cursor.publish(abs);
        trace!(
            "OTA tick: frame {} subframe {} slot {} symbol {}",
            position.frame, position.subframe, position.slot, position.symbol
        );
        Ok(position)
    }

    /// Position of the last tick
    pub fn now(&self) -> Option<OtaPosition> {
        self.current
    }

    pub fn missed_symbols(&self) -> u64 {
        self.missed_symbols
    }

    pub fn missed_slots(&self) -> u64 {
        self.missed_slots
    }
}
