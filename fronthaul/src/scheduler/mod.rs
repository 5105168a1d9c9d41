//! Transmission Scheduler
//! 
//! On every OTA tick the scheduler looks ahead by each plane's timing budget and
//! plans one job per channel with work due at the target symbol. Jobs are encoded
//! by the [`JobExecutor`], inline or on the worker pool, into the egress ring.
//! Sections added to a slot after the planner passed their symbols are counted as
//! late when the slot is retired.

pub mod egress;
pub mod tdd;

pub use egress::{egress_ring, EgressDispatcher, EgressPacket, EgressProducer};
pub use tdd::{SymbolType, TddPattern};

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use common::types::{
    ChannelClass, ChannelKey, Direction, EaxcFields, EaxcLayout, Plane, SUBCARRIERS_PER_PRB, SYMBOLS_PER_SLOT,
};
use interfaces::PacketView;
use num_complex::Complex;
use tracing::{debug, trace, warn};

use crate::channel::ChannelLayout;
use crate::codec::{encode_cplane, encode_symbol, CPlaneTx, IqSource, RadioAppHeader, UPlaneTx};
use crate::config::{FronthaulConfig, LatePolicy, Role};
use crate::section::{SectionContext, SectionDatabase, SectionDescriptor};
use crate::sequence::SequenceEngine;
use crate::stats::FronthaulStats;
use crate::timing::{OtaPosition, Timeline, TimingBudget};
use crate::FronthaulError;

/// Transmission state of one (direction, channel, plane)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Nothing planned
    Idle = 0,
    /// A job is planned and not yet encoded
    Armed = 1,
    /// The last planned job reached the egress ring
    Sent = 2,
}

impl TxState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => TxState::Armed,
            2 => TxState::Sent,
            _ => TxState::Idle,
        }
    }
}

/// State table shared by the planner and the executors
#[derive(Debug)]
pub struct ChannelStates {
    states: Vec<AtomicU8>,
}

impl ChannelStates {
    fn new(channels: usize) -> Self {
        Self { states: (0..channels * Plane::ALL.len()).map(|_| AtomicU8::new(TxState::Idle as u8)).collect() }
    }

    fn index(channel: usize, plane: Plane) -> usize {
        channel * Plane::ALL.len() + plane.index()
    }

    pub fn get(&self, channel: usize, plane: Plane) -> TxState {
        self.states
            .get(Self::index(channel, plane))
            .map_or(TxState::Idle, |s| TxState::from_raw(s.load(Ordering::Acquire)))
    }

    /// Arm a channel; returns the state it left
    fn arm(&self, channel: usize, plane: Plane) -> TxState {
        self.set(channel, plane, TxState::Armed)
    }

    fn set(&self, channel: usize, plane: Plane, state: TxState) -> TxState {
        self.states
            .get(Self::index(channel, plane))
            .map_or(TxState::Idle, |s| TxState::from_raw(s.swap(state as u8, Ordering::AcqRel)))
    }
}

/// One unit of encode work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxJob {
    pub key: ChannelKey,
    /// Dense channel index, also used to pick the worker
    pub channel: usize,
    pub plane: Plane,
    /// Air position the packets describe
    pub target: OtaPosition,
    /// Symbol the packets leave on
    pub send_abs: u64,
    /// Section database ring position of the target slot
    pub context: usize,
}

/// Sections planned for the slot one (direction, plane) is looking at
#[derive(Debug, Default)]
struct PlanLedger {
    slot: Option<u64>,
    /// First symbol of the slot the planner visited
    from: u8,
    /// Per channel, per section index
    planned: Vec<Vec<bool>>,
}

impl PlanLedger {
    fn index(direction: Direction, plane: Plane) -> usize {
        direction.index() * Plane::ALL.len() + plane.index()
    }

    fn open(&mut self, slot: u64, from: u8, channels: usize) {
        self.slot = Some(slot);
        self.from = from;
        self.planned.resize_with(channels, Vec::new);
        self.planned.iter_mut().for_each(Vec::clear);
    }
}

/// Looks ahead from the current OTA symbol and plans jobs
pub struct TransmissionScheduler {
    role: Role,
    layout: ChannelLayout,
    timeline: Timeline,
    budget: TimingBudget,
    tdd: TddPattern,
    db: Arc<SectionDatabase>,
    states: Arc<ChannelStates>,
    stats: Arc<FronthaulStats>,
    ledgers: Mutex<Vec<PlanLedger>>,
}

impl TransmissionScheduler {
    pub fn new(
        config: &FronthaulConfig,
        layout: &ChannelLayout,
        timeline: Timeline,
        db: Arc<SectionDatabase>,
        stats: Arc<FronthaulStats>,
    ) -> Result<Self, FronthaulError> {
        let budget = TimingBudget::from_config(&config.timing, timeline.scs());
        debug!(
            "Scheduler advances: C-plane DL {} UL {}, U-plane {}, RU UL delay {} symbols",
            budget.cp_dl, budget.cp_ul, budget.up, budget.ru_ul_delay
        );
        Ok(Self {
            role: config.role,
            layout: layout.clone(),
            timeline,
            budget,
            tdd: TddPattern::parse(&config.tdd_pattern)?,
            db,
            states: Arc::new(ChannelStates::new(layout.channel_count())),
            stats,
            ledgers: Mutex::new((0..Direction::ALL.len() * Plane::ALL.len()).map(|_| PlanLedger::default()).collect()),
        })
    }

    pub fn budget(&self) -> &TimingBudget {
        &self.budget
    }

    pub fn states(&self) -> Arc<ChannelStates> {
        self.states.clone()
    }

    /// Append the jobs due after OTA symbol `now_abs` to `jobs`
    ///
    /// Phase violations on a context are reported after every other channel was planned.
    pub fn plan(&self, now_abs: u64, jobs: &mut Vec<TxJob>) -> Result<(), FronthaulError> {
        let send_abs = now_abs + self.budget.prepare_ahead;
        let mut fault = None;
        let mut visit = |direction: Direction, plane: Plane, target_abs: u64| {
            if let Err(e) = self.plan_flows(direction, plane, target_abs, send_abs, jobs) {
                fault.get_or_insert(e);
            }
        };
        match self.role {
            Role::Du => {
                visit(Direction::Downlink, Plane::Control, send_abs + self.budget.cp_dl);
                visit(Direction::Downlink, Plane::User, send_abs + self.budget.up);
                visit(Direction::Uplink, Plane::Control, send_abs + self.budget.cp_ul);
            }
            Role::Ru => {
                if let Some(target) = send_abs.checked_sub(self.budget.ru_ul_delay) {
                    visit(Direction::Uplink, Plane::User, target);
                }
            }
        }
        match fault {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn plan_flows(
        &self,
        direction: Direction,
        plane: Plane,
        target_abs: u64,
        send_abs: u64,
        jobs: &mut Vec<TxJob>,
    ) -> Result<(), FronthaulError> {
        let target = self.timeline.position(target_abs);
        let slot = target.abs_slot();
        let mut ledgers = self
            .ledgers
            .lock()
            .map_err(|_| FronthaulError::InvalidState("poisoned plan ledger".into()))?;
        let ledger = &mut ledgers[PlanLedger::index(direction, plane)];
        if ledger.slot != Some(slot) {
            self.retire(direction, plane, ledger);
            ledger.open(slot, target.symbol, self.layout.channel_count());
        }
        if !self.tdd.allows(direction, slot, target.symbol) {
            return Ok(());
        }
        let context = self.db.context_for_slot(slot);
        for key in self.layout.channels(direction) {
            let Some(channel) = self.layout.channel_index(key) else {
                continue;
            };
            let due = {
                let ctx = self.db.read(key, context)?;
                match ledger.planned.get_mut(channel) {
                    Some(marks) => mark_due(&ctx, slot, plane, target.symbol, marks),
                    None => false,
                }
            };
            if !due {
                continue;
            }
            if self.states.arm(channel, plane) == TxState::Armed {
                debug!("{:?} {:?} re-armed before its previous job was encoded", key, plane);
            }
            jobs.push(TxJob { key, channel, plane, target, send_abs, context });
        }
        Ok(())
    }

    /// Count the sections of the ledger's slot that were never planned although the
    /// planner visited one of their symbols; returns the number found
    fn retire(&self, direction: Direction, plane: Plane, ledger: &PlanLedger) -> usize {
        let Some(slot) = ledger.slot else {
            return 0;
        };
        let context = self.db.context_for_slot(slot);
        let mut missed = 0;
        for key in self.layout.channels(direction) {
            let Some(channel) = self.layout.channel_index(key) else {
                continue;
            };
            // A context already rebuilt for a later slot has nothing left to check
            let Ok(ctx) = self.db.read(key, context) else {
                continue;
            };
            if ctx.slot() != Some(slot) {
                continue;
            }
            let marks = ledger.planned.get(channel).map_or(&[][..], Vec::as_slice);
            for (index, section) in ctx.sections().iter().enumerate() {
                if marks.get(index).copied().unwrap_or(false) || !self.visited(direction, plane, slot, ledger.from, section) {
                    continue;
                }
                missed += 1;
                self.stats.record_late();
                warn!(
                    "{:?} {:?} section {} of slot {} was added after its symbols were planned",
                    key, plane, section.section_id, slot
                );
            }
        }
        missed
    }

    /// Whether the planner passed a symbol on which `section` had to be sent
    fn visited(&self, direction: Direction, plane: Plane, slot: u64, from: u8, section: &SectionDescriptor) -> bool {
        let start = section.symbol_start as u16;
        let end = match plane {
            Plane::Control => start + 1,
            Plane::User => section.symbol_end(),
        };
        (start.max(from as u16)..end.min(SYMBOLS_PER_SLOT as u16)).any(|s| self.tdd.allows(direction, slot, s as u8))
    }
}

/// Mark the sections `plane` sends at `symbol`; returns whether there is any
fn mark_due(ctx: &SectionContext, slot: u64, plane: Plane, symbol: u8, marks: &mut Vec<bool>) -> bool {
    if ctx.slot() != Some(slot) {
        return false;
    }
    if marks.len() < ctx.len() {
        marks.resize(ctx.len(), false);
    }
    let mut due = false;
    for (index, section) in ctx.sections().iter().enumerate() {
        let sends = match plane {
            Plane::Control => section.symbol_start == symbol,
            Plane::User => section.covers_symbol(symbol),
        };
        if sends {
            marks[index] = true;
            due = true;
        }
    }
    due
}

/// Encodes planned jobs into the egress ring; shared by the worker threads
pub struct JobExecutor {
    layout: ChannelLayout,
    eaxc: EaxcLayout,
    mtu: usize,
    late_policy: LatePolicy,
    prach_filter: u8,
    db: Arc<SectionDatabase>,
    sequences: Arc<SequenceEngine>,
    egress: EgressProducer,
    stats: Arc<FronthaulStats>,
    states: Arc<ChannelStates>,
    fault: Mutex<Option<FronthaulError>>,
}

impl JobExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &FronthaulConfig,
        layout: &ChannelLayout,
        db: Arc<SectionDatabase>,
        sequences: Arc<SequenceEngine>,
        egress: EgressProducer,
        stats: Arc<FronthaulStats>,
        states: Arc<ChannelStates>,
    ) -> Self {
        Self {
            layout: layout.clone(),
            eaxc: config.eaxc,
            mtu: config.mtu,
            late_policy: config.late_policy,
            prach_filter: config.prach.filter_index,
            db,
            sequences,
            egress,
            stats,
            states,
            fault: Mutex::new(None),
        }
    }

    /// Wire eAxC id of a channel
    pub fn eaxc_of(&self, key: ChannelKey) -> u16 {
        self.eaxc.compose(EaxcFields {
            cu_port: key.port,
            band_sector: 0,
            carrier: key.carrier,
            ru_port: key.antenna,
        })
    }

    /// Run a job and apply the fault policy; fatal errors are kept for [`JobExecutor::take_fault`]
    pub fn dispatch(&self, job: &TxJob) {
        if let Err(e) = self.execute(job) {
            let fatal = matches!(e, FronthaulError::LateTransmission { .. }) && self.late_policy == LatePolicy::Strict;
            if fatal {
                if let Ok(mut slot) = self.fault.lock() {
                    slot.get_or_insert(e);
                }
            } else {
                warn!("Job for {:?} {:?} failed: {}", job.key, job.plane, e);
            }
        }
    }

    /// First fatal error raised since the last call
    pub fn take_fault(&self) -> Option<FronthaulError> {
        self.fault.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Encode a job and queue its packets; returns the number of packets queued
    pub fn execute(&self, job: &TxJob) -> Result<usize, FronthaulError> {
        let ctx = self.db.read(job.key, job.context)?;
        if ctx.slot() != Some(job.target.abs_slot()) {
            return Ok(0);
        }
        let carrier_prbs = self
            .layout
            .prbs(job.key.direction, job.key.carrier)
            .ok_or_else(|| FronthaulError::InvalidState(format!("no carrier {}", job.key.carrier)))?;
        let filter = if self.layout.channel_class(job.key) == ChannelClass::Prach { self.prach_filter } else { 0 };
        let header = RadioAppHeader::from_position(job.key.direction, &job.target, filter);
        let eaxc = self.eaxc_of(job.key);
        let seq = self.sequences.tx_counter(job.key, job.plane)?;

        let packets: Vec<PacketView> = match job.plane {
            Plane::Control => {
                let sections: Vec<&SectionDescriptor> = ctx.starting_at(job.target.symbol).map(|(_, s)| s).collect();
                let tx = CPlaneTx { eaxc, header, carrier_prbs, mtu: self.mtu };
                encode_cplane(&tx, &sections, &seq)?.into_iter().map(PacketView::from_bytes).collect()
            }
            Plane::User => {
                let symbol = job.target.symbol;
                let due: Vec<&SectionDescriptor> = ctx.iterate_due(symbol).map(|(_, s)| s).collect();
                // Sections without attached IQ go out as zeros
                let silence: Vec<Vec<Complex<i16>>> = due
                    .iter()
                    .map(|s| match (ctx.payload(), s.symbols[symbol as usize]) {
                        (Some(_), Some(_)) => Vec::new(),
                        _ => vec![Complex::default(); s.prb_count as usize * SUBCARRIERS_PER_PRB],
                    })
                    .collect();
                let sources: Vec<(&SectionDescriptor, IqSource<'_>)> = due
                    .iter()
                    .zip(&silence)
                    .map(|(s, zeros)| {
                        let source = match (ctx.payload(), s.symbols[symbol as usize]) {
                            (Some(payload), Some(p)) => IqSource::Encoded { payload, range: p.offset..p.offset + p.len },
                            _ => IqSource::Samples(zeros),
                        };
                        (*s, source)
                    })
                    .collect();
                let tx = UPlaneTx { eaxc, header, carrier_prbs, mtu: self.mtu };
                encode_symbol(&tx, &sources, &seq)?
            }
        };
        drop(ctx);

        let control = job.plane == Plane::Control;
        let mut queued = 0;
        for packet in packets {
            match self.egress.enqueue(job.send_abs, packet, control) {
                Ok(()) => queued += 1,
                Err(e @ FronthaulError::LateTransmission { .. }) => {
                    self.stats.record_late();
                    warn!("Late {:?} {:?} for symbol {}: {}", job.key, job.plane, job.target.abs_symbol, e);
                    return Err(e);
                }
                Err(e) => {
                    self.stats.record_capacity();
                    return Err(e);
                }
            }
        }
        self.states.set(job.channel, job.plane, TxState::Sent);
        trace!(
            "{:?} {:?} symbol {}: {} packets queued for {}",
            job.key,
            job.plane,
            job.target.abs_symbol,
            queued,
            job.send_abs
        );
        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_cplane, decode_uplane, FlowParams};
    use crate::codec::compression::CompressionParams;
    use crate::timing::OtaCursor;
    use interfaces::{loopback, PacketSource, SharedPayload};

    const CONFIG: &str = r#"
numerologies:
  - { numerology: 1, dl_prbs: 106, ul_prbs: 106, dl_antennas: 1, ul_antennas: 1 }
"#;

    struct Fixture {
        config: FronthaulConfig,
        layout: ChannelLayout,
        timeline: Timeline,
        db: Arc<SectionDatabase>,
        cursor: OtaCursor,
        scheduler: TransmissionScheduler,
        executor: JobExecutor,
        dispatcher: EgressDispatcher,
        stats: Arc<FronthaulStats>,
    }

    fn fixture(yaml: &str) -> Fixture {
        let config = FronthaulConfig::from_yaml_str(yaml).unwrap();
        let layout = ChannelLayout::from_config(&config);
        let timeline = Timeline::new(config.subcarrier_spacing().unwrap());
        let db = Arc::new(SectionDatabase::new(&layout, config.section_db.ring_depth, 8));
        let cursor = OtaCursor::new();
        let (producer, dispatcher) = egress_ring(56, 16, cursor.clone());
        let stats = Arc::new(FronthaulStats::new());
        let scheduler = TransmissionScheduler::new(&config, &layout, timeline, db.clone(), stats.clone()).unwrap();
        let executor = JobExecutor::new(
            &config,
            &layout,
            db.clone(),
            Arc::new(SequenceEngine::new(&layout)),
            producer,
            stats.clone(),
            scheduler.states(),
        );
        Fixture { config, layout, timeline, db, cursor, scheduler, executor, dispatcher, stats }
    }

    fn dl() -> ChannelKey {
        ChannelKey::new(0, Direction::Downlink, 0, 0)
    }

    #[test]
    fn test_plans_at_budget_offsets() {
        let f = fixture(CONFIG);
        let budget = *f.scheduler.budget();
        // Slot 10: one DL section on symbols 2..4
        let mut builder = f.db.build(dl(), 10).unwrap();
        builder.add_section(SectionDescriptor::new(1, Direction::Downlink, 0, 20, 2, 2)).unwrap();
        drop(builder);

        let target_cp = 10 * 14 + 2;
        let now = target_cp - budget.cp_dl - budget.prepare_ahead;
        let mut jobs = Vec::new();
        f.scheduler.plan(now, &mut jobs).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].plane, Plane::Control);
        assert_eq!(jobs[0].target.abs_symbol, target_cp);
        assert_eq!(jobs[0].send_abs, now + budget.prepare_ahead);
        assert_eq!(f.scheduler.states().get(jobs[0].channel, Plane::Control), TxState::Armed);

        let mut user_jobs = Vec::new();
        for symbol in [2u64, 3, 4] {
            let now = 10 * 14 + symbol - budget.up - budget.prepare_ahead;
            f.scheduler.plan(now, &mut user_jobs).unwrap();
        }
        let planes: Vec<_> = user_jobs.iter().filter(|j| j.plane == Plane::User).map(|j| j.target.symbol).collect();
        assert_eq!(planes, vec![2, 3]);
    }

    #[test]
    fn test_stale_context_not_planned() {
        let f = fixture(CONFIG);
        let budget = *f.scheduler.budget();
        let ring = f.db.ring_depth() as u64;
        let mut builder = f.db.build(dl(), 10).unwrap();
        builder.add_section(SectionDescriptor::new(1, Direction::Downlink, 0, 20, 0, 1)).unwrap();
        drop(builder);
        // Same ring position one lap later
        let now = (10 + ring) * 14 - budget.cp_dl - budget.prepare_ahead;
        let mut jobs = Vec::new();
        f.scheduler.plan(now, &mut jobs).unwrap();
        assert!(jobs.is_empty());
    }

    #[test]
    fn test_execute_uplane_zero_copy() {
        let mut f = fixture(CONFIG);
        let budget = *f.scheduler.budget();
        let bfp = CompressionParams::new(common::types::CompMethod::BlockFloatingPoint, 9);
        let payload = SharedPayload::new(vec![0x5Au8; 2 * 280]);
        let mut builder = f.db.build(dl(), 4).unwrap();
        builder.attach_payload(payload.clone());
        builder
            .add_section(
                SectionDescriptor::new(3, Direction::Downlink, 10, 10, 5, 2)
                    .with_compression(bfp)
                    .with_symbol_payload(5, 0, 280)
                    .with_symbol_payload(6, 280, 280),
            )
            .unwrap();
        drop(builder);

        let now = 4 * 14 + 5 - budget.up - budget.prepare_ahead;
        f.cursor.publish(now);
        let mut jobs = Vec::new();
        f.scheduler.plan(now, &mut jobs).unwrap();
        let job = jobs.iter().find(|j| j.plane == Plane::User).copied().unwrap();
        assert_eq!(f.executor.execute(&job).unwrap(), 1);
        assert_eq!(f.scheduler.states().get(job.channel, Plane::User), TxState::Sent);
        assert_eq!(payload.ref_count(), 3);

        let (sink, mut source) = loopback(8);
        f.cursor.publish(job.send_abs);
        assert_eq!(f.dispatcher.drain(job.send_abs, &sink, &f.stats), 1);
        let frame = source.poll_receive().unwrap();
        let message = decode_uplane(&frame, &FlowParams { carrier_prbs: 106, compression: bfp }).unwrap();
        assert_eq!(message.header.symbol, 5);
        assert_eq!(message.ecpri.eaxc, f.executor.eaxc_of(dl()));
        assert_eq!(&message.sections[0].iq[..], &[0x5Au8; 280][..]);
        assert_eq!(f.layout.channel_count(), 2);
        assert_eq!(f.timeline.position(job.target.abs_symbol).slot, 0);
    }

    #[test]
    fn test_execute_cplane() {
        let mut f = fixture(CONFIG);
        let budget = *f.scheduler.budget();
        let mut builder = f.db.build(dl(), 6).unwrap();
        builder.add_section(SectionDescriptor::new(1, Direction::Downlink, 0, 50, 0, 14)).unwrap();
        builder.add_section(SectionDescriptor::new(2, Direction::Downlink, 50, 56, 0, 14)).unwrap();
        drop(builder);
        let now = 6 * 14 - budget.cp_dl - budget.prepare_ahead;
        f.cursor.publish(now);
        let mut jobs = Vec::new();
        f.scheduler.plan(now, &mut jobs).unwrap();
        assert_eq!(f.executor.execute(&jobs[0]).unwrap(), 1);

        let (sink, mut source) = loopback(8);
        f.cursor.publish(jobs[0].send_abs);
        f.dispatcher.drain(jobs[0].send_abs, &sink, &f.stats);
        let message = decode_cplane(&source.poll_receive().unwrap(), 106).unwrap();
        assert_eq!(message.sections.len(), 2);
        assert_eq!(message.header.frame_id, f.timeline.position(6 * 14).frame_id());
        assert_eq!(f.stats.snapshot().tx_cplane_packets, 1);
    }

    #[test]
    fn test_late_job_policies() {
        for (policy, fatal) in [("strict", true), ("production", false)] {
            let f = fixture(&format!("{}late_policy: {}\n", CONFIG, policy));
            assert_eq!(f.config.late_policy == LatePolicy::Strict, fatal);
            let budget = *f.scheduler.budget();
            let mut builder = f.db.build(dl(), 8).unwrap();
            builder.add_section(SectionDescriptor::new(1, Direction::Downlink, 0, 10, 0, 1)).unwrap();
            drop(builder);
            let now = 8 * 14 - budget.cp_dl - budget.prepare_ahead;
            let mut jobs = Vec::new();
            f.scheduler.plan(now, &mut jobs).unwrap();
            // The worker only got to it after the send symbol had passed
            f.cursor.publish(jobs[0].send_abs + 1);
            assert!(matches!(
                f.executor.execute(&jobs[0]),
                Err(FronthaulError::LateTransmission { .. })
            ));
            f.executor.dispatch(&jobs[0]);
            assert_eq!(f.executor.take_fault().is_some(), fatal);
            assert_eq!(f.stats.snapshot().late_transmissions, 2);
            assert_eq!(f.stats.snapshot().tx_packets, 0);
        }
    }

    #[test]
    fn test_tdd_gates_directions() {
        let yaml = format!(
            "{}tdd_pattern: [\"DDDDDDDDDDDDDD\", \"UUUUUUUUUUUUUU\"]\n",
            CONFIG
        );
        let f = fixture(&yaml);
        let budget = *f.scheduler.budget();
        let ul = ChannelKey::new(0, Direction::Uplink, 0, 0);
        // Slot 3 is an uplink slot in a two-slot pattern
        let mut builder = f.db.build(dl(), 3).unwrap();
        builder.add_section(SectionDescriptor::new(1, Direction::Downlink, 0, 10, 0, 1)).unwrap();
        drop(builder);
        let mut builder = f.db.build(ul, 3).unwrap();
        builder.add_section(SectionDescriptor::new(2, Direction::Uplink, 0, 10, 0, 1)).unwrap();
        drop(builder);

        let mut jobs = Vec::new();
        f.scheduler.plan(3 * 14 - budget.cp_dl - budget.prepare_ahead, &mut jobs).unwrap();
        f.scheduler.plan(3 * 14 - budget.cp_ul - budget.prepare_ahead, &mut jobs).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].key, ul);
    }

    /// Plan every symbol until all planes moved past `slot`; `added` runs once all
    /// planes are beyond `symbol` of `slot`
    fn plan_through(f: &Fixture, slot: u64, start: u64, symbol: u64, mut added: impl FnMut()) -> Vec<TxJob> {
        let budget = *f.scheduler.budget();
        let lag = budget.up.min(budget.cp_ul).min(budget.cp_dl) + budget.prepare_ahead;
        let mut jobs = Vec::new();
        let mut pending = true;
        for now in start..(slot + 1) * 14 - lag + 1 {
            f.scheduler.plan(now, &mut jobs).unwrap();
            if pending && now + lag > slot * 14 + symbol {
                added();
                pending = false;
            }
        }
        jobs
    }

    #[test]
    fn test_section_added_after_its_symbols_counted_late() {
        let f = fixture(CONFIG);
        let budget = *f.scheduler.budget();
        let mut builder = f.db.build(dl(), 40).unwrap();
        builder.add_section(SectionDescriptor::new(1, Direction::Downlink, 0, 20, 2, 2)).unwrap();
        drop(builder);
        let context = f.db.context_for_slot(40);

        let start = 40 * 14 - budget.max_advance() - budget.prepare_ahead;
        let jobs = plan_through(&f, 40, start, 5, || {
            // Symbols 3..5 were already planned on every plane
            let late = SectionDescriptor::new(2, Direction::Downlink, 30, 20, 3, 2);
            f.db.add_section(dl(), context, late).unwrap();
        });
        let slot_jobs: Vec<(Plane, u8)> = jobs
            .iter()
            .filter(|j| j.key == dl() && j.target.abs_slot() == 40)
            .map(|j| (j.plane, j.target.symbol))
            .collect();
        assert_eq!(slot_jobs, vec![(Plane::Control, 2), (Plane::User, 2), (Plane::User, 3)]);
        // One C-plane and one U-plane miss for section 2
        assert_eq!(f.stats.snapshot().late_transmissions, 2);
    }

    #[test]
    fn test_symbols_before_first_visit_not_counted() {
        let f = fixture(CONFIG);
        let budget = *f.scheduler.budget();
        let mut builder = f.db.build(dl(), 40).unwrap();
        builder.add_section(SectionDescriptor::new(1, Direction::Downlink, 0, 20, 0, 1)).unwrap();
        drop(builder);
        // Planning starts once every plane is past symbol 0 of slot 40
        let start = 40 * 14 + 1 - budget.up.min(budget.cp_ul).min(budget.cp_dl) - budget.prepare_ahead;
        let jobs = plan_through(&f, 40, start, 0, || {});
        assert!(jobs.iter().all(|j| j.target.abs_slot() != 40 || j.key != dl()));
        assert_eq!(f.stats.snapshot().late_transmissions, 0);
    }

    #[test]
    fn test_phase_violation_reported() {
        let f = fixture(CONFIG);
        let budget = *f.scheduler.budget();
        let _building = f.db.build(dl(), 2).unwrap();
        let mut jobs = Vec::new();
        let result = f.scheduler.plan(2 * 14 - budget.cp_dl - budget.prepare_ahead, &mut jobs);
        assert!(matches!(result, Err(FronthaulError::InvalidState(_))));
    }
}
