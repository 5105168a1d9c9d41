//! Reception Validator
//! 
//! Classifies every inbound frame: header checks, flow lookup, sequence tracking,
//! reception window and section database resolution. Received U-plane sections
//! are grouped per OTA symbol and handed upward once every expected section has
//! arrived, or with an error flag once the symbol's deadline has passed.

use std::sync::Arc;

use bytes::Bytes;
use common::types::{ChannelKey, Direction, EaxcLayout, Plane, SYMBOLS_PER_SLOT};
use common::utils::bytes_to_hex;
use tracing::{debug, trace, warn};

use crate::channel::ChannelLayout;
use crate::codec::compression::CompressionParams;
use crate::codec::{
    decode_cplane, decode_uplane, peek_message_type, EcpriHeader, FlowParams, MessageType, RadioAppHeader,
    Reassembler, Reassembly, UPlaneSection, ECPRI_HEADER_LEN,
};
use crate::config::{CompressionConfig, FronthaulConfig, Role};
use crate::section::{SectionDatabase, SectionDescriptor};
use crate::sequence::{SeqCheck, SequenceEngine};
use crate::stats::{FronthaulStats, RxTiming};
use crate::timing::{OtaPosition, Timeline, TimingBudget};
use crate::FronthaulError;

/// Fragmented sections waiting for their remaining pieces
const MAX_PENDING_REASSEMBLY: usize = 64;

/// What a frame turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    /// C-plane sections stored in the section database
    Control { key: ChannelKey, sections: usize },
    /// U-plane sections matched to scheduled descriptors
    User { key: ChannelKey, sections: usize },
    /// A fragment was buffered
    Fragment { key: ChannelKey },
    /// The eAxC id names no configured flow
    UnknownFlow { eaxc: u16 },
    /// eCPRI delay measurement message, left to the delay meter
    DelayMeasurement,
}

/// IQ of one received section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedSection {
    pub key: ChannelKey,
    pub section_id: u16,
    pub prb_start: u16,
    pub prb_count: u16,
    pub compression: CompressionParams,
    /// Shares the received frame's buffer unless the section was reassembled
    pub iq: Bytes,
}

/// Every section received for one OTA symbol of one direction
#[derive(Debug, Clone)]
pub struct SymbolDelivery {
    pub direction: Direction,
    pub position: OtaPosition,
    /// False when the deadline passed before every expected section arrived
    pub complete: bool,
    pub expected: u32,
    pub sections: Vec<ReceivedSection>,
}

#[derive(Debug)]
struct PendingSymbol {
    abs: u64,
    direction: Direction,
    expected: u32,
    remaining: u32,
    sections: Vec<ReceivedSection>,
}

pub struct ReceptionValidator {
    role: Role,
    layout: ChannelLayout,
    eaxc: EaxcLayout,
    timeline: Timeline,
    budget: TimingBudget,
    compression: CompressionConfig,
    db: Arc<SectionDatabase>,
    sequences: Arc<SequenceEngine>,
    stats: Arc<FronthaulStats>,
    reassembler: Reassembler,
    pending: Vec<Option<PendingSymbol>>,
    /// Last symbol handed upward per ring position, to drop stragglers
    delivered: Vec<Option<u64>>,
}

impl ReceptionValidator {
    pub fn new(
        config: &FronthaulConfig,
        layout: &ChannelLayout,
        timeline: Timeline,
        db: Arc<SectionDatabase>,
        sequences: Arc<SequenceEngine>,
        stats: Arc<FronthaulStats>,
    ) -> Self {
        let ring = db.ring_depth() * SYMBOLS_PER_SLOT as usize;
        Self {
            role: config.role,
            layout: layout.clone(),
            eaxc: config.eaxc,
            timeline,
            budget: TimingBudget::from_config(&config.timing, timeline.scs()),
            compression: config.compression.clone(),
            db,
            sequences,
            stats,
            reassembler: Reassembler::new(MAX_PENDING_REASSEMBLY),
            pending: (0..ring).map(|_| None).collect(),
            delivered: vec![None; ring],
        }
    }

    /// Validate one frame received during OTA symbol `now_abs`
    ///
    /// Completed symbols are appended to `deliveries`. Decode failures are counted
    /// as corrupt and returned.
    pub fn process(
        &mut self,
        frame: Bytes,
        now_abs: u64,
        deliveries: &mut Vec<SymbolDelivery>,
    ) -> Result<RxOutcome, FronthaulError> {
        self.stats.record_rx(frame.len());
        let result = self.classify(&frame, now_abs, deliveries);
        if let Err(e) = &result {
            if e.is_corrupt_packet() {
                self.stats.record_corrupt();
                debug!("Dropping corrupt frame of {} bytes: {}", frame.len(), e);
                trace!("Corrupt frame head: {}", bytes_to_hex(&frame[..frame.len().min(16)]));
            }
        }
        result
    }

    fn classify(
        &mut self,
        frame: &Bytes,
        now_abs: u64,
        deliveries: &mut Vec<SymbolDelivery>,
    ) -> Result<RxOutcome, FronthaulError> {
        if peek_message_type(frame)? == MessageType::DelayMeasurement {
            return Ok(RxOutcome::DelayMeasurement);
        }
        let ecpri = EcpriHeader::parse(frame)?;
        let header = RadioAppHeader::parse(&frame[ECPRI_HEADER_LEN..])?;
        let plane = ecpri.message_type.plane().ok_or(FronthaulError::malformed("ecpriMessage"))?;
        let accepted = match self.role {
            Role::Du => plane == Plane::User && header.direction == Direction::Uplink,
            Role::Ru => plane == Plane::Control || header.direction == Direction::Downlink,
        };
        if !accepted {
            return Err(FronthaulError::malformed("dataDirection"));
        }

        let fields = self.eaxc.decompose(ecpri.eaxc);
        let key = ChannelKey::new(fields.cu_port, header.direction, fields.carrier, fields.ru_port);
        if fields.band_sector != 0 || !self.layout.contains(key) {
            self.stats.record_unknown_flow();
            debug!("Frame for unknown eAxC {:#06x}", ecpri.eaxc);
            return Ok(RxOutcome::UnknownFlow { eaxc: ecpri.eaxc });
        }
        self.stats.record_rx_plane(plane == Plane::Control);

        if ecpri.fragment_id == 0 {
            if let SeqCheck::OutOfOrder { expected } = self.sequences.validate_rx_seq(key, plane, ecpri.seq_id)? {
                self.stats.record_dupl();
                debug!(
                    "{}",
                    FronthaulError::SequenceAnomaly { eaxc: ecpri.eaxc, expected, received: ecpri.seq_id }
                );
            }
        }

        let ota_abs = self
            .timeline
            .abs_from_air(now_abs, header.frame_id, header.subframe, header.slot, header.symbol)
            .ok_or(FronthaulError::malformed("slotId"))?;
        let timing = self.window(plane, header.direction, ota_abs, now_abs);
        self.stats.record_rx_timing(timing);
        if timing == RxTiming::Late {
            debug!("{:?} {:?} for symbol {} arrived at {}", key, plane, ota_abs, now_abs);
        }

        let carrier_prbs = self
            .layout
            .prbs(key.direction, key.carrier)
            .ok_or_else(|| FronthaulError::InvalidState(format!("no carrier {}", key.carrier)))?;
        match plane {
            Plane::Control => {
                let message = decode_cplane(frame, carrier_prbs)?;
                let sections = self.store_control(key, ota_abs, message.sections)?;
                Ok(RxOutcome::Control { key, sections })
            }
            Plane::User => {
                let class = self.layout.channel_class(key);
                if key.direction == Direction::Uplink {
                    self.stats.record_rx_class(class);
                }
                let setting = self.compression.for_class(class);
                let flow = FlowParams {
                    carrier_prbs,
                    compression: CompressionParams::new(setting.method, setting.iq_width)
                        .with_scaler(setting.mod_comp_scaler),
                };
                let message = decode_uplane(frame, &flow)?;
                let sections = if message.ecpri.is_fragment() {
                    match self.reassembler.push(&message, now_abs)? {
                        Reassembly::Pending => return Ok(RxOutcome::Fragment { key }),
                        Reassembly::Complete(section) => vec![section],
                    }
                } else {
                    message.sections
                };
                let count = sections.len();
                for section in sections {
                    self.accept_section(key, ota_abs, section, deliveries)?;
                }
                Ok(RxOutcome::User { key, sections: count })
            }
        }
    }

    /// Reception window of a frame relative to its OTA symbol
    fn window(&self, plane: Plane, direction: Direction, ota_abs: u64, now_abs: u64) -> RxTiming {
        if plane == Plane::User && direction == Direction::Uplink {
            let delay = now_abs as i64 - ota_abs as i64;
            if delay < self.budget.ta4_min as i64 {
                RxTiming::Early
            } else if delay > self.budget.ta4_max as i64 {
                RxTiming::Late
            } else {
                RxTiming::OnTime
            }
        } else if now_abs > ota_abs {
            RxTiming::Late
        } else if ota_abs - now_abs > self.budget.lead_slots() * SYMBOLS_PER_SLOT as u64 {
            RxTiming::Early
        } else {
            RxTiming::OnTime
        }
    }

    fn store_control(
        &self,
        key: ChannelKey,
        ota_abs: u64,
        sections: Vec<SectionDescriptor>,
    ) -> Result<usize, FronthaulError> {
        let slot = ota_abs / SYMBOLS_PER_SLOT as u64;
        let mut ctx = self.db.write(key, self.db.context_for_slot(slot))?;
        if ctx.slot() != Some(slot) {
            ctx.reset();
            ctx.set_slot(slot);
        }
        let mut count = 0;
        for section in sections {
            if ctx.find_section(section.section_id, section.symbol_start).is_some() {
                debug!("{:?}: section {} for slot {} already stored", key, section.section_id, slot);
                continue;
            }
            if let Err(e) = ctx.add_section(section) {
                self.stats.record_capacity();
                return Err(e);
            }
            count += 1;
        }
        trace!("{:?}: {} C-plane sections stored for slot {}", key, count, slot);
        Ok(count)
    }

    fn accept_section(
        &mut self,
        key: ChannelKey,
        ota_abs: u64,
        section: UPlaneSection,
        deliveries: &mut Vec<SymbolDelivery>,
    ) -> Result<(), FronthaulError> {
        let slot = ota_abs / SYMBOLS_PER_SLOT as u64;
        let symbol = (ota_abs % SYMBOLS_PER_SLOT as u64) as u8;
        let scheduled = {
            let ctx = self.db.read(key, self.db.context_for_slot(slot))?;
            let found = match ctx.slot() {
                Some(tag) if tag == slot => ctx
                    .find_section(section.section_id, symbol)
                    .map(|d| (d.prb_start, d.prb_count)),
                _ => None,
            };
            found
        };
        let Some((prb_start, prb_count)) = scheduled else {
            self.stats.record_unknown_flow();
            debug!(
                "{:?}: section {} not scheduled for slot {} symbol {}",
                key, section.section_id, slot, symbol
            );
            return Ok(());
        };
        if section.prb_start < prb_start || section.prb_start + section.prb_count > prb_start + prb_count {
            return Err(FronthaulError::malformed("startPrbu"));
        }

        let index = (ota_abs % self.pending.len() as u64) as usize;
        if self.delivered[index] == Some(ota_abs) {
            debug!("{:?}: section {} for already delivered symbol {}", key, section.section_id, ota_abs);
            return Ok(());
        }
        if self.pending[index].as_ref().is_some_and(|p| p.abs != ota_abs) {
            if let Some(stale) = self.pending[index].take() {
                deliveries.push(self.finish(stale, false));
            }
        }
        if self.pending[index].is_none() {
            let expected = self.expected_sections(key.direction, ota_abs)?;
            self.pending[index] = Some(PendingSymbol {
                abs: ota_abs,
                direction: key.direction,
                expected,
                remaining: expected,
                sections: Vec::with_capacity(expected as usize),
            });
        }
        let repeated = self.pending[index]
            .as_ref()
            .is_some_and(|p| p.sections.iter().any(|s| s.key == key && s.section_id == section.section_id));
        if repeated {
            debug!("{:?}: section {} for symbol {} received twice", key, section.section_id, ota_abs);
            return Ok(());
        }
        let done = match self.pending[index].as_mut() {
            Some(pending) => {
                pending.sections.push(ReceivedSection {
                    key,
                    section_id: section.section_id,
                    prb_start: section.prb_start,
                    prb_count: section.prb_count,
                    compression: section.compression,
                    iq: section.iq,
                });
                pending.remaining = pending.remaining.saturating_sub(1);
                pending.remaining == 0
            }
            None => false,
        };
        if done {
            if let Some(pending) = self.pending[index].take() {
                deliveries.push(self.finish(pending, true));
            }
        }
        Ok(())
    }

    /// Sections scheduled over every channel of a direction for one symbol
    fn expected_sections(&self, direction: Direction, ota_abs: u64) -> Result<u32, FronthaulError> {
        let slot = ota_abs / SYMBOLS_PER_SLOT as u64;
        let symbol = (ota_abs % SYMBOLS_PER_SLOT as u64) as u8;
        let context = self.db.context_for_slot(slot);
        let mut expected = 0;
        for key in self.layout.channels(direction) {
            let ctx = self.db.read(key, context)?;
            if ctx.slot() == Some(slot) {
                expected += ctx.iterate_due(symbol).count() as u32;
            }
        }
        Ok(expected)
    }

    fn finish(&mut self, pending: PendingSymbol, complete: bool) -> SymbolDelivery {
        let index = (pending.abs % self.delivered.len() as u64) as usize;
        self.delivered[index] = Some(pending.abs);
        self.stats.record_delivery(complete);
        if !complete {
            warn!(
                "Symbol {} delivered partially: {} of {} sections",
                pending.abs,
                pending.sections.len(),
                pending.expected
            );
        }
        SymbolDelivery {
            direction: pending.direction,
            position: self.timeline.position(pending.abs),
            complete,
            expected: pending.expected,
            sections: pending.sections,
        }
    }

    /// Deliver symbols whose reception deadline has passed, and expire stale fragments
    pub fn poll_deadlines(&mut self, now_abs: u64, deliveries: &mut Vec<SymbolDelivery>) {
        for index in 0..self.pending.len() {
            let expired = self.pending[index].as_ref().is_some_and(|p| {
                let deadline = match p.direction {
                    Direction::Uplink => p.abs + self.budget.ta4_max,
                    Direction::Downlink => p.abs,
                };
                now_abs > deadline
            });
            if expired {
                if let Some(pending) = self.pending[index].take() {
                    deliveries.push(self.finish(pending, false));
                }
            }
        }
        let window = self.budget.rx_window_slots() * SYMBOLS_PER_SLOT as u64;
        self.reassembler.expire(now_abs, window);
    }

    /// Symbols with sections still outstanding
    pub fn pending_symbols(&self) -> usize {
        self.pending.iter().flatten().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_cplane, encode_section, CPlaneTx, IqSource, UPlaneTx};
    use crate::codec::compression::test_util::random_samples;
    use bytes::BytesMut;
    use common::types::EaxcFields;

    const DU: &str = r#"
numerologies:
  - { numerology: 1, dl_prbs: 106, ul_prbs: 106, dl_antennas: 1, ul_antennas: 2 }
"#;

    struct Fixture {
        layout: ChannelLayout,
        timeline: Timeline,
        db: Arc<SectionDatabase>,
        stats: Arc<FronthaulStats>,
        validator: ReceptionValidator,
        remote: SequenceEngine,
        eaxc: EaxcLayout,
    }

    fn fixture(yaml: &str) -> Fixture {
        let config = FronthaulConfig::from_yaml_str(yaml).unwrap();
        let layout = ChannelLayout::from_config(&config);
        let timeline = Timeline::new(config.subcarrier_spacing().unwrap());
        let db = Arc::new(SectionDatabase::new(&layout, config.section_db.ring_depth, 8));
        let stats = Arc::new(FronthaulStats::new());
        let validator = ReceptionValidator::new(
            &config,
            &layout,
            timeline,
            db.clone(),
            Arc::new(SequenceEngine::new(&layout)),
            stats.clone(),
        );
        let remote = SequenceEngine::new(&layout);
        Fixture { layout, timeline, db, stats, validator, remote, eaxc: config.eaxc }
    }

    fn ul(antenna: u8) -> ChannelKey {
        ChannelKey::new(0, Direction::Uplink, 0, antenna)
    }

    impl Fixture {
        fn eaxc_of(&self, key: ChannelKey) -> u16 {
            self.eaxc.compose(EaxcFields { cu_port: key.port, band_sector: 0, carrier: key.carrier, ru_port: key.antenna })
        }

        fn uplink_frame(&self, key: ChannelKey, ota_abs: u64, section_id: u16, prbs: (u16, u16)) -> Bytes {
            let position = self.timeline.position(ota_abs);
            let tx = UPlaneTx {
                eaxc: self.eaxc_of(key),
                header: RadioAppHeader::from_position(Direction::Uplink, &position, 0),
                carrier_prbs: 106,
                mtu: 9000,
            };
            let samples = random_samples(prbs.1 as usize, section_id as u64);
            let section = SectionDescriptor::new(section_id, Direction::Uplink, prbs.0, prbs.1, position.symbol, 1);
            let seq = self.remote.tx_counter(key, Plane::User).unwrap();
            encode_section(&tx, &section, IqSource::Samples(&samples), &seq).unwrap()[0].to_bytes()
        }

        fn schedule_ul(&self, slot: u64, sections: &[(u8, u16, u16, u16)]) {
            for antenna in 0..2 {
                let mut builder = self.db.build(ul(antenna), slot).unwrap();
                for &(a, id, start, count) in sections {
                    if a == antenna {
                        builder.add_section(SectionDescriptor::new(id, Direction::Uplink, start, count, 0, 14)).unwrap();
                    }
                }
            }
        }
    }

    #[test]
    fn test_symbol_completes_when_all_sections_arrive() {
        let mut f = fixture(DU);
        f.schedule_ul(20, &[(0, 1, 0, 50), (0, 2, 50, 56), (1, 7, 0, 106)]);
        let ota = 20 * 14 + 3;
        let mut out = Vec::new();

        let frame = f.uplink_frame(ul(0), ota, 1, (0, 50));
        assert_eq!(
            f.validator.process(frame, ota + 2, &mut out).unwrap(),
            RxOutcome::User { key: ul(0), sections: 1 }
        );
        let frame = f.uplink_frame(ul(1), ota, 7, (0, 106));
        f.validator.process(frame, ota + 2, &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(f.validator.pending_symbols(), 1);

        let frame = f.uplink_frame(ul(0), ota, 2, (50, 56));
        f.validator.process(frame, ota + 3, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].complete);
        assert_eq!(out[0].expected, 3);
        assert_eq!(out[0].position.abs_symbol, ota);
        assert_eq!(out[0].sections[1].iq.len(), 106 * 48);

        let snapshot = f.stats.snapshot();
        assert_eq!(snapshot.rx_on_time, 3);
        assert_eq!(snapshot.rx_pusch, 3);
        assert_eq!(snapshot.rx_pkt_dupl, 0);
        assert_eq!(snapshot.symbols_delivered, 1);
    }

    #[test]
    fn test_deadline_delivers_partial() {
        let mut f = fixture(DU);
        f.schedule_ul(30, &[(0, 1, 0, 10), (1, 2, 0, 10)]);
        let ota = 30 * 14;
        let mut out = Vec::new();
        let frame = f.uplink_frame(ul(0), ota, 1, (0, 10));
        f.validator.process(frame, ota + 1, &mut out).unwrap();

        let ta4_max = TimingBudget::from_config(&crate::config::TimingConfig::default(), f.timeline.scs()).ta4_max;
        f.validator.poll_deadlines(ota + ta4_max, &mut out);
        assert!(out.is_empty());
        f.validator.poll_deadlines(ota + ta4_max + 1, &mut out);
        assert_eq!(out.len(), 1);
        assert!(!out[0].complete);
        assert_eq!(out[0].sections.len(), 1);
        assert_eq!(f.stats.snapshot().partial_deliveries, 1);

        // The straggler is dropped, not delivered twice
        let frame = f.uplink_frame(ul(1), ota, 2, (0, 10));
        f.validator.process(frame, ota + ta4_max + 2, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(f.stats.snapshot().rx_late, 1);
    }

    #[test]
    fn test_duplicate_sequence_flagged() {
        let mut f = fixture(DU);
        f.schedule_ul(40, &[(0, 1, 0, 10)]);
        let ota = 40 * 14;
        let mut frames: Vec<Bytes> = (0..4).map(|_| f.uplink_frame(ul(0), ota, 1, (0, 10))).collect();
        // Sequence ids 0,1,2,3 on the wire; rewrite them to 5,6,6,7
        for (frame, seq) in frames.iter_mut().zip([5u8, 6, 6, 7]) {
            let mut bytes = BytesMut::from(&frame[..]);
            bytes[6] = seq;
            *frame = bytes.freeze();
        }
        let mut out = Vec::new();
        // Prime the expected value so the first frame is in sequence
        f.validator.sequences.validate_rx_seq(ul(0), Plane::User, 4).unwrap();
        for frame in frames {
            f.validator.process(frame, ota + 1, &mut out).unwrap();
        }
        assert_eq!(f.stats.snapshot().rx_pkt_dupl, 1);
        assert_eq!(f.validator.sequences.expected(ul(0), Plane::User).unwrap(), 8);
    }

    /// Frames of three sections on one symbol, with `repeat` sent a second time after itself
    fn deliver_three(repeat: Option<usize>) -> (Vec<u16>, bool, u64, u8) {
        let mut f = fixture(DU);
        f.schedule_ul(44, &[(0, 1, 0, 30), (0, 2, 30, 30), (0, 3, 60, 30)]);
        let ota = 44 * 14 + 5;
        let frames: Vec<Bytes> = [(1, 0), (2, 30), (3, 60)]
            .into_iter()
            .map(|(id, start)| f.uplink_frame(ul(0), ota, id, (start, 30)))
            .collect();
        let mut out = Vec::new();
        for (i, frame) in frames.iter().enumerate() {
            f.validator.process(frame.clone(), ota + 1, &mut out).unwrap();
            if repeat == Some(i) {
                f.validator.process(frame.clone(), ota + 1, &mut out).unwrap();
            }
        }
        assert_eq!(out.len(), 1);
        let ids = out[0].sections.iter().map(|s| s.section_id).collect();
        let expected_seq = f.validator.sequences.expected(ul(0), Plane::User).unwrap();
        (ids, out[0].complete, f.stats.snapshot().rx_pkt_dupl, expected_seq)
    }

    #[test]
    fn test_repeated_frame_matches_clean_delivery() {
        let clean = deliver_three(None);
        assert_eq!(clean, (vec![1, 2, 3], true, 0, 3));

        let repeated = deliver_three(Some(1));
        assert_eq!(repeated.0, clean.0);
        assert!(repeated.1);
        assert_eq!(repeated.2, 1);
        assert_eq!(repeated.3, clean.3);
    }

    #[test]
    fn test_section_must_cover_symbol() {
        let mut f = fixture(DU);
        {
            let mut builder = f.db.build(ul(0), 50).unwrap();
            builder.add_section(SectionDescriptor::new(5, Direction::Uplink, 0, 10, 2, 3)).unwrap();
        }
        let mut out = Vec::new();
        let outside = 50 * 14 + 8;
        let frame = f.uplink_frame(ul(0), outside, 5, (0, 10));
        f.validator.process(frame, outside + 1, &mut out).unwrap();
        assert_eq!(f.stats.snapshot().rx_unknown_flow, 1);
        assert_eq!(f.validator.pending_symbols(), 0);

        let inside = 50 * 14 + 3;
        let frame = f.uplink_frame(ul(0), inside, 5, (0, 10));
        f.validator.process(frame, inside + 1, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].complete);
    }

    #[test]
    fn test_rejects_and_counts() {
        let mut f = fixture(DU);
        let mut out = Vec::new();
        assert!(f.validator.process(Bytes::from_static(&[0x10, 0x00, 0x00]), 0, &mut out).is_err());

        f.schedule_ul(5, &[(0, 1, 0, 10)]);
        let ota = 5 * 14;
        let frame = f.uplink_frame(ul(0), ota, 1, (0, 10));
        let mut bad_version = BytesMut::from(&frame[..]);
        bad_version[8] = 0x20;
        assert_eq!(
            f.validator.process(bad_version.freeze(), ota, &mut out),
            Err(FronthaulError::malformed("payloadVersion"))
        );

        // PRBs outside the scheduled section
        let frame = f.uplink_frame(ul(0), ota, 1, (20, 10));
        assert_eq!(f.validator.process(frame, ota, &mut out), Err(FronthaulError::malformed("startPrbu")));

        // Unknown antenna
        let mut unknown = BytesMut::from(&f.uplink_frame(ul(0), ota, 1, (0, 10))[..]);
        unknown[5] = 0x0F;
        assert_eq!(
            f.validator.process(unknown.freeze(), ota, &mut out).unwrap(),
            RxOutcome::UnknownFlow { eaxc: 0x000F }
        );

        let snapshot = f.stats.snapshot();
        assert_eq!(snapshot.rx_corrupt, 3);
        assert_eq!(snapshot.rx_unknown_flow, 1);
        assert_eq!(snapshot.total_msgs_rcvd, 4);
        assert_eq!(f.layout.channel_count(), 4);
    }

    #[test]
    fn test_delay_message_passed_through() {
        use crate::codec::{ActionType, DelayMessage};

        let mut f = fixture(DU);
        let mut out = Vec::new();
        let frame = DelayMessage::new(3, ActionType::Request).encode(40);
        assert_eq!(f.validator.process(frame, 0, &mut out).unwrap(), RxOutcome::DelayMeasurement);

        // Types without a plane or a meter are still corrupt
        let mut other = BytesMut::from(&DelayMessage::new(3, ActionType::Request).encode(40)[..]);
        other[1] = 0x03;
        assert_eq!(
            f.validator.process(other.freeze(), 0, &mut out),
            Err(FronthaulError::malformed("ecpriMessage"))
        );

        let snapshot = f.stats.snapshot();
        assert_eq!(snapshot.total_msgs_rcvd, 2);
        assert_eq!(snapshot.rx_corrupt, 1);
        assert!(out.is_empty());
    }

    #[test]
    fn test_ru_stores_control_sections() {
        let yaml = format!("role: ru\n{}", DU);
        let mut f = fixture(&yaml);
        let dl = ChannelKey::new(0, Direction::Downlink, 0, 0);
        let ota = 9 * 14 + 4;
        let position = f.timeline.position(ota);
        let tx = CPlaneTx {
            eaxc: f.eaxc_of(dl),
            header: RadioAppHeader::from_position(Direction::Downlink, &position, 0),
            carrier_prbs: 106,
            mtu: 1500,
        };
        let a = SectionDescriptor::new(1, Direction::Downlink, 0, 60, 4, 10);
        let b = SectionDescriptor::new(2, Direction::Downlink, 60, 46, 4, 10);
        let seq = f.remote.tx_counter(dl, Plane::Control).unwrap();
        let frame = encode_cplane(&tx, &[&a, &b], &seq).unwrap().remove(0);

        let mut out = Vec::new();
        assert_eq!(
            f.validator.process(frame.clone(), ota - 8, &mut out).unwrap(),
            RxOutcome::Control { key: dl, sections: 2 }
        );
        let stored = f.db.find_by_section_id(dl, f.db.context_for_slot(9), 2).unwrap().unwrap();
        assert_eq!((stored.prb_start, stored.prb_count, stored.symbol_count), (60, 46, 10));
        assert_eq!(f.stats.snapshot().rx_cplane_packets, 1);
        assert_eq!(f.stats.snapshot().rx_on_time, 1);

        // The same message again is flagged and stores nothing new
        assert_eq!(
            f.validator.process(frame.clone(), ota - 8, &mut out).unwrap(),
            RxOutcome::Control { key: dl, sections: 0 }
        );
        assert_eq!(f.db.read(dl, f.db.context_for_slot(9)).unwrap().len(), 2);
        assert_eq!(f.stats.snapshot().rx_pkt_dupl, 1);
        assert_eq!(f.stats.snapshot().capacity_exceeded, 0);

        // An RU never accepts uplink U-plane
        let ul_frame = f.uplink_frame(ul(0), ota, 1, (0, 10));
        assert_eq!(f.validator.process(ul_frame, ota, &mut out), Err(FronthaulError::malformed("dataDirection")));
    }
}
