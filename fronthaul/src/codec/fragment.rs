//! Fragment Reassembly
//! 
//! Rebuilds a U-plane section split on PRB boundaries. Fragments of one section
//! share the eAxC and sequence id, number their fragment ids from 0 and set the
//! E bit on the last one.

use std::collections::HashMap;

use bytes::BytesMut;
use tracing::{debug, trace};

use super::uplane::{UPlaneMessage, UPlaneSection};
use crate::FronthaulError;

/// Outcome of feeding one message to the [`Reassembler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// The section is whole; `iq_range` is relative to the rebuilt `iq`
    Complete(UPlaneSection),
    /// More fragments are needed
    Pending,
}

#[derive(Debug)]
struct Partial {
    section: UPlaneSection,
    iq: BytesMut,
    next_fragment: u8,
    started_at: u64,
}

/// Reassembly state keyed by (eAxC, sequence id)
#[derive(Debug)]
pub struct Reassembler {
    pending: HashMap<(u16, u8), Partial>,
    max_pending: usize,
}

impl Reassembler {
    pub fn new(max_pending: usize) -> Self {
        Self { pending: HashMap::with_capacity(max_pending), max_pending }
    }

    /// Number of sections waiting for more fragments
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Feed one decoded message
    ///
    /// Unfragmented messages complete immediately. A fragment that breaks the id
    /// order or PRB continuity drops the partial section.
    pub fn push(&mut self, message: &UPlaneMessage, now_abs: u64) -> Result<Reassembly, FronthaulError> {
        let [section] = message.sections.as_slice() else {
            if message.ecpri.is_fragment() {
                return Err(FronthaulError::malformed("fragment sections"));
            }
            return message
                .sections
                .first()
                .cloned()
                .map(Reassembly::Complete)
                .ok_or(FronthaulError::malformed("section"));
        };
        if !message.ecpri.is_fragment() {
            return Ok(Reassembly::Complete(section.clone()));
        }

        let key = (message.ecpri.eaxc, message.ecpri.seq_id);
        let fragment_id = message.ecpri.fragment_id;
        if fragment_id == 0 {
            if self.pending.len() >= self.max_pending && !self.pending.contains_key(&key) {
                return Err(FronthaulError::CapacityExceeded("reassembly"));
            }
            let mut iq = BytesMut::with_capacity(section.iq.len() * 2);
            iq.extend_from_slice(&section.iq);
            self.pending.insert(
                key,
                Partial { section: section.clone(), iq, next_fragment: 1, started_at: now_abs },
            );
        } else {
            let Some(partial) = self.pending.get_mut(&key) else {
                return Err(FronthaulError::malformed("fragment order"));
            };
            let expected_prb = partial.section.prb_start + partial.section.prb_count;
            if fragment_id != partial.next_fragment
                || section.section_id != partial.section.section_id
                || section.prb_start != expected_prb
                || section.compression != partial.section.compression
            {
                self.pending.remove(&key);
                return Err(FronthaulError::malformed("fragment order"));
            }
            partial.section.prb_count += section.prb_count;
            partial.iq.extend_from_slice(&section.iq);
            partial.next_fragment += 1;
        }

        if !message.ecpri.last_fragment {
            trace!("Fragment {} of eAxC {:#06x} seq {} buffered", fragment_id, key.0, key.1);
            return Ok(Reassembly::Pending);
        }
        let Some(partial) = self.pending.remove(&key) else {
            return Err(FronthaulError::malformed("fragment order"));
        };
        let iq = partial.iq.freeze();
        let section = UPlaneSection { iq_range: 0..iq.len(), iq, ..partial.section };
        trace!("Section {} reassembled from {} fragments", section.section_id, partial.next_fragment);
        Ok(Reassembly::Complete(section))
    }

    /// Drop partial sections older than `window` symbols; returns how many were dropped
    pub fn expire(&mut self, now_abs: u64, window: u64) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, p| now_abs.saturating_sub(p.started_at) <= window);
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!("Expired {} incomplete fragmented sections", dropped);
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{CarrierLayout, ChannelLayout};
    use crate::codec::compression::test_util::random_samples;
    use crate::codec::compression::{self, CompressionParams};
    use crate::codec::radio_app::RadioAppHeader;
    use crate::codec::uplane::{decode_uplane, encode_section, FlowParams, IqSource, UPlaneTx};
    use crate::section::SectionDescriptor;
    use crate::sequence::SequenceEngine;
    use common::types::{ChannelKey, CompMethod, Direction, Plane};

    fn fragments(prbs: u16, mtu: usize, params: CompressionParams) -> (Vec<UPlaneMessage>, Vec<num_complex::Complex<i16>>) {
        let layout = ChannelLayout::new(
            1,
            vec![CarrierLayout { dl_prbs: 273, ul_prbs: 273, dl_antennas: 1, ul_antennas: 1 }],
        );
        let seq = SequenceEngine::new(&layout);
        let counter = seq.tx_counter(ChannelKey::new(0, Direction::Uplink, 0, 0), Plane::User).unwrap();
        let tx = UPlaneTx {
            eaxc: 0x0002,
            header: RadioAppHeader { direction: Direction::Uplink, filter_index: 0, frame_id: 1, subframe: 0, slot: 0, symbol: 3 },
            carrier_prbs: 273,
            mtu,
        };
        let samples = random_samples(prbs as usize, 5);
        let section = SectionDescriptor::new(9, Direction::Uplink, 0, prbs, 3, 1).with_compression(params);
        let flow = FlowParams { carrier_prbs: 273, compression: params };
        let messages = encode_section(&tx, &section, IqSource::Samples(&samples), &counter)
            .unwrap()
            .iter()
            .map(|p| decode_uplane(&p.to_bytes(), &flow).unwrap())
            .collect();
        (messages, samples)
    }

    #[test]
    fn test_reassemble_full_carrier() {
        let cases = [
            (CompMethod::None, 16),
            (CompMethod::None, 9),
            (CompMethod::BlockFloatingPoint, 9),
            (CompMethod::BlockScaling, 8),
            (CompMethod::MuLaw, 8),
            (CompMethod::Modulation, 2),
            (CompMethod::Modulation, 4),
        ];
        for (method, width) in cases {
            let params = CompressionParams::new(method, width);
            let (messages, samples) = fragments(273, 1500, params);
            assert!(messages.len() > 1, "{:?} width {} not fragmented", method, width);
            assert!(messages.iter().all(|m| m.ecpri.seq_id == messages[0].ecpri.seq_id));

            let mut reassembler = Reassembler::new(4);
            let mut complete = None;
            for (index, message) in messages.iter().enumerate() {
                assert_eq!(message.ecpri.fragment_id as usize, index);
                match reassembler.push(message, 100).unwrap() {
                    Reassembly::Pending => assert!(index + 1 < messages.len()),
                    Reassembly::Complete(section) => complete = Some(section),
                }
            }
            let section = complete.unwrap();
            assert_eq!((section.prb_start, section.prb_count), (0, 273));
            assert_eq!(section.iq.len(), params.payload_len(273));
            assert_eq!(reassembler.pending(), 0);

            let mut direct = BytesMut::new();
            compression::compress(&params, &samples, &mut direct).unwrap();
            assert_eq!(&section.iq[..], &direct[..], "{:?} width {}", method, width);
            let mut back = Vec::new();
            compression::decompress(&params, &section.iq, &mut back).unwrap();
            let mut expected = Vec::new();
            compression::decompress(&params, &direct, &mut expected).unwrap();
            assert_eq!(back, expected);
        }
    }

    #[test]
    fn test_out_of_order_fragment() {
        let (messages, _) = fragments(100, 256, CompressionParams::none());
        assert!(messages.len() >= 3);
        let mut reassembler = Reassembler::new(4);
        assert_eq!(reassembler.push(&messages[0], 0).unwrap(), Reassembly::Pending);
        assert_eq!(reassembler.push(&messages[2], 0), Err(FronthaulError::malformed("fragment order")));
        assert_eq!(reassembler.pending(), 0);
        assert!(reassembler.push(&messages[1], 0).is_err());
    }

    #[test]
    fn test_unfragmented_passthrough() {
        let (messages, _) = fragments(10, 1500, CompressionParams::none());
        assert_eq!(messages.len(), 1);
        let mut reassembler = Reassembler::new(1);
        match reassembler.push(&messages[0], 0).unwrap() {
            Reassembly::Complete(section) => assert_eq!(section, messages[0].sections[0]),
            Reassembly::Pending => panic!("unfragmented message left pending"),
        }
    }

    #[test]
    fn test_capacity_and_expiry() {
        let (messages, _) = fragments(100, 256, CompressionParams::none());
        let mut other = messages[0].clone();
        other.ecpri.seq_id = other.ecpri.seq_id.wrapping_add(1);

        let mut reassembler = Reassembler::new(1);
        assert_eq!(reassembler.push(&messages[0], 10).unwrap(), Reassembly::Pending);
        assert_eq!(reassembler.push(&other, 10), Err(FronthaulError::CapacityExceeded("reassembly")));
        assert_eq!(reassembler.expire(20, 14), 0);
        assert_eq!(reassembler.expire(30, 14), 1);
        assert_eq!(reassembler.push(&other, 30).unwrap(), Reassembly::Pending);
    }
}
