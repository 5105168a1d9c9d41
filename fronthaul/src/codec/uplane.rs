//! U-Plane Codec
//! 
//! IQ data messages. Several sections share a message while it fits the MTU; a
//! section too large for one message is split on PRB boundaries into fragments
//! that share the sequence id and carry their own fragment ids.

use std::ops::Range;

use bytes::{BufMut, Bytes, BytesMut};
use common::types::SUBCARRIERS_PER_PRB;
use interfaces::{PacketView, SharedPayload};
use num_complex::Complex;
use tracing::trace;

use super::compression::{self, CompressionParams};
use super::ecpri::{EcpriHeader, MessageType, ECPRI_HEADER_LEN};
use super::radio_app::{RadioAppHeader, RADIO_APP_HEADER_LEN};
use super::{ensure_len, min_section_room};
use crate::section::{SectionDescriptor, SectionFlags};
use crate::sequence::TxSequence;
use crate::FronthaulError;

pub const UPLANE_SECTION_HEADER_LEN: usize = 4;
pub const COMP_HEADER_LEN: usize = 2;
/// Header bytes of a U-plane message before its first section
pub const UPLANE_MESSAGE_OVERHEAD: usize = ECPRI_HEADER_LEN + RADIO_APP_HEADER_LEN;

/// Largest number of fragments a fragment id can number
const MAX_FRAGMENTS: usize = 128;

/// Where the IQ bytes of a section come from
#[derive(Debug, Clone)]
pub enum IqSource<'a> {
    /// Raw samples, compressed while encoding
    Samples(&'a [Complex<i16>]),
    /// Already compressed bytes attached without copying
    Encoded { payload: &'a SharedPayload, range: Range<usize> },
}

/// Addressing of the messages of one flow and symbol
#[derive(Debug, Clone, Copy)]
pub struct UPlaneTx {
    pub eaxc: u16,
    pub header: RadioAppHeader,
    pub carrier_prbs: u16,
    pub mtu: usize,
}

/// Negotiated parameters a receiver needs to walk a U-plane message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowParams {
    pub carrier_prbs: u16,
    pub compression: CompressionParams,
}

/// One decoded U-plane section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UPlaneSection {
    pub section_id: u16,
    pub every_other_prb: bool,
    pub symbol_increment: bool,
    pub prb_start: u16,
    /// Resolved count; a wire value of 0 becomes the rest of the carrier
    pub prb_count: u16,
    pub compression: CompressionParams,
    /// IQ bytes, sharing the frame's buffer
    pub iq: Bytes,
    /// Position of `iq` inside the frame
    pub iq_range: Range<usize>,
}

/// One decoded U-plane message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UPlaneMessage {
    pub ecpri: EcpriHeader,
    pub header: RadioAppHeader,
    pub sections: Vec<UPlaneSection>,
}

/// Fixed fields of the first section of a U-plane message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHeader {
    pub eaxc: u16,
    pub frame_id: u8,
    pub subframe: u8,
    pub slot: u8,
    pub symbol: u8,
    pub section_id: u16,
    pub prb_start: u16,
    pub prb_count: u16,
    pub iq_byte_range: Range<usize>,
}

fn section_header_len(compression: &CompressionParams) -> usize {
    if compression.is_compressed() {
        UPLANE_SECTION_HEADER_LEN + COMP_HEADER_LEN
    } else {
        UPLANE_SECTION_HEADER_LEN
    }
}

fn section_wire_len(section: &SectionDescriptor) -> usize {
    section_header_len(&section.compression) + section.iq_len()
}

fn write_section_header(
    out: &mut BytesMut,
    section: &SectionDescriptor,
    prb_start: u16,
    wire_count: u8,
) {
    let rb = section.flags.contains(SectionFlags::EVERY_OTHER_PRB) as u32;
    let sym_inc = section.flags.contains(SectionFlags::SYMBOL_INCREMENT) as u32;
    out.put_u32(
        ((section.section_id as u32 & 0xFFF) << 20)
            | (rb << 19)
            | (sym_inc << 18)
            | ((prb_start as u32 & 0x3FF) << 8)
            | wire_count as u32,
    );
    if section.compression.is_compressed() {
        compression::put_comp_header(out, &section.compression);
    }
}

/// Append the IQ bytes of PRBs `prbs` (relative to the section start)
fn put_iq(
    packet: &mut PacketView,
    head: &mut BytesMut,
    section: &SectionDescriptor,
    iq: &IqSource<'_>,
    prbs: Range<usize>,
) -> Result<(), FronthaulError> {
    match iq {
        IqSource::Samples(samples) => compression::compress(
            &section.compression,
            &samples[prbs.start * SUBCARRIERS_PER_PRB..prbs.end * SUBCARRIERS_PER_PRB],
            head,
        ),
        IqSource::Encoded { payload, range } => {
            let prb_bytes = section.compression.prb_bytes();
            packet.push_owned(head.split().freeze());
            let start = range.start + prbs.start * prb_bytes;
            packet.attach(payload, start..range.start + prbs.end * prb_bytes)?;
            Ok(())
        }
    }
}

fn check_source(section: &SectionDescriptor, iq: &IqSource<'_>) -> Result<(), FronthaulError> {
    let ok = match iq {
        IqSource::Samples(samples) => samples.len() == section.prb_count as usize * SUBCARRIERS_PER_PRB,
        IqSource::Encoded { range, .. } => range.len() == section.iq_len(),
    };
    if ok {
        Ok(())
    } else {
        Err(FronthaulError::InvalidDescriptor(format!(
            "IQ source does not match {} PRBs of section {}",
            section.prb_count, section.section_id
        )))
    }
}

fn start_message(tx: &UPlaneTx, ecpri: EcpriHeader, body_len: usize) -> BytesMut {
    let total = UPLANE_MESSAGE_OVERHEAD + body_len;
    let mut head = BytesMut::with_capacity(UPLANE_MESSAGE_OVERHEAD + 16);
    EcpriHeader { payload_size: (total - 4) as u16, ..ecpri }.write(&mut head);
    tx.header.write(&mut head);
    head
}

/// Encode one section
pub fn encode_section(
    tx: &UPlaneTx,
    section: &SectionDescriptor,
    iq: IqSource<'_>,
    seq: &TxSequence<'_>,
) -> Result<Vec<PacketView>, FronthaulError> {
    encode_symbol(tx, &[(section, iq)], seq)
}

/// Encode every section of one flow and symbol, packing them into as few messages as fit
pub fn encode_symbol(
    tx: &UPlaneTx,
    sections: &[(&SectionDescriptor, IqSource<'_>)],
    seq: &TxSequence<'_>,
) -> Result<Vec<PacketView>, FronthaulError> {
    let room = min_section_room(tx.mtu, UPLANE_MESSAGE_OVERHEAD)?;
    for (section, iq) in sections {
        check_source(section, iq)?;
    }

    let mut packets = Vec::new();
    let mut group: Vec<usize> = Vec::new();
    let mut group_len = 0;
    for (index, (section, _)) in sections.iter().enumerate() {
        let len = section_wire_len(section);
        if len > room {
            flush_group(tx, sections, &group, group_len, seq, &mut packets)?;
            group.clear();
            group_len = 0;
            fragment_section(tx, section, &sections[index].1, room, seq, &mut packets)?;
            continue;
        }
        if group_len + len > room {
            flush_group(tx, sections, &group, group_len, seq, &mut packets)?;
            group.clear();
            group_len = 0;
        }
        group.push(index);
        group_len += len;
    }
    flush_group(tx, sections, &group, group_len, seq, &mut packets)?;
    Ok(packets)
}

fn flush_group(
    tx: &UPlaneTx,
    sections: &[(&SectionDescriptor, IqSource<'_>)],
    group: &[usize],
    body_len: usize,
    seq: &TxSequence<'_>,
    packets: &mut Vec<PacketView>,
) -> Result<(), FronthaulError> {
    if group.is_empty() {
        return Ok(());
    }
    let ecpri = EcpriHeader::new(MessageType::IqData, tx.eaxc, seq.next());
    let mut head = start_message(tx, ecpri, body_len);
    let mut packet = PacketView::new();
    for &index in group {
        let (section, iq) = &sections[index];
        write_section_header(&mut head, section, section.prb_start, section.wire_prb_count(tx.carrier_prbs));
        put_iq(&mut packet, &mut head, section, iq, 0..section.prb_count as usize)?;
    }
    if !head.is_empty() {
        packet.push_owned(head.freeze());
    }
    trace!(
        "U-plane message seq {} with {} sections, {} bytes",
        ecpri.seq_id,
        group.len(),
        packet.len()
    );
    packets.push(packet);
    Ok(())
}

fn fragment_section(
    tx: &UPlaneTx,
    section: &SectionDescriptor,
    iq: &IqSource<'_>,
    room: usize,
    seq: &TxSequence<'_>,
    packets: &mut Vec<PacketView>,
) -> Result<(), FronthaulError> {
    let header_len = section_header_len(&section.compression);
    let prb_bytes = section.compression.prb_bytes();
    let per_fragment = (room.saturating_sub(header_len) / prb_bytes).min(u8::MAX as usize);
    if per_fragment == 0 {
        return Err(FronthaulError::CapacityExceeded("MTU smaller than one PRB"));
    }
    let total = section.prb_count as usize;
    let count = total.div_ceil(per_fragment);
    if count > MAX_FRAGMENTS {
        return Err(FronthaulError::CapacityExceeded("fragment ids"));
    }

    let seq_id = seq.next();
    for fragment in 0..count {
        let first = fragment * per_fragment;
        let prbs = first..(first + per_fragment).min(total);
        let last = fragment + 1 == count;
        let ecpri = EcpriHeader::new(MessageType::IqData, tx.eaxc, seq_id).with_fragment(fragment as u8, last);
        let mut head = start_message(tx, ecpri, header_len + prbs.len() * prb_bytes);
        let mut packet = PacketView::new();
        write_section_header(&mut head, section, section.prb_start + first as u16, prbs.len() as u8);
        put_iq(&mut packet, &mut head, section, iq, prbs)?;
        if !head.is_empty() {
            packet.push_owned(head.freeze());
        }
        packets.push(packet);
    }
    trace!(
        "Section {} fragmented into {} messages of up to {} PRBs",
        section.section_id,
        count,
        per_fragment
    );
    Ok(())
}

/// Decode every section of a U-plane message
pub fn decode_uplane(frame: &Bytes, flow: &FlowParams) -> Result<UPlaneMessage, FronthaulError> {
    let ecpri = EcpriHeader::parse(frame)?;
    if ecpri.message_type != MessageType::IqData {
        return Err(FronthaulError::malformed("ecpriMessage"));
    }
    let end = ecpri.message_len();
    ensure_len(&frame[..end], UPLANE_MESSAGE_OVERHEAD)?;
    let header = RadioAppHeader::parse(&frame[ECPRI_HEADER_LEN..end])?;

    let mut sections = Vec::new();
    let mut at = UPLANE_MESSAGE_OVERHEAD;
    while at < end {
        ensure_len(&frame[at..end], UPLANE_SECTION_HEADER_LEN)?;
        let word = u32::from_be_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]]);
        at += UPLANE_SECTION_HEADER_LEN;
        let section_id = (word >> 20) as u16;
        let prb_start = ((word >> 8) & 0x3FF) as u16;
        let prb_count = match (word & 0xFF) as u16 {
            0 => flow.carrier_prbs.saturating_sub(prb_start),
            n => n,
        };
        if prb_count == 0 || prb_start as u32 + prb_count as u32 > flow.carrier_prbs as u32 {
            return Err(FronthaulError::malformed("startPrbu"));
        }
        let compression = if flow.compression.is_compressed() {
            ensure_len(&frame[at..end], COMP_HEADER_LEN)?;
            let parsed = CompressionParams::from_header_byte(frame[at])?;
            at += COMP_HEADER_LEN;
            parsed.with_scaler(flow.compression.mod_comp_scaler)
        } else {
            flow.compression
        };
        let iq_len = compression.payload_len(prb_count);
        ensure_len(&frame[at..end], iq_len)?;
        let iq_range = at..at + iq_len;
        sections.push(UPlaneSection {
            section_id,
            every_other_prb: word & (1 << 19) != 0,
            symbol_increment: word & (1 << 18) != 0,
            prb_start,
            prb_count,
            compression,
            iq: frame.slice(iq_range.clone()),
            iq_range,
        });
        at += iq_len;
    }
    if sections.is_empty() {
        return Err(FronthaulError::malformed("section"));
    }
    Ok(UPlaneMessage { ecpri, header, sections })
}

/// Decode the addressing of the first section of a U-plane message
pub fn decode_header(frame: &Bytes, flow: &FlowParams) -> Result<DecodedHeader, FronthaulError> {
    let message = decode_uplane(frame, flow)?;
    let section = &message.sections[0];
    Ok(DecodedHeader {
        eaxc: message.ecpri.eaxc,
        frame_id: message.header.frame_id,
        subframe: message.header.subframe,
        slot: message.header.slot,
        symbol: message.header.symbol,
        section_id: section.section_id,
        prb_start: section.prb_start,
        prb_count: section.prb_count,
        iq_byte_range: section.iq_range.clone(),
    })
}
