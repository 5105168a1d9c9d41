//! C-Plane Codec
//! 
//! Real-time control messages carrying section types 1 and 3. Sections that start
//! on the same symbol share a message while it fits the MTU; a change of section
//! type, compression header or type 3 frame structure starts a new message.

use bytes::{BufMut, Bytes, BytesMut};
use common::utils::{fft_size_code, fft_size_from_code};
use tracing::trace;

use super::compression::CompressionParams;
use super::ecpri::{EcpriHeader, MessageType, ECPRI_HEADER_LEN};
use super::extension::SectionExtension;
use super::radio_app::{RadioAppHeader, RADIO_APP_HEADER_LEN};
use super::{ensure_len, min_section_room};
use crate::section::{BeamformingMode, SectionDescriptor, SectionFlags, SectionType, Type3Params};
use crate::sequence::TxSequence;
use crate::FronthaulError;

/// Section type specific common header bytes after the radio application header
const TYPE1_COMMON_LEN: usize = 4;
const TYPE3_COMMON_LEN: usize = 8;
const TYPE1_SECTION_LEN: usize = 8;
const TYPE3_SECTION_LEN: usize = 12;

/// Addressing of the C-plane messages of one flow and symbol
#[derive(Debug, Clone, Copy)]
pub struct CPlaneTx {
    pub eaxc: u16,
    pub header: RadioAppHeader,
    pub carrier_prbs: u16,
    pub mtu: usize,
}

/// One decoded C-plane message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CPlaneMessage {
    pub ecpri: EcpriHeader,
    pub header: RadioAppHeader,
    pub section_type: SectionType,
    pub sections: Vec<SectionDescriptor>,
}

fn common_len(section_type: SectionType) -> usize {
    ECPRI_HEADER_LEN
        + RADIO_APP_HEADER_LEN
        + match section_type {
            SectionType::Standard => TYPE1_COMMON_LEN,
            SectionType::Prach => TYPE3_COMMON_LEN,
        }
}

fn section_len(section: &SectionDescriptor) -> usize {
    let base = match section.section_type {
        SectionType::Standard => TYPE1_SECTION_LEN,
        SectionType::Prach => TYPE3_SECTION_LEN,
    };
    base + section.extensions.iter().map(|e| e.encoded_len()).sum::<usize>()
}

/// Sections that can share one message header
fn same_message(a: &SectionDescriptor, b: &SectionDescriptor) -> bool {
    a.section_type == b.section_type
        && a.compression.header_byte() == b.compression.header_byte()
        && a.type3 == b.type3
}

fn write_common(
    out: &mut BytesMut,
    tx: &CPlaneTx,
    ecpri: EcpriHeader,
    first: &SectionDescriptor,
    count: usize,
) -> Result<(), FronthaulError> {
    ecpri.write(out);
    tx.header.write(out);
    out.put_u8(count as u8);
    out.put_u8(first.section_type as u8);
    match (first.section_type, first.type3) {
        (SectionType::Standard, _) => {
            out.put_u8(first.compression.header_byte());
            out.put_u8(0);
        }
        (SectionType::Prach, Some(t3)) => {
            let fft = fft_size_code(t3.fft_size).ok_or_else(|| {
                FronthaulError::InvalidDescriptor(format!("unsupported FFT size {}", t3.fft_size))
            })?;
            out.put_u16(t3.time_offset);
            out.put_u8((fft << 4) | (t3.numerology & 0x0F));
            out.put_u16(t3.cp_length);
            out.put_u8(first.compression.header_byte());
        }
        (SectionType::Prach, None) => {
            return Err(FronthaulError::InvalidDescriptor("type 3 section without parameters".into()))
        }
    }
    Ok(())
}

fn write_section(out: &mut BytesMut, section: &SectionDescriptor, carrier_prbs: u16) {
    let rb = section.flags.contains(SectionFlags::EVERY_OTHER_PRB) as u32;
    let sym_inc = section.flags.contains(SectionFlags::SYMBOL_INCREMENT) as u32;
    out.put_u32(
        ((section.section_id as u32 & 0xFFF) << 20)
            | (rb << 19)
            | (sym_inc << 18)
            | ((section.prb_start as u32 & 0x3FF) << 8)
            | section.wire_prb_count(carrier_prbs) as u32,
    );
    out.put_u16(((section.re_mask & 0xFFF) << 4) | (section.symbol_count as u16 & 0x0F));
    let ef = !section.extensions.is_empty() as u16;
    out.put_u16((ef << 15) | (section.beam_id & 0x7FFF));
    if section.section_type == SectionType::Prach {
        let offset = (section.freq_offset as u32) & 0x00FF_FFFF;
        out.put_u8((offset >> 16) as u8);
        out.put_u16(offset as u16);
        out.put_u8(0);
    }
    let count = section.extensions.len();
    for (index, extension) in section.extensions.iter().enumerate() {
        extension.encode(out, index + 1 < count);
    }
}

/// Encode the C-plane messages for sections starting on the header's symbol
pub fn encode_cplane(
    tx: &CPlaneTx,
    sections: &[&SectionDescriptor],
    seq: &TxSequence<'_>,
) -> Result<Vec<Bytes>, FronthaulError> {
    for section in sections {
        if section.symbol_start != tx.header.symbol {
            return Err(FronthaulError::InvalidDescriptor(format!(
                "section {} starts on symbol {}, message on {}",
                section.section_id, section.symbol_start, tx.header.symbol
            )));
        }
        if section.direction != tx.header.direction {
            return Err(FronthaulError::InvalidDescriptor("section direction differs from message".into()));
        }
        section.validate(tx.carrier_prbs)?;
    }

    let mut messages = Vec::new();
    let mut start = 0;
    while start < sections.len() {
        let first = sections[start];
        let overhead = common_len(first.section_type);
        let room = min_section_room(tx.mtu, overhead)?;
        let mut used = 0;
        let mut end = start;
        while end < sections.len()
            && end - start < u8::MAX as usize
            && same_message(first, sections[end])
            && used + section_len(sections[end]) <= room
        {
            used += section_len(sections[end]);
            end += 1;
        }
        if end == start {
            return Err(FronthaulError::CapacityExceeded("C-plane section exceeds MTU"));
        }

        let total = overhead + used;
        let ecpri = EcpriHeader { payload_size: (total - 4) as u16, ..EcpriHeader::new(MessageType::RtControl, tx.eaxc, seq.next()) };
        let mut out = BytesMut::with_capacity(total);
        write_common(&mut out, tx, ecpri, first, end - start)?;
        for section in &sections[start..end] {
            write_section(&mut out, section, tx.carrier_prbs);
        }
        trace!(
            "C-plane message seq {} type {:?} with {} sections, {} bytes",
            ecpri.seq_id,
            first.section_type,
            end - start,
            out.len()
        );
        messages.push(out.freeze());
        start = end;
    }
    Ok(messages)
}

/// Decode a C-plane message; `carrier_prbs` resolves a PRB count of 0
pub fn decode_cplane(frame: &Bytes, carrier_prbs: u16) -> Result<CPlaneMessage, FronthaulError> {
    let ecpri = EcpriHeader::parse(frame)?;
    if ecpri.message_type != MessageType::RtControl {
        return Err(FronthaulError::malformed("ecpriMessage"));
    }
    let message = frame.slice(..ecpri.message_len());
    let mut at = ECPRI_HEADER_LEN;
    let header = RadioAppHeader::parse(&message[at..])?;
    at += RADIO_APP_HEADER_LEN;
    ensure_len(&message[at..], 2)?;
    let count = message[at] as usize;
    let section_type = SectionType::from_wire(message[at + 1])?;
    at += 2;

    let (compression, type3) = match section_type {
        SectionType::Standard => {
            ensure_len(&message[at..], 2)?;
            let comp = CompressionParams::from_header_byte(message[at])?;
            at += 2;
            (comp, None)
        }
        SectionType::Prach => {
            ensure_len(&message[at..], 6)?;
            let time_offset = u16::from_be_bytes([message[at], message[at + 1]]);
            let structure = message[at + 2];
            let cp_length = u16::from_be_bytes([message[at + 3], message[at + 4]]);
            let comp = CompressionParams::from_header_byte(message[at + 5])?;
            let fft_size = fft_size_from_code(structure >> 4).ok_or(FronthaulError::malformed("frameStructure"))?;
            at += 6;
            (comp, Some(Type3Params { time_offset, fft_size, numerology: structure & 0x0F, cp_length }))
        }
    };
    if count == 0 {
        return Err(FronthaulError::malformed("numberOfSections"));
    }

    let section_len = match section_type {
        SectionType::Standard => TYPE1_SECTION_LEN,
        SectionType::Prach => TYPE3_SECTION_LEN,
    };
    let mut sections = Vec::with_capacity(count);
    for _ in 0..count {
        ensure_len(&message[at..], section_len)?;
        let b = &message[at..at + section_len];
        let word = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        let mask_sym = u16::from_be_bytes([b[4], b[5]]);
        let ef_beam = u16::from_be_bytes([b[6], b[7]]);
        let prb_start = ((word >> 8) & 0x3FF) as u16;
        let prb_count = match (word & 0xFF) as u16 {
            0 => carrier_prbs.saturating_sub(prb_start),
            n => n,
        };
        let mut flags = SectionFlags::empty();
        if word & (1 << 19) != 0 {
            flags |= SectionFlags::EVERY_OTHER_PRB;
        }
        if word & (1 << 18) != 0 {
            flags |= SectionFlags::SYMBOL_INCREMENT;
        }
        let mut section = SectionDescriptor::new(
            (word >> 20) as u16,
            header.direction,
            prb_start,
            prb_count,
            header.symbol,
            (mask_sym & 0x0F) as u8,
        )
        .with_compression(compression)
        .with_re_mask(mask_sym >> 4)
        .with_flags(flags);
        section.beam_id = ef_beam & 0x7FFF;
        if section.beam_id != 0 {
            section.beamforming = BeamformingMode::BeamIndex;
        }
        if let Some(t3) = type3 {
            let raw = ((b[8] as u32) << 16) | ((b[9] as u32) << 8) | b[10] as u32;
            // 24-bit two's complement
            let freq_offset = ((raw << 8) as i32) >> 8;
            section = section.with_prach(t3, freq_offset);
        }
        at += section_len;

        let mut more = ef_beam & 0x8000 != 0;
        while more {
            let (extension, next, used) = SectionExtension::decode(&message.slice(at..))?;
            if let SectionExtension::ModCompScaler { scaler, .. } = extension {
                section.compression.mod_comp_scaler = scaler;
            }
            section = section.with_extension(extension);
            more = next;
            at += used;
        }
        section
            .validate(carrier_prbs)
            .map_err(|_| FronthaulError::malformed("section fields"))?;
        sections.push(section);
    }
    if at != message.len() {
        return Err(FronthaulError::malformed("message length"));
    }
    Ok(CPlaneMessage { ecpri, header, section_type, sections })
}
