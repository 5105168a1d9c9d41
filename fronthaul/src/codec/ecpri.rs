//! eCPRI Transport Header
//! 
//! Common 8-byte header of every fronthaul message: revision, message type, payload
//! size, eAxC id, sequence id and the fragmentation byte. Delay measurement
//! messages share only the first four bytes.

use bytes::{BufMut, BytesMut};
use nom::number::complete::{be_u16, be_u8};
use nom::sequence::tuple;
use nom::IResult;

use common::types::Plane;

use crate::FronthaulError;

pub const ECPRI_HEADER_LEN: usize = 8;
pub const ECPRI_REVISION: u8 = 1;
/// Bytes of the header not counted in the payload size
pub const ECPRI_COMMON_LEN: usize = 4;

/// eCPRI message types used by the fronthaul
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// U-plane IQ data
    IqData = 0x00,
    /// C-plane real-time control
    RtControl = 0x02,
    /// One-way delay measurement
    DelayMeasurement = 0x05,
}

impl MessageType {
    pub fn from_wire(value: u8) -> Result<Self, FronthaulError> {
        match value {
            0x00 => Ok(MessageType::IqData),
            0x02 => Ok(MessageType::RtControl),
            0x05 => Ok(MessageType::DelayMeasurement),
            _ => Err(FronthaulError::malformed("ecpriMessage")),
        }
    }

    /// Plane of a message carrying an eAxC id; `None` for delay measurement
    pub fn plane(&self) -> Option<Plane> {
        match self {
            MessageType::IqData => Some(Plane::User),
            MessageType::RtControl => Some(Plane::Control),
            MessageType::DelayMeasurement => None,
        }
    }
}

/// Check the revision of a frame and read its message type
pub fn peek_message_type(data: &[u8]) -> Result<MessageType, FronthaulError> {
    let (first, message_type) = match data {
        [first, message_type, ..] if data.len() >= ECPRI_COMMON_LEN => (*first, *message_type),
        _ => return Err(FronthaulError::Truncated { needed: ECPRI_COMMON_LEN, available: data.len() }),
    };
    if first >> 4 != ECPRI_REVISION {
        return Err(FronthaulError::malformed("ecpriRevision"));
    }
    if first & 0x01 != 0 {
        return Err(FronthaulError::malformed("ecpriConcatenation"));
    }
    MessageType::from_wire(message_type)
}

/// Parsed eCPRI header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcpriHeader {
    pub message_type: MessageType,
    /// Message length minus the first four bytes
    pub payload_size: u16,
    pub eaxc: u16,
    pub seq_id: u8,
    /// E bit: last fragment of the message
    pub last_fragment: bool,
    pub fragment_id: u8,
}

fn raw_header(input: &[u8]) -> IResult<&[u8], (u8, u8, u16, u16, u8, u8)> {
    tuple((be_u8, be_u8, be_u16, be_u16, be_u8, be_u8))(input)
}

impl EcpriHeader {
    /// Unfragmented header; the payload size is patched by [`EcpriHeader::finish`]
    pub fn new(message_type: MessageType, eaxc: u16, seq_id: u8) -> Self {
        Self { message_type, payload_size: 0, eaxc, seq_id, last_fragment: true, fragment_id: 0 }
    }

    pub fn with_fragment(mut self, fragment_id: u8, last: bool) -> Self {
        self.fragment_id = fragment_id & 0x7F;
        self.last_fragment = last;
        self
    }

    /// Total message length announced by the header
    pub fn message_len(&self) -> usize {
        self.payload_size as usize + ECPRI_COMMON_LEN
    }

    pub fn write(&self, out: &mut BytesMut) {
        out.put_u8(ECPRI_REVISION << 4);
        out.put_u8(self.message_type as u8);
        out.put_u16(self.payload_size);
        out.put_u16(self.eaxc);
        out.put_u8(self.seq_id);
        out.put_u8(((self.last_fragment as u8) << 7) | (self.fragment_id & 0x7F));
    }

    /// Patch the payload size of a message written from offset `start` of `out`
    pub fn finish(out: &mut BytesMut, start: usize, total_len: usize) {
        let size = (total_len - ECPRI_COMMON_LEN) as u16;
        out[start + 2..start + 4].copy_from_slice(&size.to_be_bytes());
    }

    /// Parse and check the header at the start of a frame
    pub fn parse(data: &[u8]) -> Result<Self, FronthaulError> {
        let (_, (first, message_type, payload_size, eaxc, seq_id, fragment)) = raw_header(data)
            .map_err(|_| FronthaulError::Truncated { needed: ECPRI_HEADER_LEN, available: data.len() })?;
        if first >> 4 != ECPRI_REVISION {
            return Err(FronthaulError::malformed("ecpriRevision"));
        }
        if first & 0x01 != 0 {
            return Err(FronthaulError::malformed("ecpriConcatenation"));
        }
        let message_type = MessageType::from_wire(message_type)?;
        if message_type.plane().is_none() {
            return Err(FronthaulError::malformed("ecpriMessage"));
        }
        let header = Self {
            message_type,
            payload_size,
            eaxc,
            seq_id,
            last_fragment: fragment & 0x80 != 0,
            fragment_id: fragment & 0x7F,
        };
        if header.message_len() < ECPRI_HEADER_LEN {
            return Err(FronthaulError::malformed("ecpriPayload"));
        }
        if header.message_len() > data.len() {
            return Err(FronthaulError::Truncated { needed: header.message_len(), available: data.len() });
        }
        Ok(header)
    }

    /// Whether the message is one piece of a fragmented section
    pub fn is_fragment(&self) -> bool {
        !(self.fragment_id == 0 && self.last_fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut out = BytesMut::new();
        EcpriHeader::new(MessageType::RtControl, 0x1234, 0xAB).with_fragment(3, false).write(&mut out);
        out.put_bytes(0, 12);
        EcpriHeader::finish(&mut out, 0, 20);
        assert_eq!(&out[..8], &[0x10, 0x02, 0x00, 0x10, 0x12, 0x34, 0xAB, 0x03]);

        let header = EcpriHeader::parse(&out).unwrap();
        assert_eq!(header.message_type, MessageType::RtControl);
        assert_eq!(header.eaxc, 0x1234);
        assert_eq!(header.seq_id, 0xAB);
        assert_eq!(header.fragment_id, 3);
        assert!(!header.last_fragment);
        assert!(header.is_fragment());
        assert_eq!(header.message_len(), 20);
    }

    #[test]
    fn test_header_rejects() {
        assert!(matches!(
            EcpriHeader::parse(&[0x10, 0x00, 0x00]),
            Err(FronthaulError::Truncated { needed: 8, available: 3 })
        ));
        let bad_revision = [0x20, 0x00, 0x00, 0x04, 0x00, 0x01, 0x00, 0x80];
        assert_eq!(EcpriHeader::parse(&bad_revision), Err(FronthaulError::malformed("ecpriRevision")));
        let bad_type = [0x10, 0x07, 0x00, 0x04, 0x00, 0x01, 0x00, 0x80];
        assert_eq!(EcpriHeader::parse(&bad_type), Err(FronthaulError::malformed("ecpriMessage")));
        // Delay measurement has no eAxC or sequence id
        let delay = [0x10, 0x05, 0x00, 0x04, 0x00, 0x01, 0x00, 0x80];
        assert_eq!(EcpriHeader::parse(&delay), Err(FronthaulError::malformed("ecpriMessage")));
        let too_long = [0x10, 0x00, 0x00, 0x40, 0x00, 0x01, 0x00, 0x80];
        assert!(matches!(EcpriHeader::parse(&too_long), Err(FronthaulError::Truncated { needed: 68, .. })));
    }

    #[test]
    fn test_peek_message_type() {
        assert_eq!(peek_message_type(&[0x10, 0x05, 0x00, 0x14]), Ok(MessageType::DelayMeasurement));
        assert_eq!(peek_message_type(&[0x10, 0x02, 0x00, 0x14, 0xFF]), Ok(MessageType::RtControl));
        assert_eq!(MessageType::DelayMeasurement.plane(), None);
        assert_eq!(MessageType::IqData.plane(), Some(Plane::User));
        assert!(matches!(peek_message_type(&[0x10, 0x05]), Err(FronthaulError::Truncated { needed: 4, .. })));
        assert_eq!(peek_message_type(&[0x11, 0x05, 0x00, 0x14]), Err(FronthaulError::malformed("ecpriConcatenation")));
        assert_eq!(peek_message_type(&[0x10, 0x06, 0x00, 0x14]), Err(FronthaulError::malformed("ecpriMessage")));
    }
}
