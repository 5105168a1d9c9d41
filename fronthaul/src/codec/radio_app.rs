//! Radio Application Header
//! 
//! Four bytes shared by C-plane and U-plane messages: direction, payload version,
//! filter index and the frame/subframe/slot/symbol the message refers to.

use bytes::{BufMut, BytesMut};
use common::types::{Direction, SUBFRAMES_PER_FRAME, SYMBOLS_PER_SLOT};
use nom::number::complete::{be_u16, be_u8};
use nom::sequence::tuple;
use nom::IResult;

use crate::timing::OtaPosition;
use crate::FronthaulError;

pub const RADIO_APP_HEADER_LEN: usize = 4;
pub const PAYLOAD_VERSION: u8 = 1;

/// Parsed radio application header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioAppHeader {
    pub direction: Direction,
    pub filter_index: u8,
    pub frame_id: u8,
    pub subframe: u8,
    /// Slot within the subframe
    pub slot: u8,
    pub symbol: u8,
}

fn raw_header(input: &[u8]) -> IResult<&[u8], (u8, u8, u16)> {
    tuple((be_u8, be_u8, be_u16))(input)
}

impl RadioAppHeader {
    /// Header addressing an air position
    pub fn from_position(direction: Direction, position: &OtaPosition, filter_index: u8) -> Self {
        Self {
            direction,
            filter_index,
            frame_id: position.frame_id(),
            subframe: position.subframe,
            slot: position.slot,
            symbol: position.symbol,
        }
    }

    pub fn write(&self, out: &mut BytesMut) {
        out.put_u8(((self.direction as u8) << 7) | (PAYLOAD_VERSION << 4) | (self.filter_index & 0x0F));
        out.put_u8(self.frame_id);
        out.put_u16(
            ((self.subframe as u16 & 0x0F) << 12)
                | ((self.slot as u16 & 0x3F) << 6)
                | (self.symbol as u16 & 0x3F),
        );
    }

    pub fn parse(data: &[u8]) -> Result<Self, FronthaulError> {
        let (_, (first, frame_id, timing)) = raw_header(data)
            .map_err(|_| FronthaulError::Truncated { needed: RADIO_APP_HEADER_LEN, available: data.len() })?;
        if (first >> 4) & 0x07 != PAYLOAD_VERSION {
            return Err(FronthaulError::malformed("payloadVersion"));
        }
        let header = Self {
            direction: if first & 0x80 != 0 { Direction::Downlink } else { Direction::Uplink },
            filter_index: first & 0x0F,
            frame_id,
            subframe: (timing >> 12) as u8,
            slot: ((timing >> 6) & 0x3F) as u8,
            symbol: (timing & 0x3F) as u8,
        };
        if header.subframe as u32 >= SUBFRAMES_PER_FRAME {
            return Err(FronthaulError::malformed("subframeId"));
        }
        if header.symbol as u32 >= SYMBOLS_PER_SLOT {
            return Err(FronthaulError::malformed("startSymbolId"));
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let header = RadioAppHeader {
            direction: Direction::Downlink,
            filter_index: 0,
            frame_id: 0x5A,
            subframe: 9,
            slot: 1,
            symbol: 13,
        };
        let mut out = BytesMut::new();
        header.write(&mut out);
        assert_eq!(&out[..], &[0x90, 0x5A, 0x90, 0x4D]);
        assert_eq!(RadioAppHeader::parse(&out).unwrap(), header);
    }

    #[test]
    fn test_rejects() {
        assert_eq!(RadioAppHeader::parse(&[0x20, 0, 0, 0]), Err(FronthaulError::malformed("payloadVersion")));
        assert_eq!(RadioAppHeader::parse(&[0x10, 0, 0xA0, 0]), Err(FronthaulError::malformed("subframeId")));
        assert_eq!(RadioAppHeader::parse(&[0x10, 0, 0x00, 0x0E]), Err(FronthaulError::malformed("startSymbolId")));
        assert!(matches!(RadioAppHeader::parse(&[0x10]), Err(FronthaulError::Truncated { .. })));
    }
}
