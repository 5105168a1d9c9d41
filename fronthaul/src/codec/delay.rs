//! Delay Measurement Messages
//! 
//! eCPRI message type 5. The 4-byte common header is followed by the measurement
//! id, the action type, a 10-byte PTP timestamp, an 8-byte compensation value and
//! zero padding.

use bytes::{BufMut, Bytes, BytesMut};
use nom::number::complete::{be_u16, be_u32, be_u64, be_u8};
use nom::sequence::{preceded, tuple};
use nom::IResult;

use super::ecpri::{peek_message_type, MessageType, ECPRI_COMMON_LEN, ECPRI_REVISION};
use crate::FronthaulError;

/// Measurement id, action type, timestamp and compensation value
pub const DELAY_FIELDS_LEN: usize = 20;
/// Padding bounds after the fixed fields
pub const MIN_DELAY_PADDING: usize = 40;
pub const MAX_DELAY_PADDING: usize = 1400;

const NS_PER_SEC: u64 = 1_000_000_000;
const SECONDS_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// Step of a measurement exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    Request = 0x00,
    RequestWithFollowUp = 0x01,
    Response = 0x02,
    RemoteRequest = 0x03,
    RemoteRequestWithFollowUp = 0x04,
    FollowUp = 0x05,
}

impl ActionType {
    pub fn from_wire(value: u8) -> Result<Self, FronthaulError> {
        match value {
            0x00 => Ok(ActionType::Request),
            0x01 => Ok(ActionType::RequestWithFollowUp),
            0x02 => Ok(ActionType::Response),
            0x03 => Ok(ActionType::RemoteRequest),
            0x04 => Ok(ActionType::RemoteRequestWithFollowUp),
            0x05 => Ok(ActionType::FollowUp),
            _ => Err(FronthaulError::malformed("actionType")),
        }
    }
}

/// 48-bit seconds and 32-bit nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PtpTimestamp {
    pub seconds: u64,
    pub nanoseconds: u32,
}

impl PtpTimestamp {
    pub fn from_ns(ns: u64) -> Self {
        Self { seconds: (ns / NS_PER_SEC) & SECONDS_MASK, nanoseconds: (ns % NS_PER_SEC) as u32 }
    }

    pub fn as_ns(&self) -> u64 {
        self.seconds.saturating_mul(NS_PER_SEC).saturating_add(self.nanoseconds as u64)
    }
}

/// One decoded delay measurement message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayMessage {
    pub measurement_id: u8,
    pub action: ActionType,
    pub timestamp: PtpTimestamp,
    /// Time spent inside the sending node, in nanoseconds
    pub compensation_ns: u64,
}

type RawFields = (u16, u8, u8, u16, u32, u32, u64);

fn raw_fields(input: &[u8]) -> IResult<&[u8], RawFields> {
    preceded(
        tuple((be_u8, be_u8)),
        tuple((be_u16, be_u8, be_u8, be_u16, be_u32, be_u32, be_u64)),
    )(input)
}

impl DelayMessage {
    /// Message with a zero timestamp and compensation
    pub fn new(measurement_id: u8, action: ActionType) -> Self {
        Self { measurement_id, action, timestamp: PtpTimestamp::default(), compensation_ns: 0 }
    }

    pub fn with_timestamp(mut self, ns: u64) -> Self {
        self.timestamp = PtpTimestamp::from_ns(ns);
        self
    }

    pub fn with_compensation(mut self, ns: u64) -> Self {
        self.compensation_ns = ns;
        self
    }

    /// Whole message with `padding` zero bytes after the fixed fields
    pub fn encode(&self, padding: usize) -> Bytes {
        let payload = DELAY_FIELDS_LEN + padding;
        let mut out = BytesMut::with_capacity(ECPRI_COMMON_LEN + payload);
        out.put_u8(ECPRI_REVISION << 4);
        out.put_u8(MessageType::DelayMeasurement as u8);
        out.put_u16(payload as u16);
        out.put_u8(self.measurement_id);
        out.put_u8(self.action as u8);
        out.put_u16((self.timestamp.seconds >> 32) as u16);
        out.put_u32(self.timestamp.seconds as u32);
        out.put_u32(self.timestamp.nanoseconds);
        out.put_u64(self.compensation_ns);
        out.put_bytes(0, padding);
        out.freeze()
    }

    pub fn decode(frame: &[u8]) -> Result<Self, FronthaulError> {
        if peek_message_type(frame)? != MessageType::DelayMeasurement {
            return Err(FronthaulError::malformed("ecpriMessage"));
        }
        let needed = ECPRI_COMMON_LEN + DELAY_FIELDS_LEN;
        let (_, (payload_size, measurement_id, action, secs_msb, secs_lsb, nanoseconds, compensation_ns)) =
            raw_fields(frame).map_err(|_| FronthaulError::Truncated { needed, available: frame.len() })?;
        if (payload_size as usize) < DELAY_FIELDS_LEN {
            return Err(FronthaulError::malformed("ecpriPayload"));
        }
        if ECPRI_COMMON_LEN + payload_size as usize > frame.len() {
            return Err(FronthaulError::Truncated {
                needed: ECPRI_COMMON_LEN + payload_size as usize,
                available: frame.len(),
            });
        }
        if nanoseconds as u64 >= NS_PER_SEC {
            return Err(FronthaulError::malformed("timeStamp"));
        }
        Ok(Self {
            measurement_id,
            action: ActionType::from_wire(action)?,
            timestamp: PtpTimestamp { seconds: ((secs_msb as u64) << 32) | secs_lsb as u64, nanoseconds },
            compensation_ns,
        })
    }
}
