//! Section Codec
//! 
//! Bit-exact encode and decode of C-plane and U-plane messages: eCPRI transport
//! header, radio application header, section headers, compression and extensions.

pub mod compression;
pub mod cplane;
pub mod delay;
pub mod ecpri;
pub mod extension;
pub mod fragment;
pub mod radio_app;
pub mod uplane;

pub use compression::CompressionParams;
pub use cplane::{decode_cplane, encode_cplane, CPlaneMessage, CPlaneTx};
pub use delay::{ActionType, DelayMessage, PtpTimestamp};
pub use ecpri::{peek_message_type, EcpriHeader, MessageType, ECPRI_HEADER_LEN};
pub use extension::SectionExtension;
pub use fragment::{Reassembler, Reassembly};
pub use radio_app::{RadioAppHeader, RADIO_APP_HEADER_LEN};
pub use uplane::{
    decode_header, decode_uplane, encode_section, encode_symbol, DecodedHeader, FlowParams, IqSource,
    UPlaneMessage, UPlaneSection, UPlaneTx,
};

use crate::FronthaulError;

/// Fail with `Truncated` unless `data` holds at least `needed` bytes
pub(crate) fn ensure_len(data: &[u8], needed: usize) -> Result<(), FronthaulError> {
    if data.len() < needed {
        Err(FronthaulError::Truncated { needed, available: data.len() })
    } else {
        Ok(())
    }
}

/// Bytes left for sections once the message headers are accounted for
pub(crate) fn min_section_room(mtu: usize, overhead: usize) -> Result<usize, FronthaulError> {
    mtu.checked_sub(overhead)
        .filter(|room| *room > 0)
        .ok_or(FronthaulError::CapacityExceeded("MTU smaller than message headers"))
}
