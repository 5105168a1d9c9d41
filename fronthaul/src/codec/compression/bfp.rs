//! Block Floating Point
//! 
//! One exponent byte per PRB; mantissas are the samples shifted right by the
//! exponent so the largest magnitude fits the IQ width.

use bytes::{BufMut, BytesMut};
use common::types::SUBCARRIERS_PER_PRB;
use num_complex::Complex;

use super::{max_abs, pack_prb, unpack_prb};
use crate::FronthaulError;

/// Exponent needed for a PRB whose largest magnitude is `max_abs`
pub fn exponent(max_abs: u16, iq_width: u8) -> u8 {
    let needed = 17 - max_abs.leading_zeros() as i32;
    (needed - iq_width as i32).max(0) as u8
}

pub(super) fn compress_prb(prb: &[Complex<i16>], iq_width: u8, out: &mut BytesMut) {
    let exp = exponent(max_abs(prb), iq_width);
    out.put_u8(exp);
    let codes = prb.iter().flat_map(|s| [(s.re as i32) >> exp, (s.im as i32) >> exp]);
    pack_prb(out, codes, iq_width);
}

pub(super) fn decompress_prb(
    data: &[u8],
    iq_width: u8,
) -> Result<[i32; 2 * SUBCARRIERS_PER_PRB], FronthaulError> {
    let (&exp, mantissas) = data
        .split_first()
        .ok_or(FronthaulError::Truncated { needed: 1, available: 0 })?;
    let exp = exp & 0x0F;
    let mut codes = unpack_prb(mantissas, iq_width)?;
    for code in codes.iter_mut() {
        *code <<= exp;
    }
    Ok(codes)
}
