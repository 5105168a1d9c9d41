//! µ-law Companding
//! 
//! Each PRB is normalized by a left shift, then companded with µ = 255. The
//! parameter byte carries the width in the upper nibble and the shift in the lower.

use bytes::{BufMut, BytesMut};
use common::types::SUBCARRIERS_PER_PRB;
use num_complex::Complex;

use super::{max_abs, pack_prb, unpack_prb};
use crate::FronthaulError;

const MU: f64 = 255.0;
const FULL_SCALE: f64 = 32768.0;

fn max_code(iq_width: u8) -> f64 {
    ((1i32 << (iq_width - 1)) - 1) as f64
}

/// Normalization shift for a PRB whose largest magnitude is `max_abs`
pub fn comp_shift(max_abs: u16) -> u8 {
    (max_abs.leading_zeros().saturating_sub(1)).min(15) as u8
}

fn compand(value: i32, shift: u8, iq_width: u8) -> i32 {
    let scaled = ((value as i64) << shift) as f64;
    let f = (scaled.abs() / FULL_SCALE).min(1.0);
    let m = max_code(iq_width);
    let code = (m * (1.0 + MU * f).ln() / (1.0 + MU).ln()).round().min(m) as i32;
    if value < 0 {
        -code
    } else {
        code
    }
}

fn expand(code: i32, shift: u8, iq_width: u8) -> i32 {
    let m = max_code(iq_width);
    let f = ((1.0 + MU).powf(code.unsigned_abs() as f64 / m) - 1.0) / MU;
    let magnitude = (f * FULL_SCALE / (1u32 << shift) as f64).round() as i32;
    if code < 0 {
        -magnitude
    } else {
        magnitude
    }
}

pub(super) fn compress_prb(prb: &[Complex<i16>], iq_width: u8, out: &mut BytesMut) {
    let shift = comp_shift(max_abs(prb));
    out.put_u8(((iq_width & 0x0F) << 4) | shift);
    let codes = prb
        .iter()
        .flat_map(|c| [c.re, c.im])
        .map(move |v| compand(v as i32, shift, iq_width));
    pack_prb(out, codes, iq_width);
}

pub(super) fn decompress_prb(
    data: &[u8],
    iq_width: u8,
) -> Result<[i32; 2 * SUBCARRIERS_PER_PRB], FronthaulError> {
    let (&param, body) = data
        .split_first()
        .ok_or(FronthaulError::Truncated { needed: 1, available: 0 })?;
    let shift = param & 0x0F;
    let mut codes = unpack_prb(body, iq_width)?;
    for code in codes.iter_mut() {
        *code = expand(*code, shift, iq_width);
    }
    Ok(codes)
}
