//! Block Scaling
//! 
//! One 8-bit scaler per PRB (Q1.7 style); samples are divided by the scaled unit
//! and rounded to the nearest code.

use bytes::{BufMut, BytesMut};
use common::types::SUBCARRIERS_PER_PRB;
use num_complex::Complex;

use super::{max_abs, pack_prb, unpack_prb};
use crate::FronthaulError;

fn max_code(iq_width: u8) -> i64 {
    (1i64 << (iq_width - 1)) - 1
}

fn round_div(num: i64, den: i64) -> i64 {
    if num >= 0 {
        (num + den / 2) / den
    } else {
        -((-num + den / 2) / den)
    }
}

/// Scaler chosen for a PRB whose largest magnitude is `max_abs`
pub fn scaler(max_abs: u16, iq_width: u8) -> u8 {
    let base = (max_code(iq_width).max(1) as u64) << (16 - iq_width as u32);
    let s = (max_abs as u64 * 128).div_ceil(base);
    s.clamp(1, 255) as u8
}

fn unit(scaler: u8, iq_width: u8) -> i64 {
    (scaler as i64) << (16 - iq_width as u32)
}

pub(super) fn compress_prb(prb: &[Complex<i16>], iq_width: u8, out: &mut BytesMut) {
    let s = scaler(max_abs(prb), iq_width);
    out.put_u8(s);
    let unit = unit(s, iq_width);
    let limit = max_code(iq_width);
    let codes = prb
        .iter()
        .flat_map(|c| [c.re, c.im])
        .map(move |v| round_div(v as i64 * 128, unit).clamp(-limit, limit) as i32);
    pack_prb(out, codes, iq_width);
}

pub(super) fn decompress_prb(
    data: &[u8],
    iq_width: u8,
) -> Result<[i32; 2 * SUBCARRIERS_PER_PRB], FronthaulError> {
    let (&s, body) = data
        .split_first()
        .ok_or(FronthaulError::Truncated { needed: 1, available: 0 })?;
    let unit = unit(s, iq_width);
    let mut codes = unpack_prb(body, iq_width)?;
    for code in codes.iter_mut() {
        *code = ((*code as i64 * unit + 64) >> 7) as i32;
    }
    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::super::test_util::random_samples;
    use super::super::{compress, decompress, CompressionParams};
    use super::*;
    use common::types::CompMethod;

    #[test]
    fn test_scaler() {
        assert_eq!(scaler(0, 9), 1);
        assert_eq!(scaler(32767, 8), 130);
        assert_eq!(scaler(32767, 16), 128);
    }

    #[test]
    fn test_block_scaling_widths() {
        let samples = random_samples(20, 3);
        for width in 8..=16u8 {
            let params = CompressionParams::new(CompMethod::BlockScaling, width);
            let mut out = BytesMut::new();
            compress(&params, &samples, &mut out).unwrap();
            assert_eq!(out.len(), params.payload_len(20));
            let mut back = Vec::new();
            decompress(&params, &out, &mut back).unwrap();
            for (prb, (orig, dec)) in samples
                .chunks(SUBCARRIERS_PER_PRB)
                .zip(back.chunks(SUBCARRIERS_PER_PRB))
                .enumerate()
            {
                let s = out[prb * params.prb_bytes()];
                let bound = unit(s, width) / 128 + 1;
                for (a, b) in orig.iter().zip(dec) {
                    assert!((a.re as i64 - b.re as i64).abs() <= bound);
                    assert!((a.im as i64 - b.im as i64).abs() <= bound);
                }
            }
        }
    }
}
