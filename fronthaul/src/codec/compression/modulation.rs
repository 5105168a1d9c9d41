//! Modulation Compression
//! 
//! Constellation points are sent as 1 to 4 bit codes per component. The unit
//! (`modCompScaler`) is the amplitude at which the outermost point sits; codes with
//! the top bit clear are positive odd multiples of `unit >> width`, the rest mirror
//! them below zero.

use bytes::BytesMut;
use common::types::SUBCARRIERS_PER_PRB;
use common::utils::BitReader;
use num_complex::Complex;

use super::pack_prb;
use crate::FronthaulError;

fn step(scaler: u16, bits: u8) -> Result<i32, FronthaulError> {
    let step = (scaler >> bits) as i32;
    if step == 0 {
        return Err(FronthaulError::InvalidDescriptor(format!(
            "modCompScaler {:#x} too small for {} bits",
            scaler, bits
        )));
    }
    Ok(step)
}

/// Code of one component value
pub fn encode_component(value: i32, scaler: u16, bits: u8) -> Result<u16, FronthaulError> {
    let step = step(scaler, bits)?;
    let half = 1i32 << (bits - 1);
    let level = (value.abs() / (2 * step)).min(half - 1);
    let code = if value >= 0 { level } else { (1 << bits) - 1 - level };
    Ok(code as u16)
}

/// Amplitude of one component code
pub fn decode_component(code: u16, scaler: u16, bits: u8) -> Result<i32, FronthaulError> {
    let step = step(scaler, bits)?;
    let code = code as i32;
    let half = 1i32 << (bits - 1);
    Ok(if code < half {
        step * (2 * code + 1)
    } else {
        -step * (2 * ((1 << bits) - 1 - code) + 1)
    })
}

pub(super) fn compress_prb(
    prb: &[Complex<i16>],
    bits: u8,
    scaler: u16,
    out: &mut BytesMut,
) -> Result<(), FronthaulError> {
    let mut codes = [0i32; 2 * SUBCARRIERS_PER_PRB];
    for (slot, value) in codes.iter_mut().zip(prb.iter().flat_map(|c| [c.re, c.im])) {
        *slot = encode_component(value as i32, scaler, bits)? as i32;
    }
    pack_prb(out, codes.into_iter(), bits);
    Ok(())
}

pub(super) fn decompress_prb(
    data: &[u8],
    bits: u8,
    scaler: u16,
) -> Result<[i32; 2 * SUBCARRIERS_PER_PRB], FronthaulError> {
    let mut reader = BitReader::new(data);
    let mut values = [0i32; 2 * SUBCARRIERS_PER_PRB];
    for value in values.iter_mut() {
        let code = reader
            .take(bits as u32)
            .ok_or(FronthaulError::Truncated { needed: 3 * bits as usize, available: data.len() })?;
        *value = decode_component(code, scaler, bits)?;
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::super::{compress, decompress, CompressionParams};
    use super::*;
    use common::types::CompMethod;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_qpsk_codes() {
        assert_eq!(encode_component(4096, 0x2000, 1).unwrap(), 0);
        assert_eq!(encode_component(-4096, 0x2000, 1).unwrap(), 1);
        assert_eq!(decode_component(0, 0x2000, 1).unwrap(), 4096);
        assert_eq!(decode_component(1, 0x2000, 1).unwrap(), -4096);
    }

    #[test]
    fn test_constellation_exact() {
        let mut rng = StdRng::seed_from_u64(9);
        for bits in 1..=4u8 {
            let scaler = 0x4000u16;
            let half = 1i32 << (bits - 1);
            let step = (scaler >> bits) as i32;
            let point = |rng: &mut StdRng| {
                let level = rng.gen_range(0..half);
                let sign = if rng.gen_bool(0.5) { 1 } else { -1 };
                (sign * step * (2 * level + 1)) as i16
            };
            let samples: Vec<_> = (0..3 * SUBCARRIERS_PER_PRB)
                .map(|_| Complex::new(point(&mut rng), point(&mut rng)))
                .collect();
            let params = CompressionParams::new(CompMethod::Modulation, bits).with_scaler(scaler);
            let mut out = BytesMut::new();
            compress(&params, &samples, &mut out).unwrap();
            assert_eq!(out.len(), 3 * 3 * bits as usize);
            let mut back = Vec::new();
            decompress(&params, &out, &mut back).unwrap();
            assert_eq!(back, samples);
        }
    }

    #[test]
    fn test_scaler_too_small() {
        assert!(encode_component(1, 0x0001, 2).is_err());
    }
}
