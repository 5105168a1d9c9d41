//! IQ Compression
//! 
//! Per-PRB packing of complex samples for every supported `udCompMeth`. All methods
//! pack I then Q for each of the 12 subcarriers, MSB first, so a PRB always occupies
//! `3 * iq_width` bytes plus an optional leading parameter byte.

pub mod bfp;
pub mod block_scaling;
pub mod modulation;
pub mod mulaw;

use bytes::{BufMut, BytesMut};
use common::types::{CompMethod, SUBCARRIERS_PER_PRB};
use common::utils::{BitReader, BitWriter};
use num_complex::Complex;
use num_traits::FromPrimitive;
use tracing::debug;

use crate::FronthaulError;

/// Negotiated compression of one flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionParams {
    pub method: CompMethod,
    /// Bits per I or Q component
    pub iq_width: u8,
    /// Constellation unit for modulation compression
    pub mod_comp_scaler: u16,
}

impl Default for CompressionParams {
    fn default() -> Self {
        Self::none()
    }
}

impl CompressionParams {
    pub fn new(method: CompMethod, iq_width: u8) -> Self {
        Self { method, iq_width, mod_comp_scaler: 0x2000 }
    }

    /// Uncompressed 16-bit samples
    pub fn none() -> Self {
        Self::new(CompMethod::None, 16)
    }

    pub fn with_scaler(mut self, scaler: u16) -> Self {
        self.mod_comp_scaler = scaler;
        self
    }

    /// Whether a compression header travels with the data
    pub fn is_compressed(&self) -> bool {
        self.method != CompMethod::None
    }

    /// Bytes per PRB including the parameter byte
    pub fn prb_bytes(&self) -> usize {
        let iq = 3 * self.iq_width as usize;
        if self.method.has_prb_param() {
            iq + 1
        } else {
            iq
        }
    }

    /// IQ payload length of `prbs` PRBs; shared by encoder and decoder
    pub fn payload_len(&self, prbs: u16) -> usize {
        prbs as usize * self.prb_bytes()
    }

    /// `udCompHdr` byte: IQ width (16 coded as 0) then method
    pub fn header_byte(&self) -> u8 {
        ((self.iq_width & 0x0F) << 4) | (self.method as u8 & 0x0F)
    }

    /// Parse a `udCompHdr` byte
    pub fn from_header_byte(byte: u8) -> Result<Self, FronthaulError> {
        let method = CompMethod::from_u8(byte & 0x0F).ok_or(FronthaulError::malformed("udCompMeth"))?;
        let width = match byte >> 4 {
            0 => 16,
            w => w,
        };
        validate_width(method, width).map_err(|_| FronthaulError::malformed("udIqWidth"))?;
        Ok(Self::new(method, width))
    }
}

/// Check that an IQ width is usable with a method
pub fn validate_width(method: CompMethod, iq_width: u8) -> Result<(), FronthaulError> {
    let range = match method {
        CompMethod::None | CompMethod::BlockFloatingPoint => 1..=16,
        CompMethod::BlockScaling | CompMethod::MuLaw => 2..=16,
        CompMethod::Modulation => 1..=4,
    };
    if range.contains(&iq_width) {
        Ok(())
    } else {
        Err(FronthaulError::InvalidDescriptor(format!(
            "IQ width {} not supported by {:?}",
            iq_width, method
        )))
    }
}

fn check_samples(samples: &[Complex<i16>]) -> Result<(), FronthaulError> {
    if samples.len() % SUBCARRIERS_PER_PRB != 0 {
        return Err(FronthaulError::InvalidDescriptor(format!(
            "{} samples is not a whole number of PRBs",
            samples.len()
        )));
    }
    Ok(())
}

/// Largest component magnitude of a PRB, saturating `i16::MIN`
pub(crate) fn max_abs(prb: &[Complex<i16>]) -> u16 {
    prb.iter()
        .flat_map(|s| [s.re, s.im])
        .map(|v| v.unsigned_abs().min(i16::MAX as u16))
        .max()
        .unwrap_or(0)
}

/// Pack already-scaled component codes of one PRB
pub(crate) fn pack_prb(out: &mut BytesMut, codes: impl Iterator<Item = i32>, width: u8) {
    let mut writer = BitWriter::new(out);
    for code in codes {
        writer.put(code as u16, width as u32);
    }
    writer.finish();
}

/// Unpack signed component codes of one PRB
pub(crate) fn unpack_prb(data: &[u8], width: u8) -> Result<[i32; 2 * SUBCARRIERS_PER_PRB], FronthaulError> {
    let mut reader = BitReader::new(data);
    let mut codes = [0i32; 2 * SUBCARRIERS_PER_PRB];
    for code in codes.iter_mut() {
        *code = reader
            .take_signed(width as u32)
            .ok_or(FronthaulError::Truncated { needed: 3 * width as usize, available: data.len() })?
            as i32;
    }
    Ok(codes)
}

/// Pack one uncompressed PRB, saturating components to `width` bits
///
/// Returns how many components were clipped.
fn pack_saturated(out: &mut BytesMut, prb: &[Complex<i16>], width: u8) -> usize {
    let max = (1i32 << (width - 1)) - 1;
    let min = -(1i32 << (width - 1));
    let mut clipped = 0;
    let codes = prb.iter().flat_map(|s| [s.re as i32, s.im as i32]).map(|v| {
        let code = v.clamp(min, max);
        if code != v {
            clipped += 1;
        }
        code
    });
    pack_prb(out, codes, width);
    clipped
}

/// Compress whole PRBs of samples, appending to `out`
pub fn compress(
    params: &CompressionParams,
    samples: &[Complex<i16>],
    out: &mut BytesMut,
) -> Result<(), FronthaulError> {
    validate_width(params.method, params.iq_width)?;
    check_samples(samples)?;
    out.reserve(params.payload_len((samples.len() / SUBCARRIERS_PER_PRB) as u16));
    let mut clipped = 0;
    for prb in samples.chunks_exact(SUBCARRIERS_PER_PRB) {
        match params.method {
            CompMethod::None => clipped += pack_saturated(out, prb, params.iq_width),
            CompMethod::BlockFloatingPoint => bfp::compress_prb(prb, params.iq_width, out),
            CompMethod::BlockScaling => block_scaling::compress_prb(prb, params.iq_width, out),
            CompMethod::MuLaw => mulaw::compress_prb(prb, params.iq_width, out),
            CompMethod::Modulation => {
                modulation::compress_prb(prb, params.iq_width, params.mod_comp_scaler, out)?
            }
        }
    }
    if clipped > 0 {
        debug!("{} IQ components saturated to {} bits", clipped, params.iq_width);
    }
    Ok(())
}

/// Decompress `data`, which must hold exactly whole PRBs, appending samples to `out`
pub fn decompress(
    params: &CompressionParams,
    data: &[u8],
    out: &mut Vec<Complex<i16>>,
) -> Result<(), FronthaulError> {
    validate_width(params.method, params.iq_width)?;
    let prb_bytes = params.prb_bytes();
    if data.len() % prb_bytes != 0 {
        return Err(FronthaulError::Truncated {
            needed: data.len().div_ceil(prb_bytes) * prb_bytes,
            available: data.len(),
        });
    }
    out.reserve(data.len() / prb_bytes * SUBCARRIERS_PER_PRB);
    for prb in data.chunks_exact(prb_bytes) {
        let codes = match params.method {
            CompMethod::None => unpack_prb(prb, params.iq_width)?,
            CompMethod::BlockFloatingPoint => bfp::decompress_prb(prb, params.iq_width)?,
            CompMethod::BlockScaling => block_scaling::decompress_prb(prb, params.iq_width)?,
            CompMethod::MuLaw => mulaw::decompress_prb(prb, params.iq_width)?,
            CompMethod::Modulation => {
                modulation::decompress_prb(prb, params.iq_width, params.mod_comp_scaler)?
            }
        };
        out.extend(
            codes
                .chunks_exact(2)
                .map(|c| Complex::new(saturate(c[0]), saturate(c[1]))),
        );
    }
    Ok(())
}

fn saturate(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Write the per-section compression header and its reserved byte
pub fn put_comp_header(out: &mut BytesMut, params: &CompressionParams) {
    out.put_u8(params.header_byte());
    out.put_u8(0);
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// Random samples with a per-PRB dynamic range so exponents vary
    pub fn random_samples(prbs: usize, seed: u64) -> Vec<Complex<i16>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut samples = Vec::with_capacity(prbs * SUBCARRIERS_PER_PRB);
        for _ in 0..prbs {
            let bits = rng.gen_range(2..=15);
            let limit = (1i32 << bits) - 1;
            for _ in 0..SUBCARRIERS_PER_PRB {
                samples.push(Complex::new(
                    rng.gen_range(-limit..=limit) as i16,
                    rng.gen_range(-limit..=limit) as i16,
                ));
            }
        }
        samples
    }

    /// Random points of the constellation a modulation width and scaler can carry
    pub fn constellation_samples(prbs: usize, bits: u8, scaler: u16, seed: u64) -> Vec<Complex<i16>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut point = || {
            let code = rng.gen_range(0..1u16 << bits);
            modulation::decode_component(code, scaler, bits).map_or(0, |v| v as i16)
        };
        (0..prbs * SUBCARRIERS_PER_PRB).map(|_| Complex::new(point(), point())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::random_samples;
    use super::*;

    #[test]
    fn test_payload_len() {
        assert_eq!(CompressionParams::none().payload_len(10), 480);
        assert_eq!(CompressionParams::new(CompMethod::BlockFloatingPoint, 9).payload_len(10), 280);
        assert_eq!(CompressionParams::new(CompMethod::BlockScaling, 8).payload_len(3), 75);
        assert_eq!(CompressionParams::new(CompMethod::Modulation, 2).payload_len(4), 24);
        assert_eq!(CompressionParams::new(CompMethod::MuLaw, 16).payload_len(273), 273 * 49);
    }

    #[test]
    fn test_header_byte() {
        let bfp = CompressionParams::new(CompMethod::BlockFloatingPoint, 9);
        assert_eq!(bfp.header_byte(), 0x91);
        assert_eq!(CompressionParams::from_header_byte(0x91).unwrap(), bfp);
        assert_eq!(CompressionParams::from_header_byte(0x00).unwrap(), CompressionParams::none());
        assert!(CompressionParams::from_header_byte(0x07).is_err());
        assert!(CompressionParams::from_header_byte(0x54).is_err());
    }

    #[test]
    fn test_uncompressed_exact() {
        let samples = random_samples(10, 1);
        let params = CompressionParams::none();
        let mut out = BytesMut::new();
        compress(&params, &samples, &mut out).unwrap();
        assert_eq!(out.len(), 480);
        // Big-endian 16-bit I then Q
        assert_eq!(&out[..2], &samples[0].re.to_be_bytes());
        let mut back = Vec::new();
        decompress(&params, &out, &mut back).unwrap();
        assert_eq!(back, samples);
    }

    #[test]
    fn test_narrow_uncompressed() {
        let samples: Vec<_> = (0..24).map(|i| Complex::new(i as i16 - 12, 11 - i as i16)).collect();
        let params = CompressionParams::new(CompMethod::None, 8);
        let mut out = BytesMut::new();
        compress(&params, &samples, &mut out).unwrap();
        assert_eq!(out.len(), 48);
        let mut back = Vec::new();
        decompress(&params, &out, &mut back).unwrap();
        assert_eq!(back, samples);
    }

    #[test]
    fn test_narrow_uncompressed_saturates() {
        let mut samples = vec![Complex::new(0i16, 0i16); SUBCARRIERS_PER_PRB];
        samples[0] = Complex::new(300, -300);
        samples[1] = Complex::new(i16::MAX, i16::MIN);
        samples[2] = Complex::new(127, -128);
        let params = CompressionParams::new(CompMethod::None, 8);
        let mut out = BytesMut::new();
        compress(&params, &samples, &mut out).unwrap();
        let mut back = Vec::new();
        decompress(&params, &out, &mut back).unwrap();
        assert_eq!(back[0], Complex::new(127, -128));
        assert_eq!(back[1], Complex::new(127, -128));
        assert_eq!(back[2], Complex::new(127, -128));
        assert_eq!(&back[3..], &samples[3..]);
    }

    #[test]
    fn test_length_mismatch() {
        let params = CompressionParams::new(CompMethod::BlockFloatingPoint, 9);
        let mut back = Vec::new();
        assert!(matches!(
            decompress(&params, &[0u8; 27], &mut back),
            Err(FronthaulError::Truncated { needed: 28, available: 27 })
        ));
        let mut out = BytesMut::new();
        assert!(compress(&params, &[Complex::new(0, 0); 5], &mut out).is_err());
    }
}
