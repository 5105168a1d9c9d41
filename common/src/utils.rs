//! Common Utilities
//! 
//! Bit packing and small arithmetic helpers shared by the codec and the sample application

use bytes::{BufMut, BytesMut};
use tracing::trace;

use crate::types::SUBCARRIERS_PER_PRB;

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// MSB-first writer for fields of arbitrary width (1 to 16 bits)
///
/// Partial bytes are zero padded on `finish`.
pub struct BitWriter<'a> {
    out: &'a mut BytesMut,
    acc: u32,
    nbits: u32,
}

impl<'a> BitWriter<'a> {
    /// Start writing at the end of `out`
    pub fn new(out: &'a mut BytesMut) -> Self {
        Self { out, acc: 0, nbits: 0 }
    }

    /// Append the low `width` bits of `value`
    pub fn put(&mut self, value: u16, width: u32) {
        debug_assert!(width >= 1 && width <= 16);
        let mask = if width == 16 { 0xFFFF } else { (1u32 << width) - 1 };
        self.acc = (self.acc << width) | (value as u32 & mask);
        self.nbits += width;
        while self.nbits >= 8 {
            self.nbits -= 8;
            self.out.put_u8((self.acc >> self.nbits) as u8);
        }
        self.acc &= (1u32 << self.nbits) - 1;
    }

    /// Flush the trailing partial byte, if any
    pub fn finish(self) {
        if self.nbits > 0 {
            self.out.put_u8((self.acc << (8 - self.nbits)) as u8);
        }
    }
}

/// MSB-first reader matching [`BitWriter`]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u32,
    nbits: u32,
}

impl<'a> BitReader<'a> {
    /// Read from the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, acc: 0, nbits: 0 }
    }

    /// Take the next `width` bits as an unsigned value, `None` once the input is exhausted
    pub fn take(&mut self, width: u32) -> Option<u16> {
        debug_assert!(width >= 1 && width <= 16);
        while self.nbits < width {
            let byte = *self.data.get(self.pos)?;
            self.pos += 1;
            self.acc = (self.acc << 8) | byte as u32;
            self.nbits += 8;
        }
        self.nbits -= width;
        let value = (self.acc >> self.nbits) & ((1u32 << width) - 1);
        self.acc &= (1u32 << self.nbits) - 1;
        Some(value as u16)
    }

    /// Take the next `width` bits as a 2's complement value
    pub fn take_signed(&mut self, width: u32) -> Option<i16> {
        self.take(width).map(|raw| sign_extend(raw, width))
    }
}

/// Sign extend the low `width` bits of `raw`
pub fn sign_extend(raw: u16, width: u32) -> i16 {
    let shift = 16 - width;
    ((raw << shift) as i16) >> shift
}

/// Round up to next power of 2
pub fn next_power_of_2(n: u32) -> u32 {
    if n == 0 {
        return 1;
    }
    
    let mut v = n;
    v -= 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v + 1
}

/// Smallest FFT size able to hold `nrb` resource blocks (never below 128)
pub fn fft_size_for_prbs(nrb: u16) -> u32 {
    let subcarriers = nrb as u32 * SUBCARRIERS_PER_PRB as u32;
    let fft = next_power_of_2(subcarriers).max(128);
    trace!("FFT size {} for {} RBs", fft, nrb);
    fft
}

/// Four-bit FFT size code used by section type 3 headers
pub fn fft_size_code(fft_size: u32) -> Option<u8> {
    match fft_size {
        128 => Some(7),
        256 => Some(8),
        512 => Some(9),
        1024 => Some(10),
        2048 => Some(11),
        4096 => Some(12),
        1536 => Some(13),
        _ => None,
    }
}

/// Inverse of [`fft_size_code`]
pub fn fft_size_from_code(code: u8) -> Option<u32> {
    match code {
        7 => Some(128),
        8 => Some(256),
        9 => Some(512),
        10 => Some(1024),
        11 => Some(2048),
        12 => Some(4096),
        13 => Some(1536),
        _ => None,
    }
}
