//! Section Extensions
//! 
//! Self-describing sub-blocks that follow a C-plane section header when its `ef`
//! bit is set. Beamforming weights are opaque byte buffers.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::FronthaulError;

/// Extension type 1: explicit beamforming weights
pub const EXT_BF_WEIGHTS: u8 = 1;
/// Extension type 4: modulation compression scaler
pub const EXT_MOD_COMP: u8 = 4;
/// Extension type 5: modulation compression parameter sets
pub const EXT_MOD_COMP_SETS: u8 = 5;
/// Extension type 11: bundled beamforming weights
pub const EXT_BUNDLED_BF_WEIGHTS: u8 = 11;

/// Weights of one PRB bundle in extension 11
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeamBundle {
    /// 15-bit beam id
    pub beam_id: u16,
    pub weights: Bytes,
}

/// One modulation compression set of extension 5
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModCompSet {
    /// Resource elements the set applies to
    pub re_mask: u16,
    /// Constellation shift flag
    pub csf: bool,
    /// 15-bit scaler
    pub scaler: u16,
}

/// A decoded or to-be-encoded section extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionExtension {
    BeamformingWeights {
        /// `bfwCompHdr`
        comp_hdr: u8,
        weights: Bytes,
    },
    BundledWeights {
        disable_bfws: bool,
        rad: bool,
        /// PRBs per bundle
        num_bund_prb: u8,
        comp_hdr: u8,
        bundles: Vec<BeamBundle>,
    },
    ModCompScaler {
        csf: bool,
        scaler: u16,
    },
    ModCompParams {
        sets: Vec<ModCompSet>,
    },
}

fn padded(len: usize) -> usize {
    len.div_ceil(4) * 4
}

impl SectionExtension {
    pub fn ext_type(&self) -> u8 {
        match self {
            SectionExtension::BeamformingWeights { .. } => EXT_BF_WEIGHTS,
            SectionExtension::BundledWeights { .. } => EXT_BUNDLED_BF_WEIGHTS,
            SectionExtension::ModCompScaler { .. } => EXT_MOD_COMP,
            SectionExtension::ModCompParams { .. } => EXT_MOD_COMP_SETS,
        }
    }

    fn raw_len(&self) -> usize {
        match self {
            SectionExtension::BeamformingWeights { weights, .. } => 2 + 1 + 2 + weights.len(),
            SectionExtension::BundledWeights { bundles, .. } => {
                9 + bundles.iter().map(|b| 2 + b.weights.len()).sum::<usize>()
            }
            SectionExtension::ModCompScaler { .. } => 4,
            SectionExtension::ModCompParams { sets } => 2 + 4 * sets.len(),
        }
    }

    /// Encoded size including padding
    pub fn encoded_len(&self) -> usize {
        padded(self.raw_len())
    }

    /// Check field ranges before encoding
    pub fn validate(&self) -> Result<(), FronthaulError> {
        let invalid = |msg: &str| Err(FronthaulError::InvalidDescriptor(msg.into()));
        let words = self.encoded_len() / 4;
        match self {
            SectionExtension::BeamformingWeights { weights, .. } => {
                if weights.len() > u16::MAX as usize || words > u8::MAX as usize {
                    return invalid("extension 1 weights too long");
                }
            }
            SectionExtension::BundledWeights { bundles, .. } => {
                if bundles.is_empty() || bundles.len() > u8::MAX as usize {
                    return invalid("extension 11 needs 1 to 255 bundles");
                }
                let len = bundles[0].weights.len();
                if bundles.iter().any(|b| b.weights.len() != len || b.beam_id > 0x7FFF) {
                    return invalid("extension 11 bundles must share one weight length");
                }
                if len > u16::MAX as usize || words > u16::MAX as usize {
                    return invalid("extension 11 weights too long");
                }
            }
            SectionExtension::ModCompScaler { scaler, .. } => {
                if *scaler > 0x7FFF {
                    return invalid("modCompScaler exceeds 15 bits");
                }
            }
            SectionExtension::ModCompParams { sets } => {
                if sets.is_empty() || sets.iter().any(|s| s.scaler > 0x7FFF || s.re_mask > 0xFFF) {
                    return invalid("extension 5 set out of range");
                }
                if words > u8::MAX as usize {
                    return invalid("extension 5 too long");
                }
            }
        }
        Ok(())
    }

    /// Append the extension; `more` sets the `ef` bit announcing a following one
    pub fn encode(&self, out: &mut BytesMut, more: bool) {
        let start = out.len();
        let words = self.encoded_len() / 4;
        out.put_u8(((more as u8) << 7) | self.ext_type());
        match self {
            SectionExtension::BeamformingWeights { comp_hdr, weights } => {
                out.put_u8(words as u8);
                out.put_u8(*comp_hdr);
                out.put_u16(weights.len() as u16);
                out.put_slice(weights);
            }
            SectionExtension::BundledWeights { disable_bfws, rad, num_bund_prb, comp_hdr, bundles } => {
                out.put_u16(words as u16);
                out.put_u8(((*disable_bfws as u8) << 7) | ((*rad as u8) << 6));
                out.put_u8(*num_bund_prb);
                out.put_u8(*comp_hdr);
                out.put_u16(bundles.first().map_or(0, |b| b.weights.len()) as u16);
                out.put_u8(bundles.len() as u8);
                for bundle in bundles {
                    out.put_u16(bundle.beam_id & 0x7FFF);
                    out.put_slice(&bundle.weights);
                }
            }
            SectionExtension::ModCompScaler { csf, scaler } => {
                out.put_u8(words as u8);
                out.put_u16(((*csf as u16) << 15) | (scaler & 0x7FFF));
            }
            SectionExtension::ModCompParams { sets } => {
                out.put_u8(words as u8);
                for set in sets {
                    out.put_u32(
                        ((set.re_mask as u32 & 0xFFF) << 20)
                            | ((set.csf as u32) << 19)
                            | ((set.scaler as u32 & 0x7FFF) << 4),
                    );
                }
            }
        }
        let pad = self.encoded_len() - (out.len() - start);
        out.put_bytes(0, pad);
    }

    /// Decode one extension at the start of `data`
    ///
    /// Returns the extension, whether another follows, and the bytes consumed.
    pub fn decode(data: &Bytes) -> Result<(SectionExtension, bool, usize), FronthaulError> {
        let truncated = |needed: usize| FronthaulError::Truncated { needed, available: data.len() };
        let first = *data.first().ok_or_else(|| truncated(1))?;
        let more = first & 0x80 != 0;
        let ext_type = first & 0x7F;
        let (words, header) = if ext_type == EXT_BUNDLED_BF_WEIGHTS {
            if data.len() < 3 {
                return Err(truncated(3));
            }
            (u16::from_be_bytes([data[1], data[2]]) as usize, 3)
        } else {
            (*data.get(1).ok_or_else(|| truncated(2))? as usize, 2)
        };
        let total = words * 4;
        if total < header {
            return Err(FronthaulError::malformed("extLen"));
        }
        if data.len() < total {
            return Err(truncated(total));
        }
        let body = &data[header..total];
        let read_u16 = |at: usize| -> Result<u16, FronthaulError> {
            body.get(at..at + 2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .ok_or(FronthaulError::malformed("extension body"))
        };

        let ext = match ext_type {
            EXT_BF_WEIGHTS => {
                let comp_hdr = *body.first().ok_or(FronthaulError::malformed("bfwCompHdr"))?;
                let len = read_u16(1)? as usize;
                if 3 + len > body.len() {
                    return Err(FronthaulError::malformed("extension 1 weights"));
                }
                let offset = header + 3;
                SectionExtension::BeamformingWeights {
                    comp_hdr,
                    weights: data.slice(offset..offset + len),
                }
            }
            EXT_BUNDLED_BF_WEIGHTS => {
                if body.len() < 6 {
                    return Err(FronthaulError::malformed("extension 11 header"));
                }
                let flags = body[0];
                let num_bund_prb = body[1];
                let comp_hdr = body[2];
                let weight_len = read_u16(3)? as usize;
                let count = body[5] as usize;
                let mut bundles = Vec::with_capacity(count);
                let mut at = 6;
                for _ in 0..count {
                    let beam_id = read_u16(at)? & 0x7FFF;
                    let start = header + at + 2;
                    if at + 2 + weight_len > body.len() {
                        return Err(FronthaulError::malformed("extension 11 bundle"));
                    }
                    bundles.push(BeamBundle { beam_id, weights: data.slice(start..start + weight_len) });
                    at += 2 + weight_len;
                }
                SectionExtension::BundledWeights {
                    disable_bfws: flags & 0x80 != 0,
                    rad: flags & 0x40 != 0,
                    num_bund_prb,
                    comp_hdr,
                    bundles,
                }
            }
            EXT_MOD_COMP => {
                let value = read_u16(0)?;
                SectionExtension::ModCompScaler { csf: value & 0x8000 != 0, scaler: value & 0x7FFF }
            }
            EXT_MOD_COMP_SETS => {
                let sets = body
                    .chunks_exact(4)
                    .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                    .map(|raw| ModCompSet {
                        re_mask: (raw >> 20) as u16 & 0xFFF,
                        csf: raw & (1 << 19) != 0,
                        scaler: (raw >> 4) as u16 & 0x7FFF,
                    })
                    .collect();
                SectionExtension::ModCompParams { sets }
            }
            _ => return Err(FronthaulError::malformed("extType")),
        };
        trace!("Decoded extension type {} ({} bytes)", ext_type, total);
        Ok((ext, more, total))
    }
}
