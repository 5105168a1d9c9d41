//! Section Descriptor
//! 
//! One scheduled PRB group over a symbol range, with everything the codec needs to
//! put it on the wire.

use bitflags::bitflags;
use common::types::{Direction, SYMBOLS_PER_SLOT};

use crate::codec::compression::{validate_width, CompressionParams};
use crate::codec::extension::SectionExtension;
use crate::FronthaulError;

/// Largest section id (12 bits)
pub const MAX_SECTION_ID: u16 = 0x0FFF;
/// All twelve resource elements of a PRB
pub const DEFAULT_RE_MASK: u16 = 0x0FFF;

bitflags! {
    /// Per-section flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SectionFlags: u8 {
        /// First section of its resource in this slot
        const FIRST_OF_RESOURCE = 1 << 0;
        /// Last section of its resource in this slot
        const LAST_OF_RESOURCE = 1 << 1;
        /// `symInc`: the section starts a new symbol
        const SYMBOL_INCREMENT = 1 << 2;
        /// `rb`: every other PRB is used
        const EVERY_OTHER_PRB = 1 << 3;
    }
}

/// C-plane section type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SectionType {
    /// Most DL and UL channels
    #[default]
    Standard = 1,
    /// PRACH and mixed numerology
    Prach = 3,
}

impl SectionType {
    pub fn from_wire(value: u8) -> Result<Self, FronthaulError> {
        match value {
            1 => Ok(SectionType::Standard),
            3 => Ok(SectionType::Prach),
            _ => Err(FronthaulError::malformed("sectionType")),
        }
    }
}

/// How the RU forms the beam of a section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BeamformingMode {
    /// No beamforming, beam id 0
    #[default]
    Disabled,
    /// Predefined beam selected by `beam_id`
    BeamIndex,
    /// Weights carried in extension 1 or 11
    Weights,
}

/// Location of one symbol's IQ bytes inside the context payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolPayload {
    pub offset: usize,
    pub len: usize,
}

/// Section type 3 header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Type3Params {
    /// Offset from the start of the slot to the start of the cyclic prefix, in samples
    pub time_offset: u16,
    /// FFT size of the PRACH numerology
    pub fft_size: u32,
    /// Numerology of the PRACH subcarriers
    pub numerology: u8,
    /// Cyclic prefix length in samples
    pub cp_length: u16,
}

/// One scheduled PRB group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionDescriptor {
    /// Section id, unique per channel per slot (12 bits)
    pub section_id: u16,
    pub direction: Direction,
    pub section_type: SectionType,
    pub prb_start: u16,
    pub prb_count: u16,
    pub symbol_start: u8,
    pub symbol_count: u8,
    pub compression: CompressionParams,
    pub beamforming: BeamformingMode,
    pub re_mask: u16,
    pub beam_id: u16,
    /// Frequency offset in half subcarriers (24-bit signed)
    pub freq_offset: i32,
    pub flags: SectionFlags,
    pub extensions: Vec<SectionExtension>,
    /// IQ bytes per symbol of the slot
    pub symbols: [Option<SymbolPayload>; SYMBOLS_PER_SLOT as usize],
    pub type3: Option<Type3Params>,
}

impl SectionDescriptor {
    /// Uncompressed section over full resource elements
    pub fn new(
        section_id: u16,
        direction: Direction,
        prb_start: u16,
        prb_count: u16,
        symbol_start: u8,
        symbol_count: u8,
    ) -> Self {
        Self {
            section_id,
            direction,
            section_type: SectionType::Standard,
            prb_start,
            prb_count,
            symbol_start,
            symbol_count,
            compression: CompressionParams::none(),
            beamforming: BeamformingMode::Disabled,
            re_mask: DEFAULT_RE_MASK,
            beam_id: 0,
            freq_offset: 0,
            flags: SectionFlags::FIRST_OF_RESOURCE | SectionFlags::LAST_OF_RESOURCE,
            extensions: Vec::new(),
            symbols: [None; SYMBOLS_PER_SLOT as usize],
            type3: None,
        }
    }

    pub fn with_compression(mut self, compression: CompressionParams) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_beam_id(mut self, beam_id: u16) -> Self {
        self.beam_id = beam_id;
        self.beamforming = BeamformingMode::BeamIndex;
        self
    }

    pub fn with_re_mask(mut self, re_mask: u16) -> Self {
        self.re_mask = re_mask;
        self
    }

    pub fn with_flags(mut self, flags: SectionFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_extension(mut self, extension: SectionExtension) -> Self {
        if matches!(
            extension,
            SectionExtension::BeamformingWeights { .. } | SectionExtension::BundledWeights { .. }
        ) {
            self.beamforming = BeamformingMode::Weights;
        }
        self.extensions.push(extension);
        self
    }

    /// Turn the section into a type 3 (PRACH) section
    pub fn with_prach(mut self, params: Type3Params, freq_offset: i32) -> Self {
        self.section_type = SectionType::Prach;
        self.type3 = Some(params);
        self.freq_offset = freq_offset;
        self
    }

    /// Record where the IQ bytes of `symbol` live in the context payload
    pub fn with_symbol_payload(mut self, symbol: u8, offset: usize, len: usize) -> Self {
        if let Some(slot) = self.symbols.get_mut(symbol as usize) {
            *slot = Some(SymbolPayload { offset, len });
        }
        self
    }

    /// One past the last symbol
    pub fn symbol_end(&self) -> u16 {
        self.symbol_start as u16 + self.symbol_count as u16
    }

    pub fn covers_symbol(&self, symbol: u8) -> bool {
        symbol >= self.symbol_start && (symbol as u16) < self.symbol_end()
    }

    pub fn has_default_re_mask(&self) -> bool {
        self.re_mask == DEFAULT_RE_MASK
    }

    /// IQ bytes of one symbol of this section
    pub fn iq_len(&self) -> usize {
        self.compression.payload_len(self.prb_count)
    }

    /// PRB count as carried on the wire, 0 meaning all PRBs of the carrier
    pub fn wire_prb_count(&self, carrier_prbs: u16) -> u8 {
        if self.prb_start == 0 && self.prb_count == carrier_prbs && carrier_prbs > u8::MAX as u16 {
            0
        } else {
            self.prb_count as u8
        }
    }

    /// Check every field against the carrier size
    pub fn validate(&self, carrier_prbs: u16) -> Result<(), FronthaulError> {
        let invalid = |msg: String| Err(FronthaulError::InvalidDescriptor(msg));
        if self.section_id > MAX_SECTION_ID {
            return invalid(format!("section id {} exceeds 12 bits", self.section_id));
        }
        if self.symbol_count == 0 || self.symbol_end() as u32 > SYMBOLS_PER_SLOT {
            return invalid(format!(
                "symbols {}+{} outside the slot",
                self.symbol_start, self.symbol_count
            ));
        }
        if self.prb_count == 0 || self.prb_start as u32 + self.prb_count as u32 > carrier_prbs as u32 {
            return invalid(format!(
                "PRBs {}+{} outside the {}-PRB carrier",
                self.prb_start, self.prb_count, carrier_prbs
            ));
        }
        let full_carrier = self.prb_start == 0 && self.prb_count == carrier_prbs;
        if self.prb_count > u8::MAX as u16 && !full_carrier {
            return invalid(format!("{} PRBs do not fit one section", self.prb_count));
        }
        if self.re_mask > DEFAULT_RE_MASK || self.beam_id > 0x7FFF {
            return invalid("RE mask or beam id out of range".into());
        }
        if !(-(1 << 23)..(1 << 23)).contains(&self.freq_offset) {
            return invalid(format!("frequency offset {} exceeds 24 bits", self.freq_offset));
        }
        if (self.section_type == SectionType::Prach) != self.type3.is_some() {
            return invalid("type 3 parameters must come with a PRACH section".into());
        }
        validate_width(self.compression.method, self.compression.iq_width)?;
        for extension in &self.extensions {
            extension.validate()?;
        }
        let expected = self.iq_len();
        for (symbol, payload) in self.symbols.iter().enumerate() {
            if let Some(payload) = payload {
                if !self.covers_symbol(symbol as u8) || payload.len != expected {
                    return invalid(format!(
                        "symbol {} payload of {} bytes, expected {} within the section",
                        symbol, payload.len, expected
                    ));
                }
            }
        }
        Ok(())
    }
}
