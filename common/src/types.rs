//! Common Types for the Fronthaul Stack
//! 
//! Defines fundamental radio and transport types shared by the fronthaul core,
//! the collaborator interfaces and the sample application

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

/// Subcarriers in one physical resource block
pub const SUBCARRIERS_PER_PRB: usize = 12;
/// OFDM symbols per slot (normal cyclic prefix)
pub const SYMBOLS_PER_SLOT: u32 = 14;
/// Subframes per 10 ms radio frame
pub const SUBFRAMES_PER_FRAME: u32 = 10;
/// Radio frames per second
pub const FRAMES_PER_SECOND: u32 = 100;
/// System frame number period
pub const SFN_PERIOD: u32 = 1024;
/// Largest PRB count any carrier can carry
pub const MAX_PRBS: u16 = 273;

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz (µ = 0)
    Scs15 = 15,
    /// 30 kHz (µ = 1)
    Scs30 = 30,
    /// 60 kHz (µ = 2)
    Scs60 = 60,
    /// 120 kHz (µ = 3)
    Scs120 = 120,
}

impl SubcarrierSpacing {
    /// Map a numerology index to its subcarrier spacing
    pub fn from_numerology(mu: u8) -> Option<Self> {
        match mu {
            0 => Some(Self::Scs15),
            1 => Some(Self::Scs30),
            2 => Some(Self::Scs60),
            3 => Some(Self::Scs120),
            _ => None,
        }
    }

    /// Numerology index µ
    pub fn numerology(&self) -> u8 {
        match self {
            Self::Scs15 => 0,
            Self::Scs30 => 1,
            Self::Scs60 => 2,
            Self::Scs120 => 3,
        }
    }

    /// Slots in one 1 ms subframe
    pub fn slots_per_subframe(&self) -> u32 {
        1 << self.numerology()
    }

    /// Slots in one 10 ms frame
    pub fn slots_per_frame(&self) -> u32 {
        self.slots_per_subframe() * SUBFRAMES_PER_FRAME
    }

    /// Slots in one second
    pub fn slots_per_second(&self) -> u32 {
        self.slots_per_frame() * FRAMES_PER_SECOND
    }

    /// Symbols in one second, the OTA symbol index period
    pub fn symbols_per_second(&self) -> u32 {
        self.slots_per_second() * SYMBOLS_PER_SLOT
    }

    /// Slot duration in nanoseconds
    pub fn slot_duration_ns(&self) -> u64 {
        1_000_000 >> self.numerology()
    }

    /// Nominal symbol duration in nanoseconds, rounded down
    pub fn symbol_duration_ns(&self) -> u64 {
        1_000_000_000 / self.symbols_per_second() as u64
    }
}

/// Transfer direction on the fronthaul, encoded in the radio application header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// RU towards DU
    Uplink = 0,
    /// DU towards RU
    Downlink = 1,
}

impl Direction {
    /// Both directions, uplink first (wire order)
    pub const ALL: [Direction; 2] = [Direction::Uplink, Direction::Downlink];

    /// Table index of this direction
    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Message plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plane {
    /// Real-time control messages
    Control,
    /// IQ data messages
    User,
}

impl Plane {
    /// Both planes
    pub const ALL: [Plane; 2] = [Plane::Control, Plane::User];

    /// Table index of this plane
    pub fn index(&self) -> usize {
        match self {
            Plane::Control => 0,
            Plane::User => 1,
        }
    }
}

/// Physical channel class a flow belongs to, used to select compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelClass {
    /// Downlink shared channel
    Pdsch,
    /// Uplink shared channel
    Pusch,
    /// Random access channel
    Prach,
    /// Sounding reference signal
    Srs,
    /// Channel state information reference signal
    CsiRs,
}

/// IQ compression method, as carried in `udCompMeth`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompMethod {
    /// Plain 2's complement samples
    #[default]
    None = 0,
    /// Block floating point, one exponent per PRB
    #[serde(alias = "bfp")]
    BlockFloatingPoint = 1,
    /// Block scaling, one scaler per PRB
    BlockScaling = 2,
    /// µ-law companding, one shift parameter per PRB
    MuLaw = 3,
    /// Modulation compression, constellation codes without per-PRB parameters
    Modulation = 4,
}

impl CompMethod {
    /// Whether the method prefixes every PRB with a parameter byte
    pub fn has_prb_param(&self) -> bool {
        matches!(
            self,
            CompMethod::BlockFloatingPoint | CompMethod::BlockScaling | CompMethod::MuLaw
        )
    }
}

/// Addressable flow inside the engine: one endpoint port, direction, carrier and antenna
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    /// Endpoint (RU) port
    pub port: u8,
    /// Direction
    pub direction: Direction,
    /// Component carrier
    pub carrier: u8,
    /// Antenna / eAxC index within the carrier
    pub antenna: u8,
}

impl ChannelKey {
    /// Create a new channel key
    pub fn new(port: u8, direction: Direction, carrier: u8, antenna: u8) -> Self {
        Self { port, direction, carrier, antenna }
    }
}

/// Sub-fields of an eAxC identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EaxcFields {
    /// DU port
    pub cu_port: u8,
    /// Band sector
    pub band_sector: u8,
    /// Component carrier
    pub carrier: u8,
    /// RU port (antenna)
    pub ru_port: u8,
}

/// Bit widths of the eAxC sub-fields, fixed for the life of a session
///
/// Fields are packed most significant first: CU port, band sector, CC, RU port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EaxcLayout {
    /// Width of the CU port field
    pub cu_port_bits: u8,
    /// Width of the band sector field
    pub band_sector_bits: u8,
    /// Width of the component carrier field
    pub carrier_bits: u8,
    /// Width of the RU port field
    pub ru_port_bits: u8,
}

impl Default for EaxcLayout {
    fn default() -> Self {
        Self {
            cu_port_bits: 4,
            band_sector_bits: 4,
            carrier_bits: 4,
            ru_port_bits: 4,
        }
    }
}

impl EaxcLayout {
    /// Whether the layout fits into the 16-bit eAxC id
    pub fn is_valid(&self) -> bool {
        let total = self.cu_port_bits as u32
            + self.band_sector_bits as u32
            + self.carrier_bits as u32
            + self.ru_port_bits as u32;
        total <= 16 && self.ru_port_bits > 0
    }

    fn mask(bits: u8) -> u16 {
        if bits >= 16 {
            u16::MAX
        } else {
            (1u16 << bits) - 1
        }
    }

    fn shifts(&self) -> (u32, u32, u32) {
        let cc = self.ru_port_bits as u32;
        let band = cc + self.carrier_bits as u32;
        let cu = band + self.band_sector_bits as u32;
        (cu, band, cc)
    }

    /// Build the wire identifier; sub-fields wider than their slot are masked
    pub fn compose(&self, fields: EaxcFields) -> u16 {
        let (cu_shift, band_shift, cc_shift) = self.shifts();
        let cu = (fields.cu_port as u16 & Self::mask(self.cu_port_bits)) as u32;
        let band = (fields.band_sector as u16 & Self::mask(self.band_sector_bits)) as u32;
        let cc = (fields.carrier as u16 & Self::mask(self.carrier_bits)) as u32;
        let ru = (fields.ru_port as u16 & Self::mask(self.ru_port_bits)) as u32;
        ((cu << cu_shift) | (band << band_shift) | (cc << cc_shift) | ru) as u16
    }

    /// Split a wire identifier into its sub-fields
    pub fn decompose(&self, eaxc: u16) -> EaxcFields {
        let (cu_shift, band_shift, cc_shift) = self.shifts();
        let value = eaxc as u32;
        EaxcFields {
            cu_port: ((value >> cu_shift) as u16 & Self::mask(self.cu_port_bits)) as u8,
            band_sector: ((value >> band_shift) as u16 & Self::mask(self.band_sector_bits)) as u8,
            carrier: ((value >> cc_shift) as u16 & Self::mask(self.carrier_bits)) as u8,
            ru_port: (value as u16 & Self::mask(self.ru_port_bits)) as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numerology_timing() {
        let scs = SubcarrierSpacing::from_numerology(1).unwrap();
        assert_eq!(scs, SubcarrierSpacing::Scs30);
        assert_eq!(scs.slots_per_subframe(), 2);
        assert_eq!(scs.slots_per_second(), 2000);
        assert_eq!(scs.symbols_per_second(), 28_000);
        assert_eq!(scs.slot_duration_ns(), 500_000);
        assert_eq!(SubcarrierSpacing::Scs15.symbol_duration_ns(), 71_428);
        assert_eq!(SubcarrierSpacing::Scs120.symbol_duration_ns(), 8_928);
        assert!(SubcarrierSpacing::from_numerology(4).is_none());
    }

    #[test]
    fn test_eaxc_compose_decompose() {
        let layout = EaxcLayout::default();
        let fields = EaxcFields { cu_port: 0, band_sector: 1, carrier: 2, ru_port: 3 };
        let id = layout.compose(fields);
        assert_eq!(id, 0x0123);
        assert_eq!(layout.decompose(id), fields);

        let narrow = EaxcLayout { cu_port_bits: 2, band_sector_bits: 6, carrier_bits: 3, ru_port_bits: 5 };
        assert!(narrow.is_valid());
        let fields = EaxcFields { cu_port: 1, band_sector: 17, carrier: 5, ru_port: 30 };
        assert_eq!(narrow.decompose(narrow.compose(fields)), fields);
    }

    #[test]
    fn test_eaxc_layout_validation() {
        let too_wide = EaxcLayout { cu_port_bits: 8, band_sector_bits: 4, carrier_bits: 4, ru_port_bits: 4 };
        assert!(!too_wide.is_valid());
    }

    #[test]
    fn test_comp_method_params() {
        assert!(CompMethod::BlockFloatingPoint.has_prb_param());
        assert!(!CompMethod::None.has_prb_param());
        assert!(!CompMethod::Modulation.has_prb_param());
    }
}
