//! Fronthaul Configuration
//! 
//! Serde structures for the engine configuration, loadable from YAML or TOML.
//! Every field has a default so a minimal file only names the numerologies.

use common::types::{ChannelClass, CompMethod, EaxcLayout, SubcarrierSpacing, MAX_PRBS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::scheduler::TddPattern;
use crate::timing::TimingBudget;
use crate::FronthaulError;

/// Which end of the fronthaul this engine plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Distributed unit: sends DL C/U-plane and UL C-plane, receives UL U-plane
    #[default]
    Du,
    /// Radio unit: receives C/U-plane, sends UL U-plane after its own OTA symbol
    Ru,
}

/// Reaction to a packet whose send symbol has already passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatePolicy {
    /// Abort the engine on the first late packet
    Strict,
    /// Count and drop
    #[default]
    Production,
}

/// Reaction to the clock falling more than two slots behind wall time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftPolicy {
    /// Count missed symbols and slots, keep running
    #[default]
    CountOnly,
    /// Stop the engine once a slot is missed
    Stop,
}

/// How the OTA clock waits for the next symbol boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitMode {
    /// Pure busy poll
    #[default]
    Spin,
    /// Busy poll with cooperative yields
    SpinYield,
    /// OS sleep; coarse, for non real-time harnesses only
    Sleep,
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FronthaulConfig {
    /// Role of this engine
    #[serde(default)]
    pub role: Role,
    /// Number of RU endpoints (ports)
    #[serde(default = "default_ports")]
    pub ports: u8,
    /// Largest eCPRI message the engine may emit, in bytes
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    /// Numerology list; carriers are numbered in list order
    pub numerologies: Vec<NumerologyConfig>,
    /// Compression per channel class
    #[serde(default)]
    pub compression: CompressionConfig,
    /// Timing budgets
    #[serde(default)]
    pub timing: TimingConfig,
    /// Section database sizing
    #[serde(default)]
    pub section_db: SectionDbConfig,
    /// Egress queue sizing
    #[serde(default)]
    pub egress: EgressConfig,
    /// eAxC sub-field widths
    #[serde(default)]
    pub eaxc: EaxcLayout,
    /// OTA clock settings
    #[serde(default)]
    pub clock: ClockConfig,
    /// Late transmission handling
    #[serde(default)]
    pub late_policy: LatePolicy,
    /// PRACH flow settings
    #[serde(default)]
    pub prach: PrachConfig,
    /// SRS flow settings
    #[serde(default)]
    pub srs: SrsConfig,
    /// TDD pattern, one 14-character string of `D`, `U`, `G` per slot; empty for FDD
    #[serde(default)]
    pub tdd_pattern: Vec<String>,
    /// Codec worker threads; 0 encodes inline on the real-time thread
    #[serde(default)]
    pub workers: usize,
    /// eCPRI one-way delay measurement
    #[serde(default)]
    pub delay_measurement: DelayMeasurementConfig,
}

fn default_ports() -> u8 {
    1
}

fn default_mtu() -> usize {
    1500
}

/// One numerology entry and the carriers that use it
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NumerologyConfig {
    /// Numerology index µ (0..=3)
    pub numerology: u8,
    /// Number of component carriers with this configuration
    #[serde(default = "default_carriers")]
    pub carriers: u8,
    /// Downlink PRBs per carrier
    pub dl_prbs: u16,
    /// Uplink PRBs per carrier
    pub ul_prbs: u16,
    /// Downlink antennas (eAxC) per carrier
    #[serde(default = "default_antennas")]
    pub dl_antennas: u8,
    /// Uplink antennas (eAxC) per carrier
    #[serde(default = "default_antennas")]
    pub ul_antennas: u8,
}

fn default_carriers() -> u8 {
    1
}

fn default_antennas() -> u8 {
    1
}

/// Compression method and IQ width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct CompressionSetting {
    /// Method
    #[serde(default)]
    pub method: CompMethod,
    /// Bits per I or Q component
    #[serde(default = "default_iq_width")]
    pub iq_width: u8,
    /// Constellation unit for modulation compression
    #[serde(default = "default_mod_comp_scaler")]
    pub mod_comp_scaler: u16,
}

fn default_iq_width() -> u8 {
    16
}

fn default_mod_comp_scaler() -> u16 {
    0x2000
}

impl Default for CompressionSetting {
    fn default() -> Self {
        Self {
            method: CompMethod::None,
            iq_width: default_iq_width(),
            mod_comp_scaler: default_mod_comp_scaler(),
        }
    }
}

/// Compression per channel class
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CompressionConfig {
    #[serde(default)]
    pub pdsch: CompressionSetting,
    #[serde(default)]
    pub pusch: CompressionSetting,
    #[serde(default)]
    pub prach: CompressionSetting,
    #[serde(default)]
    pub srs: CompressionSetting,
    #[serde(default)]
    pub csi_rs: CompressionSetting,
}

impl CompressionConfig {
    /// Setting negotiated for a channel class
    pub fn for_class(&self, class: ChannelClass) -> CompressionSetting {
        match class {
            ChannelClass::Pdsch => self.pdsch,
            ChannelClass::Pusch => self.pusch,
            ChannelClass::Prach => self.prach,
            ChannelClass::Srs => self.srs,
            ChannelClass::CsiRs => self.csi_rs,
        }
    }
}

/// Timing budgets in microseconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingConfig {
    /// Advance of DL C-plane before its OTA symbol
    #[serde(default = "default_t1a_max_cp_dl")]
    pub t1a_max_cp_dl_us: u32,
    /// Advance of UL C-plane before its OTA symbol
    #[serde(default = "default_t1a_max_cp_ul")]
    pub t1a_max_cp_ul_us: u32,
    /// Advance of DL U-plane before its OTA symbol
    #[serde(default = "default_t1a_max_up")]
    pub t1a_max_up_us: u32,
    /// Earliest UL U-plane arrival after OTA
    #[serde(default)]
    pub ta4_min_us: u32,
    /// Latest UL U-plane arrival after OTA
    #[serde(default = "default_ta4_max")]
    pub ta4_max_us: u32,
    /// Delay after OTA at which an RU emits UL U-plane
    #[serde(default = "default_ru_ul_delay")]
    pub ru_ul_delay_us: u32,
    /// Symbols between job creation and its send symbol
    #[serde(default = "default_prepare_ahead")]
    pub prepare_ahead_symbols: u32,
}

fn default_t1a_max_cp_dl() -> u32 {
    285
}

fn default_t1a_max_cp_ul() -> u32 {
    429
}

fn default_t1a_max_up() -> u32 {
    196
}

fn default_ta4_max() -> u32 {
    500
}

fn default_ru_ul_delay() -> u32 {
    50
}

fn default_prepare_ahead() -> u32 {
    1
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            t1a_max_cp_dl_us: default_t1a_max_cp_dl(),
            t1a_max_cp_ul_us: default_t1a_max_cp_ul(),
            t1a_max_up_us: default_t1a_max_up(),
            ta4_min_us: 0,
            ta4_max_us: default_ta4_max(),
            ru_ul_delay_us: default_ru_ul_delay(),
            prepare_ahead_symbols: default_prepare_ahead(),
        }
    }
}

/// Section database sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SectionDbConfig {
    /// Context slots per channel (ring depth N)
    #[serde(default = "default_ring_depth")]
    pub ring_depth: usize,
    /// Descriptors per context (K)
    #[serde(default = "default_max_sections")]
    pub max_sections: usize,
}

fn default_ring_depth() -> usize {
    8
}

fn default_max_sections() -> usize {
    64
}

impl Default for SectionDbConfig {
    fn default() -> Self {
        Self {
            ring_depth: default_ring_depth(),
            max_sections: default_max_sections(),
        }
    }
}

/// Egress and worker queue sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EgressConfig {
    /// Packets per (slot, symbol) egress queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Jobs per worker queue
    #[serde(default = "default_worker_queue")]
    pub worker_queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    512
}

fn default_worker_queue() -> usize {
    1024
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            worker_queue_capacity: default_worker_queue(),
        }
    }
}

/// OTA clock configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClockConfig {
    /// Seconds subtracted from wall time before frame numbering (epoch and leap seconds)
    #[serde(default)]
    pub offset_sec: i64,
    /// Nanoseconds subtracted from wall time before frame numbering
    #[serde(default)]
    pub offset_nsec: i64,
    /// Missed-slot reaction
    #[serde(default)]
    pub drift_policy: DriftPolicy,
    /// Wait strategy of the real-time thread
    #[serde(default)]
    pub wait_mode: WaitMode,
}

impl ClockConfig {
    /// Total offset in nanoseconds
    pub fn offset_ns(&self) -> i64 {
        self.offset_sec
            .saturating_mul(1_000_000_000)
            .saturating_add(self.offset_nsec)
    }
}

/// PRACH flow configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrachConfig {
    /// Whether PRACH flows exist
    #[serde(default)]
    pub enabled: bool,
    /// RU port offset of PRACH eAxCs
    #[serde(default = "default_prach_offset")]
    pub eaxc_offset: u8,
    /// Filter index carried in the radio application header
    #[serde(default = "default_prach_filter")]
    pub filter_index: u8,
}

fn default_prach_offset() -> u8 {
    4
}

fn default_prach_filter() -> u8 {
    1
}

impl Default for PrachConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            eaxc_offset: default_prach_offset(),
            filter_index: default_prach_filter(),
        }
    }
}

/// SRS flow configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SrsConfig {
    /// Whether SRS flows exist
    #[serde(default)]
    pub enabled: bool,
    /// RU port offset of SRS eAxCs
    #[serde(default = "default_srs_offset")]
    pub eaxc_offset: u8,
    /// Symbols of an uplink slot carrying SRS (bit n = symbol n)
    #[serde(default = "default_srs_mask")]
    pub symbol_mask: u16,
}

fn default_srs_offset() -> u8 {
    8
}

fn default_srs_mask() -> u16 {
    1 << 13
}

impl Default for SrsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            eaxc_offset: default_srs_offset(),
            symbol_mask: default_srs_mask(),
        }
    }
}

/// Exchange used to measure the one-way delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementMethod {
    /// Request answered by a response
    #[default]
    Request,
    /// Request whose timestamp travels in a follow-up
    RequestWithFollowUp,
    /// Ask the peer to send a request
    RemoteRequest,
    /// Ask the peer to send a request with follow-up
    RemoteRequestWithFollowUp,
}

/// One-way delay measurement settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DelayMeasurementConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Whether this end opens each exchange
    #[serde(default)]
    pub initiator: bool,
    #[serde(default)]
    pub method: MeasurementMethod,
    /// Delay samples to collect; the first two are left out of the average
    #[serde(default = "default_delay_samples")]
    pub samples: u16,
    /// Zero bytes after the fixed payload fields
    #[serde(default = "default_delay_padding")]
    pub padding: usize,
    /// Measurement id of the first exchange
    #[serde(default)]
    pub first_measurement_id: u8,
}

fn default_delay_samples() -> u16 {
    20
}

fn default_delay_padding() -> usize {
    crate::codec::delay::MIN_DELAY_PADDING
}

impl Default for DelayMeasurementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initiator: false,
            method: MeasurementMethod::default(),
            samples: default_delay_samples(),
            padding: default_delay_padding(),
            first_measurement_id: 0,
        }
    }
}

impl FronthaulConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml_str(&contents)?;
        info!("Loaded fronthaul configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        let config: FronthaulConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: FronthaulConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load YAML or TOML, chosen by file extension
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => {
                let contents = std::fs::read_to_string(path)?;
                Self::from_toml_str(&contents)
            }
            _ => Self::from_yaml_file(path),
        }
    }

    /// Subcarrier spacing shared by every configured carrier
    pub fn subcarrier_spacing(&self) -> Result<SubcarrierSpacing, FronthaulError> {
        let first = self
            .numerologies
            .first()
            .ok_or_else(|| FronthaulError::InvalidConfiguration("no numerology configured".into()))?;
        SubcarrierSpacing::from_numerology(first.numerology).ok_or_else(|| {
            FronthaulError::InvalidConfiguration(format!("unsupported numerology {}", first.numerology))
        })
    }

    /// Highest RU port index any flow uses, plus one
    pub fn ru_ports_per_carrier(&self) -> u8 {
        let antennas = self
            .numerologies
            .iter()
            .map(|n| n.dl_antennas.max(n.ul_antennas))
            .max()
            .unwrap_or(1);
        let ul = self.numerologies.iter().map(|n| n.ul_antennas).max().unwrap_or(1);
        let mut ports = antennas;
        if self.prach.enabled {
            ports = ports.max(self.prach.eaxc_offset.saturating_add(ul));
        }
        if self.srs.enabled {
            ports = ports.max(self.srs.eaxc_offset.saturating_add(ul));
        }
        ports
    }

    /// Check every cross-field rule
    pub fn validate(&self) -> Result<(), FronthaulError> {
        let invalid = |msg: String| Err(FronthaulError::InvalidConfiguration(msg));

        let scs = self.subcarrier_spacing()?;
        for entry in &self.numerologies {
            if entry.numerology != scs.numerology() {
                return invalid(format!(
                    "mixed numerologies {} and {} in one engine",
                    scs.numerology(),
                    entry.numerology
                ));
            }
            if entry.carriers == 0 {
                return invalid("numerology entry without carriers".into());
            }
            for prbs in [entry.dl_prbs, entry.ul_prbs] {
                if prbs == 0 || prbs > MAX_PRBS {
                    return invalid(format!("PRB count {} outside 1..={}", prbs, MAX_PRBS));
                }
            }
            if entry.dl_antennas == 0 || entry.ul_antennas == 0 {
                return invalid("carrier without antennas".into());
            }
        }
        let carriers: u32 = self.numerologies.iter().map(|n| n.carriers as u32).sum();
        if carriers > (1u32 << self.eaxc.carrier_bits) {
            return invalid(format!("{} carriers do not fit the eAxC CC field", carriers));
        }
        if self.ports == 0 {
            return invalid("at least one port is required".into());
        }
        if !self.eaxc.is_valid() {
            return invalid("eAxC field widths exceed 16 bits".into());
        }
        if (self.ru_ports_per_carrier() as u32) > (1u32 << self.eaxc.ru_port_bits) {
            return invalid("antenna, PRACH or SRS ports do not fit the eAxC RU port field".into());
        }
        if !(256..=9600).contains(&self.mtu) {
            return invalid(format!("MTU {} outside 256..=9600", self.mtu));
        }
        for (name, setting) in [
            ("pdsch", self.compression.pdsch),
            ("pusch", self.compression.pusch),
            ("prach", self.compression.prach),
            ("srs", self.compression.srs),
            ("csi_rs", self.compression.csi_rs),
        ] {
            crate::codec::compression::validate_width(setting.method, setting.iq_width).map_err(|e| {
                FronthaulError::InvalidConfiguration(format!("{} compression: {}", name, e))
            })?;
        }
        // CSI-RS shares the PDSCH flows, so the compression header presence must agree.
        if (self.compression.csi_rs.method == CompMethod::None) != (self.compression.pdsch.method == CompMethod::None) {
            return invalid("csi_rs and pdsch must both use or both skip compression".into());
        }
        if self.section_db.ring_depth < 2 {
            return invalid("section database ring depth must be at least 2".into());
        }
        let budget = TimingBudget::from_config(&self.timing, scs);
        if self.section_db.ring_depth < budget.min_ring_depth() {
            return invalid(format!(
                "ring depth {} too shallow for a {}-slot lead, need {}",
                self.section_db.ring_depth,
                budget.lead_slots(),
                budget.min_ring_depth()
            ));
        }
        if self.section_db.max_sections == 0 {
            return invalid("section database needs room for at least one section".into());
        }
        if self.egress.queue_capacity == 0 || self.egress.worker_queue_capacity == 0 {
            return invalid("queue capacities must be non-zero".into());
        }
        if self.timing.ta4_min_us > self.timing.ta4_max_us {
            return invalid("ta4_min_us exceeds ta4_max_us".into());
        }
        if self.timing.prepare_ahead_symbols == 0 {
            return invalid("prepare_ahead_symbols must be at least 1".into());
        }
        TddPattern::parse(&self.tdd_pattern)?;
        let delay = &self.delay_measurement;
        if delay.enabled {
            use crate::codec::delay::{MAX_DELAY_PADDING, MIN_DELAY_PADDING};
            if delay.samples < 3 {
                return invalid("delay measurement needs at least 3 samples".into());
            }
            if !(MIN_DELAY_PADDING..=MAX_DELAY_PADDING).contains(&delay.padding) {
                return invalid(format!(
                    "delay measurement padding {} outside {}..={}",
                    delay.padding, MIN_DELAY_PADDING, MAX_DELAY_PADDING
                ));
            }
        }

        debug!(
            "Configuration valid: µ{}, {} carriers, MTU {}",
            scs.numerology(),
            carriers,
            self.mtu
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
role: du
mtu: 9600
numerologies:
  - numerology: 1
    carriers: 2
    dl_prbs: 273
    ul_prbs: 273
    dl_antennas: 4
    ul_antennas: 2
compression:
  pdsch: { method: bfp, iq_width: 9 }
  pusch: { method: block_floating_point, iq_width: 9 }
timing:
  t1a_max_cp_dl_us: 258
prach:
  enabled: true
tdd_pattern:
  - DDDDDDDDDDDDDD
  - DDDDDDGGGGUUUU
"#;

    #[test]
    fn test_parse_yaml() {
        let config = FronthaulConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.role, Role::Du);
        assert_eq!(config.mtu, 9600);
        assert_eq!(config.subcarrier_spacing().unwrap(), SubcarrierSpacing::Scs30);
        assert_eq!(config.compression.pdsch.method, CompMethod::BlockFloatingPoint);
        assert_eq!(config.compression.pdsch.iq_width, 9);
        assert_eq!(config.compression.srs.method, CompMethod::None);
        assert_eq!(config.timing.t1a_max_cp_dl_us, 258);
        assert_eq!(config.timing.t1a_max_up_us, 196);
        assert_eq!(config.section_db.ring_depth, 8);
        assert_eq!(config.late_policy, LatePolicy::Production);
        // 4 DL antennas, PRACH at offset 4 with 2 UL antennas
        assert_eq!(config.ru_ports_per_carrier(), 6);
    }

    #[test]
    fn test_parse_toml() {
        let config = FronthaulConfig::from_toml_str(
            r#"
mtu = 1500
late_policy = "strict"

[[numerologies]]
numerology = 0
dl_prbs = 106
ul_prbs = 106
"#,
        )
        .unwrap();
        assert_eq!(config.late_policy, LatePolicy::Strict);
        assert_eq!(config.numerologies[0].dl_antennas, 1);
    }

    #[test]
    fn test_reject_mixed_numerology() {
        let yaml = r#"
numerologies:
  - { numerology: 0, dl_prbs: 52, ul_prbs: 52 }
  - { numerology: 1, dl_prbs: 51, ul_prbs: 51 }
"#;
        assert!(FronthaulConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_reject_bad_values() {
        let base = r#"
numerologies:
  - { numerology: 1, dl_prbs: 273, ul_prbs: 273 }
"#;
        let mut config: FronthaulConfig = serde_yaml::from_str(base).unwrap();
        assert!(config.validate().is_ok());

        config.section_db.ring_depth = 1;
        assert!(config.validate().is_err());
        config.section_db.ring_depth = 3;
        assert!(config.validate().is_err());
        config.section_db.ring_depth = 4;

        config.compression.pusch = CompressionSetting { method: CompMethod::Modulation, iq_width: 9, mod_comp_scaler: 1 };
        assert!(config.validate().is_err());
        config.compression.pusch = CompressionSetting::default();

        config.tdd_pattern = vec!["DDDX".into()];
        assert!(config.validate().is_err());
        config.tdd_pattern.clear();

        config.numerologies[0].dl_prbs = 300;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delay_measurement_settings() {
        let base = r#"
numerologies:
  - { numerology: 1, dl_prbs: 273, ul_prbs: 273 }
delay_measurement:
  enabled: true
  initiator: true
  method: remote_request_with_follow_up
"#;
        let mut config: FronthaulConfig = serde_yaml::from_str(base).unwrap();
        let delay = &config.delay_measurement;
        assert_eq!(delay.method, MeasurementMethod::RemoteRequestWithFollowUp);
        assert_eq!(delay.samples, 20);
        assert_eq!(delay.padding, 40);
        assert!(config.validate().is_ok());

        config.delay_measurement.samples = 2;
        assert!(config.validate().is_err());
        config.delay_measurement.samples = 3;
        config.delay_measurement.padding = 39;
        assert!(config.validate().is_err());
        config.delay_measurement.padding = 1401;
        assert!(config.validate().is_err());

        // Bounds only apply while enabled
        config.delay_measurement.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_clock_offset() {
        let clock = ClockConfig { offset_sec: 18, offset_nsec: -5, ..Default::default() };
        assert_eq!(clock.offset_ns(), 17_999_999_995);
    }
}
