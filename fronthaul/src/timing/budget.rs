//! Timing Budgets
//! 
//! Microsecond advances from the configuration, pre-converted to symbol counts for
//! the configured numerology.

use common::types::{SubcarrierSpacing, SYMBOLS_PER_SLOT};

use crate::config::TimingConfig;

/// Convert a transmit advance to symbols, rounding past the boundary
pub fn us_to_symbols(us: u32, scs: SubcarrierSpacing) -> u64 {
    let symbol_ns = scs.slot_duration_ns() / SYMBOLS_PER_SLOT as u64;
    us as u64 * 1000 / symbol_ns + 1
}

/// Whole symbols fully contained in a reception delay
fn us_to_whole_symbols(us: u32, scs: SubcarrierSpacing) -> u64 {
    us as u64 * 1000 / scs.symbol_duration_ns().max(1)
}

/// Budgets in symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingBudget {
    /// DL C-plane advance
    pub cp_dl: u64,
    /// UL C-plane advance
    pub cp_ul: u64,
    /// DL U-plane advance
    pub up: u64,
    /// Start of the UL reception window after OTA
    pub ta4_min: u64,
    /// End of the UL reception window after OTA
    pub ta4_max: u64,
    /// RU UL U-plane emission delay after OTA
    pub ru_ul_delay: u64,
    /// Job preparation lead
    pub prepare_ahead: u64,
}

impl TimingBudget {
    pub fn from_config(timing: &TimingConfig, scs: SubcarrierSpacing) -> Self {
        Self {
            cp_dl: us_to_symbols(timing.t1a_max_cp_dl_us, scs),
            cp_ul: us_to_symbols(timing.t1a_max_cp_ul_us, scs),
            up: us_to_symbols(timing.t1a_max_up_us, scs),
            ta4_min: us_to_whole_symbols(timing.ta4_min_us, scs),
            ta4_max: us_to_whole_symbols(timing.ta4_max_us, scs),
            ru_ul_delay: us_to_whole_symbols(timing.ru_ul_delay_us, scs).max(1),
            prepare_ahead: timing.prepare_ahead_symbols as u64,
        }
    }

    /// Largest advance of any transmission
    pub fn max_advance(&self) -> u64 {
        self.cp_dl.max(self.cp_ul).max(self.up)
    }

    /// Slots between the current OTA slot and the slot the producer must build
    pub fn lead_slots(&self) -> u64 {
        let lead = self.max_advance() + self.prepare_ahead;
        lead.div_ceil(SYMBOLS_PER_SLOT as u64) + 1
    }

    /// Smallest section database ring depth that keeps build and transmit phases apart
    pub fn min_ring_depth(&self) -> usize {
        self.lead_slots() as usize + 2
    }

    /// Slots an uplink symbol can still be waited for after its OTA time
    pub fn rx_window_slots(&self) -> u64 {
        (self.ta4_max + self.ru_ul_delay).div_ceil(SYMBOLS_PER_SLOT as u64) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_us_to_symbols() {
        // 15 kHz: 71428 ns per symbol
        assert_eq!(us_to_symbols(285, SubcarrierSpacing::Scs15), 4);
        // 30 kHz: 35714 ns per symbol
        assert_eq!(us_to_symbols(285, SubcarrierSpacing::Scs30), 8);
        assert_eq!(us_to_symbols(0, SubcarrierSpacing::Scs30), 1);
        // 120 kHz: 8928 ns per symbol
        assert_eq!(us_to_symbols(429, SubcarrierSpacing::Scs120), 49);
    }

    #[test]
    fn test_budget() {
        let budget = TimingBudget::from_config(&TimingConfig::default(), SubcarrierSpacing::Scs30);
        assert_eq!(budget.cp_dl, 8);
        assert_eq!(budget.cp_ul, 13);
        assert_eq!(budget.up, 6);
        assert_eq!(budget.max_advance(), 13);
        assert_eq!(budget.lead_slots(), 2);
        assert_eq!(budget.min_ring_depth(), 4);
        assert_eq!(budget.ru_ul_delay, 1);
    }
}
