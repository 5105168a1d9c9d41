//! TDD Slot Pattern
//! 
//! Per-symbol link direction of a repeating slot pattern. An empty pattern is FDD:
//! every symbol carries both directions.

use common::types::{Direction, SYMBOLS_PER_SLOT};

use crate::FronthaulError;

/// Symbol type within a TDD slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    Downlink,
    Uplink,
    Guard,
}

impl SymbolType {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'D' => Some(SymbolType::Downlink),
            'U' => Some(SymbolType::Uplink),
            'G' => Some(SymbolType::Guard),
            _ => None,
        }
    }
}

type SlotPattern = [SymbolType; SYMBOLS_PER_SLOT as usize];

/// Repeating per-slot pattern
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TddPattern {
    slots: Vec<SlotPattern>,
}

impl TddPattern {
    /// Parse one 14-character `D`/`U`/`G` string per slot
    pub fn parse(pattern: &[String]) -> Result<Self, FronthaulError> {
        let mut slots = Vec::with_capacity(pattern.len());
        for (index, text) in pattern.iter().enumerate() {
            let symbols: Vec<SymbolType> = text
                .chars()
                .map(SymbolType::from_char)
                .collect::<Option<_>>()
                .ok_or_else(|| {
                    FronthaulError::InvalidConfiguration(format!("TDD slot {} has an unknown symbol type", index))
                })?;
            let slot: SlotPattern = symbols.try_into().map_err(|_| {
                FronthaulError::InvalidConfiguration(format!("TDD slot {} is not 14 symbols long", index))
            })?;
            slots.push(slot);
        }
        Ok(Self { slots })
    }

    pub fn is_fdd(&self) -> bool {
        self.slots.is_empty()
    }

    /// Symbol type, `None` under FDD
    pub fn symbol_type(&self, abs_slot: u64, symbol: u8) -> Option<SymbolType> {
        if self.slots.is_empty() {
            return None;
        }
        let slot = &self.slots[(abs_slot % self.slots.len() as u64) as usize];
        slot.get(symbol as usize).copied()
    }

    /// Whether `direction` may use a symbol
    pub fn allows(&self, direction: Direction, abs_slot: u64, symbol: u8) -> bool {
        match (self.symbol_type(abs_slot, symbol), direction) {
            (None, _) => true,
            (Some(SymbolType::Downlink), Direction::Downlink) => true,
            (Some(SymbolType::Uplink), Direction::Uplink) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fdd_allows_everything() {
        let fdd = TddPattern::parse(&[]).unwrap();
        assert!(fdd.is_fdd());
        assert!(fdd.allows(Direction::Downlink, 7, 3));
        assert!(fdd.allows(Direction::Uplink, 7, 3));
    }

    #[test]
    fn test_pattern_repeats() {
        let pattern = TddPattern::parse(&[
            "DDDDDDDDDDDDDD".to_string(),
            "DDDDDDDDDDGGUU".to_string(),
            "UUUUUUUUUUUUUU".to_string(),
        ])
        .unwrap();
        assert!(pattern.allows(Direction::Downlink, 0, 13));
        assert!(!pattern.allows(Direction::Uplink, 0, 13));
        assert_eq!(pattern.symbol_type(1, 10), Some(SymbolType::Guard));
        assert!(!pattern.allows(Direction::Downlink, 1, 11));
        assert!(pattern.allows(Direction::Uplink, 1, 12));
        assert!(pattern.allows(Direction::Uplink, 5, 0));
        assert!(pattern.allows(Direction::Downlink, 6, 0));
    }

    #[test]
    fn test_rejects_bad_strings() {
        assert!(TddPattern::parse(&["DDDD".to_string()]).is_err());
        assert!(TddPattern::parse(&["DDDDDDDDDDDDDX".to_string()]).is_err());
    }
}
