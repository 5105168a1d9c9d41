//! Channel Layout
//! 
//! Maps (port, direction, carrier, antenna) keys onto dense indices shared by the
//! sequence engine, the section database and the scheduler state tables.

use common::types::{ChannelClass, ChannelKey, Direction};

use crate::config::FronthaulConfig;

/// Per-carrier dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarrierLayout {
    pub dl_prbs: u16,
    pub ul_prbs: u16,
    pub dl_antennas: u8,
    pub ul_antennas: u8,
}

/// Index space of every addressable flow
#[derive(Debug, Clone)]
pub struct ChannelLayout {
    ports: u8,
    carriers: Vec<CarrierLayout>,
    /// Antenna slots per carrier, wide enough for the PRACH and SRS offsets
    max_antennas: u8,
    prach_offset: Option<u8>,
    srs_offset: Option<u8>,
}

impl ChannelLayout {
    /// Build the layout from a validated configuration
    pub fn from_config(config: &FronthaulConfig) -> Self {
        let carriers = config
            .numerologies
            .iter()
            .flat_map(|n| {
                std::iter::repeat(CarrierLayout {
                    dl_prbs: n.dl_prbs,
                    ul_prbs: n.ul_prbs,
                    dl_antennas: n.dl_antennas,
                    ul_antennas: n.ul_antennas,
                })
                .take(n.carriers as usize)
            })
            .collect();
        Self {
            ports: config.ports,
            carriers,
            max_antennas: config.ru_ports_per_carrier().max(1),
            prach_offset: config.prach.enabled.then_some(config.prach.eaxc_offset),
            srs_offset: config.srs.enabled.then_some(config.srs.eaxc_offset),
        }
    }

    /// Layout with explicit carriers and no PRACH or SRS flows
    pub fn new(ports: u8, carriers: Vec<CarrierLayout>) -> Self {
        let max_antennas = carriers
            .iter()
            .map(|c| c.dl_antennas.max(c.ul_antennas))
            .max()
            .unwrap_or(1)
            .max(1);
        Self { ports, carriers, max_antennas, prach_offset: None, srs_offset: None }
    }

    fn per_direction(&self) -> usize {
        self.ports as usize * self.carriers.len() * self.max_antennas as usize
    }

    /// Total number of flow indices over both directions
    pub fn channel_count(&self) -> usize {
        2 * self.per_direction()
    }

    pub fn ports(&self) -> u8 {
        self.ports
    }

    pub fn carriers(&self) -> usize {
        self.carriers.len()
    }

    pub fn carrier(&self, carrier: u8) -> Option<&CarrierLayout> {
        self.carriers.get(carrier as usize)
    }

    /// PRBs of a carrier in one direction
    pub fn prbs(&self, direction: Direction, carrier: u8) -> Option<u16> {
        self.carrier(carrier).map(|c| match direction {
            Direction::Downlink => c.dl_prbs,
            Direction::Uplink => c.ul_prbs,
        })
    }

    /// Data antennas of a carrier in one direction
    pub fn antennas(&self, direction: Direction, carrier: u8) -> Option<u8> {
        self.carrier(carrier).map(|c| match direction {
            Direction::Downlink => c.dl_antennas,
            Direction::Uplink => c.ul_antennas,
        })
    }

    fn in_range(antenna: u8, offset: Option<u8>, count: u8) -> bool {
        offset.is_some_and(|o| antenna >= o && antenna < o.saturating_add(count))
    }

    /// Whether the key names a configured flow
    pub fn contains(&self, key: ChannelKey) -> bool {
        if key.port >= self.ports || key.antenna >= self.max_antennas {
            return false;
        }
        let Some(carrier) = self.carrier(key.carrier) else {
            return false;
        };
        match key.direction {
            Direction::Downlink => key.antenna < carrier.dl_antennas,
            Direction::Uplink => {
                key.antenna < carrier.ul_antennas
                    || Self::in_range(key.antenna, self.prach_offset, carrier.ul_antennas)
                    || Self::in_range(key.antenna, self.srs_offset, carrier.ul_antennas)
            }
        }
    }

    /// Dense index of a flow, `None` when the key is outside the layout
    pub fn channel_index(&self, key: ChannelKey) -> Option<usize> {
        if !self.contains(key) {
            return None;
        }
        let within = (key.port as usize * self.carriers.len() + key.carrier as usize)
            * self.max_antennas as usize
            + key.antenna as usize;
        Some(key.direction.index() * self.per_direction() + within)
    }

    /// Physical channel class carried by a flow
    pub fn channel_class(&self, key: ChannelKey) -> ChannelClass {
        match key.direction {
            Direction::Downlink => ChannelClass::Pdsch,
            Direction::Uplink => {
                let count = self.antennas(Direction::Uplink, key.carrier).unwrap_or(0);
                if Self::in_range(key.antenna, self.srs_offset, count) {
                    ChannelClass::Srs
                } else if Self::in_range(key.antenna, self.prach_offset, count) {
                    ChannelClass::Prach
                } else {
                    ChannelClass::Pusch
                }
            }
        }
    }

    /// Every configured flow of one direction, in index order
    pub fn channels(&self, direction: Direction) -> impl Iterator<Item = ChannelKey> + '_ {
        let carriers = self.carriers.len() as u8;
        (0..self.ports).flat_map(move |port| {
            (0..carriers).flat_map(move |carrier| {
                (0..self.max_antennas)
                    .map(move |antenna| ChannelKey::new(port, direction, carrier, antenna))
                    .filter(move |key| self.contains(*key))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> FronthaulConfig {
        FronthaulConfig::from_yaml_str(yaml).unwrap()
    }

    #[test]
    fn test_indices_unique() {
        let layout = ChannelLayout::from_config(&config(
            r#"
ports: 2
numerologies:
  - { numerology: 1, carriers: 2, dl_prbs: 273, ul_prbs: 273, dl_antennas: 4, ul_antennas: 2 }
prach: { enabled: true }
"#,
        ));
        let mut seen = std::collections::HashSet::new();
        for direction in Direction::ALL {
            for key in layout.channels(direction) {
                let index = layout.channel_index(key).unwrap();
                assert!(index < layout.channel_count());
                assert!(seen.insert(index));
            }
        }
        // 2 ports x 2 carriers x (4 DL + 2 PUSCH + 2 PRACH)
        assert_eq!(seen.len(), 2 * 2 * 8);
    }

    #[test]
    fn test_channel_class() {
        let layout = ChannelLayout::from_config(&config(
            r#"
numerologies:
  - { numerology: 1, dl_prbs: 106, ul_prbs: 106, dl_antennas: 2, ul_antennas: 2 }
prach: { enabled: true, eaxc_offset: 4 }
srs: { enabled: true, eaxc_offset: 8 }
"#,
        ));
        let ul = |antenna| ChannelKey::new(0, Direction::Uplink, 0, antenna);
        assert_eq!(layout.channel_class(ul(1)), ChannelClass::Pusch);
        assert_eq!(layout.channel_class(ul(5)), ChannelClass::Prach);
        assert_eq!(layout.channel_class(ul(9)), ChannelClass::Srs);
        assert!(!layout.contains(ul(3)));
        assert!(!layout.contains(ul(7)));
        assert_eq!(
            layout.channel_class(ChannelKey::new(0, Direction::Downlink, 0, 1)),
            ChannelClass::Pdsch
        );
    }

    #[test]
    fn test_out_of_layout() {
        let layout = ChannelLayout::new(
            1,
            vec![CarrierLayout { dl_prbs: 51, ul_prbs: 51, dl_antennas: 1, ul_antennas: 1 }],
        );
        assert!(layout.channel_index(ChannelKey::new(1, Direction::Downlink, 0, 0)).is_none());
        assert!(layout.channel_index(ChannelKey::new(0, Direction::Downlink, 1, 0)).is_none());
        assert_eq!(layout.channel_index(ChannelKey::new(0, Direction::Uplink, 0, 0)), Some(0));
        assert_eq!(layout.channel_index(ChannelKey::new(0, Direction::Downlink, 0, 0)), Some(1));
    }
}
