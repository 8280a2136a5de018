//! Routing metric containers carried in DIOs.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Type of the metric container an instance advertises.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum McType {
    /// No metric container, path costs are based on the advertised rank.
    #[default]
    None,
    /// Node energy, only the estimate is used.
    Energy,
    /// Expected transmission count.
    Etx,
    /// Received signal strength.
    Rssi,
    /// Movement factor, derived from the rate of change of the signal strength.
    Movement,
    /// Smoothed signal strength velocity.
    Ssv,
}

impl McType {
    /// The code of this type on the wire.
    pub const fn code(self) -> u8 {
        match self {
            McType::None => 0,
            McType::Energy => 2,
            McType::Etx => 7,
            McType::Rssi => 9,
            McType::Movement => 10,
            McType::Ssv => 11,
        }
    }
}

impl fmt::Display for McType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            McType::None => "none",
            McType::Energy => "energy",
            McType::Etx => "etx",
            McType::Rssi => "rssi",
            McType::Movement => "movement",
            McType::Ssv => "ssv",
        })
    }
}

/// Power source flag of the energy container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerSource {
    Mains,
    Battery,
}

/// A metric container, as advertised by a node or stored for a parent.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MetricContainer {
    #[default]
    None,
    Energy { source: PowerSource, estimate: u8 },
    Etx { etx: u16 },
    Rssi { rssi: u16 },
    Movement { hop_count: u8, mf: u16 },
    Ssv { hop_count: u8, ssv: u16 },
}

impl MetricContainer {
    /// Build a container of the given type for a node with the given path cost. `hop_count` is
    /// the hop count of the node itself, only used by the types which carry one.
    pub fn new(mc_type: McType, path_cost: u16, is_root: bool, hop_count: u8) -> Self {
        match mc_type {
            McType::None => MetricContainer::None,
            McType::Energy => MetricContainer::Energy {
                source: if is_root {
                    PowerSource::Mains
                } else {
                    PowerSource::Battery
                },
                estimate: (path_cost >> 8) as u8,
            },
            McType::Etx => MetricContainer::Etx { etx: path_cost },
            McType::Rssi => MetricContainer::Rssi { rssi: path_cost },
            McType::Movement => MetricContainer::Movement {
                hop_count,
                mf: path_cost,
            },
            McType::Ssv => MetricContainer::Ssv {
                hop_count,
                ssv: path_cost,
            },
        }
    }

    /// The type of this container.
    pub const fn mc_type(&self) -> McType {
        match self {
            MetricContainer::None => McType::None,
            MetricContainer::Energy { .. } => McType::Energy,
            MetricContainer::Etx { .. } => McType::Etx,
            MetricContainer::Rssi { .. } => McType::Rssi,
            MetricContainer::Movement { .. } => McType::Movement,
            MetricContainer::Ssv { .. } => McType::Ssv,
        }
    }

    /// The path cost advertised in this container, if it is of type `expected`.
    pub fn path_cost(&self, expected: McType) -> Option<u16> {
        if self.mc_type() != expected {
            return None;
        }
        match *self {
            MetricContainer::None => None,
            MetricContainer::Energy { estimate, .. } => Some((estimate as u16) << 8),
            MetricContainer::Etx { etx } => Some(etx),
            MetricContainer::Rssi { rssi } => Some(rssi),
            MetricContainer::Movement { mf, .. } => Some(mf),
            MetricContainer::Ssv { ssv, .. } => Some(ssv),
        }
    }

    /// Hop count of the advertising node, 0 if the container does not carry one.
    pub const fn hop_count(&self) -> u8 {
        match self {
            MetricContainer::Movement { hop_count, .. } | MetricContainer::Ssv { hop_count, .. } => {
                *hop_count
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{McType, MetricContainer, PowerSource};

    #[test]
    fn path_cost_requires_matching_type() {
        let mc = MetricContainer::Etx { etx: 300 };
        assert_eq!(mc.path_cost(McType::Etx), Some(300));
        assert_eq!(mc.path_cost(McType::Rssi), None);
        assert_eq!(MetricContainer::None.path_cost(McType::None), None);
    }

    #[test]
    fn energy_estimate_is_high_byte() {
        let mc = MetricContainer::new(McType::Energy, 0x1234, false, 0);
        assert_eq!(
            mc,
            MetricContainer::Energy {
                source: PowerSource::Battery,
                estimate: 0x12
            }
        );
        assert_eq!(mc.path_cost(McType::Energy), Some(0x1200));
    }

    #[test]
    fn hop_count_only_for_movement_types() {
        assert_eq!(MetricContainer::new(McType::Ssv, 10, false, 3).hop_count(), 3);
        assert_eq!(MetricContainer::new(McType::Etx, 10, false, 3).hop_count(), 0);
    }

    #[test]
    fn serializes_tagged() {
        let mc = MetricContainer::Movement { hop_count: 2, mf: 512 };
        let json = serde_json::to_string(&mc).unwrap();
        assert_eq!(json, r#"{"type":"movement","hop_count":2,"mf":512}"#);
    }
}
