//! Parsed control messages consumed and produced by the engine. Encoding them on the wire is up
//! to the host.

use std::{net::Ipv6Addr, time::Duration};

use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};

use crate::{lollipop::Lollipop, metric_container::MetricContainer, of::Ocp, rank::Rank};

/// Mode of operation of an instance.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mop {
    /// No downward routes are maintained.
    NoDownwardRoutes,
    /// Only the root keeps downward routes.
    NonStoring,
    /// Every node keeps downward routes, multicast is not supported.
    #[default]
    Storing,
    /// Every node keeps downward routes, including multicast ones.
    StoringMulticast,
}

impl Mop {
    /// Parse the wire value of a mode of operation.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Mop::NoDownwardRoutes),
            1 => Some(Mop::NonStoring),
            2 => Some(Mop::Storing),
            3 => Some(Mop::StoringMulticast),
            _ => None,
        }
    }

    /// The wire value of this mode of operation.
    pub const fn code(self) -> u8 {
        match self {
            Mop::NoDownwardRoutes => 0,
            Mop::NonStoring => 1,
            Mop::Storing => 2,
            Mop::StoringMulticast => 3,
        }
    }

    /// Checks if intermediate nodes keep downward routes in this mode.
    pub const fn is_storing(self) -> bool {
        matches!(self, Mop::Storing | Mop::StoringMulticast)
    }
}

/// Prefix announced in a DIO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixInfo {
    pub prefix: Ipv6Net,
    /// Nodes autoconfigure an address from the prefix.
    pub autonomous: bool,
    /// Valid lifetime in seconds, `u32::MAX` is infinite.
    pub lifetime: u32,
}

impl PrefixInfo {
    /// Checks if `other` announces the same prefix with the same flags.
    pub fn same_as(&self, other: &PrefixInfo) -> bool {
        self.prefix.trunc() == other.prefix.trunc() && self.autonomous == other.autonomous
    }
}

/// The signal strength at which the sender of a DIO received the last packet from us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSignal {
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Time elapsed between the measurement and the transmission of the DIO.
    pub age: Duration,
}

/// A DODAG Information Object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DioMessage {
    pub instance_id: u8,
    pub dag_id: Ipv6Addr,
    pub version: Lollipop,
    pub rank: Rank,
    pub grounded: bool,
    /// Raw mode of operation, see [`Mop`].
    pub mop: u8,
    pub preference: u8,
    pub dtsn: Lollipop,
    pub ocp: Ocp,
    pub interval_min: u8,
    pub interval_doublings: u8,
    pub redundancy: u8,
    pub max_rank_increase: u16,
    pub min_hop_rank_increase: u16,
    pub default_lifetime: u8,
    pub lifetime_unit: u16,
    pub mc: MetricContainer,
    pub prefix: Option<PrefixInfo>,
    pub remote_signal: Option<RemoteSignal>,
}

/// A Destination Advertisement Object, sent to the preferred parent to register a downward
/// route to this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaoMessage {
    pub instance_id: u8,
    pub dag_id: Ipv6Addr,
    pub sequence: Lollipop,
    /// Route lifetime in lifetime units, 0 withdraws the route.
    pub lifetime: u8,
}

/// Status carried by a DAO acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DaoAckStatus {
    /// The registration was accepted.
    Accept,
    /// The parent could not accept the registration, with the raw reject code.
    UnableToAccept(u8),
    /// The root could not install the route.
    UnableToAddRouteAtRoot,
    /// No acknowledgement arrived in time.
    Timeout,
}

/// Message used to probe a neighbor's link.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe {
    Dio(DioMessage),
    Dis,
}

/// Which message is used for probing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeKind {
    #[default]
    Dio,
    Dis,
}

#[cfg(test)]
mod tests {
    use ipnet::Ipv6Net;

    use super::{Mop, PrefixInfo};

    #[test]
    fn mop_codes() {
        for code in 0..4 {
            assert_eq!(Mop::from_code(code).map(Mop::code), Some(code));
        }
        assert_eq!(Mop::from_code(7), None);
        assert!(Mop::Storing.is_storing());
        assert!(!Mop::NonStoring.is_storing());
    }

    #[test]
    fn prefix_comparison_ignores_host_bits() {
        let a = PrefixInfo {
            prefix: "fd00::1/64".parse::<Ipv6Net>().unwrap(),
            autonomous: true,
            lifetime: u32::MAX,
        };
        let b = PrefixInfo {
            prefix: "fd00::2/64".parse::<Ipv6Net>().unwrap(),
            ..a
        };
        assert!(a.same_as(&b));
        assert!(!a.same_as(&PrefixInfo {
            autonomous: false,
            ..a
        }));
    }
}
