//! Tunables of the routing engine. Every field has a default, so a partial configuration file only
//! needs to name what it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    link_stats::RssiSmoothing,
    message::{Mop, ProbeKind},
    metric_container::McType,
    of::{
        etx::EtxConfig, hysteresis::HysteresisConfig, movement::MovementConfig, rssi::RssiConfig,
        Ocp, MRHOF,
    },
};

/// Default instance id used when becoming root.
pub const DEFAULT_INSTANCE: u8 = 0x1e;
/// Lifetime value which never expires.
pub const INFINITE_LIFETIME: u8 = 0xff;

/// How this node participates in the network.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeMode {
    /// Full router.
    #[default]
    Mesh,
    /// Never triggers a DIO timer reset.
    Leaf,
    /// Never registers downward routes.
    Feather,
}

/// How the periodic probing picks its target.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbingPolicy {
    /// Probe the preferred parent when it is not fresh, otherwise either the best non fresh
    /// candidate or the least recently updated one.
    Standard,
    /// Favor candidates with the fewest signal strength samples, and probe faster while samples
    /// are lacking.
    #[default]
    SampleCoverage,
}

/// Configuration of an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Instance id used when this node becomes root.
    pub instance_id: u8,
    pub max_instances: usize,
    pub max_dags_per_instance: usize,
    pub neighbor_capacity: usize,
    pub mode: NodeMode,
    /// The only mode of operation accepted in DIOs, and the one used as root.
    pub mop: Mop,
    /// Objective function used as root.
    pub root_objective: Ocp,
    /// Metric container advertised as root. If not set, the one natural to the root objective
    /// function is used.
    pub metric_container: Option<McType>,
    pub grounded: bool,
    pub preference: u8,
    /// Minimum DIO interval, as a power of 2 milliseconds.
    pub dio_interval_min: u8,
    pub dio_interval_doublings: u8,
    /// Amount of consistent DIOs suppressing our own. 0 disables suppression.
    pub dio_redundancy: u8,
    pub min_hop_rank_increase: u16,
    /// 0 disables the bound.
    pub max_rank_increase: u16,
    pub default_lifetime: u8,
    /// Lifetime unit, in seconds.
    pub lifetime_unit: u16,
    pub default_route_infinite_lifetime: bool,
    /// Upper bound of the random delay before sending a DAO, in milliseconds.
    pub dao_latency_ms: u64,
    /// Lifetime of a DAG, in multiples of the maximum DIO interval.
    pub dag_lifetime_factor: u32,
    pub dis_send: bool,
    /// Periodic ticks without a DAG between two DIS.
    pub dis_interval: u16,
    pub dis_start_delay: u16,
    pub probing: bool,
    pub probing_interval_secs: u64,
    pub probe_kind: ProbeKind,
    pub probing_policy: ProbingPolicy,
    pub rssi_smoothing: RssiSmoothing,
    pub etx: EtxConfig,
    pub rssi: RssiConfig,
    pub movement: MovementConfig,
    pub hysteresis: HysteresisConfig,
}

impl Config {
    pub fn dao_latency(&self) -> Duration {
        Duration::from_millis(self.dao_latency_ms)
    }

    pub fn probing_interval(&self) -> Duration {
        Duration::from_secs(self.probing_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance_id: DEFAULT_INSTANCE,
            max_instances: 1,
            max_dags_per_instance: 2,
            neighbor_capacity: 16,
            mode: NodeMode::Mesh,
            mop: Mop::Storing,
            root_objective: MRHOF,
            metric_container: None,
            grounded: false,
            preference: 0,
            dio_interval_min: 12,
            dio_interval_doublings: 8,
            dio_redundancy: 10,
            min_hop_rank_increase: 256,
            max_rank_increase: 7 * 256,
            default_lifetime: INFINITE_LIFETIME,
            lifetime_unit: 0xffff,
            default_route_infinite_lifetime: false,
            dao_latency_ms: 4000,
            dag_lifetime_factor: 3,
            dis_send: true,
            dis_interval: 60,
            dis_start_delay: 5,
            probing: true,
            probing_interval_secs: 60,
            probe_kind: ProbeKind::Dio,
            probing_policy: ProbingPolicy::SampleCoverage,
            rssi_smoothing: RssiSmoothing::Ewma,
            etx: EtxConfig::default(),
            rssi: RssiConfig::default(),
            movement: MovementConfig::default(),
            hysteresis: HysteresisConfig::default(),
        }
    }
}
