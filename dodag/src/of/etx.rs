//! Minimum Rank with Hysteresis Objective Function, using the ETX of links as link cost.

use serde::{Deserialize, Serialize};

use super::{clamp_cost, Candidate, Context, ObjectiveFunction, Ocp, MAX_COST, MRHOF};
use crate::{link_stats::ETX_DIVISOR, metric_container::McType};

/// Tunables of [`Mrhof`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtxConfig {
    /// Use the square of the ETX as link cost, which penalizes lossy links harder.
    pub squared: bool,
    pub max_link_cost: u16,
    pub switch_threshold: u16,
    pub max_path_cost: u16,
}

impl EtxConfig {
    /// Defaults for the squared ETX link cost.
    pub const fn squared() -> Self {
        Self {
            squared: true,
            max_link_cost: 2048,
            switch_threshold: 160,
            max_path_cost: 32768,
        }
    }
}

impl Default for EtxConfig {
    fn default() -> Self {
        Self {
            squared: false,
            max_link_cost: 1024,
            switch_threshold: 96,
            max_path_cost: 32768,
        }
    }
}

#[derive(Debug)]
pub struct Mrhof {
    config: EtxConfig,
}

impl Mrhof {
    pub fn new(config: EtxConfig) -> Self {
        Self { config }
    }
}

impl ObjectiveFunction for Mrhof {
    fn ocp(&self) -> Ocp {
        MRHOF
    }

    fn name(&self) -> &'static str {
        "mrhof"
    }

    fn natural_metric_container(&self) -> McType {
        McType::None
    }

    fn max_link_cost(&self) -> u16 {
        self.config.max_link_cost
    }

    fn max_path_cost(&self) -> u16 {
        self.config.max_path_cost
    }

    fn switch_threshold(&self) -> u16 {
        self.config.switch_threshold
    }

    fn link_cost(&self, _: &Context, candidate: &Candidate<'_>) -> u16 {
        let Some(stats) = candidate.stats else {
            return MAX_COST;
        };
        let etx = stats.etx() as i32;
        if self.config.squared {
            clamp_cost(etx * etx / ETX_DIVISOR as i32)
        } else {
            etx as u16
        }
    }
}
