//! MRHOF using the absolute signal strength of the link as link cost.

use serde::{Deserialize, Serialize};

use super::{clamp_cost, Candidate, Context, ObjectiveFunction, Ocp, MAX_COST, RSSI_OF};
use crate::{fixmath, metric_container::McType};

/// Weight of one dBm of signal strength in the link cost.
const RSSI_WEIGHT: i32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RssiConfig {
    pub max_link_cost: u16,
    pub switch_threshold: u16,
    pub max_path_cost: u16,
}

impl Default for RssiConfig {
    fn default() -> Self {
        Self {
            max_link_cost: 1024,
            switch_threshold: 48,
            max_path_cost: 4096,
        }
    }
}

#[derive(Debug)]
pub struct RssiOf {
    config: RssiConfig,
}

impl RssiOf {
    pub fn new(config: RssiConfig) -> Self {
        Self { config }
    }
}

impl ObjectiveFunction for RssiOf {
    fn ocp(&self) -> Ocp {
        RSSI_OF
    }

    fn name(&self) -> &'static str {
        "rssi"
    }

    fn natural_metric_container(&self) -> McType {
        McType::Rssi
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
        match candidate.stats.and_then(|s| s.rssi().newest()) {
            Some(sample) => clamp_cost(RSSI_WEIGHT * fixmath::to_int(sample.rssi).abs()),
            None => MAX_COST,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::{RssiConfig, RssiOf};
    use crate::{
        link_stats::{LinkStats, RssiSmoothing, TxStatus},
        metric_container::MetricContainer,
        of::{
            tests::{ctx, parent},
            Candidate, ObjectiveFunction, MAX_COST,
        },
    };

    #[test]
    fn link_cost_from_newest_sample() {
        let now = Instant::now();
        let of = RssiOf::new(RssiConfig::default());
        let p = parent(256, MetricContainer::None);

        let mut stats = LinkStats::new();
        stats.record_transmit(now, TxStatus::Ok, 1);
        let c = Candidate {
            addr: 1.into(),
            parent: &p,
            stats: Some(&stats),
        };
        assert_eq!(of.link_cost(&ctx(now, None), &c), MAX_COST);

        stats.record_receive(now, -72, RssiSmoothing::Ewma);
        let c = Candidate {
            addr: 1.into(),
            parent: &p,
            stats: Some(&stats),
        };
        assert_eq!(of.link_cost(&ctx(now, None), &c), 720);
        assert!(of.has_usable_link(&ctx(now, None), &c));
    }

    #[test]
    fn weak_links_are_unusable() {
        let now = Instant::now();
        let of = RssiOf::new(RssiConfig::default());
        let p = parent(256, MetricContainer::None);
        let mut stats = LinkStats::new();
        stats.record_receive(now, -105, RssiSmoothing::Ewma);
        let c = Candidate {
            addr: 1.into(),
            parent: &p,
            stats: Some(&stats),
        };
        assert!(!of.has_usable_link(&ctx(now, None), &c));
    }
}
