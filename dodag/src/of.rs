//! Objective functions: rank computation and parent and DAG preference.
//!
//! Every variant implements [`ObjectiveFunction`]. The shared parts of the computation (path cost
//! from the advertised metric container, rank via a parent, hysteresis on parent switches, DAG
//! preference) are default methods, variants mostly differ in how they turn link statistics into
//! a link cost.

use core::fmt;
use std::{net::Ipv6Addr, sync::Arc};

use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    addr::LinkAddr,
    config::Config,
    dag::Dag,
    link_stats::{LinkStats, TxStatus},
    message::DaoAckStatus,
    metric_container::{McType, MetricContainer},
    parent::Parent,
    rank::Rank,
};

pub mod etx;
pub mod hysteresis;
pub mod movement;
pub mod rssi;

/// Objective code point, identifying an objective function in DIOs.
pub type Ocp = u16;

/// Minimum Rank with Hysteresis Objective Function, using ETX.
pub const MRHOF: Ocp = 1;
/// Movement aware objective function, using signal strength derivatives.
pub const MVMTOF: Ocp = 0xf0;
/// Smoothed signal strength velocity objective function, with hysteresis on the preferred parent.
pub const PMAOF: Ocp = 0xf1;
/// MRHOF variant using the absolute signal strength as link metric.
pub const RSSI_OF: Ocp = 0xf2;

/// Largest cost, meaning the path or link is unusable.
pub const MAX_COST: u16 = 0xffff;

/// Amount of transmissions a failed registration is accounted as.
const REGISTRATION_FAILURE_PENALTY: u8 = 10;

/// An objective function shared between the instances using it.
pub type SharedObjective = Arc<dyn ObjectiveFunction + Send + Sync>;

/// Instance state an objective function needs to evaluate candidates.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub min_hop_rank_increase: u16,
    /// Metric container type of the instance.
    pub mc_type: McType,
    /// Preferred parent of the DAG the candidates belong to.
    pub preferred: Option<LinkAddr>,
    pub now: Instant,
}

/// A parent evaluated by an objective function, with its link statistics if any.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub addr: LinkAddr,
    pub parent: &'a Parent,
    pub stats: Option<&'a LinkStats>,
}

/// Which link statistics decide whether a parent is fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Transmit,
    Receive,
}

/// Policy computing ranks and costs, and choosing between parents and DAGs.
pub trait ObjectiveFunction: fmt::Debug {
    /// The objective code point of this function.
    fn ocp(&self) -> Ocp;

    /// Human readable name.
    fn name(&self) -> &'static str;

    /// Metric container advertised by a root using this function, unless configured otherwise.
    fn natural_metric_container(&self) -> McType;

    /// Largest link cost of a usable link.
    fn max_link_cost(&self) -> u16;

    /// Largest path cost of a usable parent.
    fn max_path_cost(&self) -> u16;

    /// Path cost difference required to switch away from the preferred parent.
    fn switch_threshold(&self) -> u16;

    /// The cost of the link to a candidate.
    fn link_cost(&self, ctx: &Context, candidate: &Candidate<'_>) -> u16;

    /// Called when the state of a DAG is reset by a global repair or a join.
    fn reset(&self, dag_id: Ipv6Addr) {
        info!(dag = %dag_id, objective = self.name(), "Reset objective function");
    }

    /// Account for a DAO acknowledgement from a parent.
    fn registration_ack(&self, stats: &mut LinkStats, now: Instant, status: DaoAckStatus) {
        match status {
            DaoAckStatus::Accept | DaoAckStatus::UnableToAddRouteAtRoot => {}
            DaoAckStatus::UnableToAccept(_) | DaoAckStatus::Timeout => {
                debug!(?status, "Penalizing parent for failed registration");
                stats.record_transmit(now, TxStatus::Ok, REGISTRATION_FAILURE_PENALTY);
            }
        }
    }

    /// Checks if the link to a candidate is good enough to use it.
    fn has_usable_link(&self, ctx: &Context, candidate: &Candidate<'_>) -> bool {
        self.link_cost(ctx, candidate) <= self.max_link_cost()
    }

    /// Cost of the path to the root through a candidate: the cost it advertised plus the link
    /// cost. Without a metric container of the instance's type, the advertised rank is used.
    fn path_cost(&self, ctx: &Context, candidate: &Candidate<'_>) -> u16 {
        let base = candidate
            .parent
            .mc
            .path_cost(ctx.mc_type)
            .unwrap_or_else(|| candidate.parent.rank.into());
        base.saturating_add(self.link_cost(ctx, candidate))
    }

    /// Our rank if `candidate` is the preferred parent. Never less than the rank of the
    /// candidate plus the minimum hop rank increase.
    fn rank_via(&self, ctx: &Context, candidate: &Candidate<'_>) -> Rank {
        let lower_bound = candidate
            .parent
            .rank
            .saturating_add(ctx.min_hop_rank_increase);
        lower_bound.max(Rank::new(self.path_cost(ctx, candidate)))
    }

    /// Checks if a candidate can be used at all.
    fn is_usable(&self, ctx: &Context, candidate: &Candidate<'_>) -> bool {
        self.has_usable_link(ctx, candidate)
            && self.path_cost(ctx, candidate) <= self.max_path_cost()
    }

    /// Additional performance check of a candidate. `None` if this function has no such check.
    fn is_acceptable(&self, _ctx: &Context, _candidate: &Candidate<'_>) -> Option<bool> {
        None
    }

    /// Which link statistics decide if a candidate is fresh.
    fn freshness(&self) -> Freshness {
        Freshness::Transmit
    }

    /// Whether an acceptable preferred parent is kept without comparing it to other candidates.
    fn keeps_acceptable_preferred(&self) -> bool {
        false
    }

    /// The better of two candidates, or `None` if neither is usable. If one of them is the
    /// preferred parent and their path costs are within the switch threshold, the preferred
    /// parent wins.
    fn best_parent<'a>(
        &self,
        ctx: &Context,
        a: Option<Candidate<'a>>,
        b: Option<Candidate<'a>>,
    ) -> Option<Candidate<'a>> {
        let a = a.filter(|c| self.is_usable(ctx, c));
        let b = b.filter(|c| self.is_usable(ctx, c));
        let (a, b) = match (a, b) {
            (Some(a), Some(b)) => (a, b),
            (a, b) => return a.or(b),
        };

        let (a_cost, b_cost) = (self.path_cost(ctx, &a), self.path_cost(ctx, &b));
        if let Some(preferred) = ctx.preferred {
            if (a.addr == preferred || b.addr == preferred)
                && within_threshold(a_cost, b_cost, self.switch_threshold())
            {
                return Some(if a.addr == preferred { a } else { b });
            }
        }

        Some(if a_cost < b_cost { a } else { b })
    }

    /// The better of two DAGs: grounded first, then higher preference, then lower rank.
    fn best_dag<'a>(&self, a: &'a Dag, b: &'a Dag) -> &'a Dag {
        if a.grounded != b.grounded {
            return if a.grounded { a } else { b };
        }
        if a.preference != b.preference {
            return if a.preference > b.preference { a } else { b };
        }
        if a.rank < b.rank {
            a
        } else {
            b
        }
    }

    /// The metric container this node advertises.
    fn metric_container(
        &self,
        ctx: &Context,
        is_root: bool,
        own_rank: Rank,
        preferred: Option<&Candidate<'_>>,
    ) -> MetricContainer {
        let (path_cost, hop_count) = if is_root {
            (own_rank.into(), 0)
        } else {
            match preferred {
                Some(c) => (self.path_cost(ctx, c), c.parent.hop_count()),
                None => (MAX_COST, 0),
            }
        };
        MetricContainer::new(ctx.mc_type, path_cost, is_root, hop_count)
    }
}

/// Checks if two costs differ by less than `threshold`.
pub fn within_threshold(a: u16, b: u16, threshold: u16) -> bool {
    (a as i32 - b as i32).abs() < threshold as i32
}

/// Saturate an intermediate cost into the cost range.
pub(crate) fn clamp_cost(cost: i32) -> u16 {
    cost.clamp(0, MAX_COST as i32) as u16
}

/// The set of objective functions a node supports, keyed by code point.
#[derive(Debug, Clone)]
pub struct Objectives {
    functions: Vec<SharedObjective>,
}

impl Objectives {
    /// All supported objective functions, tuned by `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            functions: vec![
                Arc::new(etx::Mrhof::new(config.etx.clone())),
                Arc::new(rssi::RssiOf::new(config.rssi.clone())),
                Arc::new(movement::MovementOf::new(config.movement.clone())),
                Arc::new(hysteresis::HysteresisOf::new(config.hysteresis.clone())),
            ],
        }
    }

    /// The objective function with code point `ocp`, if supported.
    pub fn find(&self, ocp: Ocp) -> Option<SharedObjective> {
        self.functions.iter().find(|of| of.ocp() == ocp).cloned()
    }
}
