//! RPL instances and the DAGs they host.

use std::{net::Ipv6Addr, time::Duration};

use serde::Serialize;
use tokio::time::Instant;

use crate::{
    addr::LinkAddr,
    config::{Config, INFINITE_LIFETIME},
    dag::{Dag, DagInfo},
    link_stats::{LinkStats, FRESHNESS_EXPIRATION},
    lollipop::Lollipop,
    message::{DioMessage, Mop},
    metric_container::{McType, MetricContainer},
    of::{Context, Freshness, SharedObjective},
    rank::Rank,
    timer::Trickle,
};

/// An RPL instance: a set of DAGs sharing an objective function and protocol parameters.
#[derive(Debug)]
pub struct Instance {
    pub(crate) id: u8,
    pub(crate) of: SharedObjective,
    pub(crate) mop: Mop,
    /// Metric container type used for path costs, as advertised by the root.
    pub(crate) mc_type: McType,
    /// The metric container we advertise.
    pub(crate) mc: MetricContainer,
    pub(crate) dags: Vec<Option<Dag>>,
    /// Slot of the DAG we route in.
    pub(crate) current: Option<usize>,
    pub(crate) dtsn_out: Lollipop,
    pub(crate) dao_sequence: Lollipop,
    pub(crate) has_downward_route: bool,
    pub(crate) trickle: Trickle,
    pub(crate) max_rank_increase: u16,
    pub(crate) min_hop_rank_increase: u16,
    pub(crate) default_lifetime: u8,
    pub(crate) lifetime_unit: u16,
    /// Next hop of the installed default route.
    pub(crate) default_route: Option<LinkAddr>,
    pub(crate) urgent_probe: Option<LinkAddr>,
    pub(crate) unicast_dio_target: Option<LinkAddr>,
    pub(crate) dao_pending: bool,
    pub(crate) dao_lifetime_pending: bool,
    pub(crate) last_probed_dag: usize,
}

impl Instance {
    /// Create an instance without DAGs, with the protocol parameters of `config`.
    pub(crate) fn new(id: u8, of: SharedObjective, config: &Config) -> Self {
        let mc_type = config
            .metric_container
            .unwrap_or_else(|| of.natural_metric_container());
        Self {
            id,
            of,
            mop: config.mop,
            mc_type,
            mc: MetricContainer::None,
            dags: vec![None; config.max_dags_per_instance.max(1)],
            current: None,
            dtsn_out: Lollipop::new(),
            dao_sequence: Lollipop::new(),
            has_downward_route: false,
            trickle: Trickle::new(
                config.dio_interval_min,
                config.dio_interval_doublings,
                config.dio_redundancy,
            ),
            max_rank_increase: config.max_rank_increase,
            min_hop_rank_increase: config.min_hop_rank_increase,
            default_lifetime: config.default_lifetime,
            lifetime_unit: config.lifetime_unit,
            default_route: None,
            urgent_probe: None,
            unicast_dio_target: None,
            dao_pending: false,
            dao_lifetime_pending: false,
            last_probed_dag: 0,
        }
    }

    pub const fn id(&self) -> u8 {
        self.id
    }

    /// The objective function of this instance.
    pub fn objective(&self) -> &SharedObjective {
        &self.of
    }

    pub const fn mop(&self) -> Mop {
        self.mop
    }

    pub const fn mc_type(&self) -> McType {
        self.mc_type
    }

    /// The metric container this node currently advertises.
    pub const fn metric_container(&self) -> &MetricContainer {
        &self.mc
    }

    pub const fn dtsn(&self) -> Lollipop {
        self.dtsn_out
    }

    pub const fn dao_sequence(&self) -> Lollipop {
        self.dao_sequence
    }

    /// Checks if a DAO acknowledgement confirmed our downward route.
    pub const fn has_downward_route(&self) -> bool {
        self.has_downward_route
    }

    pub const fn trickle(&self) -> &Trickle {
        &self.trickle
    }

    pub const fn min_hop_rank_increase(&self) -> u16 {
        self.min_hop_rank_increase
    }

    pub const fn max_rank_increase(&self) -> u16 {
        self.max_rank_increase
    }

    pub const fn default_lifetime(&self) -> u8 {
        self.default_lifetime
    }

    pub const fn lifetime_unit(&self) -> u16 {
        self.lifetime_unit
    }

    /// The DAG we currently route in.
    pub fn current_dag(&self) -> Option<&Dag> {
        self.current.and_then(|slot| self.dag(slot))
    }

    pub(crate) fn current_dag_mut(&mut self) -> Option<&mut Dag> {
        self.current.and_then(|slot| self.dag_mut(slot))
    }

    pub fn dag(&self, slot: usize) -> Option<&Dag> {
        self.dags.get(slot).and_then(Option::as_ref)
    }

    pub(crate) fn dag_mut(&mut self, slot: usize) -> Option<&mut Dag> {
        self.dags.get_mut(slot).and_then(Option::as_mut)
    }

    /// All DAGs of this instance with their slot.
    pub fn dags(&self) -> impl Iterator<Item = (usize, &Dag)> + '_ {
        self.dags
            .iter()
            .enumerate()
            .filter_map(|(slot, dag)| dag.as_ref().map(|dag| (slot, dag)))
    }

    /// Slots of all DAGs in use.
    pub(crate) fn dag_slots(&self) -> Vec<usize> {
        self.dags().map(|(slot, _)| slot).collect()
    }

    /// The slot of the DAG with the given id.
    pub(crate) fn find_dag(&self, id: Ipv6Addr) -> Option<usize> {
        self.dags()
            .find(|(_, dag)| dag.id == id)
            .map(|(slot, _)| slot)
    }

    /// Allocate a DAG in a free slot. Returns `None` if all slots are in use.
    pub(crate) fn alloc_dag(&mut self, id: Ipv6Addr) -> Option<usize> {
        let slot = self.dags.iter().position(Option::is_none)?;
        self.dags[slot] = Some(Dag::new(id));
        Some(slot)
    }

    /// The rank of a root of this instance.
    pub const fn root_rank(&self) -> Rank {
        Rank::root(self.min_hop_rank_increase)
    }

    /// Checks if this node is the root of its current DAG.
    pub fn is_root(&self) -> bool {
        self.current_dag()
            .is_some_and(|dag| dag.rank == self.root_rank())
    }

    /// Context for the objective function to evaluate the parents of the DAG in `slot`.
    pub(crate) fn context(&self, slot: usize, now: Instant) -> Context {
        Context {
            min_hop_rank_increase: self.min_hop_rank_increase,
            mc_type: self.mc_type,
            preferred: self.dag(slot).and_then(|dag| dag.preferred_parent),
            now,
        }
    }

    /// Checks if link statistics are fresh enough to trust the link cost, according to the
    /// objective function.
    pub(crate) fn is_fresh(&self, stats: Option<&LinkStats>, now: Instant) -> bool {
        stats.is_some_and(|stats| match self.of.freshness() {
            Freshness::Transmit => stats.tx_fresh(now, FRESHNESS_EXPIRATION),
            Freshness::Receive => stats.rx_fresh(now, FRESHNESS_EXPIRATION),
        })
    }

    /// Reset the protocol parameters to the ones of `config`, as done when becoming root.
    pub(crate) fn configure_from(&mut self, config: &Config) {
        self.trickle.reconfigure(
            config.dio_interval_min,
            config.dio_interval_doublings,
            config.dio_redundancy,
        );
        self.max_rank_increase = config.max_rank_increase;
        self.min_hop_rank_increase = config.min_hop_rank_increase;
        self.default_lifetime = config.default_lifetime;
        self.lifetime_unit = config.lifetime_unit;
    }

    /// Adopt the protocol parameters advertised in a DIO.
    pub(crate) fn configure_from_dio(&mut self, dio: &DioMessage) {
        self.trickle
            .reconfigure(dio.interval_min, dio.interval_doublings, dio.redundancy);
        self.max_rank_increase = dio.max_rank_increase;
        self.min_hop_rank_increase = dio.min_hop_rank_increase;
        self.default_lifetime = dio.default_lifetime;
        self.lifetime_unit = dio.lifetime_unit;
    }

    /// Checks if a DIO for a new DAG advertises the same parameters as this instance, a
    /// requirement for hosting both in one instance.
    pub(crate) fn is_compatible(&self, dio: &DioMessage) -> bool {
        self.of.ocp() == dio.ocp
            && self.mop.code() == dio.mop
            && self.max_rank_increase == dio.max_rank_increase
            && self.min_hop_rank_increase == dio.min_hop_rank_increase
            && self.trickle.doublings() == dio.interval_doublings
            && self.trickle.interval_min() == dio.interval_min
            && self.trickle.redundancy() == dio.redundancy
            && self.default_lifetime == dio.default_lifetime
            && self.lifetime_unit == dio.lifetime_unit
    }

    /// Lifetime of routes in lifetime units, `None` if infinite.
    pub fn route_lifetime(&self, lifetime: u8) -> Option<Duration> {
        (lifetime != INFINITE_LIFETIME)
            .then(|| Duration::from_secs(lifetime as u64 * self.lifetime_unit as u64))
    }

    /// Lifetime of a DAG, in periodic ticks (seconds): a multiple of the largest DIO interval.
    pub(crate) fn dag_lifetime(&self, factor: u32) -> u32 {
        let ticks = self.trickle.max_interval().as_millis() * factor as u128 / 1000;
        ticks.min(u32::MAX as u128) as u32
    }

    /// A serializable snapshot of this instance.
    pub fn info(&self) -> InstanceInfo {
        InstanceInfo {
            id: self.id,
            objective: self.of.name(),
            mop: self.mop,
            mc_type: self.mc_type,
            dtsn: self.dtsn_out,
            dao_sequence: self.dao_sequence,
            has_downward_route: self.has_downward_route,
            root: self.is_root(),
            dio_interval: self.trickle.interval(),
            dags: self.dags().map(|(_, dag)| dag.info(self.id)).collect(),
        }
    }
}

/// Snapshot of an instance, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceInfo {
    pub id: u8,
    pub objective: &'static str,
    pub mop: Mop,
    pub mc_type: McType,
    pub dtsn: Lollipop,
    pub dao_sequence: Lollipop,
    pub has_downward_route: bool,
    pub root: bool,
    pub dio_interval: Duration,
    pub dags: Vec<DagInfo>,
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv6Addr, time::Duration};

    use super::Instance;
    use crate::{
        config::Config,
        metric_container::McType,
        of::{Objectives, MRHOF, PMAOF},
    };

    fn instance(config: &Config, ocp: u16) -> Instance {
        let of = Objectives::from_config(config).find(ocp).unwrap();
        Instance::new(1, of, config)
    }

    #[test]
    fn dag_slots_are_bounded() {
        let config = Config::default();
        let mut inst = instance(&config, MRHOF);
        let a = inst.alloc_dag(Ipv6Addr::LOCALHOST).unwrap();
        let b = inst.alloc_dag(Ipv6Addr::UNSPECIFIED).unwrap();
        assert_ne!(a, b);
        assert!(inst.alloc_dag(Ipv6Addr::LOCALHOST).is_none());
        assert_eq!(inst.find_dag(Ipv6Addr::UNSPECIFIED), Some(b));

        inst.dags[a] = None;
        assert_eq!(inst.dag_slots(), vec![b]);
        assert_eq!(inst.alloc_dag(Ipv6Addr::LOCALHOST), Some(a));
    }

    #[test]
    fn metric_container_follows_objective() {
        let config = Config::default();
        assert_eq!(instance(&config, MRHOF).mc_type(), McType::None);
        assert_eq!(instance(&config, PMAOF).mc_type(), McType::Ssv);

        let config = Config {
            metric_container: Some(McType::Etx),
            ..Config::default()
        };
        assert_eq!(instance(&config, PMAOF).mc_type(), McType::Etx);
    }

    #[test]
    fn lifetimes() {
        let config = Config {
            default_lifetime: 30,
            lifetime_unit: 60,
            ..Config::default()
        };
        let inst = instance(&config, MRHOF);
        assert_eq!(inst.route_lifetime(30), Some(Duration::from_secs(1800)));
        assert_eq!(inst.route_lifetime(0xff), None);
        // 2^20 ms * 3, in seconds.
        assert_eq!(inst.dag_lifetime(3), 3145);
    }

    #[test]
    fn root_detection() {
        let config = Config::default();
        let mut inst = instance(&config, MRHOF);
        assert!(!inst.is_root());
        let slot = inst.alloc_dag(Ipv6Addr::LOCALHOST).unwrap();
        inst.current = Some(slot);
        assert!(!inst.is_root());
        inst.dags[slot].as_mut().unwrap().rank = inst.root_rank();
        assert!(inst.is_root());
    }
}
