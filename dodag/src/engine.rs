//! The routing engine: owner of the instance and neighbor tables, and entry point for every event
//! the host delivers.
//!
//! The engine runs to completion on every call and never blocks. It only acts on its environment
//! through the [`Host`] passed to each entry point, which makes it usable both on a real network
//! stack and in simulations.

use std::{net::Ipv6Addr, time::Duration};

use ipnet::Ipv6Net;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    addr::LinkAddr,
    config::{Config, NodeMode},
    dag::DagInfo,
    error::Error,
    host::{Host, Withdraw},
    instance::{Instance, InstanceInfo},
    link_stats::{LinkStats, TxStatus, FRESHNESS_HALF_LIFE},
    lollipop::Lollipop,
    message::{DaoAckStatus, DaoMessage, DioMessage, PrefixInfo},
    metrics::Metrics,
    neighbor::{InsertReason, Neighbor, NeighborTable},
    of::{Objectives, SharedObjective},
    parent::DagRef,
    rank::Rank,
    timer::{TimerId, PERIODIC_INTERVAL},
};

mod dio;
mod selection;
#[cfg(test)]
mod tests;
mod timers;

/// The control plane of a node: maintains its position in the DODAGs of every instance it is part
/// of, and decides on preferred parents, advertisements and registrations.
pub struct Engine<M, R = StdRng> {
    config: Config,
    objectives: Objectives,
    instances: Vec<Instance>,
    neighbors: NeighborTable,
    metrics: M,
    rng: R,
    /// Periodic ticks since the last DIS.
    next_dis: u16,
}

impl<M> Engine<M, StdRng>
where
    M: Metrics,
{
    /// Create a new engine, seeding its random number generator from the OS.
    pub fn new(config: Config, metrics: M) -> Self {
        Self::with_rng(config, metrics, StdRng::from_os_rng())
    }
}

impl<M, R> Engine<M, R>
where
    M: Metrics,
    R: Rng,
{
    /// Create a new engine using the given random number generator.
    pub fn with_rng(config: Config, metrics: M, rng: R) -> Self {
        Self {
            objectives: Objectives::from_config(&config),
            neighbors: NeighborTable::new(config.neighbor_capacity),
            instances: Vec::with_capacity(config.max_instances),
            config,
            metrics,
            rng,
            next_dis: 0,
        }
    }

    /// Arm the timers which run for the lifetime of the engine.
    pub fn start<H: Host>(&mut self, host: &mut H) {
        info!(
            instance = self.config.instance_id,
            mode = ?self.config.mode,
            mop = ?self.config.mop,
            "Starting routing engine"
        );
        host.schedule(TimerId::Periodic, PERIODIC_INTERVAL);
        host.schedule(TimerId::LinkStatsDecay, FRESHNESS_HALF_LIFE);

        let interval = self.config.dis_interval;
        let jitter = if interval == 0 {
            0
        } else {
            self.rng.random_range(0..interval)
        };
        self.next_dis = (interval / 2 + jitter).saturating_sub(self.config.dis_start_delay);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &M {
        &self.metrics
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    /// All instances this node is part of.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> + '_ {
        self.instances.iter()
    }

    pub fn instance(&self, id: u8) -> Option<&Instance> {
        find(&self.instances, id)
    }

    /// Make this node the root of the DAG `dag_id`, in the configured instance. Any other DAG of
    /// the instance is left. If this node already knew `dag_id`, its version is incremented.
    pub fn set_root<H: Host>(&mut self, host: &mut H, dag_id: Ipv6Addr) -> Result<(), Error> {
        let id = self.config.instance_id;
        let of = self
            .objectives
            .find(self.config.root_objective)
            .ok_or(Error::UnsupportedObjective(self.config.root_objective))?;

        let mut version = Lollipop::new();
        let slots = find(&self.instances, id)
            .map(Instance::dag_slots)
            .unwrap_or_default();
        for slot in slots {
            let r = DagRef { instance: id, slot };
            let Some(inst) = find_mut(&mut self.instances, id) else {
                break;
            };
            let Some((old_id, old_version)) = inst.dag(slot).map(|dag| (dag.id, dag.version)) else {
                continue;
            };
            if old_id == dag_id {
                version = old_version.next();
            }
            if inst.current == Some(slot) {
                info!(dag = %old_id, "Dropping a joined DAG when becoming root");
                inst.current = None;
                self.clear_default_route(host, id);
            } else {
                info!(dag = %old_id, "Dropping a DAG when becoming root");
            }
            self.free_dag(host, r);
        }

        let slot = self.alloc_dag(host, id, dag_id, &of)?;
        let now = host.now();
        let Some(inst) = find_mut(&mut self.instances, id) else {
            return Err(Error::UnknownInstance(id));
        };
        inst.mop = self.config.mop;
        inst.mc_type = self
            .config
            .metric_container
            .unwrap_or_else(|| of.natural_metric_container());
        inst.of = of;
        inst.configure_from(&self.config);
        inst.current = Some(slot);
        inst.dtsn_out = Lollipop::new();
        let root_rank = inst.root_rank();
        if let Some(dag) = inst.dag_mut(slot) {
            dag.version = version;
            dag.joined = true;
            dag.grounded = self.config.grounded;
            dag.preference = self.config.preference;
            dag.rank = root_rank;
            dag.min_rank = root_rank;
        }

        self.update_metric_container(id, now);
        info!(
            instance = id,
            dag = %dag_id,
            version = %version,
            "Node set to be a DAG root"
        );
        self.metrics.dag_joined();
        self.restart_dio_timer(host, id);

        Ok(())
    }

    /// Start a global repair of a DAG this node is root of, by incrementing its version.
    pub fn repair_root<H: Host>(&mut self, host: &mut H, instance_id: u8) -> Result<(), Error> {
        let inst =
            find_mut(&mut self.instances, instance_id).ok_or(Error::UnknownInstance(instance_id))?;
        if !inst.is_root() {
            return Err(Error::NotRoot(instance_id));
        }
        inst.dtsn_out.increment();
        let dtsn = inst.dtsn_out;
        let Some(dag) = inst.current_dag_mut() else {
            return Err(Error::NotRoot(instance_id));
        };
        dag.version.increment();
        info!(
            instance = instance_id,
            dag = %dag.id,
            version = %dag.version,
            %dtsn,
            "Initiating global repair"
        );

        self.metrics.root_repair();
        self.reset_dio_timer(host, instance_id);
        Ok(())
    }

    /// Announce `prefix` in the current DAG of the instance, for nodes to autoconfigure an
    /// address from.
    pub fn set_prefix<H: Host>(
        &mut self,
        host: &mut H,
        instance_id: u8,
        addr: Ipv6Addr,
        len: u8,
    ) -> Result<(), Error> {
        let prefix = Ipv6Net::new(addr, len).map_err(|_| Error::InvalidPrefixLength(len))?;
        let slot = find(&self.instances, instance_id)
            .and_then(|inst| inst.current)
            .ok_or(Error::UnknownInstance(instance_id))?;
        self.install_prefix(
            host,
            DagRef {
                instance: instance_id,
                slot,
            },
            PrefixInfo {
                prefix,
                autonomous: true,
                lifetime: u32::MAX,
            },
        );
        Ok(())
    }

    /// Leave an instance: every DAG is freed and every timer of the instance is stopped.
    pub fn leave_instance<H: Host>(&mut self, host: &mut H, instance_id: u8) -> Result<(), Error> {
        if find(&self.instances, instance_id).is_none() {
            return Err(Error::UnknownInstance(instance_id));
        }
        self.free_instance(host, instance_id);
        Ok(())
    }

    /// Handle a DIS from `from`. A multicast DIS resets the trickle timers, a unicast one is
    /// answered with a unicast DIO.
    pub fn process_dis<H: Host>(&mut self, host: &mut H, from: LinkAddr, multicast: bool) {
        self.metrics.dis_processed(multicast);
        let ids: Vec<u8> = self.instances.iter().map(Instance::id).collect();
        for id in ids {
            if multicast {
                debug!(instance = id, neighbor = %from, "Multicast DIS, resetting DIO timer");
                self.reset_dio_timer(host, id);
            } else if self.add_neighbor(host, from, InsertReason::Dis) {
                debug!(instance = id, neighbor = %from, "Unicast DIS, reply to sender");
                if let Some(inst) = find_mut(&mut self.instances, id) {
                    inst.unicast_dio_target = Some(from);
                    host.schedule(TimerId::UnicastDio(id), Duration::ZERO);
                }
            } else {
                warn!(neighbor = %from, "Neighbor table full, not answering unicast DIS");
            }
        }
    }

    /// Handle the acknowledgement of our last DAO, or its absence.
    pub fn process_dao_ack<H: Host>(
        &mut self,
        host: &mut H,
        from: LinkAddr,
        instance_id: u8,
        sequence: Lollipop,
        status: DaoAckStatus,
    ) {
        let now = host.now();
        let Some(inst) = find_mut(&mut self.instances, instance_id) else {
            debug!(instance = instance_id, "DAO ack for unknown instance");
            return;
        };
        if sequence != inst.dao_sequence {
            debug!(
                instance = instance_id,
                %sequence,
                expected = %inst.dao_sequence,
                "Ignoring DAO ack for an old sequence"
            );
            return;
        }

        let accepted = status == DaoAckStatus::Accept;
        if accepted {
            inst.has_downward_route = true;
        }
        debug!(instance = instance_id, neighbor = %from, ?status, "Received DAO ack");
        if let Some(stats) = self.neighbors.get_mut(&from).and_then(|n| n.stats.as_mut()) {
            inst.of.registration_ack(stats, now, status);
        }
        self.metrics.dao_ack_processed(accepted);
    }

    /// Link layer feedback on a unicast transmission to `addr`.
    pub fn link_transmitted<H: Host>(
        &mut self,
        host: &mut H,
        addr: LinkAddr,
        status: TxStatus,
        attempts: u8,
    ) {
        let now = host.now();
        match status {
            TxStatus::Collision | TxStatus::Error => return,
            TxStatus::QueueFull => {
                if let Some(stats) = self.neighbors.get_mut(&addr).and_then(|n| n.stats.as_mut()) {
                    stats.record_transmit(now, status, attempts);
                }
                return;
            }
            // The neighbor might be gone, only an acknowledged frame proves it exists.
            TxStatus::NoAck if self.neighbors.get(&addr).is_none() => return,
            TxStatus::NoAck => {}
            TxStatus::Ok => {
                if !self.add_neighbor(host, addr, InsertReason::LinkStats) {
                    return;
                }
            }
        }
        if let Some(n) = self.neighbors.get_mut(&addr) {
            n.stats
                .get_or_insert_with(LinkStats::new)
                .record_transmit(now, status, attempts);
        }
    }

    /// Link layer feedback on a packet received from `addr` with signal strength `rssi`, in dBm.
    pub fn link_received<H: Host>(&mut self, host: &mut H, addr: LinkAddr, rssi: i16) {
        let now = host.now();
        if !self.add_neighbor(host, addr, InsertReason::LinkStats) {
            return;
        }
        let smoothing = self.config.rssi_smoothing;
        if let Some(n) = self.neighbors.get_mut(&addr) {
            n.stats
                .get_or_insert_with(LinkStats::new)
                .record_receive(now, rssi, smoothing);
        }
    }

    /// Forget every link estimate. Parents stay known, but are stale until traffic with them
    /// resumes.
    pub fn reset_link_stats(&mut self) {
        info!("Resetting link statistics");
        self.neighbors.reset_link_stats();
    }

    /// Checks if this node can route upwards: it is a root, or joined a DAG through a preferred
    /// parent.
    pub fn has_joined(&self) -> bool {
        self.instances.iter().any(|inst| {
            inst.is_root()
                || inst
                    .current_dag()
                    .is_some_and(|dag| dag.joined && dag.preferred_parent.is_some())
        })
    }

    /// Checks if this node is reachable from the root: it is a root, or a parent accepted its
    /// registration.
    pub fn has_downward_route(&self) -> bool {
        self.instances
            .iter()
            .any(|inst| inst.is_root() || inst.has_downward_route)
    }

    /// The joined DAG whose id shares the announced prefix with `addr`. Without an announced
    /// prefix, any joined DAG matches.
    pub fn dag_for_address(&self, addr: Ipv6Addr) -> Option<DagInfo> {
        self.instances.iter().find_map(|inst| {
            inst.dags()
                .find(|(_, dag)| {
                    let len = dag.prefix.map_or(0, |p| p.prefix.prefix_len());
                    dag.joined
                        && Ipv6Net::new(dag.id, len).is_ok_and(|net| net.contains(&addr))
                })
                .map(|(_, dag)| dag.info(inst.id))
        })
    }

    /// The current DAG of the first instance which joined one.
    pub fn any_dag(&self) -> Option<DagInfo> {
        self.instances.iter().find_map(|inst| {
            inst.current_dag()
                .filter(|dag| dag.joined)
                .map(|dag| dag.info(inst.id))
        })
    }

    /// Snapshots of all instances.
    pub fn instance_info(&self) -> Vec<InstanceInfo> {
        self.instances.iter().map(Instance::info).collect()
    }

    /// The DIO this node currently advertises in an instance.
    pub fn dio(&self, instance_id: u8) -> Option<DioMessage> {
        self.build_dio(instance_id)
    }

    /// Diagnostics of every candidate parent.
    pub fn neighbor_report(&self, now: Instant) -> Vec<NeighborReport> {
        self.neighbors
            .iter()
            .filter_map(|n| {
                let c = self.neighbors.candidate(&n.addr())?;
                let inst = find(&self.instances, c.parent.dag.instance)?;
                let dag = inst.dag(c.parent.dag.slot)?;
                let ctx = inst.context(c.parent.dag.slot, now);
                Some(NeighborReport {
                    addr: c.addr,
                    instance_id: inst.id,
                    dag_id: dag.id,
                    rank: c.parent.rank,
                    link_cost: inst.of.link_cost(&ctx, &c),
                    rank_via: inst.of.rank_via(&ctx, &c),
                    fresh: inst.is_fresh(c.stats, now),
                    preferred: dag.preferred_parent == Some(c.addr),
                    etx: c.stats.map(LinkStats::etx),
                    rssi: c
                        .stats
                        .and_then(|s| s.rssi().newest())
                        .map(|s| crate::fixmath::to_int(s.rssi)),
                    last_tx_secs: c
                        .stats
                        .and_then(LinkStats::last_tx)
                        .map(|t| now.saturating_duration_since(t).as_secs()),
                })
            })
            .collect()
    }

    /// Allocate a DAG in instance `id`, allocating the instance first if needed.
    fn alloc_dag<H: Host>(
        &mut self,
        host: &mut H,
        id: u8,
        dag_id: Ipv6Addr,
        of: &SharedObjective,
    ) -> Result<usize, Error> {
        if find(&self.instances, id).is_none() {
            if self.instances.len() >= self.config.max_instances {
                warn!(instance = id, "No free instance slot");
                self.metrics.memory_overflow();
                return Err(Error::InstanceTableFull);
            }
            self.instances
                .push(Instance::new(id, of.clone(), &self.config));
            if self.config.probing {
                let delay = crate::probing::delay(self.config.probing_interval(), &mut self.rng);
                host.schedule(TimerId::Probing(id), delay);
            }
        }

        let Some(inst) = find_mut(&mut self.instances, id) else {
            return Err(Error::UnknownInstance(id));
        };
        match inst.alloc_dag(dag_id) {
            Some(slot) => Ok(slot),
            None => {
                warn!(instance = id, dag = %dag_id, "No free DAG slot");
                self.metrics.memory_overflow();
                Err(Error::DagTableFull)
            }
        }
    }

    /// Release a DAG: withdraw what was installed for it, drop its parents and free the slot.
    fn free_dag<H: Host>(&mut self, host: &mut H, r: DagRef) {
        let Some(inst) = find_mut(&mut self.instances, r.instance) else {
            return;
        };
        let storing = inst.mop.is_storing();
        let Some(dag) = inst.dags.get_mut(r.slot).and_then(Option::take) else {
            return;
        };
        if inst.current == Some(r.slot) {
            inst.current = None;
        }

        if dag.joined {
            info!(instance = r.instance, dag = %dag.id, "Leaving the DAG");
            if storing {
                host.withdraw_routes(Withdraw::Dag(dag.id));
            }
            if let Some(prefix) = dag.prefix.filter(|p| p.autonomous) {
                check_prefix(host, Some(prefix), None);
            }
            self.metrics.dag_left();
        }
        if let Some(pp) = dag.preferred_parent {
            self.neighbors.unlock(&pp);
        }

        let parents: Vec<LinkAddr> = self.neighbors.candidates(r).map(|c| c.addr).collect();
        for addr in parents {
            self.forget_parent(r.instance, addr);
        }
    }

    fn free_instance<H: Host>(&mut self, host: &mut H, id: u8) {
        let Some(inst) = find(&self.instances, id) else {
            return;
        };
        info!(instance = id, "Leaving the instance");
        for slot in inst.dag_slots() {
            self.free_dag(host, DagRef { instance: id, slot });
        }
        self.clear_default_route(host, id);
        for timer in [
            TimerId::Dio(id),
            TimerId::Dao(id),
            TimerId::DaoLifetime(id),
            TimerId::Probing(id),
            TimerId::UnicastDio(id),
        ] {
            host.cancel(timer);
        }
        self.instances.retain(|inst| inst.id != id);
    }

    /// Drop the parent record of `addr` without any further action.
    fn forget_parent(&mut self, instance_id: u8, addr: LinkAddr) {
        self.neighbors.remove_parent(&addr);
        if let Some(inst) = find_mut(&mut self.instances, instance_id) {
            if inst.urgent_probe == Some(addr) {
                inst.urgent_probe = None;
            }
        }
    }

    /// Ensure `addr` is in the neighbor table, releasing the neighbor evicted for it if any.
    fn add_neighbor<H: Host>(&mut self, host: &mut H, addr: LinkAddr, reason: InsertReason) -> bool {
        match self.neighbors.insert(addr, reason) {
            Ok(None) => true,
            Ok(Some(evicted)) => {
                self.release_evicted(host, evicted);
                true
            }
            Err(err) => {
                warn!(neighbor = %addr, ?reason, %err, "Could not add neighbor");
                self.metrics.memory_overflow();
                false
            }
        }
    }

    fn release_evicted<H: Host>(&mut self, host: &mut H, evicted: Neighbor) {
        let Some(parent) = evicted.parent() else {
            return;
        };
        let r = parent.dag();
        debug!(neighbor = %evicted.addr(), "Evicted a candidate parent");
        self.nullify_parent(host, r, evicted.addr());
        if let Some(inst) = find_mut(&mut self.instances, r.instance) {
            if inst.urgent_probe == Some(evicted.addr()) {
                inst.urgent_probe = None;
            }
        }
    }

    /// Install or replace the announced prefix of a DAG, reconfiguring our address if we are not
    /// the root.
    fn install_prefix<H: Host>(&mut self, host: &mut H, r: DagRef, prefix: PrefixInfo) {
        let Some(inst) = find_mut(&mut self.instances, r.instance) else {
            return;
        };
        let root_rank = inst.root_rank();
        let Some(dag) = inst.dag_mut(r.slot) else {
            return;
        };
        let last = dag.prefix.replace(prefix);
        if dag.rank != root_rank {
            check_prefix(host, last, Some(prefix));
        }
    }

    fn set_default_route<H: Host>(&mut self, host: &mut H, id: u8, via: LinkAddr) {
        let infinite = self.config.default_route_infinite_lifetime;
        let Some(inst) = find_mut(&mut self.instances, id) else {
            return;
        };
        let lifetime = if infinite {
            None
        } else {
            inst.route_lifetime(inst.default_lifetime)
        };
        host.set_default_route(id, via, lifetime);
        inst.default_route = Some(via);
    }

    fn clear_default_route<H: Host>(&mut self, host: &mut H, id: u8) {
        let Some(inst) = find_mut(&mut self.instances, id) else {
            return;
        };
        if let Some(via) = inst.default_route.take() {
            debug!(instance = id, %via, "Removing default route");
            host.clear_default_route(id);
        }
    }

    /// Refresh the metric container advertised in the current DAG of an instance.
    fn update_metric_container(&mut self, id: u8, now: Instant) {
        let Some(inst) = find_mut(&mut self.instances, id) else {
            return;
        };
        let Some(slot) = inst.current else {
            return;
        };
        let ctx = inst.context(slot, now);
        let is_root = inst.is_root();
        let Some((rank, pp)) = inst.dag(slot).map(|dag| (dag.rank, dag.preferred_parent)) else {
            return;
        };
        let preferred = pp.and_then(|pp| self.neighbors.candidate(&pp));
        let mc = inst
            .of
            .metric_container(&ctx, is_root, rank, preferred.as_ref());
        inst.mc = mc;
    }

    /// Our rank through `addr`, infinite if it is not a parent.
    fn rank_via(&self, addr: &LinkAddr, now: Instant) -> Rank {
        let Some(c) = self.neighbors.candidate(addr) else {
            return Rank::infinite();
        };
        let Some(inst) = find(&self.instances, c.parent.dag.instance) else {
            return Rank::infinite();
        };
        inst.of.rank_via(&inst.context(c.parent.dag.slot, now), &c)
    }

    fn build_dio(&self, id: u8) -> Option<DioMessage> {
        let inst = find(&self.instances, id)?;
        let dag = inst.current_dag()?;
        let rank = if self.config.mode == NodeMode::Leaf {
            Rank::infinite()
        } else {
            dag.rank
        };
        Some(DioMessage {
            instance_id: id,
            dag_id: dag.id,
            version: dag.version,
            rank,
            grounded: dag.grounded,
            mop: inst.mop.code(),
            preference: dag.preference,
            dtsn: inst.dtsn_out,
            ocp: inst.of.ocp(),
            interval_min: inst.trickle.interval_min(),
            interval_doublings: inst.trickle.doublings(),
            redundancy: inst.trickle.redundancy(),
            max_rank_increase: inst.max_rank_increase,
            min_hop_rank_increase: inst.min_hop_rank_increase,
            default_lifetime: inst.default_lifetime,
            lifetime_unit: inst.lifetime_unit,
            mc: inst.mc,
            prefix: dag.prefix,
            remote_signal: None,
        })
    }

    /// Send a DAO for the DAG of `r` to `to`. A zero `lifetime` withdraws our route.
    fn send_dao<H: Host>(&mut self, host: &mut H, r: DagRef, to: LinkAddr, lifetime: u8) {
        let Some(inst) = find_mut(&mut self.instances, r.instance) else {
            return;
        };
        let Some(dag_id) = inst.dag(r.slot).map(|dag| dag.id) else {
            return;
        };
        inst.dao_sequence.increment();
        let dao = DaoMessage {
            instance_id: r.instance,
            dag_id,
            sequence: inst.dao_sequence,
            lifetime,
        };
        debug!(
            instance = r.instance,
            parent = %to,
            sequence = %dao.sequence,
            lifetime,
            "Sending DAO"
        );
        host.send_dao(to, &dao);
        self.metrics.dao_sent(lifetime == 0);
    }
}

/// Diagnostics of a candidate parent.
#[derive(Debug, Clone, Serialize)]
pub struct NeighborReport {
    pub addr: LinkAddr,
    pub instance_id: u8,
    pub dag_id: Ipv6Addr,
    /// Rank advertised by the neighbor.
    pub rank: Rank,
    pub link_cost: u16,
    /// Our rank if the neighbor were our preferred parent.
    pub rank_via: Rank,
    pub fresh: bool,
    pub preferred: bool,
    pub etx: Option<u16>,
    pub rssi: Option<i32>,
    /// Seconds since the last transmission to the neighbor.
    pub last_tx_secs: Option<u64>,
}

fn find(instances: &[Instance], id: u8) -> Option<&Instance> {
    instances.iter().find(|inst| inst.id == id)
}

fn find_mut(instances: &mut [Instance], id: u8) -> Option<&mut Instance> {
    instances.iter_mut().find(|inst| inst.id == id)
}

/// Reconcile the autoconfigured address when the announced prefix changes from `last` to `new`.
fn check_prefix<H: Host>(host: &mut H, last: Option<PrefixInfo>, new: Option<PrefixInfo>) {
    if let (Some(last), Some(new)) = (&last, &new) {
        if last.same_as(new) {
            return;
        }
    }
    if let Some(last) = last.filter(|p| p.autonomous) {
        debug!(prefix = %last.prefix, "Removing autoconfigured address");
        host.remove_address(&last);
    }
    if let Some(new) = new.filter(|p| p.autonomous) {
        debug!(prefix = %new.prefix, "Adding autoconfigured address");
        host.add_address(&new);
    }
}
