//! Processing of received DIOs: joining instances, adding DAGs and following version changes.

use tracing::{debug, error, info, warn};

use super::{check_prefix, find, find_mut, Engine};
use crate::{
    addr::LinkAddr,
    host::Host,
    lollipop::Lollipop,
    message::{DioMessage, Mop},
    metrics::Metrics,
    neighbor::InsertReason,
    parent::{DagRef, Parent},
    rank::Rank,
};

impl<M, R> Engine<M, R>
where
    M: Metrics,
    R: rand::Rng,
{
    /// Handle a DIO received from `from`.
    pub fn process_dio<H: Host>(&mut self, host: &mut H, from: LinkAddr, dio: &DioMessage) {
        if Mop::from_code(dio.mop) != Some(self.config.mop) {
            warn!(neighbor = %from, mop = dio.mop, "Ignoring DIO with unsupported mode of operation");
            self.metrics.dio_ignored();
            return;
        }

        let id = dio.instance_id;
        let Some(inst) = find(&self.instances, id) else {
            info!(instance = id, dag = %dio.dag_id, neighbor = %from, "New instance detected, joining");
            self.join_instance(host, from, dio);
            return;
        };
        let root_rank = inst.root_rank();
        let known = inst.find_dag(dio.dag_id);

        if let Some(slot) = known {
            let r = DagRef { instance: id, slot };
            let Some((version, rank, joined)) =
                inst.dag(slot).map(|dag| (dag.version, dag.rank, dag.joined))
            else {
                return;
            };

            if dio.version.gt(&version) {
                if rank == root_rank {
                    warn!(
                        instance = id,
                        current = %version,
                        received = %dio.version,
                        "Root received inconsistent DIO version"
                    );
                    if let Some(dag) = self.dag_mut(r) {
                        dag.version = dio.version.next();
                    }
                    self.reset_dio_timer(host, id);
                } else {
                    if let Some(prefix) = dio.prefix.filter(|p| p.autonomous) {
                        self.install_prefix(host, r, prefix);
                    }
                    self.global_repair(host, r, from, dio);
                }
                self.metrics.dio_processed();
                return;
            }

            if version.gt(&dio.version) {
                warn!(
                    instance = id,
                    neighbor = %from,
                    current = %version,
                    received = %dio.version,
                    "Neighbor advertises an old DAG version"
                );
                if joined {
                    self.reset_dio_timer(host, id);
                    self.metrics.dio_processed();
                } else {
                    self.metrics.dio_ignored();
                }
                return;
            }
        }

        let Some(inst) = find(&self.instances, id) else {
            return;
        };
        if inst.is_root() && inst.current != known {
            debug!(instance = id, dag = %dio.dag_id, "Root ignoring DIO of another DAG");
            self.metrics.dio_ignored();
            return;
        }

        let slot = match known {
            Some(slot) => slot,
            None if inst.current.is_none() => {
                info!(instance = id, dag = %dio.dag_id, neighbor = %from, "Joining a DAG of a known instance");
                self.join_instance(host, from, dio);
                return;
            }
            None if self.config.max_dags_per_instance <= 1 => {
                debug!(instance = id, dag = %dio.dag_id, "Ignoring DIO of another DAG, only one DAG per instance");
                self.metrics.dio_ignored();
                return;
            }
            None => match self.add_dag(host, from, dio) {
                Some(slot) => slot,
                None => {
                    warn!(instance = id, dag = %dio.dag_id, "Failed to add DAG");
                    self.metrics.dio_ignored();
                    return;
                }
            },
        };
        let r = DagRef { instance: id, slot };

        if dio.rank < root_rank {
            info!(neighbor = %from, rank = %dio.rank, "Ignoring DIO with too low rank");
            self.metrics.dio_ignored();
            return;
        }

        if let Some(prefix) = dio.prefix.filter(|p| p.autonomous) {
            self.install_prefix(host, r, prefix);
        }

        if !self.add_neighbor(host, from, InsertReason::Dio) {
            warn!(neighbor = %from, "Could not add parent based on DIO");
            self.metrics.dio_ignored();
            return;
        }

        let factor = self.config.dag_lifetime_factor;
        let Some(inst) = find_mut(&mut self.instances, id) else {
            return;
        };
        let lifetime = inst.dag_lifetime(factor);
        let Some((rank, joined)) = inst.dag(slot).map(|dag| (dag.rank, dag.joined)) else {
            return;
        };
        if rank == root_rank {
            if !dio.rank.is_infinite() {
                inst.trickle.hear_consistent();
            }
            self.metrics.dio_processed();
            return;
        }
        if let Some(dag) = inst.dag_mut(slot) {
            dag.lifetime = lifetime;
        }
        debug!(instance = id, dag = %dio.dag_id, lifetime, "Refreshed DAG lifetime");

        match self.neighbors.parent(&from).map(|p| (p.dag(), p.rank())) {
            Some((dag, rank)) if dag == r => {
                if rank == dio.rank {
                    debug!(neighbor = %from, "Received consistent DIO");
                    if joined {
                        if let Some(inst) = find_mut(&mut self.instances, id) {
                            inst.trickle.hear_consistent();
                        }
                    }
                }
            }
            Some((dag, _)) => self.move_parent(host, dag, r, from),
            None => {
                if !self.add_parent(host, r, from, dio) {
                    warn!(neighbor = %from, "Failed to add a new parent");
                    self.metrics.dio_ignored();
                    return;
                }
            }
        }

        let now = host.now();
        if let Some(p) = self.neighbors.parent_mut(&from) {
            p.rank = dio.rank;
            p.mc = dio.mc;
            p.updated = true;
        }
        let preferred = self.dag(r).and_then(|dag| dag.preferred_parent);
        if dio.rank.is_infinite() && preferred == Some(from) {
            debug!(instance = id, parent = %from, "Preferred parent advertises an infinite rank");
            self.reset_dio_timer(host, id);
        }
        if let Some(signal) = dio.remote_signal {
            if let Some(stats) = self.neighbors.get_mut(&from).and_then(|n| n.stats.as_mut()) {
                stats.record_remote_signal(now, signal.rssi, signal.age);
            }
        }

        if let Some(dag) = find(&self.instances, id).and_then(|inst| inst.current_dag()) {
            debug!(
                instance = id,
                dag = %dag.id,
                rank = %dag.rank,
                min_rank = %dag.min_rank,
                parent_rank = %dio.rank,
                "Processing DIO from candidate parent"
            );
        }
        self.metrics.dio_processed();

        if !self.process_parent_event(host, id, from) {
            warn!(instance = id, parent = %from, "Candidate parent rejected");
            return;
        }

        let Some(inst) = find(&self.instances, id) else {
            return;
        };
        let is_joined_preferred = inst
            .dag(slot)
            .is_some_and(|dag| dag.joined && dag.preferred_parent == Some(from));
        if is_joined_preferred {
            let last_dtsn = self.neighbors.parent(&from).map(Parent::dtsn);
            let refresh = inst.mop != Mop::NoDownwardRoutes
                && last_dtsn.is_some_and(|last| dio.dtsn.gt(&last));
            if refresh {
                debug!(instance = id, parent = %from, dtsn = %dio.dtsn, "Parent requests new DAOs");
                if let Some(inst) = find_mut(&mut self.instances, id) {
                    inst.dtsn_out.increment();
                }
                self.schedule_dao(host, id);
            }
            self.set_default_route(host, id, from);
        }
        if let Some(p) = self.neighbors.parent_mut(&from) {
            p.dtsn = dio.dtsn;
        }
    }

    /// Join the instance of `dio`, with its sender as preferred parent.
    fn join_instance<H: Host>(&mut self, host: &mut H, from: LinkAddr, dio: &DioMessage) {
        let id = dio.instance_id;
        if dio.rank.is_infinite() {
            debug!(instance = id, neighbor = %from, "Not joining through a neighbor with infinite rank");
            self.metrics.dio_ignored();
            return;
        }
        let Some(of) = self.objectives.find(dio.ocp) else {
            warn!(instance = id, ocp = dio.ocp, "DIO does not advertise a supported objective function");
            self.metrics.dio_ignored();
            return;
        };
        let Ok(slot) = self.alloc_dag(host, id, dio.dag_id, &of) else {
            error!(instance = id, dag = %dio.dag_id, "Failed to allocate a DAG");
            self.metrics.dio_ignored();
            return;
        };
        let r = DagRef { instance: id, slot };

        if !self.add_parent(host, r, from, dio) {
            warn!(instance = id, neighbor = %from, "Not joining since we could not add a parent");
            self.free_dag(host, r);
            if find(&self.instances, id).is_some_and(|inst| inst.dags().next().is_none()) {
                self.free_instance(host, id);
            }
            self.metrics.dio_ignored();
            return;
        }

        if let Some(prefix) = dio.prefix.filter(|p| p.autonomous) {
            check_prefix(host, None, Some(prefix));
        }

        let now = host.now();
        let factor = self.config.dag_lifetime_factor;
        let fallback_mop = self.config.mop;
        let Some(inst) = find_mut(&mut self.instances, id) else {
            return;
        };
        inst.of = of.clone();
        inst.mop = Mop::from_code(dio.mop).unwrap_or(fallback_mop);
        inst.mc_type = dio.mc.mc_type();
        inst.current = Some(slot);
        inst.dtsn_out = Lollipop::new();
        inst.configure_from_dio(dio);
        let lifetime = inst.dag_lifetime(factor);
        let mop = inst.mop;
        if let Some(dag) = inst.dag_mut(slot) {
            dag.joined = true;
            dag.preference = dio.preference;
            dag.grounded = dio.grounded;
            dag.version = dio.version;
            dag.prefix = dio.prefix;
            dag.lifetime = lifetime;
        }

        self.set_preferred_parent(r, Some(from));
        self.update_metric_container(id, now);
        let rank = self.rank_via(&from, now);
        if let Some(dag) = self.dag_mut(r) {
            dag.rank = rank;
            dag.min_rank = rank;
        }

        info!(
            instance = id,
            dag = %dio.dag_id,
            %rank,
            parent = %from,
            objective = of.name(),
            "Joined DAG"
        );
        self.metrics.dag_joined();
        self.metrics.dio_processed();

        self.restart_dio_timer(host, id);
        self.set_default_route(host, id, from);
        if mop != Mop::NoDownwardRoutes {
            self.schedule_dao(host, id);
        } else {
            debug!(instance = id, "No downward routes in this instance, not sending DAOs");
        }
        of.reset(dio.dag_id);
    }

    /// Add the DAG of `dio` to its known instance, with its sender as preferred parent. Returns
    /// the slot of the new DAG.
    fn add_dag<H: Host>(&mut self, host: &mut H, from: LinkAddr, dio: &DioMessage) -> Option<usize> {
        let id = dio.instance_id;
        let inst = find_mut(&mut self.instances, id)?;
        let Some(slot) = inst.alloc_dag(dio.dag_id) else {
            warn!(instance = id, dag = %dio.dag_id, "No free DAG slot");
            self.metrics.memory_overflow();
            return None;
        };
        let r = DagRef { instance: id, slot };

        match self.neighbors.parent(&from).map(Parent::dag) {
            Some(previous) => self.move_parent(host, previous, r, from),
            None => {
                if !self.add_parent(host, r, from, dio) {
                    self.release_slot(r);
                    return None;
                }
            }
        }
        if let Some(p) = self.neighbors.parent_mut(&from) {
            p.rank = dio.rank;
        }

        if !find(&self.instances, id)?.is_compatible(dio) {
            warn!(instance = id, dag = %dio.dag_id, "DIO incompatible with the parameters of the instance");
            self.remove_parent(host, from);
            self.release_slot(r);
            return None;
        }

        let now = host.now();
        let dag = self.dag_mut(r)?;
        dag.grounded = dio.grounded;
        dag.preference = dio.preference;
        dag.version = dio.version;
        dag.prefix = dio.prefix;

        self.set_preferred_parent(r, Some(from));
        let rank = self.rank_via(&from, now);
        if let Some(dag) = self.dag_mut(r) {
            dag.rank = rank;
            dag.min_rank = rank;
        }
        info!(instance = id, dag = %dio.dag_id, %rank, parent = %from, "Added DAG to instance");

        self.process_parent_event(host, id, from);
        if let Some(p) = self.neighbors.parent_mut(&from) {
            p.dtsn = dio.dtsn;
        }
        Some(slot)
    }

    /// Follow a new version of the DAG of `r` advertised by `from`: restart with `from` as the
    /// only parent.
    pub(super) fn global_repair<H: Host>(
        &mut self,
        host: &mut H,
        r: DagRef,
        from: LinkAddr,
        dio: &DioMessage,
    ) {
        let parents: Vec<LinkAddr> = self.neighbors.candidates(r).map(|c| c.addr).collect();
        for addr in parents {
            self.remove_parent(host, addr);
        }

        let now = host.now();
        let Some(inst) = find_mut(&mut self.instances, r.instance) else {
            return;
        };
        inst.configure_from_dio(dio);
        inst.dtsn_out.increment();
        let of = inst.of.clone();
        let Some(dag) = inst.dag_mut(r.slot) else {
            return;
        };
        dag.version = dio.version;
        dag.min_rank = Rank::infinite();
        of.reset(dag.id);

        if self.add_parent(host, r, from, dio) {
            let rank = self.rank_via(&from, now);
            if let Some(dag) = self.dag_mut(r) {
                dag.rank = rank;
                dag.min_rank = rank;
            }
            self.process_parent_event(host, r.instance, from);
        } else {
            error!(instance = r.instance, neighbor = %from, "Failed to add a parent during the global repair");
            if let Some(dag) = self.dag_mut(r) {
                dag.rank = Rank::infinite();
            }
        }

        if let Some(dag) = self.dag(r) {
            info!(
                instance = r.instance,
                dag = %dag.id,
                version = %dag.version,
                rank = %dag.rank,
                "Participating in a global repair"
            );
        }
        self.metrics.global_repair();
    }

    /// Free a DAG slot which was never joined.
    fn release_slot(&mut self, r: DagRef) {
        if let Some(slot) = find_mut(&mut self.instances, r.instance).and_then(|inst| inst.dags.get_mut(r.slot)) {
            *slot = None;
        }
    }
}
