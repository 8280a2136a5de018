//! Parent bookkeeping, and the selection of the preferred parent and the current DAG.

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{find, find_mut, Engine};
use crate::{
    addr::LinkAddr,
    config::ProbingPolicy,
    host::{Host, Withdraw},
    message::{DioMessage, Mop},
    metrics::Metrics,
    neighbor::InsertReason,
    of::Candidate,
    parent::{DagRef, Parent},
    probing,
    rank::Rank,
    timer::TimerId,
};

impl<M, R> Engine<M, R>
where
    M: Metrics,
    R: rand::Rng,
{
    /// Record `from` as a candidate parent in the DAG of `r`, with the values of its DIO.
    pub(super) fn add_parent<H: Host>(
        &mut self,
        host: &mut H,
        r: DagRef,
        from: LinkAddr,
        dio: &DioMessage,
    ) -> bool {
        if !self.add_neighbor(host, from, InsertReason::Dio) {
            return false;
        }
        let Some(n) = self.neighbors.get_mut(&from) else {
            return false;
        };
        n.parent = Some(Parent::new(r, dio.rank, dio.dtsn, dio.mc));
        debug!(
            instance = r.instance,
            parent = %from,
            rank = %dio.rank,
            "New candidate parent"
        );
        true
    }

    /// Nullify and then drop the parent record of `addr`.
    pub(super) fn remove_parent<H: Host>(&mut self, host: &mut H, addr: LinkAddr) {
        let Some(r) = self.neighbors.parent(&addr).map(Parent::dag) else {
            return;
        };
        debug!(instance = r.instance, parent = %addr, "Removing parent");
        self.nullify_parent(host, r, addr);

        // A DAG we are not joined to keeps its preferred parent on nullification.
        if let Some(dag) = self.dag(r) {
            if dag.preferred_parent == Some(addr) {
                self.set_preferred_parent(r, None);
            }
        }
        self.forget_parent(r.instance, addr);
    }

    /// Stop using `addr` in the DAG of `r`, keeping its parent record. If it was the preferred
    /// parent, or the DAG had none, our rank becomes infinite. In a joined DAG the default route
    /// through it is removed, and if it was preferred our route registration with it is withdrawn.
    pub(crate) fn nullify_parent<H: Host>(&mut self, host: &mut H, r: DagRef, addr: LinkAddr) {
        let Some(inst) = find_mut(&mut self.instances, r.instance) else {
            return;
        };
        let storing = inst.mop.is_storing();
        let routes_via_parent = inst.default_route == Some(addr);
        let Some(dag) = inst.dag_mut(r.slot) else {
            return;
        };
        let is_preferred = dag.preferred_parent == Some(addr);
        if !is_preferred && dag.preferred_parent.is_some() {
            return;
        }

        dag.rank = Rank::infinite();
        if !dag.joined {
            return;
        }
        debug!(instance = r.instance, parent = %addr, "Nullifying parent");
        if routes_via_parent {
            self.clear_default_route(host, r.instance);
        }
        if is_preferred {
            if storing {
                self.send_dao(host, r, addr, 0);
            }
            self.set_preferred_parent(r, None);
        }
    }

    /// Move the parent record of `addr` from the DAG of `src` to the DAG of `dst`.
    pub(super) fn move_parent<H: Host>(
        &mut self,
        host: &mut H,
        src: DagRef,
        dst: DagRef,
        addr: LinkAddr,
    ) {
        let Some(inst) = find_mut(&mut self.instances, src.instance) else {
            return;
        };
        let storing = inst.mop.is_storing();
        let routes_via_parent = inst.default_route == Some(addr);
        if let Some(dag) = inst.dag_mut(src.slot) {
            let joined = dag.joined;
            if dag.preferred_parent == Some(addr) {
                dag.rank = Rank::infinite();
                self.set_preferred_parent(src, None);
                if joined && routes_via_parent {
                    self.clear_default_route(host, src.instance);
                }
            } else if joined && storing {
                host.withdraw_routes(Withdraw::NextHop(addr));
            }
        }

        debug!(parent = %addr, from = src.slot, to = dst.slot, "Moving parent to another DAG");
        if let Some(p) = self.neighbors.parent_mut(&addr) {
            p.dag = dst;
        }
    }

    /// Change the preferred parent of a DAG, moving the neighbor table lock along.
    pub(super) fn set_preferred_parent(&mut self, r: DagRef, new: Option<LinkAddr>) {
        let Some(dag) = find_mut(&mut self.instances, r.instance).and_then(|i| i.dag_mut(r.slot))
        else {
            return;
        };
        let old = dag.preferred_parent;
        if old == new {
            return;
        }
        dag.preferred_parent = new;
        let dag_id = dag.id;

        if let Some(new) = new {
            self.neighbors.lock(&new);
        }
        if let Some(old) = old {
            self.neighbors.unlock(&old);
        }

        match (old, new) {
            (Some(old), Some(new)) => {
                info!(instance = r.instance, dag = %dag_id, %old, %new, "Preferred parent changed")
            }
            (None, Some(new)) => {
                info!(instance = r.instance, dag = %dag_id, %new, "Preferred parent selected")
            }
            (Some(old), None) => {
                info!(instance = r.instance, dag = %dag_id, %old, "Preferred parent lost")
            }
            (None, None) => {}
        }
        self.metrics.parent_switch();
    }

    /// Checks if `c` may be considered as parent in the DAG of `r`.
    fn keep_candidate(&self, r: DagRef, c: &Candidate<'_>, now: Instant, fresh_only: bool) -> bool {
        let Some(inst) = find(&self.instances, r.instance) else {
            return false;
        };
        if c.parent.dag != r || c.parent.rank.is_infinite() {
            return false;
        }
        if c.parent.rank < inst.root_rank() {
            warn!(parent = %c.addr, rank = %c.parent.rank, "Parent advertises a rank below the root rank");
            return false;
        }
        !fresh_only || inst.is_fresh(c.stats, now)
    }

    /// The best parent of the DAG of `r`, according to the objective function.
    fn best_parent(&self, r: DagRef, now: Instant, fresh_only: bool) -> Option<LinkAddr> {
        let inst = find(&self.instances, r.instance)?;
        let dag = inst.dag(r.slot)?;
        let ctx = inst.context(r.slot, now);

        if inst.of.keeps_acceptable_preferred() {
            let preferred = dag
                .preferred_parent
                .and_then(|pp| self.neighbors.candidate(&pp))
                .filter(|c| self.keep_candidate(r, c, now, fresh_only));
            if let Some(c) = preferred {
                if inst.of.is_acceptable(&ctx, &c).unwrap_or(true) {
                    return Some(c.addr);
                }
            }
        }

        self.neighbors
            .candidates(r)
            .filter(|c| self.keep_candidate(r, c, now, fresh_only))
            .fold(None, |best, c| inst.of.best_parent(&ctx, best, Some(c)))
            .map(|c| c.addr)
    }

    /// Pick the preferred parent of the DAG of `r` and update our rank in it. Stale estimates
    /// are avoided when a fresh alternative exists, and the best stale candidate is probed.
    pub(super) fn select_parent<H: Host>(&mut self, host: &mut H, r: DagRef) -> Option<LinkAddr> {
        let now = host.now();
        let preferred = match self.best_parent(r, now, false) {
            None => None,
            Some(best) => {
                let inst = find_mut(&mut self.instances, r.instance)?;
                if inst.is_fresh(self.neighbors.stats(&best), now) {
                    inst.urgent_probe = None;
                    Some(best)
                } else {
                    let fresh = self.best_parent(r, now, true);
                    let recently_probed = self
                        .neighbors
                        .stats(&best)
                        .is_some_and(|s| s.recently_probed(now));
                    let needs_probe = self.config.probing
                        && (self.config.probing_policy == ProbingPolicy::Standard
                            || !recently_probed);
                    if needs_probe {
                        if let Some(inst) = find_mut(&mut self.instances, r.instance) {
                            inst.urgent_probe = Some(best);
                        }
                        let delay = probing::urgent_delay(&mut self.rng);
                        host.schedule(TimerId::Probing(r.instance), delay);
                    }
                    Some(fresh.unwrap_or(best))
                }
            }
        };

        self.set_preferred_parent(r, preferred);
        let rank = preferred.map_or(Rank::infinite(), |pp| self.rank_via(&pp, now));
        if let Some(dag) = self.dag_mut(r) {
            dag.rank = rank;
        }
        preferred
    }

    /// Run parent selection for the DAG of `parent`, then pick the best DAG of the instance.
    /// Returns the slot of the current DAG, or `None` if no DAG is usable.
    pub(super) fn select_dag<H: Host>(&mut self, host: &mut H, id: u8, parent: LinkAddr) -> Option<usize> {
        let now = host.now();
        let r = self.neighbors.parent(&parent).map(Parent::dag)?;
        let inst = find(&self.instances, id)?;
        let old_slot = inst.current;
        let (old_rank, last_parent) = inst
            .current_dag()
            .map_or((Rank::infinite(), None), |dag| (dag.rank, dag.preferred_parent));

        if !inst.is_root() {
            self.select_parent(host, r);
        }

        let inst = find(&self.instances, id)?;
        let mut best: Option<usize> = None;
        for (slot, dag) in inst.dags() {
            let reachable = dag
                .preferred_parent
                .and_then(|pp| self.neighbors.parent(&pp))
                .is_some_and(|p| !p.rank.is_infinite());
            if !reachable {
                continue;
            }
            best = Some(match best.and_then(|b| inst.dag(b)) {
                None => slot,
                Some(current_best) => {
                    if inst.of.best_dag(current_best, dag).id == dag.id {
                        slot
                    } else {
                        best.unwrap_or(slot)
                    }
                }
            });
        }
        let best = best?;

        let storing = inst.mop.is_storing();
        let mop = inst.mop;
        if old_slot != Some(best) {
            let old = old_slot.and_then(|slot| inst.dag(slot));
            let old_prefix = old.and_then(|dag| dag.prefix);
            let new_prefix = inst.dag(best).and_then(|dag| dag.prefix);
            let old_id = old.map(|dag| dag.id);
            if let (true, Some(old_id)) = (storing, old_id) {
                host.withdraw_routes(Withdraw::Dag(old_id));
            }
            if new_prefix.is_some_and(|p| p.autonomous) {
                super::check_prefix(host, old_prefix, new_prefix);
            } else if old_prefix.is_some_and(|p| p.autonomous) {
                super::check_prefix(host, old_prefix, None);
            }

            let inst = find_mut(&mut self.instances, id)?;
            if let Some(dag) = inst.dag_mut(best) {
                dag.joined = true;
                info!(instance = id, dag = %dag.id, "New preferred DAG");
            }
            if let Some(old) = old_slot.and_then(|slot| inst.dag_mut(slot)) {
                old.joined = false;
            }
            inst.current = Some(best);
        }

        self.update_metric_container(id, now);
        let inst = find(&self.instances, id)?;
        let dag = inst.dag(best)?;
        let pp = dag.preferred_parent;
        let rank = pp.map_or(Rank::infinite(), |pp| self.rank_via(&pp, now));
        let r = DagRef {
            instance: id,
            slot: best,
        };
        let (max_inc, min_hop) = (inst.max_rank_increase, inst.min_hop_rank_increase);

        let dag = self.dag_mut(r)?;
        dag.rank = rank;
        if last_parent.is_none() || rank < dag.min_rank {
            dag.min_rank = rank;
        }
        if !rank.is_acceptable(dag.min_rank, max_inc, min_hop) {
            warn!(instance = id, %rank, min_rank = %dag.min_rank, "New rank unacceptable");
            self.set_preferred_parent(r, None);
            if let (true, Some(last_parent)) = (storing, last_parent) {
                self.send_dao(host, r, last_parent, 0);
            }
            return None;
        }

        if pp != last_parent {
            if let Some(pp) = pp {
                self.set_default_route(host, id, pp);
            }
            info!(instance = id, from = %old_rank, to = %rank, "Rank changed with new preferred parent");
            if storing {
                if let Some(last_parent) = last_parent {
                    self.send_dao(host, r, last_parent, 0);
                }
                if let Some(inst) = find_mut(&mut self.instances, id) {
                    inst.dtsn_out.increment();
                }
            }
            if mop != Mop::NoDownwardRoutes {
                self.schedule_dao(host, id);
            }
            self.reset_dio_timer(host, id);
        } else if rank != old_rank {
            debug!(instance = id, from = %old_rank, to = %rank, "Rank changed");
        }

        Some(best)
    }

    /// React to new information about `parent`: check its rank is acceptable and rerun parent
    /// and DAG selection. Returns `false` if the parent was rejected, or all parents were lost.
    pub(super) fn process_parent_event<H: Host>(&mut self, host: &mut H, id: u8, parent: LinkAddr) -> bool {
        let now = host.now();
        let Some(r) = self.neighbors.parent(&parent).map(Parent::dag) else {
            return false;
        };
        let Some(inst) = find(&self.instances, id) else {
            return false;
        };
        let last_parent = inst.current_dag().and_then(|dag| dag.preferred_parent);

        if inst.mop.is_storing() && host.is_next_hop(parent) {
            let reachable = self.neighbors.candidate(&parent).is_some_and(|c| {
                !inst.is_fresh(c.stats, now)
                    || inst.of.has_usable_link(&inst.context(r.slot, now), &c)
            });
            if !reachable {
                debug!(instance = id, %parent, "Parent unreachable, withdrawing routes through it");
                host.withdraw_routes(Withdraw::NextHop(parent));
            }
        }

        let mut accepted = true;
        let rank = self.rank_via(&parent, now);
        let acceptable = self.dag(r).is_some_and(|dag| {
            rank.is_acceptable(dag.min_rank, inst.max_rank_increase, inst.min_hop_rank_increase)
        });
        if !acceptable {
            warn!(
                instance = id,
                %parent,
                %rank,
                min_rank = %self.dag(r).map_or(Rank::infinite(), |dag| dag.min_rank),
                max_rank_increase = inst.max_rank_increase,
                "Unacceptable rank"
            );
            self.nullify_parent(host, r, parent);
            // Not a candidate again until it advertises a new rank.
            if let Some(p) = self.neighbors.parent_mut(&parent) {
                p.rank = Rank::infinite();
            }
            if last_parent != Some(parent) {
                return false;
            }
            accepted = false;
        }

        if self.select_dag(host, id, parent).is_none() && last_parent.is_some() {
            error!(instance = id, "No parents found in any DAG");
            self.local_repair(host, id);
            return false;
        }

        accepted
    }

    /// Forget our position in every DAG of the instance after losing all parents, and advertise
    /// it quickly.
    pub(super) fn local_repair<H: Host>(&mut self, host: &mut H, id: u8) {
        let Some(inst) = find_mut(&mut self.instances, id) else {
            return;
        };
        info!(instance = id, "Starting a local instance repair");
        let slots = inst.dag_slots();
        for &slot in &slots {
            if let Some(dag) = inst.dag_mut(slot) {
                dag.rank = Rank::infinite();
            }
        }
        for slot in slots {
            let r = DagRef { instance: id, slot };
            let parents: Vec<LinkAddr> = self.neighbors.candidates(r).map(|c| c.addr).collect();
            for addr in parents {
                self.nullify_parent(host, r, addr);
            }
        }

        let Some(inst) = find_mut(&mut self.instances, id) else {
            return;
        };
        inst.has_downward_route = false;
        if inst.dao_pending {
            debug!(instance = id, "Dropping the pending DAO");
            inst.dao_pending = false;
            host.cancel(TimerId::Dao(id));
        }
        if inst.mop.is_storing() {
            inst.dtsn_out.increment();
        }
        self.reset_dio_timer(host, id);
        self.metrics.local_repair();
    }

    /// Rerun the parent event of every parent which advertised new information since the last
    /// periodic tick.
    pub(super) fn recalculate_ranks<H: Host>(&mut self, host: &mut H) {
        let updated: Vec<(LinkAddr, u8)> = self
            .neighbors
            .iter()
            .filter_map(|n| {
                n.parent()
                    .filter(|p| p.updated)
                    .map(|p| (n.addr(), p.dag().instance))
            })
            .collect();
        if updated.is_empty() {
            return;
        }

        for &(addr, id) in &updated {
            if let Some(p) = self.neighbors.parent_mut(&addr) {
                p.updated = false;
            }
            if !self.process_parent_event(host, id, addr) {
                debug!(instance = id, parent = %addr, "Parent dropped while recalculating ranks");
            }
        }
        self.metrics.ranks_recalculated(updated.len());
    }

    pub(super) fn dag(&self, r: DagRef) -> Option<&crate::dag::Dag> {
        find(&self.instances, r.instance).and_then(|inst| inst.dag(r.slot))
    }

    pub(super) fn dag_mut(&mut self, r: DagRef) -> Option<&mut crate::dag::Dag> {
        find_mut(&mut self.instances, r.instance).and_then(|inst| inst.dag_mut(r.slot))
    }
}
