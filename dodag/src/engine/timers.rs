//! Timer expiry handling: DIO trickle, DAO scheduling, probing and housekeeping.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::{find_mut, Engine};
use crate::{
    addr::LinkAddr,
    config::{NodeMode, INFINITE_LIFETIME},
    host::Host,
    link_stats::FRESHNESS_HALF_LIFE,
    message::{DioMessage, Mop, Probe, ProbeKind, RemoteSignal},
    metrics::Metrics,
    parent::DagRef,
    probing,
    timer::{Fired, TimerId, PERIODIC_INTERVAL},
};

/// Lifetime used to refresh DAOs when the advertised lifetime or its unit is zero.
const MIN_DAO_LIFETIME: Duration = Duration::from_millis(500);

impl<M, R> Engine<M, R>
where
    M: Metrics,
    R: rand::Rng,
{
    /// Handle the expiry of a timer previously armed through the host.
    pub fn handle_timer<H: Host>(&mut self, host: &mut H, timer: TimerId) {
        trace!(?timer, "Timer expired");
        match timer {
            TimerId::Dio(id) => self.dio_timer_expired(host, id),
            TimerId::Dao(id) => self.dao_timer_expired(host, id, false),
            TimerId::DaoLifetime(id) => self.dao_timer_expired(host, id, true),
            TimerId::Probing(id) => self.probing_timer_expired(host, id),
            TimerId::UnicastDio(id) => {
                let target = find_mut(&mut self.instances, id)
                    .and_then(|inst| inst.unicast_dio_target.take());
                if let Some(to) = target {
                    self.send_dio(host, id, Some(to));
                }
            }
            TimerId::Periodic => self.periodic(host),
            TimerId::LinkStatsDecay => self.decay_link_stats(host),
        }
    }

    /// Restart the trickle timer at its minimum interval, unless it already runs at it.
    pub(super) fn reset_dio_timer<H: Host>(&mut self, host: &mut H, id: u8) {
        if self.config.mode == NodeMode::Leaf {
            return;
        }
        let Some(inst) = find_mut(&mut self.instances, id) else {
            return;
        };
        if let Some(delay) = inst.trickle.reset(&mut self.rng) {
            debug!(instance = id, interval = ?inst.trickle.interval(), "Reset DIO timer");
            host.schedule(TimerId::Dio(id), delay);
            self.metrics.dio_timer_reset();
        }
    }

    /// Start the trickle timer at its minimum interval.
    pub(super) fn restart_dio_timer<H: Host>(&mut self, host: &mut H, id: u8) {
        if self.config.mode == NodeMode::Leaf {
            return;
        }
        let Some(inst) = find_mut(&mut self.instances, id) else {
            return;
        };
        let delay = inst.trickle.restart(&mut self.rng);
        debug!(instance = id, interval = ?inst.trickle.interval(), "Started DIO timer");
        host.schedule(TimerId::Dio(id), delay);
    }

    fn dio_timer_expired<H: Host>(&mut self, host: &mut H, id: u8) {
        let Some(inst) = find_mut(&mut self.instances, id) else {
            return;
        };
        let (fired, delay) = inst.trickle.fire(&mut self.rng);
        host.schedule(TimerId::Dio(id), delay);
        match fired {
            Fired::Transmit => self.send_dio(host, id, None),
            Fired::Suppress => {
                debug!(instance = id, heard = inst.trickle.counter(), "Suppressing DIO");
                self.metrics.dio_suppressed();
            }
            Fired::NewInterval => {
                trace!(instance = id, interval = ?inst.trickle.interval(), "New DIO interval");
            }
        }
    }

    /// The DIO to send to `to`, or to multicast if `None`. A unicast DIO echoes the signal
    /// strength at which we last heard `to`.
    fn prepare_dio(&mut self, id: u8, to: Option<LinkAddr>, now: Instant) -> Option<DioMessage> {
        self.update_metric_container(id, now);
        let mut dio = self.build_dio(id)?;
        if let Some(to) = to {
            dio.remote_signal = self
                .neighbors
                .stats(&to)
                .and_then(|stats| stats.rssi().newest())
                .map(|sample| RemoteSignal {
                    rssi: crate::fixmath::to_int(sample.rssi)
                        .clamp(i16::MIN as i32, i16::MAX as i32) as i16,
                    age: now.saturating_duration_since(sample.at),
                });
        }
        Some(dio)
    }

    pub(super) fn send_dio<H: Host>(&mut self, host: &mut H, id: u8, to: Option<LinkAddr>) {
        if to.is_none() && self.config.mode == NodeMode::Leaf {
            return;
        }
        let now = host.now();
        let Some(dio) = self.prepare_dio(id, to, now) else {
            debug!(instance = id, "No DAG to advertise");
            return;
        };
        match to {
            Some(to) => debug!(instance = id, %to, rank = %dio.rank, "Sending unicast DIO"),
            None => debug!(instance = id, rank = %dio.rank, "Sending multicast DIO"),
        }
        host.send_dio(to, &dio);
        self.metrics.dio_sent(to.is_some());
    }

    /// Schedule a DAO to the preferred parent after a random delay, unless one is pending.
    pub(super) fn schedule_dao<H: Host>(&mut self, host: &mut H, id: u8) {
        if self.config.mode == NodeMode::Feather {
            return;
        }
        let latency = self.config.dao_latency();
        let Some(inst) = find_mut(&mut self.instances, id) else {
            return;
        };
        if inst.mop == Mop::NoDownwardRoutes {
            return;
        }
        if inst.dao_pending {
            debug!(instance = id, "DAO already scheduled");
            return;
        }
        let delay = if latency.is_zero() {
            Duration::ZERO
        } else {
            latency / 2 + probing::uniform(latency, &mut self.rng)
        };
        inst.dao_pending = true;
        debug!(instance = id, ?delay, "Scheduling DAO");
        host.schedule(TimerId::Dao(id), delay);
        self.set_dao_lifetime_timer(host, id);
    }

    /// Arm the refresh of our registration, between half and three quarters of its lifetime.
    fn set_dao_lifetime_timer<H: Host>(&mut self, host: &mut H, id: u8) {
        if self.config.mode == NodeMode::Feather {
            return;
        }
        let Some(inst) = find_mut(&mut self.instances, id) else {
            return;
        };
        if inst.default_lifetime == INFINITE_LIFETIME {
            return;
        }
        let lifetime = if inst.default_lifetime == 0 || inst.lifetime_unit == 0 {
            MIN_DAO_LIFETIME
        } else {
            Duration::from_secs(inst.default_lifetime as u64 * inst.lifetime_unit as u64)
        };
        let delay = lifetime / 2 + probing::uniform(lifetime / 4, &mut self.rng);
        inst.dao_lifetime_pending = true;
        host.schedule(TimerId::DaoLifetime(id), delay);
    }

    fn dao_timer_expired<H: Host>(&mut self, host: &mut H, id: u8, refresh: bool) {
        let Some(inst) = find_mut(&mut self.instances, id) else {
            return;
        };
        if refresh {
            inst.dao_lifetime_pending = false;
        } else {
            inst.dao_pending = false;
        }
        let lifetime = inst.default_lifetime;
        let target = inst
            .current
            .zip(inst.current_dag().and_then(|dag| dag.preferred_parent));
        let refresh_pending = inst.dao_lifetime_pending;

        match target {
            Some((slot, parent)) => {
                self.send_dao(host, DagRef { instance: id, slot }, parent, lifetime)
            }
            None => info!(instance = id, "No suitable DAO parent"),
        }
        if !refresh_pending {
            self.set_dao_lifetime_timer(host, id);
        }
    }

    fn probing_timer_expired<H: Host>(&mut self, host: &mut H, id: u8) {
        let now = host.now();
        let policy = self.config.probing_policy;
        let interval = self.config.probing_interval();
        let Some(inst) = find_mut(&mut self.instances, id) else {
            return;
        };
        let target = probing::next_dag(inst).and_then(|slot| {
            probing::select_target(policy, inst, slot, &self.neighbors, now, &mut self.rng)
        });

        let mut quick = false;
        if let Some(target) = target {
            let urgent = inst.urgent_probe == Some(target);
            quick = probing::wants_quick_probe(policy, inst, target, &self.neighbors, now);
            self.send_probe(host, id, target, urgent, now);
        }

        let mut delay = probing::delay(interval, &mut self.rng);
        if quick {
            delay /= 2;
        }
        trace!(instance = id, ?delay, "Next probe");
        host.schedule(TimerId::Probing(id), delay);
    }

    fn send_probe<H: Host>(&mut self, host: &mut H, id: u8, target: LinkAddr, urgent: bool, now: Instant) {
        let probe = match self.config.probe_kind {
            ProbeKind::Dio => self
                .prepare_dio(id, Some(target), now)
                .map_or(Probe::Dis, Probe::Dio),
            ProbeKind::Dis => Probe::Dis,
        };
        info!(instance = id, neighbor = %target, urgent, "Probing neighbor");
        host.send_probe(target, &probe);
        if let Some(stats) = self.neighbors.get_mut(&target).and_then(|n| n.stats.as_mut()) {
            stats.record_probe(now);
        }
        self.metrics.probe_sent(urgent);
    }

    /// Housekeeping: expire DAGs, purge routes, recalculate ranks and solicit DIOs while no DAG
    /// is usable.
    fn periodic<H: Host>(&mut self, host: &mut H) {
        host.schedule(TimerId::Periodic, PERIODIC_INTERVAL);

        let mut expired = Vec::new();
        for inst in &mut self.instances {
            for (slot, entry) in inst.dags.iter_mut().enumerate() {
                let Some(dag) = entry else {
                    continue;
                };
                if dag.lifetime > 0 {
                    dag.lifetime -= 1;
                } else if !dag.joined {
                    expired.push((
                        DagRef {
                            instance: inst.id,
                            slot,
                        },
                        dag.id,
                    ));
                }
            }
        }
        for (r, dag_id) in expired {
            info!(instance = r.instance, dag = %dag_id, "DAG expired");
            self.free_dag(host, r);
        }

        if self.instances.iter().any(|inst| inst.mop.is_storing()) {
            host.purge_expired();
        }

        self.recalculate_ranks(host);

        if self.config.dis_send {
            self.next_dis = self.next_dis.saturating_add(1);
            let has_dag = self.instances.iter().any(|inst| {
                inst.current_dag()
                    .is_some_and(|dag| !dag.rank.is_infinite())
            });
            if !has_dag && self.next_dis >= self.config.dis_interval {
                self.next_dis = 0;
                debug!("No usable DAG, soliciting DIOs");
                host.send_dis(None);
                self.metrics.dis_sent();
            }
        }
    }

    fn decay_link_stats<H: Host>(&mut self, host: &mut H) {
        host.schedule(TimerId::LinkStatsDecay, FRESHNESS_HALF_LIFE);
        for n in self.neighbors.iter_mut() {
            let addr = n.addr();
            if let Some(stats) = n.stats.as_mut() {
                let period = stats.decay();
                debug!(
                    neighbor = %addr,
                    tx = period.tx,
                    acked = period.acked,
                    rx = period.rx,
                    queue_drops = period.queue_drops,
                    freshness = stats.freshness(),
                    "Link statistics period"
                );
            }
        }
    }
}

