//! A host which records everything the engine asks of it, and a metrics implementation counting
//! events, to drive the engine in tests.

use std::{cell::Cell, collections::HashMap, net::Ipv6Addr, time::Duration};

use ahash::HashSet;
use rand::{rngs::StdRng, SeedableRng};
use tokio::time::Instant;

use crate::{
    addr::LinkAddr,
    config::Config,
    host::{Clock, RouteStore, TimerService, Transmitter, Withdraw},
    lollipop::Lollipop,
    message::{DaoMessage, DioMessage, PrefixInfo, Probe},
    metric_container::MetricContainer,
    metrics::Metrics,
    of::MRHOF,
    rank::Rank,
    timer::TimerId,
    Engine,
};

/// Something the engine did through its host.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    SetDefaultRoute {
        instance: u8,
        via: LinkAddr,
        lifetime: Option<Duration>,
    },
    ClearDefaultRoute(u8),
    Withdraw(Withdraw),
    PurgeExpired,
    AddAddress(PrefixInfo),
    RemoveAddress(PrefixInfo),
    Dio {
        to: Option<LinkAddr>,
        dio: DioMessage,
    },
    Dao {
        to: LinkAddr,
        dao: DaoMessage,
    },
    Dis(Option<LinkAddr>),
    Probe {
        to: LinkAddr,
        probe: Probe,
    },
}

pub(crate) struct MockHost {
    pub now: Instant,
    /// Deadlines of the armed timers.
    pub timers: HashMap<TimerId, Instant>,
    pub events: Vec<Event>,
    /// Next hops of downward routes, as reported to the engine.
    pub next_hops: HashSet<LinkAddr>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            now: Instant::now(),
            timers: HashMap::new(),
            events: Vec::new(),
            next_hops: HashSet::default(),
        }
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Time until `timer` expires, if it is armed.
    pub fn pending(&self, timer: TimerId) -> Option<Duration> {
        self.timers
            .get(&timer)
            .map(|deadline| deadline.saturating_duration_since(self.now))
    }

    /// Advance the clock by `duration`, firing every timer which expires meanwhile in deadline
    /// order.
    pub fn run_for<M: Metrics>(&mut self, engine: &mut Engine<M, StdRng>, duration: Duration) {
        let end = self.now + duration;
        loop {
            let next = self
                .timers
                .iter()
                .filter(|(_, deadline)| **deadline <= end)
                .min_by_key(|(_, deadline)| **deadline)
                .map(|(timer, deadline)| (*timer, *deadline));
            let Some((timer, deadline)) = next else {
                break;
            };
            self.timers.remove(&timer);
            self.now = self.now.max(deadline);
            engine.handle_timer(self, timer);
        }
        self.now = end;
    }

    /// Fire `timer` right now, if it is armed.
    pub fn fire<M: Metrics>(&mut self, engine: &mut Engine<M, StdRng>, timer: TimerId) -> bool {
        if self.timers.remove(&timer).is_none() {
            return false;
        }
        engine.handle_timer(self, timer);
        true
    }

    pub fn dios(&self) -> impl Iterator<Item = (Option<LinkAddr>, &DioMessage)> + '_ {
        self.events.iter().filter_map(|e| match e {
            Event::Dio { to, dio } => Some((*to, dio)),
            _ => None,
        })
    }

    pub fn daos(&self) -> impl Iterator<Item = (LinkAddr, &DaoMessage)> + '_ {
        self.events.iter().filter_map(|e| match e {
            Event::Dao { to, dao } => Some((*to, dao)),
            _ => None,
        })
    }

    /// The last default route installed for `instance`, unless it was cleared since.
    pub fn default_route(&self, instance: u8) -> Option<LinkAddr> {
        self.events.iter().fold(None, |route, e| match e {
            Event::SetDefaultRoute {
                instance: i, via, ..
            } if *i == instance => Some(*via),
            Event::ClearDefaultRoute(i) if *i == instance => None,
            _ => route,
        })
    }
}

impl Clock for MockHost {
    fn now(&self) -> Instant {
        self.now
    }
}

impl TimerService for MockHost {
    fn schedule(&mut self, timer: TimerId, delay: Duration) {
        self.timers.insert(timer, self.now + delay);
    }

    fn cancel(&mut self, timer: TimerId) {
        self.timers.remove(&timer);
    }
}

impl RouteStore for MockHost {
    fn set_default_route(&mut self, instance: u8, via: LinkAddr, lifetime: Option<Duration>) {
        self.events.push(Event::SetDefaultRoute {
            instance,
            via,
            lifetime,
        });
    }

    fn clear_default_route(&mut self, instance: u8) {
        self.events.push(Event::ClearDefaultRoute(instance));
    }

    fn withdraw_routes(&mut self, which: Withdraw) {
        if let Withdraw::NextHop(via) = which {
            self.next_hops.remove(&via);
        }
        self.events.push(Event::Withdraw(which));
    }

    fn is_next_hop(&self, via: LinkAddr) -> bool {
        self.next_hops.contains(&via)
    }

    fn purge_expired(&mut self) {
        self.events.push(Event::PurgeExpired);
    }

    fn add_address(&mut self, prefix: &PrefixInfo) {
        self.events.push(Event::AddAddress(*prefix));
    }

    fn remove_address(&mut self, prefix: &PrefixInfo) {
        self.events.push(Event::RemoveAddress(*prefix));
    }
}

impl Transmitter for MockHost {
    fn send_dio(&mut self, to: Option<LinkAddr>, dio: &DioMessage) {
        self.events.push(Event::Dio {
            to,
            dio: dio.clone(),
        });
    }

    fn send_dao(&mut self, to: LinkAddr, dao: &DaoMessage) {
        self.events.push(Event::Dao {
            to,
            dao: dao.clone(),
        });
    }

    fn send_dis(&mut self, to: Option<LinkAddr>) {
        self.events.push(Event::Dis(to));
    }

    fn send_probe(&mut self, to: LinkAddr, probe: &Probe) {
        self.events.push(Event::Probe {
            to,
            probe: probe.clone(),
        });
    }
}

/// Counts every metric event.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub dio_processed: Cell<u32>,
    pub dio_ignored: Cell<u32>,
    pub dio_sent: Cell<u32>,
    pub dio_suppressed: Cell<u32>,
    pub dio_timer_reset: Cell<u32>,
    pub dis_sent: Cell<u32>,
    pub dao_sent: Cell<u32>,
    pub no_path_dao_sent: Cell<u32>,
    pub dao_ack_accepted: Cell<u32>,
    pub probes: Cell<u32>,
    pub parent_switch: Cell<u32>,
    pub local_repair: Cell<u32>,
    pub global_repair: Cell<u32>,
    pub root_repair: Cell<u32>,
    pub memory_overflow: Cell<u32>,
    pub dag_joined: Cell<u32>,
    pub dag_left: Cell<u32>,
}

fn bump(counter: &Cell<u32>) {
    counter.set(counter.get() + 1);
}

impl Metrics for Counters {
    fn dio_processed(&self) {
        bump(&self.dio_processed);
    }

    fn dio_ignored(&self) {
        bump(&self.dio_ignored);
    }

    fn dio_sent(&self, _unicast: bool) {
        bump(&self.dio_sent);
    }

    fn dio_suppressed(&self) {
        bump(&self.dio_suppressed);
    }

    fn dio_timer_reset(&self) {
        bump(&self.dio_timer_reset);
    }

    fn dis_sent(&self) {
        bump(&self.dis_sent);
    }

    fn dao_sent(&self, no_path: bool) {
        bump(&self.dao_sent);
        if no_path {
            bump(&self.no_path_dao_sent);
        }
    }

    fn dao_ack_processed(&self, accepted: bool) {
        if accepted {
            bump(&self.dao_ack_accepted);
        }
    }

    fn probe_sent(&self, _urgent: bool) {
        bump(&self.probes);
    }

    fn parent_switch(&self) {
        bump(&self.parent_switch);
    }

    fn local_repair(&self) {
        bump(&self.local_repair);
    }

    fn global_repair(&self) {
        bump(&self.global_repair);
    }

    fn root_repair(&self) {
        bump(&self.root_repair);
    }

    fn memory_overflow(&self) {
        bump(&self.memory_overflow);
    }

    fn dag_joined(&self) {
        bump(&self.dag_joined);
    }

    fn dag_left(&self) {
        bump(&self.dag_left);
    }
}

pub(crate) const INSTANCE: u8 = 0x1e;

pub(crate) fn dag_id(n: u16) -> Ipv6Addr {
    Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, n)
}

/// An engine with a seeded random number generator, counting its metrics.
pub(crate) fn engine(config: Config) -> Engine<Counters, StdRng> {
    Engine::with_rng(config, Counters::default(), StdRng::seed_from_u64(7))
}

/// A DIO for DAG `dag` of the test instance, carrying the parameters of `config`.
pub(crate) fn dio(config: &Config, dag: Ipv6Addr, rank: u16) -> DioMessage {
    DioMessage {
        instance_id: INSTANCE,
        dag_id: dag,
        version: Lollipop::new(),
        rank: Rank::new(rank),
        grounded: false,
        mop: config.mop.code(),
        preference: 0,
        dtsn: Lollipop::new(),
        ocp: MRHOF,
        interval_min: config.dio_interval_min,
        interval_doublings: config.dio_interval_doublings,
        redundancy: config.dio_redundancy,
        max_rank_increase: config.max_rank_increase,
        min_hop_rank_increase: config.min_hop_rank_increase,
        default_lifetime: config.default_lifetime,
        lifetime_unit: config.lifetime_unit,
        mc: MetricContainer::None,
        prefix: None,
        remote_signal: None,
    }
}

/// Report enough acknowledged single attempt transmissions to `addr` for a fresh ETX of 1.
pub(crate) fn good_link<M: Metrics>(
    engine: &mut Engine<M, StdRng>,
    host: &mut MockHost,
    addr: LinkAddr,
) {
    for _ in 0..4 {
        engine.link_transmitted(host, addr, crate::link_stats::TxStatus::Ok, 1);
    }
}
