use std::time::Duration;

use crate::{
    addr::LinkAddr,
    config::{Config, NodeMode},
    error::Error,
    host::Withdraw,
    link_stats::TxStatus,
    lollipop::Lollipop,
    message::{DaoAckStatus, PrefixInfo, Probe, ProbeKind},
    parent::DagRef,
    rank::Rank,
    testing::{dag_id, dio, engine, good_link, Counters, Event, MockHost, INSTANCE},
    timer::TimerId,
};

use super::Engine;

type TestEngine = Engine<Counters, rand::rngs::StdRng>;

/// Configuration without probing and solicitations, so only the timers under test run.
fn quiet() -> Config {
    Config {
        probing: false,
        dis_send: false,
        ..Config::default()
    }
}

fn setup(config: Config) -> (TestEngine, MockHost) {
    let mut engine = engine(config);
    let mut host = MockHost::new();
    engine.start(&mut host);
    (engine, host)
}

/// Join the DAG `dag_id(1)` through `parent`, which advertises `rank`.
fn join(engine: &mut TestEngine, host: &mut MockHost, parent: LinkAddr, rank: u16) {
    good_link(engine, host, parent);
    let config = engine.config().clone();
    engine.process_dio(host, parent, &dio(&config, dag_id(1), rank));
}

/// Let the trickle timer of the test instance double its interval.
fn double_dio_interval(engine: &mut TestEngine, host: &mut MockHost) {
    for _ in 0..2 {
        assert!(host.fire(engine, TimerId::Dio(INSTANCE)));
    }
    let trickle = engine.instance(INSTANCE).unwrap().trickle();
    assert!(trickle.current() > trickle.interval_min());
}

#[test]
fn root_advertises_within_minimum_interval() {
    let (mut engine, mut host) = setup(quiet());
    engine.set_root(&mut host, dag_id(1)).unwrap();

    let inst = engine.instance(INSTANCE).unwrap();
    assert!(inst.is_root());
    assert_eq!(inst.current_dag().unwrap().rank(), Rank::root(256));
    assert!(engine.has_joined());
    assert!(engine.has_downward_route());

    let interval = Duration::from_millis(1 << engine.config().dio_interval_min);
    host.run_for(&mut engine, interval);
    let (to, dio) = host.dios().next().expect("root sent a DIO");
    assert_eq!(to, None);
    assert_eq!(dio.rank, Rank::root(256));
    assert_eq!(dio.dag_id, dag_id(1));
    assert_eq!(engine.metrics().dag_joined.get(), 1);
}

#[test]
fn first_dio_joins_through_sender() {
    let config = Config {
        min_hop_rank_increase: 128,
        ..quiet()
    };
    let (mut engine, mut host) = setup(config);
    let parent = LinkAddr::from(2);
    join(&mut engine, &mut host, parent, 256);

    let dag = engine.instance(INSTANCE).unwrap().current_dag().unwrap();
    assert!(dag.joined());
    assert!(dag.rank() >= Rank::new(384));
    assert_eq!(dag.preferred_parent(), Some(parent));
    assert_eq!(host.default_route(INSTANCE), Some(parent));
    assert!(engine.has_joined());
    assert!(!engine.has_downward_route());
    assert!(host.pending(TimerId::Dao(INSTANCE)).is_some());
    assert!(engine.neighbors().get(&parent).unwrap().is_locked());
}

#[test]
fn dio_without_link_estimate_gives_infinite_rank() {
    let (mut engine, mut host) = setup(quiet());
    let parent = LinkAddr::from(2);
    let config = engine.config().clone();
    engine.process_dio(&mut host, parent, &dio(&config, dag_id(1), 256));

    let dag = engine.instance(INSTANCE).unwrap().current_dag().unwrap();
    assert!(dag.rank().is_infinite());
}

#[test]
fn unsupported_mode_of_operation_is_ignored() {
    let (mut engine, mut host) = setup(quiet());
    let parent = LinkAddr::from(2);
    good_link(&mut engine, &mut host, parent);
    let mut message = dio(&quiet(), dag_id(1), 256);
    message.mop = 1;
    engine.process_dio(&mut host, parent, &message);

    assert!(engine.instance(INSTANCE).is_none());
    assert_eq!(engine.metrics().dio_ignored.get(), 1);
}

#[test]
fn old_version_resets_timer_and_keeps_parents() {
    let (mut engine, mut host) = setup(quiet());
    let parent = LinkAddr::from(2);
    good_link(&mut engine, &mut host, parent);
    let mut message = dio(&quiet(), dag_id(1), 256);
    message.version = Lollipop::new().next();
    engine.process_dio(&mut host, parent, &message);
    double_dio_interval(&mut engine, &mut host);
    let resets = engine.metrics().dio_timer_reset.get();

    message.version = Lollipop::new();
    engine.process_dio(&mut host, parent, &message);

    let inst = engine.instance(INSTANCE).unwrap();
    assert_eq!(engine.metrics().dio_timer_reset.get(), resets + 1);
    assert_eq!(inst.trickle().current(), inst.trickle().interval_min());
    let dag = inst.current_dag().unwrap();
    assert_eq!(dag.version(), Lollipop::new().next());
    assert_eq!(dag.preferred_parent(), Some(parent));
    assert!(engine.neighbors().parent(&parent).is_some());
}

#[test]
fn unacceptable_rank_nullifies_preferred_parent() {
    let config = Config {
        max_rank_increase: 256,
        ..quiet()
    };
    let (mut engine, mut host) = setup(config.clone());
    let parent = LinkAddr::from(2);
    join(&mut engine, &mut host, parent, 256);
    host.take_events();

    engine.process_dio(&mut host, parent, &dio(&config, dag_id(1), 1024));

    let events = host.take_events();
    assert!(events.contains(&Event::ClearDefaultRoute(INSTANCE)));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Dao { to, dao } if *to == parent && dao.lifetime == 0)));
    let dag = engine.instance(INSTANCE).unwrap().current_dag().unwrap();
    assert_eq!(dag.preferred_parent(), None);
    assert!(dag.rank().is_infinite());
    assert!(!engine.neighbors().get(&parent).unwrap().is_locked());
    assert_eq!(engine.metrics().local_repair.get(), 1);
}

#[test]
fn local_repair_drops_pending_registration() {
    let config = Config {
        max_rank_increase: 256,
        ..quiet()
    };
    let (mut engine, mut host) = setup(config.clone());
    let parent = LinkAddr::from(2);
    join(&mut engine, &mut host, parent, 256);
    assert!(host.pending(TimerId::Dao(INSTANCE)).is_some());

    engine.process_dio(&mut host, parent, &dio(&config, dag_id(1), 1024));
    assert_eq!(engine.metrics().local_repair.get(), 1);
    assert!(host.pending(TimerId::Dao(INSTANCE)).is_none());
    host.take_events();

    host.run_for(&mut engine, Duration::from_secs(30));
    assert_eq!(host.daos().count(), 0);
}

#[test]
fn lost_link_triggers_local_repair() {
    let (mut engine, mut host) = setup(quiet());
    let parent = LinkAddr::from(2);
    join(&mut engine, &mut host, parent, 256);
    assert!(host.fire(&mut engine, TimerId::Dao(INSTANCE)));
    let sequence = engine.instance(INSTANCE).unwrap().dao_sequence();
    engine.process_dao_ack(&mut host, parent, INSTANCE, sequence, DaoAckStatus::Accept);
    assert!(engine.has_downward_route());
    double_dio_interval(&mut engine, &mut host);
    host.next_hops.insert(parent);

    for _ in 0..30 {
        engine.link_transmitted(&mut host, parent, TxStatus::NoAck, 1);
    }
    engine.process_dio(&mut host, parent, &dio(&quiet(), dag_id(1), 256));

    let inst = engine.instance(INSTANCE).unwrap();
    assert!(inst.current_dag().unwrap().rank().is_infinite());
    assert!(!engine.has_downward_route());
    assert_eq!(inst.trickle().current(), inst.trickle().interval_min());
    assert_eq!(engine.metrics().local_repair.get(), 1);
    assert!(host
        .events
        .contains(&Event::Withdraw(Withdraw::NextHop(parent))));
    assert_eq!(host.default_route(INSTANCE), None);
}

#[test]
fn unacknowledged_frame_to_unknown_neighbor_is_not_recorded() {
    let (mut engine, mut host) = setup(quiet());
    let unknown = LinkAddr::from(42);

    engine.link_transmitted(&mut host, unknown, TxStatus::NoAck, 1);
    assert!(engine.neighbors().get(&unknown).is_none());
    assert!(engine.neighbors().is_empty());

    engine.link_transmitted(&mut host, unknown, TxStatus::Ok, 1);
    assert!(engine.neighbors().stats(&unknown).is_some());
}

#[test]
fn unacknowledged_frame_never_evicts() {
    let (mut engine, mut host) = setup(Config {
        neighbor_capacity: 2,
        ..quiet()
    });
    for addr in [1u64, 2] {
        engine.link_received(&mut host, addr.into(), -60);
    }

    engine.link_transmitted(&mut host, 3.into(), TxStatus::NoAck, 1);

    assert_eq!(engine.neighbors().len(), 2);
    assert!(engine.neighbors().get(&1.into()).is_some());
    assert!(engine.neighbors().get(&2.into()).is_some());
    assert_eq!(engine.metrics().memory_overflow.get(), 0);
}

#[test]
fn nullify_is_idempotent() {
    let (mut engine, mut host) = setup(quiet());
    let parent = LinkAddr::from(2);
    join(&mut engine, &mut host, parent, 256);
    let r = DagRef {
        instance: INSTANCE,
        slot: 0,
    };
    host.take_events();

    engine.nullify_parent(&mut host, r, parent);
    let first = host.take_events();
    let switches = engine.metrics().parent_switch.get();
    engine.nullify_parent(&mut host, r, parent);

    assert!(!first.is_empty());
    assert!(host.take_events().is_empty());
    assert_eq!(engine.metrics().parent_switch.get(), switches);
    let dag = engine.instance(INSTANCE).unwrap().current_dag().unwrap();
    assert!(dag.rank().is_infinite());
    assert_eq!(dag.preferred_parent(), None);
    assert!(engine.neighbors().parent(&parent).is_some());
}

#[test]
fn better_parent_is_adopted() {
    let (mut engine, mut host) = setup(quiet());
    let (far, near) = (LinkAddr::from(2), LinkAddr::from(3));
    join(&mut engine, &mut host, far, 1024);
    good_link(&mut engine, &mut host, near);
    let config = engine.config().clone();
    engine.process_dio(&mut host, near, &dio(&config, dag_id(1), 256));

    let dag = engine.instance(INSTANCE).unwrap().current_dag().unwrap();
    assert_eq!(dag.preferred_parent(), Some(near));
    assert_eq!(host.default_route(INSTANCE), Some(near));
    // The old parent is told to drop its route to us.
    assert!(host
        .daos()
        .any(|(to, dao)| to == far && dao.lifetime == 0));
    assert!(!engine.neighbors().get(&far).unwrap().is_locked());
    assert!(engine.neighbors().get(&near).unwrap().is_locked());
    assert_eq!(engine.metrics().parent_switch.get(), 2);
}

#[test]
fn parent_within_threshold_is_kept() {
    let (mut engine, mut host) = setup(quiet());
    let (first, second) = (LinkAddr::from(2), LinkAddr::from(3));
    join(&mut engine, &mut host, first, 300);
    good_link(&mut engine, &mut host, second);
    let config = engine.config().clone();
    engine.process_dio(&mut host, second, &dio(&config, dag_id(1), 256));

    let dag = engine.instance(INSTANCE).unwrap().current_dag().unwrap();
    assert_eq!(dag.preferred_parent(), Some(first));
}

#[test]
fn multicast_dis_resets_trickle() {
    let (mut engine, mut host) = setup(quiet());
    engine.set_root(&mut host, dag_id(1)).unwrap();
    double_dio_interval(&mut engine, &mut host);

    engine.process_dis(&mut host, LinkAddr::from(9), true);

    let inst = engine.instance(INSTANCE).unwrap();
    assert_eq!(inst.trickle().current(), inst.trickle().interval_min());
    assert_eq!(engine.metrics().dio_timer_reset.get(), 1);
}

#[test]
fn unicast_dis_is_answered() {
    let (mut engine, mut host) = setup(quiet());
    engine.set_root(&mut host, dag_id(1)).unwrap();
    let asking = LinkAddr::from(9);
    engine.link_received(&mut host, asking, -70);

    engine.process_dis(&mut host, asking, false);
    assert_eq!(host.pending(TimerId::UnicastDio(INSTANCE)), Some(Duration::ZERO));
    assert!(host.fire(&mut engine, TimerId::UnicastDio(INSTANCE)));

    let (to, dio) = host.dios().last().unwrap();
    assert_eq!(to, Some(asking));
    assert_eq!(dio.remote_signal.map(|s| s.rssi), Some(-70));
}

#[test]
fn dao_ack_for_old_sequence_is_ignored() {
    let (mut engine, mut host) = setup(quiet());
    let parent = LinkAddr::from(2);
    join(&mut engine, &mut host, parent, 256);
    assert!(host.fire(&mut engine, TimerId::Dao(INSTANCE)));
    let (to, dao) = host.daos().last().unwrap();
    assert_eq!(to, parent);
    assert_eq!(dao.lifetime, engine.config().default_lifetime);

    engine.process_dao_ack(
        &mut host,
        parent,
        INSTANCE,
        Lollipop::new(),
        DaoAckStatus::Accept,
    );
    assert!(!engine.has_downward_route());
    assert_eq!(engine.metrics().dao_ack_accepted.get(), 0);
}

#[test]
fn failed_registration_penalizes_parent() {
    let (mut engine, mut host) = setup(quiet());
    let parent = LinkAddr::from(2);
    join(&mut engine, &mut host, parent, 256);
    assert!(host.fire(&mut engine, TimerId::Dao(INSTANCE)));
    let etx = engine.neighbors().stats(&parent).unwrap().etx();
    let sequence = engine.instance(INSTANCE).unwrap().dao_sequence();

    engine.process_dao_ack(&mut host, parent, INSTANCE, sequence, DaoAckStatus::Timeout);

    assert!(engine.neighbors().stats(&parent).unwrap().etx() > etx);
    assert!(!engine.has_downward_route());
}

#[test]
fn newer_version_starts_global_repair() {
    let (mut engine, mut host) = setup(quiet());
    let (old, new) = (LinkAddr::from(2), LinkAddr::from(3));
    join(&mut engine, &mut host, old, 256);
    good_link(&mut engine, &mut host, new);
    let dtsn = engine.instance(INSTANCE).unwrap().dtsn();

    let mut message = dio(&quiet(), dag_id(1), 256);
    message.version = Lollipop::new().next();
    engine.process_dio(&mut host, new, &message);

    let inst = engine.instance(INSTANCE).unwrap();
    let dag = inst.current_dag().unwrap();
    assert_eq!(dag.version(), Lollipop::new().next());
    assert_eq!(dag.preferred_parent(), Some(new));
    assert!(inst.dtsn().gt(&dtsn));
    assert!(engine.neighbors().parent(&old).is_none());
    assert!(host.daos().any(|(to, dao)| to == old && dao.lifetime == 0));
    assert_eq!(engine.metrics().global_repair.get(), 1);
}

#[test]
fn root_repair_increments_version() {
    let (mut engine, mut host) = setup(quiet());
    engine.set_root(&mut host, dag_id(1)).unwrap();
    let version = engine.any_dag().unwrap().version;

    engine.repair_root(&mut host, INSTANCE).unwrap();

    assert!(engine.any_dag().unwrap().version.gt(&version));
    assert_eq!(engine.metrics().root_repair.get(), 1);
    assert!(matches!(
        engine.repair_root(&mut host, 3),
        Err(Error::UnknownInstance(3))
    ));
}

#[test]
fn only_roots_repair() {
    let (mut engine, mut host) = setup(quiet());
    join(&mut engine, &mut host, LinkAddr::from(2), 256);
    assert!(matches!(
        engine.repair_root(&mut host, INSTANCE),
        Err(Error::NotRoot(INSTANCE))
    ));
}

#[test]
fn reclaiming_a_dag_as_root_bumps_version() {
    let (mut engine, mut host) = setup(quiet());
    join(&mut engine, &mut host, LinkAddr::from(2), 256);
    let version = engine.any_dag().unwrap().version;

    engine.set_root(&mut host, dag_id(1)).unwrap();

    let dag = engine.any_dag().unwrap();
    assert!(dag.version.gt(&version));
    assert_eq!(dag.preferred_parent, None);
    assert_eq!(host.default_route(INSTANCE), None);
}

#[test]
fn root_follows_inconsistent_version() {
    let (mut engine, mut host) = setup(quiet());
    engine.set_root(&mut host, dag_id(1)).unwrap();
    let mut message = dio(&quiet(), dag_id(1), 512);
    message.version = Lollipop::new().next().next();

    engine.process_dio(&mut host, LinkAddr::from(2), &message);

    assert_eq!(
        engine.any_dag().unwrap().version,
        Lollipop::new().next().next().next()
    );
    assert!(engine.instance(INSTANCE).unwrap().is_root());
}

#[test]
fn root_counts_consistent_dios() {
    let (mut engine, mut host) = setup(quiet());
    engine.set_root(&mut host, dag_id(1)).unwrap();
    engine.process_dio(&mut host, LinkAddr::from(2), &dio(&quiet(), dag_id(1), 512));
    engine.process_dio(&mut host, LinkAddr::from(3), &dio(&quiet(), dag_id(2), 512));

    assert_eq!(engine.instance(INSTANCE).unwrap().trickle().counter(), 1);
    assert_eq!(engine.metrics().dio_ignored.get(), 1);
    assert!(engine.neighbors().parent(&LinkAddr::from(2)).is_none());
}

#[test]
fn leaving_releases_everything() {
    let (mut engine, mut host) = setup(quiet());
    let parent = LinkAddr::from(2);
    join(&mut engine, &mut host, parent, 256);

    engine.leave_instance(&mut host, INSTANCE).unwrap();

    assert!(engine.instance(INSTANCE).is_none());
    assert!(!engine.has_joined());
    assert!(engine.neighbors().parent(&parent).is_none());
    assert!(!engine.neighbors().get(&parent).unwrap().is_locked());
    assert!(host.pending(TimerId::Dio(INSTANCE)).is_none());
    assert!(host.pending(TimerId::Dao(INSTANCE)).is_none());
    assert!(host.events.contains(&Event::Withdraw(Withdraw::Dag(dag_id(1)))));
    assert_eq!(host.default_route(INSTANCE), None);
    assert_eq!(engine.metrics().dag_left.get(), 1);
    assert!(matches!(
        engine.leave_instance(&mut host, INSTANCE),
        Err(Error::UnknownInstance(INSTANCE))
    ));
}

#[test]
fn solicits_dios_without_dag() {
    let config = Config {
        dis_send: true,
        dis_interval: 3,
        dis_start_delay: 0,
        ..quiet()
    };
    let (mut engine, mut host) = setup(config);
    host.run_for(&mut engine, Duration::from_secs(10));

    let solicitations = host
        .events
        .iter()
        .filter(|e| **e == Event::Dis(None))
        .count();
    assert!(solicitations >= 2);
    assert_eq!(engine.metrics().dis_sent.get() as usize, solicitations);

    engine.set_root(&mut host, dag_id(1)).unwrap();
    host.take_events();
    host.run_for(&mut engine, Duration::from_secs(10));
    assert!(!host.events.contains(&Event::Dis(None)));
}

#[test]
fn switches_to_better_dag_and_expires_the_old_one() {
    let config = Config {
        dio_interval_min: 4,
        dio_interval_doublings: 0,
        ..quiet()
    };
    let (mut engine, mut host) = setup(config.clone());
    let (first, second) = (LinkAddr::from(2), LinkAddr::from(3));
    join(&mut engine, &mut host, first, 256);
    good_link(&mut engine, &mut host, second);
    let mut message = dio(&config, dag_id(2), 256);
    message.grounded = true;

    engine.process_dio(&mut host, second, &message);

    let dag = engine.any_dag().unwrap();
    assert_eq!(dag.dag_id, dag_id(2));
    assert_eq!(dag.preferred_parent, Some(second));
    assert!(host.events.contains(&Event::Withdraw(Withdraw::Dag(dag_id(1)))));
    assert_eq!(engine.instance(INSTANCE).unwrap().dags().count(), 2);

    host.run_for(&mut engine, Duration::from_secs(2));

    assert_eq!(engine.instance(INSTANCE).unwrap().dags().count(), 1);
    assert!(engine.neighbors().parent(&first).is_none());
    assert_eq!(engine.any_dag().unwrap().dag_id, dag_id(2));
}

#[test]
fn incompatible_dag_is_rejected() {
    let (mut engine, mut host) = setup(quiet());
    join(&mut engine, &mut host, LinkAddr::from(2), 256);
    let other = LinkAddr::from(3);
    good_link(&mut engine, &mut host, other);
    let mut message = dio(&quiet(), dag_id(2), 256);
    message.max_rank_increase = 0;

    engine.process_dio(&mut host, other, &message);

    assert_eq!(engine.instance(INSTANCE).unwrap().dags().count(), 1);
    assert!(engine.neighbors().parent(&other).is_none());
}

#[test]
fn announced_prefix_configures_address() {
    let (mut engine, mut host) = setup(quiet());
    let parent = LinkAddr::from(2);
    good_link(&mut engine, &mut host, parent);
    let prefix = PrefixInfo {
        prefix: "fd00::/64".parse().unwrap(),
        autonomous: true,
        lifetime: u32::MAX,
    };
    let mut message = dio(&quiet(), dag_id(1), 256);
    message.prefix = Some(prefix);

    engine.process_dio(&mut host, parent, &message);

    assert!(host.events.contains(&Event::AddAddress(prefix)));
    assert!(engine
        .dag_for_address("fd00::42".parse().unwrap())
        .is_some());
    assert!(engine
        .dag_for_address("fd01::42".parse().unwrap())
        .is_none());

    engine.leave_instance(&mut host, INSTANCE).unwrap();
    assert!(host.events.contains(&Event::RemoveAddress(prefix)));
}

#[test]
fn root_prefix_is_advertised() {
    let (mut engine, mut host) = setup(quiet());
    engine.set_root(&mut host, dag_id(1)).unwrap();
    assert!(matches!(
        engine.set_prefix(&mut host, INSTANCE, dag_id(1), 129),
        Err(Error::InvalidPrefixLength(129))
    ));
    engine.set_prefix(&mut host, INSTANCE, dag_id(1), 64).unwrap();

    let dio = engine.dio(INSTANCE).unwrap();
    assert_eq!(dio.prefix.unwrap().prefix.prefix_len(), 64);
    // The root does not autoconfigure from its own prefix.
    assert!(!host
        .events
        .iter()
        .any(|e| matches!(e, Event::AddAddress(_))));
}

#[test]
fn leaf_never_advertises_itself() {
    let config = Config {
        mode: NodeMode::Leaf,
        ..quiet()
    };
    let (mut engine, mut host) = setup(config);
    let parent = LinkAddr::from(2);
    join(&mut engine, &mut host, parent, 256);
    host.run_for(&mut engine, Duration::from_secs(30));

    assert!(engine.has_joined());
    assert!(host.dios().next().is_none());
    assert!(engine.dio(INSTANCE).unwrap().rank.is_infinite());
}

#[test]
fn feather_never_registers() {
    let config = Config {
        mode: NodeMode::Feather,
        ..quiet()
    };
    let (mut engine, mut host) = setup(config);
    join(&mut engine, &mut host, LinkAddr::from(2), 256);

    assert!(host.pending(TimerId::Dao(INSTANCE)).is_none());
    host.run_for(&mut engine, Duration::from_secs(30));
    assert!(host.daos().next().is_none());
}

#[test]
fn dao_is_refreshed_before_route_expiry() {
    let config = Config {
        default_lifetime: 30,
        lifetime_unit: 1,
        dao_latency_ms: 0,
        ..quiet()
    };
    let (mut engine, mut host) = setup(config);
    let parent = LinkAddr::from(2);
    join(&mut engine, &mut host, parent, 256);

    let refresh = host.pending(TimerId::DaoLifetime(INSTANCE)).unwrap();
    assert!(refresh >= Duration::from_secs(15) && refresh <= Duration::from_millis(22_500));
    host.run_for(&mut engine, Duration::from_secs(60));

    assert!(host.daos().filter(|(to, _)| *to == parent).count() >= 3);
    assert!(host.daos().all(|(_, dao)| dao.lifetime == 30));
    assert!(host.events.iter().any(|e| matches!(
        e,
        Event::SetDefaultRoute { lifetime: Some(l), .. } if *l == Duration::from_secs(30)
    )));
}

#[test]
fn probes_stale_preferred_parent() {
    let config = Config {
        probing: true,
        probe_kind: ProbeKind::Dis,
        ..quiet()
    };
    let (mut engine, mut host) = setup(config);
    let parent = LinkAddr::from(2);
    join(&mut engine, &mut host, parent, 256);

    host.run_for(&mut engine, Duration::from_secs(91));

    assert!(host.events.contains(&Event::Probe {
        to: parent,
        probe: Probe::Dis,
    }));
    assert!(engine.metrics().probes.get() >= 1);
    assert!(engine
        .neighbors()
        .stats(&parent)
        .unwrap()
        .last_probe()
        .is_some());
}

#[test]
fn lookups_report_neighbors() {
    let (mut engine, mut host) = setup(quiet());
    let parent = LinkAddr::from(2);
    join(&mut engine, &mut host, parent, 256);

    let report = engine.neighbor_report(host.now);
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].addr, parent);
    assert!(report[0].preferred);
    assert!(report[0].fresh);
    assert_eq!(report[0].link_cost, 128);
    assert_eq!(report[0].last_tx_secs, Some(0));

    let info = engine.instance_info();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].dags.len(), 1);
    assert!(!info[0].root);
}

#[test]
fn expired_statistics_decay() {
    let (mut engine, mut host) = setup(quiet());
    let parent = LinkAddr::from(2);
    good_link(&mut engine, &mut host, parent);
    let freshness = engine.neighbors().stats(&parent).unwrap().freshness();

    host.run_for(&mut engine, crate::link_stats::FRESHNESS_HALF_LIFE);

    let stats = engine.neighbors().stats(&parent).unwrap();
    assert_eq!(stats.freshness(), freshness / 2);
    assert_eq!(stats.total_counters().acked, 4);
}

#[test]
fn reset_keeps_parents_but_drops_estimates() {
    let (mut engine, mut host) = setup(quiet());
    let parent = LinkAddr::from(2);
    join(&mut engine, &mut host, parent, 256);
    engine.link_received(&mut host, 3.into(), -70);

    engine.reset_link_stats();

    assert!(engine.neighbors().stats(&parent).is_none());
    assert!(engine.neighbors().parent(&parent).is_some());
    assert!(engine.neighbors().get(&3.into()).is_none());
}
