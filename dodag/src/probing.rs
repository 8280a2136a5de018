//! Choice of the neighbor to probe, and of the delay until the next probe.
//!
//! Probing keeps the link statistics of candidate parents fresh, so parent selection does not
//! rely on estimates of links which have not been used in a while.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::{
    addr::LinkAddr,
    config::ProbingPolicy,
    instance::Instance,
    link_stats::MIN_SAMPLE_COUNT,
    neighbor::NeighborTable,
    parent::DagRef,
    rank::Rank,
};

/// Upper bound of the delay of a probe which is needed urgently.
const URGENT_DELAY_MAX: Duration = Duration::from_secs(4);

/// Random delay until the next regular probe, between half and one and a half `interval`.
pub(crate) fn delay<R: Rng>(interval: Duration, rng: &mut R) -> Duration {
    interval / 2 + uniform(interval, rng)
}

/// Random delay of an urgent probe.
pub(crate) fn urgent_delay<R: Rng>(rng: &mut R) -> Duration {
    uniform(URGENT_DELAY_MAX, rng)
}

/// Uniformly distributed delay below `max`, at millisecond granularity.
pub(crate) fn uniform<R: Rng>(max: Duration, rng: &mut R) -> Duration {
    let max = max.as_millis() as u64;
    if max == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rng.random_range(0..max))
}

/// Pick the neighbor to probe among the parents in the DAG at `slot`.
pub(crate) fn select_target<R: Rng>(
    policy: ProbingPolicy,
    inst: &Instance,
    slot: usize,
    neighbors: &NeighborTable,
    now: Instant,
    rng: &mut R,
) -> Option<LinkAddr> {
    let dag = inst.dag(slot)?;

    if let Some(urgent) = inst.urgent_probe {
        if neighbors.parent(&urgent).is_some() {
            return Some(urgent);
        }
    }

    match policy {
        ProbingPolicy::Standard => {
            standard_target(inst, slot, dag.preferred_parent, neighbors, now, rng)
        }
        ProbingPolicy::SampleCoverage => {
            coverage_target(inst, slot, dag.preferred_parent, neighbors, now, rng)
        }
    }
}

/// Probe the preferred parent if it is not fresh. Otherwise, on a coin flip, the best non fresh
/// parent, or else the parent we have not transmitted to for the longest time.
fn standard_target<R: Rng>(
    inst: &Instance,
    slot: usize,
    preferred: Option<LinkAddr>,
    neighbors: &NeighborTable,
    now: Instant,
    rng: &mut R,
) -> Option<LinkAddr> {
    if let Some(pp) = preferred {
        if !inst.is_fresh(neighbors.stats(&pp), now) {
            return Some(pp);
        }
    }

    let dag = DagRef {
        instance: inst.id,
        slot,
    };
    let ctx = inst.context(slot, now);

    if rng.random_bool(0.5) {
        let best = neighbors
            .candidates(dag)
            .filter(|c| !inst.is_fresh(c.stats, now))
            .min_by_key(|c| inst.of.rank_via(&ctx, c));
        if let Some(best) = best {
            return Some(best.addr);
        }
    }

    neighbors
        .candidates(dag)
        .filter_map(|c| c.stats.map(|stats| (c.addr, stats)))
        .max_by_key(|(_, stats)| match stats.last_tx() {
            Some(t) => now.saturating_duration_since(t),
            None => Duration::MAX,
        })
        .map(|(addr, _)| addr)
}

/// Probe the preferred parent if its signal strength samples are stale or too few. Otherwise
/// prefer the parents with the fewest samples. On a coin flip, the best ranked parent lacking
/// fresh samples is probed instead, unless some parent has too few samples.
fn coverage_target<R: Rng>(
    inst: &Instance,
    slot: usize,
    preferred: Option<LinkAddr>,
    neighbors: &NeighborTable,
    now: Instant,
    rng: &mut R,
) -> Option<LinkAddr> {
    if let Some(pp) = preferred {
        let needs_probe = match neighbors.stats(&pp) {
            Some(stats) => {
                !stats.preferred_rx_fresh(now)
                    || (!stats.already_probed(now)
                        && stats.rssi().count(now, true) < MIN_SAMPLE_COUNT)
            }
            None => true,
        };
        if needs_probe {
            return Some(pp);
        }
    }

    let dag = DagRef {
        instance: inst.id,
        slot,
    };
    let ctx = inst.context(slot, now);
    let pick_best_ranked = rng.random_bool(0.5);

    // Fewest samples, then fewest fresh samples, then oldest.
    let mut least_sampled: Option<(LinkAddr, u8, u8, Duration)> = None;
    let mut best_ranked: Option<(LinkAddr, Rank)> = None;

    for c in neighbors.candidates(dag) {
        let (count, fresh, probed, age) = match c.stats {
            Some(stats) => (
                stats.rssi().count(now, false),
                stats.rssi().count(now, true),
                stats.already_probed(now),
                stats.age(now),
            ),
            None => (0, 0, false, Duration::MAX),
        };
        if probed {
            continue;
        }

        let better = match least_sampled {
            None => true,
            Some((_, best_count, best_fresh, best_age)) => {
                (count, fresh) < (best_count, best_fresh)
                    || ((count, fresh) == (best_count, best_fresh) && age > best_age)
            }
        };
        if better {
            least_sampled = Some((c.addr, count, fresh, age));
        }

        if pick_best_ranked && fresh < MIN_SAMPLE_COUNT {
            let rank = inst.of.rank_via(&ctx, &c);
            if best_ranked.map_or(true, |(_, best)| rank < best) {
                best_ranked = Some((c.addr, rank));
            }
        }
    }

    match least_sampled {
        Some((addr, count, _, _)) if count < MIN_SAMPLE_COUNT => Some(addr),
        least_sampled => best_ranked
            .map(|(addr, _)| addr)
            .or(least_sampled.map(|(addr, _, _, _)| addr)),
    }
}

/// Checks if the next probe should come sooner, as the signal strength samples of the probed
/// neighbor are lacking.
pub(crate) fn wants_quick_probe(
    policy: ProbingPolicy,
    inst: &Instance,
    target: LinkAddr,
    neighbors: &NeighborTable,
    now: Instant,
) -> bool {
    if policy != ProbingPolicy::SampleCoverage {
        return false;
    }
    let (count, fresh) = neighbors
        .stats(&target)
        .map(|s| (s.rssi().count(now, false), s.rssi().count(now, true)))
        .unwrap_or((0, 0));
    let is_preferred = inst
        .current_dag()
        .is_some_and(|dag| dag.preferred_parent == Some(target));
    count < MIN_SAMPLE_COUNT || (is_preferred && fresh < MIN_SAMPLE_COUNT)
}

/// Slot of the next DAG to probe in, round robin over the DAGs of the instance.
pub(crate) fn next_dag(inst: &mut Instance) -> Option<usize> {
    let len = inst.dags.len();
    let start = inst.last_probed_dag;
    for step in 1..=len {
        let slot = (start + step) % len;
        if inst.dags[slot].is_some() {
            inst.last_probed_dag = slot;
            return Some(slot);
        }
    }
    None
}
