//! The neighbor table, owning the link statistics and parent records of every known neighbor.
//!
//! Entries live in a fixed number of slots. Other parts of the engine only ever refer to an entry
//! by its [`LinkAddr`], so an evicted entry simply stops resolving. The preferred parent of a DAG
//! is locked while it is preferred, which protects it from eviction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::{
    addr::LinkAddr,
    error::Error,
    link_stats::LinkStats,
    of::Candidate,
    parent::{DagRef, Parent},
};

/// Why a neighbor is added to the table. Decides which entries may be evicted to make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InsertReason {
    /// A DIO was received, the neighbor is a potential parent.
    Dio,
    /// A DIS was received.
    Dis,
    /// A packet was exchanged with the neighbor.
    LinkStats,
}

/// An entry in the [`NeighborTable`].
#[derive(Debug, Clone)]
pub struct Neighbor {
    addr: LinkAddr,
    pub(crate) stats: Option<LinkStats>,
    pub(crate) parent: Option<Parent>,
    locks: u8,
}

impl Neighbor {
    fn new(addr: LinkAddr) -> Self {
        Self {
            addr,
            stats: None,
            parent: None,
            locks: 0,
        }
    }

    /// The link address of this neighbor.
    pub const fn addr(&self) -> LinkAddr {
        self.addr
    }

    /// Link statistics of this neighbor, if any packet was exchanged with it.
    pub const fn stats(&self) -> Option<&LinkStats> {
        self.stats.as_ref()
    }

    /// The parent record of this neighbor, if it advertised a DAG.
    pub const fn parent(&self) -> Option<&Parent> {
        self.parent.as_ref()
    }

    /// Checks if this entry is locked and can't be evicted.
    pub const fn is_locked(&self) -> bool {
        self.locks > 0
    }

    fn candidate(&self) -> Option<Candidate<'_>> {
        self.parent.as_ref().map(|parent| Candidate {
            addr: self.addr,
            parent,
            stats: self.stats.as_ref(),
        })
    }

    /// Most recent time anything happened on the link with this neighbor.
    fn last_activity(&self) -> Option<Instant> {
        let stats = self.stats.as_ref()?;
        stats.last_rx().max(stats.last_tx()).max(stats.last_probe())
    }
}

/// Fixed capacity table of neighbors, keyed by link address.
#[derive(Debug)]
pub struct NeighborTable {
    slots: Vec<Option<Neighbor>>,
    index: HashMap<LinkAddr, usize, ahash::RandomState>,
}

impl NeighborTable {
    /// Create a new, empty table with room for `capacity` neighbors.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            index: HashMap::with_capacity_and_hasher(capacity, ahash::RandomState::new()),
        }
    }

    /// Amount of neighbors in the table.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Checks if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Maximum amount of neighbors in the table.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, addr: &LinkAddr) -> Option<&Neighbor> {
        self.index
            .get(addr)
            .and_then(|&slot| self.slots[slot].as_ref())
    }

    pub fn get_mut(&mut self, addr: &LinkAddr) -> Option<&mut Neighbor> {
        self.index
            .get(addr)
            .and_then(|&slot| self.slots[slot].as_mut())
    }

    /// The parent record of `addr`, if any.
    pub fn parent(&self, addr: &LinkAddr) -> Option<&Parent> {
        self.get(addr).and_then(|n| n.parent.as_ref())
    }

    pub(crate) fn parent_mut(&mut self, addr: &LinkAddr) -> Option<&mut Parent> {
        self.get_mut(addr).and_then(|n| n.parent.as_mut())
    }

    /// The link statistics of `addr`, if any.
    pub fn stats(&self, addr: &LinkAddr) -> Option<&LinkStats> {
        self.get(addr).and_then(|n| n.stats.as_ref())
    }

    /// Ensure `addr` is in the table. If the table is full an unlocked entry is evicted, and
    /// returned so the caller can release whatever referred to it.
    pub fn insert(
        &mut self,
        addr: LinkAddr,
        reason: InsertReason,
    ) -> Result<Option<Neighbor>, Error> {
        if self.index.contains_key(&addr) {
            return Ok(None);
        }

        let (slot, evicted) = match self.slots.iter().position(Option::is_none) {
            Some(slot) => (slot, None),
            None => {
                let Some(slot) = self.eviction_candidate(reason) else {
                    debug!(neighbor = %addr, ?reason, "Neighbor table full");
                    return Err(Error::NeighborTableFull);
                };
                let evicted = self.slots[slot].take();
                if let Some(ref evicted) = evicted {
                    debug!(neighbor = %evicted.addr, new = %addr, "Evicting neighbor");
                    self.index.remove(&evicted.addr);
                }
                (slot, evicted)
            }
        };

        trace!(neighbor = %addr, ?reason, "Adding neighbor");
        self.slots[slot] = Some(Neighbor::new(addr));
        self.index.insert(addr, slot);

        Ok(evicted)
    }

    /// Pick the entry to evict: an unlocked entry without parent record, or for DIOs any unlocked
    /// entry. The least recently active one is picked.
    fn eviction_candidate(&self, reason: InsertReason) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, n)| n.as_ref().map(|n| (slot, n)))
            .filter(|(_, n)| !n.is_locked() && (n.parent.is_none() || reason == InsertReason::Dio))
            .min_by_key(|(_, n)| (n.parent.is_some(), n.last_activity()))
            .map(|(slot, _)| slot)
    }

    /// Remove `addr` from the table, returning its entry.
    pub fn remove(&mut self, addr: &LinkAddr) -> Option<Neighbor> {
        let slot = self.index.remove(addr)?;
        self.slots[slot].take()
    }

    /// Drop the parent record of `addr`. The entry itself is removed as well if nothing else
    /// keeps it: no link statistics and no lock.
    pub(crate) fn remove_parent(&mut self, addr: &LinkAddr) -> Option<Parent> {
        let slot = *self.index.get(addr)?;
        let n = self.slots[slot].as_mut()?;
        let parent = n.parent.take();
        if n.stats.is_none() && !n.is_locked() {
            self.index.remove(addr);
            self.slots[slot] = None;
        }
        parent
    }

    /// Lock `addr`, protecting it from eviction. Locks are counted.
    pub fn lock(&mut self, addr: &LinkAddr) {
        if let Some(n) = self.get_mut(addr) {
            n.locks = n.locks.saturating_add(1);
        }
    }

    /// Release one lock on `addr`.
    pub fn unlock(&mut self, addr: &LinkAddr) {
        if let Some(n) = self.get_mut(addr) {
            n.locks = n.locks.saturating_sub(1);
        }
    }

    /// Iterate over all neighbors, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> + '_ {
        self.slots.iter().flatten()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Neighbor> + '_ {
        self.slots.iter_mut().flatten()
    }

    /// The parent record of `addr` with its link statistics, as evaluated by objective functions.
    pub fn candidate(&self, addr: &LinkAddr) -> Option<Candidate<'_>> {
        self.get(addr).and_then(Neighbor::candidate)
    }

    /// All parents in `dag`, in slot order.
    pub fn candidates(&self, dag: DagRef) -> impl Iterator<Item = Candidate<'_>> + '_ {
        self.iter()
            .filter_map(Neighbor::candidate)
            .filter(move |c| c.parent.dag == dag)
    }

    /// Addresses of all neighbors with a parent record, in slot order.
    pub fn parent_addrs(&self) -> Vec<LinkAddr> {
        self.iter()
            .filter(|n| n.parent.is_some())
            .map(|n| n.addr)
            .collect()
    }

    /// Clear all link statistics. Neighbors which are only known through their link statistics
    /// are removed.
    pub fn reset_link_stats(&mut self) {
        for slot in self.slots.iter_mut() {
            let Some(n) = slot else {
                continue;
            };
            n.stats = None;
            if n.parent.is_none() && !n.is_locked() {
                self.index.remove(&n.addr);
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::{InsertReason, NeighborTable};
    use crate::{
        addr::LinkAddr,
        error::Error,
        link_stats::{LinkStats, RssiSmoothing},
        lollipop::Lollipop,
        metric_container::MetricContainer,
        parent::{DagRef, Parent},
        rank::Rank,
    };

    fn parent() -> Parent {
        Parent::new(
            DagRef {
                instance: 1,
                slot: 0,
            },
            Rank::new(256),
            Lollipop::new(),
            MetricContainer::None,
        )
    }

    fn touch(table: &mut NeighborTable, addr: LinkAddr, at: Instant) {
        let mut stats = LinkStats::new();
        stats.record_receive(at, -70, RssiSmoothing::Ewma);
        table.get_mut(&addr).unwrap().stats = Some(stats);
    }

    #[test]
    fn insert_is_idempotent() {
        let mut table = NeighborTable::new(2);
        assert!(matches!(table.insert(1.into(), InsertReason::Dio), Ok(None)));
        assert!(matches!(table.insert(1.into(), InsertReason::Dio), Ok(None)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn evicts_least_recently_active_non_parent() {
        let start = Instant::now();
        let mut table = NeighborTable::new(3);
        for i in 1..=3u64 {
            table.insert(i.into(), InsertReason::LinkStats).unwrap();
            touch(&mut table, i.into(), start + Duration::from_secs(i));
        }
        table.get_mut(&1.into()).unwrap().parent = Some(parent());

        let evicted = table.insert(4.into(), InsertReason::LinkStats).unwrap();
        assert_eq!(evicted.map(|n| n.addr()), Some(LinkAddr::from(2)));
        assert!(table.get(&2.into()).is_none());
        assert!(table.get(&4.into()).is_some());
    }

    #[test]
    fn parents_only_evicted_for_dio() {
        let mut table = NeighborTable::new(1);
        table.insert(1.into(), InsertReason::Dio).unwrap();
        table.get_mut(&1.into()).unwrap().parent = Some(parent());

        assert!(matches!(
            table.insert(2.into(), InsertReason::LinkStats),
            Err(Error::NeighborTableFull)
        ));
        let evicted = table.insert(2.into(), InsertReason::Dio).unwrap();
        assert_eq!(evicted.map(|n| n.addr()), Some(LinkAddr::from(1)));
    }

    #[test]
    fn locked_entries_are_never_evicted() {
        let mut table = NeighborTable::new(1);
        table.insert(1.into(), InsertReason::Dio).unwrap();
        table.lock(&1.into());
        assert!(table.insert(2.into(), InsertReason::Dio).is_err());
        table.unlock(&1.into());
        assert!(table.insert(2.into(), InsertReason::Dio).is_ok());
    }

    #[test]
    fn remove_parent_drops_bare_entries() {
        let start = Instant::now();
        let mut table = NeighborTable::new(2);
        table.insert(1.into(), InsertReason::Dio).unwrap();
        table.insert(2.into(), InsertReason::Dio).unwrap();
        touch(&mut table, 2.into(), start);
        for addr in [1, 2] {
            table.get_mut(&addr.into()).unwrap().parent = Some(parent());
        }

        assert!(table.remove_parent(&1.into()).is_some());
        assert!(table.get(&1.into()).is_none());
        assert!(table.remove_parent(&2.into()).is_some());
        assert!(table.get(&2.into()).is_some());
        assert!(table.remove_parent(&2.into()).is_none());
    }

    #[test]
    fn reset_link_stats_drops_orphans() {
        let start = Instant::now();
        let mut table = NeighborTable::new(4);
        table.insert(1.into(), InsertReason::LinkStats).unwrap();
        table.insert(2.into(), InsertReason::Dio).unwrap();
        touch(&mut table, 1.into(), start);
        touch(&mut table, 2.into(), start);
        table.get_mut(&2.into()).unwrap().parent = Some(parent());

        table.reset_link_stats();
        assert!(table.get(&1.into()).is_none());
        let kept = table.get(&2.into()).unwrap();
        assert!(kept.stats().is_none());
        assert!(kept.parent().is_some());
        assert_eq!(table.parent_addrs(), vec![LinkAddr::from(2)]);
    }
}
