//! A single DODAG within an instance.

use std::net::Ipv6Addr;

use serde::Serialize;

use crate::{addr::LinkAddr, lollipop::Lollipop, message::PrefixInfo, rank::Rank};

/// State of one DAG of an instance.
#[derive(Debug, Clone)]
pub struct Dag {
    pub(crate) id: Ipv6Addr,
    pub(crate) version: Lollipop,
    pub(crate) rank: Rank,
    /// Lowest rank this node had in the DAG, bounds the rank increase.
    pub(crate) min_rank: Rank,
    pub(crate) grounded: bool,
    pub(crate) preference: u8,
    pub(crate) joined: bool,
    pub(crate) prefix: Option<PrefixInfo>,
    /// Link address of the preferred parent, resolved through the neighbor table.
    pub(crate) preferred_parent: Option<LinkAddr>,
    /// Remaining lifetime in periodic ticks.
    pub(crate) lifetime: u32,
}

impl Dag {
    pub(crate) fn new(id: Ipv6Addr) -> Self {
        Self {
            id,
            version: Lollipop::new(),
            rank: Rank::infinite(),
            min_rank: Rank::infinite(),
            grounded: false,
            preference: 0,
            joined: false,
            prefix: None,
            preferred_parent: None,
            lifetime: 0,
        }
    }

    /// The DAG id, the address of its root.
    pub const fn id(&self) -> Ipv6Addr {
        self.id
    }

    pub const fn version(&self) -> Lollipop {
        self.version
    }

    /// Our own rank in this DAG.
    pub const fn rank(&self) -> Rank {
        self.rank
    }

    pub const fn min_rank(&self) -> Rank {
        self.min_rank
    }

    pub const fn grounded(&self) -> bool {
        self.grounded
    }

    pub const fn preference(&self) -> u8 {
        self.preference
    }

    pub const fn joined(&self) -> bool {
        self.joined
    }

    pub const fn prefix(&self) -> Option<&PrefixInfo> {
        self.prefix.as_ref()
    }

    pub const fn preferred_parent(&self) -> Option<LinkAddr> {
        self.preferred_parent
    }

    /// A serializable snapshot of this DAG.
    pub fn info(&self, instance_id: u8) -> DagInfo {
        DagInfo {
            instance_id,
            dag_id: self.id,
            version: self.version,
            rank: self.rank,
            min_rank: self.min_rank,
            grounded: self.grounded,
            preference: self.preference,
            joined: self.joined,
            preferred_parent: self.preferred_parent,
        }
    }
}

/// Snapshot of a DAG, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DagInfo {
    pub instance_id: u8,
    pub dag_id: Ipv6Addr,
    pub version: Lollipop,
    pub rank: Rank,
    pub min_rank: Rank,
    pub grounded: bool,
    pub preference: u8,
    pub joined: bool,
    pub preferred_parent: Option<LinkAddr>,
}
