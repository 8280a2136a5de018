//! Dedicated logic for
//! [ranks](https://datatracker.ietf.org/doc/html/rfc6550#section-3.5).

use core::fmt;

use serde::{Deserialize, Serialize};

/// Value of the infinite rank.
const RANK_INFINITE: u16 = 0xFFFF;

/// A `Rank` is a node's position relative to the root of a DAG. A lower rank is closer to the
/// root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Rank(u16);

impl Rank {
    /// Create a new `Rank` with the given value.
    pub const fn new(value: u16) -> Self {
        Rank(value)
    }

    /// Creates a new infinite `Rank`, which marks a node as unreachable.
    pub const fn infinite() -> Self {
        Rank(RANK_INFINITE)
    }

    /// Checks if this rank is the infinite rank.
    pub const fn is_infinite(&self) -> bool {
        self.0 == RANK_INFINITE
    }

    /// The rank of a DAG root, given the minimum hop rank increase of the instance.
    pub const fn root(min_hop_rank_increase: u16) -> Self {
        Rank(min_hop_rank_increase)
    }

    /// Add a value to this rank, saturating at the infinite rank.
    pub const fn saturating_add(self, rhs: u16) -> Self {
        Rank(self.0.saturating_add(rhs))
    }

    /// The integer part of the rank, used when comparing ranks for loop avoidance.
    pub fn dag_rank(&self, min_hop_rank_increase: u16) -> u16 {
        if min_hop_rank_increase == 0 {
            return self.0;
        }
        self.0 / min_hop_rank_increase
    }

    /// Checks if `self` is an acceptable rank for a DAG whose lowest observed rank is `min_rank`.
    /// A `max_increase` of 0 disables the bound.
    pub fn is_acceptable(&self, min_rank: Rank, max_increase: u16, min_hop_rank_increase: u16) -> bool {
        !self.is_infinite()
            && (max_increase == 0
                || self.dag_rank(min_hop_rank_increase)
                    <= min_rank
                        .saturating_add(max_increase)
                        .dag_rank(min_hop_rank_increase))
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            f.pad("Infinite")
        } else {
            f.write_fmt(format_args!("{}", self.0))
        }
    }
}

impl From<u16> for Rank {
    fn from(value: u16) -> Self {
        Rank(value)
    }
}

impl From<Rank> for u16 {
    fn from(value: Rank) -> Self {
        value.0
    }
}
