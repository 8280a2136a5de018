//! Candidate parents, as learned from DIOs.

use serde::Serialize;

use crate::{lollipop::Lollipop, metric_container::MetricContainer, rank::Rank};

/// Reference to a DAG slot of an instance. Parents refer to their DAG by slot so they never hold
/// a pointer into the instance table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DagRef {
    pub instance: u8,
    pub slot: usize,
}

/// A candidate (or preferred) parent in a DAG. The neighbor table owns it, keyed by the link
/// address of the neighbor.
#[derive(Debug, Clone, PartialEq)]
pub struct Parent {
    pub(crate) dag: DagRef,
    pub(crate) rank: Rank,
    pub(crate) dtsn: Lollipop,
    pub(crate) mc: MetricContainer,
    /// Set when the parent advertised new information which has not been processed yet.
    pub(crate) updated: bool,
}

impl Parent {
    pub(crate) fn new(dag: DagRef, rank: Rank, dtsn: Lollipop, mc: MetricContainer) -> Self {
        Self {
            dag,
            rank,
            dtsn,
            mc,
            updated: false,
        }
    }

    /// The DAG this parent belongs to.
    pub const fn dag(&self) -> DagRef {
        self.dag
    }

    /// The rank advertised by this parent.
    pub const fn rank(&self) -> Rank {
        self.rank
    }

    /// The DTSN last advertised by this parent.
    pub const fn dtsn(&self) -> Lollipop {
        self.dtsn
    }

    /// The metric container last advertised by this parent.
    pub const fn metric_container(&self) -> &MetricContainer {
        &self.mc
    }

    /// Hop count of this node through this parent.
    pub const fn hop_count(&self) -> u8 {
        self.mc.hop_count().saturating_add(1)
    }
}
