//! This module is used for collection of runtime metrics of a routing [`Engine`](crate::Engine).
//! The main item of interest is the [`Metrics`] trait. Users can provide their own implementation
//! of this, or use the default provided implementation to disable gathering metrics.

/// The collection of all metrics exported by an [`Engine`](crate::Engine). It is up to the user
/// to provide an implementation which implements the methods for metrics they are interested in.
/// All methods have a default implementation, so if the user is not interested in any metrics, a
/// NOOP handler can be implemented as follows:
///
/// ```rust
/// use dodag::metrics::Metrics;
///
/// #[derive(Clone)]
/// struct NoMetrics;
/// impl Metrics for NoMetrics {}
/// ```
pub trait Metrics {
    /// The engine processed a DIO.
    #[inline]
    fn dio_processed(&self) {}

    /// The engine dropped a DIO without acting on it, because it was invalid or advertised an
    /// unsupported configuration.
    #[inline]
    fn dio_ignored(&self) {}

    /// A DIO was sent, either multicast or unicast.
    #[inline]
    fn dio_sent(&self, _unicast: bool) {}

    /// A scheduled multicast DIO was not sent, as enough consistent DIOs were heard in the current
    /// interval.
    #[inline]
    fn dio_suppressed(&self) {}

    /// The DIO trickle timer was reset to its minimum interval.
    #[inline]
    fn dio_timer_reset(&self) {}

    /// The engine processed a DIS. Additionally, it is recorded if the DIS was multicast.
    #[inline]
    fn dis_processed(&self, _multicast: bool) {}

    /// A DIS was sent to solicit DIOs from neighbors.
    #[inline]
    fn dis_sent(&self) {}

    /// A DAO was sent to the preferred parent. Additionally, it is recorded if the DAO withdraws
    /// the route (zero lifetime).
    #[inline]
    fn dao_sent(&self, _no_path: bool) {}

    /// A DAO acknowledgement matching the last sent DAO was processed.
    #[inline]
    fn dao_ack_processed(&self, _accepted: bool) {}

    /// A probe was sent to a neighbor.
    #[inline]
    fn probe_sent(&self, _urgent: bool) {}

    /// The preferred parent of a DAG changed.
    #[inline]
    fn parent_switch(&self) {}

    /// A local repair was started after losing all parents.
    #[inline]
    fn local_repair(&self) {}

    /// This node participated in a global repair, following a new DAG version.
    #[inline]
    fn global_repair(&self) {}

    /// This node, as root, started a global repair.
    #[inline]
    fn root_repair(&self) {}

    /// An entry could not be allocated because a table was full.
    #[inline]
    fn memory_overflow(&self) {}

    /// This node joined a DAG.
    #[inline]
    fn dag_joined(&self) {}

    /// This node left a DAG.
    #[inline]
    fn dag_left(&self) {}

    /// Ranks were recalculated on a periodic tick, for the given amount of updated parents.
    #[inline]
    fn ranks_recalculated(&self, _parents: usize) {}
}
