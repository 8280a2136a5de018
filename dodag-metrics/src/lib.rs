//! Implementations of the [`Metrics`](dodag::metrics::Metrics) trait of the routing engine.
//! [`NoMetrics`] records nothing, and with the `prometheus` feature [`PrometheusExporter`]
//! exposes all metrics over HTTP in the prometheus text format.

mod noop;
pub use noop::NoMetrics;

#[cfg(feature = "prometheus")]
mod prometheus;
#[cfg(feature = "prometheus")]
pub use prometheus::PrometheusExporter;
