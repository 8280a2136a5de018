use dodag::metrics::Metrics;

/// A [`Metrics`] implementation which does not record anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetrics;

impl Metrics for NoMetrics {}
