use axum::{routing::get, Router};
use dodag::metrics::Metrics;
use prometheus::{
    opts, register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};
use tracing::{error, info};

use std::net::SocketAddr;

/// A [`Metrics`] implementation which uses prometheus to expose the metrics to the outside world.
///
/// All counters live in the default registry, so clones of one exporter can be handed to several
/// engines and their events are summed.
#[derive(Clone)]
pub struct PrometheusExporter {
    dio_processed: IntCounterVec,
    dio_sent: IntCounterVec,
    dio_suppressed: IntCounter,
    dio_timer_reset: IntCounter,
    dis_processed: IntCounterVec,
    dis_sent: IntCounter,
    dao_sent: IntCounterVec,
    dao_ack_processed: IntCounterVec,
    probe_sent: IntCounterVec,
    parent_switch: IntCounter,
    repairs: IntCounterVec,
    memory_overflow: IntCounter,
    dag_membership: IntCounterVec,
    ranks_recalculated: IntCounter,
}

impl PrometheusExporter {
    /// Create a new [`PrometheusExporter`], registering its counters in the default registry.
    ///
    /// # Panics
    ///
    /// Panics if the counters are already registered, i.e. when called twice.
    pub fn new() -> Self {
        Self {
            dio_processed: counter_vec(
                "dodag_dio_received",
                "Received DIO's, by what the engine did with them",
                "action",
            ),
            dio_sent: counter_vec("dodag_dio_sent", "DIO's sent, by destination type", "destination"),
            dio_suppressed: counter(
                "dodag_dio_suppressed",
                "Scheduled multicast DIO's which were not sent because enough consistent DIO's were heard",
            ),
            dio_timer_reset: counter(
                "dodag_dio_timer_reset",
                "Amount of times the DIO trickle timer was reset to its minimum interval",
            ),
            dis_processed: counter_vec(
                "dodag_dis_received",
                "Processed DIS's, by destination type",
                "destination",
            ),
            dis_sent: counter(
                "dodag_dis_sent",
                "DIS's sent to solicit DIO's while no DAG was usable",
            ),
            dao_sent: counter_vec("dodag_dao_sent", "DAO's sent to the preferred parent, by kind", "kind"),
            dao_ack_processed: counter_vec(
                "dodag_dao_ack_received",
                "Acknowledgements of our last DAO, by outcome",
                "outcome",
            ),
            probe_sent: counter_vec("dodag_probe_sent", "Link probes sent to neighbors, by urgency", "urgency"),
            parent_switch: counter(
                "dodag_parent_switch",
                "Amount of times the preferred parent of a DAG changed",
            ),
            repairs: counter_vec("dodag_repairs", "Repairs of the DAG, by kind", "kind"),
            memory_overflow: counter(
                "dodag_memory_overflow",
                "Entries which could not be allocated because a table was full",
            ),
            dag_membership: counter_vec("dodag_dag_membership", "DAG's joined and left", "event"),
            ranks_recalculated: counter(
                "dodag_ranks_recalculated",
                "Parents whose rank was recalculated on a periodic tick",
            ),
        }
    }

    /// Spawns a HTTP server on the provided [`SocketAddr`], to export the gathered metrics. Metrics
    /// are served under the /metrics endpoint.
    pub fn spawn(self, listen_addr: SocketAddr) {
        info!(%listen_addr, "Serving routing metrics on /metrics");
        let app = Router::new().route("/metrics", get(serve_metrics));
        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(listen_addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Failed to bind listener for Http metrics server: {e}");
                    error!("metrics disabled");
                    return;
                }
            };

            let server = axum::serve(listener, app.into_make_service());
            if let Err(e) = server.await {
                error!("Http metrics server error: {e}");
            }
        });
    }
}

fn counter(name: &str, help: &str) -> IntCounter {
    register_int_counter!(name, help).expect("Can register int counter in default registry")
}

fn counter_vec(name: &str, help: &str, label: &str) -> IntCounterVec {
    register_int_counter_vec!(opts!(name, help), &[label])
        .expect("Can register int counter vec in default registry")
}

/// Expose prometheus formatted metrics
async fn serve_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let metric_families = prometheus::gather();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

impl Metrics for PrometheusExporter {
    #[inline]
    fn dio_processed(&self) {
        self.dio_processed.with_label_values(&["processed"]).inc()
    }

    #[inline]
    fn dio_ignored(&self) {
        self.dio_processed.with_label_values(&["ignored"]).inc()
    }

    #[inline]
    fn dio_sent(&self, unicast: bool) {
        let label = if unicast { "unicast" } else { "multicast" };
        self.dio_sent.with_label_values(&[label]).inc()
    }

    #[inline]
    fn dio_suppressed(&self) {
        self.dio_suppressed.inc()
    }

    #[inline]
    fn dio_timer_reset(&self) {
        self.dio_timer_reset.inc()
    }

    #[inline]
    fn dis_processed(&self, multicast: bool) {
        let label = if multicast { "multicast" } else { "unicast" };
        self.dis_processed.with_label_values(&[label]).inc()
    }

    #[inline]
    fn dis_sent(&self) {
        self.dis_sent.inc()
    }

    #[inline]
    fn dao_sent(&self, no_path: bool) {
        let label = if no_path { "no_path" } else { "register" };
        self.dao_sent.with_label_values(&[label]).inc()
    }

    #[inline]
    fn dao_ack_processed(&self, accepted: bool) {
        let label = if accepted { "accepted" } else { "rejected" };
        self.dao_ack_processed.with_label_values(&[label]).inc()
    }

    #[inline]
    fn probe_sent(&self, urgent: bool) {
        let label = if urgent { "urgent" } else { "periodic" };
        self.probe_sent.with_label_values(&[label]).inc()
    }

    #[inline]
    fn parent_switch(&self) {
        self.parent_switch.inc()
    }

    #[inline]
    fn local_repair(&self) {
        self.repairs.with_label_values(&["local"]).inc()
    }

    #[inline]
    fn global_repair(&self) {
        self.repairs.with_label_values(&["global"]).inc()
    }

    #[inline]
    fn root_repair(&self) {
        self.repairs.with_label_values(&["root"]).inc()
    }

    #[inline]
    fn memory_overflow(&self) {
        self.memory_overflow.inc()
    }

    #[inline]
    fn dag_joined(&self) {
        self.dag_membership.with_label_values(&["joined"]).inc()
    }

    #[inline]
    fn dag_left(&self) {
        self.dag_membership.with_label_values(&["left"]).inc()
    }

    #[inline]
    fn ranks_recalculated(&self, parents: usize) {
        self.ranks_recalculated.inc_by(parents as u64)
    }
}

#[cfg(test)]
mod tests {
    use dodag::metrics::Metrics;

    use super::{serve_metrics, PrometheusExporter};

    /// Sum of the series of `name` in the served exposition, optionally only those carrying
    /// `label` as a label value.
    fn value(exposition: &str, name: &str, label: Option<&str>) -> u64 {
        exposition
            .lines()
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| line.rsplit_once(' '))
            .filter(|(series, _)| {
                let metric = series.split('{').next().unwrap_or_default();
                metric == name && label.map_or(true, |l| series.contains(&format!("\"{l}\"")))
            })
            .map(|(_, value)| value.parse::<u64>().unwrap())
            .sum()
    }

    // The default registry is process wide, so one exporter serves every assertion.
    #[tokio::test]
    async fn events_reach_their_counters() {
        let metrics = PrometheusExporter::new();
        let clone = metrics.clone();

        metrics.dio_processed();
        clone.dio_ignored();
        metrics.dio_sent(true);
        metrics.local_repair();
        metrics.root_repair();
        metrics.parent_switch();
        clone.ranks_recalculated(3);
        metrics.dao_sent(true);

        let out = serve_metrics().await;
        assert_eq!(value(&out, "dodag_dio_received", Some("processed")), 1);
        assert_eq!(value(&out, "dodag_dio_received", Some("ignored")), 1);
        assert_eq!(value(&out, "dodag_dio_sent", Some("unicast")), 1);
        assert_eq!(value(&out, "dodag_repairs", None), 2);
        assert_eq!(value(&out, "dodag_parent_switch", None), 1);
        assert_eq!(value(&out, "dodag_ranks_recalculated", None), 3);
        assert_eq!(value(&out, "dodag_dao_sent", Some("no_path")), 1);
        assert_eq!(value(&out, "dodag_dao_sent", Some("register")), 0);
    }
}
