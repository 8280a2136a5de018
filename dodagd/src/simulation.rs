//! Wires the nodes of a topology to a shared medium and runs them for the configured time.

use std::sync::Arc;

use dodag::{Engine, Metrics};
use rand::{rngs::StdRng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    medium::Medium,
    node::Node,
    report::{self, NodeReport},
    topology::{SimConfig, TopologyError},
};

/// Run the simulation described by `config`, every engine reporting to a clone of `metrics`.
/// Returns the final state of every node.
pub async fn run<M>(config: &SimConfig, metrics: M) -> Result<Vec<NodeReport>, TopologyError>
where
    M: Metrics + Clone + Send + 'static,
{
    let (medium, mut inboxes) = Medium::new(config)?;
    let medium = Arc::new(medium);
    let seed = config.seed.unwrap_or_else(rand::random);
    info!(
        nodes = config.nodes.len(),
        links = config.links.len(),
        seed,
        duration = ?config.duration(),
        "Starting simulation"
    );

    let cancel = CancellationToken::new();
    let mut handles = Vec::with_capacity(config.nodes.len());
    for (i, node) in config.nodes.iter().enumerate() {
        let Some(inbox) = inboxes.remove(&node.addr) else {
            continue;
        };
        let mut engine_config = config.engine.clone();
        if let Some(mode) = node.mode {
            engine_config.mode = mode;
        }
        let i = i as u64;
        let engine = Engine::with_rng(
            engine_config,
            metrics.clone(),
            StdRng::seed_from_u64(seed.wrapping_add(2 * i)),
        );
        let node = Node::new(
            node.clone(),
            engine,
            medium.clone(),
            inbox,
            StdRng::seed_from_u64(seed.wrapping_add(2 * i + 1)),
        );
        handles.push(tokio::spawn(node.run(cancel.clone())));
    }

    tokio::time::sleep(config.duration()).await;
    cancel.cancel();

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => error!("Node task failed: {e}"),
        }
    }
    report::finish(&mut reports);
    info!(
        joined = reports.iter().filter(|r| r.joined).count(),
        nodes = reports.len(),
        "Simulation finished"
    );
    Ok(reports)
}
