//! Final state of the simulated nodes, printed as a table or as JSON.

use std::{collections::HashMap, net::Ipv6Addr};

use dodag::{Engine, LinkAddr, Lollipop, Metrics, NeighborReport, Rank};
use ipnet::Ipv6Net;
use prettytable::{row, Table};
use serde::Serialize;
use tokio::time::Instant;

use crate::{node::SimHost, routes::RouteInfo, topology::NodeConfig};

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub name: String,
    pub addr: LinkAddr,
    pub root: bool,
    pub joined: bool,
    pub dag_id: Option<Ipv6Addr>,
    pub version: Option<Lollipop>,
    pub rank: Option<Rank>,
    pub parent: Option<LinkAddr>,
    /// Name of the preferred parent, filled in once all reports are in.
    pub parent_name: Option<String>,
    pub has_downward_route: bool,
    pub addresses: Vec<Ipv6Net>,
    pub downward_routes: Vec<RouteInfo>,
    pub neighbors: Vec<NeighborReport>,
}

impl NodeReport {
    pub fn new<M: Metrics>(
        config: &NodeConfig,
        engine: &Engine<M>,
        host: &SimHost,
        now: Instant,
    ) -> Self {
        let dag = engine
            .instance(engine.config().instance_id)
            .and_then(|inst| inst.current_dag());
        Self {
            name: config.name.clone(),
            addr: config.addr,
            root: engine.instances().any(|inst| inst.is_root()),
            joined: engine.has_joined(),
            dag_id: dag.map(|dag| dag.id()),
            version: dag.map(|dag| dag.version()),
            rank: dag.map(|dag| dag.rank()),
            parent: dag.and_then(|dag| dag.preferred_parent()),
            parent_name: None,
            has_downward_route: engine.has_downward_route(),
            addresses: host.routes().addresses().to_vec(),
            downward_routes: host.routes().downward_routes(now),
            neighbors: engine.neighbor_report(now),
        }
    }
}

/// Resolve the names of preferred parents and order the reports by rank, roots first.
pub fn finish(reports: &mut [NodeReport]) {
    let names: HashMap<LinkAddr, String> = reports
        .iter()
        .map(|r| (r.addr, r.name.clone()))
        .collect();
    for report in reports.iter_mut() {
        report.parent_name = report.parent.and_then(|p| names.get(&p).cloned());
    }
    reports.sort_by(|a, b| {
        let rank = |r: &NodeReport| r.rank.unwrap_or_else(Rank::infinite);
        rank(a).cmp(&rank(b)).then_with(|| a.name.cmp(&b.name))
    });
}

pub fn print_json(reports: &[NodeReport]) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(reports)?);
    Ok(())
}

pub fn print_table(reports: &[NodeReport], with_neighbors: bool) {
    let mut table = Table::new();
    table.add_row(row![
        "Node",
        "Address",
        "Rank",
        "Parent",
        "DAG",
        "Version",
        "Downward",
        "Routes"
    ]);
    for report in reports {
        table.add_row(row![
            report.name,
            report.addr,
            report.rank.map_or_else(|| "-".to_string(), |r| r.to_string()),
            report
                .parent_name
                .clone()
                .or_else(|| report.root.then(|| "(root)".to_string()))
                .unwrap_or_else(|| "-".to_string()),
            report.dag_id.map_or_else(|| "-".to_string(), |d| d.to_string()),
            report.version.map_or_else(|| "-".to_string(), |v| v.to_string()),
            if report.has_downward_route { "yes" } else { "no" },
            report.downward_routes.len(),
        ]);
    }
    table.printstd();

    if !with_neighbors {
        return;
    }
    for report in reports.iter().filter(|r| !r.neighbors.is_empty()) {
        println!("\nCandidate parents of {}", report.name);
        let mut table = Table::new();
        table.add_row(row![
            "Neighbor",
            "Rank",
            "Link cost",
            "Rank via",
            "ETX",
            "RSSI",
            "Fresh",
            "Preferred",
            "Last tx (s)"
        ]);
        for n in &report.neighbors {
            table.add_row(row![
                n.addr,
                n.rank,
                n.link_cost,
                n.rank_via,
                n.etx.map_or_else(|| "-".to_string(), |e| e.to_string()),
                n.rssi.map_or_else(|| "-".to_string(), |r| r.to_string()),
                n.fresh,
                n.preferred,
                n.last_tx_secs.map_or_else(|| "-".to_string(), |s| s.to_string()),
            ]);
        }
        table.printstd();
    }
}
