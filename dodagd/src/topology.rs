//! The simulation file: engine tunables shared by all nodes, the nodes and the links between
//! them.

use std::{
    collections::HashSet,
    net::{Ipv6Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Environment, File, FileFormat};
use dodag::{LinkAddr, NodeMode};
use ipnet::Ipv6Net;
use serde::Deserialize;

/// Name of the configuration file looked up in the user config directory.
const DEFAULT_CONFIG_FILE: &str = "dodagd/topology.toml";

/// Errors in the topology of a simulation.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("the topology has no nodes")]
    Empty,
    #[error("node name {0} is used more than once")]
    DuplicateName(String),
    #[error("link address {0} is used more than once")]
    DuplicateAddress(LinkAddr),
    #[error("link references unknown node {0}")]
    UnknownNode(String),
    #[error("link {0} - {1} connects a node to itself")]
    SelfLink(String, String),
    #[error("delivery ratio {0} of link {1} - {2} is not in [0, 1]")]
    InvalidDelivery(f64, String, String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Simulated time to run, in seconds.
    pub duration_secs: u64,
    /// Run against the wall clock instead of simulated time.
    pub realtime: bool,
    /// Seed of all random number generators. A random seed is picked if not set.
    pub seed: Option<u64>,
    /// Link layer transmissions of a unicast frame before giving up.
    pub max_attempts: u8,
    /// Frames received below this signal strength, in dBm, are lost.
    pub sensitivity: i16,
    pub metrics_api_address: Option<SocketAddr>,
    /// Tunables of every engine, nodes can override the mode.
    pub engine: dodag::Config,
    pub nodes: Vec<NodeConfig>,
    pub links: Vec<LinkConfig>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            duration_secs: 600,
            realtime: false,
            seed: None,
            max_attempts: 3,
            sensitivity: -94,
            metrics_api_address: None,
            engine: dodag::Config::default(),
            nodes: Vec::new(),
            links: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub addr: LinkAddr,
    /// Root of a DAG from the start.
    #[serde(default)]
    pub root: bool,
    /// DAG id used when root. Derived from the link address if not set.
    pub dag_id: Option<Ipv6Addr>,
    /// Prefix announced when root.
    pub prefix: Option<Ipv6Net>,
    pub mode: Option<NodeMode>,
    /// Simulated seconds before the node is switched on.
    #[serde(default)]
    pub start_delay_secs: u64,
}

impl NodeConfig {
    pub fn dag_id(&self) -> Ipv6Addr {
        self.dag_id.unwrap_or_else(|| {
            Ipv6Addr::from((0xfd00_u128 << 112) | u64::from_be_bytes(*self.addr.as_bytes()) as u128)
        })
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_secs)
    }
}

/// A bidirectional radio link.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    pub a: String,
    pub b: String,
    /// Signal strength at which either end hears the other, in dBm.
    pub rssi: i16,
    /// Probability that a single frame arrives.
    #[serde(default = "full_delivery")]
    pub delivery: f64,
    /// Change of the signal strength per second, in dBm, emulating nodes moving apart or closer.
    #[serde(default)]
    pub drift: f32,
}

fn full_delivery() -> f64 {
    1.0
}

impl SimConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    /// Check that names and addresses are unique and every link connects 2 known nodes.
    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.nodes.is_empty() {
            return Err(TopologyError::Empty);
        }
        let mut names = HashSet::new();
        let mut addrs = HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return Err(TopologyError::DuplicateName(node.name.clone()));
            }
            if !addrs.insert(node.addr) {
                return Err(TopologyError::DuplicateAddress(node.addr));
            }
        }
        for link in &self.links {
            for end in [&link.a, &link.b] {
                if !names.contains(end.as_str()) {
                    return Err(TopologyError::UnknownNode(end.clone()));
                }
            }
            if link.a == link.b {
                return Err(TopologyError::SelfLink(link.a.clone(), link.b.clone()));
            }
            if !(0.0..=1.0).contains(&link.delivery) {
                return Err(TopologyError::InvalidDelivery(
                    link.delivery,
                    link.a.clone(),
                    link.b.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Link address of the node called `name`.
    pub fn addr_of(&self, name: &str) -> Option<LinkAddr> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.addr)
    }
}

/// Load the simulation file. Without an explicit path, the file in the user config directory is
/// used if it exists. Environment variables prefixed with `DODAGD__` override file values.
pub fn load(path: Option<&Path>) -> Result<SimConfig, config::ConfigError> {
    let mut builder = config::Config::builder();
    match path {
        Some(path) => {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        None => {
            if let Some(path) = default_path() {
                builder = builder.add_source(
                    File::from(path)
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }
    }
    builder
        .add_source(Environment::with_prefix("DODAGD").separator("__"))
        .build()?
        .try_deserialize()
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(DEFAULT_CONFIG_FILE))
}
