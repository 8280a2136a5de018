//! Control plane of an RPL (IPv6 Routing Protocol for Low-Power and Lossy Networks) node.
//!
//! The [`Engine`] tracks instances, DAGs and candidate parents, processes incoming DIO, DIS and
//! DAO-ACK messages, runs the trickle, DAO and probing timers and selects the preferred parent
//! through a pluggable objective function. Everything outside the control plane, sending
//! messages, arming timers and installing routes, is delegated to a [`Host`].

pub mod addr;
pub mod config;
pub mod dag;
pub mod engine;
pub mod error;
pub mod fixmath;
pub mod host;
pub mod instance;
pub mod link_stats;
pub mod lollipop;
pub mod message;
pub mod metric_container;
pub mod metrics;
pub mod neighbor;
pub mod of;
pub mod parent;
mod probing;
pub mod rank;
#[cfg(test)]
mod testing;
pub mod timer;

pub use addr::LinkAddr;
pub use config::{Config, NodeMode, ProbingPolicy};
pub use dag::DagInfo;
pub use engine::{Engine, NeighborReport};
pub use error::Error;
pub use host::{Clock, Host, RouteStore, TimerService, Transmitter, Withdraw};
pub use instance::InstanceInfo;
pub use link_stats::TxStatus;
pub use lollipop::Lollipop;
pub use message::{DaoAckStatus, DaoMessage, DioMessage, Mop, PrefixInfo, Probe, ProbeKind};
pub use metrics::Metrics;
pub use rank::Rank;
pub use timer::TimerId;
