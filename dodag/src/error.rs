use crate::of::Ocp;

/// Errors returned by operator invoked operations of the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no free instance slot")]
    InstanceTableFull,
    #[error("no free DAG slot in the instance")]
    DagTableFull,
    #[error("no free or evictable neighbor table slot")]
    NeighborTableFull,
    #[error("objective code point {0} is not supported")]
    UnsupportedObjective(Ocp),
    #[error("mode of operation {0} is not supported")]
    UnsupportedMode(u8),
    #[error("instance {0} is unknown")]
    UnknownInstance(u8),
    #[error("this node is not the root of instance {0}")]
    NotRoot(u8),
    #[error("prefix length {0} is larger than 128 bits")]
    InvalidPrefixLength(u8),
}
