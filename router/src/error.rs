use crate::check::CheckError;
use maze_common::geom::coord::GridCoord;

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no routing layers defined")]
    NoLayers,

    /// A layer with zero or negative pitch cannot be discretized.
    #[error("layer '{layer}' has zero routing pitch")]
    ZeroPitch { layer: String },

    #[error("die area is empty")]
    EmptyDie,

    #[error("grid of {points} points exceeds the addressable range")]
    GridTooLarge { points: u64 },

    /// Committing a target the search never reached.
    #[error("target {at} was not reached by the search")]
    UnreachedTarget { at: GridCoord },

    #[error("predecessor chain from {from} is broken at {at}")]
    BrokenPath { from: GridCoord, at: GridCoord },

    /// Rip-up found a cell held by a different net than the one being removed.
    #[error("rip-up of net '{net}' found cell {at} owned by another net")]
    OwnershipMismatch { net: String, at: GridCoord },

    #[error(transparent)]
    Check(#[from] CheckError),
}
