//! Identity types for graph nodes and stream walkers.
//!
//! All IDs are newtypes over `u32` that serve as direct array indices
//! into their respective storage vectors, providing O(1) lookup.

use std::fmt;

/// Index into the node list of a `SensorGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Index into the walker arena of a `SensorLog`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WalkerId(pub u32);

impl WalkerId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_index_directly() {
        assert_eq!(NodeId(42).index(), 42);
        assert_eq!(NodeId(42).to_string(), "NodeId(42)");
        assert_eq!(format!("{:?}", WalkerId(5)), "WalkerId(5)");
        assert_eq!(WalkerId(5).index(), 5);
    }
}
