// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Node and flow-control bucket identifiers.

use std::fmt;

/// Linear address of a node.
///
/// Bijective with a coordinate tuple via the positional encoding implemented
/// by [`Shape`](crate::Shape); the raw integer is what travels in messages and
/// indexes the node arena.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The arena index for this node.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<usize> for NodeId {
    fn from(index: usize) -> Self {
        Self(index as u32)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of a per-link flow-control aggregation.
///
/// Derived from `(destination, remaining spray hops at enqueue time)`; frames
/// sharing a bucket share one outstanding-token counter on one link. A
/// reserved value (see [`Shape::direct_bucket`](crate::Shape::direct_bucket))
/// marks frames whose next hop is their final destination, which bypass token
/// accounting entirely.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketId(pub u32);

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}
