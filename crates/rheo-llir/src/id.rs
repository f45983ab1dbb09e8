//! Stable ID newtypes for IR entities.
//!
//! All IDs are distinct newtype wrappers over `u32`, providing type safety
//! so that a `VarId` cannot be accidentally used where a `BlockId` is
//! expected.

use std::fmt;

use petgraph::graph::{EdgeIndex, NodeIndex};
use serde::{Deserialize, Serialize};

/// Stable CFG block identifier. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Stable CFG edge identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

/// Variable identity within one CFG's variable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(pub u32);

/// Node identity within the inter-procedural graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpgNodeId(pub u32);

/// Identity of a struct declaration in the [`StructRegistry`](crate::types::StructRegistry).
///
/// Struct types compare equal iff they share a declaration handle, which is
/// what permits recursive struct types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructDeclId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for IpgNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Bridges between our IDs and petgraph's indices.

impl From<NodeIndex<u32>> for BlockId {
    fn from(idx: NodeIndex<u32>) -> Self {
        BlockId(idx.index() as u32)
    }
}

impl From<BlockId> for NodeIndex<u32> {
    fn from(id: BlockId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

impl From<EdgeIndex<u32>> for EdgeId {
    fn from(idx: EdgeIndex<u32>) -> Self {
        EdgeId(idx.index() as u32)
    }
}

impl From<EdgeId> for EdgeIndex<u32> {
    fn from(id: EdgeId) -> Self {
        EdgeIndex::new(id.0 as usize)
    }
}

impl From<NodeIndex<u32>> for IpgNodeId {
    fn from(idx: NodeIndex<u32>) -> Self {
        IpgNodeId(idx.index() as u32)
    }
}

impl From<IpgNodeId> for NodeIndex<u32> {
    fn from(id: IpgNodeId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}
