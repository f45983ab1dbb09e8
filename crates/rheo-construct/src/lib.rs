//! rheo-construct: from LLIR control flow to RVSDG regions and back.
//!
//! The construction pipeline runs per function:
//!
//! 1. [`ssa::destruct_ssa`] -- phi TACs become assignments on split edges.
//! 2. [`restructure::restructure`] -- any closed, valid CFG becomes
//!    proper-structured; the back-edges broken along the way are returned.
//! 3. [`aggregation::aggregate`] -- the structured CFG collapses into a
//!    tree of entry/exit/block/linear/branch/loop nodes.
//! 4. [`annotation::annotate`] -- backward liveness over the tree yields
//!    per-node demand sets.
//! 5. [`build`] -- tree + demand + back-edges drive gamma/theta/lambda
//!    construction.
//!
//! [`destruct`] goes the other way, lowering an RVSDG module back into a
//! CFG-based LLIR module.

pub mod aggregation;
pub mod annotation;
pub mod build;
pub mod destruct;
pub mod error;
pub mod restructure;
pub mod ssa;

pub use aggregation::{aggregate, AggNode, AggNodeId, AggNodeKind, AggTree};
pub use annotation::{annotate, BranchDemand, DemandMap, DemandSet};
pub use build::build_rvsdg;
pub use destruct::destruct_rvsdg;
pub use error::ConstructError;
pub use restructure::{restructure, BackEdge};
pub use ssa::destruct_ssa;
