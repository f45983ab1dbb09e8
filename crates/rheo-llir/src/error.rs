//! Core error types for rheo-llir.
//!
//! Uses `thiserror` for structured, matchable error variants. All variants
//! are invariant violations: they indicate a malformed IR, and callers are
//! expected to abort the compilation rather than recover.

use thiserror::Error;

/// Errors produced by the rheo-llir crate.
#[derive(Debug, Error)]
pub enum LlirError {
    /// Attempted to remove a CFG node that still has incoming edges.
    #[error("cannot remove bb{block}: it still has incoming edges")]
    NodeHasInedges { block: u32 },

    /// A CFG handed to a pipeline stage was not closed.
    #[error("CFG is not closed: entry has predecessors or exit has successors")]
    CfgNotClosed,

    /// A CFG handed to a pipeline stage had unreachable or non-co-reachable
    /// blocks.
    #[error("CFG is not valid: some block is unreachable from entry or cannot reach exit")]
    CfgNotValid,

    /// A block carries a branch TAC somewhere other than its last position,
    /// or its out-degree disagrees with the branch's alternative count.
    #[error("bb{block}: branch TAC with {nalternatives} alternatives but {noutedges} out-edges")]
    BranchArityMismatch {
        block: u32,
        nalternatives: u64,
        noutedges: usize,
    },

    /// A name was registered twice in the inter-procedural graph.
    #[error("duplicate IPG node name: '{name}'")]
    DuplicateIpgName { name: String },
}
