//! Normal-form flag sets.
//!
//! Each simple-node class carries a set of rewrite flags controlling which
//! reductions the `red` pass may apply. Flags hang off the graph object,
//! keyed by operation kind, not by individual node. Every rule preserves
//! the set of observable memory effects; rules that could change observable
//! behaviour do not exist here.

use serde::{Deserialize, Serialize};

/// Rewrite flags for load nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadNormalForm {
    /// `load(a, [mux(s_1..s_n)])  =>  load(a, [s_1..s_n])`
    pub enable_load_mux: bool,
    /// Loads through an alloca drop state inputs belonging to other
    /// allocations.
    pub enable_load_alloca: bool,
    /// State inputs sharing an origin are deduplicated.
    pub enable_multiple_origin: bool,
    /// State inputs produced by a store to a provably distinct allocation
    /// are dropped.
    pub enable_load_store_state: bool,
    /// State inputs produced by a store through an alloca distinct from the
    /// load's alloca address are dropped.
    pub enable_load_store_alloca: bool,
}

impl Default for LoadNormalForm {
    fn default() -> Self {
        LoadNormalForm {
            enable_load_mux: true,
            enable_load_alloca: true,
            enable_multiple_origin: true,
            enable_load_store_state: true,
            enable_load_store_alloca: true,
        }
    }
}

/// Rewrite flags for store nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreNormalForm {
    /// State inputs sharing an origin are deduplicated.
    pub enable_multiple_origin: bool,
}

impl Default for StoreNormalForm {
    fn default() -> Self {
        StoreNormalForm { enable_multiple_origin: true }
    }
}

/// Rewrite flags for binary arithmetic nodes.
///
/// Unrolling sets `mutable = false` while it splices loop bodies so the
/// freshly inserted arithmetic is not folded out from under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryNormalForm {
    pub mutable: bool,
}

impl Default for BinaryNormalForm {
    fn default() -> Self {
        BinaryNormalForm { mutable: true }
    }
}

/// All normal-form flag sets of one graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalForms {
    pub load: LoadNormalForm,
    pub store: StoreNormalForm,
    pub binary: BinaryNormalForm,
}
