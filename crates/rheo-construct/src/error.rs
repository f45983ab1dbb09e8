//! Error types for rheo-construct.
//!
//! Everything here is fatal: either an input-IR invariant does not hold or
//! the translation hit a construct it cannot express. Errors carry the
//! offending entity so the driver's diagnostic names it.

use rheo_llir::{BlockId, LlirError, VarId};
use rheo_rvsdg::RvsdgError;
use thiserror::Error;

/// Errors produced during construction or destruction.
#[derive(Debug, Error)]
pub enum ConstructError {
    #[error(transparent)]
    Llir(#[from] LlirError),

    #[error(transparent)]
    Rvsdg(#[from] RvsdgError),

    #[error("restructuring requires a closed CFG")]
    CfgNotClosed,

    #[error("aggregation requires a proper-structured CFG")]
    CfgNotProperStructured,

    #[error("use of {variable} before any definition")]
    UndefinedVariable { variable: VarId },

    #[error("{block}: phi operand has no matching predecessor edge")]
    PhiPredecessorMismatch { block: BlockId },

    #[error("{block}: phi TAC survived SSA destruction")]
    UnloweredPhi { block: BlockId },

    #[error("loop tail {block} does not match the recorded back-edge set")]
    BackEdgeMismatch { block: BlockId },

    #[error("loop tail {block} must end in a 2-way branch, found {nalternatives} alternatives")]
    LoopTailArity { block: BlockId, nalternatives: u64 },

    #[error("branch head {block} does not end in a match/branch pair")]
    MissingBranchPredicate { block: BlockId },

    #[error("function '{name}' has no CFG body but is not an external declaration")]
    MissingBody { name: String },

    #[error("recursive binding group contains the data node '{name}'; only functions can be mutually recursive")]
    RecursiveData { name: String },

    #[error("exit results disagree with the function type of '{name}'")]
    ResultArityMismatch { name: String },

    #[error("cannot lower {what} back to LLIR")]
    UnsupportedDestruct { what: &'static str },
}
