//! Core error types for rheo-rvsdg.
//!
//! All variants are invariant violations or translation failures: fatal,
//! propagated with `?` to the pipeline driver. Nothing here is recovered
//! locally.

use rheo_llir::Type;
use thiserror::Error;

use crate::id::{NodeId, RegionId};

/// Errors produced by the rheo-rvsdg crate.
#[derive(Debug, Error)]
pub enum RvsdgError {
    #[error("operand count mismatch at {node}: operation expects {expected}, got {actual}")]
    OperandCountMismatch {
        node: NodeId,
        expected: usize,
        actual: usize,
    },

    #[error("operand {index} of {node}: expected type {expected}, origin has type {actual}")]
    OperandTypeMismatch {
        node: NodeId,
        index: usize,
        expected: Type,
        actual: Type,
    },

    #[error("result {index} of {region}: port type {expected}, origin has type {actual}")]
    ResultTypeMismatch {
        region: RegionId,
        index: usize,
        expected: Type,
        actual: Type,
    },

    #[error("gamma {node}: exit-var supplied {actual} alternatives, node has {expected}")]
    AlternativeCountMismatch {
        node: NodeId,
        expected: usize,
        actual: usize,
    },

    #[error("predicate of {node} must be {expected}, got {actual}")]
    PredicateTypeMismatch {
        node: NodeId,
        expected: Type,
        actual: Type,
    },

    #[error("theta {node} has no predicate set")]
    MissingPredicate { node: NodeId },

    #[error("phi {node}: recursion variables must be added before context variables")]
    PhiRecvarAfterCtxvar { node: NodeId },

    #[error("cannot remove {node}: its outputs still have users")]
    NodeHasUsers { node: NodeId },

    #[error("substitution map has no entry for an origin in {region}")]
    SubstitutionMissing { region: RegionId },

    #[error("{node} is not a {expected} node")]
    UnexpectedNodeKind { node: NodeId, expected: &'static str },
}
