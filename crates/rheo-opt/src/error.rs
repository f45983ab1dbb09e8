//! Error types for rheo-opt.

use rheo_rvsdg::RvsdgError;
use thiserror::Error;

/// Errors produced by the optimiser.
#[derive(Debug, Error)]
pub enum OptError {
    #[error(transparent)]
    Rvsdg(#[from] RvsdgError),

    /// A pass name outside the closed set, rejected at configuration
    /// parse time.
    #[error("unknown optimization '{name}'")]
    UnknownOptimization { name: String },
}
