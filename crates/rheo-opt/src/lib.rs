//! rheo-opt: optimisation passes over the RVSDG.
//!
//! The pass set matches the driver's closed ordering vocabulary:
//!
//! | name  | pass |
//! |-------|------|
//! | `cne` | common node elimination |
//! | `dne` | dead node elimination |
//! | `iln` | direct-call inlining |
//! | `inv` | invariant loop-value redirection |
//! | `pll` | pulling operations into gamma alternatives |
//! | `psh` | pushing invariant operations out of thetas |
//! | `ivt` | theta-gamma inversion |
//! | `url` | loop unrolling |
//! | `red` | normal-form reductions (load/store rules) |
//!
//! [`optimization::optimize`] applies a validated configuration in list
//! order; a failing pass leaves the graph in its pre-pass state. The
//! Steensgaard points-to analysis ([`steensgaard`]) runs separately from
//! the rewrite passes and produces a [`steensgaard::PointsToGraph`].

pub mod cne;
pub mod dne;
pub mod error;
pub mod inline;
pub mod inv;
pub mod invert;
pub mod optimization;
pub mod pull;
pub mod push;
pub mod reduction;
pub mod steensgaard;
pub mod unroll;

pub use error::OptError;
pub use optimization::{optimize, OptConfig, Optimization};
pub use steensgaard::{PointsToGraph, Steensgaard};
