//! Pass selection, configuration, and the sequencing driver.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use rheo_rvsdg::{LoadNormalForm, RvsdgModule, StoreNormalForm};

use crate::error::OptError;

/// The closed set of orderable optimisations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Optimization {
    Cne,
    Dne,
    Iln,
    Inv,
    Pll,
    Psh,
    Ivt,
    Url,
    Red,
}

impl FromStr for Optimization {
    type Err = OptError;

    fn from_str(s: &str) -> Result<Self, OptError> {
        match s {
            "cne" => Ok(Optimization::Cne),
            "dne" => Ok(Optimization::Dne),
            "iln" => Ok(Optimization::Iln),
            "inv" => Ok(Optimization::Inv),
            "pll" => Ok(Optimization::Pll),
            "psh" => Ok(Optimization::Psh),
            "ivt" => Ok(Optimization::Ivt),
            "url" => Ok(Optimization::Url),
            "red" => Ok(Optimization::Red),
            other => Err(OptError::UnknownOptimization { name: other.to_string() }),
        }
    }
}

/// Validated optimiser configuration.
///
/// `unroll_factor` values below 2 disable unrolling; the normal-form flags
/// are installed on the graph before any pass runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptConfig {
    pub passes: Vec<Optimization>,
    pub unroll_factor: u64,
    pub load: LoadNormalForm,
    pub store: StoreNormalForm,
}

impl Default for OptConfig {
    fn default() -> Self {
        OptConfig {
            passes: Vec::new(),
            unroll_factor: 4,
            load: LoadNormalForm::default(),
            store: StoreNormalForm::default(),
        }
    }
}

impl OptConfig {
    /// Parses a pass ordering like `["inv", "url", "red"]`; unknown names
    /// are rejected before any pass runs.
    pub fn with_pass_names<'a>(
        mut self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, OptError> {
        self.passes = names
            .into_iter()
            .map(Optimization::from_str)
            .collect::<Result<_, _>>()?;
        Ok(self)
    }
}

/// Applies one optimisation.
pub fn apply(rm: &mut RvsdgModule, opt: Optimization, config: &OptConfig) -> Result<(), OptError> {
    match opt {
        Optimization::Cne => crate::cne::cne(rm),
        Optimization::Dne => crate::dne::dne(rm),
        Optimization::Iln => crate::inline::inline(rm)?,
        Optimization::Inv => crate::inv::inv(rm),
        Optimization::Pll => crate::pull::pull(rm)?,
        Optimization::Psh => crate::push::push(rm)?,
        Optimization::Ivt => crate::invert::invert(rm)?,
        Optimization::Url => crate::unroll::unroll(rm, config.unroll_factor)?,
        Optimization::Red => crate::reduction::reduce(rm),
    }
    Ok(())
}

/// Runs the configured pass list in order. A failing pass leaves the
/// graph in its pre-pass state so subsequent diagnostic dumps are
/// meaningful.
pub fn optimize(rm: &mut RvsdgModule, config: &OptConfig) -> Result<(), OptError> {
    rm.graph.normal_forms.load = config.load;
    rm.graph.normal_forms.store = config.store;

    for &pass in &config.passes {
        let before = rm.graph.clone();
        tracing::debug!(pass = ?pass, nnodes = rm.graph.nnodes(), "running optimization");
        if let Err(error) = apply(rm, pass, config) {
            rm.graph = before;
            return Err(error);
        }
    }
    Ok(())
}
