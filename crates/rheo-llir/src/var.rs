//! Variables and the per-CFG variable table.
//!
//! A variable is a typed named handle. Locals belong to one CFG; globals
//! additionally carry a back-reference to the IPG node that defines them,
//! which is how the RVSDG builder discovers the context values a function
//! depends on.

use serde::{Deserialize, Serialize};

use crate::id::{IpgNodeId, VarId};
use crate::types::Type;

/// What a variable refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarKind {
    /// Function-local value.
    Local,
    /// Module-level value defined by the referenced IPG node.
    Global(IpgNodeId),
}

/// A typed named handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub ty: Type,
    pub kind: VarKind,
}

/// Arena of variables belonging to one CFG.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VarTable {
    vars: Vec<Variable>,
}

impl VarTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh local variable.
    pub fn create(&mut self, name: impl Into<String>, ty: Type) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(Variable { name: name.into(), ty, kind: VarKind::Local });
        id
    }

    /// Creates a variable referencing a module-level definition.
    pub fn create_global(&mut self, name: impl Into<String>, ty: Type, node: IpgNodeId) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(Variable {
            name: name.into(),
            ty,
            kind: VarKind::Global(node),
        });
        id
    }

    pub fn get(&self, id: VarId) -> Option<&Variable> {
        self.vars.get(id.0 as usize)
    }

    /// The variable's type. Panics on a stale id; ids are never removed.
    pub fn ty(&self, id: VarId) -> &Type {
        &self.vars[id.0 as usize].ty
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.vars.iter().enumerate().map(|(n, v)| (VarId(n as u32), v))
    }
}
