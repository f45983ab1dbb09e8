//! rheo-llir: the low-level intermediate representation.
//!
//! This crate holds the data model consumed by the rest of the pipeline:
//! the structural type system ([`types`]), variables ([`var`]),
//! three-address instructions ([`tac`]), control flow graphs ([`cfg`]),
//! the inter-procedural graph ([`ipg`]), and the module container
//! ([`module`]).
//!
//! The representation is SSA-shaped but not SSA-enforced: TACs read and
//! write named variables, and the construction crate is responsible for
//! turning variable def/use chains into explicit value flow.

pub mod cfg;
pub mod error;
pub mod id;
pub mod ipg;
pub mod module;
pub mod tac;
pub mod types;
pub mod var;

pub use cfg::{BasicBlock, BlockKind, Cfg, EntryAttr, ExitAttr};
pub use error::LlirError;
pub use id::{BlockId, EdgeId, IpgNodeId, StructDeclId, VarId};
pub use ipg::{DataInit, Ipg, IpgNode};
pub use module::LlirModule;
pub use tac::{BinOp, FCmpOp, ICmpOp, Operation, Tac};
pub use types::{FloatSize, Linkage, StructDecl, StructRegistry, Type};
pub use var::{VarKind, VarTable, Variable};
