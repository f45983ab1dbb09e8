//! rheo-rvsdg: the Regionalised Value-State Dependence Graph.
//!
//! An RVSDG is a hierarchy of regions. A region owns an ordered set of
//! nodes and is bounded by an ordered argument list (values entering from
//! the enclosing context) and an ordered result list (values leaving to
//! it). Nodes are either *simple* -- one [`Operation`](rheo_llir::Operation)
//! with typed ports -- or *structural*, owning subregions: gamma
//! (conditional), theta (tail-controlled loop), lambda (function), delta
//! (global), and phi (mutually recursive binding group).
//!
//! The graph is an arena: nodes and regions are indexed by stable ids,
//! inputs reference their origin as a (node, output) or (region, argument)
//! pair, and user back-references are rebuilt on demand rather than stored.

pub mod error;
pub mod graph;
pub mod id;
pub mod module;
pub mod normal_forms;
pub mod subst;
pub mod traverse;

pub use error::RvsdgError;
pub use graph::{
    Argument, Input, Node, NodeKind, Origin, Output, RegionData, ResultPort, Rvsdg, UserSite,
};
pub use id::{NodeId, RegionId};
pub use module::RvsdgModule;
pub use normal_forms::{BinaryNormalForm, LoadNormalForm, NormalForms, StoreNormalForm};
pub use subst::{copy_nodes, copy_region, SubstitutionMap};
pub use traverse::{bottomup, topdown};
