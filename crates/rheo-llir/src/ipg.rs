//! The inter-procedural graph.
//!
//! An [`Ipg`] is an ordered collection of function and data nodes with an
//! unordered dependency relation between them. Strongly connected
//! components of that relation are what the RVSDG builder turns into phi
//! nodes (mutually recursive binding groups); [`Ipg::sccs`] returns them
//! callees-first so the builder can construct definitions before uses.

use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::stable_graph::StableGraph;
use petgraph::Directed;
use serde::{Deserialize, Serialize};

use crate::cfg::Cfg;
use crate::error::LlirError;
use crate::id::{IpgNodeId, VarId};
use crate::tac::Tac;
use crate::types::{Linkage, Type};
use crate::var::VarTable;

/// An initialiser for a data node: a TAC sequence over a private variable
/// table, whose last result is the initial value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataInit {
    pub vars: VarTable,
    pub tacs: Vec<Tac>,
    pub value: VarId,
}

/// One node of the inter-procedural graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IpgNode {
    Function {
        name: String,
        fn_type: Type,
        linkage: Linkage,
        /// `None` for external declarations.
        cfg: Option<Cfg>,
    },
    Data {
        name: String,
        value_type: Type,
        linkage: Linkage,
        constant: bool,
        /// `None` for external declarations.
        init: Option<DataInit>,
    },
}

impl IpgNode {
    pub fn name(&self) -> &str {
        match self {
            IpgNode::Function { name, .. } | IpgNode::Data { name, .. } => name,
        }
    }

    pub fn linkage(&self) -> Linkage {
        match self {
            IpgNode::Function { linkage, .. } | IpgNode::Data { linkage, .. } => *linkage,
        }
    }

    /// The type of the value this node contributes to the module: a pointer
    /// to the function type for functions, a pointer to the value type for
    /// data.
    pub fn output_type(&self) -> Type {
        match self {
            IpgNode::Function { fn_type, .. } => Type::pointer(fn_type.clone()),
            IpgNode::Data { value_type, .. } => Type::pointer(value_type.clone()),
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, IpgNode::Function { .. })
    }
}

/// The inter-procedural graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ipg {
    graph: StableGraph<IpgNode, (), Directed, u32>,
    names: HashMap<String, IpgNodeId>,
}

impl Ipg {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node. Names must be unique within the graph.
    pub fn add_node(&mut self, node: IpgNode) -> Result<IpgNodeId, LlirError> {
        let name = node.name().to_string();
        if self.names.contains_key(&name) {
            return Err(LlirError::DuplicateIpgName { name });
        }
        let id = IpgNodeId::from(self.graph.add_node(node));
        self.names.insert(name, id);
        Ok(id)
    }

    pub fn get(&self, id: IpgNodeId) -> &IpgNode {
        &self.graph[petgraph::graph::NodeIndex::from(id)]
    }

    pub fn get_mut(&mut self, id: IpgNodeId) -> &mut IpgNode {
        &mut self.graph[petgraph::graph::NodeIndex::from(id)]
    }

    pub fn find(&self, name: &str) -> Option<IpgNodeId> {
        self.names.get(name).copied()
    }

    /// Records that `from` depends on `to`. Duplicate dependencies are
    /// collapsed; the relation is a set.
    pub fn add_dependency(&mut self, from: IpgNodeId, to: IpgNodeId) {
        if !self.graph.contains_edge(from.into(), to.into()) {
            self.graph.add_edge(from.into(), to.into(), ());
        }
    }

    pub fn dependencies(&self, node: IpgNodeId) -> Vec<IpgNodeId> {
        self.graph
            .neighbors(petgraph::graph::NodeIndex::from(node))
            .map(IpgNodeId::from)
            .collect()
    }

    /// A node is self-recursive iff it depends on itself.
    pub fn is_self_recursive(&self, node: IpgNodeId) -> bool {
        self.graph.contains_edge(node.into(), node.into())
    }

    pub fn node_ids(&self) -> Vec<IpgNodeId> {
        self.graph.node_indices().map(IpgNodeId::from).collect()
    }

    pub fn nnodes(&self) -> usize {
        self.graph.node_count()
    }

    /// Strongly connected components of the dependency relation, returned
    /// callees-first (reverse topological order).
    pub fn sccs(&self) -> Vec<Vec<IpgNodeId>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .map(|scc| scc.into_iter().map(IpgNodeId::from).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(name: &str) -> IpgNode {
        IpgNode::Function {
            name: name.into(),
            fn_type: Type::Function { arguments: vec![], results: vec![], variadic: false },
            linkage: Linkage::External,
            cfg: None,
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut ipg = Ipg::new();
        ipg.add_node(function("f")).unwrap();
        let err = ipg.add_node(function("f"));
        assert!(matches!(err, Err(LlirError::DuplicateIpgName { .. })));
    }

    #[test]
    fn self_recursion_via_dependency() {
        let mut ipg = Ipg::new();
        let f = ipg.add_node(function("f")).unwrap();
        assert!(!ipg.is_self_recursive(f));
        ipg.add_dependency(f, f);
        assert!(ipg.is_self_recursive(f));
    }

    #[test]
    fn dependencies_are_a_set() {
        let mut ipg = Ipg::new();
        let f = ipg.add_node(function("f")).unwrap();
        let g = ipg.add_node(function("g")).unwrap();
        ipg.add_dependency(f, g);
        ipg.add_dependency(f, g);
        assert_eq!(ipg.dependencies(f), vec![g]);
    }

    #[test]
    fn sccs_come_callees_first() {
        let mut ipg = Ipg::new();
        let main = ipg.add_node(function("main")).unwrap();
        let helper = ipg.add_node(function("helper")).unwrap();
        ipg.add_dependency(main, helper);

        let sccs = ipg.sccs();
        assert_eq!(sccs.len(), 2);
        let helper_pos = sccs.iter().position(|scc| scc.contains(&helper)).unwrap();
        let main_pos = sccs.iter().position(|scc| scc.contains(&main)).unwrap();
        assert!(helper_pos < main_pos);
    }

    #[test]
    fn mutual_recursion_forms_one_scc() {
        let mut ipg = Ipg::new();
        let odd = ipg.add_node(function("odd")).unwrap();
        let even = ipg.add_node(function("even")).unwrap();
        ipg.add_dependency(odd, even);
        ipg.add_dependency(even, odd);

        let sccs = ipg.sccs();
        let group = sccs.iter().find(|scc| scc.len() == 2).unwrap();
        assert!(group.contains(&odd) && group.contains(&even));
    }

    #[test]
    fn output_type_is_a_pointer() {
        let node = IpgNode::Data {
            name: "g".into(),
            value_type: Type::Bits(32),
            linkage: Linkage::Internal,
            constant: false,
            init: None,
        };
        assert_eq!(node.output_type(), Type::pointer(Type::Bits(32)));
    }
}
