//! The RVSDG module container.

use serde::{Deserialize, Serialize};

use crate::graph::Rvsdg;

/// A graph plus the source strings the egress collaborator needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RvsdgModule {
    pub graph: Rvsdg,
    pub source_filename: String,
    pub target_triple: String,
    pub data_layout: String,
}

impl RvsdgModule {
    pub fn new(source_filename: impl Into<String>) -> Self {
        RvsdgModule {
            graph: Rvsdg::new(),
            source_filename: source_filename.into(),
            target_triple: String::new(),
            data_layout: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rheo_llir::Operation;

    #[test]
    fn serde_roundtrip_preserves_the_arena() {
        let mut rm = RvsdgModule::new("unit.ll");
        let root = rm.graph.root();
        let node = rm
            .graph
            .add_simple_node(root, Operation::IntConst { nbits: 32, value: 42 }, &[])
            .unwrap();

        let json = serde_json::to_string(&rm).unwrap();
        let back: RvsdgModule = serde_json::from_str(&json).unwrap();
        assert_eq!(back.source_filename, "unit.ll");
        assert!(back.graph.is_alive(node));
        assert_eq!(back.graph.nnodes(), 1);
    }
}
