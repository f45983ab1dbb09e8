//! Region traversal under mutation.
//!
//! The traversal contract is snapshot-before-mutate: [`topdown`] returns a
//! snapshot of the region's node list, and callers check
//! [`Rvsdg::is_alive`](crate::graph::Rvsdg::is_alive) before touching each
//! entry. A pass may freely insert or remove sibling nodes while walking
//! the snapshot; inserted nodes are not revisited in the same sweep and
//! removed nodes are skipped.

use crate::graph::Rvsdg;
use crate::id::{NodeId, RegionId};

/// Snapshot of a region's nodes, dependency order first.
pub fn topdown(graph: &Rvsdg, region: RegionId) -> Vec<NodeId> {
    graph.region_nodes(region)
}

/// Snapshot of a region's nodes in reverse (users first).
pub fn bottomup(graph: &Rvsdg, region: RegionId) -> Vec<NodeId> {
    let mut nodes = graph.region_nodes(region);
    nodes.reverse();
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rheo_llir::Operation;

    #[test]
    fn snapshot_survives_removal_of_members() {
        let mut graph = Rvsdg::new();
        let root = graph.root();
        let a = graph
            .add_simple_node(root, Operation::IntConst { nbits: 8, value: 1 }, &[])
            .unwrap();
        let b = graph
            .add_simple_node(root, Operation::IntConst { nbits: 8, value: 2 }, &[])
            .unwrap();

        let snapshot = topdown(&graph, root);
        assert_eq!(snapshot, vec![a, b]);

        graph.remove_node(a).unwrap();
        // The snapshot still names `a`; liveness filtering is the caller's
        // responsibility.
        assert!(!graph.is_alive(snapshot[0]));
        assert!(graph.is_alive(snapshot[1]));
    }

    #[test]
    fn nodes_inserted_mid_walk_are_not_revisited() {
        let mut graph = Rvsdg::new();
        let root = graph.root();
        graph
            .add_simple_node(root, Operation::IntConst { nbits: 8, value: 1 }, &[])
            .unwrap();

        let snapshot = topdown(&graph, root);
        let mut visited = 0;
        for node in snapshot {
            if !graph.is_alive(node) {
                continue;
            }
            visited += 1;
            graph
                .add_simple_node(root, Operation::IntConst { nbits: 8, value: 9 }, &[])
                .unwrap();
        }
        assert_eq!(visited, 1);
        assert_eq!(graph.nnodes(), 2);
    }
}
