//! The `dne` pass: dead node elimination.
//!
//! Removes nodes none of whose outputs have users, sweeping bottom-up so
//! a whole dead chain disappears in one pass, and iterating to a fixed
//! point for cross-region chains (a dead theta takes its body along).
//!
//! Module-level definitions (lambdas, deltas, phis in the root region) are
//! the module's exports and are never removed; the sweep works inside
//! their subregions.

use rheo_rvsdg::{bottomup, Origin, RegionId, Rvsdg, RvsdgModule};

/// Eliminates dead nodes below every module-level definition.
pub fn dne(rm: &mut RvsdgModule) {
    let graph = &mut rm.graph;
    let root = graph.root();
    loop {
        let mut changed = false;
        for node in graph.region_nodes(root) {
            for sub in graph.node(node).subregions.clone() {
                changed |= sweep(graph, sub);
            }
        }
        if !changed {
            break;
        }
    }
}

fn sweep(graph: &mut Rvsdg, region: RegionId) -> bool {
    let mut changed = false;
    for node in bottomup(graph, region) {
        if !graph.is_alive(node) {
            continue;
        }

        let noutputs = graph.node(node).outputs.len();
        let dead = (0..noutputs)
            .all(|index| !graph.has_users(Origin::Output { node, index: index as u32 }));
        if dead {
            graph.remove_node(node).expect("checked for users");
            changed = true;
            continue;
        }

        for sub in graph.node(node).subregions.clone() {
            changed |= sweep(graph, sub);
        }
    }
    changed
}
