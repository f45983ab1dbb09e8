//! The `cne` pass: common node elimination.
//!
//! Within each region, effect-free simple nodes with the same operation
//! and the same input origins collapse into one; later duplicates divert
//! their users to the first occurrence. Memory operations and allocations
//! never merge: two allocas with identical payloads are still two
//! allocations.

use std::collections::HashMap;

use rheo_llir::Operation;
use rheo_rvsdg::{topdown, NodeKind, Origin, RegionId, Rvsdg, RvsdgModule};

pub fn cne(rm: &mut RvsdgModule) {
    let root = rm.graph.root();
    cne_region(&mut rm.graph, root);
}

fn mergeable(op: &Operation) -> bool {
    use Operation::*;
    !matches!(
        op,
        Alloca { .. }
            | Malloc { .. }
            | Free { .. }
            | Load { .. }
            | Store { .. }
            | Call { .. }
            | MemStateMux { .. }
            | Valist { .. }
    )
}

fn cne_region(graph: &mut Rvsdg, region: RegionId) {
    let mut seen: HashMap<(Operation, Vec<Origin>), rheo_rvsdg::NodeId> = HashMap::new();

    for node in topdown(graph, region) {
        if !graph.is_alive(node) {
            continue;
        }
        for sub in graph.node(node).subregions.clone() {
            cne_region(graph, sub);
        }

        let op = match &graph.node(node).kind {
            NodeKind::Simple(op) if mergeable(op) => op.clone(),
            _ => continue,
        };
        let operands: Vec<Origin> =
            graph.node(node).inputs.iter().map(|input| input.origin).collect();

        match seen.entry((op, operands)) {
            std::collections::hash_map::Entry::Occupied(entry) => {
                let keeper = *entry.get();
                for index in 0..graph.node(node).outputs.len() as u32 {
                    graph.divert_users(
                        Origin::Output { node, index },
                        Origin::Output { node: keeper, index },
                    );
                }
                graph.remove_node(node).expect("diverted duplicate is dead");
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(node);
            }
        }
    }
}
