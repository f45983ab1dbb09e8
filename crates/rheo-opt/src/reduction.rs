//! The `red` pass: normal-form reductions for memory operations.
//!
//! Applies the load and store rules enabled on the graph's normal-form
//! flag sets, to a fixed point per node. Every rule shrinks or reorders a
//! node's state vector without changing the set of observable memory
//! effects:
//!
//! * **load-mux**: a load reading a muxed memory state reads the unmuxed
//!   components directly.
//! * **load-alloca**: a load through an alloca ignores the states of other
//!   allocations.
//! * **multiple-origin**: duplicate state inputs collapse.
//! * **load-store-state** / **load-store-alloca**: states produced by a
//!   store to a provably distinct allocation are dropped.

use rheo_llir::Operation;
use rheo_rvsdg::{topdown, NodeId, NodeKind, Origin, RegionId, Rvsdg, RvsdgModule};

/// Applies the enabled reductions across the whole graph.
pub fn reduce(rm: &mut RvsdgModule) {
    let root = rm.graph.root();
    reduce_region(&mut rm.graph, root);
}

fn reduce_region(graph: &mut Rvsdg, region: RegionId) {
    for node in topdown(graph, region) {
        if !graph.is_alive(node) {
            continue;
        }
        for sub in graph.node(node).subregions.clone() {
            reduce_region(graph, sub);
        }
        match &graph.node(node).kind {
            NodeKind::Simple(Operation::Load { .. }) => {
                reduce_load(graph, node);
            }
            NodeKind::Simple(Operation::Store { .. }) => {
                reduce_store(graph, node);
            }
            _ => {}
        }
    }
}

/// The allocation a pointer or state origin belongs to, if that is
/// provable: the defining alloca/malloc node.
fn allocation_site(graph: &Rvsdg, origin: Origin) -> Option<NodeId> {
    match origin {
        Origin::Output { node, index: 0 } => match graph.node(node).kind.as_simple() {
            Some(Operation::Alloca { .. }) | Some(Operation::Malloc { .. }) => Some(node),
            _ => None,
        },
        _ => None,
    }
}

/// The alloca whose own state output this origin is.
fn alloca_of_state(graph: &Rvsdg, origin: Origin) -> Option<NodeId> {
    match origin {
        Origin::Output { node, index: 1 } => match graph.node(node).kind.as_simple() {
            Some(Operation::Alloca { .. }) => Some(node),
            _ => None,
        },
        _ => None,
    }
}

/// The store that produced this state, together with its address origin.
fn producing_store(graph: &Rvsdg, origin: Origin) -> Option<(NodeId, Origin)> {
    match origin {
        Origin::Output { node, .. } => match graph.node(node).kind.as_simple() {
            Some(Operation::Store { .. }) => Some((node, graph.node(node).inputs[0].origin)),
            _ => None,
        },
        _ => None,
    }
}

fn reduce_load(graph: &mut Rvsdg, load: NodeId) {
    let flags = graph.normal_forms.load;
    let (pointee, alignment) = match graph.node(load).kind.as_simple() {
        Some(Operation::Load { pointee, alignment, .. }) => (pointee.clone(), *alignment),
        _ => return,
    };
    let address = graph.node(load).inputs[0].origin;
    let original: Vec<Origin> = graph.node(load).inputs[1..]
        .iter()
        .map(|input| input.origin)
        .collect();
    let mut states = original.clone();

    loop {
        let mut changed = false;

        if flags.enable_load_mux {
            if let Some(position) = states.iter().position(|s| {
                matches!(s, Origin::Output { node, .. }
                    if matches!(graph.node(*node).kind.as_simple(), Some(Operation::MemStateMux { .. })))
            }) {
                let mux = match states[position] {
                    Origin::Output { node, .. } => node,
                    _ => unreachable!(),
                };
                let operands: Vec<Origin> =
                    graph.node(mux).inputs.iter().map(|input| input.origin).collect();
                let tail = states.split_off(position + 1);
                states.pop();
                states.extend(operands);
                states.extend(tail);
                changed = true;
            }
        }

        if !changed && flags.enable_multiple_origin {
            let mut seen = Vec::new();
            let before = states.len();
            states.retain(|s| {
                if seen.contains(s) {
                    false
                } else {
                    seen.push(*s);
                    true
                }
            });
            changed = states.len() != before;
        }

        if !changed && flags.enable_load_alloca {
            if let Some(own) = allocation_site(graph, address) {
                let before = states.len();
                states.retain(|s| match alloca_of_state(graph, *s) {
                    Some(other) => other == own,
                    None => true,
                });
                changed = states.len() != before;
            }
        }

        if !changed && flags.enable_load_store_state {
            if let Some(own_site) = allocation_site(graph, address) {
                let before = states.len();
                states.retain(|s| match producing_store(graph, *s) {
                    Some((_, store_addr)) => match allocation_site(graph, store_addr) {
                        Some(store_site) => store_site == own_site,
                        None => true,
                    },
                    None => true,
                });
                changed = states.len() != before;
            }
        }

        if !changed && flags.enable_load_store_alloca {
            if let Some(own) = allocation_site(graph, address)
                .filter(|n| matches!(graph.node(*n).kind.as_simple(), Some(Operation::Alloca { .. })))
            {
                let before = states.len();
                states.retain(|s| match producing_store(graph, *s) {
                    Some((_, store_addr)) => match allocation_site(graph, store_addr) {
                        Some(site)
                            if matches!(
                                graph.node(site).kind.as_simple(),
                                Some(Operation::Alloca { .. })
                            ) =>
                        {
                            site == own
                        }
                        _ => true,
                    },
                    None => true,
                });
                changed = states.len() != before;
            }
        }

        if !changed {
            break;
        }
    }

    // A load must keep at least one state to stay ordered after the
    // allocation it reads.
    if states.is_empty() {
        states.push(original[0]);
    }
    if states == original {
        return;
    }

    let region = graph.parent_region(load);
    let mut operands = vec![address];
    operands.extend(states.iter().copied());
    let replacement = graph
        .add_simple_node(
            region,
            Operation::Load { pointee, nstates: operands.len() as u32 - 1, alignment },
            &operands,
        )
        .expect("reduced load keeps its port types");
    graph.divert_users(
        Origin::Output { node: load, index: 0 },
        Origin::Output { node: replacement, index: 0 },
    );
    graph.remove_node(load).expect("diverted load is dead");
}

fn reduce_store(graph: &mut Rvsdg, store: NodeId) {
    let flags = graph.normal_forms.store;
    if !flags.enable_multiple_origin {
        return;
    }

    let (pointee, alignment) = match graph.node(store).kind.as_simple() {
        Some(Operation::Store { pointee, alignment, .. }) => (pointee.clone(), *alignment),
        _ => return,
    };
    let address = graph.node(store).inputs[0].origin;
    let value = graph.node(store).inputs[1].origin;
    let original: Vec<Origin> = graph.node(store).inputs[2..]
        .iter()
        .map(|input| input.origin)
        .collect();

    // Deduplicate, remembering which old state index each survivor covers.
    let mut states: Vec<Origin> = Vec::new();
    let mut remap: Vec<usize> = Vec::with_capacity(original.len());
    for state in &original {
        match states.iter().position(|s| s == state) {
            Some(kept) => remap.push(kept),
            None => {
                states.push(*state);
                remap.push(states.len() - 1);
            }
        }
    }
    if states.len() == original.len() {
        return;
    }

    let region = graph.parent_region(store);
    let mut operands = vec![address, value];
    operands.extend(states.iter().copied());
    let replacement = graph
        .add_simple_node(
            region,
            Operation::Store { pointee, nstates: states.len() as u32, alignment },
            &operands,
        )
        .expect("deduplicated store keeps its port types");
    for (old_index, new_index) in remap.iter().enumerate() {
        graph.divert_users(
            Origin::Output { node: store, index: old_index as u32 },
            Origin::Output { node: replacement, index: *new_index as u32 },
        );
    }
    graph.remove_node(store).expect("diverted store is dead");
}
