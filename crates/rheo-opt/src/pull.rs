//! The `pll` pass: pulling operations into gamma alternatives.
//!
//! A speculable single-output node whose only users are entry-var inputs
//! of one gamma is replicated into each alternative (its operands arrive
//! through fresh entry-vars), the old entry-var arguments are rewired to
//! the replicas, and the emptied entry-vars are pruned. The original node
//! usually dies and falls to `dne`; per-alternative copies expose
//! folding opportunities the shared node hid.

use rheo_rvsdg::{topdown, NodeId, NodeKind, Origin, RegionId, Rvsdg, RvsdgModule, UserSite};

use crate::error::OptError;
use crate::push::speculable;

pub fn pull(rm: &mut RvsdgModule) -> Result<(), OptError> {
    let root = rm.graph.root();
    pull_region(&mut rm.graph, root)
}

fn pull_region(graph: &mut Rvsdg, region: RegionId) -> Result<(), OptError> {
    for node in topdown(graph, region) {
        if !graph.is_alive(node) {
            continue;
        }
        for sub in graph.node(node).subregions.clone() {
            pull_region(graph, sub)?;
        }
        if matches!(graph.node(node).kind, NodeKind::Gamma) {
            pull_gamma(graph, node)?;
        }
    }
    Ok(())
}

/// `true` iff every user of `origin` is an entry-var input of `gamma`.
fn only_feeds_gamma(graph: &Rvsdg, origin: Origin, gamma: NodeId) -> bool {
    let users = graph.users(origin);
    !users.is_empty()
        && users.iter().all(|site| {
            matches!(site, UserSite::Input { node, index } if *node == gamma && *index >= 1)
        })
}

fn pull_gamma(graph: &mut Rvsdg, gamma: NodeId) -> Result<(), OptError> {
    loop {
        // One candidate per round; pruning renumbers entry-vars.
        let candidate = (0..graph.gamma_nentryvars(gamma)).find_map(|ev| {
            let origin = graph.gamma_entryvar_origin(gamma, ev);
            let node = match origin {
                Origin::Output { node, index: 0 } => node,
                _ => return None,
            };
            let op = graph.node(node).kind.as_simple()?;
            if graph.node(node).outputs.len() == 1
                && speculable(op)
                && only_feeds_gamma(graph, origin, gamma)
            {
                Some(node)
            } else {
                None
            }
        });
        let node = match candidate {
            Some(node) => node,
            None => return Ok(()),
        };

        let op = graph.node(node).kind.as_simple().expect("candidate is simple").clone();
        let output = graph.output_origin(node, 0);
        let operands: Vec<Origin> =
            graph.node(node).inputs.iter().map(|input| input.origin).collect();
        let carrying_evs: Vec<usize> = (0..graph.gamma_nentryvars(gamma))
            .filter(|&ev| graph.gamma_entryvar_origin(gamma, ev) == output)
            .collect();

        // Route the operands in, then replicate per alternative.
        let operand_evs: Vec<usize> = operands
            .iter()
            .map(|&operand| graph.gamma_add_entryvar(gamma, operand))
            .collect();
        for alt in 0..graph.gamma_nalternatives(gamma) {
            let replica_operands: Vec<Origin> = operand_evs
                .iter()
                .map(|&ev| graph.gamma_entryvar_argument(gamma, ev, alt))
                .collect();
            let sub = graph.gamma_subregion(gamma, alt);
            let replica = graph.add_simple_node(sub, op.clone(), &replica_operands)?;
            for &ev in &carrying_evs {
                graph.divert_users(
                    graph.gamma_entryvar_argument(gamma, ev, alt),
                    graph.output_origin(replica, 0),
                );
            }
        }

        graph.gamma_prune_entryvars(gamma);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rheo_llir::{BinOp, Operation};

    #[test]
    fn shared_arithmetic_moves_into_the_alternatives() {
        let mut rm = RvsdgModule::new("pull.ll");
        let graph = &mut rm.graph;
        let root = graph.root();

        let c = graph
            .add_simple_node(root, Operation::IntConst { nbits: 32, value: 0 }, &[])
            .unwrap();
        let matched = graph
            .add_simple_node(
                root,
                Operation::Match {
                    nbits: 32,
                    mapping: vec![(0, 0)],
                    default_alternative: 1,
                    nalternatives: 2,
                },
                &[graph.output_origin(c, 0)],
            )
            .unwrap();

        let x = graph
            .add_simple_node(root, Operation::IntConst { nbits: 32, value: 20 }, &[])
            .unwrap();
        let doubled = graph
            .add_simple_node(
                root,
                Operation::Binary { op: BinOp::Add, nbits: 32 },
                &[graph.output_origin(x, 0), graph.output_origin(x, 0)],
            )
            .unwrap();

        let gamma = graph
            .create_gamma(root, graph.output_origin(matched, 0), 2)
            .unwrap();
        let ev = graph.gamma_add_entryvar(gamma, graph.output_origin(doubled, 0));
        let a0 = graph.gamma_entryvar_argument(gamma, ev, 0);
        let a1 = graph.gamma_entryvar_argument(gamma, ev, 1);
        // Each alternative consumes the shared value.
        let sub0 = graph.gamma_subregion(gamma, 0);
        let sub1 = graph.gamma_subregion(gamma, 1);
        let u0 = graph
            .add_simple_node(sub0, Operation::Binary { op: BinOp::Xor, nbits: 32 }, &[a0, a0])
            .unwrap();
        let u1 = graph
            .add_simple_node(sub1, Operation::Binary { op: BinOp::Xor, nbits: 32 }, &[a1, a1])
            .unwrap();
        graph
            .gamma_add_exitvar(
                gamma,
                vec![graph.output_origin(u0, 0), graph.output_origin(u1, 0)],
            )
            .unwrap();

        pull(&mut rm).unwrap();
        let graph = &rm.graph;

        // Both alternatives now hold their own add; the entry-var that
        // carried the shared value is gone.
        for sub in [sub0, sub1] {
            let adds = graph
                .region_nodes(sub)
                .into_iter()
                .filter(|n| graph.is_alive(*n))
                .filter(|n| {
                    matches!(
                        graph.node(*n).kind.as_simple(),
                        Some(Operation::Binary { op: BinOp::Add, .. })
                    )
                })
                .count();
            assert_eq!(adds, 1);
        }
        assert!(!graph.has_users(graph.output_origin(doubled, 0)));
        graph.verify().unwrap();
    }

    #[test]
    fn values_with_outside_users_stay_put() {
        let mut rm = RvsdgModule::new("pull.ll");
        let graph = &mut rm.graph;
        let root = graph.root();

        let c = graph
            .add_simple_node(root, Operation::IntConst { nbits: 32, value: 0 }, &[])
            .unwrap();
        let matched = graph
            .add_simple_node(
                root,
                Operation::Match {
                    nbits: 32,
                    mapping: vec![(0, 0)],
                    default_alternative: 1,
                    nalternatives: 2,
                },
                &[graph.output_origin(c, 0)],
            )
            .unwrap();
        let shared = graph
            .add_simple_node(root, Operation::IntConst { nbits: 32, value: 5 }, &[])
            .unwrap();
        let gamma = graph
            .create_gamma(root, graph.output_origin(matched, 0), 2)
            .unwrap();
        let ev = graph.gamma_add_entryvar(gamma, graph.output_origin(shared, 0));
        let a0 = graph.gamma_entryvar_argument(gamma, ev, 0);
        let a1 = graph.gamma_entryvar_argument(gamma, ev, 1);
        graph.gamma_add_exitvar(gamma, vec![a0, a1]).unwrap();

        // Another user outside the gamma pins the node.
        let _outside = graph
            .add_simple_node(
                root,
                Operation::Binary { op: BinOp::Add, nbits: 32 },
                &[graph.output_origin(shared, 0), graph.output_origin(shared, 0)],
            )
            .unwrap();

        let nentry_before = rm.graph.gamma_nentryvars(gamma);
        pull(&mut rm).unwrap();
        assert_eq!(rm.graph.gamma_nentryvars(gamma), nentry_before);
    }
}
