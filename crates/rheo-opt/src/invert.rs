//! The `ivt` pass: theta-gamma inversion.
//!
//! A tail-controlled loop whose body is "compute the predicate, then run a
//! gamma on it" is really a head-controlled loop wrapped the wrong way:
//! the final iteration evaluates the gamma's skip alternative just to pass
//! every value through. Inversion hoists the predicate computation out,
//! wraps a fresh theta in a gamma on the initial predicate value, and
//! splices only the gamma's taken alternative into the new loop body.
//!
//! Applicability is deliberately narrow: one gamma in the body, predicate
//! shared between the theta and the gamma, predicate computed from
//! loop-var arguments alone, gamma entry-vars fed straight from loop-var
//! arguments, and a skip alternative that is the identity. Everything
//! else is left untouched.

use std::collections::HashMap;

use rheo_llir::Operation;
use rheo_rvsdg::{
    copy_nodes, copy_region, topdown, NodeId, NodeKind, Origin, RegionId, Rvsdg, RvsdgModule,
    SubstitutionMap,
};

use crate::error::OptError;

pub fn invert(rm: &mut RvsdgModule) -> Result<(), OptError> {
    let root = rm.graph.root();
    invert_region(&mut rm.graph, root)
}

fn invert_region(graph: &mut Rvsdg, region: RegionId) -> Result<(), OptError> {
    for node in topdown(graph, region) {
        if !graph.is_alive(node) {
            continue;
        }
        for sub in graph.node(node).subregions.clone() {
            invert_region(graph, sub)?;
        }
        if matches!(graph.node(node).kind, NodeKind::Theta { .. }) {
            invert_theta(graph, node)?;
        }
    }
    Ok(())
}

struct InversionShape {
    gamma: NodeId,
    /// Predicate computation, in region order (everything but the gamma).
    predicate_nodes: Vec<NodeId>,
    /// Per loop-var: the gamma exit-var supplying its result, or `None`
    /// for an invariant loop-var.
    loopvar_exits: Vec<Option<usize>>,
    /// Per gamma entry-var: the loop-var whose argument feeds it.
    entryvar_loopvars: Vec<usize>,
}

fn shape_of(graph: &Rvsdg, theta: NodeId) -> Option<InversionShape> {
    let sub = graph.theta_subregion(theta);
    let nodes = graph.region_nodes(sub);

    let gammas: Vec<NodeId> = nodes
        .iter()
        .copied()
        .filter(|n| matches!(graph.node(*n).kind, NodeKind::Gamma))
        .collect();
    if gammas.len() != 1 {
        return None;
    }
    let gamma = gammas[0];
    if graph.gamma_nalternatives(gamma) != 2 {
        return None;
    }

    // One shared predicate, computed by a match in the body.
    let predicate = graph.theta_predicate(theta)?;
    if graph.gamma_predicate(gamma) != predicate {
        return None;
    }
    match predicate {
        Origin::Output { node, .. }
            if matches!(
                graph.node(node).kind.as_simple(),
                Some(Operation::Match { nalternatives: 2, .. })
            ) && graph.parent_region(node) == sub => {}
        _ => return None,
    }

    // The predicate computation may only read loop-var arguments and each
    // other.
    let predicate_nodes: Vec<NodeId> =
        nodes.iter().copied().filter(|n| *n != gamma).collect();
    for &n in &predicate_nodes {
        if !graph.node(n).kind.is_simple() {
            return None;
        }
        for input in &graph.node(n).inputs {
            match input.origin {
                Origin::Argument { region, .. } if region == sub => {}
                Origin::Output { node, .. } if predicate_nodes.contains(&node) => {}
                _ => return None,
            }
        }
    }

    // Gamma entry-vars fed straight from loop-var arguments.
    let mut entryvar_loopvars = Vec::with_capacity(graph.gamma_nentryvars(gamma));
    for ev in 0..graph.gamma_nentryvars(gamma) {
        match graph.gamma_entryvar_origin(gamma, ev) {
            Origin::Argument { region, index } if region == sub => {
                entryvar_loopvars.push(index as usize)
            }
            _ => return None,
        }
    }

    // Loop-var results: identity, or a gamma exit-var whose skip
    // alternative is the identity on the same loop-var.
    let skip_region = graph.gamma_subregion(gamma, 0);
    let mut loopvar_exits = Vec::with_capacity(graph.theta_nloopvars(theta));
    for lv in 0..graph.theta_nloopvars(theta) {
        let result = graph.theta_result_origin(theta, lv);
        if result == graph.theta_argument(theta, lv) {
            loopvar_exits.push(None);
            continue;
        }
        let xv = match result {
            Origin::Output { node, index } if node == gamma => index as usize,
            _ => return None,
        };
        match graph.region(skip_region).results[xv].origin {
            Origin::Argument { region, index }
                if region == skip_region && entryvar_loopvars[index as usize] == lv => {}
            _ => return None,
        }
        loopvar_exits.push(Some(xv));
    }

    Some(InversionShape { gamma, predicate_nodes, loopvar_exits, entryvar_loopvars })
}

fn invert_theta(graph: &mut Rvsdg, theta: NodeId) -> Result<(), OptError> {
    let shape = match shape_of(graph, theta) {
        Some(shape) => shape,
        None => return Ok(()),
    };
    tracing::debug!(theta = %theta, "inverting theta-gamma nest");

    let parent = graph.parent_region(theta);
    let sub = graph.theta_subregion(theta);
    let nloopvars = graph.theta_nloopvars(theta);
    let old_predicate = graph.theta_predicate(theta).expect("shape requires a predicate");

    // Evaluate the predicate once on the loop inputs.
    let mut entry_map = SubstitutionMap::new();
    for lv in 0..nloopvars {
        entry_map.insert(graph.theta_argument(theta, lv), graph.theta_input_origin(theta, lv));
    }
    copy_nodes(graph, &shape.predicate_nodes, parent, &mut entry_map)?;
    let initial_predicate = entry_map
        .lookup(old_predicate)
        .expect("predicate computation was copied");

    let outer_gamma = graph.create_gamma(parent, initial_predicate, 2)?;
    let mut entryvars = Vec::with_capacity(nloopvars);
    for lv in 0..nloopvars {
        entryvars.push(graph.gamma_add_entryvar(outer_gamma, graph.theta_input_origin(theta, lv)));
    }

    let new_theta = graph.create_theta(graph.gamma_subregion(outer_gamma, 1));
    for (lv, &ev) in entryvars.iter().enumerate() {
        let nlv = graph.theta_add_loopvar(
            new_theta,
            graph.gamma_entryvar_argument(outer_gamma, ev, 1),
        );
        debug_assert_eq!(nlv, lv);
    }
    let new_body = graph.theta_subregion(new_theta);

    // Splice the taken alternative as the new loop body.
    let taken = graph.gamma_subregion(shape.gamma, 1);
    let mut body_map = SubstitutionMap::new();
    for (ev, &lv) in shape.entryvar_loopvars.iter().enumerate() {
        body_map.insert(
            Origin::Argument { region: taken, index: ev as u32 },
            graph.theta_argument(new_theta, lv),
        );
    }
    copy_region(graph, taken, new_body, &mut body_map, false, false)?;

    // Per-iteration values after the body ran.
    let mut iterated: HashMap<usize, Origin> = HashMap::new();
    for lv in 0..nloopvars {
        let value = match shape.loopvar_exits[lv] {
            None => graph.theta_argument(new_theta, lv),
            Some(xv) => {
                let origin = graph.region(taken).results[xv].origin;
                body_map
                    .lookup(origin)
                    .expect("taken alternative was copied into the new body")
            }
        };
        iterated.insert(lv, value);
        graph.theta_set_result(new_theta, lv, value)?;
    }

    // Recompute the predicate on the iterated values.
    let mut repeat_map = SubstitutionMap::new();
    for lv in 0..nloopvars {
        repeat_map.insert(graph.theta_argument(theta, lv), iterated[&lv]);
    }
    copy_nodes(graph, &shape.predicate_nodes, new_body, &mut repeat_map)?;
    let new_predicate = repeat_map
        .lookup(old_predicate)
        .expect("predicate computation was copied");
    graph.theta_set_predicate(new_theta, new_predicate)?;

    for (lv, &ev) in entryvars.iter().enumerate() {
        let skipped = graph.gamma_entryvar_argument(outer_gamma, ev, 0);
        let xv = graph.gamma_add_exitvar(
            outer_gamma,
            vec![skipped, Origin::Output { node: new_theta, index: lv as u32 }],
        )?;
        graph.divert_users(Origin::Output { node: theta, index: lv as u32 }, xv);
    }
    graph.remove_node(theta)?;
    Ok(())
}
