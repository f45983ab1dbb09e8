//! The `psh` pass: pushing invariant operations out of thetas.
//!
//! A speculable simple node inside a loop body whose operands are all
//! loop-invariant (arguments of invariant loop-vars, or values already
//! pushed) is recomputed once outside the loop and threaded back in
//! through a fresh invariant loop-var. The node inside becomes dead and
//! falls to `dne`.

use std::collections::HashMap;

use rheo_llir::Operation;
use rheo_rvsdg::{topdown, NodeId, NodeKind, Origin, RegionId, Rvsdg, RvsdgModule};

use crate::error::OptError;

/// Operations safe to execute unconditionally outside their loop.
pub(crate) fn speculable(op: &Operation) -> bool {
    use Operation::*;
    matches!(
        op,
        IntConst { .. }
            | FloatConst { .. }
            | PtrNull { .. }
            | Undef { .. }
            | Binary { .. }
            | ICmp { .. }
            | FCmp { .. }
            | Trunc { .. }
            | ZExt { .. }
            | SExt { .. }
            | FpExt { .. }
            | FpTrunc { .. }
            | FpToInt { .. }
            | IntToFp { .. }
            | Bitcast { .. }
            | PtrToBits { .. }
            | GetElementPtr { .. }
            | Select { .. }
    )
}

pub fn push(rm: &mut RvsdgModule) -> Result<(), OptError> {
    let root = rm.graph.root();
    push_region(&mut rm.graph, root)
}

fn push_region(graph: &mut Rvsdg, region: RegionId) -> Result<(), OptError> {
    for node in topdown(graph, region) {
        if !graph.is_alive(node) {
            continue;
        }
        for sub in graph.node(node).subregions.clone() {
            push_region(graph, sub)?;
        }
        if matches!(graph.node(node).kind, NodeKind::Theta { .. }) {
            push_theta(graph, node)?;
        }
    }
    Ok(())
}

fn push_theta(graph: &mut Rvsdg, theta: NodeId) -> Result<(), OptError> {
    let sub = graph.theta_subregion(theta);
    let outer = graph.parent_region(theta);

    // Inner origin -> equivalent outer origin, seeded with the invariant
    // loop-var arguments.
    let mut outer_of: HashMap<Origin, Origin> = HashMap::new();
    for lv in 0..graph.theta_nloopvars(theta) {
        if graph.theta_result_origin(theta, lv) == graph.theta_argument(theta, lv) {
            outer_of.insert(graph.theta_argument(theta, lv), graph.theta_input_origin(theta, lv));
        }
    }

    loop {
        let mut changed = false;
        for node in topdown(graph, sub) {
            if !graph.is_alive(node) {
                continue;
            }
            let op = match &graph.node(node).kind {
                NodeKind::Simple(op) if speculable(op) => op.clone(),
                _ => continue,
            };
            let operands: Vec<Option<Origin>> = graph
                .node(node)
                .inputs
                .iter()
                .map(|input| outer_of.get(&input.origin).copied())
                .collect();
            if operands.iter().any(|o| o.is_none()) {
                continue;
            }
            let operands: Vec<Origin> = operands.into_iter().map(Option::unwrap).collect();

            let hoisted = graph.add_simple_node(outer, op, &operands)?;
            for index in 0..graph.node(node).outputs.len() as u32 {
                let lv = graph.theta_add_loopvar(theta, Origin::Output { node: hoisted, index });
                let argument = graph.theta_argument(theta, lv);
                graph.divert_users(Origin::Output { node, index }, argument);
                outer_of.insert(argument, Origin::Output { node: hoisted, index });
            }
            graph.remove_node(node)?;
            changed = true;
        }
        if !changed {
            break;
        }
    }
    Ok(())
}
