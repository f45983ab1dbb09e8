//! Demand annotation: backward liveness over the aggregation tree.
//!
//! For every tree node the analysis computes the set of variables live at
//! its entry (`top`) and exit (`bottom`); branch nodes additionally carry
//! the shared case boundary sets. The traversal is right-to-left through
//! TACs and bottom-up through the tree; loops iterate to a fixed point,
//! which two passes reach because the transfer functions are monotone over
//! a union lattice.
//!
//! The assignment operation is special-cased: its destination is modeled
//! as input 0, so it kills input 0 and generates input 1.

use std::collections::HashMap;

use indexmap::IndexSet;

use rheo_llir::{Operation, VarId};

use crate::aggregation::{AggNodeId, AggNodeKind, AggTree};

/// Variables live at a node's boundaries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemandSet {
    pub top: IndexSet<VarId>,
    pub bottom: IndexSet<VarId>,
    /// Present on branch nodes only.
    pub branch: Option<BranchDemand>,
}

/// The shared boundary sets of a branch node's cases.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BranchDemand {
    pub cases_top: IndexSet<VarId>,
    pub cases_bottom: IndexSet<VarId>,
}

pub type DemandMap = HashMap<AggNodeId, DemandSet>;

/// Annotates the whole tree, returning the per-node demand sets.
pub fn annotate(tree: &AggTree) -> DemandMap {
    let mut dm = DemandMap::new();
    let mut pds = IndexSet::new();
    annotate_node(tree, tree.root(), &mut pds, &mut dm);
    dm
}

fn annotate_node(
    tree: &AggTree,
    id: AggNodeId,
    pds: &mut IndexSet<VarId>,
    dm: &mut DemandMap,
) {
    // Re-annotation with an unchanged incoming demand is skipped.
    if let Some(ds) = dm.get(&id) {
        if ds.bottom == *pds {
            *pds = ds.top.clone();
            return;
        }
    }

    let node = tree.node(id);
    match &node.kind {
        AggNodeKind::Entry(attr) => {
            let bottom = pds.clone();
            for arg in &attr.arguments {
                pds.shift_remove(arg);
            }
            dm.insert(id, DemandSet { top: pds.clone(), bottom, branch: None });
        }

        AggNodeKind::Exit(attr) => {
            let bottom = pds.clone();
            for result in &attr.results {
                pds.insert(*result);
            }
            dm.insert(id, DemandSet { top: pds.clone(), bottom, branch: None });
        }

        AggNodeKind::Block { block, .. } => {
            let bottom = pds.clone();
            for tac in block.tacs().iter().rev() {
                if matches!(tac.op, Operation::Assign { .. }) {
                    pds.shift_remove(&tac.inputs[0]);
                    pds.insert(tac.inputs[1]);
                } else {
                    for output in &tac.outputs {
                        pds.shift_remove(output);
                    }
                    for input in &tac.inputs {
                        pds.insert(*input);
                    }
                }
            }
            dm.insert(id, DemandSet { top: pds.clone(), bottom, branch: None });
        }

        AggNodeKind::Linear => {
            let bottom = pds.clone();
            for &child in node.children.iter().rev() {
                annotate_node(tree, child, pds, dm);
            }
            dm.insert(id, DemandSet { top: pds.clone(), bottom, branch: None });
        }

        AggNodeKind::Branch => {
            let bottom = pds.clone();
            let cases_bottom = pds.clone();

            let mut cases_top: IndexSet<VarId> = IndexSet::new();
            for &case in &node.children[1..] {
                let mut tmp = cases_bottom.clone();
                annotate_node(tree, case, &mut tmp, dm);
                cases_top.extend(tmp);
            }

            *pds = cases_top.clone();
            annotate_node(tree, node.children[0], pds, dm);

            dm.insert(
                id,
                DemandSet {
                    top: pds.clone(),
                    bottom,
                    branch: Some(BranchDemand { cases_top, cases_bottom }),
                },
            );
        }

        AggNodeKind::Loop => {
            let mut bottom = pds.clone();
            annotate_node(tree, node.children[0], pds, dm);
            if bottom != *pds {
                bottom.extend(pds.iter().copied());
                *pds = bottom.clone();
                annotate_node(tree, node.children[0], pds, dm);
            }
            // A loop demands at entry exactly what it demands at exit:
            // that set is what the theta threads as loop-vars.
            *pds = bottom.clone();
            dm.insert(id, DemandSet { top: bottom.clone(), bottom, branch: None });
        }
    }
}
