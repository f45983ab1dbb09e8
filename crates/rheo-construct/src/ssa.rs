//! SSA destruction: phi elimination ahead of restructuring.
//!
//! Restructuring and aggregation reason about plain variables, so phi TACs
//! are lowered first: every in-edge of a phi-carrying block is split, each
//! phi routes its operands through a fresh carrier variable assigned on the
//! split blocks, and a final assignment block writes the phi outputs. The
//! carrier keeps the parallel-copy semantics of a phi row intact even when
//! one phi's output feeds another phi in the same block.

use std::collections::HashMap;

use rheo_llir::{BlockId, Cfg, Operation, Tac};

use crate::error::ConstructError;

/// Eliminates every phi TAC in the CFG.
pub fn destruct_ssa(cfg: &mut Cfg) -> Result<(), ConstructError> {
    let phi_blocks: Vec<BlockId> = cfg
        .node_ids()
        .into_iter()
        .filter(|id| {
            cfg.is_basic_block(*id)
                && cfg
                    .block(*id)
                    .tacs()
                    .first()
                    .map(|tac| matches!(tac.op, Operation::Phi { .. }))
                    .unwrap_or(false)
        })
        .collect();

    for phi_block in phi_blocks {
        eliminate_phis(cfg, phi_block)?;
    }
    Ok(())
}

fn eliminate_phis(cfg: &mut Cfg, phi_block: BlockId) -> Result<(), ConstructError> {
    // Split every in-edge once; phi operands are assigned on the splits.
    let mut splits: HashMap<BlockId, BlockId> = HashMap::new();
    for edge in cfg.inedges(phi_block) {
        let source = cfg.edge_source(edge);
        let split = cfg.split_edge(edge);
        if splits.insert(source, split).is_some() {
            // Two parallel edges from one predecessor cannot be told apart
            // by a phi row referencing blocks.
            return Err(ConstructError::PhiPredecessorMismatch { block: phi_block });
        }
    }

    let mut phis = Vec::new();
    let mut rest = Vec::new();
    for tac in cfg.block(phi_block).tacs().iter().cloned() {
        if matches!(tac.op, Operation::Phi { .. }) && rest.is_empty() {
            phis.push(tac);
        } else {
            rest.push(tac);
        }
    }

    let mut merges = Vec::new();
    for tac in &phis {
        let (ty, predecessors) = match &tac.op {
            Operation::Phi { ty, predecessors } => (ty.clone(), predecessors.clone()),
            _ => unreachable!(),
        };

        let carrier = cfg.vars.create("#phi#", ty.clone());
        for (operand, pred) in tac.inputs.iter().zip(predecessors) {
            let split = splits
                .get(&pred)
                .copied()
                .ok_or(ConstructError::PhiPredecessorMismatch { block: phi_block })?;
            cfg.append_tac(
                split,
                Tac::new(Operation::Assign { ty: ty.clone() }, [carrier, *operand], []),
            );
        }
        merges.push(Tac::new(Operation::Assign { ty }, [tac.outputs[0], carrier], []));
    }

    // Rebuild the block: phi outputs materialise first, then the rest.
    let block = cfg.block_mut(phi_block);
    *block = rheo_llir::BasicBlock::new();
    for tac in merges.into_iter().chain(rest) {
        block.append_last(tac);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rheo_llir::Type;

    #[test]
    fn phi_becomes_assignments_on_split_edges() {
        // entry -> a -> join, entry -> b -> join, join -> exit
        // join: r = phi [x from a, y from b]
        let mut cfg = Cfg::new();
        let head = cfg.add_block();
        let a = cfg.add_block();
        let b = cfg.add_block();
        let join = cfg.add_block();

        let first = cfg.outedge(cfg.entry(), 0);
        cfg.divert(first, head);
        cfg.add_outedge(head, a);
        cfg.add_outedge(head, b);
        cfg.add_outedge(a, join);
        cfg.add_outedge(b, join);
        cfg.add_outedge(join, cfg.exit());

        let x = cfg.vars.create("x", Type::Bits(32));
        let y = cfg.vars.create("y", Type::Bits(32));
        let r = cfg.vars.create("r", Type::Bits(32));
        cfg.append_tac(
            join,
            Tac::new(
                Operation::Phi { ty: Type::Bits(32), predecessors: vec![a, b] },
                [x, y],
                [r],
            ),
        );

        destruct_ssa(&mut cfg).unwrap();

        // No phi TAC remains anywhere.
        for id in cfg.node_ids() {
            if cfg.is_basic_block(id) {
                for tac in cfg.block(id).tacs() {
                    assert!(!matches!(tac.op, Operation::Phi { .. }));
                }
            }
        }

        // a and b now reach join through split blocks carrying one
        // assignment each.
        let a_succ = cfg.successors(a)[0];
        assert_eq!(cfg.block(a_succ).len(), 1);
        assert!(matches!(cfg.block(a_succ).tacs()[0].op, Operation::Assign { .. }));
        assert_eq!(cfg.block(a_succ).tacs()[0].inputs[1], x);

        // The former phi row starts with the merge assignment into r.
        let merge_block = cfg.successors(a_succ)[0];
        let merge = &cfg.block(merge_block).tacs()[0];
        assert!(matches!(merge.op, Operation::Assign { .. }));
        assert_eq!(merge.inputs[0], r);

        assert!(cfg.is_valid());
    }
}
