//! A tiny bit-value evaluator for RVSDG regions, shared by the
//! optimisation integration tests. It covers the integer subset the
//! rewrite passes touch -- constants, arithmetic, comparisons, match,
//! gamma, theta -- which is enough to observe that a rewritten graph
//! computes the same outputs as the original.

use std::collections::HashMap;

use rheo_llir::{BinOp, ICmpOp, Operation};
use rheo_rvsdg::{NodeKind, Origin, RegionId, Rvsdg};

fn mask(nbits: u16, value: u64) -> u64 {
    if nbits >= 64 {
        value
    } else {
        value & ((1u64 << nbits) - 1)
    }
}

fn sign_extend(nbits: u16, value: u64) -> i64 {
    if nbits >= 64 {
        value as i64
    } else {
        let shift = 64 - nbits as u32;
        ((value << shift) as i64) >> shift
    }
}

fn eval_binary(op: BinOp, nbits: u16, a: u64, b: u64) -> u64 {
    let result = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::UDiv => a / b,
        BinOp::SDiv => (sign_extend(nbits, a) / sign_extend(nbits, b)) as u64,
        BinOp::URem => a % b,
        BinOp::SRem => (sign_extend(nbits, a) % sign_extend(nbits, b)) as u64,
        BinOp::Shl => a << b,
        BinOp::LShr => a >> b,
        BinOp::AShr => (sign_extend(nbits, a) >> b) as u64,
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
    };
    mask(nbits, result)
}

fn eval_icmp(op: ICmpOp, nbits: u16, a: u64, b: u64) -> u64 {
    let (sa, sb) = (sign_extend(nbits, a), sign_extend(nbits, b));
    let result = match op {
        ICmpOp::Eq => a == b,
        ICmpOp::Ne => a != b,
        ICmpOp::Ult => a < b,
        ICmpOp::Ule => a <= b,
        ICmpOp::Ugt => a > b,
        ICmpOp::Uge => a >= b,
        ICmpOp::Slt => sa < sb,
        ICmpOp::Sle => sa <= sb,
        ICmpOp::Sgt => sa > sb,
        ICmpOp::Sge => sa >= sb,
    };
    result as u64
}

/// Evaluates every node of `region` under `env`, extending `env` with
/// each output value. Rewritten regions are not necessarily in
/// dependency order, so nodes run as their operands become available.
pub fn eval_region(graph: &Rvsdg, region: RegionId, env: &mut HashMap<Origin, u64>) {
    let mut pending = graph.region_nodes(region);
    while !pending.is_empty() {
        let ready: Vec<_> = pending
            .iter()
            .copied()
            .filter(|node| {
                graph
                    .node(*node)
                    .inputs
                    .iter()
                    .all(|input| env.contains_key(&input.origin))
            })
            .collect();
        assert!(!ready.is_empty(), "evaluation stuck on a dependency cycle");
        pending.retain(|node| !ready.contains(node));
        for node in ready {
            eval_node(graph, node, env);
        }
    }
}

fn eval_node(graph: &Rvsdg, node: rheo_rvsdg::NodeId, env: &mut HashMap<Origin, u64>) {
    match &graph.node(node).kind {
        NodeKind::Simple(op) => {
            let inputs: Vec<u64> = graph
                .node(node)
                .inputs
                .iter()
                .map(|input| env[&input.origin])
                .collect();
            let out = Origin::Output { node, index: 0 };
            match op {
                Operation::IntConst { nbits, value } => {
                    env.insert(out, mask(*nbits, *value));
                }
                Operation::Binary { op, nbits } => {
                    env.insert(out, eval_binary(*op, *nbits, inputs[0], inputs[1]));
                }
                Operation::ICmp { op, nbits } => {
                    env.insert(out, eval_icmp(*op, *nbits, inputs[0], inputs[1]));
                }
                Operation::Match { .. } => {
                    let alt = op.match_alternative(inputs[0]).unwrap();
                    env.insert(out, alt);
                }
                other => panic!("evaluator does not model {:?}", other),
            }
        }

        NodeKind::Gamma => {
            let predicate = env[&graph.gamma_predicate(node)];
            let alt = predicate as usize;
            let sub = graph.gamma_subregion(node, alt);
            for ev in 0..graph.gamma_nentryvars(node) {
                let value = env[&graph.gamma_entryvar_origin(node, ev)];
                env.insert(graph.gamma_entryvar_argument(node, ev, alt), value);
            }
            eval_region(graph, sub, env);
            for xv in 0..graph.node(node).outputs.len() {
                let value = env[&graph.region(sub).results[xv].origin];
                env.insert(Origin::Output { node, index: xv as u32 }, value);
            }
        }

        NodeKind::Theta { predicate } => {
            let predicate = predicate.expect("complete theta");
            let nloopvars = graph.theta_nloopvars(node);
            let mut values: Vec<u64> = (0..nloopvars)
                .map(|lv| env[&graph.theta_input_origin(node, lv)])
                .collect();
            loop {
                for (lv, value) in values.iter().enumerate() {
                    env.insert(graph.theta_argument(node, lv), *value);
                }
                eval_region(graph, graph.theta_subregion(node), env);
                for (lv, value) in values.iter_mut().enumerate() {
                    *value = env[&graph.theta_result_origin(node, lv)];
                }
                if env[&predicate] != 1 {
                    break;
                }
            }
            for (lv, value) in values.iter().enumerate() {
                env.insert(Origin::Output { node, index: lv as u32 }, *value);
            }
        }

        other => panic!("evaluator does not model {:?}", other.label()),
    }
}
