//! The `url` pass: loop unrolling.
//!
//! Applies to innermost thetas whose predicate comes from a two-way match
//! of a bitwise comparison between a loop-invariant bound and an induction
//! variable of the shape `add(i, step)`. The rewrite computes the trip
//! distance `r = max - min` (plus one for non-strict comparisons) and
//! splits the loop in two:
//!
//! 1. a gamma on `r >= factor` holding a theta whose body is the original
//!    body spliced `factor` times, counting down by `factor`;
//! 2. a gamma on `r > 0` holding a theta with the original body once,
//!    counting down by one, for the remainder iterations.
//!
//! Binary normal forms are held immutable while the bodies are spliced so
//! the inserted arithmetic is not folded mid-rewrite. A factor below 2
//! disables the pass; an inapplicable theta is left untouched.

use rheo_llir::{BinOp, ICmpOp, Operation};
use rheo_rvsdg::{
    copy_region, topdown, NodeId, NodeKind, Origin, RegionId, Rvsdg, RvsdgModule, SubstitutionMap,
};

use crate::error::OptError;

/// Unrolls every applicable theta by `factor`.
pub fn unroll(rm: &mut RvsdgModule, factor: u64) -> Result<(), OptError> {
    if factor < 2 {
        return Ok(());
    }

    rm.graph.normal_forms.binary.mutable = false;
    let root = rm.graph.root();
    let result = unroll_region(&mut rm.graph, root, factor);
    rm.graph.normal_forms.binary.mutable = true;
    result
}

fn unroll_region(graph: &mut Rvsdg, region: RegionId, factor: u64) -> Result<(), OptError> {
    for node in topdown(graph, region) {
        if !graph.is_alive(node) {
            continue;
        }
        if graph.node(node).subregions.is_empty() {
            continue;
        }
        for sub in graph.node(node).subregions.clone() {
            unroll_region(graph, sub, factor)?;
        }
        if matches!(graph.node(node).kind, NodeKind::Theta { .. }) {
            unroll_theta(graph, node, factor)?;
        }
    }
    Ok(())
}

fn contains_theta(graph: &Rvsdg, region: RegionId) -> bool {
    for node in graph.region_nodes(region) {
        if matches!(graph.node(node).kind, NodeKind::Theta { .. }) {
            return true;
        }
        for sub in &graph.node(node).subregions {
            if contains_theta(graph, *sub) {
                return true;
            }
        }
    }
    false
}

struct UnrollInfo {
    /// Comparison includes equality, so the trip distance gains one.
    eq: bool,
    nbits: u16,
    /// Loop-var whose argument is the induction variable's entry value.
    min_lv: usize,
    /// Loop-var whose argument is the invariant bound.
    max_lv: usize,
}

/// Checks the applicability conditions and extracts the loop shape.
fn applicability(graph: &Rvsdg, theta: NodeId) -> Option<UnrollInfo> {
    let sub = graph.theta_subregion(theta);
    if contains_theta(graph, sub) {
        return None;
    }

    // Predicate <- match {1 -> repeat} <- comparison.
    let match_node = match graph.theta_predicate(theta)? {
        Origin::Output { node, .. } => node,
        _ => return None,
    };
    match graph.node(match_node).kind.as_simple()? {
        Operation::Match { mapping, default_alternative: 0, nalternatives: 2, .. }
            if mapping.as_slice() == [(1, 1)] => {}
        _ => return None,
    }

    let cmp_node = match graph.node(match_node).inputs[0].origin {
        Origin::Output { node, .. } => node,
        _ => return None,
    };
    let (cmp_op, nbits) = match graph.node(cmp_node).kind.as_simple()? {
        Operation::ICmp { op, nbits } => (*op, *nbits),
        _ => return None,
    };

    let (max, min) = if cmp_op.is_greater() {
        (graph.node(cmp_node).inputs[0].origin, graph.node(cmp_node).inputs[1].origin)
    } else {
        (graph.node(cmp_node).inputs[1].origin, graph.node(cmp_node).inputs[0].origin)
    };

    // The bound is an invariant loop-var argument.
    let max_lv = match max {
        Origin::Argument { region, index } if region == sub => index as usize,
        _ => return None,
    };
    if graph.theta_result_origin(theta, max_lv) != graph.theta_argument(theta, max_lv) {
        return None;
    }

    // The counter is add(i, step) where exactly one operand is a loop-var
    // argument.
    let add_node = match min {
        Origin::Output { node, .. } => node,
        _ => return None,
    };
    match graph.node(add_node).kind.as_simple()? {
        Operation::Binary { op: BinOp::Add, .. } => {}
        _ => return None,
    }
    let operands = [
        graph.node(add_node).inputs[0].origin,
        graph.node(add_node).inputs[1].origin,
    ];
    let min_lv = match operands {
        [Origin::Argument { region, index }, other]
            if region == sub && !matches!(other, Origin::Argument { .. }) =>
        {
            index as usize
        }
        [other, Origin::Argument { region, index }]
            if region == sub && !matches!(other, Origin::Argument { .. }) =>
        {
            index as usize
        }
        _ => return None,
    };

    Some(UnrollInfo { eq: cmp_op.includes_equality(), nbits, min_lv, max_lv })
}

fn bitconstant(graph: &mut Rvsdg, region: RegionId, nbits: u16, value: u64) -> Origin {
    let node = graph
        .add_simple_node(region, Operation::IntConst { nbits, value }, &[])
        .expect("constants have no operands");
    graph.output_origin(node, 0)
}

fn binary(graph: &mut Rvsdg, region: RegionId, op: BinOp, nbits: u16, a: Origin, b: Origin) -> Origin {
    let node = graph
        .add_simple_node(region, Operation::Binary { op, nbits }, &[a, b])
        .expect("operands are same-width bit values");
    graph.output_origin(node, 0)
}

fn compare(graph: &mut Rvsdg, region: RegionId, op: ICmpOp, nbits: u16, a: Origin, b: Origin) -> Origin {
    let node = graph
        .add_simple_node(region, Operation::ICmp { op, nbits }, &[a, b])
        .expect("operands are same-width bit values");
    graph.output_origin(node, 0)
}

/// `match {1 -> 1} default 0` over a 1-bit comparison result.
fn match_true(graph: &mut Rvsdg, region: RegionId, cmp: Origin) -> Origin {
    let node = graph
        .add_simple_node(
            region,
            Operation::Match {
                nbits: 1,
                mapping: vec![(1, 1)],
                default_alternative: 0,
                nalternatives: 2,
            },
            &[cmp],
        )
        .expect("match consumes the comparison bit");
    graph.output_origin(node, 0)
}

fn unroll_theta(graph: &mut Rvsdg, theta: NodeId, factor: u64) -> Result<(), OptError> {
    let info = match applicability(graph, theta) {
        Some(info) => info,
        None => return Ok(()),
    };
    tracing::debug!(theta = %theta, factor, "unrolling loop");

    let region = graph.parent_region(theta);
    let sub = graph.theta_subregion(theta);
    let nloopvars = graph.theta_nloopvars(theta);
    let nbits = info.nbits;

    let min_origin = graph.theta_input_origin(theta, info.min_lv);
    let max_origin = graph.theta_input_origin(theta, info.max_lv);
    let old_predicate = graph.theta_predicate(theta).expect("applicable theta has a predicate");

    // r = max - min (+1 when the comparison is non-strict).
    let one = bitconstant(graph, region, nbits, 1);
    let uf = bitconstant(graph, region, nbits, factor);
    let mut r = binary(graph, region, BinOp::Sub, nbits, max_origin, min_origin);
    if info.eq {
        r = binary(graph, region, BinOp::Add, nbits, r, one);
    }
    let cmp = compare(graph, region, ICmpOp::Sge, nbits, r, uf);
    let pred = match_true(graph, region, cmp);

    // Final origins for the old theta's outputs.
    let mut smap = SubstitutionMap::new();

    // -- gamma with the unrolled loop --
    {
        let ngamma = graph.create_gamma(region, pred, 2)?;
        let ntheta = graph.create_theta(graph.gamma_subregion(ngamma, 1));

        let mut rmap = SubstitutionMap::new();
        for lv in 0..nloopvars {
            let ev = graph.gamma_add_entryvar(ngamma, graph.theta_input_origin(theta, lv));
            let nlv = graph.theta_add_loopvar(ntheta, graph.gamma_entryvar_argument(ngamma, ev, 1));
            smap.insert(
                Origin::Output { node: theta, index: lv as u32 },
                graph.gamma_entryvar_argument(ngamma, ev, 0),
            );
            rmap.insert(graph.theta_argument(theta, lv), graph.theta_argument(ntheta, nlv));
        }

        // Splice the body `factor` times, rethreading loop-vars between
        // the copies.
        let nsub = graph.theta_subregion(ntheta);
        for _ in 0..factor - 1 {
            copy_region(graph, sub, nsub, &mut rmap, false, false)?;
            let mut next = SubstitutionMap::new();
            for lv in 0..nloopvars {
                let carried = rmap
                    .lookup(graph.theta_result_origin(theta, lv))
                    .expect("body copy maps every loop-var result");
                next.insert(graph.theta_argument(theta, lv), carried);
            }
            rmap = next;
        }
        copy_region(graph, sub, nsub, &mut rmap, false, false)?;

        for lv in 0..nloopvars {
            let result = rmap
                .lookup(graph.theta_result_origin(theta, lv))
                .expect("body copy maps every loop-var result");
            graph.theta_set_result(ntheta, lv, result)?;
            rmap.insert(
                Origin::Output { node: theta, index: lv as u32 },
                Origin::Output { node: ntheta, index: lv as u32 },
            );
        }
        let npred = rmap.lookup(old_predicate).expect("body copy maps the predicate");
        graph.theta_set_predicate(ntheta, npred)?;

        for lv in 0..nloopvars {
            let output = Origin::Output { node: theta, index: lv as u32 };
            let taken = rmap.lookup(output).expect("outputs mapped above");
            let skipped = smap.lookup(output).expect("entry-var arguments mapped above");
            let xv = graph.gamma_add_exitvar(ngamma, vec![skipped, taken])?;
            smap.insert(output, xv);
        }

        // Thread the trip distance through the unrolled loop, counting
        // down by the factor.
        let evr = graph.gamma_add_entryvar(ngamma, r);
        let lvr = graph.theta_add_loopvar(ntheta, graph.gamma_entryvar_argument(ngamma, evr, 1));

        let uf_body = bitconstant(graph, nsub, nbits, factor);
        let next_r = binary(
            graph,
            nsub,
            BinOp::Sub,
            nbits,
            graph.theta_argument(ntheta, lvr),
            uf_body,
        );
        let cmp = compare(graph, nsub, ICmpOp::Sge, nbits, next_r, uf_body);
        let npred = match_true(graph, nsub, cmp);
        graph.theta_set_result(ntheta, lvr, next_r)?;
        graph.theta_set_predicate(ntheta, npred)?;

        let xvr = graph.gamma_add_exitvar(
            ngamma,
            vec![
                graph.gamma_entryvar_argument(ngamma, evr, 0),
                Origin::Output { node: ntheta, index: lvr as u32 },
            ],
        )?;
        r = xvr;
    }

    // -- gamma for the leftover iterations --
    let zero = bitconstant(graph, region, nbits, 0);
    let cmp = compare(graph, region, ICmpOp::Sgt, nbits, r, zero);
    let pred = match_true(graph, region, cmp);
    {
        let ngamma = graph.create_gamma(region, pred, 2)?;
        let ntheta = graph.create_theta(graph.gamma_subregion(ngamma, 1));

        let mut rmap = SubstitutionMap::new();
        let mut skipped_args = Vec::with_capacity(nloopvars);
        for lv in 0..nloopvars {
            let output = Origin::Output { node: theta, index: lv as u32 };
            let after_unrolled = smap.lookup(output).expect("unrolled gamma mapped every output");
            let ev = graph.gamma_add_entryvar(ngamma, after_unrolled);
            graph.theta_add_loopvar(ntheta, graph.gamma_entryvar_argument(ngamma, ev, 1));
            skipped_args.push(graph.gamma_entryvar_argument(ngamma, ev, 0));
            rmap.insert(graph.theta_argument(theta, lv), graph.theta_argument(ntheta, lv));
        }

        let nsub = graph.theta_subregion(ntheta);
        copy_region(graph, sub, nsub, &mut rmap, false, false)?;

        for lv in 0..nloopvars {
            let result = rmap
                .lookup(graph.theta_result_origin(theta, lv))
                .expect("body copy maps every loop-var result");
            graph.theta_set_result(ntheta, lv, result)?;
            let xv = graph.gamma_add_exitvar(
                ngamma,
                vec![skipped_args[lv], Origin::Output { node: ntheta, index: lv as u32 }],
            )?;
            smap.insert(Origin::Output { node: theta, index: lv as u32 }, xv);
        }
        let npred = rmap.lookup(old_predicate).expect("body copy maps the predicate");
        graph.theta_set_predicate(ntheta, npred)?;

        // Count the remainder down by one.
        let evr = graph.gamma_add_entryvar(ngamma, r);
        let lvr = graph.theta_add_loopvar(ntheta, graph.gamma_entryvar_argument(ngamma, evr, 1));
        let zero_body = bitconstant(graph, nsub, nbits, 0);
        let one_body = bitconstant(graph, nsub, nbits, 1);
        let next_r = binary(
            graph,
            nsub,
            BinOp::Sub,
            nbits,
            graph.theta_argument(ntheta, lvr),
            one_body,
        );
        let cmp = compare(graph, nsub, ICmpOp::Sgt, nbits, next_r, zero_body);
        let npred = match_true(graph, nsub, cmp);
        graph.theta_set_result(ntheta, lvr, next_r)?;
        graph.theta_set_predicate(ntheta, npred)?;
    }

    for lv in 0..nloopvars {
        let output = Origin::Output { node: theta, index: lv as u32 };
        let replacement = smap.lookup(output).expect("remainder gamma mapped every output");
        graph.divert_users(output, replacement);
    }
    graph.remove_node(theta)?;
    Ok(())
}
