//! Substitution maps and region copying.
//!
//! Copying a region (loop unrolling, inlining) must remap every origin in
//! the copied subtree. A [`SubstitutionMap`] carries `source origin ->
//! destination origin` rewrites; [`copy_region`] threads it through the
//! recursive traversal, extending it with each copied node's outputs, and
//! leaves it extended for the caller (which is how unrolling chains body
//! copies back to front).

use std::collections::HashMap;

use crate::error::RvsdgError;
use crate::graph::{NodeKind, Origin, Rvsdg};
use crate::id::RegionId;

/// Mapping from source origins to destination origins.
#[derive(Debug, Clone, Default)]
pub struct SubstitutionMap {
    map: HashMap<Origin, Origin>,
}

impl SubstitutionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: Origin, destination: Origin) {
        self.map.insert(source, destination);
    }

    pub fn lookup(&self, source: Origin) -> Option<Origin> {
        self.map.get(&source).copied()
    }

    fn get(&self, source: Origin, region: RegionId) -> Result<Origin, RvsdgError> {
        self.lookup(source).ok_or(RvsdgError::SubstitutionMissing { region })
    }
}

/// Copies the contents of `src` into `dst`, rewriting origins through
/// `smap`.
///
/// With `copy_arguments`, fresh arguments matching `src`'s are appended to
/// `dst` and entered into the map; otherwise the caller must have seeded
/// the map for every `src` argument that is actually used. With
/// `copy_results`, `src`'s results are appended to `dst` after the nodes.
pub fn copy_region(
    graph: &mut Rvsdg,
    src: RegionId,
    dst: RegionId,
    smap: &mut SubstitutionMap,
    copy_arguments: bool,
    copy_results: bool,
) -> Result<(), RvsdgError> {
    if copy_arguments {
        for (index, arg) in graph.region(src).arguments.clone().into_iter().enumerate() {
            let new = graph.push_argument(dst, arg.ty);
            smap.insert(Origin::Argument { region: src, index: index as u32 }, new);
        }
    }

    for node in graph.region_nodes(src) {
        copy_node(graph, node, dst, smap)?;
    }

    if copy_results {
        for result in graph.region(src).results.clone() {
            let origin = smap.get(result.origin, src)?;
            graph.push_result(dst, origin, result.ty);
        }
    }
    Ok(())
}

/// Copies an explicit node selection (in the given order) into `dst`.
/// Inversion uses this to replicate a predicate computation without the
/// rest of its region.
pub fn copy_nodes(
    graph: &mut Rvsdg,
    nodes: &[crate::id::NodeId],
    dst: RegionId,
    smap: &mut SubstitutionMap,
) -> Result<(), RvsdgError> {
    for &node in nodes {
        copy_node(graph, node, dst, smap)?;
    }
    Ok(())
}

fn copy_node(
    graph: &mut Rvsdg,
    node: crate::id::NodeId,
    dst: RegionId,
    smap: &mut SubstitutionMap,
) -> Result<(), RvsdgError> {
    let src_region = graph.parent_region(node);
    let kind = graph.node(node).kind.clone();
    match kind {
        NodeKind::Simple(op) => {
            let mut operands = Vec::new();
            for input in graph.node(node).inputs.clone() {
                operands.push(smap.get(input.origin, src_region)?);
            }
            let copy = graph.add_simple_node(dst, op, &operands)?;
            for index in 0..graph.node(node).outputs.len() as u32 {
                smap.insert(
                    Origin::Output { node, index },
                    Origin::Output { node: copy, index },
                );
            }
        }

        NodeKind::Gamma => {
            let predicate = smap.get(graph.gamma_predicate(node), src_region)?;
            let nalternatives = graph.gamma_nalternatives(node);
            let copy = graph.create_gamma(dst, predicate, nalternatives)?;

            for ev in 0..graph.gamma_nentryvars(node) {
                let origin = smap.get(graph.gamma_entryvar_origin(node, ev), src_region)?;
                let new_ev = graph.gamma_add_entryvar(copy, origin);
                for alt in 0..nalternatives {
                    smap.insert(
                        graph.gamma_entryvar_argument(node, ev, alt),
                        graph.gamma_entryvar_argument(copy, new_ev, alt),
                    );
                }
            }

            for alt in 0..nalternatives {
                let from = graph.gamma_subregion(node, alt);
                let to = graph.gamma_subregion(copy, alt);
                copy_region(graph, from, to, smap, false, false)?;
            }

            let nexitvars = graph.node(node).outputs.len();
            for xv in 0..nexitvars {
                let mut origins = Vec::with_capacity(nalternatives);
                for alt in 0..nalternatives {
                    let sub = graph.gamma_subregion(node, alt);
                    let origin = graph.region(sub).results[xv].origin;
                    origins.push(smap.get(origin, sub)?);
                }
                let out = graph.gamma_add_exitvar(copy, origins)?;
                smap.insert(Origin::Output { node, index: xv as u32 }, out);
            }
        }

        NodeKind::Theta { predicate } => {
            let copy = graph.create_theta(dst);
            let nloopvars = graph.theta_nloopvars(node);
            for lv in 0..nloopvars {
                let origin = smap.get(graph.theta_input_origin(node, lv), src_region)?;
                graph.theta_add_loopvar(copy, origin);
                smap.insert(graph.theta_argument(node, lv), graph.theta_argument(copy, lv));
            }

            let src_sub = graph.theta_subregion(node);
            let dst_sub = graph.theta_subregion(copy);
            copy_region(graph, src_sub, dst_sub, smap, false, false)?;

            for lv in 0..nloopvars {
                let origin = smap.get(graph.theta_result_origin(node, lv), src_sub)?;
                graph.theta_set_result(copy, lv, origin)?;
                smap.insert(
                    Origin::Output { node, index: lv as u32 },
                    Origin::Output { node: copy, index: lv as u32 },
                );
            }

            let predicate = predicate.ok_or(RvsdgError::MissingPredicate { node })?;
            let predicate = smap.get(predicate, src_sub)?;
            graph.theta_set_predicate(copy, predicate)?;
        }

        NodeKind::Lambda { name, fn_type, linkage } => {
            let copy = graph.create_lambda(dst, name, fn_type, linkage)?;
            for index in 0..graph.lambda_nformals(node) {
                smap.insert(
                    graph.lambda_argument(node, index),
                    graph.lambda_argument(copy, index),
                );
            }
            for cv in 0..graph.lambda_nctxvars(node) {
                let origin = smap.get(graph.node(node).inputs[cv].origin, src_region)?;
                let new_arg = graph.lambda_add_ctxvar(copy, origin);
                smap.insert(graph.lambda_ctxvar_argument(node, cv), new_arg);
            }

            let src_sub = graph.lambda_subregion(node);
            let dst_sub = graph.lambda_subregion(copy);
            copy_region(graph, src_sub, dst_sub, smap, false, false)?;

            let mut results = Vec::new();
            for result in graph.region(src_sub).results.clone() {
                results.push(smap.get(result.origin, src_sub)?);
            }
            graph.lambda_finish(copy, results)?;
            smap.insert(
                Origin::Output { node, index: 0 },
                Origin::Output { node: copy, index: 0 },
            );
        }

        NodeKind::Delta { name, linkage, constant } => {
            let value_type = match &graph.node(node).outputs[0].ty {
                rheo_llir::Type::Pointer(pointee) => (**pointee).clone(),
                _ => unreachable!("delta output is always a pointer"),
            };
            let copy = graph.create_delta(dst, name, value_type, linkage, constant);
            let src_sub = graph.delta_subregion(node);
            for (cv, input) in graph.node(node).inputs.clone().into_iter().enumerate() {
                let origin = smap.get(input.origin, src_region)?;
                let new_arg = graph.delta_add_ctxvar(copy, origin);
                smap.insert(
                    Origin::Argument { region: src_sub, index: cv as u32 },
                    new_arg,
                );
            }

            let dst_sub = graph.delta_subregion(copy);
            copy_region(graph, src_sub, dst_sub, smap, false, false)?;

            let init = graph.region(src_sub).results[0].origin;
            let init = smap.get(init, src_sub)?;
            graph.delta_finish(copy, init)?;
            smap.insert(
                Origin::Output { node, index: 0 },
                Origin::Output { node: copy, index: 0 },
            );
        }

        NodeKind::Phi { nrecvars } => {
            let copy = graph.create_phi(dst);
            let src_sub = graph.phi_subregion(node);
            for rv in 0..nrecvars as usize {
                let ty = graph.region(src_sub).arguments[rv].ty.clone();
                let (_, new_arg) = graph.phi_add_recvar(copy, ty)?;
                smap.insert(Origin::Argument { region: src_sub, index: rv as u32 }, new_arg);
            }
            for (cv, input) in graph.node(node).inputs.clone().into_iter().enumerate() {
                let origin = smap.get(input.origin, src_region)?;
                let new_arg = graph.phi_add_ctxvar(copy, origin);
                smap.insert(
                    Origin::Argument {
                        region: src_sub,
                        index: (nrecvars as usize + cv) as u32,
                    },
                    new_arg,
                );
            }

            let dst_sub = graph.phi_subregion(copy);
            copy_region(graph, src_sub, dst_sub, smap, false, false)?;

            for rv in 0..nrecvars as usize {
                let origin = graph.region(src_sub).results[rv].origin;
                let origin = smap.get(origin, src_sub)?;
                graph.phi_set_recvar(copy, rv, origin)?;
                smap.insert(
                    Origin::Output { node, index: rv as u32 },
                    Origin::Output { node: copy, index: rv as u32 },
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rheo_llir::{BinOp, Operation, Type};

    #[test]
    fn copy_simple_chain_extends_the_map() {
        let mut graph = Rvsdg::new();
        let root = graph.root();
        let theta = graph.create_theta(root);
        let sub = graph.theta_subregion(theta);

        let a = graph
            .add_simple_node(sub, Operation::IntConst { nbits: 32, value: 1 }, &[])
            .unwrap();
        let b = graph
            .add_simple_node(
                sub,
                Operation::Binary { op: BinOp::Add, nbits: 32 },
                &[graph.output_origin(a, 0), graph.output_origin(a, 0)],
            )
            .unwrap();

        // Copy the body into a second theta.
        let theta2 = graph.create_theta(root);
        let sub2 = graph.theta_subregion(theta2);
        let mut smap = SubstitutionMap::new();
        copy_region(&mut graph, sub, sub2, &mut smap, false, false).unwrap();

        let b_copy = smap.lookup(graph.output_origin(b, 0)).unwrap();
        match b_copy {
            Origin::Output { node, .. } => {
                assert_eq!(graph.parent_region(node), sub2);
                assert!(graph.node(node).kind.is_simple());
            }
            _ => panic!("expected a copied node output"),
        }
        assert_eq!(graph.region(sub2).nodes.len(), 2);
    }

    #[test]
    fn copy_missing_seed_is_an_error() {
        let mut graph = Rvsdg::new();
        let root = graph.root();
        let theta = graph.create_theta(root);
        let sub = graph.theta_subregion(theta);
        let init = graph
            .add_simple_node(root, Operation::IntConst { nbits: 32, value: 0 }, &[])
            .unwrap();
        let lv = graph.theta_add_loopvar(theta, graph.output_origin(init, 0));
        let arg = graph.theta_argument(theta, lv);
        graph
            .add_simple_node(sub, Operation::Binary { op: BinOp::Add, nbits: 32 }, &[arg, arg])
            .unwrap();

        let theta2 = graph.create_theta(root);
        let sub2 = graph.theta_subregion(theta2);
        let mut smap = SubstitutionMap::new();
        let err = copy_region(&mut graph, sub, sub2, &mut smap, false, false);
        assert!(matches!(err, Err(RvsdgError::SubstitutionMissing { .. })));
    }

    #[test]
    fn copy_arguments_seeds_the_map() {
        let mut graph = Rvsdg::new();
        let root = graph.root();
        let fn_type = Type::Function {
            arguments: vec![Type::Bits(32)],
            results: vec![Type::Bits(32)],
            variadic: false,
        };
        let lambda = graph
            .create_lambda(root, "f", fn_type.clone(), rheo_llir::Linkage::Internal)
            .unwrap();
        let formal = graph.lambda_argument(lambda, 0);
        graph.lambda_finish(lambda, vec![formal]).unwrap();

        // Copying the whole lambda node maps its output.
        let mut smap = SubstitutionMap::new();
        copy_node(&mut graph, lambda, root, &mut smap).unwrap();
        let out = smap.lookup(graph.output_origin(lambda, 0)).unwrap();
        assert_eq!(graph.origin_type(out), Type::pointer(fn_type));
        graph.verify().unwrap();
    }
}
