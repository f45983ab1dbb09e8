//! The CFG-to-RVSDG builder.
//!
//! Per function: SSA destruction, restructuring, aggregation, annotation,
//! then a single tree walk that emits a lambda. The walk maintains a value
//! map from LLIR variables live at the current program point to RVSDG
//! origins; tree nodes translate as
//!
//! * **entry** -- bind formal arguments, capture globals demanded above the
//!   entry as lambda context-vars;
//! * **block** -- one simple node per TAC (assignments alias the map,
//!   branch TACs become the pending predicate, match TACs are remembered
//!   for predicate negation);
//! * **branch** -- a gamma whose entry-vars are the cases' shared top
//!   demand and whose exit-vars are their shared bottom demand;
//! * **loop** -- a theta with one loop-var per variable in the loop's top
//!   demand; the back-edge set decides which alternative of the tail match
//!   repeats, and the predicate is inverted when the repeat alternative is
//!   not alternative 1;
//! * **exit** -- region results in the order the lambda type prescribes.
//!
//! Module level: data nodes become deltas, plain functions become lambdas,
//! and mutually recursive IPG components become a phi binding group.

use std::collections::HashMap;

use rheo_llir::{
    BlockId, Cfg, DataInit, IpgNode, IpgNodeId, Linkage, LlirModule, Operation, Type, VarId,
    VarKind, VarTable,
};
use rheo_rvsdg::{NodeId, Origin, RegionId, Rvsdg, RvsdgModule};

use crate::aggregation::{aggregate, AggNodeId, AggNodeKind, AggTree};
use crate::annotation::{annotate, DemandMap};
use crate::error::ConstructError;
use crate::restructure::restructure;
use crate::ssa::destruct_ssa;

/// Translates a whole LLIR module into an RVSDG module.
pub fn build_rvsdg(module: &LlirModule) -> Result<RvsdgModule, ConstructError> {
    let mut rm = RvsdgModule::new(module.name.clone());
    rm.target_triple = module.target_triple.clone();
    rm.data_layout = module.data_layout.clone();
    let graph = &mut rm.graph;

    // IPG values already constructed, keyed by node: lambda/delta outputs
    // or root-region imports.
    let mut resolve: HashMap<IpgNodeId, Origin> = HashMap::new();

    for scc in module.ipg.sccs() {
        let recursive = scc.len() > 1 || module.ipg.is_self_recursive(scc[0]);
        if !recursive {
            let id = scc[0];
            let origin = match module.ipg.get(id) {
                IpgNode::Function { name, fn_type, linkage, cfg: Some(cfg) } => {
                    let root = graph.root();
                    let lambda = build_function(
                        graph, root, name, fn_type, *linkage, cfg, &resolve,
                    )?;
                    graph.output_origin(lambda, 0)
                }
                IpgNode::Function { name, fn_type, .. } => {
                    graph.add_named_import(Type::pointer(fn_type.clone()), name.clone())
                }
                IpgNode::Data { name, value_type, linkage, constant, init: Some(init) } => {
                    let root = graph.root();
                    let delta = build_data(
                        graph, root, name, value_type, *linkage, *constant, init, &resolve,
                    )?;
                    graph.output_origin(delta, 0)
                }
                IpgNode::Data { name, value_type, .. } => {
                    graph.add_named_import(Type::pointer(value_type.clone()), name.clone())
                }
            };
            resolve.insert(id, origin);
            continue;
        }

        // A mutually recursive binding group becomes one phi node.
        let root = graph.root();
        let phi = graph.create_phi(root);
        let mut inner_resolve: HashMap<IpgNodeId, Origin> = HashMap::new();
        let mut recvars = Vec::with_capacity(scc.len());
        for &member in &scc {
            let node = module.ipg.get(member);
            if !node.is_function() {
                return Err(ConstructError::RecursiveData { name: node.name().into() });
            }
            let (rv, argument) = graph.phi_add_recvar(phi, node.output_type())?;
            inner_resolve.insert(member, argument);
            recvars.push((member, rv));
        }
        for &member in &scc {
            for dep in module.ipg.dependencies(member) {
                if scc.contains(&dep) || inner_resolve.contains_key(&dep) {
                    continue;
                }
                let outer = resolve
                    .get(&dep)
                    .copied()
                    .expect("SCCs are processed callees-first");
                let inner = graph.phi_add_ctxvar(phi, outer);
                inner_resolve.insert(dep, inner);
            }
        }

        for &(member, rv) in &recvars {
            let (name, fn_type, linkage, cfg) = match module.ipg.get(member) {
                IpgNode::Function { name, fn_type, linkage, cfg: Some(cfg) } => {
                    (name, fn_type, *linkage, cfg)
                }
                IpgNode::Function { name, .. } => {
                    return Err(ConstructError::MissingBody { name: name.clone() })
                }
                _ => unreachable!("checked above"),
            };
            let sub = graph.phi_subregion(phi);
            let lambda =
                build_function(graph, sub, name, fn_type, linkage, cfg, &inner_resolve)?;
            graph.phi_set_recvar(phi, rv, graph.output_origin(lambda, 0))?;
        }

        for (n, &(member, rv)) in recvars.iter().enumerate() {
            debug_assert_eq!(n, rv);
            resolve.insert(member, graph.output_origin(phi, rv as u32));
        }
    }

    graph.verify()?;
    Ok(rm)
}

/// Runs the per-function pipeline and emits a lambda into `region`.
pub fn build_function(
    graph: &mut Rvsdg,
    region: RegionId,
    name: &str,
    fn_type: &Type,
    linkage: Linkage,
    cfg: &Cfg,
    resolve: &HashMap<IpgNodeId, Origin>,
) -> Result<NodeId, ConstructError> {
    let mut cfg = cfg.clone();
    tracing::debug!(function = name, nblocks = cfg.nnodes(), "constructing lambda");
    destruct_ssa(&mut cfg)?;
    let back_edges = restructure(&mut cfg)?;

    let nformals = match fn_type {
        Type::Function { arguments, .. } => arguments.len(),
        _ => 0,
    };
    if cfg.entry_attr().arguments.len() != nformals {
        return Err(ConstructError::ResultArityMismatch { name: name.into() });
    }

    let tree = aggregate(cfg)?;
    let dm = annotate(&tree);

    let lambda = graph.create_lambda(region, name, fn_type.clone(), linkage)?;
    let body = graph.lambda_subregion(lambda);
    let mut builder = FunctionBuilder {
        graph,
        tree: &tree,
        dm: &dm,
        back: back_edges.iter().map(|be| (be.source, be.index)).collect(),
        resolve,
        lambda,
        region: body,
        vmap: HashMap::new(),
        pending_branch: None,
        match_defs: HashMap::new(),
    };
    builder.translate(tree.root())?;
    Ok(lambda)
}

struct PendingBranch {
    block: BlockId,
    control_var: VarId,
    origin: Origin,
}

struct MatchDef {
    operand: Origin,
    op: Operation,
}

struct FunctionBuilder<'a> {
    graph: &'a mut Rvsdg,
    tree: &'a AggTree,
    dm: &'a DemandMap,
    /// Back-edge source block -> source-local index of the repeat edge.
    back: HashMap<BlockId, u32>,
    resolve: &'a HashMap<IpgNodeId, Origin>,
    lambda: NodeId,
    region: RegionId,
    vmap: HashMap<VarId, Origin>,
    pending_branch: Option<PendingBranch>,
    /// Control variable -> the match that defined it, for predicate
    /// inversion at loop tails.
    match_defs: HashMap<VarId, MatchDef>,
}

impl<'a> FunctionBuilder<'a> {
    /// The in-order last basic block of a subtree, for diagnostics.
    fn last_block(&self, id: AggNodeId) -> BlockId {
        self.tree
            .blocks_inorder_of(id)
            .last()
            .map(|(block, _)| *block)
            .unwrap_or(BlockId(0))
    }

    fn lookup(&self, var: VarId) -> Result<Origin, ConstructError> {
        self.vmap
            .get(&var)
            .copied()
            .ok_or(ConstructError::UndefinedVariable { variable: var })
    }

    fn translate(&mut self, id: AggNodeId) -> Result<(), ConstructError> {
        let node = self.tree.node(id);
        match &node.kind {
            AggNodeKind::Entry(attr) => {
                for (n, &var) in attr.arguments.iter().enumerate() {
                    let origin = self.graph.lambda_argument(self.lambda, n);
                    self.vmap.insert(var, origin);
                }

                // Whatever is still demanded above the entry is either a
                // global (captured as a context variable) or a local that
                // only a loop's conservative demand set carries this high;
                // the latter binds to an undef value that no execution
                // observes before its real definition.
                for &var in &self.dm[&id].top {
                    if self.vmap.contains_key(&var) {
                        continue;
                    }
                    let variable = self.tree.vars.get(var).expect("demanded var exists");
                    match variable.kind {
                        VarKind::Global(dep) => {
                            let outer = self
                                .resolve
                                .get(&dep)
                                .copied()
                                .ok_or(ConstructError::UndefinedVariable { variable: var })?;
                            let inner = self.graph.lambda_add_ctxvar(self.lambda, outer);
                            self.vmap.insert(var, inner);
                        }
                        VarKind::Local => {
                            let undef = self.graph.add_simple_node(
                                self.region,
                                Operation::Undef { ty: variable.ty.clone() },
                                &[],
                            )?;
                            self.vmap.insert(var, Origin::Output { node: undef, index: 0 });
                        }
                    }
                }
                Ok(())
            }

            AggNodeKind::Exit(attr) => {
                let mut results = Vec::with_capacity(attr.results.len());
                for &var in &attr.results {
                    results.push(self.lookup(var)?);
                }
                self.graph.lambda_finish(self.lambda, results)?;
                Ok(())
            }

            AggNodeKind::Block { id: block_id, block } => {
                for tac in block.tacs() {
                    self.translate_tac(*block_id, tac)?;
                }
                Ok(())
            }

            AggNodeKind::Linear => {
                for &child in &node.children {
                    self.translate(child)?;
                }
                Ok(())
            }

            AggNodeKind::Branch => self.translate_branch(id, node),

            AggNodeKind::Loop => self.translate_loop(id, node),
        }
    }

    fn translate_tac(
        &mut self,
        block: BlockId,
        tac: &rheo_llir::Tac,
    ) -> Result<(), ConstructError> {
        match &tac.op {
            Operation::Assign { .. } => {
                let value = self.lookup(tac.inputs[1])?;
                self.vmap.insert(tac.inputs[0], value);
                Ok(())
            }

            Operation::Branch { .. } => {
                let control_var = tac.inputs[0];
                let origin = self.lookup(control_var)?;
                self.pending_branch = Some(PendingBranch { block, control_var, origin });
                Ok(())
            }

            Operation::Phi { .. } => Err(ConstructError::UnloweredPhi { block }),

            op => {
                let mut operands = Vec::with_capacity(tac.inputs.len());
                for &input in &tac.inputs {
                    operands.push(self.lookup(input)?);
                }
                let node = self.graph.add_simple_node(self.region, op.clone(), &operands)?;
                for (n, &output) in tac.outputs.iter().enumerate() {
                    self.vmap.insert(output, Origin::Output { node, index: n as u32 });
                }
                if matches!(op, Operation::Match { .. }) {
                    self.match_defs.insert(
                        tac.outputs[0],
                        MatchDef { operand: operands[0], op: op.clone() },
                    );
                }
                Ok(())
            }
        }
    }

    fn translate_branch(
        &mut self,
        id: AggNodeId,
        node: &crate::aggregation::AggNode,
    ) -> Result<(), ConstructError> {
        self.translate(node.children[0])?;
        let head = self.last_block(node.children[0]);
        let pending = self
            .pending_branch
            .take()
            .ok_or(ConstructError::MissingBranchPredicate { block: head })?;

        let bd = self.dm[&id].branch.as_ref().expect("branch node is annotated");
        let nalternatives = node.children.len() - 1;
        let gamma = self.graph.create_gamma(self.region, pending.origin, nalternatives)?;

        let mut entryvars = Vec::with_capacity(bd.cases_top.len());
        for &var in &bd.cases_top {
            let origin = self.lookup(var)?;
            entryvars.push((var, self.graph.gamma_add_entryvar(gamma, origin)));
        }

        let outer_region = self.region;
        let outer_vmap = std::mem::take(&mut self.vmap);
        let mut case_finals = Vec::with_capacity(nalternatives);
        for (alt, &case) in node.children[1..].iter().enumerate() {
            self.region = self.graph.gamma_subregion(gamma, alt);
            self.vmap = entryvars
                .iter()
                .map(|&(var, ev)| (var, self.graph.gamma_entryvar_argument(gamma, ev, alt)))
                .collect();
            self.translate(case)?;
            case_finals.push(std::mem::take(&mut self.vmap));
        }
        self.region = outer_region;
        self.vmap = outer_vmap;

        for &var in &bd.cases_bottom {
            let mut origins = Vec::with_capacity(nalternatives);
            for finals in &case_finals {
                origins.push(
                    finals
                        .get(&var)
                        .copied()
                        .ok_or(ConstructError::UndefinedVariable { variable: var })?,
                );
            }
            let out = self.graph.gamma_add_exitvar(gamma, origins)?;
            self.vmap.insert(var, out);
        }
        Ok(())
    }

    fn translate_loop(
        &mut self,
        id: AggNodeId,
        node: &crate::aggregation::AggNode,
    ) -> Result<(), ConstructError> {
        let ds = &self.dm[&id];
        let theta = self.graph.create_theta(self.region);

        let mut loopvars = Vec::with_capacity(ds.top.len());
        for &var in &ds.top {
            let origin = self.lookup(var)?;
            loopvars.push((var, self.graph.theta_add_loopvar(theta, origin)));
        }

        let outer_region = self.region;
        let outer_vmap = std::mem::take(&mut self.vmap);
        self.region = self.graph.theta_subregion(theta);
        self.vmap = loopvars
            .iter()
            .map(|&(var, lv)| (var, self.graph.theta_argument(theta, lv)))
            .collect();

        self.translate(node.children[0])?;

        let tail = self.last_block(node.children[0]);
        let pending = self
            .pending_branch
            .take()
            .ok_or(ConstructError::MissingBranchPredicate { block: tail })?;
        match self.graph.origin_type(pending.origin) {
            Type::Control(2) => {}
            Type::Control(n) => {
                return Err(ConstructError::LoopTailArity {
                    block: pending.block,
                    nalternatives: n,
                })
            }
            _ => return Err(ConstructError::MissingBranchPredicate { block: pending.block }),
        }

        // The recorded back-edge decides which alternative repeats. Theta
        // semantics repeat on alternative 1; invert the match otherwise.
        let repeat_index = *self
            .back
            .get(&pending.block)
            .ok_or(ConstructError::BackEdgeMismatch { block: pending.block })?;
        let predicate = match repeat_index {
            1 => pending.origin,
            0 => self.invert_match(&pending)?,
            _ => return Err(ConstructError::BackEdgeMismatch { block: pending.block }),
        };

        for &(var, lv) in &loopvars {
            let result = self.lookup(var)?;
            self.graph.theta_set_result(theta, lv, result)?;
        }
        self.graph.theta_set_predicate(theta, predicate)?;

        self.region = outer_region;
        self.vmap = outer_vmap;
        for (n, &(var, _)) in loopvars.iter().enumerate() {
            self.vmap.insert(var, Origin::Output { node: theta, index: n as u32 });
        }
        Ok(())
    }

    /// Re-emits the match defining the tail predicate with its two
    /// alternatives swapped.
    fn invert_match(&mut self, pending: &PendingBranch) -> Result<Origin, ConstructError> {
        let def = self
            .match_defs
            .get(&pending.control_var)
            .ok_or(ConstructError::MissingBranchPredicate { block: pending.block })?;
        let inverted = match &def.op {
            Operation::Match { nbits, mapping, default_alternative, nalternatives: 2 } => {
                Operation::Match {
                    nbits: *nbits,
                    mapping: mapping.iter().map(|&(v, alt)| (v, 1 - alt)).collect(),
                    default_alternative: 1 - default_alternative,
                    nalternatives: 2,
                }
            }
            _ => return Err(ConstructError::BackEdgeMismatch { block: pending.block }),
        };
        let operand = def.operand;
        let node = self.graph.add_simple_node(self.region, inverted, &[operand])?;
        Ok(Origin::Output { node, index: 0 })
    }
}

/// Builds a delta node for one data definition.
fn build_data(
    graph: &mut Rvsdg,
    region: RegionId,
    name: &str,
    value_type: &Type,
    linkage: Linkage,
    constant: bool,
    init: &DataInit,
    resolve: &HashMap<IpgNodeId, Origin>,
) -> Result<NodeId, ConstructError> {
    let delta = graph.create_delta(region, name, value_type.clone(), linkage, constant);
    let sub = graph.delta_subregion(delta);

    let mut vmap: HashMap<VarId, Origin> = HashMap::new();
    bind_globals(graph, delta, &init.vars, &init.tacs, resolve, &mut vmap)?;

    for tac in &init.tacs {
        let mut operands = Vec::with_capacity(tac.inputs.len());
        for &input in &tac.inputs {
            operands.push(
                vmap.get(&input)
                    .copied()
                    .ok_or(ConstructError::UndefinedVariable { variable: input })?,
            );
        }
        let node = graph.add_simple_node(sub, tac.op.clone(), &operands)?;
        for (n, &output) in tac.outputs.iter().enumerate() {
            vmap.insert(output, Origin::Output { node, index: n as u32 });
        }
    }

    let value = vmap
        .get(&init.value)
        .copied()
        .ok_or(ConstructError::UndefinedVariable { variable: init.value })?;
    graph.delta_finish(delta, value)?;
    Ok(delta)
}

/// Captures every global referenced by an initialiser as a delta
/// context-var before translation starts.
fn bind_globals(
    graph: &mut Rvsdg,
    delta: NodeId,
    vars: &VarTable,
    tacs: &[rheo_llir::Tac],
    resolve: &HashMap<IpgNodeId, Origin>,
    vmap: &mut HashMap<VarId, Origin>,
) -> Result<(), ConstructError> {
    for tac in tacs {
        for &input in &tac.inputs {
            if vmap.contains_key(&input) {
                continue;
            }
            if let Some(variable) = vars.get(input) {
                if let VarKind::Global(dep) = variable.kind {
                    let outer = resolve
                        .get(&dep)
                        .copied()
                        .ok_or(ConstructError::UndefinedVariable { variable: input })?;
                    let inner = graph.delta_add_ctxvar(delta, outer);
                    vmap.insert(input, inner);
                }
            }
        }
    }
    Ok(())
}
