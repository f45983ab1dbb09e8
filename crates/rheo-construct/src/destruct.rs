//! RVSDG destruction: lowering back to a CFG-based LLIR module.
//!
//! Structural nodes unfold into control flow: a gamma becomes a branch
//! diamond whose exit-vars are carried through assignment TACs, a theta
//! becomes a tail-controlled loop with one carrier variable per loop-var
//! (branch alternative 0 leaves the loop, alternative 1 repeats, matching
//! theta predicate semantics), a lambda becomes a function node with a
//! fresh CFG, a delta becomes a data node initialiser, and a phi becomes
//! its member functions with mutual IPG dependencies.
//!
//! Lowering emits deliberately naive control flow; each function's CFG is
//! straightened and pruned before it is handed back, so trivial chains
//! from gamma joins and theta spills do not survive.

use std::collections::HashMap;

use rheo_llir::{
    BlockId, Cfg, DataInit, Ipg, IpgNode, IpgNodeId, LlirModule, Operation, Tac, Type, VarId,
    VarTable,
};
use rheo_rvsdg::{NodeId, NodeKind, Origin, RegionId, Rvsdg, RvsdgModule};

use crate::error::ConstructError;

/// Lowers an RVSDG module into a fresh LLIR module.
pub fn destruct_rvsdg(rm: &RvsdgModule) -> Result<LlirModule, ConstructError> {
    let graph = &rm.graph;
    let mut module = LlirModule::new(rm.source_filename.clone());
    module.target_triple = rm.target_triple.clone();
    module.data_layout = rm.data_layout.clone();

    // Root-region origins that name module-level values.
    let mut origin_nodes: HashMap<Origin, IpgNodeId> = HashMap::new();

    let root = graph.root();
    for (index, argument) in graph.region(root).arguments.iter().enumerate() {
        let name = graph
            .import_name(index as u32)
            .map(str::to_string)
            .unwrap_or_else(|| format!("import{}", index));
        let node = match &argument.ty {
            Type::Pointer(pointee) => match (**pointee).clone() {
                fn_type @ Type::Function { .. } => IpgNode::Function {
                    name,
                    fn_type,
                    linkage: rheo_llir::Linkage::External,
                    cfg: None,
                },
                value_type => IpgNode::Data {
                    name,
                    value_type,
                    linkage: rheo_llir::Linkage::External,
                    constant: false,
                    init: None,
                },
            },
            _ => return Err(ConstructError::UnsupportedDestruct { what: "non-pointer import" }),
        };
        let id = module.ipg.add_node(node)?;
        origin_nodes.insert(
            Origin::Argument { region: root, index: index as u32 },
            id,
        );
    }

    for node in graph.region_nodes(root) {
        match graph.node(node).kind.clone() {
            NodeKind::Lambda { name, fn_type, linkage } => {
                let id = module.ipg.add_node(IpgNode::Function {
                    name,
                    fn_type,
                    linkage,
                    cfg: None,
                })?;
                origin_nodes.insert(graph.output_origin(node, 0), id);

                let (cfg, deps) = lower_lambda(graph, node, &origin_nodes, &module.ipg)?;
                install_cfg(&mut module.ipg, id, cfg);
                for dep in deps {
                    module.ipg.add_dependency(id, dep);
                }
            }

            NodeKind::Delta { name, linkage, constant } => {
                let value_type = match &graph.node(node).outputs[0].ty {
                    Type::Pointer(pointee) => (**pointee).clone(),
                    _ => unreachable!("delta output is always a pointer"),
                };
                let (init, deps) = lower_delta(graph, node, &origin_nodes, &module.ipg)?;
                let id = module.ipg.add_node(IpgNode::Data {
                    name,
                    value_type,
                    linkage,
                    constant,
                    init: Some(init),
                })?;
                origin_nodes.insert(graph.output_origin(node, 0), id);
                for dep in deps {
                    module.ipg.add_dependency(id, dep);
                }
            }

            NodeKind::Phi { nrecvars } => {
                lower_phi(graph, node, nrecvars as usize, &mut origin_nodes, &mut module)?;
            }

            _ => return Err(ConstructError::UnsupportedDestruct { what: "top-level node" }),
        }
    }

    Ok(module)
}

fn install_cfg(ipg: &mut Ipg, id: IpgNodeId, new_cfg: Cfg) {
    match ipg.get_mut(id) {
        IpgNode::Function { cfg, .. } => *cfg = Some(new_cfg),
        _ => unreachable!("lambdas lower to function nodes"),
    }
}

fn lower_phi(
    graph: &Rvsdg,
    phi: NodeId,
    nrecvars: usize,
    origin_nodes: &mut HashMap<Origin, IpgNodeId>,
    module: &mut LlirModule,
) -> Result<(), ConstructError> {
    let sub = graph.phi_subregion(phi);

    // Declare every member first so mutual references resolve.
    let mut members = Vec::with_capacity(nrecvars);
    for rv in 0..nrecvars {
        let origin = graph.region(sub).results[rv].origin;
        let lambda = match origin {
            Origin::Output { node, index: 0 }
                if matches!(graph.node(node).kind, NodeKind::Lambda { .. }) =>
            {
                node
            }
            _ => {
                return Err(ConstructError::UnsupportedDestruct {
                    what: "phi recursion variable not bound to a lambda",
                })
            }
        };
        let (name, fn_type, linkage) = match graph.node(lambda).kind.clone() {
            NodeKind::Lambda { name, fn_type, linkage } => (name, fn_type, linkage),
            _ => unreachable!(),
        };
        let id = module.ipg.add_node(IpgNode::Function { name, fn_type, linkage, cfg: None })?;
        origin_nodes.insert(Origin::Argument { region: sub, index: rv as u32 }, id);
        origin_nodes.insert(graph.output_origin(phi, rv as u32), id);
        members.push((lambda, id));
    }

    // Context variables resolve to values already lowered outside.
    for (cv, input) in graph.node(phi).inputs.iter().enumerate() {
        let dep = *origin_nodes
            .get(&input.origin)
            .ok_or(ConstructError::UnsupportedDestruct { what: "phi context variable" })?;
        origin_nodes.insert(
            Origin::Argument { region: sub, index: (nrecvars + cv) as u32 },
            dep,
        );
    }

    for (lambda, id) in members {
        let (cfg, deps) = lower_lambda(graph, lambda, origin_nodes, &module.ipg)?;
        install_cfg(&mut module.ipg, id, cfg);
        for dep in deps {
            module.ipg.add_dependency(id, dep);
        }
    }
    Ok(())
}

fn lower_lambda(
    graph: &Rvsdg,
    lambda: NodeId,
    origin_nodes: &HashMap<Origin, IpgNodeId>,
    ipg: &Ipg,
) -> Result<(Cfg, Vec<IpgNodeId>), ConstructError> {
    let sub = graph.lambda_subregion(lambda);
    let nformals = graph.lambda_nformals(lambda);

    let mut cfg = Cfg::new();
    let mut vmap: HashMap<Origin, VarId> = HashMap::new();
    let mut deps = Vec::new();

    for n in 0..nformals {
        let ty = graph.region(sub).arguments[n].ty.clone();
        let var = cfg.vars.create(format!("a{}", n), ty);
        cfg.entry_attr_mut().arguments.push(var);
        vmap.insert(Origin::Argument { region: sub, index: n as u32 }, var);
    }

    for (cv, input) in graph.node(lambda).inputs.iter().enumerate() {
        let dep = *origin_nodes
            .get(&input.origin)
            .ok_or(ConstructError::UnsupportedDestruct { what: "lambda context variable" })?;
        let name = ipg.get(dep).name().to_string();
        let var = cfg.vars.create_global(name, input.ty.clone(), dep);
        vmap.insert(graph.lambda_ctxvar_argument(lambda, cv), var);
        deps.push(dep);
    }

    let first = cfg.add_block();
    let e = cfg.outedge(cfg.entry(), 0);
    cfg.divert(e, first);

    let last = lower_region(graph, sub, &mut cfg, first, &mut vmap)?;

    let mut results = Vec::new();
    for result in &graph.region(sub).results {
        results.push(
            vmap.get(&result.origin)
                .copied()
                .ok_or(ConstructError::UnsupportedDestruct { what: "region result" })?,
        );
    }
    cfg.exit_attr_mut().results = results;
    cfg.add_outedge(last, cfg.exit());

    cfg.straighten();
    cfg.prune();
    Ok((cfg, deps))
}

fn lower_delta(
    graph: &Rvsdg,
    delta: NodeId,
    origin_nodes: &HashMap<Origin, IpgNodeId>,
    ipg: &Ipg,
) -> Result<(DataInit, Vec<IpgNodeId>), ConstructError> {
    let sub = graph.delta_subregion(delta);
    let mut vars = VarTable::new();
    let mut tacs = Vec::new();
    let mut vmap: HashMap<Origin, VarId> = HashMap::new();
    let mut deps = Vec::new();

    for (cv, input) in graph.node(delta).inputs.iter().enumerate() {
        let dep = *origin_nodes
            .get(&input.origin)
            .ok_or(ConstructError::UnsupportedDestruct { what: "delta context variable" })?;
        let name = ipg.get(dep).name().to_string();
        let var = vars.create_global(name, input.ty.clone(), dep);
        vmap.insert(Origin::Argument { region: sub, index: cv as u32 }, var);
        deps.push(dep);
    }

    for node in graph.region_nodes(sub) {
        let op = match &graph.node(node).kind {
            NodeKind::Simple(op) => op.clone(),
            _ => {
                return Err(ConstructError::UnsupportedDestruct {
                    what: "structural node in an initialiser",
                })
            }
        };
        let mut inputs = Vec::new();
        for input in &graph.node(node).inputs {
            inputs.push(
                vmap.get(&input.origin)
                    .copied()
                    .ok_or(ConstructError::UnsupportedDestruct { what: "initialiser operand" })?,
            );
        }
        let mut outputs = Vec::new();
        for (n, output) in graph.node(node).outputs.iter().enumerate() {
            let var = vars.create("t", output.ty.clone());
            vmap.insert(Origin::Output { node, index: n as u32 }, var);
            outputs.push(var);
        }
        tacs.push(Tac::new(op, inputs, outputs));
    }

    let value_origin = graph.region(sub).results[0].origin;
    let value = vmap
        .get(&value_origin)
        .copied()
        .ok_or(ConstructError::UnsupportedDestruct { what: "initialiser value" })?;
    Ok((DataInit { vars, tacs, value }, deps))
}

/// Lowers a region's nodes into `cfg`, starting in block `current`;
/// returns the block control ends in.
fn lower_region(
    graph: &Rvsdg,
    region: RegionId,
    cfg: &mut Cfg,
    mut current: BlockId,
    vmap: &mut HashMap<Origin, VarId>,
) -> Result<BlockId, ConstructError> {
    for node in graph.region_nodes(region) {
        match graph.node(node).kind.clone() {
            NodeKind::Simple(op) => {
                let mut inputs = Vec::new();
                for input in &graph.node(node).inputs {
                    inputs.push(
                        vmap.get(&input.origin)
                            .copied()
                            .ok_or(ConstructError::UnsupportedDestruct { what: "operand" })?,
                    );
                }
                let mut outputs = Vec::new();
                for (n, output) in graph.node(node).outputs.iter().enumerate() {
                    let var = cfg.vars.create("t", output.ty.clone());
                    vmap.insert(Origin::Output { node, index: n as u32 }, var);
                    outputs.push(var);
                }
                cfg.append_tac(current, Tac::new(op, inputs, outputs));
            }

            NodeKind::Gamma => {
                current = lower_gamma(graph, node, cfg, current, vmap)?;
            }

            NodeKind::Theta { .. } => {
                current = lower_theta(graph, node, cfg, current, vmap)?;
            }

            _ => {
                return Err(ConstructError::UnsupportedDestruct {
                    what: "nested binding node",
                })
            }
        }
    }
    Ok(current)
}

fn lower_gamma(
    graph: &Rvsdg,
    gamma: NodeId,
    cfg: &mut Cfg,
    current: BlockId,
    vmap: &mut HashMap<Origin, VarId>,
) -> Result<BlockId, ConstructError> {
    let nalternatives = graph.gamma_nalternatives(gamma);
    let predicate = graph.gamma_predicate(gamma);
    let ctl = *vmap
        .get(&predicate)
        .ok_or(ConstructError::UnsupportedDestruct { what: "gamma predicate" })?;

    // One carrier variable per exit-var, assigned at the end of each case.
    let carriers: Vec<VarId> = graph
        .node(gamma)
        .outputs
        .iter()
        .map(|out| cfg.vars.create("g", out.ty.clone()))
        .collect();

    cfg.append_tac(
        current,
        Tac::new(Operation::Branch { nalternatives: nalternatives as u64 }, [ctl], []),
    );

    let join = cfg.add_block();
    for alt in 0..nalternatives {
        let sub = graph.gamma_subregion(gamma, alt);
        let first = cfg.add_block();
        cfg.add_outedge(current, first);

        for ev in 0..graph.gamma_nentryvars(gamma) {
            let outer = graph.gamma_entryvar_origin(gamma, ev);
            let var = *vmap
                .get(&outer)
                .ok_or(ConstructError::UnsupportedDestruct { what: "gamma entry-var" })?;
            vmap.insert(graph.gamma_entryvar_argument(gamma, ev, alt), var);
        }

        let last = lower_region(graph, sub, cfg, first, vmap)?;
        for (xv, result) in graph.region(sub).results.iter().enumerate() {
            let value = *vmap
                .get(&result.origin)
                .ok_or(ConstructError::UnsupportedDestruct { what: "gamma exit-var" })?;
            cfg.append_tac(
                last,
                Tac::new(
                    Operation::Assign { ty: result.ty.clone() },
                    [carriers[xv], value],
                    [],
                ),
            );
        }
        cfg.add_outedge(last, join);
    }

    for (xv, carrier) in carriers.iter().enumerate() {
        vmap.insert(graph.output_origin(gamma, xv as u32), *carrier);
    }
    Ok(join)
}

fn lower_theta(
    graph: &Rvsdg,
    theta: NodeId,
    cfg: &mut Cfg,
    current: BlockId,
    vmap: &mut HashMap<Origin, VarId>,
) -> Result<BlockId, ConstructError> {
    let sub = graph.theta_subregion(theta);
    let nloopvars = graph.theta_nloopvars(theta);

    // Carrier per loop-var: seeded before the loop, updated by the body.
    let mut carriers = Vec::with_capacity(nloopvars);
    for lv in 0..nloopvars {
        let ty = graph.region(sub).arguments[lv].ty.clone();
        let carrier = cfg.vars.create("l", ty.clone());
        let input = graph.theta_input_origin(theta, lv);
        let value = *vmap
            .get(&input)
            .ok_or(ConstructError::UnsupportedDestruct { what: "theta input" })?;
        cfg.append_tac(
            current,
            Tac::new(Operation::Assign { ty }, [carrier, value], []),
        );
        vmap.insert(graph.theta_argument(theta, lv), carrier);
        carriers.push(carrier);
    }

    let body_first = cfg.add_block();
    cfg.add_outedge(current, body_first);

    let body_last = lower_region(graph, sub, cfg, body_first, vmap)?;

    for (lv, carrier) in carriers.iter().enumerate() {
        let result = graph.theta_result_origin(theta, lv);
        let value = *vmap
            .get(&result)
            .ok_or(ConstructError::UnsupportedDestruct { what: "theta result" })?;
        let ty = graph.region(sub).arguments[lv].ty.clone();
        cfg.append_tac(
            body_last,
            Tac::new(Operation::Assign { ty }, [*carrier, value], []),
        );
    }

    let predicate = graph
        .theta_predicate(theta)
        .ok_or(ConstructError::UnsupportedDestruct { what: "theta without predicate" })?;
    let ctl = *vmap
        .get(&predicate)
        .ok_or(ConstructError::UnsupportedDestruct { what: "theta predicate" })?;
    cfg.append_tac(body_last, Tac::new(Operation::Branch { nalternatives: 2 }, [ctl], []));

    // Alternative 0 leaves the loop, alternative 1 repeats.
    let continuation = cfg.add_block();
    cfg.add_outedge(body_last, continuation);
    cfg.add_outedge(body_last, body_first);

    for (lv, carrier) in carriers.iter().enumerate() {
        vmap.insert(graph.output_origin(theta, lv as u32), *carrier);
    }
    Ok(continuation)
}
