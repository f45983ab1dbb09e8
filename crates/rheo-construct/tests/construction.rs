//! End-to-end construction scenarios: LLIR modules through the full
//! restructure / aggregate / annotate / build pipeline, plus the
//! round-trip back to LLIR.

use rheo_construct::{build_rvsdg, destruct_rvsdg};
use rheo_llir::{
    BlockId, Cfg, ICmpOp, IpgNode, Linkage, LlirModule, Operation, Tac, Type, VarId,
};
use rheo_rvsdg::{NodeId, NodeKind, RegionId, Rvsdg};

fn attach(cfg: &mut Cfg, first: BlockId) {
    let e = cfg.outedge(cfg.entry(), 0);
    cfg.divert(e, first);
}

fn match_on(cfg: &mut Cfg, block: BlockId, v: VarId, mapping: Vec<(u64, u64)>, default: u64) {
    let nbits = match cfg.vars.ty(v) {
        Type::Bits(n) => *n,
        other => panic!("match on non-bits type {}", other),
    };
    let nalternatives = 2;
    let ctl = cfg.vars.create("ctl", Type::Control(nalternatives));
    cfg.append_tac(
        block,
        Tac::new(
            Operation::Match {
                nbits,
                mapping,
                default_alternative: default,
                nalternatives,
            },
            [v],
            [ctl],
        ),
    );
    cfg.append_tac(block, Tac::new(Operation::Branch { nalternatives }, [ctl], []));
}

fn simple_fn_type(arguments: Vec<Type>, results: Vec<Type>) -> Type {
    Type::Function { arguments, results, variadic: false }
}

/// Collects node ids of a region matching a predicate, non-recursively.
fn find_nodes(graph: &Rvsdg, region: RegionId, pred: impl Fn(&NodeKind) -> bool) -> Vec<NodeId> {
    graph
        .region_nodes(region)
        .into_iter()
        .filter(|n| pred(&graph.node(*n).kind))
        .collect()
}

fn count_simple_ops(graph: &Rvsdg, region: RegionId, pred: &dyn Fn(&Operation) -> bool) -> usize {
    let mut count = 0;
    for node in graph.region_nodes(region) {
        match &graph.node(node).kind {
            NodeKind::Simple(op) => {
                if pred(op) {
                    count += 1;
                }
            }
            _ => {
                for sub in graph.node(node).subregions.clone() {
                    count += count_simple_ops(graph, sub, pred);
                }
            }
        }
    }
    count
}

/// `if (c) r = a else r = b; ret r` -- expected: one gamma with two
/// alternatives and a single exit-var.
fn branch_module() -> LlirModule {
    let mut cfg = Cfg::new();
    let c = cfg.vars.create("c", Type::Bits(1));
    let a = cfg.vars.create("a", Type::Bits(32));
    let b = cfg.vars.create("b", Type::Bits(32));
    let r = cfg.vars.create("r", Type::Bits(32));
    cfg.entry_attr_mut().arguments.extend([c, a, b]);
    cfg.exit_attr_mut().results.push(r);

    let split = cfg.add_block();
    match_on(&mut cfg, split, c, vec![(0, 0)], 1);
    let then_block = cfg.add_block();
    cfg.append_tac(then_block, Tac::new(Operation::Assign { ty: Type::Bits(32) }, [r, a], []));
    let else_block = cfg.add_block();
    cfg.append_tac(else_block, Tac::new(Operation::Assign { ty: Type::Bits(32) }, [r, b], []));
    let join = cfg.add_block();

    attach(&mut cfg, split);
    cfg.add_outedge(split, then_block);
    cfg.add_outedge(split, else_block);
    cfg.add_outedge(then_block, join);
    cfg.add_outedge(else_block, join);
    cfg.add_outedge(join, cfg.exit());

    let mut module = LlirModule::new("branch.ll");
    module
        .ipg
        .add_node(IpgNode::Function {
            name: "select_value".into(),
            fn_type: simple_fn_type(
                vec![Type::Bits(1), Type::Bits(32), Type::Bits(32)],
                vec![Type::Bits(32)],
            ),
            linkage: Linkage::External,
            cfg: Some(cfg),
        })
        .unwrap();
    module
}

#[test]
fn simple_branch_becomes_a_gamma() {
    let module = branch_module();
    let rm = build_rvsdg(&module).unwrap();
    let graph = &rm.graph;

    let lambdas = find_nodes(graph, graph.root(), |k| matches!(k, NodeKind::Lambda { .. }));
    assert_eq!(lambdas.len(), 1);
    let body = graph.lambda_subregion(lambdas[0]);

    let gammas = find_nodes(graph, body, |k| matches!(k, NodeKind::Gamma));
    assert_eq!(gammas.len(), 1);
    let gamma = gammas[0];
    assert_eq!(graph.gamma_nalternatives(gamma), 2);
    // One exit-var: r.
    assert_eq!(graph.node(gamma).outputs.len(), 1);

    // The predicate originates from a match against {0}.
    match graph.gamma_predicate(gamma) {
        rheo_rvsdg::Origin::Output { node, .. } => match &graph.node(node).kind {
            NodeKind::Simple(Operation::Match { mapping, .. }) => {
                assert_eq!(mapping.as_slice(), &[(0, 0)]);
            }
            other => panic!("expected a match predicate, got {:?}", other.label()),
        },
        other => panic!("expected a node output predicate, got {:?}", other),
    }

    // No loops anywhere.
    assert_eq!(find_nodes(graph, body, |k| matches!(k, NodeKind::Theta { .. })).len(), 0);
    graph.verify().unwrap();
}

/// `%p = alloca; store 42; %v = load; ret %v` -- stays theta- and
/// gamma-free.
fn straightline_memory_module() -> LlirModule {
    let mut cfg = Cfg::new();
    let v = cfg.vars.create("v", Type::Bits(32));
    cfg.exit_attr_mut().results.push(v);

    let bb = cfg.add_block();
    let p = cfg.vars.create("p", Type::pointer(Type::Bits(32)));
    let s = cfg.vars.create("s", Type::Memory);
    let forty_two = cfg.vars.create("c42", Type::Bits(32));
    cfg.append_tac(
        bb,
        Tac::new(Operation::Alloca { allocated: Type::Bits(32), alignment: 4 }, [], [p, s]),
    );
    cfg.append_tac(bb, Tac::new(Operation::IntConst { nbits: 32, value: 42 }, [], [forty_two]));
    cfg.append_tac(
        bb,
        Tac::new(
            Operation::Store { pointee: Type::Bits(32), nstates: 1, alignment: 4 },
            [p, forty_two, s],
            [s],
        ),
    );
    cfg.append_tac(
        bb,
        Tac::new(
            Operation::Load { pointee: Type::Bits(32), nstates: 1, alignment: 4 },
            [p, s],
            [v],
        ),
    );
    attach(&mut cfg, bb);
    cfg.add_outedge(bb, cfg.exit());

    let mut module = LlirModule::new("memory.ll");
    module
        .ipg
        .add_node(IpgNode::Function {
            name: "store_load".into(),
            fn_type: simple_fn_type(vec![], vec![Type::Bits(32)]),
            linkage: Linkage::External,
            cfg: Some(cfg),
        })
        .unwrap();
    module
}

#[test]
fn straightline_memory_stays_structureless() {
    let module = straightline_memory_module();
    let rm = build_rvsdg(&module).unwrap();
    let graph = &rm.graph;

    let lambdas = find_nodes(graph, graph.root(), |k| matches!(k, NodeKind::Lambda { .. }));
    let body = graph.lambda_subregion(lambdas[0]);

    assert!(find_nodes(graph, body, |k| matches!(k, NodeKind::Gamma)).is_empty());
    assert!(find_nodes(graph, body, |k| matches!(k, NodeKind::Theta { .. })).is_empty());
    assert_eq!(
        count_simple_ops(graph, body, &|op| matches!(op, Operation::Alloca { .. })),
        1
    );
    assert_eq!(
        count_simple_ops(graph, body, &|op| matches!(op, Operation::Store { .. })),
        1
    );
    assert_eq!(
        count_simple_ops(graph, body, &|op| matches!(op, Operation::Load { .. })),
        1
    );
    graph.verify().unwrap();
}

/// `for (i = 0; i < 10; ++i) s += a[i]` as a single self-looping block.
fn counted_loop_module() -> LlirModule {
    let array = Type::Array { element: Box::new(Type::Bits(32)), length: 10 };

    let mut cfg = Cfg::new();
    let a = cfg.vars.create("a", Type::pointer(array.clone()));
    let mem = cfg.vars.create("mem", Type::Memory);
    let s = cfg.vars.create("s", Type::Bits(32));
    let i = cfg.vars.create("i", Type::Bits(32));
    cfg.entry_attr_mut().arguments.extend([a, mem]);
    cfg.exit_attr_mut().results.extend([s, mem]);

    let init = cfg.add_block();
    cfg.append_tac(init, Tac::new(Operation::IntConst { nbits: 32, value: 0 }, [], [i]));
    cfg.append_tac(init, Tac::new(Operation::IntConst { nbits: 32, value: 0 }, [], [s]));

    let body = cfg.add_block();
    let addr = cfg.vars.create("addr", Type::pointer(Type::Bits(32)));
    cfg.append_tac(
        body,
        Tac::new(
            Operation::GetElementPtr {
                pointee: array,
                offsets: vec![32],
                result_pointee: Type::Bits(32),
            },
            [a, i],
            [addr],
        ),
    );
    let v = cfg.vars.create("v", Type::Bits(32));
    cfg.append_tac(
        body,
        Tac::new(
            Operation::Load { pointee: Type::Bits(32), nstates: 1, alignment: 4 },
            [addr, mem],
            [v],
        ),
    );
    cfg.append_tac(
        body,
        Tac::new(Operation::Binary { op: rheo_llir::BinOp::Add, nbits: 32 }, [s, v], [s]),
    );
    let one = cfg.vars.create("one", Type::Bits(32));
    cfg.append_tac(body, Tac::new(Operation::IntConst { nbits: 32, value: 1 }, [], [one]));
    cfg.append_tac(
        body,
        Tac::new(Operation::Binary { op: rheo_llir::BinOp::Add, nbits: 32 }, [i, one], [i]),
    );
    let ten = cfg.vars.create("ten", Type::Bits(32));
    cfg.append_tac(body, Tac::new(Operation::IntConst { nbits: 32, value: 10 }, [], [ten]));
    let cmp = cfg.vars.create("cmp", Type::Bits(1));
    cfg.append_tac(
        body,
        Tac::new(Operation::ICmp { op: ICmpOp::Slt, nbits: 32 }, [i, ten], [cmp]),
    );
    // i < 10 repeats: value 1 selects alternative 1, the self-loop.
    match_on(&mut cfg, body, cmp, vec![(1, 1)], 0);

    attach(&mut cfg, init);
    cfg.add_outedge(init, body);
    cfg.add_outedge(body, cfg.exit());
    cfg.add_outedge(body, body);

    let mut module = LlirModule::new("loop.ll");
    module
        .ipg
        .add_node(IpgNode::Function {
            name: "sum_array".into(),
            fn_type: simple_fn_type(
                vec![Type::pointer(Type::Array { element: Box::new(Type::Bits(32)), length: 10 }), Type::Memory],
                vec![Type::Bits(32), Type::Memory],
            ),
            linkage: Linkage::External,
            cfg: Some(cfg),
        })
        .unwrap();
    module
}

#[test]
fn counted_loop_becomes_a_theta() {
    let module = counted_loop_module();
    let rm = build_rvsdg(&module).unwrap();
    let graph = &rm.graph;

    let lambdas = find_nodes(graph, graph.root(), |k| matches!(k, NodeKind::Lambda { .. }));
    let body = graph.lambda_subregion(lambdas[0]);
    let thetas = find_nodes(graph, body, |k| matches!(k, NodeKind::Theta { .. }));
    assert_eq!(thetas.len(), 1);

    let theta = thetas[0];
    // Loop-vars: a, mem, s, i -- everything live around the back edge.
    assert_eq!(graph.theta_nloopvars(theta), 4);
    let loopvar_types: Vec<Type> = graph
        .node(theta)
        .inputs
        .iter()
        .map(|input| input.ty.clone())
        .collect();
    assert!(loopvar_types.contains(&Type::Bits(32)));
    assert!(loopvar_types.contains(&Type::Memory));

    graph.theta_predicate(theta).expect("theta has a predicate");
    graph.verify().unwrap();
}

/// Irreducible control flow: two mutually branching blocks, each with a
/// store. One q, one r, one dispatcher; the result is a theta whose body
/// contains a gamma.
fn irreducible_module() -> LlirModule {
    let mut cfg = Cfg::new();
    let c1 = cfg.vars.create("c1", Type::Bits(1));
    let c2 = cfg.vars.create("c2", Type::Bits(1));
    let p = cfg.vars.create("p", Type::pointer(Type::Bits(32)));
    let x = cfg.vars.create("x", Type::Bits(32));
    let mem = cfg.vars.create("mem", Type::Memory);
    cfg.entry_attr_mut().arguments.extend([c1, c2, p, x, mem]);
    cfg.exit_attr_mut().results.push(mem);

    let h = cfg.add_block();
    match_on(&mut cfg, h, c1, vec![(0, 0)], 1);

    let a = cfg.add_block();
    cfg.append_tac(
        a,
        Tac::new(
            Operation::Store { pointee: Type::Bits(32), nstates: 1, alignment: 4 },
            [p, x, mem],
            [mem],
        ),
    );
    match_on(&mut cfg, a, c2, vec![(0, 0)], 1);

    let b = cfg.add_block();
    cfg.append_tac(
        b,
        Tac::new(
            Operation::Store { pointee: Type::Bits(32), nstates: 1, alignment: 4 },
            [p, x, mem],
            [mem],
        ),
    );

    attach(&mut cfg, h);
    cfg.add_outedge(h, a);
    cfg.add_outedge(h, b);
    cfg.add_outedge(a, b);
    cfg.add_outedge(a, cfg.exit());
    cfg.add_outedge(b, a);

    let mut module = LlirModule::new("irreducible.ll");
    module
        .ipg
        .add_node(IpgNode::Function {
            name: "weave".into(),
            fn_type: simple_fn_type(
                vec![
                    Type::Bits(1),
                    Type::Bits(1),
                    Type::pointer(Type::Bits(32)),
                    Type::Bits(32),
                    Type::Memory,
                ],
                vec![Type::Memory],
            ),
            linkage: Linkage::External,
            cfg: Some(cfg),
        })
        .unwrap();
    module
}

#[test]
fn irreducible_loop_becomes_theta_over_gamma() {
    let module = irreducible_module();
    let rm = build_rvsdg(&module).unwrap();
    let graph = &rm.graph;

    let lambdas = find_nodes(graph, graph.root(), |k| matches!(k, NodeKind::Lambda { .. }));
    let body = graph.lambda_subregion(lambdas[0]);

    let thetas = find_nodes(graph, body, |k| matches!(k, NodeKind::Theta { .. }));
    assert_eq!(thetas.len(), 1);

    let loop_body = graph.theta_subregion(thetas[0]);
    let gammas = find_nodes(graph, loop_body, |k| matches!(k, NodeKind::Gamma));
    assert!(!gammas.is_empty(), "restructured loop body dispatches through a gamma");

    // Both stores survived translation.
    assert_eq!(
        count_simple_ops(graph, body, &|op| matches!(op, Operation::Store { .. })),
        2
    );
    graph.verify().unwrap();
}

/// `for (i = 0; i < n; ++i) io = emit(i, io)` -- an I/O-ordering state
/// threads the loop exactly like a memory state: in through the entry,
/// around the theta as a loop-var, out through the exit.
fn io_loop_module() -> LlirModule {
    let emit_type = simple_fn_type(
        vec![Type::Bits(32), Type::LoopState],
        vec![Type::LoopState],
    );

    let mut module = LlirModule::new("io.ll");
    let emit = module
        .ipg
        .add_node(IpgNode::Function {
            name: "emit".into(),
            fn_type: emit_type.clone(),
            linkage: Linkage::External,
            cfg: None,
        })
        .unwrap();

    let mut cfg = Cfg::new();
    let n = cfg.vars.create("n", Type::Bits(32));
    let io = cfg.vars.create("io", Type::LoopState);
    let i = cfg.vars.create("i", Type::Bits(32));
    let f = cfg.vars.create_global("emit", Type::pointer(emit_type.clone()), emit);
    cfg.entry_attr_mut().arguments.extend([n, io]);
    cfg.exit_attr_mut().results.push(io);

    let init = cfg.add_block();
    cfg.append_tac(init, Tac::new(Operation::IntConst { nbits: 32, value: 0 }, [], [i]));

    let body = cfg.add_block();
    cfg.append_tac(
        body,
        Tac::new(Operation::Call { fn_type: emit_type.clone() }, [f, i, io], [io]),
    );
    let one = cfg.vars.create("one", Type::Bits(32));
    cfg.append_tac(body, Tac::new(Operation::IntConst { nbits: 32, value: 1 }, [], [one]));
    cfg.append_tac(
        body,
        Tac::new(Operation::Binary { op: rheo_llir::BinOp::Add, nbits: 32 }, [i, one], [i]),
    );
    let cmp = cfg.vars.create("cmp", Type::Bits(1));
    cfg.append_tac(
        body,
        Tac::new(Operation::ICmp { op: ICmpOp::Slt, nbits: 32 }, [i, n], [cmp]),
    );
    match_on(&mut cfg, body, cmp, vec![(1, 1)], 0);

    attach(&mut cfg, init);
    cfg.add_outedge(init, body);
    cfg.add_outedge(body, cfg.exit());
    cfg.add_outedge(body, body);

    let pump = module
        .ipg
        .add_node(IpgNode::Function {
            name: "pump".into(),
            fn_type: simple_fn_type(
                vec![Type::Bits(32), Type::LoopState],
                vec![Type::LoopState],
            ),
            linkage: Linkage::External,
            cfg: Some(cfg),
        })
        .unwrap();
    module.ipg.add_dependency(pump, emit);
    module
}

#[test]
fn loop_state_threads_a_theta() {
    let module = io_loop_module();
    let rm = build_rvsdg(&module).unwrap();
    let graph = &rm.graph;

    let lambdas = find_nodes(graph, graph.root(), |k| matches!(k, NodeKind::Lambda { .. }));
    assert_eq!(lambdas.len(), 1);
    let lambda = lambdas[0];
    let body = graph.lambda_subregion(lambda);

    let thetas = find_nodes(graph, body, |k| matches!(k, NodeKind::Theta { .. }));
    assert_eq!(thetas.len(), 1);
    let theta = thetas[0];

    // The I/O state is carried as a loop-var, like a memory state would
    // be; f, i, and n ride along.
    let loopvar_types: Vec<Type> = graph
        .node(theta)
        .inputs
        .iter()
        .map(|input| input.ty.clone())
        .collect();
    assert!(loopvar_types.iter().any(|ty| ty.is_state()));
    assert!(loopvar_types.contains(&Type::LoopState));
    assert!(!loopvar_types.contains(&Type::Memory));

    // The call sits inside the loop body, and the callee arrives through
    // a context-var bound to the import.
    assert_eq!(
        count_simple_ops(graph, graph.theta_subregion(theta), &|op| {
            matches!(op, Operation::Call { .. })
        }),
        1
    );
    assert_eq!(graph.lambda_nctxvars(lambda), 1);

    // The lambda's result is the threaded state.
    let results = &graph.region(body).results;
    assert_eq!(results.len(), 1);
    assert!(results[0].ty.is_state());
    graph.verify().unwrap();
}

#[test]
fn globals_are_captured_as_context_vars() {
    // A function loading a global: the delta output flows in through a
    // lambda context-var.
    let mut module = LlirModule::new("globals.ll");

    let init_vars = rheo_llir::VarTable::new();
    let mut init = rheo_llir::DataInit {
        vars: init_vars,
        tacs: Vec::new(),
        value: VarId(0),
    };
    let cval = init.vars.create("cval", Type::Bits(32));
    init.tacs.push(Tac::new(Operation::IntConst { nbits: 32, value: 7 }, [], [cval]));
    init.value = cval;

    let global = module
        .ipg
        .add_node(IpgNode::Data {
            name: "seven".into(),
            value_type: Type::Bits(32),
            linkage: Linkage::Internal,
            constant: true,
            init: Some(init),
        })
        .unwrap();

    let mut cfg = Cfg::new();
    let mem = cfg.vars.create("mem", Type::Memory);
    let v = cfg.vars.create("v", Type::Bits(32));
    let g = cfg.vars.create_global("seven", Type::pointer(Type::Bits(32)), global);
    cfg.entry_attr_mut().arguments.push(mem);
    cfg.exit_attr_mut().results.extend([v, mem]);

    let bb = cfg.add_block();
    cfg.append_tac(
        bb,
        Tac::new(
            Operation::Load { pointee: Type::Bits(32), nstates: 1, alignment: 4 },
            [g, mem],
            [v],
        ),
    );
    attach(&mut cfg, bb);
    cfg.add_outedge(bb, cfg.exit());

    let reader = module
        .ipg
        .add_node(IpgNode::Function {
            name: "read_seven".into(),
            fn_type: simple_fn_type(vec![Type::Memory], vec![Type::Bits(32), Type::Memory]),
            linkage: Linkage::External,
            cfg: Some(cfg),
        })
        .unwrap();
    module.ipg.add_dependency(reader, global);

    let rm = build_rvsdg(&module).unwrap();
    let graph = &rm.graph;

    let deltas = find_nodes(graph, graph.root(), |k| matches!(k, NodeKind::Delta { .. }));
    assert_eq!(deltas.len(), 1);
    let lambdas = find_nodes(graph, graph.root(), |k| matches!(k, NodeKind::Lambda { .. }));
    assert_eq!(lambdas.len(), 1);

    // The lambda captures exactly the delta output.
    let lambda = lambdas[0];
    assert_eq!(graph.lambda_nctxvars(lambda), 1);
    assert_eq!(
        graph.node(lambda).inputs[0].origin,
        graph.output_origin(deltas[0], 0)
    );
    graph.verify().unwrap();
}

#[test]
fn mutual_recursion_builds_a_phi_group() {
    // odd/even-style mutual recursion through direct calls.
    let fn_type = simple_fn_type(vec![Type::Bits(32)], vec![Type::Bits(32)]);
    let mut module = LlirModule::new("recursion.ll");

    // Declare both nodes up front so the CFGs can reference them.
    let odd = module
        .ipg
        .add_node(IpgNode::Function {
            name: "odd".into(),
            fn_type: fn_type.clone(),
            linkage: Linkage::Internal,
            cfg: None,
        })
        .unwrap();
    let even = module
        .ipg
        .add_node(IpgNode::Function {
            name: "even".into(),
            fn_type: fn_type.clone(),
            linkage: Linkage::Internal,
            cfg: None,
        })
        .unwrap();

    let make_cfg = |callee: rheo_llir::IpgNodeId, callee_name: &str, fn_type: &Type| {
        let mut cfg = Cfg::new();
        let n = cfg.vars.create("n", Type::Bits(32));
        let r = cfg.vars.create("r", Type::Bits(32));
        let f = cfg.vars.create_global(callee_name, Type::pointer(fn_type.clone()), callee);
        cfg.entry_attr_mut().arguments.push(n);
        cfg.exit_attr_mut().results.push(r);
        let bb = cfg.add_block();
        cfg.append_tac(
            bb,
            Tac::new(Operation::Call { fn_type: fn_type.clone() }, [f, n], [r]),
        );
        attach(&mut cfg, bb);
        cfg.add_outedge(bb, cfg.exit());
        cfg
    };

    let odd_cfg = make_cfg(even, "even", &fn_type);
    let even_cfg = make_cfg(odd, "odd", &fn_type);
    match module.ipg.get_mut(odd) {
        IpgNode::Function { cfg, .. } => *cfg = Some(odd_cfg),
        _ => unreachable!(),
    }
    match module.ipg.get_mut(even) {
        IpgNode::Function { cfg, .. } => *cfg = Some(even_cfg),
        _ => unreachable!(),
    }
    module.ipg.add_dependency(odd, even);
    module.ipg.add_dependency(even, odd);

    let rm = build_rvsdg(&module).unwrap();
    let graph = &rm.graph;

    let phis = find_nodes(graph, graph.root(), |k| matches!(k, NodeKind::Phi { .. }));
    assert_eq!(phis.len(), 1);
    let phi = phis[0];
    assert_eq!(graph.phi_nrecvars(phi), 2);

    let inner = graph.phi_subregion(phi);
    let lambdas = find_nodes(graph, inner, |k| matches!(k, NodeKind::Lambda { .. }));
    assert_eq!(lambdas.len(), 2);
    graph.verify().unwrap();
}

#[test]
fn round_trip_preserves_memory_operations() {
    let module = straightline_memory_module();
    let rm = build_rvsdg(&module).unwrap();
    let lowered = destruct_rvsdg(&rm).unwrap();

    // The lowered module re-enters the pipeline cleanly.
    let rm2 = build_rvsdg(&lowered).unwrap();

    let count = |graph: &Rvsdg, pred: &dyn Fn(&Operation) -> bool| {
        count_simple_ops(graph, graph.root(), pred)
    };
    for pred in [
        (&|op: &Operation| matches!(op, Operation::Alloca { .. })) as &dyn Fn(&Operation) -> bool,
        &|op| matches!(op, Operation::Store { .. }),
        &|op| matches!(op, Operation::Load { .. }),
    ] {
        assert_eq!(count(&rm.graph, pred), count(&rm2.graph, pred));
    }
}

#[test]
fn round_trip_of_a_loop_is_still_a_loop() {
    let module = counted_loop_module();
    let rm = build_rvsdg(&module).unwrap();
    let lowered = destruct_rvsdg(&rm).unwrap();
    let rm2 = build_rvsdg(&lowered).unwrap();

    let graph = &rm2.graph;
    let lambdas = find_nodes(graph, graph.root(), |k| matches!(k, NodeKind::Lambda { .. }));
    assert_eq!(lambdas.len(), 1);
    let body = graph.lambda_subregion(lambdas[0]);
    let thetas = find_nodes(graph, body, |k| matches!(k, NodeKind::Theta { .. }));
    assert_eq!(thetas.len(), 1);

    // The loop body still loads once per iteration.
    assert_eq!(
        count_simple_ops(graph, graph.theta_subregion(thetas[0]), &|op| {
            matches!(op, Operation::Load { .. })
        }),
        1
    );
}
