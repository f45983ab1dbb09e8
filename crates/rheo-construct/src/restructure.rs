//! CFG restructuring: loops first, then branches.
//!
//! Turns any closed, valid CFG into a proper-structured one. Loop
//! restructuring finds strongly connected components between entry and
//! exit, rewires every SCC into a single-entry single-exit tail-controlled
//! loop (introducing the auxiliary variables `q` and `r` and a dispatcher
//! block where the SCC is not already in that shape), and *removes* the
//! repeat edges, recording them as back-edges. Branch restructuring then
//! works on an acyclic graph, funnelling branch subgraphs with multiple
//! continuation points through a dispatcher driven by an auxiliary `p`
//! variable. The recorded back-edges are re-inserted at their original
//! source indices at the very end, so every branch TAC keeps the edge
//! order its alternatives refer to.
//!
//! Restructuring never fails on a valid CFG; the proper-structure
//! postcondition is checked by a debug assertion.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::{IndexMap, IndexSet};
use rheo_llir::{BlockId, Cfg, EdgeId, Operation, Tac, Type};

use crate::error::ConstructError;

/// A loop repeat edge removed during restructuring, identified by its
/// source block and source-local edge index. The RVSDG builder consumes
/// these to decide which alternative of a loop tail repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackEdge {
    pub source: BlockId,
    pub sink: BlockId,
    pub index: u32,
}

/// Restructures `cfg` in place and returns the back-edge set.
pub fn restructure(cfg: &mut Cfg) -> Result<Vec<BackEdge>, ConstructError> {
    if !cfg.is_closed() {
        return Err(ConstructError::CfgNotClosed);
    }

    let mut back_edges = Vec::new();
    restructure_loops(cfg, cfg.entry(), cfg.exit(), &mut back_edges);
    tracing::debug!(nback_edges = back_edges.len(), "loops restructured");
    restructure_branches(cfg, cfg.entry(), cfg.exit());

    for be in &back_edges {
        cfg.insert_outedge_at(be.source, be.sink, be.index);
    }

    debug_assert!(cfg.is_proper_structured());
    Ok(back_edges)
}

fn ceil_log2(n: usize) -> u16 {
    debug_assert!(n > 0);
    (usize::BITS - (n - 1).leading_zeros()) as u16
}

/// `max(ceil(log2(n)), 1)` -- auxiliary variables always get at least one
/// bit.
fn aux_nbits(n: usize) -> u16 {
    ceil_log2(n).max(1)
}

// -- Tarjan's SCC algorithm, restricted to the entry-to-exit subgraph --

struct SccState {
    map: HashMap<BlockId, (usize, usize)>,
    stack: Vec<BlockId>,
    index: usize,
    sccs: Vec<IndexSet<BlockId>>,
}

fn strongconnect(cfg: &Cfg, node: BlockId, exit: BlockId, st: &mut SccState) {
    st.map.insert(node, (st.index, st.index));
    st.stack.push(node);
    st.index += 1;

    if node != exit {
        for successor in cfg.successors(node) {
            if !st.map.contains_key(&successor) {
                strongconnect(cfg, successor, exit, st);
                let low = st.map[&successor].1;
                let entry = st.map.get_mut(&node).unwrap();
                entry.1 = entry.1.min(low);
            } else if st.stack.contains(&successor) {
                let first = st.map[&successor].0;
                let entry = st.map.get_mut(&node).unwrap();
                entry.1 = entry.1.min(first);
            }
        }
    }

    let (first, low) = st.map[&node];
    if first == low {
        let mut scc = IndexSet::new();
        loop {
            let w = st.stack.pop().unwrap();
            scc.insert(w);
            if w == node {
                break;
            }
        }
        if scc.len() != 1 || cfg.has_selfloop_edge(node) {
            st.sccs.push(scc);
        }
    }
}

fn find_sccs(cfg: &Cfg, enter: BlockId, exit: BlockId) -> Vec<IndexSet<BlockId>> {
    let mut st = SccState {
        map: HashMap::new(),
        stack: Vec::new(),
        index: 0,
        sccs: Vec::new(),
    };
    strongconnect(cfg, enter, exit, &mut st);
    st.sccs
}

// -- loop restructuring --

struct SccShape {
    /// Edges entering the SCC.
    ae: Vec<EdgeId>,
    /// Entry targets, uniquely indexed in discovery order.
    ve: IndexMap<BlockId, u64>,
    /// Edges leaving the SCC.
    ax: Vec<EdgeId>,
    /// Exit targets, uniquely indexed.
    vx: IndexMap<BlockId, u64>,
    /// Intra-SCC edges whose target is an entry target.
    ar: Vec<EdgeId>,
}

fn find_entries_and_exits(cfg: &Cfg, scc: &IndexSet<BlockId>) -> SccShape {
    let mut shape = SccShape {
        ae: Vec::new(),
        ve: IndexMap::new(),
        ax: Vec::new(),
        vx: IndexMap::new(),
        ar: Vec::new(),
    };

    for &node in scc {
        for edge in cfg.inedges(node) {
            if !scc.contains(&cfg.edge_source(edge)) {
                shape.ae.push(edge);
                let next = shape.ve.len() as u64;
                shape.ve.entry(node).or_insert(next);
            }
        }
        for edge in cfg.outedges(node) {
            let sink = cfg.edge_sink(edge);
            if !scc.contains(&sink) {
                shape.ax.push(edge);
                let next = shape.vx.len() as u64;
                shape.vx.entry(sink).or_insert(next);
            }
        }
    }

    for &node in scc {
        for edge in cfg.outedges(node) {
            if shape.ve.contains_key(&cfg.edge_sink(edge)) {
                shape.ar.push(edge);
            }
        }
    }

    shape
}

/// Appends `match(v) ; branch` to `block`, returning nothing; the match
/// maps value `k` to alternative `k` for `k < nalternatives - 1` and
/// everything else to the last alternative.
fn append_dispatch(cfg: &mut Cfg, block: BlockId, nbits: u16, v: rheo_llir::VarId, nalternatives: u64) {
    let mapping = (0..nalternatives - 1).map(|n| (n, n)).collect();
    let c = cfg.vars.create("#c#", Type::Control(nalternatives));
    cfg.append_tac(
        block,
        Tac::new(
            Operation::Match {
                nbits,
                mapping,
                default_alternative: nalternatives - 1,
                nalternatives,
            },
            [v],
            [c],
        ),
    );
    cfg.append_tac(block, Tac::new(Operation::Branch { nalternatives }, [c], []));
}

fn restructure_loops(
    cfg: &mut Cfg,
    entry: BlockId,
    exit: BlockId,
    back_edges: &mut Vec<BackEdge>,
) {
    let sccs = find_sccs(cfg, entry, exit);

    for scc in sccs {
        let shape = find_entries_and_exits(cfg, &scc);

        // The loop already has the required structure; just break the
        // repeat edge. The 2-out-edge restriction keeps the tail's branch
        // TAC consistent with the final edge order.
        if shape.ae.len() == 1
            && shape.ar.len() == 1
            && shape.ax.len() == 1
            && cfg.edge_source(shape.ar[0]) == cfg.edge_source(shape.ax[0])
            && cfg.noutedges(cfg.edge_source(shape.ar[0])) == 2
        {
            let repeat = shape.ar[0];
            let source = cfg.edge_source(repeat);
            let index = cfg.edge_index(repeat);
            back_edges.push(BackEdge { source, sink: cfg.edge_sink(repeat), index });
            let body_entry = cfg.edge_sink(shape.ae[0]);
            let body_exit = cfg.edge_source(shape.ax[0]);
            cfg.remove_outedge(source, index);
            restructure_loops(cfg, body_entry, body_exit, back_edges);
            continue;
        }

        // General case: dispatch through fresh q/r variables.
        let nbits = aux_nbits(shape.ve.len().max(shape.vx.len()));
        let q = cfg.vars.create("#q#", Type::Bits(nbits));
        let r = cfg.vars.create("#r#", Type::Bits(1));

        let vt = cfg.add_block();
        append_dispatch(cfg, vt, 1, r, 2);

        // Loop entries.
        let new_ve = if shape.ve.len() > 1 {
            let head = cfg.add_block();
            append_dispatch(cfg, head, nbits, q, shape.ve.len() as u64);

            for &edge in &shape.ae {
                let target = cfg.edge_sink(edge);
                let ass = cfg.add_block();
                cfg.append_tac(
                    ass,
                    Tac::new(
                        Operation::IntConst { nbits, value: shape.ve[&target] },
                        [],
                        [q],
                    ),
                );
                cfg.add_outedge(ass, head);
                cfg.divert(edge, ass);
            }

            for (&target, &index) in &shape.ve {
                let e = cfg.add_outedge(head, target);
                debug_assert_eq!(cfg.edge_index(e) as u64, index);
            }
            head
        } else {
            *shape.ve.get_index(0).unwrap().0
        };

        // Loop exits.
        let new_vx = if shape.vx.len() > 1 {
            let head = cfg.add_block();
            append_dispatch(cfg, head, nbits, q, shape.vx.len() as u64);
            for (&target, &index) in &shape.vx {
                let e = cfg.add_outedge(head, target);
                debug_assert_eq!(cfg.edge_index(e) as u64, index);
            }
            head
        } else {
            *shape.vx.get_index(0).unwrap().0
        };

        for &edge in &shape.ax {
            let target = cfg.edge_sink(edge);
            let ass = cfg.add_block();
            cfg.append_tac(ass, Tac::new(Operation::IntConst { nbits: 1, value: 0 }, [], [r]));
            if shape.vx.len() > 1 {
                cfg.append_tac(
                    ass,
                    Tac::new(
                        Operation::IntConst { nbits, value: shape.vx[&target] },
                        [],
                        [q],
                    ),
                );
            }
            cfg.add_outedge(ass, vt);
            cfg.divert(edge, ass);
        }

        // Loop repetitions.
        for &edge in &shape.ar {
            let target = cfg.edge_sink(edge);
            let ass = cfg.add_block();
            cfg.append_tac(ass, Tac::new(Operation::IntConst { nbits: 1, value: 1 }, [], [r]));
            if shape.ve.len() > 1 {
                cfg.append_tac(
                    ass,
                    Tac::new(
                        Operation::IntConst { nbits, value: shape.ve[&target] },
                        [],
                        [q],
                    ),
                );
            }
            cfg.add_outedge(ass, vt);
            cfg.divert(edge, ass);
        }

        cfg.add_outedge(vt, new_vx);
        back_edges.push(BackEdge { source: vt, sink: new_ve, index: 1 });

        restructure_loops(cfg, new_ve, vt, back_edges);
    }
}

// -- branch restructuring --

fn find_head_branch(cfg: &Cfg, mut start: BlockId, end: BlockId) -> BlockId {
    loop {
        if cfg.noutedges(start) > 1 || start == end {
            break;
        }
        start = cfg.edge_sink(cfg.outedge(start, 0));
    }
    start
}

/// The set of blocks reachable from `edge`'s sink whose every in-edge is
/// already part of this traversal.
fn find_dominator_graph(cfg: &Cfg, edge: EdgeId) -> IndexSet<BlockId> {
    let mut nodes = IndexSet::new();
    let mut edges: HashSet<EdgeId> = HashSet::from([edge]);

    let mut to_visit = VecDeque::from([cfg.edge_sink(edge)]);
    while let Some(node) = to_visit.pop_front() {
        if nodes.contains(&node) {
            continue;
        }

        let accept = cfg.inedges(node).iter().all(|e| edges.contains(e));
        if accept {
            nodes.insert(node);
            for e in cfg.outedges(node) {
                edges.insert(e);
                to_visit.push_back(cfg.edge_sink(e));
            }
        }
    }

    nodes
}

fn restructure_branches(cfg: &mut Cfg, start: BlockId, end: BlockId) {
    let head_branch = find_head_branch(cfg, start, end);
    if head_branch == end {
        return;
    }

    // Compute the branch subgraphs.
    let af = cfg.outedges(head_branch);
    let mut branch_nodes: Vec<IndexSet<BlockId>> = Vec::with_capacity(af.len());
    let mut all_branch_nodes: HashSet<BlockId> = HashSet::new();
    for &edge in &af {
        let branch = find_dominator_graph(cfg, edge);
        all_branch_nodes.extend(branch.iter().copied());
        branch_nodes.push(branch);
    }

    // Continuation points and the edges reaching them.
    let mut cpoints: IndexMap<BlockId, u64> = IndexMap::new();
    let mut branch_out_edges: Vec<Vec<EdgeId>> = Vec::with_capacity(af.len());
    for n in 0..af.len() {
        let mut out_edges = Vec::new();
        if branch_nodes[n].is_empty() {
            out_edges.push(af[n]);
            let next = cpoints.len() as u64;
            cpoints.entry(cfg.edge_sink(af[n])).or_insert(next);
        } else {
            for &node in &branch_nodes[n] {
                for e in cfg.outedges(node) {
                    let sink = cfg.edge_sink(e);
                    if !all_branch_nodes.contains(&sink) {
                        out_edges.push(e);
                        let next = cpoints.len() as u64;
                        cpoints.entry(sink).or_insert(next);
                    }
                }
            }
        }
        branch_out_edges.push(out_edges);
    }
    debug_assert!(!cpoints.is_empty());

    // Single join: no dispatcher needed.
    if cpoints.len() == 1 {
        let cpoint = *cpoints.get_index(0).unwrap().0;
        for n in 0..af.len() {
            // Empty branch subgraph: materialise the alternative.
            if cfg.edge_sink(af[n]) == cpoint {
                cfg.split_edge(af[n]);
                continue;
            }

            // A single edge reaches the continuation point.
            if branch_out_edges[n].len() == 1 {
                let boe = branch_out_edges[n][0];
                let sub_end = cfg.edge_source(boe);
                restructure_branches(cfg, cfg.edge_sink(af[n]), sub_end);
                continue;
            }

            // Several edges do; collapse them through an empty block.
            let null = cfg.add_block();
            cfg.add_outedge(null, cpoint);
            for &e in &branch_out_edges[n] {
                cfg.divert(e, null);
            }
            restructure_branches(cfg, cfg.edge_sink(af[n]), null);
        }

        restructure_branches(cfg, cpoint, end);
        return;
    }

    // Several continuation points: funnel through a dispatcher on p.
    let nbits = ceil_log2(cpoints.len());
    let p = cfg.vars.create("#p#", Type::Bits(nbits));
    let vt = cfg.add_block();
    append_dispatch(cfg, vt, nbits, p, cpoints.len() as u64);
    for (&point, _) in &cpoints {
        cfg.add_outedge(vt, point);
    }

    for n in 0..af.len() {
        if branch_out_edges[n].len() == 1 {
            let boe = branch_out_edges[n][0];
            let is_empty_subgraph = boe == af[n];
            let subgraph_entry = cfg.edge_sink(af[n]);

            let ass = cfg.add_block();
            cfg.append_tac(
                ass,
                Tac::new(
                    Operation::IntConst { nbits, value: cpoints[&cfg.edge_sink(boe)] },
                    [],
                    [p],
                ),
            );
            cfg.add_outedge(ass, vt);
            cfg.divert(boe, ass);

            if !is_empty_subgraph {
                restructure_branches(cfg, subgraph_entry, ass);
            }
            continue;
        }

        let null = cfg.add_block();
        cfg.add_outedge(null, vt);
        for &e in &branch_out_edges[n] {
            let ass = cfg.add_block();
            cfg.append_tac(
                ass,
                Tac::new(
                    Operation::IntConst { nbits, value: cpoints[&cfg.edge_sink(e)] },
                    [],
                    [p],
                ),
            );
            cfg.add_outedge(ass, null);
            cfg.divert(e, ass);
        }
        restructure_branches(cfg, cfg.edge_sink(af[n]), null);
    }

    restructure_branches(cfg, vt, end);
}
