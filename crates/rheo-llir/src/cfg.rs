//! Control flow graphs of basic blocks.
//!
//! A [`Cfg`] is a directed multigraph over [`BlockKind`] nodes with two
//! distinguished pseudo-blocks: entry (declares the function arguments) and
//! exit (declares the results). Edges are ordered at the source -- each
//! out-edge carries a source-local index used by branch operations -- and
//! unordered at the sink. The index lives as an edge weight ([`CfgEdge`]),
//! so petgraph's own edge iteration order never matters.
//!
//! The structure predicates at the bottom ([`Cfg::is_closed`],
//! [`Cfg::is_valid`], [`Cfg::is_proper_structured`]) define the contracts
//! between the pipeline stages: restructuring requires a closed, valid CFG
//! and establishes proper structure; aggregation requires proper structure.

use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::Directed;
use serde::{Deserialize, Serialize};

use crate::error::LlirError;
use crate::id::{BlockId, EdgeId, VarId};
use crate::tac::Tac;
use crate::var::VarTable;

/// Edge weight: the source-local ordering index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfgEdge {
    pub index: u32,
}

/// Declared function arguments, owned by the entry pseudo-block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryAttr {
    pub arguments: Vec<VarId>,
}

/// Declared function results, owned by the exit pseudo-block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitAttr {
    pub results: Vec<VarId>,
}

/// An ordered sequence of TACs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    tacs: Vec<Tac>,
}

impl BasicBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_last(&mut self, tac: Tac) {
        self.tacs.push(tac);
    }

    pub fn append_first(&mut self, tac: Tac) {
        self.tacs.insert(0, tac);
    }

    pub fn last(&self) -> Option<&Tac> {
        self.tacs.last()
    }

    pub fn tacs(&self) -> &[Tac] {
        &self.tacs
    }

    pub fn len(&self) -> usize {
        self.tacs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tacs.is_empty()
    }

    /// `true` if the block ends in a branch TAC.
    pub fn ends_in_branch(&self) -> bool {
        self.tacs.last().map(|tac| tac.op.is_branch()).unwrap_or(false)
    }

    /// Moves the TAC sequence out, leaving the block empty.
    pub fn take_tacs(&mut self) -> Vec<Tac> {
        std::mem::take(&mut self.tacs)
    }
}

/// The three node kinds of a CFG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BlockKind {
    Entry(EntryAttr),
    Exit(ExitAttr),
    Block(BasicBlock),
}

impl BlockKind {
    pub fn as_block(&self) -> Option<&BasicBlock> {
        match self {
            BlockKind::Block(bb) => Some(bb),
            _ => None,
        }
    }
}

/// A control flow graph plus its local variable table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cfg {
    graph: StableGraph<BlockKind, CfgEdge, Directed, u32>,
    entry: BlockId,
    exit: BlockId,
    pub vars: VarTable,
}

impl Cfg {
    /// Creates a CFG with entry and exit connected by a single edge.
    pub fn new() -> Self {
        let mut graph = StableGraph::default();
        let entry = BlockId::from(graph.add_node(BlockKind::Entry(EntryAttr::default())));
        let exit = BlockId::from(graph.add_node(BlockKind::Exit(ExitAttr::default())));
        graph.add_edge(entry.into(), exit.into(), CfgEdge { index: 0 });
        Cfg { graph, entry, exit, vars: VarTable::new() }
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn exit(&self) -> BlockId {
        self.exit
    }

    pub fn entry_attr(&self) -> &EntryAttr {
        match &self.graph[petgraph::graph::NodeIndex::from(self.entry)] {
            BlockKind::Entry(attr) => attr,
            _ => unreachable!("entry node lost its attribute"),
        }
    }

    pub fn entry_attr_mut(&mut self) -> &mut EntryAttr {
        match &mut self.graph[petgraph::graph::NodeIndex::from(self.entry)] {
            BlockKind::Entry(attr) => attr,
            _ => unreachable!("entry node lost its attribute"),
        }
    }

    pub fn exit_attr(&self) -> &ExitAttr {
        match &self.graph[petgraph::graph::NodeIndex::from(self.exit)] {
            BlockKind::Exit(attr) => attr,
            _ => unreachable!("exit node lost its attribute"),
        }
    }

    pub fn exit_attr_mut(&mut self) -> &mut ExitAttr {
        match &mut self.graph[petgraph::graph::NodeIndex::from(self.exit)] {
            BlockKind::Exit(attr) => attr,
            _ => unreachable!("exit node lost its attribute"),
        }
    }

    /// Adds an empty basic block.
    pub fn add_block(&mut self) -> BlockId {
        BlockId::from(self.graph.add_node(BlockKind::Block(BasicBlock::new())))
    }

    pub fn kind(&self, id: BlockId) -> &BlockKind {
        &self.graph[petgraph::graph::NodeIndex::from(id)]
    }

    pub fn is_basic_block(&self, id: BlockId) -> bool {
        matches!(self.kind(id), BlockKind::Block(_))
    }

    /// Borrows a basic block's TAC sequence.
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        match self.kind(id) {
            BlockKind::Block(bb) => bb,
            _ => panic!("{} is not a basic block", id),
        }
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        match &mut self.graph[petgraph::graph::NodeIndex::from(id)] {
            BlockKind::Block(bb) => bb,
            _ => panic!("{} is not a basic block", id),
        }
    }

    /// Appends a TAC to the end of a basic block.
    pub fn append_tac(&mut self, id: BlockId, tac: Tac) {
        self.block_mut(id).append_last(tac);
    }

    /// Moves a node's payload out, leaving an empty block behind. Used by
    /// aggregation, which consumes the CFG.
    pub fn take_kind(&mut self, id: BlockId) -> BlockKind {
        std::mem::replace(
            &mut self.graph[petgraph::graph::NodeIndex::from(id)],
            BlockKind::Block(BasicBlock::new()),
        )
    }

    pub fn node_ids(&self) -> Vec<BlockId> {
        self.graph.node_indices().map(BlockId::from).collect()
    }

    pub fn nnodes(&self) -> usize {
        self.graph.node_count()
    }

    // -- edges --

    /// Appends an out-edge with the next free source index.
    pub fn add_outedge(&mut self, source: BlockId, sink: BlockId) -> EdgeId {
        let index = self.noutedges(source) as u32;
        EdgeId::from(self.graph.add_edge(source.into(), sink.into(), CfgEdge { index }))
    }

    /// Inserts an out-edge at a specific source index, shifting existing
    /// edges at that index and above up by one. Back-edge reinsertion uses
    /// this to restore the index a branch TAC expects.
    pub fn insert_outedge_at(&mut self, source: BlockId, sink: BlockId, index: u32) -> EdgeId {
        let to_shift: Vec<EdgeId> = self
            .graph
            .edges(source.into())
            .filter(|e| e.weight().index >= index)
            .map(|e| EdgeId::from(e.id()))
            .collect();
        for e in to_shift {
            self.graph[petgraph::graph::EdgeIndex::from(e)].index += 1;
        }
        EdgeId::from(self.graph.add_edge(source.into(), sink.into(), CfgEdge { index }))
    }

    pub fn edge_source(&self, edge: EdgeId) -> BlockId {
        BlockId::from(self.graph.edge_endpoints(edge.into()).expect("stale edge").0)
    }

    pub fn edge_sink(&self, edge: EdgeId) -> BlockId {
        BlockId::from(self.graph.edge_endpoints(edge.into()).expect("stale edge").1)
    }

    pub fn edge_index(&self, edge: EdgeId) -> u32 {
        self.graph[petgraph::graph::EdgeIndex::from(edge)].index
    }

    /// Out-edges of `source`, ordered by source index.
    pub fn outedges(&self, source: BlockId) -> Vec<EdgeId> {
        let mut edges: Vec<(u32, EdgeId)> = self
            .graph
            .edges(source.into())
            .map(|e| (e.weight().index, EdgeId::from(e.id())))
            .collect();
        edges.sort_by_key(|(index, _)| *index);
        edges.into_iter().map(|(_, e)| e).collect()
    }

    /// The out-edge with the given source index.
    pub fn outedge(&self, source: BlockId, index: u32) -> EdgeId {
        self.graph
            .edges(source.into())
            .find(|e| e.weight().index == index)
            .map(|e| EdgeId::from(e.id()))
            .unwrap_or_else(|| panic!("{} has no out-edge {}", source, index))
    }

    pub fn noutedges(&self, node: BlockId) -> usize {
        self.graph.edges(petgraph::graph::NodeIndex::from(node)).count()
    }

    /// In-edges of `sink`, in no particular order.
    pub fn inedges(&self, sink: BlockId) -> Vec<EdgeId> {
        self.graph
            .edges_directed(sink.into(), petgraph::Direction::Incoming)
            .map(|e| EdgeId::from(e.id()))
            .collect()
    }

    pub fn ninedges(&self, node: BlockId) -> usize {
        self.graph
            .edges_directed(node.into(), petgraph::Direction::Incoming)
            .count()
    }

    pub fn successors(&self, node: BlockId) -> Vec<BlockId> {
        self.outedges(node).into_iter().map(|e| self.edge_sink(e)).collect()
    }

    pub fn has_selfloop_edge(&self, node: BlockId) -> bool {
        self.graph.edges(node.into()).any(|e| e.target() == node.into())
    }

    /// Removes the out-edge at `index`, renumbering the higher indices down.
    pub fn remove_outedge(&mut self, source: BlockId, index: u32) {
        let edge = self.outedge(source, index);
        self.graph.remove_edge(edge.into());
        let to_renumber: Vec<EdgeId> = self
            .graph
            .edges(source.into())
            .filter(|e| e.weight().index > index)
            .map(|e| EdgeId::from(e.id()))
            .collect();
        for e in to_renumber {
            self.graph[petgraph::graph::EdgeIndex::from(e)].index -= 1;
        }
    }

    pub fn remove_outedges(&mut self, source: BlockId) {
        let edges: Vec<EdgeId> = self
            .graph
            .edges(source.into())
            .map(|e| EdgeId::from(e.id()))
            .collect();
        for e in edges {
            self.graph.remove_edge(e.into());
        }
    }

    pub fn remove_inedges(&mut self, sink: BlockId) {
        for e in self.inedges(sink) {
            self.graph.remove_edge(e.into());
        }
    }

    /// Re-targets an edge, keeping its source and source index. The edge is
    /// re-created, so the caller receives the fresh id.
    pub fn divert(&mut self, edge: EdgeId, new_sink: BlockId) -> EdgeId {
        let source = self.edge_source(edge);
        let weight = self.graph[petgraph::graph::EdgeIndex::from(edge)];
        self.graph.remove_edge(edge.into());
        EdgeId::from(self.graph.add_edge(source.into(), new_sink.into(), weight))
    }

    /// Re-targets every in-edge of `node` to `new_target`.
    pub fn divert_inedges(&mut self, node: BlockId, new_target: BlockId) {
        for e in self.inedges(node) {
            self.divert(e, new_target);
        }
    }

    /// Splits an edge by inserting a fresh empty block in the middle.
    /// Returns the new block.
    pub fn split_edge(&mut self, edge: EdgeId) -> BlockId {
        let sink = self.edge_sink(edge);
        let block = self.add_block();
        self.divert(edge, block);
        self.add_outedge(block, sink);
        block
    }

    /// Removes a node. The node must have no in-edges left.
    pub fn remove_node(&mut self, id: BlockId) -> Result<(), LlirError> {
        if self.ninedges(id) != 0 {
            return Err(LlirError::NodeHasInedges { block: id.0 });
        }
        self.remove_outedges(id);
        self.graph.remove_node(id.into());
        Ok(())
    }

    // -- cleanup helpers --

    /// Collapses linear chains: a basic block with a single successor
    /// whose single predecessor it is absorbs that successor's TACs and
    /// out-edges. Runs to a fixed point. Empty relay blocks on a chain
    /// disappear as a special case.
    pub fn straighten(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            for node in self.node_ids() {
                if !self.is_basic_block(node) || self.noutedges(node) != 1 {
                    continue;
                }
                let successor = self.edge_sink(self.outedge(node, 0));
                if successor == node
                    || !self.is_basic_block(successor)
                    || self.ninedges(successor) != 1
                {
                    continue;
                }

                for tac in self.block_mut(successor).take_tacs() {
                    self.block_mut(node).append_last(tac);
                }
                self.remove_outedge(node, 0);
                for edge in self.outedges(successor) {
                    let sink = self.edge_sink(edge);
                    self.add_outedge(node, sink);
                }
                self.remove_outedges(successor);
                self.remove_node(successor).expect("absorbed block has no in-edges left");

                changed = true;
                break;
            }
        }
    }

    /// Removes every block unreachable from entry. The exit pseudo-block
    /// is kept even when nothing reaches it.
    pub fn prune(&mut self) {
        let reachable = self.reachable_from(self.entry, petgraph::Direction::Outgoing);
        for node in self.node_ids() {
            if reachable.contains(&node) || node == self.exit {
                continue;
            }
            self.remove_inedges(node);
            self.remove_outedges(node);
            self.remove_node(node).expect("pruned block has no edges left");
        }
    }

    // -- structure predicates --

    /// `true` iff entry has no predecessors and exit no successors.
    pub fn is_closed(&self) -> bool {
        self.ninedges(self.entry) == 0 && self.noutedges(self.exit) == 0
    }

    /// `true` iff closed and every block is reachable from entry and
    /// co-reachable to exit.
    pub fn is_valid(&self) -> bool {
        if !self.is_closed() {
            return false;
        }

        let forward = self.reachable_from(self.entry, petgraph::Direction::Outgoing);
        let backward = self.reachable_from(self.exit, petgraph::Direction::Incoming);
        self.graph.node_indices().all(|n| {
            forward.contains(&BlockId::from(n)) && backward.contains(&BlockId::from(n))
        })
    }

    fn reachable_from(
        &self,
        start: BlockId,
        direction: petgraph::Direction,
    ) -> std::collections::HashSet<BlockId> {
        let mut seen = std::collections::HashSet::new();
        let mut worklist = vec![start];
        while let Some(node) = worklist.pop() {
            if !seen.insert(node) {
                continue;
            }
            for e in self.graph.edges_directed(node.into(), direction) {
                let next = match direction {
                    petgraph::Direction::Outgoing => e.target(),
                    petgraph::Direction::Incoming => e.source(),
                };
                worklist.push(BlockId::from(next));
            }
        }
        seen
    }

    /// `true` iff the CFG is recursively decomposable by the linear, branch,
    /// and loop reductions. Runs the reduction non-destructively on a
    /// shadow graph.
    pub fn is_proper_structured(&self) -> bool {
        let mut shadow = ShadowGraph::of(self);
        shadow.reduce();
        shadow.nnodes() == 1
    }
}

impl Default for Cfg {
    fn default() -> Self {
        Self::new()
    }
}

/// A throwaway copy of the CFG shape used to test proper structure without
/// consuming the CFG. Mirrors the reductions of the aggregator.
struct ShadowGraph {
    /// Ordered out-adjacency per live node; `None` marks removed nodes.
    out: Vec<Option<Vec<usize>>>,
    indeg: Vec<usize>,
}

impl ShadowGraph {
    fn of(cfg: &Cfg) -> Self {
        let ids = cfg.node_ids();
        let index_of: std::collections::HashMap<BlockId, usize> =
            ids.iter().enumerate().map(|(n, id)| (*id, n)).collect();

        let mut out = vec![Some(Vec::new()); ids.len()];
        let mut indeg = vec![0usize; ids.len()];
        for (n, id) in ids.iter().enumerate() {
            for succ in cfg.successors(*id) {
                let s = index_of[&succ];
                out[n].as_mut().unwrap().push(s);
                indeg[s] += 1;
            }
        }
        ShadowGraph { out, indeg }
    }

    fn nnodes(&self) -> usize {
        self.out.iter().filter(|n| n.is_some()).count()
    }

    fn is_loop(&self, n: usize) -> bool {
        let out = self.out[n].as_ref().unwrap();
        self.indeg[n] == 2 && out.len() == 2 && out.contains(&n)
    }

    fn is_linear(&self, n: usize) -> bool {
        let out = self.out[n].as_ref().unwrap();
        out.len() == 1 && out[0] != n && self.indeg[out[0]] == 1
    }

    fn is_branch(&self, n: usize) -> bool {
        let out = self.out[n].as_ref().unwrap();
        if out.len() < 2 {
            return false;
        }
        let first = out[0];
        if first == n || self.out[first].as_ref().map(|o| o.len()) != Some(1) {
            return false;
        }
        let join = self.out[first].as_ref().unwrap()[0];
        let mut seen = std::collections::HashSet::new();
        for &alt in out {
            if !seen.insert(alt) {
                return false;
            }
            let alt_out = match self.out.get(alt).and_then(|o| o.as_ref()) {
                Some(o) => o,
                None => return false,
            };
            if self.indeg[alt] != 1 || alt_out.len() != 1 || alt_out[0] != join {
                return false;
            }
        }
        true
    }

    fn reduce_at(&mut self, n: usize) -> bool {
        if self.is_loop(n) {
            let out = self.out[n].as_mut().unwrap();
            let pos = out.iter().position(|&s| s == n).unwrap();
            out.remove(pos);
            self.indeg[n] -= 1;
            return true;
        }

        if self.is_branch(n) {
            let alts = self.out[n].take().unwrap();
            let join = self.out[alts[0]].as_ref().unwrap()[0];
            for &alt in &alts {
                self.out[alt] = None;
                self.indeg[join] -= 1;
            }
            self.indeg[join] += 1;
            self.out[n] = Some(vec![join]);
            return true;
        }

        if self.is_linear(n) {
            let succ = self.out[n].as_ref().unwrap()[0];
            let succ_out = self.out[succ].take().unwrap();
            self.out[n] = Some(succ_out);
            return true;
        }

        false
    }

    fn reduce(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            for n in 0..self.out.len() {
                if self.out[n].is_some() && self.reduce_at(n) {
                    changed = true;
                }
            }
        }
    }
}
