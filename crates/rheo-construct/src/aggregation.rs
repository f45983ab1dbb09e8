//! Structural aggregation: proper-structured CFG to tree.
//!
//! Repeatedly applies whichever of three reductions matches any remaining
//! node until a single node is left:
//!
//! * **linear** -- a node with one out-edge to a node with one in-edge;
//! * **loop** -- a node with two in-edges, two out-edges, one of them a
//!   self-loop;
//! * **branch** -- a split whose alternatives each have one in-edge and
//!   one out-edge converging on a common join.
//!
//! Reductions are tried loop-first, then branch, then linear. Each
//! reduction replaces the matched nodes by a fresh block and records the
//! corresponding tree node; termination follows from the strictly
//! decreasing node count of a proper-structured CFG.
//!
//! Aggregation consumes the CFG: block payloads move into the tree
//! leaves, and the variable table moves onto the tree.

use std::collections::HashMap;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use rheo_llir::{BasicBlock, BlockId, BlockKind, Cfg, EntryAttr, ExitAttr, VarTable};

use crate::error::ConstructError;

/// Identity of a node in one [`AggTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggNodeId(pub u32);

/// Payload of an aggregation tree node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AggNodeKind {
    Entry(EntryAttr),
    Exit(ExitAttr),
    /// A leaf referencing one original basic block; `id` is the block's
    /// identity in the pre-aggregation CFG (back-edges are keyed on it).
    Block { id: BlockId, block: BasicBlock },
    /// Sequence of exactly two children.
    Linear,
    /// Head child followed by two or more alternative children.
    Branch,
    /// Single body child.
    Loop,
}

/// One aggregation tree node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggNode {
    pub kind: AggNodeKind,
    pub children: Vec<AggNodeId>,
}

/// The aggregation tree, plus the variable table taken over from the CFG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggTree {
    nodes: Vec<AggNode>,
    root: AggNodeId,
    pub vars: VarTable,
}

impl AggTree {
    pub fn node(&self, id: AggNodeId) -> &AggNode {
        &self.nodes[id.0 as usize]
    }

    pub fn root(&self) -> AggNodeId {
        self.root
    }

    pub fn nnodes(&self) -> usize {
        self.nodes.len()
    }

    fn push(&mut self, node: AggNode) -> AggNodeId {
        let id = AggNodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// The basic blocks in in-order traversal: the behavioural order of
    /// the original CFG.
    pub fn blocks_inorder(&self) -> Vec<(BlockId, &BasicBlock)> {
        self.blocks_inorder_of(self.root)
    }

    /// In-order basic blocks of one subtree.
    pub fn blocks_inorder_of(&self, id: AggNodeId) -> Vec<(BlockId, &BasicBlock)> {
        let mut blocks = Vec::new();
        self.collect_blocks(id, &mut blocks);
        blocks
    }

    fn collect_blocks<'a>(&'a self, id: AggNodeId, out: &mut Vec<(BlockId, &'a BasicBlock)>) {
        let node = self.node(id);
        if let AggNodeKind::Block { id: block_id, block } = &node.kind {
            out.push((*block_id, block));
        }
        for &child in &node.children {
            self.collect_blocks(child, out);
        }
    }
}

/// Collapses a proper-structured CFG into a single aggregation tree.
pub fn aggregate(mut cfg: Cfg) -> Result<AggTree, ConstructError> {
    if !cfg.is_proper_structured() {
        return Err(ConstructError::CfgNotProperStructured);
    }

    let mut tree = AggTree {
        nodes: Vec::new(),
        root: AggNodeId(0),
        vars: VarTable::new(),
    };

    // Every CFG node starts as a leaf.
    let mut map: HashMap<BlockId, AggNodeId> = HashMap::new();
    let mut to_visit: IndexSet<BlockId> = IndexSet::new();
    for id in cfg.node_ids() {
        let kind = match cfg.take_kind(id) {
            BlockKind::Entry(attr) => AggNodeKind::Entry(attr),
            BlockKind::Exit(attr) => AggNodeKind::Exit(attr),
            BlockKind::Block(block) => AggNodeKind::Block { id, block },
        };
        let leaf = tree.push(AggNode { kind, children: Vec::new() });
        map.insert(id, leaf);
        to_visit.insert(id);
    }

    // Worklist reduction; restart from the front after every change.
    let mut n = 0;
    while n < to_visit.len() {
        let node = *to_visit.get_index(n).unwrap();
        if reduce(&mut cfg, node, &mut to_visit, &mut map, &mut tree) {
            n = 0;
        } else {
            n += 1;
        }
    }

    if to_visit.len() != 1 {
        return Err(ConstructError::CfgNotProperStructured);
    }

    tree.root = map[to_visit.get_index(0).unwrap()];
    tree.vars = std::mem::take(&mut cfg.vars);
    Ok(tree)
}

fn is_loop(cfg: &Cfg, node: BlockId) -> bool {
    cfg.ninedges(node) == 2 && cfg.noutedges(node) == 2 && cfg.has_selfloop_edge(node)
}

fn is_branch(cfg: &Cfg, split: BlockId) -> bool {
    if cfg.noutedges(split) < 2 {
        return false;
    }

    let first = cfg.edge_sink(cfg.outedge(split, 0));
    if cfg.noutedges(first) != 1 {
        return false;
    }

    let join = cfg.edge_sink(cfg.outedge(first, 0));
    for edge in cfg.outedges(split) {
        let alt = cfg.edge_sink(edge);
        if cfg.ninedges(alt) != 1 || cfg.noutedges(alt) != 1 {
            return false;
        }
        if cfg.edge_sink(cfg.outedge(alt, 0)) != join {
            return false;
        }
    }
    true
}

fn is_linear(cfg: &Cfg, node: BlockId) -> bool {
    if cfg.noutedges(node) != 1 {
        return false;
    }
    let exit = cfg.edge_sink(cfg.outedge(node, 0));
    exit != node && cfg.ninedges(exit) == 1
}

fn reduce(
    cfg: &mut Cfg,
    node: BlockId,
    to_visit: &mut IndexSet<BlockId>,
    map: &mut HashMap<BlockId, AggNodeId>,
    tree: &mut AggTree,
) -> bool {
    if is_loop(cfg, node) {
        reduce_loop(cfg, node, to_visit, map, tree);
        return true;
    }
    if is_branch(cfg, node) {
        reduce_branch(cfg, node, to_visit, map, tree);
        return true;
    }
    if is_linear(cfg, node) {
        reduce_linear(cfg, node, to_visit, map, tree);
        return true;
    }
    false
}

fn reduce_linear(
    cfg: &mut Cfg,
    entry: BlockId,
    to_visit: &mut IndexSet<BlockId>,
    map: &mut HashMap<BlockId, AggNodeId>,
    tree: &mut AggTree,
) {
    let exit = cfg.edge_sink(cfg.outedge(entry, 0));

    let reduction = cfg.add_block();
    cfg.divert_inedges(entry, reduction);
    for edge in cfg.outedges(exit) {
        let sink = cfg.edge_sink(edge);
        cfg.add_outedge(reduction, sink);
    }
    cfg.remove_outedges(exit);

    let a = map.remove(&entry).expect("linear entry has a tree node");
    let b = map.remove(&exit).expect("linear exit has a tree node");
    let linear = tree.push(AggNode { kind: AggNodeKind::Linear, children: vec![a, b] });

    to_visit.shift_remove(&entry);
    to_visit.shift_remove(&exit);
    map.insert(reduction, linear);
    to_visit.insert(reduction);
}

fn reduce_loop(
    cfg: &mut Cfg,
    node: BlockId,
    to_visit: &mut IndexSet<BlockId>,
    map: &mut HashMap<BlockId, AggNodeId>,
    tree: &mut AggTree,
) {
    // Drop the self-loop, then splice a fresh node in front.
    for edge in cfg.outedges(node) {
        if cfg.edge_sink(edge) == node {
            cfg.remove_outedge(node, cfg.edge_index(edge));
            break;
        }
    }

    let reduction = cfg.add_block();
    let continuation = cfg.edge_sink(cfg.outedge(node, 0));
    cfg.add_outedge(reduction, continuation);
    cfg.remove_outedges(node);
    cfg.divert_inedges(node, reduction);

    let body = map.remove(&node).expect("loop body has a tree node");
    let looped = tree.push(AggNode { kind: AggNodeKind::Loop, children: vec![body] });

    to_visit.shift_remove(&node);
    map.insert(reduction, looped);
    to_visit.insert(reduction);
}

fn reduce_branch(
    cfg: &mut Cfg,
    split: BlockId,
    to_visit: &mut IndexSet<BlockId>,
    map: &mut HashMap<BlockId, AggNodeId>,
    tree: &mut AggTree,
) {
    let alternatives: Vec<BlockId> = cfg
        .outedges(split)
        .into_iter()
        .map(|e| cfg.edge_sink(e))
        .collect();
    let join = cfg.edge_sink(cfg.outedge(alternatives[0], 0));

    let head = map.remove(&split).expect("branch split has a tree node");
    let mut children = vec![head];
    for alt in &alternatives {
        children.push(map.remove(alt).expect("branch alternative has a tree node"));
        cfg.remove_outedges(*alt);
        to_visit.shift_remove(alt);
    }

    let reduction = cfg.add_block();
    cfg.divert_inedges(split, reduction);
    cfg.add_outedge(reduction, join);

    let branch = tree.push(AggNode { kind: AggNodeKind::Branch, children });
    to_visit.shift_remove(&split);
    map.insert(reduction, branch);
    to_visit.insert(reduction);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rheo_llir::{Operation, Tac, Type};

    fn attach(cfg: &mut Cfg, first: BlockId) {
        let e = cfg.outedge(cfg.entry(), 0);
        cfg.divert(e, first);
    }

    fn block_with_const(cfg: &mut Cfg, value: u64) -> BlockId {
        let b = cfg.add_block();
        let v = cfg.vars.create(format!("v{}", value), Type::Bits(32));
        cfg.append_tac(b, Tac::new(Operation::IntConst { nbits: 32, value }, [], [v]));
        b
    }

    #[test]
    fn linear_chain_aggregates_to_nested_linears() {
        let mut cfg = Cfg::new();
        let a = block_with_const(&mut cfg, 1);
        let b = block_with_const(&mut cfg, 2);
        attach(&mut cfg, a);
        cfg.add_outedge(a, b);
        cfg.add_outedge(b, cfg.exit());

        let tree = aggregate(cfg).unwrap();
        // In-order flattening preserves block order.
        let blocks = tree.blocks_inorder();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].0, a);
        assert_eq!(blocks[1].0, b);

        // The root is a linear spine containing entry and exit leaves.
        assert!(matches!(tree.node(tree.root()).kind, AggNodeKind::Linear));
    }

    #[test]
    fn diamond_aggregates_to_branch() {
        let mut cfg = Cfg::new();
        let split = block_with_const(&mut cfg, 0);
        let t = block_with_const(&mut cfg, 1);
        let f = block_with_const(&mut cfg, 2);
        let join = block_with_const(&mut cfg, 3);
        attach(&mut cfg, split);
        cfg.add_outedge(split, t);
        cfg.add_outedge(split, f);
        cfg.add_outedge(t, join);
        cfg.add_outedge(f, join);
        cfg.add_outedge(join, cfg.exit());

        let tree = aggregate(cfg).unwrap();

        // Find the branch node; its first child holds the split block and
        // the alternatives follow in out-edge order.
        let branch = (0..tree.nnodes())
            .map(|n| AggNodeId(n as u32))
            .find(|id| matches!(tree.node(*id).kind, AggNodeKind::Branch))
            .expect("diamond produces a branch node");
        let children = &tree.node(branch).children;
        assert_eq!(children.len(), 3);
        match &tree.node(children[1]).kind {
            AggNodeKind::Block { id, .. } => assert_eq!(*id, t),
            other => panic!("expected block leaf, got {:?}", other),
        }
        match &tree.node(children[2]).kind {
            AggNodeKind::Block { id, .. } => assert_eq!(*id, f),
            other => panic!("expected block leaf, got {:?}", other),
        }
    }

    #[test]
    fn self_loop_aggregates_to_loop() {
        let mut cfg = Cfg::new();
        let body = block_with_const(&mut cfg, 0);
        attach(&mut cfg, body);
        cfg.add_outedge(body, body);
        cfg.add_outedge(body, cfg.exit());

        let tree = aggregate(cfg).unwrap();
        let found = (0..tree.nnodes())
            .map(|n| AggNodeId(n as u32))
            .any(|id| matches!(tree.node(id).kind, AggNodeKind::Loop));
        assert!(found);
    }

    #[test]
    fn improper_cfg_is_rejected() {
        let mut cfg = Cfg::new();
        let a = cfg.add_block();
        let b = cfg.add_block();
        let c = cfg.add_block();
        attach(&mut cfg, a);
        cfg.add_outedge(a, b);
        cfg.add_outedge(a, c);
        cfg.add_outedge(b, c);
        cfg.add_outedge(c, b);
        cfg.add_outedge(b, cfg.exit());

        assert!(matches!(
            aggregate(cfg),
            Err(ConstructError::CfgNotProperStructured)
        ));
    }

    #[test]
    fn terminates_on_restructured_irreducible_graph() {
        use crate::restructure::restructure;

        let mut cfg = Cfg::new();
        let h = cfg.add_block();
        let a = cfg.add_block();
        let b = cfg.add_block();
        let c1 = cfg.vars.create("c1", Type::Control(2));
        let c2 = cfg.vars.create("c2", Type::Control(2));
        cfg.append_tac(h, Tac::new(Operation::Branch { nalternatives: 2 }, [c1], []));
        cfg.append_tac(a, Tac::new(Operation::Branch { nalternatives: 2 }, [c2], []));
        attach(&mut cfg, h);
        cfg.add_outedge(h, a);
        cfg.add_outedge(h, b);
        cfg.add_outedge(a, b);
        cfg.add_outedge(a, cfg.exit());
        cfg.add_outedge(b, a);

        restructure(&mut cfg).unwrap();
        let tree = aggregate(cfg).unwrap();
        assert!(tree.nnodes() > 0);
    }
}
