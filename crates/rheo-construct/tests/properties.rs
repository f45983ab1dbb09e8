//! Property-based structural invariants of the restructure/aggregate
//! pipeline.
//!
//! CFGs are generated as a guaranteed-valid spine (entry -> b0 -> ... ->
//! bn -> exit) plus a batch of random extra edges, which freely introduces
//! branches, joins, reducible and irreducible loops.

use proptest::prelude::*;
use rheo_construct::{aggregate, annotate, restructure};
use rheo_llir::{BlockId, Cfg};

/// Builds a valid CFG from the generated shape.
fn build_cfg(nblocks: usize, extra_edges: &[(usize, usize)]) -> Cfg {
    let mut cfg = Cfg::new();
    let blocks: Vec<BlockId> = (0..nblocks).map(|_| cfg.add_block()).collect();

    let first = cfg.outedge(cfg.entry(), 0);
    cfg.divert(first, blocks[0]);
    for pair in blocks.windows(2) {
        cfg.add_outedge(pair[0], pair[1]);
    }
    cfg.add_outedge(blocks[nblocks - 1], cfg.exit());

    for &(from, to) in extra_edges {
        let source = blocks[from % nblocks];
        // `to == nblocks` targets the exit.
        let sink = if to % (nblocks + 1) == nblocks {
            cfg.exit()
        } else {
            blocks[to % (nblocks + 1)]
        };
        cfg.add_outedge(source, sink);
    }
    cfg
}

proptest! {
    /// P1: every restructured CFG is proper-structured, and the
    /// aggregator terminates with a single tree node.
    #[test]
    fn restructured_cfgs_aggregate_to_one_node(
        nblocks in 1usize..8,
        extra_edges in prop::collection::vec((0usize..8, 0usize..9), 0..6),
    ) {
        let mut cfg = build_cfg(nblocks, &extra_edges);
        prop_assume!(cfg.is_valid());

        restructure(&mut cfg).unwrap();
        prop_assert!(cfg.is_proper_structured());

        let tree = aggregate(cfg).unwrap();
        prop_assert!(tree.nnodes() >= nblocks);
    }

    /// Every block of the restructured CFG appears exactly once in the
    /// tree's in-order flattening -- aggregation loses nothing and
    /// duplicates nothing.
    #[test]
    fn aggregation_preserves_every_block(
        nblocks in 1usize..8,
        extra_edges in prop::collection::vec((0usize..8, 0usize..9), 0..6),
    ) {
        let mut cfg = build_cfg(nblocks, &extra_edges);
        prop_assume!(cfg.is_valid());
        restructure(&mut cfg).unwrap();

        let expected: std::collections::BTreeSet<BlockId> = cfg
            .node_ids()
            .into_iter()
            .filter(|id| cfg.is_basic_block(*id))
            .collect();

        let tree = aggregate(cfg).unwrap();
        let flattened: Vec<BlockId> =
            tree.blocks_inorder().into_iter().map(|(id, _)| id).collect();
        let unique: std::collections::BTreeSet<BlockId> =
            flattened.iter().copied().collect();

        prop_assert_eq!(flattened.len(), unique.len());
        prop_assert_eq!(unique, expected);
    }

    /// Annotation terminates and produces a demand set for every tree
    /// node, with the linear invariant `L.top = A.top`, `L.bottom =
    /// B.bottom` holding throughout.
    #[test]
    fn annotation_covers_the_whole_tree(
        nblocks in 1usize..8,
        extra_edges in prop::collection::vec((0usize..8, 0usize..9), 0..6),
    ) {
        let mut cfg = build_cfg(nblocks, &extra_edges);
        prop_assume!(cfg.is_valid());
        restructure(&mut cfg).unwrap();
        let tree = aggregate(cfg).unwrap();

        let dm = annotate(&tree);
        check_node(&tree, tree.root(), &dm);
    }
}

fn check_node(
    tree: &rheo_construct::AggTree,
    id: rheo_construct::AggNodeId,
    dm: &rheo_construct::DemandMap,
) {
    let ds = dm.get(&id).expect("every reachable node is annotated");
    let node = tree.node(id);

    if let rheo_construct::AggNodeKind::Linear = node.kind {
        let a = &dm[&node.children[0]];
        let b = &dm[&node.children[1]];
        assert_eq!(ds.top, a.top);
        assert_eq!(ds.bottom, b.bottom);
        // The analysis propagates demand right to left: whatever B needs,
        // A must leave live.
        for var in &b.top {
            assert!(a.bottom.contains(var));
        }
    }

    for &child in &node.children {
        check_node(tree, child, dm);
    }
}
