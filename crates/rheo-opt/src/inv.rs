//! The `inv` pass: invariant loop-value redirection.
//!
//! A theta loop-var whose result is its own argument carries the same
//! value on every iteration; users of the theta output can read the input
//! origin directly. The loop-var itself stays in place (dead-output
//! pruning is `dne`'s business).

use rheo_rvsdg::{topdown, NodeKind, Origin, RegionId, Rvsdg, RvsdgModule};

pub fn inv(rm: &mut RvsdgModule) {
    let root = rm.graph.root();
    inv_region(&mut rm.graph, root);
}

fn inv_region(graph: &mut Rvsdg, region: RegionId) {
    for node in topdown(graph, region) {
        if !graph.is_alive(node) {
            continue;
        }
        for sub in graph.node(node).subregions.clone() {
            inv_region(graph, sub);
        }
        if matches!(graph.node(node).kind, NodeKind::Theta { .. }) {
            for lv in 0..graph.theta_nloopvars(node) {
                if graph.theta_result_origin(node, lv) == graph.theta_argument(node, lv) {
                    graph.divert_users(
                        Origin::Output { node, index: lv as u32 },
                        graph.theta_input_origin(node, lv),
                    );
                }
            }
        }
    }
}
