//! The `iln` pass: direct-call inlining.
//!
//! Inlines calls whose callee statically resolves to a lambda without
//! captured context (a self-contained function): the callee body is copied
//! into the caller's region with formals mapped to the call operands, and
//! the call's outputs divert to the copied results. Recursive calls and
//! callees with context-vars are left alone.

use rheo_rvsdg::{
    copy_region, topdown, NodeId, NodeKind, Origin, RegionId, Rvsdg, RvsdgModule, SubstitutionMap,
};

use crate::error::OptError;

pub fn inline(rm: &mut RvsdgModule) -> Result<(), OptError> {
    let root = rm.graph.root();
    inline_region(&mut rm.graph, root)
}

fn inline_region(graph: &mut Rvsdg, region: RegionId) -> Result<(), OptError> {
    for node in topdown(graph, region) {
        if !graph.is_alive(node) {
            continue;
        }
        for sub in graph.node(node).subregions.clone() {
            inline_region(graph, sub)?;
        }
        if matches!(
            graph.node(node).kind,
            NodeKind::Simple(rheo_llir::Operation::Call { .. })
        ) {
            try_inline(graph, node)?;
        }
    }
    Ok(())
}

/// Resolves a callee origin to its defining lambda through lambda and phi
/// context boundaries.
fn trace_function(graph: &Rvsdg, origin: Origin) -> Option<NodeId> {
    match origin {
        Origin::Output { node, index: 0 }
            if matches!(graph.node(node).kind, NodeKind::Lambda { .. }) =>
        {
            Some(node)
        }
        Origin::Argument { region, index } => {
            let owner = graph.region(region).owner?;
            match &graph.node(owner).kind {
                NodeKind::Lambda { .. } => {
                    let nformals = graph.lambda_nformals(owner);
                    let cv = (index as usize).checked_sub(nformals)?;
                    trace_function(graph, graph.node(owner).inputs[cv].origin)
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// `true` if `region` is `node`'s own subregion or nested below it.
fn is_inside(graph: &Rvsdg, mut region: RegionId, node: NodeId) -> bool {
    loop {
        match graph.region(region).owner {
            Some(owner) if owner == node => return true,
            Some(owner) => region = graph.parent_region(owner),
            None => return false,
        }
    }
}

fn try_inline(graph: &mut Rvsdg, call: NodeId) -> Result<(), OptError> {
    let callee = graph.node(call).inputs[0].origin;
    let lambda = match trace_function(graph, callee) {
        Some(lambda) => lambda,
        None => return Ok(()),
    };
    if graph.lambda_nctxvars(lambda) != 0 {
        return Ok(());
    }
    let region = graph.parent_region(call);
    if is_inside(graph, region, lambda) {
        // Recursive call; inlining would never terminate.
        return Ok(());
    }
    let nformals = graph.lambda_nformals(lambda);
    if graph.node(call).inputs.len() - 1 < nformals {
        return Ok(());
    }
    tracing::debug!(call = %call, lambda = %lambda, "inlining direct call");

    let mut smap = SubstitutionMap::new();
    for n in 0..nformals {
        smap.insert(graph.lambda_argument(lambda, n), graph.node(call).inputs[n + 1].origin);
    }

    let body = graph.lambda_subregion(lambda);
    copy_region(graph, body, region, &mut smap, false, false)?;

    for index in 0..graph.node(call).outputs.len() {
        let result_origin = graph.region(body).results[index].origin;
        let replacement = smap
            .lookup(result_origin)
            .expect("a context-free callee body only references its formals");
        graph.divert_users(Origin::Output { node: call, index: index as u32 }, replacement);
    }
    graph.remove_node(call)?;
    Ok(())
}
