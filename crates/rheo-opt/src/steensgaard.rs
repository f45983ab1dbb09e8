//! Steensgaard-style points-to analysis.
//!
//! Unification-based, flow- and context-insensitive, field-insensitive.
//! Every pointer-typed RVSDG output or region argument gets one abstract
//! location (`memloc`); a single top element (`anyloc`) stands for
//! "may point to anything" at indirect-call boundaries, integer-to-pointer
//! escapes, and any pointer-producing operation the rules do not cover.
//!
//! Locations live in a path-compressed, union-by-rank union-find arena;
//! each class carries at most one `points_to` successor, an invariant
//! [`LocationSet::join`] maintains by recursively merging successors.
//! Termination is bounded by the forest height: every join either shrinks
//! the class count or adds a single `points_to` edge to a finite graph.
//!
//! Analysis limitations (mutually recursive phi groups, bits-to-pointer)
//! are surfaced as warnings; the analysis continues with a conservative
//! `anyloc` join.

use std::collections::HashMap;
use std::fmt;

use rheo_llir::Operation;
use rheo_rvsdg::{NodeId, NodeKind, Origin, RegionId, Rvsdg, RvsdgModule};

/// Index of a location in the union-find arena.
type Loc = usize;

/// The union-find universe of abstract locations.
struct LocationSet {
    parent: Vec<Loc>,
    rank: Vec<u8>,
    points_to: Vec<Option<Loc>>,
    labels: Vec<String>,
    map: HashMap<Origin, Loc>,
    any: Loc,
}

impl LocationSet {
    fn new() -> Self {
        let mut set = LocationSet {
            parent: Vec::new(),
            rank: Vec::new(),
            points_to: Vec::new(),
            labels: Vec::new(),
            map: HashMap::new(),
            any: 0,
        };
        set.any = set.push("ANY".to_string());
        set
    }

    fn push(&mut self, label: String) -> Loc {
        let loc = self.parent.len();
        self.parent.push(loc);
        self.rank.push(0);
        self.points_to.push(None);
        self.labels.push(label);
        loc
    }

    fn insert(&mut self, origin: Origin, label: String) -> Loc {
        debug_assert!(!self.map.contains_key(&origin));
        let loc = self.push(label);
        self.map.insert(origin, loc);
        loc
    }

    fn find_or_insert(&mut self, origin: Origin, label: impl FnOnce() -> String) -> Loc {
        match self.map.get(&origin) {
            Some(&loc) => self.find(loc),
            None => {
                let label = label();
                self.insert(origin, label)
            }
        }
    }

    fn find(&mut self, loc: Loc) -> Loc {
        if self.parent[loc] != loc {
            let root = self.find(self.parent[loc]);
            self.parent[loc] = root;
        }
        self.parent[loc]
    }

    /// Union by rank; the caller fixes up `points_to`.
    fn union(&mut self, a: Loc, b: Loc) -> Loc {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return ra;
        }
        let (winner, loser) = if self.rank[ra] >= self.rank[rb] { (ra, rb) } else { (rb, ra) };
        self.parent[loser] = winner;
        if self.rank[winner] == self.rank[loser] {
            self.rank[winner] += 1;
        }
        winner
    }

    /// Symmetric merge preserving "every class has at most one successor".
    fn join(&mut self, x: Option<Loc>, y: Option<Loc>) -> Option<Loc> {
        let (x, y) = match (x, y) {
            (None, y) => return y,
            (x, None) => return x,
            (Some(x), Some(y)) => (x, y),
        };
        let (rx, ry) = (self.find(x), self.find(y));
        if rx == ry {
            return Some(rx);
        }

        let px = self.points_to[rx];
        let py = self.points_to[ry];
        let root = self.union(rx, ry);
        let successor = self.join(px, py);
        self.points_to[root] = successor;
        Some(root)
    }

    fn successor(&mut self, loc: Loc) -> Option<Loc> {
        let root = self.find(loc);
        self.points_to[root]
    }

    fn set_successor(&mut self, loc: Loc, successor: Loc) {
        let root = self.find(loc);
        match self.points_to[root] {
            None => self.points_to[root] = Some(successor),
            Some(existing) => {
                self.join(Some(existing), Some(successor));
            }
        }
    }
}

/// The analysis driver. One instance analyses one module.
pub struct Steensgaard {
    locations: LocationSet,
}

impl Default for Steensgaard {
    fn default() -> Self {
        Self::new()
    }
}

impl Steensgaard {
    pub fn new() -> Self {
        Steensgaard { locations: LocationSet::new() }
    }

    /// Runs the analysis and emits the points-to graph.
    pub fn run(mut self, rm: &RvsdgModule) -> PointsToGraph {
        let graph = &rm.graph;
        let root = graph.root();

        for (index, argument) in graph.region(root).arguments.iter().enumerate() {
            if argument.ty.is_pointer() {
                let origin = Origin::Argument { region: root, index: index as u32 };
                self.locations.insert(origin, import_label(graph, index as u32));
            }
        }

        self.analyze_region(graph, root);
        self.emit()
    }

    fn loc(&mut self, graph: &Rvsdg, origin: Origin) -> Loc {
        self.locations.find_or_insert(origin, || origin_label(graph, origin))
    }

    fn join_origins(&mut self, graph: &Rvsdg, a: Origin, b: Origin) {
        let la = self.loc(graph, a);
        let lb = self.loc(graph, b);
        self.locations.join(Some(la), Some(lb));
    }

    fn analyze_region(&mut self, graph: &Rvsdg, region: RegionId) {
        for node in graph.region_nodes(region) {
            match &graph.node(node).kind {
                NodeKind::Simple(_) => self.analyze_simple(graph, node),
                NodeKind::Gamma => self.analyze_gamma(graph, node),
                NodeKind::Theta { .. } => self.analyze_theta(graph, node),
                NodeKind::Lambda { .. } => self.analyze_lambda(graph, node),
                NodeKind::Delta { .. } => self.analyze_delta(graph, node),
                NodeKind::Phi { .. } => self.analyze_phi(graph, node),
            }
        }
    }

    fn analyze_simple(&mut self, graph: &Rvsdg, node: NodeId) {
        let op = match graph.node(node).kind.as_simple() {
            Some(op) => op.clone(),
            None => return,
        };
        match op {
            Operation::Alloca { .. } | Operation::Malloc { .. } => {
                self.loc(graph, graph.output_origin(node, 0));
            }

            Operation::Load { .. } => {
                let address = graph.node(node).inputs[0].origin;
                let a = self.loc(graph, address);
                if graph.node(node).outputs[0].ty.is_pointer() {
                    let value = self.loc(graph, graph.output_origin(node, 0));
                    match self.locations.successor(a) {
                        None => self.locations.set_successor(a, value),
                        Some(successor) => {
                            self.locations.join(Some(value), Some(successor));
                        }
                    }
                }
            }

            Operation::Store { .. } => {
                let address = graph.node(node).inputs[0].origin;
                let stored = graph.node(node).inputs[1].origin;
                let a = self.loc(graph, address);
                if graph.node(node).inputs[1].ty.is_pointer() {
                    let value = self.loc(graph, stored);
                    match self.locations.successor(a) {
                        None => self.locations.set_successor(a, value),
                        Some(successor) => {
                            self.locations.join(Some(successor), Some(value));
                        }
                    }
                }
            }

            Operation::GetElementPtr { .. } => {
                let base = graph.node(node).inputs[0].origin;
                self.join_origins(graph, base, graph.output_origin(node, 0));
            }

            Operation::Bitcast { from, to } => {
                if from.is_pointer() && to.is_pointer() {
                    let operand = graph.node(node).inputs[0].origin;
                    self.join_origins(graph, operand, graph.output_origin(node, 0));
                } else if to.is_pointer() {
                    self.escape(graph, node, "bitcast to pointer");
                }
            }

            Operation::PtrNull { .. } => {
                self.loc(graph, graph.output_origin(node, 0));
            }

            Operation::Undef { ty } => {
                if ty.is_pointer() {
                    self.loc(graph, graph.output_origin(node, 0));
                }
            }

            Operation::BitsToPtr { .. } => {
                // Unsound escape; modeled with the conservative top join.
                tracing::warn!(node = %node, "bits-to-pointer escapes the analysis; joining with anyloc");
                self.escape(graph, node, "bits-to-pointer");
            }

            Operation::Select { ty } => {
                if ty.is_pointer() {
                    let t = graph.node(node).inputs[1].origin;
                    let f = graph.node(node).inputs[2].origin;
                    self.join_origins(graph, t, graph.output_origin(node, 0));
                    self.join_origins(graph, f, graph.output_origin(node, 0));
                }
            }

            Operation::Call { .. } => self.analyze_call(graph, node),

            _ => {
                // Any uncovered pointer-producing operation escapes.
                let produces_pointer = graph
                    .node(node)
                    .outputs
                    .iter()
                    .any(|output| output.ty.is_pointer());
                if produces_pointer {
                    tracing::warn!(
                        node = %node,
                        op = %graph.node(node).kind.label(),
                        "pointer-producing operation without a transfer rule",
                    );
                    self.escape(graph, node, "unmodeled operation");
                }
            }
        }
    }

    /// Joins every pointer-typed output of `node` with anyloc.
    fn escape(&mut self, graph: &Rvsdg, node: NodeId, _reason: &str) {
        for index in 0..graph.node(node).outputs.len() {
            if graph.node(node).outputs[index].ty.is_pointer() {
                let out = self.loc(graph, graph.output_origin(node, index as u32));
                let any = self.locations.any;
                self.locations.join(Some(out), Some(any));
            }
        }
    }

    /// Follows origins through structural boundaries to the defining
    /// lambda, if the callee is statically known.
    fn trace_function(&self, graph: &Rvsdg, origin: Origin) -> Option<NodeId> {
        match origin {
            Origin::Output { node, index } => match &graph.node(node).kind {
                NodeKind::Lambda { .. } if index == 0 => Some(node),
                NodeKind::Phi { .. } => {
                    let sub = graph.phi_subregion(node);
                    let inner = graph.region(sub).results[index as usize].origin;
                    self.trace_function(graph, inner)
                }
                NodeKind::Gamma | NodeKind::Theta { .. } => None,
                _ => None,
            },
            Origin::Argument { region, index } => {
                let owner = graph.region(region).owner?;
                match &graph.node(owner).kind {
                    NodeKind::Lambda { .. } => {
                        let nformals = graph.lambda_nformals(owner);
                        if (index as usize) < nformals {
                            return None;
                        }
                        let cv = index as usize - nformals;
                        self.trace_function(graph, graph.node(owner).inputs[cv].origin)
                    }
                    NodeKind::Phi { nrecvars } => {
                        let nrecvars = *nrecvars as usize;
                        if (index as usize) < nrecvars {
                            let inner = graph.region(region).results[index as usize].origin;
                            // A recursion variable is bound directly to its
                            // lambda; anything else stays unresolved.
                            match inner {
                                Origin::Output { node, index: 0 }
                                    if matches!(graph.node(node).kind, NodeKind::Lambda { .. }) =>
                                {
                                    Some(node)
                                }
                                _ => None,
                            }
                        } else {
                            let cv = index as usize - nrecvars;
                            self.trace_function(graph, graph.node(owner).inputs[cv].origin)
                        }
                    }
                    _ => None,
                }
            }
        }
    }

    fn analyze_call(&mut self, graph: &Rvsdg, call: NodeId) {
        let callee = graph.node(call).inputs[0].origin;
        if let Some(lambda) = self.trace_function(graph, callee) {
            self.analyze_direct_call(graph, call, lambda);
        } else {
            self.analyze_indirect_call(graph, call);
        }
    }

    fn analyze_direct_call(&mut self, graph: &Rvsdg, call: NodeId, lambda: NodeId) {
        let nformals = graph.lambda_nformals(lambda);
        let sub = graph.lambda_subregion(lambda);

        // Variadic arguments beyond the formals are ignored, inheriting
        // the original imprecision.
        let call_args: Vec<Origin> = graph.node(call).inputs[1..]
            .iter()
            .map(|input| input.origin)
            .collect();
        for (n, arg) in call_args.iter().take(nformals).enumerate() {
            if !graph.node(call).inputs[n + 1].ty.is_pointer() {
                continue;
            }
            self.join_origins(graph, *arg, graph.lambda_argument(lambda, n));
        }

        for index in 0..graph.node(call).outputs.len() {
            if !graph.node(call).outputs[index].ty.is_pointer() {
                continue;
            }
            let result_origin = graph.region(sub).results[index].origin;
            self.join_origins(graph, graph.output_origin(call, index as u32), result_origin);
        }
    }

    fn analyze_indirect_call(&mut self, graph: &Rvsdg, call: NodeId) {
        let any = self.locations.any;
        for n in 1..graph.node(call).inputs.len() {
            if !graph.node(call).inputs[n].ty.is_pointer() {
                continue;
            }
            let arg = self.loc(graph, graph.node(call).inputs[n].origin);
            match self.locations.successor(arg) {
                None => self.locations.set_successor(arg, any),
                Some(successor) => {
                    self.locations.join(Some(successor), Some(any));
                }
            }
        }
        for index in 0..graph.node(call).outputs.len() {
            if !graph.node(call).outputs[index].ty.is_pointer() {
                continue;
            }
            let result = self.loc(graph, graph.output_origin(call, index as u32));
            match self.locations.successor(result) {
                None => self.locations.set_successor(result, any),
                Some(successor) => {
                    self.locations.join(Some(successor), Some(any));
                }
            }
        }
    }

    fn analyze_lambda(&mut self, graph: &Rvsdg, lambda: NodeId) {
        for cv in 0..graph.lambda_nctxvars(lambda) {
            if !graph.node(lambda).inputs[cv].ty.is_pointer() {
                continue;
            }
            let outer = graph.node(lambda).inputs[cv].origin;
            self.join_origins(graph, outer, graph.lambda_ctxvar_argument(lambda, cv));
        }
        for n in 0..graph.lambda_nformals(lambda) {
            let argument = graph.lambda_argument(lambda, n);
            if graph.origin_type(argument).is_pointer() {
                self.loc(graph, argument);
            }
        }

        self.analyze_region(graph, graph.lambda_subregion(lambda));

        self.loc(graph, graph.output_origin(lambda, 0));
    }

    fn analyze_delta(&mut self, graph: &Rvsdg, delta: NodeId) {
        let sub = graph.delta_subregion(delta);
        for (cv, input) in graph.node(delta).inputs.iter().enumerate() {
            if !input.ty.is_pointer() {
                continue;
            }
            self.join_origins(
                graph,
                input.origin,
                Origin::Argument { region: sub, index: cv as u32 },
            );
        }

        self.analyze_region(graph, sub);

        let out = self.loc(graph, graph.output_origin(delta, 0));
        let init = graph.region(sub).results[0].origin;
        if graph.origin_type(init).is_pointer() {
            let value = self.loc(graph, init);
            self.locations.set_successor(out, value);
        }
    }

    fn analyze_phi(&mut self, graph: &Rvsdg, phi: NodeId) {
        // Conservative treatment: a simultaneous join over the binding
        // group's context and recursion variables.
        tracing::warn!(node = %phi, "phi group treated as a simultaneous context-variable join");

        let sub = graph.phi_subregion(phi);
        let nrecvars = graph.phi_nrecvars(phi);
        for (cv, input) in graph.node(phi).inputs.iter().enumerate() {
            if !input.ty.is_pointer() {
                continue;
            }
            self.join_origins(
                graph,
                input.origin,
                Origin::Argument { region: sub, index: (nrecvars + cv) as u32 },
            );
        }

        self.analyze_region(graph, sub);

        for rv in 0..nrecvars {
            let argument = Origin::Argument { region: sub, index: rv as u32 };
            if !graph.origin_type(argument).is_pointer() {
                continue;
            }
            let definition = graph.region(sub).results[rv].origin;
            self.join_origins(graph, argument, definition);
            self.join_origins(graph, argument, graph.output_origin(phi, rv as u32));
        }
    }

    fn analyze_gamma(&mut self, graph: &Rvsdg, gamma: NodeId) {
        let nalternatives = graph.gamma_nalternatives(gamma);
        for ev in 0..graph.gamma_nentryvars(gamma) {
            let origin = graph.gamma_entryvar_origin(gamma, ev);
            if !graph.origin_type(origin).is_pointer() {
                continue;
            }
            for alt in 0..nalternatives {
                self.join_origins(graph, origin, graph.gamma_entryvar_argument(gamma, ev, alt));
            }
        }

        for alt in 0..nalternatives {
            self.analyze_region(graph, graph.gamma_subregion(gamma, alt));
        }

        for xv in 0..graph.node(gamma).outputs.len() {
            if !graph.node(gamma).outputs[xv].ty.is_pointer() {
                continue;
            }
            let output = graph.output_origin(gamma, xv as u32);
            for alt in 0..nalternatives {
                let sub = graph.gamma_subregion(gamma, alt);
                let result = graph.region(sub).results[xv].origin;
                self.join_origins(graph, output, result);
            }
        }
    }

    fn analyze_theta(&mut self, graph: &Rvsdg, theta: NodeId) {
        let nloopvars = graph.theta_nloopvars(theta);
        for lv in 0..nloopvars {
            if !graph.node(theta).inputs[lv].ty.is_pointer() {
                continue;
            }
            self.join_origins(
                graph,
                graph.theta_argument(theta, lv),
                graph.theta_input_origin(theta, lv),
            );
        }

        self.analyze_region(graph, graph.theta_subregion(theta));

        for lv in 0..nloopvars {
            if !graph.node(theta).inputs[lv].ty.is_pointer() {
                continue;
            }
            let argument = graph.theta_argument(theta, lv);
            self.join_origins(graph, argument, graph.theta_result_origin(theta, lv));
            self.join_origins(graph, argument, graph.output_origin(theta, lv as u32));
        }
    }

    /// Collapses the union-find state into the output graph.
    fn emit(mut self) -> PointsToGraph {
        let nlocations = self.locations.parent.len();

        // Dense class ids in first-member order.
        let mut class_of_root: HashMap<Loc, usize> = HashMap::new();
        let mut classes: Vec<PointsToClass> = Vec::new();
        for loc in 0..nlocations {
            let root = self.locations.find(loc);
            let class = *class_of_root.entry(root).or_insert_with(|| {
                classes.push(PointsToClass { members: Vec::new(), points_to: None });
                classes.len() - 1
            });
            classes[class].members.push(self.locations.labels[loc].clone());
        }

        for (&root, &class) in &class_of_root {
            if let Some(successor) = self.locations.points_to[root] {
                let successor_root = self.locations.find(successor);
                classes[class].points_to = Some(class_of_root[&successor_root]);
            }
        }

        PointsToGraph { classes }
    }
}

fn import_label(graph: &Rvsdg, index: u32) -> String {
    match graph.import_name(index) {
        Some(name) => format!("import:{}", name),
        None => format!("import:{}", index),
    }
}

fn origin_label(graph: &Rvsdg, origin: Origin) -> String {
    match origin {
        Origin::Output { node, index } => {
            format!("{}@{}:o{}", graph.node(node).kind.label(), node, index)
        }
        Origin::Argument { region, index } => match graph.region(region).owner {
            Some(owner) => format!("{}@{}:a{}", graph.node(owner).kind.label(), owner, index),
            None => import_label(graph, index),
        },
    }
}

/// One equivalence class of the final points-to graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsToClass {
    pub members: Vec<String>,
    pub points_to: Option<usize>,
}

/// The points-to graph: one node per equivalence class, at most one
/// out-edge per node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsToGraph {
    pub classes: Vec<PointsToClass>,
}

impl PointsToGraph {
    pub fn nclasses(&self) -> usize {
        self.classes.len()
    }

    /// The class containing a member with this label.
    pub fn class_of(&self, label: &str) -> Option<usize> {
        self.classes
            .iter()
            .position(|class| class.members.iter().any(|m| m == label))
    }

    /// The first class with a member matching the predicate.
    pub fn class_matching(&self, pred: impl Fn(&str) -> bool) -> Option<usize> {
        self.classes
            .iter()
            .position(|class| class.members.iter().any(|m| pred(m)))
    }

    /// DOT rendering for graph viewers.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph ptg {\n");
        for (id, class) in self.classes.iter().enumerate() {
            dot.push_str(&format!("  n{} [label = \"{}\"];\n", id, class.members.join("\\n")));
            if let Some(successor) = class.points_to {
                dot.push_str(&format!("  n{} -> n{}\n", id, successor));
            }
        }
        dot.push_str("}\n");
        dot
    }
}

impl fmt::Display for PointsToGraph {
    /// The stable textual format: a header line, then one
    /// `set <id> { <member>, ... } -> <id-or-∅>` line per class.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "points-to graph: {} sets", self.classes.len())?;
        for (id, class) in self.classes.iter().enumerate() {
            let successor = match class.points_to {
                Some(s) => s.to_string(),
                None => "∅".to_string(),
            };
            writeln!(f, "set {} {{ {} }} -> {}", id, class.members.join(", "), successor)?;
        }
        Ok(())
    }
}
