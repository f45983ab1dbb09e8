//! The RVSDG arena: regions, nodes, and ports.
//!
//! # Conventions
//!
//! * **Gamma**: input 0 is the predicate (`Control(k)`); inputs `1 + i` are
//!   the entry-vars. Subregion `s` has one argument per entry-var and one
//!   result per exit-var; node output `j` is exit-var `j`.
//! * **Theta**: input, subregion argument, subregion result, and output `i`
//!   all belong to loop-var `i` and share one type. The predicate
//!   (`Control(2)`, alternative 1 repeats) is held by the node and must be
//!   set before the theta is complete.
//! * **Lambda**: subregion arguments are the formal arguments first, then
//!   one argument per captured context-var; node inputs are the context-var
//!   origins; output 0 is the function value (pointer to function type).
//! * **Delta**: subregion arguments are the context-vars; the single
//!   subregion result computes the initial value; output 0 is a pointer to
//!   it.
//! * **Phi**: subregion arguments are the recursion-vars first, then the
//!   context-vars; subregion result `i` defines recursion-var `i`; node
//!   output `i` exposes it.
//!
//! A region exclusively owns its nodes; an input has exactly one origin;
//! outputs do not store their users -- [`Rvsdg::users`] rebuilds the
//! back-reference set on demand.

use serde::{Deserialize, Serialize};

use rheo_llir::{Linkage, Operation, Type};

use crate::error::RvsdgError;
use crate::id::{NodeId, RegionId};
use crate::normal_forms::NormalForms;

/// The origin of a value: another node's output or a region argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    Output { node: NodeId, index: u32 },
    Argument { region: RegionId, index: u32 },
}

/// An input port: one origin plus the expected type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Input {
    pub origin: Origin,
    pub ty: Type,
}

/// An output port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub ty: Type,
}

/// A region argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Argument {
    pub ty: Type,
}

/// A region result: origin plus port type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPort {
    pub origin: Origin,
    pub ty: Type,
}

/// Payload of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeKind {
    Simple(Operation),
    Gamma,
    Theta { predicate: Option<Origin> },
    Lambda {
        name: String,
        fn_type: Type,
        linkage: Linkage,
    },
    Delta {
        name: String,
        linkage: Linkage,
        constant: bool,
    },
    Phi { nrecvars: u32 },
}

impl NodeKind {
    pub fn is_simple(&self) -> bool {
        matches!(self, NodeKind::Simple(_))
    }

    pub fn as_simple(&self) -> Option<&Operation> {
        match self {
            NodeKind::Simple(op) => Some(op),
            _ => None,
        }
    }

    /// A short label for diagnostics and the points-to dump.
    pub fn label(&self) -> String {
        match self {
            NodeKind::Simple(op) => simple_op_label(op),
            NodeKind::Gamma => "gamma".into(),
            NodeKind::Theta { .. } => "theta".into(),
            NodeKind::Lambda { name, .. } => format!("lambda[{}]", name),
            NodeKind::Delta { name, .. } => format!("delta[{}]", name),
            NodeKind::Phi { .. } => "phi".into(),
        }
    }
}

fn simple_op_label(op: &Operation) -> String {
    use Operation::*;
    match op {
        IntConst { value, nbits } => format!("{}:bit{}", value, nbits),
        FloatConst { .. } => "fconst".into(),
        PtrNull { .. } => "null".into(),
        Undef { .. } => "undef".into(),
        Binary { op, .. } => format!("{:?}", op).to_lowercase(),
        ICmp { op, .. } => format!("icmp.{:?}", op).to_lowercase(),
        FCmp { op, .. } => format!("fcmp.{:?}", op).to_lowercase(),
        Trunc { .. } => "trunc".into(),
        ZExt { .. } => "zext".into(),
        SExt { .. } => "sext".into(),
        FpExt { .. } => "fpext".into(),
        FpTrunc { .. } => "fptrunc".into(),
        FpToInt { .. } => "fp2int".into(),
        IntToFp { .. } => "int2fp".into(),
        Bitcast { .. } => "bitcast".into(),
        BitsToPtr { .. } => "bits2ptr".into(),
        PtrToBits { .. } => "ptr2bits".into(),
        Alloca { .. } => "alloca".into(),
        Malloc { .. } => "malloc".into(),
        Free { .. } => "free".into(),
        Load { .. } => "load".into(),
        Store { .. } => "store".into(),
        GetElementPtr { .. } => "gep".into(),
        MemStateMux { .. } => "statemux".into(),
        Match { .. } => "match".into(),
        Branch { .. } => "branch".into(),
        Phi { .. } => "phi".into(),
        Assign { .. } => "assign".into(),
        Call { .. } => "call".into(),
        Select { .. } => "select".into(),
        Valist { .. } => "valist".into(),
    }
}

/// A node: kind, ports, subregions, and the owning region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub subregions: Vec<RegionId>,
    pub parent: RegionId,
}

/// A region: bounded by arguments and results, owning an ordered node set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionData {
    /// The structural node owning this region; `None` for the root.
    pub owner: Option<NodeId>,
    pub arguments: Vec<Argument>,
    pub results: Vec<ResultPort>,
    /// Ordered: every node appears after the nodes its inputs originate
    /// from, which the builder API maintains by construction.
    pub nodes: Vec<NodeId>,
}

/// A use site of an output or argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSite {
    Input { node: NodeId, index: u32 },
    Result { region: RegionId, index: u32 },
    ThetaPredicate { node: NodeId },
}

/// The RVSDG arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rvsdg {
    nodes: Vec<Option<Node>>,
    regions: Vec<Option<RegionData>>,
    root: RegionId,
    /// Names of root-region arguments (imports), keyed by argument index.
    import_names: std::collections::HashMap<u32, String>,
    pub normal_forms: NormalForms,
}

impl Rvsdg {
    pub fn new() -> Self {
        let root = RegionData {
            owner: None,
            arguments: Vec::new(),
            results: Vec::new(),
            nodes: Vec::new(),
        };
        Rvsdg {
            nodes: Vec::new(),
            regions: vec![Some(root)],
            root: RegionId(0),
            import_names: std::collections::HashMap::new(),
            normal_forms: NormalForms::default(),
        }
    }

    pub fn root(&self) -> RegionId {
        self.root
    }

    pub fn region(&self, id: RegionId) -> &RegionData {
        self.regions[id.0 as usize].as_ref().expect("stale region id")
    }

    fn region_mut(&mut self, id: RegionId) -> &mut RegionData {
        self.regions[id.0 as usize].as_mut().expect("stale region id")
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0 as usize].as_ref().expect("stale node id")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0 as usize].as_mut().expect("stale node id")
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        self.nodes
            .get(id.0 as usize)
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Number of live nodes, across all regions.
    pub fn nnodes(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    /// Snapshot of a region's node list; safe to hold across mutation if
    /// combined with [`is_alive`](Self::is_alive).
    pub fn region_nodes(&self, region: RegionId) -> Vec<NodeId> {
        self.region(region).nodes.clone()
    }

    pub fn parent_region(&self, node: NodeId) -> RegionId {
        self.node(node).parent
    }

    /// The type a value origin carries.
    pub fn origin_type(&self, origin: Origin) -> Type {
        match origin {
            Origin::Output { node, index } => {
                self.node(node).outputs[index as usize].ty.clone()
            }
            Origin::Argument { region, index } => {
                self.region(region).arguments[index as usize].ty.clone()
            }
        }
    }

    pub fn output_origin(&self, node: NodeId, index: u32) -> Origin {
        debug_assert!((index as usize) < self.node(node).outputs.len());
        Origin::Output { node, index }
    }

    fn alloc_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let parent = node.parent;
        self.nodes.push(Some(node));
        self.region_mut(parent).nodes.push(id);
        id
    }

    fn alloc_region(&mut self, owner: NodeId) -> RegionId {
        let id = RegionId(self.regions.len() as u32);
        self.regions.push(Some(RegionData {
            owner: Some(owner),
            arguments: Vec::new(),
            results: Vec::new(),
            nodes: Vec::new(),
        }));
        id
    }

    /// Appends a root-region argument (an import) and returns its origin.
    pub fn add_import(&mut self, ty: Type) -> Origin {
        let root = self.root;
        self.push_argument(root, ty)
    }

    /// An import with a name, for round-tripping external declarations.
    pub fn add_named_import(&mut self, ty: Type, name: impl Into<String>) -> Origin {
        let origin = self.add_import(ty);
        if let Origin::Argument { index, .. } = origin {
            self.import_names.insert(index, name.into());
        }
        origin
    }

    /// The name of root-region argument `index`, if it was imported with
    /// one.
    pub fn import_name(&self, index: u32) -> Option<&str> {
        self.import_names.get(&index).map(|s| s.as_str())
    }

    /// Appends a raw argument to a region. Region copying uses this; any
    /// other caller must keep the owning node's port conventions intact.
    pub(crate) fn push_argument(&mut self, region: RegionId, ty: Type) -> Origin {
        let index = self.region(region).arguments.len() as u32;
        self.region_mut(region).arguments.push(Argument { ty });
        Origin::Argument { region, index }
    }

    /// Appends a raw result to a region. See [`push_argument`](Self::push_argument).
    pub(crate) fn push_result(&mut self, region: RegionId, origin: Origin, ty: Type) {
        self.region_mut(region).results.push(ResultPort { origin, ty });
    }

    fn check_origin_in(&self, origin: Origin, _region: RegionId) -> Type {
        // Origins are only required to be alive; the region discipline is
        // maintained by the builder call sites.
        self.origin_type(origin)
    }

    // -- simple nodes --

    /// Creates a simple node, checking operand arity and types against the
    /// operation's port signature.
    pub fn add_simple_node(
        &mut self,
        region: RegionId,
        op: Operation,
        operands: &[Origin],
    ) -> Result<NodeId, RvsdgError> {
        let arg_types = op.argument_types();
        let id = NodeId(self.nodes.len() as u32);
        if operands.len() != arg_types.len() {
            return Err(RvsdgError::OperandCountMismatch {
                node: id,
                expected: arg_types.len(),
                actual: operands.len(),
            });
        }

        let mut inputs = Vec::with_capacity(operands.len());
        for (n, (origin, expected)) in operands.iter().zip(arg_types).enumerate() {
            let actual = self.check_origin_in(*origin, region);
            if actual != expected {
                return Err(RvsdgError::OperandTypeMismatch {
                    node: id,
                    index: n,
                    expected,
                    actual,
                });
            }
            inputs.push(Input { origin: *origin, ty: expected });
        }

        let outputs = op.result_types().into_iter().map(|ty| Output { ty }).collect();
        Ok(self.alloc_node(Node {
            kind: NodeKind::Simple(op),
            inputs,
            outputs,
            subregions: Vec::new(),
            parent: region,
        }))
    }

    // -- gamma --

    pub fn create_gamma(
        &mut self,
        region: RegionId,
        predicate: Origin,
        nalternatives: usize,
    ) -> Result<NodeId, RvsdgError> {
        let id = NodeId(self.nodes.len() as u32);
        let pred_ty = self.origin_type(predicate);
        let expected = Type::Control(nalternatives as u64);
        if pred_ty != expected {
            return Err(RvsdgError::PredicateTypeMismatch {
                node: id,
                expected,
                actual: pred_ty,
            });
        }

        let id = self.alloc_node(Node {
            kind: NodeKind::Gamma,
            inputs: vec![Input { origin: predicate, ty: expected }],
            outputs: Vec::new(),
            subregions: Vec::new(),
            parent: region,
        });
        for _ in 0..nalternatives {
            let sub = self.alloc_region(id);
            self.node_mut(id).subregions.push(sub);
        }
        Ok(id)
    }

    pub fn gamma_nalternatives(&self, gamma: NodeId) -> usize {
        self.node(gamma).subregions.len()
    }

    pub fn gamma_subregion(&self, gamma: NodeId, alternative: usize) -> RegionId {
        self.node(gamma).subregions[alternative]
    }

    pub fn gamma_predicate(&self, gamma: NodeId) -> Origin {
        self.node(gamma).inputs[0].origin
    }

    /// Adds an entry-var; returns its index. The per-alternative argument
    /// origins come from [`gamma_entryvar_argument`](Self::gamma_entryvar_argument).
    pub fn gamma_add_entryvar(&mut self, gamma: NodeId, origin: Origin) -> usize {
        let ty = self.origin_type(origin);
        let ev = self.node(gamma).inputs.len() - 1;
        self.node_mut(gamma).inputs.push(Input { origin, ty: ty.clone() });
        let subregions = self.node(gamma).subregions.clone();
        for sub in subregions {
            self.region_mut(sub).arguments.push(Argument { ty: ty.clone() });
        }
        ev
    }

    pub fn gamma_entryvar_argument(&self, gamma: NodeId, ev: usize, alternative: usize) -> Origin {
        Origin::Argument {
            region: self.node(gamma).subregions[alternative],
            index: ev as u32,
        }
    }

    pub fn gamma_nentryvars(&self, gamma: NodeId) -> usize {
        self.node(gamma).inputs.len() - 1
    }

    /// The outer origin feeding entry-var `ev`.
    pub fn gamma_entryvar_origin(&self, gamma: NodeId, ev: usize) -> Origin {
        self.node(gamma).inputs[ev + 1].origin
    }

    /// Adds an exit-var from one result origin per alternative; returns the
    /// new output's origin. All alternatives must agree on the type.
    pub fn gamma_add_exitvar(
        &mut self,
        gamma: NodeId,
        origins: Vec<Origin>,
    ) -> Result<Origin, RvsdgError> {
        let nalternatives = self.gamma_nalternatives(gamma);
        if origins.len() != nalternatives {
            return Err(RvsdgError::AlternativeCountMismatch {
                node: gamma,
                expected: nalternatives,
                actual: origins.len(),
            });
        }

        let ty = self.origin_type(origins[0]);
        for (alt, origin) in origins.iter().enumerate() {
            let actual = self.origin_type(*origin);
            if actual != ty {
                let region = self.node(gamma).subregions[alt];
                return Err(RvsdgError::ResultTypeMismatch {
                    region,
                    index: self.region(region).results.len(),
                    expected: ty,
                    actual,
                });
            }
        }

        let subregions = self.node(gamma).subregions.clone();
        for (sub, origin) in subregions.into_iter().zip(origins) {
            self.region_mut(sub).results.push(ResultPort { origin, ty: ty.clone() });
        }
        let index = self.node(gamma).outputs.len() as u32;
        self.node_mut(gamma).outputs.push(Output { ty });
        Ok(Origin::Output { node: gamma, index })
    }

    // -- theta --

    pub fn create_theta(&mut self, region: RegionId) -> NodeId {
        let id = self.alloc_node(Node {
            kind: NodeKind::Theta { predicate: None },
            inputs: Vec::new(),
            outputs: Vec::new(),
            subregions: Vec::new(),
            parent: region,
        });
        let sub = self.alloc_region(id);
        self.node_mut(id).subregions.push(sub);
        id
    }

    pub fn theta_subregion(&self, theta: NodeId) -> RegionId {
        self.node(theta).subregions[0]
    }

    pub fn theta_nloopvars(&self, theta: NodeId) -> usize {
        self.node(theta).inputs.len()
    }

    /// Adds a loop-var fed by `origin`. The result defaults to the
    /// argument itself (an invariant loop-var) until
    /// [`theta_set_result`](Self::theta_set_result) diverts it.
    pub fn theta_add_loopvar(&mut self, theta: NodeId, origin: Origin) -> usize {
        let ty = self.origin_type(origin);
        let lv = self.node(theta).inputs.len();
        let sub = self.theta_subregion(theta);
        self.node_mut(theta).inputs.push(Input { origin, ty: ty.clone() });
        self.region_mut(sub).arguments.push(Argument { ty: ty.clone() });
        let identity = Origin::Argument { region: sub, index: lv as u32 };
        self.region_mut(sub).results.push(ResultPort { origin: identity, ty: ty.clone() });
        self.node_mut(theta).outputs.push(Output { ty });
        lv
    }

    pub fn theta_argument(&self, theta: NodeId, lv: usize) -> Origin {
        Origin::Argument {
            region: self.theta_subregion(theta),
            index: lv as u32,
        }
    }

    pub fn theta_input_origin(&self, theta: NodeId, lv: usize) -> Origin {
        self.node(theta).inputs[lv].origin
    }

    pub fn theta_result_origin(&self, theta: NodeId, lv: usize) -> Origin {
        self.region(self.theta_subregion(theta)).results[lv].origin
    }

    pub fn theta_set_result(
        &mut self,
        theta: NodeId,
        lv: usize,
        origin: Origin,
    ) -> Result<(), RvsdgError> {
        let sub = self.theta_subregion(theta);
        let expected = self.region(sub).results[lv].ty.clone();
        let actual = self.origin_type(origin);
        if actual != expected {
            return Err(RvsdgError::ResultTypeMismatch {
                region: sub,
                index: lv,
                expected,
                actual,
            });
        }
        self.region_mut(sub).results[lv].origin = origin;
        Ok(())
    }

    pub fn theta_set_predicate(
        &mut self,
        theta: NodeId,
        origin: Origin,
    ) -> Result<(), RvsdgError> {
        let actual = self.origin_type(origin);
        if actual != Type::Control(2) {
            return Err(RvsdgError::PredicateTypeMismatch {
                node: theta,
                expected: Type::Control(2),
                actual,
            });
        }
        match &mut self.node_mut(theta).kind {
            NodeKind::Theta { predicate } => {
                *predicate = Some(origin);
                Ok(())
            }
            _ => Err(RvsdgError::UnexpectedNodeKind { node: theta, expected: "theta" }),
        }
    }

    pub fn theta_predicate(&self, theta: NodeId) -> Option<Origin> {
        match &self.node(theta).kind {
            NodeKind::Theta { predicate } => *predicate,
            _ => None,
        }
    }

    // -- lambda --

    pub fn create_lambda(
        &mut self,
        region: RegionId,
        name: impl Into<String>,
        fn_type: Type,
        linkage: Linkage,
    ) -> Result<NodeId, RvsdgError> {
        let arguments = match &fn_type {
            Type::Function { arguments, .. } => arguments.clone(),
            _ => {
                return Err(RvsdgError::UnexpectedNodeKind {
                    node: NodeId(self.nodes.len() as u32),
                    expected: "function type",
                })
            }
        };

        let id = self.alloc_node(Node {
            kind: NodeKind::Lambda {
                name: name.into(),
                fn_type: fn_type.clone(),
                linkage,
            },
            inputs: Vec::new(),
            outputs: vec![Output { ty: Type::pointer(fn_type) }],
            subregions: Vec::new(),
            parent: region,
        });
        let sub = self.alloc_region(id);
        self.node_mut(id).subregions.push(sub);
        for ty in arguments {
            self.region_mut(sub).arguments.push(Argument { ty });
        }
        Ok(id)
    }

    pub fn lambda_subregion(&self, lambda: NodeId) -> RegionId {
        self.node(lambda).subregions[0]
    }

    pub fn lambda_fn_type(&self, lambda: NodeId) -> &Type {
        match &self.node(lambda).kind {
            NodeKind::Lambda { fn_type, .. } => fn_type,
            _ => panic!("{} is not a lambda", lambda),
        }
    }

    pub fn lambda_nformals(&self, lambda: NodeId) -> usize {
        match self.lambda_fn_type(lambda) {
            Type::Function { arguments, .. } => arguments.len(),
            _ => unreachable!(),
        }
    }

    /// The inner origin of formal argument `i`.
    pub fn lambda_argument(&self, lambda: NodeId, index: usize) -> Origin {
        debug_assert!(index < self.lambda_nformals(lambda));
        Origin::Argument {
            region: self.lambda_subregion(lambda),
            index: index as u32,
        }
    }

    pub fn lambda_nctxvars(&self, lambda: NodeId) -> usize {
        self.node(lambda).inputs.len()
    }

    /// Captures an outer origin as a context-var; returns the inner
    /// argument origin.
    pub fn lambda_add_ctxvar(&mut self, lambda: NodeId, origin: Origin) -> Origin {
        let ty = self.origin_type(origin);
        let sub = self.lambda_subregion(lambda);
        self.node_mut(lambda).inputs.push(Input { origin, ty: ty.clone() });
        let index = self.region(sub).arguments.len() as u32;
        self.region_mut(sub).arguments.push(Argument { ty });
        Origin::Argument { region: sub, index }
    }

    /// The inner argument origin of context-var `cv`.
    pub fn lambda_ctxvar_argument(&self, lambda: NodeId, cv: usize) -> Origin {
        Origin::Argument {
            region: self.lambda_subregion(lambda),
            index: (self.lambda_nformals(lambda) + cv) as u32,
        }
    }

    /// Sets the lambda's results, checked against the function type.
    pub fn lambda_finish(
        &mut self,
        lambda: NodeId,
        results: Vec<Origin>,
    ) -> Result<(), RvsdgError> {
        let result_types = match self.lambda_fn_type(lambda) {
            Type::Function { results, .. } => results.clone(),
            _ => unreachable!(),
        };
        let sub = self.lambda_subregion(lambda);
        if results.len() != result_types.len() {
            return Err(RvsdgError::OperandCountMismatch {
                node: lambda,
                expected: result_types.len(),
                actual: results.len(),
            });
        }
        for (n, (origin, expected)) in results.iter().zip(result_types).enumerate() {
            let actual = self.origin_type(*origin);
            if actual != expected {
                return Err(RvsdgError::ResultTypeMismatch {
                    region: sub,
                    index: n,
                    expected,
                    actual,
                });
            }
            self.region_mut(sub).results.push(ResultPort { origin: *origin, ty: actual });
        }
        Ok(())
    }

    // -- delta --

    pub fn create_delta(
        &mut self,
        region: RegionId,
        name: impl Into<String>,
        value_type: Type,
        linkage: Linkage,
        constant: bool,
    ) -> NodeId {
        let id = self.alloc_node(Node {
            kind: NodeKind::Delta { name: name.into(), linkage, constant },
            inputs: Vec::new(),
            outputs: vec![Output { ty: Type::pointer(value_type) }],
            subregions: Vec::new(),
            parent: region,
        });
        let sub = self.alloc_region(id);
        self.node_mut(id).subregions.push(sub);
        id
    }

    pub fn delta_subregion(&self, delta: NodeId) -> RegionId {
        self.node(delta).subregions[0]
    }

    pub fn delta_add_ctxvar(&mut self, delta: NodeId, origin: Origin) -> Origin {
        let ty = self.origin_type(origin);
        let sub = self.delta_subregion(delta);
        self.node_mut(delta).inputs.push(Input { origin, ty: ty.clone() });
        let index = self.region(sub).arguments.len() as u32;
        self.region_mut(sub).arguments.push(Argument { ty });
        Origin::Argument { region: sub, index }
    }

    /// Sets the delta's single result: the initial value.
    pub fn delta_finish(&mut self, delta: NodeId, origin: Origin) -> Result<(), RvsdgError> {
        let sub = self.delta_subregion(delta);
        let expected = match &self.node(delta).outputs[0].ty {
            Type::Pointer(pointee) => (**pointee).clone(),
            _ => unreachable!("delta output is always a pointer"),
        };
        let actual = self.origin_type(origin);
        if actual != expected {
            return Err(RvsdgError::ResultTypeMismatch {
                region: sub,
                index: 0,
                expected,
                actual,
            });
        }
        self.region_mut(sub).results.push(ResultPort { origin, ty: actual });
        Ok(())
    }

    // -- phi --

    pub fn create_phi(&mut self, region: RegionId) -> NodeId {
        let id = self.alloc_node(Node {
            kind: NodeKind::Phi { nrecvars: 0 },
            inputs: Vec::new(),
            outputs: Vec::new(),
            subregions: Vec::new(),
            parent: region,
        });
        let sub = self.alloc_region(id);
        self.node_mut(id).subregions.push(sub);
        id
    }

    pub fn phi_subregion(&self, phi: NodeId) -> RegionId {
        self.node(phi).subregions[0]
    }

    pub fn phi_nrecvars(&self, phi: NodeId) -> usize {
        match &self.node(phi).kind {
            NodeKind::Phi { nrecvars } => *nrecvars as usize,
            _ => panic!("{} is not a phi", phi),
        }
    }

    /// Declares a recursion-var of the given type; returns its index and
    /// the inner argument origin. All recursion-vars must be declared
    /// before the first context-var.
    pub fn phi_add_recvar(
        &mut self,
        phi: NodeId,
        ty: Type,
    ) -> Result<(usize, Origin), RvsdgError> {
        if !self.node(phi).inputs.is_empty() {
            return Err(RvsdgError::PhiRecvarAfterCtxvar { node: phi });
        }
        let sub = self.phi_subregion(phi);
        let rv = self.phi_nrecvars(phi);
        self.region_mut(sub).arguments.push(Argument { ty: ty.clone() });
        self.node_mut(phi).outputs.push(Output { ty });
        match &mut self.node_mut(phi).kind {
            NodeKind::Phi { nrecvars } => *nrecvars += 1,
            _ => unreachable!(),
        }
        Ok((rv, Origin::Argument { region: sub, index: rv as u32 }))
    }

    pub fn phi_add_ctxvar(&mut self, phi: NodeId, origin: Origin) -> Origin {
        let ty = self.origin_type(origin);
        let sub = self.phi_subregion(phi);
        self.node_mut(phi).inputs.push(Input { origin, ty: ty.clone() });
        let index = self.region(sub).arguments.len() as u32;
        self.region_mut(sub).arguments.push(Argument { ty });
        Origin::Argument { region: sub, index }
    }

    /// Binds recursion-var `rv` to its definition inside the phi region.
    pub fn phi_set_recvar(
        &mut self,
        phi: NodeId,
        rv: usize,
        origin: Origin,
    ) -> Result<(), RvsdgError> {
        let sub = self.phi_subregion(phi);
        let expected = self.region(sub).arguments[rv].ty.clone();
        let actual = self.origin_type(origin);
        if actual != expected {
            return Err(RvsdgError::ResultTypeMismatch {
                region: sub,
                index: rv,
                expected,
                actual,
            });
        }
        let results = &mut self.region_mut(sub).results;
        while results.len() <= rv {
            // placeholder slots are filled by subsequent phi_set_recvar calls
            let index = results.len() as u32;
            results.push(ResultPort {
                origin: Origin::Argument { region: sub, index },
                ty: Type::Memory,
            });
        }
        results[rv] = ResultPort { origin, ty: actual };
        Ok(())
    }

    /// Removes every entry-var whose arguments are unused in all
    /// alternatives, compacting the argument indices. Returns the number
    /// of entry-vars removed.
    pub fn gamma_prune_entryvars(&mut self, gamma: NodeId) -> usize {
        let nentryvars = self.gamma_nentryvars(gamma);
        let nalternatives = self.gamma_nalternatives(gamma);
        let keep: Vec<bool> = (0..nentryvars)
            .map(|ev| {
                (0..nalternatives)
                    .any(|alt| self.has_users(self.gamma_entryvar_argument(gamma, ev, alt)))
            })
            .collect();
        let removed = keep.iter().filter(|k| !**k).count();
        if removed == 0 {
            return 0;
        }

        let mut remap: Vec<Option<u32>> = Vec::with_capacity(nentryvars);
        let mut next = 0u32;
        for kept in &keep {
            if *kept {
                remap.push(Some(next));
                next += 1;
            } else {
                remap.push(None);
            }
        }

        let inputs = std::mem::take(&mut self.node_mut(gamma).inputs);
        let mut rebuilt = Vec::with_capacity(1 + next as usize);
        for (n, input) in inputs.into_iter().enumerate() {
            if n == 0 || keep[n - 1] {
                rebuilt.push(input);
            }
        }
        self.node_mut(gamma).inputs = rebuilt;

        let subregions = self.node(gamma).subregions.clone();
        for &sub in &subregions {
            let arguments = std::mem::take(&mut self.region_mut(sub).arguments);
            self.region_mut(sub).arguments = arguments
                .into_iter()
                .enumerate()
                .filter(|(ev, _)| keep[*ev])
                .map(|(_, arg)| arg)
                .collect();
        }

        // Compact every origin referencing the shifted arguments. Unused
        // entry-vars have no users, so no origin maps to a removed slot.
        self.rewrite_argument_indices(&subregions, &remap);
        removed
    }

    fn rewrite_argument_indices(&mut self, regions: &[RegionId], remap: &[Option<u32>]) {
        let rewrite = |origin: &mut Origin| {
            if let Origin::Argument { region, index } = origin {
                if regions.contains(region) {
                    *index = remap[*index as usize].expect("referenced argument is kept");
                }
            }
        };

        for slot in self.nodes.iter_mut() {
            let node = match slot {
                Some(node) => node,
                None => continue,
            };
            for input in node.inputs.iter_mut() {
                rewrite(&mut input.origin);
            }
            if let NodeKind::Theta { predicate: Some(pred) } = &mut node.kind {
                rewrite(pred);
            }
        }
        for slot in self.regions.iter_mut() {
            let region = match slot {
                Some(region) => region,
                None => continue,
            };
            for result in region.results.iter_mut() {
                rewrite(&mut result.origin);
            }
        }
    }

    // -- users, diversion, removal --

    /// Rebuilds the user set of an origin by scanning the arena.
    pub fn users(&self, origin: Origin) -> Vec<UserSite> {
        let mut users = Vec::new();
        for (n, slot) in self.nodes.iter().enumerate() {
            let node = match slot {
                Some(node) => node,
                None => continue,
            };
            let id = NodeId(n as u32);
            for (i, input) in node.inputs.iter().enumerate() {
                if input.origin == origin {
                    users.push(UserSite::Input { node: id, index: i as u32 });
                }
            }
            if let NodeKind::Theta { predicate: Some(pred) } = &node.kind {
                if *pred == origin {
                    users.push(UserSite::ThetaPredicate { node: id });
                }
            }
        }
        for (r, slot) in self.regions.iter().enumerate() {
            let region = match slot {
                Some(region) => region,
                None => continue,
            };
            for (i, result) in region.results.iter().enumerate() {
                if result.origin == origin {
                    users.push(UserSite::Result { region: RegionId(r as u32), index: i as u32 });
                }
            }
        }
        users
    }

    pub fn has_users(&self, origin: Origin) -> bool {
        !self.users(origin).is_empty()
    }

    /// Rewrites every use of `old` to `new`.
    pub fn divert_users(&mut self, old: Origin, new: Origin) {
        for slot in self.nodes.iter_mut() {
            let node = match slot {
                Some(node) => node,
                None => continue,
            };
            for input in node.inputs.iter_mut() {
                if input.origin == old {
                    input.origin = new;
                }
            }
            if let NodeKind::Theta { predicate: Some(pred) } = &mut node.kind {
                if *pred == old {
                    *pred = new;
                }
            }
        }
        for slot in self.regions.iter_mut() {
            let region = match slot {
                Some(region) => region,
                None => continue,
            };
            for result in region.results.iter_mut() {
                if result.origin == old {
                    result.origin = new;
                }
            }
        }
    }

    /// Rewrites one specific input.
    pub fn divert_input(&mut self, node: NodeId, index: usize, origin: Origin) {
        self.node_mut(node).inputs[index].origin = origin;
    }

    /// Removes a node whose outputs have no remaining users, together with
    /// its subregions.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), RvsdgError> {
        for index in 0..self.node(id).outputs.len() {
            if self.has_users(Origin::Output { node: id, index: index as u32 }) {
                return Err(RvsdgError::NodeHasUsers { node: id });
            }
        }
        self.remove_node_unchecked(id);
        Ok(())
    }

    fn remove_node_unchecked(&mut self, id: NodeId) {
        let subregions = self.node(id).subregions.clone();
        for sub in subregions {
            self.free_region(sub);
        }
        let parent = self.node(id).parent;
        self.region_mut(parent).nodes.retain(|n| *n != id);
        self.nodes[id.0 as usize] = None;
    }

    fn free_region(&mut self, region: RegionId) {
        let nodes = self.region(region).nodes.clone();
        for node in nodes {
            self.remove_node_unchecked(node);
        }
        self.regions[region.0 as usize] = None;
    }

    // -- verification --

    /// Checks the port-level invariants across the whole graph.
    pub fn verify(&self) -> Result<(), RvsdgError> {
        for (r, slot) in self.regions.iter().enumerate() {
            let region = match slot {
                Some(region) => region,
                None => continue,
            };
            let id = RegionId(r as u32);
            for (n, result) in region.results.iter().enumerate() {
                let actual = self.origin_type(result.origin);
                if actual != result.ty {
                    return Err(RvsdgError::ResultTypeMismatch {
                        region: id,
                        index: n,
                        expected: result.ty.clone(),
                        actual,
                    });
                }
            }
        }

        for (n, slot) in self.nodes.iter().enumerate() {
            let node = match slot {
                Some(node) => node,
                None => continue,
            };
            let id = NodeId(n as u32);
            match &node.kind {
                NodeKind::Theta { predicate } => {
                    let pred = (*predicate).ok_or(RvsdgError::MissingPredicate { node: id })?;
                    let actual = self.origin_type(pred);
                    if actual != Type::Control(2) {
                        return Err(RvsdgError::PredicateTypeMismatch {
                            node: id,
                            expected: Type::Control(2),
                            actual,
                        });
                    }
                }
                NodeKind::Lambda { fn_type, .. } => {
                    if node.outputs[0].ty != Type::pointer(fn_type.clone()) {
                        return Err(RvsdgError::UnexpectedNodeKind {
                            node: id,
                            expected: "lambda with function-pointer output",
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Default for Rvsdg {
    fn default() -> Self {
        Self::new()
    }
}
