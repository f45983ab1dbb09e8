//! Three-address instructions and the closed operation vocabulary.
//!
//! A [`Tac`] bundles an [`Operation`] with ordered input and output
//! variables. The same [`Operation`] enum is reused by the RVSDG as the
//! payload of simple nodes, so every operation can report its argument and
//! result port types without external context.
//!
//! Two operations get special treatment elsewhere in the pipeline:
//! [`Operation::Assign`] models its destination as input 0 (demand
//! annotation special-cases it), and [`Operation::Branch`] must be the last
//! TAC of its block with as many block out-edges as alternatives.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::{BlockId, VarId};
use crate::types::{FloatSize, Type};

/// Binary integer arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
}

/// Integer comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ICmpOp {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl ICmpOp {
    /// `true` for the greater-than family (used to orient loop bounds).
    pub fn is_greater(&self) -> bool {
        matches!(self, ICmpOp::Ugt | ICmpOp::Uge | ICmpOp::Sgt | ICmpOp::Sge)
    }

    /// `true` for non-strict comparisons (>= and <=).
    pub fn includes_equality(&self) -> bool {
        matches!(self, ICmpOp::Uge | ICmpOp::Sge | ICmpOp::Ule | ICmpOp::Sle)
    }
}

/// Floating comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FCmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// The closed set of LLIR operations.
///
/// Every variant carries enough type information to report its port types
/// via [`argument_types`](Operation::argument_types) and
/// [`result_types`](Operation::result_types). Floating constants store the
/// IEEE bit pattern rather than an `f64` so the enum stays `Eq` + `Hash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    // -- Constants --
    IntConst { nbits: u16, value: u64 },
    FloatConst { size: FloatSize, bits: u64 },
    PtrNull { pointee: Type },
    Undef { ty: Type },

    // -- Arithmetic, comparison --
    Binary { op: BinOp, nbits: u16 },
    ICmp { op: ICmpOp, nbits: u16 },
    FCmp { op: FCmpOp, size: FloatSize },

    // -- Casts --
    Trunc { from: u16, to: u16 },
    ZExt { from: u16, to: u16 },
    SExt { from: u16, to: u16 },
    FpExt { from: FloatSize, to: FloatSize },
    FpTrunc { from: FloatSize, to: FloatSize },
    FpToInt { size: FloatSize, nbits: u16 },
    IntToFp { nbits: u16, size: FloatSize },
    Bitcast { from: Type, to: Type },
    BitsToPtr { nbits: u16, pointee: Type },
    PtrToBits { pointee: Type, nbits: u16 },

    // -- Memory --
    /// Stack allocation. Produces the address and the allocation's own
    /// memory state.
    Alloca { allocated: Type, alignment: u32 },
    /// Heap allocation of a byte count. Produces an untyped byte pointer
    /// and a fresh memory state.
    Malloc { nbits: u16 },
    /// Heap release. Consumes the pointer and the threaded states.
    Free { nstates: u32 },
    /// `load(addr, s_1..s_n)` reads through `n` memory states and produces
    /// the loaded value.
    Load { pointee: Type, nstates: u32, alignment: u32 },
    /// `store(addr, value, s_1..s_n)` produces `n` updated states.
    Store { pointee: Type, nstates: u32, alignment: u32 },
    /// Address arithmetic: base pointer plus ordered offsets.
    GetElementPtr {
        pointee: Type,
        offsets: Vec<u16>,
        result_pointee: Type,
    },
    /// Merges `n` memory states into one.
    MemStateMux { noperands: u32 },

    // -- Control --
    /// Maps a bit value to a control alternative: listed `(value, alternative)`
    /// pairs first, everything else to `default_alternative`.
    Match {
        nbits: u16,
        mapping: Vec<(u64, u64)>,
        default_alternative: u64,
        nalternatives: u64,
    },
    /// Block terminator consuming a control value; the block must have
    /// exactly `nalternatives` out-edges.
    Branch { nalternatives: u64 },
    /// SSA merge: operand `n` arrives over the edge from `predecessors[n]`.
    /// Eliminated by SSA destruction before restructuring; never reaches
    /// the RVSDG.
    Phi { ty: Type, predecessors: Vec<BlockId> },
    /// `assign(dest, src)`: the destination is modeled as input 0.
    Assign { ty: Type },

    // -- Calls, select, varargs --
    /// Call through a function pointer; input 0 is the callee.
    Call { fn_type: Type },
    Select { ty: Type },
    /// Collects variadic arguments into an untyped argument-list value.
    Valist { arguments: Vec<Type> },
}

impl Operation {
    /// Ordered argument port types.
    pub fn argument_types(&self) -> Vec<Type> {
        use Operation::*;
        match self {
            IntConst { .. } | FloatConst { .. } | PtrNull { .. } | Undef { .. } => vec![],
            Binary { nbits, .. } => vec![Type::Bits(*nbits), Type::Bits(*nbits)],
            ICmp { nbits, .. } => vec![Type::Bits(*nbits), Type::Bits(*nbits)],
            FCmp { size, .. } => vec![Type::Float(*size), Type::Float(*size)],
            Trunc { from, .. } | ZExt { from, .. } | SExt { from, .. } => {
                vec![Type::Bits(*from)]
            }
            FpExt { from, .. } | FpTrunc { from, .. } => vec![Type::Float(*from)],
            FpToInt { size, .. } => vec![Type::Float(*size)],
            IntToFp { nbits, .. } => vec![Type::Bits(*nbits)],
            Bitcast { from, .. } => vec![from.clone()],
            BitsToPtr { nbits, .. } => vec![Type::Bits(*nbits)],
            PtrToBits { pointee, .. } => vec![Type::pointer(pointee.clone())],
            Alloca { .. } => vec![],
            Malloc { nbits } => vec![Type::Bits(*nbits)],
            Free { nstates } => {
                let mut args = vec![Type::pointer(Type::Bits(8))];
                args.extend(std::iter::repeat(Type::Memory).take(*nstates as usize));
                args
            }
            Load { pointee, nstates, .. } => {
                let mut args = vec![Type::pointer(pointee.clone())];
                args.extend(std::iter::repeat(Type::Memory).take(*nstates as usize));
                args
            }
            Store { pointee, nstates, .. } => {
                let mut args = vec![Type::pointer(pointee.clone()), pointee.clone()];
                args.extend(std::iter::repeat(Type::Memory).take(*nstates as usize));
                args
            }
            GetElementPtr { pointee, offsets, .. } => {
                let mut args = vec![Type::pointer(pointee.clone())];
                args.extend(offsets.iter().map(|nbits| Type::Bits(*nbits)));
                args
            }
            MemStateMux { noperands } => {
                std::iter::repeat(Type::Memory).take(*noperands as usize).collect()
            }
            Match { nbits, .. } => vec![Type::Bits(*nbits)],
            Branch { nalternatives } => vec![Type::Control(*nalternatives)],
            Phi { ty, predecessors } => {
                std::iter::repeat(ty.clone()).take(predecessors.len()).collect()
            }
            Assign { ty } => vec![ty.clone(), ty.clone()],
            Call { fn_type } => match fn_type {
                Type::Function { arguments, .. } => {
                    let mut args = vec![Type::pointer(fn_type.clone())];
                    args.extend(arguments.iter().cloned());
                    args
                }
                _ => vec![Type::pointer(fn_type.clone())],
            },
            Select { ty } => vec![Type::Bits(1), ty.clone(), ty.clone()],
            Valist { arguments } => arguments.clone(),
        }
    }

    /// Ordered result port types.
    pub fn result_types(&self) -> Vec<Type> {
        use Operation::*;
        match self {
            IntConst { nbits, .. } => vec![Type::Bits(*nbits)],
            FloatConst { size, .. } => vec![Type::Float(*size)],
            PtrNull { pointee } => vec![Type::pointer(pointee.clone())],
            Undef { ty } => vec![ty.clone()],
            Binary { nbits, .. } => vec![Type::Bits(*nbits)],
            ICmp { .. } | FCmp { .. } => vec![Type::Bits(1)],
            Trunc { to, .. } | ZExt { to, .. } | SExt { to, .. } => vec![Type::Bits(*to)],
            FpExt { to, .. } | FpTrunc { to, .. } => vec![Type::Float(*to)],
            FpToInt { nbits, .. } => vec![Type::Bits(*nbits)],
            IntToFp { size, .. } => vec![Type::Float(*size)],
            Bitcast { to, .. } => vec![to.clone()],
            BitsToPtr { pointee, .. } => vec![Type::pointer(pointee.clone())],
            PtrToBits { nbits, .. } => vec![Type::Bits(*nbits)],
            Alloca { allocated, .. } => {
                vec![Type::pointer(allocated.clone()), Type::Memory]
            }
            Malloc { .. } => vec![Type::pointer(Type::Bits(8)), Type::Memory],
            Free { .. } => vec![Type::Memory],
            Load { pointee, .. } => vec![pointee.clone()],
            Store { nstates, .. } => {
                std::iter::repeat(Type::Memory).take(*nstates as usize).collect()
            }
            GetElementPtr { result_pointee, .. } => {
                vec![Type::pointer(result_pointee.clone())]
            }
            MemStateMux { .. } => vec![Type::Memory],
            Match { nalternatives, .. } => vec![Type::Control(*nalternatives)],
            Branch { .. } => vec![],
            Phi { ty, .. } => vec![ty.clone()],
            Assign { .. } => vec![],
            Call { fn_type } => match fn_type {
                Type::Function { results, .. } => results.clone(),
                _ => vec![],
            },
            Select { ty } => vec![ty.clone()],
            Valist { .. } => vec![Type::pointer(Type::Bits(8))],
        }
    }

    pub fn narguments(&self) -> usize {
        self.argument_types().len()
    }

    pub fn nresults(&self) -> usize {
        self.result_types().len()
    }

    /// `true` if this operation terminates a basic block.
    pub fn is_branch(&self) -> bool {
        matches!(self, Operation::Branch { .. })
    }

    /// Resolves the control alternative a match operation selects for a
    /// concrete input value.
    pub fn match_alternative(&self, value: u64) -> Option<u64> {
        match self {
            Operation::Match { mapping, default_alternative, .. } => Some(
                mapping
                    .iter()
                    .find(|(v, _)| *v == value)
                    .map(|(_, alt)| *alt)
                    .unwrap_or(*default_alternative),
            ),
            _ => None,
        }
    }
}

/// One three-address instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tac {
    pub op: Operation,
    pub inputs: SmallVec<[VarId; 4]>,
    pub outputs: SmallVec<[VarId; 2]>,
}

impl Tac {
    pub fn new(
        op: Operation,
        inputs: impl IntoIterator<Item = VarId>,
        outputs: impl IntoIterator<Item = VarId>,
    ) -> Self {
        Tac {
            op,
            inputs: inputs.into_iter().collect(),
            outputs: outputs.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_port_types_thread_states() {
        let op = Operation::Load {
            pointee: Type::Bits(32),
            nstates: 2,
            alignment: 4,
        };
        assert_eq!(
            op.argument_types(),
            vec![Type::pointer(Type::Bits(32)), Type::Memory, Type::Memory],
        );
        assert_eq!(op.result_types(), vec![Type::Bits(32)]);
    }

    #[test]
    fn store_produces_one_state_per_input_state() {
        let op = Operation::Store {
            pointee: Type::Bits(8),
            nstates: 3,
            alignment: 1,
        };
        assert_eq!(op.narguments(), 5);
        assert_eq!(op.result_types(), vec![Type::Memory; 3]);
    }

    #[test]
    fn match_alternative_resolution() {
        let op = Operation::Match {
            nbits: 1,
            mapping: vec![(0, 0)],
            default_alternative: 1,
            nalternatives: 2,
        };
        assert_eq!(op.match_alternative(0), Some(0));
        assert_eq!(op.match_alternative(1), Some(1));
        assert_eq!(op.match_alternative(17), Some(1));
    }

    #[test]
    fn greater_and_equality_classification() {
        assert!(ICmpOp::Sge.is_greater());
        assert!(ICmpOp::Sge.includes_equality());
        assert!(!ICmpOp::Slt.is_greater());
        assert!(ICmpOp::Ule.includes_equality());
        assert!(!ICmpOp::Eq.includes_equality());
    }

    #[test]
    fn call_ports_follow_the_function_type() {
        let fn_type = Type::Function {
            arguments: vec![Type::Bits(32), Type::Memory],
            results: vec![Type::Bits(32), Type::Memory],
            variadic: false,
        };
        let op = Operation::Call { fn_type: fn_type.clone() };
        let args = op.argument_types();
        assert_eq!(args[0], Type::pointer(fn_type));
        assert_eq!(args.len(), 3);
        assert_eq!(op.nresults(), 2);
    }

    #[test]
    fn serde_roundtrip_operation() {
        let op = Operation::GetElementPtr {
            pointee: Type::Array { element: Box::new(Type::Bits(32)), length: 10 },
            offsets: vec![64],
            result_pointee: Type::Bits(32),
        };
        let json = serde_json::to_string(&op).unwrap();
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);
    }
}
