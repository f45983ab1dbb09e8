//! The structural type system shared by LLIR and RVSDG.
//!
//! Types are value-equal structurally, with one exception: struct types
//! carry a [`StructDeclId`] handle into a [`StructRegistry`], so that two
//! struct types are equal iff they share a declaration. Identity-by-handle
//! is what permits recursive structs.
//!
//! Besides the value types there are three opaque kinds that only exist to
//! sequence effects: `Control(n)` (the result of a match, consumed by
//! branches and structural predicates), `Memory` (a memory state), and
//! `LoopState` (an I/O-ordering state).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::StructDeclId;

/// Floating point widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatSize {
    Half,
    Float,
    Double,
}

impl FloatSize {
    /// Width in bits.
    pub fn nbits(&self) -> u16 {
        match self {
            FloatSize::Half => 16,
            FloatSize::Float => 32,
            FloatSize::Double => 64,
        }
    }
}

/// The closed set of types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// Integer of N bits.
    Bits(u16),

    /// Floating point value.
    Float(FloatSize),

    /// Pointer to a pointee type.
    Pointer(Box<Type>),

    /// Fixed-size array: `[T; N]`.
    Array { element: Box<Type>, length: u64 },

    /// Struct type, identified by its declaration handle.
    Struct(StructDeclId),

    /// Function signature with ordered arguments and results.
    Function {
        arguments: Vec<Type>,
        results: Vec<Type>,
        variadic: bool,
    },

    /// Control value with N alternatives, produced by match operations.
    Control(u64),

    /// Opaque memory state.
    Memory,

    /// Opaque loop (I/O ordering) state.
    LoopState,
}

impl Type {
    /// Shorthand for a pointer to `pointee`.
    pub fn pointer(pointee: Type) -> Type {
        Type::Pointer(Box::new(pointee))
    }

    /// Returns `true` if this is a pointer type.
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    /// Returns `true` if this is a state type (memory or loop state).
    pub fn is_state(&self) -> bool {
        matches!(self, Type::Memory | Type::LoopState)
    }

    /// The pointee of a pointer type, `None` otherwise.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(pointee) => Some(pointee),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bits(n) => write!(f, "bit{}", n),
            Type::Float(FloatSize::Half) => write!(f, "half"),
            Type::Float(FloatSize::Float) => write!(f, "float"),
            Type::Float(FloatSize::Double) => write!(f, "double"),
            Type::Pointer(pointee) => write!(f, "{}*", pointee),
            Type::Array { element, length } => write!(f, "[{} x {}]", length, element),
            Type::Struct(id) => write!(f, "struct#{}", id.0),
            Type::Function { arguments, results, variadic } => {
                write!(f, "fn(")?;
                for (n, arg) in arguments.iter().enumerate() {
                    if n != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                if *variadic {
                    write!(f, ", ...")?;
                }
                write!(f, ") -> (")?;
                for (n, res) in results.iter().enumerate() {
                    if n != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", res)?;
                }
                write!(f, ")")
            }
            Type::Control(n) => write!(f, "ctl{}", n),
            Type::Memory => write!(f, "mem"),
            Type::LoopState => write!(f, "loopstate"),
        }
    }
}

/// A struct declaration: ordered element types plus layout flags.
///
/// Element types may reference the declaration's own [`StructDeclId`]
/// (through a pointer), which is how recursive structs are expressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDecl {
    /// Optional name; anonymous structs have `None`.
    pub name: Option<String>,
    pub packed: bool,
    /// Ordered element types. Filled in after registration for recursive
    /// declarations.
    pub elements: Vec<Type>,
}

/// Registry of struct declarations, providing identity via [`StructDeclId`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructRegistry {
    decls: Vec<StructDecl>,
}

impl StructRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a declaration and returns its handle.
    pub fn declare(&mut self, decl: StructDecl) -> StructDeclId {
        let id = StructDeclId(self.decls.len() as u32);
        self.decls.push(decl);
        id
    }

    /// Registers an empty declaration whose elements are supplied later via
    /// [`set_elements`](Self::set_elements). Recursive structs are declared
    /// this way.
    pub fn declare_opaque(&mut self, name: Option<String>, packed: bool) -> StructDeclId {
        self.declare(StructDecl { name, packed, elements: Vec::new() })
    }

    pub fn set_elements(&mut self, id: StructDeclId, elements: Vec<Type>) {
        self.decls[id.0 as usize].elements = elements;
    }

    pub fn get(&self, id: StructDeclId) -> Option<&StructDecl> {
        self.decls.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

/// Linkage of globals and functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Linkage {
    External,
    AvailableExternally,
    LinkOnceAny,
    LinkOnceOdr,
    WeakAny,
    WeakOdr,
    Appending,
    Internal,
    Private,
    ExternalWeak,
    Common,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality() {
        assert_eq!(Type::Bits(32), Type::Bits(32));
        assert_ne!(Type::Bits(32), Type::Bits(64));
        assert_eq!(
            Type::pointer(Type::Float(FloatSize::Double)),
            Type::pointer(Type::Float(FloatSize::Double)),
        );
        assert_ne!(Type::Memory, Type::LoopState);
    }

    #[test]
    fn state_kinds() {
        assert!(Type::Memory.is_state());
        assert!(Type::LoopState.is_state());
        assert!(!Type::Bits(1).is_state());
        assert!(!Type::pointer(Type::Memory).is_state());
        assert!(!Type::Control(2).is_state());
    }

    #[test]
    fn struct_identity_is_by_declaration_handle() {
        let mut reg = StructRegistry::new();
        let a = reg.declare(StructDecl {
            name: Some("point".into()),
            packed: false,
            elements: vec![Type::Bits(32), Type::Bits(32)],
        });
        let b = reg.declare(StructDecl {
            name: Some("point".into()),
            packed: false,
            elements: vec![Type::Bits(32), Type::Bits(32)],
        });

        // Same layout, distinct declarations: distinct types.
        assert_ne!(Type::Struct(a), Type::Struct(b));
        assert_eq!(Type::Struct(a), Type::Struct(a));
    }

    #[test]
    fn recursive_struct_via_opaque_declaration() {
        let mut reg = StructRegistry::new();
        let list = reg.declare_opaque(Some("list".into()), false);
        reg.set_elements(list, vec![Type::Bits(64), Type::pointer(Type::Struct(list))]);

        let decl = reg.get(list).unwrap();
        assert_eq!(decl.elements[1], Type::pointer(Type::Struct(list)));
    }

    #[test]
    fn display_renders_nested_types() {
        let ty = Type::pointer(Type::Array {
            element: Box::new(Type::Bits(8)),
            length: 16,
        });
        assert_eq!(format!("{}", ty), "[16 x bit8]*");

        let f = Type::Function {
            arguments: vec![Type::Bits(32), Type::Memory],
            results: vec![Type::Bits(32), Type::Memory],
            variadic: false,
        };
        assert_eq!(format!("{}", f), "fn(bit32, mem) -> (bit32, mem)");
    }

    #[test]
    fn serde_roundtrip() {
        let ty = Type::Function {
            arguments: vec![Type::pointer(Type::Bits(8))],
            results: vec![Type::Float(FloatSize::Float)],
            variadic: true,
        };
        let json = serde_json::to_string(&ty).unwrap();
        let back: Type = serde_json::from_str(&json).unwrap();
        assert_eq!(ty, back);
    }
}
