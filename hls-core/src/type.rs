use crate::type_store::{lookup_memref, try_lookup_memref};
use std::fmt;

/// Representation of an IR value type.
///
/// Scalar types are fixed handles; buffer (memref) types are interned in the
/// global type store and referenced by id, so `Type` stays `Copy`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Type(u64);

impl Type {
    pub const NONE: Type = Type(0);
    pub const I1: Type = Type(1);
    pub const I32: Type = Type(2);
    pub const I64: Type = Type(3);
    pub const F32: Type = Type(4);
    pub const F64: Type = Type(5);
    pub const INDEX: Type = Type(6);

    const MEMREF_BASE: u64 = 0x1000;

    pub(crate) fn from_memref_id(id: u32) -> Self {
        Type(Self::MEMREF_BASE + id as u64)
    }

    pub(crate) fn memref_id(self) -> Option<u32> {
        if self.0 >= Self::MEMREF_BASE {
            Some((self.0 - Self::MEMREF_BASE) as u32)
        } else {
            None
        }
    }

    /// Interns a buffer type with a static shape.
    pub fn memref(shape: &[i64], element: Type) -> Type {
        crate::type_store::intern_memref(MemRefType {
            shape: shape.to_vec(),
            element,
        })
    }

    pub fn is_basic(self) -> bool {
        self.0 <= 6
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Type::I1 | Type::I32 | Type::I64 | Type::INDEX)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    pub fn is_memref(self) -> bool {
        self.memref_id().is_some()
    }

    /// Shape and element type, if this is a buffer type.
    pub fn memref_info(self) -> Option<MemRefType> {
        lookup_memref(self)
    }

    pub fn element_type(self) -> Option<Type> {
        self.memref_info().map(|m| m.element)
    }

    pub fn rank(self) -> Option<usize> {
        self.memref_info().map(|m| m.shape.len())
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Type::NONE => write!(f, "none"),
            Type::I1 => write!(f, "i1"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::INDEX => write!(f, "index"),
            _ => match try_lookup_memref(*self) {
                Some(m) => write!(f, "{}", m),
                None => write!(f, "Type({:#x})", self.0),
            },
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A statically shaped buffer of scalar elements.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MemRefType {
    pub shape: Vec<i64>,
    pub element: Type,
}

impl MemRefType {
    pub fn num_elements(&self) -> usize {
        self.shape.iter().map(|&d| d.max(0) as usize).product()
    }

    /// Row-major linear offset of `indices`, or `None` when out of bounds.
    pub fn linearize(&self, indices: &[i64]) -> Option<usize> {
        if indices.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0usize;
        for (&idx, &dim) in indices.iter().zip(&self.shape) {
            if idx < 0 || idx >= dim {
                return None;
            }
            offset = offset * dim as usize + idx as usize;
        }
        Some(offset)
    }
}

impl fmt::Display for MemRefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memref<")?;
        for d in &self.shape {
            write!(f, "{}x", d)?;
        }
        write!(f, "{}>", self.element)
    }
}
