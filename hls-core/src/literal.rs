use crate::Type;
use std::fmt;
use std::ops::Neg;

#[derive(Clone, Copy)]
pub enum Literal {
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Index(i64),
}

impl Literal {
    pub fn get_type(&self) -> Type {
        match self {
            Literal::Bool(_) => Type::I1,
            Literal::I32(_) => Type::I32,
            Literal::I64(_) => Type::I64,
            Literal::F32(_) => Type::F32,
            Literal::F64(_) => Type::F64,
            Literal::Index(_) => Type::INDEX,
        }
    }

    /// The zero value of a scalar type; buffers start zero-filled.
    pub fn zero(ty: Type) -> Option<Literal> {
        match ty {
            Type::I1 => Some(Literal::Bool(false)),
            Type::I32 => Some(Literal::I32(0)),
            Type::I64 => Some(Literal::I64(0)),
            Type::F32 => Some(Literal::F32(0.0)),
            Type::F64 => Some(Literal::F64(0.0)),
            Type::INDEX => Some(Literal::Index(0)),
            _ => None,
        }
    }

    /// Integer payload widened to `i64`, for integer-like literals.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Literal::Bool(b) => Some(b as i64),
            Literal::I32(v) => Some(v as i64),
            Literal::I64(v) | Literal::Index(v) => Some(v),
            Literal::F32(_) | Literal::F64(_) => None,
        }
    }

    pub fn get_bool(&self) -> bool {
        if let Literal::Bool(v) = self {
            *v
        } else {
            panic!("not an i1 literal");
        }
    }

    pub fn get_index(&self) -> i64 {
        if let Literal::Index(v) = self {
            *v
        } else {
            panic!("not an index literal");
        }
    }

    pub fn get_f32(&self) -> f32 {
        if let Literal::F32(v) = self {
            *v
        } else {
            panic!("not an f32 literal");
        }
    }
}

/// Bitwise equality: `NaN == NaN` and `-0.0 != 0.0`, which is what result
/// comparison between two executions needs.
impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Bool(a), Literal::Bool(b)) => a == b,
            (Literal::I32(a), Literal::I32(b)) => a == b,
            (Literal::I64(a), Literal::I64(b)) => a == b,
            (Literal::Index(a), Literal::Index(b)) => a == b,
            (Literal::F32(a), Literal::F32(b)) => a.to_bits() == b.to_bits(),
            (Literal::F64(a), Literal::F64(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Literal {}

impl Neg for Literal {
    type Output = Literal;

    fn neg(self) -> Self::Output {
        match self {
            Literal::Bool(_) => panic!("i1 literals cannot be negated"),
            Literal::I32(v) => Literal::I32(v.wrapping_neg()),
            Literal::I64(v) => Literal::I64(v.wrapping_neg()),
            Literal::Index(v) => Literal::Index(v.wrapping_neg()),
            Literal::F32(v) => Literal::F32(-v),
            Literal::F64(v) => Literal::F64(-v),
        }
    }
}

impl fmt::Debug for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {}", self, self.get_type())
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(v) => write!(f, "{}", v),
            Literal::I32(v) => write!(f, "{}", v),
            Literal::I64(v) => write!(f, "{}", v),
            Literal::F32(v) => write!(f, "{:?}", v),
            Literal::F64(v) => write!(f, "{:?}", v),
            Literal::Index(v) => write!(f, "{}", v),
        }
    }
}
