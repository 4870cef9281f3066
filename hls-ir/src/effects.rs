//! Memory effect queries.
//!
//! Every operation kind either declares a list of effects (possibly empty,
//! meaning pure), or declares nothing. Undeclared operations are opaque
//! unless they carry [`OpTraits::RECURSIVE_EFFECTS`], in which case their
//! effects are those of the operations nested inside them.
//!
//! ```rust
//! use hls_ir::effects::{memory_effects, EffectKind};
//! use hls_ir::{Builder, Function};
//! use hls_core::Type;
//!
//! let mut func = Function::new("f", &[], &[]);
//! let entry = func.entry_block();
//! let mut b = Builder::at_end(&mut func.graph, entry);
//! let buf = b.alloc(Type::memref(&[4], Type::F32));
//! let alloc = b.graph().defining_op(buf).unwrap();
//!
//! let effects = memory_effects(&func.graph, alloc).unwrap();
//! assert_eq!(effects[0].kind, EffectKind::Allocate);
//! ```

use crate::graph::{Graph, OpId, ValueId};
use crate::ops::{OpKind, OpTraits};
use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    Read,
    Write,
    Allocate,
    Free,
}

/// One effect instance, optionally tied to the value it acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryEffect {
    pub kind: EffectKind,
    pub value: Option<ValueId>,
}

impl MemoryEffect {
    pub fn on(kind: EffectKind, value: ValueId) -> Self {
        MemoryEffect {
            kind,
            value: Some(value),
        }
    }
}

bitflags! {
    /// Summary of the effects an operation has on a single value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EffectSet: u8 {
        const NONE = 0;
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const ALLOCATE = 1 << 2;
        const FREE = 1 << 3;

        /// Nothing is known; any effect is possible.
        const UNKNOWN = Self::READ.bits() | Self::WRITE.bits()
            | Self::ALLOCATE.bits() | Self::FREE.bits();
    }
}

impl From<EffectKind> for EffectSet {
    fn from(kind: EffectKind) -> Self {
        match kind {
            EffectKind::Read => EffectSet::READ,
            EffectKind::Write => EffectSet::WRITE,
            EffectKind::Allocate => EffectSet::ALLOCATE,
            EffectKind::Free => EffectSet::FREE,
        }
    }
}

impl EffectSet {
    #[inline]
    pub fn is_pure(self) -> bool {
        self == EffectSet::NONE
    }

    #[inline]
    pub fn may_read(self) -> bool {
        self.contains(EffectSet::READ)
    }

    #[inline]
    pub fn may_write(self) -> bool {
        self.contains(EffectSet::WRITE)
    }
}

/// Declared effects of `op`; `None` when the kind declares nothing.
pub fn memory_effects(graph: &Graph, op: OpId) -> Option<Vec<MemoryEffect>> {
    let operation = graph.op(op);
    let effects = match &operation.kind {
        OpKind::Constant(_)
        | OpKind::Arith(_)
        | OpKind::Cmp(_)
        | OpKind::Select
        | OpKind::AffineApply { .. }
        | OpKind::AffineSelect { .. }
        | OpKind::AffineYield
        | OpKind::Branch
        | OpKind::CondBranch
        | OpKind::Return => Vec::new(),
        OpKind::AffineLoad { .. } | OpKind::Load => {
            vec![MemoryEffect::on(EffectKind::Read, operation.operands[0])]
        }
        OpKind::AffineStore { .. } | OpKind::Store => {
            vec![MemoryEffect::on(EffectKind::Write, operation.operands[1])]
        }
        OpKind::Alloc => vec![MemoryEffect::on(EffectKind::Allocate, operation.results[0])],
        OpKind::Dealloc => vec![MemoryEffect::on(EffectKind::Free, operation.operands[0])],
        OpKind::AffineFor { .. } | OpKind::AffineIf { .. } | OpKind::Call { .. } => return None,
        OpKind::Generic { effects, .. } => {
            let declared = effects.as_ref()?;
            declared
                .iter()
                .map(|e| MemoryEffect {
                    kind: e.kind,
                    value: e.operand.and_then(|i| operation.operands.get(i).copied()),
                })
                .collect()
        }
    };
    Some(effects)
}

/// True when every effect `op` declares on `value` is of `kind`, and there
/// is at least one such effect.
pub fn has_single_effect(graph: &Graph, op: OpId, kind: EffectKind, value: ValueId) -> bool {
    let Some(effects) = memory_effects(graph, op) else {
        return false;
    };
    let mut found = false;
    for effect in effects.iter().filter(|e| e.value == Some(value)) {
        if effect.kind != kind {
            return false;
        }
        found = true;
    }
    found
}

/// A buffer defined by an operation whose only effect on it is `Allocate`.
pub fn is_locally_allocated(graph: &Graph, memref: ValueId) -> bool {
    graph
        .defining_op(memref)
        .map_or(false, |def| has_single_effect(graph, def, EffectKind::Allocate, memref))
}

/// Effects `op` (including anything nested in it) may have on `value`.
pub fn effects_on(graph: &Graph, op: OpId, value: ValueId) -> EffectSet {
    match memory_effects(graph, op) {
        Some(effects) => effects
            .iter()
            .filter(|e| e.value.map_or(true, |v| v == value))
            .fold(EffectSet::NONE, |acc, e| acc | EffectSet::from(e.kind)),
        None if graph.kind(op).traits().contains(OpTraits::RECURSIVE_EFFECTS) => {
            let mut acc = EffectSet::NONE;
            for &region in &graph.op(op).regions {
                for &block in &graph.region(region).blocks {
                    for &inner in &graph.block(block).ops {
                        acc |= effects_on(graph, inner, value);
                    }
                }
            }
            acc
        }
        None => EffectSet::UNKNOWN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::AffineMap;
    use crate::builder::Builder;
    use crate::module::Function;
    use crate::ops::GenericEffect;
    use hls_core::Type;

    #[test]
    fn test_pure_and_memory_ops() {
        let memref_ty = Type::memref(&[4], Type::F32);
        let mut func = Function::new("f", &[memref_ty], &[]);
        let a = func.arguments()[0];
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let c = b.index_constant(0);
        let v = b.affine_load(a, AffineMap::identity(1), vec![c]);
        let store = b.affine_store(v, a, AffineMap::identity(1), vec![c]);
        let g = &func.graph;
        let load = g.defining_op(v).unwrap();

        assert_eq!(memory_effects(g, g.defining_op(c).unwrap()), Some(vec![]));
        assert!(effects_on(g, load, a).may_read());
        assert!(!effects_on(g, load, a).may_write());
        assert!(has_single_effect(g, store, EffectKind::Write, a));
        assert!(!has_single_effect(g, store, EffectKind::Read, a));
        assert!(!is_locally_allocated(g, a));
    }

    #[test]
    fn test_local_allocation_and_free() {
        let mut func = Function::new("f", &[], &[]);
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let buf = b.alloc(Type::memref(&[2], Type::I32));
        let free = b.dealloc(buf);
        let g = &func.graph;
        assert!(is_locally_allocated(g, buf));
        assert!(has_single_effect(g, free, EffectKind::Free, buf));
        assert_eq!(effects_on(g, free, buf), EffectSet::FREE);
    }

    #[test]
    fn test_opaque_and_recursive() {
        let memref_ty = Type::memref(&[4], Type::F32);
        let mut func = Function::new("f", &[memref_ty, Type::F32], &[]);
        let (a, x) = (func.arguments()[0], func.arguments()[1]);
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let call = b.call("opaque", vec![a], &[]);
        let loop_ = b.affine_for_const(0, 4, 1);
        b.set_insertion_point_to_body(loop_.body);
        b.affine_store(x, a, AffineMap::identity(1), vec![loop_.iv]);
        b.set_insertion_point_to_end(entry);
        let declared = b.generic(
            "test.reads",
            vec![a],
            &[],
            Some(vec![GenericEffect {
                kind: EffectKind::Read,
                operand: Some(0),
            }]),
            OpTraits::NONE,
        );
        let g = &func.graph;

        assert_eq!(memory_effects(g, call), None);
        assert_eq!(effects_on(g, call, a), EffectSet::UNKNOWN);
        assert_eq!(memory_effects(g, loop_.op), None);
        assert_eq!(effects_on(g, loop_.op, a), EffectSet::WRITE);
        assert_eq!(effects_on(g, declared, a), EffectSet::READ);
    }
}
