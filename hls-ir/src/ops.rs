use crate::affine::{AffineMap, IntegerSet};
use crate::effects::EffectKind;
use crate::graph::{BlockId, Graph, OpId, ValueId};
use bitflags::bitflags;
use hls_core::Literal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    AddI,
    SubI,
    MulI,
    AddF,
    SubF,
    MulF,
}

impl ArithOp {
    pub fn is_float(self) -> bool {
        matches!(self, ArithOp::AddF | ArithOp::SubF | ArithOp::MulF)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            ArithOp::AddI => "arith.addi",
            ArithOp::SubI => "arith.subi",
            ArithOp::MulI => "arith.muli",
            ArithOp::AddF => "arith.addf",
            ArithOp::SubF => "arith.subf",
            ArithOp::MulF => "arith.mulf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpPredicate {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpPredicate {
    pub fn name(self) -> &'static str {
        match self {
            CmpPredicate::Eq => "eq",
            CmpPredicate::Ne => "ne",
            CmpPredicate::Lt => "lt",
            CmpPredicate::Le => "le",
            CmpPredicate::Gt => "gt",
            CmpPredicate::Ge => "ge",
        }
    }
}

bitflags! {
    /// Structural capabilities of an operation kind.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpTraits: u32 {
        const NONE = 0;

        /// Must be the last operation of its block.
        const TERMINATOR = 1 << 0;

        /// Effects are the union of the effects of the nested operations.
        const RECURSIVE_EFFECTS = 1 << 1;

        /// Starts a new affine scope for its regions.
        const AFFINE_SCOPE = 1 << 2;

        const LOOP = 1 << 3;

        const CONDITIONAL = 1 << 4;
    }
}

impl OpTraits {
    #[inline]
    pub fn is_terminator(self) -> bool {
        self.contains(OpTraits::TERMINATOR)
    }

    #[inline]
    pub fn has_recursive_effects(self) -> bool {
        self.contains(OpTraits::RECURSIVE_EFFECTS)
    }

    #[inline]
    pub fn is_affine_scope(self) -> bool {
        self.contains(OpTraits::AFFINE_SCOPE)
    }
}

/// A memory effect declared by a generic operation on one of its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericEffect {
    pub kind: EffectKind,
    pub operand: Option<usize>,
}

/// Operation kinds.
///
/// Operand layouts:
/// * `AffineLoad`: memref, map operands
/// * `AffineStore`: value, memref, map operands
/// * `AffineFor`: lower-bound operands, then upper-bound operands
/// * `AffineIf`: set operands; regions are `then` and `else` (possibly empty)
/// * `AffineSelect`: set operands, true value, false value
/// * `Load`: memref, indices
/// * `Store`: value, memref, indices
/// * `Select`: condition, true value, false value
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    Constant(Literal),
    Arith(ArithOp),
    Cmp(CmpPredicate),
    Select,
    AffineApply { map: AffineMap },
    AffineLoad { map: AffineMap },
    AffineStore { map: AffineMap },
    AffineFor { lower: AffineMap, upper: AffineMap, step: i64 },
    AffineIf { set: IntegerSet },
    AffineSelect { set: IntegerSet },
    AffineYield,
    Alloc,
    Dealloc,
    Load,
    Store,
    Call { callee: String },
    Generic {
        name: String,
        /// `None` when the operation declares nothing about its effects.
        effects: Option<Vec<GenericEffect>>,
        traits: OpTraits,
    },
    Branch,
    CondBranch,
    Return,
}

impl OpKind {
    pub fn traits(&self) -> OpTraits {
        match self {
            OpKind::AffineYield | OpKind::Branch | OpKind::CondBranch | OpKind::Return => {
                OpTraits::TERMINATOR
            }
            OpKind::AffineFor { .. } => OpTraits::RECURSIVE_EFFECTS | OpTraits::LOOP,
            OpKind::AffineIf { .. } => OpTraits::RECURSIVE_EFFECTS | OpTraits::CONDITIONAL,
            OpKind::Generic { traits, .. } => *traits,
            _ => OpTraits::NONE,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            OpKind::Constant(_) => "arith.constant",
            OpKind::Arith(op) => op.mnemonic(),
            OpKind::Cmp(_) => "arith.cmp",
            OpKind::Select => "arith.select",
            OpKind::AffineApply { .. } => "affine.apply",
            OpKind::AffineLoad { .. } => "affine.load",
            OpKind::AffineStore { .. } => "affine.store",
            OpKind::AffineFor { .. } => "affine.for",
            OpKind::AffineIf { .. } => "affine.if",
            OpKind::AffineSelect { .. } => "affine.select",
            OpKind::AffineYield => "affine.yield",
            OpKind::Alloc => "memref.alloc",
            OpKind::Dealloc => "memref.dealloc",
            OpKind::Load => "memref.load",
            OpKind::Store => "memref.store",
            OpKind::Call { .. } => "call",
            OpKind::Generic { name, .. } => name.as_str(),
            OpKind::Branch => "cf.br",
            OpKind::CondBranch => "cf.cond_br",
            OpKind::Return => "return",
        }
    }

    pub fn is_affine_load(&self) -> bool {
        matches!(self, OpKind::AffineLoad { .. })
    }

    pub fn is_affine_store(&self) -> bool {
        matches!(self, OpKind::AffineStore { .. })
    }

    pub fn is_affine_for(&self) -> bool {
        matches!(self, OpKind::AffineFor { .. })
    }

    pub fn is_affine_if(&self) -> bool {
        matches!(self, OpKind::AffineIf { .. })
    }
}

/// Operand accessors for the structured operation kinds.
impl Graph {
    /// The buffer accessed by a load, store or dealloc.
    pub fn memref_operand(&self, op: OpId) -> Option<ValueId> {
        let operands = &self.op(op).operands;
        match self.kind(op) {
            OpKind::AffineLoad { .. } | OpKind::Load | OpKind::Dealloc => operands.first().copied(),
            OpKind::AffineStore { .. } | OpKind::Store => operands.get(1).copied(),
            _ => None,
        }
    }

    /// Map operands of an affine load/store, or indices of a plain one.
    pub fn access_indices(&self, op: OpId) -> &[ValueId] {
        let operands = &self.op(op).operands;
        match self.kind(op) {
            OpKind::AffineLoad { .. } | OpKind::Load => &operands[1..],
            OpKind::AffineStore { .. } | OpKind::Store => &operands[2..],
            _ => &[],
        }
    }

    pub fn access_map(&self, op: OpId) -> Option<&AffineMap> {
        match self.kind(op) {
            OpKind::AffineLoad { map } | OpKind::AffineStore { map } => Some(map),
            _ => None,
        }
    }

    /// Stored value, buffer, map and map operands of an `affine.store`.
    pub fn affine_store_parts(&self, op: OpId) -> (ValueId, ValueId, &AffineMap, &[ValueId]) {
        let operands = &self.op(op).operands;
        match self.kind(op) {
            OpKind::AffineStore { map } => (operands[0], operands[1], map, &operands[2..]),
            other => panic!("{:?} is {:?}, not affine.store", op, other),
        }
    }

    pub fn stored_value(&self, op: OpId) -> Option<ValueId> {
        match self.kind(op) {
            OpKind::AffineStore { .. } | OpKind::Store => self.op(op).operands.first().copied(),
            _ => None,
        }
    }

    pub fn result(&self, op: OpId) -> ValueId {
        self.op(op).results[0]
    }

    pub fn for_lower_operands(&self, op: OpId) -> &[ValueId] {
        match self.kind(op) {
            OpKind::AffineFor { lower, .. } => &self.op(op).operands[..lower.num_inputs()],
            _ => &[],
        }
    }

    pub fn for_upper_operands(&self, op: OpId) -> &[ValueId] {
        match self.kind(op) {
            OpKind::AffineFor { lower, .. } => &self.op(op).operands[lower.num_inputs()..],
            _ => &[],
        }
    }

    /// Single body block of an `affine.for`.
    pub fn for_body(&self, op: OpId) -> BlockId {
        let region = self.op(op).regions[0];
        self.region(region).blocks[0]
    }

    pub fn induction_var(&self, op: OpId) -> ValueId {
        self.block(self.for_body(op)).args[0]
    }

    pub fn if_then_block(&self, op: OpId) -> BlockId {
        let region = self.op(op).regions[0];
        self.region(region).blocks[0]
    }

    pub fn if_else_block(&self, op: OpId) -> Option<BlockId> {
        let region = *self.op(op).regions.get(1)?;
        self.region(region).blocks.first().copied()
    }

    pub fn if_has_else(&self, op: OpId) -> bool {
        self.if_else_block(op).is_some()
    }

    pub fn integer_set(&self, op: OpId) -> Option<&IntegerSet> {
        match self.kind(op) {
            OpKind::AffineIf { set } | OpKind::AffineSelect { set } => Some(set),
            _ => None,
        }
    }

    /// Condition set and its operands of an `affine.if`.
    pub fn if_condition(&self, op: OpId) -> (&IntegerSet, &[ValueId]) {
        match self.kind(op) {
            OpKind::AffineIf { set } => (set, &self.op(op).operands),
            other => panic!("{:?} is {:?}, not affine.if", op, other),
        }
    }

    /// The `affine.yield` closing a loop body or conditional block.
    pub fn yield_of(&self, block: BlockId) -> OpId {
        let ops = &self.block(block).ops;
        let last = ops[ops.len() - 1];
        debug_assert!(matches!(self.kind(last), OpKind::AffineYield));
        last
    }

    /// The `affine.if` directly holding `op` in its `then` block, when that
    /// conditional has no `else` and `op` is its only non-terminator.
    pub fn sole_guarding_if(&self, op: OpId) -> Option<OpId> {
        let parent = self.parent_op(op)?;
        if !self.kind(parent).is_affine_if() || self.if_has_else(parent) {
            return None;
        }
        let then_block = self.if_then_block(parent);
        if self.parent_block(op) != then_block || self.block(then_block).ops.len() != 2 {
            return None;
        }
        Some(parent)
    }
}
