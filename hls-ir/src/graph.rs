//! Arena storage for one function's operations, blocks, regions and values.
//!
//! All cross references are `Copy` handles. A value records its uses as
//! back references; erasing an operation first drops the uses it holds.

use crate::ops::OpKind;
use hls_core::Type;
use hls_support::{entity_id, Arena};

entity_id! {
    /// Handle to an [`Operation`].
    pub struct OpId, "op";
}

entity_id! {
    /// Handle to a [`Block`].
    pub struct BlockId, "bb";
}

entity_id! {
    /// Handle to a [`Region`].
    pub struct RegionId, "region";
}

entity_id! {
    /// Handle to a [`Value`].
    pub struct ValueId, "v";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Use {
    pub op: OpId,
    pub operand: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    OpResult { op: OpId, index: usize },
    BlockArg { block: BlockId, index: usize },
}

#[derive(Debug, Clone)]
pub struct Value {
    pub ty: Type,
    pub def: ValueDef,
    pub uses: Vec<Use>,
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OpKind,
    pub operands: Vec<ValueId>,
    pub results: Vec<ValueId>,
    pub regions: Vec<RegionId>,
    pub successors: Vec<BlockId>,
    pub parent: Option<BlockId>,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub args: Vec<ValueId>,
    pub ops: Vec<OpId>,
    pub parent: RegionId,
}

#[derive(Debug, Clone)]
pub struct Region {
    pub blocks: Vec<BlockId>,
    /// `None` for a function body.
    pub parent: Option<OpId>,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    ops: Arena<OpId, Operation>,
    blocks: Arena<BlockId, Block>,
    regions: Arena<RegionId, Region>,
    values: Arena<ValueId, Value>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(&self, op: OpId) -> &Operation {
        &self.ops[op]
    }

    pub fn kind(&self, op: OpId) -> &OpKind {
        &self.ops[op].kind
    }

    pub fn kind_mut(&mut self, op: OpId) -> &mut OpKind {
        &mut self.ops[op].kind
    }

    pub fn block(&self, block: BlockId) -> &Block {
        &self.blocks[block]
    }

    pub fn region(&self, region: RegionId) -> &Region {
        &self.regions[region]
    }

    pub fn value(&self, value: ValueId) -> &Value {
        &self.values[value]
    }

    pub fn value_type(&self, value: ValueId) -> Type {
        self.values[value].ty
    }

    pub fn contains_op(&self, op: OpId) -> bool {
        self.ops.contains(op)
    }

    pub fn contains_value(&self, value: ValueId) -> bool {
        self.values.contains(value)
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn op_ids(&self) -> impl Iterator<Item = OpId> + '_ {
        self.ops.ids()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.ids()
    }

    // ---- construction ----

    pub fn create_region(&mut self, parent: Option<OpId>) -> RegionId {
        let region = self.regions.alloc(Region {
            blocks: Vec::new(),
            parent,
        });
        if let Some(op) = parent {
            self.ops[op].regions.push(region);
        }
        region
    }

    /// Appends a new block with the given argument types to `region`.
    pub fn create_block(&mut self, region: RegionId, arg_types: &[Type]) -> BlockId {
        let block = self.blocks.alloc(Block {
            args: Vec::new(),
            ops: Vec::new(),
            parent: region,
        });
        for (index, &ty) in arg_types.iter().enumerate() {
            let arg = self.values.alloc(Value {
                ty,
                def: ValueDef::BlockArg { block, index },
                uses: Vec::new(),
            });
            self.blocks[block].args.push(arg);
        }
        self.regions[region].blocks.push(block);
        block
    }

    /// Creates a detached operation. Regions are added with
    /// [`Graph::create_region`].
    pub fn create_op(
        &mut self,
        kind: OpKind,
        operands: Vec<ValueId>,
        result_types: &[Type],
        successors: Vec<BlockId>,
    ) -> OpId {
        let op = self.ops.alloc(Operation {
            kind,
            operands: Vec::new(),
            results: Vec::new(),
            regions: Vec::new(),
            successors,
            parent: None,
        });
        for (index, &ty) in result_types.iter().enumerate() {
            let result = self.values.alloc(Value {
                ty,
                def: ValueDef::OpResult { op, index },
                uses: Vec::new(),
            });
            self.ops[op].results.push(result);
        }
        for (operand, value) in operands.into_iter().enumerate() {
            self.values[value].uses.push(Use { op, operand });
            self.ops[op].operands.push(value);
        }
        op
    }

    // ---- placement ----

    pub fn append_op(&mut self, block: BlockId, op: OpId) {
        debug_assert!(self.ops[op].parent.is_none(), "{:?} is already placed", op);
        self.blocks[block].ops.push(op);
        self.ops[op].parent = Some(block);
    }

    pub fn insert_op_before(&mut self, anchor: OpId, op: OpId) {
        debug_assert!(self.ops[op].parent.is_none(), "{:?} is already placed", op);
        let block = self.parent_block(anchor);
        let pos = self.position_in_block(anchor);
        self.blocks[block].ops.insert(pos, op);
        self.ops[op].parent = Some(block);
    }

    pub fn insert_op_after(&mut self, anchor: OpId, op: OpId) {
        debug_assert!(self.ops[op].parent.is_none(), "{:?} is already placed", op);
        let block = self.parent_block(anchor);
        let pos = self.position_in_block(anchor);
        self.blocks[block].ops.insert(pos + 1, op);
        self.ops[op].parent = Some(block);
    }

    /// Inserts `op` as the first operation of `block`.
    pub fn prepend_op(&mut self, block: BlockId, op: OpId) {
        debug_assert!(self.ops[op].parent.is_none(), "{:?} is already placed", op);
        self.blocks[block].ops.insert(0, op);
        self.ops[op].parent = Some(block);
    }

    fn detach(&mut self, op: OpId) {
        if let Some(block) = self.ops[op].parent.take() {
            self.blocks[block].ops.retain(|&o| o != op);
        }
    }

    pub fn move_op_before(&mut self, op: OpId, anchor: OpId) {
        self.detach(op);
        self.insert_op_before(anchor, op);
    }

    pub fn move_op_after(&mut self, op: OpId, anchor: OpId) {
        self.detach(op);
        self.insert_op_after(anchor, op);
    }

    pub fn move_op_to_end(&mut self, op: OpId, block: BlockId) {
        self.detach(op);
        self.append_op(block, op);
    }

    // ---- use lists ----

    pub fn set_operand(&mut self, op: OpId, index: usize, value: ValueId) {
        let old = self.ops[op].operands[index];
        let target = Use { op, operand: index };
        self.values[old].uses.retain(|u| *u != target);
        self.values[value].uses.push(target);
        self.ops[op].operands[index] = value;
    }

    pub fn replace_all_uses_with(&mut self, from: ValueId, to: ValueId) {
        if from == to {
            return;
        }
        let uses = std::mem::take(&mut self.values[from].uses);
        for u in &uses {
            self.ops[u.op].operands[u.operand] = to;
        }
        self.values[to].uses.extend(uses);
    }

    pub fn has_uses(&self, value: ValueId) -> bool {
        !self.values[value].uses.is_empty()
    }

    /// Distinct operations using `value`, in use-list order.
    pub fn users(&self, value: ValueId) -> Vec<OpId> {
        let mut users: Vec<OpId> = Vec::new();
        for u in &self.values[value].uses {
            if !users.contains(&u.op) {
                users.push(u.op);
            }
        }
        users
    }

    pub fn defining_op(&self, value: ValueId) -> Option<OpId> {
        match self.values[value].def {
            ValueDef::OpResult { op, .. } => Some(op),
            ValueDef::BlockArg { .. } => None,
        }
    }

    // ---- erasure ----

    /// Erases `op` and everything nested in it.
    ///
    /// Panics if a result of `op` is still used.
    pub fn erase_op(&mut self, op: OpId) {
        for &result in &self.ops[op].results {
            assert!(
                self.values[result].uses.is_empty(),
                "erasing {:?} whose result {:?} still has uses",
                op,
                result
            );
        }
        let mut nested = Vec::new();
        self.collect_nested(op, &mut nested);
        // Drop every use held by the doomed ops before removing anything.
        for &o in nested.iter().chain(std::iter::once(&op)) {
            let operands = std::mem::take(&mut self.ops[o].operands);
            for (operand, value) in operands.into_iter().enumerate() {
                if let Some(v) = self.values.get_mut(value) {
                    v.uses.retain(|u| !(u.op == o && u.operand == operand));
                }
            }
        }
        self.detach(op);
        for o in nested.into_iter().chain(std::iter::once(op)) {
            self.remove_op_storage(o);
        }
    }

    fn collect_nested(&self, op: OpId, out: &mut Vec<OpId>) {
        for &region in &self.ops[op].regions {
            for &block in &self.regions[region].blocks {
                for &inner in &self.blocks[block].ops {
                    self.collect_nested(inner, out);
                    out.push(inner);
                }
            }
        }
    }

    fn remove_op_storage(&mut self, op: OpId) {
        let Some(removed) = self.ops.remove(op) else {
            return;
        };
        for result in removed.results {
            self.values.remove(result);
        }
        for region in removed.regions {
            if let Some(r) = self.regions.remove(region) {
                for block in r.blocks {
                    if let Some(b) = self.blocks.remove(block) {
                        for arg in b.args {
                            self.values.remove(arg);
                        }
                    }
                }
            }
        }
    }

    // ---- structure queries ----

    /// The block holding `op`. Panics for detached operations.
    pub fn parent_block(&self, op: OpId) -> BlockId {
        match self.ops[op].parent {
            Some(block) => block,
            None => panic!("{:?} is not placed in a block", op),
        }
    }

    pub fn parent_region(&self, op: OpId) -> RegionId {
        self.blocks[self.parent_block(op)].parent
    }

    /// The operation whose region holds `op`, `None` at function level.
    pub fn parent_op(&self, op: OpId) -> Option<OpId> {
        self.regions[self.parent_region(op)].parent
    }

    pub fn block_parent_op(&self, block: BlockId) -> Option<OpId> {
        self.regions[self.blocks[block].parent].parent
    }

    pub fn position_in_block(&self, op: OpId) -> usize {
        let block = self.parent_block(op);
        match self.blocks[block].ops.iter().position(|&o| o == op) {
            Some(pos) => pos,
            None => panic!("{:?} missing from its parent block", op),
        }
    }

    /// Whether `a` comes strictly before `b`; both must share a block.
    pub fn is_before_in_block(&self, a: OpId, b: OpId) -> bool {
        debug_assert_eq!(self.parent_block(a), self.parent_block(b));
        self.position_in_block(a) < self.position_in_block(b)
    }

    /// `ancestor == op`, or `op` is nested somewhere inside `ancestor`.
    pub fn is_ancestor(&self, ancestor: OpId, op: OpId) -> bool {
        let mut current = Some(op);
        while let Some(o) = current {
            if o == ancestor {
                return true;
            }
            current = self.parent_op(o);
        }
        false
    }

    pub fn is_proper_ancestor(&self, ancestor: OpId, op: OpId) -> bool {
        ancestor != op && self.is_ancestor(ancestor, op)
    }

    /// `region == other`, or `other` is nested inside `region`.
    pub fn region_is_ancestor(&self, region: RegionId, other: RegionId) -> bool {
        let mut current = Some(other);
        while let Some(r) = current {
            if r == region {
                return true;
            }
            current = self.regions[r].parent.map(|op| self.parent_region(op));
        }
        false
    }

    /// The ancestor of `op` (possibly `op` itself) that lives directly in
    /// `region`.
    pub fn find_ancestor_op_in_region(&self, region: RegionId, op: OpId) -> Option<OpId> {
        let mut current = op;
        loop {
            if self.parent_region(current) == region {
                return Some(current);
            }
            current = self.parent_op(current)?;
        }
    }

    pub fn find_ancestor_op_in_block(&self, block: BlockId, op: OpId) -> Option<OpId> {
        let mut current = op;
        loop {
            if self.parent_block(current) == block {
                return Some(current);
            }
            current = self.parent_op(current)?;
        }
    }

    /// Last operation of `block`, if it is a terminator.
    pub fn terminator(&self, block: BlockId) -> Option<OpId> {
        let last = *self.blocks[block].ops.last()?;
        if self.ops[last].kind.traits().is_terminator() {
            Some(last)
        } else {
            None
        }
    }

    pub fn block_successors(&self, block: BlockId) -> Vec<BlockId> {
        match self.terminator(block) {
            Some(term) => self.ops[term].successors.clone(),
            None => Vec::new(),
        }
    }

    pub fn entry_block(&self, region: RegionId) -> Option<BlockId> {
        self.regions[region].blocks.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{ArithOp, OpKind, OpTraits};
    use hls_core::Literal;

    fn setup() -> (Graph, BlockId) {
        let mut g = Graph::new();
        let region = g.create_region(None);
        let block = g.create_block(region, &[Type::I32]);
        (g, block)
    }

    #[test]
    fn test_use_lists_follow_operands() {
        let (mut g, block) = setup();
        let arg = g.block(block).args[0];
        let c = g.create_op(OpKind::Constant(Literal::I32(1)), vec![], &[Type::I32], vec![]);
        g.append_op(block, c);
        let c_val = g.op(c).results[0];
        let add = g.create_op(OpKind::Arith(ArithOp::AddI), vec![arg, c_val], &[Type::I32], vec![]);
        g.append_op(block, add);

        assert_eq!(g.users(arg), vec![add]);
        g.replace_all_uses_with(arg, c_val);
        assert!(!g.has_uses(arg));
        assert_eq!(g.op(add).operands, vec![c_val, c_val]);
        assert_eq!(g.users(c_val), vec![add]);
        assert_eq!(g.value(c_val).uses.len(), 2);

        g.set_operand(add, 1, arg);
        assert_eq!(g.value(c_val).uses.len(), 1);
        assert_eq!(g.users(arg), vec![add]);
    }

    #[test]
    fn test_erase_drops_uses() {
        let (mut g, block) = setup();
        let arg = g.block(block).args[0];
        let add = g.create_op(OpKind::Arith(ArithOp::AddI), vec![arg, arg], &[Type::I32], vec![]);
        g.append_op(block, add);
        g.erase_op(add);
        assert!(!g.contains_op(add));
        assert!(!g.has_uses(arg));
        assert!(g.block(block).ops.is_empty());
    }

    #[test]
    #[should_panic(expected = "still has uses")]
    fn test_erase_used_result_panics() {
        let (mut g, block) = setup();
        let c = g.create_op(OpKind::Constant(Literal::I32(1)), vec![], &[Type::I32], vec![]);
        g.append_op(block, c);
        let v = g.op(c).results[0];
        let add = g.create_op(OpKind::Arith(ArithOp::AddI), vec![v, v], &[Type::I32], vec![]);
        g.append_op(block, add);
        g.erase_op(c);
    }

    #[test]
    fn test_move_and_order() {
        let (mut g, block) = setup();
        let mk = |g: &mut Graph, v: i32| {
            let op = g.create_op(OpKind::Constant(Literal::I32(v)), vec![], &[Type::I32], vec![]);
            g.append_op(block, op);
            op
        };
        let a = mk(&mut g, 0);
        let b = mk(&mut g, 1);
        let c = mk(&mut g, 2);
        assert!(g.is_before_in_block(a, c));
        g.move_op_before(c, a);
        assert_eq!(g.block(block).ops, vec![c, a, b]);
        g.move_op_after(c, b);
        assert_eq!(g.block(block).ops, vec![a, b, c]);
        assert_eq!(g.position_in_block(b), 1);
    }

    #[test]
    fn test_nested_ancestry() {
        let (mut g, block) = setup();
        let outer = g.create_op(
            OpKind::Generic {
                name: "test.region".to_string(),
                effects: None,
                traits: OpTraits::RECURSIVE_EFFECTS,
            },
            vec![],
            &[],
            vec![],
        );
        g.append_op(block, outer);
        let inner_region = g.create_region(Some(outer));
        let inner_block = g.create_block(inner_region, &[]);
        let leaf = g.create_op(OpKind::Constant(Literal::I32(3)), vec![], &[Type::I32], vec![]);
        g.append_op(inner_block, leaf);

        let top = g.parent_region(outer);
        assert!(g.is_ancestor(outer, leaf));
        assert!(!g.is_proper_ancestor(leaf, leaf));
        assert_eq!(g.parent_op(leaf), Some(outer));
        assert!(g.region_is_ancestor(top, inner_region));
        assert!(!g.region_is_ancestor(inner_region, top));
        assert_eq!(g.find_ancestor_op_in_region(top, leaf), Some(outer));
        assert_eq!(g.find_ancestor_op_in_block(inner_block, leaf), Some(leaf));

        g.erase_op(outer);
        assert!(!g.contains_op(leaf));
    }
}
