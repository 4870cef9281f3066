use crate::affine::{AffineMap, IntegerSet};
use crate::graph::{BlockId, Graph, OpId, RegionId, ValueId};
use crate::ops::{ArithOp, CmpPredicate, GenericEffect, OpKind, OpTraits};
use hls_core::{Literal, Type};

/// Handles of a freshly built `affine.for`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForLoop {
    pub op: OpId,
    pub iv: ValueId,
    pub body: BlockId,
}

/// Handles of a freshly built `affine.if`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfOp {
    pub op: OpId,
    pub then_block: BlockId,
    pub else_block: Option<BlockId>,
}

#[derive(Debug, Clone, Copy)]
enum InsertPoint {
    End(BlockId),
    Before(OpId),
}

/// Creates operations at an insertion point.
pub struct Builder<'g> {
    graph: &'g mut Graph,
    ip: InsertPoint,
}

impl<'g> Builder<'g> {
    pub fn at_end(graph: &'g mut Graph, block: BlockId) -> Self {
        Self {
            graph,
            ip: InsertPoint::End(block),
        }
    }

    pub fn before(graph: &'g mut Graph, op: OpId) -> Self {
        Self {
            graph,
            ip: InsertPoint::Before(op),
        }
    }

    pub fn graph(&self) -> &Graph {
        &*self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut *self.graph
    }

    pub fn set_insertion_point_to_end(&mut self, block: BlockId) {
        self.ip = InsertPoint::End(block);
    }

    pub fn set_insertion_point_before(&mut self, op: OpId) {
        self.ip = InsertPoint::Before(op);
    }

    /// Inserts before the block's terminator, or at its end if it has none.
    pub fn set_insertion_point_to_body(&mut self, block: BlockId) {
        self.ip = match self.graph.terminator(block) {
            Some(term) => InsertPoint::Before(term),
            None => InsertPoint::End(block),
        };
    }

    fn insert(&mut self, op: OpId) -> OpId {
        match self.ip {
            InsertPoint::End(block) => self.graph.append_op(block, op),
            InsertPoint::Before(anchor) => self.graph.insert_op_before(anchor, op),
        }
        op
    }

    /// Creates and inserts an operation without regions.
    pub fn create(&mut self, kind: OpKind, operands: Vec<ValueId>, result_types: &[Type]) -> OpId {
        let op = self.graph.create_op(kind, operands, result_types, Vec::new());
        self.insert(op)
    }

    fn create_value(&mut self, kind: OpKind, operands: Vec<ValueId>, ty: Type) -> ValueId {
        let op = self.create(kind, operands, &[ty]);
        self.graph.result(op)
    }

    /// Adds a region to `op` holding one block that ends in `affine.yield`.
    fn add_yield_region(&mut self, op: OpId, arg_types: &[Type]) -> BlockId {
        let region = self.graph.create_region(Some(op));
        let block = self.graph.create_block(region, arg_types);
        let term = self.graph.create_op(OpKind::AffineYield, vec![], &[], vec![]);
        self.graph.append_op(block, term);
        block
    }

    pub fn create_block(&mut self, region: RegionId, arg_types: &[Type]) -> BlockId {
        self.graph.create_block(region, arg_types)
    }

    pub fn constant(&mut self, value: Literal) -> ValueId {
        let ty = value.get_type();
        self.create_value(OpKind::Constant(value), vec![], ty)
    }

    pub fn index_constant(&mut self, value: i64) -> ValueId {
        self.constant(Literal::Index(value))
    }

    pub fn arith(&mut self, op: ArithOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.graph.value_type(lhs);
        self.create_value(OpKind::Arith(op), vec![lhs, rhs], ty)
    }

    pub fn cmp(&mut self, pred: CmpPredicate, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.create_value(OpKind::Cmp(pred), vec![lhs, rhs], Type::I1)
    }

    pub fn select(&mut self, cond: ValueId, on_true: ValueId, on_false: ValueId) -> ValueId {
        let ty = self.graph.value_type(on_true);
        self.create_value(OpKind::Select, vec![cond, on_true, on_false], ty)
    }

    pub fn affine_apply(&mut self, map: AffineMap, operands: Vec<ValueId>) -> ValueId {
        self.create_value(OpKind::AffineApply { map }, operands, Type::INDEX)
    }

    pub fn affine_load(&mut self, memref: ValueId, map: AffineMap, indices: Vec<ValueId>) -> ValueId {
        let op = self.affine_load_op(memref, map, indices);
        self.graph.result(op)
    }

    /// Like [`Builder::affine_load`], returning the operation.
    pub fn affine_load_op(&mut self, memref: ValueId, map: AffineMap, indices: Vec<ValueId>) -> OpId {
        let ty = self
            .graph
            .value_type(memref)
            .element_type()
            .unwrap_or(Type::NONE);
        let mut operands = vec![memref];
        operands.extend(indices);
        self.create(OpKind::AffineLoad { map }, operands, &[ty])
    }

    pub fn affine_store(
        &mut self,
        value: ValueId,
        memref: ValueId,
        map: AffineMap,
        indices: Vec<ValueId>,
    ) -> OpId {
        let mut operands = vec![value, memref];
        operands.extend(indices);
        self.create(OpKind::AffineStore { map }, operands, &[])
    }

    pub fn affine_for(
        &mut self,
        lower: AffineMap,
        lower_operands: Vec<ValueId>,
        upper: AffineMap,
        upper_operands: Vec<ValueId>,
        step: i64,
    ) -> ForLoop {
        let mut operands = lower_operands;
        operands.extend(upper_operands);
        let op = self.create(OpKind::AffineFor { lower, upper, step }, operands, &[]);
        let body = self.add_yield_region(op, &[Type::INDEX]);
        let iv = self.graph.block(body).args[0];
        ForLoop { op, iv, body }
    }

    /// `affine.for %iv = lb to ub step step`
    pub fn affine_for_const(&mut self, lb: i64, ub: i64, step: i64) -> ForLoop {
        self.affine_for(
            AffineMap::constant(lb),
            vec![],
            AffineMap::constant(ub),
            vec![],
            step,
        )
    }

    pub fn affine_if(&mut self, set: IntegerSet, operands: Vec<ValueId>, with_else: bool) -> IfOp {
        let op = self.create(OpKind::AffineIf { set }, operands, &[]);
        let then_block = self.add_yield_region(op, &[]);
        let else_block = if with_else {
            Some(self.add_yield_region(op, &[]))
        } else {
            self.graph.create_region(Some(op));
            None
        };
        IfOp {
            op,
            then_block,
            else_block,
        }
    }

    pub fn affine_select(
        &mut self,
        set: IntegerSet,
        operands: Vec<ValueId>,
        on_true: ValueId,
        on_false: ValueId,
    ) -> ValueId {
        let ty = self.graph.value_type(on_true);
        let mut all = operands;
        all.push(on_true);
        all.push(on_false);
        self.create_value(OpKind::AffineSelect { set }, all, ty)
    }

    pub fn alloc(&mut self, ty: Type) -> ValueId {
        self.create_value(OpKind::Alloc, vec![], ty)
    }

    pub fn dealloc(&mut self, memref: ValueId) -> OpId {
        self.create(OpKind::Dealloc, vec![memref], &[])
    }

    pub fn load(&mut self, memref: ValueId, indices: Vec<ValueId>) -> ValueId {
        let ty = self
            .graph
            .value_type(memref)
            .element_type()
            .unwrap_or(Type::NONE);
        let mut operands = vec![memref];
        operands.extend(indices);
        self.create_value(OpKind::Load, operands, ty)
    }

    pub fn store(&mut self, value: ValueId, memref: ValueId, indices: Vec<ValueId>) -> OpId {
        let mut operands = vec![value, memref];
        operands.extend(indices);
        self.create(OpKind::Store, operands, &[])
    }

    pub fn call(&mut self, callee: &str, operands: Vec<ValueId>, result_types: &[Type]) -> OpId {
        self.create(
            OpKind::Call {
                callee: callee.to_string(),
            },
            operands,
            result_types,
        )
    }

    pub fn generic(
        &mut self,
        name: &str,
        operands: Vec<ValueId>,
        result_types: &[Type],
        effects: Option<Vec<GenericEffect>>,
        traits: OpTraits,
    ) -> OpId {
        self.create(
            OpKind::Generic {
                name: name.to_string(),
                effects,
                traits,
            },
            operands,
            result_types,
        )
    }

    /// Adds a region with one empty block to `op` and returns the block.
    pub fn add_region(&mut self, op: OpId) -> BlockId {
        let region = self.graph.create_region(Some(op));
        self.graph.create_block(region, &[])
    }

    pub fn branch(&mut self, dest: BlockId) -> OpId {
        let op = self.graph.create_op(OpKind::Branch, vec![], &[], vec![dest]);
        self.insert(op)
    }

    pub fn cond_branch(&mut self, cond: ValueId, on_true: BlockId, on_false: BlockId) -> OpId {
        let op = self
            .graph
            .create_op(OpKind::CondBranch, vec![cond], &[], vec![on_true, on_false]);
        self.insert(op)
    }

    pub fn ret(&mut self, values: Vec<ValueId>) -> OpId {
        self.create(OpKind::Return, values, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::AffineExpr;
    use crate::module::Function;

    #[test]
    fn test_for_body_has_yield_and_iv() {
        let mut func = Function::new("f", &[], &[]);
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let lp = b.affine_for_const(0, 8, 2);
        b.set_insertion_point_to_body(lp.body);
        let c = b.index_constant(1);
        let sum = b.arith(ArithOp::AddI, lp.iv, c);

        let g = &func.graph;
        assert_eq!(g.induction_var(lp.op), lp.iv);
        assert_eq!(g.value_type(lp.iv), Type::INDEX);
        assert_eq!(g.value_type(sum), Type::INDEX);
        let ops = &g.block(lp.body).ops;
        assert_eq!(ops.len(), 3);
        assert!(g.kind(ops[2]).traits().is_terminator());
        assert_eq!(g.parent_op(g.defining_op(sum).unwrap()), Some(lp.op));
    }

    #[test]
    fn test_if_regions() {
        let mut func = Function::new("f", &[Type::INDEX], &[]);
        let i = func.arguments()[0];
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let set = IntegerSet::new(1, 0, vec![AffineExpr::dim(0)], vec![true]);
        let without_else = b.affine_if(set.clone(), vec![i], false);
        let with_else = b.affine_if(set, vec![i], true);

        let g = &func.graph;
        assert_eq!(g.op(without_else.op).regions.len(), 2);
        assert!(!g.if_has_else(without_else.op));
        assert!(g.if_has_else(with_else.op));
        assert_eq!(g.if_else_block(with_else.op), with_else.else_block);
    }

    #[test]
    fn test_load_type_from_memref() {
        let memref = Type::memref(&[3], Type::I64);
        let mut func = Function::new("f", &[memref], &[]);
        let a = func.arguments()[0];
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let c = b.index_constant(2);
        let v = b.affine_load(a, AffineMap::identity(1), vec![c]);
        let w = b.load(a, vec![c]);
        assert_eq!(b.graph().value_type(v), Type::I64);
        assert_eq!(b.graph().value_type(w), Type::I64);
    }
}
